//! Guild Sigils - command line front end
//!
//! Runs one territory command against the SQLite store named in the config.
//! Guilds and worlds come from the config's `[[guilds]]` and `[[worlds]]`
//! tables; commands act as the guild's leader.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use guild_sigils::collab::{GuildInfo, MemoryHost};
use guild_sigils::core::error::Result;
use guild_sigils::core::types::PlayerId;
use guild_sigils::core::TerritoryConfig;
use guild_sigils::engine::{EngineStatus, TerritoryEngine};
use guild_sigils::sigil::TeleportResult;
use guild_sigils::spatial::ChunkPos;
use guild_sigils::territory::{CapacitySummary, ClaimRequest, Outcome, ReleaseResult, Territory};

#[derive(Parser, Debug)]
#[command(name = "guild-sigils")]
#[command(about = "Claim and manage guild territory")]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Override the SQLite database path from the config
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print index totals and per-guild capacity as JSON
    Status {
        #[arg(long)]
        guild: Option<String>,
    },
    /// Claim the chunk at chunk coordinates (x, z)
    Claim {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        world: String,
        #[arg(long, allow_hyphen_values = true)]
        x: i32,
        #[arg(long, allow_hyphen_values = true)]
        z: i32,
        /// Name for the sigil if the claim founds a new one
        #[arg(long)]
        name: Option<String>,
    },
    /// Release one chunk by its insertion ordinal
    Release {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        ordinal: u32,
    },
    /// Release every chunk of a guild
    ReleaseAll {
        #[arg(long)]
        guild: String,
    },
    /// Drop the newest chunks until `target` remain
    Shrink {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        target: u32,
    },
    Rename {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        sigil: String,
        #[arg(long)]
        to: String,
    },
    /// Compute a teleport destination at a sigil
    Teleport {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        sigil: String,
    },
    /// Repair orphan chunks
    Repair {
        /// Also split sigils whose chunks are no longer connected
        #[arg(long)]
        split: bool,
    },
}

#[derive(Serialize)]
struct GuildStatus {
    name: String,
    capacity: Option<CapacitySummary>,
    territory: Option<Territory>,
}

#[derive(Serialize)]
struct StatusReport {
    engine: EngineStatus,
    guilds: Vec<GuildStatus>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("guild_sigils=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TerritoryConfig::load(path)?,
        None => TerritoryConfig::new(),
    };
    if let Some(db) = cli.db {
        config.storage.path = db;
    }

    let host = MemoryHost::from_config(&config);
    let collab = host.collaborators(&config);
    let engine = TerritoryEngine::open(config, collab)?;

    if let Some(report) = engine.start()? {
        if report.changed_anything() {
            tracing::info!(?report, "startup repair changed territory data");
        }
    }

    let result = run(&engine, &host, cli.command);
    engine.shutdown();
    result
}

fn run(engine: &TerritoryEngine, host: &MemoryHost, command: Command) -> Result<()> {
    match command {
        Command::Status { guild } => {
            let guilds = match guild {
                Some(name) => vec![find_guild(host, &name)],
                None => host.roster.guilds(),
            };
            let report = StatusReport {
                engine: engine.status(),
                guilds: guilds
                    .into_iter()
                    .map(|g| GuildStatus {
                        capacity: engine.territories().capacity(g.id),
                        territory: engine.territories().territory(g.id),
                        name: g.name,
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Claim {
            guild,
            world,
            x,
            z,
            name,
        } => {
            let guild = find_guild(host, &guild);
            let mut request = ClaimRequest::new(guild.id, guild.leader, ChunkPos::new(world, x, z));
            if let Some(name) = name {
                request = request.with_sigil_name(name);
            }
            match engine.territories().claim(request)? {
                Outcome::Done(claimed) => println!("{}", serde_json::to_string_pretty(&claimed)?),
                Outcome::Denied(reason) => println!("Claim refused: {}", reason),
            }
        }
        Command::Release { guild, ordinal } => {
            let guild = find_guild(host, &guild);
            print_release(engine.territories().release_one(guild.id, ordinal, guild.leader)?)?;
        }
        Command::ReleaseAll { guild } => {
            let guild = find_guild(host, &guild);
            print_release(engine.territories().release_all(guild.id, guild.leader)?)?;
        }
        Command::Shrink { guild, target } => {
            let guild = find_guild(host, &guild);
            print_release(engine.territories().shrink_to(guild.id, target)?)?;
        }
        Command::Rename { guild, sigil, to } => {
            let guild = find_guild(host, &guild);
            let Some(current) = engine.sigils().resolve_by_name(guild.id, &sigil) else {
                println!("{} has no sigil named '{}'", guild.name, sigil);
                return Ok(());
            };
            match engine.sigils().rename(current.id, &to, guild.id, guild.leader)? {
                Outcome::Done(renamed) => println!("Renamed '{}' to '{}'", current.name, renamed.name),
                Outcome::Denied(reason) => println!("Rename refused: {}", reason),
            }
        }
        Command::Teleport { guild, sigil } => {
            let guild = find_guild(host, &guild);
            let Some(target) = engine.sigils().resolve_by_name(guild.id, &sigil) else {
                println!("{} has no sigil named '{}'", guild.name, sigil);
                return Ok(());
            };
            match engine.sigils().teleport_to(PlayerId::new(), &target)? {
                TeleportResult::Teleported { world, destination } => {
                    println!("Destination: {} {}", world, destination)
                }
                TeleportResult::OnCooldown { remaining_secs } => {
                    println!("On cooldown for {}s", remaining_secs)
                }
                TeleportResult::NoSafeLocation => println!("No safe location above '{}'", target.name),
            }
        }
        Command::Repair { split } => {
            let report = if split {
                engine.repair().split_disconnected()?
            } else {
                engine.repair().run()?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn print_release(result: ReleaseResult) -> Result<()> {
    match result {
        Outcome::Done(released) => println!("{}", serde_json::to_string_pretty(&released)?),
        Outcome::Denied(reason) => println!("Release refused: {}", reason),
    }
    Ok(())
}

fn find_guild(host: &MemoryHost, name: &str) -> GuildInfo {
    let found = host
        .roster
        .guilds()
        .into_iter()
        .find(|g| g.name.eq_ignore_ascii_case(name));
    match found {
        Some(guild) => guild,
        None => {
            eprintln!("Unknown guild '{}'", name);
            std::process::exit(2);
        }
    }
}
