//! Sigils: named anchors of connected chunk groups

pub mod naming;
pub mod service;
pub mod teleport;

pub use naming::{validate_name, NameError, MAX_NAME_CHARS};
pub use service::{DeleteResult, RelocateResult, RenameResult, SigilFailure, SigilService};
pub use teleport::{find_safe_location, CooldownTracker, TeleportResult};
