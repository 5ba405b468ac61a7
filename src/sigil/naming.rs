//! Sigil name validation
//!
//! A name is 1 to 32 characters. Allowed characters are ASCII letters and digits,
//! the connectors `-` and `_`, and letters from these scripts:
//!
//! | Range | Script |
//! |---|---|
//! | U+00C0-U+024F (minus U+00D7, U+00F7) | Latin-1 letters, Latin Extended-A/B |
//! | U+0370-U+03FF | Greek |
//! | U+0400-U+04FF | Cyrillic |
//! | U+3040-U+309F | Hiragana |
//! | U+30A0-U+30FF | Katakana |
//! | U+4E00-U+9FFF | CJK Unified Ideographs |
//! | U+AC00-U+D7A3 | Hangul syllables |

use std::fmt;

pub const MAX_NAME_CHARS: usize = 32;

const SCRIPT_RANGES: &[(char, char)] = &[
    ('\u{00C0}', '\u{024F}'),
    ('\u{0370}', '\u{03FF}'),
    ('\u{0400}', '\u{04FF}'),
    ('\u{3040}', '\u{309F}'),
    ('\u{30A0}', '\u{30FF}'),
    ('\u{4E00}', '\u{9FFF}'),
    ('\u{AC00}', '\u{D7A3}'),
];

/// Why a sigil name was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    Empty,
    TooLong { chars: usize },
    InvalidCharacter(char),
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameError::Empty => write!(f, "name is empty"),
            NameError::TooLong { chars } => {
                write!(f, "name has {} characters (max {})", chars, MAX_NAME_CHARS)
            }
            NameError::InvalidCharacter(c) => write!(f, "character '{}' is not allowed", c),
        }
    }
}

#[inline]
fn is_allowed(c: char) -> bool {
    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
        return true;
    }
    if c == '\u{00D7}' || c == '\u{00F7}' {
        return false;
    }
    SCRIPT_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&c))
}

pub fn validate_name(name: &str) -> Result<(), NameError> {
    let chars = name.chars().count();
    if chars == 0 {
        return Err(NameError::Empty);
    }
    if chars > MAX_NAME_CHARS {
        return Err(NameError::TooLong { chars });
    }
    match name.chars().find(|&c| !is_allowed(c)) {
        Some(c) => Err(NameError::InvalidCharacter(c)),
        None => Ok(()),
    }
}
