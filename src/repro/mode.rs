use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::repro::error::ConfigError;

/// How a wrapped call is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    /// Call straight through; storage is never touched.
    #[default]
    Bypass,
    /// Call through and store successful results.
    Record,
    /// Never call; answer from storage.
    Playback,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Bypass => "bypass",
            Mode::Record => "record",
            Mode::Playback => "playback",
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bypass" => Ok(Mode::Bypass),
            "record" => Ok(Mode::Record),
            "playback" => Ok(Mode::Playback),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
