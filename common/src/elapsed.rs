use anyhow::{anyhow, Result};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel the server sends when a time field does not apply.
pub const NOT_APPLICABLE: &str = "--";

/// Elapsed queue or run time of a server-side task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Elapsed {
    #[default]
    NotApplicable,
    Seconds(u64),
}

impl Elapsed {
    pub fn seconds(&self) -> Option<u64> {
        match self {
            Elapsed::NotApplicable => None,
            Elapsed::Seconds(s) => Some(*s),
        }
    }

    /// `"--"` or zero-padded `HH:MM:SS`.
    pub fn format(&self) -> String {
        match self {
            Elapsed::NotApplicable => NOT_APPLICABLE.to_string(),
            Elapsed::Seconds(s) => format_duration(*s),
        }
    }
}

/// Formats whole seconds as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.format())
    }
}

impl FromStr for Elapsed {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == NOT_APPLICABLE {
            return Ok(Elapsed::NotApplicable);
        }
        if let Ok(whole) = s.parse::<u64>() {
            return Ok(Elapsed::Seconds(whole));
        }
        let value: f64 = s
            .parse()
            .map_err(|_| anyhow!("Invalid elapsed time: {:?}", s))?;
        from_fractional(value).ok_or_else(|| anyhow!("Invalid elapsed time: {:?}", s))
    }
}

// Fractional seconds are truncated, never rounded.
fn from_fractional(value: f64) -> Option<Elapsed> {
    if value.is_finite() && value >= 0.0 {
        Some(Elapsed::Seconds(value.trunc() as u64))
    } else {
        None
    }
}

impl Serialize for Elapsed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Elapsed::NotApplicable => serializer.serialize_str(NOT_APPLICABLE),
            Elapsed::Seconds(s) => serializer.serialize_str(&s.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for Elapsed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Missing,
            Whole(u64),
            Fractional(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Missing => Ok(Elapsed::NotApplicable),
            Raw::Whole(n) => Ok(Elapsed::Seconds(n)),
            Raw::Fractional(v) => from_fractional(v)
                .ok_or_else(|| de::Error::custom(format!("invalid elapsed time: {}", v))),
            Raw::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}
