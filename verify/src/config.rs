use anyhow::{bail, Result};
use common::CheckError;
use smol_str::SmolStr;
use std::fmt;
use std::str::FromStr;

pub const ENV_DEBUG: &str = "PG_CHECK_DEBUG";
pub const ENV_BITMAP_FORMAT: &str = "PG_CHECK_BITMAP_FORMAT";
pub const ENV_TIMELINE: &str = "PG_CHECK_TIMELINE";

/// Encoding of the bitmap data in debug dumps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BitmapFormat {
    Base64,
    Hex,
    #[default]
    Binary,
    None,
}

impl BitmapFormat {
    pub const ALL: [BitmapFormat; 4] = [
        BitmapFormat::Base64,
        BitmapFormat::Hex,
        BitmapFormat::Binary,
        BitmapFormat::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BitmapFormat::Base64 => "base64",
            BitmapFormat::Hex => "hex",
            BitmapFormat::Binary => "binary",
            BitmapFormat::None => "none",
        }
    }
}

impl fmt::Display for BitmapFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BitmapFormat {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        BitmapFormat::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CheckError::UnknownBitmapFormat(SmolStr::new(s)))
    }
}

/// Per-invocation settings, passed down to every check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckConfig {
    /// Dump the item bitmaps after each cross-check.
    pub debug: bool,
    pub bitmap_format: BitmapFormat,
    /// Current timeline of a cluster whose pages still carry `pd_tli`
    /// (initialized before 9.3). `None` skips the timeline check.
    pub legacy_timeline: Option<u32>,
}

impl CheckConfig {
    /// Read the configuration from `PG_CHECK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = CheckConfig::default();
        if let Some(value) = lookup(ENV_DEBUG) {
            config.debug = parse_bool(ENV_DEBUG, &value)?;
        }
        if let Some(value) = lookup(ENV_BITMAP_FORMAT) {
            config.bitmap_format = value.parse()?;
        }
        if let Some(value) = lookup(ENV_TIMELINE) {
            let Ok(tli) = value.trim().parse::<u32>() else {
                bail!(CheckError::FailedTo(
                    format!("parse {ENV_TIMELINE}").into(),
                    value.into()
                ));
            };
            config.legacy_timeline = Some(tli);
        }
        Ok(config)
    }
}

/// Boolean spelling accepted by the server for `bool` GUCs.
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" | "t" | "y" => Ok(true),
        "0" | "off" | "false" | "no" | "f" | "n" | "" => Ok(false),
        _ => bail!(CheckError::FailedTo(
            format!("parse {key}").into(),
            value.into()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: AHashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = CheckConfig::from_lookup(lookup(&[])).unwrap();
        assert!(!config.debug);
        assert_eq!(config.bitmap_format, BitmapFormat::Binary);
        assert_eq!(config.legacy_timeline, None);
    }

    #[test]
    fn from_variables() {
        let config = CheckConfig::from_lookup(lookup(&[
            (ENV_DEBUG, "on"),
            (ENV_BITMAP_FORMAT, "HEX"),
            (ENV_TIMELINE, "3"),
        ]))
        .unwrap();
        assert!(config.debug);
        assert_eq!(config.bitmap_format, BitmapFormat::Hex);
        assert_eq!(config.legacy_timeline, Some(3));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = CheckConfig::from_lookup(lookup(&[(ENV_BITMAP_FORMAT, "octal")])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckError>(),
            Some(CheckError::UnknownBitmapFormat(f)) if f == "octal"
        ));
        assert!(CheckConfig::from_lookup(lookup(&[(ENV_DEBUG, "maybe")])).is_err());
    }

    #[test]
    fn format_names_roundtrip() {
        for format in BitmapFormat::ALL {
            assert_eq!(format.to_string().parse::<BitmapFormat>().unwrap(), format);
        }
    }
}
