use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Where the publish loop takes its samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SourceMode {
    /// Read from an attached serial device; missing hardware is fatal.
    Serial,
    /// Generate random values, no hardware needed.
    Synthetic,
    /// Try serial first and fall back to synthetic when no device is found.
    #[default]
    Auto,
}

impl FromStr for SourceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(SourceMode::Serial),
            "synthetic" => Ok(SourceMode::Synthetic),
            "auto" => Ok(SourceMode::Auto),
            other => Err(ConfigError::ParsingError(format!(
                "PWS_SAMPLE_SOURCE must be one of serial, synthetic, auto (got '{}')",
                other
            ))),
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceMode::Serial => "serial",
            SourceMode::Synthetic => "synthetic",
            SourceMode::Auto => "auto",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub sample_source: SourceMode,
    pub serial_port: Option<String>,
    pub log_level: tracing::Level,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is missing or invalid.")]
    MissingOrInvalid(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok(); // Load environment variables from .env file

        let db_path = match env::var("PWS_DB_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => default_db_path()?,
        };

        let sample_source = match env::var("PWS_SAMPLE_SOURCE") {
            Ok(raw) => raw.parse::<SourceMode>()?,
            Err(_) => SourceMode::default(),
        };

        let serial_port = env::var("PWS_SERIAL_PORT")
            .ok()
            .filter(|port| !port.trim().is_empty());

        let log_level = env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .parse::<tracing::Level>()
            .map_err(|_| {
                ConfigError::ParsingError(
                    "LOG_LEVEL must be one of trace, debug, info, warn, error".to_string(),
                )
            })?;

        Ok(Self {
            db_path,
            sample_source,
            serial_port,
            log_level,
        })
    }
}

/// `~/.pws/pws.db`
fn default_db_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| ConfigError::MissingOrInvalid("HOME".to_string()))?;
    Ok(home.join(".pws").join("pws.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_mode_parses_case_insensitively() {
        assert_eq!("Serial".parse::<SourceMode>().unwrap(), SourceMode::Serial);
        assert_eq!(" synthetic ".parse::<SourceMode>().unwrap(), SourceMode::Synthetic);
        assert_eq!("AUTO".parse::<SourceMode>().unwrap(), SourceMode::Auto);
    }

    #[test]
    fn unknown_source_mode_is_rejected() {
        let err = "bluetooth".parse::<SourceMode>().unwrap_err();
        assert!(matches!(err, ConfigError::ParsingError(_)));
    }

    #[test]
    fn default_db_path_lives_under_dot_pws() {
        if let Ok(path) = default_db_path() {
            assert!(path.ends_with(".pws/pws.db"));
        }
    }
}
