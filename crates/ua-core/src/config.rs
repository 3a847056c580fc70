//! Process configuration
//!
//! Environment files under `/etc/opcua-server` seed the process environment,
//! which then yields the two server parameters, `LogLevel` and `Port`.
//!
//! Run `load_environment()` before anything reads a parameter:
//!
//! ```rust
//! use ua_core::config::{load_environment, ServerParams};
//!
//! fn main() {
//!     load_environment();
//!     let params = ServerParams::from_env();
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Environment file candidates, first match wins
pub const ENV_FILE_PATHS: &[&str] = &[
    "/etc/opcua-server/environment",
    "/etc/opcua-server.env",
    ".env",
];

pub const LOG_LEVEL_MIN: i64 = 0;
pub const LOG_LEVEL_MAX: i64 = 4;
pub const MIN_PORT: i64 = 1024;
pub const MAX_PORT: i64 = 65535;
pub const DEFAULT_PORT: u16 = 4840;

/// Fill the process environment from the first readable environment file.
///
/// `$OPCUA_ENV_FILE` is tried before [`ENV_FILE_PATHS`]. Variables that are
/// already set keep their value. Returns the file that was applied.
pub fn load_environment() -> Option<String> {
    let explicit = std::env::var("OPCUA_ENV_FILE").ok();
    let found = explicit
        .iter()
        .map(String::as_str)
        .chain(ENV_FILE_PATHS.iter().copied())
        .find_map(try_load_env_file);

    if found.is_none() {
        debug!("no environment file applied");
    }
    found
}

fn try_load_env_file(path: &str) -> Option<String> {
    if !Path::new(path).is_file() {
        return None;
    }
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Cannot read {}: {}", path, e);
            return None;
        }
    };

    let (mut applied, mut kept) = (0usize, 0usize);
    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(&key).is_some() {
            kept += 1;
            continue;
        }
        let shown = if is_secret(&key) { "<hidden>" } else { value.as_str() };
        debug!("env {} = {}", key, shown);
        std::env::set_var(&key, &value);
        applied += 1;
    }
    info!("{}: applied {} variable(s), {} already present", path, applied, kept);
    Some(path.to_string())
}

fn is_secret(key: &str) -> bool {
    ["PASS", "SECRET"].iter().any(|marker| key.contains(marker))
}

/// `KEY=VALUE` with optional single or double quotes around the value.
/// Blank lines and `#` comments yield `None`.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let raw = raw.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| raw.strip_prefix(*q)?.strip_suffix(*q))
        .unwrap_or(raw);
    Some((key.to_string(), unquoted.to_string()))
}

/// Non-empty value of `key`, if any.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Value of `key`, or `default` when unset or empty.
pub fn get_config(key: &str, default: &str) -> String {
    get_config_opt(key).unwrap_or_else(|| default.to_string())
}

/// Server log verbosity, numbered as in the application parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn from_level(level: i64) -> Result<Self> {
        match level {
            0 => Ok(LogLevel::Debug),
            1 => Ok(LogLevel::Info),
            2 => Ok(LogLevel::Warning),
            3 => Ok(LogLevel::Error),
            4 => Ok(LogLevel::Fatal),
            _ => Err(Error::config(format!(
                "LogLevel value is out of range ({}..={}): {}",
                LOG_LEVEL_MIN, LOG_LEVEL_MAX, level
            ))),
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            // tracing has no level above error
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Runtime parameters of the server process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerParams {
    pub log_level: LogLevel,
    pub port: u16,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerParams {
    /// Read `OPCUA_LOG_LEVEL` and `OPCUA_PORT`, falling back to defaults
    /// (with a warning) when a value is invalid.
    pub fn from_env() -> Self {
        let mut params = Self::default();
        for (name, key) in [("LogLevel", "OPCUA_LOG_LEVEL"), ("Port", "OPCUA_PORT")] {
            if let Some(value) = get_config_opt(key) {
                if let Err(e) = params.apply(name, &value) {
                    warn!("Ignoring {}: {}", key, e);
                }
            }
        }
        params
    }

    /// Apply a single named parameter. Only `LogLevel` and `Port` are supported.
    pub fn apply(&mut self, name: &str, value: &str) -> Result<()> {
        let parsed = || {
            value
                .trim()
                .parse::<i64>()
                .map_err(|_| Error::config(format!("{} is not an integer: '{}'", name, value)))
        };

        match name {
            "LogLevel" => {
                self.log_level = LogLevel::from_level(parsed()?)?;
            }
            "Port" => {
                let port = parsed()?;
                if !(MIN_PORT..=MAX_PORT).contains(&port) {
                    return Err(Error::config(format!("Port value is out of range: {}", port)));
                }
                self.port = port as u16;
            }
            other => {
                return Err(Error::config(format!("parameter not supported: {}", other)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_env_line_simple() {
        let (k, v) = parse_env_line("FOO=bar").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_quoted() {
        let (k, v) = parse_env_line("FOO=\"bar baz\"").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar baz");
    }

    #[test]
    fn test_parse_env_line_empty() {
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("=value").is_none());
    }

    #[test]
    fn test_env_file_does_not_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "UA_CORE_TEST_NEW=from-file").unwrap();
        writeln!(file, "UA_CORE_TEST_SET=from-file").unwrap();
        std::env::set_var("UA_CORE_TEST_SET", "from-env");

        let path = file.path().to_str().unwrap().to_string();
        assert_eq!(try_load_env_file(&path), Some(path.clone()));
        assert_eq!(get_config("UA_CORE_TEST_NEW", ""), "from-file");
        assert_eq!(get_config("UA_CORE_TEST_SET", ""), "from-env");
    }

    #[test]
    fn test_log_level_range() {
        assert_eq!(LogLevel::from_level(0).unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_level(4).unwrap(), LogLevel::Fatal);
        assert!(LogLevel::from_level(5).is_err());
        assert!(LogLevel::from_level(-1).is_err());
    }

    #[test]
    fn test_apply_params() {
        let mut params = ServerParams::default();
        params.apply("Port", "4841").unwrap();
        params.apply("LogLevel", "2").unwrap();
        assert_eq!(params.port, 4841);
        assert_eq!(params.log_level, LogLevel::Warning);

        assert!(params.apply("Port", "80").is_err());
        assert!(params.apply("Port", "70000").is_err());
        assert!(params.apply("Port", "abc").is_err());
        assert!(params.apply("Colour", "1").is_err());
        // failed applies leave the previous values alone
        assert_eq!(params.port, 4841);
    }
}
