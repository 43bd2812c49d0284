use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TftpError};
use crate::packet::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::retry::{DEFAULT_TIMEOUT_SECS, MAX_RETRIES, RetryTimer};

pub const DEFAULT_PORT: u16 = 69;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or IP literal
    pub server: String,
    pub port: u16,
    /// Block size to propose (RFC 2348); 512 sends no blksize option
    pub block_size: u16,
    /// Seconds to wait for each reply before retransmitting
    pub timeout_secs: u64,
    /// Retransmissions of one packet before giving up
    pub max_retries: u32,
    /// Ask for / declare the transfer size (RFC 2349)
    pub request_tsize: bool,
    /// Socket receive buffer in KB (0 keeps the OS default)
    pub recv_buffer_kb: usize,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            block_size: DEFAULT_BLOCK_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: MAX_RETRIES,
            request_tsize: true,
            recv_buffer_kb: 256,
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn retry_timer(&self) -> RetryTimer {
        RetryTimer::new(Duration::from_secs(self.timeout_secs), self.max_retries)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// One JSON object per line for log aggregators
    Json,
}

pub fn load_config(path: &Path) -> Result<ClientConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: ClientConfig = toml::from_str(&contents)
        .map_err(|e| TftpError::Config(format!("Invalid config file {}: {}", path.display(), e)))?;
    Ok(config)
}

pub fn write_default_config(path: &Path) -> Result<()> {
    write_config(path, &ClientConfig::default())
}

pub fn write_config(path: &Path, config: &ClientConfig) -> Result<()> {
    let contents = toml::to_string_pretty(config)
        .map_err(|e| TftpError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn validate_config(config: &ClientConfig) -> Result<()> {
    if config.server.trim().is_empty() {
        return Err(TftpError::Config("server must not be empty".to_string()));
    }

    if config.port == 0 {
        return Err(TftpError::Config("port must be non-zero".to_string()));
    }

    if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&config.block_size) {
        return Err(TftpError::Config(format!(
            "block_size must be in range {}-{}",
            MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
        )));
    }

    // RFC 2349 timeout option range, applied to the local timer too
    if !(1..=255).contains(&config.timeout_secs) {
        return Err(TftpError::Config(
            "timeout_secs must be in range 1-255".to_string(),
        ));
    }

    if config.max_retries == 0 {
        return Err(TftpError::Config(
            "max_retries must be at least 1".to_string(),
        ));
    }

    if let Some(ref log_file) = config.logging.file {
        let parent = match log_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        match std::fs::metadata(parent) {
            Ok(meta) => {
                if !meta.is_dir() {
                    return Err(TftpError::Config(
                        "logging.file parent must be a directory".to_string(),
                    ));
                }
            }
            Err(e) => {
                return Err(TftpError::Config(format!(
                    "logging.file parent error: {}",
                    e
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let log_dir = tempfile::tempdir()?;
        let toml = format!(
            r#"
server = "tftp.example.net"
block_size = 1428

[logging]
format = "json"
file = "{}/tftpc.log"
"#,
            log_dir.path().display()
        );
        let config: ClientConfig = toml::from_str(&toml)?;
        validate_config(&config)?;
        assert_eq!(config.server, "tftp.example.net");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.block_size, 1428);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.logging.format, LogFormat::Json);
        Ok(())
    }

    #[test]
    fn default_config_round_trips_through_file() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tftpc.toml");
        write_default_config(&path)?;
        let config = load_config(&path)?;
        validate_config(&config)?;
        assert_eq!(config.max_retries, MAX_RETRIES);
        assert!(config.request_tsize);
        Ok(())
    }

    #[test]
    fn rejects_block_size_out_of_range() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let config = ClientConfig {
            block_size: 4,
            ..Default::default()
        };
        match validate_config(&config) {
            Ok(()) => return Err("expected error for block_size".into()),
            Err(err) => {
                assert!(format!("{err}").contains("block_size must be in range"));
            }
        }
        Ok(())
    }

    #[test]
    fn rejects_zero_timeout_and_retries() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let config = ClientConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        match validate_config(&config) {
            Ok(()) => return Err("expected error for timeout_secs".into()),
            Err(err) => assert!(format!("{err}").contains("timeout_secs")),
        }

        let config = ClientConfig {
            max_retries: 0,
            ..Default::default()
        };
        match validate_config(&config) {
            Ok(()) => return Err("expected error for max_retries".into()),
            Err(err) => assert!(format!("{err}").contains("max_retries")),
        }
        Ok(())
    }

    #[test]
    fn rejects_zero_port() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let config = ClientConfig {
            port: 0,
            ..Default::default()
        };
        match validate_config(&config) {
            Ok(()) => return Err("expected error for zero port".into()),
            Err(err) => assert!(format!("{err}").contains("port must be non-zero")),
        }
        Ok(())
    }

    #[test]
    fn rejects_logging_file_with_missing_parent()
    -> std::result::Result<(), Box<dyn std::error::Error>> {
        let config = ClientConfig {
            logging: LoggingConfig {
                file: Some(PathBuf::from("/nonexistent/tftpc/client.log")),
                ..Default::default()
            },
            ..Default::default()
        };
        match validate_config(&config) {
            Ok(()) => return Err("expected error for missing log parent".into()),
            Err(err) => assert!(format!("{err}").contains("logging.file parent error")),
        }
        Ok(())
    }

    #[test]
    fn unparsable_file_is_a_config_error() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "port = \"sixty-nine\"")?;
        match load_config(&path) {
            Ok(_) => return Err("expected parse failure".into()),
            Err(err) => assert!(matches!(err, TftpError::Config(_))),
        }
        Ok(())
    }
}
