use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/birdfetch-env";
pub const DEFAULT_FETCH_PORT: u16 = 8000;
pub const DEFAULT_FETCH_HOST: &str = "0.0.0.0";
pub const DEFAULT_DATA_ROOT: &str = "/var/lib/birdfetch";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

/// Raw key/value pairs read from the env file. Every field is optional so
/// partial files work and missing ones fall back to defaults.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub data_root: Option<PathBuf>,
    pub fetch_port: Option<u16>,
    pub fetch_host: Option<String>,
    pub ytdlp_bin: Option<PathBuf>,
}

/// Resolved settings the backend runs with.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub data_root: PathBuf,
    pub fetch_port: u16,
    pub fetch_host: String,
    pub ytdlp_bin: PathBuf,
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            match key {
                "DATA_ROOT" => cfg.data_root = Some(PathBuf::from(value)),
                "FETCH_PORT" => {
                    let port: u16 = value
                        .parse()
                        .with_context(|| format!("Parsing FETCH_PORT from {}", path.display()))?;
                    cfg.fetch_port = Some(port);
                }
                "FETCH_HOST" => {
                    if !value.is_empty() {
                        cfg.fetch_host = Some(value.to_string());
                    }
                }
                "YTDLP_BIN" => {
                    if !value.is_empty() {
                        cfg.ytdlp_bin = Some(PathBuf::from(value));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

/// Loads settings from the default config path; a missing file is fine and
/// yields the built-in defaults so the service runs out of the box.
pub fn load_settings() -> Result<RuntimeSettings> {
    load_settings_from(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn load_settings_from(path: impl AsRef<Path>) -> Result<RuntimeSettings> {
    let cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    Ok(RuntimeSettings {
        data_root: cfg
            .data_root
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT)),
        fetch_port: cfg.fetch_port.unwrap_or(DEFAULT_FETCH_PORT),
        fetch_host: cfg
            .fetch_host
            .unwrap_or_else(|| DEFAULT_FETCH_HOST.to_string()),
        ytdlp_bin: cfg
            .ytdlp_bin
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN)),
    })
}
