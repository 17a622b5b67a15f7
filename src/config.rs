use std::{path::PathBuf, time::Duration};

use directories::BaseDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    dispatch::Repository,
    errors::{AppError, Result},
    protocol::DEFAULT_MAX_FRAME_BYTES,
    server::ServerOptions,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// 0 binds an ephemeral port; the bound address is logged.
    #[serde(default)]
    pub bind_port: u16,
    #[serde(default = "default_read_timeout_seconds")]
    pub read_timeout_seconds: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            bind_port: 0,
            read_timeout_seconds: default_read_timeout_seconds(),
            max_frame_bytes: default_max_frame_bytes(),
            repositories: Vec::new(),
        }
    }
}

impl Config {
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            read_timeout: Duration::from_secs(self.read_timeout_seconds),
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

pub fn load() -> Result<Config> {
    let path = config_path()?;
    let mut figment =
        Figment::from(Serialized::defaults(Config::default())).merge(Env::prefixed("HOOKGATE_"));

    if path.exists() {
        figment = figment.merge(Toml::file(&path));
    }

    figment.extract().map_err(|_| AppError::ConfigLoad)
}

pub fn config_path() -> Result<PathBuf> {
    let Some(base_dirs) = BaseDirs::new() else {
        return Err(AppError::HomeDirUnavailable);
    };
    Ok(base_dirs.config_dir().join("hookgate").join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    let Some(base_dirs) = BaseDirs::new() else {
        return Err(AppError::HomeDirUnavailable);
    };
    Ok(base_dirs.data_dir().join("hookgate"))
}

pub fn pid_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("hookgate.pid"))
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_read_timeout_seconds() -> u64 {
    30
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
