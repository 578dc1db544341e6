//! Combined board configuration file

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use atlas_iobrg::BridgeConfig;
use atlas_ipc::RprocConfig;
use atlas_secure_call::DispatcherConfig;
use serde::Deserialize;

/// `[rproc]`, `[iobrg]` and `[secure_call]` sections, all optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    pub rproc: RprocConfig,
    pub iobrg: BridgeConfig,
    pub secure_call: DispatcherConfig,
}

impl BoardConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("invalid TOML")?;
        config.rproc.validate().context("[rproc]")?;
        config.iobrg.validate().context("[iobrg]")?;
        config.secure_call.validate().context("[secure_call]")?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
