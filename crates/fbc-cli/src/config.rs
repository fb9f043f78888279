//! `--config <file>` support: a small TOML document persisting default
//! flag values across invocations. CLI flags always win over whatever a
//! config file sets — this only fills in values the user didn't pass.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub target: Option<String>,
    pub enable_madd_fusion: Option<bool>,
    pub keep_temps: Option<bool>,
}

pub fn load(path: &Path) -> anyhow::Result<FileConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config file '{}'", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file '{}'", path.display()))
}
