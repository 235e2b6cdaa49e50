//! Module for configuring a model check.

use crate::backend::Device;
use anyhow::{Context, Result};
use serde_derive::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Where saved IR and compiled modules go unless configured otherwise.
pub const DEFAULT_SAVE_DIR: &str = "tankcheck_tmp";

/// Environment variables consulted by [`TesterConfig::from_env`].
pub const SAVE_MLIR_ENV: &str = "TANKCHECK_SAVE_MLIR";
pub const SAVE_VMFB_ENV: &str = "TANKCHECK_SAVE_VMFB";

// wrapped, so we have named section in config,
// also, for possible future compatibility
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct Config {
    tester: TesterConfig,
}

fn default_save_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SAVE_DIR)
}

/// Per-check configuration handed to a [`ModuleTester`].
///
/// [`ModuleTester`]: crate::ModuleTester
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TesterConfig {
    /// Keep the IR handed to the compiler.
    #[serde(default, rename = "save-mlir")]
    pub save_mlir: bool,
    /// Keep the compiled module.
    #[serde(default, rename = "save-vmfb")]
    pub save_vmfb: bool,
    /// Accept inputs whose extents differ from the declared ones.
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub device: Device,
    #[serde(default = "default_save_dir", rename = "save-dir")]
    pub save_dir: PathBuf,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            save_mlir: false,
            save_vmfb: false,
            dynamic: false,
            device: Device::Cpu,
            save_dir: default_save_dir(),
        }
    }
}

impl TesterConfig {
    /// Load the `[tester]` section of the TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(contents)?;
        Ok(config.tester)
    }

    /// Defaults, with the save flags taken from the environment.
    ///
    /// A flag is set when its variable holds anything but empty, `0` or
    /// `false`.
    pub fn from_env() -> Self {
        Self {
            save_mlir: env_flag(SAVE_MLIR_ENV),
            save_vmfb: env_flag(SAVE_VMFB_ENV),
            ..Self::default()
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    !matches!(value.trim(), "" | "0" | "false" | "FALSE" | "False")
}
