//! Contains the common tankcheck command line interface (CLI) flags.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tankcheck::{Device, TesterConfig};

/// The environment variable holding the log filter.
pub const LOG_ENV: &str = "TANKCHECK_LOG";

/// Common options for commands that compile and check a model.
#[derive(Parser, Clone, Debug, Default, PartialEq)]
pub struct CommonOptions {
    /// Device to compile for and run on: cpu, cuda (or gpu), vulkan or metal.
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<Device>,

    /// Accept inputs whose extents differ from the declared input shapes.
    #[arg(long)]
    pub dynamic: bool,

    /// Keep the IR handed to the compiler in the save directory.
    #[arg(long)]
    pub save_mlir: bool,

    /// Keep the compiled module in the save directory.
    #[arg(long)]
    pub save_vmfb: bool,

    /// Directory for saved IR and compiled modules.
    #[arg(long, value_name = "DIR")]
    pub save_dir: Option<PathBuf>,

    /// Read the `[tester]` section of this TOML file before applying flags.
    #[arg(long, value_name = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Scratch directory for generated input images, instead of
    /// `<model>/../tmp/<program name>`.
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Do not install a log subscriber.
    #[arg(long)]
    pub no_logging: bool,
}

impl CommonOptions {
    pub fn init_logging(&self) -> Result<()> {
        if self.no_logging {
            return Ok(());
        }
        #[cfg(feature = "logging")]
        {
            use std::io::IsTerminal;
            use tracing_subscriber::{EnvFilter, FmtSubscriber};
            let b = FmtSubscriber::builder()
                .with_writer(std::io::stderr)
                .with_env_filter(EnvFilter::from_env(LOG_ENV))
                .with_ansi(std::io::stderr().is_terminal());
            b.init();
        }
        #[cfg(not(feature = "logging"))]
        if std::env::var_os(LOG_ENV).is_some() {
            anyhow::bail!("support for logging disabled at compile time");
        }
        Ok(())
    }

    /// Build the configuration for a check.
    ///
    /// Starts from the config file when one is given and from the environment
    /// otherwise; flags given on the command line override either.
    pub fn tester_config(&self) -> Result<TesterConfig> {
        let mut config = match &self.config {
            Some(path) => TesterConfig::from_file(path)?,
            None => TesterConfig::from_env(),
        };
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(dir) = &self.save_dir {
            config.save_dir = dir.clone();
        }
        config.dynamic |= self.dynamic;
        config.save_mlir |= self.save_mlir;
        config.save_vmfb |= self.save_vmfb;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn parse(args: &[&str]) -> CommonOptions {
        CommonOptions::try_parse_from(std::iter::once("tankcheck").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let options = parse(&[]);
        assert_eq!(options, CommonOptions::default());
        let config = options.tester_config().unwrap();
        assert_eq!(config.device, Device::Cpu);
        assert!(!config.dynamic);
    }

    #[test]
    fn flags_fill_config() {
        let options = parse(&[
            "--device",
            "gpu",
            "--dynamic",
            "--save-mlir",
            "--save-vmfb",
            "--save-dir",
            "out",
        ]);
        let config = options.tester_config().unwrap();
        assert_eq!(config.device, Device::Cuda);
        assert!(config.dynamic);
        assert!(config.save_mlir);
        assert!(config.save_vmfb);
        assert_eq!(config.save_dir, PathBuf::from("out"));
    }

    #[test]
    fn unknown_device() {
        assert!(
            CommonOptions::try_parse_from(["tankcheck", "--device", "tpu"]).is_err()
        );
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tankcheck.toml");
        fs::write(
            &path,
            "[tester]\ndevice = \"vulkan\"\nsave-mlir = true\nsave-dir = \"from-file\"\n",
        )
        .unwrap();

        let options = parse(&["--config", path.to_str().unwrap(), "--device", "metal"]);
        let config = options.tester_config().unwrap();
        assert_eq!(config.device, Device::Metal);
        assert!(config.save_mlir);
        assert!(!config.save_vmfb);
        assert_eq!(config.save_dir, PathBuf::from("from-file"));
    }

    #[test]
    fn missing_config_file() {
        let options = parse(&["--config", "/definitely/not/here.toml"]);
        let err = options.tester_config().unwrap_err();
        assert!(format!("{err:?}").contains("failed to read config file"));
    }
}
