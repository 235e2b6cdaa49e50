//! The module that implements the `tankcheck check` command.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tankcheck::backend::artifact::ArtifactProvider;
use tankcheck::backend::iree::IreeBackend;
use tankcheck::input::{invoker_name, scratch_dir};
use tankcheck::{Backend, CheckReport, ImageCorpus, ModuleTester};
use tankcheck_cli_flags::CommonOptions;

/// Compiles a model with IREE and compares its outputs with the reference.
#[derive(Parser, PartialEq)]
pub struct CheckCommand {
    #[command(flatten)]
    common: CommonOptions,

    /// Seed for the synthetic image used when no image is in the workdir.
    #[arg(long, value_name = "SEED", default_value_t = 42)]
    seed: u64,

    /// The model artifact directory to check
    #[arg(required = true, value_name = "MODEL_DIR")]
    model: PathBuf,
}

impl CheckCommand {
    /// Executes the command.
    pub fn execute(self) -> Result<()> {
        self.common.init_logging()?;
        let config = self.common.tester_config()?;

        let provider = ArtifactProvider::open(&self.model)
            .with_context(|| format!("failed to open model: {}", self.model.display()))?;
        let mut backend = Backend::from(IreeBackend::from_env());
        let corpus = ImageCorpus::with_seed(self.seed);
        let workdir = workdir(&self.common, &self.model)?;

        let report = ModuleTester::new(config, &provider, &mut backend, &corpus, workdir)
            .create_and_check_module()?;
        print_report(&report);
        Ok(())
    }
}

/// The scratch directory for generated inputs: `--workdir` if given, else
/// next to the model directory.
pub(crate) fn workdir(common: &CommonOptions, model: &Path) -> Result<PathBuf> {
    if let Some(dir) = &common.workdir {
        return Ok(dir.clone());
    }
    let model = model
        .canonicalize()
        .with_context(|| format!("failed to resolve model path: {}", model.display()))?;
    Ok(scratch_dir(&model, invoker_name()))
}

fn print_report(report: &CheckReport) {
    println!("{}:", report.model);
    for case in &report.cases {
        println!("  {}:", case.case);
        for slot in &case.slots {
            println!(
                "    output {} ({}): max error {}",
                slot.index, slot.name, slot.max_error
            );
        }
    }
}
