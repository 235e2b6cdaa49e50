//! The module that implements the `tankcheck inputs` command.

use super::check::workdir;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tankcheck::backend::artifact::{Manifest, write_tensors};
use tankcheck::{ImageCorpus, generate_inputs};
use tankcheck_cli_flags::CommonOptions;

/// Generates normalized image inputs for a model.
#[derive(Parser, PartialEq)]
pub struct InputsCommand {
    #[command(flatten)]
    common: CommonOptions,

    /// Seed for the synthetic image used when no image is in the workdir.
    #[arg(long, value_name = "SEED", default_value_t = 42)]
    seed: u64,

    /// The model artifact directory whose input details shape the inputs
    #[arg(required = true, value_name = "MODEL_DIR")]
    model: PathBuf,

    /// Where to write the inputs (defaults to `inputs` inside the workdir)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,
}

impl InputsCommand {
    /// Executes the command.
    pub fn execute(self) -> Result<()> {
        self.common.init_logging()?;

        let manifest = Manifest::load(&self.model)
            .with_context(|| format!("failed to open model: {}", self.model.display()))?;
        let workdir = workdir(&self.common, &self.model)?;
        let corpus = ImageCorpus::with_seed(self.seed);
        let inputs = generate_inputs(&manifest.inputs, &workdir, &corpus)?;

        let output = self.output.unwrap_or_else(|| workdir.join("inputs"));
        write_tensors(&output, &inputs)
            .with_context(|| format!("failed to write inputs: {}", output.display()))?;
        println!("Inputs written to {}", output.display());
        Ok(())
    }
}
