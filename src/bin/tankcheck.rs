//! The `tankcheck` command line tool.
//!
//! Checks compiled vision models against their reference runtime.
//! See `tankcheck --help` for usage.

use anyhow::Result;
use clap::Parser;

/// Numeric regression checks for compiled vision models
#[derive(Parser)]
#[command(
    name = "tankcheck",
    version = version(),
    after_help = "Usage examples:\n\
                  \n\
                  Checking a model directory on the CPU:\n\
                  \n  \
                  tankcheck check models/inception_v4_299_fp32\n\
                  \n\
                  Checking on a GPU and keeping the compiled module:\n\
                  \n  \
                  tankcheck check --device gpu --save-vmfb models/inception_v4_299_fp32\n\
                  \n\
                  Comparing two sets of outputs:\n\
                  \n  \
                  tankcheck compare --model models/inception_v4_299_fp32 out/ models/inception_v4_299_fp32/outputs\n"
)]
struct Tankcheck {
    #[command(subcommand)]
    subcommand: Subcommand,
}

/// If TANKCHECK_VERSION_INFO is set, use it, otherwise use CARGO_PKG_VERSION.
fn version() -> &'static str {
    option_env!("TANKCHECK_VERSION_INFO").unwrap_or(env!("CARGO_PKG_VERSION"))
}

#[derive(Parser)]
enum Subcommand {
    /// Compiles a model with IREE and compares its outputs with the reference
    Check(tankcheck_cli::commands::CheckCommand),

    /// Compares two directories of output tensors
    Compare(tankcheck_cli::commands::CompareCommand),

    /// Generates normalized image inputs for a model
    Inputs(tankcheck_cli::commands::InputsCommand),

    /// Generate shell completions for the `tankcheck` CLI
    #[cfg(feature = "completion")]
    Completion(CompletionCommand),
}

impl Tankcheck {
    /// Executes the command.
    pub fn execute(self) -> Result<()> {
        match self.subcommand {
            Subcommand::Check(c) => c.execute(),
            Subcommand::Compare(c) => c.execute(),
            Subcommand::Inputs(c) => c.execute(),

            #[cfg(feature = "completion")]
            Subcommand::Completion(c) => c.execute(),
        }
    }
}

/// Generate shell completion scripts for this CLI.
///
/// Shells have different paths for their completion scripts. Please refer to
/// their documentation. For example, to generate completions for the fish
/// shell, run the following command below:
///
///     tankcheck completion fish > ~/.config/fish/completions/tankcheck.fish
///
/// For a shell like zsh you can add this to your .zshrc or startup scripts:
///
///     eval "$(tankcheck completion zsh)"
#[derive(Parser)]
#[cfg(feature = "completion")]
pub struct CompletionCommand {
    /// The shell to generate completions for.
    shell: clap_complete::Shell,
}

#[cfg(feature = "completion")]
impl CompletionCommand {
    pub fn execute(&self) -> Result<()> {
        use clap::CommandFactory;

        let mut cmd = Tankcheck::command();
        let cli_name = cmd.get_name().to_owned();

        clap_complete::generate(self.shell, &mut cmd, cli_name, &mut std::io::stdout());
        Ok(())
    }
}

fn main() -> Result<()> {
    Tankcheck::parse().execute()
}

#[test]
fn verify_cli() {
    use clap::CommandFactory;
    Tankcheck::command().debug_assert()
}
