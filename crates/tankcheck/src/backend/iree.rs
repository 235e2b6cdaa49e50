//! Implements a [`BackendInner`] by driving the IREE command line tools.
//!
//! Compilation runs `iree-compile` on the IR program to produce a `.vmfb`
//! module; execution runs `iree-run-module` on that module, exchanging tensors
//! through raw binary files. Both tools are looked up on `PATH` unless
//! overridden with the [`COMPILE_TOOL_ENV`] and [`RUN_TOOL_ENV`] environment
//! variables.

use super::artifact::read_tensor;
use super::{
    BackendError, BackendInner, BackendModule, CompileOptions, CompiledModule, Device, Frontend,
    IrProgram,
};
use crate::details::TensorDetails;
use crate::tensor::{Tensor, TensorType};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const COMPILE_TOOL_ENV: &str = "TANKCHECK_IREE_COMPILE";
pub const RUN_TOOL_ENV: &str = "TANKCHECK_IREE_RUN_MODULE";

/// An external program, plus any arguments that always come first.
#[derive(Clone, Debug, PartialEq)]
pub struct Tool {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl Tool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    fn from_env(var: &str, default: &str) -> Self {
        match std::env::var_os(var) {
            Some(program) if !program.is_empty() => Self::new(program),
            _ => Self::new(default),
        }
    }

    fn name(&self) -> String {
        self.program.display().to_string()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args);
        command
    }
}

pub struct IreeBackend {
    compile_tool: Tool,
    run_tool: Tool,
}

impl Default for IreeBackend {
    fn default() -> Self {
        Self::from_env()
    }
}

impl IreeBackend {
    pub fn new(compile_tool: Tool, run_tool: Tool) -> Self {
        Self {
            compile_tool,
            run_tool,
        }
    }

    /// Use the tools named by the environment, falling back to `PATH`.
    pub fn from_env() -> Self {
        Self::new(
            Tool::from_env(COMPILE_TOOL_ENV, "iree-compile"),
            Tool::from_env(RUN_TOOL_ENV, "iree-run-module"),
        )
    }

    /// Check that both tools can be started.
    pub fn is_installed(&self) -> Result<(), BackendError> {
        for tool in [&self.compile_tool, &self.run_tool] {
            let mut command = tool.command();
            command.arg("--version");
            run(tool, command)?;
        }
        Ok(())
    }
}

impl BackendInner for IreeBackend {
    fn name(&self) -> &str {
        "iree"
    }

    fn compile(
        &mut self,
        program: &IrProgram,
        options: &CompileOptions,
    ) -> Result<CompiledModule, BackendError> {
        let scratch = tempfile::Builder::new()
            .prefix("tankcheck-")
            .tempdir()
            .map_err(BackendError::io(std::env::temp_dir()))?;
        if options.save_mlir || options.save_vmfb {
            fs::create_dir_all(&options.save_dir).map_err(BackendError::io(&options.save_dir))?;
        }
        let mlir_dir = if options.save_mlir {
            options.save_dir.as_path()
        } else {
            scratch.path()
        };
        let vmfb_dir = if options.save_vmfb {
            options.save_dir.as_path()
        } else {
            scratch.path()
        };
        let mlir = mlir_dir.join(format!("{}.mlir", program.name));
        let vmfb = vmfb_dir.join(format!("{}.vmfb", program.name));
        fs::write(&mlir, &program.bytes).map_err(BackendError::io(&mlir))?;

        let mut command = self.compile_tool.command();
        command
            .arg(&mlir)
            .arg(format!("--iree-input-type={}", input_type(program.frontend)))
            .arg(format!(
                "--iree-hal-target-backends={}",
                target_backend(options.device)
            ))
            .arg("-o")
            .arg(&vmfb);
        tracing::info!(
            "compiling `{}` for {} ({} bytes of IR)",
            program.name,
            options.device,
            program.bytes.len()
        );
        run(&self.compile_tool, command)?;
        if options.save_mlir {
            tracing::info!("saved IR to {}", mlir.display());
        }
        if options.save_vmfb {
            tracing::info!("saved compiled module to {}", vmfb.display());
        }

        let box_: Box<dyn BackendModule> = Box::new(IreeModule {
            run_tool: self.run_tool.clone(),
            vmfb,
            device: options.device,
            entry_function: options.entry_function.clone(),
            dynamic: options.dynamic,
            inputs: options.inputs.clone(),
            outputs: options.outputs.clone(),
            scratch,
        });
        Ok(box_.into())
    }
}

struct IreeModule {
    run_tool: Tool,
    vmfb: PathBuf,
    device: Device,
    entry_function: String,
    dynamic: bool,
    inputs: Vec<TensorDetails>,
    outputs: Vec<TensorDetails>,
    // Holds the tensor files; removed on drop.
    scratch: TempDir,
}

impl BackendModule for IreeModule {
    fn forward(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>, BackendError> {
        if !self.inputs.is_empty() {
            if self.inputs.len() != inputs.len() {
                return Err(BackendError::InvalidNumberOfInputs {
                    expected: self.inputs.len(),
                    actual: inputs.len(),
                });
            }
            for (details, tensor) in self.inputs.iter().zip(inputs) {
                details.matches(tensor, self.dynamic)?;
            }
        }
        if self.outputs.is_empty() {
            return Err(anyhow::anyhow!(
                "output details are required to read results of {}",
                self.vmfb.display()
            )
            .into());
        }

        let mut command = self.run_tool.command();
        command
            .arg(format!("--module={}", self.vmfb.display()))
            .arg(format!("--device={}", runtime_device(self.device)))
            .arg(format!("--function={}", self.entry_function));
        for (i, tensor) in inputs.iter().enumerate() {
            let path = self.scratch.path().join(format!("input_{i}.bin"));
            fs::write(&path, &tensor.data).map_err(BackendError::io(&path))?;
            command.arg(input_arg(tensor, &path));
        }
        let mut output_paths = Vec::with_capacity(self.outputs.len());
        for i in 0..self.outputs.len() {
            let path = self.scratch.path().join(format!("output_{i}.bin"));
            if path.exists() {
                fs::remove_file(&path).map_err(BackendError::io(&path))?;
            }
            command.arg(format!("--output=@{}", path.display()));
            output_paths.push(path);
        }

        tracing::debug!("running {} with {} inputs", self.vmfb.display(), inputs.len());
        run(&self.run_tool, command)?;

        output_paths
            .iter()
            .zip(&self.outputs)
            .map(|(path, details)| read_tensor(path, details))
            .collect()
    }
}

/// Run `command` to completion, turning a non-zero exit into an error that
/// carries the tool's stderr.
fn run(tool: &Tool, mut command: Command) -> Result<Output, BackendError> {
    tracing::debug!("running {command:?}");
    let output = command.output().map_err(|source| BackendError::ToolMissing {
        tool: tool.name(),
        source,
    })?;
    if !output.status.success() {
        return Err(BackendError::ToolFailed {
            tool: tool.name(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Format a tensor file as an `iree-run-module` input: `1x2x3xf32=@path`.
fn input_arg(tensor: &Tensor, path: &Path) -> String {
    let mut arg = String::from("--input=");
    for d in &tensor.dimensions {
        arg.push_str(&format!("{d}x"));
    }
    arg.push_str(element_type(tensor.ty));
    arg.push_str(&format!("=@{}", path.display()));
    arg
}

fn element_type(ty: TensorType) -> &'static str {
    match ty {
        TensorType::Float16 => "f16",
        TensorType::Bfloat16 => "bf16",
        TensorType::Float32 => "f32",
        TensorType::Float64 => "f64",
        TensorType::Uint8 => "ui8",
        TensorType::Int8 => "i8",
        TensorType::Int32 => "i32",
        TensorType::Int64 => "i64",
    }
}

fn input_type(frontend: Frontend) -> &'static str {
    match frontend {
        Frontend::TfliteTosa | Frontend::Tosa => "tosa",
        Frontend::Stablehlo => "stablehlo",
        Frontend::Torch => "torch",
        Frontend::None => "none",
    }
}

fn target_backend(device: Device) -> &'static str {
    match device {
        Device::Cpu => "llvm-cpu",
        Device::Cuda => "cuda",
        Device::Vulkan => "vulkan-spirv",
        Device::Metal => "metal-spirv",
    }
}

fn runtime_device(device: Device) -> &'static str {
    match device {
        Device::Cpu => "local-task",
        Device::Cuda => "cuda",
        Device::Vulkan => "vulkan",
        Device::Metal => "metal",
    }
}
