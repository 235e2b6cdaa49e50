//! Define the traits the model providers and inference backends must
//! implement, along with the types they exchange.

pub mod artifact;
pub mod in_memory;
pub mod iree;

use crate::details::{MismatchError, TensorDetails};
use crate::tensor::{Tensor, TensorError};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// The device a compiled module executes on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    Vulkan,
    Metal,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Vulkan => "vulkan",
            Device::Metal => "metal",
        })
    }
}

impl FromStr for Device {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            "vulkan" => Ok(Device::Vulkan),
            "metal" => Ok(Device::Metal),
            _ => Err(BackendError::UnknownDevice(s.to_string())),
        }
    }
}

/// The dialect an [`IrProgram`] was imported into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frontend {
    #[default]
    TfliteTosa,
    Tosa,
    Stablehlo,
    Torch,
    None,
}

impl fmt::Display for Frontend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frontend::TfliteTosa => "tflite-tosa",
            Frontend::Tosa => "tosa",
            Frontend::Stablehlo => "stablehlo",
            Frontend::Torch => "torch",
            Frontend::None => "none",
        })
    }
}

/// A model in its intermediate representation, ready to be compiled.
#[derive(Clone, Debug, PartialEq)]
pub struct IrProgram {
    pub name: String,
    pub frontend: Frontend,
    pub bytes: Vec<u8>,
}

/// Knobs for [`BackendInner::compile`].
#[derive(Clone, Debug, PartialEq)]
pub struct CompileOptions {
    pub device: Device,
    /// Accept inputs whose extents differ from the declared ones.
    pub dynamic: bool,
    /// The function invoked by [`BackendModule::forward`].
    pub entry_function: String,
    /// Keep the IR handed to the compiler in `save_dir`.
    pub save_mlir: bool,
    /// Keep the compiled module in `save_dir`.
    pub save_vmfb: bool,
    pub save_dir: PathBuf,
    /// Declared inputs, used to validate tensors passed to `forward`.
    pub inputs: Vec<TensorDetails>,
    /// Declared outputs, used to read back results.
    pub outputs: Vec<TensorDetails>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            dynamic: false,
            entry_function: "main".to_string(),
            save_mlir: false,
            save_vmfb: false,
            save_dir: PathBuf::from(crate::config::DEFAULT_SAVE_DIR),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

/// Supplies everything about the model under test: its IR, sample inputs,
/// slot metadata, and the output of the model's native runtime.
pub trait ModelProvider {
    fn name(&self) -> &str;
    fn get_mlir_model(&self) -> Result<IrProgram, BackendError>;
    fn get_inputs(&self) -> Result<Vec<Tensor>, BackendError>;
    fn get_model_details(&self)
    -> Result<(Vec<TensorDetails>, Vec<TensorDetails>), BackendError>;
    fn get_raw_model_output(&self) -> Result<Vec<Tensor>, BackendError>;
}

/// A [Backend] contains the necessary state to compile IR programs.
pub struct Backend(Box<dyn BackendInner>);
impl std::ops::Deref for Backend {
    type Target = dyn BackendInner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
impl std::ops::DerefMut for Backend {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}
impl<T: BackendInner + 'static> From<T> for Backend {
    fn from(value: T) -> Self {
        Self(Box::new(value))
    }
}

/// A compiler and runtime pair able to turn an [`IrProgram`] into something
/// executable.
pub trait BackendInner: Send + Sync {
    fn name(&self) -> &str;
    fn compile(
        &mut self,
        program: &IrProgram,
        options: &CompileOptions,
    ) -> Result<CompiledModule, BackendError>;
}

/// A [CompiledModule] is the result of [`BackendInner::compile`].
pub struct CompiledModule(Box<dyn BackendModule>);
impl std::ops::Deref for CompiledModule {
    type Target = dyn BackendModule;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
impl std::ops::DerefMut for CompiledModule {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}
impl From<Box<dyn BackendModule>> for CompiledModule {
    fn from(value: Box<dyn BackendModule>) -> Self {
        Self(value)
    }
}

/// A compiled program, ready to run on its device.
pub trait BackendModule: Send + Sync {
    fn forward(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>, BackendError>;
}

/// Errors returned by a backend or provider; most errors here should be
/// surfaced unchanged to the caller.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed while accessing backend")]
    BackendAccess(#[from] anyhow::Error),
    #[error("Failed to read or write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{tool}` exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("Failed to start `{tool}`; is it installed?")]
    ToolMissing {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Expected {expected} input tensors, got {actual}")]
    InvalidNumberOfInputs { expected: usize, actual: usize },
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
    #[error("Invalid tensor")]
    Tensor(#[from] TensorError),
    #[error("Input does not fit the model")]
    Mismatch(#[from] MismatchError),
}

impl BackendError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| BackendError::Io { path, source }
    }
}
