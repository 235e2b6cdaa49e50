//! This is testing-specific code--it is public only so that it can be
//! accessible both in unit and integration tests.
//!
//! This module checks:
//! - that the IREE tools are installed (see [`IREE_TOOLS`]), and
//! - that the model fixtures live in [`artifacts_dir`].
//!
//! It also provides [`FnBackend`], a backend whose "compiled" modules call a
//! Rust closure, so the orchestration can be exercised without a compiler.

use crate::backend::iree::IreeBackend;
use crate::backend::{
    BackendError, BackendInner, BackendModule, CompileOptions, CompiledModule, IrProgram,
};
use crate::tensor::Tensor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Return the directory in which the test model fixtures are stored.
pub fn artifacts_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

/// Return `Ok` if the IREE tools can be started.
pub fn iree_is_installed() -> Result<(), BackendError> {
    IreeBackend::from_env().is_installed()
}

/// Human-readable names of the external tools the end-to-end tests need.
pub const IREE_TOOLS: &[&str] = &["iree-compile", "iree-run-module"];

type ForwardFn = dyn Fn(&[Tensor]) -> Result<Vec<Tensor>, BackendError> + Send + Sync;

/// A backend that "compiles" to a closure.
///
/// Every compiled module shares the closure. The backend records the options
/// of each `compile` call so tests can assert on them.
#[derive(Clone)]
pub struct FnBackend {
    forward: Arc<ForwardFn>,
    compiled: Arc<Mutex<Vec<CompileOptions>>>,
}

impl FnBackend {
    pub fn new(
        forward: impl Fn(&[Tensor]) -> Result<Vec<Tensor>, BackendError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            forward: Arc::new(forward),
            compiled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The options passed to every `compile` call so far.
    pub fn compiled(&self) -> Vec<CompileOptions> {
        self.compiled.lock().unwrap().clone()
    }
}

impl BackendInner for FnBackend {
    fn name(&self) -> &str {
        "fn"
    }

    fn compile(
        &mut self,
        _program: &IrProgram,
        options: &CompileOptions,
    ) -> Result<CompiledModule, BackendError> {
        self.compiled.lock().unwrap().push(options.clone());
        let box_: Box<dyn BackendModule> = Box::new(FnModule(self.forward.clone()));
        Ok(box_.into())
    }
}

struct FnModule(Arc<ForwardFn>);

impl BackendModule for FnModule {
    fn forward(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>, BackendError> {
        (self.0)(inputs)
    }
}

/// Skip a test early when the `TANKCHECK_SKIP_IREE` variable is set.
#[macro_export]
macro_rules! check_test {
    () => {
        if std::env::var_os("TANKCHECK_SKIP_IREE").is_some() {
            eprintln!("> skipping: TANKCHECK_SKIP_IREE is set");
            return Ok(());
        }
    };
}
