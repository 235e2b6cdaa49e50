//! Numeric regression checks for compiled vision models.
//!
//! A check compiles a model's intermediate representation with an inference
//! backend, runs it, and compares its outputs against the output of the
//! model's native runtime:
//!
//! - a [`ModelProvider`] supplies the IR, sample inputs, slot details and the
//!   reference output (see [`backend::artifact`] for the on-disk layout);
//! - a [`Backend`] compiles and runs the IR (see [`backend::iree`]);
//! - an [`InputCorpus`] supplies raw image data, which [`generate_inputs`]
//!   normalizes to `[-1, 1]`;
//! - [`compare_results`] checks result counts and shapes and reports the
//!   maximum absolute error of every output.
//!
//! [`ModuleTester`] ties these together.

pub mod backend;
pub mod compare;
pub mod config;
pub mod details;
pub mod input;
pub mod tensor;
pub mod testing;
mod tester;

pub use backend::{
    Backend, BackendError, CompileOptions, CompiledModule, Device, Frontend, IrProgram,
    ModelProvider,
};
pub use compare::{CompareError, SlotReport, compare_results};
pub use config::TesterConfig;
pub use details::TensorDetails;
pub use input::{ImageCorpus, InputCorpus, InputError, generate_inputs, normalize};
pub use tensor::{Tensor, TensorType};
pub use tester::{Case, CaseReport, CheckError, CheckReport, ModuleTester};
