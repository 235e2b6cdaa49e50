//! Check a compiled model against its reference runtime.
//!
//! A check runs two cases back to back. The first feeds the provider's own
//! sample inputs to the compiled module; the second feeds normalized inputs
//! generated locally. Both compare against the provider's reference output.
//!
//! The reference output is the same in both cases even though the second case
//! uses different inputs, and no bound is placed on the reported error; only
//! result counts and shapes can fail a check.

use crate::backend::{Backend, BackendError, CompileOptions, ModelProvider};
use crate::compare::{CompareError, SlotReport, compare_results};
use crate::config::TesterConfig;
use crate::details::TensorDetails;
use crate::input::{InputCorpus, InputError, generate_inputs};
use crate::tensor::Tensor;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The two inputs a model is checked with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Case {
    /// The provider's sample inputs.
    DefaultInputs,
    /// Inputs generated from the input corpus.
    GeneratedInputs,
}

impl fmt::Display for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Case::DefaultInputs => "default inputs",
            Case::GeneratedInputs => "generated inputs",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseReport {
    pub case: Case,
    pub slots: Vec<SlotReport>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckReport {
    pub model: String,
    pub cases: Vec<CaseReport>,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{case}: backend error")]
    Backend {
        case: Case,
        #[source]
        source: BackendError,
    },
    #[error("{case}: failed to generate inputs")]
    Input {
        case: Case,
        #[source]
        source: InputError,
    },
    #[error("{case}: {source}")]
    Compare {
        case: Case,
        #[source]
        source: CompareError,
    },
}

impl CheckError {
    pub fn case(&self) -> Case {
        match self {
            CheckError::Backend { case, .. }
            | CheckError::Input { case, .. }
            | CheckError::Compare { case, .. } => *case,
        }
    }
}

pub struct ModuleTester<'a> {
    config: TesterConfig,
    provider: &'a dyn ModelProvider,
    backend: &'a mut Backend,
    corpus: &'a dyn InputCorpus,
    workdir: PathBuf,
}

impl<'a> ModuleTester<'a> {
    /// `workdir` is the scratch directory handed to the input corpus.
    pub fn new(
        config: TesterConfig,
        provider: &'a dyn ModelProvider,
        backend: &'a mut Backend,
        corpus: &'a dyn InputCorpus,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            provider,
            backend,
            corpus,
            workdir: workdir.into(),
        }
    }

    /// Run both cases, stopping at the first failure.
    pub fn create_and_check_module(&mut self) -> Result<CheckReport, CheckError> {
        tracing::info!(
            "checking `{}` with the {} backend on {}",
            self.provider.name(),
            self.backend.name(),
            self.config.device
        );
        let cases = vec![self.check_default_inputs()?, self.check_generated_inputs()?];
        Ok(CheckReport {
            model: self.provider.name().to_string(),
            cases,
        })
    }

    fn check_default_inputs(&mut self) -> Result<CaseReport, CheckError> {
        let case = Case::DefaultInputs;
        let backend_err = |source| CheckError::Backend { case, source };

        let inputs = self.provider.get_inputs().map_err(backend_err)?;
        let (input_details, output_details) =
            self.provider.get_model_details().map_err(backend_err)?;
        let mut results = self
            .compile_and_run(&input_details, &output_details, &inputs)
            .map_err(backend_err)?;
        for (result, details) in results.iter_mut().zip(&output_details) {
            *result = result.cast(details.dtype);
        }

        let reference = self.provider.get_raw_model_output().map_err(backend_err)?;
        let slots = compare_results(&results, &reference, &output_details)
            .map_err(|source| CheckError::Compare { case, source })?;
        Ok(CaseReport { case, slots })
    }

    fn check_generated_inputs(&mut self) -> Result<CaseReport, CheckError> {
        let case = Case::GeneratedInputs;
        let backend_err = |source| CheckError::Backend { case, source };

        let (input_details, output_details) =
            self.provider.get_model_details().map_err(backend_err)?;
        let inputs = generate_inputs(&input_details, &self.workdir, self.corpus)
            .map_err(|source| CheckError::Input { case, source })?;
        let results = self
            .compile_and_run(&input_details, &output_details, &inputs)
            .map_err(backend_err)?;

        let reference = self.provider.get_raw_model_output().map_err(backend_err)?;
        let slots = compare_results(&results, &reference, &output_details)
            .map_err(|source| CheckError::Compare { case, source })?;
        Ok(CaseReport { case, slots })
    }

    /// Compile a fresh module from the provider's IR and run it once on
    /// `inputs`.
    fn compile_and_run(
        &mut self,
        input_details: &[TensorDetails],
        output_details: &[TensorDetails],
        inputs: &[Tensor],
    ) -> Result<Vec<Tensor>, BackendError> {
        let program = self.provider.get_mlir_model()?;
        let options = CompileOptions {
            device: self.config.device,
            dynamic: self.config.dynamic,
            save_mlir: self.config.save_mlir,
            save_vmfb: self.config.save_vmfb,
            save_dir: self.config.save_dir.clone(),
            inputs: input_details.to_vec(),
            outputs: output_details.to_vec(),
            ..CompileOptions::default()
        };
        let mut module = self.backend.compile(&program, &options)?;
        module.forward(inputs)
    }
}
