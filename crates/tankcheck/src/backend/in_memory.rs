//! Implement a [`ModelProvider`] that holds everything in memory.

use super::{BackendError, IrProgram, ModelProvider};
use crate::details::TensorDetails;
use crate::tensor::Tensor;

#[derive(Clone, Debug)]
pub struct InMemoryProvider {
    pub program: IrProgram,
    pub inputs: Vec<Tensor>,
    pub input_details: Vec<TensorDetails>,
    pub output_details: Vec<TensorDetails>,
    pub reference: Vec<Tensor>,
}

impl InMemoryProvider {
    pub fn new(program: IrProgram) -> Self {
        Self {
            program,
            inputs: Vec::new(),
            input_details: Vec::new(),
            output_details: Vec::new(),
            reference: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, details: Vec<TensorDetails>, inputs: Vec<Tensor>) -> Self {
        self.input_details = details;
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, details: Vec<TensorDetails>, reference: Vec<Tensor>) -> Self {
        self.output_details = details;
        self.reference = reference;
        self
    }
}

impl ModelProvider for InMemoryProvider {
    fn name(&self) -> &str {
        &self.program.name
    }

    fn get_mlir_model(&self) -> Result<IrProgram, BackendError> {
        Ok(self.program.clone())
    }

    fn get_inputs(&self) -> Result<Vec<Tensor>, BackendError> {
        Ok(self.inputs.clone())
    }

    fn get_model_details(
        &self,
    ) -> Result<(Vec<TensorDetails>, Vec<TensorDetails>), BackendError> {
        Ok((self.input_details.clone(), self.output_details.clone()))
    }

    fn get_raw_model_output(&self) -> Result<Vec<Tensor>, BackendError> {
        Ok(self.reference.clone())
    }
}
