//! Implements a [`ModelProvider`] backed by a model artifact directory.
//!
//! The directory is what an importer leaves behind after converting a model:
//!
//! ```text
//! <model>/
//!   model.json        name, frontend, input and output details
//!   model.mlir        the imported IR program
//!   inputs/<i>.bin    sample inputs, raw little-endian elements
//!   outputs/<i>.bin   the native runtime's output for those inputs
//! ```
//!
//! Tensor files carry no header; their shapes and element types come from the
//! details in `model.json`, matched by slot index.

use super::{BackendError, Frontend, IrProgram, ModelProvider};
use crate::details::TensorDetails;
use crate::tensor::Tensor;
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "model.json";
pub const INPUTS_DIR: &str = "inputs";
pub const OUTPUTS_DIR: &str = "outputs";

fn default_program() -> String {
    "model.mlir".to_string()
}

/// The contents of `model.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub frontend: Frontend,
    /// File name of the IR program, relative to the model directory.
    #[serde(default = "default_program")]
    pub program: String,
    pub inputs: Vec<TensorDetails>,
    pub outputs: Vec<TensorDetails>,
}

impl Manifest {
    pub fn new(
        name: impl Into<String>,
        frontend: Frontend,
        inputs: Vec<TensorDetails>,
        outputs: Vec<TensorDetails>,
    ) -> Self {
        Self {
            name: name.into(),
            frontend,
            program: default_program(),
            inputs,
            outputs,
        }
    }

    /// Read `model.json` from the model directory `dir`.
    pub fn load(dir: &Path) -> Result<Self, BackendError> {
        let path = dir.join(MANIFEST_FILE);
        let contents = fs::read_to_string(&path).map_err(BackendError::io(&path))?;
        let manifest = serde_json::from_str(&contents).map_err(|e| {
            anyhow::Error::new(e).context(format!("failed to parse {}", path.display()))
        })?;
        Ok(manifest)
    }

    pub fn save(&self, dir: &Path) -> Result<(), BackendError> {
        fs::create_dir_all(dir).map_err(BackendError::io(dir))?;
        let path = dir.join(MANIFEST_FILE);
        let contents = serde_json::to_string_pretty(self).map_err(anyhow::Error::new)?;
        fs::write(&path, contents).map_err(BackendError::io(&path))
    }
}

pub struct ArtifactProvider {
    dir: PathBuf,
    manifest: Manifest,
}

impl ArtifactProvider {
    /// Open the model directory `dir`, reading its manifest eagerly.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(anyhow::anyhow!(
                "model directory is not a valid directory: {}",
                dir.display()
            )
            .into());
        }
        let manifest = Manifest::load(&dir)?;
        tracing::debug!(
            "opened model `{}` from {} ({} inputs, {} outputs)",
            manifest.name,
            dir.display(),
            manifest.inputs.len(),
            manifest.outputs.len()
        );
        Ok(Self { dir, manifest })
    }

    /// Lay out a complete model directory in `dir` and open it.
    pub fn create(
        dir: impl Into<PathBuf>,
        manifest: Manifest,
        program: &[u8],
        inputs: &[Tensor],
        outputs: &[Tensor],
    ) -> Result<Self, BackendError> {
        let dir = dir.into();
        manifest.save(&dir)?;
        let path = dir.join(&manifest.program);
        fs::write(&path, program).map_err(BackendError::io(&path))?;
        write_tensors(&dir.join(INPUTS_DIR), inputs)?;
        write_tensors(&dir.join(OUTPUTS_DIR), outputs)?;
        Ok(Self { dir, manifest })
    }
}

impl ModelProvider for ArtifactProvider {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn get_mlir_model(&self) -> Result<IrProgram, BackendError> {
        let path = self.dir.join(&self.manifest.program);
        let bytes = fs::read(&path).map_err(BackendError::io(&path))?;
        Ok(IrProgram {
            name: self.manifest.name.clone(),
            frontend: self.manifest.frontend,
            bytes,
        })
    }

    fn get_inputs(&self) -> Result<Vec<Tensor>, BackendError> {
        read_tensors(&self.dir.join(INPUTS_DIR), &self.manifest.inputs)
    }

    fn get_model_details(
        &self,
    ) -> Result<(Vec<TensorDetails>, Vec<TensorDetails>), BackendError> {
        Ok((self.manifest.inputs.clone(), self.manifest.outputs.clone()))
    }

    fn get_raw_model_output(&self) -> Result<Vec<Tensor>, BackendError> {
        read_tensors(&self.dir.join(OUTPUTS_DIR), &self.manifest.outputs)
    }
}

/// Path of the tensor file for slot `index` in `dir`.
pub fn tensor_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{index}.bin"))
}

/// Read one tensor per entry of `details` from `dir`.
pub fn read_tensors(dir: &Path, details: &[TensorDetails]) -> Result<Vec<Tensor>, BackendError> {
    details
        .iter()
        .enumerate()
        .map(|(i, detail)| read_tensor(&tensor_path(dir, i), detail))
        .collect()
}

/// Read a raw tensor file shaped by `detail`.
pub fn read_tensor(path: &Path, detail: &TensorDetails) -> Result<Tensor, BackendError> {
    let data = fs::read(path).map_err(BackendError::io(path))?;
    let dimensions = detail.resolve_dimensions(data.len())?;
    Ok(Tensor::new(dimensions, detail.dtype, data)?)
}

/// Write `tensors` to `dir` as `0.bin`, `1.bin`, ...
pub fn write_tensors(dir: &Path, tensors: &[Tensor]) -> Result<(), BackendError> {
    fs::create_dir_all(dir).map_err(BackendError::io(dir))?;
    for (i, tensor) in tensors.iter().enumerate() {
        let path = tensor_path(dir, i);
        fs::write(&path, &tensor.data).map_err(BackendError::io(&path))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tensor::TensorType;

    fn manifest() -> Manifest {
        Manifest::new(
            "tiny",
            Frontend::TfliteTosa,
            vec![TensorDetails::new("input", 0, vec![1, 2], TensorType::Uint8)],
            vec![TensorDetails::new("logits", 0, vec![-1, 3], TensorType::Float32)],
        )
    }

    #[test]
    fn create_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![Tensor::from_u8(vec![1, 2], vec![7, 9]).unwrap()];
        let outputs = vec![Tensor::from_f32(vec![2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap()];
        ArtifactProvider::create(dir.path(), manifest(), b"module {}", &inputs, &outputs)
            .unwrap();

        let provider = ArtifactProvider::open(dir.path()).unwrap();
        assert_eq!(provider.name(), "tiny");
        let program = provider.get_mlir_model().unwrap();
        assert_eq!(program.frontend, Frontend::TfliteTosa);
        assert_eq!(program.bytes, b"module {}");
        assert_eq!(provider.get_inputs().unwrap(), inputs);
        // The dynamic batch dimension is inferred from the file size.
        assert_eq!(provider.get_raw_model_output().unwrap(), outputs);
        let (i, o) = provider.get_model_details().unwrap();
        assert_eq!(i, manifest().inputs);
        assert_eq!(o, manifest().outputs);
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ArtifactProvider::open(dir.path().join("nope")).is_err());
    }

    #[test]
    fn manifest_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name": "m", "inputs": [], "outputs": [], "color": "red"}"#,
        )
        .unwrap();
        assert!(ArtifactProvider::open(dir.path()).is_err());
    }

    #[test]
    fn manifest_defaults() {
        let m: Manifest =
            serde_json::from_str(r#"{"name": "m", "inputs": [], "outputs": []}"#).unwrap();
        assert_eq!(m.program, "model.mlir");
        assert_eq!(m.frontend, Frontend::TfliteTosa);
    }

    #[test]
    fn truncated_tensor_file() {
        let dir = tempfile::tempdir().unwrap();
        let detail = TensorDetails::new("x", 0, vec![2, 2], TensorType::Float32);
        let path = dir.path().join("0.bin");
        fs::write(&path, [0u8; 12]).unwrap();
        assert!(matches!(
            read_tensor(&path, &detail),
            Err(BackendError::Tensor(_))
        ));
    }
}
