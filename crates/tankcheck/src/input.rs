//! Generate normalized image inputs for a model.
//!
//! Raw pixels come from an [`InputCorpus`]; [`generate_inputs`] then maps
//! every element from `[0, 255]` onto `[-1, 1]` with `v / 127.5 - 1`, the
//! input domain the vision models under test were trained on.

use crate::details::{TensorDetails, is_dynamic_dimension};
use crate::tensor::{Tensor, TensorError, TensorType, f32_vec_to_bytes};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Half of the raw pixel range.
pub const SCALE: f32 = 127.5;
/// Subtracted after scaling so the range is centered on zero.
pub const OFFSET: f32 = 1.0;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("the model declares no inputs")]
    NoInputs,
    #[error("cannot generate image data for input `{name}` with shape {shape:?}")]
    UnsupportedShape { name: String, shape: Vec<i64> },
    #[error("the input corpus produced a malformed tensor")]
    Tensor(#[from] TensorError),
    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to process image {path}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A source of raw image-like data.
pub trait InputCorpus {
    /// Produce one raw tensor shaped like `details`, using `workdir` for any
    /// files the corpus keeps between runs.
    fn generate_input(&self, workdir: &Path, details: &TensorDetails)
    -> Result<Tensor, InputError>;
}

/// The scratch directory for a run: `<base>/../tmp/<basename of invoker>`.
pub fn scratch_dir(base: &Path, invoker: impl AsRef<Path>) -> PathBuf {
    let name = invoker
        .as_ref()
        .file_name()
        .unwrap_or_else(|| OsStr::new("tankcheck"));
    base.join("..").join("tmp").join(name)
}

/// The basename of the running executable, as invoked.
pub fn invoker_name() -> PathBuf {
    std::env::args_os()
        .next()
        .map(PathBuf::from)
        .and_then(|p| p.file_name().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("tankcheck"))
}

/// Rescale every element of `raw` from `[0, 255]` to `[-1, 1]` as `float32`.
///
/// The result holds one element per whole element of `raw.data`, under the
/// dimensions of `raw`.
pub fn normalize(raw: &Tensor) -> Tensor {
    let values: Vec<f32> = raw
        .to_f32_vec()
        .into_iter()
        .map(|v| v / SCALE - OFFSET)
        .collect();
    Tensor {
        dimensions: raw.dimensions.clone(),
        ty: TensorType::Float32,
        data: f32_vec_to_bytes(&values),
    }
}

/// Build the inputs for the first declared input slot.
///
/// Creates `workdir` if needed. The result always holds exactly one
/// normalized `float32` tensor.
pub fn generate_inputs(
    input_details: &[TensorDetails],
    workdir: &Path,
    corpus: &dyn InputCorpus,
) -> Result<Vec<Tensor>, InputError> {
    let details = input_details.first().ok_or(InputError::NoInputs)?;
    fs::create_dir_all(workdir).map_err(|source| InputError::Io {
        path: workdir.to_path_buf(),
        source,
    })?;
    let Tensor {
        dimensions,
        ty,
        data,
    } = corpus.generate_input(workdir, details)?;
    let raw = Tensor::new(dimensions, ty, data)?;
    tracing::debug!(
        "generated {:?} {} input for `{}`",
        raw.dimensions,
        raw.ty,
        details.name
    );
    Ok(vec![normalize(&raw)])
}

/// Where the channels of an image tensor live.
#[derive(Clone, Copy, Debug, PartialEq)]
struct ImageLayout {
    batch: u32,
    height: u32,
    width: u32,
    channels: u32,
    channels_first: bool,
    batched: bool,
}

impl ImageLayout {
    fn from_details(details: &TensorDetails) -> Result<Self, InputError> {
        let unsupported = || InputError::UnsupportedShape {
            name: details.name.clone(),
            shape: details.shape.clone(),
        };
        let (batch, rest, batched) = match details.shape.as_slice() {
            [n, rest @ ..] if rest.len() == 3 => (*n, rest, true),
            rest if rest.len() == 3 => (1, rest, false),
            _ => return Err(unsupported()),
        };
        let batch = if is_dynamic_dimension(batch) { 1 } else { batch };
        let (height, width, channels, channels_first) = match rest {
            [h, w, c] if *c == 1 || *c == 3 => (*h, *w, *c, false),
            [c, h, w] if *c == 1 || *c == 3 => (*h, *w, *c, true),
            _ => return Err(unsupported()),
        };
        let dim = |d: i64| u32::try_from(d).ok().filter(|d| *d > 0);
        Ok(Self {
            batch: dim(batch).ok_or_else(unsupported)?,
            height: dim(height).ok_or_else(unsupported)?,
            width: dim(width).ok_or_else(unsupported)?,
            channels: channels as u32,
            channels_first,
            batched,
        })
    }

    fn dimensions(&self) -> Vec<u32> {
        let mut dims = Vec::with_capacity(4);
        if self.batched {
            dims.push(self.batch);
        }
        if self.channels_first {
            dims.extend([self.channels, self.height, self.width]);
        } else {
            dims.extend([self.height, self.width, self.channels]);
        }
        dims
    }

    /// Lay out an image of the right size as the tensor's element bytes.
    fn pixels(&self, image: &DynamicImage) -> Vec<u8> {
        let hwc = if self.channels == 1 {
            image.to_luma8().into_raw()
        } else {
            image.to_rgb8().into_raw()
        };
        let one = if self.channels_first {
            let (c, hw) = (self.channels as usize, (self.height * self.width) as usize);
            let mut chw = vec![0; hwc.len()];
            for (i, v) in hwc.iter().enumerate() {
                chw[(i % c) * hw + i / c] = *v;
            }
            chw
        } else {
            hwc
        };
        one.repeat(self.batch as usize)
    }
}

/// An [`InputCorpus`] that reads images cached in the scratch directory.
///
/// The first `png`/`jpg`/`jpeg` file (by path) in the directory is resized to
/// the input's spatial extent. When the directory holds no image, a
/// deterministic one is synthesized and saved there, so later runs see the
/// same pixels.
#[derive(Clone, Debug)]
pub struct ImageCorpus {
    seed: u64,
}

impl Default for ImageCorpus {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

impl ImageCorpus {
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    fn find_image(&self, workdir: &Path) -> Option<PathBuf> {
        WalkDir::new(workdir)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .find(|p| {
                p.extension()
                    .and_then(OsStr::to_str)
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
    }

    fn synthesize(&self, workdir: &Path, layout: &ImageLayout) -> Result<PathBuf, InputError> {
        let path = workdir.join(format!("synthetic-{}x{}.png", layout.height, layout.width));
        let noise = lcg(self.seed, (layout.width * layout.height) as usize);
        let (w, h) = (layout.width, layout.height);
        let image = RgbImage::from_fn(w, h, |x, y| {
            let n = noise[(y * w + x) as usize];
            Rgb([
                (x * 255 / w.max(1)) as u8,
                (y * 255 / h.max(1)) as u8,
                n,
            ])
        });
        image.save(&path).map_err(|source| InputError::Image {
            path: path.clone(),
            source,
        })?;
        tracing::info!("synthesized input image {}", path.display());
        Ok(path)
    }
}

impl InputCorpus for ImageCorpus {
    fn generate_input(
        &self,
        workdir: &Path,
        details: &TensorDetails,
    ) -> Result<Tensor, InputError> {
        let layout = ImageLayout::from_details(details)?;
        let path = match self.find_image(workdir) {
            Some(path) => path,
            None => self.synthesize(workdir, &layout)?,
        };
        tracing::debug!("using input image {}", path.display());
        let image = image::open(&path)
            .map_err(|source| InputError::Image {
                path: path.clone(),
                source,
            })?
            .resize_exact(layout.width, layout.height, FilterType::Triangle);
        Ok(Tensor::from_u8(layout.dimensions(), layout.pixels(&image))?)
    }
}

/// Deterministic bytes from a linear congruential generator.
fn lcg(seed: u64, n: usize) -> Vec<u8> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            // Numerical Recipes parameters.
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalization_boundaries() {
        let raw = Tensor::from_f32(vec![3], &[0.0, 127.5, 255.0]).unwrap();
        assert_eq!(normalize(&raw).to_f32_vec(), vec![-1.0, 0.0, 1.0]);
        let raw = Tensor::from_u8(vec![2], vec![0, 255]).unwrap();
        let n = normalize(&raw);
        assert_eq!(n.ty, TensorType::Float32);
        assert_eq!(n.to_f32_vec(), vec![-1.0, 1.0]);
    }

    #[test]
    fn midpoint_image_normalizes_to_zero() {
        let dims = vec![1, 299, 299, 3];
        let raw = Tensor::from_f32(dims.clone(), &vec![127.5; 299 * 299 * 3]).unwrap();
        let n = normalize(&raw);
        assert_eq!(n.dimensions, dims);
        assert!(n.to_f32_vec().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn scratch_dir_uses_invoker_basename() {
        let dir = scratch_dir(Path::new("/models/inception"), "/usr/bin/tankcheck");
        assert_eq!(dir, Path::new("/models/inception/../tmp/tankcheck"));
    }

    struct Constant(u8);

    impl InputCorpus for Constant {
        fn generate_input(&self, _: &Path, details: &TensorDetails) -> Result<Tensor, InputError> {
            let dims: Vec<u32> = details.shape.iter().map(|d| *d as u32).collect();
            let len = dims.iter().product::<u32>() as usize;
            Ok(Tensor::from_u8(dims, vec![self.0; len]).unwrap())
        }
    }

    #[test]
    fn generates_one_normalized_tensor() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("tmp").join("runner");
        let details = vec![
            TensorDetails::new("a", 0, vec![1, 2, 2, 3], TensorType::Float32),
            TensorDetails::new("b", 1, vec![1], TensorType::Int32),
        ];
        let inputs = generate_inputs(&details, &workdir, &Constant(255)).unwrap();
        assert!(workdir.is_dir());
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].dimensions, vec![1, 2, 2, 3]);
        assert!(inputs[0].to_f32_vec().iter().all(|v| *v == 1.0));

        // Running again against an existing directory is fine.
        generate_inputs(&details, &workdir, &Constant(0)).unwrap();
    }

    /// Returns tensors whose data does not fill their dimensions.
    struct Short;

    impl InputCorpus for Short {
        fn generate_input(&self, _: &Path, _: &TensorDetails) -> Result<Tensor, InputError> {
            Ok(Tensor {
                dimensions: vec![1, 2, 2, 3],
                ty: TensorType::Uint8,
                data: vec![0; 3],
            })
        }
    }

    #[test]
    fn malformed_corpus_tensor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let details = vec![TensorDetails::new("a", 0, vec![1, 2, 2, 3], TensorType::Float32)];
        assert!(matches!(
            generate_inputs(&details, dir.path(), &Short),
            Err(InputError::Tensor(TensorError::InvalidDataLength {
                expected: 12,
                actual: 3,
                ..
            }))
        ));
    }

    #[test]
    fn normalize_does_not_require_well_formed_input() {
        let raw = Tensor {
            dimensions: vec![1, 2, 2, 3],
            ty: TensorType::Uint8,
            data: vec![0, 255, 0],
        };
        let n = normalize(&raw);
        assert_eq!(n.dimensions, raw.dimensions);
        assert_eq!(n.to_f32_vec(), vec![-1.0, 1.0, -1.0]);
    }

    #[test]
    fn no_inputs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            generate_inputs(&[], dir.path(), &Constant(0)),
            Err(InputError::NoInputs)
        ));
    }

    #[test]
    fn layouts() {
        let nhwc = TensorDetails::new("x", 0, vec![-1, 4, 5, 3], TensorType::Float32);
        let layout = ImageLayout::from_details(&nhwc).unwrap();
        assert_eq!(layout.dimensions(), vec![1, 4, 5, 3]);
        assert!(!layout.channels_first);

        let nchw = TensorDetails::new("x", 0, vec![2, 3, 4, 5], TensorType::Float32);
        let layout = ImageLayout::from_details(&nchw).unwrap();
        assert_eq!(layout.dimensions(), vec![2, 3, 4, 5]);
        assert!(layout.channels_first);

        let flat = TensorDetails::new("x", 0, vec![1, 1001], TensorType::Float32);
        assert!(ImageLayout::from_details(&flat).is_err());
        let dynamic = TensorDetails::new("x", 0, vec![1, -1, -1, 3], TensorType::Float32);
        assert!(ImageLayout::from_details(&dynamic).is_err());
    }

    #[test]
    fn channels_first_transposes() {
        let layout = ImageLayout {
            batch: 1,
            height: 1,
            width: 2,
            channels: 3,
            channels_first: true,
            batched: true,
        };
        let image = DynamicImage::ImageRgb8(RgbImage::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap());
        assert_eq!(layout.pixels(&image), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn synthesized_image_is_cached_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let details = TensorDetails::new("input", 0, vec![1, 8, 6, 3], TensorType::Float32);
        let corpus = ImageCorpus::default();
        let first = corpus.generate_input(dir.path(), &details).unwrap();
        assert_eq!(first.ty, TensorType::Uint8);
        assert_eq!(first.dimensions, vec![1, 8, 6, 3]);
        assert!(dir.path().join("synthetic-8x6.png").is_file());

        let second = corpus.generate_input(dir.path(), &details).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cached_image_is_resized() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]))
            .save(dir.path().join("red.png"))
            .unwrap();
        let details = TensorDetails::new("input", 0, vec![1, 3, 4, 4], TensorType::Float32);
        let raw = ImageCorpus::default()
            .generate_input(dir.path(), &details)
            .unwrap();
        assert_eq!(raw.dimensions, vec![1, 3, 4, 4]);
        let (red, rest) = raw.data.split_at(16);
        assert!(red.iter().all(|v| *v == 255));
        assert!(rest.iter().all(|v| *v == 0));
    }
}
