use std::{
    fs, io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    thread,
};

use log::{error, info, warn};
use ndarray::{Array2, Array4, ArrayD, ArrayView2, ArrayView4, Axis, Ix2};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::prelude::*;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};
use serde::Deserialize;

use crate::{
    config::{BeautyConfig, DecodePolicy},
    error::{BeautyError, Result},
    preprocess,
};

const SNAPSHOT_X: &str = "data_x.safetensors";
const SNAPSHOT_Y: &str = "data_y.safetensors";

/// A labeled image, as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestRow {
    #[serde(rename = "Attractiveness label")]
    pub label: f32,
    #[serde(rename = "Files")]
    pub path: PathBuf,
}

/// Reads every row of a manifest, columns other than `Attractiveness label` and `Files` are
/// ignored.
pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<ManifestRow>> {
    let path = path.as_ref();
    let csv_err = |source: csv::Error| match source.kind() {
        csv::ErrorKind::Io(e) => BeautyError::io(path, io::Error::new(e.kind(), e.to_string())),
        _ => BeautyError::Csv {
            path: path.to_path_buf(),
            source,
        },
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ManifestRow>, _>>()
        .map_err(csv_err)?;

    info!("read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Maps a raw rating onto the `[0, 1]` range of the model's output.
pub fn normalize_label(label: f32, divisor: f32) -> f32 {
    label / divisor
}

/// Maps a model output back onto the raw rating scale.
pub fn denormalize_label(score: f32, divisor: f32) -> f32 {
    score * divisor
}

/// Every image of the dataset paired with its normalized label.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array4<u8>,
    y: Array2<f32>,
}

/// A train/test partition of a `Dataset`.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train_x: Array4<u8>,
    pub train_y: Array2<f32>,
    pub test_x: Array4<u8>,
    pub test_y: Array2<f32>,
    /// The dataset rows each partition was taken from.
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The images, `(n, height, width, channels)`.
    /// * `y` - The normalized labels, `(n, 1)`.
    pub fn new(x: Array4<u8>, y: Array2<f32>) -> Result<Self> {
        let n = x.len_of(Axis(0));

        if y.shape() != [n, 1] {
            return Err(BeautyError::ShapeMismatch {
                expected: vec![n, 1],
                got: y.shape().to_vec(),
            });
        }

        if n == 0 {
            return Err(BeautyError::EmptyDataset);
        }

        Ok(Self { x, y })
    }

    /// Loads the dataset the way `config` says: from its snapshot, or by decoding every image of
    /// the manifest and then writing the snapshot.
    pub fn load(config: &BeautyConfig) -> Result<Self> {
        if config.snapshot {
            return Self::from_snapshot(&config.dump_dir, config.input_shape);
        }

        let rows = read_manifest(&config.manifest_path)?;
        let dataset = Self::from_manifest(&rows, config)?;
        dataset.save_snapshot(&config.dump_dir)?;
        Ok(dataset)
    }

    /// Decodes and resizes the image of every row on a bounded pool of threads. The samples keep
    /// the order of the manifest.
    pub fn from_manifest(rows: &[ManifestRow], config: &BeautyConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(loader_threads(config))
            .thread_name(|i| format!("image-loader-{i}"))
            .build()
            .map_err(|e| BeautyError::InvalidConfig(format!("image loader pool: {e}")))?;

        info!(
            "loading {} images on {} threads",
            rows.len(),
            pool.current_num_threads()
        );

        let shape = config.input_shape;
        let policy = config.on_decode_error;
        let divisor = config.label_divisor;

        let samples = pool.install(|| {
            rows.par_iter()
                .enumerate()
                .map(|(i, row)| match preprocess::load_image(&row.path, shape) {
                    Ok(image) => Ok(Some((image, normalize_label(row.label, divisor)))),
                    Err(e) if policy == DecodePolicy::Skip => {
                        warn!("skipping manifest row {i}: {e}");
                        Ok(None)
                    }
                    Err(e) => {
                        error!("manifest row {i} failed to load");
                        Err(e)
                    }
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let samples: Vec<_> = samples.into_iter().flatten().collect();
        let n = samples.len();
        if n == 0 {
            return Err(BeautyError::EmptyDataset);
        }

        let [h, w, c] = shape;
        let mut x = Vec::with_capacity(n * h * w * c);
        let mut y = Vec::with_capacity(n);

        for (image, label) in samples {
            x.extend(image.iter());
            y.push(label);
        }

        if y.iter().any(|y| !(0.0..=1.0).contains(y)) {
            warn!("some labels are outside of [0, {divisor}]");
        }

        let dataset = Self::new(
            Array4::from_shape_vec((n, h, w, c), x)?,
            Array2::from_shape_vec((n, 1), y)?,
        )?;

        info!(
            "loaded images {:?} and labels {:?}",
            dataset.x.shape(),
            dataset.y.shape()
        );
        Ok(dataset)
    }

    /// Writes the images and labels as two safetensors files in `dir`.
    pub fn save_snapshot<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| BeautyError::io(dir, e))?;

        let x: Vec<u8> = self.x.iter().copied().collect();
        let x = TensorView::new(Dtype::U8, self.x.shape().to_vec(), &x)?;
        write_tensor(&dir.join(SNAPSHOT_X), "data_x", &x)?;

        let y: Vec<f32> = self.y.iter().copied().collect();
        let y = TensorView::new(Dtype::F32, self.y.shape().to_vec(), bytemuck::cast_slice(&y))?;
        write_tensor(&dir.join(SNAPSHOT_Y), "data_y", &y)?;

        info!("saved a snapshot of {} samples to {}", self.len(), dir.display());
        Ok(())
    }

    /// Reads a snapshot written by `save_snapshot`.
    ///
    /// # Arguments
    /// * `dir` - The directory holding the snapshot.
    /// * `input_shape` - The shape every image is expected to have.
    pub fn from_snapshot<P: AsRef<Path>>(dir: P, input_shape: [usize; 3]) -> Result<Self> {
        let dir = dir.as_ref();

        let x_bytes = read_file(&dir.join(SNAPSHOT_X))?;
        let x_file = SafeTensors::deserialize(&x_bytes)?;
        let x = x_file.tensor("data_x")?;

        let y_bytes = read_file(&dir.join(SNAPSHOT_Y))?;
        let y_file = SafeTensors::deserialize(&y_bytes)?;
        let y = y_file.tensor("data_y")?;

        if x.dtype() != Dtype::U8 || y.dtype() != Dtype::F32 {
            return Err(BeautyError::Snapshot(format!(
                "expected U8 images and F32 labels, got {:?} and {:?}",
                x.dtype(),
                y.dtype()
            )));
        }

        let &[n, h, w, c] = x.shape() else {
            return Err(BeautyError::Snapshot(format!(
                "images must have 4 dimensions, got {:?}",
                x.shape()
            )));
        };

        if [h, w, c] != input_shape {
            return Err(BeautyError::ShapeMismatch {
                expected: input_shape.to_vec(),
                got: vec![h, w, c],
            });
        }

        let labels: Vec<f32> = y
            .data()
            .chunks_exact(size_of::<f32>())
            .map(bytemuck::pod_read_unaligned)
            .collect();

        let x = Array4::from_shape_vec((n, h, w, c), x.data().to_vec())?;
        let y = ArrayD::from_shape_vec(y.shape(), labels)?.into_dimensionality::<Ix2>()?;

        info!("loaded a snapshot of {n} samples from {}", dir.display());
        Self::new(x, y)
    }

    pub fn len(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn x(&self) -> ArrayView4<'_, u8> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView2<'_, f32> {
        self.y.view()
    }

    /// Randomly partitions the samples into a train and a test set. `ceil(test_size * n)`
    /// samples are held out for testing, the same seed always yields the same partition.
    pub fn train_test_split(&self, test_size: f64, seed: u64) -> Result<Split> {
        if !(test_size > 0. && test_size < 1.) {
            return Err(BeautyError::InvalidConfig(format!(
                "test_size must be in (0, 1), got {test_size}"
            )));
        }

        let n = self.len();
        let n_test = (test_size * n as f64).ceil() as usize;
        if n_test >= n {
            return Err(BeautyError::InvalidConfig(format!(
                "a test_size of {test_size} leaves no training samples out of {n}"
            )));
        }

        let mut order: Vec<_> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let (test, train) = order.split_at(n_test);

        Ok(Split {
            train_x: self.x.select(Axis(0), train),
            train_y: self.y.select(Axis(0), train),
            test_x: self.x.select(Axis(0), test),
            test_y: self.y.select(Axis(0), test),
            train_indices: train.to_vec(),
            test_indices: test.to_vec(),
        })
    }
}

/// The size of the image loader pool: `config.workers`, or the available parallelism of the
/// machine when unset. `RAYON_NUM_THREADS` is not consulted.
fn loader_threads(config: &BeautyConfig) -> usize {
    config.workers.map_or_else(
        || thread::available_parallelism().map_or(1, NonZeroUsize::get),
        NonZeroUsize::get,
    )
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| BeautyError::io(path, e))
}

fn write_tensor(path: &Path, name: &str, tensor: &TensorView) -> Result<()> {
    let bytes = safetensors::serialize([(name, tensor)], &None)?;
    fs::write(path, bytes).map_err(|e| BeautyError::io(path, e))
}
