use std::{
    env, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{BeautyError, Result};

const DEFAULT_EPOCHS: NonZeroUsize = NonZeroUsize::new(50).unwrap();
const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(32).unwrap();

/// What to do with a manifest row whose image can't be decoded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// The whole load fails.
    #[default]
    Abort,
    /// The row is dropped with a warning.
    Skip,
}

/// Where the model's initial weights come from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMode {
    /// Freshly built topology with random weights.
    #[default]
    Fresh,
    /// The architecture and weights saved by a previous run.
    Resume,
}

/// Every knob of the application. Missing fields take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BeautyConfig {
    /// CSV with an `Attractiveness label` and a `Files` column.
    pub manifest_path: PathBuf,
    /// Directory holding the dataset snapshot.
    pub dump_dir: PathBuf,
    /// Whether to read the dataset from its snapshot instead of decoding every image.
    pub snapshot: bool,
    /// `[height, width, channels]` of every image.
    pub input_shape: [usize; 3],
    /// Filters of the six convolution blocks.
    pub filters: [usize; 6],
    pub dense_units: usize,
    pub dropout: f32,
    pub max_norm: f32,
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    /// Fraction of the dataset held out for testing.
    pub test_size: f64,
    pub seed: u64,
    /// Raw labels are divided by this to land in `[0, 1]`.
    pub label_divisor: f32,
    pub architecture_path: PathBuf,
    pub weights_path: PathBuf,
    /// Image loading threads, the available parallelism when absent.
    pub workers: Option<NonZeroUsize>,
    pub on_decode_error: DecodePolicy,
    pub init: InitMode,
}

impl Default for BeautyConfig {
    fn default() -> Self {
        Self {
            manifest_path: "./dataset/SCUT_FBP.csv".into(),
            dump_dir: "./dataset".into(),
            snapshot: false,
            input_shape: [227, 227, 3],
            filters: [50, 100, 150, 200, 250, 300],
            dense_units: 500,
            dropout: 0.2,
            max_norm: 3.0,
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            test_size: 0.2,
            seed: 42,
            label_divisor: 5.0,
            architecture_path: "./models/beauty.json".into(),
            weights_path: "./models/beauty.safetensors".into(),
            workers: None,
            on_decode_error: DecodePolicy::Abort,
            init: InitMode::Fresh,
        }
    }
}

impl BeautyConfig {
    /// The environment variable naming the configuration file.
    pub const ENV_VAR: &'static str = "BEAUTY_CONFIG";

    /// Reads and validates a json configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read(path).map_err(|e| BeautyError::io(path, e))?;
        Self::from_json(&json).map_err(|e| match e {
            BeautyError::InvalidConfig(msg) => {
                BeautyError::InvalidConfig(format!("{}: {msg}", path.display()))
            }
            e => e,
        })
    }

    /// Parses and validates a json configuration.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let config: Self =
            serde_json::from_slice(json).map_err(|e| BeautyError::InvalidConfig(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolves the configuration of a run: the given file, else the file named by
    /// `BEAUTY_CONFIG`, else the defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match env::var_os(Self::ENV_VAR) {
            Some(path) => Self::from_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Checks every value is usable.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(BeautyError::InvalidConfig(msg));

        if !(self.test_size > 0. && self.test_size < 1.) {
            return invalid(format!("test_size must be in (0, 1), got {}", self.test_size));
        }

        if !(self.label_divisor > 0.) {
            return invalid(format!(
                "label_divisor must be positive, got {}",
                self.label_divisor
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout must be in [0, 1), got {}", self.dropout));
        }

        if !(self.max_norm > 0.) {
            return invalid(format!("max_norm must be positive, got {}", self.max_norm));
        }

        if self.input_shape[..2].contains(&0) || self.input_shape[2] != 3 {
            return invalid(format!(
                "input_shape must be [height, width, 3], got {:?}",
                self.input_shape
            ));
        }

        if self.filters.contains(&0) || self.dense_units == 0 {
            return invalid("filters and dense_units must be positive".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BeautyConfig::default();

        assert_eq!(config.input_shape, [227, 227, 3]);
        assert_eq!(config.filters, [50, 100, 150, 200, 250, 300]);
        assert_eq!(config.epochs.get(), 50);
        assert_eq!(config.batch_size.get(), 32);
        assert_eq!(config.test_size, 0.2);
        assert_eq!(config.seed, 42);
        assert_eq!(config.label_divisor, 5.0);
        assert_eq!(config.on_decode_error, DecodePolicy::Abort);
        assert_eq!(config.init, InitMode::Fresh);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let json = br#"{ "epochs": 3, "dump_dir": "/tmp/snap", "on_decode_error": "skip" }"#;
        let config = BeautyConfig::from_json(json).unwrap();

        assert_eq!(config.epochs.get(), 3);
        assert_eq!(config.dump_dir, PathBuf::from("/tmp/snap"));
        assert_eq!(config.on_decode_error, DecodePolicy::Skip);
        assert_eq!(config.batch_size.get(), 32);
        assert_eq!(config.weights_path, PathBuf::from("./models/beauty.safetensors"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let invalid: [&[u8]; 8] = [
            br#"{ "batch_size": 0 }"#,
            br#"{ "epochs": 0 }"#,
            br#"{ "test_size": 1.0 }"#,
            br#"{ "test_size": 0.0 }"#,
            br#"{ "label_divisor": -5.0 }"#,
            br#"{ "workers": 0 }"#,
            br#"{ "input_shape": [227, 227, 1] }"#,
            br#"{ "epoch": 3 }"#,
        ];

        for json in invalid {
            assert!(
                matches!(
                    BeautyConfig::from_json(json),
                    Err(BeautyError::InvalidConfig(_))
                ),
                "{}",
                String::from_utf8_lossy(json)
            );
        }
    }

    #[test]
    fn missing_files_are_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let res = BeautyConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(res, Err(BeautyError::Io { .. })));
    }
}
