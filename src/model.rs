use std::path::Path;

use log::info;
use machine_learning::{
    arch::{
        Model, Sequential,
        loss::Mse,
        spec::{ActFnSpec, LayerSpec, ModelSpec, Padding},
    },
    optimization::Adam,
    preprocessing::ImageDataGenerator,
    serialization,
    training::{self, Evaluation, History, ModelTrainer},
};
use ndarray::{ArrayView2, ArrayView3, ArrayView4, Axis};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    config::{BeautyConfig, InitMode},
    dataset::{self, Split},
    error::{BeautyError, Result},
    preprocess,
};

/// Kernel size and pooling of each of the six convolution blocks.
const BLOCKS: [((usize, usize), Pool); 6] = [
    ((5, 5), Pool::Max),
    ((5, 5), Pool::Max),
    ((4, 4), Pool::Max),
    ((4, 4), Pool::Max),
    ((4, 4), Pool::Max),
    ((2, 2), Pool::Avg),
];

/// The block after which the first dropout layer goes.
const DROPOUT_BLOCK: usize = 3;

#[derive(Clone, Copy)]
enum Pool {
    Max,
    Avg,
}

/// Builds the topology of the beauty model.
///
/// Six `same` padded relu convolutions of increasing depth, each one followed by a 2x2 pooling,
/// then a max norm constrained dense layer and a single sigmoid output.
pub fn architecture(config: &BeautyConfig) -> ModelSpec {
    let mut layers = Vec::new();

    for (i, ((kernel, pool), filters)) in BLOCKS.into_iter().zip(config.filters).enumerate() {
        layers.push(LayerSpec::Conv2d {
            filters,
            kernel,
            padding: Padding::Same,
            act_fn: Some(ActFnSpec::Relu),
        });

        layers.push(match pool {
            Pool::Max => LayerSpec::MaxPool2d { pool: (2, 2) },
            Pool::Avg => LayerSpec::AvgPool2d { pool: (2, 2) },
        });

        if i == DROPOUT_BLOCK {
            layers.push(LayerSpec::Dropout {
                rate: config.dropout,
            });
        }
    }

    layers.extend([
        LayerSpec::Flatten,
        LayerSpec::Dropout {
            rate: config.dropout,
        },
        LayerSpec::Dense {
            units: config.dense_units,
            act_fn: Some(ActFnSpec::Relu),
            max_norm: Some(config.max_norm),
        },
        LayerSpec::Dense {
            units: 1,
            act_fn: Some(ActFnSpec::Sigmoid { amp: 1.0 }),
            max_norm: None,
        },
    ]);

    ModelSpec::new(config.input_shape, layers)
}

/// Turns the mean squared error of normalized predictions into a quality percentage.
///
/// # Returns
/// `(1 - sqrt(mse)) * 100`, or an error if `mse` is not in `[0, 1]`.
pub fn quality_score(mse: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&mse) {
        return Err(BeautyError::InvalidMetric(mse));
    }

    Ok((1. - mse.sqrt()) * 100.)
}

/// The facial beauty regression model.
pub struct BeautyModel {
    model: Sequential,
    config: BeautyConfig,
}

impl BeautyModel {
    /// Builds the model with freshly initialized weights.
    pub fn new(config: &BeautyConfig) -> Result<Self> {
        let model = Sequential::from_spec(&architecture(config), config.seed)?;
        info!("built a new model with {} parameters", model.size());

        Ok(Self {
            model,
            config: config.clone(),
        })
    }

    /// Loads the architecture and weights written by a previous `train`.
    pub fn load(config: &BeautyConfig) -> Result<Self> {
        let model = serialization::load_model(
            &config.architecture_path,
            &config.weights_path,
            config.seed,
        )?;

        if model.input_shape() != config.input_shape {
            return Err(BeautyError::ShapeMismatch {
                expected: config.input_shape.to_vec(),
                got: model.input_shape().to_vec(),
            });
        }

        info!(
            "loaded a model with {} parameters from {}",
            model.size(),
            config.weights_path.display()
        );

        Ok(Self {
            model,
            config: config.clone(),
        })
    }

    /// Builds or loads the model, as `config.init` says.
    pub fn from_config(config: &BeautyConfig) -> Result<Self> {
        match config.init {
            InitMode::Fresh => Self::new(config),
            InitMode::Resume => Self::load(config),
        }
    }

    pub fn config(&self) -> &BeautyConfig {
        &self.config
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.model.input_shape()
    }

    /// Logs the layer table of the model.
    pub fn summary(&self) {
        info!("model summary:\n{}", self.model.summary());
    }

    /// Trains the model on `split.train_*`, validating it on `split.test_*` after every epoch.
    /// Once done, the architecture and weights are saved and the model is evaluated on the test
    /// set.
    ///
    /// # Returns
    /// The metrics of every epoch and the final quality score.
    pub fn train(&mut self, split: &Split) -> Result<(History, f32)> {
        let generator = ImageDataGenerator::new(1. / 255.);
        let train = generator.flow(
            split.train_x.view(),
            split.train_y.view(),
            self.config.batch_size,
            true,
        )?;
        let test = generator.flow(
            split.test_x.view(),
            split.test_y.view(),
            self.config.batch_size,
            false,
        )?;

        info!(
            "training on {} samples, validating on {}, {} epochs of {} steps",
            train.len(),
            test.len(),
            self.config.epochs,
            train.steps()
        );

        let mut trainer = ModelTrainer::new(
            Adam::with_defaults(self.model.size()),
            Mse,
            self.config.epochs,
            StdRng::seed_from_u64(self.config.seed),
        );

        let history = trainer.fit(&mut self.model, &train, Some(&test))?;
        self.save()?;

        let Evaluation { mse, .. } = trainer.evaluate(&mut self.model, &test)?;
        let score = quality_score(mse)?;
        info!("test mse: {mse:.4} - score: {score:.2}");

        Ok((history, score))
    }

    /// Computes the quality score of the model over a set of images and their normalized labels.
    pub fn evaluate<'a>(
        &mut self,
        x: ArrayView4<'a, u8>,
        y: ArrayView2<'a, f32>,
    ) -> Result<f32> {
        let flow = ImageDataGenerator::new(1. / 255.).flow(x, y, self.config.batch_size, false)?;
        let Evaluation { mse, .. } = training::evaluate(&mut self.model, &flow, &Mse)?;

        let score = quality_score(mse)?;
        info!("mse: {mse:.4} - score: {score:.2}");
        Ok(score)
    }

    /// Predicts the normalized score of an image that already has the model's input shape.
    pub fn predict_tensor(&mut self, image: ArrayView3<u8>) -> Result<f32> {
        self.check_shape(&image.shape()[..])?;

        let y = self.model.predict(preprocess::to_input(image).view())?;
        Ok(y[[0, 0]])
    }

    /// Decodes, resizes and scores the image at `path`.
    pub fn predict_path<P: AsRef<Path>>(&mut self, path: P) -> Result<f32> {
        let image = preprocess::load_image(path.as_ref(), self.input_shape())?;
        self.predict_tensor(image.view())
    }

    /// Predicts the normalized score of every image in `images`.
    pub fn predict_batch(&mut self, images: ArrayView4<u8>) -> Result<Vec<f32>> {
        self.check_shape(&images.shape()[1..])?;

        let mut scores = Vec::with_capacity(images.len_of(Axis(0)));
        for chunk in images.axis_chunks_iter(Axis(0), self.config.batch_size.get()) {
            let x = chunk.mapv(|p| p as f32 / 255.);
            let y = self.model.predict(x.view())?;
            scores.extend(y.column(0).iter());
        }

        Ok(scores)
    }

    /// Maps a normalized score back onto the rating scale of the labels.
    pub fn rating(&self, score: f32) -> f32 {
        dataset::denormalize_label(score, self.config.label_divisor)
    }

    /// Writes the architecture and weights to the configured paths.
    pub fn save(&self) -> Result<()> {
        serialization::save_model(
            &self.model,
            &self.config.architecture_path,
            &self.config.weights_path,
        )?;

        info!(
            "saved the model to {} and {}",
            self.config.architecture_path.display(),
            self.config.weights_path.display()
        );
        Ok(())
    }

    fn check_shape(&self, shape: &[usize]) -> Result<()> {
        let expected = self.input_shape();
        if shape != expected {
            return Err(BeautyError::ShapeMismatch {
                expected: expected.to_vec(),
                got: shape.to_vec(),
            });
        }

        Ok(())
    }
}
