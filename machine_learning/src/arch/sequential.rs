use std::{fmt, mem};

use ndarray::{Array2, ArrayD, ArrayView2, ArrayView4, Axis, Ix2};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    Model, ParamInit,
    layers::{Layer, Mode, check_input},
    loss::LossFn,
    spec::ModelSpec,
};
use crate::{MlErr, Result, optimization::Optimizer, param_manager::ParamManager};

/// The amount of samples forwarded at once by `predict`.
const PREDICT_BATCH: usize = 32;

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Debug)]
pub struct Sequential {
    input_shape: [usize; 3],
    layers: Vec<Layer>,
    shapes: Vec<Vec<usize>>,
    param_manager: ParamManager,
}

impl Sequential {
    /// Builds a `Sequential` from its description, with Glorot initialized kernels.
    ///
    /// # Arguments
    /// * `spec` - The architecture of the model.
    /// * `seed` - The seed for the initial parameters and dropout masks.
    ///
    /// # Returns
    /// A new `Sequential` or an error if the architecture is invalid.
    pub fn from_spec(spec: &ModelSpec, seed: u64) -> Result<Self> {
        Self::with_init(spec, ParamInit::default(), seed)
    }

    /// Builds a `Sequential` from its description with a given kernel initializer.
    pub fn with_init(spec: &ModelSpec, init: ParamInit, seed: u64) -> Result<Self> {
        if spec.layers.is_empty() {
            return Err(MlErr::InvalidArchitecture("a model needs layers".into()));
        }

        if spec.input_shape.contains(&0) {
            return Err(MlErr::InvalidArchitecture(format!(
                "empty input shape {:?}",
                spec.input_shape
            )));
        }

        let mut layers = Vec::with_capacity(spec.layers.len());
        let mut shapes = Vec::with_capacity(spec.layers.len());
        let mut shape = spec.input_shape.to_vec();

        for (i, layer_spec) in spec.layers.iter().enumerate() {
            let layer = Layer::from_spec(layer_spec, &shape, seed.wrapping_add(i as u64 + 1))?;
            shape = layer.output_shape(&shape);

            if shape.contains(&0) {
                return Err(MlErr::InvalidArchitecture(format!(
                    "layer {i} ({}) collapses its output to {shape:?}",
                    layer.name()
                )));
            }

            layers.push(layer);
            shapes.push(shape.clone());
        }

        let size = layers.iter().map(Layer::size).sum();
        let mut model = Self {
            input_shape: spec.input_shape,
            layers,
            shapes,
            param_manager: ParamManager::new(size),
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut rest = model.param_manager.params_mut();

        for layer in &model.layers {
            let (head, tail) = mem::take(&mut rest).split_at_mut(layer.size());
            layer.init_params(head, &init, &mut rng)?;
            rest = tail;
        }

        Ok(model)
    }

    /// Returns the description this model can be rebuilt from.
    pub fn spec(&self) -> ModelSpec {
        ModelSpec::new(self.input_shape, self.layers.iter().map(Layer::spec))
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    /// The shape of a single output sample.
    pub fn output_shape(&self) -> &[usize] {
        self.shapes.last().map(Vec::as_slice).unwrap_or_default()
    }

    /// All the parameters of the model, layer after layer.
    pub fn params(&self) -> &[f32] {
        self.param_manager.params()
    }

    pub fn set_params(&mut self, params: &[f32]) -> Result<()> {
        self.param_manager.set_params(params)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `x` - The input batch, `(n, height, width, channels)`.
    /// * `mode` - Whether the pass is part of a training step.
    ///
    /// # Returns
    /// The output for the given input or an error if occurred.
    pub fn forward(&mut self, mut x: ArrayD<f32>, mode: Mode) -> Result<ArrayD<f32>> {
        check_input("model input", x.shape(), &self.input_shape)?;

        let mut front = self.param_manager.front();
        let nlayers = self.layers.len();

        for (i, layer) in self.layers.iter_mut().enumerate() {
            let params = front.take(layer.size()).ok_or(MlErr::SizeMismatch {
                what: "layers",
                got: i,
                expected: nlayers,
            })?;

            x = layer.forward(params, x, mode)?;
        }

        Ok(x)
    }

    /// Applies every layer's weight constraints.
    fn constrain(&mut self) -> Result<()> {
        let mut rest = self.param_manager.params_mut();

        for layer in &self.layers {
            let (head, tail) = mem::take(&mut rest).split_at_mut(layer.size());
            layer.constrain(head)?;
            rest = tail;
        }

        Ok(())
    }

    /// Describes every layer's output shape and parameter count.
    pub fn summary(&self) -> Summary {
        let rows = self
            .layers
            .iter()
            .zip(&self.shapes)
            .map(|(layer, shape)| (layer.name(), shape.clone(), layer.size()))
            .collect();

        Summary {
            input_shape: self.input_shape,
            rows,
        }
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.param_manager.len()
    }

    fn predict(&mut self, x: ArrayView4<f32>) -> Result<Array2<f32>> {
        let outputs: usize = self.output_shape().iter().product();
        let mut y = Array2::zeros((0, outputs));

        for chunk in x.axis_chunks_iter(Axis(0), PREDICT_BATCH) {
            let y_chunk = self
                .forward(chunk.to_owned().into_dyn(), Mode::Infer)?
                .into_dimensionality::<Ix2>()?;

            y.append(Axis(0), y_chunk.view())?;
        }

        Ok(y)
    }

    fn backprop<L, O>(
        &mut self,
        x: ArrayView4<f32>,
        y: ArrayView2<f32>,
        loss_fn: &L,
        optimizer: &mut O,
    ) -> Result<f32>
    where
        L: LossFn,
        O: Optimizer,
    {
        self.param_manager.zero_grad();

        let y_pred = self
            .forward(x.to_owned().into_dyn(), Mode::Train)?
            .into_dimensionality::<Ix2>()?;

        if y_pred.shape() != y.shape() {
            return Err(MlErr::ShapeMismatch {
                what: "targets",
                got: y.shape().to_vec(),
                expected: y_pred.shape().to_vec(),
            });
        }

        let loss = loss_fn.loss(y_pred.view(), y);
        let mut d = loss_fn.loss_prime(y_pred.view(), y).into_dyn();

        let mut back = self.param_manager.back();
        let nlayers = self.layers.len();

        for (i, layer) in self.layers.iter_mut().rev().enumerate() {
            let (params, grad) = back.take(layer.size()).ok_or(MlErr::SizeMismatch {
                what: "layers",
                got: i,
                expected: nlayers,
            })?;

            d = layer.backward(params, grad, d)?;
        }

        self.param_manager.optimize(optimizer)?;
        self.constrain()?;
        Ok(loss)
    }
}

/// A table of a model's layers, printable through `Display`.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    input_shape: [usize; 3],
    rows: Vec<(&'static str, Vec<usize>, usize)>,
}

impl Summary {
    /// The total amount of parameters.
    pub fn total(&self) -> usize {
        self.rows.iter().map(|(_, _, size)| size).sum()
    }

    /// The amount of layers listed.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<16}{:<24}{:>12}", "Layer", "Output shape", "Params")?;
        writeln!(f, "{:<16}{:<24}{:>12}", "input", format!("{:?}", self.input_shape), 0)?;

        for (name, shape, size) in &self.rows {
            writeln!(f, "{name:<16}{:<24}{size:>12}", format!("{shape:?}"))?;
        }

        write!(f, "Total params: {}", self.total())
    }
}
