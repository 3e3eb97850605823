use ndarray::ArrayD;
use rand::Rng;

use super::{Conv2d, Dense, Dropout, Flatten, Pool2d, PoolKind};
use crate::{
    MlErr, Result,
    arch::{
        ParamInit,
        constraint::MaxNorm,
        spec::LayerSpec,
    },
};

/// Whether a forward pass is part of training (dropout active, metadata kept for backprop)
/// or plain inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Infer,
}

#[derive(Debug)]
pub enum Layer {
    Conv2d(Conv2d),
    Pool2d(Pool2d),
    Dropout(Dropout),
    Flatten(Flatten),
    Dense(Dense),
}
use Layer::*;

impl Layer {
    /// Resolves a layer description into a layer.
    ///
    /// # Arguments
    /// * `spec` - The layer's description.
    /// * `input` - The shape of a single sample entering the layer.
    /// * `seed` - Seed for layers that draw random numbers on their own (dropout).
    ///
    /// # Returns
    /// The new layer or an error if the description does not fit the input shape.
    pub fn from_spec(spec: &LayerSpec, input: &[usize], seed: u64) -> Result<Self> {
        let layer = match *spec {
            LayerSpec::Conv2d {
                filters,
                kernel,
                padding,
                act_fn,
            } => Conv2d(super::Conv2d::new(
                image_shape(spec, input)?,
                filters,
                kernel,
                padding,
                act_fn.map(Into::into),
            )?),
            LayerSpec::MaxPool2d { pool } => Pool2d(super::Pool2d::new(
                PoolKind::Max,
                image_shape(spec, input)?,
                pool,
            )?),
            LayerSpec::AvgPool2d { pool } => Pool2d(super::Pool2d::new(
                PoolKind::Average,
                image_shape(spec, input)?,
                pool,
            )?),
            LayerSpec::Dropout { rate } => Dropout(super::Dropout::new(rate, seed)?),
            LayerSpec::Flatten => Flatten(super::Flatten::new(image_shape(spec, input)?)),
            LayerSpec::Dense {
                units,
                act_fn,
                max_norm,
            } => {
                let &[inputs] = input else {
                    return Err(MlErr::InvalidArchitecture(format!(
                        "dense expects flat inputs, got {input:?}"
                    )));
                };

                if units == 0 {
                    return Err(MlErr::InvalidArchitecture(
                        "dense needs at least one unit".into(),
                    ));
                }

                Dense(super::Dense::new(
                    (inputs, units),
                    act_fn.map(Into::into),
                    max_norm.map(MaxNorm::new),
                ))
            }
        };

        Ok(layer)
    }

    /// Returns the description of this layer.
    pub fn spec(&self) -> LayerSpec {
        match self {
            Conv2d(l) => LayerSpec::Conv2d {
                filters: l.filters(),
                kernel: l.kernel(),
                padding: l.padding(),
                act_fn: l.act_fn().map(|a| a.spec()),
            },
            Pool2d(l) => match l.kind() {
                PoolKind::Max => LayerSpec::MaxPool2d { pool: l.pool() },
                PoolKind::Average => LayerSpec::AvgPool2d { pool: l.pool() },
            },
            Dropout(l) => LayerSpec::Dropout { rate: l.rate() },
            Flatten(_) => LayerSpec::Flatten,
            Dense(l) => LayerSpec::Dense {
                units: l.dim().1,
                act_fn: l.act_fn().map(|a| a.spec()),
                max_norm: l.max_norm().map(|m| m.max()),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Conv2d(_) => "conv2d",
            Pool2d(l) if l.kind() == PoolKind::Max => "max_pool2d",
            Pool2d(_) => "avg_pool2d",
            Dropout(_) => "dropout",
            Flatten(_) => "flatten",
            Dense(_) => "dense",
        }
    }

    /// The shape of a single sample leaving this layer.
    pub fn output_shape(&self, input: &[usize]) -> Vec<usize> {
        match self {
            Conv2d(l) => l.output_shape().to_vec(),
            Pool2d(l) => l.output_shape().to_vec(),
            Dropout(_) => input.to_vec(),
            Flatten(l) => vec![l.output_size()],
            Dense(l) => vec![l.dim().1],
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Conv2d(l) => l.size(),
            Dense(l) => l.size(),
            Pool2d(_) | Dropout(_) | Flatten(_) => 0,
        }
    }

    /// The names and shapes of this layer's parameters, in storage order.
    pub fn param_shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        match self {
            Conv2d(l) => l.param_shapes(),
            Dense(l) => l.param_shapes(),
            Pool2d(_) | Dropout(_) | Flatten(_) => Vec::new(),
        }
    }

    pub fn init_params<R: Rng + ?Sized>(
        &self,
        params: &mut [f32],
        init: &ParamInit,
        rng: &mut R,
    ) -> Result<()> {
        match self {
            Conv2d(l) => l.init_params(params, init, rng),
            Dense(l) => l.init_params(params, init, rng),
            Pool2d(_) | Dropout(_) | Flatten(_) => Ok(()),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>, mode: Mode) -> Result<ArrayD<f32>> {
        let y = match self {
            Conv2d(l) => l.forward(params, x.into_dimensionality()?, mode)?.into_dyn(),
            Pool2d(l) => l.forward(x.into_dimensionality()?, mode)?.into_dyn(),
            Dropout(l) => l.forward(x, mode == Mode::Train),
            Flatten(l) => l.forward(x.into_dimensionality()?)?.into_dyn(),
            Dense(l) => l.forward(params, x.into_dimensionality()?, mode)?.into_dyn(),
        };

        Ok(y)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayD<f32>,
    ) -> Result<ArrayD<f32>> {
        let d = match self {
            Conv2d(l) => l.backward(params, grad, d.into_dimensionality()?)?.into_dyn(),
            Pool2d(l) => l.backward(d.into_dimensionality()?)?.into_dyn(),
            Dropout(l) => l.backward(d)?,
            Flatten(l) => l.backward(d.into_dimensionality()?)?.into_dyn(),
            Dense(l) => l.backward(params, grad, d.into_dimensionality()?)?.into_dyn(),
        };

        Ok(d)
    }

    /// Applies the layer's weight constraints to its freshly updated parameters.
    pub fn constrain(&self, params: &mut [f32]) -> Result<()> {
        match self {
            Dense(l) => l.constrain(params),
            _ => Ok(()),
        }
    }
}

fn image_shape(spec: &LayerSpec, input: &[usize]) -> Result<[usize; 3]> {
    match *input {
        [h, w, c] => Ok([h, w, c]),
        _ => Err(MlErr::InvalidArchitecture(format!(
            "{spec:?} expects (height, width, channels) inputs, got {input:?}"
        ))),
    }
}

