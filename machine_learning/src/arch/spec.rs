use serde::{Deserialize, Serialize};

/// The serializable description of an activation function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActFnSpec {
    Relu,
    Sigmoid { amp: f32 },
}

/// Padding applied around the input of a convolution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// The output keeps the spatial size of the input (stride 1).
    #[default]
    Same,
    /// No padding, the output shrinks by `kernel - 1`.
    Valid,
}

/// The serializable description of a single layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d {
        filters: usize,
        kernel: (usize, usize),
        #[serde(default)]
        padding: Padding,
        act_fn: Option<ActFnSpec>,
    },
    MaxPool2d {
        pool: (usize, usize),
    },
    AvgPool2d {
        pool: (usize, usize),
    },
    Dropout {
        rate: f32,
    },
    Flatten,
    Dense {
        units: usize,
        act_fn: Option<ActFnSpec>,
        #[serde(default)]
        max_norm: Option<f32>,
    },
}

/// The serializable description of a whole sequential model, this is what gets written as
/// the architecture file of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// The shape of a single input sample, `[height, width, channels]`.
    pub input_shape: [usize; 3],
    pub layers: Vec<LayerSpec>,
}

impl ModelSpec {
    /// Creates a new `ModelSpec`.
    ///
    /// # Arguments
    /// * `input_shape` - The shape of a single input sample, `[height, width, channels]`.
    /// * `layers` - The layers in the order the data flows through them.
    pub fn new<I>(input_shape: [usize; 3], layers: I) -> Self
    where
        I: IntoIterator<Item = LayerSpec>,
    {
        Self {
            input_shape,
            layers: layers.into_iter().collect(),
        }
    }
}
