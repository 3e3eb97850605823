use ndarray::{Array2, ArrayView2, ArrayView4};

use super::loss::LossFn;
use crate::{Result, optimization::Optimizer};

pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Computes the model's output for a batch of samples in inference mode.
    ///
    /// # Arguments
    /// * `x` - A batch of `(n, height, width, channels)` samples.
    ///
    /// # Returns
    /// One row of outputs per sample.
    fn predict(&mut self, x: ArrayView4<f32>) -> Result<Array2<f32>>;

    /// Computes the gradient of the loss function with respect to the parameters of the model over
    /// a single batch. **The parameters get updated** according to the optimization algorithm.
    ///
    /// # Arguments
    /// * `x` - The batch's samples.
    /// * `y` - The batch's expected outputs.
    /// * `loss_fn` - The loss function.
    /// * `optimizer` - The optimizer that dictates how to update the parameters.
    ///
    /// # Returns
    /// The batch loss, measured before the update.
    fn backprop<L, O>(
        &mut self,
        x: ArrayView4<f32>,
        y: ArrayView2<f32>,
        loss_fn: &L,
        optimizer: &mut O,
    ) -> Result<f32>
    where
        L: LossFn,
        O: Optimizer;
}
