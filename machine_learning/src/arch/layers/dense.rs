use ndarray::prelude::*;
use rand::Rng;

use super::{Mode, check_input};
use crate::{
    MlErr, Result,
    arch::{ParamInit, activations::ActFn, constraint::MaxNorm},
};

/// A fully connected layer. The parameters are laid out as an `(inputs, units)` weight matrix
/// followed by `units` biases.
#[derive(Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    max_norm: Option<MaxNorm>,
    size: usize,

    // Forward metadata
    x: Option<Array2<f32>>,
    z: Option<Array2<f32>>,
}

impl Dense {
    /// Creates a new `Dense`.
    ///
    /// # Arguments
    /// * `dim` - The amount of inputs and outputs (units).
    /// * `act_fn` - An optional activation applied to the output.
    /// * `max_norm` - An optional norm constraint on each unit's incoming weights.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>, max_norm: Option<MaxNorm>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            max_norm,
            x: None,
            z: None,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn act_fn(&self) -> Option<&ActFn> {
        self.act_fn.as_ref()
    }

    pub fn max_norm(&self) -> Option<MaxNorm> {
        self.max_norm
    }

    /// The names and shapes of this layer's parameters, in storage order.
    pub fn param_shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        vec![
            ("kernel", vec![self.dim.0, self.dim.1]),
            ("bias", vec![self.dim.1]),
        ]
    }

    pub fn init_params<R: Rng + ?Sized>(
        &self,
        params: &mut [f32],
        init: &ParamInit,
        rng: &mut R,
    ) -> Result<()> {
        let (w, b) = params.split_at_mut(self.size - self.dim.1);

        init.fill(w, self.dim.0, self.dim.1, rng)?;
        b.fill(0.);
        Ok(())
    }

    pub fn forward(
        &mut self,
        params: &[f32],
        x: Array2<f32>,
        mode: Mode,
    ) -> Result<Array2<f32>> {
        check_input("dense input", x.shape(), &[self.dim.0])?;

        let (w, b) = self.view_params(params)?;
        let z = x.dot(&w) + &b;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        if mode == Mode::Train {
            self.x = Some(x);
            self.z = Some(z);
        } else {
            self.x = None;
            self.z = None;
        }
        Ok(a)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let (Some(x), Some(z)) = (self.x.take(), self.z.take()) else {
            return Err(MlErr::BackwardBeforeForward { layer: "dense" });
        };

        if d.shape() != z.shape() {
            return Err(MlErr::ShapeMismatch {
                what: "dense delta",
                got: d.shape().to_vec(),
                expected: z.shape().to_vec(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        dw.assign(&x.t().dot(&d));
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Applies this layer's weight constraint, if any, to its parameters.
    pub fn constrain(&self, params: &mut [f32]) -> Result<()> {
        let Some(max_norm) = self.max_norm else {
            return Ok(());
        };

        let w_size = self.size - self.dim.1;
        let w = ArrayViewMut2::from_shape(self.dim, &mut params[..w_size])?;
        max_norm.apply(w);
        Ok(())
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    ///
    /// # Arguments
    /// * `grad` - A gradient slice.
    ///
    /// # Returns
    /// A tuple containing the delta weights and delta biases.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad[..self.size].split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    ///
    /// # Arguments
    /// * `params` - A slice of parameters.
    ///
    /// # Returns
    /// A tuple containing the weights and biases.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..self.size])?;
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_is_an_affine_map() {
        let mut dense = Dense::new((2, 1), None, None);
        let params = [2.0, -1.0, 0.5];

        let y = dense
            .forward(&params, array![[1.0, 1.0], [3.0, 2.0]], Mode::Infer)
            .unwrap();
        assert_eq!(y, array![[1.5], [4.5]]);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut dense = Dense::new((3, 2), Some(ActFn::sigmoid(1.0)), None);
        let params: Vec<f32> = (0..dense.size()).map(|i| (i as f32 - 3.5) / 4.0).collect();
        let x = array![[0.1, -0.4, 0.7], [0.9, 0.2, -0.3]];

        dense.forward(&params, x.clone(), Mode::Train).unwrap();
        let mut grad = vec![0.; dense.size()];
        let dx = dense.backward(&params, &mut grad, Array2::ones((2, 2))).unwrap();

        let eps = 1e-2;
        let mut loss =
            |p: &[f32], x: &Array2<f32>| dense.forward(p, x.clone(), Mode::Infer).unwrap().sum();

        for i in 0..params.len() {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let numeric = (loss(&plus, &x) - loss(&minus, &x)) / (2. * eps);
            assert!((numeric - grad[i]).abs() < 1e-3, "param {i}: {numeric} vs {}", grad[i]);
        }

        let mut plus = x.clone();
        let mut minus = x.clone();
        plus[[1, 2]] += eps;
        minus[[1, 2]] -= eps;
        let numeric = (loss(&params, &plus) - loss(&params, &minus)) / (2. * eps);
        assert!((numeric - dx[[1, 2]]).abs() < 1e-3);
    }

    #[test]
    fn constrain_rescales_only_large_columns() {
        let dense = Dense::new((2, 2), None, Some(MaxNorm::new(1.0)));
        let mut params = [3.0, 0.6, 4.0, 0.8, 9.0, 9.0];

        dense.constrain(&mut params).unwrap();

        assert!((params[0] - 0.6).abs() < 1e-6);
        assert!((params[2] - 0.8).abs() < 1e-6);
        assert_eq!(params[1], 0.6);
        assert_eq!(params[3], 0.8);
        // Biases are never constrained.
        assert_eq!(params[4..], [9.0, 9.0]);
    }

    #[test]
    fn wrongly_sized_inputs_are_rejected() {
        let mut dense = Dense::new((3, 1), None, None);
        let params = [0.; 4];

        let res = dense.forward(&params, Array2::zeros((2, 2)), Mode::Train);
        assert!(matches!(res, Err(MlErr::ShapeMismatch { .. })));
    }

    #[test]
    fn inference_keeps_no_backprop_state() {
        let mut dense = Dense::new((2, 1), Some(ActFn::relu()), None);
        let params = [1.0, 1.0, 0.0];
        let mut grad = [0.; 3];

        dense.forward(&params, array![[1.0, 2.0]], Mode::Infer).unwrap();
        assert!(dense.x.is_none() && dense.z.is_none());
        assert!(matches!(
            dense.backward(&params, &mut grad, array![[1.0]]),
            Err(MlErr::BackwardBeforeForward { .. })
        ));
    }
}
