use super::{Optimizer, optimizer::check_len};
use crate::Result;

/// The Adam optimizer, with bias corrected first and second moment estimates.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    pub const LEARNING_RATE: f32 = 1e-3;
    pub const BETA1: f32 = 0.9;
    pub const BETA2: f32 = 0.999;
    pub const EPSILON: f32 = 1e-7;

    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }

    /// Creates a new `Adam` optimizer with the usual hyperparameters (lr 1e-3, betas 0.9 and
    /// 0.999, epsilon 1e-7).
    pub fn with_defaults(len: usize) -> Self {
        Self::new(
            len,
            Self::LEARNING_RATE,
            Self::BETA1,
            Self::BETA2,
            Self::EPSILON,
        )
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(grad, params)?;
        check_len(grad, &self.v)?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MlErr;

    #[test]
    fn first_step_has_the_length_of_the_learning_rate() {
        let mut adam = Adam::with_defaults(3);
        let mut params = [1.0, 1.0, 1.0];

        adam.update_params(&[0.5, -2.0, 0.0], &mut params).unwrap();

        assert!((params[0] - (1.0 - 1e-3)).abs() < 1e-6);
        assert!((params[1] - (1.0 + 1e-3)).abs() < 1e-6);
        assert_eq!(params[2], 1.0);
    }

    #[test]
    fn minimizes_a_quadratic() {
        let mut adam = Adam::new(1, 0.05, 0.9, 0.999, 1e-7);
        let mut params = [3.0];

        for _ in 0..1000 {
            let grad = [2. * (params[0] - 1.)];
            adam.update_params(&grad, &mut params).unwrap();
        }

        assert!((params[0] - 1.).abs() < 5e-2);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut adam = Adam::with_defaults(2);

        let mut params = [0.0; 2];
        let res = adam.update_params(&[1.0, 2.0, 3.0], &mut params);
        assert!(matches!(res, Err(MlErr::SizeMismatch { .. })));

        let mut params = [0.0; 3];
        let res = adam.update_params(&[1.0, 2.0, 3.0], &mut params);
        assert!(matches!(res, Err(MlErr::SizeMismatch { .. })));
    }
}
