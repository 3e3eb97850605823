use ndarray::{ArrayD, Zip};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{MlErr, Result};

/// Inverted dropout: while training, every activation is zeroed with probability `rate` and the
/// survivors are scaled by `1 / (1 - rate)`. At inference time it is the identity.
#[derive(Debug)]
pub struct Dropout {
    rate: f32,
    rng: StdRng,

    // Forward metadata
    mask: Option<ArrayD<f32>>,
}

impl Dropout {
    /// Creates a new `Dropout`.
    ///
    /// # Arguments
    /// * `rate` - The probability of dropping each activation, in `[0, 1)`.
    /// * `seed` - The seed for the masks' random number generator.
    pub fn new(rate: f32, seed: u64) -> Result<Self> {
        if !(0. ..1.).contains(&rate) {
            return Err(MlErr::InvalidArchitecture(format!(
                "dropout rate must be in [0, 1), got {rate}"
            )));
        }

        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            mask: None,
        })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn forward(&mut self, mut x: ArrayD<f32>, train: bool) -> ArrayD<f32> {
        if !train || self.rate == 0. {
            self.mask = None;
            return x;
        }

        let keep = 1. / (1. - self.rate);
        let rate = self.rate;
        let rng = &mut self.rng;
        let mask = x.mapv(|_| if rng.random::<f32>() < rate { 0. } else { keep });

        x *= &mask;
        self.mask = Some(mask);
        x
    }

    pub fn backward(&mut self, mut d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some(mask) = self.mask.take() else {
            return Ok(d);
        };

        if d.shape() != mask.shape() {
            return Err(MlErr::ShapeMismatch {
                what: "dropout delta",
                got: d.shape().to_vec(),
                expected: mask.shape().to_vec(),
            });
        }

        Zip::from(&mut d).and(&mask).for_each(|d, &m| *d *= m);
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    #[test]
    fn inference_is_the_identity() {
        let mut dropout = Dropout::new(0.5, 7).unwrap();
        let x = ArrayD::from_elem(IxDyn(&[4, 10]), 1.0f32);

        assert_eq!(dropout.forward(x.clone(), false), x);
    }

    #[test]
    fn training_zeroes_and_rescales() {
        let mut dropout = Dropout::new(0.5, 7).unwrap();
        let x = ArrayD::from_elem(IxDyn(&[8, 64]), 1.0f32);

        let y = dropout.forward(x, true);
        let dropped = y.iter().filter(|&&v| v == 0.).count();

        assert!(y.iter().all(|&v| v == 0. || v == 2.));
        assert!(dropped > 0 && dropped < y.len());

        // The gradient flows only through the kept activations.
        let d = dropout.backward(ArrayD::ones(IxDyn(&[8, 64]))).unwrap();
        assert_eq!(d, y);
    }

    #[test]
    fn masks_are_reproducible_for_a_seed() {
        let x = ArrayD::from_elem(IxDyn(&[2, 32]), 1.0f32);

        let a = Dropout::new(0.2, 42).unwrap().forward(x.clone(), true);
        let b = Dropout::new(0.2, 42).unwrap().forward(x, true);
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_rates_are_rejected() {
        assert!(Dropout::new(1.0, 0).is_err());
        assert!(Dropout::new(-0.1, 0).is_err());
    }
}
