use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{MlErr, Result};

/// How the kernels of a model are initialized. Biases always start at zero.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum ParamInit {
    /// `U(-l, l)` with `l = sqrt(6 / (fan_in + fan_out))`.
    #[default]
    GlorotUniform,
    Normal {
        mean: f32,
        std_dev: f32,
    },
}

impl ParamInit {
    pub(crate) fn fill<R: Rng + ?Sized>(
        &self,
        kernel: &mut [f32],
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Result<()> {
        match *self {
            ParamInit::GlorotUniform => {
                let limit = (6. / (fan_in + fan_out).max(1) as f32).sqrt();
                kernel
                    .iter_mut()
                    .for_each(|w| *w = rng.random_range(-limit..limit));
            }
            ParamInit::Normal { mean, std_dev } => {
                if !(std_dev >= 0. && std_dev.is_finite() && mean.is_finite()) {
                    return Err(MlErr::InvalidInit(format!(
                        "normal({mean}, {std_dev}) needs finite values and std_dev >= 0"
                    )));
                }

                let normal = Normal::new(mean, std_dev)
                    .map_err(|e| MlErr::InvalidInit(format!("normal({mean}, {std_dev}): {e}")))?;
                kernel.iter_mut().for_each(|w| *w = normal.sample(rng));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn glorot_uniform_stays_within_its_limit() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut kernel = vec![0.; 1000];

        ParamInit::GlorotUniform.fill(&mut kernel, 10, 14, &mut rng).unwrap();

        let limit = 0.5;
        assert!(kernel.iter().all(|w| w.abs() <= limit));
        assert!(kernel.iter().any(|&w| w != 0.));
    }

    #[test]
    fn invalid_normal_parameters_are_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut kernel = vec![0.; 4];

        for (mean, std_dev) in [(0., -1.), (0., f32::NAN), (0., f32::INFINITY), (f32::NAN, 1.)] {
            let init = ParamInit::Normal { mean, std_dev };
            assert!(matches!(
                init.fill(&mut kernel, 2, 2, &mut rng),
                Err(MlErr::InvalidInit(_))
            ));
        }
        assert_eq!(kernel, [0.; 4]);
    }

    #[test]
    fn normal_init_is_seeded() {
        let init = ParamInit::Normal {
            mean: 1.,
            std_dev: 0.1,
        };
        let mut a = vec![0.; 64];
        let mut b = vec![0.; 64];

        init.fill(&mut a, 8, 8, &mut StdRng::seed_from_u64(7)).unwrap();
        init.fill(&mut b, 8, 8, &mut StdRng::seed_from_u64(7)).unwrap();

        assert_eq!(a, b);
        let mean = a.iter().sum::<f32>() / a.len() as f32;
        assert!((mean - 1.).abs() < 0.1);
    }
}
