use std::num::NonZeroUsize;

use ndarray::{Array2, Array4, ArrayView2, ArrayView4, Axis};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result};

/// Turns `u8` images into batches of `f32` model inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageDataGenerator {
    rescale: f32,
}

impl ImageDataGenerator {
    /// Creates a new `ImageDataGenerator`.
    ///
    /// # Arguments
    /// * `rescale` - The factor every pixel is multiplied by, usually `1 / 255`.
    pub fn new(rescale: f32) -> Self {
        Self { rescale }
    }

    pub fn rescale(&self) -> f32 {
        self.rescale
    }

    /// Creates a `Flow` of batches over a set of images and their targets.
    ///
    /// # Arguments
    /// * `x` - The images, `(n, height, width, channels)`.
    /// * `y` - The targets, one row per image.
    /// * `batch_size` - The maximum amount of samples per batch.
    /// * `shuffle` - Whether the samples are visited in a random order on each pass.
    ///
    /// # Returns
    /// The new flow or an error if `x` and `y` have a different amount of samples.
    pub fn flow<'a>(
        &self,
        x: ArrayView4<'a, u8>,
        y: ArrayView2<'a, f32>,
        batch_size: NonZeroUsize,
        shuffle: bool,
    ) -> Result<Flow<'a>> {
        let (nx, ny) = (x.len_of(Axis(0)), y.len_of(Axis(0)));
        if nx != ny {
            return Err(MlErr::SizeMismatch {
                what: "targets",
                got: ny,
                expected: nx,
            });
        }

        Ok(Flow {
            x,
            y,
            batch_size,
            shuffle,
            rescale: self.rescale,
        })
    }
}

/// A batched view over a set of images and their targets.
#[derive(Debug, Clone)]
pub struct Flow<'a> {
    x: ArrayView4<'a, u8>,
    y: ArrayView2<'a, f32>,
    batch_size: NonZeroUsize,
    shuffle: bool,
    rescale: f32,
}

impl<'a> Flow<'a> {
    /// The amount of samples.
    pub fn len(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    /// The amount of batches yielded by a full pass.
    pub fn steps(&self) -> usize {
        self.len().div_ceil(self.batch_size.get())
    }

    /// Starts a pass over the samples, each one is yielded exactly once.
    ///
    /// # Arguments
    /// * `rng` - Decides the order of the samples when the flow shuffles.
    pub fn batches<R: Rng + ?Sized>(&self, rng: &mut R) -> Batches<'_, 'a> {
        let mut order: Vec<_> = (0..self.len()).collect();
        if self.shuffle {
            order.shuffle(rng);
        }

        Batches {
            flow: self,
            order,
            curr: 0,
        }
    }

    /// Starts a pass over the samples in their original order, regardless of `shuffle`.
    pub fn ordered(&self) -> Batches<'_, 'a> {
        Batches {
            flow: self,
            order: (0..self.len()).collect(),
            curr: 0,
        }
    }
}

/// An iterator over the `(x, y)` batches of a `Flow`.
pub struct Batches<'f, 'a> {
    flow: &'f Flow<'a>,
    order: Vec<usize>,
    curr: usize,
}

impl Iterator for Batches<'_, '_> {
    type Item = (Array4<f32>, Array2<f32>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr == self.order.len() {
            return None;
        }

        let end = (self.curr + self.flow.batch_size.get()).min(self.order.len());
        let idx = &self.order[self.curr..end];
        self.curr = end;

        let rescale = self.flow.rescale;
        let x = self
            .flow
            .x
            .select(Axis(0), idx)
            .mapv(|p| p as f32 * rescale);
        let y = self.flow.y.select(Axis(0), idx);

        Some((x, y))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.order.len() - self.curr).div_ceil(self.flow.batch_size.get());
        (left, Some(left))
    }
}

impl ExactSizeIterator for Batches<'_, '_> {}

#[cfg(test)]
mod tests {
    use ndarray::Array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn data(n: usize) -> (Array4<u8>, Array2<f32>) {
        let x = Array::from_shape_fn((n, 2, 2, 1), |(i, _, _, _)| (i * 51) as u8);
        let y = Array::from_shape_fn((n, 1), |(i, _)| i as f32);
        (x, y)
    }

    #[test]
    fn every_sample_is_yielded_once() {
        let (x, y) = data(5);
        let generator = ImageDataGenerator::new(1. / 255.);
        let flow = generator
            .flow(x.view(), y.view(), NonZeroUsize::new(2).unwrap(), true)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let batches: Vec<_> = flow.batches(&mut rng).collect();
        assert_eq!(flow.steps(), 3);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].0.len_of(Axis(0)), 1);

        let mut seen: Vec<_> = batches.iter().flat_map(|(_, y)| y.iter().copied()).collect();
        seen.sort_by(f32::total_cmp);
        assert_eq!(seen, [0., 1., 2., 3., 4.]);
    }

    #[test]
    fn pixels_are_rescaled_and_stay_paired_with_their_targets() {
        let (x, y) = data(5);
        let generator = ImageDataGenerator::new(1. / 255.);
        let flow = generator
            .flow(x.view(), y.view(), NonZeroUsize::new(4).unwrap(), true)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(9);

        for (xb, yb) in flow.batches(&mut rng) {
            for (xi, yi) in xb.outer_iter().zip(yb.outer_iter()) {
                let expected = yi[0] * 51. / 255.;
                assert!(xi.iter().all(|&p| (p - expected).abs() < 1e-6));
                assert!(xi.iter().all(|p| (0.0..=1.0).contains(p)));
            }
        }
    }

    #[test]
    fn unshuffled_flows_keep_the_order() {
        let (x, y) = data(3);
        let flow = ImageDataGenerator::new(1.)
            .flow(x.view(), y.view(), NonZeroUsize::new(8).unwrap(), false)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let (_, yb) = flow.batches(&mut rng).next().unwrap();
        assert_eq!(yb.column(0).to_vec(), [0., 1., 2.]);

        let shuffled = ImageDataGenerator::new(1.)
            .flow(x.view(), y.view(), NonZeroUsize::new(1).unwrap(), true)
            .unwrap();
        let ys: Vec<_> = shuffled.ordered().map(|(_, yb)| yb[[0, 0]]).collect();
        assert_eq!(ys, [0., 1., 2.]);
    }

    fn target_sum<'a>(x: ArrayView4<'a, u8>, y: ArrayView2<'a, f32>) -> f32 {
        let flow = ImageDataGenerator::new(1.)
            .flow(x, y, NonZeroUsize::new(2).unwrap(), false)
            .unwrap();
        flow.ordered().map(|(_, yb)| yb.sum()).sum()
    }

    #[test]
    fn flows_over_separately_owned_views_are_local() {
        let (x, _) = data(4);
        let y = Array2::from_elem((4, 1), 1.5);

        assert_eq!(target_sum(x.view(), y.view()), 6.);
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let (x, _) = data(3);
        let (_, y) = data(2);

        let res = ImageDataGenerator::new(1.).flow(
            x.view(),
            y.view(),
            NonZeroUsize::new(1).unwrap(),
            false,
        );
        assert!(matches!(res, Err(MlErr::SizeMismatch { .. })));
    }
}
