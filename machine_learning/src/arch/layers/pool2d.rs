use ndarray::prelude::*;

use super::{Mode, check_input};
use crate::{MlErr, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Average,
}

/// A 2D pooling layer with a stride equal to its window and no padding, odd trailing rows and
/// columns are dropped.
#[derive(Debug)]
pub struct Pool2d {
    kind: PoolKind,
    input: [usize; 3],
    output: [usize; 3],
    pool: (usize, usize),

    // Forward metadata: batch size and, for max pooling, the input index of every maximum.
    cache: Option<(usize, Vec<usize>)>,
}

impl Pool2d {
    pub fn new(kind: PoolKind, input: [usize; 3], pool: (usize, usize)) -> Result<Self> {
        let [h, w, c] = input;
        let (ph, pw) = pool;

        if ph == 0 || pw == 0 || h < ph || w < pw {
            return Err(MlErr::InvalidArchitecture(format!(
                "a pool of {pool:?} does not fit an input of {input:?}"
            )));
        }

        Ok(Self {
            kind,
            input,
            output: [h / ph, w / pw, c],
            pool,
            cache: None,
        })
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn pool(&self) -> (usize, usize) {
        self.pool
    }

    pub fn output_shape(&self) -> [usize; 3] {
        self.output
    }

    pub fn forward(&mut self, x: Array4<f32>, mode: Mode) -> Result<Array4<f32>> {
        check_input("pool2d input", x.shape(), &self.input)?;

        let n = x.len_of(Axis(0));
        let [h, w, c] = self.input;
        let [oh, ow, _] = self.output;
        let (ph, pw) = self.pool;
        let xs: Vec<f32> = x.iter().copied().collect();

        let mut out = Vec::with_capacity(n * oh * ow * c);
        let mut argmax = match self.kind {
            PoolKind::Max => Vec::with_capacity(n * oh * ow * c),
            PoolKind::Average => Vec::new(),
        };

        for s in 0..n {
            for oy in 0..oh {
                for ox in 0..ow {
                    for ch in 0..c {
                        let window = (0..ph).flat_map(|dy| {
                            (0..pw).map(move |dx| {
                                ((s * h + oy * ph + dy) * w + ox * pw + dx) * c + ch
                            })
                        });

                        match self.kind {
                            PoolKind::Max => {
                                let first = ((s * h + oy * ph) * w + ox * pw) * c + ch;
                                let (idx, max) = window.fold((first, xs[first]), |acc, i| {
                                    if xs[i] > acc.1 || acc.1.is_nan() { (i, xs[i]) } else { acc }
                                });
                                out.push(max);
                                argmax.push(idx);
                            }
                            PoolKind::Average => {
                                let sum: f32 = window.map(|i| xs[i]).sum();
                                out.push(sum / (ph * pw) as f32);
                            }
                        }
                    }
                }
            }
        }

        self.cache = (mode == Mode::Train).then_some((n, argmax));
        Ok(Array4::from_shape_vec((n, oh, ow, c), out)?)
    }

    pub fn backward(&mut self, d: Array4<f32>) -> Result<Array4<f32>> {
        let Some((n, argmax)) = self.cache.take() else {
            return Err(MlErr::BackwardBeforeForward { layer: "pool2d" });
        };

        let [h, w, c] = self.input;
        let [oh, ow, _] = self.output;
        let (ph, pw) = self.pool;

        let expected = [n, oh, ow, c];
        if d.shape() != &expected[..] {
            return Err(MlErr::ShapeMismatch {
                what: "pool2d delta",
                got: d.shape().to_vec(),
                expected: expected.to_vec(),
            });
        }

        let mut dx = vec![0.; n * h * w * c];

        match self.kind {
            PoolKind::Max => {
                for (&i, &d) in argmax.iter().zip(d.iter()) {
                    dx[i] += d;
                }
            }
            PoolKind::Average => {
                let scale = 1. / (ph * pw) as f32;

                for ((s, oy, ox, ch), &d) in d.indexed_iter() {
                    for dy in 0..ph {
                        for dxx in 0..pw {
                            let i = ((s * h + oy * ph + dy) * w + ox * pw + dxx) * c + ch;
                            dx[i] += d * scale;
                        }
                    }
                }
            }
        }

        Ok(Array4::from_shape_vec((n, h, w, c), dx)?)
    }
}
