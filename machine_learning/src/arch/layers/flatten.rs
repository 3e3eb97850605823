use ndarray::{Array2, Array4, Axis};

use super::check_input;
use crate::Result;

/// Flattens `(batch, h, w, c)` inputs into `(batch, h * w * c)` rows.
#[derive(Debug)]
pub struct Flatten {
    input: [usize; 3],
}

impl Flatten {
    pub fn new(input: [usize; 3]) -> Self {
        Self { input }
    }

    pub fn output_size(&self) -> usize {
        self.input.iter().product()
    }

    pub fn forward(&self, x: Array4<f32>) -> Result<Array2<f32>> {
        check_input("flatten input", x.shape(), &self.input)?;

        let n = x.len_of(Axis(0));
        let data = x.iter().copied().collect();
        Ok(Array2::from_shape_vec((n, self.output_size()), data)?)
    }

    pub fn backward(&self, d: Array2<f32>) -> Result<Array4<f32>> {
        check_input("flatten delta", d.shape(), &[self.output_size()])?;

        let [h, w, c] = self.input;
        let n = d.nrows();
        let data = d.iter().copied().collect();
        Ok(Array4::from_shape_vec((n, h, w, c), data)?)
    }
}
