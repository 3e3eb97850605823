mod conv2d;
mod dense;
mod dropout;
mod flatten;
mod layer;
mod pool2d;

pub use conv2d::Conv2d;
pub use dense::Dense;
pub use dropout::Dropout;
pub use flatten::Flatten;
pub use layer::{Layer, Mode};
pub use pool2d::{Pool2d, PoolKind};

use crate::{MlErr, Result};

/// Checks that a batch has the per-sample shape a layer was built for.
pub(crate) fn check_input(what: &'static str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got.len() != expected.len() + 1 || got[1..] != *expected {
        let mut batch_shape = vec![got.first().copied().unwrap_or_default()];
        batch_shape.extend_from_slice(expected);

        return Err(MlErr::ShapeMismatch {
            what,
            got: got.to_vec(),
            expected: batch_shape,
        });
    }

    Ok(())
}
