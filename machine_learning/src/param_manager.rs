use std::mem;

use crate::{MlErr, Result, optimization::Optimizer};

/// Owns the flat parameter and gradient buffers of a model.
///
/// Layers don't hold their parameters, they borrow their slice of the buffers in the order they
/// appear in the model. The slices can be iterated sequentially in order or in reverse through
/// the `FrontIter` and the `BackIter`.
#[derive(Debug, Clone)]
pub struct ParamManager {
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl ParamManager {
    /// Creates a new `ParamManager` with `size` zeroed parameters.
    pub fn new(size: usize) -> Self {
        Self {
            params: vec![0.; size],
            grad: vec![0.; size],
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Overwrites every parameter.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if `params` doesn't hold exactly `len()` values.
    pub fn set_params(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params.copy_from_slice(params);
        Ok(())
    }

    /// Creates a new iterator over the parameters, front to back.
    pub fn front(&self) -> FrontIter<'_> {
        FrontIter {
            params: &self.params,
        }
    }

    /// Creates a new iterator over the parameters and gradients, back to front.
    pub fn back(&mut self) -> BackIter<'_> {
        BackIter {
            params: &self.params,
            grad: &mut self.grad,
        }
    }

    /// Applies the gradient onto the parameters.
    pub fn optimize<O: Optimizer>(&mut self, optimizer: &mut O) -> Result<()> {
        optimizer.update_params(&self.grad, &mut self.params)
    }

    /// Zeros out the gradient.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }
}

/// The forward parameter iterator.
pub struct FrontIter<'pm> {
    params: &'pm [f32],
}

impl<'pm> FrontIter<'pm> {
    /// Takes the next `n` parameters.
    ///
    /// # Returns
    /// A slice of parameters or `None` if there are less than `n` left.
    pub fn take(&mut self, n: usize) -> Option<&'pm [f32]> {
        if n > self.params.len() {
            return None;
        }

        let (head, tail) = self.params.split_at(n);
        self.params = tail;
        Some(head)
    }
}

/// The reversed parameter iterator, it yields the gradient paired with its parameters.
pub struct BackIter<'pm> {
    params: &'pm [f32],
    grad: &'pm mut [f32],
}

impl<'pm> BackIter<'pm> {
    /// Takes the last `n` parameters that weren't taken yet.
    ///
    /// # Returns
    /// A tuple of parameters and gradient or `None` if there are less than `n` left.
    pub fn take(&mut self, n: usize) -> Option<(&'pm [f32], &'pm mut [f32])> {
        let len = self.params.len();
        if n > len {
            return None;
        }

        let (params_head, params_tail) = self.params.split_at(len - n);
        let (grad_head, grad_tail) = mem::take(&mut self.grad).split_at_mut(len - n);
        self.params = params_head;
        self.grad = grad_head;
        Some((params_tail, grad_tail))
    }
}
