use ndarray::prelude::*;
use rand::Rng;
use rayon::prelude::*;

use super::{Mode, check_input};
use crate::{
    MlErr, Result,
    arch::{ParamInit, activations::ActFn, spec::Padding},
};

/// A 2D convolution with stride 1 over `(batch, height, width, channels)` inputs.
///
/// The parameters are laid out as a `(kh, kw, c_in, filters)` kernel followed by `filters`
/// biases. Each sample is lowered to a matrix of patches (im2col) so both passes are plain
/// matrix products, samples of a batch are processed in parallel.
#[derive(Debug)]
pub struct Conv2d {
    input: [usize; 3],
    output: [usize; 3],
    kernel: (usize, usize),
    padding: Padding,
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Option<Vec<f32>>,
    z: Option<Array4<f32>>,
}

impl Conv2d {
    /// Creates a new `Conv2d`.
    ///
    /// # Arguments
    /// * `input` - The shape of a single input sample, `[height, width, channels]`.
    /// * `filters` - The amount of output channels.
    /// * `kernel` - The height and width of the kernel.
    /// * `padding` - The padding strategy.
    /// * `act_fn` - An optional activation applied to the output.
    ///
    /// # Returns
    /// A new `Conv2d` or an error if the output would be empty.
    pub fn new(
        input: [usize; 3],
        filters: usize,
        kernel: (usize, usize),
        padding: Padding,
        act_fn: Option<ActFn>,
    ) -> Result<Self> {
        let [h, w, c] = input;
        let (kh, kw) = kernel;

        if filters == 0 || kh == 0 || kw == 0 || c == 0 {
            return Err(MlErr::InvalidArchitecture(format!(
                "conv2d needs non zero filters, kernel and input channels, got {filters} filters, \
                 kernel {kernel:?} and input {input:?}"
            )));
        }

        let (oh, ow) = match padding {
            Padding::Same => (h, w),
            Padding::Valid => ((h + 1).saturating_sub(kh), (w + 1).saturating_sub(kw)),
        };

        if oh == 0 || ow == 0 {
            return Err(MlErr::InvalidArchitecture(format!(
                "conv2d with kernel {kernel:?} does not fit an input of {input:?}"
            )));
        }

        Ok(Self {
            input,
            output: [oh, ow, filters],
            kernel,
            padding,
            act_fn,
            size: (kh * kw * c + 1) * filters,
            x: None,
            z: None,
        })
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn output_shape(&self) -> [usize; 3] {
        self.output
    }

    pub fn filters(&self) -> usize {
        self.output[2]
    }

    pub fn kernel(&self) -> (usize, usize) {
        self.kernel
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn act_fn(&self) -> Option<&ActFn> {
        self.act_fn.as_ref()
    }

    /// The names and shapes of this layer's parameters, in storage order.
    pub fn param_shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        let (kh, kw) = self.kernel;
        let filters = self.filters();

        vec![
            ("kernel", vec![kh, kw, self.input[2], filters]),
            ("bias", vec![filters]),
        ]
    }

    pub fn init_params<R: Rng + ?Sized>(
        &self,
        params: &mut [f32],
        init: &ParamInit,
        rng: &mut R,
    ) -> Result<()> {
        let (kh, kw) = self.kernel;
        let fan_in = kh * kw * self.input[2];
        let fan_out = kh * kw * self.filters();
        let (kernel, bias) = params.split_at_mut(self.size - self.filters());

        init.fill(kernel, fan_in, fan_out, rng)?;
        bias.fill(0.);
        Ok(())
    }

    pub fn forward(
        &mut self,
        params: &[f32],
        x: Array4<f32>,
        mode: Mode,
    ) -> Result<Array4<f32>> {
        check_input("conv2d input", x.shape(), &self.input)?;

        let n = x.len_of(Axis(0));
        let [oh, ow, filters] = self.output;
        let sample = self.input.iter().product::<usize>();
        let xs: Vec<f32> = x.iter().copied().collect();

        let (kernel, bias) = self.view_params(params)?;
        let zs = (0..n)
            .into_par_iter()
            .map(|i| {
                let cols = self.im2col(&xs[i * sample..][..sample])?;
                Ok(cols.dot(&kernel) + &bias)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut z = Vec::with_capacity(n * oh * ow * filters);
        for zi in &zs {
            z.extend(zi.iter());
        }
        let z = Array4::from_shape_vec((n, oh, ow, filters), z)?;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        if mode == Mode::Train {
            self.x = Some(xs);
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
        mut d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        let (Some(xs), Some(z)) = (self.x.take(), self.z.take()) else {
            return Err(MlErr::BackwardBeforeForward { layer: "conv2d" });
        };

        if d.shape() != z.shape() {
            return Err(MlErr::ShapeMismatch {
                what: "conv2d delta",
                got: d.shape().to_vec(),
                expected: z.shape().to_vec(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let n = d.len_of(Axis(0));
        let [h, w, c] = self.input;
        let [oh, ow, filters] = self.output;
        let rows = oh * ow;
        let sample = h * w * c;
        let ds: Vec<f32> = d.iter().copied().collect();

        let (kernel, _) = self.view_params(params)?;
        let partials = (0..n)
            .into_par_iter()
            .map(|i| {
                let cols = self.im2col(&xs[i * sample..][..sample])?;
                let ds = &ds[i * rows * filters..][..rows * filters];
                let dz = ArrayView2::from_shape((rows, filters), ds)?;

                let dk = cols.t().dot(&dz);
                let db = dz.sum_axis(Axis(0));
                let dx = self.col2im(dz.dot(&kernel.t()).view());
                Ok((dk, db, dx))
            })
            .collect::<Result<Vec<_>>>()?;

        let (mut dw, mut db) = self.view_grad(grad)?;
        dw.fill(0.);
        db.fill(0.);

        let mut dx = Vec::with_capacity(n * sample);
        for (dki, dbi, dxi) in partials {
            dw += &dki;
            db += &dbi;
            dx.extend(dxi);
        }

        Ok(Array4::from_shape_vec((n, h, w, c), dx)?)
    }

    /// The amount of padding added before the first row and column.
    fn pad_before(&self) -> (usize, usize) {
        match self.padding {
            Padding::Same => ((self.kernel.0 - 1) / 2, (self.kernel.1 - 1) / 2),
            Padding::Valid => (0, 0),
        }
    }

    /// Lowers a single `(h, w, c)` sample into a `(oh * ow, kh * kw * c)` matrix where each row
    /// holds the input patch seen by one output position. Out of bounds positions are zeros.
    fn im2col(&self, x: &[f32]) -> Result<Array2<f32>> {
        let [h, w, c] = self.input;
        let [oh, ow, _] = self.output;
        let (kh, kw) = self.kernel;
        let (pt, pl) = self.pad_before();
        let k = kh * kw * c;

        let mut cols = vec![0.; oh * ow * k];
        for oy in 0..oh {
            for ox in 0..ow {
                let row = &mut cols[(oy * ow + ox) * k..][..k];

                for ky in 0..kh {
                    let Some(iy) = (oy + ky).checked_sub(pt).filter(|&iy| iy < h) else {
                        continue;
                    };

                    for kx in 0..kw {
                        let Some(ix) = (ox + kx).checked_sub(pl).filter(|&ix| ix < w) else {
                            continue;
                        };

                        let src = &x[(iy * w + ix) * c..][..c];
                        row[(ky * kw + kx) * c..][..c].copy_from_slice(src);
                    }
                }
            }
        }

        Ok(Array2::from_shape_vec((oh * ow, k), cols)?)
    }

    /// The adjoint of `im2col`: scatters a patch matrix back onto a single sample, adding up
    /// overlapping contributions.
    fn col2im(&self, cols: ArrayView2<f32>) -> Vec<f32> {
        let [h, w, c] = self.input;
        let [_, ow, _] = self.output;
        let (kh, kw) = self.kernel;
        let (pt, pl) = self.pad_before();

        let mut x = vec![0.; h * w * c];
        for (r, row) in cols.outer_iter().enumerate() {
            let (oy, ox) = (r / ow, r % ow);

            for ky in 0..kh {
                let Some(iy) = (oy + ky).checked_sub(pt).filter(|&iy| iy < h) else {
                    continue;
                };

                for kx in 0..kw {
                    let Some(ix) = (ox + kx).checked_sub(pl).filter(|&ix| ix < w) else {
                        continue;
                    };

                    let dst = &mut x[(iy * w + ix) * c..][..c];
                    let base = (ky * kw + kx) * c;
                    for (ch, v) in dst.iter_mut().enumerate() {
                        *v += row[base + ch];
                    }
                }
            }
        }

        x
    }

    /// Gives a view of the raw parameter slice as the kernel matrix and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let filters = self.filters();
        let k_size = self.size - filters;
        let kernel = ArrayView2::from_shape((k_size / filters, filters), &params[..k_size])?;
        let bias = ArrayView1::from_shape(filters, &params[k_size..self.size])?;
        Ok((kernel, bias))
    }

    /// Gives a view of the raw gradient slice as the delta kernel and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let filters = self.filters();
        let k_size = self.size - filters;
        let (dk_raw, db_raw) = grad[..self.size].split_at_mut(k_size);
        let dk = ArrayViewMut2::from_shape((k_size / filters, filters), dk_raw)?;
        let db = ArrayViewMut1::from_shape(filters, db_raw)?;
        Ok((dk, db))
    }
}
