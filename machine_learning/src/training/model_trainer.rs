use std::num::NonZeroUsize;

use log::{debug, info};
use ndarray::Axis;
use rand::Rng;

use super::{EpochMetrics, Evaluation, History};
use crate::{
    MlErr, Result,
    arch::{
        Model,
        loss::{LossFn, Mse},
    },
    optimization::Optimizer,
    preprocessing::Flow,
};

/// A model trainer. Contains the relevant components needed for training a model, except for
/// the model and its data.
pub struct ModelTrainer<O, L, R>
where
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    optimizer: O,
    loss_fn: L,
    epochs: NonZeroUsize,
    rng: R,
}

impl<O, L, R> ModelTrainer<O, L, R>
where
    O: Optimizer,
    L: LossFn,
    R: Rng,
{
    /// Returns a new `ModelTrainer`.
    ///
    /// # Arguments
    /// * `optimizer` - The optimizer, sized for the model it's going to train.
    /// * `loss_fn` - The loss function used to measure the difference between a model's output and the expected one.
    /// * `epochs` - The amount of passes over the training data per `fit` call.
    /// * `rng` - A random number generator, it decides the order of the samples on every epoch.
    pub fn new(optimizer: O, loss_fn: L, epochs: NonZeroUsize, rng: R) -> Self {
        Self {
            optimizer,
            loss_fn,
            epochs,
            rng,
        }
    }

    pub fn epochs(&self) -> NonZeroUsize {
        self.epochs
    }

    /// Trains `model` for `epochs` epochs, validating it after every one of them.
    ///
    /// # Arguments
    /// * `model` - The model to train.
    /// * `train` - The training data.
    /// * `validation` - Optional data the model is evaluated on after every epoch.
    ///
    /// # Returns
    /// The metrics of every epoch, or an error if the training data is empty.
    pub fn fit<M: Model>(
        &mut self,
        model: &mut M,
        train: &Flow,
        validation: Option<&Flow>,
    ) -> Result<History> {
        if train.is_empty() {
            return Err(MlErr::EmptyDataset);
        }

        let epochs = self.epochs.get();
        let mut history = History::default();

        for epoch in 1..=epochs {
            // NOTE: the epoch loss is the mean of the batch losses weighted by their size, each
            // one measured before its own update, so it lags slightly behind the model.
            let mut total_loss = 0.;

            for (step, (x, y)) in train.batches(&mut self.rng).enumerate() {
                let n = x.len_of(Axis(0));
                let loss =
                    model.backprop(x.view(), y.view(), &self.loss_fn, &mut self.optimizer)?;

                debug!("epoch {epoch} step {}/{}: loss {loss}", step + 1, train.steps());
                total_loss += loss * n as f32;
            }

            let loss = total_loss / train.len() as f32;
            let validation = validation
                .map(|flow| evaluate(model, flow, &self.loss_fn))
                .transpose()?;

            match validation {
                Some(val) => info!(
                    "epoch {epoch}/{epochs} - loss: {loss:.4} - val_loss: {:.4} - val_mse: {:.4}",
                    val.loss, val.mse
                ),
                None => info!("epoch {epoch}/{epochs} - loss: {loss:.4}"),
            }

            history.push(EpochMetrics {
                epoch,
                loss,
                validation,
            });
        }

        Ok(history)
    }

    /// Evaluates `model` on `flow` with this trainer's loss function.
    pub fn evaluate<M: Model>(&self, model: &mut M, flow: &Flow) -> Result<Evaluation> {
        evaluate(model, flow, &self.loss_fn)
    }
}

/// Computes the loss and the mean squared error of `model` over every sample of `flow`.
///
/// # Arguments
/// * `model` - The model to evaluate, in inference mode.
/// * `flow` - The evaluation data.
/// * `loss_fn` - The loss function.
///
/// # Returns
/// The evaluation, or an error if the flow is empty.
pub fn evaluate<M, L>(model: &mut M, flow: &Flow, loss_fn: &L) -> Result<Evaluation>
where
    M: Model,
    L: LossFn,
{
    if flow.is_empty() {
        return Err(MlErr::EmptyDataset);
    }

    let mut total_loss = 0.;
    let mut total_mse = 0.;

    for (x, y) in flow.ordered() {
        let n = x.len_of(Axis(0)) as f32;
        let y_pred = model.predict(x.view())?;

        if y_pred.shape() != y.shape() {
            return Err(MlErr::ShapeMismatch {
                what: "targets",
                got: y.shape().to_vec(),
                expected: y_pred.shape().to_vec(),
            });
        }

        total_loss += loss_fn.loss(y_pred.view(), y.view()) * n;
        total_mse += Mse.loss(y_pred.view(), y.view()) * n;
    }

    let n = flow.len() as f32;
    Ok(Evaluation {
        loss: total_loss / n,
        mse: total_mse / n,
    })
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array4};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::{
            Sequential,
            spec::{ActFnSpec, LayerSpec, ModelSpec, Padding},
        },
        optimization::Adam,
        preprocessing::ImageDataGenerator,
    };

    // Bright images score high, dark images score low.
    fn toy_data() -> (Array4<u8>, Array2<f32>) {
        let n = 24;
        let x = Array4::from_shape_fn((n, 4, 4, 1), |(i, r, c, _)| {
            let base = if i % 2 == 0 { 200 } else { 30 };
            (base + (r * 4 + c + i) % 20) as u8
        });
        let y = Array2::from_shape_fn((n, 1), |(i, _)| if i % 2 == 0 { 0.8 } else { 0.2 });
        (x, y)
    }

    fn toy_model() -> Sequential {
        let spec = ModelSpec::new(
            [4, 4, 1],
            [
                LayerSpec::Conv2d {
                    filters: 3,
                    kernel: (2, 2),
                    padding: Padding::Same,
                    act_fn: None,
                },
                LayerSpec::MaxPool2d { pool: (2, 2) },
                LayerSpec::Flatten,
                LayerSpec::Dense {
                    units: 1,
                    act_fn: Some(ActFnSpec::Sigmoid { amp: 1.0 }),
                    max_norm: Some(3.0),
                },
            ],
        );
        Sequential::from_spec(&spec, 5).unwrap()
    }

    #[test]
    fn fit_reduces_the_loss() {
        let (x, y) = toy_data();
        let generator = ImageDataGenerator::new(1. / 255.);
        let batch_size = NonZeroUsize::new(8).unwrap();
        let train = generator.flow(x.view(), y.view(), batch_size, true).unwrap();
        let val = generator.flow(x.view(), y.view(), batch_size, false).unwrap();

        let mut model = toy_model();
        let optimizer = Adam::new(model.size(), 0.05, 0.9, 0.999, 1e-7);
        let epochs = NonZeroUsize::new(40).unwrap();
        let mut trainer = ModelTrainer::new(optimizer, Mse, epochs, StdRng::seed_from_u64(1));

        let before = trainer.evaluate(&mut model, &val).unwrap();
        let history = trainer.fit(&mut model, &train, Some(&val)).unwrap();
        let after = history.last().unwrap().validation.unwrap();

        assert_eq!(history.len(), 40);
        assert!(after.mse < before.mse / 2., "{} !< {} / 2", after.mse, before.mse);
        assert_eq!(after.loss, after.mse);
    }

    #[test]
    fn empty_flows_are_rejected() {
        let x = Array4::<u8>::zeros((0, 4, 4, 1));
        let y = Array2::<f32>::zeros((0, 1));
        let flow = ImageDataGenerator::new(1.)
            .flow(x.view(), y.view(), NonZeroUsize::new(1).unwrap(), true)
            .unwrap();

        let mut model = toy_model();
        let optimizer = Adam::with_defaults(model.size());
        let epochs = NonZeroUsize::new(1).unwrap();
        let mut trainer = ModelTrainer::new(optimizer, Mse, epochs, StdRng::seed_from_u64(1));

        assert!(matches!(
            trainer.fit(&mut model, &flow, None),
            Err(MlErr::EmptyDataset)
        ));
        assert!(matches!(
            evaluate(&mut model, &flow, &Mse),
            Err(MlErr::EmptyDataset)
        ));
    }
}
