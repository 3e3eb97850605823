use std::num::NonZeroUsize;

use machine_learning::{
    MlErr,
    arch::{
        Model, Sequential,
        loss::Mse,
        spec::{ActFnSpec, LayerSpec, ModelSpec, Padding},
    },
    optimization::{Adam, GradientDescent},
    preprocessing::ImageDataGenerator,
    serialization,
    training::ModelTrainer,
};
use ndarray::{Array2, Array4};
use rand::{SeedableRng, rngs::StdRng};

fn and2_spec() -> ModelSpec {
    ModelSpec::new(
        [1, 1, 2],
        [
            LayerSpec::Flatten,
            LayerSpec::Dense {
                units: 3,
                act_fn: Some(ActFnSpec::Sigmoid { amp: 1.0 }),
                max_norm: None,
            },
            LayerSpec::Dense {
                units: 1,
                act_fn: Some(ActFnSpec::Sigmoid { amp: 1.0 }),
                max_norm: None,
            },
        ],
    )
}

fn cnn_spec() -> ModelSpec {
    ModelSpec::new(
        [9, 9, 3],
        [
            LayerSpec::Conv2d {
                filters: 2,
                kernel: (5, 5),
                padding: Padding::Same,
                act_fn: Some(ActFnSpec::Relu),
            },
            LayerSpec::MaxPool2d { pool: (2, 2) },
            LayerSpec::Conv2d {
                filters: 2,
                kernel: (4, 4),
                padding: Padding::Same,
                act_fn: Some(ActFnSpec::Relu),
            },
            LayerSpec::AvgPool2d { pool: (2, 2) },
            LayerSpec::Dropout { rate: 0.2 },
            LayerSpec::Flatten,
            LayerSpec::Dense {
                units: 4,
                act_fn: Some(ActFnSpec::Relu),
                max_norm: Some(3.0),
            },
            LayerSpec::Dense {
                units: 1,
                act_fn: Some(ActFnSpec::Sigmoid { amp: 1.0 }),
                max_norm: None,
            },
        ],
    )
}

fn images(n: usize) -> Array4<f32> {
    Array4::from_shape_fn((n, 9, 9, 3), |(s, i, j, c)| {
        ((s * 31 + i * 7 + j * 3 + c) % 17) as f32 / 16.
    })
}

#[test]
fn and2_gate_converges() {
    let x = Array4::from_shape_vec((4, 1, 1, 2), vec![0., 0., 0., 1., 1., 0., 1., 1.]).unwrap();
    let y = Array2::from_shape_vec((4, 1), vec![0., 0., 0., 1.]).unwrap();

    let mut model = Sequential::from_spec(&and2_spec(), 0).unwrap();
    let mut optimizer = GradientDescent::new(10.);

    for _ in 0..5000 {
        model.backprop(x.view(), y.view(), &Mse, &mut optimizer).unwrap();
    }

    let y_pred = model.predict(x.view()).unwrap();
    for (pred, expected) in y_pred.iter().zip(y.iter()) {
        assert!((pred - expected).abs() < 0.2, "{pred} vs {expected}");
    }
}

#[test]
fn saved_models_predict_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let architecture = dir.path().join("model.json");
    let weights = dir.path().join("model.safetensors");
    let x = images(3);

    let mut model = Sequential::from_spec(&cnn_spec(), 11).unwrap();
    let expected = model.predict(x.view()).unwrap();
    serialization::save_model(&model, &architecture, &weights).unwrap();

    let mut loaded = serialization::load_model(&architecture, &weights, 99).unwrap();
    assert_eq!(loaded.spec(), cnn_spec());
    assert_eq!(loaded.predict(x.view()).unwrap(), expected);
}

#[test]
fn weights_do_not_load_into_another_architecture() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("model.safetensors");

    let model = Sequential::from_spec(&cnn_spec(), 11).unwrap();
    serialization::save_weights(&model, &weights).unwrap();

    let mut other = Sequential::from_spec(&and2_spec(), 11).unwrap();
    assert!(serialization::load_weights(&mut other, &weights).is_err());
}

#[test]
fn fitting_a_cnn_keeps_outputs_bounded() {
    let n = 6;
    let x = images(n).mapv(|p| (p * 255.) as u8);
    let y = Array2::from_shape_fn((n, 1), |(i, _)| (i + 1) as f32 / n as f32);

    let generator = ImageDataGenerator::new(1. / 255.);
    let batch_size = NonZeroUsize::new(4).unwrap();
    let train = generator.flow(x.view(), y.view(), batch_size, true).unwrap();

    let mut model = Sequential::from_spec(&cnn_spec(), 3).unwrap();
    let optimizer = Adam::with_defaults(model.size());
    let epochs = NonZeroUsize::new(3).unwrap();
    let mut trainer = ModelTrainer::new(optimizer, Mse, epochs, StdRng::seed_from_u64(42));

    let history = trainer.fit(&mut model, &train, Some(&train)).unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.epochs().iter().all(|e| e.loss.is_finite()));

    let evaluation = trainer.evaluate(&mut model, &train).unwrap();
    assert!((0.0..=1.0).contains(&evaluation.mse));

    let y_pred = model.predict(x.mapv(|p| p as f32 / 255.).view()).unwrap();
    assert!(y_pred.iter().all(|y| (0.0..=1.0).contains(y)));
}

#[test]
fn empty_architectures_are_invalid() {
    let spec = ModelSpec::new([4, 4, 3], []);
    assert!(matches!(
        Sequential::from_spec(&spec, 0),
        Err(MlErr::InvalidArchitecture(_))
    ));
}
