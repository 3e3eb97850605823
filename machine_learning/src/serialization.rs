use std::{fs, ops::Range, path::Path};

use log::info;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{
    MlErr, Result,
    arch::{Sequential, spec::ModelSpec},
};

/// Writes every parameter of `model` as a safetensors file, one `F32` tensor per layer parameter
/// named `"{layer}.{param}"`.
///
/// # Arguments
/// * `model` - The model whose parameters are saved.
/// * `path` - The file to write, its parent directory is created if missing.
pub fn save_weights<P: AsRef<Path>>(model: &Sequential, path: P) -> Result<()> {
    let params = model.params();
    let tensors = tensor_layout(model);

    let bytes: Vec<_> = tensors
        .iter()
        .map(|(_, _, range)| bytemuck::cast_slice::<f32, u8>(&params[range.clone()]))
        .collect();

    let views = tensors
        .iter()
        .zip(&bytes)
        .map(|((name, shape, _), bytes)| {
            let view = TensorView::new(Dtype::F32, shape.clone(), bytes)?;
            Ok::<_, MlErr>((name.clone(), view))
        })
        .collect::<Result<Vec<_>>>()?;

    let named = views.iter().map(|(name, view)| (name.as_str(), view));
    let serialized = safetensors::serialize(named, &None)?;
    write_file(path.as_ref(), &serialized)?;

    info!(
        "saved {} parameters to {}",
        params.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Reads a safetensors file written by `save_weights` into `model`.
///
/// Every tensor `model` expects has to be present with an `F32` dtype and the exact shape of the
/// parameter it's loaded into, otherwise the model is left untouched.
pub fn load_weights<P: AsRef<Path>>(model: &mut Sequential, path: P) -> Result<()> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| MlErr::io(path, e))?;
    let file = SafeTensors::deserialize(&bytes)?;

    let mut params = vec![0.; model.params().len()];

    for (name, shape, range) in tensor_layout(model) {
        let tensor = file.tensor(&name)?;

        if tensor.dtype() != Dtype::F32 {
            return Err(MlErr::InvalidTensor {
                name,
                reason: format!("expected F32 values, got {:?}", tensor.dtype()),
            });
        }

        if tensor.shape() != shape {
            return Err(MlErr::InvalidTensor {
                name,
                reason: format!("expected shape {shape:?}, got {:?}", tensor.shape()),
            });
        }

        let values = tensor.data().chunks_exact(size_of::<f32>());
        for (param, chunk) in params[range].iter_mut().zip(values) {
            *param = bytemuck::pod_read_unaligned(chunk);
        }
    }

    let expected = model.layers().iter().map(|l| l.param_shapes().len()).sum::<usize>();
    let got = file.names().len();
    if got != expected {
        return Err(MlErr::SizeMismatch {
            what: "weight tensors",
            got,
            expected,
        });
    }

    model.set_params(&params)?;
    info!("loaded {} parameters from {}", params.len(), path.display());
    Ok(())
}

/// Writes an architecture as pretty printed json.
pub fn save_architecture<P: AsRef<Path>>(spec: &ModelSpec, path: P) -> Result<()> {
    let json = serde_json::to_vec_pretty(spec)?;
    write_file(path.as_ref(), &json)
}

pub fn load_architecture<P: AsRef<Path>>(path: P) -> Result<ModelSpec> {
    let path = path.as_ref();
    let json = fs::read(path).map_err(|e| MlErr::io(path, e))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Saves both the architecture and the parameters of a model.
pub fn save_model<P, Q>(model: &Sequential, architecture_path: P, weights_path: Q) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    save_architecture(&model.spec(), architecture_path)?;
    save_weights(model, weights_path)
}

/// Rebuilds a model from its architecture file and loads its parameters.
///
/// # Arguments
/// * `architecture_path` - A file written by `save_architecture`.
/// * `weights_path` - A file written by `save_weights`.
/// * `seed` - The seed for the model's dropout masks.
pub fn load_model<P, Q>(architecture_path: P, weights_path: Q, seed: u64) -> Result<Sequential>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let spec = load_architecture(architecture_path)?;
    let mut model = Sequential::from_spec(&spec, seed)?;
    load_weights(&mut model, weights_path)?;
    Ok(model)
}

/// The name, shape and position in the parameter buffer of every tensor of `model`.
fn tensor_layout(model: &Sequential) -> Vec<(String, Vec<usize>, Range<usize>)> {
    let mut offset = 0;
    let mut tensors = Vec::new();

    for (i, layer) in model.layers().iter().enumerate() {
        for (param, shape) in layer.param_shapes() {
            let len: usize = shape.iter().product();
            tensors.push((format!("{i}.{param}"), shape, offset..offset + len));
            offset += len;
        }
    }

    tensors
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| MlErr::io(dir, e))?;
    }

    fs::write(path, bytes).map_err(|e| MlErr::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::spec::{ActFnSpec, LayerSpec};

    fn dense_spec(units: usize) -> ModelSpec {
        ModelSpec::new(
            [1, 2, 1],
            [
                LayerSpec::Flatten,
                LayerSpec::Dense {
                    units,
                    act_fn: Some(ActFnSpec::Relu),
                    max_norm: None,
                },
            ],
        )
    }

    #[test]
    fn tensors_are_named_after_their_layer() {
        let model = Sequential::from_spec(&dense_spec(3), 0).unwrap();
        let layout = tensor_layout(&model);

        assert_eq!(layout[0].0, "1.kernel");
        assert_eq!(layout[0].1, [2, 3]);
        assert_eq!(layout[0].2, 0..6);
        assert_eq!(layout[1].0, "1.bias");
        assert_eq!(layout[1].2, 6..9);
    }

    #[test]
    fn weights_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("weights.safetensors");

        let model = Sequential::from_spec(&dense_spec(3), 1).unwrap();
        save_weights(&model, &path).unwrap();

        let mut other = Sequential::from_spec(&dense_spec(3), 2).unwrap();
        assert_ne!(other.params(), model.params());
        load_weights(&mut other, &path).unwrap();
        assert_eq!(other.params(), model.params());
    }

    #[test]
    fn mismatching_architectures_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let model = Sequential::from_spec(&dense_spec(3), 1).unwrap();
        save_weights(&model, &path).unwrap();

        let mut other = Sequential::from_spec(&dense_spec(4), 1).unwrap();
        let before = other.params().to_vec();
        assert!(matches!(
            load_weights(&mut other, &path),
            Err(MlErr::InvalidTensor { .. })
        ));
        assert_eq!(other.params(), before);
    }

    #[test]
    fn missing_files_fail_fast() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            load_architecture(dir.path().join("missing.json")),
            Err(MlErr::Io { .. })
        ));
        assert!(matches!(
            load_model(
                dir.path().join("missing.json"),
                dir.path().join("missing.safetensors"),
                0
            ),
            Err(MlErr::Io { .. })
        ));
    }

    #[test]
    fn malformed_architectures_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, "{ \"input_shape\": [1, 2] }").unwrap();

        assert!(matches!(load_architecture(&path), Err(MlErr::Json(_))));
    }
}
