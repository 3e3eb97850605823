use std::path::Path;

use image::imageops::FilterType;
use ndarray::{Array3, Array4, ArrayView3, Axis};

use crate::error::{BeautyError, Result};

/// Decodes an image, converts it to RGB and resizes it to exactly `[height, width, 3]`.
///
/// # Arguments
/// * `path` - The image file.
/// * `shape` - The target `[height, width, channels]`, channels must be 3.
///
/// # Returns
/// The image's pixels in `(height, width, channel)` order.
pub fn load_image(path: &Path, shape: [usize; 3]) -> Result<Array3<u8>> {
    let [h, w, c] = shape;
    if c != 3 {
        return Err(BeautyError::ShapeMismatch {
            expected: vec![h, w, 3],
            got: shape.to_vec(),
        });
    }

    let img = image::open(path).map_err(|source| BeautyError::Image {
        path: path.to_path_buf(),
        source,
    })?;

    let img = if (img.height() as usize, img.width() as usize) == (h, w) {
        img
    } else {
        img.resize_exact(w as u32, h as u32, FilterType::Triangle)
    };

    let pixels = img.to_rgb8().into_raw();
    Ok(Array3::from_shape_vec((h, w, 3), pixels)?)
}

/// Scales a `u8` image into a single sample batch of `f32` values in `[0, 1]`.
pub fn to_input(image: ArrayView3<u8>) -> Array4<f32> {
    image.mapv(|p| p as f32 / 255.).insert_axis(Axis(0))
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use ndarray::s;

    use super::*;

    #[test]
    fn images_are_resized_to_the_input_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        RgbImage::from_pixel(40, 30, Rgb([10, 20, 30])).save(&path).unwrap();

        let image = load_image(&path, [16, 12, 3]).unwrap();
        assert_eq!(image.shape(), [16, 12, 3]);
        assert_eq!(image[[5, 5, 0]], 10);
        assert_eq!(image[[5, 5, 2]], 30);
    }

    #[test]
    fn pixels_keep_their_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        let img = RgbImage::from_fn(4, 3, |x, y| Rgb([x as u8, y as u8, 7]));
        img.save(&path).unwrap();

        let image = load_image(&path, [3, 4, 3]).unwrap();
        assert_eq!(image.slice(s![2, 1, ..]).to_vec(), [1, 2, 7]);
    }

    #[test]
    fn decode_failures_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        match load_image(&path, [8, 8, 3]) {
            Err(BeautyError::Image { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inputs_are_scaled_to_unit_range() {
        let image = Array3::from_shape_fn((2, 2, 3), |(i, _, _)| if i == 0 { 0 } else { 255 });
        let x = to_input(image.view());

        assert_eq!(x.shape(), [1, 2, 2, 3]);
        assert_eq!(x[[0, 0, 1, 2]], 0.);
        assert_eq!(x[[0, 1, 0, 0]], 1.);
    }
}
