use super::InferenceError;
use crate::config::preprocessing::ImageSpec;
use image::RgbImage;
use image::imageops;
use ndarray::Array3;
use tch::{Device, Tensor};

/// Resizes and normalizes an RGB bitmap into a CHW float array.
pub fn to_chw(image: &RgbImage, spec: &ImageSpec) -> Result<Array3<f32>, InferenceError> {
    let filter = spec
        .filter()
        .map_err(|e| InferenceError::Preprocessing(e.to_string()))?;
    let (height, width) = (spec.height(), spec.width());
    let resized = imageops::resize(image, width, height, filter);

    Ok(Array3::from_shape_fn(
        (3, height as usize, width as usize),
        |(c, y, x)| {
            let value = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - spec.mean[c]) / spec.std[c]
        },
    ))
}

/// Batched `[1, 3, H, W]` tensor on `device`.
pub fn to_tensor(pixels: &Array3<f32>, device: Device) -> Result<Tensor, InferenceError> {
    let (channels, height, width) = pixels.dim();
    let data = pixels
        .as_slice()
        .ok_or_else(|| InferenceError::Preprocessing("pixel buffer is not contiguous".into()))?;
    Ok(Tensor::from_slice(data)
        .view([1, channels as i64, height as i64, width as i64])
        .to_device(device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn spec(height: u32, width: u32) -> ImageSpec {
        ImageSpec {
            size: vec![height, width],
            resize_method: "bilinear".into(),
            mean: vec![0.5, 0.5, 0.5],
            std: vec![0.5, 0.25, 0.5],
        }
    }

    #[test]
    fn output_is_channel_first_at_target_size() {
        let image = RgbImage::from_pixel(100, 50, Rgb([255, 0, 0]));
        let pixels = to_chw(&image, &spec(32, 24)).unwrap();
        assert_eq!(pixels.dim(), (3, 32, 24));
    }

    #[test]
    fn channels_are_normalized_independently() {
        let image = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
        let pixels = to_chw(&image, &spec(4, 4)).unwrap();
        assert!((pixels[[0, 2, 2]] - 1.0).abs() < 1e-5);
        assert!((pixels[[1, 2, 2]] + 2.0).abs() < 1e-5);
        assert!((pixels[[2, 2, 2]] + 1.0).abs() < 1e-5);
    }
}
