//! Raw input coercion shared by all families: decode, resize, normalize,
//! and keep enough metadata to map predictions back to the original image.

use ndarray::{Array3, Array4};

use modelport_core::internal::*;

/// Decodes a raw input into H x W x C pixels.
///
/// An unreadable or undecodable path is an [`ExportError::Input`]: the
/// caller gets no partial structure.
pub fn load_pixels(raw: &RawInput) -> PortResult<Array3<f32>> {
    match raw {
        RawInput::Pixels(pixels) => {
            let (h, w, c) = pixels.dim();
            if h == 0 || w == 0 || c != 3 {
                return Err(ExportError::Input(format!(
                    "expected non-empty HxWx3 pixels, got {h}x{w}x{c}"
                ))
                .into());
            }
            Ok(pixels.clone())
        }
        RawInput::Path(path) => {
            let decoded = image::open(path).map_err(|e| {
                ExportError::Input(format!("cannot read image {}: {e}", path.display()))
            })?;
            let rgb = decoded.to_rgb8();
            let (w, h) = (rgb.width() as usize, rgb.height() as usize);
            let mut pixels = Array3::zeros((h, w, 3));
            for (x, y, pixel) in rgb.enumerate_pixels() {
                for c in 0..3 {
                    pixels[(y as usize, x as usize, c)] = pixel.0[c] as f32;
                }
            }
            Ok(pixels)
        }
    }
}

/// Nearest-neighbour resize to (height, width).
pub fn resize(pixels: &Array3<f32>, height: usize, width: usize) -> Array3<f32> {
    let (h, w, c) = pixels.dim();
    Array3::from_shape_fn((height, width, c), |(y, x, ch)| {
        let sy = (y * h / height).min(h - 1);
        let sx = (x * w / width).min(w - 1);
        pixels[(sy, sx, ch)]
    })
}

/// Normalizes and transposes H x W x C pixels into an N=1 NCHW tensor.
pub fn to_nchw(pixels: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Tensor {
    let (h, w, _) = pixels.dim();
    Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
        (pixels[(y, x, c)] - mean[c]) / std[c]
    })
    .into_dyn()
}

/// The common coercion path: decode, resize to `target` (height, width),
/// normalize, and describe what happened in an [`InputMeta`].
pub fn build_image_input(
    raw: &RawInput,
    target: [usize; 2],
    mean: &[f32; 3],
    std: &[f32; 3],
) -> PortResult<(StructuredInput, TValue)> {
    let pixels = load_pixels(raw)?;
    let (oh, ow, _) = pixels.dim();
    let [th, tw] = target;
    ensure!(th > 0 && tw > 0, "degenerate target shape {th}x{tw}");
    let resized = resize(&pixels, th, tw);
    let tensor: TValue = Arc::new(to_nchw(&resized, mean, std));
    let meta = InputMeta {
        original_size: [oh, ow],
        resized_size: [th, tw],
        scale: [ow as f32 / tw as f32, oh as f32 / th as f32],
        normalized: true,
    };
    let mut tensors = std::collections::BTreeMap::new();
    tensors.insert("input".to_string(), tensor.clone());
    Ok((StructuredInput { tensors, meta }, tensor))
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn unreadable_path_is_an_input_error() {
        let raw = RawInput::Path("/nonexistent/image.png".into());
        let err = load_pixels(&raw).unwrap_err();
        assert!(matches!(err.downcast_ref::<ExportError>(), Some(ExportError::Input(_))));
    }

    #[test]
    fn garbage_pixels_are_an_input_error() {
        let raw = RawInput::Pixels(Array3::zeros((0, 4, 3)));
        let err = load_pixels(&raw).unwrap_err();
        assert!(matches!(err.downcast_ref::<ExportError>(), Some(ExportError::Input(_))));
    }

    #[test]
    fn coercion_records_sizes_and_scales() {
        let raw = RawInput::Pixels(Array3::from_elem((100, 200, 3), 128.0));
        let (structured, primary) =
            build_image_input(&raw, [50, 50], &[128.0; 3], &[1.0; 3]).unwrap();
        assert_eq!(primary.shape(), [1, 3, 50, 50]);
        assert_eq!(structured.meta.original_size, [100, 200]);
        assert_eq!(structured.meta.resized_size, [50, 50]);
        assert_eq!(structured.meta.scale, [4.0, 2.0]);
        assert_eq!(primary[[0, 0, 0, 0]], 0.0);
        assert!(structured.tensor("input").is_ok());
        assert!(structured.tensor("mask").is_err());
    }
}
