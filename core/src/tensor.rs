use std::sync::Arc;

use crate::TVec;

/// The numeric carrier for everything crossing the trace: a dynamic-rank
/// `f32` array.
pub type Tensor = ndarray::ArrayD<f32>;

/// A shared tensor value, cheap to clone into boundary captures and trace
/// records.
pub type TValue = Arc<Tensor>;

pub fn tensor0(value: f32) -> Tensor {
    ndarray::arr0(value).into_dyn()
}

pub fn tensor1(values: &[f32]) -> Tensor {
    ndarray::arr1(values).into_dyn()
}

pub fn shape_of(t: &Tensor) -> TVec<usize> {
    t.shape().iter().copied().collect()
}

/// Formats a shape the way model tooling prints them: `1x3x224x224`.
pub fn format_shape(shape: &[usize]) -> String {
    if shape.is_empty() {
        return "scalar".to_string();
    }
    shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("x")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shape_formatting() {
        assert_eq!(format_shape(&[1, 3, 224, 224]), "1x3x224x224");
        assert_eq!(format_shape(&[]), "scalar");
    }
}
