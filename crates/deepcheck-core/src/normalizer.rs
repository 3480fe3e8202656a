//! Face normalization: canonical 32×32 resize and max-based intensity scaling.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;

/// Side length of the square face tensor expected by the classifier.
pub const CANONICAL_FACE_SIZE: u32 = 32;

/// Resize a face crop to 32×32 and scale it into [0, 1].
///
/// Pixels are divided by the brightest channel value of the *resized* crop,
/// not by 255. An all-black crop normalizes to all zeros. The result is laid
/// out HWC in B, G, R channel order, the order the classifier was trained on.
pub fn normalize_face(face: &RgbImage) -> Array3<f32> {
    let size = CANONICAL_FACE_SIZE as usize;
    let mut tensor = Array3::<f32>::zeros((size, size, 3));

    if face.width() == 0 || face.height() == 0 {
        return tensor;
    }

    let resized = imageops::resize(
        face,
        CANONICAL_FACE_SIZE,
        CANONICAL_FACE_SIZE,
        FilterType::Triangle,
    );

    let max = resized.as_raw().iter().copied().max().unwrap_or(0);
    if max == 0 {
        return tensor;
    }
    let max = max as f32;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        tensor[[y, x, 0]] = b as f32 / max;
        tensor[[y, x, 1]] = g as f32 / max;
        tensor[[y, x, 2]] = r as f32 / max;
    }

    tensor
}
