//! Image decoding, face cropping and embedder input tensors.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Per-channel pixel scaling applied before the embedding network.
///
/// Must match the normalization the network was trained with; a mismatch
/// does not fail, it only makes distances meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PixelNormalization {
    /// `p / 255`, values in [0, 1].
    #[default]
    UnitScale,
    /// `(p - 127.5) / 128`, the FaceNet convention.
    Facenet,
    /// `(p - 127.5) / 127.5`, values in [-1, 1].
    Symmetric,
    /// Pixel values passed through unchanged.
    Raw,
}

impl PixelNormalization {
    pub fn apply(&self, pixel: u8) -> f32 {
        let p = pixel as f32;
        match self {
            PixelNormalization::UnitScale => p / 255.0,
            PixelNormalization::Facenet => (p - 127.5) / 128.0,
            PixelNormalization::Symmetric => (p - 127.5) / 127.5,
            PixelNormalization::Raw => p,
        }
    }
}

/// Decode encoded image bytes (PNG, JPEG, ...) into an RGB buffer.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Crop `face` out of `image` and resize it to `width` × `height`.
pub fn crop_face(image: &RgbImage, face: &BoundingBox, width: u32, height: u32) -> RgbImage {
    let crop = imageops::crop_imm(image, face.x, face.y, face.width, face.height).to_image();
    if crop.width() == width && crop.height() == height {
        return crop;
    }
    imageops::resize(&crop, width, height, FilterType::Triangle)
}

/// Convert an RGB image into a `[1, H, W, 3]` float tensor.
pub fn to_nhwc_tensor(image: &RgbImage, normalization: PixelNormalization) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, h, w, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, y, x, c]] = normalization.apply(pixel[c]);
        }
    }

    tensor
}

/// Crop, resize and normalize one face into the embedder's input tensor.
pub fn face_tensor(
    image: &RgbImage,
    face: &BoundingBox,
    input_width: u32,
    input_height: u32,
    normalization: PixelNormalization,
) -> Array4<f32> {
    let crop = crop_face(image, face, input_width, input_height);
    to_nhwc_tensor(&crop, normalization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    #[test]
    fn test_normalization_constants() {
        assert_eq!(PixelNormalization::UnitScale.apply(255), 1.0);
        assert_eq!(PixelNormalization::UnitScale.apply(0), 0.0);
        assert!((PixelNormalization::Facenet.apply(255) - 127.5 / 128.0).abs() < 1e-6);
        assert_eq!(PixelNormalization::Symmetric.apply(0), -1.0);
        assert_eq!(PixelNormalization::Raw.apply(42), 42.0);
    }

    #[test]
    fn test_face_tensor_shape_and_values() {
        let image = RgbImage::from_pixel(64, 48, Rgb([255, 0, 51]));
        let face = BoundingBox::new(10, 5, 30, 30);
        let tensor = face_tensor(&image, &face, 160, 160, PixelNormalization::UnitScale);
        assert_eq!(tensor.shape(), &[1, 160, 160, 3]);
        assert!((tensor[[0, 80, 80, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 80, 80, 1]].abs() < 1e-6);
        assert!((tensor[[0, 0, 159, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_crop_takes_the_box_region() {
        let mut image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        for y in 10..20 {
            for x in 10..20 {
                image.put_pixel(x, y, Rgb([200, 200, 200]));
            }
        }
        let crop = crop_face(&image, &BoundingBox::new(10, 10, 10, 10), 10, 10);
        assert!(crop.pixels().all(|p| p.0 == [200, 200, 200]));
    }

    #[test]
    fn test_decode_rgb_roundtrip_dimensions() {
        let image = RgbImage::from_pixel(7, 3, Rgb([1, 2, 3]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_rgb(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (7, 3));
        assert_eq!(decoded.get_pixel(0, 0).0, [1, 2, 3]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_rgb(b"not an image").is_err());
    }
}
