use image::ImageReader;
use ndarray::Array4;
use std::io::Cursor;

pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;
/// NHWC with a batch of one.
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, CHANNELS];

pub type ImageTensor = Array4<f32>;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unable to read image: {0}")]
    Read(#[from] std::io::Error),
    #[error("Image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("Image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Decodes compressed image bytes into the classifier's input tensor.
///
/// Resampling is nearest-neighbour with the legacy (non half-pixel) mapping
/// `src = min(floor(dst * in / out), in - 1)`, the same sampling the model saw
/// during training. Pixel values are kept in `0.0..=255.0`.
pub fn preprocess(bytes: &[u8]) -> Result<ImageTensor, DecodeError> {
    let rgb = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?
        .to_rgb8();

    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::Empty { width, height });
    }

    let columns: Vec<u32> = (0..INPUT_SIZE).map(|x| nearest_source(x, width)).collect();
    let rows: Vec<u32> = (0..INPUT_SIZE).map(|y| nearest_source(y, height)).collect();

    Ok(Array4::from_shape_fn(INPUT_SHAPE, |(_, y, x, c)| {
        f32::from(rgb.get_pixel(columns[x], rows[y])[c])
    }))
}

fn nearest_source(dst: u32, src_len: u32) -> u32 {
    let scaled = u64::from(dst) * u64::from(src_len) / u64::from(INPUT_SIZE);
    (scaled as u32).min(src_len - 1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};

    pub(crate) fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    pub(crate) fn sample_png() -> Vec<u8> {
        let image = RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 8) as u8, (y * 10) as u8, 128]));
        encode(DynamicImage::ImageRgb8(image), ImageFormat::Png)
    }

    #[test]
    fn produces_batched_nhwc_tensor() {
        let tensor = preprocess(&sample_png()).unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        assert!(tensor.iter().all(|v| (0.0..=255.0).contains(v)));
    }

    #[test]
    fn resize_is_nearest_neighbour() {
        let palette = [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0]];
        let image = RgbImage::from_fn(2, 2, |x, y| Rgb(palette[(y * 2 + x) as usize]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);

        let tensor = preprocess(&bytes).unwrap();

        let pixel = |y: usize, x: usize| -> [f32; 3] {
            [tensor[[0, y, x, 0]], tensor[[0, y, x, 1]], tensor[[0, y, x, 2]]]
        };
        assert_eq!(pixel(0, 0), [255.0, 0.0, 0.0]);
        assert_eq!(pixel(0, 223), [0.0, 255.0, 0.0]);
        assert_eq!(pixel(223, 0), [0.0, 0.0, 255.0]);
        assert_eq!(pixel(223, 223), [255.0, 255.0, 0.0]);
        // No interpolated colours anywhere.
        for y in 0..224 {
            for x in 0..224 {
                let p = pixel(y, x);
                assert!(
                    palette.iter().any(|c| c.map(f32::from) == p),
                    "blended pixel at ({y}, {x}): {p:?}"
                );
            }
        }
    }

    #[test]
    fn halving_samples_even_columns_and_rows() {
        let image = RgbImage::from_fn(448, 448, |x, y| {
            Rgb([if x % 2 == 1 { 255 } else { 0 }, if y % 2 == 1 { 255 } else { 0 }, 9])
        });
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);

        let tensor = preprocess(&bytes).unwrap();
        for y in 0..224 {
            for x in 0..224 {
                assert_eq!(tensor[[0, y, x, 0]], 0.0, "odd column sampled at ({y}, {x})");
                assert_eq!(tensor[[0, y, x, 1]], 0.0, "odd row sampled at ({y}, {x})");
                assert_eq!(tensor[[0, y, x, 2]], 9.0);
            }
        }
    }

    #[test]
    fn non_integer_ratio_floors_the_source_index() {
        // Column index is encoded as (x % 256, x / 256) so every source column is distinguishable.
        let image = RgbImage::from_fn(300, 100, |x, y| Rgb([(x % 256) as u8, (x / 256) as u8, y as u8]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);

        let tensor = preprocess(&bytes).unwrap();
        for x in 0..224usize {
            let expected = (x * 300 / 224).min(299);
            let got = tensor[[0, 0, x, 0]] as usize + 256 * tensor[[0, 0, x, 1]] as usize;
            assert_eq!(got, expected, "column {x}");
        }
        for y in 0..224usize {
            let expected = (y * 100 / 224).min(99);
            assert_eq!(tensor[[0, y, 0, 2]] as usize, expected, "row {y}");
        }
        assert_eq!(tensor[[0, 0, 1, 0]], 1.0);
        assert_eq!(tensor[[0, 0, 3, 0]], 4.0);
        assert_eq!(tensor[[0, 0, 223, 0]] as usize + 256 * tensor[[0, 0, 223, 1]] as usize, 298);
    }

    #[test]
    fn source_index_never_leaves_the_image() {
        assert_eq!(nearest_source(0, 1), 0);
        assert_eq!(nearest_source(223, 1), 0);
        assert_eq!(nearest_source(223, 224), 223);
        assert_eq!(nearest_source(223, 225), 224);
    }

    #[test]
    fn grayscale_is_expanded_to_three_channels() {
        let image = GrayImage::from_pixel(10, 10, image::Luma([77]));
        let bytes = encode(DynamicImage::ImageLuma8(image), ImageFormat::Png);

        let tensor = preprocess(&bytes).unwrap();
        assert_eq!(tensor.shape(), &INPUT_SHAPE);
        assert!(tensor.iter().all(|v| *v == 77.0));
    }

    #[test]
    fn jpeg_is_accepted() {
        let image = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg);
        assert!(preprocess(&bytes).is_ok());
    }

    #[test]
    fn truncated_image_fails_to_decode() {
        let bytes = sample_png();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(preprocess(truncated), Err(DecodeError::Image(_))));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(preprocess(b"definitely not an image").is_err());
        assert!(preprocess(&[]).is_err());
    }
}
