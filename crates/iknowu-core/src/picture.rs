//! Picture loading and the training-time augmentation pipeline.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::{Array3, Array4, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Side length every picture is resized to before it reaches the model.
pub const IMAGE_SIZE: u32 = 150;

const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum PictureError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Open and decode an image file.
pub fn open(path: &Path) -> Result<DynamicImage, PictureError> {
    if !path.is_file() {
        return Err(PictureError::FileNotFound(path.to_path_buf()));
    }
    image::open(path).map_err(|e| PictureError::Decode {
        path: path.to_path_buf(),
        source: e,
    })
}

/// A square RGB picture scaled to `[0, 1]`, stored channel-first (CHW).
#[derive(Debug, Clone, PartialEq)]
pub struct Picture {
    pixels: Array3<f32>,
}

impl Picture {
    /// Load a picture from disk and resize it to `size`×`size`.
    pub fn load(path: &Path, size: u32) -> Result<Self, PictureError> {
        let image = open(path)?;
        tracing::trace!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "picture decoded"
        );
        Ok(Self::from_image(&image, size))
    }

    /// Resize an already decoded image.
    pub fn from_image(image: &DynamicImage, size: u32) -> Self {
        let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
        let side = size as usize;
        let pixels = Array3::from_shape_fn((CHANNELS, side, side), |(c, y, x)| {
            rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Self { pixels }
    }

    /// Side length in pixels.
    pub fn size(&self) -> usize {
        self.pixels.shape()[1]
    }

    /// CHW pixel array.
    pub fn pixels(&self) -> &Array3<f32> {
        &self.pixels
    }

    /// Batch-of-one NHWC tensor, the input layout of the exported ONNX model.
    pub fn to_nhwc(&self) -> Array4<f32> {
        let side = self.size();
        let mut tensor = Array4::<f32>::zeros((1, side, side, CHANNELS));
        tensor
            .index_axis_mut(Axis(0), 0)
            .assign(&self.pixels.view().permuted_axes([1, 2, 0]));
        tensor
    }
}

/// Random flips plus a random zoom/shift crop.
pub struct Augmenter {
    rng: StdRng,
    /// Largest fraction cropped away from each side length (zoom + shift range).
    zoom: f32,
    horizontal_flip: bool,
    vertical_flip: bool,
}

impl Augmenter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            zoom: 0.2,
            horizontal_flip: true,
            vertical_flip: true,
        }
    }

    pub fn with_zoom(mut self, zoom: f32) -> Self {
        self.zoom = zoom.clamp(0.0, 0.9);
        self
    }

    pub fn apply(&mut self, image: DynamicImage) -> DynamicImage {
        let (width, height) = image.dimensions();
        let mut out = if self.zoom > 0.0 && width > 1 && height > 1 {
            let keep = 1.0 - self.rng.gen_range(0.0..=self.zoom);
            let crop_w = ((width as f32 * keep).round() as u32).clamp(1, width);
            let crop_h = ((height as f32 * keep).round() as u32).clamp(1, height);
            let x = self.rng.gen_range(0..=width - crop_w);
            let y = self.rng.gen_range(0..=height - crop_h);
            image.crop_imm(x, y, crop_w, crop_h)
        } else {
            image
        };

        if self.horizontal_flip && self.rng.gen_bool(0.5) {
            out = out.fliph();
        }
        if self.vertical_flip && self.rng.gen_bool(0.5) {
            out = out.flipv();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_from_image_shape_and_scale() {
        let picture = Picture::from_image(&solid(40, 30, [255, 0, 51]), 16);
        assert_eq!(picture.pixels().shape(), &[3, 16, 16]);
        assert_eq!(picture.size(), 16);
        assert!((picture.pixels()[[0, 5, 5]] - 1.0).abs() < 1e-6);
        assert_eq!(picture.pixels()[[1, 5, 5]], 0.0);
        assert!((picture.pixels()[[2, 5, 5]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_to_nhwc_layout() {
        let picture = Picture::from_image(&solid(8, 8, [0, 255, 0]), 4);
        let nhwc = picture.to_nhwc();
        assert_eq!(nhwc.shape(), &[1, 4, 4, 3]);
        assert_eq!(nhwc[[0, 2, 3, 1]], 1.0);
        assert_eq!(nhwc[[0, 2, 3, 0]], 0.0);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Picture::load(Path::new("/definitely/not/here.jpg"), IMAGE_SIZE).unwrap_err();
        assert!(matches!(err, PictureError::FileNotFound(_)));
    }

    #[test]
    fn test_load_undecodable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();
        let err = Picture::load(&path, IMAGE_SIZE).unwrap_err();
        assert!(matches!(err, PictureError::Decode { .. }));
    }

    #[test]
    fn test_load_resizes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("face.png");
        solid(300, 200, [10, 20, 30]).save(&path).unwrap();
        let picture = Picture::load(&path, IMAGE_SIZE).unwrap();
        assert_eq!(picture.size(), IMAGE_SIZE as usize);
    }

    #[test]
    fn test_augmenter_is_seeded() {
        let mut gradient = RgbImage::new(20, 20);
        for (x, y, px) in gradient.enumerate_pixels_mut() {
            *px = Rgb([(x * 12) as u8, (y * 12) as u8, 0]);
        }
        let image = DynamicImage::ImageRgb8(gradient);

        let a = Augmenter::new(7).apply(image.clone());
        let b = Augmenter::new(7).apply(image);
        assert_eq!(a.to_rgb8().into_raw(), b.to_rgb8().into_raw());
    }

    #[test]
    fn test_augmenter_crop_bounds() {
        let mut augmenter = Augmenter::new(1).with_zoom(0.5);
        for _ in 0..20 {
            let out = augmenter.apply(solid(10, 10, [1, 2, 3]));
            let (w, h) = out.dimensions();
            assert!((5..=10).contains(&w) && (5..=10).contains(&h));
        }
    }
}
