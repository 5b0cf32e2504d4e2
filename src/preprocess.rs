//! Image preprocessing for classifier inference.
//!
//! Every step here is part of the numeric contract with the training
//! pipeline: resize, view transform, center crop, scale to [0, 1], and
//! per-channel normalization with the ImageNet statistics.

use crate::error::{Result, TriageError};
use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Side length images are resized to before cropping
pub const RESIZE: u32 = 260;
/// Side length of the model input
pub const CROP: u32 = 224;
/// Per-channel mean used for normalization
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation used for normalization
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Deterministic geometric view of the input image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Identity,
    HorizontalMirror,
    VerticalMirror,
}

impl View {
    /// The full ensemble, in evaluation order
    pub const ALL: [View; 3] = [View::Identity, View::HorizontalMirror, View::VerticalMirror];

    pub fn name(self) -> &'static str {
        match self {
            View::Identity => "identity",
            View::HorizontalMirror => "horizontal_mirror",
            View::VerticalMirror => "vertical_mirror",
        }
    }
}

/// Turns encoded image bytes into normalized model input tensors.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    max_image_bytes: usize,
}

impl Preprocessor {
    pub fn new(max_image_bytes: usize) -> Self {
        Self { max_image_bytes }
    }

    /// Decode to RGB and resize to [`RESIZE`] x [`RESIZE`].
    pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage> {
        if bytes.len() > self.max_image_bytes {
            return Err(TriageError::ImageTooLarge {
                size: bytes.len(),
                limit: self.max_image_bytes,
            });
        }

        let image = image::load_from_memory(bytes)?.to_rgb8();
        Ok(imageops::resize(&image, RESIZE, RESIZE, FilterType::Triangle))
    }

    /// Channel-first (3, CROP, CROP) tensor for one view of a resized image.
    pub fn view_tensor(&self, resized: &RgbImage, view: View, device: &Device) -> Result<Tensor> {
        let oriented = match view {
            View::Identity => resized.clone(),
            View::HorizontalMirror => imageops::flip_horizontal(resized),
            View::VerticalMirror => imageops::flip_vertical(resized),
        };

        let (width, height) = oriented.dimensions();
        let left = (width.saturating_sub(CROP)) / 2;
        let top = (height.saturating_sub(CROP)) / 2;
        let cropped = imageops::crop_imm(&oriented, left, top, CROP, CROP).to_image();

        let side = CROP as usize;
        let plane = side * side;
        let mut data = vec![0f32; 3 * plane];
        for (x, y, pixel) in cropped.enumerate_pixels() {
            let offset = y as usize * side + x as usize;
            for channel in 0..3 {
                let value = f32::from(pixel[channel]) / 255.0;
                data[channel * plane + offset] = (value - MEAN[channel]) / STD[channel];
            }
        }

        Ok(Tensor::from_vec(data, (3, side, side), device)?)
    }

    /// Stack the requested views into a (views, 3, CROP, CROP) batch.
    pub fn batch(&self, bytes: &[u8], views: &[View], device: &Device) -> Result<Tensor> {
        let resized = self.decode(bytes)?;
        let tensors = views
            .iter()
            .map(|&view| self.view_tensor(&resized, view, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::stack(&tensors, 0)?)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(10 * 1024 * 1024)
    }
}
