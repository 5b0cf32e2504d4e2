//! Fixtures shared by unit tests

use crate::models::cache::EngineSettings;
use crate::models::topology::{BackboneVariant, Classifier};
use crate::types::{ProbabilityVector, NUM_CLASSES};
use candle_core::{Device, Tensor};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Scaled-down EfficientNet that keeps the real layout but runs fast on CPU
pub fn tiny_backbone() -> BackboneVariant {
    BackboneVariant::Scaled {
        width_mult: 0.25,
        depth_mult: 0.25,
    }
}

pub fn tiny_settings() -> EngineSettings {
    EngineSettings {
        backbone: tiny_backbone(),
        ..EngineSettings::default()
    }
}

/// Smooth color gradient, asymmetric in both axes
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + 2 * y) % 256) as u8,
        ])
    })
}

pub fn encode_png(image: impl Into<DynamicImage>) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .into()
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

/// Write `entries` as a safetensors file inside `dir`
pub fn write_safetensors(dir: &Path, name: &str, entries: Vec<(String, Tensor)>) -> PathBuf {
    let path = dir.join(name);
    let tensors: HashMap<String, Tensor> = entries.into_iter().collect();
    candle_core::safetensors::save(&tensors, &path).unwrap();
    path
}

/// Head parameters that make the classifier output exactly `probabilities`
/// for any input: zero weights and log-probability biases.
pub fn head_for(probabilities: ProbabilityVector) -> Vec<(String, Tensor)> {
    let width = tiny_backbone().config().output_width();
    let weight = Tensor::zeros((NUM_CLASSES, width), candle_core::DType::F32, &Device::Cpu).unwrap();
    let bias: Vec<f32> = probabilities
        .as_array()
        .iter()
        .map(|p| p.ln() as f32)
        .collect();
    vec![
        ("classifier.1.weight".to_string(), weight),
        (
            "classifier.1.bias".to_string(),
            Tensor::new(bias.as_slice(), &Device::Cpu).unwrap(),
        ),
    ]
}

/// Tiny-backbone checkpoint whose head yields `probabilities`, with every
/// name prefixed by `prefix`
pub fn checkpoint_for(
    dir: &Path,
    name: &str,
    prefix: &str,
    probabilities: ProbabilityVector,
) -> PathBuf {
    let entries = head_for(probabilities)
        .into_iter()
        .map(|(key, tensor)| (format!("{prefix}{key}"), tensor))
        .collect();
    write_safetensors(dir, name, entries)
}

/// Every tiny-backbone parameter schema entry, for sanity checks in tests
pub fn tiny_schema_len() -> usize {
    Classifier::schema(&tiny_backbone().config(), &Device::Cpu)
        .unwrap()
        .len()
}
