//! EfficientNet classifier with a three-way risk head.
//!
//! Parameter names follow torchvision's `efficientnet_b*` layout
//! (`features.{stage}.{block}.block.{layer}...`, `classifier.1.*`) so
//! checkpoints exported from the training pipeline bind without renaming.
//! The network always runs in inference mode: batch norm uses its running
//! statistics, dropout and stochastic depth are identities.

use crate::types::NUM_CLASSES;
use candle_core::{DType, Device, Module, ModuleT, Result, Tensor, D};
use candle_nn::{
    batch_norm, conv2d, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Linear,
    VarBuilder, VarMap,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Baseline (B0) stages: expand ratio, kernel, stride, input channels, output channels, layers
const BASELINE_STAGES: [(usize, usize, usize, usize, usize, usize); 7] = [
    (1, 3, 1, 32, 16, 1),
    (6, 3, 2, 16, 24, 2),
    (6, 5, 2, 24, 40, 2),
    (6, 3, 2, 40, 80, 3),
    (6, 5, 1, 80, 112, 3),
    (6, 5, 2, 112, 192, 4),
    (6, 3, 1, 192, 320, 1),
];

const CHANNEL_DIVISOR: usize = 8;
const BATCH_NORM_EPS: f64 = 1e-5;

/// Backbone size selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackboneVariant {
    EfficientnetB0,
    EfficientnetB1,
    #[default]
    EfficientnetB2,
    EfficientnetB3,
    /// Arbitrary compound scaling of the baseline
    Scaled { width_mult: f64, depth_mult: f64 },
}

impl BackboneVariant {
    pub fn config(self) -> EfficientNetConfig {
        match self {
            BackboneVariant::EfficientnetB0 => EfficientNetConfig::new(1.0, 1.0),
            BackboneVariant::EfficientnetB1 => EfficientNetConfig::new(1.0, 1.1),
            BackboneVariant::EfficientnetB2 => EfficientNetConfig::new(1.1, 1.2),
            BackboneVariant::EfficientnetB3 => EfficientNetConfig::new(1.2, 1.4),
            BackboneVariant::Scaled {
                width_mult,
                depth_mult,
            } => EfficientNetConfig::new(width_mult, depth_mult),
        }
    }
}

/// Round a channel count to the nearest multiple of the divisor, never
/// dropping more than 10% below the requested value.
fn make_divisible(value: f64, divisor: usize) -> usize {
    let step = divisor as f64;
    let rounded = (((value + step / 2.0) / step).floor() as usize * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value {
        rounded + divisor
    } else {
        rounded
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BlockConfig {
    expand_ratio: usize,
    kernel: usize,
    stride: usize,
    input_channels: usize,
    output_channels: usize,
}

/// Compound scaling of the EfficientNet baseline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfficientNetConfig {
    pub width_mult: f64,
    pub depth_mult: f64,
}

impl EfficientNetConfig {
    pub fn new(width_mult: f64, depth_mult: f64) -> Self {
        Self {
            width_mult,
            depth_mult,
        }
    }

    fn channels(&self, channels: usize) -> usize {
        make_divisible(channels as f64 * self.width_mult, CHANNEL_DIVISOR)
    }

    fn depth(&self, layers: usize) -> usize {
        (layers as f64 * self.depth_mult).ceil() as usize
    }

    fn stages(&self) -> Vec<Vec<BlockConfig>> {
        BASELINE_STAGES
            .iter()
            .map(|&(expand_ratio, kernel, stride, input, output, layers)| {
                let input_channels = self.channels(input);
                let output_channels = self.channels(output);
                (0..self.depth(layers))
                    .map(|layer| BlockConfig {
                        expand_ratio,
                        kernel,
                        stride: if layer == 0 { stride } else { 1 },
                        input_channels: if layer == 0 { input_channels } else { output_channels },
                        output_channels,
                    })
                    .collect()
            })
            .collect()
    }

    fn stem_channels(&self) -> usize {
        self.channels(BASELINE_STAGES[0].3)
    }

    fn last_stage_channels(&self) -> usize {
        self.channels(BASELINE_STAGES[BASELINE_STAGES.len() - 1].4)
    }

    /// Width of the pooled embedding fed to the linear head
    pub fn output_width(&self) -> usize {
        4 * self.last_stage_channels()
    }

    /// Number of inverted-residual blocks
    pub fn block_count(&self) -> usize {
        self.stages().iter().map(Vec::len).sum()
    }
}

/// Conv, batch norm and an optional SiLU
#[derive(Debug, Clone)]
struct ConvNormActivation {
    conv: Conv2d,
    norm: BatchNorm,
    activation: bool,
}

impl ConvNormActivation {
    #[allow(clippy::too_many_arguments)]
    fn new(
        input_channels: usize,
        output_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        activation: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let config = Conv2dConfig {
            padding: (kernel - 1) / 2,
            stride,
            groups,
            ..Default::default()
        };
        let conv = conv2d_no_bias(input_channels, output_channels, kernel, config, vb.pp("0"))?;
        let norm = batch_norm(output_channels, BATCH_NORM_EPS, vb.pp("1"))?;
        Ok(Self {
            conv,
            norm,
            activation,
        })
    }
}

impl Module for ConvNormActivation {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.norm.forward_t(&self.conv.forward(xs)?, false)?;
        if self.activation {
            xs.silu()
        } else {
            Ok(xs)
        }
    }
}

#[derive(Debug, Clone)]
struct SqueezeExcitation {
    fc1: Conv2d,
    fc2: Conv2d,
}

impl SqueezeExcitation {
    fn new(channels: usize, squeeze_channels: usize, vb: VarBuilder) -> Result<Self> {
        let fc1 = conv2d(channels, squeeze_channels, 1, Default::default(), vb.pp("fc1"))?;
        let fc2 = conv2d(squeeze_channels, channels, 1, Default::default(), vb.pp("fc2"))?;
        Ok(Self { fc1, fc2 })
    }
}

impl Module for SqueezeExcitation {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let scale = xs.mean_keepdim(D::Minus1)?.mean_keepdim(D::Minus2)?;
        let scale = self.fc1.forward(&scale)?.silu()?;
        let scale = candle_nn::ops::sigmoid(&self.fc2.forward(&scale)?)?;
        xs.broadcast_mul(&scale)
    }
}

/// Inverted residual block
#[derive(Debug, Clone)]
struct MbConv {
    expand: Option<ConvNormActivation>,
    depthwise: ConvNormActivation,
    squeeze: SqueezeExcitation,
    project: ConvNormActivation,
    residual: bool,
}

impl MbConv {
    fn new(config: BlockConfig, vb: VarBuilder) -> Result<Self> {
        let block = vb.pp("block");
        let expanded = make_divisible(
            (config.input_channels * config.expand_ratio) as f64,
            CHANNEL_DIVISOR,
        );

        let mut layer = 0;
        let expand = if expanded != config.input_channels {
            let expand = ConvNormActivation::new(
                config.input_channels,
                expanded,
                1,
                1,
                1,
                true,
                block.pp(layer),
            )?;
            layer += 1;
            Some(expand)
        } else {
            None
        };

        let depthwise = ConvNormActivation::new(
            expanded,
            expanded,
            config.kernel,
            config.stride,
            expanded,
            true,
            block.pp(layer),
        )?;
        let squeeze = SqueezeExcitation::new(
            expanded,
            (config.input_channels / 4).max(1),
            block.pp(layer + 1),
        )?;
        let project = ConvNormActivation::new(
            expanded,
            config.output_channels,
            1,
            1,
            1,
            false,
            block.pp(layer + 2),
        )?;

        Ok(Self {
            expand,
            depthwise,
            squeeze,
            project,
            residual: config.stride == 1 && config.input_channels == config.output_channels,
        })
    }
}

impl Module for MbConv {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut ys = match &self.expand {
            Some(expand) => expand.forward(xs)?,
            None => xs.clone(),
        };
        ys = self.depthwise.forward(&ys)?;
        ys = self.squeeze.forward(&ys)?;
        ys = self.project.forward(&ys)?;
        if self.residual {
            ys + xs
        } else {
            Ok(ys)
        }
    }
}

/// Convolutional trunk producing a pooled embedding per image
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    stem: ConvNormActivation,
    blocks: Vec<MbConv>,
    head: ConvNormActivation,
    output_width: usize,
}

impl FeatureExtractor {
    pub fn new(config: &EfficientNetConfig, vb: VarBuilder) -> Result<Self> {
        let features = vb.pp("features");
        let stages = config.stages();

        let stem = ConvNormActivation::new(3, config.stem_channels(), 3, 2, 1, true, features.pp(0))?;

        let mut blocks = Vec::with_capacity(config.block_count());
        for (stage_index, stage) in stages.iter().enumerate() {
            let stage_vb = features.pp(stage_index + 1);
            for (block_index, block) in stage.iter().enumerate() {
                blocks.push(MbConv::new(*block, stage_vb.pp(block_index))?);
            }
        }

        let output_width = config.output_width();
        let head = ConvNormActivation::new(
            config.last_stage_channels(),
            output_width,
            1,
            1,
            1,
            true,
            features.pp(stages.len() + 1),
        )?;

        Ok(Self {
            stem,
            blocks,
            head,
            output_width,
        })
    }

    /// Declared embedding width
    pub fn output_width(&self) -> usize {
        self.output_width
    }
}

impl Module for FeatureExtractor {
    /// (N, 3, H, W) images to (N, output_width) embeddings
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = self.stem.forward(xs)?;
        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }
        self.head.forward(&xs)?.mean((2, 3))
    }
}

/// Feature extractor followed by a linear projection to the risk logits
#[derive(Debug, Clone)]
pub struct Classifier {
    features: FeatureExtractor,
    head: Linear,
}

impl Classifier {
    pub fn new(config: &EfficientNetConfig, vb: VarBuilder) -> Result<Self> {
        let features = FeatureExtractor::new(config, vb.clone())?;
        let head = linear(
            features.output_width(),
            NUM_CLASSES,
            vb.pp("classifier").pp(1),
        )?;
        Ok(Self { features, head })
    }

    /// Names and shapes of every parameter the topology binds
    pub fn schema(config: &EfficientNetConfig, device: &Device) -> Result<ParameterSchema> {
        let varmap = VarMap::new();
        Self::new(config, VarBuilder::from_varmap(&varmap, DType::F32, device))?;

        let vars = varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("parameter registry poisoned: {e}")))?;
        Ok(vars
            .iter()
            .map(|(name, var)| (name.clone(), var.dims().to_vec()))
            .collect())
    }

    pub fn output_width(&self) -> usize {
        self.features.output_width()
    }
}

impl Module for Classifier {
    /// (N, 3, 224, 224) normalized images to (N, 3) raw logits
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let embedding = self.features.forward(xs)?;
        self.head.forward(&embedding)
    }
}

/// Parameter names and shapes declared by a topology
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    shapes: BTreeMap<String, Vec<usize>>,
}

impl ParameterSchema {
    pub fn shape(&self, name: &str) -> Option<&[usize]> {
        self.shapes.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shapes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.shapes
            .iter()
            .map(|(name, shape)| (name.as_str(), shape.as_slice()))
    }
}

impl FromIterator<(String, Vec<usize>)> for ParameterSchema {
    fn from_iter<I: IntoIterator<Item = (String, Vec<usize>)>>(iter: I) -> Self {
        Self {
            shapes: iter.into_iter().collect(),
        }
    }
}

/// Deterministic initial values for every schema parameter.
///
/// Convolutions get Kaiming-uniform (fan-out) weights, the linear head
/// uniform weights in ±1/sqrt(out_features), batch-norm scales and running
/// variances are ones, biases and running means are zeros. Parameters are
/// visited in name order so a seed always yields the same values.
pub fn default_parameters(
    schema: &ParameterSchema,
    seed: u64,
    device: &Device,
) -> Result<HashMap<String, Tensor>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut parameters = HashMap::with_capacity(schema.len());

    for (name, shape) in schema.iter() {
        let count: usize = shape.iter().product();
        let leaf = name.rsplit('.').next().unwrap_or(name);

        let values = match (leaf, shape.len()) {
            ("running_var", _) | ("weight", 1) => vec![1f32; count],
            ("weight", 4) => {
                let fan_out = shape[0] * shape[2] * shape[3];
                uniform(&mut rng, count, (6.0 / fan_out as f32).sqrt())
            }
            ("weight", 2) => uniform(&mut rng, count, 1.0 / (shape[0] as f32).sqrt()),
            _ => vec![0f32; count],
        };

        parameters.insert(name.to_string(), Tensor::from_vec(values, shape, device)?);
    }

    Ok(parameters)
}

fn uniform(rng: &mut StdRng, count: usize, bound: f32) -> Vec<f32> {
    (0..count).map(|_| rng.gen_range(-bound..bound)).collect()
}
