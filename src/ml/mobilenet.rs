//! MobileNetV3 バックボーン（Large / Small）
//!
//! 特徴抽出部と分類層直前の全結合層までを持ちます。
//! 最終分類層は `SpeciesClassifier` 側で差し替えます。
//!
//! # アーキテクチャ
//! - Stem: Conv 3x3 stride 2 (3 -> 16) + BN + hardswish
//! - 反転残差ブロック x N（展開 1x1 -> depthwise -> SE(任意) -> 射影 1x1）
//! - Conv 1x1 (-> 960 / 576) + BN + hardswish
//! - Global Average Pooling
//! - FC (-> 1280 / 1024) + hardswish + Dropout

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

use crate::model::BackboneVariant;

const BN_EPSILON: f64 = 1e-3;
const BN_MOMENTUM: f64 = 0.01;
const STEM_CHANNELS: usize = 16;

/// hardswish: x * relu6(x + 3) / 6
pub fn hard_swish<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let gate = hard_sigmoid(x.clone());
    x * gate
}

/// hardsigmoid: relu6(x + 3) / 6
pub fn hard_sigmoid<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.add_scalar(3.0).clamp(0.0, 6.0).div_scalar(6.0)
}

/// チャネル数を divisor の倍数に丸める（元の値の90%未満にはしない）
pub fn make_divisible(value: usize, divisor: usize) -> usize {
    let rounded = ((value + divisor / 2) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value as f64 {
        rounded + divisor
    } else {
        rounded
    }
}

/// 反転残差ブロックの構成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    pub in_channels: usize,
    pub kernel: usize,
    pub expanded: usize,
    pub out_channels: usize,
    pub use_se: bool,
    pub hardswish: bool,
    pub stride: usize,
}

const fn block(
    in_channels: usize,
    kernel: usize,
    expanded: usize,
    out_channels: usize,
    use_se: bool,
    hardswish: bool,
    stride: usize,
) -> BlockSpec {
    BlockSpec {
        in_channels,
        kernel,
        expanded,
        out_channels,
        use_se,
        hardswish,
        stride,
    }
}

// (in, kernel, expanded, out, SE, hardswish, stride)
const LARGE_BLOCKS: [BlockSpec; 15] = [
    block(16, 3, 16, 16, false, false, 1),
    block(16, 3, 64, 24, false, false, 2),
    block(24, 3, 72, 24, false, false, 1),
    block(24, 5, 72, 40, true, false, 2),
    block(40, 5, 120, 40, true, false, 1),
    block(40, 5, 120, 40, true, false, 1),
    block(40, 3, 240, 80, false, true, 2),
    block(80, 3, 200, 80, false, true, 1),
    block(80, 3, 184, 80, false, true, 1),
    block(80, 3, 184, 80, false, true, 1),
    block(80, 3, 480, 112, true, true, 1),
    block(112, 3, 672, 112, true, true, 1),
    block(112, 5, 672, 160, true, true, 2),
    block(160, 5, 960, 160, true, true, 1),
    block(160, 5, 960, 160, true, true, 1),
];

const SMALL_BLOCKS: [BlockSpec; 11] = [
    block(16, 3, 16, 16, true, false, 2),
    block(16, 3, 72, 24, false, false, 2),
    block(24, 3, 88, 24, false, false, 1),
    block(24, 5, 96, 40, true, true, 2),
    block(40, 5, 240, 40, true, true, 1),
    block(40, 5, 240, 40, true, true, 1),
    block(40, 5, 120, 48, true, true, 1),
    block(48, 5, 144, 48, true, true, 1),
    block(48, 5, 288, 96, true, true, 2),
    block(96, 5, 576, 96, true, true, 1),
    block(96, 5, 576, 96, true, true, 1),
];

/// バックボーン別のブロック構成
pub fn block_specs(variant: BackboneVariant) -> &'static [BlockSpec] {
    match variant {
        BackboneVariant::Large => &LARGE_BLOCKS,
        BackboneVariant::Small => &SMALL_BLOCKS,
    }
}

/// 最終Convの出力チャネル数
pub fn last_conv_channels(variant: BackboneVariant) -> usize {
    match variant {
        BackboneVariant::Large => 960,
        BackboneVariant::Small => 576,
    }
}

/// 分類層に渡す特徴の次元
pub fn feature_width(variant: BackboneVariant) -> usize {
    match variant {
        BackboneVariant::Large => 1280,
        BackboneVariant::Small => 1024,
    }
}

fn batch_norm<B: Backend>(channels: usize, device: &B::Device) -> BatchNorm<B> {
    BatchNormConfig::new(channels)
        .with_epsilon(BN_EPSILON)
        .with_momentum(BN_MOMENTUM)
        .init(device)
}

/// Conv + BN + 活性化
#[derive(Module, Debug)]
pub struct ConvBnAct<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    /// false なら活性化なし（射影層）
    activate: bool,
    hardswish: bool,
}

impl<B: Backend> ConvBnAct<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        hardswish: Option<bool>,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel - 1) / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: batch_norm(out_channels, device),
            activate: hardswish.is_some(),
            hardswish: hardswish.unwrap_or(false),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        match (self.activate, self.hardswish) {
            (false, _) => x,
            (true, true) => hard_swish(x),
            (true, false) => relu(x),
        }
    }
}

/// Squeeze-and-Excitation
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    pool: AdaptiveAvgPool2d,
    fc1: Conv2d<B>,
    fc2: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        let squeezed = make_divisible(channels / 4, 8);
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: Conv2dConfig::new([channels, squeezed], [1, 1]).init(device),
            fc2: Conv2dConfig::new([squeezed, channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = relu(self.fc1.forward(scale));
        let scale = hard_sigmoid(self.fc2.forward(scale));
        // [B, C, 1, 1] を空間方向にブロードキャスト
        x * scale
    }
}

/// 反転残差ブロック
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBnAct<B>>,
    depthwise: ConvBnAct<B>,
    se: Option<SqueezeExcitation<B>>,
    project: ConvBnAct<B>,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn new(spec: &BlockSpec, device: &B::Device) -> Self {
        let act = Some(spec.hardswish);
        let expand = (spec.expanded != spec.in_channels)
            .then(|| ConvBnAct::new(spec.in_channels, spec.expanded, 1, 1, 1, act, device));
        let depthwise = ConvBnAct::new(
            spec.expanded,
            spec.expanded,
            spec.kernel,
            spec.stride,
            spec.expanded,
            act,
            device,
        );
        let se = spec
            .use_se
            .then(|| SqueezeExcitation::new(spec.expanded, device));
        let project = ConvBnAct::new(spec.expanded, spec.out_channels, 1, 1, 1, None, device);

        Self {
            expand,
            depthwise,
            se,
            project,
            use_residual: spec.stride == 1 && spec.in_channels == spec.out_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        if let Some(expand) = &self.expand {
            x = expand.forward(x);
        }
        x = self.depthwise.forward(x);
        if let Some(se) = &self.se {
            x = se.forward(x);
        }
        x = self.project.forward(x);

        if self.use_residual {
            x + input
        } else {
            x
        }
    }
}

/// MobileNetV3 バックボーン
#[derive(Module, Debug)]
pub struct MobileNetV3<B: Backend> {
    stem: ConvBnAct<B>,
    blocks: Vec<InvertedResidual<B>>,
    last_conv: ConvBnAct<B>,
    pool: AdaptiveAvgPool2d,
    pre_classifier: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> MobileNetV3<B> {
    /// 指定バックボーンをランダム初期化で作成
    pub fn new(variant: BackboneVariant, dropout: f64, device: &B::Device) -> Self {
        let specs = block_specs(variant);
        let stem = ConvBnAct::new(3, STEM_CHANNELS, 3, 2, 1, Some(true), device);
        let blocks = specs
            .iter()
            .map(|spec| InvertedResidual::new(spec, device))
            .collect();

        let last_in = specs.last().map_or(STEM_CHANNELS, |s| s.out_channels);
        let last_out = last_conv_channels(variant);

        Self {
            stem,
            blocks,
            last_conv: ConvBnAct::new(last_in, last_out, 1, 1, 1, Some(true), device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            pre_classifier: LinearConfig::new(last_out, feature_width(variant)).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    /// 画像 [batch, 3, H, W] -> 特徴 [batch, feature_width]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(images);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.last_conv.forward(x);
        let x = self.pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = hard_swish(self.pre_classifier.forward(x));
        self.dropout.forward(x)
    }
}
