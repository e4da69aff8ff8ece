//! Convolution layers operating along the time axis.
//!
//! Tensors crossing the public API are laid out as `(batch, time, channels)`. The layers work
//! channels-first internally, which is the layout expected by [`Tensor::conv1d`].
use candle::{Module, Tensor, D};
use candle_nn::{init, Init, VarBuilder};

use crate::error::{check_dim, config_bail};
use crate::Result;

/// `(batch, time, channels)` -> `(batch, channels, time)`.
pub(crate) fn to_channels_first(xs: &Tensor) -> Result<Tensor> {
    xs.dims3()?;
    Ok(xs.transpose(1, 2)?.contiguous()?)
}

/// `(batch, channels, time)` -> `(batch, time, channels)`.
pub(crate) fn to_channels_last(xs: &Tensor) -> Result<Tensor> {
    Ok(xs.transpose(1, 2)?.contiguous()?)
}

/// Weight and bias of a 1d convolution.
///
/// The weight is stored in the candle layout `(out_channels, in_channels, kernel_size)`.
#[derive(Debug, Clone)]
pub struct ConvParams {
    weight: Tensor,
    bias: Tensor,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
}

impl ConvParams {
    /// Fetches (or creates) `weight` and `bias` under `vb`. The bias always starts at zero.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        weight_init: Init,
        vb: VarBuilder,
    ) -> Result<Self> {
        if in_channels == 0 || out_channels == 0 {
            config_bail!("conv channels must be positive, got {in_channels} -> {out_channels}")
        }
        if kernel_size == 0 {
            config_bail!("conv kernel size must be positive")
        }
        let weight =
            vb.get_with_hints((out_channels, in_channels, kernel_size), "weight", weight_init)?;
        let bias = vb.get_with_hints(out_channels, "bias", init::ZERO)?;
        Ok(Self {
            weight,
            bias,
            in_channels,
            out_channels,
            kernel_size,
        })
    }

    /// He-uniform weights, `U(-sqrt(6 / fan_in), sqrt(6 / fan_in))` with
    /// `fan_in = in_channels * kernel_size`.
    pub fn he_uniform(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Self::new(
            in_channels,
            out_channels,
            kernel_size,
            init::DEFAULT_KAIMING_UNIFORM,
            vb,
        )
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// The weight in the `(kernel_size, in_channels, out_channels)` layout.
    pub fn weight_kio(&self) -> Result<Tensor> {
        Ok(self.weight.permute((2, 1, 0))?.contiguous()?)
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Convolves a channels-first tensor, zero padding both ends of the time axis by `padding`.
    pub(crate) fn conv1d(&self, xs: &Tensor, padding: usize, dilation: usize) -> Result<Tensor> {
        let xs = xs.conv1d(&self.weight, padding, 1, dilation, 1)?;
        let bias = self.bias.reshape((1, self.out_channels, 1))?;
        Ok(xs.broadcast_add(&bias)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausalConvConfig {
    pub kernel_size: usize,
    pub dilation: usize,
    pub causal: bool,
}

impl Default for CausalConvConfig {
    fn default() -> Self {
        Self {
            kernel_size: 3,
            dilation: 1,
            causal: true,
        }
    }
}

impl CausalConvConfig {
    /// Zero padding applied on each side of the time axis.
    pub fn padding(&self) -> usize {
        let span = self.dilation.saturating_mul(self.kernel_size.saturating_sub(1));
        if self.causal {
            span
        } else {
            span / 2
        }
    }

    fn validate(&self) -> Result<()> {
        if self.kernel_size == 0 {
            config_bail!("kernel size must be positive")
        }
        if self.dilation == 0 {
            config_bail!("dilation must be positive")
        }
        let span = self
            .dilation
            .checked_mul(self.kernel_size - 1)
            .ok_or_else(|| crate::Error::Config("dilated kernel span overflows".to_string()))?;
        // A centered kernel with an odd span cannot keep the sequence length.
        if !self.causal && span % 2 != 0 {
            config_bail!(
                "non-causal conv needs an even dilation * (kernel_size - 1), got {} * {}",
                self.dilation,
                self.kernel_size - 1
            )
        }
        Ok(())
    }
}

/// Dilated 1d convolution whose output has the same length as its input.
///
/// Both ends of the time axis are zero padded by [`CausalConvConfig::padding`]. In causal mode
/// the trailing `padding` outputs are then dropped so that output `t` only sees inputs `<= t`.
#[derive(Debug, Clone)]
pub struct CausalConv {
    params: ConvParams,
    cfg: CausalConvConfig,
    padding: usize,
    span: tracing::Span,
}

impl CausalConv {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        cfg: CausalConvConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        cfg.validate()?;
        let params = ConvParams::he_uniform(in_channels, out_channels, cfg.kernel_size, vb)?;
        Ok(Self {
            params,
            cfg,
            padding: cfg.padding(),
            span: tracing::span!(tracing::Level::TRACE, "causal-conv"),
        })
    }

    pub fn params(&self) -> &ConvParams {
        &self.params
    }

    pub fn config(&self) -> &CausalConvConfig {
        &self.cfg
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn in_channels(&self) -> usize {
        self.params.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.params.out_channels
    }

    /// Applies the convolution to a `(batch, time, in_channels)` tensor.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = to_channels_first(xs)?;
        to_channels_last(&self.forward_channels_first(&xs)?)
    }

    pub(crate) fn forward_channels_first(&self, xs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let (_b, c, _t) = xs.dims3()?;
        check_dim("causal-conv", "channels", self.params.in_channels, c)?;
        let ys = self.params.conv1d(xs, self.padding, self.cfg.dilation)?;
        if self.cfg.causal && self.padding != 0 {
            let len = ys.dim(D::Minus1)?;
            Ok(ys.narrow(D::Minus1, 0, len - self.padding)?)
        } else {
            Ok(ys)
        }
    }
}

impl Module for CausalConv {
    fn forward(&self, xs: &Tensor) -> candle::Result<Tensor> {
        Ok(Self::forward(self, xs)?)
    }
}

#[derive(Debug, Clone)]
pub struct ZeroInitParams {
    conv: ConvParams,
    scale: Tensor,
}

impl ZeroInitParams {
    pub fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Self> {
        let conv = ConvParams::new(in_channels, out_channels, 1, init::ZERO, vb.clone())?;
        let scale = vb.get_with_hints(out_channels, "scale", init::ZERO)?;
        Ok(Self { conv, scale })
    }

    pub fn conv(&self) -> &ConvParams {
        &self.conv
    }

    pub fn scale(&self) -> &Tensor {
        &self.scale
    }
}

/// 1x1 convolution scaled by `exp(3 * scale)` per output channel.
///
/// Weight, bias and scale all start at zero so the layer initially maps everything to zero.
#[derive(Debug, Clone)]
pub struct ZeroInitConv {
    params: ZeroInitParams,
    span: tracing::Span,
}

impl ZeroInitConv {
    pub fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Self> {
        let params = ZeroInitParams::new(in_channels, out_channels, vb)?;
        Ok(Self {
            params,
            span: tracing::span!(tracing::Level::TRACE, "zero-init-conv"),
        })
    }

    pub fn params(&self) -> &ZeroInitParams {
        &self.params
    }

    pub fn in_channels(&self) -> usize {
        self.params.conv.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.params.conv.out_channels
    }

    /// Applies the layer to a `(batch, time, in_channels)` tensor.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = to_channels_first(xs)?;
        to_channels_last(&self.forward_channels_first(&xs)?)
    }

    pub(crate) fn forward_channels_first(&self, xs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let (_b, c, _t) = xs.dims3()?;
        check_dim("zero-init-conv", "channels", self.in_channels(), c)?;
        let ys = self.params.conv.conv1d(xs, 0, 1)?;
        let gain = self
            .params
            .scale
            .affine(3., 0.)?
            .exp()?
            .reshape((1, self.out_channels(), 1))?;
        Ok(ys.broadcast_mul(&gain)?)
    }
}

impl Module for ZeroInitConv {
    fn forward(&self, xs: &Tensor) -> candle::Result<Tensor> {
        Ok(Self::forward(self, xs)?)
    }
}
