//! Gated residual block with optional skip output and local conditioning.
use candle::Tensor;
use candle_nn::VarBuilder;

use crate::conv::{to_channels_first, to_channels_last, CausalConv, CausalConvConfig, ConvParams};
use crate::error::{check_dim, config_bail};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatedResidualBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// `None` disables the skip projection.
    pub skip_channels: Option<usize>,
    pub kernel_size: usize,
    pub dilation: usize,
    /// `None` disables local conditioning.
    pub conditioning_channels: Option<usize>,
    pub causal: bool,
}

impl GatedResidualBlockConfig {
    fn validate(&self) -> Result<()> {
        if self.out_channels != self.in_channels {
            config_bail!(
                "residual block output width {} must match its input width {}",
                self.out_channels,
                self.in_channels
            )
        }
        if self.skip_channels == Some(0) {
            config_bail!("skip channels must be positive when enabled")
        }
        if self.conditioning_channels == Some(0) {
            config_bail!("conditioning channels must be positive when enabled")
        }
        Ok(())
    }
}

/// `(xs + residual) * sqrt(0.5)`, which keeps the variance of the sum of two independent
/// unit-variance tensors at one.
pub fn residual_merge(xs: &Tensor, residual: &Tensor) -> Result<Tensor> {
    Ok((xs + residual)?.affine(std::f64::consts::FRAC_1_SQRT_2, 0.)?)
}

#[derive(Debug, Clone)]
struct LocalConditioning {
    filter: ConvParams,
    gate: ConvParams,
    channels: usize,
}

#[derive(Debug, Clone)]
pub struct GatedResidualBlock {
    filter: CausalConv,
    gate: CausalConv,
    res: ConvParams,
    skip: Option<ConvParams>,
    cond: Option<LocalConditioning>,
    cfg: GatedResidualBlockConfig,
    span: tracing::Span,
}

impl GatedResidualBlock {
    pub fn new(cfg: GatedResidualBlockConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        let conv_cfg = CausalConvConfig {
            kernel_size: cfg.kernel_size,
            dilation: cfg.dilation,
            causal: cfg.causal,
        };
        let filter = CausalConv::new(cfg.in_channels, cfg.out_channels, conv_cfg, vb.pp("filter"))?;
        let gate = CausalConv::new(cfg.in_channels, cfg.out_channels, conv_cfg, vb.pp("gate"))?;
        let res = ConvParams::he_uniform(cfg.out_channels, cfg.out_channels, 1, vb.pp("res"))?;
        let skip = match cfg.skip_channels {
            None => None,
            Some(skip_c) => Some(ConvParams::he_uniform(
                cfg.out_channels,
                skip_c,
                1,
                vb.pp("skip"),
            )?),
        };
        let cond = match cfg.conditioning_channels {
            None => None,
            Some(channels) => {
                let filter =
                    ConvParams::he_uniform(channels, cfg.out_channels, 1, vb.pp("cond_filter"))?;
                let gate =
                    ConvParams::he_uniform(channels, cfg.out_channels, 1, vb.pp("cond_gate"))?;
                Some(LocalConditioning {
                    filter,
                    gate,
                    channels,
                })
            }
        };
        Ok(Self {
            filter,
            gate,
            res,
            skip,
            cond,
            cfg,
            span: tracing::span!(tracing::Level::TRACE, "gated-res-block"),
        })
    }

    pub fn config(&self) -> &GatedResidualBlockConfig {
        &self.cfg
    }

    pub fn dilation(&self) -> usize {
        self.cfg.dilation
    }

    pub fn filter(&self) -> &CausalConv {
        &self.filter
    }

    pub fn gate(&self) -> &CausalConv {
        &self.gate
    }

    pub fn residual_params(&self) -> &ConvParams {
        &self.res
    }

    pub fn skip_params(&self) -> Option<&ConvParams> {
        self.skip.as_ref()
    }

    /// The 1x1 projections of the conditioning tensor onto the filter and gate paths.
    pub fn conditioning_params(&self) -> Option<(&ConvParams, &ConvParams)> {
        self.cond.as_ref().map(|c| (&c.filter, &c.gate))
    }

    /// Runs the block on a `(batch, time, in_channels)` stream.
    ///
    /// Returns the updated stream and, when skip channels are configured, the
    /// `(batch, time, skip_channels)` skip contribution. A conditioning tensor is ignored when
    /// the block was built without conditioning.
    pub fn forward(
        &self,
        xs: &Tensor,
        conditioning: Option<&Tensor>,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let xs = to_channels_first(xs)?;
        let conditioning = conditioning.map(to_channels_first).transpose()?;
        let (ys, skip) = self.forward_channels_first(&xs, conditioning.as_ref())?;
        let skip = skip.map(|s| to_channels_last(&s)).transpose()?;
        Ok((to_channels_last(&ys)?, skip))
    }

    pub(crate) fn forward_channels_first(
        &self,
        xs: &Tensor,
        conditioning: Option<&Tensor>,
    ) -> Result<(Tensor, Option<Tensor>)> {
        const OP: &str = "gated-residual-block";
        let _enter = self.span.enter();
        let (b, c, t) = xs.dims3()?;
        check_dim(OP, "channels", self.cfg.in_channels, c)?;
        let mut filter = self.filter.forward_channels_first(xs)?;
        let mut gate = self.gate.forward_channels_first(xs)?;
        if let Some(cond) = &self.cond {
            let cs = conditioning.ok_or(Error::MissingConditioning { op: OP })?;
            let (cs_b, cs_c, cs_t) = cs.dims3()?;
            check_dim(OP, "conditioning channels", cond.channels, cs_c)?;
            check_dim(OP, "conditioning batch", b, cs_b)?;
            check_dim(OP, "conditioning time", t, cs_t)?;
            filter = (filter + cond.filter.conv1d(cs, 0, 1)?)?;
            gate = (gate + cond.gate.conv1d(cs, 0, 1)?)?;
        }
        let activated = (filter.tanh()? * candle_nn::ops::sigmoid(&gate)?)?;
        let residual = self.res.conv1d(&activated, 0, 1)?;
        let skip = match &self.skip {
            None => None,
            Some(skip) => Some(skip.conv1d(&activated, 0, 1)?),
        };
        Ok((residual_merge(xs, &residual)?, skip))
    }
}
