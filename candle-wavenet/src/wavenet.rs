//! Stack of dilated gated residual blocks, as used for the affine coupling networks of
//! flow-based vocoders (FloWaveNet, WaveGlow).
use candle::Tensor;
use candle_nn::VarBuilder;

use crate::block::{GatedResidualBlock, GatedResidualBlockConfig};
use crate::conv::{to_channels_first, to_channels_last, CausalConv, CausalConvConfig, ZeroInitConv};
use crate::error::{check_dim, config_bail};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    pub in_channels: usize,
    pub out_channels: usize,
    pub num_groups: usize,
    pub layers_per_group: usize,
    pub residual_channels: usize,
    pub skip_channels: Option<usize>,
    pub kernel_size: usize,
    pub conditioning_channels: Option<usize>,
    pub causal: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            in_channels: 1,
            out_channels: 2,
            num_groups: 1,
            layers_per_group: 6,
            residual_channels: 256,
            skip_channels: Some(256),
            kernel_size: 3,
            conditioning_channels: Some(80),
            causal: true,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid config json: {e}")))
    }

    pub fn dilation_schedule(&self) -> Result<DilationSchedule> {
        DilationSchedule::new(self.kernel_size, self.num_groups, self.layers_per_group)
    }

    /// The configuration of every residual block, in execution order.
    pub fn block_configs(&self) -> Result<Vec<GatedResidualBlockConfig>> {
        let schedule = self.dilation_schedule()?;
        let cfgs = schedule
            .dilations()
            .iter()
            .map(|&dilation| GatedResidualBlockConfig {
                in_channels: self.residual_channels,
                out_channels: self.residual_channels,
                skip_channels: self.skip_channels,
                kernel_size: self.kernel_size,
                dilation,
                conditioning_channels: self.conditioning_channels,
                causal: self.causal,
            })
            .collect();
        Ok(cfgs)
    }
}

/// Dilations of `num_groups` groups of `layers_per_group` blocks, layer `n` of each group
/// using `kernel_size^n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DilationSchedule {
    kernel_size: usize,
    num_groups: usize,
    layers_per_group: usize,
    dilations: Vec<usize>,
}

impl DilationSchedule {
    pub fn new(kernel_size: usize, num_groups: usize, layers_per_group: usize) -> Result<Self> {
        if kernel_size == 0 {
            config_bail!("kernel size must be positive")
        }
        if num_groups == 0 {
            config_bail!("num_groups must be positive")
        }
        if layers_per_group == 0 {
            config_bail!("layers_per_group must be positive")
        }
        let mut group = Vec::with_capacity(layers_per_group);
        for layer in 0..layers_per_group {
            let dilation = u32::try_from(layer)
                .ok()
                .and_then(|layer| kernel_size.checked_pow(layer));
            match dilation {
                Some(dilation) => group.push(dilation),
                None => config_bail!("dilation {kernel_size}^{layer} overflows"),
            }
        }
        let dilations = group.repeat(num_groups);
        Ok(Self {
            kernel_size,
            num_groups,
            layers_per_group,
            dilations,
        })
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn layers_per_group(&self) -> usize {
        self.layers_per_group
    }

    /// One dilation per block, over all groups.
    pub fn dilations(&self) -> &[usize] {
        &self.dilations
    }

    pub fn len(&self) -> usize {
        self.dilations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dilations.is_empty()
    }

    /// Number of consecutive input steps seen by one output step of the blocks.
    pub fn receptive_field(&self) -> usize {
        let k = self.kernel_size - 1;
        self.dilations
            .iter()
            .fold(1usize, |acc, d| acc.saturating_add(k.saturating_mul(*d)))
    }
}

const FRONT_KERNEL_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct WaveNet {
    front: CausalConv,
    blocks: Vec<GatedResidualBlock>,
    final_conv: CausalConv,
    final_zero: ZeroInitConv,
    schedule: DilationSchedule,
    cfg: Config,
    span: tracing::Span,
}

impl WaveNet {
    pub fn new(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        let schedule = cfg.dilation_schedule()?;
        let front_cfg = CausalConvConfig {
            kernel_size: FRONT_KERNEL_SIZE,
            dilation: 1,
            causal: cfg.causal,
        };
        let front = CausalConv::new(
            cfg.in_channels,
            cfg.residual_channels,
            front_cfg,
            vb.pp("front"),
        )?;
        let vb_b = vb.pp("blocks");
        let blocks = cfg
            .block_configs()?
            .into_iter()
            .enumerate()
            .map(|(i, block_cfg)| GatedResidualBlock::new(block_cfg, vb_b.pp(i)))
            .collect::<Result<Vec<_>>>()?;
        let last_channels = cfg.skip_channels.unwrap_or(cfg.residual_channels);
        let final_cfg = CausalConvConfig {
            kernel_size: 1,
            dilation: 1,
            causal: cfg.causal,
        };
        let final_conv = CausalConv::new(last_channels, last_channels, final_cfg, vb.pp("final"))?;
        let final_zero = ZeroInitConv::new(last_channels, cfg.out_channels, vb.pp("final_zero"))?;
        Ok(Self {
            front,
            blocks,
            final_conv,
            final_zero,
            schedule,
            cfg: cfg.clone(),
            span: tracing::span!(tracing::Level::TRACE, "wavenet"),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[GatedResidualBlock] {
        &self.blocks
    }

    pub fn dilations(&self) -> &[usize] {
        self.schedule.dilations()
    }

    pub fn front(&self) -> &CausalConv {
        &self.front
    }

    pub fn final_conv(&self) -> &CausalConv {
        &self.final_conv
    }

    pub fn final_zero(&self) -> &ZeroInitConv {
        &self.final_zero
    }

    /// Number of consecutive input steps that can influence one output step.
    pub fn receptive_field(&self) -> usize {
        self.schedule
            .receptive_field()
            .saturating_add(FRONT_KERNEL_SIZE - 1)
    }

    /// Maps a `(batch, time, in_channels)` input, with an optional
    /// `(batch, time, conditioning_channels)` conditioning tensor, to
    /// `(batch, time, out_channels)`.
    pub fn forward(&self, xs: &Tensor, conditioning: Option<&Tensor>) -> Result<Tensor> {
        let xs = to_channels_first(xs)?;
        let conditioning = conditioning.map(to_channels_first).transpose()?;
        let ys = self.forward_channels_first(&xs, conditioning.as_ref())?;
        to_channels_last(&ys)
    }

    /// Same as [`WaveNet::forward`] on `(batch, channels, time)` tensors.
    pub fn forward_channels_first(
        &self,
        xs: &Tensor,
        conditioning: Option<&Tensor>,
    ) -> Result<Tensor> {
        let _enter = self.span.enter();
        let (_b, c, _t) = xs.dims3()?;
        check_dim("wavenet", "channels", self.cfg.in_channels, c)?;
        let mut xs = self.front.forward_channels_first(xs)?.relu()?;
        let mut skips: Option<Tensor> = None;
        for block in self.blocks.iter() {
            let (ys, skip) = block.forward_channels_first(&xs, conditioning)?;
            xs = ys;
            if let Some(skip) = skip {
                skips = Some(match skips {
                    None => skip,
                    Some(acc) => (acc + skip)?,
                });
            }
        }
        let xs = skips.unwrap_or(xs).relu()?;
        let xs = self.final_conv.forward_channels_first(&xs)?.relu()?;
        self.final_zero.forward_channels_first(&xs)
    }
}
