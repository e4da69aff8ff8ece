//! Causal dilated convolution stack (WaveNet-style transform) for flow-based audio models.
//!
//! The [`WaveNet`] network maps a `(batch, time, in_channels)` tensor and an optional local
//! conditioning tensor (e.g. upsampled mel frames) of shape `(batch, time, cond_channels)` to a
//! `(batch, time, out_channels)` tensor. It is meant to parameterize the affine transform of a
//! flow coupling layer: its last layer starts as a zero map so that the coupling initially
//! behaves as the identity.
//!
//! Parameters are created or loaded through a [`candle_nn::VarBuilder`]. When backed by a
//! [`candle_nn::VarMap`], all trainable variables are available by name for an optimizer and
//! for persistence.
//!
//! ```rust
//! use candle::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use candle_wavenet::{Config, WaveNet};
//! # fn main() -> candle_wavenet::Result<()> {
//! let dev = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
//! let cfg = Config {
//!     residual_channels: 8,
//!     skip_channels: Some(8),
//!     conditioning_channels: Some(4),
//!     ..Config::default()
//! };
//! let net = WaveNet::new(&cfg, vb)?;
//! let audio = Tensor::randn(0f32, 1f32, (2, 32, 1), &dev)?;
//! let mels = Tensor::randn(0f32, 1f32, (2, 32, 4), &dev)?;
//! let ys = net.forward(&audio, Some(&mels))?;
//! assert_eq!(ys.dims(), &[2, 32, 2]);
//! # Ok(()) }
//! ```
#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod block;
pub mod conv;
mod error;
pub mod wavenet;

pub use block::{residual_merge, GatedResidualBlock, GatedResidualBlockConfig};
pub use conv::{CausalConv, CausalConvConfig, ConvParams, ZeroInitConv, ZeroInitParams};
pub use error::{Error, Result};
pub use wavenet::{Config, DilationSchedule, WaveNet};
