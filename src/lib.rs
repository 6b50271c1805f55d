//! A fade/scheduler/universe-buffer engine for DMX-512, speaking Art-Net,
//! sACN/E1.31, and KiNet.
//!
//! ```no_run
//! use dmx_engine::{ArtNetNode, ByteOrder, FadeCurve};
//!
//! # async fn example() -> dmx_engine::Result<()> {
//! let node = ArtNetNode::new("192.168.1.50", 6454);
//! let universe = node.add_universe(0)?;
//! let dimmer = universe.add_channel(1, 1, "dimmer", 1, ByteOrder::Little)?;
//!
//! dimmer.set_fade(&[255.0], 2_000, FadeCurve::Quadratic)?;
//! dimmer.await;
//! # Ok(())
//! # }
//! ```

mod channel;
mod channel_fade;
mod error;
mod fade;
mod node;
mod output_correction;
mod sequence;
mod universe;

pub use channel::{ByteOrder, Channel};
pub use error::{DmxError, Result};
pub use fade::{FadeCurve, FadeState};
pub use node::{ArtNetNode, KiNetNode, Node, SacnNode};
pub use output_correction::{cubic, linear, quadratic, quadruple, CorrectionFn};
pub use universe::Universe;
