//! Single-sided two-way ranging for DW3000 UWB modules
//!
//! One tag ranges against up to twenty anchors with a single broadcast poll.
//! Every anchor answers in its own time slot, derived from its identity, so
//! the responses never collide and no channel access negotiation is needed.
//!
//! ```text
//!   tag                    anchor 1        anchor 2
//!    | --- poll (seq) ----->|-------------->|
//!    |<--- response --------|  base         |
//!    |<--- response ------------------------|  base + width
//!    |          ...  collection window  ...
//! ```
//!
//! The crate is split the same way the protocol is:
//!
//! - [`frame`]: the poll and response wire format
//! - [`slot`]: the reply slot of each anchor, and its device-time deadline
//! - [`tof`]: the time of flight and distance of one exchange
//! - [`roles`]: the [`Initiator`] and [`Responder`] state machines
//! - [`report`] and [`console`]: the text interfaces of tags and anchors
//!
//! The radio itself is reached through the [`Radio`] trait, which a DW3000
//! driver implements. Host time comes from an injected [`Clock`]. With the
//! `async` feature (on by default) the state machines are `async` and wait
//! through an [`embedded-hal-async`] delay, otherwise they block on an
//! [`embedded-hal`] one.
//!
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal
//! [`embedded-hal-async`]: https://crates.io/crates/embedded-hal-async
//! [`Clock`]: time::Clock
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "async")]
use maybe_async::must_be_async as maybe_async_attr;
#[cfg(not(feature = "async"))]
use maybe_async::must_be_sync as maybe_async_attr;

#[cfg(not(feature = "async"))]
use embedded_hal as hal_type;
#[cfg(feature = "async")]
use embedded_hal_async as hal_type;

#[macro_use]
mod macros;

pub mod configs;
pub mod console;
pub mod error;
pub mod frame;
pub mod radio;
pub mod report;
pub mod roles;
pub mod slot;
pub mod time;
pub mod tof;

#[cfg(test)]
mod sim;

/// Redirection of nb::block
pub mod block {
    pub use nb::block;
}

pub use crate::{
    block::block,
    configs::{RadioConfig, RangingConfig},
    error::{ConfigError, Error},
    frame::Classified,
    radio::Radio,
    report::TagReport,
    roles::{Initiator, RangeOutcome, Responder, ResponderOutcome},
    slot::AnchorId,
    tof::RangeMeasurement,
};
