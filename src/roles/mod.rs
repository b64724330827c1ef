//! The two ends of a ranging exchange
//!
//! A tag runs an [`Initiator`]: it broadcasts a poll and collects the
//! responses that arrive within a fixed window. Each anchor runs a
//! [`Responder`]: it waits for polls and answers each one in its own time
//! slot.
//!
//! Both own their radio and never wait on it without a bound measured against
//! the injected [`Clock`].

use crate::{
    hal_type,
    maybe_async_attr,
    radio::{self, Radio},
    time::{Clock, Instant},
    Error,
};

pub use initiator::*;
pub use responder::*;

mod initiator;
mod responder;

/// A wait that expires a fixed time after it started
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout {
    started_at_us: u64,
    duration_us: u64,
}

impl Timeout {
    /// Starts a wait of `duration_us` now
    pub fn start<C: Clock>(clock: &C, duration_us: u32) -> Self {
        Timeout {
            started_at_us: clock.now_us(),
            duration_us: u64::from(duration_us),
        }
    }

    /// When the wait started
    pub fn started_at_us(&self) -> u64 {
        self.started_at_us
    }

    /// Whether the wait is over
    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        clock.elapsed_us(self.started_at_us) >= self.duration_us
    }
}

/// Waits for the radio to confirm a transmission, for at most `timeout_us`
///
/// Returns the transmission timestamp, or `None` if the radio never confirmed.
#[maybe_async_attr]
pub(crate) async fn wait_tx<R, C, D>(
    radio: &mut R,
    clock: &C,
    delay: &mut D,
    timeout_us: u32,
    poll_period_us: u32,
) -> Result<Option<Instant>, Error<R::Error>>
where
    R: Radio,
    C: Clock,
    D: hal_type::delay::DelayNs,
{
    let timeout = Timeout::start(clock, timeout_us);

    loop {
        match radio::poll_tx(radio) {
            Ok(tx_time) => return Ok(Some(tx_time)),
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(error)) => return Err(error),
        }

        if timeout.expired(clock) {
            return Ok(None);
        }

        delay.delay_us(poll_period_us).await;
    }
}
