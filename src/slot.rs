//! Time-division slot plan for anchor replies
//!
//! Every anchor hears the same poll, so replies are spread out by anchor
//! identity: anchor `n` transmits `base + (n - 1) * width` after it received
//! the poll. Nothing is negotiated at runtime; anchors stay out of each
//! other's way as long as identities are unique and the width covers one
//! response frame on air plus clock drift over the exchange.

use core::fmt;

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    error::ConfigError,
    time::{Duration, Instant},
};

/// Lowest anchor identity
pub const ID_MIN: u8 = 1;

/// Highest anchor identity
pub const ID_MAX: u8 = 20;

/// Narrowest slot accepted, in microseconds
pub const MIN_SLOT_WIDTH_US: u32 = 1_000;

/// Shortest delay between poll reception and the first reply, in microseconds
///
/// Below this the radio cannot turn around from receive to a scheduled
/// transmission.
pub const MIN_REPLY_DELAY_US: u32 = 400;

/// Delayed transmissions are scheduled with 512-tick granularity
const DELAYED_TX_MASK: u64 = 0x1FF;

/// The configured identity of one anchor
///
/// Guaranteed to lie within [`ID_MIN`]..=[`ID_MAX`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct AnchorId(u8);

impl AnchorId {
    /// Validates `id` against [`ID_MIN`]..=[`ID_MAX`]
    pub fn new(id: u8) -> Result<Self, ConfigError> {
        if (ID_MIN..=ID_MAX).contains(&id) {
            Ok(AnchorId(id))
        } else {
            Err(ConfigError::IdentityOutOfRange(id))
        }
    }

    /// The raw identity
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based slot index
    pub fn slot_index(&self) -> u32 {
        u32::from(self.0 - ID_MIN)
    }

    /// Iterates over every valid identity
    pub fn all() -> impl Iterator<Item = AnchorId> {
        (ID_MIN..=ID_MAX).map(AnchorId)
    }
}

impl TryFrom<u8> for AnchorId {
    type Error = ConfigError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        AnchorId::new(id)
    }
}

impl From<AnchorId> for u8 {
    fn from(id: AnchorId) -> u8 {
        id.0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unit in which reply delays are converted to device time
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeBase {
    /// SI microseconds, 63897.6 device ticks each
    Micros,
    /// UWB microseconds (512 / 499.2 MHz), 65536 device ticks each
    UwbMicros,
}

impl TimeBase {
    /// Converts `delay` in this unit to device time
    pub fn to_duration(&self, delay: u32) -> Duration {
        match self {
            TimeBase::Micros => Duration::from_micros(delay),
            TimeBase::UwbMicros => Duration::from_uwb_micros(delay),
        }
    }
}

/// Computes an anchor's reply delay from its raw identity
///
/// Fails for identities outside [`ID_MIN`]..=[`ID_MAX`]; that is a
/// configuration error and must stop the anchor at startup.
pub fn slot_delay_us(identity: u8, base_delay_us: u32, slot_width_us: u32) -> Result<u32, ConfigError> {
    let id = AnchorId::new(identity)?;
    Ok(base_delay_us.saturating_add(id.slot_index().saturating_mul(slot_width_us)))
}

/// Converts a reply delay into a device-time deadline for delayed transmission
///
/// The result is rounded down to the radio's scheduling granularity of 512
/// ticks (about 8 ns).
pub fn to_device_deadline(reference: Instant, delay: u32, time_base: TimeBase) -> DelayedTxTime {
    DelayedTxTime::round_down(reference + time_base.to_duration(delay))
}

/// A device time at which the radio can start a delayed transmission
///
/// The low 9 bits are always clear.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DelayedTxTime(Instant);

impl DelayedTxTime {
    /// Rounds `instant` down to the scheduling granularity
    pub fn round_down(instant: Instant) -> Self {
        DelayedTxTime(Instant::wrapping(instant.value() & !DELAYED_TX_MASK))
    }

    /// The scheduled instant
    pub fn instant(&self) -> Instant {
        self.0
    }

    /// The 32-bit value the radio's delayed-TX register expects
    ///
    /// This holds the top 32 bits of the 40-bit time. The radio ignores the
    /// lowest of these bits.
    pub fn register_value(&self) -> u32 {
        (self.0.value() >> 8) as u32
    }

    /// The time the frame's timestamp point will leave the antenna
    ///
    /// This is what a responder embeds in its reply, computed before the
    /// transmission actually happens.
    pub fn tx_timestamp(&self, tx_antenna_delay: u16) -> Instant {
        self.0 + Duration::from(tx_antenna_delay)
    }
}

/// A validated base delay and slot width
///
/// Deserializing goes through [`SlotPlan::new`], so a stored plan is held to
/// the same bounds as one built in code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(try_from = "SlotPlanFields", into = "SlotPlanFields")
)]
pub struct SlotPlan {
    base_delay_us: u32,
    slot_width_us: u32,
    time_base: TimeBase,
}

/// Serialized form of a [`SlotPlan`], not yet validated
#[cfg(feature = "serde")]
#[derive(Clone, Copy, serde::Serialize, serde::Deserialize)]
struct SlotPlanFields {
    base_delay_us: u32,
    slot_width_us: u32,
    time_base: TimeBase,
}

#[cfg(feature = "serde")]
impl TryFrom<SlotPlanFields> for SlotPlan {
    type Error = ConfigError;

    fn try_from(fields: SlotPlanFields) -> Result<Self, Self::Error> {
        SlotPlan::new(fields.base_delay_us, fields.slot_width_us, fields.time_base)
    }
}

#[cfg(feature = "serde")]
impl From<SlotPlan> for SlotPlanFields {
    fn from(plan: SlotPlan) -> Self {
        SlotPlanFields {
            base_delay_us: plan.base_delay_us,
            slot_width_us: plan.slot_width_us,
            time_base: plan.time_base,
        }
    }
}

impl SlotPlan {
    /// Builds a plan, rejecting slots too narrow to be disjoint in practice
    /// and a first slot the radio cannot meet
    pub fn new(base_delay_us: u32, slot_width_us: u32, time_base: TimeBase) -> Result<Self, ConfigError> {
        if slot_width_us < MIN_SLOT_WIDTH_US {
            return Err(ConfigError::SlotTooNarrow {
                width_us: slot_width_us,
                min_us: MIN_SLOT_WIDTH_US,
            });
        }
        if base_delay_us < MIN_REPLY_DELAY_US {
            return Err(ConfigError::ReplyDelayTooShort {
                delay_us: base_delay_us,
                min_us: MIN_REPLY_DELAY_US,
            });
        }

        // The last slot must end somewhere representable.
        u32::from(ID_MAX)
            .checked_mul(slot_width_us)
            .and_then(|span| span.checked_add(base_delay_us))
            .ok_or(ConfigError::PlanTooLong)?;

        Ok(SlotPlan {
            base_delay_us,
            slot_width_us,
            time_base,
        })
    }

    /// Delay before the first slot
    pub fn base_delay_us(&self) -> u32 {
        self.base_delay_us
    }

    /// Width of every slot
    pub fn slot_width_us(&self) -> u32 {
        self.slot_width_us
    }

    /// Unit the delays are expressed in
    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Start of `id`'s slot, relative to poll reception
    pub fn delay_us(&self, id: AnchorId) -> u32 {
        // Bounded by the check in `new`.
        self.base_delay_us + id.slot_index() * self.slot_width_us
    }

    /// End of `id`'s slot, relative to poll reception
    pub fn slot_end_us(&self, id: AnchorId) -> u32 {
        self.delay_us(id) + self.slot_width_us
    }

    /// How many anchors, counted from [`ID_MIN`], finish their slot within a
    /// collection window of `window_us`
    pub fn anchors_within(&self, window_us: u32) -> u8 {
        AnchorId::all()
            .take_while(|id| self.slot_end_us(*id) <= window_us)
            .count() as u8
    }

    /// The delayed-transmit deadline of `id`, given when it received the poll
    pub fn deadline(&self, id: AnchorId, poll_rx: Instant) -> DelayedTxTime {
        to_device_deadline(poll_rx, self.delay_us(id), self.time_base)
    }
}
