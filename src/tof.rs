//! Single-sided two-way ranging arithmetic
//!
//! ```text
//!   initiator            responder
//!   poll_tx ----------->  poll_rx
//!      |                    |  round_trip_responder
//!   resp_rx <-----------  resp_tx
//!      round_trip_initiator
//! ```
//!
//! `tof = (round_trip_initiator - round_trip_responder * (1 - ratio)) / 2`
//!
//! where `ratio` is the responder's clock offset relative to the initiator, as
//! measured by the initiator's receiver on the response. Both round trips are
//! measured on different clocks, so only the responder's needs correcting.

use fixed::types::I6F26;

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    configs::UwbChannel,
    slot::AnchorId,
    time::{DEVICE_TIME_UNIT_S, SPEED_OF_LIGHT_M_S},
};

/// Clock offset between the remote transmitter and the local receiver
///
/// Wraps the raw value the radio reports after receiving a frame, a signed
/// fixed-point ratio with 26 fractional bits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClockOffset(i32);

impl ClockOffset {
    /// No offset
    pub const ZERO: ClockOffset = ClockOffset(0);

    /// Wraps a raw reading
    pub fn from_raw(raw: i32) -> Self {
        ClockOffset(raw)
    }

    /// Builds an offset from parts per million, saturating at the range of the
    /// fixed-point format
    pub fn from_ppm(ppm: f64) -> Self {
        ClockOffset(I6F26::saturating_from_num(ppm / 1e6).to_bits())
    }

    /// Builds an offset from the receiver's carrier recovery integrator
    ///
    /// Positive means the local clock runs faster than the remote one.
    pub fn from_carrier_integrator(integrator: i32, channel: UwbChannel) -> Self {
        // F_S / 2 / N_samples / 2^17, with N_samples = 1024
        const FREQ_OFFSET_MULTIPLIER: f64 = 998.4e6 / 2.0 / 1024.0 / 131072.0;

        let f_offset_hz = f64::from(integrator) * FREQ_OFFSET_MULTIPLIER;
        let ppm = 1e6 * f_offset_hz / channel.center_frequency_hz() as f64;

        ClockOffset::from_ppm(ppm)
    }

    /// The raw reading
    pub fn raw(&self) -> i32 {
        self.0
    }

    /// The offset as a dimensionless ratio
    pub fn ratio(&self) -> f64 {
        I6F26::from_bits(self.0).to_num::<f64>()
    }

    /// The offset in parts per million
    pub fn ppm(&self) -> f64 {
        self.ratio() * 1e6
    }
}

/// The two round trips of one exchange, in device time units
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoundTrip {
    /// From poll transmission to response reception, on the initiator's clock
    pub initiator: u32,
    /// From poll reception to response transmission, on the responder's clock
    pub responder: u32,
}

impl RoundTrip {
    /// Computes both round trips from the four timestamps
    ///
    /// Subtraction wraps at 32 bits, the width timestamps travel with, so a
    /// counter rollover in the middle of an exchange is harmless.
    pub fn new(poll_tx: u32, resp_rx: u32, poll_rx: u32, resp_tx: u32) -> Self {
        RoundTrip {
            initiator: resp_rx.wrapping_sub(poll_tx),
            responder: resp_tx.wrapping_sub(poll_rx),
        }
    }

    /// One-way time of flight in seconds
    ///
    /// Not clamped; late responses and bad timestamps can produce negative or
    /// absurd values.
    pub fn time_of_flight_s(&self, clock_offset_ratio: f64) -> f64 {
        let initiator = f64::from(self.initiator);
        let responder = f64::from(self.responder);

        (initiator - responder * (1.0 - clock_offset_ratio)) / 2.0 * DEVICE_TIME_UNIT_S
    }

    /// Distance in metres
    pub fn distance_m(&self, clock_offset_ratio: f64) -> f64 {
        self.time_of_flight_s(clock_offset_ratio) * SPEED_OF_LIGHT_M_S
    }
}

/// One-way time of flight in seconds, from the four timestamps of an exchange
pub fn time_of_flight_s(
    poll_tx: u32,
    resp_rx: u32,
    poll_rx: u32,
    resp_tx: u32,
    clock_offset_ratio: f64,
) -> f64 {
    RoundTrip::new(poll_tx, resp_rx, poll_rx, resp_tx).time_of_flight_s(clock_offset_ratio)
}

/// Distance in metres, from the four timestamps of an exchange
pub fn distance_m(
    poll_tx: u32,
    resp_rx: u32,
    poll_rx: u32,
    resp_tx: u32,
    clock_offset_ratio: f64,
) -> f64 {
    time_of_flight_s(poll_tx, resp_rx, poll_rx, resp_tx, clock_offset_ratio) * SPEED_OF_LIGHT_M_S
}

/// Whether `distance_m` lies within `[min_m, max_m]`
///
/// `NaN` is never plausible.
pub fn is_plausible(distance_m: f64, min_m: f64, max_m: f64) -> bool {
    distance_m >= min_m && distance_m <= max_m
}

/// A completed range measurement against one anchor
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeMeasurement {
    /// The anchor that responded, if its frame carried a valid identity
    pub anchor: Option<AnchorId>,
    /// Sequence number of the exchange
    pub sequence_number: u8,
    /// The computed distance in metres
    pub distance_m: f64,
    /// Both round trips the distance was computed from
    pub round_trip: RoundTrip,
    /// Clock offset ratio applied to the responder's round trip
    pub clock_offset_ratio: f64,
    /// Host time at which the measurement was computed, in microseconds
    pub computed_at_us: u64,
    /// Received signal power, if the radio reports it
    pub signal_quality_dbm: Option<f32>,
}
