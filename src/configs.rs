//! Configuration structs for the radio and the ranging protocol
//!
//! [`RadioConfig`] is handed to the radio collaborator once at startup.
//! [`RangingConfig`] holds everything the control loops need: the slot plan,
//! the bounds on every wait, and the plausibility window applied to computed
//! distances.

use crate::{
    error::ConfigError,
    slot::{SlotPlan, TimeBase},
};

/// Antenna delay used by the reference hardware, in device time units
///
/// This is board and antenna specific calibration data. Calibrate per device
/// and override it in [`RadioConfig`].
pub const DEFAULT_ANTENNA_DELAY: u16 = 16385;

/// PHY configuration shared by every node on the network
///
/// All nodes must agree on these values, or they won't hear each other.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadioConfig {
    /// The UWB channel
    pub channel: UwbChannel,
    /// The bitrate of the data portion
    pub bitrate: BitRate,
    /// The pulse repetition frequency
    pub pulse_repetition_frequency: PulseRepetitionFrequency,
    /// The length of the preamble
    pub preamble_length: PreambleLength,
    /// The SFD sequence
    pub sfd_sequence: SfdSequence,
    /// The preamble code, used for both TX and RX
    pub preamble_code: u8,
    /// TX antenna delay in device time units
    pub tx_antenna_delay: u16,
    /// RX antenna delay in device time units
    pub rx_antenna_delay: u16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        let channel = UwbChannel::default();
        let pulse_repetition_frequency = PulseRepetitionFrequency::default();
        RadioConfig {
            channel,
            bitrate: BitRate::default(),
            pulse_repetition_frequency,
            preamble_length: PreambleLength::default(),
            sfd_sequence: SfdSequence::default(),
            preamble_code: channel.get_recommended_preamble_code(pulse_repetition_frequency),
            tx_antenna_delay: DEFAULT_ANTENNA_DELAY,
            rx_antenna_delay: DEFAULT_ANTENNA_DELAY,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// The bitrate at which a message is transmitted
pub enum BitRate {
    /// 850 kilobits per second.
    Kbps850 = 0,
    /// 6.8 megabits per second.
    Kbps6800 = 1,
}

impl Default for BitRate {
    fn default() -> Self {
        BitRate::Kbps6800
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// The PRF value
pub enum PulseRepetitionFrequency {
    /// 16 megahertz
    Mhz16 = 0b01,
    /// 64 megahertz
    Mhz64 = 0b10,
}

impl Default for PulseRepetitionFrequency {
    fn default() -> Self {
        PulseRepetitionFrequency::Mhz64
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// An enum that specifies the length of the preamble.
///
/// Longer preambles improve the reception quality and thus range.
/// This comes at the cost of longer transmission times, which eats into the
/// reply slots.
pub enum PreambleLength {
    /// 64 symbols of preamble.
    Symbols64,
    /// 128 symbols of preamble.
    Symbols128,
    /// 256 symbols of preamble.
    Symbols256,
    /// 512 symbols of preamble.
    Symbols512,
    /// 1024 symbols of preamble.
    Symbols1024,
}

impl Default for PreambleLength {
    fn default() -> Self {
        PreambleLength::Symbols128
    }
}

impl PreambleLength {
    /// Number of preamble symbols
    pub fn symbols(&self) -> u32 {
        match self {
            PreambleLength::Symbols64 => 64,
            PreambleLength::Symbols128 => 128,
            PreambleLength::Symbols256 => 256,
            PreambleLength::Symbols512 => 512,
            PreambleLength::Symbols1024 => 1024,
        }
    }

    /// Gets the recommended PAC size based on the preamble length.
    pub fn get_recommended_pac_size(&self) -> u8 {
        match self {
            PreambleLength::Symbols64 | PreambleLength::Symbols128 => 8,
            PreambleLength::Symbols256 | PreambleLength::Symbols512 => 16,
            PreambleLength::Symbols1024 => 32,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// An enum that allows the selection between different SFD sequences
pub enum SfdSequence {
    /// The standard sequence defined by the IEEE standard.
    IeeeShort = 0b00,
    /// A sequence defined by Decawave that is supposed to be more robust.
    Decawave8 = 0b01,
    /// A sequence defined by Decawave that is supposed to be more robust.
    Decawave16 = 0b10,
    /// The 8-symbol IEEE 4z sequence.
    Ieee = 0b11,
}

impl Default for SfdSequence {
    fn default() -> Self {
        SfdSequence::Ieee
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// The UWB channels supported by the DW3000
pub enum UwbChannel {
    /// Channel 5
    /// - Center frequency: 6489.6 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel5 = 0,
    /// Channel 9
    /// - Center frequency: 7987.2 Mhz
    /// - Bandwidth: 499.2 Mhz
    Channel9 = 1,
}

impl Default for UwbChannel {
    fn default() -> Self {
        UwbChannel::Channel5
    }
}

impl UwbChannel {
    /// Gets the recommended preamble code
    pub fn get_recommended_preamble_code(&self, prf_value: PulseRepetitionFrequency) -> u8 {
        match (self, prf_value) {
            (UwbChannel::Channel5, PulseRepetitionFrequency::Mhz16) => 4,
            (UwbChannel::Channel9, PulseRepetitionFrequency::Mhz16) => 4,
            (UwbChannel::Channel5, PulseRepetitionFrequency::Mhz64) => 9,
            (UwbChannel::Channel9, PulseRepetitionFrequency::Mhz64) => 9,
        }
    }

    /// Center frequency in Hz
    pub fn center_frequency_hz(&self) -> u64 {
        match self {
            UwbChannel::Channel5 => 6_489_600_000,
            UwbChannel::Channel9 => 7_987_200_000,
        }
    }
}

/// Protocol timing and filtering parameters
///
/// The defaults give 20 anchors 1.5 ms each, starting 800 µs after the poll,
/// collected within a 60 ms window. See [`RangingConfig::validate`] for the
/// constraints.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangingConfig {
    /// PHY settings handed to the radio at startup
    pub radio: RadioConfig,
    /// Delay from poll reception to the start of the first anchor's slot
    pub base_reply_delay_us: u32,
    /// Width of one anchor's reply slot
    pub slot_width_us: u32,
    /// Unit the reply delays are expressed in
    pub time_base: TimeBase,
    /// How long the initiator collects responses after each poll
    pub collection_window_us: u32,
    /// Idle time between the end of one cycle and the next poll
    pub poll_interval_ms: u32,
    /// Pause between two radio status reads while waiting
    pub rx_poll_period_us: u32,
    /// Upper bound on waiting for the radio to confirm a transmission
    pub tx_timeout_us: u32,
    /// How long a responder listens before reporting an idle pass
    pub listen_timeout_us: u32,
    /// Distances below this are discarded as implausible
    pub plausible_min_m: f64,
    /// Distances above this are discarded as implausible
    pub plausible_max_m: f64,
}

impl Default for RangingConfig {
    fn default() -> Self {
        RangingConfig {
            radio: RadioConfig::default(),
            base_reply_delay_us: 800,
            slot_width_us: 1500,
            time_base: TimeBase::Micros,
            collection_window_us: 60_000,
            poll_interval_ms: 100,
            rx_poll_period_us: 100,
            tx_timeout_us: 5_000,
            listen_timeout_us: 1_000_000,
            plausible_min_m: 0.0,
            plausible_max_m: 1000.0,
        }
    }
}

impl RangingConfig {
    /// Checks the configuration for values that would break the slot plan or
    /// leave a wait unbounded
    pub fn validate(&self) -> Result<(), ConfigError> {
        let plan = self.slot_plan()?;

        let first_slot_end_us = plan.base_delay_us().saturating_add(plan.slot_width_us());
        if self.collection_window_us < first_slot_end_us {
            return Err(ConfigError::WindowTooShort {
                window_us: self.collection_window_us,
                first_slot_end_us,
            });
        }

        if self.rx_poll_period_us == 0 || self.tx_timeout_us == 0 || self.listen_timeout_us == 0 {
            return Err(ConfigError::ZeroPeriod);
        }

        if !(self.plausible_min_m.is_finite()
            && self.plausible_max_m.is_finite()
            && self.plausible_min_m <= self.plausible_max_m)
        {
            return Err(ConfigError::InvalidPlausibilityBounds);
        }

        Ok(())
    }

    /// The slot plan described by this configuration
    pub fn slot_plan(&self) -> Result<SlotPlan, ConfigError> {
        SlotPlan::new(self.base_reply_delay_us, self.slot_width_us, self.time_base)
    }
}
