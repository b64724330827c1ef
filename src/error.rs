use core::fmt;
use core::fmt::{Display, Formatter};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::frame::FrameError;

/// A configuration that cannot be used for ranging
///
/// These are detected at startup, before the radio is touched, and are never
/// produced by a running control loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ConfigError {
    /// The anchor identity lies outside `[ID_MIN, ID_MAX]`
    IdentityOutOfRange(u8),

    /// The slot width cannot hold a response frame plus margin
    SlotTooNarrow {
        /// The configured width in microseconds
        width_us: u32,
        /// The smallest width accepted
        min_us: u32,
    },

    /// The first slot starts before the radio can turn around to transmit
    ReplyDelayTooShort {
        /// The configured base delay in microseconds
        delay_us: u32,
        /// The smallest base delay accepted
        min_us: u32,
    },

    /// The collection window closes before the first slot starts
    WindowTooShort {
        /// The configured window in microseconds
        window_us: u32,
        /// The end of the first slot in microseconds
        first_slot_end_us: u32,
    },

    /// The last slot ends beyond what the plan can represent
    PlanTooLong,

    /// The plausibility bounds are inverted or not finite
    InvalidPlausibilityBounds,

    /// A polling or timeout period of zero
    ZeroPeriod,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IdentityOutOfRange(id) => {
                write!(
                    f,
                    "anchor id {} out of range [{}, {}]",
                    id,
                    crate::slot::ID_MIN,
                    crate::slot::ID_MAX
                )
            }
            ConfigError::SlotTooNarrow { width_us, min_us } => {
                write!(f, "slot width {} us is below {} us", width_us, min_us)
            }
            ConfigError::ReplyDelayTooShort { delay_us, min_us } => {
                write!(f, "reply delay {} us is below {} us", delay_us, min_us)
            }
            ConfigError::WindowTooShort {
                window_us,
                first_slot_end_us,
            } => write!(
                f,
                "collection window {} us closes before the first slot ends at {} us",
                window_us, first_slot_end_us
            ),
            ConfigError::PlanTooLong => write!(f, "slot plan exceeds the representable delay"),
            ConfigError::InvalidPlausibilityBounds => write!(f, "invalid plausibility bounds"),
            ConfigError::ZeroPeriod => write!(f, "polling and timeout periods must be non-zero"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// An error that can occur while ranging
///
/// `E` is the error type of the injected [`Radio`](crate::radio::Radio).
pub enum Error<E> {
    /// The radio driver reported an error
    Radio(E),

    /// The configuration was rejected at startup
    Config(ConfigError),

    /// Receiver FCS error
    Fcs,

    /// PHY header error
    Phy,

    /// Receiver Reed Solomon Frame Sync Loss
    ReedSolomon,

    /// Receiver Frame Wait Timeout
    FrameWaitTimeout,

    /// Preamble Detection Timeout
    PreambleDetectionTimeout,

    /// Receiver SFD Timeout
    SfdTimeout,

    /// Receiver Overrun
    Overrun,

    /// Buffer too small
    BufferTooSmall {
        /// Indicates how large a buffer would have been required
        required_len: usize,
    },

    /// The radio reported [`TxLaunch::TooLate`] for a transmission that was
    /// not delayed
    ///
    /// Only a delayed start can miss its time, so this is a fault in the
    /// radio implementation. Nothing went on air.
    ///
    /// [`TxLaunch::TooLate`]: crate::radio::TxLaunch::TooLate
    TxRejected,

    /// The radio never confirmed a transmission within the allowed time
    TxTimeout,
}

impl<E> Error<E> {
    /// Whether this is a receive-side condition the control loop recovers
    /// from locally by re-arming the receiver
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Fcs
                | Error::Phy
                | Error::ReedSolomon
                | Error::FrameWaitTimeout
                | Error::PreambleDetectionTimeout
                | Error::SfdTimeout
                | Error::Overrun
        )
    }
}

impl<E> From<ConfigError> for Error<E> {
    fn from(error: ConfigError) -> Self {
        Error::Config(error)
    }
}

impl<E> From<FrameError> for Error<E> {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::BufferTooSmall { required_len } => Error::BufferTooSmall { required_len },
        }
    }
}

impl<E> Display for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(error) => write!(f, "configuration error: {}", error),
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(feature = "std")]
impl<E> std::error::Error for Error<E> where E: fmt::Debug {}

// Not derived, so that `Debug` is only required of `E` where it's used.
impl<E> fmt::Debug for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Radio(error) => write!(f, "Radio({:?})", error),
            Error::Config(error) => write!(f, "Config({:?})", error),
            Error::Fcs => write!(f, "Fcs"),
            Error::Phy => write!(f, "Phy"),
            Error::ReedSolomon => write!(f, "ReedSolomon"),
            Error::FrameWaitTimeout => write!(f, "FrameWaitTimeout"),
            Error::PreambleDetectionTimeout => write!(f, "PreambleDetectionTimeout"),
            Error::SfdTimeout => write!(f, "SfdTimeout"),
            Error::Overrun => write!(f, "Overrun"),
            Error::BufferTooSmall { required_len } => {
                write!(f, "BufferTooSmall {{ required_len: {:?} }}", required_len,)
            }
            Error::TxRejected => write!(f, "TxRejected"),
            Error::TxTimeout => write!(f, "TxTimeout"),
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> Format for Error<E>
where
    E: defmt::Format,
{
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Radio(error) => defmt::write!(f, "Radio({:?})", error),
            Error::Config(error) => defmt::write!(f, "Config({:?})", error),
            Error::Fcs => defmt::write!(f, "Fcs"),
            Error::Phy => defmt::write!(f, "Phy"),
            Error::ReedSolomon => defmt::write!(f, "ReedSolomon"),
            Error::FrameWaitTimeout => defmt::write!(f, "FrameWaitTimeout"),
            Error::PreambleDetectionTimeout => defmt::write!(f, "PreambleDetectionTimeout"),
            Error::SfdTimeout => defmt::write!(f, "SfdTimeout"),
            Error::Overrun => defmt::write!(f, "Overrun"),
            Error::BufferTooSmall { required_len } => {
                defmt::write!(f, "BufferTooSmall {{ required_len: {:?} }}", required_len,)
            }
            Error::TxRejected => defmt::write!(f, "TxRejected"),
            Error::TxTimeout => defmt::write!(f, "TxTimeout"),
        }
    }
}
