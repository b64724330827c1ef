//! The radio as seen by the ranging state machines
//!
//! Register-level access stays with whatever driver sits behind [`Radio`].
//! The state machines only need to load frames, schedule transmissions, read
//! timestamps and poll the status flags, and they do that through this trait.

use core::fmt::Debug;

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    configs::RadioConfig,
    slot::DelayedTxTime,
    time::Instant,
    tof::ClockOffset,
    Error,
};

/// How a loaded frame is started
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum TxMode {
    /// Send right away
    Immediate,
    /// Send at the time set by [`Radio::set_delayed_tx_time`]
    Delayed,
    /// Send right away, then turn the receiver on as soon as the frame is out
    ResponseExpected,
}

/// What became of a request to start a transmission
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum TxLaunch {
    /// The transmission is underway or scheduled
    Started,
    /// The delayed start time had already passed, so nothing is transmitted
    ///
    /// Only valid for [`TxMode::Delayed`].
    TooLate,
}

/// Which timestamp to read
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum TimestampKind {
    /// When the last frame left the antenna
    Tx,
    /// When the last frame arrived at the antenna
    Rx,
}

/// Event flags reported by the radio
///
/// The bit positions follow the DW3000's `SYS_STATUS` register, so a driver
/// can usually hand over the low word of that register as is.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Status(pub u32);

impl Status {
    /// Transmit frame sent
    pub const TX_COMPLETE: Status = Status(1 << 7);
    /// Receiver PHY header error
    pub const RX_PHY_ERROR: Status = Status(1 << 12);
    /// Receiver FCS good, a frame is waiting
    pub const RX_FRAME_GOOD: Status = Status(1 << 14);
    /// Receiver FCS error
    pub const RX_FCS_ERROR: Status = Status(1 << 15);
    /// Receiver Reed Solomon frame sync loss
    pub const RX_SYNC_LOSS: Status = Status(1 << 16);
    /// Receiver frame wait timeout
    pub const RX_TIMEOUT: Status = Status(1 << 17);
    /// Receiver overrun
    pub const RX_OVERRUN: Status = Status(1 << 20);
    /// Preamble detection timeout
    pub const RX_PREAMBLE_TIMEOUT: Status = Status(1 << 21);
    /// Receiver SFD timeout
    pub const RX_SFD_TIMEOUT: Status = Status(1 << 26);

    /// Every receiver flag, good or bad
    pub const RX_ALL: Status = Status(
        Self::RX_PHY_ERROR.0
            | Self::RX_FRAME_GOOD.0
            | Self::RX_FCS_ERROR.0
            | Self::RX_SYNC_LOSS.0
            | Self::RX_TIMEOUT.0
            | Self::RX_OVERRUN.0
            | Self::RX_PREAMBLE_TIMEOUT.0
            | Self::RX_SFD_TIMEOUT.0,
    );

    /// No flags set
    pub const fn empty() -> Self {
        Status(0)
    }

    /// Whether all flags of `other` are set
    pub const fn contains(&self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    /// Both sets of flags
    pub const fn union(self, other: Status) -> Status {
        Status(self.0 | other.0)
    }

    /// The flags not in `other`
    pub const fn without(self, other: Status) -> Status {
        Status(self.0 & !other.0)
    }
}

impl core::ops::BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        self.union(rhs)
    }
}

impl core::fmt::Debug for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Status({:#010x})", self.0)
    }
}

/// A DW3000-class UWB transceiver
///
/// Implementations own the bus and chip-select; the state machines own the
/// implementation. None of these calls block on the air interface.
pub trait Radio {
    /// Error reported by the underlying driver
    type Error: Debug;

    /// Applies the PHY configuration and antenna delays
    fn configure(&mut self, config: &RadioConfig) -> Result<(), Self::Error>;

    /// Loads a frame into the transmit buffer
    ///
    /// `frame` includes room for the FCS, which the radio fills in.
    fn write_tx_frame(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Sets the start time for the next [`TxMode::Delayed`] transmission
    fn set_delayed_tx_time(&mut self, time: DelayedTxTime) -> Result<(), Self::Error>;

    /// Starts transmitting the loaded frame
    fn start_tx(&mut self, mode: TxMode) -> Result<TxLaunch, Self::Error>;

    /// Turns the receiver on
    fn enable_rx(&mut self) -> Result<(), Self::Error>;

    /// Reads the current event flags
    fn read_status(&mut self) -> Result<Status, Self::Error>;

    /// Clears the given event flags
    fn clear_status(&mut self, flags: Status) -> Result<(), Self::Error>;

    /// Copies the received frame into `buffer`
    ///
    /// Returns the frame's full length, which may exceed `buffer.len()`; only
    /// as many bytes as fit are copied.
    fn read_rx_frame(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error>;

    /// Reads the timestamp of the last transmitted or received frame
    fn read_timestamp(&mut self, kind: TimestampKind) -> Result<Instant, Self::Error>;

    /// Reads the clock offset measured on the last received frame
    fn read_clock_offset(&mut self) -> Result<ClockOffset, Self::Error>;

    /// Estimated receive power of the last frame, in dBm
    fn read_signal_quality(&mut self) -> Result<Option<f32>, Self::Error> {
        Ok(None)
    }

    /// Aborts any ongoing transmission or reception
    fn force_idle(&mut self) -> Result<(), Self::Error>;
}

/// A frame waiting in the radio's receive buffer
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Received {
    /// Length of the frame, FCS included
    pub len: usize,
    /// When the frame arrived
    pub rx_time: Instant,
}

/// Waits for a received frame
///
/// Returns `WouldBlock` until a frame is ready or the receiver reports an
/// error. In both cases the receiver flags are cleared. The frame is copied to
/// `buffer`.
pub fn poll_rx<R: Radio>(radio: &mut R, buffer: &mut [u8]) -> nb::Result<Received, Error<R::Error>> {
    let status = radio
        .read_status()
        .map_err(|error| nb::Error::Other(Error::Radio(error)))?;

    if !status.contains(Status::RX_FRAME_GOOD) {
        let error = if status.contains(Status::RX_FCS_ERROR) {
            Error::Fcs
        } else if status.contains(Status::RX_PHY_ERROR) {
            Error::Phy
        } else if status.contains(Status::RX_SYNC_LOSS) {
            Error::ReedSolomon
        } else if status.contains(Status::RX_SFD_TIMEOUT) {
            Error::SfdTimeout
        } else if status.contains(Status::RX_TIMEOUT) {
            Error::FrameWaitTimeout
        } else if status.contains(Status::RX_OVERRUN) {
            Error::Overrun
        } else if status.contains(Status::RX_PREAMBLE_TIMEOUT) {
            Error::PreambleDetectionTimeout
        } else {
            // No errors either, the frame just isn't there yet.
            return Err(nb::Error::WouldBlock);
        };

        radio
            .clear_status(Status::RX_ALL)
            .map_err(|error| nb::Error::Other(Error::Radio(error)))?;
        return Err(nb::Error::Other(error));
    }

    let rx_time = radio
        .read_timestamp(TimestampKind::Rx)
        .map_err(|error| nb::Error::Other(Error::Radio(error)))?;

    radio
        .clear_status(Status::RX_ALL)
        .map_err(|error| nb::Error::Other(Error::Radio(error)))?;

    let len = radio
        .read_rx_frame(buffer)
        .map_err(|error| nb::Error::Other(Error::Radio(error)))?;

    if buffer.len() < len {
        return Err(nb::Error::Other(Error::BufferTooSmall { required_len: len }));
    }

    Ok(Received { len, rx_time })
}

/// Waits for the loaded frame to leave the antenna
///
/// Returns the transmission timestamp once the radio reports completion.
pub fn poll_tx<R: Radio>(radio: &mut R) -> nb::Result<Instant, Error<R::Error>> {
    let status = radio
        .read_status()
        .map_err(|error| nb::Error::Other(Error::Radio(error)))?;

    if !status.contains(Status::TX_COMPLETE) {
        return Err(nb::Error::WouldBlock);
    }

    radio
        .clear_status(Status::TX_COMPLETE)
        .map_err(|error| nb::Error::Other(Error::Radio(error)))?;

    radio
        .read_timestamp(TimestampKind::Tx)
        .map_err(|error| nb::Error::Other(Error::Radio(error)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::{encode_poll, POLL_LEN},
        sim::{device_time, SimAnchorRadio, SimClock},
    };

    #[test]
    fn poll_rx_reports_errors_then_frames() {
        let clock = SimClock::new(0);
        let mut radio = SimAnchorRadio::new(clock.clone());
        radio.fail_rx(10, Status::RX_FCS_ERROR);
        radio.deliver(20, &encode_poll(1));
        radio.enable_rx().unwrap();
        let mut buffer = [0; 16];

        assert!(matches!(
            poll_rx(&mut radio, &mut buffer),
            Err(nb::Error::WouldBlock)
        ));

        clock.advance(10);
        assert!(matches!(
            poll_rx(&mut radio, &mut buffer),
            Err(nb::Error::Other(Error::Fcs))
        ));

        radio.enable_rx().unwrap();
        clock.advance(10);
        let received = crate::block!(poll_rx(&mut radio, &mut buffer)).unwrap();

        assert_eq!(received.len, POLL_LEN);
        assert_eq!(received.rx_time, device_time(0, 20));
        assert_eq!(&buffer[..POLL_LEN], &encode_poll(1)[..]);
        assert_eq!(radio.read_status().unwrap(), Status::empty());
    }

    #[test]
    fn poll_rx_rejects_short_buffer() {
        let clock = SimClock::new(0);
        let mut radio = SimAnchorRadio::new(clock);
        radio.deliver(0, &encode_poll(1));
        radio.enable_rx().unwrap();

        assert!(matches!(
            poll_rx(&mut radio, &mut [0; 4]),
            Err(nb::Error::Other(Error::BufferTooSmall {
                required_len: POLL_LEN
            }))
        ));
    }

    #[test]
    fn poll_tx_returns_the_tx_timestamp() {
        let clock = SimClock::new(0);
        let mut radio = SimAnchorRadio::new(clock.clone());
        clock.advance(100);
        radio.write_tx_frame(&encode_poll(1)).unwrap();

        assert_eq!(radio.start_tx(TxMode::Immediate), Ok(TxLaunch::Started));
        let tx_time = crate::block!(poll_tx(&mut radio)).unwrap();

        assert_eq!(
            tx_time,
            DelayedTxTime::round_down(device_time(0, 100)).instant()
        );
        assert!(!radio.read_status().unwrap().contains(Status::TX_COMPLETE));
    }

    #[test]
    fn status_flag_algebra() {
        let status = Status::RX_FRAME_GOOD | Status::TX_COMPLETE;

        assert!(status.contains(Status::TX_COMPLETE));
        assert!(!status.contains(Status::RX_FCS_ERROR));
        assert!(Status::RX_ALL.contains(Status::RX_SFD_TIMEOUT));
        assert!(!Status::RX_ALL.contains(Status::TX_COMPLETE));
        assert_eq!(status.without(Status::TX_COMPLETE), Status::RX_FRAME_GOOD);
        assert!(Status::empty().contains(Status::empty()));
    }
}
