//! Time-related types based on the DW3000's system time
//!
//! Device time is a free-running 40-bit counter ticking at 499.2 MHz × 128.
//! Host time (the clock the control loops use to bound their waits) is a
//! separate, injected [`Clock`] counting microseconds.

use core::ops::{Add, Sub};

#[cfg(feature = "defmt")]
use defmt::Format;

/// The maximum value of 40-bit system time stamps.
pub const TIME_MAX: u64 = 0xffffffffff;

/// Period of one device time unit in seconds, 1 / (499.2 MHz × 128)
pub const DEVICE_TIME_UNIT_S: f64 = 1.0 / (499.2e6 * 128.0);

/// Group velocity of the UWB signal in air, in metres per second
pub const SPEED_OF_LIGHT_M_S: f64 = 299_702_547.0;

/// Device ticks in one UWB microsecond (512 / 499.2 MHz)
pub const TICKS_PER_UWB_MICRO: u64 = 65_536;

/// Represents an instant in time
///
/// Internally uses the same 40-bit timestamps that the DW3000 uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Instant(u64);

impl Instant {
    /// Creates a new instance of `Instant`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use dw3000_twr::time::{
    ///     TIME_MAX,
    ///     Instant,
    /// };
    ///
    /// let valid_instant   = Instant::new(TIME_MAX);
    /// let invalid_instant = Instant::new(TIME_MAX + 1);
    ///
    /// assert!(valid_instant.is_some());
    /// assert!(invalid_instant.is_none());
    /// ```
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Instant(value))
        } else {
            None
        }
    }

    /// Creates an `Instant` from any 64-bit value, discarding the bits above
    /// the 40-bit counter width
    pub fn wrapping(value: u64) -> Self {
        Instant(value & TIME_MAX)
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the low 32 bits, the width timestamps travel with in frames
    pub fn lo32(&self) -> u32 {
        self.0 as u32
    }

    /// Returns the amount of time passed between the two `Instant`s
    ///
    /// Assumes that `&self` represents a later time than the argument
    /// `earlier`. Please make sure that this is the case, as this method has no
    /// way of knowing (DW3000 timestamps can overflow, so comparing the
    /// numerical value of the timestamp doesn't tell anything about order).
    ///
    /// # Example
    ///
    /// ``` rust
    /// use dw3000_twr::time::{
    ///     TIME_MAX,
    ///     Instant,
    /// };
    ///
    /// let instant_1 = Instant::new(TIME_MAX - 50).unwrap();
    /// let instant_2 = Instant::new(TIME_MAX).unwrap();
    /// let instant_3 = Instant::new(49).unwrap();
    ///
    /// let duration = instant_2.duration_since(instant_1);
    /// assert_eq!(duration.value(), 50);
    ///
    /// // Still works if the later timestamp wrapped around.
    /// let duration = instant_3.duration_since(instant_2);
    /// assert_eq!(duration.value(), 50);
    /// ```
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.wrapping_sub(earlier.0) & TIME_MAX)
    }

    /// Whether `self` lies after `other`, within half the counter period
    ///
    /// This is the same test the radio applies to decide whether a delayed
    /// transmission is still in the future.
    pub fn is_after(&self, other: Instant) -> bool {
        let diff = self.duration_since(other).value();
        diff != 0 && diff <= TIME_MAX / 2
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        // Both operands hold 40-bit numbers, so the sum fits in a `u64`.
        Instant((self.0 + rhs.0) & TIME_MAX)
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Self::Output {
        Instant(self.0.wrapping_sub(rhs.0) & TIME_MAX)
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Self::Output {
        self.duration_since(rhs)
    }
}

/// A duration between two instants in DW3000 system time
///
/// Internally uses the same 40-bit timestamps that the DW3000 uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Duration(u64);

impl Duration {
    /// Creates a new instance of `Duration`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Duration(value))
        } else {
            None
        }
    }

    /// Creates an instance of `Duration` from a number of nanoseconds, rounding to the nearest
    ///
    /// One nanosecond is 63.8976 device time units. We do this with fixed
    /// point arithmetic, where (dividend + (divisor / 2)) / divisor
    pub fn from_nanos(nanos: u32) -> Self {
        // At most 32 bits times a 20-bit factor, which fits in 40 bits.
        Duration((nanos as u64 * 638976 + 5000) / 10000)
    }

    /// Creates an instance of `Duration` from a number of microseconds, rounding to the nearest
    ///
    /// ``` rust
    /// use dw3000_twr::time::Duration;
    ///
    /// assert_eq!(Duration::from_micros(1).value(), 63898);
    /// assert_eq!(Duration::from_micros(1000).value(), 63_897_600);
    /// ```
    pub fn from_micros(micros: u32) -> Self {
        // 2^32 µs is roughly 71 minutes, which is more than the 17 minute
        // counter period, so mask the result back into range.
        Duration(((micros as u64 * 638976 + 5) / 10) & TIME_MAX)
    }

    /// Creates an instance of `Duration` from a number of UWB microseconds
    ///
    /// A UWB microsecond is 512 / 499.2 MHz, exactly 65536 device time units.
    pub fn from_uwb_micros(uwb_micros: u32) -> Self {
        Duration((uwb_micros as u64 * TICKS_PER_UWB_MICRO) & TIME_MAX)
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Converts the duration to seconds
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 * DEVICE_TIME_UNIT_S
    }
}

impl From<u16> for Duration {
    /// Antenna delays and other register-sized tick counts
    fn from(ticks: u16) -> Self {
        Duration(u64::from(ticks))
    }
}

/// Source of monotonic host time
///
/// The control loops never spin on the radio without an upper bound; every
/// wait is measured against this clock. Implement it on top of whatever timer
/// the target offers, or use [`StdClock`] on hosted platforms.
pub trait Clock {
    /// Microseconds since an arbitrary, fixed origin
    fn now_us(&self) -> u64;

    /// Microseconds elapsed since `since_us`
    fn elapsed_us(&self, since_us: u64) -> u64 {
        self.now_us().saturating_sub(since_us)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// A [`Clock`] backed by `std::time::Instant`
#[cfg(feature = "std")]
#[derive(Clone, Copy, Debug)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Starts a clock whose origin is now
    pub fn new() -> Self {
        StdClock {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_add_duration() {
        let instant = Instant::new(0).unwrap();
        let duration = Duration::new(1).unwrap();

        let result = instant + duration;

        assert_eq!(result.value(), 1);
    }

    #[test]
    fn instant_add_duration_wraps() {
        let instant = Instant::new(TIME_MAX).unwrap();
        let duration = Duration::new(2).unwrap();

        assert_eq!((instant + duration).value(), 1);
    }

    #[test]
    fn instant_sub_duration_wraps() {
        let instant = Instant::new(1).unwrap();
        let duration = Duration::new(2).unwrap();

        assert_eq!((instant - duration).value(), TIME_MAX);
    }

    #[test]
    fn instant_sub_instant() {
        let instant_1 = Instant::new(1).unwrap();
        let instant_2 = Instant::new(TIME_MAX).unwrap();

        assert_eq!((instant_1 - instant_2).value(), 2);
    }

    #[test]
    fn lo32_truncates() {
        let instant = Instant::new(0xAB_1234_5678).unwrap();

        assert_eq!(instant.lo32(), 0x1234_5678);
    }

    #[test]
    fn is_after_handles_wraparound() {
        let late = Instant::new(10).unwrap();
        let early = Instant::new(TIME_MAX - 10).unwrap();

        assert!(late.is_after(early));
        assert!(!early.is_after(late));
        assert!(!late.is_after(late));
    }

    #[test]
    fn duration_from_nanos() {
        assert_eq!(Duration::from_nanos(1).value(), 64);
        assert_eq!(Duration::from_nanos(6).value(), 383);
    }

    #[test]
    fn duration_from_uwb_micros() {
        assert_eq!(Duration::from_uwb_micros(2).value(), 131_072);
    }

    #[test]
    fn device_unit_is_about_15_65_ps() {
        assert!((DEVICE_TIME_UNIT_S - 15.65e-12).abs() < 0.01e-12);
    }
}
