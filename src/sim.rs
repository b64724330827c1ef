//! Simulated clock and radios for exercising the state machines
//!
//! The clock moves forward a fixed step on every read, and by the requested
//! time on every delay, so loops that wait on it terminate without sleeping.
//! Device time is derived from host time, 63897.6 ticks per microsecond.

use std::{cell::Cell, rc::Rc, vec::Vec};

use crate::{
    configs::RadioConfig,
    frame::{self, Classified, ResponseFrame, ANCHOR_ID_IDX},
    radio::{Radio, Status, TimestampKind, TxLaunch, TxMode},
    slot::{self, AnchorId, DelayedTxTime, TimeBase},
    time::{Duration, Instant, DEVICE_TIME_UNIT_S, SPEED_OF_LIGHT_M_S},
    tof::ClockOffset,
};

/// Host clock shared between a test and the state machine under test
#[derive(Clone, Debug)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
    step_us: u64,
}

impl SimClock {
    /// A clock at zero that advances `step_us` on every read
    pub fn new(step_us: u64) -> Self {
        SimClock {
            now: Rc::new(Cell::new(0)),
            step_us,
        }
    }

    /// Current time, without advancing
    pub fn peek(&self) -> u64 {
        self.now.get()
    }

    /// Moves the clock forward by `us`
    pub fn advance(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }
}

impl crate::time::Clock for SimClock {
    fn now_us(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step_us);
        now
    }
}

/// A delay that moves a [`SimClock`] forward instead of sleeping
///
/// Usable as both the blocking and the async delay, so the same test bodies
/// run with and without the `async` feature.
#[derive(Clone, Debug)]
pub struct SimDelay {
    clock: SimClock,
}

impl SimDelay {
    pub fn new(clock: &SimClock) -> Self {
        SimDelay {
            clock: clock.clone(),
        }
    }
}

impl embedded_hal::delay::DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.clock.advance(u64::from(ns).div_ceil(1000));
    }

    fn delay_us(&mut self, us: u32) {
        self.clock.advance(u64::from(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(u64::from(ms) * 1000);
    }
}

impl embedded_hal_async::delay::DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.clock.advance(u64::from(ns).div_ceil(1000));
    }

    async fn delay_us(&mut self, us: u32) {
        self.clock.advance(u64::from(us));
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(u64::from(ms) * 1000);
    }
}

/// Device time at host time `us`, on a counter that started at `origin`
pub fn device_time(origin: u64, us: u64) -> Instant {
    Instant::wrapping(origin.wrapping_add((us * 638_976 + 5) / 10))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SimError;

/// Something arriving at a receiver
#[derive(Clone, Debug)]
pub enum AirEvent {
    Frame {
        bytes: Vec<u8>,
        rx_time: Instant,
        clock_offset: ClockOffset,
    },
    Error(Status),
}

#[derive(Clone, Debug)]
struct Pending {
    at_us: u64,
    event: AirEvent,
}

/// Queue of arrivals, delivered while the receiver is on
#[derive(Debug, Default)]
struct Receiver {
    pending: Vec<Pending>,
    enabled: bool,
    current: Option<(Vec<u8>, Instant, ClockOffset)>,
    enables: u32,
}

impl Receiver {
    fn schedule(&mut self, at_us: u64, event: AirEvent) {
        let idx = self.pending.partition_point(|p| p.at_us <= at_us);
        self.pending.insert(idx, Pending { at_us, event });
    }

    fn enable(&mut self, now: u64) {
        // Whatever arrived while the receiver was off is lost.
        self.pending.retain(|p| p.at_us >= now);
        self.enabled = true;
        self.enables += 1;
    }

    fn poll(&mut self, now: u64, status: &mut Status) {
        if !self.enabled || status.0 & Status::RX_ALL.0 != 0 {
            return;
        }
        if self.pending.first().map_or(true, |p| p.at_us > now) {
            return;
        }

        let arrival = self.pending.remove(0);
        self.enabled = false;
        match arrival.event {
            AirEvent::Frame {
                bytes,
                rx_time,
                clock_offset,
            } => {
                *status = status.union(Status::RX_FRAME_GOOD);
                self.current = Some((bytes, rx_time, clock_offset));
            }
            AirEvent::Error(flags) => *status = status.union(flags),
        }
    }

    fn read(&self, buffer: &mut [u8]) -> usize {
        match &self.current {
            Some((bytes, _, _)) => {
                let n = bytes.len().min(buffer.len());
                buffer[..n].copy_from_slice(&bytes[..n]);
                bytes.len()
            }
            None => 0,
        }
    }
}

/// An anchor as the tag's radio perceives it
#[derive(Clone, Copy, Debug)]
pub struct SimAnchor {
    /// Raw identity written into responses, valid or not
    pub id: u8,
    pub distance_m: f64,
    /// The anchor's clock offset as the tag measures it
    pub clock_offset: ClockOffset,
    pub reply_delay_us: u32,
    /// Added to the poll's sequence number in the response
    pub sequence_skew: u8,
    /// Start of the anchor's own device time counter
    pub device_origin: u64,
}

impl SimAnchor {
    /// An anchor replying in the slot of the default configuration
    pub fn new(id: u8, distance_m: f64) -> Self {
        SimAnchor {
            id,
            distance_m,
            clock_offset: ClockOffset::ZERO,
            reply_delay_us: slot::slot_delay_us(id, 800, 1500).unwrap_or(800),
            sequence_skew: 0,
            device_origin: 0x12_3456_7890 + u64::from(id) * 0x100_0000,
        }
    }
}

/// The tag's radio, with anchors answering every poll
#[derive(Debug)]
pub struct SimTagRadio {
    clock: SimClock,
    pub anchors: Vec<SimAnchor>,
    /// Arrivals after every poll, relative to its transmission
    pub interference: Vec<(u32, AirEvent)>,
    pub tx_never_completes: bool,
    /// Answer every start with [`TxLaunch::TooLate`]
    pub refuse_tx: bool,
    pub configured: Option<RadioConfig>,
    pub polls_sent: Vec<u8>,
    pub idled: u32,
    status: Status,
    tx_frame: Vec<u8>,
    last_tx: Instant,
    rx: Receiver,
}

impl SimTagRadio {
    pub fn new(clock: SimClock, anchors: Vec<SimAnchor>) -> Self {
        SimTagRadio {
            clock,
            anchors,
            interference: Vec::new(),
            tx_never_completes: false,
            refuse_tx: false,
            configured: None,
            polls_sent: Vec::new(),
            idled: 0,
            status: Status::empty(),
            tx_frame: Vec::new(),
            last_tx: Instant::wrapping(0),
            rx: Receiver::default(),
        }
    }

    /// How often the receiver was switched on
    pub fn rx_enables(&self) -> u32 {
        self.rx.enables
    }

    fn answer_poll(&mut self, sequence_number: u8, now: u64) {
        let poll_tx = self.last_tx;

        for anchor in self.anchors.clone() {
            let tof_ticks = anchor.distance_m / SPEED_OF_LIGHT_M_S / DEVICE_TIME_UNIT_S;

            let poll_rx = device_time(anchor.device_origin, now);
            let deadline =
                slot::to_device_deadline(poll_rx, anchor.reply_delay_us, TimeBase::Micros);
            let resp_tx = deadline.tx_timestamp(crate::configs::DEFAULT_ANTENNA_DELAY);

            let anchor_turnaround = resp_tx.duration_since(poll_rx).value() as f64;
            let turnaround = anchor_turnaround * (1.0 - anchor.clock_offset.ratio());
            let flight = Duration::new((2.0 * tof_ticks + turnaround).round() as u64).unwrap();
            let resp_rx = poll_tx + flight;

            let mut bytes = ResponseFrame {
                sequence_number: sequence_number.wrapping_add(anchor.sequence_skew),
                poll_rx_timestamp: poll_rx.lo32(),
                response_tx_timestamp: resp_tx.lo32(),
                anchor: AnchorId::new(anchor.id).ok(),
            }
            .to_bytes();
            bytes[ANCHOR_ID_IDX] = anchor.id;

            self.rx.schedule(
                now + u64::from(anchor.reply_delay_us),
                AirEvent::Frame {
                    bytes: bytes.to_vec(),
                    rx_time: resp_rx,
                    clock_offset: anchor.clock_offset,
                },
            );
        }

        for (offset_us, event) in self.interference.clone() {
            self.rx.schedule(now + u64::from(offset_us), event);
        }
    }
}

impl Radio for SimTagRadio {
    type Error = SimError;

    fn configure(&mut self, config: &RadioConfig) -> Result<(), SimError> {
        self.configured = Some(*config);
        Ok(())
    }

    fn write_tx_frame(&mut self, frame: &[u8]) -> Result<(), SimError> {
        self.tx_frame = frame.to_vec();
        Ok(())
    }

    fn set_delayed_tx_time(&mut self, _time: DelayedTxTime) -> Result<(), SimError> {
        Ok(())
    }

    fn start_tx(&mut self, mode: TxMode) -> Result<TxLaunch, SimError> {
        if self.refuse_tx {
            return Ok(TxLaunch::TooLate);
        }

        let now = self.clock.peek();
        self.last_tx = device_time(0, now);

        if !self.tx_never_completes {
            self.status = self.status.union(Status::TX_COMPLETE);
        }
        if mode == TxMode::ResponseExpected {
            self.rx.enable(now);
        }
        if let Classified::Poll(poll) = frame::classify(&self.tx_frame) {
            self.polls_sent.push(poll.sequence_number);
            if !self.tx_never_completes {
                self.answer_poll(poll.sequence_number, now);
            }
        }

        Ok(TxLaunch::Started)
    }

    fn enable_rx(&mut self) -> Result<(), SimError> {
        self.rx.enable(self.clock.peek());
        Ok(())
    }

    fn read_status(&mut self) -> Result<Status, SimError> {
        self.rx.poll(self.clock.peek(), &mut self.status);
        Ok(self.status)
    }

    fn clear_status(&mut self, flags: Status) -> Result<(), SimError> {
        self.status = self.status.without(flags);
        Ok(())
    }

    fn read_rx_frame(&mut self, buffer: &mut [u8]) -> Result<usize, SimError> {
        Ok(self.rx.read(buffer))
    }

    fn read_timestamp(&mut self, kind: TimestampKind) -> Result<Instant, SimError> {
        Ok(match kind {
            TimestampKind::Tx => self.last_tx,
            TimestampKind::Rx => self
                .rx
                .current
                .as_ref()
                .map_or(Instant::wrapping(0), |(_, rx_time, _)| *rx_time),
        })
    }

    fn read_clock_offset(&mut self) -> Result<ClockOffset, SimError> {
        Ok(self
            .rx
            .current
            .as_ref()
            .map_or(ClockOffset::ZERO, |(_, _, offset)| *offset))
    }

    fn read_signal_quality(&mut self) -> Result<Option<f32>, SimError> {
        Ok(Some(-78.5))
    }

    fn force_idle(&mut self) -> Result<(), SimError> {
        self.idled += 1;
        self.rx.enabled = false;
        Ok(())
    }
}

/// A transmission that actually went on air
#[derive(Clone, Debug, PartialEq)]
pub struct Transmission {
    pub frame: Vec<u8>,
    pub deadline: DelayedTxTime,
}

/// An anchor's radio, fed with scripted arrivals
#[derive(Debug)]
pub struct SimAnchorRadio {
    clock: SimClock,
    pub device_origin: u64,
    pub tx_never_completes: bool,
    pub transmitted: Vec<Transmission>,
    pub late_starts: u32,
    status: Status,
    tx_frame: Vec<u8>,
    delayed: Option<DelayedTxTime>,
    scheduled: Option<Transmission>,
    tx_antenna_delay: u16,
    last_tx: Instant,
    rx: Receiver,
}

impl SimAnchorRadio {
    pub fn new(clock: SimClock) -> Self {
        SimAnchorRadio {
            clock,
            device_origin: 0,
            tx_never_completes: false,
            transmitted: Vec::new(),
            late_starts: 0,
            status: Status::empty(),
            tx_frame: Vec::new(),
            delayed: None,
            scheduled: None,
            tx_antenna_delay: 0,
            last_tx: Instant::wrapping(0),
            rx: Receiver::default(),
        }
    }

    /// Delivers `bytes` at host time `at_us`, timestamped accordingly
    pub fn deliver(&mut self, at_us: u64, bytes: &[u8]) {
        let rx_time = self.device_now_at(at_us);
        self.rx.schedule(
            at_us,
            AirEvent::Frame {
                bytes: bytes.to_vec(),
                rx_time,
                clock_offset: ClockOffset::ZERO,
            },
        );
    }

    /// Raises receiver error `flags` at host time `at_us`
    pub fn fail_rx(&mut self, at_us: u64, flags: Status) {
        self.rx.schedule(at_us, AirEvent::Error(flags));
    }

    fn device_now_at(&self, us: u64) -> Instant {
        device_time(self.device_origin, us)
    }
}

impl Radio for SimAnchorRadio {
    type Error = SimError;

    fn configure(&mut self, config: &RadioConfig) -> Result<(), SimError> {
        self.tx_antenna_delay = config.tx_antenna_delay;
        Ok(())
    }

    fn write_tx_frame(&mut self, frame: &[u8]) -> Result<(), SimError> {
        self.tx_frame = frame.to_vec();
        Ok(())
    }

    fn set_delayed_tx_time(&mut self, time: DelayedTxTime) -> Result<(), SimError> {
        self.delayed = Some(time);
        Ok(())
    }

    fn start_tx(&mut self, mode: TxMode) -> Result<TxLaunch, SimError> {
        let device_now = self.device_now_at(self.clock.peek());
        self.rx.enabled = false;

        let deadline = match mode {
            TxMode::Delayed => self.delayed.ok_or(SimError)?,
            TxMode::Immediate | TxMode::ResponseExpected => DelayedTxTime::round_down(device_now),
        };

        if mode == TxMode::Delayed && !deadline.instant().is_after(device_now) {
            self.late_starts += 1;
            return Ok(TxLaunch::TooLate);
        }

        self.scheduled = Some(Transmission {
            frame: self.tx_frame.clone(),
            deadline,
        });
        Ok(TxLaunch::Started)
    }

    fn enable_rx(&mut self) -> Result<(), SimError> {
        self.rx.enable(self.clock.peek());
        Ok(())
    }

    fn read_status(&mut self) -> Result<Status, SimError> {
        let now = self.clock.peek();

        if !self.tx_never_completes {
            let device_now = self.device_now_at(now);
            let due = self
                .scheduled
                .as_ref()
                .map_or(false, |tx| !tx.deadline.instant().is_after(device_now));
            if due {
                if let Some(tx) = self.scheduled.take() {
                    self.last_tx = tx.deadline.tx_timestamp(self.tx_antenna_delay);
                    self.transmitted.push(tx);
                    self.status = self.status.union(Status::TX_COMPLETE);
                }
            }
        }

        self.rx.poll(now, &mut self.status);
        Ok(self.status)
    }

    fn clear_status(&mut self, flags: Status) -> Result<(), SimError> {
        self.status = self.status.without(flags);
        Ok(())
    }

    fn read_rx_frame(&mut self, buffer: &mut [u8]) -> Result<usize, SimError> {
        Ok(self.rx.read(buffer))
    }

    fn read_timestamp(&mut self, kind: TimestampKind) -> Result<Instant, SimError> {
        Ok(match kind {
            TimestampKind::Tx => self.last_tx,
            TimestampKind::Rx => self
                .rx
                .current
                .as_ref()
                .map_or(Instant::wrapping(0), |(_, rx_time, _)| *rx_time),
        })
    }

    fn read_clock_offset(&mut self) -> Result<ClockOffset, SimError> {
        Ok(ClockOffset::ZERO)
    }

    fn force_idle(&mut self) -> Result<(), SimError> {
        self.scheduled = None;
        self.rx.enabled = false;
        Ok(())
    }
}

/// Routes `log` output through the test harness
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
