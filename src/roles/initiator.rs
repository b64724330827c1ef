use core::num::Wrapping;

#[cfg(feature = "defmt")]
use defmt::Format;

use super::Timeout;
use crate::{
    configs::RangingConfig,
    frame::{self, Classified, ResponseFrame, MAX_FRAME_LEN},
    hal_type,
    maybe_async_attr,
    radio::{self, Radio, TxLaunch, TxMode},
    slot::SlotPlan,
    time::{Clock, Instant},
    tof::{self, RangeMeasurement, RoundTrip},
    Error,
};

/// Where the initiator is in its cycle
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum InitiatorState {
    /// Waiting for the next poll interval
    Idle,
    /// Sending the poll
    Polling,
    /// Receiving responses until the window closes
    Collecting,
}

/// The poll an initiator is currently collecting responses for
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct RangingSession {
    /// Sequence number of the poll
    pub sequence_number: u8,
    /// When the poll left the antenna, in local device time
    pub poll_tx: Instant,
    /// The collection window
    pub window: Timeout,
}

/// Why a received response was not used
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum MalformedReason {
    /// The response answers a different poll
    StaleSequence {
        /// Sequence number of the current poll
        expected: u8,
        /// Sequence number the response carried
        received: u8,
    },
    /// This anchor already answered the current poll
    Duplicate,
    /// The frame did not fit the receive buffer
    Oversized {
        /// Length the radio reported
        len: usize,
    },
}

/// What came of one received frame, or of a whole window
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum RangeOutcome {
    /// A distance within the plausibility bounds
    Measured(RangeMeasurement),
    /// A distance outside the plausibility bounds; not reported as a range
    Implausible(RangeMeasurement),
    /// A response that could not be used
    MalformedFrame {
        /// The anchor named in the frame, if any
        anchor: Option<crate::slot::AnchorId>,
        /// What was wrong with it
        reason: MalformedReason,
    },
    /// The window closed without a single measurement
    Timeout {
        /// Sequence number of the unanswered poll
        sequence_number: u8,
    },
}

/// Counts for one poll cycle
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CycleSummary {
    /// Sequence number of the poll
    pub sequence_number: u8,
    /// Plausible measurements
    pub measurements: u8,
    /// Measurements discarded as implausible
    pub implausible: u8,
    /// Responses that could not be used
    pub malformed: u8,
    /// Receive errors recovered from
    pub rx_errors: u8,
    /// Host time spent collecting, in microseconds
    pub collection_us: u64,
}

/// Running totals since the initiator was created
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InitiatorStatistics {
    /// Polls sent
    pub polls_sent: u32,
    /// Plausible measurements
    pub measurements: u32,
    /// Measurements discarded as implausible
    pub implausible: u32,
    /// Responses that could not be used
    pub malformed: u32,
    /// Receive errors recovered from
    pub rx_errors: u32,
    /// Windows that closed without a measurement
    pub empty_windows: u32,
}

/// The tag side of the exchange
///
/// Owns the radio for its whole lifetime. Drive it by calling
/// [`Initiator::run_cycle`] in a loop; every received frame and every empty
/// window is reported through the callback.
pub struct Initiator<R, C> {
    radio: R,
    clock: C,
    config: RangingConfig,
    plan: SlotPlan,
    seq: Wrapping<u8>,
    state: InitiatorState,
    statistics: InitiatorStatistics,
}

impl<R, C> Initiator<R, C>
where
    R: Radio,
    C: Clock,
{
    /// Validates `config` and configures the radio
    pub fn new(mut radio: R, clock: C, config: RangingConfig) -> Result<Self, Error<R::Error>> {
        config.validate()?;
        let plan = config.slot_plan()?;

        radio.configure(&config.radio).map_err(Error::Radio)?;

        twr_info!(
            "initiator: {} us window covers {} anchor slots",
            config.collection_window_us,
            plan.anchors_within(config.collection_window_us)
        );

        Ok(Initiator {
            radio,
            clock,
            config,
            plan,
            seq: Wrapping(0),
            state: InitiatorState::Idle,
            statistics: InitiatorStatistics::default(),
        })
    }

    /// Waits out the poll interval, then runs one poll and collection window
    #[maybe_async_attr]
    pub async fn run_cycle<D, F>(
        &mut self,
        delay: &mut D,
        on_outcome: F,
    ) -> Result<CycleSummary, Error<R::Error>>
    where
        D: hal_type::delay::DelayNs,
        F: FnMut(RangeOutcome),
    {
        self.state = InitiatorState::Idle;
        delay.delay_ms(self.config.poll_interval_ms).await;

        self.poll_and_collect(delay, on_outcome).await
    }

    /// Broadcasts a poll and collects responses until the window closes
    ///
    /// Returns once the window is over, whether or not anything answered.
    /// Errors are reserved for the radio itself failing; receive errors and
    /// unusable frames only show up in the summary and the statistics.
    #[maybe_async_attr]
    pub async fn poll_and_collect<D, F>(
        &mut self,
        delay: &mut D,
        mut on_outcome: F,
    ) -> Result<CycleSummary, Error<R::Error>>
    where
        D: hal_type::delay::DelayNs,
        F: FnMut(RangeOutcome),
    {
        let session = match self.send_poll(delay).await {
            Ok(session) => session,
            Err(error) => {
                self.abort();
                return Err(error);
            }
        };

        match self.collect(&session, delay, &mut on_outcome).await {
            Ok(summary) => {
                self.state = InitiatorState::Idle;
                Ok(summary)
            }
            Err(error) => {
                self.abort();
                Err(error)
            }
        }
    }

    #[maybe_async_attr]
    async fn send_poll<D>(&mut self, delay: &mut D) -> Result<RangingSession, Error<R::Error>>
    where
        D: hal_type::delay::DelayNs,
    {
        self.state = InitiatorState::Polling;

        let sequence_number = self.seq.0;
        self.seq += Wrapping(1);

        self.radio
            .write_tx_frame(&frame::encode_poll(sequence_number))
            .map_err(Error::Radio)?;

        match self
            .radio
            .start_tx(TxMode::ResponseExpected)
            .map_err(Error::Radio)?
        {
            TxLaunch::Started => {}
            TxLaunch::TooLate => {
                twr_error!("poll {}: radio refused an immediate start", sequence_number);
                return Err(Error::TxRejected);
            }
        }

        let poll_tx = super::wait_tx(
            &mut self.radio,
            &self.clock,
            delay,
            self.config.tx_timeout_us,
            self.config.rx_poll_period_us,
        )
        .await?
        .ok_or(Error::TxTimeout)?;

        self.statistics.polls_sent += 1;
        self.state = InitiatorState::Collecting;

        twr_trace!("poll {} sent", sequence_number);

        Ok(RangingSession {
            sequence_number,
            poll_tx,
            window: Timeout::start(&self.clock, self.config.collection_window_us),
        })
    }

    #[maybe_async_attr]
    async fn collect<D, F>(
        &mut self,
        session: &RangingSession,
        delay: &mut D,
        on_outcome: &mut F,
    ) -> Result<CycleSummary, Error<R::Error>>
    where
        D: hal_type::delay::DelayNs,
        F: FnMut(RangeOutcome),
    {
        let mut summary = CycleSummary {
            sequence_number: session.sequence_number,
            ..CycleSummary::default()
        };
        // One bit per anchor identity
        let mut answered: u32 = 0;
        let mut buffer = [0u8; MAX_FRAME_LEN];

        while !session.window.expired(&self.clock) {
            match radio::poll_rx(&mut self.radio, &mut buffer) {
                Ok(received) => {
                    let outcome = self.evaluate(
                        session,
                        &buffer[..received.len],
                        received.rx_time,
                        &mut answered,
                    )?;
                    if let Some(outcome) = outcome {
                        self.record(&outcome, &mut summary);
                        on_outcome(outcome);
                    }
                }
                Err(nb::Error::WouldBlock) => {
                    delay.delay_us(self.config.rx_poll_period_us).await;
                    continue;
                }
                Err(nb::Error::Other(Error::BufferTooSmall { required_len })) => {
                    let outcome = RangeOutcome::MalformedFrame {
                        anchor: None,
                        reason: MalformedReason::Oversized { len: required_len },
                    };
                    self.record(&outcome, &mut summary);
                    on_outcome(outcome);
                }
                Err(nb::Error::Other(error)) if error.is_transient() => {
                    self.statistics.rx_errors += 1;
                    summary.rx_errors = summary.rx_errors.saturating_add(1);
                    twr_debug!(
                        "poll {}: receive error, re-arming",
                        session.sequence_number
                    );
                }
                Err(nb::Error::Other(error)) => return Err(error),
            }

            // The receiver turns off after every frame or error.
            self.radio.enable_rx().map_err(Error::Radio)?;
        }

        self.radio.force_idle().map_err(Error::Radio)?;
        summary.collection_us = self.clock.elapsed_us(session.window.started_at_us());

        if summary.measurements == 0 {
            self.statistics.empty_windows += 1;
            twr_info!("poll {}: no responses", session.sequence_number);
            on_outcome(RangeOutcome::Timeout {
                sequence_number: session.sequence_number,
            });
        }

        Ok(summary)
    }

    fn evaluate(
        &mut self,
        session: &RangingSession,
        bytes: &[u8],
        resp_rx: Instant,
        answered: &mut u32,
    ) -> Result<Option<RangeOutcome>, Error<R::Error>> {
        let response = match frame::classify(bytes) {
            Classified::Response(response) => response,
            // Other tags' polls and foreign traffic
            Classified::Poll(_) | Classified::Unrecognized => return Ok(None),
        };

        if let Some(reason) = Self::reject(session, &response, answered) {
            return Ok(Some(RangeOutcome::MalformedFrame {
                anchor: response.anchor,
                reason,
            }));
        }

        let clock_offset = self.radio.read_clock_offset().map_err(Error::Radio)?;
        let signal_quality_dbm = self.radio.read_signal_quality().map_err(Error::Radio)?;

        let round_trip = RoundTrip::new(
            session.poll_tx.lo32(),
            resp_rx.lo32(),
            response.poll_rx_timestamp,
            response.response_tx_timestamp,
        );
        let clock_offset_ratio = clock_offset.ratio();

        let measurement = RangeMeasurement {
            anchor: response.anchor,
            sequence_number: response.sequence_number,
            distance_m: round_trip.distance_m(clock_offset_ratio),
            round_trip,
            clock_offset_ratio,
            computed_at_us: self.clock.now_us(),
            signal_quality_dbm,
        };

        if tof::is_plausible(
            measurement.distance_m,
            self.config.plausible_min_m,
            self.config.plausible_max_m,
        ) {
            Ok(Some(RangeOutcome::Measured(measurement)))
        } else {
            Ok(Some(RangeOutcome::Implausible(measurement)))
        }
    }

    fn reject(
        session: &RangingSession,
        response: &ResponseFrame,
        answered: &mut u32,
    ) -> Option<MalformedReason> {
        if response.sequence_number != session.sequence_number {
            return Some(MalformedReason::StaleSequence {
                expected: session.sequence_number,
                received: response.sequence_number,
            });
        }

        if let Some(anchor) = response.anchor {
            let bit = 1 << anchor.slot_index();
            if *answered & bit != 0 {
                return Some(MalformedReason::Duplicate);
            }
            *answered |= bit;
        }

        None
    }

    fn record(&mut self, outcome: &RangeOutcome, summary: &mut CycleSummary) {
        match outcome {
            RangeOutcome::Measured(measurement) => {
                self.statistics.measurements += 1;
                summary.measurements = summary.measurements.saturating_add(1);
                twr_debug!(
                    "anchor {:?}: {} m",
                    measurement.anchor,
                    measurement.distance_m
                );
            }
            RangeOutcome::Implausible(measurement) => {
                self.statistics.implausible += 1;
                summary.implausible = summary.implausible.saturating_add(1);
                twr_warn!(
                    "anchor {:?}: implausible distance {} m",
                    measurement.anchor,
                    measurement.distance_m
                );
            }
            RangeOutcome::MalformedFrame { anchor, reason } => {
                self.statistics.malformed += 1;
                summary.malformed = summary.malformed.saturating_add(1);
                twr_debug!("anchor {:?}: dropped response, {:?}", anchor, reason);
            }
            RangeOutcome::Timeout { .. } => {}
        }
    }

    /// Leaves the radio idle after a failed cycle
    fn abort(&mut self) {
        // The original error is the one worth reporting.
        let _ = self.radio.force_idle();
        self.state = InitiatorState::Idle;
    }

    /// Where the initiator is in its cycle
    pub fn state(&self) -> InitiatorState {
        self.state
    }

    /// Running totals
    pub fn statistics(&self) -> &InitiatorStatistics {
        &self.statistics
    }

    /// The configuration in use
    pub fn config(&self) -> &RangingConfig {
        &self.config
    }

    /// The slot plan the anchors are expected to follow
    pub fn slot_plan(&self) -> &SlotPlan {
        &self.plan
    }

    /// Sequence number the next poll will carry
    pub fn next_sequence_number(&self) -> u8 {
        self.seq.0
    }

    /// Gives back the radio
    pub fn release(self) -> R {
        self.radio
    }
}
