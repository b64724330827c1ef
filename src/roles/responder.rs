#[cfg(feature = "defmt")]
use defmt::Format;

use super::Timeout;
use crate::{
    configs::RangingConfig,
    frame::{self, Classified, ResponseFrame, MAX_FRAME_LEN, RESPONSE_LEN},
    hal_type,
    maybe_async_attr,
    radio::{self, Radio, TxLaunch, TxMode},
    slot::{AnchorId, DelayedTxTime, SlotPlan},
    time::{Clock, Instant},
    Error,
};

/// Where the responder is in its cycle
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ResponderState {
    /// Receiver on, waiting for a poll
    Listening,
    /// A response is scheduled for this anchor's slot
    Responding,
}

/// Why a response did not go out
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum MissedSlotReason {
    /// The slot had already started when the transmission was scheduled
    DeadlinePassed,
    /// The radio never confirmed the transmission
    TxNotConfirmed,
}

/// What came of one pass through the listen and respond cycle
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum ResponderOutcome {
    /// A response went out in this anchor's slot
    Responded {
        /// Sequence number of the poll answered
        sequence_number: u8,
        /// When the response was scheduled to start
        deadline: DelayedTxTime,
    },
    /// A poll was heard but not answered
    MissedSlot {
        /// Sequence number of the poll
        sequence_number: u8,
        /// What went wrong
        reason: MissedSlotReason,
    },
    /// No poll arrived before the listen timeout
    Idle,
}

/// Running totals since the responder was created
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResponderStatistics {
    /// Polls received
    pub polls_heard: u32,
    /// Responses confirmed sent
    pub responses_sent: u32,
    /// Polls that went unanswered
    pub missed_slots: u32,
    /// Receive errors recovered from
    pub rx_errors: u32,
}

/// The anchor side of the exchange
///
/// Answers every poll it hears, once, in the slot its identity assigns it.
pub struct Responder<R, C> {
    radio: R,
    clock: C,
    id: AnchorId,
    config: RangingConfig,
    plan: SlotPlan,
    state: ResponderState,
    statistics: ResponderStatistics,
}

impl<R, C> Responder<R, C>
where
    R: Radio,
    C: Clock,
{
    /// Validates `config`, configures the radio and starts listening
    pub fn new(
        mut radio: R,
        clock: C,
        id: AnchorId,
        config: RangingConfig,
    ) -> Result<Self, Error<R::Error>> {
        config.validate()?;
        let plan = config.slot_plan()?;

        radio.configure(&config.radio).map_err(Error::Radio)?;
        radio.enable_rx().map_err(Error::Radio)?;

        twr_info!(
            "anchor {}: replying {} us after each poll",
            id.get(),
            plan.delay_us(id)
        );

        Ok(Responder {
            radio,
            clock,
            id,
            config,
            plan,
            state: ResponderState::Listening,
            statistics: ResponderStatistics::default(),
        })
    }

    /// Listens for a poll and answers it
    ///
    /// Returns after one poll was handled, or after `listen_timeout_us`
    /// without one. Frames other than polls are ignored. A response that
    /// cannot make its slot is dropped rather than sent late.
    #[maybe_async_attr]
    pub async fn respond_once<D>(&mut self, delay: &mut D) -> Result<ResponderOutcome, Error<R::Error>>
    where
        D: hal_type::delay::DelayNs,
    {
        let result = self.listen_and_respond(delay).await;

        self.state = ResponderState::Listening;
        let rearm = self.radio.enable_rx().map_err(Error::Radio);

        let outcome = result?;
        rearm?;
        Ok(outcome)
    }

    #[maybe_async_attr]
    async fn listen_and_respond<D>(&mut self, delay: &mut D) -> Result<ResponderOutcome, Error<R::Error>>
    where
        D: hal_type::delay::DelayNs,
    {
        let listen = Timeout::start(&self.clock, self.config.listen_timeout_us);
        let mut buffer = [0u8; MAX_FRAME_LEN];

        while !listen.expired(&self.clock) {
            match radio::poll_rx(&mut self.radio, &mut buffer) {
                Ok(received) => {
                    if let Classified::Poll(poll) = frame::classify(&buffer[..received.len]) {
                        self.statistics.polls_heard += 1;
                        return self
                            .respond(poll.sequence_number, received.rx_time, delay)
                            .await;
                    }
                    twr_trace!("anchor {}: ignoring frame", self.id.get());
                }
                Err(nb::Error::WouldBlock) => {
                    delay.delay_us(self.config.rx_poll_period_us).await;
                    continue;
                }
                Err(nb::Error::Other(error))
                    if error.is_transient() || matches!(error, Error::BufferTooSmall { .. }) =>
                {
                    self.statistics.rx_errors += 1;
                    twr_debug!("anchor {}: receive error, re-arming", self.id.get());
                }
                Err(nb::Error::Other(error)) => return Err(error),
            }

            self.radio.enable_rx().map_err(Error::Radio)?;
        }

        Ok(ResponderOutcome::Idle)
    }

    #[maybe_async_attr]
    async fn respond<D>(
        &mut self,
        sequence_number: u8,
        poll_rx: Instant,
        delay: &mut D,
    ) -> Result<ResponderOutcome, Error<R::Error>>
    where
        D: hal_type::delay::DelayNs,
    {
        self.state = ResponderState::Responding;

        let deadline = self.plan.deadline(self.id, poll_rx);
        let resp_tx = deadline.tx_timestamp(self.config.radio.tx_antenna_delay);

        let mut response = [0u8; RESPONSE_LEN];
        ResponseFrame {
            sequence_number,
            poll_rx_timestamp: poll_rx.lo32(),
            response_tx_timestamp: resp_tx.lo32(),
            anchor: Some(self.id),
        }
        .encode_into(&mut response)?;

        self.radio.write_tx_frame(&response).map_err(Error::Radio)?;
        self.radio
            .set_delayed_tx_time(deadline)
            .map_err(Error::Radio)?;

        match self.radio.start_tx(TxMode::Delayed).map_err(Error::Radio)? {
            TxLaunch::Started => {}
            TxLaunch::TooLate => {
                return Ok(self.missed(sequence_number, MissedSlotReason::DeadlinePassed));
            }
        }

        // The wait covers the slot delay itself on top of the radio's margin.
        let timeout_us = self
            .plan
            .delay_us(self.id)
            .saturating_add(self.config.tx_timeout_us);

        let confirmed = super::wait_tx(
            &mut self.radio,
            &self.clock,
            delay,
            timeout_us,
            self.config.rx_poll_period_us,
        )
        .await?;

        match confirmed {
            Some(_) => {
                self.statistics.responses_sent += 1;
                twr_trace!("anchor {}: answered poll {}", self.id.get(), sequence_number);
                Ok(ResponderOutcome::Responded {
                    sequence_number,
                    deadline,
                })
            }
            None => {
                self.radio.force_idle().map_err(Error::Radio)?;
                Ok(self.missed(sequence_number, MissedSlotReason::TxNotConfirmed))
            }
        }
    }

    fn missed(&mut self, sequence_number: u8, reason: MissedSlotReason) -> ResponderOutcome {
        self.statistics.missed_slots += 1;
        twr_warn!(
            "anchor {}: missed slot for poll {}, {:?}",
            self.id.get(),
            sequence_number,
            reason
        );
        ResponderOutcome::MissedSlot {
            sequence_number,
            reason,
        }
    }

    /// This anchor's identity
    pub fn id(&self) -> AnchorId {
        self.id
    }

    /// Where the responder is in its cycle
    pub fn state(&self) -> ResponderState {
        self.state
    }

    /// Running totals
    pub fn statistics(&self) -> &ResponderStatistics {
        &self.statistics
    }

    /// The configuration in use
    pub fn config(&self) -> &RangingConfig {
        &self.config
    }

    /// Gives back the radio
    pub fn release(self) -> R {
        self.radio
    }
}
