//! Reservation Consumer Scheduler.
//!
//! A scheduled window is a background task that waits for its begin time,
//! attaches to the reservation queue and applies every drained message to
//! the durable store with [`DurableStore::choose_item`]. At the end time it
//! stops receiving and drops its subscription; a message already taken off
//! the queue is still applied.
//!
//! The window has no cancellation handle. Its lifetime is bounded by the
//! wall clock only.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use neighborly_core::broker::{MessageBroker, MessageStream};
use neighborly_core::durable::DurableStore;
use neighborly_core::environment::Clock;
use neighborly_core::error::BrokerError;
use neighborly_core::model::{ChooseOutcome, ReservationMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Counts of what one window drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowReport {
    /// Reservations recorded
    pub applied: usize,
    /// Redeliveries of reservations already recorded
    pub duplicates: usize,
    /// Reservations rejected for lack of durable stock
    pub exhausted: usize,
    /// Payloads that were not reservation messages
    pub malformed: usize,
    /// Messages lost to receive or store errors
    pub failed: usize,
}

impl WindowReport {
    /// Messages taken off the queue.
    #[must_use]
    pub const fn drained(&self) -> usize {
        self.applied + self.duplicates + self.exhausted + self.malformed + self.failed
    }
}

/// A running or finished consumer window.
#[derive(Debug)]
pub struct ConsumerWindow {
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    handle: JoinHandle<Result<WindowReport>>,
}

impl ConsumerWindow {
    /// Scheduled start.
    #[must_use]
    pub const fn begin(&self) -> DateTime<Utc> {
        self.begin
    }

    /// Scheduled end.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether the window has closed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the window to close.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BrokerUnavailable`] if the queue could not be
    /// attached or the window task died.
    pub async fn join(self) -> Result<WindowReport> {
        self.handle.await.map_err(|e| {
            EngineError::BrokerUnavailable(BrokerError::TransportError(format!(
                "consumer window task failed: {e}"
            )))
        })?
    }
}

/// Launches time-bounded reservation consumers.
pub struct ReservationScheduler<D> {
    durable: Arc<D>,
    broker: Arc<dyn MessageBroker>,
    clock: Arc<dyn Clock>,
    queue: String,
}

impl<D> Clone for ReservationScheduler<D> {
    fn clone(&self) -> Self {
        Self {
            durable: Arc::clone(&self.durable),
            broker: Arc::clone(&self.broker),
            clock: Arc::clone(&self.clock),
            queue: self.queue.clone(),
        }
    }
}

impl<D: DurableStore + 'static> ReservationScheduler<D> {
    /// Creates a scheduler draining `queue`.
    #[must_use]
    pub fn new(
        durable: Arc<D>,
        broker: Arc<dyn MessageBroker>,
        clock: Arc<dyn Clock>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            durable,
            broker,
            clock,
            queue: queue.into(),
        }
    }

    /// Starts a window draining the queue from `begin` until `end`.
    ///
    /// A `begin` in the past starts draining immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWindow`] if `end` is not after the
    /// current time, or `begin` is not before `end`.
    pub fn schedule(&self, begin: DateTime<Utc>, end: DateTime<Utc>) -> Result<ConsumerWindow> {
        let now = self.clock.now();
        let invalid = |reason: &str| EngineError::InvalidWindow {
            begin,
            end,
            reason: reason.to_string(),
        };

        if end <= now {
            return Err(invalid("end is not in the future"));
        }
        if begin == end {
            return Err(invalid("window is empty"));
        }
        if begin > end {
            return Err(invalid("begin is after end"));
        }

        let until = |at: DateTime<Utc>| (at - now).to_std().unwrap_or(Duration::ZERO);
        let started = Instant::now();
        let open_at = started + until(begin);
        let close_at = started + until(end);

        tracing::info!(queue = %self.queue, %begin, %end, "Reservation consumer window scheduled");

        let scheduler = self.clone();
        let handle = tokio::spawn(async move { scheduler.run(open_at, close_at).await });

        Ok(ConsumerWindow { begin, end, handle })
    }

    async fn run(self, open_at: Instant, close_at: Instant) -> Result<WindowReport> {
        let mut report = WindowReport::default();
        tokio::time::sleep_until(open_at).await;

        let closing = tokio::time::sleep_until(close_at);
        tokio::pin!(closing);

        let mut stream = tokio::select! {
            biased;
            () = &mut closing => return Ok(report),
            attached = self.attach() => attached?,
        };

        metrics::counter!("consumer.windows").increment(1);
        tracing::info!(queue = %self.queue, "Reservation consumer window open");

        loop {
            tokio::select! {
                biased;
                () = &mut closing => break,
                next = stream.next() => match next {
                    Some(Ok(payload)) => self.apply(&payload, &mut report).await,
                    Some(Err(e)) => {
                        report.failed += 1;
                        metrics::counter!("consumer.messages", "outcome" => "failed").increment(1);
                        tracing::error!(queue = %self.queue, error = %e, "Failed to receive reservation message");
                    }
                    None => {
                        tracing::warn!(queue = %self.queue, "Reservation stream ended before the window closed");
                        break;
                    }
                },
            }
        }

        drop(stream);
        tracing::info!(
            queue = %self.queue,
            applied = report.applied,
            duplicates = report.duplicates,
            exhausted = report.exhausted,
            malformed = report.malformed,
            failed = report.failed,
            "Reservation consumer window closed"
        );
        Ok(report)
    }

    async fn attach(&self) -> Result<MessageStream> {
        self.broker.declare_queue(&self.queue).await?;
        Ok(self.broker.subscribe(&self.queue).await?)
    }

    async fn apply(&self, payload: &str, report: &mut WindowReport) {
        let message = match ReservationMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                report.malformed += 1;
                metrics::counter!("consumer.messages", "outcome" => "malformed").increment(1);
                tracing::warn!(error = %e, "Dropping malformed reservation message");
                return;
            }
        };

        let outcome = match self.durable.choose_item(message.actor, message.item).await {
            Ok(ChooseOutcome::Recorded) => {
                report.applied += 1;
                tracing::debug!(item = %message.item, user = %message.actor, "Reservation recorded");
                "applied"
            }
            Ok(ChooseOutcome::Duplicate) => {
                report.duplicates += 1;
                tracing::debug!(item = %message.item, user = %message.actor, "Reservation already recorded");
                "duplicate"
            }
            Ok(ChooseOutcome::Exhausted) => {
                report.exhausted += 1;
                tracing::warn!(item = %message.item, user = %message.actor, "No durable stock for cached reservation");
                "exhausted"
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    item = %message.item,
                    user = %message.actor,
                    error = %e,
                    "Failed to record reservation"
                );
                "failed"
            }
        };
        metrics::counter!("consumer.messages", "outcome" => outcome).increment(1);
    }
}
