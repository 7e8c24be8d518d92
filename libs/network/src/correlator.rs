//! Command Correlator
//!
//! Tracks commands awaiting a reply, keyed by correlation id. The table is
//! the only mutable state shared between callers and the inbound dispatch
//! path; extraction is an atomic remove, so each id settles at most once.
//!
//! A caller that stops waiting (dropped future, outer timeout, aborted
//! task) takes its entry with it: [`PendingReply`] removes the entry it
//! registered when dropped, so an abandoned id can be reused right away.

use crate::error::{BrokerError, BrokerResult};
use codec::Fields;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome delivered to a waiting caller
pub type CommandReply = BrokerResult<Fields>;

/// One command awaiting its reply
#[derive(Debug)]
pub struct PendingCommand {
    correlation_id: String,
    /// Distinguishes this registration from a later one reusing the id
    token: u64,
    payload_name: String,
    created_at: Instant,
    reply: oneshot::Sender<CommandReply>,
}

impl PendingCommand {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Message type the command was sent as
    pub fn payload_name(&self) -> &str {
        &self.payload_name
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Settle with reply fields; false if the caller stopped waiting
    pub fn resolve(self, fields: Fields) -> bool {
        self.reply.send(Ok(fields)).is_ok()
    }

    /// Settle with an error; false if the caller stopped waiting
    pub fn reject(self, error: BrokerError) -> bool {
        self.reply.send(Err(error)).is_ok()
    }
}

/// Receiving side of one registered command
///
/// Resolves with the reply, or with `Err(RecvError)` if the entry was
/// dropped without being settled. Dropping it before settlement removes
/// the entry from the table.
#[derive(Debug)]
pub struct PendingReply<'a> {
    correlator: &'a CommandCorrelator,
    correlation_id: String,
    token: u64,
    receiver: oneshot::Receiver<CommandReply>,
}

impl PendingReply<'_> {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl Future for PendingReply<'_> {
    type Output = Result<CommandReply, oneshot::error::RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver).poll(cx)
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        let token = self.token;
        let abandoned = self
            .correlator
            .pending
            .remove_if(&self.correlation_id, |_, command| command.token == token);

        if abandoned.is_some() {
            debug!(client_msg_id = %self.correlation_id, "Caller stopped waiting, pending command removed");
        }
    }
}

/// Concurrent table of in-flight commands
#[derive(Debug, Default)]
pub struct CommandCorrelator {
    pending: DashMap<String, PendingCommand>,
    next_token: AtomicU64,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter under `correlation_id`, then run `send`
    ///
    /// The entry exists before any byte leaves, so a reply racing the send
    /// still finds it. A failed or cancelled send removes the entry again.
    pub async fn create<S>(
        &self,
        correlation_id: &str,
        payload_name: &str,
        send: S,
    ) -> BrokerResult<PendingReply<'_>>
    where
        S: Future<Output = BrokerResult<()>>,
    {
        let (reply, receiver) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        match self.pending.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(BrokerError::DuplicateCorrelationId {
                    correlation_id: correlation_id.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingCommand {
                    correlation_id: correlation_id.to_string(),
                    token,
                    payload_name: payload_name.to_string(),
                    created_at: Instant::now(),
                    reply,
                });
            }
        }

        let pending = PendingReply {
            correlator: self,
            correlation_id: correlation_id.to_string(),
            token,
            receiver,
        };

        // Dropping `pending` on failure removes the entry
        send.await?;

        debug!(
            client_msg_id = correlation_id,
            payload_name,
            pending = self.pending.len(),
            "Registered pending command"
        );
        Ok(pending)
    }

    /// Atomically remove and return the waiter for `correlation_id`
    pub fn extract(&self, correlation_id: &str) -> Option<PendingCommand> {
        self.pending.remove(correlation_id).map(|(_, command)| command)
    }

    /// Reject and remove every pending command; returns how many were pending
    pub fn reject_all<F>(&self, make_error: F) -> usize
    where
        F: Fn(&str) -> BrokerError,
    {
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut rejected = 0;

        for id in ids {
            if let Some(command) = self.extract(&id) {
                command.reject(make_error(&id));
                rejected += 1;
            }
        }
        rejected
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
