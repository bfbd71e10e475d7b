use crate::core::errors::HubError;
use crate::hub::protocol::ProtocolMessage;
use serde_json::Value;
use std::collections::HashMap;
use std::future::poll_fn;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::time::{delay_queue, DelayQueue};

/// Receives the outcome of one invocation: the acknowledged result, or why it failed
pub type InvocationReply = oneshot::Sender<Result<Option<Value>, HubError>>;

struct PendingInvocation {
    reply: InvocationReply,
    deadline: delay_queue::Key,
}

/// Correlates client calls with their acknowledgements
///
/// Ids are sequential within one connection epoch. Every pending entry has
/// exactly one waiter and is settled once: by its acknowledgement, by its
/// deadline, or by [`InvocationTracker::reject_all`] on teardown.
pub struct InvocationTracker {
    next_id: u64,
    timeout: Duration,
    pending: HashMap<String, PendingInvocation>,
    deadlines: DelayQueue<String>,
}

impl InvocationTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: 0,
            timeout,
            pending: HashMap::new(),
            deadlines: DelayQueue::new(),
        }
    }

    /// Allocate the next invocation id of the current epoch
    pub fn next_id(&mut self) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        id
    }

    /// Start the deadline for an invocation that has been sent
    pub fn register(&mut self, id: String, reply: InvocationReply) {
        let deadline = self.deadlines.insert(id.clone(), self.timeout);
        if let Some(previous) = self.pending.insert(id, PendingInvocation { reply, deadline }) {
            // Only reachable if ids were reused without a reset
            self.deadlines.remove(&previous.deadline);
            let _ = previous.reply.send(Err(HubError::ConnectionDestroyed));
        }
    }

    /// Settle the invocation acknowledged by `message`
    ///
    /// Returns false when no pending invocation matches, e.g. a late
    /// acknowledgement after the deadline fired.
    pub fn complete(&mut self, message: &ProtocolMessage) -> bool {
        let Some(id) = message.invocation_id.as_deref() else {
            return false;
        };
        let Some(pending) = self.pending.remove(id) else {
            return false;
        };
        self.deadlines.remove(&pending.deadline);

        let outcome = match &message.error {
            Some(error) => Err(HubError::InvocationFailed {
                id: id.to_string(),
                message: error.clone(),
            }),
            None => Ok(message.result.clone()),
        };
        let _ = pending.reply.send(outcome);
        true
    }

    /// Wait for the next deadline, reject its invocation and return its id
    ///
    /// Resolves to `None` right away when nothing is pending. Cancel safe.
    pub async fn expired(&mut self) -> Option<String> {
        let expired = poll_fn(|cx| self.deadlines.poll_expired(cx)).await?;
        let id = expired.into_inner();

        if let Some(pending) = self.pending.remove(&id) {
            let _ = pending
                .reply
                .send(Err(HubError::InvocationTimeout(id.clone())));
        }
        Some(id)
    }

    /// Reject every pending invocation with `error`
    pub fn reject_all(&mut self, error: &HubError) {
        self.deadlines.clear();
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(error.clone()));
        }
    }

    /// Begin a new epoch: ids restart at zero
    pub fn reset(&mut self) {
        self.reject_all(&HubError::ConnectionDestroyed);
        self.next_id = 0;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
