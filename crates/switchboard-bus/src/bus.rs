//! Per-agent mailbox delivery.
//!
//! Each registered agent owns one FIFO mailbox. Targeted sends enqueue onto
//! the named mailbox; broadcasts enqueue an independent copy onto every
//! mailbox except the sender's. Delivery order is FIFO per mailbox; no
//! ordering is guaranteed across mailboxes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use switchboard_protocol::{BusError, Message};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, instrument};

#[derive(Debug, Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl Mailbox {
    fn push(&self, message: Message) {
        self.queue.lock().push_back(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }
}

/// Message bus for agent communication. Cheap to clone; all clones share the
/// same mailbox table.
#[derive(Clone, Default)]
pub struct MessageBus {
    mailboxes: Arc<RwLock<HashMap<String, Arc<Mailbox>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently create a mailbox for `agent_name`.
    pub fn register_agent(&self, agent_name: impl Into<String>) {
        self.mailboxes
            .write()
            .entry(agent_name.into())
            .or_insert_with(|| Arc::new(Mailbox::default()));
    }

    /// Remove the mailbox; any messages still queued for the agent are
    /// discarded.
    pub fn unregister_agent(&self, agent_name: &str) {
        if let Some(mailbox) = self.mailboxes.write().remove(agent_name) {
            let discarded = mailbox.queue.lock().len();
            if discarded > 0 {
                debug!(agent = agent_name, discarded, "dropped queued messages on unregister");
            }
        }
    }

    pub fn is_registered(&self, agent_name: &str) -> bool {
        self.mailboxes.read().contains_key(agent_name)
    }

    /// Deliver a message. Targeted sends fail with [`BusError::UnknownAgent`]
    /// when no mailbox exists for the recipient; broadcasts reach every
    /// registered agent except the sender.
    #[instrument(skip(self, message), fields(from = %message.from_agent, to = ?message.to_agent, kind = ?message.kind))]
    pub fn send(&self, message: Message) -> Result<(), BusError> {
        match message.to_agent.clone() {
            Some(target) => {
                let mailbox = self
                    .mailboxes
                    .read()
                    .get(&target)
                    .cloned()
                    .ok_or(BusError::UnknownAgent(target))?;
                mailbox.push(message);
            }
            None => {
                let recipients: Vec<Arc<Mailbox>> = {
                    let mailboxes = self.mailboxes.read();
                    mailboxes
                        .iter()
                        .filter(|(name, _)| **name != message.from_agent)
                        .map(|(_, mailbox)| mailbox.clone())
                        .collect()
                };
                debug!(recipients = recipients.len(), "broadcasting");
                for mailbox in recipients {
                    mailbox.push(message.clone());
                }
            }
        }
        Ok(())
    }

    /// Dequeue the oldest pending message for `agent_name`, waiting up to
    /// `timeout` for one to arrive. Returns `Ok(None)` on timeout.
    pub async fn receive(
        &self,
        agent_name: &str,
        timeout: Duration,
    ) -> Result<Option<Message>, BusError> {
        let mailbox = self.mailbox(agent_name)?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = mailbox.pop() {
                return Ok(Some(message));
            }
            let notified = mailbox.notify.notified();
            // A send may have landed between the failed pop and registering
            // the waiter; re-check before suspending.
            if let Some(message) = mailbox.pop() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Non-blocking peek: does the agent have anything queued?
    pub fn has_pending(&self, agent_name: &str) -> bool {
        self.mailboxes
            .read()
            .get(agent_name)
            .is_some_and(|mailbox| !mailbox.queue.lock().is_empty())
    }

    fn mailbox(&self, agent_name: &str) -> Result<Arc<Mailbox>, BusError> {
        self.mailboxes
            .read()
            .get(agent_name)
            .cloned()
            .ok_or_else(|| BusError::UnknownAgent(agent_name.to_owned()))
    }
}
