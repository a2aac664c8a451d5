//! TTL-bounded, session-keyed contact-info cache.
//!
//! Remembers harvested contact identifiers between requests in the same
//! session, and the "waiting for contact info" marker when a customer has
//! been asked to provide one. Single-writer-per-key discipline via the
//! table lock; entries expire on read.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use switchboard_protocol::SessionId;

#[derive(Debug, Clone, Default)]
pub struct CachedContact {
    pub from_email: Option<String>,
    pub from_phone: Option<String>,
    /// Set when we have asked the customer for contact info and are holding
    /// their original message until it arrives.
    pub waiting_for_contact_info: bool,
    pub original_message: Option<String>,
}

pub struct ContactCache {
    ttl: Duration,
    entries: Mutex<HashMap<SessionId, (CachedContact, Instant)>>,
}

impl ContactCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<CachedContact> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(session_id) {
            Some((_, stored_at)) => stored_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            entries.remove(session_id);
            return None;
        }
        entries.get(session_id).map(|(contact, _)| contact.clone())
    }

    /// Cache harvested identifiers. A pending "waiting for contact info"
    /// entry is preserved, not clobbered.
    pub fn store_contact(
        &self,
        session_id: &SessionId,
        email: Option<&str>,
        phone: Option<&str>,
    ) {
        let mut entries = self.entries.lock();
        if let Some((existing, stored_at)) = entries.get(session_id)
            && existing.waiting_for_contact_info
            && stored_at.elapsed() <= self.ttl
        {
            return;
        }
        entries.insert(
            session_id.clone(),
            (
                CachedContact {
                    from_email: email.map(str::to_owned),
                    from_phone: phone.map(str::to_owned),
                    waiting_for_contact_info: false,
                    original_message: None,
                },
                Instant::now(),
            ),
        );
    }

    /// Hold the customer's original message while we wait for them to send
    /// contact info.
    pub fn store_pending(&self, session_id: &SessionId, original_message: &str) {
        self.entries.lock().insert(
            session_id.clone(),
            (
                CachedContact {
                    from_email: None,
                    from_phone: None,
                    waiting_for_contact_info: true,
                    original_message: Some(original_message.to_owned()),
                },
                Instant::now(),
            ),
        );
    }

    pub fn remove(&self, session_id: &SessionId) {
        self.entries.lock().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
