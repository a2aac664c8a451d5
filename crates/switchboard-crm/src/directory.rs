//! JSON-seeded contact directory.
//!
//! Stands in for the real CRM export. Email matching is case-insensitive;
//! phone matching compares normalized digits so `(305) 555-1234` and
//! `+13055551234` resolve to the same contact.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use switchboard_protocol::{Contact, ContactDirectory};
use tokio::fs;
use tracing::info;

/// Digits only; leading country code `1` dropped from 11-digit numbers.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_owned()
    } else {
        digits
    }
}

pub struct JsonContactDirectory {
    contacts: RwLock<Vec<Contact>>,
}

impl JsonContactDirectory {
    pub fn new(contacts: Vec<Contact>) -> Self {
        Self {
            contacts: RwLock::new(contacts),
        }
    }

    /// Load a JSON array of contacts from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed reading contacts file {path:?}"))?;
        let contacts: Vec<Contact> = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing contacts file {path:?}"))?;
        info!(contacts = contacts.len(), path = %path.display(), "contact directory loaded");
        Ok(Self::new(contacts))
    }

    pub fn len(&self) -> usize {
        self.contacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.read().is_empty()
    }
}

#[async_trait]
impl ContactDirectory for JsonContactDirectory {
    async fn find_by_email(&self, email: &str) -> Option<Contact> {
        let wanted = email.trim().to_ascii_lowercase();
        self.contacts
            .read()
            .iter()
            .find(|contact| {
                contact
                    .email
                    .as_deref()
                    .is_some_and(|e| e.to_ascii_lowercase() == wanted)
            })
            .cloned()
    }

    async fn find_by_phone(&self, phone: &str) -> Option<Contact> {
        let wanted = normalize_phone(phone);
        if wanted.is_empty() {
            return None;
        }
        self.contacts
            .read()
            .iter()
            .find(|contact| {
                contact
                    .phone
                    .as_deref()
                    .is_some_and(|p| normalize_phone(p) == wanted)
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use switchboard_protocol::ContactClass;
    use tokio::fs;

    use super::*;

    fn seed() -> Vec<Contact> {
        vec![
            Contact {
                id: "c-1".to_owned(),
                name: Some("Jane Smith".to_owned()),
                email: Some("Jane@Example.com".to_owned()),
                phone: Some("(305) 555-1234".to_owned()),
                classification: Some(ContactClass::Client),
            },
            Contact {
                id: "c-2".to_owned(),
                name: Some("Vern Dor".to_owned()),
                email: Some("vern@supplies.example".to_owned()),
                phone: None,
                classification: Some(ContactClass::Vendor),
            },
        ]
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let directory = JsonContactDirectory::new(seed());
        let contact = directory.find_by_email("jane@example.COM").await.unwrap();
        assert_eq!(contact.id, "c-1");
        assert!(directory.find_by_email("nobody@example.com").await.is_none());
    }

    #[tokio::test]
    async fn phone_lookup_matches_across_formats() {
        let directory = JsonContactDirectory::new(seed());
        for variant in ["+13055551234", "305-555-1234", "3055551234"] {
            let contact = directory.find_by_phone(variant).await.unwrap();
            assert_eq!(contact.id, "c-1", "variant {variant} should match");
        }
        assert!(directory.find_by_phone("3055559999").await.is_none());
        assert!(directory.find_by_phone("not a number").await.is_none());
    }

    #[tokio::test]
    async fn load_reads_a_json_seed_file() -> Result<()> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path: PathBuf = std::env::temp_dir().join(format!("switchboard-contacts-{nanos}.json"));
        fs::write(&path, serde_json::to_string_pretty(&seed())?).await?;

        let directory = JsonContactDirectory::load(&path).await?;
        assert_eq!(directory.len(), 2);
        assert!(directory.find_by_email("vern@supplies.example").await.is_some());

        let _ = fs::remove_file(path).await;
        Ok(())
    }
}
