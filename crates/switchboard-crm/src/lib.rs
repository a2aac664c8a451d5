//! # switchboard-crm — stub CRM collaborators
//!
//! Concrete [`ContactDirectory`] and [`EscalationTransport`] implementations
//! backed by local data, used for customer-type auto-detection and urgent
//! transfer until a real CRM integration is plugged in.
//!
//! [`ContactDirectory`]: switchboard_protocol::ContactDirectory
//! [`EscalationTransport`]: switchboard_protocol::EscalationTransport

mod directory;
mod escalation;

pub use directory::{JsonContactDirectory, normalize_phone};
pub use escalation::RecordingEscalation;
