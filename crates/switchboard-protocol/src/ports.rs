//! Collaborator ports.
//!
//! These traits are the only runtime boundary between the Switchboard core
//! and its external collaborators (LLM provider, contact directory,
//! escalation transport). Traits use `async-trait` for async dyn-dispatch.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conversation::ContactClass;
use crate::error::{ClassifyError, EscalationError, GenerateError};
use crate::ids::SessionId;

/// A loaded prompt configuration for one agent and prompt kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub agent_name: String,
    pub prompt_kind: String,
    pub system_prompt: String,
    pub user_template: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub version: u32,
}

impl PromptTemplate {
    pub fn intent_classification(
        agent_name: impl Into<String>,
        system_prompt: impl Into<String>,
        user_template: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt_kind: "intent_classification".to_owned(),
            system_prompt: system_prompt.into(),
            user_template: user_template.into(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: 1024,
            version: 1,
        }
    }

    /// Substitute `{variable}` placeholders in the user template.
    /// Placeholders with no matching variable are left as-is.
    pub fn render(&self, variables: &IndexMap<String, String>) -> String {
        let mut rendered = self.user_template.clone();
        for (key, value) in variables {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        rendered
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Structured result of a classification call — the raw field map plus token
/// accounting when the provider reports it.
#[derive(Debug, Clone, Default)]
pub struct ClassifierOutput {
    pub fields: Map<String, Value>,
    pub usage: Option<TokenUsage>,
}

impl ClassifierOutput {
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }
}

/// Routing decision surfaced to callers of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub target_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl RoutingDecision {
    /// Build from a classifier field map. `target_agent` is mandatory;
    /// everything else is best-effort.
    pub fn from_output(output: &ClassifierOutput) -> Result<Self, ClassifyError> {
        let target_agent = output
            .str_field("target_agent")
            .ok_or_else(|| {
                ClassifyError::MalformedOutput("missing target_agent field".to_owned())
            })?
            .to_owned();
        Ok(Self {
            target_agent,
            sub_route: output.str_field("sub_route").map(str::to_owned),
            classification: output.str_field("classification").map(str::to_owned),
            reasoning: output.str_field("reasoning").map(str::to_owned),
            confidence: output.f64_field("confidence"),
            session_id: None,
        })
    }
}

/// Intent classification against a loaded prompt template.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        template: &PromptTemplate,
        variables: &IndexMap<String, String>,
    ) -> Result<ClassifierOutput, ClassifyError>;
}

/// Free-form text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerateError>;
}

/// A contact directory row, used for customer-type auto-detection and for
/// finding open conversations under alternate identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ContactClass>,
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Option<Contact>;
    async fn find_by_phone(&self, phone: &str) -> Option<Contact>;
}

/// Request for an urgent call/contact transfer to the on-call number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_contact: String,
    pub to_number: String,
    pub reason: String,
    #[serde(default)]
    pub contact_info: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub status: TransferStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl TransferOutcome {
    pub fn success(message: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            status: TransferStatus::Success,
            message: message.into(),
            message_id: Some(message_id.into()),
            agent: None,
        }
    }

    pub fn error(message: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            status: TransferStatus::Error,
            message: message.into(),
            message_id: None,
            agent: Some(agent.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Success
    }
}

#[async_trait]
pub trait EscalationTransport: Send + Sync {
    async fn transfer_urgent(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, EscalationError>;
}
