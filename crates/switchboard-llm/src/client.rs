//! The opaque model boundary and the port adapters built on it.
//!
//! [`ModelClient`] is the only thing a concrete provider has to implement.
//! [`LlmClassifier`] and [`LlmGenerator`] adapt it to the protocol's
//! `Classifier`/`TextGenerator` ports, applying prompt assembly and the
//! output repair chain.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use switchboard_protocol::{
    Classifier, ClassifierOutput, ClassifyError, GenerateError, PromptTemplate, TextGenerator,
    TokenUsage,
};
use tracing::{debug, instrument};

use crate::repair::parse_with_repair;

#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// One completion call against a concrete provider.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<ModelReply, GenerateError>;
}

/// A client that always returns the same reply. Useful for demos and tests;
/// real deployments plug a provider-backed client in instead.
#[derive(Debug, Clone)]
pub struct CannedModelClient {
    reply: String,
}

impl CannedModelClient {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ModelClient for CannedModelClient {
    async fn complete(
        &self,
        _model: &str,
        prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<ModelReply, GenerateError> {
        Ok(ModelReply {
            text: self.reply.clone(),
            usage: Some(TokenUsage {
                prompt_tokens: prompt.len() as u64 / 4,
                completion_tokens: self.reply.len() as u64 / 4,
                total_tokens: (prompt.len() + self.reply.len()) as u64 / 4,
            }),
        })
    }
}

const JSON_INSTRUCTION: &str = "\n\nIMPORTANT: Return ONLY the JSON object with no additional \
                                text, explanations, or markdown formatting.";

/// Intent classification over a [`ModelClient`].
#[derive(Clone)]
pub struct LlmClassifier {
    client: Arc<dyn ModelClient>,
}

impl LlmClassifier {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    #[instrument(
        skip_all,
        fields(agent = %template.agent_name, model = %template.model, variables = variables.len())
    )]
    async fn classify(
        &self,
        template: &PromptTemplate,
        variables: &IndexMap<String, String>,
    ) -> Result<ClassifierOutput, ClassifyError> {
        let user_prompt = template.render(variables);
        let full_prompt = format!(
            "{}\n\n{}{}",
            template.system_prompt, user_prompt, JSON_INSTRUCTION
        );

        let reply = self
            .client
            .complete(
                &template.model,
                &full_prompt,
                template.temperature,
                template.max_tokens,
            )
            .await
            .map_err(|error| ClassifyError::Failed(error.to_string()))?;

        if reply.text.trim().is_empty() {
            return Err(ClassifyError::Failed("model returned an empty reply".to_owned()));
        }

        let parsed = parse_with_repair(&reply.text)?;
        let Value::Object(fields) = parsed else {
            return Err(ClassifyError::MalformedOutput(
                "expected a JSON object".to_owned(),
            ));
        };
        debug!(fields = fields.len(), "classification parsed");

        Ok(ClassifierOutput {
            fields,
            usage: reply.usage,
        })
    }
}

/// Free-form generation over a [`ModelClient`] with a fixed model choice.
#[derive(Clone)]
pub struct LlmGenerator {
    client: Arc<dyn ModelClient>,
    model: String,
}

impl LlmGenerator {
    pub fn new(client: Arc<dyn ModelClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for LlmGenerator {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerateError> {
        let reply = self
            .client
            .complete(&self.model, prompt, temperature, max_tokens)
            .await?;
        Ok(reply.text.trim().to_owned())
    }
}
