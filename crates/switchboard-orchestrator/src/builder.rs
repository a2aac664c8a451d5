//! Wiring facade for a Switchboard deployment.
//!
//! The builder owns construction order: bus and registry first, then the
//! file-backed repository and manager, then the orchestrator and resume
//! service on top. Collaborator handles are injected; nothing is global.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use switchboard_agent::{AgentConfig, AgentHandler, AgentRuntime};
use switchboard_bus::{AgentRegistry, MessageBus};
use switchboard_protocol::{
    Classifier, ContactDirectory, EscalationTransport, PromptTemplate, TextGenerator,
};
use switchboard_state::{ConversationStateManager, FileStateRepository, ResumeService};

use crate::orchestrator::{ConversationOrchestrator, OrchestratorConfig};

pub struct SwitchboardBuilder {
    root: PathBuf,
    intent_prompt: Option<PromptTemplate>,
    classifier: Option<Arc<dyn Classifier>>,
    generator: Option<Arc<dyn TextGenerator>>,
    directory: Option<Arc<dyn ContactDirectory>>,
    escalation: Option<Arc<dyn EscalationTransport>>,
    config: OrchestratorConfig,
    agent_config: AgentConfig,
}

impl SwitchboardBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            intent_prompt: None,
            classifier: None,
            generator: None,
            directory: None,
            escalation: None,
            config: OrchestratorConfig::default(),
            agent_config: AgentConfig::default(),
        }
    }

    pub fn intent_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.intent_prompt = Some(prompt);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn ContactDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn escalation(mut self, escalation: Arc<dyn EscalationTransport>) -> Self {
        self.escalation = Some(escalation);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn agent_config(mut self, agent_config: AgentConfig) -> Self {
        self.agent_config = agent_config;
        self
    }

    pub fn build(self) -> Result<Switchboard> {
        let classifier = self.classifier.context("a classifier is required")?;
        let directory = self.directory.context("a contact directory is required")?;
        let intent_prompt = self
            .intent_prompt
            .context("an intent classification prompt is required")?;

        let bus = MessageBus::new();
        let registry = AgentRegistry::new();
        let repository = Arc::new(FileStateRepository::new(self.root.join("state")));
        let manager = ConversationStateManager::new(repository);
        let resume = ResumeService::new(manager.clone());
        let orchestrator = ConversationOrchestrator::new(
            bus.clone(),
            registry.clone(),
            manager.clone(),
            classifier.clone(),
            directory,
            intent_prompt,
            self.config,
        );

        Ok(Switchboard {
            bus,
            registry,
            manager,
            orchestrator,
            resume,
            classifier,
            generator: self.generator,
            escalation: self.escalation,
            agent_config: self.agent_config,
        })
    }
}

/// A fully wired deployment.
pub struct Switchboard {
    pub bus: MessageBus,
    pub registry: AgentRegistry,
    pub manager: ConversationStateManager,
    pub orchestrator: ConversationOrchestrator,
    pub resume: ResumeService,
    classifier: Arc<dyn Classifier>,
    generator: Option<Arc<dyn TextGenerator>>,
    escalation: Option<Arc<dyn EscalationTransport>>,
    agent_config: AgentConfig,
}

impl std::fmt::Debug for Switchboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switchboard").finish_non_exhaustive()
    }
}

impl Switchboard {
    /// Wrap a role handler in an [`AgentRuntime`] sharing this deployment's
    /// bus, registry, state manager, and collaborators.
    pub fn agent(&self, handler: Arc<dyn AgentHandler>) -> AgentRuntime {
        let mut runtime = AgentRuntime::new(handler, self.bus.clone(), self.registry.clone())
            .with_config(self.agent_config.clone())
            .with_state_manager(self.manager.clone())
            .with_classifier(self.classifier.clone());
        if let Some(generator) = &self.generator {
            runtime = runtime.with_generator(generator.clone());
        }
        if let Some(escalation) = &self.escalation {
            runtime = runtime.with_escalation(escalation.clone());
        }
        runtime
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;
    use switchboard_crm::{JsonContactDirectory, RecordingEscalation};
    use switchboard_llm::{CannedModelClient, LlmClassifier, LlmGenerator};
    use switchboard_protocol::{Message, MessageKind};
    use tokio::fs;

    use super::*;
    use crate::orchestrator::EmailRoute;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    struct BillingHandler;

    #[async_trait]
    impl AgentHandler for BillingHandler {
        fn name(&self) -> &str {
            "billing"
        }

        fn agent_type(&self) -> &str {
            "worker"
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["invoice_lookup".to_owned()]
        }

        async fn handle_message(
            &self,
            agent: &AgentRuntime,
            message: Message,
        ) -> anyhow::Result<()> {
            if message.kind == MessageKind::Request {
                let response = Message::to(
                    MessageKind::Response,
                    agent.name(),
                    &message.from_agent,
                    json!({"status": "ok"}),
                )
                .with_correlation(message.id);
                agent.send(response)?;
            } else if message.payload.get("explode").is_some() {
                bail!("unsupported payload");
            }
            Ok(())
        }
    }

    fn builder(root: &PathBuf) -> SwitchboardBuilder {
        let client = Arc::new(CannedModelClient::new(
            r#"{"target_agent": "billing", "sub_route": "invoice", "confidence": 0.8}"#,
        ));
        SwitchboardBuilder::new(root)
            .classifier(Arc::new(LlmClassifier::new(client.clone())))
            .generator(Arc::new(LlmGenerator::new(client, "gemini-2.0-flash")))
            .directory(Arc::new(JsonContactDirectory::new(vec![])))
            .escalation(Arc::new(RecordingEscalation::new()))
            .intent_prompt(PromptTemplate::intent_classification(
                "orchestrator",
                "route",
                "{body}",
                "gemini-2.0-flash",
            ))
    }

    #[tokio::test]
    async fn build_requires_a_classifier() {
        let root = unique_test_root("switchboard-builder-missing");
        let err = SwitchboardBuilder::new(&root)
            .directory(Arc::new(JsonContactDirectory::new(vec![])))
            .intent_prompt(PromptTemplate::intent_classification(
                "orchestrator",
                "route",
                "{body}",
                "gemini-2.0-flash",
            ))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("classifier"));
    }

    #[tokio::test]
    async fn built_deployment_routes_and_runs_agents() -> Result<()> {
        let root = unique_test_root("switchboard-builder-e2e");
        let switchboard = builder(&root).build()?;

        let billing = switchboard.agent(Arc::new(BillingHandler));
        switchboard.orchestrator.register_agent(billing);
        switchboard.orchestrator.start_all().await?;

        let greetings = switchboard
            .orchestrator
            .listen_for_greetings(Duration::from_millis(300))
            .await;
        assert_eq!(greetings.len(), 1);
        assert_eq!(greetings[0].from_agent, "billing");

        let decision = switchboard
            .orchestrator
            .route_email(
                EmailRoute::new("jane@example.com", "support@x", "Invoice", "Is it paid?")
                    .email_id("gmail-1")
                    .thread_id("t-1"),
            )
            .await
            .expect("decision expected");
        assert_eq!(decision.target_agent, "billing");

        // The decision can be acted on over the bus.
        let request = Message::to(
            MessageKind::Request,
            switchboard.orchestrator.name(),
            &decision.target_agent,
            json!({"op": "invoice_lookup"}),
        );
        switchboard.bus.send(request)?;
        let response = switchboard
            .bus
            .receive(switchboard.orchestrator.name(), Duration::from_secs(2))
            .await?
            .expect("worker response expected");
        assert_eq!(response.payload["status"], "ok");

        switchboard.orchestrator.stop_all().await;
        let active = switchboard.orchestrator.active_agents();
        assert!(active.iter().all(|info| info.name != "billing"));

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
