//! # switchboard-agent — agent lifecycle runtime
//!
//! Role-specific behavior lives in an [`AgentHandler`]; the shared lifecycle
//! (register, greet, receive loop, stop) and the helpers every agent gets
//! (intent classification, urgent escalation, response logging and
//! generation) live in [`AgentRuntime`], which wraps the handler together
//! with its injected services.
//!
//! Lifecycle: `stopped → starting → running → stopping → stopped`. `stop()`
//! cancels an in-flight receive promptly but always lets a dispatch in
//! progress finish its message.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value, json};
use switchboard_bus::{AgentRegistry, MessageBus};
use switchboard_protocol::{
    AgentInfo, BusError, Classifier, ClassifierOutput, EscalationTransport, EventKind, Message,
    MessageKind, PromptTemplate, SessionId, TextGenerator, TransferOutcome, TransferRequest,
};
use switchboard_state::ConversationStateManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Role-specific agent behavior. The runtime owns the loop; the handler owns
/// the semantics.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    fn name(&self) -> &str;
    fn agent_type(&self) -> &str;
    fn capabilities(&self) -> Vec<String>;
    async fn handle_message(&self, agent: &AgentRuntime, message: Message) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// How long one receive blocks before the loop re-checks for shutdown.
    pub receive_timeout: Duration,
    /// On-call number urgent escalations are transferred to.
    pub on_call_number: String,
    /// Tail of the customer-facing fallback reply when generation fails.
    pub fallback_reply: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(1),
            on_call_number: "+13052047598".to_owned(),
            fallback_reply: "I have your information. Let me get back to you shortly with the \
                             details. If you need immediate assistance, please call us at \
                             (305) 204-7598."
                .to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLifecycle {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// An urgent situation one of the agents has detected.
#[derive(Debug, Clone)]
pub struct UrgentEscalation {
    pub contact_name: String,
    pub contact_identifier: String,
    pub subject: String,
    pub urgency: String,
    pub reason: String,
    pub additional_info: Map<String, Value>,
}

struct AgentInner {
    handler: Arc<dyn AgentHandler>,
    bus: MessageBus,
    registry: AgentRegistry,
    config: AgentConfig,
    state_manager: Option<ConversationStateManager>,
    classifier: Option<Arc<dyn Classifier>>,
    generator: Option<Arc<dyn TextGenerator>>,
    escalation: Option<Arc<dyn EscalationTransport>>,
    intent_prompt: RwLock<Option<PromptTemplate>>,
    lifecycle: Mutex<AgentLifecycle>,
    shutdown: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Shared lifecycle component wrapping one [`AgentHandler`]. Cheap to clone.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<AgentInner>,
}

impl AgentRuntime {
    pub fn new(handler: Arc<dyn AgentHandler>, bus: MessageBus, registry: AgentRegistry) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(AgentInner {
                handler,
                bus,
                registry,
                config: AgentConfig::default(),
                state_manager: None,
                classifier: None,
                generator: None,
                escalation: None,
                intent_prompt: RwLock::new(None),
                lifecycle: Mutex::new(AgentLifecycle::Stopped),
                shutdown,
                task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.inner_mut().config = config;
        self
    }

    pub fn with_state_manager(mut self, manager: ConversationStateManager) -> Self {
        self.inner_mut().state_manager = Some(manager);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.inner_mut().classifier = Some(classifier);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.inner_mut().generator = Some(generator);
        self
    }

    pub fn with_escalation(mut self, escalation: Arc<dyn EscalationTransport>) -> Self {
        self.inner_mut().escalation = Some(escalation);
        self
    }

    pub fn with_intent_prompt(self, prompt: PromptTemplate) -> Self {
        *self.inner.intent_prompt.write() = Some(prompt);
        self
    }

    // Builder-time only: no clones exist before start().
    fn inner_mut(&mut self) -> &mut AgentInner {
        Arc::get_mut(&mut self.inner).expect("agent runtime still under construction")
    }

    pub fn name(&self) -> &str {
        self.inner.handler.name()
    }

    pub fn agent_type(&self) -> &str {
        self.inner.handler.agent_type()
    }

    pub fn lifecycle(&self) -> AgentLifecycle {
        *self.inner.lifecycle.lock()
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.inner.registry
    }

    pub fn state_manager(&self) -> Option<&ConversationStateManager> {
        self.inner.state_manager.as_ref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    pub fn set_intent_prompt(&self, prompt: PromptTemplate) {
        *self.inner.intent_prompt.write() = Some(prompt);
    }

    /// Register with bus and registry, announce via GREETING broadcast, and
    /// spawn the receive loop.
    #[instrument(skip(self), fields(agent = %self.name()))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle != AgentLifecycle::Stopped {
                bail!("agent {} cannot start while {:?}", self.name(), *lifecycle);
            }
            *lifecycle = AgentLifecycle::Starting;
        }
        self.inner.shutdown.send_replace(false);

        let name = self.name().to_owned();
        self.inner.bus.register_agent(&name);
        self.inner.registry.register(AgentInfo::new(
            &name,
            self.agent_type(),
            self.inner.handler.capabilities(),
        ));

        let greeting = Message::broadcast(
            MessageKind::Greeting,
            &name,
            json!({
                "message": format!("Hello from {name}!"),
                "agent_type": self.agent_type(),
                "capabilities": self.inner.handler.capabilities(),
            }),
        );
        if let Err(error) = self.inner.bus.send(greeting) {
            warn!(agent = %name, %error, "greeting broadcast failed");
        }

        let runtime = self.clone();
        let shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(async move { runtime.message_loop(shutdown).await });
        *self.inner.task.lock().await = Some(handle);

        *self.inner.lifecycle.lock() = AgentLifecycle::Running;
        info!(agent = %name, "agent started");
        Ok(())
    }

    /// Signal the loop to exit, await its termination, and unregister.
    /// Idempotent.
    #[instrument(skip(self), fields(agent = %self.name()))]
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            match *lifecycle {
                AgentLifecycle::Stopped | AgentLifecycle::Stopping => return,
                AgentLifecycle::Starting | AgentLifecycle::Running => {
                    *lifecycle = AgentLifecycle::Stopping;
                }
            }
        }

        self.inner.shutdown.send_replace(true);
        if let Some(handle) = self.inner.task.lock().await.take() {
            if let Err(error) = handle.await {
                warn!(agent = %self.name(), %error, "message loop join failed");
            }
        }

        self.inner.bus.unregister_agent(self.name());
        self.inner.registry.unregister(self.name());
        *self.inner.lifecycle.lock() = AgentLifecycle::Stopped;
        info!(agent = %self.name(), "agent stopped");
    }

    pub fn send(&self, message: Message) -> Result<(), BusError> {
        self.inner.bus.send(message)
    }

    pub async fn receive(&self, timeout: Duration) -> Result<Option<Message>, BusError> {
        self.inner.bus.receive(self.name(), timeout).await
    }

    async fn message_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let name = self.name().to_owned();
        debug!(agent = %name, "message loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.inner.bus.receive(&name, self.inner.config.receive_timeout) => received,
            };
            match received {
                Ok(Some(message)) => self.dispatch(message).await,
                Ok(None) => continue,
                Err(error) => {
                    // Mailbox gone; a concurrent stop is tearing us down.
                    debug!(agent = %name, %error, "receive failed, leaving loop");
                    break;
                }
            }
        }
        debug!(agent = %name, "message loop stopped");
    }

    /// One message through the handler. A handler failure never takes the
    /// loop down; a failed REQUEST is answered with an error RESPONSE.
    async fn dispatch(&self, message: Message) {
        let name = self.name().to_owned();
        info!(
            agent = %name,
            from = %message.from_agent,
            kind = ?message.kind,
            "message received"
        );

        let was_request = message.kind == MessageKind::Request;
        let requester = message.from_agent.clone();
        let request_id = message.id.clone();

        if let Err(error) = self.inner.handler.handle_message(self, message).await {
            error!(agent = %name, %error, "message handling failed");
            if was_request {
                let response = Message::to(
                    MessageKind::Response,
                    &name,
                    &requester,
                    json!({
                        "status": "error",
                        "message": format!("error processing request: {error}"),
                        "agent": self.name(),
                    }),
                )
                .with_correlation(request_id);
                if let Err(send_error) = self.inner.bus.send(response) {
                    warn!(agent = %name, %send_error, "could not deliver error response");
                }
            }
        }
    }

    /// Classify intent with the loaded prompt, logging an
    /// `agent_classification` event when session tracking is on. Collaborator
    /// failures are absorbed: the caller sees `None`.
    pub async fn classify_intent(
        &self,
        variables: &IndexMap<String, String>,
        session_id: Option<&SessionId>,
    ) -> Option<ClassifierOutput> {
        let prompt = self.inner.intent_prompt.read().clone();
        let Some(prompt) = prompt else {
            warn!(agent = %self.name(), "no intent prompt loaded, cannot classify");
            return None;
        };
        let Some(classifier) = &self.inner.classifier else {
            warn!(agent = %self.name(), "no classifier configured, cannot classify");
            return None;
        };

        match classifier.classify(&prompt, variables).await {
            Ok(output) => {
                if let (Some(session_id), Some(manager)) =
                    (session_id, &self.inner.state_manager)
                {
                    manager
                        .log_event(
                            session_id,
                            EventKind::AgentClassification,
                            Some(self.name()),
                            Value::Object(output.fields.clone()),
                            None,
                        )
                        .await;
                }
                Some(output)
            }
            Err(error) => {
                error!(agent = %self.name(), %error, "intent classification failed");
                None
            }
        }
    }

    /// Record the agent's customer-facing response on the session.
    pub async fn log_response(
        &self,
        session_id: Option<&SessionId>,
        response: &str,
        response_type: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> bool {
        let (Some(session_id), Some(manager)) = (session_id, &self.inner.state_manager) else {
            return false;
        };

        let mut data = Map::new();
        data.insert("response".to_owned(), json!(response));
        if let Some(response_type) = response_type {
            data.insert("response_type".to_owned(), json!(response_type));
        }
        if let Some(metadata) = metadata {
            data.extend(metadata);
        }

        manager
            .log_event(
                session_id,
                EventKind::ResponseSent,
                Some(self.name()),
                Value::Object(data),
                None,
            )
            .await
    }

    /// Synchronously notify the on-call number. Transport failures are
    /// converted into an error-status outcome, never propagated.
    #[instrument(skip(self, escalation), fields(agent = %self.name(), urgency = %escalation.urgency))]
    pub async fn handle_urgent_escalation(
        &self,
        escalation: UrgentEscalation,
    ) -> TransferOutcome {
        warn!(
            agent = %self.name(),
            contact = %escalation.contact_identifier,
            reason = %escalation.reason,
            "urgent situation detected"
        );

        let Some(transport) = &self.inner.escalation else {
            return TransferOutcome::error("no escalation transport configured", self.name());
        };

        let mut contact_info = Map::new();
        contact_info.insert("name".to_owned(), json!(escalation.contact_name));
        contact_info.insert(
            "email".to_owned(),
            json!(escalation.contact_identifier.clone()),
        );
        contact_info.insert("subject".to_owned(), json!(escalation.subject));
        contact_info.insert("agent".to_owned(), json!(self.name()));
        contact_info.extend(escalation.additional_info);

        let request = TransferRequest {
            from_contact: escalation.contact_identifier,
            to_number: self.inner.config.on_call_number.clone(),
            reason: escalation.reason,
            contact_info,
        };

        match transport.transfer_urgent(&request).await {
            Ok(outcome) => {
                if outcome.is_success() {
                    info!(agent = %self.name(), to = %request.to_number, "urgent notification sent");
                } else {
                    error!(agent = %self.name(), message = %outcome.message, "urgent notification rejected");
                }
                outcome
            }
            Err(error) => {
                error!(agent = %self.name(), %error, "urgent escalation failed");
                TransferOutcome::error(format!("escalation failed: {error}"), self.name())
            }
        }
    }

    /// Generate a customer-facing reply grounded in looked-up service data,
    /// falling back to the configured hold message when generation fails.
    pub async fn generate_data_response(
        &self,
        question: &str,
        contact_name: &str,
        classification: &Map<String, Value>,
        data: Option<&Value>,
        agent_context: &str,
    ) -> String {
        let fallback = format!("Hi {contact_name}! {}", self.inner.config.fallback_reply);
        let Some(generator) = &self.inner.generator else {
            error!(agent = %self.name(), "no generator configured for data response");
            return fallback;
        };

        let intent = ["intent", "vendor_intent", "support_action", "scheduling_action"]
            .iter()
            .find_map(|key| classification.get(*key).and_then(Value::as_str))
            .unwrap_or("GENERAL");
        let urgency = classification
            .get("urgency")
            .and_then(Value::as_str)
            .unwrap_or("NORMAL");
        let summary = classification
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("");
        let data_block = data
            .and_then(|d| serde_json::to_string_pretty(d).ok())
            .unwrap_or_else(|| "No service data available.".to_owned());

        let prompt = format!(
            "You are a helpful assistant responding to a customer inquiry for a field service \
             business.\n\n\
             **Customer Name:** {contact_name}\n\
             **Original Question:** {question}\n\n\
             **Intent Classification:**\n\
             - Intent: {intent}\n\
             - Urgency: {urgency}\n\
             - Summary: {summary}\n\n\
             **Service Data:**\n{data_block}\n\n\
             {agent_context}\n\n\
             **Instructions:**\n\
             1. Answer the customer's question directly using the data provided\n\
             2. Be friendly, professional, and concise\n\
             3. If appointments are scheduled, list them with times and locations\n\
             4. If nothing is found, clearly state that\n\
             5. Use the customer's name\n\n\
             Generate a helpful response:"
        );

        match generator.generate(&prompt, 0.7, 1000).await {
            Ok(text) => text.trim().to_owned(),
            Err(error) => {
                error!(agent = %self.name(), %error, "data response generation failed");
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use switchboard_protocol::{ClassifyError, EscalationError, NewSession};
    use switchboard_state::FileStateRepository;
    use tokio::fs;

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    struct EchoHandler {
        name: String,
        fail_on_request: bool,
    }

    #[async_trait]
    impl AgentHandler for EchoHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn agent_type(&self) -> &str {
            "worker"
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["echo".to_owned()]
        }

        async fn handle_message(&self, agent: &AgentRuntime, message: Message) -> Result<()> {
            if self.fail_on_request {
                bail!("synthetic handler failure");
            }
            if message.kind == MessageKind::Request {
                let response = Message::to(
                    MessageKind::Response,
                    agent.name(),
                    &message.from_agent,
                    json!({"status": "ok", "echo": message.payload}),
                )
                .with_correlation(message.id);
                agent.send(response)?;
            }
            Ok(())
        }
    }

    fn runtime(name: &str, fail_on_request: bool) -> AgentRuntime {
        let bus = MessageBus::new();
        let registry = AgentRegistry::new();
        AgentRuntime::new(
            Arc::new(EchoHandler {
                name: name.to_owned(),
                fail_on_request,
            }),
            bus,
            registry,
        )
    }

    #[tokio::test]
    async fn start_registers_and_broadcasts_greeting() -> Result<()> {
        let agent = runtime("scheduling", false);
        agent.bus().register_agent("observer");

        agent.start().await?;
        assert_eq!(agent.lifecycle(), AgentLifecycle::Running);
        assert!(agent.bus().is_registered("scheduling"));
        assert!(agent.registry().get("scheduling").is_some());

        let greeting = agent
            .bus()
            .receive("observer", Duration::from_millis(200))
            .await?
            .expect("observer should see the greeting");
        assert_eq!(greeting.kind, MessageKind::Greeting);
        assert_eq!(greeting.from_agent, "scheduling");
        assert_eq!(greeting.payload["capabilities"][0], "echo");

        agent.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn request_gets_a_correlated_response() -> Result<()> {
        let agent = runtime("scheduling", false);
        agent.bus().register_agent("orchestrator");
        agent.start().await?;

        let request = Message::to(
            MessageKind::Request,
            "orchestrator",
            "scheduling",
            json!({"op": "lookup"}),
        );
        let request_id = request.id.clone();
        agent.bus().send(request)?;

        let response = agent
            .bus()
            .receive("orchestrator", Duration::from_secs(2))
            .await?
            .expect("response expected");
        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.payload["status"], "ok");
        assert_eq!(response.correlation_id, Some(request_id));

        agent.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn failed_request_yields_error_response_and_loop_survives() -> Result<()> {
        let agent = runtime("scheduling", true);
        agent.bus().register_agent("orchestrator");
        agent.start().await?;

        for _ in 0..2 {
            let request = Message::to(
                MessageKind::Request,
                "orchestrator",
                "scheduling",
                json!({}),
            );
            let request_id = request.id.clone();
            agent.bus().send(request)?;

            let response = agent
                .bus()
                .receive("orchestrator", Duration::from_secs(2))
                .await?
                .expect("error response expected");
            assert_eq!(response.payload["status"], "error");
            assert_eq!(response.correlation_id, Some(request_id));
        }
        assert_eq!(agent.lifecycle(), AgentLifecycle::Running);

        agent.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn failed_notification_sends_no_response() -> Result<()> {
        let agent = runtime("scheduling", true);
        agent.bus().register_agent("orchestrator");
        agent.start().await?;

        agent.bus().send(Message::to(
            MessageKind::Notification,
            "orchestrator",
            "scheduling",
            json!({}),
        ))?;

        assert!(
            agent
                .bus()
                .receive("orchestrator", Duration::from_millis(150))
                .await?
                .is_none()
        );

        agent.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_unregisters() -> Result<()> {
        let agent = runtime("scheduling", false);
        agent.start().await?;

        agent.stop().await;
        assert_eq!(agent.lifecycle(), AgentLifecycle::Stopped);
        assert!(!agent.bus().is_registered("scheduling"));
        assert!(agent.registry().get("scheduling").is_none());

        agent.stop().await;
        assert_eq!(agent.lifecycle(), AgentLifecycle::Stopped);

        // A stopped agent can start again.
        agent.start().await?;
        assert_eq!(agent.lifecycle(), AgentLifecycle::Running);
        agent.stop().await;
        Ok(())
    }

    struct StaticClassifier;

    #[async_trait]
    impl Classifier for StaticClassifier {
        async fn classify(
            &self,
            _template: &PromptTemplate,
            _variables: &IndexMap<String, String>,
        ) -> std::result::Result<ClassifierOutput, ClassifyError> {
            let mut fields = Map::new();
            fields.insert("intent".to_owned(), json!("SCHEDULE_INQUIRY"));
            fields.insert("urgency".to_owned(), json!("NORMAL"));
            Ok(ClassifierOutput {
                fields,
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn classify_intent_logs_a_classification_event() -> Result<()> {
        let root = unique_test_root("switchboard-agent-classify");
        let manager =
            ConversationStateManager::new(Arc::new(FileStateRepository::new(&root)));
        let session_id = manager
            .start_session(
                NewSession::email("client@example.com").email_id("gmail-1"),
                json!({}),
            )
            .await?;

        let agent = runtime("scheduling", false)
            .with_state_manager(manager.clone())
            .with_classifier(Arc::new(StaticClassifier))
            .with_intent_prompt(PromptTemplate::intent_classification(
                "scheduling",
                "classify",
                "{body}",
                "gemini-2.0-flash",
            ));

        let output = agent
            .classify_intent(&IndexMap::new(), Some(&session_id))
            .await
            .expect("classification expected");
        assert_eq!(output.str_field("intent"), Some("SCHEDULE_INQUIRY"));

        let session = manager.get_session(&session_id).await.unwrap();
        let classifications = session.events_by_kind(EventKind::AgentClassification);
        assert_eq!(classifications.len(), 1);
        assert_eq!(classifications[0].data["intent"], "SCHEDULE_INQUIRY");

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn classify_intent_without_prompt_returns_none() {
        let agent = runtime("scheduling", false).with_classifier(Arc::new(StaticClassifier));
        assert!(agent.classify_intent(&IndexMap::new(), None).await.is_none());
    }

    struct DownTransport;

    #[async_trait]
    impl EscalationTransport for DownTransport {
        async fn transfer_urgent(
            &self,
            _request: &TransferRequest,
        ) -> std::result::Result<TransferOutcome, EscalationError> {
            Err(EscalationError("SMS gateway unreachable".to_owned()))
        }
    }

    #[tokio::test]
    async fn escalation_failure_becomes_an_error_outcome() {
        let agent = runtime("scheduling", false).with_escalation(Arc::new(DownTransport));

        let outcome = agent
            .handle_urgent_escalation(UrgentEscalation {
                contact_name: "Jane".to_owned(),
                contact_identifier: "jane@example.com".to_owned(),
                subject: "Missed appointment".to_owned(),
                urgency: "URGENT".to_owned(),
                reason: "URGENT: missed appointment complaint".to_owned(),
                additional_info: Map::new(),
            })
            .await;

        assert!(!outcome.is_success());
        assert!(outcome.message.contains("SMS gateway unreachable"));
        assert_eq!(outcome.agent.as_deref(), Some("scheduling"));
    }

    #[tokio::test]
    async fn log_response_records_response_sent_event() -> Result<()> {
        let root = unique_test_root("switchboard-agent-response");
        let manager =
            ConversationStateManager::new(Arc::new(FileStateRepository::new(&root)));
        let session_id = manager
            .start_session(
                NewSession::email("client@example.com").email_id("gmail-1"),
                json!({}),
            )
            .await?;

        let agent = runtime("scheduling", false).with_state_manager(manager.clone());
        let mut metadata = Map::new();
        metadata.insert("model".to_owned(), json!("gemini-2.0-flash"));

        assert!(
            agent
                .log_response(
                    Some(&session_id),
                    "Your visit is Friday at 9am.",
                    Some("appointment_scheduling"),
                    Some(metadata),
                )
                .await
        );
        assert!(!agent.log_response(None, "ignored", None, None).await);

        let session = manager.get_session(&session_id).await.unwrap();
        let responses = session.events_by_kind(EventKind::ResponseSent);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].data["response_type"], "appointment_scheduling");
        assert_eq!(responses[0].data["model"], "gemini-2.0-flash");

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn data_response_falls_back_without_generator() {
        let agent = runtime("scheduling", false);
        let reply = agent
            .generate_data_response("What's my schedule?", "Jane", &Map::new(), None, "")
            .await;
        assert!(reply.starts_with("Hi Jane!"));
        assert!(reply.contains("(305) 204-7598"));
    }
}
