//! Top-level coordinator: resolves or creates the session for an inbound
//! contact, classifies it, and records the routing decision.
//!
//! Classification failures never propagate — the session is marked errored
//! for operator visibility and the caller receives `None`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Value, json};
use switchboard_agent::AgentRuntime;
use switchboard_bus::{AgentRegistry, MessageBus};
use switchboard_protocol::{
    AgentInfo, AgentStatus, BusError, CallDirection, Classifier, ContactClass, ContactDirectory,
    ConversationState, EventKind, Message, MessageKind, NewSession, ORCHESTRATOR_AGENT,
    PromptTemplate, RoutingDecision, SessionId, SessionStatus,
};
use switchboard_state::ConversationStateManager;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::ContactCache;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Conversation-state tracking on inbound routes.
    pub enable_tracking: bool,
    /// TTL for the session-keyed contact-info cache.
    pub contact_cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_tracking: true,
            contact_cache_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// An inbound email to route.
#[derive(Debug, Clone)]
pub struct EmailRoute {
    pub from_email: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub sender_status: String,
    pub classification: Option<ContactClass>,
    pub previous_count: u32,
    pub last_interaction: String,
    pub email_id: Option<String>,
    pub thread_id: Option<String>,
    pub contact_name: Option<String>,
    pub phone_number: Option<String>,
}

impl EmailRoute {
    pub fn new(
        from_email: impl Into<String>,
        to_email: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from_email: from_email.into(),
            to_email: to_email.into(),
            subject: subject.into(),
            body: body.into(),
            sender_status: "UNKNOWN".to_owned(),
            classification: None,
            previous_count: 0,
            last_interaction: "Never".to_owned(),
            email_id: None,
            thread_id: None,
            contact_name: None,
            phone_number: None,
        }
    }

    pub fn email_id(mut self, email_id: impl Into<String>) -> Self {
        self.email_id = Some(email_id.into());
        self
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn contact_name(mut self, contact_name: impl Into<String>) -> Self {
        self.contact_name = Some(contact_name.into());
        self
    }

    pub fn phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    pub fn sender_status(mut self, sender_status: impl Into<String>) -> Self {
        self.sender_status = sender_status.into();
        self
    }

    pub fn classification(mut self, classification: ContactClass) -> Self {
        self.classification = Some(classification);
        self
    }
}

/// An inbound phone call to route.
#[derive(Debug, Clone)]
pub struct CallRoute {
    pub phone_number: String,
    pub caller_name: Option<String>,
    pub call_id: Option<String>,
    pub call_direction: CallDirection,
    pub initial_message: Option<String>,
    pub sender_status: String,
    pub classification: Option<ContactClass>,
    pub previous_count: u32,
    pub last_interaction: String,
}

impl CallRoute {
    pub fn new(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            caller_name: None,
            call_id: None,
            call_direction: CallDirection::Inbound,
            initial_message: None,
            sender_status: "UNKNOWN".to_owned(),
            classification: None,
            previous_count: 0,
            last_interaction: "Never".to_owned(),
        }
    }

    pub fn call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn caller_name(mut self, caller_name: impl Into<String>) -> Self {
        self.caller_name = Some(caller_name.into());
        self
    }

    pub fn initial_message(mut self, initial_message: impl Into<String>) -> Self {
        self.initial_message = Some(initial_message.into());
        self
    }

    pub fn call_direction(mut self, direction: CallDirection) -> Self {
        self.call_direction = direction;
        self
    }
}

pub struct ConversationOrchestrator {
    name: String,
    bus: MessageBus,
    registry: AgentRegistry,
    manager: ConversationStateManager,
    classifier: Arc<dyn Classifier>,
    directory: Arc<dyn ContactDirectory>,
    intent_prompt: PromptTemplate,
    contact_cache: ContactCache,
    config: OrchestratorConfig,
    agents: Mutex<Vec<AgentRuntime>>,
}

impl ConversationOrchestrator {
    pub fn new(
        bus: MessageBus,
        registry: AgentRegistry,
        manager: ConversationStateManager,
        classifier: Arc<dyn Classifier>,
        directory: Arc<dyn ContactDirectory>,
        intent_prompt: PromptTemplate,
        config: OrchestratorConfig,
    ) -> Self {
        let name = ORCHESTRATOR_AGENT.to_owned();
        bus.register_agent(&name);
        registry.register(AgentInfo::new(
            &name,
            "orchestrator",
            vec!["routing".to_owned(), "classification".to_owned()],
        ));
        Self {
            name,
            bus,
            registry,
            manager,
            classifier,
            directory,
            intent_prompt,
            contact_cache: ContactCache::new(config.contact_cache_ttl),
            config,
            agents: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn manager(&self) -> &ConversationStateManager {
        &self.manager
    }

    pub fn contact_cache(&self) -> &ContactCache {
        &self.contact_cache
    }

    /// Hand an agent's lifecycle to the orchestrator.
    pub fn register_agent(&self, agent: AgentRuntime) {
        self.agents.lock().push(agent);
    }

    pub async fn start_all(&self) -> Result<()> {
        let agents: Vec<AgentRuntime> = self.agents.lock().clone();
        for agent in agents {
            agent.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        let agents: Vec<AgentRuntime> = self.agents.lock().clone();
        for agent in agents {
            agent.stop().await;
        }
    }

    pub fn active_agents(&self) -> Vec<AgentInfo> {
        self.registry.list(Some(AgentStatus::Active))
    }

    pub fn broadcast(&self, kind: MessageKind, payload: Value) -> Result<(), BusError> {
        self.bus.send(Message::broadcast(kind, &self.name, payload))
    }

    /// Collect greeting messages for up to `window`, acknowledging each with
    /// a correlated response.
    pub async fn listen_for_greetings(&self, window: Duration) -> Vec<Message> {
        let deadline = tokio::time::Instant::now() + window;
        let mut greetings = Vec::new();

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            match self.bus.receive(&self.name, deadline - now).await {
                Ok(Some(message)) if message.kind == MessageKind::Greeting => {
                    info!(
                        from = %message.from_agent,
                        "greeting received: {}",
                        message.payload["message"].as_str().unwrap_or_default()
                    );
                    let ack = Message::to(
                        MessageKind::Response,
                        &self.name,
                        &message.from_agent,
                        json!({
                            "message": format!(
                                "Hello {}! Welcome to the conversation.",
                                message.from_agent
                            ),
                            "status": "acknowledged",
                        }),
                    )
                    .with_correlation(message.id.clone());
                    if let Err(error) = self.bus.send(ack) {
                        warn!(%error, "greeting acknowledgment failed");
                    }
                    greetings.push(message);
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
        greetings
    }

    /// Route an inbound email. Returns the routing decision (with the
    /// session id when tracking is on), or `None` when classification fails.
    #[instrument(skip(self, route), fields(from = %route.from_email, thread_id = ?route.thread_id))]
    pub async fn route_email(&self, route: EmailRoute) -> Option<RoutingDecision> {
        let mut session_id = None;

        if self.config.enable_tracking && route.email_id.is_some() {
            session_id = self.resolve_email_session(&route).await;
            if let Some(session_id) = &session_id {
                self.contact_cache.store_contact(
                    session_id,
                    Some(&route.from_email),
                    route.phone_number.as_deref(),
                );
            }
        }

        let mut variables = IndexMap::new();
        variables.insert("from_email".to_owned(), route.from_email.clone());
        variables.insert("sender_status".to_owned(), route.sender_status.clone());
        variables.insert(
            "classification".to_owned(),
            classification_variable(route.classification),
        );
        variables.insert("subject".to_owned(), route.subject.clone());
        variables.insert("body".to_owned(), route.body.clone());
        variables.insert(
            "previous_count".to_owned(),
            route.previous_count.to_string(),
        );
        variables.insert("last_interaction".to_owned(), route.last_interaction.clone());

        let context = json!({
            "email_id": route.email_id,
            "thread_id": route.thread_id,
        });
        self.classify_and_record(variables, session_id, context, "routing")
            .await
    }

    /// Route an inbound phone call, keyed by `call_id`.
    #[instrument(skip(self, route), fields(phone = %route.phone_number, call_id = ?route.call_id))]
    pub async fn route_call(&self, route: CallRoute) -> Option<RoutingDecision> {
        let mut session_id = None;

        if self.config.enable_tracking && route.call_id.is_some() {
            session_id = self.resolve_call_session(&route).await;
            if let Some(session_id) = &session_id {
                self.contact_cache
                    .store_contact(session_id, None, Some(&route.phone_number));
            }
        }

        let caller = route
            .caller_name
            .clone()
            .unwrap_or_else(|| route.phone_number.clone());
        let mut variables = IndexMap::new();
        variables.insert("from_email".to_owned(), route.phone_number.clone());
        variables.insert("sender_status".to_owned(), route.sender_status.clone());
        variables.insert(
            "classification".to_owned(),
            classification_variable(route.classification),
        );
        variables.insert("subject".to_owned(), format!("Phone call from {caller}"));
        variables.insert(
            "body".to_owned(),
            route
                .initial_message
                .clone()
                .unwrap_or_else(|| "Phone conversation (no transcription)".to_owned()),
        );
        variables.insert(
            "previous_count".to_owned(),
            route.previous_count.to_string(),
        );
        variables.insert("last_interaction".to_owned(), route.last_interaction.clone());

        let context = json!({
            "call_id": route.call_id,
            "phone_number": route.phone_number,
        });
        self.classify_and_record(variables, session_id, context, "phone_routing")
            .await
    }

    /// Resolve the session for an email: same thread wins, then an open
    /// session under any identifier of the same contact, then a new session.
    async fn resolve_email_session(&self, route: &EmailRoute) -> Option<SessionId> {
        let received_data = json!({
            "from": route.from_email,
            "to": route.to_email,
            "subject": route.subject,
            "body": route.body,
            "sender_status": route.sender_status,
            "phone_number": route.phone_number,
            "email_id": route.email_id,
        });

        if let Some(thread_id) = &route.thread_id {
            if let Some(existing) = self.manager.get_session_by_thread(thread_id).await {
                info!(
                    session_id = %existing.session_id,
                    thread_id = %thread_id,
                    "resuming conversation for thread"
                );
                self.manager
                    .log_event(
                        &existing.session_id,
                        EventKind::EmailReceived,
                        None,
                        received_data,
                        None,
                    )
                    .await;
                return Some(existing.session_id);
            }
        }

        if let Some(open) = self
            .resolve_open_session(Some(&route.from_email), route.phone_number.as_deref())
            .await
        {
            self.manager
                .log_event(
                    &open.session_id,
                    EventKind::EmailReceived,
                    None,
                    received_data,
                    None,
                )
                .await;
            return Some(open.session_id);
        }

        let mut spec = NewSession::email(&route.from_email);
        if let Some(email_id) = &route.email_id {
            spec = spec.email_id(email_id);
        }
        if let Some(thread_id) = &route.thread_id {
            spec = spec.thread_id(thread_id);
        }
        if let Some(contact_name) = &route.contact_name {
            spec = spec.contact_name(contact_name);
        }
        if let Some(phone_number) = &route.phone_number {
            spec = spec.phone_number(phone_number);
        }
        if let Some(classification) = route.classification {
            spec = spec.classification(classification);
        }

        match self.manager.start_session(spec, received_data).await {
            Ok(session_id) => {
                info!(session_id = %session_id, "started new email conversation");
                Some(session_id)
            }
            Err(error) => {
                // Tracking failures degrade, they never block routing.
                error!(%error, "failed to start conversation tracking");
                None
            }
        }
    }

    /// Resolve the session for a call: same call id wins, then an open
    /// session under any identifier of the same contact, then a new session.
    async fn resolve_call_session(&self, route: &CallRoute) -> Option<SessionId> {
        let received_data = json!({
            "caller_id": route.phone_number,
            "call_direction": route.call_direction,
            "initial_message": route
                .initial_message
                .clone()
                .unwrap_or_else(|| "No transcription available".to_owned()),
            "sender_status": route.sender_status,
        });

        if let Some(call_id) = &route.call_id {
            if let Some(existing) = self.manager.get_session_by_call(call_id).await {
                info!(
                    session_id = %existing.session_id,
                    call_id = %call_id,
                    "resuming phone conversation"
                );
                let mut continued = received_data.clone();
                continued["call_status"] = json!("resumed");
                self.manager
                    .log_event(
                        &existing.session_id,
                        EventKind::CallReceived,
                        None,
                        continued,
                        None,
                    )
                    .await;
                return Some(existing.session_id);
            }
        }

        if let Some(open) = self
            .resolve_open_session(None, Some(&route.phone_number))
            .await
        {
            self.manager
                .log_event(
                    &open.session_id,
                    EventKind::CallReceived,
                    None,
                    received_data,
                    None,
                )
                .await;
            return Some(open.session_id);
        }

        let mut spec = NewSession::phone(&route.phone_number)
            .phone_number(&route.phone_number)
            .call_direction(route.call_direction);
        if let Some(call_id) = &route.call_id {
            spec = spec.call_id(call_id);
        }
        if let Some(caller_name) = &route.caller_name {
            spec = spec.contact_name(caller_name);
        }
        if let Some(classification) = route.classification {
            spec = spec.classification(classification);
        }

        match self.manager.start_session(spec, received_data).await {
            Ok(session_id) => {
                info!(session_id = %session_id, "started new phone conversation");
                Some(session_id)
            }
            Err(error) => {
                error!(%error, "failed to start phone conversation tracking");
                None
            }
        }
    }

    /// Find the open conversation this contact already has, across every
    /// identifier the directory knows for them. When several are open, the
    /// most recently updated wins and the adoption is recorded with a
    /// `conversation_resumed` event naming the abandoned session ids.
    pub async fn resolve_open_session(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Option<ConversationState> {
        let mut contact = None;
        if let Some(email) = email {
            contact = self.directory.find_by_email(email).await;
        }
        if contact.is_none() {
            if let Some(phone) = phone {
                contact = self.directory.find_by_phone(phone).await;
            }
        }

        let mut identifiers: Vec<String> = Vec::new();
        if let Some(contact) = &contact {
            identifiers.extend(contact.email.clone());
            identifiers.extend(contact.phone.clone());
        } else {
            identifiers.extend(email.map(str::to_owned));
            identifiers.extend(phone.map(str::to_owned));
        }
        if identifiers.is_empty() {
            return None;
        }

        let mut open = Vec::new();
        for identifier in &identifiers {
            let sessions = self.manager.contact_history(identifier, 10, None).await;
            open.extend(sessions.into_iter().filter(|s| s.status.is_open()));
        }

        let mut seen = std::collections::HashSet::new();
        open.retain(|s| seen.insert(s.session_id.clone()));
        if open.is_empty() {
            debug!(identifiers = ?identifiers, "no open conversations for contact");
            return None;
        }

        open.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        let winner = open.remove(0);
        let abandoned: Vec<String> = open.iter().map(|s| s.session_id.to_string()).collect();

        info!(
            session_id = %winner.session_id,
            abandoned = abandoned.len(),
            "adopting most recently updated open conversation"
        );
        self.manager
            .log_event(
                &winner.session_id,
                EventKind::ConversationResumed,
                None,
                json!({
                    "previous_session_id": abandoned.first(),
                    "abandoned_session_ids": abandoned,
                    "contact_identifier": identifiers[0],
                    "reason": "open_conversation_found",
                    "found_in_directory": contact.is_some(),
                }),
                None,
            )
            .await;

        if let Some(contact) = &contact {
            self.manager
                .log_event(
                    &winner.session_id,
                    EventKind::ContactInfoExtracted,
                    None,
                    json!({
                        "email": contact.email,
                        "phone": contact.phone,
                        "source": "contact_directory",
                    }),
                    None,
                )
                .await;
        }

        Some(winner)
    }

    /// Run classification and persist the outcome: on success an
    /// `agent_routed` event plus checkpoint, on failure an errored session
    /// and `None`.
    async fn classify_and_record(
        &self,
        variables: IndexMap<String, String>,
        session_id: Option<SessionId>,
        mut checkpoint_context: Value,
        step: &str,
    ) -> Option<RoutingDecision> {
        let output = match self.classifier.classify(&self.intent_prompt, &variables).await {
            Ok(output) => output,
            Err(error) => {
                error!(%error, step, "classification failed");
                if let Some(session_id) = &session_id {
                    self.manager
                        .mark_error(
                            session_id,
                            json!({"error": error.to_string(), "step": step}),
                        )
                        .await;
                }
                return None;
            }
        };

        let mut decision = match RoutingDecision::from_output(&output) {
            Ok(decision) => decision,
            Err(error) => {
                error!(%error, step, "classifier output unusable");
                if let Some(session_id) = &session_id {
                    self.manager
                        .mark_error(
                            session_id,
                            json!({"error": error.to_string(), "step": step}),
                        )
                        .await;
                }
                return None;
            }
        };

        info!(
            target_agent = %decision.target_agent,
            sub_route = ?decision.sub_route,
            confidence = ?decision.confidence,
            "routing decision"
        );

        if let Some(session_id) = &session_id {
            if let Some(usage) = &output.usage {
                self.manager
                    .log_event(
                        session_id,
                        EventKind::LlmCall,
                        Some(&self.name),
                        json!({
                            "purpose": "intent_classification",
                            "prompt_tokens": usage.prompt_tokens,
                            "completion_tokens": usage.completion_tokens,
                            "total_tokens": usage.total_tokens,
                        }),
                        None,
                    )
                    .await;
            }

            self.manager
                .log_event(
                    session_id,
                    EventKind::AgentRouted,
                    Some(&self.name),
                    json!({
                        "target_agent": decision.target_agent,
                        "sub_route": decision.sub_route,
                        "classification": decision.classification,
                        "reasoning": decision.reasoning,
                        "confidence": decision.confidence,
                    }),
                    None,
                )
                .await;

            checkpoint_context["sub_route"] = json!(decision.sub_route);
            self.manager
                .create_checkpoint(
                    session_id,
                    &self.name,
                    SessionStatus::InProgress,
                    Some(&decision.target_agent),
                    checkpoint_context,
                    Vec::new(),
                )
                .await;

            decision.session_id = Some(session_id.clone());
        }

        Some(decision)
    }
}

fn classification_variable(classification: Option<ContactClass>) -> String {
    match classification {
        Some(ContactClass::Client) => "client".to_owned(),
        Some(ContactClass::Vendor) => "vendor".to_owned(),
        Some(ContactClass::Lead) => "lead".to_owned(),
        None => "null".to_owned(),
    }
}
