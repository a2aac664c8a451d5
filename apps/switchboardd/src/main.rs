use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use switchboard_agent::{AgentHandler, AgentRuntime};
use switchboard_crm::{JsonContactDirectory, RecordingEscalation};
use switchboard_llm::{CannedModelClient, LlmClassifier, LlmGenerator};
use switchboard_orchestrator::{CallRoute, EmailRoute, SwitchboardBuilder};
use switchboard_protocol::{
    Contact, ContactClass, Message, MessageKind, ORCHESTRATOR_AGENT, PromptTemplate,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "switchboardd")]
#[command(about = "Switchboard routing demo daemon")]
struct Cli {
    #[arg(long, default_value = ".switchboard")]
    root: PathBuf,
    /// Optional JSON contact seed file; a built-in sample is used otherwise.
    #[arg(long)]
    contacts: Option<PathBuf>,
    #[arg(long, default_value = "gemini-2.0-flash")]
    model: String,
}

struct SchedulingHandler;

#[async_trait]
impl AgentHandler for SchedulingHandler {
    fn name(&self) -> &str {
        "scheduling"
    }

    fn agent_type(&self) -> &str {
        "worker"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["schedule_lookup".to_owned(), "appointment_booking".to_owned()]
    }

    async fn handle_message(&self, agent: &AgentRuntime, message: Message) -> Result<()> {
        if message.kind != MessageKind::Request {
            return Ok(());
        }

        let schedule = json!({
            "appointments": [
                {"date": "Friday", "time": "9:00-11:00", "address": "42 Harbor Dr"},
            ],
        });
        let reply = agent
            .generate_data_response(
                message.payload["question"].as_str().unwrap_or("my schedule"),
                message.payload["contact_name"].as_str().unwrap_or("there"),
                &serde_json::Map::new(),
                Some(&schedule),
                "",
            )
            .await;

        let session_id = message.payload["session_id"]
            .as_str()
            .map(switchboard_protocol::SessionId::from_string);
        agent
            .log_response(session_id.as_ref(), &reply, Some("schedule_lookup"), None)
            .await;

        let response = Message::to(
            MessageKind::Response,
            agent.name(),
            &message.from_agent,
            json!({"status": "ok", "reply": reply}),
        )
        .with_correlation(message.id);
        agent.send(response)?;
        Ok(())
    }
}

fn sample_contacts() -> Vec<Contact> {
    vec![Contact {
        id: "c-1".to_owned(),
        name: Some("Jane Smith".to_owned()),
        email: Some("jane@example.com".to_owned()),
        phone: Some("+13055551234".to_owned()),
        classification: Some(ContactClass::Client),
    }]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .compact()
        .init();

    let cli = Cli::parse();

    let directory = match &cli.contacts {
        Some(path) => JsonContactDirectory::load(path).await?,
        None => JsonContactDirectory::new(sample_contacts()),
    };

    // Stands in for a provider-backed model client.
    let model_client = Arc::new(CannedModelClient::new(
        r#"{"target_agent": "scheduling", "sub_route": "appointment", "classification": "client",
            "reasoning": "customer asks about an upcoming visit", "confidence": 0.93}"#,
    ));

    let switchboard = SwitchboardBuilder::new(&cli.root)
        .classifier(Arc::new(LlmClassifier::new(model_client.clone())))
        .generator(Arc::new(LlmGenerator::new(model_client, &cli.model)))
        .directory(Arc::new(directory))
        .escalation(Arc::new(RecordingEscalation::new()))
        .intent_prompt(PromptTemplate::intent_classification(
            ORCHESTRATOR_AGENT,
            "You route inbound customer-service messages to the right agent.",
            "From: {from_email} ({sender_status}/{classification})\nSubject: {subject}\n\
             Body: {body}\nPrevious conversations: {previous_count}, last {last_interaction}",
            &cli.model,
        ))
        .build()?;

    let mut events = switchboard.manager.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(record) = events.recv().await {
            info!(
                session_id = %record.session_id,
                kind = %record.event.kind,
                "event.logged"
            );
        }
    });

    switchboard
        .orchestrator
        .register_agent(switchboard.agent(Arc::new(SchedulingHandler)));
    switchboard.orchestrator.start_all().await?;

    let greetings = switchboard
        .orchestrator
        .listen_for_greetings(Duration::from_millis(500))
        .await;
    info!(greetings = greetings.len(), "agents reported in");

    // Route an inbound email.
    let decision = switchboard
        .orchestrator
        .route_email(
            EmailRoute::new(
                "jane@example.com",
                "support@cleanco.example",
                "Visit this Friday?",
                "Hi, when is my next cleaning visit scheduled?",
            )
            .email_id("gmail-demo-1")
            .thread_id("thread-demo-1")
            .contact_name("Jane Smith")
            .sender_status("FOUND")
            .classification(ContactClass::Client),
        )
        .await
        .context("email routing failed")?;
    let session_id = decision
        .session_id
        .clone()
        .context("tracking is enabled in the demo")?;
    info!(
        target_agent = %decision.target_agent,
        session_id = %session_id,
        "email routed"
    );

    // Act on the decision over the bus.
    let request = Message::to(
        MessageKind::Request,
        ORCHESTRATOR_AGENT,
        &decision.target_agent,
        json!({
            "question": "When is my next cleaning visit?",
            "contact_name": "Jane",
            "session_id": session_id.as_str(),
        }),
    );
    switchboard.bus.send(request)?;
    let response = switchboard
        .bus
        .receive(ORCHESTRATOR_AGENT, Duration::from_secs(5))
        .await?;
    match response {
        Some(response) => info!(reply = %response.payload["reply"], "worker replied"),
        None => warn!("no reply from worker"),
    }

    // Route a call from the same customer: lands on the open session.
    let call_decision = switchboard
        .orchestrator
        .route_call(
            CallRoute::new("+13055551234")
                .call_id("call-demo-1")
                .caller_name("Jane Smith")
                .initial_message("Calling about the Friday visit"),
        )
        .await
        .context("call routing failed")?;
    info!(session_id = ?call_decision.session_id, "call routed");

    // Interrupt and resume from the checkpoint.
    switchboard.manager.mark_timeout(&session_id, None).await;
    let report = switchboard.resume.auto_resume_timeouts(24, 3).await;
    info!(
        resumed = report.resumed,
        skipped = report.skipped,
        failed = report.failed,
        "auto-resume pass"
    );

    if let Some(stats) = switchboard.manager.statistics(None, None, None).await {
        info!(
            conversations = stats.total_conversations,
            tokens = stats.total_tokens,
            "session statistics"
        );
    }

    switchboard.orchestrator.stop_all().await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    event_task.abort();
    if let Err(error) = event_task.await {
        if !error.is_cancelled() {
            warn!(%error, "event task stopped");
        }
    }

    Ok(())
}
