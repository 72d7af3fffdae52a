//! # Runtime Bootstrap
//!
//! Builds the configured agents and the reception awareness engine from an
//! [`As4Config`] plus the external collaborators (stores, transport, codec,
//! signer) and manages their lifecycle under one cancellation token.

use crate::agent::Agent;
use crate::config::{
    AgentConfig, As4Config, ExceptionHandlerKind, ReceiverKind, TransformerKind,
};
use crate::error::{As4Error, Result};
use crate::exceptions::{
    ExceptionHandler, InboundExceptionHandler, LogExceptionHandler, OutboundExceptionHandler,
};
use crate::ids::{IdentifierGenerator, UuidIdentifierGenerator};
use crate::matching::PModeMatcher;
use crate::persistence::{InMemoryDatastore, MessageRepository, ReceptionAwarenessRepository};
use crate::pipeline::{StepDependencies, StepRegistry};
use crate::pmode::PModeStore;
use crate::receivers::{
    DatastoreReceiver, PollingReceiver, PullMpc, PullRequestReceiver, Receiver,
};
use crate::security::MessageSigner;
use crate::services::ReceptionAwarenessAgent;
use crate::transformers::{
    As4Codec, JsonAs4Codec, OutboundMessageTransformer, ReceiveMessageTransformer, Transformer,
};
use crate::transport::MessageSender;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// External boundaries the runtime is wired against
#[derive(Clone)]
pub struct Collaborators {
    pub pmode_store: Arc<dyn PModeStore>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub reception_awareness_repository: Arc<dyn ReceptionAwarenessRepository>,
    pub sender: Arc<dyn MessageSender>,
    pub codec: Arc<dyn As4Codec>,
    pub signer: Option<Arc<dyn MessageSigner>>,
}

impl Collaborators {
    /// In-memory stores and the JSON codec, for tests and embedded use
    pub fn in_memory(pmode_store: Arc<dyn PModeStore>, sender: Arc<dyn MessageSender>) -> Self {
        let datastore = Arc::new(InMemoryDatastore::new());
        Self {
            pmode_store,
            message_repository: datastore.clone(),
            reception_awareness_repository: datastore,
            sender,
            codec: Arc::new(JsonAs4Codec),
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn MessageSigner>) -> Self {
        self.signer = Some(signer);
        self
    }
}

/// Runtime status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStatus {
    pub running: bool,
    pub environment: String,
    pub agents: Vec<String>,
    pub reception_awareness_enabled: bool,
}

pub struct As4Runtime {
    environment: String,
    agents: Vec<Agent>,
    reception_awareness: Option<Arc<ReceptionAwarenessAgent>>,
    cancellation: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl As4Runtime {
    /// Build every configured agent with the built-in steps
    pub fn build(config: &As4Config, collaborators: Collaborators) -> Result<Self> {
        Self::build_with_registry(config, collaborators, &StepRegistry::with_builtin_steps())
    }

    /// Build with a caller-supplied registry, for custom steps
    pub fn build_with_registry(
        config: &As4Config,
        collaborators: Collaborators,
        registry: &StepRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let id_generator: Arc<dyn IdentifierGenerator> =
            Arc::new(UuidIdentifierGenerator::new(config.message_id_suffix.clone()));
        let dependencies = StepDependencies {
            pmode_store: collaborators.pmode_store.clone(),
            message_repository: collaborators.message_repository.clone(),
            reception_awareness_repository: collaborators.reception_awareness_repository.clone(),
            sender: collaborators.sender.clone(),
            codec: collaborators.codec.clone(),
            signer: collaborators.signer.clone(),
            id_generator: id_generator.clone(),
            matcher: Arc::new(PModeMatcher::new()),
        };

        let agents = config
            .agents
            .iter()
            .map(|agent| build_agent(config, agent, &collaborators, &dependencies, registry))
            .collect::<Result<Vec<_>>>()?;

        let reception_awareness = config.reception_awareness.enabled.then(|| {
            Arc::new(
                ReceptionAwarenessAgent::new(
                    collaborators.reception_awareness_repository.clone(),
                    collaborators.message_repository.clone(),
                    collaborators.sender.clone(),
                )
                .with_polling_interval(config.reception_awareness.polling_interval())
                .with_batch_size(config.reception_awareness.batch_size)
                .with_max_concurrency(config.reception_awareness.max_concurrency),
            )
        });

        info!(
            environment = %config.environment,
            agents = agents.len(),
            reception_awareness = reception_awareness.is_some(),
            "AS4 runtime built"
        );

        Ok(Self {
            environment: config.environment.clone(),
            agents,
            reception_awareness,
            cancellation: CancellationToken::new(),
            handles: Vec::new(),
        })
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name() == name)
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawn one task per agent plus the reception awareness engine
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(As4Error::Internal("runtime is already running".to_string()));
        }
        if self.cancellation.is_cancelled() {
            self.cancellation = CancellationToken::new();
        }

        for agent in &self.agents {
            self.handles.push(agent.start(self.cancellation.child_token()));
        }
        if let Some(engine) = &self.reception_awareness {
            let engine = Arc::clone(engine);
            let token = self.cancellation.child_token();
            self.handles.push(tokio::spawn(engine.run(token)));
        }

        info!(tasks = self.handles.len(), "🚀 AS4 runtime started");
        Ok(())
    }

    /// Cancel every loop and wait for in-flight batches to finish
    pub async fn shutdown(&mut self) {
        if !self.is_running() {
            warn!("AS4 runtime already stopped");
            return;
        }

        info!("🛑 AS4 runtime shutdown requested");
        self.cancellation.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Runtime task ended abnormally");
            }
        }
        info!("AS4 runtime stopped");
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            running: self.is_running(),
            environment: self.environment.clone(),
            agents: self.agents.iter().map(|a| a.name().to_string()).collect(),
            reception_awareness_enabled: self.reception_awareness.is_some(),
        }
    }
}

fn build_agent(
    config: &As4Config,
    agent: &AgentConfig,
    collaborators: &Collaborators,
    dependencies: &StepDependencies,
    registry: &StepRegistry,
) -> Result<Agent> {
    let pipeline = config.pipelines.get(&agent.pipeline).ok_or_else(|| {
        As4Error::Configuration(format!(
            "agent '{}' references unknown pipeline '{}'",
            agent.name, agent.pipeline
        ))
    })?;
    let executor = registry.build_executor(&agent.pipeline, pipeline, dependencies)?;

    let transformer: Arc<dyn Transformer> = match agent.transformer {
        TransformerKind::Receive => {
            Arc::new(ReceiveMessageTransformer::new(collaborators.codec.clone()))
        }
        TransformerKind::Outbound => Arc::new(OutboundMessageTransformer::new(
            collaborators.codec.clone(),
            collaborators.pmode_store.clone(),
        )),
    };

    let exception_handler: Arc<dyn ExceptionHandler> = match agent.exception_handler {
        ExceptionHandlerKind::Inbound => Arc::new(InboundExceptionHandler::new(
            collaborators.message_repository.clone(),
        )),
        ExceptionHandlerKind::Outbound => Arc::new(OutboundExceptionHandler::new(
            collaborators.message_repository.clone(),
        )),
        ExceptionHandlerKind::Log => Arc::new(LogExceptionHandler),
    };

    let receiver = build_receiver(config, agent, collaborators, dependencies)?;

    Ok(Agent::new(
        agent.name.clone(),
        receiver,
        transformer,
        executor,
        exception_handler,
    ))
}

fn build_receiver(
    config: &As4Config,
    agent: &AgentConfig,
    collaborators: &Collaborators,
    dependencies: &StepDependencies,
) -> Result<Arc<dyn Receiver>> {
    match agent.receiver {
        ReceiverKind::Datastore => {
            let operation = agent.operation.ok_or_else(|| {
                As4Error::Configuration(format!(
                    "datastore agent '{}' needs an operation",
                    agent.name
                ))
            })?;
            let receiver = DatastoreReceiver::new(
                agent.name.clone(),
                collaborators.message_repository.clone(),
                operation,
            )?
            .with_batch_size(config.polling.batch_size)
            .with_polling_interval(config.polling.polling_interval())
            .with_max_concurrency(config.polling.max_concurrency);
            Ok(Arc::new(PollingReceiver::new(Arc::new(receiver))))
        }
        ReceiverKind::PullRequest => {
            let mpcs = config
                .pull_requests
                .mpcs
                .iter()
                .map(|m| PullMpc {
                    mpc: m.mpc.clone(),
                    pmode_id: m.pmode_id.clone(),
                    min_interval: Duration::from_millis(m.min_interval_ms),
                    max_interval: Duration::from_millis(m.max_interval_ms),
                })
                .collect();
            let receiver = PullRequestReceiver::new(
                agent.name.clone(),
                mpcs,
                config.pull_requests.tick(),
                collaborators.codec.clone(),
                dependencies.id_generator.clone(),
            );
            Ok(Arc::new(PollingReceiver::new(Arc::new(receiver))))
        }
    }
}
