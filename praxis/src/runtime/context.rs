//! Engine context: service wiring and lifecycle.
//!
//! All process-wide singletons — the thought store, secrets service, audit
//! chain, graph memory, adaptation controller — live here and are threaded
//! through the pipeline explicitly. The context also owns task ingress:
//! transports submit stimuli through [`EngineContext::submit_task`], which
//! filters secrets before anything touches the store.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use px_aegis::{SecretCipher, SecretsService};

use crate::adaptation::{AdaptationController, TunableConfig};
use crate::audit::{AuditEventType, AuditService};
use crate::auth::{AuthService, AuthorizationContext, SCOPE_WRITE_TASK};
use crate::config::{AgentProfile, EngineConfig};
use crate::dma::{DomainDma, build_domain_dma};
use crate::handlers::{HandlerDispatcher, ToolService};
use crate::llm::LlmClient;
use crate::memory::{ConsolidationSchedule, Consolidator, GraphStore};
use crate::signals::{SignalBus, SignalEmitter, TracingSink, WindowBuffer};
use crate::store::ThoughtStore;
use crate::store::model::{SecretRefSummary, Task, TaskContext, Thought};
use crate::transport::TransportAdapter;

use super::EngineError;

/// Capacity of the adaptation observation buffer.
const SIGNAL_WINDOW_CAPACITY: usize = 4096;

/// The wired-up engine: every collaborator and service in one place.
pub struct EngineContext {
    /// Engine configuration.
    pub config: EngineConfig,
    /// Agent profile.
    pub profile: AgentProfile,
    /// Task/thought store.
    pub store: Arc<ThoughtStore>,
    /// Graph memory.
    pub graph: Arc<GraphStore>,
    /// Secrets pipeline.
    pub secrets: Arc<SecretsService>,
    /// Audit chain.
    pub audit: Arc<AuditService>,
    /// Authorization surface.
    pub auth: Arc<AuthService>,
    /// Adaptation controller.
    pub adaptation: Arc<AdaptationController>,
    /// Consolidation runner.
    pub consolidator: Arc<Consolidator>,
    /// LLM provider.
    pub llm: Arc<dyn LlmClient>,
    /// Transport adapter.
    pub transport: Arc<dyn TransportAdapter>,
    /// Handler dispatcher.
    pub dispatcher: HandlerDispatcher,
    /// Domain-specific DMA resolved from the profile.
    pub domain_dma: Arc<DomainDma>,
    /// Signal emitter shared by pipeline components.
    pub signals: SignalEmitter,
    /// Observation buffer consumed by adaptation.
    pub signal_window: Arc<WindowBuffer>,
    /// Listener task for the signal bus.
    signal_listener: JoinHandle<()>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("agent", &self.profile.name)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Open every store, wire every service, and snapshot (or reload) the
    /// identity baseline.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if any store fails to open or the profile
    /// names an unknown domain DMA.
    #[instrument(skip_all, fields(agent = %profile.name))]
    pub async fn initialize(
        config: EngineConfig,
        profile: AgentProfile,
        llm: Arc<dyn LlmClient>,
        transport: Arc<dyn TransportAdapter>,
        tools: Arc<dyn ToolService>,
        master_key: Option<[u8; px_aegis::MASTER_KEY_LEN]>,
    ) -> Result<Arc<Self>, EngineError> {
        let store = Arc::new(
            ThoughtStore::open(
                &config.engine_db,
                &config.migrations_dir,
                config.ponder_cap,
                config.max_thought_depth,
            )
            .await?,
        );
        let graph = Arc::new(GraphStore::new(store.pool().clone()));

        let cipher = match master_key {
            Some(key) => SecretCipher::from_key(&key).map_err(|err| {
                EngineError::Secrets(px_aegis::ServiceError::Store(err.into()))
            })?,
            None => SecretCipher::generate(),
        };
        let secrets = Arc::new(SecretsService::open(&config.secrets_db, cipher).await?);

        let audit = Arc::new(AuditService::open(&config.audit_db).await?);
        let auth = Arc::new(AuthService::new());

        let signal_window = WindowBuffer::new(SIGNAL_WINDOW_CAPACITY);
        let bus = SignalBus::with_sinks(vec![
            Box::new(TracingSink),
            Box::new(Arc::clone(&signal_window)),
        ]);
        let signals = bus.emitter();
        let signal_listener = bus.listen();

        let tunables = TunableConfig {
            entropy_threshold: config.guardrails.entropy_threshold,
            coherence_threshold: config.guardrails.coherence_threshold,
            optimization_veto_ratio: config.guardrails.optimization_veto_ratio,
            ponder_cap: config.ponder_cap,
            retry_max_attempts: config.retry.max_attempts,
            llm_temperature: config.llm_temperature,
        };
        let adaptation = Arc::new(AdaptationController::new(
            tunables,
            config.adaptation.variance_ceiling_percent,
            Arc::clone(&signal_window),
            Arc::clone(&graph),
            Arc::clone(&audit),
        ));
        adaptation.initialize().await?;

        let consolidator = Arc::new(Consolidator::new(Arc::clone(&graph)));
        let domain_dma = Arc::new(build_domain_dma(&profile.domain_dma)?);

        // Each transport adapter gets a channel-bound observer identity
        // carrying only read:any and write:message.
        if let Some(home_channel) = transport.home_channel_id() {
            let (observer, _token) = auth
                .issue_channel_observer("transport", &home_channel)
                .await?;
            tracing::debug!(wa_id = %observer.wa_id, channel = %home_channel, "issued channel observer");
        }

        let dispatcher = HandlerDispatcher::new(
            Arc::clone(&transport),
            tools,
            Arc::clone(&graph),
            Arc::clone(&secrets),
            Arc::clone(&store),
            config.retry.clone(),
            profile.name.clone(),
            config.wa_channel_id.clone(),
        );

        Ok(Arc::new(Self {
            config,
            profile,
            store,
            graph,
            secrets,
            audit,
            auth,
            adaptation,
            consolidator,
            llm,
            transport,
            dispatcher,
            domain_dma,
            signals,
            signal_window,
            signal_listener,
        }))
    }

    /// Submit a stimulus as a task: filter secrets out of the content,
    /// persist the task with its seed thought, and audit the creation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] without further detail when the
    /// context lacks `write:task`, and [`EngineError`] variants for
    /// storage failures.
    #[instrument(skip_all, fields(channel_id = %channel_id))]
    pub async fn submit_task(
        &self,
        authorization: &AuthorizationContext,
        channel_id: &str,
        description: &str,
        priority: i32,
        content: &str,
    ) -> Result<(Task, Thought), EngineError> {
        self.auth
            .require_scope(authorization, SCOPE_WRITE_TASK)?;

        let (filtered_content, references) = self
            .secrets
            .filter_incoming(content, description, None)
            .await?;

        let secret_references: Vec<SecretRefSummary> = references
            .iter()
            .map(|reference| SecretRefSummary {
                uuid: reference.uuid.to_string(),
                description: reference.description.clone(),
                sensitivity: reference.sensitivity.to_string(),
            })
            .collect();

        let context = TaskContext {
            author_id: Some(authorization.wa_id.clone()),
            origin_message_id: None,
            secret_references,
            extra: FxHashMap::default(),
        };
        let task = Task::new(channel_id, description, priority, context);
        let thought = Thought::seed(&task, &filtered_content);

        self.store.add_task(&task).await?;
        self.store.add_thought(&thought).await?;

        self.audit
            .record(
                AuditEventType::TaskCreated,
                &authorization.wa_id,
                json!({
                    "task_id": task.task_id,
                    "channel_id": task.channel_id,
                    "priority": task.priority,
                    "seed_thought_id": thought.thought_id,
                    "secrets_detected": references.len(),
                }),
            )
            .await?;

        Ok((task, thought))
    }

    /// Spawn the consolidation and adaptation background loops.
    #[must_use]
    pub fn start_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let consolidation = Arc::clone(&self.consolidator)
            .spawn_loops(ConsolidationSchedule::default(), shutdown.clone());
        let adaptation = Arc::clone(&self.adaptation).spawn_loop(
            std::time::Duration::from_secs(self.config.adaptation.cycle_interval_hours * 3600),
            std::time::Duration::from_secs(self.config.adaptation.settle_minutes * 60),
            shutdown,
        );
        vec![consolidation, adaptation]
    }

    /// Abort the signal listener; called on final shutdown after every
    /// emitter clone is gone.
    pub fn stop_signal_listener(&self) {
        self.signal_listener.abort();
    }
}
