//! Gateway wiring.
//!
//! Builds the whole pipeline from an immutable [`Config`]: bus, channel
//! registry, tool registry + approval service (two-phase), orchestrator,
//! command router, inbound router, outbound dispatcher, and cron
//! service. Transports and LLM provider adapters are plugged in by the
//! caller; everything else is owned here.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use murmur_channels::{ChannelRegistry, ChannelTransport};
use murmur_core::approval::ApprovalService;
use murmur_core::agent::runs::RunRegistry;
use murmur_core::bus::MessageBus;
use murmur_core::commands::{
    CommandHandler, CommandRouter, CronHandler, DecisionHandler, HelpHandler, MemoryHandler,
    PromiseHandler, Reloader, RenderHandler, SecretHandler, StatusHandler, StopHandler,
};
use murmur_core::dispatch::OutboundDispatcher;
use murmur_core::orchestrator::{Orchestrate, Orchestrator, OrchestratorReply, OrchestratorRequest};
use murmur_core::render::RenderProfiles;
use murmur_core::router::InboundRouter;
use murmur_core::session::SessionRecorder;
use murmur_core::stores::MemorySessionStore;
use murmur_core::tools::registry::{ApprovalSink, ToolRegistry};
use murmur_core::vault::MemoryVault;
use murmur_llm::ChatProvider;
use murmur_services::cron_service::{CronService, CronServiceConfig, JobRunner};
use murmur_services::stores::{
    FileDecisionStore, FileMemoryStore, FilePromiseStore, FileTaskStore,
};
use murmur_tools::register_builtin_tools;
use murmur_types::config::Config;
use murmur_types::cron::CronJob;

/// A fully wired gateway.
pub struct App {
    pub bus: Arc<MessageBus>,
    pub router: Arc<InboundRouter>,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub cron: Arc<CronService>,
    pub orchestrator: Arc<Orchestrator>,
}

impl App {
    /// Wire everything from config plus externally supplied transports
    /// and provider adapters.
    pub async fn build(
        config: Config,
        transports: Vec<Arc<dyn ChannelTransport>>,
        providers: HashMap<String, Arc<dyn ChatProvider>>,
    ) -> anyhow::Result<Self> {
        let runtime_dir = config.workspace_dir.join("runtime");

        let bus = MessageBus::new();

        let mut registry = ChannelRegistry::new();
        for transport in transports {
            registry.register(transport);
        }
        let registry = Arc::new(registry);

        // Stores.
        let task_store = Arc::new(FileTaskStore::new(runtime_dir.join("tasks")));
        let memory_store = Arc::new(FileMemoryStore::new(runtime_dir.join("memory")));
        let decision_store = Arc::new(FileDecisionStore::new(
            runtime_dir.join("decisions.jsonl"),
        ));
        let promise_store = Arc::new(FilePromiseStore::new(runtime_dir.join("promises.jsonl")));
        let vault = Arc::new(MemoryVault::new());
        let recorder = Arc::new(SessionRecorder::new(
            Arc::new(MemorySessionStore::default()),
            Some(memory_store.clone()),
        ));

        // Tools and approvals are mutually dependent: registry first,
        // then the sink, then the replay handle.
        let tools = Arc::new(ToolRegistry::new());
        let approvals = ApprovalService::new(bus.clone());
        tools
            .set_approval_sink(approvals.clone() as Arc<dyn ApprovalSink>)
            .await;
        approvals.attach_tools(tools.clone());

        let runs = Arc::new(RunRegistry::new());
        let orchestrator = Orchestrator::new(
            config.clone(),
            bus.clone(),
            vault.clone(),
            recorder,
            tools.clone(),
            approvals.clone(),
            task_store,
            runs.clone(),
            providers,
        );

        // Cron drives the same orchestrator with a system identity.
        let default_target = config.providers.iter().find_map(|(name, p)| {
            (!p.default_channel.is_empty()).then(|| (name.clone(), p.default_channel.clone()))
        });
        let cron = CronService::new(
            runtime_dir.join("cron").join("jobs.jsonl"),
            bus.clone(),
            Arc::new(CronJobRunner {
                orchestrator: orchestrator.clone(),
                alias: config.default_alias.clone(),
            }),
            CronServiceConfig {
                tick_ms: config.cron.tick_ms,
                stuck_grace_ms: config.cron.stuck_grace_ms,
                default_target,
            },
        )
        .await?;

        // Built-in tools.
        register_builtin_tools(
            &tools,
            config.workspace_dir.clone(),
            bus.clone(),
            memory_store.clone(),
            cron.clone(),
            Arc::new(AppSpawner {
                orchestrator: orchestrator.clone(),
                bus: bus.clone(),
                alias: config.default_alias.clone(),
                active: Arc::new(AtomicUsize::new(0)),
            }),
        )
        .await;

        // Command surface.
        let profiles = Arc::new(RenderProfiles::new());
        let handlers: Vec<Arc<dyn CommandHandler>> = vec![
            Arc::new(StopHandler::new(runs.clone())),
            Arc::new(RenderHandler::new(profiles.clone())),
            Arc::new(SecretHandler::new(vault)),
            Arc::new(MemoryHandler::new(memory_store)),
            Arc::new(DecisionHandler::new(decision_store)),
            Arc::new(PromiseHandler::new(promise_store)),
            Arc::new(CronHandler::new(cron.clone())),
            Arc::new(reload_handler(tools.clone())),
            Arc::new(StatusHandler::new(tools.clone(), registry.providers())),
        ];
        let mut catalogue: Vec<String> =
            handlers.iter().map(|h| h.usage().to_owned()).collect();
        catalogue.insert(0, "/help — 사용 가능한 명령을 보여줍니다".into());
        let mut routed: Vec<Arc<dyn CommandHandler>> =
            vec![Arc::new(HelpHandler::new(catalogue))];
        routed.extend(handlers);
        let commands = Arc::new(CommandRouter::new(bus.clone(), profiles.clone(), routed));

        let dispatcher = Arc::new(OutboundDispatcher::new(
            bus.clone(),
            registry.clone(),
            config.dispatch.clone(),
        ));

        let router = InboundRouter::new(
            bus.clone(),
            registry.clone(),
            commands,
            approvals,
            orchestrator.clone() as Arc<dyn Orchestrate>,
            profiles,
            config,
        );

        Ok(Self {
            bus,
            router,
            dispatcher,
            cron,
            orchestrator,
        })
    }

    /// Start every worker and block until `cancel` fires; workers are
    /// awaited before return.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("gateway starting");

        let dispatcher = tokio::spawn(self.dispatcher.clone().run(cancel.clone()));
        let cron = tokio::spawn(self.cron.clone().start(cancel.clone()));
        let router = tokio::spawn(self.router.clone().run(cancel.clone()));

        cancel.cancelled().await;
        info!("gateway shutting down");

        let _ = router.await;
        let _ = dispatcher.await;
        let _ = cron.await;

        let (inbound, outbound) = self.bus.drain();
        if !inbound.is_empty() || !outbound.is_empty() {
            warn!(
                inbound = inbound.len(),
                outbound = outbound.len(),
                "messages dropped at shutdown"
            );
        }
        Ok(())
    }
}

/// Cron job runner: re-enters the orchestrator with a system identity.
struct CronJobRunner {
    orchestrator: Arc<Orchestrator>,
    alias: String,
}

#[async_trait]
impl JobRunner for CronJobRunner {
    async fn run_agent_turn(&self, job: &CronJob) -> Result<String, String> {
        let provider = job.payload.channel.clone().unwrap_or_default();
        let chat_id = job.payload.to.clone().unwrap_or_default();

        let reply: OrchestratorReply = self
            .orchestrator
            .handle(OrchestratorRequest {
                provider,
                chat_id,
                thread_id: None,
                sender_id: "cron".into(),
                alias: self.alias.clone(),
                text: job.payload.message.clone(),
                trigger_message_id: None,
                thread_context: Vec::new(),
                from_cron: true,
            })
            .await;

        match reply.error {
            Some(error) if reply.reply.is_empty() => Err(error),
            _ => Ok(reply.reply),
        }
    }
}

/// Sub-agent spawner: forks a sibling orchestrator run that reports its
/// result straight into the chat.
struct AppSpawner {
    orchestrator: Arc<Orchestrator>,
    bus: Arc<MessageBus>,
    alias: String,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl murmur_tools::SubAgentSpawner for AppSpawner {
    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn spawn(
        &self,
        objective: &str,
        channel: &str,
        chat_id: &str,
    ) -> Result<String, String> {
        let agent_id = format!("subagent:{}", uuid::Uuid::new_v4());
        let request = OrchestratorRequest {
            provider: channel.to_owned(),
            chat_id: chat_id.to_owned(),
            thread_id: None,
            sender_id: agent_id.clone(),
            alias: format!("{}-sub", self.alias),
            text: objective.to_owned(),
            trigger_message_id: None,
            thread_context: Vec::new(),
            from_cron: false,
        };

        let orchestrator = self.orchestrator.clone();
        let bus = self.bus.clone();
        let active = self.active.clone();
        let channel = channel.to_owned();
        let chat_id = chat_id.to_owned();

        active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let reply = orchestrator.handle(request).await;
            if !reply.suppress_reply && !reply.reply.is_empty() {
                let msg = murmur_types::event::OutboundMessage::new(
                    channel,
                    chat_id,
                    reply.reply,
                    murmur_types::event::MessageKind::AgentReply,
                );
                bus.publish_outbound(msg);
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(agent_id)
    }
}

/// `/reload`: re-reads the dynamic tool surface and reports counts.
fn reload_handler(tools: Arc<ToolRegistry>) -> murmur_core::commands::ReloadHandler {
    struct ToolCountReloader {
        tools: Arc<ToolRegistry>,
    }

    #[async_trait]
    impl Reloader for ToolCountReloader {
        async fn reload(&self) -> String {
            let tools = self.tools.list().await;
            format!("🔄 재로딩 완료 — 도구 {}개", tools.len())
        }
    }

    murmur_core::commands::ReloadHandler::new(Arc::new(ToolCountReloader { tools }))
}
