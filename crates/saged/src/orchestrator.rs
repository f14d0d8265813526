//! Run entry point.
//!
//! Resolves scope, policy and mode for a request, builds the run context and
//! spawns the pipeline. The caller gets the run id and the envelope stream
//! right away; the run proceeds as the stream is drained.

use sage_shared::envelope::ErrorPayload;
use sage_shared::{AnswerRequest, Envelope, Mode, ReplayCommand, ReplayMode, StageName};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::mode::ModeDecider;
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, PipelineFactory, Services};
use crate::policy::{PolicyBuilder, ScopeClassifier};

/// A started run.
pub struct RunHandle {
    pub run_id: String,
    pub events: ReceiverStream<Envelope>,
}

/// Everything that differs between a live run and a replay.
#[derive(Default)]
struct Launch {
    forced_mode: Option<Mode>,
    run_id: Option<String>,
    parent_run_id: Option<String>,
    allowed_tools: Option<Vec<String>>,
}

pub struct Orchestrator {
    config: Arc<Config>,
    classifier: ScopeClassifier,
    decider: ModeDecider,
    factory: PipelineFactory,
}

impl Orchestrator {
    pub fn new(services: Services, config: Arc<Config>) -> Self {
        Self {
            classifier: ScopeClassifier::new(config.access.owner_ids.iter().cloned()),
            decider: ModeDecider::from_config(&config.deep),
            factory: PipelineFactory::new(services, config.clone()),
            config,
        }
    }

    pub fn factory(&self) -> &PipelineFactory {
        &self.factory
    }

    /// Start a live run for `request` on behalf of `user_id`.
    pub fn start(&self, request: AnswerRequest, user_id: Option<String>) -> RunHandle {
        self.launch(request, user_id, Launch::default())
    }

    /// Re-execute a past request for `user_id` under a new run id linked to
    /// its parent.
    pub fn replay(&self, command: ReplayCommand, user_id: Option<String>) -> RunHandle {
        let forced_mode = match command.replay_mode {
            ReplayMode::Same => None,
            ReplayMode::Fast => Some(Mode::Fast),
            ReplayMode::Deep => Some(Mode::Deep),
        };
        info!(
            "[replay] parent {} mode {:?}",
            command.parent_run_id, command.replay_mode
        );
        self.launch(
            command.request,
            user_id,
            Launch {
                forced_mode,
                run_id: command.new_run_id,
                parent_run_id: Some(command.parent_run_id),
                allowed_tools: command.allowed_tools,
            },
        )
    }

    fn launch(&self, request: AnswerRequest, user_id: Option<String>, launch: Launch) -> RunHandle {
        let (tx, rx) = mpsc::channel(self.config.server.event_buffer.max(1));

        if let Err(e) = request.validate() {
            let run_id = launch
                .run_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            warn!("[run] {} rejected: {}", run_id, e);
            reject(&tx, &request, OrchestratorError::from(e));
            return RunHandle {
                run_id,
                events: ReceiverStream::new(rx),
            };
        }

        let scope = self.classifier.classify(request.scope, user_id.as_deref());
        let policy = PolicyBuilder::build(scope);
        let mode = launch
            .forced_mode
            .unwrap_or_else(|| self.decider.decide(&request, &policy));
        let complexity = self.decider.complexity(&request);

        let mut ctx = PipelineContext::new(request, scope, policy, mode, tx)
            .with_user(user_id)
            .with_profile(&self.config.tools.default_profile)
            .with_allowed_tools(launch.allowed_tools);
        if let Some(run_id) = launch.run_id {
            ctx = ctx.with_run_id(run_id);
        }
        if let Some(parent) = launch.parent_run_id {
            ctx = ctx.with_parent(parent);
        }
        if let Err(e) = ctx.put(keys::COMPLEXITY, complexity) {
            warn!("[run] complexity not recorded: {}", e);
        }

        let run_id = ctx.run_id.clone();
        info!(
            "[run] {} scope={} mode={} complexity={:.2} ({})",
            run_id,
            scope,
            mode,
            complexity,
            self.decider.scorer_name()
        );

        let runner = self.factory.runner(mode);
        let span = info_span!("run", run_id = %ctx.run_id, trace_id = %ctx.trace_id);
        tokio::spawn(async move { runner.run(ctx).await }.instrument(span));

        RunHandle {
            run_id,
            events: ReceiverStream::new(rx),
        }
    }
}

/// Put the single terminal error of a request that never started a run.
fn reject(tx: &mpsc::Sender<Envelope>, request: &AnswerRequest, err: OrchestratorError) {
    let payload = ErrorPayload {
        code: err.code(),
        stage: "request".to_string(),
        terminal: true,
        detail: err.to_string(),
    };
    let payload = serde_json::to_value(&payload).unwrap_or_default();
    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let envelope = Envelope::new(
        StageName::Error,
        err.to_string(),
        payload,
        1,
        &uuid::Uuid::new_v4().to_string(),
        &session_id,
    );
    // The channel is fresh and has room for one envelope.
    let _ = tx.try_send(envelope);
}
