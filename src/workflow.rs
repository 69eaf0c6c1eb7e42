//! Five-stage triage workflow engine.
//!
//! Drives `InputGuard → IssueSearch → Classification → Recommendation →
//! OutputGuard → Done`. Stages are pure functions over the current state
//! returning a [`StageUpdate`]; the engine merges updates, short-circuits to
//! `Done` the moment the state is blocked, and converts stage errors into a
//! safe halt (`errors` + `blocked=true`) instead of propagating them.
//!
//! Every stage invocation runs under a tracing span that records its
//! duration and outcome.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};

use crate::guard::GuardrailValidator;
use crate::llm::ChatModel;
use crate::stages;
use crate::state::{IssueState, StageUpdate};
use crate::store::VectorStore;

/// Shared collaborators, constructed once at startup and passed in
/// explicitly. All are stateless per call and safe to share across
/// concurrent workflow instances.
pub struct Services {
    pub store: Arc<VectorStore>,
    pub validator: Arc<GuardrailValidator>,
    pub llm: Arc<dyn ChatModel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    InputGuard,
    IssueSearch,
    Classification,
    Recommendation,
    OutputGuard,
    Done,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::InputGuard => "input_guard",
            Stage::IssueSearch => "issue_search",
            Stage::Classification => "classification",
            Stage::Recommendation => "recommendation",
            Stage::OutputGuard => "output_guard",
            Stage::Done => "done",
        }
    }
}

/// The transition table. A blocked state always resolves to `Done`; guard
/// early exits are expressed through the blocked latch rather than special
/// edges.
pub fn next_stage(current: Stage, state: &IssueState) -> Stage {
    if state.is_blocked() {
        return Stage::Done;
    }
    match current {
        Stage::InputGuard => Stage::IssueSearch,
        Stage::IssueSearch => Stage::Classification,
        Stage::Classification => Stage::Recommendation,
        Stage::Recommendation => Stage::OutputGuard,
        Stage::OutputGuard => Stage::Done,
        Stage::Done => Stage::Done,
    }
}

pub struct IssueWorkflow {
    services: Arc<Services>,
}

impl IssueWorkflow {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Run the full pipeline for one issue. Always returns a complete
    /// state; failures surface as `blocked` + `errors`, never as `Err`.
    pub async fn run(&self, title: &str, body: &str) -> IssueState {
        let mut state = IssueState::new(title, body);
        let mut stage = Stage::InputGuard;

        while stage != Stage::Done {
            let update = self.run_stage(stage, &state).await;
            state.apply(update);
            stage = next_stage(stage, &state);
        }

        state
    }

    /// Interceptor around one stage: span, duration, outcome recording,
    /// error capture.
    async fn run_stage(&self, stage: Stage, state: &IssueState) -> StageUpdate {
        let span = tracing::info_span!("stage", stage = stage.name());
        let started = Instant::now();

        let result = self
            .dispatch(stage, state)
            .instrument(span)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(update) => {
                info!(
                    stage = stage.name(),
                    duration_ms,
                    blocked = update.blocked.unwrap_or(false),
                    "stage complete"
                );
                update
            }
            Err(e) => {
                warn!(stage = stage.name(), duration_ms, error = %e, "stage failed");
                StageUpdate {
                    blocked: Some(true),
                    errors: vec![format!("{}: {:#}", stage.name(), e)],
                    ..Default::default()
                }
            }
        }
    }

    async fn dispatch(&self, stage: Stage, state: &IssueState) -> anyhow::Result<StageUpdate> {
        match stage {
            Stage::InputGuard => stages::input_guard(&self.services, state).await,
            Stage::IssueSearch => stages::issue_search(&self.services, state).await,
            Stage::Classification => stages::classification(&self.services, state).await,
            Stage::Recommendation => stages::recommendation(&self.services, state).await,
            Stage::OutputGuard => stages::output_guard(&self.services, state).await,
            Stage::Done => Ok(StageUpdate::default()),
        }
    }
}
