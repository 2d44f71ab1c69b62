//! The record of one pipeline run.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ControlResult;
use crate::reconcile::{ReconciliationResult, StepError};
use crate::state::{Phase, Pipeline};
use crate::types::{ImageRef, RunId, SchedulerSpec, ServiceUrl};

/// Exit code for a run that reached `Done`.
pub const EXIT_DONE: i32 = 0;

/// Exit code for a run that was aborted.
pub const EXIT_ABORTED: i32 = 1;

/// One executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// The phase the step ran in.
    pub phase: Phase,
    /// What the step did.
    #[serde(flatten)]
    pub result: ReconciliationResult,
    /// When the step started.
    pub started_at: DateTime<Utc>,
    /// When the step finished.
    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    /// Wall-clock time the step took.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TerminalState {
    /// Every step succeeded.
    Done,
    /// A step failed; nothing after it ran.
    Aborted {
        /// The phase that failed.
        phase: Phase,
        /// Why it failed.
        error: StepError,
    },
}

/// The recurring trigger as it was submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleSummary {
    /// Job name.
    pub job: String,
    /// URI the job calls.
    pub target_uri: String,
    /// Cron expression.
    pub cron: String,
    /// Timezone the cron expression is evaluated in.
    pub timezone: String,
}

impl From<&SchedulerSpec> for ScheduleSummary {
    fn from(spec: &SchedulerSpec) -> Self {
        Self {
            job: spec.name.clone(),
            target_uri: spec.target_uri.clone(),
            cron: spec.cron.clone(),
            timezone: spec.timezone.clone(),
        }
    }
}

/// Result of the optional one-off job run after scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "cause", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// The operator chose not to run the job.
    Declined,
    /// The job was started.
    Started,
    /// The control plane refused to run the job.
    Failed(String),
}

/// Summary of a finished run, returned to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: RunId,
    /// Which steps the run covered.
    pub pipeline: Pipeline,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal state.
    pub finished_at: DateTime<Utc>,
    /// Every executed step, in order.
    pub steps: Vec<StepRecord>,
    /// How the run ended.
    pub terminal: TerminalState,
    /// Image the service runs, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    /// Public URL of the service, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_url: Option<ServiceUrl>,
    /// The trigger, when it was scheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSummary>,
    /// Outcome of the one-off run, when one was considered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerOutcome>,
}

impl RunReport {
    /// Whether the run reached `Done`.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.terminal, TerminalState::Done)
    }

    /// Process exit code for this run.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.is_done() {
            EXIT_DONE
        } else {
            EXIT_ABORTED
        }
    }

    /// The record for `phase`, if that step ran.
    #[must_use]
    pub fn step(&self, phase: Phase) -> Option<&StepRecord> {
        self.steps.iter().find(|step| step.phase == phase)
    }

    /// The failure that aborted the run.
    #[must_use]
    pub const fn failure(&self) -> Option<(Phase, &StepError)> {
        match &self.terminal {
            TerminalState::Done => None,
            TerminalState::Aborted { phase, error } => Some((*phase, error)),
        }
    }

    /// Human-readable summary for the terminal.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "run {} ({})", self.run_id, self.pipeline);
        for step in &self.steps {
            let outcome = if step.phase.is_check() && !step.result.is_failed() {
                "ok".to_owned()
            } else {
                step.result.to_string()
            };
            let elapsed = step.elapsed().num_milliseconds();
            let _ = writeln!(out, "  {:<22} {outcome} ({elapsed}ms)", step.phase);
        }

        match &self.terminal {
            TerminalState::Done => {
                let _ = writeln!(out, "done");
            }
            TerminalState::Aborted { phase, error } => {
                let _ = writeln!(out, "aborted in {phase} ({}): {error}", error.source_name());
            }
        }

        if let Some(url) = &self.service_url {
            let _ = writeln!(out, "service:   {url}");
        }
        if let Some(schedule) = &self.schedule {
            let _ = writeln!(
                out,
                "schedule:  {} -> {} ({} {})",
                schedule.job, schedule.target_uri, schedule.cron, schedule.timezone
            );
        }
        match &self.trigger {
            Some(TriggerOutcome::Started) => {
                let _ = writeln!(out, "trigger:   started");
            }
            Some(TriggerOutcome::Failed(cause)) => {
                let _ = writeln!(out, "trigger:   failed: {cause}");
            }
            Some(TriggerOutcome::Declined) | None => {}
        }
        out
    }

    /// Serialise the report as pretty-printed JSON.
    pub fn to_json(&self) -> ControlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON report to `path`.
    pub fn write_json(&self, path: impl AsRef<Path>) -> ControlResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
