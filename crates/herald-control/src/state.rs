//! Typestate pattern for the deployment run.
//!
//! Each phase of a run is its own type, and each type only exposes the
//! transitions that are legal from it. Data a later phase depends on (the
//! image to deploy, the service URL to bind and schedule against) is carried
//! by the state itself, so a phase cannot be entered without it.
//!
//! ```text
//! Validating -> BuildingImage -> Deploying -> AwaitingServiceUrl
//!     |                                            |        |
//!     '--------------------------------------------'        '-> Done (deploy only)
//!                 (schedule only)                  |
//!                                                  v
//!                         BindingPermissions -> SchedulingJob -> Done
//!
//! any non-terminal phase -> Aborted
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::reconcile::{ReconciliationResult, StepError};
use crate::report::{RunReport, ScheduleSummary, StepRecord, TerminalState, TriggerOutcome};
use crate::types::{ImageRef, RunId, ServiceUrl};

// =============================================================================
// Runtime phase and pipeline
// =============================================================================

/// Phase of a run, as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Pre-flight checks.
    Validating,
    /// Building and pushing the container image.
    BuildingImage,
    /// Creating or updating the service.
    Deploying,
    /// Resolving the service URL.
    AwaitingServiceUrl,
    /// Ensuring the scheduler identity can invoke the service.
    BindingPermissions,
    /// Creating or replacing the scheduler job.
    SchedulingJob,
    /// Every step succeeded.
    Done,
    /// A step failed.
    Aborted,
}

impl Phase {
    /// Get the phase name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::BuildingImage => "building_image",
            Self::Deploying => "deploying",
            Self::AwaitingServiceUrl => "awaiting_service_url",
            Self::BindingPermissions => "binding_permissions",
            Self::SchedulingJob => "scheduling_job",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Whether the phase only checks or reads, and never mutates.
    #[must_use]
    pub const fn is_check(&self) -> bool {
        matches!(self, Self::Validating | Self::AwaitingServiceUrl)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which steps a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Build, deploy, bind and schedule.
    Full,
    /// Build and deploy only.
    DeployOnly,
    /// Bind and schedule against an already deployed service.
    ScheduleOnly,
}

impl Pipeline {
    /// The phases a successful run passes through, in order.
    #[must_use]
    pub const fn phases(&self) -> &'static [Phase] {
        match self {
            Self::Full => &[
                Phase::Validating,
                Phase::BuildingImage,
                Phase::Deploying,
                Phase::AwaitingServiceUrl,
                Phase::BindingPermissions,
                Phase::SchedulingJob,
            ],
            Self::DeployOnly => &[
                Phase::Validating,
                Phase::BuildingImage,
                Phase::Deploying,
                Phase::AwaitingServiceUrl,
            ],
            Self::ScheduleOnly => &[
                Phase::Validating,
                Phase::AwaitingServiceUrl,
                Phase::BindingPermissions,
                Phase::SchedulingJob,
            ],
        }
    }

    /// Whether the run builds and deploys.
    #[must_use]
    pub const fn deploys(&self) -> bool {
        matches!(self, Self::Full | Self::DeployOnly)
    }

    /// Whether the run binds and schedules.
    #[must_use]
    pub const fn schedules(&self) -> bool {
        matches!(self, Self::Full | Self::ScheduleOnly)
    }

    /// Get the pipeline name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::DeployOnly => "deploy_only",
            Self::ScheduleOnly => "schedule_only",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// State types
// =============================================================================

/// Marker trait for run states.
pub trait RunState: private::Sealed + Send + Sync {
    /// The reported phase for this state.
    const PHASE: Phase;
}

mod private {
    pub trait Sealed {}
}

/// Checking preconditions.
#[derive(Debug)]
pub struct Validating;

/// Building the image.
#[derive(Debug)]
pub struct BuildingImage;

/// Deploying the service.
#[derive(Debug)]
pub struct Deploying {
    image: ImageRef,
}

/// Resolving the service URL.
#[derive(Debug)]
pub struct AwaitingServiceUrl {
    deployed: Option<ServiceUrl>,
}

/// Binding the scheduler identity.
#[derive(Debug)]
pub struct BindingPermissions {
    url: ServiceUrl,
}

/// Creating the scheduler job.
#[derive(Debug)]
pub struct SchedulingJob {
    url: ServiceUrl,
}

/// Every step succeeded.
#[derive(Debug)]
pub struct Done;

/// A step failed.
#[derive(Debug)]
pub struct Aborted {
    phase: Phase,
    error: StepError,
}

macro_rules! run_states {
    ($($state:ident),* $(,)?) => {
        $(
            impl private::Sealed for $state {}
            impl RunState for $state {
                const PHASE: Phase = Phase::$state;
            }
        )*
    };
}

run_states!(
    Validating,
    BuildingImage,
    Deploying,
    AwaitingServiceUrl,
    BindingPermissions,
    SchedulingJob,
    Done,
    Aborted,
);

// =============================================================================
// Run struct parameterised by state
// =============================================================================

/// Data accumulated over a run, whatever its state.
#[derive(Debug)]
struct RunData {
    id: RunId,
    pipeline: Pipeline,
    started_at: DateTime<Utc>,
    step_started_at: DateTime<Utc>,
    steps: Vec<StepRecord>,
    image: Option<ImageRef>,
    service_url: Option<ServiceUrl>,
    schedule: Option<ScheduleSummary>,
    trigger: Option<TriggerOutcome>,
}

/// A run in a specific state.
///
/// Transitions consume the run and record the step that just finished.
#[derive(Debug)]
pub struct Run<S: RunState> {
    data: RunData,
    state: S,
}

impl<S: RunState> Run<S> {
    /// The run identifier.
    #[must_use]
    pub const fn id(&self) -> &RunId {
        &self.data.id
    }

    /// The current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        S::PHASE
    }

    /// Record the current step and move to `next`.
    fn advance<T: RunState>(mut self, result: ReconciliationResult, next: T) -> Run<T> {
        debug_assert!(!result.is_failed(), "failed steps must abort the run");
        self.record(result);
        Run {
            data: self.data,
            state: next,
        }
    }

    fn record(&mut self, result: ReconciliationResult) {
        let now = Utc::now();
        self.data.steps.push(StepRecord {
            phase: S::PHASE,
            result,
            started_at: self.data.step_started_at,
            finished_at: now,
        });
        self.data.step_started_at = now;
    }
}

/// Implemented by every non-terminal state: record the failed step and
/// abort the run.
pub trait Abortable {
    /// Record the failed step and abort the run.
    #[must_use]
    fn abort(self, error: StepError) -> Run<Aborted>;
}

macro_rules! abortable {
    ($($state:ident),* $(,)?) => {
        $(
            impl Abortable for Run<$state> {
                fn abort(mut self, error: StepError) -> Run<Aborted> {
                    self.record(ReconciliationResult::Failed(error.clone()));
                    Run {
                        data: self.data,
                        state: Aborted {
                            phase: Phase::$state,
                            error,
                        },
                    }
                }
            }
        )*
    };
}

abortable!(
    Validating,
    BuildingImage,
    Deploying,
    AwaitingServiceUrl,
    BindingPermissions,
    SchedulingJob,
);

// =============================================================================
// State transitions
// =============================================================================

impl Run<Validating> {
    /// Start a new run.
    #[must_use]
    pub fn start(pipeline: Pipeline) -> Self {
        let now = Utc::now();
        Self {
            data: RunData {
                id: RunId::generate(),
                pipeline,
                started_at: now,
                step_started_at: now,
                steps: Vec::new(),
                image: None,
                service_url: None,
                schedule: None,
                trigger: None,
            },
            state: Validating,
        }
    }

    /// Preconditions hold; build the image next.
    #[must_use]
    pub fn validated(self) -> Run<BuildingImage> {
        self.advance(ReconciliationResult::AlreadyExists, BuildingImage)
    }

    /// Preconditions hold; look up the already deployed service next.
    #[must_use]
    pub fn validated_for_schedule(self) -> Run<AwaitingServiceUrl> {
        self.advance(
            ReconciliationResult::AlreadyExists,
            AwaitingServiceUrl { deployed: None },
        )
    }
}

impl Run<BuildingImage> {
    /// The image exists under its tag.
    #[must_use]
    pub fn built(mut self, result: ReconciliationResult, image: ImageRef) -> Run<Deploying> {
        self.data.image = Some(image.clone());
        self.advance(result, Deploying { image })
    }
}

impl Run<Deploying> {
    /// The image to deploy.
    #[must_use]
    pub const fn image(&self) -> &ImageRef {
        &self.state.image
    }

    /// The service runs the image and reported its URL.
    #[must_use]
    pub fn deployed(self, result: ReconciliationResult, url: ServiceUrl) -> Run<AwaitingServiceUrl> {
        self.advance(result, AwaitingServiceUrl { deployed: Some(url) })
    }
}

impl Run<AwaitingServiceUrl> {
    /// The URL reported by the deploy step, if this run deployed.
    #[must_use]
    pub const fn deployed_url(&self) -> Option<&ServiceUrl> {
        self.state.deployed.as_ref()
    }

    /// The URL is known; bind permissions next.
    #[must_use]
    pub fn resolved(mut self, url: ServiceUrl) -> Run<BindingPermissions> {
        self.data.service_url = Some(url.clone());
        self.advance(
            ReconciliationResult::AlreadyExists,
            BindingPermissions { url },
        )
    }

    /// The URL is known and nothing is to be scheduled.
    #[must_use]
    pub fn resolved_without_schedule(mut self, url: ServiceUrl) -> Run<Done> {
        self.data.service_url = Some(url);
        self.advance(ReconciliationResult::AlreadyExists, Done)
    }
}

impl Run<BindingPermissions> {
    /// The service the identity is bound to.
    #[must_use]
    pub const fn service_url(&self) -> &ServiceUrl {
        &self.state.url
    }

    /// The identity can invoke the service.
    #[must_use]
    pub fn bound(self, result: ReconciliationResult) -> Run<SchedulingJob> {
        let url = self.state.url.clone();
        self.advance(result, SchedulingJob { url })
    }
}

impl Run<SchedulingJob> {
    /// The service the job will call.
    #[must_use]
    pub const fn service_url(&self) -> &ServiceUrl {
        &self.state.url
    }

    /// The job matches the desired definition.
    #[must_use]
    pub fn scheduled(mut self, result: ReconciliationResult, schedule: ScheduleSummary) -> Run<Done> {
        self.data.schedule = Some(schedule);
        self.advance(result, Done)
    }
}

impl Run<Done> {
    /// Record the outcome of the optional one-off job run.
    ///
    /// The run stays `Done` whatever the outcome.
    pub fn set_trigger(&mut self, outcome: TriggerOutcome) {
        self.data.trigger = Some(outcome);
    }

    /// Finish the run.
    #[must_use]
    pub fn into_report(self) -> RunReport {
        report(self.data, TerminalState::Done)
    }
}

impl Run<Aborted> {
    /// The phase that failed.
    #[must_use]
    pub const fn failed_phase(&self) -> Phase {
        self.state.phase
    }

    /// Why the run was aborted.
    #[must_use]
    pub const fn error(&self) -> &StepError {
        &self.state.error
    }

    /// Finish the run.
    #[must_use]
    pub fn into_report(self) -> RunReport {
        let terminal = TerminalState::Aborted {
            phase: self.state.phase,
            error: self.state.error,
        };
        report(self.data, terminal)
    }
}

fn report(data: RunData, terminal: TerminalState) -> RunReport {
    RunReport {
        run_id: data.id,
        pipeline: data.pipeline,
        started_at: data.started_at,
        finished_at: Utc::now(),
        steps: data.steps,
        terminal,
        image: data.image,
        service_url: data.service_url,
        schedule: data.schedule,
        trigger: data.trigger,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, ValidationError};

    fn url() -> ServiceUrl {
        ServiceUrl::new("https://ga4-analytics-agent-abc.run.app")
    }

    fn schedule() -> ScheduleSummary {
        ScheduleSummary {
            job: "ga4-analytics-agent-trigger".to_owned(),
            target_uri: url().join("run"),
            cron: "0 7 * * 1".to_owned(),
            timezone: "Europe/Paris".to_owned(),
        }
    }

    #[test]
    fn full_pipeline_transitions() {
        let run = Run::start(Pipeline::Full);
        assert_eq!(run.phase(), Phase::Validating);

        let run = run.validated();
        assert_eq!(run.phase(), Phase::BuildingImage);

        let image = ImageRef::new("gcr.io/p/agent:latest");
        let run = run.built(ReconciliationResult::Created, image.clone());
        assert_eq!(run.image(), &image);

        let run = run.deployed(ReconciliationResult::Created, url());
        assert_eq!(run.deployed_url(), Some(&url()));

        let run = run.resolved(url());
        let run = run.bound(ReconciliationResult::Created);
        assert_eq!(run.service_url(), &url());

        let report = run
            .scheduled(ReconciliationResult::Created, schedule())
            .into_report();

        assert!(report.is_done());
        let phases: Vec<Phase> = report.steps.iter().map(|s| s.phase).collect();
        assert_eq!(phases, Pipeline::Full.phases());
        assert_eq!(report.image, Some(image));
        assert_eq!(report.service_url, Some(url()));
    }

    #[test]
    fn abort_records_failed_step() {
        let error = StepError::Build(BuildError::TimedOut(std::time::Duration::from_secs(1)));
        let run = Run::start(Pipeline::Full).validated().abort(error.clone());

        assert_eq!(run.failed_phase(), Phase::BuildingImage);
        assert_eq!(run.error(), &error);

        let report = run.into_report();
        assert_eq!(report.steps.len(), 2);
        assert!(report.steps[1].result.is_failed());
        assert_eq!(
            report.terminal,
            TerminalState::Aborted {
                phase: Phase::BuildingImage,
                error,
            }
        );
    }

    #[test]
    fn validation_abort_has_single_step() {
        let error = StepError::Validation(ValidationError::PlaceholderUnresolved {
            uri: "https://XXXX".to_owned(),
        });
        let report = Run::start(Pipeline::Full).abort(error).into_report();
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].phase, Phase::Validating);
    }

    #[test]
    fn deploy_only_finishes_at_url() {
        let report = Run::start(Pipeline::DeployOnly)
            .validated()
            .built(ReconciliationResult::AlreadyExists, ImageRef::new("img"))
            .deployed(ReconciliationResult::Updated, url())
            .resolved_without_schedule(url())
            .into_report();

        let phases: Vec<Phase> = report.steps.iter().map(|s| s.phase).collect();
        assert_eq!(phases, Pipeline::DeployOnly.phases());
        assert!(report.schedule.is_none());
    }

    #[test]
    fn trigger_outcome_does_not_change_terminal_state() {
        let mut run = Run::start(Pipeline::ScheduleOnly)
            .validated_for_schedule()
            .resolved(url())
            .bound(ReconciliationResult::AlreadyExists)
            .scheduled(ReconciliationResult::Updated, schedule());
        run.set_trigger(TriggerOutcome::Failed("PERMISSION_DENIED".to_owned()));

        let report = run.into_report();
        assert!(report.is_done());
        assert_eq!(
            report.trigger,
            Some(TriggerOutcome::Failed("PERMISSION_DENIED".to_owned()))
        );
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Done.is_terminal());
        assert!(Phase::Aborted.is_terminal());
        assert!(!Pipeline::Full.phases().iter().any(Phase::is_terminal));
    }
}
