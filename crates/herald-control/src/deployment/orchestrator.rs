//! Drives a run through its phases.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, info_span, Instrument};

use crate::binder::PermissionBinder;
use crate::config::{ControlConfig, TimeoutConfig};
use crate::control_plane::{ControlPlane, ResourceClient, ResourceId};
use crate::decision::Decision;
use crate::error::ControlResult;
use crate::gate::{self, GateOverrides};
use crate::reconcile::{ReconciliationResult, Reconciler, StepError};
use crate::report::{RunReport, TriggerOutcome};
use crate::state::{
    Abortable, Aborted, AwaitingServiceUrl, BuildingImage, Done, Phase, Pipeline, Run, RunState,
    Validating,
};
use crate::types::{DeploymentSpec, SchedulerTemplate, ServiceAccountRef};

/// Everything a run needs, resolved before it starts.
#[derive(Debug)]
pub struct DeploymentRequest {
    /// Which steps to run.
    pub pipeline: Pipeline,
    /// What to deploy. Also names the service to schedule against.
    pub deployment: DeploymentSpec,
    /// The recurring trigger, minus its URL-derived parts.
    pub schedule: SchedulerTemplate,
    /// Identity that signs trigger requests.
    pub account: ServiceAccountRef,
    /// Directory submitted to the build service.
    pub source_dir: PathBuf,
    /// Deploy an existing image instead of building one.
    pub skip_build: bool,
    /// Operator overrides for the precondition gate.
    pub overrides: GateOverrides,
}

impl DeploymentRequest {
    /// Build a request from configuration.
    pub fn from_config(config: &ControlConfig, pipeline: Pipeline) -> ControlResult<Self> {
        Ok(Self {
            pipeline,
            deployment: config.deployment_spec()?,
            schedule: config.scheduler_template()?,
            account: config.scheduler_account()?,
            source_dir: config.service.source_dir.clone(),
            skip_build: false,
            overrides: GateOverrides::default(),
        })
    }

    /// The deployed service.
    #[must_use]
    pub fn service_id(&self) -> ResourceId {
        ResourceId::new(
            self.deployment.project.clone(),
            &self.deployment.region,
            &self.deployment.service,
        )
    }

    /// The scheduler job.
    #[must_use]
    pub fn job_id(&self) -> ResourceId {
        ResourceId::new(
            self.schedule.project.clone(),
            &self.schedule.region,
            &self.schedule.name,
        )
    }
}

/// How a run ended.
///
/// Only a finished run can have its job triggered, so the `Done` run is
/// handed back before it is turned into a report.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every step succeeded.
    Done(Run<Done>),
    /// A step failed.
    Aborted(Run<Aborted>),
}

impl RunOutcome {
    /// Whether the run reached `Done`.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Finish the run.
    #[must_use]
    pub fn into_report(self) -> RunReport {
        match self {
            Self::Done(run) => run.into_report(),
            Self::Aborted(run) => run.into_report(),
        }
    }
}

/// Abort `$run` with the error if `$step` failed, otherwise yield its value.
macro_rules! try_step {
    ($run:ident, $step:expr) => {
        match $step {
            Ok(value) => value,
            Err(e) => return abort($run, e),
        }
    };
}

fn abort<S>(run: Run<S>, error: StepError) -> RunOutcome
where
    S: RunState,
    Run<S>: Abortable,
{
    error!(
        run_id = %run.id(),
        phase = %run.phase(),
        source = error.source_name(),
        error = %error,
        "run aborted"
    );
    RunOutcome::Aborted(run.abort(error))
}

fn step_done(phase: Phase, result: &ReconciliationResult) {
    info!(phase = %phase, outcome = %result, "step complete");
}

/// Orchestrates deployment runs.
///
/// Steps run strictly in order. The first failing step aborts the run and
/// nothing after it is attempted; no completed step is rolled back.
#[derive(Debug, Clone)]
pub struct DeploymentManager {
    client: Arc<ResourceClient>,
    reconciler: Reconciler,
    binder: PermissionBinder,
}

impl DeploymentManager {
    /// Create a manager over a control-plane backend.
    pub fn new(plane: Arc<dyn ControlPlane>, timeouts: TimeoutConfig) -> Self {
        let client = Arc::new(ResourceClient::new(plane, timeouts));
        Self {
            reconciler: Reconciler::new(Arc::clone(&client)),
            binder: PermissionBinder::new(Arc::clone(&client)),
            client,
        }
    }

    /// Run the request's pipeline to a terminal state.
    ///
    /// Running the same request twice converges: the second run reports
    /// `AlreadyExists` or `Updated` for every resource and never fails on
    /// something the first run created.
    pub async fn run(&self, request: &DeploymentRequest) -> RunOutcome {
        let run = Run::start(request.pipeline);
        let span = info_span!(
            "run",
            run_id = %run.id(),
            pipeline = %request.pipeline,
            service = %request.deployment.service,
        );
        self.execute(run, request).instrument(span).await
    }

    async fn execute(&self, run: Run<Validating>, request: &DeploymentRequest) -> RunOutcome {
        info!(
            project = %request.deployment.project,
            region = %request.deployment.region,
            "starting run"
        );

        try_step!(run, validate(request));
        step_done(Phase::Validating, &ReconciliationResult::AlreadyExists);

        let awaiting = if request.pipeline.deploys() {
            match self.build_and_deploy(run.validated(), request).await {
                Ok(awaiting) => awaiting,
                Err(outcome) => return outcome,
            }
        } else {
            run.validated_for_schedule()
        };

        let deployed = awaiting.deployed_url().cloned();
        let url = match deployed {
            Some(url) => url,
            None => try_step!(
                awaiting,
                self.client
                    .require_service(&request.service_id())
                    .await
                    .map_err(StepError::from)
            ),
        };
        info!(url = %url, "service url resolved");

        if !request.pipeline.schedules() {
            let done = awaiting.resolved_without_schedule(url);
            info!("run complete");
            return RunOutcome::Done(done);
        }

        let binding = awaiting.resolved(url);
        let result = self
            .binder
            .bind(&request.service_id(), &request.account)
            .await;
        let result = try_step!(binding, into_step(result));
        step_done(Phase::BindingPermissions, &result);
        let scheduling = binding.bound(result);

        let job = request
            .schedule
            .for_service(scheduling.service_url(), &request.account);
        let result = self.reconciler.ensure_scheduler_job(&job).await;
        let result = try_step!(scheduling, into_step(result));
        step_done(Phase::SchedulingJob, &result);
        let done = scheduling.scheduled(result, (&job).into());

        info!(job = %job.name, target = %job.target_uri, "run complete");
        RunOutcome::Done(done)
    }

    async fn build_and_deploy(
        &self,
        run: Run<BuildingImage>,
        request: &DeploymentRequest,
    ) -> Result<Run<AwaitingServiceUrl>, RunOutcome> {
        let spec = &request.deployment;

        let built = self
            .reconciler
            .ensure_image(&spec.project, &request.source_dir, &spec.image, request.skip_build)
            .await;
        let (result, image) = match built {
            Ok(built) => built,
            Err(e) => return Err(abort(run, e)),
        };
        step_done(Phase::BuildingImage, &result);
        let run = run.built(result, image);

        let deployed = self.reconciler.ensure_service(spec, run.image()).await;
        let (result, url) = match deployed {
            Ok(deployed) => deployed,
            Err(e) => return Err(abort(run, e)),
        };
        step_done(Phase::Deploying, &result);
        Ok(run.deployed(result, url))
    }

    /// Resolve the one-off job run for a finished run.
    ///
    /// Does nothing for runs that did not schedule. A failed trigger is
    /// recorded but leaves the run `Done`.
    pub async fn trigger(&self, run: &mut Run<Done>, request: &DeploymentRequest, decision: Decision) {
        if !request.pipeline.schedules() {
            return;
        }

        let outcome = if decision.proceeds() {
            let job = request.job_id();
            info!(job = %job.name, "running scheduler job once");
            match self.client.run_scheduler_job(&job).await {
                Ok(()) => TriggerOutcome::Started,
                Err(e) => TriggerOutcome::Failed(e.to_string()),
            }
        } else {
            TriggerOutcome::Declined
        };
        run.set_trigger(outcome);
    }
}

fn validate(request: &DeploymentRequest) -> Result<(), StepError> {
    if request.pipeline.deploys() {
        gate::validate(&request.deployment, request.overrides)?;
    }
    if request.pipeline.schedules() {
        gate::validate_schedule(&request.schedule)?;
    }
    Ok(())
}

fn into_step(result: ReconciliationResult) -> Result<ReconciliationResult, StepError> {
    match result {
        ReconciliationResult::Failed(e) => Err(e),
        ok => Ok(ok),
    }
}
