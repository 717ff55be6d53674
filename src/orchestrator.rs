//! Driver loop: picks up jobs that can advance and runs their stages.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::content::ContentService;
use crate::deploy::DeploymentPlanner;
use crate::error::ErrorKind;
use crate::scan::TargetScanner;
use crate::state_machine::{
    Event, FailureReason, Job, JobId, JobStateMachine, JobStatus, StateError, TargetIdentity,
};
use crate::store::JobQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Jobs fetched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Jobs driven at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Provisioning stages running at the same time, across all jobs.
    #[serde(default = "default_max_concurrent_provisioning")]
    pub max_concurrent_provisioning: usize,
    /// A provisioning stage running longer than this fails with `Timeout`.
    #[serde(default = "default_provisioning_deadline_secs")]
    pub provisioning_deadline_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_batch_size() -> usize {
    16
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_max_concurrent_provisioning() -> usize {
    2
}

fn default_provisioning_deadline_secs() -> u64 {
    900
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_concurrent_provisioning: default_max_concurrent_provisioning(),
            provisioning_deadline_secs: default_provisioning_deadline_secs(),
        }
    }
}

/// Drives jobs through scan, content generation and provisioning.
///
/// Each job gets one driver task that runs its stages strictly in order
/// until the job reaches a point where it waits for a human (PendingAudit,
/// Rejected) or ends. Jobs found mid-stage, e.g. after a crash, re-run that
/// stage from the top.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
    drivers: Arc<AsyncMutex<JoinSet<DriverExit>>>,
}

struct Inner {
    machine: JobStateMachine,
    scanner: Arc<dyn TargetScanner>,
    content: Arc<dyn ContentService>,
    planner: Arc<DeploymentPlanner>,
    settings: OrchestratorSettings,
    provisioning: Semaphore,
    in_flight: Mutex<HashSet<JobId>>,
}

/// How a driver task ended. The driver runs in its own task so a panic is
/// caught by its join handle and still attributed to the job.
type DriverExit = (JobId, Result<Result<JobStatus>, JoinError>);

/// Removes the job from the in-flight set when its driver ends, panics
/// included.
struct Claim {
    inner: Arc<Inner>,
    job_id: JobId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.job_id);
    }
}

impl Orchestrator {
    pub fn new(
        machine: JobStateMachine,
        scanner: Arc<dyn TargetScanner>,
        content: Arc<dyn ContentService>,
        planner: Arc<DeploymentPlanner>,
        settings: OrchestratorSettings,
    ) -> Self {
        let permits = settings.max_concurrent_provisioning.max(1);
        Self {
            inner: Arc::new(Inner {
                machine,
                scanner,
                content,
                planner,
                settings,
                provisioning: Semaphore::new(permits),
                in_flight: Mutex::new(HashSet::new()),
            }),
            drivers: Arc::default(),
        }
    }

    pub fn machine(&self) -> &JobStateMachine {
        &self.inner.machine
    }

    fn eligible(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = JobStatus::ALL
            .into_iter()
            .filter(|s| s.is_automatic())
            .collect();
        let policy = self.inner.machine.policy();
        if policy.enabled && policy.automatic {
            statuses.push(JobStatus::Rejected);
        }
        statuses
    }

    /// Fetch jobs that can advance and start a driver for each one not
    /// already running. Returns how many drivers were started.
    pub async fn tick(&self) -> Result<usize, StateError> {
        // Running jobs still match the query, so look past them.
        let settings = &self.inner.settings;
        let running = self.inner.in_flight.lock().len();
        let limit = settings.batch_size.max(settings.max_concurrent_jobs).max(1) + running;
        let jobs = self
            .inner
            .machine
            .store()
            .find(&JobQuery::AnyStatus(self.eligible()), limit)
            .await?;

        let mut drivers = self.drivers.lock().await;
        let mut started = 0;
        for job in jobs {
            let Some(claim) = self.claim(&job.id) else {
                continue;
            };
            let inner = self.inner.clone();
            let job_id = job.id.clone();
            drivers.spawn(async move {
                let driver = {
                    let job_id = job_id.clone();
                    tokio::spawn(async move { drive(&inner, &job_id).await })
                };
                let exit = driver.await;
                drop(claim);
                (job_id, exit)
            });
            debug!(job_id = %job.id, status = %job.status, "driver started");
            started += 1;
        }
        Ok(started)
    }

    fn claim(&self, job_id: &JobId) -> Option<Claim> {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight.len() >= self.inner.settings.max_concurrent_jobs.max(1)
            || !in_flight.insert(job_id.clone())
        {
            return None;
        }
        Some(Claim {
            inner: self.inner.clone(),
            job_id: job_id.clone(),
        })
    }

    /// Wait for every running driver. Returns how many ended in an error.
    pub async fn wait_idle(&self) -> usize {
        let mut drivers = self.drivers.lock().await;
        let mut failed = 0;
        while let Some(joined) = drivers.join_next().await {
            if !self.settle(joined).await {
                failed += 1;
            }
        }
        failed
    }

    /// Collect drivers that already finished without waiting.
    async fn reap(&self) {
        let mut drivers = self.drivers.lock().await;
        while let Some(joined) = drivers.try_join_next() {
            self.settle(joined).await;
        }
    }

    /// Log a finished driver. A panicked driver's job is failed so the next
    /// poll does not pick it up again.
    async fn settle(&self, joined: Result<DriverExit, JoinError>) -> bool {
        let (job_id, exit) = match joined {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "driver supervisor crashed");
                return false;
            }
        };
        match exit {
            Ok(Ok(status)) => {
                debug!(job_id = %job_id, status = %status, "driver finished");
                true
            }
            Ok(Err(e)) => {
                error!(job_id = %job_id, error = %format!("{e:#}"), "driver stopped");
                false
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "driver crashed");
                if e.is_panic() {
                    let event =
                        Event::fail(FailureReason::Aborted, "internal error while driving job");
                    if let Err(e) = self.inner.machine.transition(&job_id, event).await {
                        warn!(job_id = %job_id, error = %e, "could not fail crashed job");
                    }
                }
                false
            }
        }
    }

    /// Poll until nothing is left to advance. Jobs parked for a human stay
    /// where they are.
    pub async fn run_until_idle(&self) -> Result<(), StateError> {
        loop {
            let started = self.tick().await?;
            if started == 0 {
                return Ok(());
            }
            let failed = self.wait_idle().await;
            if failed == started {
                warn!(failed, "every driver in the last pass failed, stopping");
                return Ok(());
            }
        }
    }

    /// Poll every `poll_interval_ms` until `shutdown` fires, then wait for
    /// running drivers.
    pub async fn run(&self, shutdown: CancellationToken) {
        let poll = Duration::from_millis(self.inner.settings.poll_interval_ms.max(1));
        info!(
            poll_ms = poll.as_millis() as u64,
            max_jobs = self.inner.settings.max_concurrent_jobs,
            max_provisioning = self.inner.settings.max_concurrent_provisioning,
            "orchestrator started"
        );
        loop {
            self.reap().await;
            match self.tick().await {
                Ok(0) => {}
                Ok(started) => debug!(started, "poll started drivers"),
                Err(e) => error!(error = %e, "poll failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll) => {}
            }
        }
        info!("shutting down, waiting for running jobs");
        let failed = self.wait_idle().await;
        info!(failed, "orchestrator stopped");
    }
}

/// Run one job's stages until it parks or ends.
async fn drive(inner: &Inner, job_id: &JobId) -> Result<JobStatus> {
    loop {
        let job = inner.machine.get(job_id).await?;
        let step = match job.status {
            JobStatus::Queued => inner
                .machine
                .transition_from(job_id, JobStatus::Queued, Event::Start)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from),
            JobStatus::Scanning => scan_stage(inner, &job).await,
            JobStatus::GeneratingContent => content_stage(inner, &job).await,
            JobStatus::Provisioning => provisioning_stage(inner, &job).await,
            JobStatus::Rejected if inner.machine.policy().automatic => inner
                .machine
                .transition_from(job_id, JobStatus::Rejected, Event::Resubmit)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from),
            status => return Ok(status),
        };
        match step {
            Ok(()) => {}
            Err(e) if matches!(e.downcast_ref::<StateError>(), Some(StateError::StaleStage { .. })) => {
                debug!(job_id = %job_id, "job moved on underneath the driver, re-reading");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Failure reason for a stage error: retries exhausted and bad input keep
/// their own reason, everything else gets the stage's.
fn reason_for(kind: ErrorKind, stage: FailureReason) -> FailureReason {
    match kind {
        ErrorKind::MaxRetriesExceeded => FailureReason::MaxRetriesExceeded,
        ErrorKind::Validation | ErrorKind::PayloadTooLarge => FailureReason::Validation,
        ErrorKind::Timeout => FailureReason::Timeout,
        _ => stage,
    }
}

async fn scan_stage(inner: &Inner, job: &Job) -> Result<()> {
    let id = &job.id;
    let domain = &job.input.domain;
    let note = format!("fetching {domain}");
    inner
        .machine
        .record_progress(id, JobStatus::Scanning, 10, Some(note.as_str()))
        .await?;

    let event = match inner.scanner.scan(domain).await {
        Ok(report) => Event::ScanOk {
            target: TargetIdentity {
                display_name: report.display_name,
                domain_candidate: report.domain_candidate,
            },
            html: report.html,
        },
        Err(e) => {
            warn!(job_id = %id, domain = %domain, error = %e, "scan failed");
            match reason_for(e.kind(), FailureReason::ScanFailed) {
                FailureReason::ScanFailed => Event::ScanFail {
                    detail: e.to_string(),
                },
                reason => Event::fail(reason, e.to_string()),
            }
        }
    };
    inner
        .machine
        .transition_from(id, JobStatus::Scanning, event)
        .await?;
    Ok(())
}

async fn content_stage(inner: &Inner, job: &Job) -> Result<()> {
    let id = &job.id;
    inner
        .machine
        .record_progress(id, JobStatus::GeneratingContent, 10, Some("generating site copy"))
        .await?;

    let html = job.result.scanned_html.as_deref().unwrap_or_default();
    let url = format!("https://{}/", job.input.domain);
    let event = match inner.content.generate(html, &url).await {
        Ok(content) => Event::ContentOk { content },
        Err(e) => {
            warn!(job_id = %id, error = %e, "content generation failed");
            match reason_for(e.kind(), FailureReason::ContentFailed) {
                FailureReason::ContentFailed => Event::ContentFail {
                    detail: e.to_string(),
                },
                reason => Event::fail(reason, e.to_string()),
            }
        }
    };
    inner
        .machine
        .transition_from(id, JobStatus::GeneratingContent, event)
        .await?;
    Ok(())
}

async fn provisioning_stage(inner: &Inner, job: &Job) -> Result<()> {
    let id = &job.id;
    let stage = JobStatus::Provisioning;

    let plan = match inner.planner.plan(job) {
        Ok(plan) => plan,
        Err(e) => {
            let event = Event::DeployFail {
                reason: e.failure_reason(),
                detail: e.to_string(),
            };
            inner.machine.transition_from(id, stage, event).await?;
            return Ok(());
        }
    };

    if job.progress > 0 {
        info!(job_id = %id, domain = %plan.domain, "resuming interrupted provisioning");
    }
    let _permit = inner
        .provisioning
        .acquire()
        .await
        .context("provisioning semaphore closed")?;
    let note = format!(
        "deploying {} files to {} with blueprint {}",
        plan.request.files.len(),
        plan.domain,
        plan.request.blueprint_id
    );
    inner
        .machine
        .record_progress(id, stage, 20, Some(note.as_str()))
        .await?;

    let deadline = Duration::from_secs(inner.settings.provisioning_deadline_secs);
    let event = match timeout(deadline, inner.planner.execute(&plan)).await {
        Ok(Ok(result)) => Event::DeployOk {
            url: result.url,
            credentials: result.credentials,
        },
        Ok(Err(e)) => {
            warn!(job_id = %id, domain = %plan.domain, error = %e, "deployment failed");
            Event::DeployFail {
                reason: e.failure_reason(),
                detail: e.to_string(),
            }
        }
        Err(_) => {
            warn!(
                job_id = %id,
                domain = %plan.domain,
                deadline_secs = deadline.as_secs(),
                "provisioning deadline exceeded, remote artifacts left for manual cleanup"
            );
            Event::fail(
                FailureReason::Timeout,
                format!(
                    "no result within {}s; anything already created on {} was left for manual cleanup",
                    deadline.as_secs(),
                    plan.domain
                ),
            )
        }
    };
    inner.machine.transition_from(id, stage, event).await?;
    Ok(())
}
