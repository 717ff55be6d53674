use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::job::{FailureReason, Job, JobStatus, LogEntry, TargetIdentity};
use crate::content::ContentPackage;
use crate::provisioning::TransferCredentials;

/// Something that happened to a job. Each event carries the payload it
/// contributes to [`JobResult`](super::JobResult).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    ScanOk {
        target: TargetIdentity,
        html: String,
    },
    ScanFail {
        detail: String,
    },
    ContentOk {
        content: ContentPackage,
    },
    ContentFail {
        detail: String,
    },
    DeployOk {
        url: String,
        credentials: Option<TransferCredentials>,
    },
    DeployFail {
        reason: FailureReason,
        detail: String,
    },
    Approve,
    Reject {
        issues: Vec<String>,
    },
    Resubmit,
    Fail {
        reason: FailureReason,
        detail: String,
    },
}

/// Payload-free name of an [`Event`], used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    ScanOk,
    ScanFail,
    ContentOk,
    ContentFail,
    DeployOk,
    DeployFail,
    Approve,
    Reject,
    Resubmit,
    Fail,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Start => "start",
            EventKind::ScanOk => "scan_ok",
            EventKind::ScanFail => "scan_fail",
            EventKind::ContentOk => "content_ok",
            EventKind::ContentFail => "content_fail",
            EventKind::DeployOk => "deploy_ok",
            EventKind::DeployFail => "deploy_fail",
            EventKind::Approve => "approve",
            EventKind::Reject => "reject",
            EventKind::Resubmit => "resubmit",
            EventKind::Fail => "fail",
        };
        f.write_str(s)
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Start => EventKind::Start,
            Event::ScanOk { .. } => EventKind::ScanOk,
            Event::ScanFail { .. } => EventKind::ScanFail,
            Event::ContentOk { .. } => EventKind::ContentOk,
            Event::ContentFail { .. } => EventKind::ContentFail,
            Event::DeployOk { .. } => EventKind::DeployOk,
            Event::DeployFail { .. } => EventKind::DeployFail,
            Event::Approve => EventKind::Approve,
            Event::Reject { .. } => EventKind::Reject,
            Event::Resubmit => EventKind::Resubmit,
            Event::Fail { .. } => EventKind::Fail,
        }
    }

    pub fn fail(reason: FailureReason, detail: impl Into<String>) -> Self {
        Event::Fail {
            reason,
            detail: detail.into(),
        }
    }
}

impl JobStatus {
    /// The status `event` leads to from `self`, or `None` if the edge does
    /// not exist.
    pub fn on(self, event: EventKind) -> Option<JobStatus> {
        use EventKind as E;
        use JobStatus as S;

        match (self, event) {
            (S::Queued, E::Start) => Some(S::Scanning),
            (S::Scanning, E::ScanOk) => Some(S::GeneratingContent),
            (S::Scanning, E::ScanFail) => Some(S::Failed),
            (S::GeneratingContent, E::ContentOk) => Some(S::Provisioning),
            (S::GeneratingContent, E::ContentFail) => Some(S::Failed),
            (S::Provisioning, E::DeployOk) => Some(S::PendingAudit),
            (S::Provisioning, E::DeployFail) => Some(S::Failed),
            (S::PendingAudit, E::Approve) => Some(S::Approved),
            (S::PendingAudit, E::Reject) => Some(S::Rejected),
            (S::Rejected, E::Resubmit) => Some(S::Provisioning),
            (from, E::Fail) if !from.is_terminal() => Some(S::Failed),
            _ => None,
        }
    }
}

/// Whether and how often a rejected job may go back to provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResubmitPolicy {
    /// Allow `Rejected → Provisioning` at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bound on resubmissions per job.
    #[serde(default = "default_max_resubmits")]
    pub max_resubmits: u32,
    /// Let the driver loop resubmit rejected jobs without an operator.
    #[serde(default)]
    pub automatic: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_resubmits() -> u32 {
    2
}

impl Default for ResubmitPolicy {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_resubmits: default_max_resubmits(),
            automatic: false,
        }
    }
}

/// A status change that was applied to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub event: EventKind,
}

/// Rejected edge of the transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub event: EventKind,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot apply `{}` to a job in `{}`", self.event, self.from)
    }
}

/// Apply `event` to an in-memory copy of a job.
///
/// On success the job has its new status, a progress value for the entered
/// stage, exactly one new log entry and a fresh `updated_at`. On error the
/// job is left untouched. Persistence is the caller's business.
pub fn apply(
    job: &mut Job,
    event: Event,
    policy: &ResubmitPolicy,
) -> Result<Transition, InvalidTransition> {
    let from = job.status;
    let kind = event.kind();
    let Some(mut to) = from.on(kind) else {
        return Err(InvalidTransition { from, event: kind });
    };

    let entry = match event {
        Event::Start => LogEntry::info("job picked up, scanning target"),
        Event::ScanOk { target, html } => {
            let line = format!(
                "scanned {} ({} bytes), identified as \"{}\"",
                target.domain_candidate,
                html.len(),
                target.display_name
            );
            job.result.target = Some(target);
            job.result.scanned_html = Some(html);
            LogEntry::info(line)
        }
        Event::ScanFail { detail } => {
            job.failure = Some(FailureReason::ScanFailed);
            LogEntry::error(format!("scan failed: {detail}"))
        }
        Event::ContentOk { content } => {
            let line = format!("content generated: \"{}\"", content.site_title);
            job.result.content = Some(content);
            LogEntry::info(line)
        }
        Event::ContentFail { detail } => {
            job.failure = Some(FailureReason::ContentFailed);
            LogEntry::error(format!("content generation failed: {detail}"))
        }
        Event::DeployOk { url, credentials } => {
            let line = format!("deployed to {url}, awaiting audit");
            job.result.url = Some(url);
            if credentials.is_some() {
                job.result.credentials = credentials;
            }
            LogEntry::info(line)
        }
        Event::DeployFail { reason, detail } => {
            job.failure = Some(reason);
            LogEntry::error(format!("deployment failed ({reason}): {detail}"))
        }
        Event::Approve => LogEntry::info("audit approved"),
        Event::Reject { issues } => {
            let line = if issues.is_empty() {
                "audit rejected".to_string()
            } else {
                format!("audit rejected: {}", issues.join("; "))
            };
            job.result.issues = issues;
            LogEntry::warn(line)
        }
        Event::Resubmit => {
            if !policy.enabled {
                to = JobStatus::Failed;
                job.failure = Some(FailureReason::MaxRetriesExceeded);
                LogEntry::error("MaxRetriesExceeded: resubmission is disabled")
            } else if job.resubmit_count >= policy.max_resubmits {
                to = JobStatus::Failed;
                job.failure = Some(FailureReason::MaxRetriesExceeded);
                LogEntry::error(format!(
                    "MaxRetriesExceeded: already resubmitted {} of {} times",
                    job.resubmit_count, policy.max_resubmits
                ))
            } else {
                job.resubmit_count += 1;
                LogEntry::info(format!(
                    "resubmitted for provisioning ({}/{})",
                    job.resubmit_count, policy.max_resubmits
                ))
            }
        }
        Event::Fail { reason, detail } => {
            job.failure = Some(reason);
            LogEntry::error(format!("{reason}: {detail}"))
        }
    };

    job.status = to;
    job.progress = match to {
        JobStatus::Approved => 100,
        JobStatus::Failed => job.progress,
        _ => 0,
    };
    job.logs.push(entry);
    job.updated_at = Utc::now();

    Ok(Transition {
        from,
        to,
        event: kind,
    })
}

/// Raise the progress of the current stage. Returns `false` when nothing
/// changed (lower or equal value and no note).
pub fn advance_progress(job: &mut Job, percent: u8, note: Option<&str>) -> bool {
    let percent = percent.min(100);
    let raised = percent > job.progress;
    if raised {
        job.progress = percent;
    }
    if let Some(note) = note {
        job.logs.push(LogEntry::info(note));
    }
    if raised || note.is_some() {
        job.updated_at = Utc::now();
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::job::JobInput;

    fn make_job() -> Job {
        Job::new(JobInput {
            domain: "acme.biz".into(),
            public_domain: None,
            blueprint_id: "wp-starter".into(),
            client_id: "client-1".into(),
            client_slug: Some("acme".into()),
        })
    }

    fn target() -> TargetIdentity {
        TargetIdentity {
            display_name: "Acme Plumbing".into(),
            domain_candidate: "acme.biz".into(),
        }
    }

    fn walk_to(status: JobStatus) -> Job {
        let policy = ResubmitPolicy::default();
        let mut job = make_job();
        let path = [
            Event::Start,
            Event::ScanOk {
                target: target(),
                html: "<html></html>".into(),
            },
            Event::ContentOk {
                content: ContentPackage::from_html("Acme Plumbing", "<p>Pipes fixed fast.</p>"),
            },
            Event::DeployOk {
                url: "https://acme.demo.localtest.me".into(),
                credentials: None,
            },
        ];
        for event in path {
            if job.status == status {
                break;
            }
            apply(&mut job, event, &policy).unwrap();
        }
        assert_eq!(job.status, status);
        job
    }

    #[test]
    fn happy_path_walks_all_stages() {
        let job = walk_to(JobStatus::PendingAudit);
        assert_eq!(job.logs.len(), 4);
        assert_eq!(job.result.url.as_deref(), Some("https://acme.demo.localtest.me"));
        assert_eq!(job.result.target, Some(target()));
    }

    #[test]
    fn every_listed_edge_appends_exactly_one_log() {
        let policy = ResubmitPolicy::default();
        let cases: Vec<(JobStatus, Event, JobStatus)> = vec![
            (JobStatus::Queued, Event::Start, JobStatus::Scanning),
            (
                JobStatus::Scanning,
                Event::ScanFail { detail: "dns".into() },
                JobStatus::Failed,
            ),
            (
                JobStatus::GeneratingContent,
                Event::ContentFail { detail: "502".into() },
                JobStatus::Failed,
            ),
            (
                JobStatus::Provisioning,
                Event::DeployFail {
                    reason: FailureReason::DeployFailed,
                    detail: "quota".into(),
                },
                JobStatus::Failed,
            ),
            (JobStatus::PendingAudit, Event::Approve, JobStatus::Approved),
            (
                JobStatus::PendingAudit,
                Event::Reject { issues: vec!["broken logo".into()] },
                JobStatus::Rejected,
            ),
        ];

        for (start, event, expected) in cases {
            let mut job = walk_to(start);
            let before = job.logs.len();
            let t = apply(&mut job, event, &policy).unwrap();
            assert_eq!(t.from, start);
            assert_eq!(t.to, expected);
            assert_eq!(job.status, expected);
            assert_eq!(job.logs.len(), before + 1);
        }
    }

    #[test]
    fn invalid_transition_leaves_job_untouched() {
        let mut job = make_job();
        let snapshot = job.clone();
        let err = apply(&mut job, Event::Approve, &ResubmitPolicy::default()).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                from: JobStatus::Queued,
                event: EventKind::Approve
            }
        );
        assert_eq!(job, snapshot);
    }

    #[test]
    fn fail_reachable_from_every_non_terminal_state() {
        for status in JobStatus::ALL {
            let expected = if status.is_terminal() {
                None
            } else {
                Some(JobStatus::Failed)
            };
            assert_eq!(status.on(EventKind::Fail), expected, "from {status}");
        }
    }

    #[test]
    fn no_stage_is_skipped() {
        assert_eq!(JobStatus::Queued.on(EventKind::ContentOk), None);
        assert_eq!(JobStatus::Scanning.on(EventKind::DeployOk), None);
        assert_eq!(JobStatus::GeneratingContent.on(EventKind::Approve), None);
        assert_eq!(JobStatus::Approved.on(EventKind::Resubmit), None);
    }

    #[test]
    fn reject_records_issues_in_order() {
        let mut job = walk_to(JobStatus::PendingAudit);
        let issues = vec!["broken logo".to_string(), "typo in footer".to_string()];
        apply(
            &mut job,
            Event::Reject {
                issues: issues.clone(),
            },
            &ResubmitPolicy::default(),
        )
        .unwrap();
        assert_eq!(job.result.issues, issues);
    }

    #[test]
    fn resubmit_is_bounded() {
        let policy = ResubmitPolicy {
            enabled: true,
            max_resubmits: 1,
            automatic: false,
        };
        let mut job = walk_to(JobStatus::PendingAudit);
        apply(&mut job, Event::Reject { issues: vec![] }, &policy).unwrap();

        let t = apply(&mut job, Event::Resubmit, &policy).unwrap();
        assert_eq!(t.to, JobStatus::Provisioning);
        assert_eq!(job.resubmit_count, 1);

        apply(
            &mut job,
            Event::DeployOk {
                url: "https://acme.demo.localtest.me".into(),
                credentials: None,
            },
            &policy,
        )
        .unwrap();
        apply(&mut job, Event::Reject { issues: vec![] }, &policy).unwrap();

        let t = apply(&mut job, Event::Resubmit, &policy).unwrap();
        assert_eq!(t.to, JobStatus::Failed);
        assert_eq!(job.failure, Some(FailureReason::MaxRetriesExceeded));
        assert!(job.last_log().unwrap().message.starts_with("MaxRetriesExceeded"));
    }

    #[test]
    fn disabled_resubmission_fails_the_job() {
        let policy = ResubmitPolicy {
            enabled: false,
            ..Default::default()
        };
        let mut job = walk_to(JobStatus::PendingAudit);
        apply(&mut job, Event::Reject { issues: vec![] }, &policy).unwrap();
        let t = apply(&mut job, Event::Resubmit, &policy).unwrap();
        assert_eq!(t.to, JobStatus::Failed);
    }

    #[test]
    fn progress_resets_on_stage_entry_and_never_drops() {
        let policy = ResubmitPolicy::default();
        let mut job = make_job();
        apply(&mut job, Event::Start, &policy).unwrap();
        assert!(advance_progress(&mut job, 40, None));
        assert!(!advance_progress(&mut job, 20, None));
        assert_eq!(job.progress, 40);

        apply(
            &mut job,
            Event::ScanOk {
                target: target(),
                html: String::new(),
            },
            &policy,
        )
        .unwrap();
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn failed_keeps_last_progress() {
        let policy = ResubmitPolicy::default();
        let mut job = walk_to(JobStatus::Provisioning);
        advance_progress(&mut job, 60, Some("files written"));
        apply(
            &mut job,
            Event::fail(FailureReason::Timeout, "deadline exceeded"),
            &policy,
        )
        .unwrap();
        assert_eq!(job.progress, 60);
        assert_eq!(job.failure, Some(FailureReason::Timeout));
    }
}
