use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::ContentPackage;
use crate::provisioning::TransferCredentials;

/// Opaque job identifier (UUID v4, hyphenated).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Auditor identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditorId(pub String);

impl AuditorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for AuditorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuditorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a job. See [`JobStatus::on`](super::state) for the
/// transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Scanning,
    GeneratingContent,
    Provisioning,
    PendingAudit,
    Approved,
    Rejected,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Queued,
        JobStatus::Scanning,
        JobStatus::GeneratingContent,
        JobStatus::Provisioning,
        JobStatus::PendingAudit,
        JobStatus::Approved,
        JobStatus::Rejected,
        JobStatus::Failed,
    ];

    /// Statuses no event can leave. `Rejected` is not listed: it may be
    /// resubmitted, and policy decides whether that ever happens.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Approved | JobStatus::Failed)
    }

    /// Statuses the driver loop advances without outside input.
    pub fn is_automatic(self) -> bool {
        matches!(
            self,
            JobStatus::Queued
                | JobStatus::Scanning
                | JobStatus::GeneratingContent
                | JobStatus::Provisioning
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Scanning => "scanning",
            JobStatus::GeneratingContent => "generating_content",
            JobStatus::Provisioning => "provisioning",
            JobStatus::PendingAudit => "pending_audit",
            JobStatus::Approved => "approved",
            JobStatus::Rejected => "rejected",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

/// Why a job ended up in [`JobStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    ScanFailed,
    ContentFailed,
    DeployFailed,
    Validation,
    Timeout,
    MaxRetriesExceeded,
    Aborted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::ScanFailed => "ScanFailed",
            FailureReason::ContentFailed => "ContentFailed",
            FailureReason::DeployFailed => "DeployFailed",
            FailureReason::Validation => "ValidationError",
            FailureReason::Timeout => "Timeout",
            FailureReason::MaxRetriesExceeded => "MaxRetriesExceeded",
            FailureReason::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One timestamped line of a job's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_level(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::with_level(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_level(LogLevel::Error, message)
    }

    fn with_level(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<5} {}",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", self.level).to_uppercase(),
            self.message
        )
    }
}

/// What the operator asked for when the job was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInput {
    /// The lead's own domain, scanned in the first stage.
    pub domain: String,
    /// Public hostname for the demo site. Derived from the slug when absent.
    #[serde(default)]
    pub public_domain: Option<String>,
    pub blueprint_id: String,
    pub client_id: String,
    #[serde(default)]
    pub client_slug: Option<String>,
}

/// Who the lead is, as discovered by the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetIdentity {
    pub display_name: String,
    pub domain_candidate: String,
}

/// Accumulated output of the stages. Partial data survives failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    #[serde(default)]
    pub target: Option<TargetIdentity>,
    #[serde(default)]
    pub scanned_html: Option<String>,
    #[serde(default)]
    pub content: Option<ContentPackage>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub credentials: Option<TransferCredentials>,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// A unit of scan → generate → provision → audit work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub logs: Vec<LogEntry>,
    pub input: JobInput,
    pub result: JobResult,
    pub auditor_id: Option<AuditorId>,
    pub resubmit_count: u32,
    pub failure: Option<FailureReason>,
    /// Bumped by the store on every successful conditional write.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(input: JobInput) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            progress: 0,
            logs: Vec::new(),
            input,
            result: JobResult::default(),
            auditor_id: None,
            resubmit_count: 0,
            failure: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn last_log(&self) -> Option<&LogEntry> {
        self.logs.last()
    }
}

/// Human reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auditor {
    pub id: AuditorId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl Auditor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: AuditorId::new(),
            name: name.into(),
            email: email.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> JobInput {
        JobInput {
            domain: "acme.biz".into(),
            public_domain: None,
            blueprint_id: "wp-starter".into(),
            client_id: "client-1".into(),
            client_slug: Some("acme".into()),
        }
    }

    #[test]
    fn job_creation_defaults() {
        let job = Job::new(input());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.revision, 0);
        assert_eq!(job.resubmit_count, 0);
        assert!(job.logs.is_empty());
        assert!(job.auditor_id.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&JobStatus::PendingAudit).unwrap();
        assert_eq!(json, r#""pending_audit""#);
        assert_eq!(
            "generating_content".parse::<JobStatus>().unwrap(),
            JobStatus::GeneratingContent
        );
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn terminal_and_automatic_sets() {
        assert!(JobStatus::Approved.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Rejected.is_terminal());
        assert!(JobStatus::Provisioning.is_automatic());
        assert!(!JobStatus::PendingAudit.is_automatic());
    }

    #[test]
    fn failure_reason_display() {
        assert_eq!(
            FailureReason::MaxRetriesExceeded.to_string(),
            "MaxRetriesExceeded"
        );
        assert_eq!(FailureReason::Timeout.to_string(), "Timeout");
    }

    #[test]
    fn job_input_accepts_camel_case_payload() {
        let json = r#"{
            "domain": "acme.biz",
            "blueprintId": "wp-starter",
            "clientId": "c-9",
            "clientSlug": "acme"
        }"#;
        let parsed: JobInput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.client_slug.as_deref(), Some("acme"));
        assert!(parsed.public_domain.is_none());
    }

    #[test]
    fn log_entry_display_includes_level() {
        let entry = LogEntry::warn("slow response");
        let line = entry.to_string();
        assert!(line.contains("WARN"));
        assert!(line.ends_with("slow response"));
    }
}
