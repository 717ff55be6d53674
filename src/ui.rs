//! Terminal output: a progress bar that follows a job and colored status
//! lines.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::state_machine::{Job, JobStatus};

/// Follows one job's progress in the terminal.
pub struct JobProgress {
    pb: ProgressBar,
}

impl JobProgress {
    pub fn start(job: &Job) -> Self {
        let pb = ProgressBar::new(100);
        // The template is a literal; a bad one falls back to the default bar.
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        let progress = Self { pb };
        progress.update(job);
        progress
    }

    pub fn update(&self, job: &Job) {
        self.pb.set_position(u64::from(job.progress));
        let note = job.last_log().map(|l| l.message.as_str()).unwrap_or_default();
        self.pb
            .set_message(format!("{} {}", status_style(job.status).apply_to(job.status), note));
    }

    pub fn finish(&self, job: &Job) {
        self.pb.finish_and_clear();
        println!("{}", summary_line(job));
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Approved | JobStatus::PendingAudit => Style::new().green().bold(),
        JobStatus::Failed => Style::new().red().bold(),
        JobStatus::Rejected => Style::new().yellow().bold(),
        _ => Style::new().cyan(),
    }
}

/// One line per job for `status` listings.
pub fn summary_line(job: &Job) -> String {
    let mut line = format!(
        "{}  {:<18} {:>3}%  {}",
        job.id,
        status_style(job.status).apply_to(job.status),
        job.progress,
        job.input.domain
    );
    if let Some(url) = &job.result.url {
        line.push_str(&format!("  {url}"));
    }
    if let Some(reason) = job.failure {
        line.push_str(&format!("  ({})", Style::new().red().apply_to(reason)));
    }
    line
}

/// Full record: summary, issues and the log.
pub fn print_job(job: &Job) {
    println!("{}", summary_line(job));
    if let Some(target) = &job.result.target {
        println!("  lead:     {}", target.display_name);
    }
    if let Some(auditor) = &job.auditor_id {
        println!("  auditor:  {auditor}");
    }
    if job.resubmit_count > 0 {
        println!("  resubmits: {}", job.resubmit_count);
    }
    for issue in &job.result.issues {
        println!("  {} {issue}", Style::new().yellow().apply_to("!"));
    }
    let dim = Style::new().dim();
    for entry in &job.logs {
        println!("  {}", dim.apply_to(entry));
    }
}
