//! Command-line interface built on clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Demoforge: turns leads into reviewed demo sites.
#[derive(Debug, Parser)]
#[command(name = "demoforge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (defaults to $DEMOFORGE_CONFIG, then ./demoforge.toml).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API and drive jobs in the background.
    Serve {
        /// Listen address, overriding `[server] listen`.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Drive queued and in-progress jobs.
    Run {
        /// Stop once no job can make progress instead of polling forever.
        #[arg(long)]
        once: bool,
    },

    /// Queue a job for a lead's domain.
    Submit {
        /// The lead's domain, e.g. `acme.biz`.
        domain: String,

        #[arg(long, default_value = "wp-starter")]
        blueprint: String,

        #[arg(long)]
        client_id: String,

        #[arg(long)]
        slug: Option<String>,

        /// Publish on this hostname instead of `{slug}.{base suffix}`.
        #[arg(long)]
        public_domain: Option<String>,

        /// Drive the job here and show progress until it needs a human.
        #[arg(long)]
        wait: bool,
    },

    /// Show one job, or the most recent ones.
    Status {
        job: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Approve or reject a job waiting for review.
    Review {
        job: String,

        /// `approve` or `reject`.
        decision: String,

        /// Issue found by the reviewer. Repeat for several.
        #[arg(long = "issue")]
        issues: Vec<String>,
    },

    /// Assign jobs to an auditor.
    Assign {
        #[arg(long)]
        auditor: String,

        #[arg(required = true)]
        jobs: Vec<String>,
    },

    /// Manage auditors.
    Auditor {
        #[command(subcommand)]
        command: AuditorCommand,
    },

    /// Send a rejected job back to provisioning.
    Resubmit { job: String },
}

#[derive(Debug, Subcommand)]
pub enum AuditorCommand {
    /// Register a new auditor.
    Add { name: String, email: String },

    /// List registered auditors.
    List,
}
