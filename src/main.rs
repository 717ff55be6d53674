use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use demoforge::anthropic::AnthropicClient;
use demoforge::api::{self, AppState};
use demoforge::audit::{AuditCoordinator, Decision};
use demoforge::cli::{AuditorCommand, Cli, Command};
use demoforge::config::DemoforgeConfig;
use demoforge::content::AnthropicContentService;
use demoforge::deploy::{BlueprintRegistry, DeploymentPlanner};
use demoforge::orchestrator::Orchestrator;
use demoforge::provisioning::{HttpControlPlane, HttpProbe, MirrorTransfer, ProvisioningClient};
use demoforge::scan::HttpScanner;
use demoforge::state_machine::{AuditorId, JobId, JobInput, JobStateMachine, JobStatus};
use demoforge::store::{AuditorStore, FileStore, JobStore, MemoryStore};
use demoforge::ui::{self, JobProgress};

/// Everything a command might need, built once from config.
struct App {
    config: DemoforgeConfig,
    machine: JobStateMachine,
    audit: Arc<AuditCoordinator>,
    planner: Arc<DeploymentPlanner>,
}

impl App {
    async fn build(config: DemoforgeConfig) -> Result<Self> {
        let (jobs, auditors): (Arc<dyn JobStore>, Arc<dyn AuditorStore>) =
            if config.store.in_memory {
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            } else {
                let store = Arc::new(FileStore::open(&config.store.path).await.with_context(
                    || format!("opening store {}", config.store.path.display()),
                )?);
                (store.clone(), store)
            };
        let machine = JobStateMachine::new(jobs, config.resubmit.clone())
            .with_conflict_retries(config.store.conflict_retries);
        let audit = AuditCoordinator::new(machine.clone(), auditors, config.audit.clone());

        let hosting = &config.hosting;
        let client = ProvisioningClient::new(
            Arc::new(HttpControlPlane::new(
                hosting.api_url.clone(),
                hosting.token.clone(),
                hosting.status_timeout(),
            )?),
            Arc::new(MirrorTransfer::new(&hosting.mirror_root).with_exec(hosting.allow_exec)),
            Arc::new(HttpProbe::new(hosting.status_timeout())?),
            hosting.provisioning_settings(&config.retry),
        );
        let mut blueprints = BlueprintRegistry::builtin();
        if let Some(dir) = &config.deploy.blueprint_dir {
            let loaded = blueprints
                .load_dir(dir)
                .with_context(|| format!("loading blueprints from {}", dir.display()))?;
            info!(dir = %dir.display(), loaded, "blueprints loaded");
        }
        let planner = DeploymentPlanner::new(Arc::new(client), blueprints, config.deploy.clone());

        Ok(Self {
            config,
            machine,
            audit: Arc::new(audit),
            planner: Arc::new(planner),
        })
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        if self.config.api_key.is_empty() {
            bail!("no Anthropic API key: set ANTHROPIC_API_KEY or `api_key` in demoforge.toml");
        }
        let scanner = HttpScanner::new(self.config.scan.clone(), self.config.retry.clone())?;
        let sender = AnthropicClient::new(
            self.config.api_key.clone(),
            std::time::Duration::from_secs(self.config.content.timeout_secs),
        )?;
        let content = AnthropicContentService::new(sender, self.config.content.clone());
        Ok(Orchestrator::new(
            self.machine.clone(),
            Arc::new(scanner),
            Arc::new(content),
            self.planner.clone(),
            self.config.orchestrator.clone(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = DemoforgeConfig::load(cli.config.as_deref())?;
    let app = App::build(config).await?;

    match cli.command {
        Command::Serve { listen } => serve(&app, listen).await,
        Command::Run { once } => {
            let orchestrator = app.orchestrator()?;
            if once {
                orchestrator.run_until_idle().await?;
            } else {
                let shutdown = shutdown_on_ctrl_c();
                orchestrator.run(shutdown).await;
            }
            Ok(())
        }
        Command::Submit {
            domain,
            blueprint,
            client_id,
            slug,
            public_domain,
            wait,
        } => {
            let input = JobInput {
                domain,
                public_domain,
                blueprint_id: blueprint,
                client_id,
                client_slug: slug,
            };
            if wait {
                submit_and_wait(&app, input).await
            } else {
                let job = app.machine.create(input).await?;
                println!("{}", job.id);
                Ok(())
            }
        }
        Command::Status { job, limit } => {
            match job {
                Some(id) => ui::print_job(&app.machine.get(&JobId(id)).await?),
                None => {
                    for job in app.machine.store().recent(limit).await? {
                        println!("{}", ui::summary_line(&job));
                    }
                }
            }
            Ok(())
        }
        Command::Review {
            job,
            decision,
            issues,
        } => {
            let decision: Decision = decision.parse()?;
            let job = app.audit.review(&JobId(job), decision, issues).await?;
            ui::print_job(&job);
            Ok(())
        }
        Command::Assign { auditor, jobs } => {
            let ids: Vec<JobId> = jobs.into_iter().map(JobId).collect();
            let report = app.audit.assign(&ids, &AuditorId(auditor)).await?;
            println!("assigned {} job(s)", report.assigned.len());
            for skipped in &report.skipped {
                println!("  skipped {}: {}", skipped.job_id, skipped.reason);
            }
            Ok(())
        }
        Command::Auditor { command } => {
            match command {
                AuditorCommand::Add { name, email } => {
                    let auditor = app.audit.register_auditor(&name, &email).await?;
                    println!("{}", auditor.id);
                }
                AuditorCommand::List => {
                    for auditor in app.audit.list_auditors().await? {
                        println!("{}  {:<24} {}", auditor.id, auditor.name, auditor.email);
                    }
                }
            }
            Ok(())
        }
        Command::Resubmit { job } => {
            let job = app.audit.resubmit(&JobId(job)).await?;
            ui::print_job(&job);
            Ok(())
        }
    }
}

async fn serve(app: &App, listen: Option<String>) -> Result<()> {
    let addr = listen.unwrap_or_else(|| app.config.server.listen.clone());
    let orchestrator = app.orchestrator()?;
    let shutdown = shutdown_on_ctrl_c();

    let runner = {
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(shutdown).await })
    };

    let router = api::router(AppState {
        machine: app.machine.clone(),
        audit: app.audit.clone(),
        planner: app.planner.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "api listening");
    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    shutdown.cancel();
    runner.await?;
    Ok(())
}

/// Create a job and drive it here, following its progress until it waits
/// for a reviewer or ends.
async fn submit_and_wait(app: &App, input: JobInput) -> Result<()> {
    let orchestrator = app.orchestrator()?;
    let mut changes = app.machine.changes().subscribe();
    let job = app.machine.create(input).await?;
    let progress = JobProgress::start(&job);

    let mut runner = tokio::spawn(async move { orchestrator.run_until_idle().await });
    let mut finished = None;

    loop {
        tokio::select! {
            joined = &mut runner => {
                finished = Some(joined);
                break;
            }
            change = changes.recv() => match change {
                Ok(change) if change.job_id == job.id => {
                    let current = app.machine.get(&job.id).await?;
                    progress.update(&current);
                    if parked(current.status) {
                        break;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    let joined = match finished {
        Some(joined) => joined,
        None => runner.await,
    };
    if let Err(e) = joined? {
        warn!(error = %e, "driver loop stopped early");
    }
    let job = app.machine.get(&job.id).await?;
    progress.finish(&job);
    ui::print_job(&job);
    Ok(())
}

fn parked(status: JobStatus) -> bool {
    matches!(status, JobStatus::PendingAudit | JobStatus::Rejected) || status.is_terminal()
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            trigger.cancel();
        }
    });
    token
}
