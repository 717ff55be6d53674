use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::DeployError;
use super::blueprint::{BlueprintRegistry, RenderContext};
use crate::content::ContentPackage;
use crate::provisioning::validate::{is_valid_hostname, is_valid_slug, slug_from_domain};
use crate::provisioning::{ProvisioningClient, ProvisioningRequest, ProvisioningResult};
use crate::state_machine::{Job, JobId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Demo sites without an explicit public domain live at
    /// `{slug}.{base_domain_suffix}` under a wildcard DNS record.
    #[serde(default = "default_base_domain_suffix")]
    pub base_domain_suffix: String,
    /// Probe the deployed URL for the deploy marker after upload.
    #[serde(default = "default_verify")]
    pub verify: bool,
    /// Extra blueprints, one subdirectory each.
    #[serde(default)]
    pub blueprint_dir: Option<PathBuf>,
}

fn default_base_domain_suffix() -> String {
    "demo.localtest.me".into()
}

fn default_verify() -> bool {
    true
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            base_domain_suffix: default_base_domain_suffix(),
            verify: default_verify(),
            blueprint_dir: None,
        }
    }
}

/// A concrete deployment: what to upload where, and how to check it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub job_id: Option<JobId>,
    pub domain: String,
    pub verify_url: String,
    /// String the deployed front page must contain.
    pub marker: String,
    pub request: ProvisioningRequest,
}

/// Resolves blueprints into deployment plans and realizes them.
///
/// Plans are pure functions of the job, so re-planning and re-executing a
/// job after a crash overwrites the same files on the same site. At most one
/// execution per domain runs at a time; later ones wait for the lock.
pub struct DeploymentPlanner {
    client: Arc<ProvisioningClient>,
    blueprints: BlueprintRegistry,
    settings: PlannerSettings,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeploymentPlanner {
    pub fn new(
        client: Arc<ProvisioningClient>,
        blueprints: BlueprintRegistry,
        settings: PlannerSettings,
    ) -> Self {
        Self {
            client,
            blueprints,
            settings,
            locks: DashMap::new(),
        }
    }

    pub fn plan(&self, job: &Job) -> Result<DeploymentPlan, DeployError> {
        let content = job.result.content.as_ref().ok_or_else(|| {
            DeployError::Validation(format!("job {} has no generated content", job.id))
        })?;
        let slug = job
            .input
            .client_slug
            .clone()
            .or_else(|| job.result.target.as_ref().map(|t| t.domain_candidate.clone()))
            .or_else(|| slug_from_domain(&job.input.domain))
            .ok_or_else(|| {
                DeployError::Validation(format!("no client slug for `{}`", job.input.domain))
            })?;
        let domain = match &job.input.public_domain {
            Some(domain) => domain.clone(),
            None => self.default_domain(&slug),
        };
        self.build(
            Some(job.id.clone()),
            domain,
            format!("demoforge-{}", job.id),
            &job.input.blueprint_id,
            &job.input.client_id,
            slug,
            content,
        )
    }

    /// Plan a one-shot deployment of caller-supplied HTML. `request.domain`
    /// is the lead's domain; the site lands on the slug subdomain unless the
    /// domain is already under the demo suffix.
    pub fn plan_request(&self, request: &ProvisioningRequest) -> Result<DeploymentPlan, DeployError> {
        let slug = request.client_slug.trim().to_ascii_lowercase();
        let domain = request.domain.trim().to_ascii_lowercase();
        let domain = if domain.ends_with(&format!(".{}", self.settings.base_domain_suffix)) {
            domain
        } else {
            self.default_domain(&slug)
        };
        let content = ContentPackage::from_html(slug.clone(), request.html_content.clone());
        self.build(
            None,
            domain,
            format!("demoforge-{slug}"),
            &request.blueprint_id,
            &request.client_id,
            slug,
            &content,
        )
    }

    fn default_domain(&self, slug: &str) -> String {
        format!("{slug}.{}", self.settings.base_domain_suffix)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        job_id: Option<JobId>,
        domain: String,
        marker: String,
        blueprint_id: &str,
        client_id: &str,
        slug: String,
        content: &ContentPackage,
    ) -> Result<DeploymentPlan, DeployError> {
        if !is_valid_slug(&slug) {
            return Err(DeployError::Validation(format!("`{slug}` is not a valid client slug")));
        }
        if !is_valid_hostname(&domain) {
            return Err(DeployError::Validation(format!("`{domain}` is not a valid hostname")));
        }
        let rendered = self.blueprints.get(blueprint_id)?.render(RenderContext {
            content,
            client_slug: &slug,
            deploy_marker: &marker,
        })?;
        let verify_url = format!("{}/", self.client.site_url(&domain));
        Ok(DeploymentPlan {
            job_id,
            domain: domain.clone(),
            verify_url,
            marker,
            request: ProvisioningRequest {
                domain,
                blueprint_id: blueprint_id.to_string(),
                client_id: client_id.to_string(),
                client_slug: slug,
                html_content: rendered.front_page_html,
                files: rendered.files,
                post_install: rendered.post_install,
            },
        })
    }

    /// Provision the plan's site and, when enabled, verify it serves the
    /// deploy marker.
    pub async fn execute(&self, plan: &DeploymentPlan) -> Result<ProvisioningResult, DeployError> {
        let lock = self.locks.entry(plan.domain.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.execute_locked(plan).await
        };
        drop(lock);
        self.locks
            .remove_if(&plan.domain, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn execute_locked(&self, plan: &DeploymentPlan) -> Result<ProvisioningResult, DeployError> {
        info!(
            job_id = ?plan.job_id,
            domain = %plan.domain,
            blueprint = %plan.request.blueprint_id,
            files = plan.request.files.len(),
            "deploying"
        );
        let result = self.client.provision(&plan.request).await?;
        if self.settings.verify {
            let live = self
                .client
                .verify_reachable(&plan.verify_url, Some(&plan.marker))
                .await?;
            if !live {
                warn!(url = %plan.verify_url, marker = %plan.marker, "deploy marker never showed up");
                return Err(DeployError::VerificationFailed {
                    url: plan.verify_url.clone(),
                });
            }
        }
        Ok(result)
    }
}
