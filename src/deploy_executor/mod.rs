//! One `execute` contract, dispatched through a tagged union of deploy kinds
//! rather than scattered `if type == ...` branches (spec.md §9 "Dynamic
//! dispatch on deploy type" re-architecture guidance).

pub mod helm;
pub mod raw_manifest;

use crate::activity_feed::{ActivityFeed, StatusUpdate};
use crate::config::GlobalConfig;
use crate::errors::EngineError;
use crate::models::build::Build;
use crate::models::deploy::{Deploy, DeployStatus};
use crate::models::deployable::DeployableType;
use crate::services::kube_client::QubeClient;

pub struct DeployContext<'a> {
    pub build: &'a Build,
    pub config: &'a GlobalConfig,
    pub client: &'a QubeClient,
    pub activity_feed: &'a dyn ActivityFeed,
}

impl<'a> DeployContext<'a> {
    fn publish(&self, deploy: &Deploy, status: DeployStatus, message: Option<String>) {
        self.activity_feed.publish(StatusUpdate {
            deploy_uuid: deploy.uuid,
            run_uuid: deploy.run_uuid,
            status,
            status_message: message,
        });
    }
}

pub enum DeployKind {
    Helm,
    RawManifest,
    NoOp,
}

impl DeployKind {
    /// Deploys of type HELM go through the Helm executor; GITHUB, DOCKER, and
    /// CLI go through the raw-manifest executor; everything else is a no-op
    /// at this layer (spec.md §4.1).
    pub fn of(deployable_type: DeployableType) -> DeployKind {
        match deployable_type {
            DeployableType::Helm => DeployKind::Helm,
            DeployableType::Github | DeployableType::Docker | DeployableType::Cli => DeployKind::RawManifest,
            DeployableType::ExternalHttp | DeployableType::Configuration | DeployableType::Codefresh => DeployKind::NoOp,
        }
    }
}

pub trait DeployExecutor {
    fn execute(&self, ctx: &DeployContext, deploy: &mut Deploy) -> Result<(), Box<EngineError>>;
}

pub struct NoOpExecutor;

impl DeployExecutor for NoOpExecutor {
    fn execute(&self, ctx: &DeployContext, deploy: &mut Deploy) -> Result<(), Box<EngineError>> {
        deploy.status = DeployStatus::Ready;
        ctx.publish(deploy, DeployStatus::Ready, None);
        Ok(())
    }
}

/// Dispatches a single Deploy to its executor and folds any failure into a
/// `DEPLOY_FAILED` status update (spec.md §7 Propagation policy), re-raising
/// the error so the wave aggregator can see it.
pub fn execute_deploy(ctx: &DeployContext, deploy: &mut Deploy) -> Result<(), Box<EngineError>> {
    let result = match DeployKind::of(deploy.deployable.r#type) {
        DeployKind::Helm => helm::HelmExecutor.execute(ctx, deploy),
        DeployKind::RawManifest => raw_manifest::RawManifestExecutor.execute(ctx, deploy),
        DeployKind::NoOp => NoOpExecutor.execute(ctx, deploy),
    };

    if let Err(err) = &result {
        deploy.status = DeployStatus::DeployFailed;
        deploy.status_message = Some(err.user_log_message().to_string());
        ctx.publish(deploy, DeployStatus::DeployFailed, Some(err.user_log_message().to_string()));
    }

    result
}
