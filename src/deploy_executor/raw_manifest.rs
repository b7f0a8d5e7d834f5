//! `DeployExecutor` raw-manifest variant (spec.md §4.3): submits an
//! in-cluster Job whose container runs `kubectl apply` against the
//! pre-generated manifest, waits on JobMonitor, then polls for application
//! pod readiness.

use crate::deploy_executor::{DeployContext, DeployExecutor};
use crate::errors::EngineError;
use crate::events::{EventDetails, Stage};
use crate::job_monitor::{monitor_job, JobMonitorOptions};
use crate::models::deploy::{Deploy, DeployStatus};
use crate::models::job_result::JobStatus;
use crate::rbac::{PermissionProfile, RbacProvisioner};
use crate::runtime::block_on;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ListParams, PostParams};
use std::collections::BTreeMap;
use std::time::Duration;

const APPLY_JOB_IMAGE: &str = "bitnami/kubectl:1.31";
const JOB_BACKOFF_LIMIT: i32 = 0;
const MANIFEST_APPLY_TIMEOUT: Duration = Duration::from_secs(300);
const FIRST_POD_POLL_ITERATIONS: u32 = 60;
const ALL_READY_POLL_ITERATIONS: u32 = 180;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct RawManifestExecutor;

impl DeployExecutor for RawManifestExecutor {
    fn execute(&self, ctx: &DeployContext, deploy: &mut Deploy) -> Result<(), Box<EngineError>> {
        let event_details = EventDetails::new(ctx.build.uuid, deploy.uuid, deploy.deployable.name.clone(), Stage::Deploy);

        let manifest = deploy
            .manifest
            .clone()
            .ok_or_else(|| EngineError::new_config_error(event_details.clone(), format!("deploy {} has no manifest", deploy.uuid)))?;

        let rbac = RbacProvisioner::new(ctx.client);
        block_on(rbac.ensure(
            &ctx.build.namespace,
            &ctx.config.service_account_name,
            ctx.config.service_account_iam_role_arn.as_deref(),
            PermissionProfile::Deploy,
            false,
            &event_details,
        ))?;

        let job_name = format!("{}-apply", deploy.uuid);
        submit_apply_job(ctx, deploy, &job_name, &manifest)?;

        let job_result = block_on(monitor_job(
            ctx.client,
            JobMonitorOptions {
                job_name: job_name.clone(),
                namespace: ctx.build.namespace.clone(),
                timeout: Some(MANIFEST_APPLY_TIMEOUT),
                log_prefix: None,
                container_filters: None,
            },
        ));
        deploy.build_output = Some(job_result.logs.clone());

        match job_result.status {
            JobStatus::Succeeded => {}
            JobStatus::Superseded => {
                return Err(EngineError::new_supersession(
                    event_details.clone(),
                    format!("manifest apply job {job_name} was superseded by a newer deploy attempt"),
                ));
            }
            JobStatus::Failed => {
                return Err(EngineError::new_remote_api_error(event_details.clone(), format!("manifest apply job {job_name} failed"), None));
            }
        }

        deploy.status = DeployStatus::Deploying;
        deploy.status_message = Some("Waiting for pods to be ready".to_string());

        let ready = block_on(wait_for_pods_ready(ctx, deploy));
        if !ready {
            return Err(EngineError::new_pods_not_ready(
                event_details.clone(),
                format!("pods for deploy {} never reached Ready within the window", deploy.uuid),
            ));
        }

        deploy.status = DeployStatus::Ready;
        Ok(())
    }
}

/// Submits the in-cluster Job that performs `kubectl apply` against the
/// synthesized manifest (spec.md §4.3 step 3). The manifest is written into
/// the container via a quoted heredoc so the shell never interpolates its
/// contents.
fn submit_apply_job(ctx: &DeployContext, deploy: &Deploy, job_name: &str, manifest: &str) -> Result<(), Box<EngineError>> {
    let event_details = EventDetails::new(ctx.build.uuid, deploy.uuid, deploy.deployable.name.clone(), Stage::Deploy);

    let mut labels = BTreeMap::new();
    labels.insert("deploy_uuid".to_string(), deploy.uuid.to_string());
    labels.insert("service".to_string(), deploy.deployable.name.clone());
    labels.insert("git-sha".to_string(), deploy.sha.clone());
    labels.insert("git-branch".to_string(), deploy.branch_name.clone());
    labels.insert("app.kubernetes.io/name".to_string(), "raw-manifest-apply".to_string());

    let job = Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: Some(ctx.build.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(JOB_BACKOFF_LIMIT),
            active_deadline_seconds: Some(MANIFEST_APPLY_TIMEOUT.as_secs() as i64),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    service_account_name: Some(ctx.config.service_account_name.clone()),
                    containers: vec![Container {
                        name: "apply".to_string(),
                        image: Some(APPLY_JOB_IMAGE.to_string()),
                        command: Some(vec!["sh".to_string(), "-c".to_string()]),
                        args: Some(vec![build_apply_script(&ctx.build.namespace, manifest)]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };

    let api = ctx.client.jobs(&ctx.build.namespace);
    block_on(api.create(&PostParams::default(), &job))
        .map(|_| ())
        .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), format!("cannot create manifest apply job {job_name}: {e}"), None))
}

fn build_apply_script(namespace: &str, manifest: &str) -> String {
    format!("set -e\ncat <<'LIFECYCLE_MANIFEST_EOF' > /tmp/manifest.yaml\n{manifest}\nLIFECYCLE_MANIFEST_EOF\nkubectl apply -n {namespace} -f /tmp/manifest.yaml\n")
}

fn is_deploy_job_pod(name: &str) -> bool {
    name.contains("-deploy-")
}

async fn wait_for_pods_ready(ctx: &DeployContext, deploy: &Deploy) -> bool {
    let api = ctx.client.pods(&ctx.build.namespace);
    let selector = format!("deploy_uuid={}", deploy.uuid);

    let mut found_any = false;
    for _ in 0..FIRST_POD_POLL_ITERATIONS {
        match api.list(&ListParams::default().labels(&selector)).await {
            Ok(list) => {
                let app_pods: Vec<Pod> = list
                    .items
                    .into_iter()
                    .filter(|p| !p.metadata.name.as_deref().map(is_deploy_job_pod).unwrap_or(false))
                    .collect();
                if !app_pods.is_empty() {
                    found_any = true;
                    break;
                }
            }
            Err(err) => warn!("transient error polling pods for deploy {}: {}", deploy.uuid, err),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    if !found_any {
        return false;
    }

    for _ in 0..ALL_READY_POLL_ITERATIONS {
        match api.list(&ListParams::default().labels(&selector)).await {
            Ok(list) => {
                let app_pods: Vec<Pod> = list
                    .items
                    .into_iter()
                    .filter(|p| !p.metadata.name.as_deref().map(is_deploy_job_pod).unwrap_or(false))
                    .collect();

                if !app_pods.is_empty() && app_pods.iter().all(pod_is_ready) {
                    return true;
                }
            }
            Err(err) => warn!("transient error polling pods for deploy {}: {}", deploy.uuid, err),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    false
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_job_pods_are_excluded_from_readiness_polling() {
        assert!(is_deploy_job_pod("abc-deploy-x1y2z3-abcdef0"));
        assert!(!is_deploy_job_pod("abc-7d9f8c6b5-k2l3m"));
    }

    #[test]
    fn apply_script_heredocs_the_manifest_and_applies_it_in_namespace() {
        let script = build_apply_script("lc-abc123", "apiVersion: v1\nkind: Service\n");
        assert!(script.contains("cat <<'LIFECYCLE_MANIFEST_EOF' > /tmp/manifest.yaml"));
        assert!(script.contains("apiVersion: v1\nkind: Service"));
        assert!(script.contains("kubectl apply -n lc-abc123 -f /tmp/manifest.yaml"));
    }
}
