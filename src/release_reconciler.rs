//! Resolves a prior Helm release's state before a new install: kills stale
//! jobs/pods that carry the release's `lc-uuid` and are owned by the native
//! Helm deploy path, then uninstalls a release left in a pending state
//! (spec.md §4.5).

use crate::cmd::helm::Helm;
use crate::errors::EngineError;
use crate::events::EventDetails;
use crate::kubers_utils::{kube_delete_all_from_selector, KubeDeleteMode};
use crate::models::release_state::ReleaseState;
use crate::services::kube_client::QubeClient;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams};
use std::time::Duration;

const SUPERSEDED_ANNOTATION: &str = "lifecycle.goodrx.com/termination-reason";
const SUPERSEDED_VALUE: &str = "superseded-by-retry";
const UNINSTALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const ABSENCE_POLL_TOTAL: Duration = Duration::from_secs(30);
const ABSENCE_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ReleaseReconciler<'a> {
    client: &'a QubeClient,
    helm: &'a Helm,
}

impl<'a> ReleaseReconciler<'a> {
    pub fn new(client: &'a QubeClient, helm: &'a Helm) -> Self {
        ReleaseReconciler { client, helm }
    }

    /// Ensures a fresh `helm upgrade --install` can proceed for `release_name`.
    pub async fn reconcile(&self, release_name: &str, namespace: &str, event_details: &EventDetails) -> Result<(), Box<EngineError>> {
        self.supersede_stale_jobs(release_name, namespace)
            .await
            .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), e.to_string(), None))?;

        tokio::time::sleep(Duration::from_secs(2)).await;

        let status = self
            .helm
            .status(release_name, namespace)
            .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), e.to_string(), None))?;

        if status.status.is_pending() {
            self.uninstall_and_wait_absent(release_name, namespace, event_details)?;
        }

        Ok(())
    }

    async fn supersede_stale_jobs(&self, release_name: &str, namespace: &str) -> Result<(), kube::Error> {
        let selector = format!("lc-uuid={release_name},app.kubernetes.io/name=native-helm");
        let jobs_api = self.client.jobs(namespace);
        let jobs = jobs_api.list(&ListParams::default().labels(&selector)).await?;

        for job in jobs.items {
            let Some(job_name) = job.metadata.name.clone() else { continue };

            let patch = serde_json::json!({
                "metadata": {
                    "annotations": {
                        SUPERSEDED_ANNOTATION: SUPERSEDED_VALUE,
                        "lifecycle.goodrx.com/superseded-at": chrono::Utc::now().to_rfc3339(),
                    }
                }
            });
            let patch_params = PatchParams::apply("lifecycle-deploy-core").force();
            jobs_api.patch(&job_name, &patch_params, &Patch::Merge(&patch)).await?;

            let pod_selector = format!("job-name={job_name}");
            kube_delete_all_from_selector::<Pod>(self.client, &pod_selector, namespace, KubeDeleteMode::ForceImmediate).await?;
            kube_delete_all_from_selector::<Job>(self.client, &format!("job-name={job_name}"), namespace, KubeDeleteMode::ForceImmediate)
                .await?;
        }

        Ok(())
    }

    fn uninstall_and_wait_absent(&self, release_name: &str, namespace: &str, event_details: &EventDetails) -> Result<(), Box<EngineError>> {
        self.helm
            .uninstall(release_name, namespace, UNINSTALL_TIMEOUT)
            .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), e.to_string(), None))?;

        let deadline = std::time::Instant::now() + ABSENCE_POLL_TOTAL;
        loop {
            let state: ReleaseState = self
                .helm
                .status(release_name, namespace)
                .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), e.to_string(), None))?;

            if state.status == crate::models::release_state::ReleaseStatus::Absent {
                return Ok(());
            }

            if std::time::Instant::now() >= deadline {
                return Err(EngineError::new_timeout(
                    event_details.clone(),
                    format!("release {release_name} still present {ABSENCE_POLL_TOTAL:?} after uninstall"),
                ));
            }
            std::thread::sleep(ABSENCE_POLL_INTERVAL);
        }
    }
}
