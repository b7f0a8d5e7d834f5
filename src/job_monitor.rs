//! Watches a single Kubernetes Job through its pod lifecycle and returns
//! logs plus a terminal status. State machine: awaitPod -> awaitInitContainers
//! -> collectInitLogs -> awaitMainContainers -> collectMainLogs ->
//! awaitJobCompletion -> classify (spec.md §4.4).

use crate::models::job_result::JobResult;
use crate::services::kube_client::QubeClient;
use k8s_openapi::api::core::v1::{ContainerState, Pod};
use kube::api::{ListParams, LogParams};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);
const MAX_UNSUCCESSFUL_MAIN_CONTAINER_OBSERVATIONS: u32 = 30;
const SUPERSEDED_ANNOTATION: &str = "lifecycle.goodrx.com/termination-reason";
const SUPERSEDED_VALUE: &str = "superseded-by-retry";

pub struct JobMonitorOptions {
    pub job_name: String,
    pub namespace: String,
    pub timeout: Option<Duration>,
    pub log_prefix: Option<String>,
    pub container_filters: Option<Vec<String>>,
}

/// JobMonitor never throws to its caller: any unrecoverable error during
/// monitoring is folded into a `failed` JobResult with a diagnostic line
/// appended to the partial logs (spec.md §4.4 Failure semantics).
pub async fn monitor_job(client: &QubeClient, opts: JobMonitorOptions) -> JobResult {
    let deadline = Instant::now() + opts.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let mut logs = String::new();
    let prefix = opts.log_prefix.as_deref().unwrap_or("");

    let pod_name = match await_pod(client, &opts.job_name, &opts.namespace, deadline).await {
        Ok(name) => name,
        Err(msg) => return JobResult::failed(format!("{prefix}{msg}")),
    };

    if let Err(msg) = await_init_containers(client, &pod_name, &opts.namespace, deadline).await {
        logs.push_str(&format!("{prefix}{msg}\n"));
        return JobResult::failed(logs);
    }

    logs.push_str(&collect_container_logs(client, &pod_name, &opts.namespace, true, &opts.container_filters).await);

    if let Err(msg) = await_main_containers(client, &pod_name, &opts.namespace, deadline).await {
        logs.push_str(&format!("{prefix}{msg}\n"));
        return JobResult::failed(logs);
    }

    logs.push_str(&collect_container_logs(client, &pod_name, &opts.namespace, false, &opts.container_filters).await);

    match await_job_completion(client, &opts.job_name, &opts.namespace, deadline).await {
        Ok(classification) => classify(classification, logs),
        Err(msg) => {
            logs.push_str(&format!("{prefix}{msg}\n"));
            JobResult::failed(logs)
        }
    }
}

async fn await_pod(client: &QubeClient, job_name: &str, namespace: &str, deadline: Instant) -> Result<String, String> {
    let api = client.pods(namespace);
    let selector = format!("job-name={job_name}");

    loop {
        match api.list(&ListParams::default().labels(&selector)).await {
            Ok(list) => {
                if let Some(pod) = list.items.first() {
                    if let Some(name) = &pod.metadata.name {
                        return Ok(name.clone());
                    }
                }
            }
            Err(err) => warn!("transient error listing pods for job {}: {}", job_name, err),
        }

        if Instant::now() >= deadline {
            return Err(format!("timed out waiting for a pod of job {job_name}"));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn container_terminal_or_ready(state: Option<&ContainerState>, ready: bool) -> bool {
    match state {
        Some(ContainerState { terminated: Some(_), .. }) => true,
        Some(ContainerState { running: Some(_), .. }) => ready,
        _ => false,
    }
}

async fn await_init_containers(client: &QubeClient, pod_name: &str, namespace: &str, deadline: Instant) -> Result<(), String> {
    let api = client.pods(namespace);
    loop {
        let pod = api.get(pod_name).await.map_err(|e| format!("cannot read pod {pod_name}: {e}"))?;
        let statuses = pod.status.as_ref().and_then(|s| s.init_container_statuses.clone()).unwrap_or_default();

        let all_settled = statuses
            .iter()
            .all(|s| container_terminal_or_ready(s.state.as_ref(), s.ready));

        if all_settled {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(format!("timed out waiting for init containers of pod {pod_name}"));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn await_main_containers(client: &QubeClient, pod_name: &str, namespace: &str, deadline: Instant) -> Result<(), String> {
    let api = client.pods(namespace);
    let mut unsuccessful_observations = 0u32;
    let mut last_waiting_reason: Option<String> = None;

    loop {
        let pod = api.get(pod_name).await.map_err(|e| format!("cannot read pod {pod_name}: {e}"))?;
        let statuses = pod.status.as_ref().and_then(|s| s.container_statuses.clone()).unwrap_or_default();

        let all_running_or_terminated = statuses.iter().all(|s| match &s.state {
            Some(ContainerState { running: Some(_), .. }) | Some(ContainerState { terminated: Some(_), .. }) => true,
            _ => false,
        });

        if all_running_or_terminated {
            return Ok(());
        }

        for status in &statuses {
            if let Some(ContainerState { waiting: Some(waiting), .. }) = &status.state {
                if last_waiting_reason.as_deref() != waiting.reason.as_deref() {
                    info!("container {} waiting: {:?}", status.name, waiting.reason);
                    last_waiting_reason = waiting.reason.clone();
                }
            }
        }

        unsuccessful_observations += 1;
        if unsuccessful_observations > MAX_UNSUCCESSFUL_MAIN_CONTAINER_OBSERVATIONS || Instant::now() >= deadline {
            return Err(format!("timed out waiting for main containers of pod {pod_name}"));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn collect_container_logs(
    client: &QubeClient,
    pod_name: &str,
    namespace: &str,
    init_containers: bool,
    container_filters: &Option<Vec<String>>,
) -> String {
    let api = client.pods(namespace);
    let pod = match api.get(pod_name).await {
        Ok(pod) => pod,
        Err(err) => return format!("unable to read pod {pod_name} for log collection: {err}\n"),
    };

    let spec = pod.spec.as_ref();
    let containers = if init_containers {
        spec.and_then(|s| s.init_containers.clone()).unwrap_or_default()
    } else {
        spec.map(|s| s.containers.clone()).unwrap_or_default()
    };

    let mut logs = String::new();
    for container in containers {
        if let Some(filters) = container_filters {
            if !filters.iter().any(|f| f == &container.name) {
                continue;
            }
        }
        let params = LogParams {
            container: Some(container.name.clone()),
            ..Default::default()
        };
        match api.logs(pod_name, &params).await {
            Ok(log) => {
                logs.push_str(&format!("--- {} ---\n", container.name));
                logs.push_str(&log);
                logs.push('\n');
            }
            Err(err) => logs.push_str(&format!("unable to fetch logs for container {}: {}\n", container.name, err)),
        }
    }
    logs
}

enum JobClassification {
    Complete,
    Failed { superseded: bool },
}

async fn await_job_completion(
    client: &QubeClient,
    job_name: &str,
    namespace: &str,
    deadline: Instant,
) -> Result<JobClassification, String> {
    let api = client.jobs(namespace);
    loop {
        match api.get(job_name).await {
            Ok(job) => {
                let annotations = job.metadata.annotations.clone().unwrap_or_default();
                let conditions = job.status.as_ref().and_then(|s| s.conditions.clone()).unwrap_or_default();

                if conditions.iter().any(|c| c.type_ == "Complete" && c.status == "True") {
                    return Ok(JobClassification::Complete);
                }
                if conditions.iter().any(|c| c.type_ == "Failed" && c.status == "True") {
                    let superseded = annotations.get(SUPERSEDED_ANNOTATION).map(String::as_str) == Some(SUPERSEDED_VALUE);
                    return Ok(JobClassification::Failed { superseded });
                }
            }
            Err(err) => warn!("transient error reading job {} status, retrying: {}", job_name, err),
        }

        if Instant::now() >= deadline {
            return Err(format!("timed out waiting for job {job_name} completion"));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn classify(classification: JobClassification, logs: String) -> JobResult {
    match classification {
        JobClassification::Complete => JobResult::succeeded(logs),
        JobClassification::Failed { superseded: true } => JobResult::superseded(logs),
        JobClassification::Failed { superseded: false } => JobResult::failed(logs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superseded_failure_classifies_as_superseded_success() {
        let result = classify(JobClassification::Failed { superseded: true }, "log output".to_string());
        assert!(result.success);
        assert_eq!(result.status, crate::models::job_result::JobStatus::Superseded);
    }

    #[test]
    fn plain_failure_classifies_as_failed() {
        let result = classify(JobClassification::Failed { superseded: false }, "log output".to_string());
        assert!(!result.success);
        assert_eq!(result.status, crate::models::job_result::JobStatus::Failed);
    }

    #[test]
    fn completion_classifies_as_succeeded() {
        let result = classify(JobClassification::Complete, "ok".to_string());
        assert!(result.success);
        assert_eq!(result.status, crate::models::job_result::JobStatus::Succeeded);
    }
}
