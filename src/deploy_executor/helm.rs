//! `DeployExecutor` Helm variant (spec.md §4.2): validates the Helm config,
//! optionally wires up KEDA HTTP scale-to-zero, reconciles any prior release,
//! ensures RBAC, submits a native-Helm deploy job, waits on JobMonitor, then
//! best-effort patches the matching Ingress and polls the public URL when
//! scale-to-zero is enabled.

use crate::cmd::helm::{ChartSetValue, Helm};
use crate::deploy_executor::{DeployContext, DeployExecutor};
use crate::errors::EngineError;
use crate::events::{EventDetails, Stage};
use crate::job_monitor::{monitor_job, JobMonitorOptions};
use crate::models::deploy::{Deploy, DeployStatus, ScaleToZeroKind};
use crate::models::job_result::JobStatus;
use crate::models::deployable::HelmConfig;
use crate::models::release_state::ChartVariant;
use crate::rbac::{PermissionProfile, RbacProvisioner};
use crate::release_reconciler::ReleaseReconciler;
use crate::runtime::block_on;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ResourceRequirements, ServiceSpec, Toleration};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, PostParams};
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;

const JOB_BACKOFF_LIMIT: i32 = 0;
const JOB_ACTIVE_DEADLINE_SECONDS: i64 = 1800;
const STATIC_JOB_TTL_SECONDS: i32 = 86400;
const SCALE_TO_ZERO_RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub struct HelmExecutor;

impl DeployExecutor for HelmExecutor {
    fn execute(&self, ctx: &DeployContext, deploy: &mut Deploy) -> Result<(), Box<EngineError>> {
        let event_details = EventDetails::new(ctx.build.uuid, deploy.uuid, deploy.deployable.name.clone(), Stage::Deploy);

        let helm_config = deploy
            .deployable
            .helm
            .clone()
            .ok_or_else(|| EngineError::new_config_error(event_details.clone(), "deployable has no helm configuration".to_string()))?;

        if helm_config.chart_name.is_empty() {
            return Err(EngineError::new_config_error(event_details.clone(), "chart name is required".to_string()));
        }
        if helm_config.chart_variant != ChartVariant::OrgChart && ctx.config.is_public_chart_blocked(&helm_config.chart_name) {
            return Err(EngineError::new_config_error(
                event_details.clone(),
                format!("chart {} is on the public-chart block list", helm_config.chart_name),
            ));
        }
        let helm_version = helm_config
            .helm_version
            .clone()
            .or_else(|| Some(ctx.config.helm_defaults.default_helm_version.clone()))
            .ok_or_else(|| EngineError::new_config_error(event_details.clone(), "no helm version resolvable".to_string()))?;
        if helm_config.chart_variant == ChartVariant::OrgChart && deploy.docker_image.is_none() {
            return Err(EngineError::new_config_error(
                event_details.clone(),
                "docker image required for the org chart variant".to_string(),
            ));
        }

        let wants_http_scale_to_zero = deploy
            .keda_scale_to_zero
            .as_ref()
            .is_some_and(|k| k.kind == ScaleToZeroKind::Http)
            && !ctx.build.is_static;

        if wants_http_scale_to_zero {
            apply_http_scale_to_zero(ctx, deploy, &event_details)?;
        }

        let release_name = deploy.release_name();
        let helm = Helm::new(None);

        let reconciler = ReleaseReconciler::new(ctx.client, &helm);
        block_on(reconciler.reconcile(&release_name, &ctx.build.namespace, &event_details))?;

        let rbac = RbacProvisioner::new(ctx.client);
        block_on(rbac.ensure(
            &ctx.build.namespace,
            &ctx.config.service_account_name,
            ctx.config.service_account_iam_role_arn.as_deref(),
            PermissionProfile::Deploy,
            false,
            &event_details,
        ))?;

        let set_values = custom_values(ctx, deploy, &helm_config);

        let repo = if helm_config.chart_variant != ChartVariant::OrgChart && !helm_config.chart_name.starts_with("oci://") {
            ctx.config
                .chart_repositories
                .get(&helm_config.chart_name)
                .map(|url| (helm_config.chart_name.as_str(), url.as_str()))
        } else {
            None
        };

        let job_id = random_job_id();
        let job_name = deploy.job_name(&job_id);
        submit_job(ctx, deploy, &job_name, &release_name, &helm_config, &helm_version, &set_values, repo)?;

        let job_result = block_on(monitor_job(
            ctx.client,
            JobMonitorOptions {
                job_name: job_name.clone(),
                namespace: ctx.build.namespace.clone(),
                timeout: Some(std::time::Duration::from_secs(JOB_ACTIVE_DEADLINE_SECONDS as u64)),
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
                    format!("helm deploy job {job_name} was superseded by a newer deploy attempt"),
                ));
            }
            JobStatus::Failed => {
                return Err(EngineError::new_remote_api_error(
                    event_details.clone(),
                    format!("helm deploy job {job_name} failed"),
                    None,
                ));
            }
        }

        patch_ingress_banner(ctx, deploy);

        if wants_http_scale_to_zero {
            let max_retries = deploy.keda_scale_to_zero.as_ref().map(|k| k.max_retries).unwrap_or(0);
            if !poll_public_url(ctx, deploy, max_retries) {
                return Err(EngineError::new_timeout(
                    event_details.clone(),
                    format!("public URL for deploy {} never responded after scale-to-zero setup", deploy.uuid),
                ));
            }
        }

        deploy.status = DeployStatus::Ready;
        Ok(())
    }
}

/// Derives the public hostname a scale-to-zero-enabled service is reachable
/// at: `<deployable name>.<http_domain>`.
fn public_url(ctx: &DeployContext, deploy: &Deploy) -> String {
    format!("https://{}.{}", deploy.deployable.name, ctx.config.http_domain)
}

/// Applies the KEDA `HTTPScaledObject` plus its ExternalName companion
/// service so incoming requests route through the interceptor until KEDA
/// scales the target Deployment back up (spec.md §4.2 step 2).
fn apply_http_scale_to_zero(ctx: &DeployContext, deploy: &Deploy, event_details: &EventDetails) -> Result<(), Box<EngineError>> {
    let host = deploy.deployable.name.clone();
    let gvk = GroupVersionKind::gvk("http.keda.sh", "v1alpha1", "HTTPScaledObject");
    let api_resource = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> = Api::namespaced_with(ctx.client.as_ref().clone(), &ctx.build.namespace, &api_resource);

    let mut scaler = DynamicObject::new(&format!("{host}-http-scaler"), &api_resource);
    scaler.metadata.namespace = Some(ctx.build.namespace.clone());
    scaler.data = serde_json::json!({
        "spec": {
            "hosts": [public_url(ctx, deploy).trim_start_matches("https://")],
            "scaleTargetRef": {
                "deployment": deploy.uuid.to_string(),
                "service": deploy.uuid.to_string(),
                "port": deploy.deployable.ports.first().copied().unwrap_or(80),
            },
            "replicas": { "min": 0, "max": deploy.replica_count },
        }
    });

    block_on(api.create(&PostParams::default(), &scaler))
        .map(|_| ())
        .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), format!("cannot apply HTTPScaledObject for {host}: {e}"), None))?;

    let external_name = k8s_openapi::api::core::v1::Service {
        metadata: ObjectMeta {
            name: Some(format!("{host}-scaler-proxy")),
            namespace: Some(ctx.build.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some("keda-add-ons-http-interceptor-proxy.keda.svc.cluster.local".to_string()),
            ..Default::default()
        }),
        status: None,
    };

    let svc_api = ctx.client.services(&ctx.build.namespace);
    let svc_name = format!("{host}-scaler-proxy");
    block_on(crate::services::kube_client::create_or_patch(&svc_api, &svc_name, "lifecycle-deploy-core", &external_name))
        .map(|_| ())
        .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), format!("cannot apply scale-to-zero ExternalName service for {host}: {e}"), None))
}

/// Polls the deploy's public HTTPS URL until it answers successfully, up to
/// `max_retries` attempts (spec.md §4.2 step 9).
fn poll_public_url(ctx: &DeployContext, deploy: &Deploy, max_retries: u32) -> bool {
    let url = public_url(ctx, deploy);
    let client = reqwest::blocking::Client::builder().timeout(Duration::from_secs(10)).build();
    let Ok(client) = client else { return false };

    for attempt in 0..=max_retries {
        match client.get(&url).send() {
            Ok(resp) if resp.status().is_success() => return true,
            Ok(resp) => warn!("scale-to-zero poll of {} returned {} (attempt {}/{})", url, resp.status(), attempt, max_retries),
            Err(err) => warn!("scale-to-zero poll of {} failed: {} (attempt {}/{})", url, err, attempt, max_retries),
        }
        std::thread::sleep(SCALE_TO_ZERO_RETRY_INTERVAL);
    }
    false
}

fn random_job_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..6).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char).collect()
}

/// Escapes underscores by doubling them, per the `<KEY_WITH_DOUBLED_UNDERSCORES>`
/// convention used throughout spec.md §4.2's custom-value construction.
fn double_underscores(key: &str) -> String {
    key.replace('_', "__")
}

fn custom_values(ctx: &DeployContext, deploy: &Deploy, helm_config: &HelmConfig) -> Vec<ChartSetValue> {
    match helm_config.chart_variant {
        ChartVariant::OrgChart => org_chart_values(ctx, deploy, helm_config),
        ChartVariant::Public => public_chart_values(ctx, deploy, helm_config),
        ChartVariant::Local => local_chart_values(ctx, deploy, helm_config),
    }
}

fn resource_type() -> &'static str {
    "deployment"
}

fn org_chart_values(ctx: &DeployContext, deploy: &Deploy, _helm_config: &HelmConfig) -> Vec<ChartSetValue> {
    let rt = resource_type();
    let mut values = Vec::new();
    let push = |values: &mut Vec<ChartSetValue>, key: String, value: String| values.push(ChartSetValue { key, value });

    if let Some(image) = &deploy.docker_image {
        push(&mut values, format!("{rt}.appImage"), image.clone());
        if let Some((_, version)) = image.rsplit_once(':') {
            push(&mut values, format!("{rt}.version"), version.to_string());
        }
    }

    match &deploy.init_docker_image {
        Some(init_image) => {
            push(&mut values, format!("{rt}.initImage"), init_image.clone());
            if let Some((_, version)) = init_image.rsplit_once(':') {
                push(&mut values, format!("{rt}.version"), version.to_string());
            }
            for (k, v) in ctx.build.merged_init_env(&deploy.init_env) {
                push(&mut values, format!("{rt}.initEnv.{}", double_underscores(&k)), v);
            }
        }
        None => push(&mut values, format!("{rt}.disableInit"), "true".to_string()),
    }

    for (k, v) in ctx.build.merged_runtime_env(&deploy.env) {
        push(&mut values, format!("{rt}.env.{}", double_underscores(&k)), v);
    }

    push(&mut values, "env".to_string(), format!("lifecycle-{}", ctx.build.uuid));
    push(&mut values, format!("{rt}.enableServiceLinks"), "disabled".to_string());
    push(&mut values, "lc__uuid".to_string(), ctx.build.uuid.to_string());

    if ctx.build.is_static {
        push(
            &mut values,
            "nodeAffinity.requiredDuringSchedulingIgnoredDuringExecution".to_string(),
            "ON_DEMAND".to_string(),
        );
        push(&mut values, "tolerations[0].key".to_string(), "static_env".to_string());
    }

    values
}

fn public_chart_values(ctx: &DeployContext, deploy: &Deploy, helm_config: &HelmConfig) -> Vec<ChartSetValue> {
    let mut values = Vec::new();
    let overrides = ctx.config.chart_override(&helm_config.chart_name);
    for (k, v) in &overrides.values {
        values.push(ChartSetValue { key: k.clone(), value: v.clone() });
    }
    for (k, v) in &helm_config.custom_values {
        values.push(ChartSetValue { key: k.clone(), value: v.clone() });
    }

    values.push(ChartSetValue {
        key: "fullnameOverride".to_string(),
        value: deploy.uuid.to_string(),
    });
    values.push(ChartSetValue {
        key: "commonLabels.name".to_string(),
        value: deploy.uuid.to_string(),
    });
    values.push(ChartSetValue {
        key: "commonLabels.lc__uuid".to_string(),
        value: ctx.build.uuid.to_string(),
    });

    if ctx.build.is_static {
        for (i, toleration) in overrides.tolerations.iter().enumerate() {
            values.push(ChartSetValue {
                key: format!("tolerations[{i}].key"),
                value: toleration.clone(),
            });
        }
        for (k, v) in &overrides.node_selector {
            values.push(ChartSetValue {
                key: format!("nodeSelector.{k}"),
                value: v.clone(),
            });
        }
        values.push(ChartSetValue {
            key: "nodeSelector.static_env".to_string(),
            value: "lifecycle-static-env".to_string(),
        });
    }

    values
}

fn local_chart_values(ctx: &DeployContext, deploy: &Deploy, helm_config: &HelmConfig) -> Vec<ChartSetValue> {
    let mut values = public_chart_values(ctx, deploy, helm_config);
    let merged_env = ctx.build.merged_runtime_env(&deploy.env);

    if let Some(mapping) = helm_config.env_mapping.get("app") {
        match mapping.format {
            crate::models::deployable::EnvMappingFormat::Map => {
                for (k, v) in merged_env {
                    values.push(ChartSetValue {
                        key: format!("{}.{}", mapping.path, double_underscores(&k)),
                        value: v,
                    });
                }
            }
            crate::models::deployable::EnvMappingFormat::Array => {
                for (i, (k, v)) in merged_env.into_iter().enumerate() {
                    values.push(ChartSetValue {
                        key: format!("{}[{i}].name", mapping.path),
                        value: k,
                    });
                    values.push(ChartSetValue {
                        key: format!("{}[{i}].value", mapping.path),
                        value: v,
                    });
                }
            }
        }
    }

    values
}

#[allow(clippy::too_many_arguments)]
fn submit_job(
    ctx: &DeployContext,
    deploy: &Deploy,
    job_name: &str,
    release_name: &str,
    helm_config: &HelmConfig,
    helm_version: &str,
    set_values: &[ChartSetValue],
    repo: Option<(&str, &str)>,
) -> Result<(), Box<EngineError>> {
    let event_details = EventDetails::new(ctx.build.uuid, deploy.uuid, deploy.deployable.name.clone(), Stage::Deploy);

    let needs_git_init = !deploy.branch_name.is_empty() && (helm_config.chart_variant != ChartVariant::Public || !helm_config.value_files.is_empty());

    let mut init_containers = Vec::new();
    if needs_git_init {
        init_containers.push(Container {
            name: "git-clone".to_string(),
            image: Some("alpine/git".to_string()),
            command: Some(vec!["git".to_string(), "clone".to_string(), "--branch".to_string(), deploy.branch_name.clone()]),
            ..Default::default()
        });
    }

    let helm_script = build_helm_script(release_name, helm_config, &ctx.config.helm_defaults.default_args, set_values, repo);

    let mut labels = BTreeMap::new();
    labels.insert("lc-uuid".to_string(), release_name.to_string());
    labels.insert("service".to_string(), deploy.deployable.name.clone());
    labels.insert("git-sha".to_string(), deploy.sha.clone());
    labels.insert("git-branch".to_string(), deploy.branch_name.clone());
    labels.insert("deploy-id".to_string(), deploy.uuid.to_string());
    labels.insert("deployable-id".to_string(), deploy.deployable.name.clone());
    labels.insert("app.kubernetes.io/name".to_string(), "native-helm".to_string());

    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity("200m".to_string()));
    requests.insert("memory".to_string(), Quantity("256Mi".to_string()));
    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity("1000m".to_string()));
    limits.insert("memory".to_string(), Quantity("1Gi".to_string()));

    let job = Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: Some(ctx.build.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(JOB_BACKOFF_LIMIT),
            active_deadline_seconds: Some(JOB_ACTIVE_DEADLINE_SECONDS),
            ttl_seconds_after_finished: if ctx.build.is_static { Some(STATIC_JOB_TTL_SECONDS) } else { None },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    service_account_name: Some(ctx.config.service_account_name.clone()),
                    init_containers: if init_containers.is_empty() { None } else { Some(init_containers) },
                    containers: vec![Container {
                        name: "helm".to_string(),
                        image: Some(format!("alpine/helm:{helm_version}")),
                        command: Some(vec!["sh".to_string(), "-c".to_string()]),
                        args: Some(vec![helm_script]),
                        resources: Some(ResourceRequirements {
                            requests: Some(requests),
                            limits: Some(limits),
                            claims: None,
                        }),
                        ..Default::default()
                    }],
                    tolerations: Some(vec![Toleration {
                        key: Some("builder".to_string()),
                        operator: Some("Equal".to_string()),
                        value: Some("yes".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Default::default()
                    }]),
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
        .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), format!("cannot create deploy job {job_name}: {e}"), None))
}

/// Builds the helm container's shell script: adds the chart's repo for
/// non-OCI public charts (inside the job, since the container that actually
/// runs `helm upgrade --install` never shares state with this host process),
/// then runs the upgrade with `--set`/`-f` flags and the concatenation of
/// defaultArgs then deployable args (later wins on duplicate flags, spec.md
/// §4.2 step 6).
fn build_helm_script(
    release_name: &str,
    helm_config: &HelmConfig,
    default_args: &[String],
    set_values: &[ChartSetValue],
    repo: Option<(&str, &str)>,
) -> String {
    let mut script = String::from("set -e\n");
    if let Some((alias, url)) = repo {
        script.push_str(&format!("helm repo add {alias} {url}\n"));
    }
    let set_args: String = set_values.iter().map(|v| format!(" --set {}", v.escaped_set_arg())).collect();
    let value_file_args: String = helm_config.value_files.iter().map(|f| format!(" -f {f}")).collect();
    let tail_args: String = default_args
        .iter()
        .chain(helm_config.args.iter())
        .map(|a| format!(" {a}"))
        .collect();

    script.push_str(&format!(
        "helm upgrade --install {release_name} {chart}{set_args}{value_file_args}{tail_args}\n",
        chart = helm_config.chart_name,
        set_args = set_args,
        value_file_args = value_file_args,
        tail_args = tail_args,
    ));
    script
}

/// Patches the namespaced Ingress matching `Deploy.uuid` with a merged
/// `configuration-snippet` banner annotation. Best-effort: failures here are
/// logged but never fail the deploy (spec.md §4.2 step 8).
fn patch_ingress_banner(ctx: &DeployContext, deploy: &Deploy) {
    let api = ctx.client.ingresses(&ctx.build.namespace);
    let patch = serde_json::json!({
        "metadata": {
            "annotations": {
                "nginx.ingress.kubernetes.io/configuration-snippet": "add_header X-Lifecycle-Environment \"ephemeral\";",
            }
        }
    });
    let patch_params = kube::api::PatchParams::apply("lifecycle-deploy-core").force();
    let result = block_on(api.patch(&deploy.uuid.to_string(), &patch_params, &kube::api::Patch::Merge(&patch)));
    if let Err(err) = result {
        warn!("could not patch ingress banner for deploy {}: {}", deploy.uuid, err);
    }
}
