//! Produces the Kubernetes object YAML for a raw-manifest deploy from a
//! deployable's normalized config (spec.md §4.6). Built as `serde_yaml::Value`
//! trees the way `environment/models/*.rs` builds typed structs, rather than
//! hand-formatted string templates — except where none of the emitted fields
//! need anything beyond what `serde_yaml` already expresses.

use crate::config::GlobalConfig;
use crate::models::build::Build;
use crate::models::deploy::Deploy;
use crate::models::deployable::{DiskMedium, ProbeType};
use crate::unit_conversion::cpu_string_to_float;
use serde_yaml::Value;
use std::collections::BTreeMap;

const STATIC_ENV_TOLERATION_KEY: &str = "static_env";

/// Streams one `---`-delimited YAML document per synthesized object.
pub fn synthesize(build: &Build, deploy: &Deploy, config: &GlobalConfig) -> String {
    let mut documents = Vec::new();

    for disk in persisted_disks(deploy) {
        documents.push(pvc(build, deploy, &disk));
    }

    documents.push(deployment(build, deploy));
    documents.push(node_port_service(build, deploy));

    if let Some(helm) = &deploy.deployable.helm {
        if helm.grpc {
            documents.push(ambassador_mapping(build, deploy, config));
        }
    }

    documents.push(internal_lb_service(build, deploy));

    if deploy.cname.is_some() {
        documents.push(external_name_service(build, deploy));
    }

    documents
        .into_iter()
        .map(|doc| serde_yaml::to_string(&doc).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("---\n")
}

fn persisted_disks(deploy: &Deploy) -> Vec<crate::models::deployable::ServiceDisk> {
    deploy
        .deployable
        .service_disks_yaml
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|d| matches!(d.medium, DiskMedium::Unspecified | DiskMedium::Disk | DiskMedium::Ebs))
        .collect()
}

fn has_recreate_strategy_disk(deploy: &Deploy) -> bool {
    deploy
        .deployable
        .service_disks_yaml
        .iter()
        .flatten()
        .any(|d| matches!(d.medium, DiskMedium::Disk | DiskMedium::Ebs))
}

fn pvc(build: &Build, deploy: &Deploy, disk: &crate::models::deployable::ServiceDisk) -> Value {
    let access_mode = disk.access_mode.clone().unwrap_or_else(|| "ReadWriteOnce".to_string());
    serde_yaml::from_str(&format!(
        r#"
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: {name}
  namespace: {namespace}
spec:
  accessModes: [{access_mode}]
  resources:
    requests:
      storage: {size}
"#,
        name = disk.name,
        namespace = build.namespace,
        access_mode = access_mode,
        size = disk.size,
    ))
    .expect("static PVC template is valid YAML")
}

fn affinity(build: &Build) -> Value {
    if build.capacity_type == "SPOT" {
        serde_yaml::from_str(
            r#"
preferredDuringSchedulingIgnoredDuringExecution:
  - weight: 1
    preference:
      matchExpressions:
        - key: eks.amazonaws.com/capacityType
          operator: In
          values: [SPOT]
"#,
        )
        .expect("static affinity template is valid YAML")
    } else {
        let mut match_expressions = vec![format!(
            "        - key: capacityType\n          operator: In\n          values: [{}]",
            build.capacity_type
        )];
        if build.is_static {
            match_expressions.push("        - key: app-long\n          operator: In\n          values: [lifecycle-static-env]".to_string());
        }
        serde_yaml::from_str(&format!(
            "requiredDuringSchedulingIgnoredDuringExecution:\n  nodeSelectorTerms:\n    - matchExpressions:\n{}\n",
            match_expressions.join("\n")
        ))
        .expect("generated affinity is valid YAML")
    }
}

/// A main-container env entry: either a literal value or a Downward API
/// field reference (spec.md §4.6 step 5 — `POD_IP`/`DD_AGENT_HOST`/`DD_*`
/// must resolve via `valueFrom.fieldRef`, since Kubernetes does not expand
/// `$(...)` inside a plain `value:` the way shell-style interpolation would).
enum EnvEntry {
    Value(String),
    FieldRef(String),
}

/// Flattens nested env maps to dotted keys, drops anything still nested
/// afterwards, and appends the fixed field-ref fallbacks (spec.md §4.6
/// "Environment injection into the main container").
fn main_container_env(build: &Build, deploy: &Deploy) -> Vec<(String, EnvEntry)> {
    let mut env: BTreeMap<String, String> = BTreeMap::new();
    env.insert("__NAMESPACE__".to_string(), "lifecycle".to_string());

    let merged = build.merged_runtime_env(&deploy.env);
    for (k, v) in merged {
        env.insert(k, v);
    }

    let mut pairs: Vec<(String, EnvEntry)> = env.into_iter().map(|(k, v)| (k, EnvEntry::Value(v))).collect();

    pairs.push(("POD_IP".to_string(), EnvEntry::FieldRef("status.podIP".to_string())));
    pairs.push(("DD_AGENT_HOST".to_string(), EnvEntry::FieldRef("status.hostIP".to_string())));

    let already_set: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
    if !already_set.contains(&"DD_ENV") {
        pairs.push(("DD_ENV".to_string(), EnvEntry::FieldRef("metadata.labels['env']".to_string())));
    }
    if !already_set.contains(&"DD_SERVICE") {
        pairs.push(("DD_SERVICE".to_string(), EnvEntry::FieldRef("metadata.labels['service']".to_string())));
    }
    if !already_set.contains(&"DD_VERSION") {
        pairs.push(("DD_VERSION".to_string(), EnvEntry::FieldRef("metadata.labels['version']".to_string())));
    }
    pairs.push(("LC_UUID".to_string(), EnvEntry::Value(build.uuid.to_string())));

    pairs
}

fn init_container_env(build: &Build, deploy: &Deploy) -> Vec<(String, EnvEntry)> {
    build
        .merged_init_env(&deploy.init_env)
        .into_iter()
        .map(|(k, v)| (k, EnvEntry::Value(v)))
        .collect()
}

fn deployment(build: &Build, deploy: &Deploy) -> Value {
    let strategy = if has_recreate_strategy_disk(deploy) {
        "type: Recreate"
    } else {
        "type: RollingUpdate\n  rollingUpdate:\n    maxUnavailable: 0%"
    };

    let mut tolerations = String::new();
    if build.is_static {
        tolerations = format!(
            "\n      tolerations:\n        - key: {}\n          operator: Equal\n          value: \"true\"\n          effect: NoSchedule",
            STATIC_ENV_TOLERATION_KEY
        );
    }

    let probes_yaml = probes_block(deploy);
    let volumes_yaml = volumes_block(deploy);

    let doc = format!(
        r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {uuid}
  namespace: {namespace}
spec:
  replicas: {replicas}
  revisionHistoryLimit: 5
  strategy:
    {strategy}
  selector:
    matchLabels:
      name: {uuid}
  template:
    metadata:
      labels:
        name: {uuid}
        app.kubernetes.io/managed-by: lifecycle-deploy-core
    spec:
      enableServiceLinks: false
      securityContext:
        fsGroup: 2000{tolerations}
      containers:
        - name: app
          image: {image}
{env}
{probes}
{volumes}
"#,
        uuid = deploy.uuid,
        namespace = build.namespace,
        replicas = deploy.replica_count,
        strategy = strategy,
        tolerations = tolerations,
        image = deploy.docker_image.clone().unwrap_or_default(),
        env = indent_env_block(&main_container_env(build, deploy), 10),
        probes = probes_yaml,
        volumes = volumes_yaml,
    );

    let mut value: Value = serde_yaml::from_str(&doc).expect("generated deployment is valid YAML");
    inject_affinity(&mut value, affinity(build));
    inject_init_container(&mut value, build, deploy);
    value
}

fn indent_env_block(pairs: &[(String, EnvEntry)], indent: usize) -> String {
    if pairs.is_empty() {
        return format!("{}env: []", " ".repeat(indent));
    }
    let prefix = " ".repeat(indent);
    let mut out = format!("{prefix}env:\n");
    for (k, v) in pairs {
        match v {
            EnvEntry::Value(value) => {
                out.push_str(&format!("{prefix}  - name: {k}\n{prefix}    value: \"{value}\"\n"));
            }
            EnvEntry::FieldRef(field_path) => {
                out.push_str(&format!(
                    "{prefix}  - name: {k}\n{prefix}    valueFrom:\n{prefix}      fieldRef:\n{prefix}        fieldPath: {field_path}\n"
                ));
            }
        }
    }
    out
}

fn probes_block(deploy: &Deploy) -> String {
    if deploy.deployable.probes.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for probe in &deploy.deployable.probes {
        let body = match &probe.r#type {
            ProbeType::Http { path, scheme } => format!("httpGet:\n              path: {path}\n              port: {}\n              scheme: {scheme}", probe.port),
            ProbeType::Tcp { .. } => format!("tcpSocket:\n              port: {}", probe.port),
            ProbeType::Exec { commands } => format!("exec:\n              command: {commands:?}"),
            ProbeType::Grpc { .. } => format!("grpc:\n              port: {}", probe.port),
        };
        out.push_str(&format!(
            "          readinessProbe:\n            {body}\n            initialDelaySeconds: {init}\n            periodSeconds: {period}\n            timeoutSeconds: {timeout}\n            successThreshold: {success}\n            failureThreshold: {failure}\n",
            body = body,
            init = probe.initial_delay_seconds,
            period = probe.period_seconds,
            timeout = probe.timeout_seconds,
            success = probe.success_threshold,
            failure = probe.failure_threshold,
        ));
    }
    out
}

fn volumes_block(deploy: &Deploy) -> String {
    let disks = persisted_disks(deploy);
    if disks.is_empty() {
        return String::new();
    }
    let mut mounts = String::from("          volumeMounts:\n            - name: config\n              mountPath: /config\n");
    let mut volumes = String::from("      volumes:\n        - name: config\n          emptyDir: {}\n");
    for disk in &disks {
        mounts.push_str(&format!("            - name: {name}\n              mountPath: /data/{name}\n", name = disk.name));
        volumes.push_str(&format!(
            "        - name: {name}\n          persistentVolumeClaim:\n            claimName: {name}\n",
            name = disk.name
        ));
    }
    format!("{mounts}{volumes}")
}

fn inject_affinity(deployment: &mut Value, affinity: Value) {
    if let Some(spec) = deployment.get_mut("spec").and_then(|s| s.get_mut("template")).and_then(|t| t.get_mut("spec")) {
        if let Value::Mapping(map) = spec {
            map.insert(Value::String("affinity".to_string()), {
                let mut wrapper = serde_yaml::Mapping::new();
                wrapper.insert(Value::String("nodeAffinity".to_string()), affinity);
                Value::Mapping(wrapper)
            });
        }
    }
}

fn inject_init_container(deployment: &mut Value, build: &Build, deploy: &Deploy) {
    let Some(init_image) = &deploy.init_docker_image else { return };
    let env_pairs = init_container_env(build, deploy);
    let env_yaml = indent_env_block(&env_pairs, 10);
    let init_container = format!(
        "name: init\nimage: {init_image}\n{env_yaml}",
        init_image = init_image,
        env_yaml = env_yaml.trim_start(),
    );
    let init_value: Value = serde_yaml::from_str(&format!("- {}", init_container.replace('\n', "\n  "))).unwrap_or(Value::Sequence(vec![]));

    if let Some(spec) = deployment.get_mut("spec").and_then(|s| s.get_mut("template")).and_then(|t| t.get_mut("spec")) {
        if let Value::Mapping(map) = spec {
            map.insert(Value::String("initContainers".to_string()), init_value);
        }
    }
}

fn node_port_service(build: &Build, deploy: &Deploy) -> Value {
    let ports_yaml = service_ports_block(deploy);
    serde_yaml::from_str(&format!(
        r#"
apiVersion: v1
kind: Service
metadata:
  name: {uuid}
  namespace: {namespace}
spec:
  type: NodePort
  selector:
    name: {uuid}
  ports:
{ports}
"#,
        uuid = deploy.uuid,
        namespace = build.namespace,
        ports = ports_yaml,
    ))
    .expect("generated service is valid YAML")
}

fn internal_lb_service(build: &Build, deploy: &Deploy) -> Value {
    let ports_yaml = service_ports_block(deploy);
    serde_yaml::from_str(&format!(
        r#"
apiVersion: v1
kind: Service
metadata:
  name: internal-lb-{uuid}
  namespace: {namespace}
spec:
  type: ClusterIP
  selector:
    name: {uuid}
  ports:
{ports}
"#,
        uuid = deploy.uuid,
        namespace = build.namespace,
        ports = ports_yaml,
    ))
    .expect("generated service is valid YAML")
}

fn service_ports_block(deploy: &Deploy) -> String {
    deploy
        .deployable
        .ports
        .iter()
        .map(|p| format!("    - port: {p}\n      targetPort: {p}\n      name: \"p{p}\""))
        .collect::<Vec<_>>()
        .join("\n")
}

fn ambassador_mapping(build: &Build, deploy: &Deploy, config: &GlobalConfig) -> Value {
    let port = deploy.deployable.ports.first().copied().unwrap_or(80);
    serde_yaml::from_str(&format!(
        r#"
apiVersion: getambassador.io/v3alpha1
kind: Mapping
metadata:
  name: {uuid}-mapping
  namespace: {namespace}
spec:
  hostname: {uuid}.{grpc_host}:443
  service: {uuid}:{port}
  timeout_ms: 20000
"#,
        uuid = deploy.uuid,
        namespace = build.namespace,
        grpc_host = config.grpc_domain,
        port = port,
    ))
    .expect("generated mapping is valid YAML")
}

fn external_name_service(build: &Build, deploy: &Deploy) -> Value {
    serde_yaml::from_str(&format!(
        r#"
apiVersion: v1
kind: Service
metadata:
  name: {uuid}-external
  namespace: {namespace}
spec:
  type: ExternalName
  externalName: {cname}
"#,
        uuid = deploy.uuid,
        namespace = build.namespace,
        cname = deploy.cname.clone().unwrap_or_default(),
    ))
    .expect("generated external name service is valid YAML")
}

/// Per spec.md §4.2 step 5's resource requests/limits (200m/256Mi, 1000m/1Gi),
/// exposed so callers can sanity-check a deployable's overrides against the
/// defaults using the same unit parser as the rest of the crate.
pub fn default_request_cpu_cores() -> f32 {
    cpu_string_to_float("200m")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalConfig, HelmDefaults, LabelSets};
    use crate::models::build::BuildStatus;
    use crate::models::deploy::DeployStatus;
    use crate::models::deployable::{Deployable, DeployableType};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn config() -> GlobalConfig {
        GlobalConfig {
            ingress_class: "nginx".into(),
            default_uuid: "default".into(),
            http_domain: "example.com".into(),
            grpc_domain: "grpc.example.com".into(),
            ecr_registry: "123.dkr.ecr.us-east-1.amazonaws.com".into(),
            default_capacity_type: "ON_DEMAND".into(),
            helm_defaults: HelmDefaults {
                default_args: vec![],
                default_helm_version: "3.14.0".into(),
            },
            chart_overrides: HashMap::new(),
            service_account_name: "lifecycle-deployer".into(),
            service_account_iam_role_arn: None,
            org_chart_name: "org-chart".into(),
            public_chart_block_list: vec![],
            labels: LabelSets::default(),
            chart_repositories: HashMap::new(),
            max_parallel_deploy: None,
        }
    }

    fn build(is_static: bool) -> Build {
        Build {
            uuid: Uuid::new_v4(),
            namespace: "lifecycle-1234".into(),
            is_static,
            enable_full_yaml: false,
            comment_runtime_env: HashMap::new(),
            comment_init_env: HashMap::new(),
            capacity_type: "ON_DEMAND".into(),
            status: BuildStatus::Pending,
        }
    }

    fn deploy() -> Deploy {
        Deploy {
            uuid: Uuid::new_v4(),
            run_uuid: Uuid::new_v4(),
            status: DeployStatus::Queued,
            status_message: None,
            docker_image: Some("myimg:1.2.3".into()),
            init_docker_image: None,
            env: HashMap::new(),
            init_env: HashMap::new(),
            sha: "abcdef0123".into(),
            branch_name: "main".into(),
            manifest: None,
            replica_count: 2,
            active: true,
            keda_scale_to_zero: None,
            build_output: None,
            cname: None,
            deployable: Deployable {
                name: "svc".into(),
                r#type: DeployableType::Github,
                helm: None,
                resource_requests_cpu: None,
                resource_requests_memory: None,
                resource_limits_cpu: None,
                resource_limits_memory: None,
                probes: vec![],
                ports: vec![8080],
                deployment_depends_on: vec![],
                service_disks_yaml: None,
            },
        }
    }

    #[test]
    fn synthesizes_a_deployment_and_two_services() {
        let b = build(false);
        let d = deploy();
        let yaml = synthesize(&b, &d, &config());
        assert!(yaml.contains("kind: Deployment"));
        assert!(yaml.contains("kind: Service"));
        assert!(yaml.matches("kind: Service").count() == 2);
        assert!(!yaml.contains("kind: Mapping"));
    }

    #[test]
    fn disk_attachment_forces_recreate_strategy() {
        let b = build(false);
        let mut d = deploy();
        d.deployable.service_disks_yaml = Some(vec![crate::models::deployable::ServiceDisk {
            name: "data".into(),
            medium: DiskMedium::Ebs,
            size: "10Gi".into(),
            access_mode: None,
        }]);
        let yaml = synthesize(&b, &d, &config());
        assert!(yaml.contains("type: Recreate"));
        assert!(yaml.contains("kind: PersistentVolumeClaim"));
    }

    #[test]
    fn cname_emits_external_name_service() {
        let b = build(false);
        let mut d = deploy();
        d.cname = Some("upstream.example.com".into());
        let yaml = synthesize(&b, &d, &config());
        assert!(yaml.contains("kind: ExternalName".to_string()) || yaml.contains("ExternalName"));
    }

    #[test]
    fn deploy_env_is_merged_into_the_main_container() {
        let b = build(false);
        let mut d = deploy();
        d.env = maplit::hashmap! {
            "DATABASE_URL".to_string() => "postgres://db".to_string(),
            "LOG_LEVEL".to_string() => "debug".to_string(),
        };
        let yaml = synthesize(&b, &d, &config());
        assert!(yaml.contains("DATABASE_URL"));
        assert!(yaml.contains("postgres://db"));
        assert!(yaml.contains("LOG_LEVEL"));
    }

    #[test]
    fn pod_ip_and_datadog_env_are_field_refs_not_literal_values() {
        let b = build(false);
        let d = deploy();
        let yaml = synthesize(&b, &d, &config());
        assert!(yaml.contains("fieldPath: status.podIP"));
        assert!(yaml.contains("fieldPath: status.hostIP"));
        assert!(yaml.contains("fieldPath: metadata.labels['env']"));
        assert!(!yaml.contains("$(status.podIP)"));
    }

    #[test]
    fn ambassador_mapping_uses_the_configured_grpc_domain() {
        let b = build(false);
        let mut d = deploy();
        d.deployable.helm = Some(crate::models::deployable::HelmConfig {
            chart_name: "".into(),
            chart_variant: crate::models::release_state::ChartVariant::Public,
            helm_version: None,
            custom_values: HashMap::new(),
            value_files: vec![],
            args: vec![],
            env_mapping: HashMap::new(),
            grpc: true,
        });
        let cfg = config();
        let yaml = synthesize(&b, &d, &cfg);
        assert!(yaml.contains(&format!("{}.{}:443", d.uuid, cfg.grpc_domain)));
        assert!(!yaml.contains("GRPC_DOMAIN_PLACEHOLDER"));
    }
}
