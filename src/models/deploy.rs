use crate::models::deployable::Deployable;
use crate::string::cut;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStatus {
    Queued,
    Deploying,
    Ready,
    DeployFailed,
}

#[derive(Debug, Clone)]
pub struct Deploy {
    pub uuid: Uuid,
    pub run_uuid: Uuid,
    pub status: DeployStatus,
    pub status_message: Option<String>,
    pub docker_image: Option<String>,
    pub init_docker_image: Option<String>,
    pub env: HashMap<String, String>,
    pub init_env: HashMap<String, String>,
    pub sha: String,
    pub branch_name: String,
    pub manifest: Option<String>,
    pub replica_count: u32,
    pub active: bool,
    pub keda_scale_to_zero: Option<KedaScaleToZero>,
    pub build_output: Option<String>,
    pub cname: Option<String>,
    pub deployable: Deployable,
}

#[derive(Debug, Clone)]
pub struct KedaScaleToZero {
    pub kind: ScaleToZeroKind,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleToZeroKind {
    Http,
    None,
}

impl Deploy {
    /// `Deploy.uuid` lowercased (spec.md §3 invariant).
    pub fn release_name(&self) -> String {
        self.uuid.to_string().to_lowercase()
    }

    /// `<deploy.uuid>-deploy-<6-char-jobId>-<sha[0:7]>` truncated to 63 chars
    /// with any trailing `-` stripped.
    pub fn job_name(&self, job_id: &str) -> String {
        let sha_prefix: String = self.sha.chars().take(7).collect();
        let full = format!("{}-deploy-{}-{}", self.uuid, job_id, sha_prefix);
        cut(full, 63).trim_end_matches('-').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployable::{Deployable, DeployableType};

    fn deployable() -> Deployable {
        Deployable {
            name: "svc".into(),
            r#type: DeployableType::Helm,
            helm: None,
            resource_requests_cpu: None,
            resource_requests_memory: None,
            resource_limits_cpu: None,
            resource_limits_memory: None,
            probes: vec![],
            ports: vec![],
            deployment_depends_on: vec![],
            service_disks_yaml: None,
        }
    }

    fn deploy(uuid: Uuid, sha: &str) -> Deploy {
        Deploy {
            uuid,
            run_uuid: Uuid::nil(),
            status: DeployStatus::Queued,
            status_message: None,
            docker_image: None,
            init_docker_image: None,
            env: HashMap::new(),
            init_env: HashMap::new(),
            sha: sha.into(),
            branch_name: "main".into(),
            manifest: None,
            replica_count: 1,
            active: true,
            keda_scale_to_zero: None,
            build_output: None,
            cname: None,
            deployable: deployable(),
        }
    }

    #[test]
    fn release_name_is_lowercased_uuid() {
        let id = Uuid::parse_str("4A7C1A3E-3B2C-4E1A-9C2B-1F2E3D4C5B6A").unwrap();
        let d = deploy(id, "abcdef0123");
        assert_eq!(d.release_name(), id.to_string().to_lowercase());
    }

    #[test]
    fn job_name_truncates_to_63_and_strips_trailing_dash() {
        let id = Uuid::nil();
        let d = deploy(id, "abcdef0");
        let name = d.job_name("abc123");
        assert!(name.len() <= 63);
        assert!(!name.ends_with('-'));
        assert!(name.starts_with(&id.to_string()));
    }
}
