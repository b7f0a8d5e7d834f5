use crate::models::release_state::ChartVariant;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum DeployableType {
    Helm,
    Github,
    Docker,
    Cli,
    ExternalHttp,
    Configuration,
    Codefresh,
}

#[derive(Debug, Clone)]
pub struct Probe {
    pub r#type: ProbeType,
    pub port: u16,
    pub initial_delay_seconds: u32,
    pub period_seconds: u32,
    pub timeout_seconds: u32,
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

#[derive(Debug, Clone)]
pub enum ProbeType {
    Exec { commands: Vec<String> },
    Http { path: String, scheme: String },
    Tcp { host: Option<String> },
    Grpc { service: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMappingFormat {
    Array,
    Map,
}

#[derive(Debug, Clone)]
pub struct EnvMapping {
    pub format: EnvMappingFormat,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct HelmConfig {
    pub chart_name: String,
    pub chart_variant: ChartVariant,
    pub helm_version: Option<String>,
    pub custom_values: HashMap<String, String>,
    pub value_files: Vec<String>,
    pub args: Vec<String>,
    pub env_mapping: HashMap<String, EnvMapping>,
    pub grpc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskMedium {
    Unspecified,
    Disk,
    Ebs,
}

#[derive(Debug, Clone)]
pub struct ServiceDisk {
    pub name: String,
    pub medium: DiskMedium,
    pub size: String,
    pub access_mode: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Deployable {
    pub name: String,
    pub r#type: DeployableType,
    pub helm: Option<HelmConfig>,
    pub resource_requests_cpu: Option<String>,
    pub resource_requests_memory: Option<String>,
    pub resource_limits_cpu: Option<String>,
    pub resource_limits_memory: Option<String>,
    pub probes: Vec<Probe>,
    pub ports: Vec<u16>,
    /// names of other deployables this one depends on.
    pub deployment_depends_on: Vec<String>,
    pub service_disks_yaml: Option<Vec<ServiceDisk>>,
}
