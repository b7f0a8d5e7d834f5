//! Resolved global configuration consumed from the (out-of-scope) YAML
//! ingestion layer. Modeled as serde structs the way `qovery-engine`'s
//! `io_models` carries its deserialized inputs.

use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelmDefaults {
    #[serde(default)]
    pub default_args: Vec<String>,
    pub default_helm_version: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChartOverride {
    #[serde(default)]
    pub values: HashMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<String>,
    #[serde(default)]
    pub node_selector: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LabelSets {
    #[serde(default)]
    pub deploy: HashMap<String, String>,
    #[serde(default)]
    pub disabled: HashMap<String, String>,
    #[serde(default)]
    pub status_comments: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    pub ingress_class: String,
    pub default_uuid: String,
    pub http_domain: String,
    pub grpc_domain: String,
    pub ecr_registry: String,
    pub default_capacity_type: String,
    pub helm_defaults: HelmDefaults,
    #[serde(default)]
    pub chart_overrides: HashMap<String, ChartOverride>,
    pub service_account_name: String,
    pub service_account_iam_role_arn: Option<String>,
    pub org_chart_name: String,
    #[serde(default)]
    pub public_chart_block_list: Vec<String>,
    #[serde(default)]
    pub labels: LabelSets,
    /// repository alias -> helm repo URL, used to `helm repo add` non-OCI public charts.
    #[serde(default)]
    pub chart_repositories: HashMap<String, String>,
    /// unbounded when absent, per spec.md Open Question 3 (see DESIGN.md).
    pub max_parallel_deploy: Option<usize>,
}

impl GlobalConfig {
    pub fn chart_override(&self, chart_name: &str) -> ChartOverride {
        self.chart_overrides.get(chart_name).cloned().unwrap_or_default()
    }

    pub fn is_public_chart_blocked(&self, chart_name: &str) -> bool {
        self.public_chart_block_list.iter().any(|blocked| blocked == chart_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_override_defaults_when_absent() {
        let cfg = GlobalConfig {
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
            public_chart_block_list: vec!["blocked-chart".into()],
            labels: LabelSets::default(),
            chart_repositories: HashMap::new(),
            max_parallel_deploy: None,
        };

        assert!(cfg.chart_override("unknown").values.is_empty());
        assert!(cfg.is_public_chart_blocked("blocked-chart"));
        assert!(!cfg.is_public_chart_blocked("other-chart"));
    }
}
