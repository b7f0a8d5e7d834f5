//! Ensures the ServiceAccount/Role/RoleBinding used by a deploy job exist
//! with the correct permission profile (spec.md §4.7).

use crate::errors::EngineError;
use crate::events::EventDetails;
use crate::services::kube_client::{create_or_patch, QubeClient};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::api::ObjectMeta;
use kube::Api;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const FIELD_MANAGER: &str = "lifecycle-deploy-core";
const DEFAULT_SA_WAIT: Duration = Duration::from_secs(120);
const DEFAULT_SA_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionProfile {
    Build,
    Deploy,
    Full,
}

impl PermissionProfile {
    fn rules(self) -> Vec<PolicyRule> {
        match self {
            PermissionProfile::Build => vec![
                PolicyRule {
                    api_groups: Some(vec!["batch".to_string()]),
                    resources: Some(vec!["jobs".to_string()]),
                    verbs: vec!["get", "list", "watch", "create", "update", "patch", "delete"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    ..Default::default()
                },
                PolicyRule {
                    api_groups: Some(vec!["".to_string()]),
                    resources: Some(vec!["pods".to_string(), "pods/log".to_string()]),
                    verbs: vec!["get", "list", "watch"].into_iter().map(String::from).collect(),
                    ..Default::default()
                },
            ],
            PermissionProfile::Deploy | PermissionProfile::Full => vec![PolicyRule {
                api_groups: Some(vec!["*".to_string()]),
                resources: Some(vec!["*".to_string()]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            }],
        }
    }
}

pub struct RbacProvisioner<'a> {
    client: &'a QubeClient,
}

impl<'a> RbacProvisioner<'a> {
    pub fn new(client: &'a QubeClient) -> Self {
        RbacProvisioner { client }
    }

    pub async fn ensure(
        &self,
        namespace: &str,
        service_account_name: &str,
        iam_role_arn: Option<&str>,
        profile: PermissionProfile,
        is_default_account: bool,
        event_details: &EventDetails,
    ) -> Result<(), Box<EngineError>> {
        if is_default_account {
            self.wait_for_default_account(namespace, event_details).await?;
        }

        self.ensure_service_account(namespace, service_account_name, iam_role_arn, event_details)
            .await?;
        self.ensure_role(namespace, service_account_name, profile, event_details).await?;
        self.ensure_role_binding(namespace, service_account_name, event_details).await?;

        Ok(())
    }

    async fn wait_for_default_account(&self, namespace: &str, event_details: &EventDetails) -> Result<(), Box<EngineError>> {
        let api: Api<ServiceAccount> = self.client.service_accounts(namespace);
        let deadline = Instant::now() + DEFAULT_SA_WAIT;
        loop {
            if api.get("default").await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(EngineError::new_timeout(
                    event_details.clone(),
                    "timed out waiting for the default service account to be created".to_string(),
                ));
            }
            tokio::time::sleep(DEFAULT_SA_POLL_INTERVAL).await;
        }
    }

    async fn ensure_service_account(
        &self,
        namespace: &str,
        name: &str,
        iam_role_arn: Option<&str>,
        event_details: &EventDetails,
    ) -> Result<(), Box<EngineError>> {
        let mut annotations = BTreeMap::new();
        if let Some(arn) = iam_role_arn {
            annotations.insert("eks.amazonaws.com/role-arn".to_string(), arn.to_string());
        }

        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };

        let api = self.client.service_accounts(namespace);
        create_or_patch(&api, name, FIELD_MANAGER, &sa)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), format!("cannot ensure service account {name}: {e}"), None))
    }

    async fn ensure_role(
        &self,
        namespace: &str,
        service_account_name: &str,
        profile: PermissionProfile,
        event_details: &EventDetails,
    ) -> Result<(), Box<EngineError>> {
        let role_name = format!("{service_account_name}-role");
        let role = Role {
            metadata: ObjectMeta {
                name: Some(role_name.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            rules: Some(profile.rules()),
        };

        let api = self.client.roles(namespace);
        create_or_patch(&api, &role_name, FIELD_MANAGER, &role)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::new_remote_api_error(event_details.clone(), format!("cannot ensure role {role_name}: {e}"), None))
    }

    /// Creates the binding idempotently: a 409 on create is treated as success
    /// (spec.md §4.7), since RoleBindings are immutable once created.
    async fn ensure_role_binding(&self, namespace: &str, service_account_name: &str, event_details: &EventDetails) -> Result<(), Box<EngineError>> {
        let role_name = format!("{service_account_name}-role");
        let binding_name = format!("{service_account_name}-binding");

        let binding = RoleBinding {
            metadata: ObjectMeta {
                name: Some(binding_name.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: role_name,
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: service_account_name.to_string(),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
        };

        let api = self.client.role_bindings(namespace);
        match api.create(&kube::api::PostParams::default(), &binding).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 409 => Ok(()),
            Err(err) => Err(EngineError::new_remote_api_error(
                event_details.clone(),
                format!("cannot ensure role binding {binding_name}: {err}"),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Stage;
    use crate::runtime::block_on;
    use std::path::PathBuf;

    fn kubeconfig_path() -> PathBuf {
        PathBuf::from(std::env::var("KUBECONFIG").unwrap_or_else(|_| "/tmp/kubeconfig.yaml".to_string()))
    }

    #[test]
    #[cfg(feature = "test-local-kube")]
    fn ensures_service_account_role_and_binding_against_a_real_cluster() {
        let client = block_on(QubeClient::new_from_kubeconfig(&kubeconfig_path())).unwrap();
        let provisioner = RbacProvisioner::new(&client);
        let event_details = EventDetails::new(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), "rbac-test", Stage::Rbac);

        let result = block_on(provisioner.ensure("default", "lifecycle-test-sa", None, PermissionProfile::Deploy, false, &event_details));
        assert!(result.is_ok());
    }
}
