//! Thin capability wrapper over `kube::Client`, exposing namespaced
//! read/create/patch/delete for the handful of object kinds this domain
//! touches. Modeled on the teacher's `QubeClient`, trimmed from the full
//! multi-cloud object surface down to Namespace/ServiceAccount/Role/
//! RoleBinding/Job/Pod/Deployment/Ingress/Secret.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Api, Client, Config, Error as KubeError};
use std::ops::Deref;
use std::path::Path;

#[derive(Clone)]
pub struct QubeClient {
    client: Client,
}

impl Deref for QubeClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl AsRef<Client> for QubeClient {
    fn as_ref(&self) -> &Client {
        &self.client
    }
}

pub enum SelectBy {
    All,
    Name(String),
    LabelsSelector(String),
}

/// `rustls` with the `aws-lc-rs` backend needs a process-level
/// `CryptoProvider` installed before the first TLS connection; idempotent.
fn install_crypto_provider() {
    static INSTALLED: std::sync::Once = std::sync::Once::new();
    INSTALLED.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

impl QubeClient {
    pub async fn new_from_kubeconfig(kubeconfig_path: &Path) -> anyhow::Result<QubeClient> {
        install_crypto_provider();
        let kubeconfig = kube::config::Kubeconfig::read_from(kubeconfig_path)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        let client = Client::try_from(config)?;
        Ok(QubeClient { client })
    }

    pub async fn new_in_cluster() -> anyhow::Result<QubeClient> {
        install_crypto_provider();
        let client = Client::try_default().await?;
        Ok(QubeClient { client })
    }

    pub fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    pub fn service_accounts(&self, namespace: &str) -> Api<ServiceAccount> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn roles(&self, namespace: &str) -> Api<Role> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn role_bindings(&self, namespace: &str) -> Api<RoleBinding> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// `create`, falling through to `patch` on a 409 (spec.md §7 RemoteAPIError
/// typed-response policy), used by the RBAC provisioner.
pub async fn create_or_patch<K>(api: &Api<K>, name: &str, field_manager: &str, object: &K) -> Result<K, KubeError>
where
    K: kube::Resource + Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    match api.create(&PostParams::default(), object).await {
        Ok(created) => Ok(created),
        Err(KubeError::Api(err)) if err.code == 409 => {
            let patch_params = PatchParams::apply(field_manager).force();
            api.patch(name, &patch_params, &Patch::Apply(object)).await
        }
        Err(err) => Err(err),
    }
}

/// Returns an empty list for a 404 instead of propagating it, the way the
/// teacher's `get_secrets`-style accessors treat "not found" as absence.
pub async fn list_by_selector<K>(api: &Api<K>, select_by: &SelectBy) -> Result<Vec<K>, KubeError>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    match select_by {
        SelectBy::All => Ok(api.list(&ListParams::default()).await?.items),
        SelectBy::LabelsSelector(selector) => Ok(api.list(&ListParams::default().labels(selector)).await?.items),
        SelectBy::Name(name) => match api.get(name).await {
            Ok(obj) => Ok(vec![obj]),
            Err(KubeError::Api(err)) if err.code == 404 => Ok(vec![]),
            Err(err) => Err(err),
        },
    }
}

pub async fn delete_by_name<K>(api: &Api<K>, name: &str, grace_period_seconds: Option<i64>) -> Result<(), KubeError>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let mut delete_params = DeleteParams::default();
    delete_params.grace_period_seconds = grace_period_seconds;
    match api.delete(name, &delete_params).await {
        Ok(_) => Ok(()),
        Err(KubeError::Api(err)) if err.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}
