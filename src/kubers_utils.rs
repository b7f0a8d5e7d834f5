//! Generic delete/list-by-label-selector helpers shared by ReleaseReconciler
//! (force-deleting superseded jobs/pods) and JobMonitor (listing the job's pod).

use kube::api::{DeleteParams, ListParams, ObjectList};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

pub enum KubeDeleteMode {
    Normal,
    ForceImmediate,
}

pub async fn kube_delete_all_from_selector<K>(
    client: &kube::Client,
    selector: &str,
    namespace: &str,
    delete_mode: KubeDeleteMode,
) -> Result<(), kube::Error>
where
    K: Clone + DeserializeOwned + Debug + Resource,
    <K as Resource>::DynamicType: Default,
{
    let obj_name = K::kind(&K::DynamicType::default()).to_string();
    info!("deleting k8s {} from selector {}", obj_name, selector);

    let list_params = ListParams::default().labels(selector);
    let delete_params = match delete_mode {
        KubeDeleteMode::Normal => DeleteParams::background(),
        KubeDeleteMode::ForceImmediate => DeleteParams {
            grace_period_seconds: Some(0),
            ..DeleteParams::background()
        },
    };

    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let ret = api.delete_collection(&delete_params, &list_params).await?;

    info!("deletion of k8s {} matching {} returned {:?}", obj_name, selector, ret);

    Ok(())
}

pub async fn kube_get_resources_by_selector<K>(client: &kube::Client, namespace: &str, selector: &str) -> Result<ObjectList<K>, kube::Error>
where
    K: Clone + DeserializeOwned + Debug + Resource,
    <K as Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(selector);
    api.list(&params).await
}
