use super::{object_name, Object, ObjectStore, StoreError};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    Client, ResourceExt,
};

/// An [`ObjectStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|error| classify::<K>(error, namespace, name))
    }

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = object_name(obj)?;
        self.api(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|error| classify::<K>(error, namespace, &name))
    }

    async fn update<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = object_name(obj)?;
        self.api(namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|error| classify::<K>(error, namespace, &name))
    }

    async fn update_status<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError> {
        let name = object_name(obj)?;
        let status = serde_json::to_value(obj)?
            .get_mut("status")
            .map(serde_json::Value::take)
            .unwrap_or_default();

        // The resource version makes the patch conditional on the object not
        // having changed since it was read.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        self.api(namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|error| classify::<K>(error, namespace, &name))
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|error| classify::<K>(error, namespace, name))
    }
}

fn classify<K: Object>(error: kube::Error, namespace: &str, name: &str) -> StoreError {
    match &error {
        kube::Error::Api(response) if response.code == 404 => {
            StoreError::not_found::<K>(namespace, name)
        }
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::already_exists::<K>(namespace, name)
        }
        kube::Error::Api(response) if response.code == 409 => {
            StoreError::conflict::<K>(namespace, name)
        }
        _ => StoreError::Kube(error),
    }
}
