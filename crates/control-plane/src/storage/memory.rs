// In-memory inventory for local runs and tests

use async_trait::async_trait;
use calsync_core::{FleetInstance, RegisterInstance};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{InstanceStore, InventoryError};

/// Inventory keyed by identity prefix
#[derive(Default)]
pub struct InMemoryInstanceStore {
    instances: RwLock<BTreeMap<String, FleetInstance>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn register(&self, request: RegisterInstance) -> Result<FleetInstance, InventoryError> {
        let mut instances = self.instances.write();
        if instances.contains_key(&request.identity_prefix) {
            return Err(InventoryError::PrefixTaken(request.identity_prefix));
        }
        let instance = request.into_instance();
        instances.insert(instance.identity_prefix.clone(), instance.clone());
        Ok(instance)
    }

    async fn deregister(&self, prefix: &str) -> Result<FleetInstance, InventoryError> {
        self.instances
            .write()
            .remove(prefix)
            .ok_or_else(|| InventoryError::NotFound(prefix.to_string()))
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<Option<FleetInstance>, InventoryError> {
        Ok(self.instances.read().get(prefix).cloned())
    }

    async fn list(&self) -> Result<Vec<FleetInstance>, InventoryError> {
        Ok(self.instances.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prefix: &str) -> RegisterInstance {
        RegisterInstance {
            name: format!("instance {prefix}"),
            routing_url: format!("http://{prefix}:9100"),
            identity_prefix: prefix.to_string(),
            shared_secret: "s3cret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_prefix_is_unique() {
        let store = InMemoryInstanceStore::new();
        store.register(request("eu-1")).await.unwrap();

        let err = store.register(request("eu-1")).await.unwrap_err();
        assert_eq!(err, InventoryError::PrefixTaken("eu-1".into()));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_prefix() {
        let store = InMemoryInstanceStore::new();
        store.register(request("us-1")).await.unwrap();
        store.register(request("eu-1")).await.unwrap();

        let prefixes: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.identity_prefix)
            .collect();
        assert_eq!(prefixes, vec!["eu-1", "us-1"]);
    }

    #[tokio::test]
    async fn test_deregister() {
        let store = InMemoryInstanceStore::new();
        store.register(request("eu-1")).await.unwrap();

        let removed = store.deregister("eu-1").await.unwrap();
        assert_eq!(removed.identity_prefix, "eu-1");
        assert!(store.get_by_prefix("eu-1").await.unwrap().is_none());
        assert_eq!(
            store.deregister("eu-1").await.unwrap_err(),
            InventoryError::NotFound("eu-1".into())
        );
    }
}
