//! In-memory registry.

use std::collections::BTreeSet;

use async_trait::async_trait;
use hashbrown::HashMap;
use loanshell_net::Response;
use tokio::sync::RwLock;

use super::{GenerationHandle, Registry};
use crate::error::WorkerResult;
use crate::key::RequestKey;

type Generation = HashMap<RequestKey, Response>;

/// Registry held entirely in memory. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    generations: RwLock<HashMap<String, Generation>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn open(&self, name: &str) -> WorkerResult<GenerationHandle> {
        self.generations
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(GenerationHandle::new(name))
    }

    async fn contains(&self, name: &str) -> WorkerResult<bool> {
        Ok(self.generations.read().await.contains_key(name))
    }

    async fn get(
        &self,
        handle: &GenerationHandle,
        key: &RequestKey,
    ) -> WorkerResult<Option<Response>> {
        let generations = self.generations.read().await;
        Ok(generations
            .get(handle.name())
            .and_then(|generation| generation.get(key))
            .cloned())
    }

    async fn put(
        &self,
        handle: &GenerationHandle,
        key: RequestKey,
        response: Response,
    ) -> WorkerResult<()> {
        self.generations
            .write()
            .await
            .entry(handle.name().to_string())
            .or_default()
            .insert(key, response);
        Ok(())
    }

    async fn keys(&self, handle: &GenerationHandle) -> WorkerResult<Vec<RequestKey>> {
        let generations = self.generations.read().await;
        let mut keys: Vec<RequestKey> = generations
            .get(handle.name())
            .map(|generation| generation.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn delete_generation(&self, name: &str) -> WorkerResult<bool> {
        Ok(self.generations.write().await.remove(name).is_some())
    }

    async fn list_generation_names(&self) -> WorkerResult<BTreeSet<String>> {
        Ok(self.generations.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use url::Url;

    fn entry(path: &str, body: &str) -> (RequestKey, Response) {
        let url = Url::parse("http://localhost:3000/").unwrap().join(path).unwrap();
        (
            RequestKey::url_only(&url),
            Response::new(url, StatusCode::OK, body.to_string()),
        )
    }

    #[tokio::test]
    async fn test_open_creates_generation() {
        let registry = MemoryRegistry::new();
        assert!(!registry.contains("v1").await.unwrap());

        registry.open("v1").await.unwrap();
        assert!(registry.contains("v1").await.unwrap());
        assert_eq!(
            registry.list_generation_names().await.unwrap(),
            BTreeSet::from(["v1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let registry = MemoryRegistry::new();
        let handle = registry.open("data").await.unwrap();

        let (key, first) = entry("/api/loans", "old");
        registry.put(&handle, key.clone(), first).await.unwrap();
        let (_, second) = entry("/api/loans", "new");
        registry.put(&handle, key.clone(), second).await.unwrap();

        let stored = registry.get(&handle, &key).await.unwrap().unwrap();
        assert_eq!(stored.text(), "new");
        assert_eq!(registry.keys(&handle).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_leaves_other_generations() {
        let registry = MemoryRegistry::new();
        let old = registry.open("v1").await.unwrap();
        let new = registry.open("v2").await.unwrap();

        let (key, response) = entry("/", "A");
        registry.put(&old, key.clone(), response.clone()).await.unwrap();
        registry.put(&new, key.clone(), response).await.unwrap();

        assert!(registry.delete_generation("v1").await.unwrap());
        assert!(!registry.delete_generation("v1").await.unwrap());
        assert!(registry.get(&old, &key).await.unwrap().is_none());
        assert!(registry.get(&new, &key).await.unwrap().is_some());
    }
}
