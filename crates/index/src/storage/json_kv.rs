use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::{KV_KIND, KvStore, StorageError, namespace, read_json_file, write_json_file};

/// Id to value map saved as `kvdb_<name>.json`.
pub struct JsonKvStore<V> {
    namespace: String,
    path: PathBuf,
    data: RwLock<BTreeMap<String, V>>,
}

impl<V> JsonKvStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub async fn open(work_dir: &Path, name: &str) -> Result<Self, StorageError> {
        let namespace = namespace(KV_KIND, name);
        let path = work_dir.join(format!("{}.json", namespace));
        let data = read_json_file(&path, &namespace).await?.unwrap_or_default();

        Ok(Self {
            namespace,
            path,
            data: RwLock::new(data),
        })
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }
}

#[async_trait]
impl<V> KvStore<V> for JsonKvStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, id: &str) -> Result<Option<V>, StorageError> {
        Ok(self.data.read().await.get(id).cloned())
    }

    async fn filter_keys(&self, ids: &[String]) -> Result<HashSet<String>, StorageError> {
        let data = self.data.read().await;
        Ok(ids.iter().filter(|id| !data.contains_key(*id)).cloned().collect())
    }

    async fn upsert(&self, items: Vec<(String, V)>) -> Result<(), StorageError> {
        self.data.write().await.extend(items);
        Ok(())
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let data = self.data.read().await;
        write_json_file(&self.path, &self.namespace, &*data).await
    }
}
