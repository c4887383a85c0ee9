use crate::core::Graph;
use crate::domain::{GraphId, KeyValueStore, Permissions};
use crate::utils::error::{FlowError, Result};
use std::sync::Arc;

pub const OWNER_FIELD: &str = "owner";
pub const SERIALIZED_GRAPH_FIELD: &str = "serialized_graph";

pub fn graph_key(graph_id: &str) -> String {
    format!("graph:{}", graph_id)
}

pub fn user_graphs_key(username: &str) -> String {
    format!("user:{}:graphs", username)
}

pub fn permissions_key(graph_id: &str) -> String {
    format!("graph:{}:permissions", graph_id)
}

fn missing_graph(graph_id: &str) -> FlowError {
    FlowError::not_found(format!("Graph with id {} does not exist", graph_id))
}

/// 圖的儲存、擁有者與分享權限
///
/// Layout:
/// - `graph:{id}` hash with `owner` and `serialized_graph`
/// - `user:{name}:graphs` set of graph ids
/// - `graph:{id}:permissions` hash of username to permission bits
#[derive(Clone)]
pub struct GraphManager {
    store: Arc<dyn KeyValueStore>,
}

impl GraphManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn say_hello(&self, name: &str) -> String {
        format!("Hello {}", name)
    }

    async fn ensure_exists(&self, graph_id: &str) -> Result<String> {
        let key = graph_key(graph_id);
        if !self.store.exists(&key).await? {
            return Err(missing_graph(graph_id));
        }
        Ok(key)
    }

    pub async fn create_graph(&self, username: &str) -> Result<GraphId> {
        let graph_id = GraphId::new_random();
        let key = graph_key(graph_id.as_str());

        self.store
            .sadd(&user_graphs_key(username), graph_id.as_str())
            .await?;
        self.store.hset(&key, OWNER_FIELD, username).await?;
        self.store
            .hset(
                &permissions_key(graph_id.as_str()),
                username,
                &Permissions::owner().to_string(),
            )
            .await?;

        let empty = Graph::with_id(graph_id.clone(), "untitled");
        self.store
            .hset(&key, SERIALIZED_GRAPH_FIELD, &empty.to_json()?)
            .await?;

        tracing::info!(graph_id = %graph_id, user = username, "🆕 Created graph");
        Ok(graph_id)
    }

    pub async fn get_serialized_graph(&self, graph_id: &str) -> Result<String> {
        let key = self.ensure_exists(graph_id).await?;
        self.store
            .hget(&key, SERIALIZED_GRAPH_FIELD)
            .await?
            .ok_or_else(|| {
                FlowError::not_found(format!(
                    "Graph with id {} does not have a serialized graph",
                    graph_id
                ))
            })
    }

    pub async fn load_graph(&self, graph_id: &str) -> Result<Graph> {
        Graph::from_json(&self.get_serialized_graph(graph_id).await?)
    }

    pub async fn store_serialized_graph(&self, graph_id: &str, serialized: &str) -> Result<()> {
        let key = self.ensure_exists(graph_id).await?;
        Graph::from_json(serialized)?;
        self.store.hset(&key, SERIALIZED_GRAPH_FIELD, serialized).await?;
        tracing::info!(graph_id, bytes = serialized.len(), "💾 Stored updates to graph");
        Ok(())
    }

    pub async fn store_graph(&self, graph_id: &str, graph: &Graph) -> Result<()> {
        self.store_serialized_graph(graph_id, &graph.to_json()?).await
    }

    pub async fn delete_graph(&self, graph_id: &str) -> Result<()> {
        let key = self.ensure_exists(graph_id).await?;
        if let Some(owner) = self.store.hget(&key, OWNER_FIELD).await? {
            self.store.srem(&user_graphs_key(&owner), graph_id).await?;
        }
        self.store.del(&key).await?;
        self.store.del(&permissions_key(graph_id)).await?;
        tracing::info!(graph_id, "🗑️ Deleted graph");
        Ok(())
    }

    pub async fn list_graphs(&self, username: &str) -> Result<Vec<GraphId>> {
        let key = user_graphs_key(username);
        if !self.store.exists(&key).await? {
            return Err(FlowError::not_found(format!(
                "User with username {} does not exist",
                username
            )));
        }
        let mut ids = self.store.smembers(&key).await?;
        ids.sort();
        Ok(ids.into_iter().map(GraphId::new).collect())
    }

    pub async fn share_graph(
        &self,
        graph_id: &str,
        target_user: &str,
        permissions: Permissions,
    ) -> Result<()> {
        self.ensure_exists(graph_id).await?;
        self.store
            .hset(&permissions_key(graph_id), target_user, &permissions.to_string())
            .await?;
        tracing::info!(graph_id, target_user, permissions = permissions.bits(), "🤝 Shared graph");
        Ok(())
    }

    pub async fn permissions_of(&self, graph_id: &str, user: &str) -> Result<Option<Permissions>> {
        self.store
            .hget(&permissions_key(graph_id), user)
            .await?
            .map(|bits| bits.parse())
            .transpose()
    }

    pub async fn owner_of(&self, graph_id: &str) -> Result<Option<String>> {
        self.store.hget(&graph_key(graph_id), OWNER_FIELD).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;

    fn manager() -> GraphManager {
        GraphManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_graph_sets_owner_and_permissions() {
        let manager = manager();
        let id = manager.create_graph("user1").await.unwrap();
        assert_eq!(id.as_str().len(), 32);

        assert_eq!(manager.owner_of(id.as_str()).await.unwrap().as_deref(), Some("user1"));
        assert_eq!(
            manager.permissions_of(id.as_str(), "user1").await.unwrap(),
            Some(Permissions::owner())
        );
        assert_eq!(manager.permissions_of(id.as_str(), "user2").await.unwrap(), None);

        let stored = manager.load_graph(id.as_str()).await.unwrap();
        assert_eq!(stored.id(), &id);
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_missing_graph_messages() {
        let manager = manager();
        let err = manager.get_serialized_graph("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Graph with id nope does not exist");
        assert!(matches!(
            manager.store_serialized_graph("nope", "{}").await,
            Err(FlowError::NotFound { .. })
        ));
        assert!(matches!(manager.delete_graph("nope").await, Err(FlowError::NotFound { .. })));
        assert!(matches!(
            manager.share_graph("nope", "user2", Permissions::owner()).await,
            Err(FlowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_graph_without_serialized_field() {
        let manager = manager();
        manager.store().hset(&graph_key("bare"), OWNER_FIELD, "user1").await.unwrap();
        let err = manager.get_serialized_graph("bare").await.unwrap_err();
        assert_eq!(err.to_string(), "Graph with id bare does not have a serialized graph");
    }

    #[tokio::test]
    async fn test_store_rejects_malformed_graph() {
        let manager = manager();
        let id = manager.create_graph("user1").await.unwrap();
        assert!(manager.store_serialized_graph(id.as_str(), "not json").await.is_err());

        let mut graph = Graph::with_id(id.clone(), "edited");
        graph.add_named_block(Some("A")).unwrap();
        manager.store_graph(id.as_str(), &graph).await.unwrap();
        assert_eq!(manager.load_graph(id.as_str()).await.unwrap().block_names(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let manager = manager();
        assert!(matches!(manager.list_graphs("user1").await, Err(FlowError::NotFound { .. })));

        let first = manager.create_graph("user1").await.unwrap();
        let second = manager.create_graph("user1").await.unwrap();
        let mut expected = vec![first.clone(), second.clone()];
        expected.sort();
        assert_eq!(manager.list_graphs("user1").await.unwrap(), expected);

        manager.delete_graph(first.as_str()).await.unwrap();
        assert_eq!(manager.list_graphs("user1").await.unwrap(), vec![second.clone()]);
        assert_eq!(manager.permissions_of(first.as_str(), "user1").await.unwrap(), None);

        manager.delete_graph(second.as_str()).await.unwrap();
        assert!(manager.list_graphs("user1").await.is_err());
    }

    #[tokio::test]
    async fn test_share_graph() {
        let manager = manager();
        let id = manager.create_graph("user1").await.unwrap();
        manager
            .share_graph(id.as_str(), "user2", Permissions::from_flag_list(&[true, false, true]).unwrap())
            .await
            .unwrap();
        let granted = manager.permissions_of(id.as_str(), "user2").await.unwrap().unwrap();
        assert_eq!(granted.bits(), 5);
        assert_eq!(manager.say_hello("gateway"), "Hello gateway");
    }
}
