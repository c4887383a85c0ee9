use crate::app::services::graph_manager::GraphManager;
use crate::config::AuthConfig;
use crate::domain::Action;
use crate::utils::error::{FlowError, Result};
use std::collections::HashMap;

fn authorization_error(message: impl Into<String>) -> FlowError {
    FlowError::AuthorizationError {
        message: message.into(),
    }
}

/// Token authentication plus permission checks against the graph store.
#[derive(Clone)]
pub struct AuthService {
    tokens: HashMap<String, String>,
    graphs: GraphManager,
}

impl AuthService {
    pub fn new(config: &AuthConfig, graphs: GraphManager) -> Self {
        let tokens = config
            .users
            .iter()
            .map(|user| (user.token.clone(), user.username.clone()))
            .collect();
        Self { tokens, graphs }
    }

    /// Username for `token`, if it is known.
    pub fn authenticate(&self, token: &str) -> Option<String> {
        let user = self.tokens.get(token).cloned();
        if user.is_none() {
            tracing::debug!("authentication failed for presented token");
        }
        user
    }

    /// `Ok(false)` means the user is known but lacks the permission; an error
    /// means the request could not be checked at all.
    pub async fn authorize(&self, user: &str, action: Action, graph_id: Option<&str>) -> Result<bool> {
        if !action.needs_graph() {
            return Ok(true);
        }
        let graph_id =
            graph_id.ok_or_else(|| authorization_error(format!("'{}' requires a graph_id", action)))?;

        if action == Action::Share {
            let owner = self
                .graphs
                .owner_of(graph_id)
                .await?
                .ok_or_else(|| authorization_error(format!("graph {} has no owner", graph_id)))?;
            return Ok(owner == user);
        }

        let Some(permissions) = self.graphs.permissions_of(graph_id, user).await? else {
            return Ok(false);
        };
        let allowed = match action {
            Action::View => permissions.can_view(),
            Action::Edit | Action::Delete => permissions.can_edit(),
            Action::Run => permissions.can_run(),
            Action::Create | Action::List | Action::Share => true,
        };
        tracing::debug!(user, action = %action, graph_id, allowed, "authorization checked");
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::Permissions;
    use std::sync::Arc;

    fn service() -> (AuthService, GraphManager) {
        let graphs = GraphManager::new(Arc::new(MemoryStore::new()));
        (AuthService::new(&AuthConfig::default(), graphs.clone()), graphs)
    }

    #[test]
    fn test_authenticate_default_users() {
        let (auth, _) = service();
        assert_eq!(auth.authenticate("user1_token").as_deref(), Some("user1"));
        assert_eq!(auth.authenticate("user2_token").as_deref(), Some("user2"));
        assert_eq!(auth.authenticate("bogus"), None);
    }

    #[tokio::test]
    async fn test_create_and_list_need_no_graph() {
        let (auth, _) = service();
        assert!(auth.authorize("user1", Action::Create, None).await.unwrap());
        assert!(auth.authorize("user1", Action::List, None).await.unwrap());
        assert!(matches!(
            auth.authorize("user1", Action::View, None).await,
            Err(FlowError::AuthorizationError { .. })
        ));
    }

    #[tokio::test]
    async fn test_permission_bits() {
        let (auth, graphs) = service();
        let id = graphs.create_graph("user1").await.unwrap();
        let id = id.as_str();

        for action in [Action::View, Action::Edit, Action::Delete, Action::Run] {
            assert!(auth.authorize("user1", action, Some(id)).await.unwrap());
            assert!(!auth.authorize("user2", action, Some(id)).await.unwrap());
        }

        graphs
            .share_graph(id, "user2", Permissions::from_flag_list(&[true]).unwrap())
            .await
            .unwrap();
        assert!(auth.authorize("user2", Action::View, Some(id)).await.unwrap());
        assert!(!auth.authorize("user2", Action::Edit, Some(id)).await.unwrap());
        assert!(!auth.authorize("user2", Action::Run, Some(id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_share_is_owner_only() {
        let (auth, graphs) = service();
        let id = graphs.create_graph("user1").await.unwrap();
        graphs.share_graph(id.as_str(), "user2", Permissions::owner()).await.unwrap();

        assert!(auth.authorize("user1", Action::Share, Some(id.as_str())).await.unwrap());
        assert!(!auth.authorize("user2", Action::Share, Some(id.as_str())).await.unwrap());
        assert!(matches!(
            auth.authorize("user1", Action::Share, Some("unknown")).await,
            Err(FlowError::AuthorizationError { .. })
        ));
    }
}
