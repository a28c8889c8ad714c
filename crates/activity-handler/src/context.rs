//! Capabilities shared by the validation gate and the workers.

use std::future::Future;
use std::sync::Arc;

use bridge_core::{
    ContentKeyResolver, GraphClient, GraphError, GraphResult, Metrics, PlatformSdk,
    UserClientFactory,
};
use link_store::Store;
use tracing::{debug, info, warn};

use crate::config::HandlerConfig;
use crate::last_activity::LastActivity;

/// The capability records the handler is built from.
#[derive(Clone)]
pub struct Capabilities {
    pub store: Store,
    /// Graph client acting as the application.
    pub graph: Arc<dyn GraphClient>,
    /// Builds Graph clients acting as a connected user.
    pub user_clients: Arc<dyn UserClientFactory>,
    pub platform: Arc<dyn PlatformSdk>,
    pub metrics: Arc<dyn Metrics>,
    /// Needed only when subscriptions ask for inline resource data.
    pub content_keys: Option<Arc<dyn ContentKeyResolver>>,
}

pub(crate) struct Context {
    pub(crate) store: Store,
    pub(crate) graph: Arc<dyn GraphClient>,
    pub(crate) user_clients: Arc<dyn UserClientFactory>,
    pub(crate) sdk: Arc<dyn PlatformSdk>,
    pub(crate) metrics: Arc<dyn Metrics>,
    pub(crate) content_keys: Option<Arc<dyn ContentKeyResolver>>,
    pub(crate) config: HandlerConfig,
    pub(crate) last_activity: LastActivity,
}

impl Context {
    pub(crate) fn new(caps: Capabilities, config: HandlerConfig) -> Self {
        Self {
            store: caps.store,
            graph: caps.graph,
            user_clients: caps.user_clients,
            sdk: caps.platform,
            metrics: caps.metrics,
            content_keys: caps.content_keys,
            config,
            last_activity: LastActivity::new(),
        }
    }

    pub(crate) fn bot_user_id(&self) -> &str {
        &self.config.bot_user_id
    }

    /// Await a Graph call, giving up after the configured timeout.
    pub(crate) async fn bounded<T>(&self, call: impl Future<Output = GraphResult<T>>) -> GraphResult<T> {
        match tokio::time::timeout(self.config.graph_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GraphError::Transient(format!(
                "graph call timed out after {:?}",
                self.config.graph_timeout
            ))),
        }
    }

    /// A client acting as the given Teams user, if that user is connected.
    pub(crate) async fn client_for_teams_user(
        &self,
        ms_teams_user_id: &str,
    ) -> Option<Arc<dyn GraphClient>> {
        match self.store.get_token_for_ms_teams_user(ms_teams_user_id).await {
            Ok(Some(token)) => Some(self.user_clients.client_for_token(&token)),
            Ok(None) => None,
            Err(err) => {
                debug!(teams_user_id = %ms_teams_user_id, error = %err, "Unable to load user token");
                None
            }
        }
    }

    /// A client acting as the given host user, if that user is connected.
    pub(crate) async fn client_for_mattermost_user(
        &self,
        mattermost_user_id: &str,
    ) -> Option<Arc<dyn GraphClient>> {
        match self.store.get_token_for_mattermost_user(mattermost_user_id).await {
            Ok(Some(token)) => Some(self.user_clients.client_for_token(&token)),
            Ok(None) => None,
            Err(err) => {
                debug!(user_id = %mattermost_user_id, error = %err, "Unable to load user token");
                None
            }
        }
    }

    /// React to a failed user-delegated call. A rejected token is cleared,
    /// which records the disconnection.
    pub(crate) async fn on_user_client_error(&self, ms_teams_user_id: &str, err: &GraphError) {
        if !err.is_unauthorized() {
            return;
        }

        let mattermost_user_id = match self.store.teams_to_mattermost_user_id(ms_teams_user_id).await {
            Ok(id) => id,
            Err(err) => {
                debug!(teams_user_id = %ms_teams_user_id, error = %err, "No linked user for rejected token");
                return;
            }
        };

        match self
            .store
            .set_user_info(&mattermost_user_id, ms_teams_user_id, None)
            .await
        {
            Ok(()) => info!(
                user_id = %mattermost_user_id,
                teams_user_id = %ms_teams_user_id,
                "Token rejected by Graph, user disconnected"
            ),
            Err(err) => warn!(
                user_id = %mattermost_user_id,
                error = %err,
                "Unable to clear rejected token"
            ),
        }
    }
}
