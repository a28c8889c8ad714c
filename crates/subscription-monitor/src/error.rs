use bridge_core::GraphError;
use link_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("the monitor is already running")]
    AlreadyRunning,

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Graph accepted the subscription but it could not be saved locally.
    /// The remote subscription has been deleted again, best effort.
    #[error("unable to persist subscription {subscription_id}: {source}")]
    Persist {
        subscription_id: String,
        #[source]
        source: StoreError,
    },
}

pub type Result<T> = std::result::Result<T, MonitorError>;
