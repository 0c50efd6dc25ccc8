//! Error taxonomy for the perception core.
//!
//! Every variant except [`PerceptionError::Config`] reports a bookkeeping
//! invariant that was violated upstream. The core logs these where they are
//! detected and leaves its state untouched; nothing here is retried.

use crate::quadtree::NodeId;
use crate::types::Oid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerceptionError {
    #[error("element {0} is not indexed")]
    NotIndexed(Oid),

    #[error("element {0} is already indexed")]
    AlreadyIndexed(Oid),

    #[error("{perceiver} is not subscribed to node {node}")]
    SubscriptionMissing { perceiver: String, node: NodeId },

    #[error("{perceiver} is already subscribed to node {node}")]
    SubscriptionExists { perceiver: String, node: NodeId },

    #[error("perceiver {0} is not registered with the tree")]
    PerceiverNotRegistered(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, PerceptionError>;
