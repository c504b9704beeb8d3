//! Error types for the graph engine

use thiserror::Error;

/// Result type alias using GraphError
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur in the graph engine
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node ID was not found in the graph
    #[error("Node {0} is not attached to this graph")]
    NodeNotFound(u64),

    /// A slot reference did not resolve on a node
    #[error("Node {node} has no {side} slot '{slot}'")]
    SlotNotFound {
        node: u64,
        side: &'static str,
        slot: String,
    },

    /// A link ID was not found in the registry
    #[error("Link {0} does not exist")]
    LinkNotFound(u64),

    /// A reroute ID was not found in the graph
    #[error("Reroute {0} does not exist")]
    RerouteNotFound(u64),

    /// A group definition referenced itself, directly or through nesting
    #[error("Group node '{0}' contains itself; flattening aborted")]
    RecursiveGroup(String),

    /// A circular reference was hit while resolving flattened inputs
    #[error("Circular reference resolving {0}")]
    CircularResolution(String),

    /// A node type was not found in the registry
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// A group definition was not found in the store
    #[error("Unknown group definition: {0}")]
    UnknownGroup(String),

    /// The remote type-resolution service failed
    #[error("Type resolution failed: {0}")]
    Resolution(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Create a resolution error with a message
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }
}
