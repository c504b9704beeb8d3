//! Node-graph connectivity and flattening engine.
//!
//! The engine models an editable node graph — nodes with typed slots,
//! single-consumer links, reroute waypoints — and the operations an editor
//! builds on: type-checked connection and disconnection, pass-through type
//! propagation, collapsing selections into reusable group definitions, and
//! flattening nested group instances into a flat list of executable
//! descriptors with path-scoped ids.
//!
//! Rendering, widget UI, transport, and persistence live elsewhere; this
//! crate owns the connectivity semantics.

pub mod error;
pub mod flatten;
pub mod graph;
pub mod groups;
pub mod link;
pub mod node;
pub mod registry;
pub mod reroute;
pub mod resolver;
pub mod slots;
pub mod types;
pub mod typing;
pub mod validation;

pub use error::{GraphError, Result};
pub use flatten::{flatten, ExecInput, ExecutableNode, FlattenedGraph, InputSource};
pub use graph::{Graph, InsertPoint};
pub use groups::{build_group, register_group, GroupDefinition, GroupNodeConfig};
pub use link::{FloatingSide, Link};
pub use node::{ConnectionSide, Node, NodeBehavior, NodeRole};
pub use registry::{InputDef, NodeDef, NodeDefPatch, NodeRegistry, OutputDef, WidgetSpec};
pub use reroute::Reroute;
pub use resolver::{RemoteTypeResolver, ResolutionScheduler};
pub use slots::{InputSlot, OutputSlot, Widget};
pub use types::{ExecutionId, LinkId, NodeId, RerouteId, SlotRef, SlotType};
pub use typing::is_valid_connection;
pub use validation::{is_consistent, validate_graph, ConsistencyIssue};
