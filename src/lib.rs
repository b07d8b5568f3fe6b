//! Approval-process execution engine.
//!
//! A deployed definition is a graph of approval nodes. The [`Engine`] starts
//! instances of it, creates tasks and candidate rows for the active nodes,
//! resolves ALL/ANY quorums and parallel merges, and moves each instance on
//! inside one store transaction per call.

pub mod config;
pub mod dsl;
pub mod error;
pub mod runtime;

pub use config::EngineConfig;
pub use error::{FlowError, FlowResult};
pub use runtime::blueprint::{Candidate, Gateway, Graph, GraphNode, Successor};
pub use runtime::definition::{Definition, NewDefinition};
pub use runtime::engine::{ActionOutcome, ActionRequest, AdvanceRequest, Direction, Engine, StartRequest};
pub use runtime::storage::{InMemoryStore, Store, Transaction};
