//! Plinth: declarative resource graphs for static-website infrastructure.
//!
//! Resources are nodes in a dependency graph, grouped into stacks that pass
//! identifiers to each other through exports. A planner walks the graph in
//! dependency order, concurrently where branches are independent, and hands
//! each node to a provisioning backend. BLAKE3 state hashing. Provenance tracing.

pub mod backend;
pub mod cli;
pub mod core;
pub mod resources;
pub mod tripwire;
