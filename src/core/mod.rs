//! Core logic: types, parsing, graph, stacks, resolution, planning, execution.

pub mod error;
pub mod executor;
pub mod graph;
pub mod outputs;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod stack;
pub mod state;
pub mod types;
