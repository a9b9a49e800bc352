//! Dependency DAG for ordered, concurrent processing
//!
//! This crate handles:
//! - Building a graph of requisites and dependents from any node type
//! - Rejecting duplicate keys and dependency cycles up front
//! - Handing out nodes as their requisites complete, safely across threads
//! - Downstream (blast radius) queries for failed nodes

pub mod dag;
pub mod node;

pub use dag::{Dag, DagError};
pub use node::{DagNode, Node, ReadyNode};
