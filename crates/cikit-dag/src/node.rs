//! DAG nodes

use std::collections::HashSet;
use std::sync::Arc;

/// Anything that can be scheduled through a [`crate::Dag`]
pub trait DagNode {
    /// Unique key of this node
    fn dag_key(&self) -> String;

    /// Keys this node must wait for
    fn dag_dependencies(&self) -> HashSet<String>;
}

/// One entity plus its scheduling state
#[derive(Debug)]
pub struct Node<T> {
    pub(crate) key: String,
    pub(crate) entity: Arc<T>,

    /// Keys this node waits on
    pub(crate) requisites: HashSet<String>,

    /// Keys waiting on this node
    pub(crate) dependents: HashSet<String>,

    /// Requisites already satisfied
    pub(crate) completed_requisites: HashSet<String>,
}

impl<T> Node<T> {
    pub(crate) fn new(key: String, entity: T, requisites: HashSet<String>) -> Self {
        Self {
            key,
            entity: Arc::new(entity),
            requisites,
            dependents: HashSet::new(),
            completed_requisites: HashSet::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entity(&self) -> &Arc<T> {
        &self.entity
    }

    pub fn requisites(&self) -> &HashSet<String> {
        &self.requisites
    }

    pub fn dependents(&self) -> &HashSet<String> {
        &self.dependents
    }

    pub fn completed_requisites(&self) -> &HashSet<String> {
        &self.completed_requisites
    }

    /// All requisites are satisfied
    pub fn is_ready(&self) -> bool {
        self.completed_requisites == self.requisites
    }

    pub(crate) fn to_ready(&self) -> ReadyNode<T> {
        ReadyNode {
            key: self.key.clone(),
            entity: Arc::clone(&self.entity),
        }
    }
}

/// A node handed out for processing
#[derive(Debug)]
pub struct ReadyNode<T> {
    pub key: String,
    pub entity: Arc<T>,
}

impl<T> Clone for ReadyNode<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            entity: Arc::clone(&self.entity),
        }
    }
}
