//! Dependency graph (DAG) construction and traversal
//!
//! Nodes move from pending to ready once every requisite has completed,
//! then to completed when the caller says so. All state lives behind one
//! mutex, so `complete_node` from many workers never races with
//! `get_ready_nodes`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::node::{DagNode, Node, ReadyNode};

/// DAG errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagError {
    #[error("Unknown DAG node: {0}")]
    UnknownNode(String),

    #[error("Node {node} does not require {requisite}")]
    UnsatisfiedRequisite { node: String, requisite: String },

    #[error("Duplicate DAG node: {0}")]
    DuplicateNode(String),

    #[error("Dependency cycle between: {}", keys.join(", "))]
    CycleDetected { keys: Vec<String> },
}

#[derive(Debug)]
struct DagState<T> {
    nodes: HashMap<String, Node<T>>,
    completed: HashSet<String>,
}

/// Dependency graph over entities of type `T`
#[derive(Debug)]
pub struct Dag<T> {
    id: String,
    state: Mutex<DagState<T>>,
}

impl<T: DagNode> Dag<T> {
    /// Build a DAG from entities.
    ///
    /// Requisites outside the node set, or listed in `external_completed`,
    /// start out satisfied. Fails on duplicate keys and on cycles.
    pub fn build(
        id: impl Into<String>,
        entities: impl IntoIterator<Item = T>,
        external_completed: &HashSet<String>,
    ) -> Result<Self, DagError> {
        let mut nodes: HashMap<String, Node<T>> = HashMap::new();

        for entity in entities {
            let key = entity.dag_key();
            let requisites = entity.dag_dependencies();
            if nodes.contains_key(&key) {
                return Err(DagError::DuplicateNode(key));
            }
            nodes.insert(key.clone(), Node::new(key, entity, requisites));
        }

        // Reverse edges
        let mut edges: Vec<(String, String)> = Vec::new();
        for node in nodes.values() {
            for requisite in &node.requisites {
                if nodes.contains_key(requisite) {
                    edges.push((requisite.clone(), node.key.clone()));
                }
            }
        }
        for (requisite, dependent) in edges {
            if let Some(node) = nodes.get_mut(&requisite) {
                node.dependents.insert(dependent);
            }
        }

        // External requisites are satisfied up front
        let keys: HashSet<String> = nodes.keys().cloned().collect();
        for node in nodes.values_mut() {
            let satisfied: Vec<String> = node
                .requisites
                .iter()
                .filter(|r| !keys.contains(*r) || external_completed.contains(*r))
                .cloned()
                .collect();
            node.completed_requisites.extend(satisfied);
        }

        let dag = Self {
            id: id.into(),
            state: Mutex::new(DagState {
                nodes,
                completed: HashSet::new(),
            }),
        };

        dag.check_acyclic()?;
        tracing::debug!(dag = %dag.id, nodes = dag.len(), "Built DAG");
        Ok(dag)
    }
}

impl<T> Dag<T> {
    fn lock(&self) -> MutexGuard<'_, DagState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().nodes.contains_key(key)
    }

    /// Every ready node that has not been completed yet
    pub fn get_ready_nodes(&self) -> Vec<ReadyNode<T>> {
        let state = self.lock();
        state
            .nodes
            .values()
            .filter(|node| node.is_ready() && !state.completed.contains(&node.key))
            .map(Node::to_ready)
            .collect()
    }

    /// Mark `key` completed and return dependents that just became ready.
    ///
    /// Completing an already completed node is a no-op.
    pub fn complete_node(&self, key: &str) -> Result<Vec<ReadyNode<T>>, DagError> {
        let mut state = self.lock();
        let dependents = match state.nodes.get(key) {
            Some(node) => node.dependents.clone(),
            None => return Err(DagError::UnknownNode(key.to_string())),
        };
        if !state.completed.insert(key.to_string()) {
            return Ok(Vec::new());
        }

        let DagState { nodes, completed } = &mut *state;
        let mut newly_ready = Vec::new();
        for dependent_key in &dependents {
            let dependent = nodes
                .get_mut(dependent_key)
                .ok_or_else(|| DagError::UnknownNode(dependent_key.clone()))?;
            if !dependent.requisites.contains(key) {
                return Err(DagError::UnsatisfiedRequisite {
                    node: dependent_key.clone(),
                    requisite: key.to_string(),
                });
            }
            let was_ready = dependent.is_ready();
            dependent.completed_requisites.insert(key.to_string());
            if !was_ready && dependent.is_ready() && !completed.contains(dependent_key) {
                newly_ready.push(dependent.to_ready());
            }
        }

        tracing::debug!(dag = %self.id, node = key, ready = newly_ready.len(), "Completed DAG node");
        Ok(newly_ready)
    }

    /// Keys not yet completed
    pub fn pending_keys(&self) -> Vec<String> {
        let state = self.lock();
        let mut pending: Vec<String> = state
            .nodes
            .keys()
            .filter(|key| !state.completed.contains(*key))
            .cloned()
            .collect();
        pending.sort();
        pending
    }

    pub fn completed_keys(&self) -> HashSet<String> {
        self.lock().completed.clone()
    }

    /// Every node has been completed
    pub fn is_finished(&self) -> bool {
        let state = self.lock();
        state.completed.len() == state.nodes.len()
    }

    /// All nodes that transitively wait on `key`
    pub fn downstream(&self, key: &str) -> Vec<String> {
        let state = self.lock();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::new();

        if let Some(node) = state.nodes.get(key) {
            queue.extend(node.dependents.iter().cloned());
        }

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());

            if let Some(node) = state.nodes.get(&current) {
                for child in &node.dependents {
                    if !visited.contains(child) {
                        queue.push_back(child.clone());
                    }
                }
            }
        }

        result
    }

    /// Topological order of all keys, or `None` if the graph has a cycle
    pub fn topological_sort(&self) -> Option<Vec<String>> {
        self.kahn().ok()
    }

    fn check_acyclic(&self) -> Result<(), DagError> {
        self.kahn().map(|_| ())
    }

    /// Kahn's algorithm over in-DAG requisites
    fn kahn(&self) -> Result<Vec<String>, DagError> {
        let state = self.lock();
        let mut in_degree: HashMap<&str, usize> = state
            .nodes
            .values()
            .map(|node| {
                let internal = node
                    .requisites
                    .iter()
                    .filter(|r| state.nodes.contains_key(*r))
                    .count();
                (node.key.as_str(), internal)
            })
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(key, _)| *key)
            .collect();
        let mut order = Vec::with_capacity(state.nodes.len());

        while let Some(key) = queue.pop_front() {
            order.push(key.to_string());
            if let Some(node) = state.nodes.get(key) {
                for child in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(child.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(child.as_str());
                        }
                    }
                }
            }
        }

        if order.len() == state.nodes.len() {
            Ok(order)
        } else {
            let ordered: HashSet<&String> = order.iter().collect();
            let mut keys: Vec<String> = state
                .nodes
                .keys()
                .filter(|key| !ordered.contains(key))
                .cloned()
                .collect();
            keys.sort();
            Err(DagError::CycleDetected { keys })
        }
    }
}
