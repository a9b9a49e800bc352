//! Many workers draining one DAG

use cikit_dag::{Dag, DagNode, ReadyNode};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

struct Step {
    key: String,
    deps: HashSet<String>,
}

impl DagNode for Step {
    fn dag_key(&self) -> String {
        self.key.clone()
    }

    fn dag_dependencies(&self) -> HashSet<String> {
        self.deps.clone()
    }
}

/// Layered graph: every node in layer n depends on every node in layer n-1
fn layered(layers: usize, width: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    for layer in 0..layers {
        for i in 0..width {
            let deps = if layer == 0 {
                HashSet::new()
            } else {
                (0..width).map(|j| format!("L{}-{}", layer - 1, j)).collect()
            };
            steps.push(Step {
                key: format!("L{layer}-{i}"),
                deps,
            });
        }
    }
    steps
}

#[test]
fn every_node_completes_exactly_once_in_dependency_order() {
    let dag = Arc::new(Dag::build("layers", layered(5, 6), &HashSet::new()).unwrap());
    let finished_at: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let clock = Arc::new(Mutex::new(0usize));

    let (tx, rx) = mpsc::channel::<ReadyNode<Step>>();
    let rx = Arc::new(Mutex::new(rx));
    let initial = dag.get_ready_nodes();
    assert_eq!(initial.len(), 6);
    for node in initial {
        tx.send(node).unwrap();
    }

    let in_flight = Arc::new(Mutex::new(6usize));
    let mut workers = Vec::new();
    for _ in 0..4 {
        let dag = Arc::clone(&dag);
        let rx = Arc::clone(&rx);
        let tx = tx.clone();
        let finished_at = Arc::clone(&finished_at);
        let clock = Arc::clone(&clock);
        let in_flight = Arc::clone(&in_flight);
        workers.push(thread::spawn(move || loop {
            if *in_flight.lock().unwrap() == 0 {
                break;
            }
            let next = rx.lock().unwrap().try_recv();
            let Ok(node) = next else {
                thread::yield_now();
                continue;
            };

            {
                let finished = finished_at.lock().unwrap();
                for dep in &node.entity.deps {
                    assert!(finished.contains_key(dep), "{} ran before {}", node.key, dep);
                }
            }
            {
                let mut tick = clock.lock().unwrap();
                *tick += 1;
                let previous = finished_at.lock().unwrap().insert(node.key.clone(), *tick);
                assert!(previous.is_none(), "{} completed twice", node.key);
            }

            let ready = dag.complete_node(&node.key).unwrap();
            let mut count = in_flight.lock().unwrap();
            *count += ready.len();
            for ready in ready {
                tx.send(ready).unwrap();
            }
            *count -= 1;
        }));
    }
    drop(tx);

    for worker in workers {
        worker.join().unwrap();
    }

    assert!(dag.is_finished());
    assert_eq!(finished_at.lock().unwrap().len(), 30);
}

#[test]
fn sequential_topological_completion_empties_pending() {
    let dag = Dag::build("layers", layered(3, 3), &HashSet::new()).unwrap();
    let order = dag.topological_sort().unwrap();
    assert_eq!(order.len(), 9);

    for key in &order {
        dag.complete_node(key).unwrap();
    }
    assert!(dag.pending_keys().is_empty());
    assert_eq!(dag.completed_keys().len(), 9);
}
