//! Dependency-graph scheduler
//!
//! Tasks form a DAG keyed by name-derived ids. Registration rejects
//! duplicates and cycles; enqueueing pulls in the transitive predecessor
//! closure and releases a task to the worker pool once every predecessor
//! has completed. For any edge `u -> v`, `u` finishes before `v` starts.
//!
//! A failing task never starts its descendants: they transition straight to
//! failed and their futures expose the originating task.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::{SchedError, TaskError};
use crate::id::Id;
use crate::pool::{PoolHandle, WorkerPool};
use crate::task::{run_core, Exec, Task, TaskCore, TaskState};

struct NodeEntry {
    core: Arc<TaskCore>,
    /// Registered tasks that name this one as a predecessor.
    succs: Vec<Id>,
    /// Enqueued predecessors not yet done.
    pending: usize,
    enqueued: bool,
    /// The task whose failure made this one fail; its own name for a task
    /// that failed directly.
    failed_origin: Option<Arc<str>>,
}

struct Graph {
    nodes: HashMap<Id, NodeEntry, foldhash::fast::RandomState>,
}

impl Graph {
    /// Whether the freshly inserted `id` is reachable from its own
    /// predecessors.
    fn closes_cycle(&self, id: Id) -> bool {
        let mut stack: Vec<Id> = self.nodes[&id].core.deps.iter().map(|d| d.0).collect();
        let mut seen: HashSet<Id, foldhash::fast::RandomState> = HashSet::default();
        while let Some(next) = stack.pop() {
            if next == id {
                return true;
            }
            if !seen.insert(next) {
                continue;
            }
            if let Some(entry) = self.nodes.get(&next) {
                stack.extend(entry.core.deps.iter().map(|d| d.0));
            }
        }
        false
    }

    /// Marks `start` and its enqueued, non-terminal descendants failed,
    /// recording the originating task on each. Returns their cores paired
    /// with the failure to resolve them with.
    fn collect_failed(&mut self, start: Id, origin: &Arc<str>) -> Vec<(Arc<TaskCore>, TaskError)> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.nodes.get_mut(&id) else {
                continue;
            };
            if !entry.enqueued || entry.core.state().is_terminal() {
                continue;
            }
            entry.core.set_state(TaskState::Failed);
            entry.failed_origin = Some(origin.clone());
            out.push((
                entry.core.clone(),
                TaskError::DependencyFailed {
                    dep: origin.to_string(),
                },
            ));
            stack.extend(entry.succs.iter().copied());
        }
        out
    }
}

struct SchedShared {
    graph: Mutex<Graph>,
    pool: PoolHandle,
}

/// Scheduler running tasks over a worker pool in dependency order.
pub struct DepSched {
    shared: Arc<SchedShared>,
    _pool: WorkerPool,
}

impl DepSched {
    /// Creates a scheduler with `workers` worker threads (at least one).
    pub fn new(workers: usize) -> DepSched {
        let pool = WorkerPool::new(workers.max(1));
        DepSched {
            shared: Arc::new(SchedShared {
                graph: Mutex::new(Graph {
                    nodes: HashMap::default(),
                }),
                pool: pool.handle(),
            }),
            _pool: pool,
        }
    }

    /// Inserts a task into the graph.
    ///
    /// Registering the same task (same id, same predecessors) again is a
    /// no-op; a different task under an existing id, or a task that closes
    /// a cycle, is rejected.
    pub fn reg<T>(&self, task: &Task<T>) -> Result<(), SchedError> {
        let core = task.core();
        let mut graph = self.shared.graph.lock().unwrap();
        if let Some(existing) = graph.nodes.get(&core.id) {
            let same_deps = existing
                .core
                .deps
                .iter()
                .map(|d| d.0)
                .eq(core.deps.iter().map(|d| d.0));
            if same_deps {
                return Ok(());
            }
            return Err(SchedError::DuplicateTask {
                task: core.name.to_string(),
            });
        }

        graph.nodes.insert(
            core.id,
            NodeEntry {
                core: core.clone(),
                succs: Vec::new(),
                pending: 0,
                enqueued: false,
                failed_origin: None,
            },
        );
        if graph.closes_cycle(core.id) {
            graph.nodes.remove(&core.id);
            return Err(SchedError::Cycle {
                task: core.name.to_string(),
            });
        }

        for (dep, _) in core.deps.iter() {
            if let Some(entry) = graph.nodes.get_mut(dep) {
                entry.succs.push(core.id);
            }
        }
        // tasks registered earlier may already name this one
        let dependents: Vec<Id> = graph
            .nodes
            .values()
            .filter(|e| e.core.id != core.id && e.core.deps.iter().any(|d| d.0 == core.id))
            .map(|e| e.core.id)
            .collect();
        graph.nodes.get_mut(&core.id).unwrap().succs.extend(dependents);
        Ok(())
    }

    /// Enqueues a task together with its not-yet-enqueued predecessors.
    ///
    /// Predecessors must all be registered. Tasks whose predecessors are
    /// already done are handed to the worker pool immediately.
    pub fn enqueue<T>(&self, task: &Task<T>) -> Result<(), SchedError> {
        let (ready, to_fail) = {
            let mut graph = self.shared.graph.lock().unwrap();

            let mut stack = vec![task.id()];
            let mut seen: HashSet<Id, foldhash::fast::RandomState> = HashSet::default();
            let mut order = Vec::new();
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                let entry = graph.nodes.get(&id).ok_or_else(|| SchedError::UnknownTask {
                    task: task.name().to_string(),
                })?;
                if entry.enqueued {
                    continue;
                }
                order.push(id);
                for (dep, dep_name) in entry.core.deps.iter() {
                    if !graph.nodes.contains_key(dep) {
                        return Err(SchedError::UnknownDependency {
                            task: entry.core.name.to_string(),
                            dep: dep_name.to_string(),
                        });
                    }
                    stack.push(*dep);
                }
            }

            for id in &order {
                let entry = graph.nodes.get_mut(id).unwrap();
                entry.enqueued = true;
                entry.core.try_transition(TaskState::Registered, TaskState::Queued);
            }

            let mut ready = Vec::new();
            let mut fail_seeds: Vec<(Id, Arc<str>)> = Vec::new();
            for id in &order {
                let mut pending = 0;
                let mut failed_dep = None;
                for (dep, _) in graph.nodes[id].core.deps.iter() {
                    match graph.nodes[dep].core.state() {
                        TaskState::Done => {}
                        TaskState::Failed => {
                            // report the task that originally failed, not a
                            // relay that failed through propagation
                            let dep_entry = &graph.nodes[dep];
                            failed_dep = Some(
                                dep_entry
                                    .failed_origin
                                    .clone()
                                    .unwrap_or_else(|| dep_entry.core.name.clone()),
                            );
                        }
                        _ => pending += 1,
                    }
                }
                let entry = graph.nodes.get_mut(id).unwrap();
                entry.pending = pending;
                if let Some(dep) = failed_dep {
                    fail_seeds.push((*id, dep));
                } else if pending == 0 && entry.core.state() == TaskState::Queued {
                    entry.core.set_state(TaskState::Ready);
                    ready.push(entry.core.clone());
                }
            }

            let mut to_fail = Vec::new();
            for (id, dep) in fail_seeds {
                to_fail.extend(graph.collect_failed(id, &dep));
            }
            (ready, to_fail)
        };

        for core in ready {
            submit(&self.shared, core);
        }
        for (core, err) in to_fail {
            if let Some(exec) = core.take_exec() {
                let _ = exec(Exec::Fail(err));
            }
        }
        Ok(())
    }
}

fn submit(shared: &Arc<SchedShared>, core: Arc<TaskCore>) {
    let shared_owned = shared.clone();
    let job = Box::new(move || {
        // a failure propagation may have resolved the task in the meantime
        if !core.try_transition(TaskState::Ready, TaskState::Running) {
            return;
        }
        core.enter_running();
        let status = run_core(&core);
        core.exit_running();
        complete(&shared_owned, &core, status);
    });
    shared.pool.submit(job);
}

fn complete(shared: &Arc<SchedShared>, core: &Arc<TaskCore>, status: Result<(), TaskError>) {
    let mut ready = Vec::new();
    let mut to_fail = Vec::new();
    {
        let mut graph = shared.graph.lock().unwrap();
        let succs = graph
            .nodes
            .get(&core.id)
            .map(|e| e.succs.clone())
            .unwrap_or_default();
        match status {
            Ok(()) => {
                core.set_state(TaskState::Done);
                for succ in succs {
                    if let Some(entry) = graph.nodes.get_mut(&succ) {
                        if entry.enqueued && entry.core.state() == TaskState::Queued {
                            entry.pending = entry.pending.saturating_sub(1);
                            if entry.pending == 0 {
                                entry.core.set_state(TaskState::Ready);
                                ready.push(entry.core.clone());
                            }
                        }
                    }
                }
            }
            Err(_) => {
                core.set_state(TaskState::Failed);
                if let Some(entry) = graph.nodes.get_mut(&core.id) {
                    entry.failed_origin = Some(core.name.clone());
                }
                for succ in succs {
                    to_fail.extend(graph.collect_failed(succ, &core.name));
                }
            }
        }
    }
    for next in ready {
        submit(shared, next);
    }
    for (failed, err) in to_fail {
        if let Some(exec) = failed.take_exec() {
            let _ = exec(Exec::Fail(err));
        }
    }
}
