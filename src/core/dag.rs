//! Task DAG (Directed Acyclic Graph) for dependency management.
//!
//! Nodes are tasks in declaration order, edges point from a
//! prerequisite to the task that depends on it. The DAG refuses
//! edges that would close a cycle and produces a stable execution
//! order for the crew.

use crate::core::output::TaskSummary;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// The task dependency graph.
pub struct TaskDAG {
    /// The underlying directed graph.
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskDAG {
    /// Create a new empty TaskDAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Build a DAG from tasks in declaration order, wiring each
    /// task's declared dependencies.
    ///
    /// # Errors
    /// - `Error::UnknownTask` if a dependency names a task not in `tasks`
    /// - `Error::CycleDetected` if the dependencies form a cycle
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self> {
        let mut dag = Self::new();
        for task in tasks {
            dag.add_task(task);
        }
        dag.rewire()?;
        Ok(dag)
    }

    /// Rebuild every edge from the tasks' declared dependencies.
    ///
    /// # Errors
    /// - `Error::UnknownTask` if a dependency names a task not in the DAG
    /// - `Error::CycleDetected` if the dependencies form a cycle
    pub fn rewire(&mut self) -> Result<()> {
        self.graph.clear_edges();
        let edges: Vec<(TaskId, String, Vec<TaskId>)> = self
            .graph
            .node_weights()
            .map(|t| (t.id, t.name.clone(), t.dependencies.clone()))
            .collect();

        for (id, name, dependencies) in edges {
            for dependency in dependencies {
                if !self.contains_task(&dependency) {
                    return Err(Error::UnknownTask {
                        task: name,
                        dependency,
                    });
                }
                self.add_dependency(&dependency, &id)?;
            }
        }

        Ok(())
    }

    /// Add a task to the DAG.
    ///
    /// Returns the NodeIndex for the added task.
    /// If the task already exists (same TaskId), returns the existing NodeIndex.
    pub fn add_task(&mut self, task: Task) -> NodeIndex {
        if let Some(&index) = self.task_index.get(&task.id) {
            return index;
        }

        let id = task.id;
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        index
    }

    /// Add a dependency: `from` must be done before `to` starts.
    ///
    /// # Errors
    /// - `Error::Validation` if either task is not in the DAG
    /// - `Error::CycleDetected` if the edge would create a cycle
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        let from_index = self
            .task_index
            .get(from)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in DAG", from)))?;

        let to_index = self
            .task_index
            .get(to)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in DAG", to)))?;

        if self.graph.find_edge(*from_index, *to_index).is_some() {
            return Ok(());
        }

        // Temporarily add the edge to check for cycles
        let edge = self.graph.add_edge(*from_index, *to_index, ());

        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            let task = self
                .graph
                .node_weight(*to_index)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| to.to_string());
            return Err(Error::CycleDetected { task });
        }

        Ok(())
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph.node_weight_mut(index)
        } else {
            None
        }
    }

    /// Like `get_task_mut`, but a missing task is an error.
    pub fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        self.get_task_mut(id)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in DAG", id)))
    }

    /// Get the number of tasks in the DAG.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the DAG.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if a dependency exists between two tasks.
    pub fn has_dependency(&self, from: &TaskId, to: &TaskId) -> bool {
        if let (Some(&from_idx), Some(&to_idx)) =
            (self.task_index.get(from), self.task_index.get(to))
        {
            self.graph.find_edge(from_idx, to_idx).is_some()
        } else {
            false
        }
    }

    /// Get all tasks that the given task depends on (predecessors).
    pub fn get_dependencies(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Get all tasks that depend on the given task (successors).
    pub fn get_dependents(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<&Task> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        found.sort();
        found
            .into_iter()
            .filter_map(|n| self.graph.node_weight(n))
            .collect()
    }

    /// All tasks in declaration order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.graph.node_weights().collect()
    }

    /// Check if the DAG is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Check if the DAG contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Return every task to pending.
    pub fn reset_all(&mut self) {
        for task in self.graph.node_weights_mut() {
            task.reset();
        }
    }

    /// Final state of every task in declaration order.
    pub fn summaries(&self) -> Vec<TaskSummary> {
        self.graph
            .node_weights()
            .map(|t| TaskSummary {
                id: t.id,
                name: t.name.clone(),
                status: t.status.clone(),
            })
            .collect()
    }

    /// Task IDs in execution order.
    ///
    /// Each task comes after all of its dependencies; among tasks whose
    /// dependencies are satisfied, the one declared first runs first.
    ///
    /// # Errors
    /// `Error::CycleDetected` if the graph contains a cycle.
    pub fn execution_order(&self) -> Result<Vec<TaskId>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(self.graph[index].id);
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < self.graph.node_count() {
            let task = self
                .graph
                .node_indices()
                .find(|n| in_degree[n.index()] > 0)
                .map(|n| self.graph[n].name.clone())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(Error::CycleDetected { task });
        }

        Ok(order)
    }
}

impl Default for TaskDAG {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskDAG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDAG")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
