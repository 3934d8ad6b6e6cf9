use std::collections::HashMap;

use aiwork_core::error::{AiworkError, Result};

use crate::task::Task;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// A named DAG of tasks.
///
/// Tasks keep their registration order, which breaks ties in
/// [`Flow::topological_order`] so the order is deterministic.
#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    tasks: Vec<Task>,
    /// task name -> index into `tasks`
    index: HashMap<String, usize>,
    /// task name -> names it depends on, in the order given
    dependencies: HashMap<String, Vec<String>>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            index: HashMap::new(),
            dependencies: HashMap::new(),
        }
    }

    /// Register a task with the names of the tasks it depends on.
    ///
    /// Dependencies are not resolved here, so tasks can be added in any
    /// order; unknown names surface from [`Flow::topological_order`].
    pub fn add_task(&mut self, task: Task, depends_on: &[&str]) -> Result<()> {
        if self.index.contains_key(&task.name) {
            return Err(AiworkError::DuplicateTask(task.name));
        }

        let mut deps: Vec<String> = Vec::with_capacity(depends_on.len());
        for dep in depends_on {
            if !deps.iter().any(|d| d == dep) {
                deps.push(dep.to_string());
            }
        }

        self.index.insert(task.name.clone(), self.tasks.len());
        self.dependencies.insert(task.name.clone(), deps);
        self.tasks.push(task);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Task> {
        match self.index.get(name) {
            Some(&i) => self.tasks.get_mut(i),
            None => None,
        }
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    /// Declared dependencies of a task (empty for unknown names).
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.dependencies
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Consume the flow, yielding its tasks in registration order.
    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    /// Check that every dependency resolves and the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        self.topological_order().map(|_| ())
    }

    /// Order tasks so every task comes after all of its dependencies.
    ///
    /// Depth-first over the dependency relation with three-colour marking;
    /// reaching a task that is still in progress is a cycle. Roots are taken
    /// in registration order and dependencies in declaration order, so a fixed
    /// insertion sequence always yields the same order.
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.tasks.len());
        let mut order: Vec<&Task> = Vec::with_capacity(self.tasks.len());

        for root in &self.tasks {
            if marks.contains_key(root.name.as_str()) {
                continue;
            }

            // (task name, index of the next dependency to visit)
            let mut stack: Vec<(&str, usize)> = vec![(root.name.as_str(), 0)];
            marks.insert(root.name.as_str(), Mark::InProgress);

            while let Some(&(name, next)) = stack.last() {
                match self.dependencies(name).get(next) {
                    Some(dep) => {
                        if let Some(top) = stack.last_mut() {
                            top.1 += 1;
                        }
                        let dep = dep.as_str();
                        match marks.get(dep) {
                            Some(Mark::Done) => {}
                            Some(Mark::InProgress) => {
                                return Err(AiworkError::CycleDetected(dep.to_string()));
                            }
                            None => {
                                if !self.index.contains_key(dep) {
                                    return Err(AiworkError::UnknownDependency {
                                        task: name.to_string(),
                                        dependency: dep.to_string(),
                                    });
                                }
                                marks.insert(dep, Mark::InProgress);
                                stack.push((dep, 0));
                            }
                        }
                    }
                    None => {
                        stack.pop();
                        marks.insert(name, Mark::Done);
                        order.push(&self.tasks[self.index[name]]);
                    }
                }
            }
        }

        Ok(order)
    }
}
