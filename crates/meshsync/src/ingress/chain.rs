//! Ordered chain of handler steps applied to each object change.

use std::sync::{Arc, RwLock};

use super::queue::{TaskError, TaskFn};
use crate::model::Event;

/// Steps run in order; the first failing step ends the chain and its error is returned.
pub struct ChainHandler<T> {
    steps: RwLock<Vec<TaskFn<T>>>,
}

impl<T> ChainHandler<T> {
    pub fn new() -> Self {
        Self {
            steps: RwLock::new(Vec::new()),
        }
    }

    /// Adds a step at the end of the chain.
    pub fn append(&self, step: TaskFn<T>) {
        let mut steps = match self.steps.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        steps.push(step);
    }

    /// Runs every step against the object.
    pub fn apply(&self, object: &T, event: Event) -> Result<(), TaskError> {
        let steps: Vec<TaskFn<T>> = match self.steps.read() {
            Ok(guard) => guard.iter().map(Arc::clone).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(Arc::clone).collect(),
        };
        for step in steps {
            step(object, event)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        match self.steps.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ChainHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}
