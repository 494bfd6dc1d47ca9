//! Name-keyed lookup of the workflows and activities a worker hosts

use std::collections::HashMap;
use std::sync::Arc;

use crate::activity::Activity;
use crate::client::{WorkerError, WorkerRegistration};
use crate::workflow::WorkflowDefinition;

/// Workflows and activities hosted on one task queue
pub(crate) struct QueueRegistry {
    workflows: HashMap<String, Arc<dyn WorkflowDefinition>>,
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl QueueRegistry {
    /// Index a registration; names must be unique within each kind
    pub fn from_registration(registration: &WorkerRegistration) -> Result<Self, WorkerError> {
        let mut workflows = HashMap::new();
        for workflow in &registration.workflows {
            let name = workflow.name().to_string();
            if workflows.insert(name.clone(), Arc::clone(workflow)).is_some() {
                return Err(WorkerError::DuplicateRegistration(name));
            }
        }

        let mut activities = HashMap::new();
        for activity in &registration.activities {
            let name = activity.name().to_string();
            if activities.insert(name.clone(), Arc::clone(activity)).is_some() {
                return Err(WorkerError::DuplicateRegistration(name));
            }
        }

        Ok(Self {
            workflows,
            activities,
        })
    }

    pub fn workflow(&self, name: &str) -> Option<Arc<dyn WorkflowDefinition>> {
        self.workflows.get(name).cloned()
    }

    pub fn activity(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }
}
