// Tool Registry
//
// Decision: One registry instance per runtime, shared as `Arc<ToolRegistry>`
// Decision: The lock guards only map mutation and snapshot copies; descriptors are
// handed out as `Arc`s so no lock is held while a tool runs
// Decision: Listings follow registration order

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::descriptor::ToolDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),
}

/// Thread-safe name-keyed store of tool descriptors.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<Tools>,
}

#[derive(Debug, Default)]
struct Tools {
    by_name: HashMap<String, Arc<ToolDescriptor>>,
    /// Registration order
    ordered: Vec<Arc<ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&self, descriptor: ToolDescriptor) -> Result<Arc<ToolDescriptor>, RegistryError> {
        let descriptor = Arc::new(descriptor);
        let mut tools = self.tools.write();
        if tools.by_name.contains_key(descriptor.name()) {
            return Err(RegistryError::DuplicateTool(descriptor.name().to_string()));
        }
        tools
            .by_name
            .insert(descriptor.name().to_string(), Arc::clone(&descriptor));
        tools.ordered.push(Arc::clone(&descriptor));
        drop(tools);

        debug!(
            tool_name = %descriptor.name(),
            blocking = descriptor.handler().is_blocking(),
            injections = descriptor.injections().len(),
            "Registered tool"
        );
        Ok(descriptor)
    }

    /// Register several tools, stopping at the first conflict
    pub fn register_all(
        &self,
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Result<(), RegistryError> {
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.tools.read().by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().by_name.contains_key(name)
    }

    /// Snapshot of all tools, in registration order
    pub fn list_all(&self) -> Vec<Arc<ToolDescriptor>> {
        self.tools.read().ordered.clone()
    }

    /// Tool names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .ordered
            .iter()
            .map(|tool| tool.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().ordered.is_empty()
    }

    /// Remove every tool
    pub fn clear(&self) {
        let mut tools = self.tools.write();
        tools.by_name.clear();
        tools.ordered.clear();
    }
}
