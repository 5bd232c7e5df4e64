//! Application modules
//!
//! A module wraps a task for the application driver. The module named
//! `"root"` is the entry point; every other module is expected to be a
//! transitive dependency of it.

use crate::error::TaskError;
use crate::id::Id;
use crate::task::{Task, TaskContext};

/// A named unit of application work with declared dependencies.
pub struct Module {
    task: Task<()>,
}

impl Module {
    /// Creates a module named `name` that starts once every module in
    /// `deps` has completed.
    pub fn new<F>(name: &str, deps: &[&str], body: F) -> Module
    where
        F: FnOnce(&TaskContext) -> Result<(), TaskError> + Send + 'static,
    {
        Module {
            task: Task::new(name, deps, body),
        }
    }

    /// The module's name.
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// The module's identity.
    pub fn id(&self) -> Id {
        self.task.id()
    }

    /// The module's underlying task.
    pub fn task(&self) -> &Task<()> {
        &self.task
    }
}

/// Ordered collection of an application's modules, keyed by id.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Module>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> ModuleRegistry {
        ModuleRegistry::default()
    }

    /// Adds a module. Replaces a previous module of the same id.
    pub fn register(&mut self, module: Module) {
        self.modules.retain(|m| m.id() != module.id());
        self.modules.push(module);
    }

    /// Looks a module up by name.
    pub fn get(&self, name: &str) -> Option<&Module> {
        let id = Id::of(name);
        self.modules.iter().find(|m| m.id() == id)
    }

    /// Iterates modules in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no modules are registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
