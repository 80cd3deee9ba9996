//! Named module constructors
//!
//! Each concrete module type registers a constructor under its name. The
//! configuration then decides which modules are instantiated and in which
//! order they are handed to the execution process.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::Module;
use crate::error::ModuleError;

pub type ModuleConstructor = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ModuleFactoryRegistry {
    constructors: BTreeMap<String, ModuleConstructor>,
}

impl ModuleFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, constructor: F) -> Result<(), ModuleError>
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(ModuleError::InvalidName(name.to_string()));
        }
        if self.constructors.contains_key(name) {
            return Err(ModuleError::DuplicateName(name.to_string()));
        }
        self.constructors
            .insert(name.to_string(), Arc::new(constructor));
        Ok(())
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Module>, ModuleError> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| ModuleError::UnknownModule(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}
