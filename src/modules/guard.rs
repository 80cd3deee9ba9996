use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use super::{option_key, VERB};
use crate::config::Configuration;
use crate::error::ModuleError;
use crate::module::{
    InitStatus, Module, ModuleCategory, ModuleCore, ModuleDescriptor, PipelinePhase, Query,
};

/// Handler running ahead of the others that drops unwanted queries.
///
/// Options: `blocked` (list of verbs), `maxLength` (payload bytes, 0 for no
/// limit).
pub struct GuardModule {
    core: ModuleCore,
    blocked: Arc<HashSet<String>>,
    max_length: usize,
    rejected: u64,
}

impl GuardModule {
    pub const NAME: &'static str = "guard";

    pub fn new() -> Self {
        Self {
            core: ModuleCore::new(
                ModuleDescriptor::new(Self::NAME, ModuleCategory::Handler).with_priority(5.0),
            ),
            blocked: Arc::new(HashSet::new()),
            max_length: 0,
            rejected: 0,
        }
    }

    pub fn is_blocked(&self, verb: &str) -> bool {
        self.blocked.contains(&verb.to_lowercase())
    }

    /// Queries this instance rejected on its connection.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    fn reject(&mut self, reason: String) -> Option<Query> {
        self.rejected += 1;
        self.logger().warn(&reason);
        None
    }
}

impl Default for GuardModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for GuardModule {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn init(&mut self, config: Option<&dyn Configuration>) -> InitStatus {
        let Some(config) = config else {
            return InitStatus::SUCCESS;
        };

        let blocked = config
            .get_str_list(&option_key(Self::NAME, "blocked"))
            .into_iter()
            .map(|verb| verb.to_lowercase())
            .collect::<HashSet<_>>();
        self.blocked = Arc::new(blocked);

        if let Some(max) = config.get_u64(&option_key(Self::NAME, "maxLength")) {
            self.max_length = max as usize;
        }
        InitStatus::SUCCESS
    }

    async fn process(&mut self, _phase: PipelinePhase, query: Query) -> Option<Query> {
        if self.max_length > 0 && query.payload().len() > self.max_length {
            return self.reject(format!(
                "Rejected query of {} bytes (limit {})",
                query.payload().len(),
                self.max_length
            ));
        }

        if let Some(verb) = query.attribute(VERB) {
            if self.is_blocked(verb) {
                let reason = format!("Rejected blocked command '{verb}'");
                return self.reject(reason);
            }
        }

        Some(query)
    }

    fn clone_module(&self) -> Result<Box<dyn Module>, ModuleError> {
        Ok(Box::new(Self {
            core: self.core.fork(),
            blocked: self.blocked.clone(),
            max_length: self.max_length,
            rejected: 0,
        }))
    }
}
