use async_trait::async_trait;

use super::{option_key, ARGS, VERB};
use crate::config::Configuration;
use crate::error::ModuleError;
use crate::module::{
    InitStatus, Module, ModuleCategory, ModuleCore, ModuleDescriptor, PipelinePhase, Query,
};

/// Splits a line into a verb and its arguments.
///
/// Option: `lowercase` (default true) folds the verb to lower case.
pub struct CommandParserModule {
    core: ModuleCore,
    lowercase: bool,
}

impl CommandParserModule {
    pub const NAME: &'static str = "command_parser";

    pub fn new() -> Self {
        Self {
            core: ModuleCore::new(
                ModuleDescriptor::new(Self::NAME, ModuleCategory::Parser).with_priority(10.0),
            ),
            lowercase: true,
        }
    }
}

impl Default for CommandParserModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for CommandParserModule {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn init(&mut self, config: Option<&dyn Configuration>) -> InitStatus {
        if let Some(lowercase) =
            config.and_then(|c| c.get_bool(&option_key(Self::NAME, "lowercase")))
        {
            self.lowercase = lowercase;
        }
        InitStatus::SUCCESS
    }

    async fn process(&mut self, _phase: PipelinePhase, query: Query) -> Option<Query> {
        let text = query.text();
        let mut words = text.split_whitespace();
        let verb = words.next()?;
        let verb = if self.lowercase {
            verb.to_lowercase()
        } else {
            verb.to_string()
        };
        let args = words.collect::<Vec<_>>().join(" ");

        Some(query.with_attribute(VERB, verb).with_attribute(ARGS, args))
    }

    fn clone_module(&self) -> Result<Box<dyn Module>, ModuleError> {
        Ok(Box::new(Self {
            core: self.core.fork(),
            lowercase: self.lowercase,
        }))
    }
}
