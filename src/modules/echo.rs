use async_trait::async_trait;

use super::{option_key, ARGS, ERROR, REPLY, SEQ, VERB};
use crate::config::Configuration;
use crate::error::ModuleError;
use crate::module::{
    InitStatus, Module, ModuleCategory, ModuleCore, ModuleDescriptor, PipelinePhase, Query,
};

/// Answers `echo <text>`, `ping` and `count`.
///
/// Every answered query gets a sequence number local to the connection.
/// Option: `prefix`, prepended to echoed text.
pub struct EchoModule {
    core: ModuleCore,
    prefix: String,
    served: u64,
}

impl EchoModule {
    pub const NAME: &'static str = "echo";

    pub fn new() -> Self {
        Self {
            core: ModuleCore::new(
                ModuleDescriptor::new(Self::NAME, ModuleCategory::Handler).with_priority(10.0),
            ),
            prefix: String::new(),
            served: 0,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for EchoModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for EchoModule {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn init(&mut self, config: Option<&dyn Configuration>) -> InitStatus {
        if let Some(prefix) = config.and_then(|c| c.get_str(&option_key(Self::NAME, "prefix"))) {
            self.prefix = prefix.to_string();
        }
        InitStatus::SUCCESS
    }

    async fn process(&mut self, _phase: PipelinePhase, query: Query) -> Option<Query> {
        self.served += 1;
        let query = query.with_attribute(SEQ, self.served.to_string());

        let verb = query.attribute(VERB).unwrap_or_default().to_string();
        let args = query.attribute(ARGS).unwrap_or_default().to_string();

        let query = match verb.as_str() {
            "echo" => query.with_attribute(REPLY, format!("{}{}", self.prefix, args)),
            "ping" => query.with_attribute(REPLY, "pong"),
            "count" => query.with_attribute(REPLY, self.served.to_string()),
            "" => query.with_attribute(ERROR, "empty command"),
            other => query.with_attribute(ERROR, format!("unknown command '{other}'")),
        };
        Some(query)
    }

    fn clone_module(&self) -> Result<Box<dyn Module>, ModuleError> {
        Ok(Box::new(Self {
            core: self.core.fork(),
            prefix: self.prefix.clone(),
            served: 0,
        }))
    }
}
