use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::config::Configuration;
use crate::error::ModuleError;
use crate::logging::Logger;
use crate::module::{
    InitStatus, Module, ModuleCategory, ModuleCore, ModuleDescriptor, PipelinePhase, Query,
};

/// Observer logging one line per served query through the module logger.
pub struct AccessLogModule {
    core: ModuleCore,
    served: u64,
    phases_seen: u64,
}

impl AccessLogModule {
    pub const NAME: &'static str = "access_log";

    pub fn new() -> Self {
        Self {
            core: ModuleCore::new(
                ModuleDescriptor::new(Self::NAME, ModuleCategory::Observer).with_priority(100.0),
            ),
            served: 0,
            phases_seen: 0,
        }
    }

    pub fn with_logger(self, logger: Arc<dyn Logger>) -> Self {
        Self {
            core: self.core.with_logger(logger),
            ..self
        }
    }

    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn phases_seen(&self) -> u64 {
        self.phases_seen
    }
}

impl Default for AccessLogModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for AccessLogModule {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn init(&mut self, _config: Option<&dyn Configuration>) -> InitStatus {
        InitStatus::SUCCESS
    }

    async fn process(&mut self, phase: PipelinePhase, query: Query) -> Option<Query> {
        self.phases_seen += 1;
        if phase != PipelinePhase::Send {
            return Some(query);
        }

        self.served += 1;
        let elapsed = (Utc::now() - query.received_at())
            .num_microseconds()
            .unwrap_or(i64::MAX);
        let peer = self
            .client()
            .map(|client| client.peer_addr.to_string())
            .unwrap_or_else(|| "-".to_string());

        self.logger().info(&format!(
            "{peer} #{} query={} bytes={} attributes={} elapsed_us={elapsed}",
            self.served,
            query.id(),
            query.payload().len(),
            query.attributes().len()
        ));
        Some(query)
    }

    fn clone_module(&self) -> Result<Box<dyn Module>, ModuleError> {
        Ok(Box::new(Self {
            core: self.core.fork(),
            served: 0,
            phases_seen: 0,
        }))
    }
}
