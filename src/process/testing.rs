//! Configurable module used by the process and pipeline tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Configuration;
use crate::error::ModuleError;
use crate::module::{
    InitStatus, Module, ModuleCategory, ModuleCore, ModuleDescriptor, PipelinePhase, Query,
};
use crate::transport::{LineSocketFactory, SocketFactory};

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub init_code: i32,
    pub listen_port: Option<u16>,
    pub fail_clone: bool,
    pub abort_in: Option<PipelinePhase>,
}

/// Shared between a prototype and all of its clones.
#[derive(Debug, Default)]
pub struct CallLog {
    listen_calls: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn listen_calls(&self) -> usize {
        self.listen_calls.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

pub struct ScriptedModule {
    core: ModuleCore,
    behavior: Script,
    calls: Arc<CallLog>,
}

impl ScriptedModule {
    pub fn new(name: &str, category: ModuleCategory, priority: f32) -> Self {
        Self {
            core: ModuleCore::new(ModuleDescriptor::new(name, category).with_priority(priority)),
            behavior: Script::default(),
            calls: Arc::new(CallLog::default()),
        }
    }

    pub fn with_behavior(mut self, behavior: Script) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_call_log(mut self, calls: Arc<CallLog>) -> Self {
        self.calls = calls;
        self
    }

    pub fn call_log(&self) -> Arc<CallLog> {
        self.calls.clone()
    }
}

#[async_trait]
impl Module for ScriptedModule {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn init(&mut self, _config: Option<&dyn Configuration>) -> InitStatus {
        InitStatus(self.behavior.init_code)
    }

    fn listen(&self, port: &mut u16) -> Option<Arc<dyn SocketFactory>> {
        self.calls.listen_calls.fetch_add(1, Ordering::SeqCst);
        let requested = self.behavior.listen_port?;
        *port = requested;
        Some(Arc::new(LineSocketFactory::default()))
    }

    async fn process(&mut self, phase: PipelinePhase, query: Query) -> Option<Query> {
        self.calls
            .log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name(), phase));

        if self.behavior.abort_in == Some(phase) {
            return None;
        }

        let trail = match query.attribute("trail") {
            Some(trail) => format!("{trail},{}", self.name()),
            None => self.name().to_string(),
        };
        Some(query.with_attribute("trail", trail))
    }

    fn clone_module(&self) -> Result<Box<dyn Module>, ModuleError> {
        if self.behavior.fail_clone {
            return Err(ModuleError::StartupFailure {
                name: self.name().to_string(),
                reason: "clone refused".to_string(),
            });
        }
        Ok(Box::new(Self {
            core: self.core.fork(),
            behavior: self.behavior.clone(),
            calls: self.calls.clone(),
        }))
    }
}
