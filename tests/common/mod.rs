//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use apirate::config::Configuration;
use apirate::error::ModuleError;
use apirate::module::{
    Client, InitStatus, Module, ModuleCategory, ModuleCore, ModuleDescriptor, PipelinePhase,
    Query,
};
use apirate::transport::{LineSocketFactory, SocketFactory};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn client(port: u16) -> Client {
    Client::new("127.0.0.1:40000".parse().unwrap(), port)
}

/// Records "name:phase" for every call it receives.
pub struct Recorder {
    core: ModuleCore,
    log: CallLog,
    abort_in: Option<PipelinePhase>,
    port: Option<u16>,
}

impl Recorder {
    pub fn new(name: &str, category: ModuleCategory, priority: f32, log: &CallLog) -> Self {
        Self {
            core: ModuleCore::new(ModuleDescriptor::new(name, category).with_priority(priority)),
            log: log.clone(),
            abort_in: None,
            port: None,
        }
    }

    pub fn aborting_in(mut self, phase: PipelinePhase) -> Self {
        self.abort_in = Some(phase);
        self
    }

    pub fn listening_on(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

#[async_trait]
impl Module for Recorder {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn init(&mut self, _config: Option<&dyn Configuration>) -> InitStatus {
        InitStatus::SUCCESS
    }

    fn listen(&self, port: &mut u16) -> Option<Arc<dyn SocketFactory>> {
        *port = self.port?;
        Some(Arc::new(LineSocketFactory::default()))
    }

    async fn process(&mut self, phase: PipelinePhase, query: Query) -> Option<Query> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name(), phase));
        if self.abort_in == Some(phase) {
            return None;
        }
        Some(query)
    }

    fn clone_module(&self) -> Result<Box<dyn Module>, ModuleError> {
        Ok(Box::new(Self {
            core: self.core.fork(),
            log: self.log.clone(),
            abort_in: self.abort_in,
            port: self.port,
        }))
    }
}
