use async_trait::async_trait;
use std::sync::Arc;

use super::option_key;
use crate::config::Configuration;
use crate::error::ModuleError;
use crate::module::{
    InitStatus, Module, ModuleCategory, ModuleCore, ModuleDescriptor, PipelinePhase, Query,
};
use crate::transport::{LineSocketFactory, SocketFactory};

pub const DEFAULT_LISTEN_PORT: u16 = 7070;

/// Network module owning the line protocol listener.
///
/// Options: `port` (default 7070), `maxLineLength` (bytes, default 64 KiB).
pub struct LineModule {
    core: ModuleCore,
    port: u16,
    max_line_length: usize,
}

impl LineModule {
    pub const NAME: &'static str = "line";

    pub fn new() -> Self {
        Self {
            core: ModuleCore::new(ModuleDescriptor::new(Self::NAME, ModuleCategory::Network)),
            port: DEFAULT_LISTEN_PORT,
            max_line_length: LineSocketFactory::default().max_line_length(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Default for LineModule {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_line_ending(text: &str) -> &str {
    text.trim_end_matches(|c| c == '\r' || c == '\n')
}

#[async_trait]
impl Module for LineModule {
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

        if let Some(port) = config.get_u64(&option_key(Self::NAME, "port")) {
            match u16::try_from(port) {
                Ok(port) => self.port = port,
                Err(_) => {
                    self.logger().error(&format!("Port {port} is out of range"));
                    return InitStatus(1);
                }
            }
        }

        if let Some(max) = config.get_u64(&option_key(Self::NAME, "maxLineLength")) {
            if max == 0 {
                self.logger().error("maxLineLength must be positive");
                return InitStatus(2);
            }
            self.max_line_length = max as usize;
        }

        self.logger().debug(&format!(
            "Configured for port {} (max line {} bytes)",
            self.port, self.max_line_length
        ));
        InitStatus::SUCCESS
    }

    fn listen(&self, port: &mut u16) -> Option<Arc<dyn SocketFactory>> {
        *port = self.port;
        Some(Arc::new(LineSocketFactory::new(self.max_line_length)))
    }

    async fn process(&mut self, phase: PipelinePhase, query: Query) -> Option<Query> {
        match phase {
            PipelinePhase::Receive => {
                let text = query.text();
                let line = strip_line_ending(&text);
                // Blank lines get no answer.
                if line.trim().is_empty() {
                    return None;
                }
                let line = line.to_string();
                Some(query.with_payload(line))
            }
            PipelinePhase::Send => {
                let text = query.text();
                let line = strip_line_ending(&text).to_string();
                Some(query.with_payload(line))
            }
            _ => Some(query),
        }
    }

    fn clone_module(&self) -> Result<Box<dyn Module>, ModuleError> {
        Ok(Box::new(Self {
            core: self.core.fork(),
            port: self.port,
            max_line_length: self.max_line_length,
        }))
    }
}
