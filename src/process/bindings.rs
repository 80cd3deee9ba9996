use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ModuleError;
use crate::transport::SocketFactory;

/// A port claimed by a module together with the factory building its sockets.
#[derive(Clone)]
pub struct PortBinding {
    pub port: u16,
    pub owner: String,
    pub factory: Arc<dyn SocketFactory>,
}

impl fmt::Debug for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortBinding")
            .field("port", &self.port)
            .field("owner", &self.owner)
            .field("protocol", &self.factory.protocol())
            .finish()
    }
}

/// Port to factory mapping populated from `listen` during startup.
#[derive(Debug, Default)]
pub struct PortBindings {
    by_port: BTreeMap<u16, PortBinding>,
}

impl PortBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `port` for `owner`. A port already claimed stays with its first
    /// owner and the request fails with `ConfigurationConflict`.
    pub fn claim(
        &mut self,
        port: u16,
        owner: &str,
        factory: Arc<dyn SocketFactory>,
    ) -> Result<(), ModuleError> {
        if let Some(existing) = self.by_port.get(&port) {
            return Err(ModuleError::ConfigurationConflict {
                port,
                name: owner.to_string(),
                claimed_by: existing.owner.clone(),
            });
        }

        self.by_port.insert(
            port,
            PortBinding {
                port,
                owner: owner.to_string(),
                factory,
            },
        );
        Ok(())
    }

    pub fn get(&self, port: u16) -> Option<&PortBinding> {
        self.by_port.get(&port)
    }

    pub fn owner_of(&self, port: u16) -> Option<&str> {
        self.by_port.get(&port).map(|b| b.owner.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortBinding> {
        self.by_port.values()
    }

    pub fn len(&self) -> usize {
        self.by_port.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_port.is_empty()
    }
}
