//! Module contract
//!
//! A module is the unit of extension of the service. It exists once as a
//! prototype, initialized at startup and shared read-only, and once per
//! accepted connection as a clone that carries that connection's state.
//!
//! # Modules
//!
//! - `category`: module categories, pipeline phases and their membership
//! - `query`: the payload threaded through the pipeline
//! - `client`: per-connection context
//! - `factory`: named constructors used to instantiate prototypes

pub mod category;
pub mod client;
pub mod factory;
pub mod query;

pub use category::{ModuleCategory, PipelinePhase};
pub use client::{Client, ConnectionId};
pub use factory::ModuleFactoryRegistry;
pub use query::Query;

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Configuration;
use crate::error::ModuleError;
use crate::logging::{Logger, TracingLogger};
use crate::transport::SocketFactory;

/// Port a module leaves untouched in `listen` when it wants no listener.
pub const DEFAULT_PORT: u16 = 80;

/// Identity of one module value, prototype or clone.
pub type InstanceId = Uuid;

/// Status code returned by [`Module::init`]. Zero is success, anything else a
/// module-defined failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InitStatus(pub i32);

impl InitStatus {
    pub const SUCCESS: InitStatus = InitStatus(0);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }

    pub fn code(&self) -> i32 {
        self.0
    }
}

/// Opaque reference to an execution process. Instances hold this instead of a
/// pointer to the process that owns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessHandle(u64);

static NEXT_PROCESS: AtomicU64 = AtomicU64::new(1);

impl ProcessHandle {
    pub(crate) fn allocate() -> Self {
        ProcessHandle(NEXT_PROCESS.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process#{}", self.0)
    }
}

/// Static identification of a module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDescriptor {
    pub name: String,
    pub priority: f32,
    pub version: f32,
    pub category: ModuleCategory,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, category: ModuleCategory) -> Self {
        Self {
            name: name.into(),
            priority: 0.0,
            version: 1.0,
            category,
        }
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_version(mut self, version: f32) -> Self {
        self.version = version;
        self
    }
}

/// Bookkeeping every module carries: descriptor, identity, logger, attachment
/// and client binding.
pub struct ModuleCore {
    descriptor: ModuleDescriptor,
    instance_id: InstanceId,
    logger: Arc<dyn Logger>,
    process: Option<ProcessHandle>,
    client: Option<Client>,
}

impl ModuleCore {
    pub fn new(descriptor: ModuleDescriptor) -> Self {
        let logger = TracingLogger::shared(&descriptor.name);
        Self {
            descriptor,
            instance_id: Uuid::new_v4(),
            logger,
            process: None,
            client: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Core for a fresh clone: same descriptor and logger, new identity, no
    /// attachment, no client.
    pub fn fork(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            instance_id: Uuid::new_v4(),
            logger: self.logger.clone(),
            process: None,
            client: None,
        }
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Priority may be tuned from configuration before the prototype is shared.
    pub fn set_priority(&mut self, priority: f32) {
        self.descriptor.priority = priority;
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.process
    }

    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    fn attach(&mut self, process: ProcessHandle) {
        match self.process {
            None => self.process = Some(process),
            Some(current) if current == process => {}
            Some(current) => {
                tracing::warn!(
                    module = %self.descriptor.name,
                    instance = %self.instance_id,
                    attached_to = %current,
                    requested = %process,
                    "Refusing to attach an instance owned by another process"
                );
            }
        }
    }

    fn detach(&mut self, process: ProcessHandle) {
        if self.process == Some(process) {
            self.process = None;
        }
    }

    fn set_client(&mut self, client: Client) {
        self.client = Some(client);
    }
}

impl fmt::Debug for ModuleCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCore")
            .field("descriptor", &self.descriptor)
            .field("instance_id", &self.instance_id)
            .field("process", &self.process)
            .field("client", &self.client)
            .finish()
    }
}

/// The processing contract every module implements.
///
/// Implementors provide `init`, `process` and `clone_module` (and `listen` when
/// they want a dedicated port). Accessors, phase filtering and the attachment
/// bookkeeping are provided on top of [`ModuleCore`].
#[async_trait]
pub trait Module: Send + Sync + 'static {
    fn core(&self) -> &ModuleCore;

    fn core_mut(&mut self) -> &mut ModuleCore;

    /// Prepare the prototype. Called once, before `listen` and before any clone.
    fn init(&mut self, config: Option<&dyn Configuration>) -> InitStatus;

    /// Request a dedicated listener by overwriting `port` and returning a
    /// factory. The default requests nothing.
    fn listen(&self, _port: &mut u16) -> Option<Arc<dyn SocketFactory>> {
        None
    }

    /// Transform a query in one of this module's own phases. `None` aborts the
    /// pipeline for the current query.
    async fn process(&mut self, phase: PipelinePhase, query: Query) -> Option<Query>;

    /// Independent instance with fresh per-connection state.
    fn clone_module(&self) -> Result<Box<dyn Module>, ModuleError>;

    /// Run the module for `phase`. Phases outside the module's category pass
    /// the query through unchanged.
    async fn exec(&mut self, phase: PipelinePhase, query: Query) -> Option<Query> {
        if !self.category().participates_in(phase) {
            return Some(query);
        }
        self.process(phase, query).await
    }

    fn name(&self) -> &str {
        &self.core().descriptor().name
    }

    fn priority(&self) -> f32 {
        self.core().descriptor().priority
    }

    fn version(&self) -> f32 {
        self.core().descriptor().version
    }

    fn category(&self) -> ModuleCategory {
        self.core().descriptor().category
    }

    fn logger(&self) -> Arc<dyn Logger> {
        self.core().logger().clone()
    }

    fn instance_id(&self) -> InstanceId {
        self.core().instance_id()
    }

    fn attached_process(&self) -> Option<ProcessHandle> {
        self.core().process()
    }

    fn client(&self) -> Option<&Client> {
        self.core().client()
    }
}

impl dyn Module {
    /// Attach to `process`. A no-op when already attached to it, refused when
    /// attached to a different process.
    pub fn attach(&mut self, process: ProcessHandle) -> &mut Self {
        self.core_mut().attach(process);
        self
    }

    /// Detach from `process`. A no-op when not attached to it.
    pub fn detach(&mut self, process: ProcessHandle) -> &mut Self {
        self.core_mut().detach(process);
        self
    }

    /// Bind the connection context. Last write wins.
    pub fn set_client(&mut self, client: Client) -> &mut Self {
        self.core_mut().set_client(client);
        self
    }
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .field("category", &self.category())
            .field("priority", &self.priority())
            .field("instance_id", &self.instance_id())
            .finish()
    }
}
