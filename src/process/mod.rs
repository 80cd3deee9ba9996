//! Execution process
//!
//! The [`ExecutionProcess`] owns every module prototype for the lifetime of the
//! service. It initializes them, collects their port requests, and for each
//! accepted connection clones the relevant prototypes into a
//! [`ConnectionPipeline`] that drives queries through the pipeline phases.
//!
//! # Modules
//!
//! - `bindings`: port to socket factory mapping built from `listen`
//! - `pipeline`: per-connection instances and phase-ordered dispatch
//! - `listener`: accept loops feeding connections into pipelines

pub mod bindings;
pub mod listener;
pub mod pipeline;

pub use bindings::{PortBinding, PortBindings};
pub use listener::{ListenerService, RunningListeners};
pub use pipeline::ConnectionPipeline;

use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigStore, Configuration};
use crate::error::{ApirateError, ModuleError, Result};
use crate::module::{
    Client, ConnectionId, InstanceId, Module, ModuleCategory, ModuleFactoryRegistry,
    ProcessHandle, DEFAULT_PORT,
};
use crate::state::Metrics;

/// Which module categories are cloned for connections accepted on a port.
#[derive(Debug, Clone, Default)]
pub struct ListenerPolicy {
    by_port: BTreeMap<u16, Vec<ModuleCategory>>,
}

impl ListenerPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        let by_port = config
            .listeners
            .iter()
            .filter_map(|(port, listener)| {
                port.parse::<u16>()
                    .ok()
                    .map(|port| (port, listener.categories.clone()))
            })
            .collect();
        Self { by_port }
    }

    pub fn with_categories(mut self, port: u16, categories: Vec<ModuleCategory>) -> Self {
        self.by_port.insert(port, categories);
        self
    }

    /// Categories relevant to `port`. Ports without an explicit policy get all.
    pub fn categories_for(&self, port: u16) -> Vec<ModuleCategory> {
        match self.by_port.get(&port) {
            Some(categories) if !categories.is_empty() => categories.clone(),
            _ => ModuleCategory::ALL.to_vec(),
        }
    }
}

/// Why a prototype does not take part in the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Exclusion {
    pub module: String,
    pub error: ModuleError,
}

/// Outcome of [`ExecutionProcess::start`].
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub active: Vec<String>,
    pub excluded: Vec<Exclusion>,
    /// (port, owning module), in port order.
    pub bindings: Vec<(u16, String)>,
}

impl StartupReport {
    pub fn is_active(&self, module: &str) -> bool {
        self.active.iter().any(|name| name == module)
    }

    pub fn exclusion(&self, module: &str) -> Option<&ModuleError> {
        self.excluded
            .iter()
            .find(|e| e.module == module)
            .map(|e| &e.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrototypeState {
    Registered,
    Active,
    Excluded,
}

struct Prototype {
    module: Box<dyn Module>,
    registration: usize,
    state: PrototypeState,
    listen_port: Option<u16>,
    /// Cleared after the first failed clone.
    clonable: AtomicBool,
}

impl Prototype {
    fn is_clonable(&self) -> bool {
        self.state == PrototypeState::Active && self.clonable.load(Ordering::Acquire)
    }
}

/// Bookkeeping of the instances attached to this process for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub client: Client,
    pub instances: Vec<InstanceId>,
}

pub struct ExecutionProcess {
    handle: ProcessHandle,
    config: Arc<dyn Configuration>,
    policy: ListenerPolicy,
    prototypes: Vec<Prototype>,
    bindings: PortBindings,
    connections: DashMap<ConnectionId, ConnectionRecord>,
    metrics: Arc<Metrics>,
    started: bool,
    stopping: AtomicBool,
}

impl ExecutionProcess {
    pub fn new(config: Arc<dyn Configuration>, policy: ListenerPolicy) -> Self {
        Self {
            handle: ProcessHandle::allocate(),
            config,
            policy,
            prototypes: Vec::new(),
            bindings: PortBindings::new(),
            connections: DashMap::new(),
            metrics: Arc::new(Metrics::new()),
            started: false,
            stopping: AtomicBool::new(false),
        }
    }

    /// Build a process from configuration, instantiating every enabled module
    /// through `factories` in the configured order.
    pub fn from_config(config: &Config, factories: &ModuleFactoryRegistry) -> Result<Self> {
        let store: Arc<dyn Configuration> = Arc::new(ConfigStore::from_config(config));
        let mut process = Self::new(store, ListenerPolicy::from_config(config));

        for module_config in config.enabled_modules() {
            let mut module = factories.create(&module_config.name)?;
            if let Some(priority) = module_config.priority {
                module.core_mut().set_priority(priority);
            }
            process.register(module)?;
        }

        Ok(process)
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Add a prototype. Names must be non-empty and unique.
    pub fn register(&mut self, module: Box<dyn Module>) -> Result<()> {
        if self.started {
            return Err(ApirateError::AlreadyStarted);
        }

        let name = module.name();
        if name.trim().is_empty() {
            return Err(ModuleError::InvalidName(name.to_string()).into());
        }
        if self.prototypes.iter().any(|p| p.module.name() == name) {
            return Err(ModuleError::DuplicateName(name.to_string()).into());
        }

        debug!(
            module = %name,
            category = %module.category(),
            priority = module.priority(),
            version = module.version(),
            "Registered module prototype"
        );

        let registration = self.prototypes.len();
        self.prototypes.push(Prototype {
            module,
            registration,
            state: PrototypeState::Registered,
            listen_port: None,
            clonable: AtomicBool::new(true),
        });
        Ok(())
    }

    /// Initialize every prototype in registration order and collect port
    /// requests. Failing modules are excluded and the rest carry on.
    pub fn start(&mut self) -> Result<StartupReport> {
        if self.started {
            return Err(ApirateError::AlreadyStarted);
        }

        let mut report = StartupReport::default();

        for prototype in self.prototypes.iter_mut() {
            let name = prototype.module.name().to_string();

            let status = prototype.module.init(Some(self.config.as_ref()));
            if !status.is_success() {
                let err = ModuleError::StartupFailure {
                    name: name.clone(),
                    reason: format!("init returned status {}", status.code()),
                };
                error!(module = %name, code = status.code(), "Module init failed, excluding it");
                prototype.state = PrototypeState::Excluded;
                report.excluded.push(Exclusion {
                    module: name,
                    error: err,
                });
                continue;
            }

            let mut port = DEFAULT_PORT;
            match prototype.module.listen(&mut port) {
                Some(factory) if port != DEFAULT_PORT => {
                    if let Err(err) = self.bindings.claim(port, &name, factory) {
                        error!(module = %name, port, "{}", err);
                        self.metrics.record_port_conflict();
                        prototype.state = PrototypeState::Excluded;
                        report.excluded.push(Exclusion {
                            module: name,
                            error: err,
                        });
                        continue;
                    }
                    info!(module = %name, port, "Module claimed a dedicated listener");
                    prototype.listen_port = Some(port);
                }
                Some(_) => {
                    warn!(
                        module = %name,
                        "Module returned a socket factory but left the default port, no listener registered"
                    );
                }
                None => {}
            }

            prototype.state = PrototypeState::Active;
            report.active.push(name);
        }

        report.bindings = self
            .bindings
            .iter()
            .map(|b| (b.port, b.owner.clone()))
            .collect();

        self.metrics
            .set_module_counts(report.active.len(), report.excluded.len());
        self.metrics.set_listener_count(self.bindings.len());
        self.started = true;

        info!(
            active = report.active.len(),
            excluded = report.excluded.len(),
            listeners = report.bindings.len(),
            "Execution process started"
        );

        Ok(report)
    }

    /// Stop accepting new connections. Open pipelines finish on their own.
    pub fn shutdown(&self) {
        if !self.stopping.swap(true, Ordering::AcqRel) {
            info!(
                connections = self.connections.len(),
                "Execution process shutting down"
            );
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn bindings(&self) -> &PortBindings {
        &self.bindings
    }

    /// Names of the prototypes taking part in the pipeline, registration order.
    pub fn active_modules(&self) -> Vec<&str> {
        self.prototypes
            .iter()
            .filter(|p| p.state == PrototypeState::Active)
            .map(|p| p.module.name())
            .collect()
    }

    /// Whether connections will still get a clone of `module`.
    pub fn is_clonable(&self, module: &str) -> bool {
        self.prototypes
            .iter()
            .any(|p| p.module.name() == module && p.is_clonable())
    }

    pub fn prototype(&self, module: &str) -> Option<&dyn Module> {
        self.prototypes
            .iter()
            .find(|p| p.module.name() == module)
            .map(|p| p.module.as_ref())
    }

    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Clone the prototypes relevant to `client.local_port`, attach them to
    /// this process and bind the client.
    pub fn open_connection(self: &Arc<Self>, client: Client) -> Result<ConnectionPipeline> {
        if !self.started {
            return Err(ApirateError::NotStarted);
        }
        if self.is_stopping() {
            return Err(ApirateError::ShuttingDown);
        }

        let categories: HashSet<ModuleCategory> = self
            .policy
            .categories_for(client.local_port)
            .into_iter()
            .collect();

        let mut instances = Vec::new();
        for prototype in &self.prototypes {
            if !prototype.is_clonable() {
                continue;
            }
            if !categories.contains(&prototype.module.category()) {
                continue;
            }
            // A module owning a listener only serves its own port.
            if let Some(port) = prototype.listen_port {
                if port != client.local_port {
                    continue;
                }
            }

            match prototype.module.clone_module() {
                Ok(mut instance) => {
                    instance.attach(self.handle).set_client(client.clone());
                    instances.push((prototype.registration, instance));
                }
                Err(err) => {
                    error!(
                        module = %prototype.module.name(),
                        connection = %client.connection_id,
                        "{}; excluding module from further connections",
                        err
                    );
                    if prototype.clonable.swap(false, Ordering::AcqRel) {
                        self.metrics.record_clone_failure();
                    }
                }
            }
        }

        let record = ConnectionRecord {
            client: client.clone(),
            instances: instances.iter().map(|(_, m)| m.instance_id()).collect(),
        };
        self.connections.insert(client.connection_id, record);
        self.metrics.connection_opened();

        debug!(
            connection = %client.connection_id,
            port = client.local_port,
            instances = instances.len(),
            "Attached module instances to connection"
        );

        Ok(ConnectionPipeline::new(self.clone(), client, instances))
    }

    pub(crate) fn release_connection(&self, id: &ConnectionId) {
        if self.connections.remove(id).is_some() {
            self.metrics.connection_closed();
        }
    }
}

impl std::fmt::Debug for ExecutionProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionProcess")
            .field("handle", &self.handle)
            .field("prototypes", &self.prototypes.len())
            .field("bindings", &self.bindings)
            .field("connections", &self.connections.len())
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests {
    use super::testing::{Script, ScriptedModule};
    use super::*;
    use serde_json::json;

    fn process() -> ExecutionProcess {
        ExecutionProcess::new(Arc::new(json!({})), ListenerPolicy::new())
    }

    fn client(port: u16) -> Client {
        Client::new("127.0.0.1:50000".parse().unwrap(), port)
    }

    #[test]
    fn test_register_rejects_duplicate_and_empty_names() {
        let mut process = process();
        process
            .register(Box::new(ScriptedModule::new("a", ModuleCategory::Handler, 1.0)))
            .unwrap();

        let dup = process.register(Box::new(ScriptedModule::new("a", ModuleCategory::Parser, 2.0)));
        assert!(matches!(
            dup,
            Err(ApirateError::Module(ModuleError::DuplicateName(_)))
        ));

        let empty = process.register(Box::new(ScriptedModule::new("", ModuleCategory::Parser, 2.0)));
        assert!(matches!(
            empty,
            Err(ApirateError::Module(ModuleError::InvalidName(_)))
        ));
    }

    #[test]
    fn test_failed_init_is_excluded_and_never_listens() {
        let mut process = process();
        let failing = ScriptedModule::new("broken", ModuleCategory::Network, 1.0)
            .with_behavior(Script {
                init_code: 7,
                listen_port: Some(9000),
                ..Default::default()
            });
        let calls = failing.call_log();
        process.register(Box::new(failing)).unwrap();

        let report = process.start().unwrap();
        assert!(report.active.is_empty());
        assert_eq!(
            report.exclusion("broken"),
            Some(&ModuleError::StartupFailure {
                name: "broken".to_string(),
                reason: "init returned status 7".to_string(),
            })
        );
        assert!(process.bindings().is_empty());
        assert_eq!(calls.listen_calls(), 0);
        assert!(!process.is_clonable("broken"));

        let process = Arc::new(process);
        let pipeline = process.open_connection(client(9000)).unwrap();
        assert!(pipeline.is_empty());
        assert!(!pipeline.execution_order().contains(&"broken"));
    }

    #[test]
    fn test_default_port_registers_no_listener() {
        let mut process = process();
        process
            .register(Box::new(
                ScriptedModule::new("quiet", ModuleCategory::Network, 1.0).with_behavior(
                    Script {
                        listen_port: Some(DEFAULT_PORT),
                        ..Default::default()
                    },
                ),
            ))
            .unwrap();
        process
            .register(Box::new(ScriptedModule::new("plain", ModuleCategory::Handler, 1.0)))
            .unwrap();

        let report = process.start().unwrap();
        assert_eq!(report.active, vec!["quiet", "plain"]);
        assert!(report.bindings.is_empty());
        assert!(process.bindings().is_empty());
    }

    #[test]
    fn test_duplicate_port_rejects_second_module() {
        let mut process = process();
        for name in ["first", "second"] {
            process
                .register(Box::new(
                    ScriptedModule::new(name, ModuleCategory::Network, 1.0).with_behavior(
                        Script {
                            listen_port: Some(9100),
                            ..Default::default()
                        },
                    ),
                ))
                .unwrap();
        }

        let report = process.start().unwrap();
        assert_eq!(report.bindings, vec![(9100, "first".to_string())]);
        assert_eq!(report.active, vec!["first"]);
        assert_eq!(
            report.exclusion("second"),
            Some(&ModuleError::ConfigurationConflict {
                port: 9100,
                name: "second".to_string(),
                claimed_by: "first".to_string(),
            })
        );
        assert_eq!(process.bindings().owner_of(9100), Some("first"));
        assert_eq!(process.metrics().port_conflicts.get(), 1);
    }

    #[test]
    fn test_port_80_never_binds_whatever_the_config() {
        let mut config = Config::default();
        config.modules = vec![
            crate::config::ModuleConfig::named("line")
                .with_option("port", json!(DEFAULT_PORT)),
        ];

        let mut process =
            ExecutionProcess::from_config(&config, &crate::modules::builtin_factories()).unwrap();
        let report = process.start().unwrap();
        assert!(report.is_active("line"));
        assert!(report.bindings.is_empty());

        let mut config = Config::default();
        config.modules = vec![crate::config::ModuleConfig::named("line")
            .with_option("port", json!(7070))];
        let mut process =
            ExecutionProcess::from_config(&config, &crate::modules::builtin_factories()).unwrap();
        let report = process.start().unwrap();
        assert_eq!(report.bindings, vec![(7070, "line".to_string())]);
    }

    #[test]
    fn test_start_twice_fails() {
        let mut process = process();
        process.start().unwrap();
        assert!(matches!(process.start(), Err(ApirateError::AlreadyStarted)));
        assert!(matches!(
            process.register(Box::new(ScriptedModule::new("late", ModuleCategory::Handler, 1.0))),
            Err(ApirateError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_open_connection_requires_start() {
        let process = Arc::new(process());
        assert!(matches!(
            process.open_connection(client(7000)),
            Err(ApirateError::NotStarted)
        ));
    }

    #[test]
    fn test_open_connection_clones_and_attaches() {
        let mut process = process();
        process
            .register(Box::new(ScriptedModule::new("a", ModuleCategory::Handler, 1.0)))
            .unwrap();
        process
            .register(Box::new(ScriptedModule::new("b", ModuleCategory::Parser, 1.0)))
            .unwrap();
        process.start().unwrap();
        let process = Arc::new(process);

        let client = client(7000);
        let pipeline = process.open_connection(client.clone()).unwrap();

        assert_eq!(pipeline.len(), 2);
        for instance in pipeline.instances() {
            assert_eq!(instance.attached_process(), Some(process.handle()));
            assert_eq!(instance.client(), Some(&client));
            let prototype = process.prototype(instance.name()).unwrap();
            assert_ne!(instance.instance_id(), prototype.instance_id());
            assert!(prototype.attached_process().is_none());
        }

        let record = process.connection(&client.connection_id).unwrap();
        assert_eq!(record.instances.len(), 2);
        assert_eq!(process.active_connections(), 1);

        drop(pipeline);
        assert_eq!(process.active_connections(), 0);
        assert!(process.connection(&client.connection_id).is_none());
    }

    #[test]
    fn test_listener_policy_limits_categories() {
        let policy = ListenerPolicy::new().with_categories(7001, vec![ModuleCategory::Handler]);
        let mut process =
            ExecutionProcess::new(Arc::new(json!({})), policy);
        process
            .register(Box::new(ScriptedModule::new("handler", ModuleCategory::Handler, 1.0)))
            .unwrap();
        process
            .register(Box::new(ScriptedModule::new("parser", ModuleCategory::Parser, 1.0)))
            .unwrap();
        process.start().unwrap();
        let process = Arc::new(process);

        let restricted = process.open_connection(client(7001)).unwrap();
        assert_eq!(restricted.execution_order(), vec!["handler"]);

        let open = process.open_connection(client(7002)).unwrap();
        assert_eq!(open.execution_order(), vec!["parser", "handler"]);
    }

    #[test]
    fn test_listener_owner_only_serves_its_port() {
        let mut process = process();
        for (name, port) in [("left", 9201), ("right", 9202)] {
            process
                .register(Box::new(
                    ScriptedModule::new(name, ModuleCategory::Network, 1.0).with_behavior(
                        Script {
                            listen_port: Some(port),
                            ..Default::default()
                        },
                    ),
                ))
                .unwrap();
        }
        process.start().unwrap();
        let process = Arc::new(process);

        let pipeline = process.open_connection(client(9202)).unwrap();
        let names: Vec<_> = pipeline.instances().map(|m| m.name()).collect();
        assert_eq!(names, vec!["right"]);
        // Network modules run in both the receive and the send phase.
        assert_eq!(pipeline.execution_order(), vec!["right", "right"]);
    }

    #[test]
    fn test_clone_failure_excludes_module_from_later_connections() {
        let mut process = process();
        process
            .register(Box::new(
                ScriptedModule::new("fragile", ModuleCategory::Handler, 1.0).with_behavior(
                    Script {
                        fail_clone: true,
                        ..Default::default()
                    },
                ),
            ))
            .unwrap();
        process
            .register(Box::new(ScriptedModule::new("sturdy", ModuleCategory::Handler, 2.0)))
            .unwrap();
        process.start().unwrap();
        let process = Arc::new(process);

        let first = process.open_connection(client(7000)).unwrap();
        assert_eq!(first.execution_order(), vec!["sturdy"]);
        assert!(!process.is_clonable("fragile"));
        assert_eq!(process.metrics().clone_failures.get(), 1);
        assert!(matches!(
            process.prototype("fragile").unwrap().clone_module(),
            Err(ModuleError::StartupFailure { name, .. }) if name == "fragile"
        ));

        let second = process.open_connection(client(7000)).unwrap();
        assert_eq!(second.execution_order(), vec!["sturdy"]);
        assert_eq!(process.metrics().clone_failures.get(), 1);
    }

    #[test]
    fn test_shutdown_refuses_new_connections() {
        let mut process = process();
        process.start().unwrap();
        let process = Arc::new(process);
        process.shutdown();
        assert!(matches!(
            process.open_connection(client(7000)),
            Err(ApirateError::ShuttingDown)
        ));
    }

    #[test]
    fn test_from_config_applies_priority_override() {
        let mut config = Config::default();
        config.modules = vec![
            crate::config::ModuleConfig::named("echo"),
            crate::config::ModuleConfig {
                priority: Some(0.5),
                ..crate::config::ModuleConfig::named("guard")
            },
        ];

        let factories = crate::modules::builtin_factories();
        let process = ExecutionProcess::from_config(&config, &factories).unwrap();
        assert_eq!(process.prototype("guard").unwrap().priority(), 0.5);
        assert!(process.prototype("line").is_none());
    }

    #[test]
    fn test_from_config_rejects_unknown_module() {
        let mut config = Config::default();
        config.modules = vec![crate::config::ModuleConfig::named("nonexistent")];
        let factories = crate::modules::builtin_factories();
        assert!(matches!(
            ExecutionProcess::from_config(&config, &factories),
            Err(ApirateError::Module(ModuleError::UnknownModule(_)))
        ));
    }
}
