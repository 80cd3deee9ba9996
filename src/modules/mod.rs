//! Builtin modules
//!
//! A line oriented command service assembled from small modules:
//!
//! - `line`: network module owning the TCP port, newline framing
//! - `command_parser`: splits a line into verb and arguments
//! - `guard`: rejects blocked verbs and oversized queries
//! - `echo`: answers `echo`, `ping` and `count`
//! - `renderer`: formats the reply as text or JSON
//! - `access_log`: observer logging every served query
//!
//! Options live under `modules.<name>.<key>` in the configuration.

pub mod access_log;
pub mod command_parser;
pub mod echo;
pub mod guard;
pub mod line;
pub mod renderer;

pub use access_log::AccessLogModule;
pub use command_parser::CommandParserModule;
pub use echo::EchoModule;
pub use guard::GuardModule;
pub use line::LineModule;
pub use renderer::RendererModule;

use crate::module::{Module, ModuleFactoryRegistry};

/// Attribute set by the parser: lowercased first word.
pub const VERB: &str = "verb";
/// Attribute set by the parser: remaining words joined by single spaces.
pub const ARGS: &str = "args";
/// Attribute set by handlers: reply body.
pub const REPLY: &str = "reply";
/// Attribute set by handlers: error message, rendered instead of the reply.
pub const ERROR: &str = "error";
/// Attribute set by handlers: per-connection sequence number.
pub const SEQ: &str = "seq";

type Constructor = fn() -> Box<dyn Module>;

const BUILTINS: &[(&str, Constructor)] = &[
    (LineModule::NAME, || Box::new(LineModule::new())),
    (CommandParserModule::NAME, || Box::new(CommandParserModule::new())),
    (GuardModule::NAME, || Box::new(GuardModule::new())),
    (EchoModule::NAME, || Box::new(EchoModule::new())),
    (RendererModule::NAME, || Box::new(RendererModule::new())),
    (AccessLogModule::NAME, || Box::new(AccessLogModule::new())),
];

/// Factory registry holding every builtin module.
pub fn builtin_factories() -> ModuleFactoryRegistry {
    let mut registry = ModuleFactoryRegistry::new();
    for (name, constructor) in BUILTINS {
        registry
            .register(name, *constructor)
            .expect("builtin module names are unique");
    }
    registry
}

pub(crate) fn option_key(module: &str, key: &str) -> String {
    format!("modules.{module}.{key}")
}
