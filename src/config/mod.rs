pub mod loader;
pub mod schema;
pub mod store;

pub use loader::{load_from_env_or_file, load_from_path, validate};
pub use schema::{Config, ListenerConfig, LoggingConfig, ModuleConfig, ServerConfig};
pub use store::{ConfigStore, Configuration};
