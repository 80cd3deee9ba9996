pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod module;
pub mod modules;
pub mod process;
pub mod state;
pub mod transport;
