pub mod assets;
pub mod config;
pub mod db;
pub mod secret;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
