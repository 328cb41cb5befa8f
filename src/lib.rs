pub mod config;
pub mod error;
pub mod db;
pub mod graph;
pub mod mcp;
pub mod model;

pub use config::Config;
pub use error::{OtInvError, Result};
