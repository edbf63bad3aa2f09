mod config;
mod error;
pub mod hash;
mod logging;
mod types;

pub use config::*;
pub use error::*;
pub use logging::init_log;
pub use types::*;
