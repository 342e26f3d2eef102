//! Configuration types and loading for the chsync synchronization engine.
//!
//! Configuration is read from `configuration/base.*`, then from the file of the active
//! [`Environment`], then from `APP_`-prefixed environment variables. See [`load_config`].

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
