//! Configuration module for lisp-etr
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use lisp_etr::config::{load_config, Config};
//!
//! let config = load_config("/etc/lisp-etr/config.json").unwrap();
//! println!("Direct ingress: {}", config.direct.listen);
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{CaptureConfig, Config, DirectConfig, IpcConfig, LogConfig, LISP_DATA_PORT};
