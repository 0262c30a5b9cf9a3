#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! File-backed configuration for the Nebula service.
//!
//! Layout: `model.rs` (settings, admission tables, environment settings),
//! `validate.rs` (validation/parsing helpers), `service.rs` (`SettingsService`),
//! `secret.rs` (the shared API secret).

pub mod error;
pub mod model;
pub mod secret;
pub mod service;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::{
    AdmissionConfig, DEFAULT_BIND_ADDR, DEFAULT_ROUTE_KEY, ENV_ADDR, ENV_DATA_DIR, ENV_DEV,
    ENV_LOG_FORMAT, ENV_LOG_LEVEL, RateRule, ServerSettings, UserSettings,
};
pub use secret::{ApiSecret, SECRET_FILE};
pub use service::{SETTINGS_FILE, SettingsService};
pub use validate::{MAX_SPEED_LIMIT_KIB, env_flag_value, validate_speed_limit};
