//! `rota-core` — shared configuration and error types.

pub mod config;
pub mod error;

pub use config::{CalendarConfig, DatabaseConfig, EngineConfig, RotaConfig};
pub use error::{Result, RotaError};
