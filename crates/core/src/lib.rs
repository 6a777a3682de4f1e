pub mod config;
pub mod error;
pub mod event_bus;
pub mod money;
pub mod targeting;
pub mod types;

pub use config::AppConfig;
pub use error::{AdError, AdResult};
pub use money::Money;
pub use targeting::Targeting;
