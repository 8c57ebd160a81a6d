pub mod broadcast;
pub mod cache;
pub mod config;
pub mod controller;
pub mod datasource;
pub mod equivalence;
pub mod error;
pub mod filter;
pub mod model;
pub mod resolver;
pub mod util;

pub use cache::{AliasSource, ResolutionCache};
pub use config::{ControllerConfig, DashboardConfiguration};
pub use controller::AliasController;
pub use error::{ConfigError, ResolutionError};
pub use resolver::{EntityResolver, LookupOptions};
