pub mod schema;

pub use schema::{Config, DispatcherConfig, ObservabilityConfig, StoreConfig, WindowConfig};
