mod core;
mod dispatcher;
mod observability;
mod store;
mod window;

pub use self::core::Config;
pub use dispatcher::DispatcherConfig;
pub use observability::ObservabilityConfig;
pub use store::StoreConfig;
pub use window::WindowConfig;
