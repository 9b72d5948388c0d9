#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod primitives;
pub mod process;
pub mod protocols;
pub mod store;
pub mod window;

pub use config::Config;
pub use error::{ConclaveError, Result};
