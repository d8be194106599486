pub mod config;
pub mod duration;
pub mod error;
pub mod spec;
pub mod validate;

pub use config::MeshregConfig;
pub use error::MeshregError;
pub use spec::{ServiceId, ServiceSpec};
pub use validate::{ValidationError, validate, validate_id};
