use thiserror::Error;

/// Errors raised while loading or checking process configuration.
#[derive(Error, Debug)]
pub enum MeshregError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Config load failed: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for MeshregError {
    fn from(e: figment::Error) -> Self {
        MeshregError::Figment(Box::new(e))
    }
}
