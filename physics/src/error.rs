use thiserror::Error;

use crate::handle::{ConstraintId, ControllerId};

/// Errors surfaced by the physics layer.
///
/// Most runtime operations degrade to a logged no-op instead of failing (see the
/// individual methods). Only world construction, configuration loading, controller
/// construction and file export return these.
#[derive(Error, Debug)]
pub enum PhysicsError {
    #[error("invalid body state: {0}")]
    InvalidBodyState(String),

    #[error("invalid world configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse world configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("unknown controller {0:?}")]
    UnknownController(ControllerId),

    #[error("unknown constraint {0:?}")]
    UnknownConstraint(ConstraintId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, PhysicsError>;
