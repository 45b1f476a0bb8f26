use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Resource file {0:?} does not exist")]
    NotFound(PathBuf),
    #[error("No metadata is registered for {0:?}")]
    NotRegistered(PathBuf),
    #[error("No metadata is registered for uuid {0}")]
    UnknownUuid(Uuid),
    #[error("Path {0:?} is already registered")]
    DuplicatePath(PathBuf),
    #[error("Uuid {0} is already registered")]
    DuplicateUuid(Uuid),
    #[error("Resource {0} is already registered")]
    AlreadyRegistered(Uuid),
    #[error("Resource file {0:?} already exists")]
    FileExists(PathBuf),
    #[error("Failed to decode {path:?}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("Failed to encode {path:?}: {message}")]
    Encode { path: PathBuf, message: String },
    #[error(transparent)]
    Queue(#[from] akari_queue::QueueError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Malformed metadata: {0}")]
    Metadata(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
