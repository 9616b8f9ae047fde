use thiserror::Error;

pub type Result<T> = std::result::Result<T, PvesticError>;

#[derive(Debug, Error)]
pub enum PvesticError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("insufficient space: {required} bytes required, {available} bytes available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("snapshot operation failed on '{device}': {message}")]
    Snapshot { device: String, message: String },

    #[error("restic command failed: {0}")]
    Restic(String),

    #[error("restic event stream decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no backups found")]
    NoBackups,

    #[error("backup of machine {id} ({name}) failed: {source}")]
    Machine {
        id: u32,
        name: String,
        #[source]
        source: Box<PvesticError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
