use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to read {}: {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Control plane error ({}): {body}", status_label(.status_code))]
    Remote {
        status_code: Option<u16>,
        body: String,
    },

    #[error("No available teepods found")]
    NoCapacity,

    #[error("VM not found: {0}")]
    NotFound(String),
}

impl Error {
    /// HTTP status of a failed control-plane call, if a response was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Remote { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Remote {
            status_code: err.status().map(|status| status.as_u16()),
            body: err.to_string(),
        }
    }
}

fn status_label(status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("HTTP {code}"),
        None => "no response".to_string(),
    }
}
