use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Serial / terminal errors
    #[error("Serial port {port} unavailable: {reason}")]
    SerialOpen { port: String, reason: String },

    #[error("Terminal on {port} did not answer the name request")]
    NameHandshake { port: String },

    #[error("Terminal connection lost: {0}")]
    ConnectionLost(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid device argument '{0}', expected device[:baud]")]
    InvalidDeviceArg(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
