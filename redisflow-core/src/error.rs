use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    /// The worker could not open, or has lost, its store connection. Fatal for the current bundle.
    #[error("Connection Error - {0}")]
    Connection(String),

    /// A single write failed on an open connection.
    #[error("Write Error - worker={worker} key={key}: {cause}")]
    Write {
        worker: usize,
        key: String,
        cause: String,
    },

    #[error("Template IO Error - {0}")]
    TemplateIo(String),

    #[error("Engine Error - {0}")]
    Engine(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::TemplateIo(format!("encoding template: {err}"))
    }
}
