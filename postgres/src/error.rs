use thiserror::Error;

/// Everything that can go wrong talking to the Postgres backend.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("concurrent modification error")]
    Concurrency,

    #[error("duplicate operation")]
    Duplicate,

    #[error("processor '{0}' is not registered")]
    UnknownProcessor(String),
}

pub(crate) fn map_serialization_error(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(ref description) = err {
        if description.code().as_deref() == Some("40001") {
            return Error::Concurrency;
        }
    }
    Error::Database(err)
}
