use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("row for {table} is missing key field `{field}`")]
    MissingKey { table: String, field: String },

    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
