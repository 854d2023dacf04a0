use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CommonError {
    #[error("Unable to load toml: {path}")]
    TomlReadError { path: String },

    #[error("Unable to parse toml: {msg}")]
    TomlParseError { msg: String },

    #[error("Invalid parameter {name}: {msg}")]
    InvalidParameter { name: &'static str, msg: String },

    #[error("Unable to parse seeds: {msg}")]
    SeedParseError { msg: String },
}
