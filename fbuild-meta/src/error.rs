use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("YAML parsing failed: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("Formula error: {0}")]
    Formula(String),

    #[error("Unknown platform tag: {0}")]
    UnknownTag(String),
}

pub type Result<T> = std::result::Result<T, Error>;
