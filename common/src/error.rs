use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("offset {offset} is outside the {len}-byte store")]
    OutOfBounds { offset: usize, len: usize },
    #[error("store backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
#[error("relay output failure: {0}")]
pub struct OutputError(pub String);

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
}
