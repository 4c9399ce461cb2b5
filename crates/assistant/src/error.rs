use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("response missing {0}")]
    MissingField(&'static str),

    #[error("cloud provider disabled")]
    CloudDisabled,

    #[error("request timed out after {0} s")]
    Timeout(u64),
}
