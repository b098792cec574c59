use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown chat type: {0}")]
    UnknownChatType(String),
}
