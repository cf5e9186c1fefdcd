use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MurmurError {
    #[error("Invalid identity: {0:?}")]
    InvalidIdentity(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ContentError {
    #[error("Message text or image required")]
    Empty,

    #[error("Message text too long: {len} chars (max {max})")]
    TextTooLong { len: usize, max: usize },
}
