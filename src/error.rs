use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ImscoreError {
    #[error("candle_core error: {0}")]
    Candle(candle_core::Error),

    #[error("Image error: {0}")]
    Image(image::ImageError),

    #[error("IO Error: {0}")]
    Io(io::Error),

    #[error("hub error: {0}")]
    Hub(hf_hub::api::sync::ApiError),

    #[error("tokenizer error: {0}")]
    Tokenizer(tokenizers::Error),

    #[error("config error: {0}")]
    Config(serde_json::Error),

    #[error("model {0} not found")]
    UnknownModel(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("score of {0} is detached from the computation graph")]
    DetachedScore(String),

    #[error("Error: {0:?}")]
    Msg(String),
}

impl From<candle_core::Error> for ImscoreError {
    fn from(value: candle_core::Error) -> Self {
        ImscoreError::Candle(value)
    }
}

impl From<image::ImageError> for ImscoreError {
    fn from(value: image::ImageError) -> Self {
        ImscoreError::Image(value)
    }
}

impl From<io::Error> for ImscoreError {
    fn from(value: io::Error) -> Self {
        ImscoreError::Io(value)
    }
}

impl From<hf_hub::api::sync::ApiError> for ImscoreError {
    fn from(value: hf_hub::api::sync::ApiError) -> Self {
        ImscoreError::Hub(value)
    }
}

impl From<tokenizers::Error> for ImscoreError {
    fn from(value: tokenizers::Error) -> Self {
        ImscoreError::Tokenizer(value)
    }
}

impl From<serde_json::Error> for ImscoreError {
    fn from(value: serde_json::Error) -> Self {
        ImscoreError::Config(value)
    }
}

pub type Result<T> = std::result::Result<T, ImscoreError>;
