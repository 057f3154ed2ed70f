use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
    Upstream,
    Decode,
    Graphics,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone)]
pub struct MapviewError {
    pub code: ErrorCode,
    pub message: String,
}

impl MapviewError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Upstream, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Decode, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn graphics(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Graphics, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for MapviewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for MapviewError {}

impl From<mapview_config::ConfigError> for MapviewError {
    fn from(err: mapview_config::ConfigError) -> Self {
        Self::new(ErrorCode::InvalidInput, err.to_string())
    }
}

impl From<image::ImageError> for MapviewError {
    fn from(err: image::ImageError) -> Self {
        Self::decode(err.to_string())
    }
}

pub type MapviewResult<T> = Result<T, MapviewError>;
