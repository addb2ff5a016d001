use serde::{Deserialize, Serialize};

pub const INVALID_INPUT: &str = "Invalid input data";
pub const INTERNAL_ERROR: &str = "Internal Server Error";
pub const TIMED_OUT: &str = "Request timed out";

/// JSON body of every non-streaming error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthBody {
    pub status: String,
}

impl HealthBody {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
