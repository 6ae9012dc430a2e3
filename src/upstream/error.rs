use std::fmt;

/// Failure kinds of a single upstream fetch.
///
/// Cloneable so one outcome can be handed to every caller waiting on the
/// same in-flight fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// Request could not be sent or no response arrived
    Unavailable(String),
    /// Response arrived but its body could not be read
    ReadFailed(String),
    /// Body is not a JSON object
    Malformed(String),
    /// `last_changed` is missing or not RFC3339
    TimestampInvalid(String),
}

impl UpstreamError {
    /// Short stable name of the error kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Unavailable(_) => "upstream_unavailable",
            UpstreamError::ReadFailed(_) => "upstream_read_failed",
            UpstreamError::Malformed(_) => "upstream_malformed",
            UpstreamError::TimestampInvalid(_) => "upstream_timestamp_invalid",
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Unavailable(e) => write!(f, "upstream unavailable: {}", e),
            UpstreamError::ReadFailed(e) => {
                write!(f, "failed to read upstream response body: {}", e)
            }
            UpstreamError::Malformed(e) => write!(f, "upstream body is not a JSON object: {}", e),
            UpstreamError::TimestampInvalid(value) => {
                write!(f, "invalid last_changed timestamp '{}': expected RFC3339", value)
            }
        }
    }
}

impl std::error::Error for UpstreamError {}
