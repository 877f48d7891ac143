//! Error taxonomy for the kernel query pipeline.
//!
//! Every stage returns its failure up the call chain as a variant here;
//! nothing terminates the process. Diagnostic detail (status codes, remote
//! tracebacks, decode stage) travels inside the variant so a caller can
//! report a query failure without consulting logs.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Which half of the dual-base64 payload a decode/parse failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Data,
    TimeColumns,
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Data => write!(f, "data"),
            Segment::TimeColumns => write!(f, "time-columns"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("kernel creation failed (status {status}): {detail}")]
    SessionCreate { status: u16, detail: String },

    #[error("kernel deletion failed (status {status}): {detail}")]
    SessionDelete { status: u16, detail: String },

    #[error("channel connect failed: {0}")]
    ChannelConnect(String),

    #[error("no terminating message within {elapsed:?}")]
    ChannelTimeout { elapsed: std::time::Duration },

    #[error("remote execution failed:\n{}", traceback.join("\n"))]
    RemoteExecution { traceback: Vec<String> },

    #[error("malformed result payload: {0}")]
    ResultFormat(String),

    #[error("base64 decode failed in {segment} segment: {source}")]
    ResultDecode {
        segment: Segment,
        #[source]
        source: base64::DecodeError,
    },

    #[error("JSON parse failed in {segment} segment: {source}")]
    ResultParse {
        segment: Segment,
        #[source]
        source: serde_json::Error,
    },

    #[error("column '{column}' cannot be typed: {detail}")]
    ColumnTypeMismatch { column: String, detail: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The query failed and the follow-up session deletion failed too.
    /// Both causes are carried so cleanup never masks the original error.
    #[error("query failed: {query}; session cleanup also failed: {cleanup}")]
    Cleanup { query: Box<Error>, cleanup: Box<Error> },
}
