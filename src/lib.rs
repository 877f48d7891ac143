//! kernelq: run Python on a remote, ephemeral Jupyter kernel and get
//! strongly-typed columns back.
//!
//! The pipeline per query: [`kernel::SessionClient`] provisions a kernel,
//! [`channel::ExecutionChannel`] ships code over the kernel's WebSocket and
//! demultiplexes the reply stream, [`decode`] unpacks the dual-base64
//! result payload, [`frame`] types the columns, and [`query::run_query`]
//! sequences the lot with guaranteed session cleanup.

pub mod channel;
pub mod config;
pub mod decode;
pub mod error;
pub mod frame;
pub mod kernel;
pub mod query;

pub use config::{Config, ConnectionSettings};
pub use decode::ResultBundle;
pub use error::{Error, Result};
pub use frame::{Column, ColumnType, ColumnValues};
pub use kernel::Session;
pub use query::{run_query, QuerySpec};
