use crate::modbus_frame::FrameError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised by the register store, the update loop and the protocol server
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("{count} registers from index {start} exceed table of {size} registers")]
    OutOfRange { start: u16, count: u16, size: usize },

    #[error("unsupported function code 0x{0:02X}")]
    UnsupportedOperation(u8),

    #[error("register store temporarily unavailable")]
    TransientStoreUnavailable,

    #[error("cannot listen on {addr}: {source}")]
    ListenFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot resolve listen host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
