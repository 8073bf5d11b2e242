//! Error kinds surfaced at the API boundary.
//!
//! Ingress paths never propagate these: malformed, truncated, or
//! checksum-failing packets are logged and dropped (see each layer's
//! `input`/`process_incoming` function). `NetError` is only returned from
//! user-facing calls (`Device::register`, `udp_*`, `tcp_*`, `ip_output`, ...).

use thiserror::Error;

/// Error kinds surfaced at the API boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    #[error("no route to host")]
    NoRoute,
    #[error("a source address is required for broadcast destinations")]
    SourceRequired,
    #[error("source address does not belong to the outgoing interface")]
    BadSource,
    #[error("payload too long for the outgoing interface's MTU")]
    TooLong,
    #[error("local address and port already in use")]
    PortInUse,
    #[error("no control block for the given id")]
    PcbNotFound,
    #[error("operation is not valid in the control block's current state")]
    InvalidState,
    #[error("blocking call interrupted by shutdown")]
    Interrupted,
    #[error("connection attempt failed")]
    OpenFailed,
    #[error("control block pool exhausted")]
    ResourceExhausted,
    #[error("malformed packet")]
    Malformed,
    #[error("device is down or does not exist")]
    DeviceDown,
    #[error("payload exceeds device MTU")]
    Mtu,
}

pub type NetResult<T> = Result<T, NetError>;
