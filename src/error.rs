use serde::{Serialize};
use thiserror::{Error};

/// Stage of the probe that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Setup,
    Resolution,
    Serialization,
    Transmission,
    Receive,
    Parse,
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Unknown internet protocol version '{0}', expected 4 or 6")]
    UnknownIpVersion(String),
    #[error("Failed to create socket, reason: {0}")]
    SocketCreateIcmpv4(String),
    #[error("Failed to create socket, reason: {0}")]
    SocketCreateIcmpv6(String),
    #[error("Socket failed binding to address '{0}', reason: {1}")]
    SocketBindIpv4(String, String),
    #[error("Socket failed binding to address '{0}', reason: {1}")]
    SocketBindIpv6(String, String),
    #[error("Could not set sockets max hops to {0}, reason: {1}")]
    SocketSetMaxHopsIpv4(u32, String),
    #[error("Could not set sockets max hops to {0}, reason: {1}")]
    SocketSetMaxHopsIpv6(u32, String),
    #[error("Could not set sockets read timeout, reason: {0}")]
    SocketSetReadTimeout(String),
    #[error("Socket send, reason: {0}")]
    SocketSendIcmpv4(String),
    #[error("Socket send, reason: {0}")]
    SocketSendIcmpv6(String),
    #[error("Socket receive timed out after {0} ms, reason: {1}")]
    SocketReceiveTimeout(u128, String),
    #[error("Socket receive, reason: {0}")]
    SocketReceive(String),
    #[error("Socket returned no address for responder.")]
    SocketReceiveNoIpv4,
    #[error("Socket returned no address for responder.")]
    SocketReceiveNoIpv6,
    #[error("Failed to write Icmpv4 request field '{0}', reason: {1}")]
    RequestWriteIcmpv4Field(&'static str, String),
    #[error("Failed to write Icmpv6 request field '{0}', reason: {1}")]
    RequestWriteIcmpv6Field(&'static str, String),
    #[error("Failed to write request payload, reason: {0}")]
    RequestWritePayload(String),
    #[error("Failed to read response field '{0}', reason: {1}")]
    ResponseReadField(&'static str, String),
    #[error("Response truncated, expected at least {0} octets but got {1}")]
    ResponseTruncated(usize, usize),
    #[error("Failed to resolve address for hostname: '{0}', reason: {1}")]
    ResolverIpLookup(String, String),
    #[error("Failed to resolve address for hostname: '{0}', reason: no {1} address")]
    ResolverFamilyMismatch(String, &'static str),
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {

            Self::UnknownIpVersion(_) |
            Self::SocketCreateIcmpv4(_) |
            Self::SocketCreateIcmpv6(_) |
            Self::SocketBindIpv4(..) |
            Self::SocketBindIpv6(..) |
            Self::SocketSetMaxHopsIpv4(..) |
            Self::SocketSetMaxHopsIpv6(..) => ErrorKind::Setup,

            Self::ResolverIpLookup(..) |
            Self::ResolverFamilyMismatch(..) => ErrorKind::Resolution,

            Self::RequestWriteIcmpv4Field(..) |
            Self::RequestWriteIcmpv6Field(..) |
            Self::RequestWritePayload(_) => ErrorKind::Serialization,

            Self::SocketSendIcmpv4(_) |
            Self::SocketSendIcmpv6(_) => ErrorKind::Transmission,

            Self::SocketSetReadTimeout(_) |
            Self::SocketReceiveTimeout(..) |
            Self::SocketReceive(_) |
            Self::SocketReceiveNoIpv4 |
            Self::SocketReceiveNoIpv6 => ErrorKind::Receive,

            Self::ResponseReadField(..) |
            Self::ResponseTruncated(..) => ErrorKind::Parse,
        }
    }
}
