use std::{

    convert::{TryFrom},
    mem::{MaybeUninit},
    str::{FromStr},

    fmt::{

        Result as FmtResult,
        Formatter,
        Display,
    },

    time::{

        Duration,
        Instant,
    },

    net::{

        SocketAddrV6,
        SocketAddrV4,
        SocketAddr,
        ToSocketAddrs,
    },

    net::{

        Ipv6Addr,
        Ipv4Addr,
        IpAddr,
    },

    io::{ErrorKind as IoErrorKind},
};

use serde::{Serialize};

use socket2::{

    Protocol,
    Domain,
    Socket,
    Type,
};

use tracing::{

    debug,
    trace,
    warn,
};

use super::{

    packets::{

        EchoResponse,
        EchoRequest,
    },

    responses::{

        ProbeResult,
        Outcome,
        Reply,
    },

    error::{ProbeError},
};

/// Large enough for any echo or time exceeded reply including the IP header.
const RECEIVE_BUFFER_OCTETS: usize = 1280;

const SEQUENCE: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum IpVersion {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl IpVersion {
    fn open_socket(self) -> Result<Socket, ProbeError> {
        match self {

            IpVersion::V4 => {

                let source_address = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
                let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).map_err(|e| {
                    ProbeError::SocketCreateIcmpv4(e.to_string())
                })?;

                socket.bind(&(source_address.into())).map_err(|e| {
                    ProbeError::SocketBindIpv4(source_address.to_string(), e.to_string())
                })?;

                Ok(socket)
            }

            IpVersion::V6 => {

                let source_address = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0);
                let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6)).map_err(|e| {
                    ProbeError::SocketCreateIcmpv6(e.to_string())
                })?;

                socket.bind(&(source_address.into())).map_err(|e| {
                    ProbeError::SocketBindIpv6(source_address.to_string(), e.to_string())
                })?;

                Ok(socket)
            }
        }
    }

    fn set_hop_limit(self, socket: &Socket, hops: u32) -> Result<(), ProbeError> {
        match self {

            IpVersion::V4 => socket.set_ttl(hops).map_err(|e| {
                ProbeError::SocketSetMaxHopsIpv4(hops, e.to_string())
            }),

            IpVersion::V6 => socket.set_unicast_hops_v6(hops).map_err(|e| {
                ProbeError::SocketSetMaxHopsIpv6(hops, e.to_string())
            }),
        }
    }

    /// Literal addresses pass straight through, anything else goes to the
    /// system resolver. The first address of this family wins.
    pub(crate) fn resolve(self, destination: &str) -> Result<SocketAddr, ProbeError> {
        let mut addresses = (destination, 0).to_socket_addrs().map_err(|e| {
            ProbeError::ResolverIpLookup(destination.to_string(), e.to_string())
        })?;

        addresses.find(|address| match (self, address) {

            (IpVersion::V4, SocketAddr::V4(_)) => true,
            (IpVersion::V6, SocketAddr::V6(_)) => true,
            _ => false,

        }).ok_or_else(|| ProbeError::ResolverFamilyMismatch(destination.to_string(), {
            self.name()
        }))
    }

    fn echo_request<'a>(self, buffer: &'a mut [u8], idf: u16, seq: u16) -> Result<EchoRequest<'a>, ProbeError> {
        match self {

            IpVersion::V4 => EchoRequest::new_ipv4(buffer, idf, seq),
            IpVersion::V6 => EchoRequest::new_ipv6(buffer, idf, seq),
        }
    }

    /// Strips whatever the raw socket delivers ahead of the ICMP message.
    fn echo_response<'a>(self, datagram: &'a [u8]) -> Result<(EchoResponse<'a>, Option<u8>), ProbeError> {
        match self {

            IpVersion::V4 => EchoResponse::from_ipv4(datagram)
                .map(|(response, hop_limit)| (response, Some(hop_limit))),

            IpVersion::V6 => EchoResponse::from_ipv6(datagram)
                .map(|response| (response, None)),
        }
    }

    fn responder(self, address: &socket2::SockAddr) -> Result<IpAddr, ProbeError> {
        match self {

            IpVersion::V4 => Ok(IpAddr::V4(*(address.as_socket_ipv4()
                .ok_or(ProbeError::SocketReceiveNoIpv4)?.ip()))),

            IpVersion::V6 => Ok(IpAddr::V6(*(address.as_socket_ipv6()
                .ok_or(ProbeError::SocketReceiveNoIpv6)?.ip()))),
        }
    }

    fn send_error(self, reason: String) -> ProbeError {
        match self {

            IpVersion::V4 => ProbeError::SocketSendIcmpv4(reason),
            IpVersion::V6 => ProbeError::SocketSendIcmpv6(reason),
        }
    }

    fn name(self) -> &'static str {
        match self {

            IpVersion::V4 => "IPv4",
            IpVersion::V6 => "IPv6",
        }
    }
}

impl Display for IpVersion {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.name())
    }
}

impl TryFrom<u8> for IpVersion {
    type Error = ProbeError;

    fn try_from(version: u8) -> Result<IpVersion, ProbeError> {
        match version {

            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            x => Err(ProbeError::UnknownIpVersion(x.to_string())),
        }
    }
}

impl FromStr for IpVersion {
    type Err = ProbeError;

    fn from_str(version: &str) -> Result<IpVersion, ProbeError> {
        match version.trim().to_ascii_lowercase().as_str() {

            "4" | "v4" | "ipv4" => Ok(IpVersion::V4),
            "6" | "v6" | "ipv6" => Ok(IpVersion::V6),
            x => Err(ProbeError::UnknownIpVersion(x.to_string())),
        }
    }
}

/// Take a look at the default implementation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeRequest {

    pub destination: String,
    pub version: IpVersion,

    pub hop_limit: u32,
    pub timeout: Duration,
}

impl Default for ProbeRequest {
    fn default() -> ProbeRequest {
        ProbeRequest {

            destination: String::new(),
            version: IpVersion::V4,

            hop_limit: 64,
            timeout: {

                Duration::from_millis(1000)
            },
        }
    }
}

impl ProbeRequest {
    pub fn new<T: Into<String>>(destination: T) -> ProbeRequest {
        ProbeRequest {
            destination: destination.into(),
            ..Default::default()
        }
    }

    pub fn with_version(self, version: IpVersion) -> ProbeRequest {
        ProbeRequest { version, ..self }
    }

    pub fn with_hop_limit(self, hop_limit: u32) -> ProbeRequest {
        ProbeRequest { hop_limit, ..self }
    }

    pub fn with_timeout(self, timeout: Duration) -> ProbeRequest {
        ProbeRequest { timeout, ..self }
    }
}

/// Send one echo request and wait for whatever answers first.
///
/// Never fails, every problem along the way ends up in the returned result
/// as [`Outcome::Error`]. The socket is closed before this returns.
pub fn probe(request: &ProbeRequest) -> ProbeResult {
    debug!(destination = %request.destination, version = %request.version,
        hop_limit = request.hop_limit, "Probing");

    let result = inner_probe(request).unwrap_or_else(|error| {
        ProbeResult::failed(&(request.destination), None, error)
    });

    match result.outcome {

        Outcome::Error => warn!(destination = %result.target, kind = ?result.error,
            last_hop = ?result.last_hop, "Probe failed: {}", result.message),

        _ => debug!(destination = %result.target, outcome = ?result.outcome,
            last_hop = ?result.last_hop, rtt = ?result.round_trip_millis, "Probe answered"),
    }

    result
}

/// Probe over IPv4, timeout in milliseconds.
pub fn probe_v4(destination: &str, hop_limit: u32, timeout: u64) -> ProbeResult {
    probe(&(ProbeRequest::new(destination)
        .with_version(IpVersion::V4)
        .with_hop_limit(hop_limit)
        .with_timeout(Duration::from_millis(timeout))))
}

/// Probe over IPv6, timeout in milliseconds.
pub fn probe_v6(destination: &str, hop_limit: u32, timeout: u64) -> ProbeResult {
    probe(&(ProbeRequest::new(destination)
        .with_version(IpVersion::V6)
        .with_hop_limit(hop_limit)
        .with_timeout(Duration::from_millis(timeout))))
}

fn inner_probe(ProbeRequest { destination, version, hop_limit, timeout }: &ProbeRequest)
    -> Result<ProbeResult, ProbeError> {

    let version = *version;
    let socket = version.open_socket()?;

    version.set_hop_limit(&socket, *hop_limit)?;

    let target = version.resolve(destination)?;
    debug!(destination = %destination, address = %target, "Resolved");

    let mut buf: [u8; 64] = {
        [0; 64]
    };

    let identifier = (std::process::id() & 0xFFFF) as u16;
    let request = version.echo_request(&mut buf[..], identifier, SEQUENCE)?;
    trace!(request = ?request, identifier = identifier, "Echo request built");

    let timepoint = Instant::now();

    socket.send_to(request.as_slice(), &(target.into())).map_err(|e| {
        version.send_error(e.to_string())
    })?;

    let deadline = Instant::now().checked_add(*timeout).ok_or_else(|| {
        ProbeError::SocketSetReadTimeout(format!("timeout of {:?} out of range", timeout))
    })?;

    let mut buf: [MaybeUninit<u8>; RECEIVE_BUFFER_OCTETS] = {
        [MaybeUninit::uninit(); RECEIVE_BUFFER_OCTETS]
    };

    loop {

        let remaining = remaining_until(deadline, Instant::now(), *timeout)?;
        socket.set_read_timeout(Some(remaining)).map_err(|e| {
            ProbeError::SocketSetReadTimeout(e.to_string())
        })?;

        // The deadline alone decides when to give up, the read timeout may
        // fire a little early.
        let (size, responder) = match socket.recv_from(&mut buf[..]) {

            Ok(received) => received,

            Err(e) if matches!(e.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) => {
                trace!(error = %e, "Read timed out");
                continue
            }

            Err(e) => return Err(ProbeError::SocketReceive(e.to_string())),
        };

        let elapsed = timepoint.elapsed();
        let size = size.min(RECEIVE_BUFFER_OCTETS);

        // The kernel wrote `size` octets into the buffer.
        let datagram: &[u8] = unsafe {
            &*(&buf[..size] as *const [MaybeUninit<u8>] as *const [u8])
        };

        let address = version.responder(&responder)?;
        trace!(from = %address, size = size, datagram = ?datagram, "Datagram received");

        if let Some(result) = read_datagram(version, destination, datagram, address, elapsed) {
            break Ok(result)
        }

        trace!(from = %address, "Skipping looped back echo request");
    }
}

/// Time left for the next read. A zero read timeout means block forever,
/// so anything below a microsecond counts as expired.
fn remaining_until(deadline: Instant, now: Instant, timeout: Duration) -> Result<Duration, ProbeError> {
    let remaining = deadline.saturating_duration_since(now);
    if remaining.as_micros() == 0 {
        return Err(ProbeError::SocketReceiveTimeout(timeout.as_millis(), {
            "deadline reached".to_string()
        }))
    }

    Ok(remaining)
}

/// Turns one datagram into the final result, or `None` for our own request
/// looped back. Once a datagram is read its sender and timing are kept, even
/// when the body turns out malformed.
fn read_datagram(version: IpVersion, destination: &str, datagram: &[u8], address: IpAddr,
    elapsed: Duration) -> Option<ProbeResult> {

    let datagram = &(datagram[..datagram.len().min(RECEIVE_BUFFER_OCTETS)]);
    let reply = Reply {
        address: Some(address),
        hop_limit: None,
        elapsed: Some(elapsed),
    };

    match classify(version, datagram) {

        Ok(None) => None,

        Ok(Some((hop_limit, outcome, message))) => Some({
            ProbeResult::replied(destination, &(Reply { hop_limit, ..reply }), outcome, message)
        }),

        Err(error) => Some({
            ProbeResult::failed(destination, Some(&reply), error)
        }),
    }
}

fn classify(version: IpVersion, datagram: &[u8]) -> Result<Option<(Option<u8>, Outcome, String)>, ProbeError> {
    let (response, hop_limit) = version.echo_response(datagram)?;
    if response.is_request()? {
        return Ok(None)
    }

    let outcome = response.get_outcome()?;
    let message = match outcome {

        Outcome::Other => response.to_string(),
        _ => String::new(),
    };

    Ok(Some((hop_limit, outcome, message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request() {
        let request = ProbeRequest::new("example.org");

        assert_eq!(request.destination, "example.org");
        assert_eq!(request.version, IpVersion::V4);
        assert_eq!(request.hop_limit, 64);
        assert_eq!(request.timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_request_builder() {
        let request = ProbeRequest::new("::1")
            .with_version(IpVersion::V6)
            .with_hop_limit(1)
            .with_timeout(Duration::from_millis(250));

        assert_eq!(request.version, IpVersion::V6);
        assert_eq!(request.hop_limit, 1);
        assert_eq!(request.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_ip_version_parsing() {
        assert_eq!(IpVersion::try_from(4).unwrap(), IpVersion::V4);
        assert_eq!(IpVersion::try_from(6).unwrap(), IpVersion::V6);
        assert!(IpVersion::try_from(5).is_err());

        assert_eq!("6".parse::<IpVersion>().unwrap(), IpVersion::V6);
        assert_eq!("IPv4".parse::<IpVersion>().unwrap(), IpVersion::V4);
        assert!("ipx".parse::<IpVersion>().is_err());
    }

    #[test]
    fn test_ip_version_serializes_as_number_string() {
        assert_eq!(serde_json::to_value(IpVersion::V4).unwrap(), "4");
        assert_eq!(serde_json::to_value(IpVersion::V6).unwrap(), "6");
    }

    #[test]
    fn test_resolve_literals() {
        assert_eq!(IpVersion::V4.resolve("127.0.0.1").unwrap(), {
            SocketAddr::from(([127, 0, 0, 1], 0))
        });

        assert_eq!(IpVersion::V6.resolve("::1").unwrap().ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn test_resolve_family_mismatch() {
        match IpVersion::V6.resolve("127.0.0.1") {
            Err(ProbeError::ResolverFamilyMismatch(host, "IPv6")) => assert_eq!(host, "127.0.0.1"),
            other => panic!("unexpected: {:?}", other),
        }

        match IpVersion::V4.resolve("::1") {
            Err(ProbeError::ResolverFamilyMismatch(_, "IPv4")) => (),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_unknown_host() {
        let error = IpVersion::V4.resolve("no-such-host.invalid").unwrap_err();

        assert_eq!(error.kind(), crate::error::ErrorKind::Resolution);
        assert!(error.to_string().contains("no-such-host.invalid"));
    }

    fn ipv4_datagram(ttl: u8, icmp: &[u8]) -> Vec<u8> {
        let mut datagram = vec![0u8; 20];
        datagram[0] = 0x45;
        datagram[8] = ttl;
        datagram[9] = 1;
        datagram.extend_from_slice(icmp);
        datagram
    }

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn test_remaining_until_deadline() {
        let now = Instant::now();
        let timeout = Duration::from_millis(300);

        assert_eq!(remaining_until(now + timeout, now, timeout).unwrap(), timeout);

        match remaining_until(now, now, timeout) {
            Err(ProbeError::SocketReceiveTimeout(300, _)) => (),
            other => panic!("unexpected: {:?}", other),
        }

        let error = remaining_until(now, now + timeout, timeout).unwrap_err();
        assert_eq!(error.kind(), crate::error::ErrorKind::Receive);

        // Would round down to a zero timeval.
        assert!(remaining_until(now + Duration::from_nanos(500), now, timeout).is_err());
        assert!(remaining_until(now + Duration::from_micros(1), now, timeout).is_ok());
    }

    #[test]
    fn test_looped_back_requests_are_skipped() {
        let mut buf = [0u8; 64];
        let request = EchoRequest::new_ipv4(&mut buf, 0x0101, SEQUENCE).unwrap();
        let datagram = ipv4_datagram(64, request.as_slice());

        assert!(read_datagram(IpVersion::V4, "127.0.0.1", &datagram, localhost(), {
            Duration::from_micros(20)
        }).is_none());

        let mut buf = [0u8; 64];
        let request = EchoRequest::new_ipv6(&mut buf, 0x0101, SEQUENCE).unwrap();

        assert!(read_datagram(IpVersion::V6, "::1", request.as_slice(), {
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        }, Duration::from_micros(20)).is_none());
    }

    #[test]
    fn test_echo_reply_answers() {
        let datagram = ipv4_datagram(64, &[0, 0, 0, 0, 0x01, 0x01, 0, 1, b'i', b'c', b'm', b'p']);
        let result = read_datagram(IpVersion::V4, "localhost", &datagram, localhost(), {
            Duration::from_micros(51)
        }).unwrap();

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.target, "localhost");
        assert_eq!(result.last_hop, Some(localhost()));
        assert_eq!(result.observed_hop_limit, Some(64));
        assert_eq!(result.round_trip_millis.as_deref(), Some("0.051"));
        assert!(result.message.is_empty());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_ipv6_time_exceeded_has_no_hop_limit() {
        let router: IpAddr = "2001:db8::1".parse().unwrap();
        let result = read_datagram(IpVersion::V6, "2001:db8::99", &[3, 0, 0, 0, 0, 0, 0, 0], router, {
            Duration::from_millis(4)
        }).unwrap();

        assert_eq!(result.outcome, Outcome::TimeExceeded);
        assert_eq!(result.last_hop, Some(router));
        assert!(result.observed_hop_limit.is_none());
    }

    #[test]
    fn test_malformed_reply_keeps_last_hop_and_rtt() {
        let datagram = ipv4_datagram(60, &[0, 0]);
        let router: IpAddr = "192.0.2.254".parse().unwrap();

        let result = read_datagram(IpVersion::V4, "192.0.2.10", &datagram, router, {
            Duration::from_micros(1_500)
        }).unwrap();

        assert_eq!(result.outcome, Outcome::Error);
        assert_eq!(result.error, Some(crate::error::ErrorKind::Parse));
        assert_eq!(result.last_hop, Some(router));
        assert_eq!(result.round_trip_millis.as_deref(), Some("1.500"));
        assert!(result.observed_hop_limit.is_none());

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["lasthop"], "192.0.2.254");
        assert_eq!(value["rtt"], "1.500");
    }

    #[test]
    fn test_oversized_datagram_is_cut_to_buffer_size() {
        let mut datagram = ipv4_datagram(50, &[3, 1, 0, 0]);
        datagram.resize(1500, 0xEE);

        let result = read_datagram(IpVersion::V4, "192.0.2.10", &datagram, localhost(), {
            Duration::from_millis(2)
        }).unwrap();

        assert_eq!(result.outcome, Outcome::Other);

        let body = result.message.split("body: ").nth(1).unwrap();
        assert_eq!(body.matches(", ").count() + 1, RECEIVE_BUFFER_OCTETS - 20 - 4);
    }

    #[test]
    fn test_probe_never_panics_without_privileges() {
        // Depending on privileges this fails at socket setup or resolution,
        // never with a reply.
        let result = probe_v4("no-such-host.invalid", 64, 100);

        assert_eq!(result.outcome, Outcome::Error);
        assert_eq!(result.target, "no-such-host.invalid");
        assert!(!result.message.is_empty());
        assert!(result.observed_hop_limit.is_none());
        assert!(result.round_trip_millis.is_none());
        assert!(result.last_hop.is_none());
    }
}
