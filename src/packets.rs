use std::{

    fmt::{

        Result as FmtResult,
        Formatter,
        Display,
        Debug,
    },

    io::{

        Cursor,
        Write,
    },
};

use super::{

    responses::{Outcome},
    error::{ProbeError},
};

use byteorder::{

    WriteBytesExt,
    ReadBytesExt,
    BigEndian,
};

pub(crate) const PAYLOAD_V4: &[u8] = b"icmp";
pub(crate) const PAYLOAD_V6: &[u8] = b"icmp6";

/// Type, code and checksum, shared by every ICMP message.
const ICMP_HEADER_OCTETS: usize = 4;

/// Offset of the TTL octet within an IPv4 header.
const IPV4_TTL_OFFSET: usize = 8;

/// An IHL of 5, the header without options.
const IPV4_HEADER_MIN_OCTETS: usize = 20;

fn checksum_v4(data: &[u8]) -> u16 {
    let mut sum: u32 = data.chunks(2).map(|chunk| u32::from(match chunk {

        &[a, b] => u16::from_be_bytes([a, b]),
        _ => u16::from_be_bytes([chunk[0], 0]),

    })).sum();

    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }

    !(sum as u16)
}

pub(crate) enum EchoRequest<'a> {
    V4(&'a [u8]),
    V6(&'a [u8]),
}

impl<'a> EchoRequest<'a> {
    pub fn new_ipv4(buffer: &'a mut [u8], idf: u16, seq: u16) -> Result<EchoRequest<'a>, ProbeError> {
        let mut cursor = Cursor::new(buffer);

        cursor.write_u8(8).map_err(|e| {
            ProbeError::RequestWriteIcmpv4Field("type", e.to_string())
        })?;

        cursor.write_u8(0).map_err(|e| {
            ProbeError::RequestWriteIcmpv4Field("code", e.to_string())
        })?;

        cursor.write_u16::<BigEndian>(0).map_err(|e| {
            ProbeError::RequestWriteIcmpv4Field("checksum placeholder", e.to_string())
        })?;

        cursor.write_u16::<BigEndian>(idf).map_err(|e| {
            ProbeError::RequestWriteIcmpv4Field("identifier", e.to_string())
        })?;

        cursor.write_u16::<BigEndian>(seq).map_err(|e| {
            ProbeError::RequestWriteIcmpv4Field("sequence", e.to_string())
        })?;

        cursor.write_all(PAYLOAD_V4).map_err(|e| {
            ProbeError::RequestWritePayload(e.to_string())
        })?;

        let length = cursor.position() as usize;
        let checksum = checksum_v4(&(cursor.get_ref()[..length]));

        cursor.set_position(2);
        cursor.write_u16::<BigEndian>(checksum).map_err(|e| {
            ProbeError::RequestWriteIcmpv4Field("checksum", e.to_string())
        })?;

        let buffer: &'a [u8] = cursor.into_inner();

        Ok(EchoRequest::V4({
            &(buffer[..length])
        }))
    }

    /// The checksum stays zero, raw ICMPv6 sockets have the kernel fill it
    /// in since it covers the pseudo-header.
    pub fn new_ipv6(buffer: &'a mut [u8], idf: u16, seq: u16) -> Result<EchoRequest<'a>, ProbeError> {
        let mut cursor = Cursor::new(buffer);

        cursor.write_u8(128).map_err(|e| {
            ProbeError::RequestWriteIcmpv6Field("type", e.to_string())
        })?;

        cursor.write_u8(0).map_err(|e| {
            ProbeError::RequestWriteIcmpv6Field("code", e.to_string())
        })?;

        cursor.write_u16::<BigEndian>(0).map_err(|e| {
            ProbeError::RequestWriteIcmpv6Field("checksum", e.to_string())
        })?;

        cursor.write_u16::<BigEndian>(idf).map_err(|e| {
            ProbeError::RequestWriteIcmpv6Field("identifier", e.to_string())
        })?;

        cursor.write_u16::<BigEndian>(seq).map_err(|e| {
            ProbeError::RequestWriteIcmpv6Field("sequence", e.to_string())
        })?;

        cursor.write_all(PAYLOAD_V6).map_err(|e| {
            ProbeError::RequestWritePayload(e.to_string())
        })?;

        let length = cursor.position() as usize;
        let buffer: &'a [u8] = cursor.into_inner();

        Ok(EchoRequest::V6({
            &(buffer[..length])
        }))
    }

    pub fn as_slice(&self) -> &'a [u8] {
        match self {

            Self::V4(buffer) | Self::V6(buffer) => buffer
        }
    }
}

impl<'a> Debug for EchoRequest<'a> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {

            Self::V4(buffer) => fmt.debug_tuple("EchoRequest::V4")
                .field(buffer)
                .finish(),

            Self::V6(buffer) => fmt.debug_tuple("EchoRequest::V6")
                .field(buffer)
                .finish(),
        }
    }
}

/// An ICMP message as read from a raw socket, IP header already stripped.
pub(crate) enum EchoResponse<'a> {
    V4(&'a [u8]),
    V6(&'a [u8]),
}

impl<'a> EchoResponse<'a> {

    /// Raw ICMPv4 sockets hand over the IP header as well, its TTL is the hop
    /// limit the reply arrived with.
    pub fn from_ipv4(datagram: &'a [u8]) -> Result<(EchoResponse<'a>, u8), ProbeError> {
        let mut cursor = Cursor::new(datagram);
        let header_octets = ((cursor.read_u8().map_err(|e| {
            ProbeError::ResponseReadField("internet protocol header size", e.to_string())
        })? & 0x0F) * 4) as usize;

        if header_octets < IPV4_HEADER_MIN_OCTETS {
            return Err(ProbeError::ResponseReadField("internet protocol header size", {
                format!("{} octets, below the minimum of {}", header_octets, IPV4_HEADER_MIN_OCTETS)
            }))
        }

        cursor.set_position(IPV4_TTL_OFFSET as u64);
        let hop_limit = cursor.read_u8().map_err(|e| {
            ProbeError::ResponseReadField("time to live", e.to_string())
        })?;

        if datagram.len() < (header_octets + ICMP_HEADER_OCTETS) {
            return Err(ProbeError::ResponseTruncated({
                header_octets + ICMP_HEADER_OCTETS
            }, datagram.len()))
        }

        Ok((EchoResponse::V4(&(datagram[header_octets..])), hop_limit))
    }

    pub fn from_ipv6(datagram: &'a [u8]) -> Result<EchoResponse<'a>, ProbeError> {
        if datagram.len() < ICMP_HEADER_OCTETS {
            return Err(ProbeError::ResponseTruncated({
                ICMP_HEADER_OCTETS
            }, datagram.len()))
        }

        Ok(EchoResponse::V6(datagram))
    }

    /// Type, code and checksum.
    pub fn get_header(&self) -> Result<(u8, u8, u16), ProbeError> {
        match self {

            Self::V4(buffer) | Self::V6(buffer) => {
                let mut cursor = Cursor::new(buffer);

                let kind = cursor.read_u8().map_err(|e| {
                    ProbeError::ResponseReadField("type", e.to_string())
                })?;

                let code = cursor.read_u8().map_err(|e| {
                    ProbeError::ResponseReadField("code", e.to_string())
                })?;

                let checksum = cursor.read_u16::<BigEndian>().map_err(|e| {
                    ProbeError::ResponseReadField("checksum", e.to_string())
                })?;

                Ok((kind, code, checksum))
            }
        }
    }

    pub fn get_body(&self) -> &'a [u8] {
        match self {

            Self::V4(buffer) | Self::V6(buffer) => {
                buffer.get(ICMP_HEADER_OCTETS..)
                    .unwrap_or(&[])
            }
        }
    }

    /// Our own request looped back by the kernel, not an answer to it.
    pub fn is_request(&self) -> Result<bool, ProbeError> {
        match self {

            Self::V4(_) => Ok(self.get_header()?.0 == 8),
            Self::V6(_) => Ok(self.get_header()?.0 == 128),
        }
    }

    pub fn get_outcome(&self) -> Result<Outcome, ProbeError> {
        let outcome = match (self, self.get_header()?.0) {

            (Self::V4(_), 0) => Outcome::Success,
            (Self::V4(_), 11) => Outcome::TimeExceeded,

            (Self::V6(_), 129) => Outcome::Success,
            (Self::V6(_), 3) => Outcome::TimeExceeded,

            _ => Outcome::Other,
        };

        Ok(outcome)
    }
}

impl<'a> Display for EchoResponse<'a> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let family = match self {

            Self::V4(_) => "icmpv4",
            Self::V6(_) => "icmpv6",
        };

        match self.get_header() {

            Ok((kind, code, checksum)) => write!(fmt,
                "{} reply, type: {}, code: {}, checksum: {:#06x}, body: {:02x?}",
                family, kind, code, checksum, self.get_body()
            ),

            Err(_) => write!(fmt, "{} reply, malformed", family),
        }
    }
}

impl<'a> Debug for EchoResponse<'a> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("EchoResponse")
            .field("header", &(self.get_header()))
            .field("body", &(self.get_body()))
            .finish()
    }
}
