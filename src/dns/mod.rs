pub mod common;
pub mod enums;
pub mod header;
pub mod name;
pub mod question;
pub mod resource;

use bytes::BytesMut;
use common::{PacketComponent, WireReader};
use enums::{DNSRcode, DNSResourceType};
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use tracing::trace;

/// Largest message that fits behind a TCP length prefix.
pub const MAX_MSG_SIZE: usize = 65535;

/// Default buffer size for datagrams received by a UDP server.
pub const DEFAULT_UDP_SIZE: usize = 512;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
}

#[derive(Debug)]
pub enum ParseError {
    InvalidHeader,
    InvalidLabel,
    NameTooLong,
    PointerLoop,
    UnexpectedEnd,
    InvalidQuestionSection,
    TooManyRecords(usize),
    RdataTooLong(usize),
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidHeader => write!(f, "Invalid DNS header"),
            ParseError::InvalidLabel => write!(f, "Invalid DNS label"),
            ParseError::NameTooLong => write!(f, "DNS name too long"),
            ParseError::PointerLoop => write!(f, "Compression pointer loop"),
            ParseError::UnexpectedEnd => write!(f, "Unexpected end of message"),
            ParseError::InvalidQuestionSection => write!(f, "Invalid question section"),
            ParseError::TooManyRecords(n) => write!(f, "Too many records in section: {}", n),
            ParseError::RdataTooLong(n) => write!(f, "RDATA too long: {} bytes", n),
            ParseError::InvalidBitStream(e) => write!(f, "Invalid bit stream: {}", e),
        }
    }
}

impl std::error::Error for ParseError {}

impl DNSPacket {
    /// Query with a single question and the RD bit set.
    pub fn query(
        id: u16,
        qname: &str,
        qtype: DNSResourceType,
        qclass: enums::DNSResourceClass,
    ) -> Result<Self, ParseError> {
        Ok(DNSPacket {
            header: DNSHeader {
                id,
                rd: true,
                qdcount: 1,
                ..Default::default()
            },
            questions: vec![DNSQuestion::new(qname, qtype, qclass)?],
            ..Default::default()
        })
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        Self::parse_tracking(buf).map(|(packet, _)| packet)
    }

    /// Parses `buf` and also returns the offset at which the last
    /// additional record starts, if there is one.
    pub(crate) fn parse_tracking(buf: &[u8]) -> Result<(Self, Option<usize>), ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        let mut reader = WireReader::new(buf);
        let header = DNSHeader::read(&mut reader)?;
        let mut packet = DNSPacket {
            header,
            ..Default::default()
        };

        for _ in 0..packet.header.qdcount {
            packet.questions.push(DNSQuestion::read(&mut reader)?);
        }
        for _ in 0..packet.header.ancount {
            packet.answers.push(DNSResource::read(&mut reader)?);
        }
        for _ in 0..packet.header.nscount {
            packet.authorities.push(DNSResource::read(&mut reader)?);
        }
        let mut last_additional = None;
        for _ in 0..packet.header.arcount {
            last_additional = Some(reader.position());
            packet.resources.push(DNSResource::read(&mut reader)?);
        }

        Ok((packet, last_additional))
    }

    /// Encodes the message; section counts are taken from the sections
    /// themselves rather than from the header.
    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = BytesMut::with_capacity(512);
        let mut header = self.header.clone();
        header.qdcount = section_count(self.questions.len())?;
        header.ancount = section_count(self.answers.len())?;
        header.nscount = section_count(self.authorities.len())?;
        header.arcount = section_count(self.resources.len())?;
        header.write(&mut buf)?;

        for question in &self.questions {
            question.write(&mut buf)?;
        }
        for rr in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.resources)
        {
            rr.write(&mut buf)?;
        }
        Ok(buf.to_vec())
    }

    /// Empty reply echoing the request's ID, opcode, RD bit and question.
    pub fn reply_to(request: &DNSPacket) -> Self {
        DNSPacket {
            header: DNSHeader {
                id: request.header.id,
                qr: true,
                opcode: request.header.opcode,
                rd: request.header.rd,
                qdcount: request.questions.len() as u16,
                ..Default::default()
            },
            questions: request.questions.clone(),
            ..Default::default()
        }
    }

    pub fn with_rcode(request: &DNSPacket, rcode: u8) -> Self {
        let mut reply = Self::reply_to(request);
        reply.header.rcode = rcode;
        reply
    }

    /// FORMERR reply for an undecodable message. Needs at least a readable
    /// header to echo the ID; returns `None` otherwise.
    pub fn format_error(raw: &[u8]) -> Option<Self> {
        let mut reader = WireReader::new(raw);
        let header = DNSHeader::read(&mut reader).ok()?;
        Some(DNSPacket {
            header: DNSHeader {
                id: header.id,
                qr: true,
                opcode: header.opcode,
                rd: header.rd,
                rcode: DNSRcode::FORMERR,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    /// The TSIG record, which is only valid as the last additional record.
    pub fn tsig(&self) -> Option<&DNSResource> {
        self.resources
            .last()
            .filter(|rr| rr.rtype == DNSResourceType::TSIG)
    }
}

fn section_count(len: usize) -> Result<u16, ParseError> {
    u16::try_from(len).map_err(|_| ParseError::TooManyRecords(len))
}
