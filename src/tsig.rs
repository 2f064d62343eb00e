//! TSIG (Transaction Signature) records and MAC primitives
//!
//! Implements the RFC 8945 digest layout, including request-MAC chaining
//! and the timers-only variables used for subsequent messages of a
//! multi-message exchange.

use crate::dns::{
    DNSPacket,
    common::{WireReader, write_labels},
    enums::{DNSResourceClass, DNSResourceType},
    name,
    resource::DNSResource,
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::{BufMut, BytesMut};
use ring::hmac;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Fudge used when a caller does not pick one
pub const DEFAULT_FUDGE: u16 = 300;

/// TSIG algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsigAlgorithm {
    HmacSha1,
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl TsigAlgorithm {
    /// Get the algorithm name as used in DNS
    pub fn name(&self) -> &'static str {
        match self {
            TsigAlgorithm::HmacSha1 => "hmac-sha1.",
            TsigAlgorithm::HmacSha256 => "hmac-sha256.",
            TsigAlgorithm::HmacSha384 => "hmac-sha384.",
            TsigAlgorithm::HmacSha512 => "hmac-sha512.",
        }
    }

    fn hmac_algorithm(&self) -> hmac::Algorithm {
        match self {
            TsigAlgorithm::HmacSha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            TsigAlgorithm::HmacSha256 => hmac::HMAC_SHA256,
            TsigAlgorithm::HmacSha384 => hmac::HMAC_SHA384,
            TsigAlgorithm::HmacSha512 => hmac::HMAC_SHA512,
        }
    }

    /// Parse algorithm from name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim_end_matches('.').to_ascii_lowercase().as_str() {
            "hmac-sha1" => Some(TsigAlgorithm::HmacSha1),
            "hmac-sha256" => Some(TsigAlgorithm::HmacSha256),
            "hmac-sha384" => Some(TsigAlgorithm::HmacSha384),
            "hmac-sha512" => Some(TsigAlgorithm::HmacSha512),
            _ => None,
        }
    }
}

/// TSIG-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TsigError {
    #[error("TSIG key not found: {0}")]
    UnknownKey(String),
    #[error("Unknown TSIG algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("TSIG signature verification failed")]
    BadSignature,
    #[error("TSIG time skew too large: {0} seconds")]
    BadTime(i64),
    #[error("Invalid TSIG format: {0}")]
    InvalidFormat(String),
    #[error("TSIG secret decode error: {0}")]
    DecodeError(String),
    #[error("message carries no TSIG record")]
    Missing,
}

pub type TsigResult<T> = Result<T, TsigError>;

/// Shared secrets by key name. Names are stored lowercase and fully
/// qualified; secrets are base64 encoded.
#[derive(Debug, Clone, Default)]
pub struct TsigSecrets {
    keys: HashMap<String, String>,
}

impl TsigSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key_name: &str, secret: impl Into<String>) {
        self.keys.insert(normalize_key_name(key_name), secret.into());
    }

    pub fn get(&self, key_name: &str) -> Option<&str> {
        self.keys
            .get(&normalize_key_name(key_name))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl From<HashMap<String, String>> for TsigSecrets {
    fn from(map: HashMap<String, String>) -> Self {
        let mut secrets = TsigSecrets::new();
        for (name, secret) in map {
            secrets.insert(&name, secret);
        }
        secrets
    }
}

fn normalize_key_name(name: &str) -> String {
    name::fqdn(name).to_ascii_lowercase()
}

/// Parsed TSIG RDATA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsigRecord {
    /// Algorithm name in presentation form, e.g. `hmac-sha256.`
    pub algorithm: String,
    /// Seconds since the epoch; 48 bits on the wire
    pub time_signed: u64,
    pub fudge: u16,
    pub mac: Vec<u8>,
    pub original_id: u16,
    pub error: u16,
    pub other_data: Vec<u8>,
}

impl TsigRecord {
    /// Unsigned record to attach to a message before it is written. A zero
    /// `time_signed` is replaced with the current time when signing.
    pub fn placeholder(algorithm: TsigAlgorithm, fudge: u16) -> Self {
        Self {
            algorithm: algorithm.name().to_string(),
            time_signed: 0,
            fudge,
            mac: Vec::new(),
            original_id: 0,
            error: 0,
            other_data: Vec::new(),
        }
    }

    pub fn parse(rdata: &[u8]) -> TsigResult<Self> {
        let invalid = |e: crate::dns::ParseError| TsigError::InvalidFormat(e.to_string());
        let mut reader = WireReader::new(rdata);

        let algorithm = name::to_presentation(&reader.read_labels().map_err(invalid)?);
        let time_high = reader.read_u16().map_err(invalid)? as u64;
        let time_low = reader.read_u32().map_err(invalid)? as u64;
        let fudge = reader.read_u16().map_err(invalid)?;
        let mac_size = reader.read_u16().map_err(invalid)? as usize;
        let mac = reader.read_slice(mac_size).map_err(invalid)?.to_vec();
        let original_id = reader.read_u16().map_err(invalid)?;
        let error = reader.read_u16().map_err(invalid)?;
        let other_len = reader.read_u16().map_err(invalid)? as usize;
        let other_data = reader.read_slice(other_len).map_err(invalid)?.to_vec();

        Ok(TsigRecord {
            algorithm,
            time_signed: (time_high << 32) | time_low,
            fudge,
            mac,
            original_id,
            error,
            other_data,
        })
    }

    pub fn to_rdata(&self) -> TsigResult<Vec<u8>> {
        let labels = name::parse_presentation(&self.algorithm)
            .map_err(|e| TsigError::InvalidFormat(e.to_string()))?;
        let mut rdata = BytesMut::new();
        write_labels(&labels, &mut rdata).map_err(|e| TsigError::InvalidFormat(e.to_string()))?;
        rdata.put_slice(&self.time_signed.to_be_bytes()[2..]);
        rdata.put_u16(self.fudge);
        rdata.put_u16(field_len("MAC", &self.mac)?);
        rdata.put_slice(&self.mac);
        rdata.put_u16(self.original_id);
        rdata.put_u16(self.error);
        rdata.put_u16(field_len("other data", &self.other_data)?);
        rdata.put_slice(&self.other_data);
        Ok(rdata.to_vec())
    }

    /// Wraps the record in a TSIG resource owned by `key_name`.
    pub fn to_resource(&self, key_name: &str) -> TsigResult<DNSResource> {
        let labels = name::parse_presentation(key_name)
            .map_err(|e| TsigError::InvalidFormat(e.to_string()))?;
        Ok(DNSResource {
            labels,
            rtype: DNSResourceType::TSIG,
            rclass: DNSResourceClass::ANY,
            ttl: 0,
            rdata: self.to_rdata()?,
        })
    }

    fn algorithm(&self) -> TsigResult<TsigAlgorithm> {
        TsigAlgorithm::from_name(&self.algorithm)
            .ok_or_else(|| TsigError::UnknownAlgorithm(self.algorithm.clone()))
    }
}

fn field_len(field: &str, bytes: &[u8]) -> TsigResult<u16> {
    u16::try_from(bytes.len())
        .map_err(|_| TsigError::InvalidFormat(format!("{} too long: {} bytes", field, bytes.len())))
}

/// Signs `msg`, whose last additional record must be a TSIG placeholder,
/// and returns the wire bytes together with the new MAC. A non-empty
/// `request_mac` is chained into the digest.
pub fn generate(
    msg: &DNSPacket,
    secret: &str,
    request_mac: &[u8],
    timers_only: bool,
) -> TsigResult<(Vec<u8>, Vec<u8>)> {
    let tsig_rr = msg.tsig().ok_or(TsigError::Missing)?;
    let mut record = TsigRecord::parse(&tsig_rr.rdata)?;
    let algorithm = record.algorithm()?;
    let key = hmac::Key::new(algorithm.hmac_algorithm(), &decode_secret(secret)?);

    if record.time_signed == 0 {
        record.time_signed = now_secs();
    }
    record.original_id = msg.header.id;

    let mut unsigned = msg.clone();
    unsigned.resources.pop();
    let body = unsigned
        .serialize()
        .map_err(|e| TsigError::InvalidFormat(format!("Failed to serialize packet: {}", e)))?;

    let data = digest_input(request_mac, &body, &tsig_rr.labels, &record, timers_only);
    record.mac = hmac::sign(&key, &data).as_ref().to_vec();

    let mut signed = unsigned;
    signed.resources.push(DNSResource {
        rdata: record.to_rdata()?,
        ..tsig_rr.clone()
    });
    let wire = signed
        .serialize()
        .map_err(|e| TsigError::InvalidFormat(format!("Failed to serialize packet: {}", e)))?;

    debug!("Signed message id={} with key {}", msg.header.id, tsig_rr.name());
    Ok((wire, record.mac))
}

/// Verifies the trailing TSIG of the raw message `raw`.
pub fn verify(raw: &[u8], secret: &str, request_mac: &[u8], timers_only: bool) -> TsigResult<()> {
    let (packet, offset) = DNSPacket::parse_tracking(raw)
        .map_err(|e| TsigError::InvalidFormat(e.to_string()))?;
    let tsig_rr = packet.tsig().ok_or(TsigError::Missing)?;
    let offset = offset.ok_or(TsigError::Missing)?;
    let record = TsigRecord::parse(&tsig_rr.rdata)?;
    let algorithm = record.algorithm()?;
    let key = hmac::Key::new(algorithm.hmac_algorithm(), &decode_secret(secret)?);

    // The digest covers the message as it was before signing.
    let mut body = raw[..offset].to_vec();
    body[0..2].copy_from_slice(&record.original_id.to_be_bytes());
    let arcount = packet.header.arcount - 1;
    body[10..12].copy_from_slice(&arcount.to_be_bytes());

    let data = digest_input(request_mac, &body, &tsig_rr.labels, &record, timers_only);
    if hmac::verify(&key, &data, &record.mac).is_err() {
        warn!("TSIG MAC verification failed for key {}", tsig_rr.name());
        return Err(TsigError::BadSignature);
    }

    let skew = now_secs() as i64 - record.time_signed as i64;
    if skew.abs() > record.fudge as i64 {
        warn!("TSIG time skew too large: {} seconds", skew);
        return Err(TsigError::BadTime(skew));
    }
    Ok(())
}

fn digest_input(
    request_mac: &[u8],
    message: &[u8],
    key_labels: &[Vec<u8>],
    record: &TsigRecord,
    timers_only: bool,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(message.len() + 128);
    if !request_mac.is_empty() {
        data.put_u16(request_mac.len() as u16);
        data.put_slice(request_mac);
    }
    data.put_slice(message);

    if !timers_only {
        data.put_slice(&name::canonical_wire(key_labels));
        data.put_u16(u16::from(DNSResourceClass::ANY));
        data.put_u32(0);
        let algorithm = name::parse_presentation(&record.algorithm).unwrap_or_default();
        data.put_slice(&name::canonical_wire(&algorithm));
    }
    data.put_slice(&record.time_signed.to_be_bytes()[2..]);
    data.put_u16(record.fudge);
    if !timers_only {
        data.put_u16(record.error);
        data.put_u16(record.other_data.len() as u16);
        data.put_slice(&record.other_data);
    }
    data
}

fn decode_secret(secret: &str) -> TsigResult<Vec<u8>> {
    BASE64
        .decode(secret)
        .map_err(|e| TsigError::DecodeError(e.to_string()))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
