use bytes::{BufMut, BytesMut};

use super::{
    ParseError,
    common::{PacketComponent, WireReader, write_labels},
    enums::{DNSResourceClass, DNSResourceType},
    name,
};

/// A resource record with opaque RDATA.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSResource {
    pub labels: Vec<Vec<u8>>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DNSResource {
    pub fn name(&self) -> String {
        name::to_presentation(&self.labels)
    }

    /// TXT record with one character-string per entry in `texts`.
    pub fn txt(
        labels: Vec<Vec<u8>>,
        rclass: DNSResourceClass,
        ttl: u32,
        texts: &[&str],
    ) -> Self {
        let mut rdata = Vec::new();
        for text in texts {
            let bytes = text.as_bytes();
            if bytes.is_empty() {
                rdata.push(0);
            }
            for chunk in bytes.chunks(255) {
                rdata.push(chunk.len() as u8);
                rdata.extend_from_slice(chunk);
            }
        }
        Self {
            labels,
            rtype: DNSResourceType::TXT,
            rclass,
            ttl,
            rdata,
        }
    }
}

impl PacketComponent for DNSResource {
    fn write(&self, buf: &mut BytesMut) -> Result<(), ParseError> {
        if self.rdata.len() > u16::MAX as usize {
            return Err(ParseError::RdataTooLong(self.rdata.len()));
        }
        write_labels(&self.labels, buf)?;
        buf.put_u16(self.rtype.into());
        buf.put_u16(self.rclass.into());
        buf.put_u32(self.ttl);
        buf.put_u16(self.rdata.len() as u16);
        buf.put_slice(&self.rdata);
        Ok(())
    }

    fn read(reader: &mut WireReader<'_>) -> Result<Self, ParseError> {
        let labels = reader.read_labels()?;
        let rtype = reader.read_u16()?.into();
        let rclass = reader.read_u16()?.into();
        let ttl = reader.read_u32()?;
        let rdlength = reader.read_u16()? as usize;
        let rdata = reader.read_slice(rdlength)?.to_vec();
        Ok(DNSResource {
            labels,
            rtype,
            rclass,
            ttl,
            rdata,
        })
    }
}
