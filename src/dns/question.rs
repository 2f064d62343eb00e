use bytes::{BufMut, BytesMut};

use super::{
    ParseError,
    common::{PacketComponent, WireReader, write_labels},
    enums::{DNSResourceClass, DNSResourceType},
    name,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSQuestion {
    pub labels: Vec<Vec<u8>>,
    pub qtype: DNSResourceType,
    pub qclass: DNSResourceClass,
}

impl DNSQuestion {
    /// Builds a question from a presentation name.
    pub fn new(
        qname: &str,
        qtype: DNSResourceType,
        qclass: DNSResourceClass,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            labels: name::parse_presentation(qname)?,
            qtype,
            qclass,
        })
    }

    /// Fully-qualified presentation name.
    pub fn name(&self) -> String {
        name::to_presentation(&self.labels)
    }
}

impl PacketComponent for DNSQuestion {
    fn write(&self, buf: &mut BytesMut) -> Result<(), ParseError> {
        write_labels(&self.labels, buf)?;
        buf.put_u16(self.qtype.into());
        buf.put_u16(self.qclass.into());
        Ok(())
    }

    fn read(reader: &mut WireReader<'_>) -> Result<Self, ParseError> {
        let labels = reader
            .read_labels()
            .map_err(|_| ParseError::InvalidQuestionSection)?;
        let qtype = reader.read_u16()?.into();
        let qclass = reader.read_u16()?.into();
        Ok(DNSQuestion {
            labels,
            qtype,
            qclass,
        })
    }
}
