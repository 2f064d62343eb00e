use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
use bytes::{BufMut, BytesMut};

use super::{
    ParseError,
    common::{PacketComponent, WireReader},
};

pub const HEADER_LEN: usize = 12;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl PacketComponent for DNSHeader {
    fn write(&self, buf: &mut BytesMut) -> Result<(), ParseError> {
        let mut raw = Vec::with_capacity(HEADER_LEN);
        let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut raw);
        writer.write_var::<u16>(16, self.id)?;
        writer.write_var::<u8>(1, self.qr as u8)?;
        writer.write_var::<u8>(4, self.opcode)?;
        writer.write_var::<u8>(1, self.aa as u8)?;
        writer.write_var::<u8>(1, self.tc as u8)?;
        writer.write_var::<u8>(1, self.rd as u8)?;
        writer.write_var::<u8>(1, self.ra as u8)?;
        writer.write_var::<u8>(3, self.z)?;
        writer.write_var::<u8>(4, self.rcode)?;
        writer.write_var::<u16>(16, self.qdcount)?;
        writer.write_var::<u16>(16, self.ancount)?;
        writer.write_var::<u16>(16, self.nscount)?;
        writer.write_var::<u16>(16, self.arcount)?;
        buf.put_slice(&raw);
        Ok(())
    }

    fn read(reader: &mut WireReader<'_>) -> Result<Self, ParseError> {
        let raw = reader
            .read_slice(HEADER_LEN)
            .map_err(|_| ParseError::InvalidHeader)?;
        let mut bits = BitReader::<_, BigEndian>::new(raw);
        Ok(DNSHeader {
            id: bits.read_var::<u16>(16)?,
            qr: bits.read_var::<u8>(1)? == 1,
            opcode: bits.read_var::<u8>(4)?,
            aa: bits.read_var::<u8>(1)? == 1,
            tc: bits.read_var::<u8>(1)? == 1,
            rd: bits.read_var::<u8>(1)? == 1,
            ra: bits.read_var::<u8>(1)? == 1,
            z: bits.read_var::<u8>(3)?,
            rcode: bits.read_var::<u8>(4)?,
            qdcount: bits.read_var::<u16>(16)?,
            ancount: bits.read_var::<u16>(16)?,
            nscount: bits.read_var::<u16>(16)?,
            arcount: bits.read_var::<u16>(16)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_layout() {
        let header = DNSHeader {
            id: 0x1234,
            qr: true,
            opcode: 0,
            rd: true,
            rcode: 2,
            qdcount: 1,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        header.write(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x12, 0x34, 0x81, 0x02, 0, 1, 0, 0, 0, 0, 0, 0]);

        let mut reader = WireReader::new(&buf);
        assert_eq!(DNSHeader::read(&mut reader).unwrap(), header);
    }

    #[test]
    fn test_short_header() {
        let mut reader = WireReader::new(&[0u8; 11]);
        assert!(matches!(
            DNSHeader::read(&mut reader),
            Err(ParseError::InvalidHeader)
        ));
    }
}
