use bytes::{Buf, BufMut, BytesMut};

use super::ParseError;
use super::name::MAX_NAME_LEN;

/// Upper bound on compression pointers followed while reading one name.
const MAX_POINTER_HOPS: usize = 64;

pub trait PacketComponent: Sized {
    fn write(&self, buf: &mut BytesMut) -> Result<(), ParseError>;
    fn read(reader: &mut WireReader<'_>) -> Result<Self, ParseError>;
}

/// Cursor over a whole message; names may point anywhere in `packet`.
pub struct WireReader<'a> {
    packet: &'a [u8],
    cursor: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(packet: &'a [u8]) -> Self {
        Self {
            packet,
            cursor: packet,
        }
    }

    pub fn position(&self) -> usize {
        self.packet.len() - self.cursor.remaining()
    }

    fn ensure(&self, need: usize) -> Result<(), ParseError> {
        if self.cursor.remaining() < need {
            return Err(ParseError::UnexpectedEnd);
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        self.ensure(1)?;
        Ok(self.cursor.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        self.ensure(2)?;
        Ok(self.cursor.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        self.ensure(4)?;
        Ok(self.cursor.get_u32())
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        self.ensure(len)?;
        let (head, tail) = self.cursor.split_at(len);
        self.cursor = tail;
        Ok(head)
    }

    /// Reads a possibly compressed name, leaving the cursor after its
    /// in-place encoding.
    pub fn read_labels(&mut self) -> Result<Vec<Vec<u8>>, ParseError> {
        let mut labels = Vec::new();
        let mut pos = self.position();
        let mut resume_at = None;
        let mut hops = 0;
        let mut wire_len = 1;

        loop {
            let len = *self.packet.get(pos).ok_or(ParseError::UnexpectedEnd)?;
            match len & 0xC0 {
                0x00 if len == 0 => {
                    pos += 1;
                    break;
                }
                0x00 => {
                    let start = pos + 1;
                    let end = start + len as usize;
                    let raw = self
                        .packet
                        .get(start..end)
                        .ok_or(ParseError::UnexpectedEnd)?;
                    wire_len += raw.len() + 1;
                    if wire_len > MAX_NAME_LEN {
                        return Err(ParseError::NameTooLong);
                    }
                    labels.push(raw.to_vec());
                    pos = end;
                }
                0xC0 => {
                    let low = *self.packet.get(pos + 1).ok_or(ParseError::UnexpectedEnd)?;
                    if resume_at.is_none() {
                        resume_at = Some(pos + 2);
                    }
                    hops += 1;
                    if hops > MAX_POINTER_HOPS {
                        return Err(ParseError::PointerLoop);
                    }
                    pos = (((len & 0x3F) as usize) << 8) | low as usize;
                }
                _ => return Err(ParseError::InvalidLabel),
            }
        }

        let end = resume_at.unwrap_or(pos);
        self.cursor = &self.packet[end..];
        Ok(labels)
    }
}

pub fn write_labels(labels: &[Vec<u8>], buf: &mut BytesMut) -> Result<(), ParseError> {
    for label in labels {
        if label.is_empty() || label.len() > super::name::MAX_LABEL_LEN {
            return Err(ParseError::InvalidLabel);
        }
        buf.put_u8(label.len() as u8);
        buf.put_slice(label);
    }
    buf.put_u8(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_compressed_name() {
        // "miek.nl." at 0, then "www" + pointer to 0
        let packet = b"\x04miek\x02nl\x00\x03www\xC0\x00\xFF";
        let mut reader = WireReader::new(packet);
        assert_eq!(reader.read_labels().unwrap(), vec![b"miek".to_vec(), b"nl".to_vec()]);
        assert_eq!(reader.position(), 9);
        assert_eq!(
            reader.read_labels().unwrap(),
            vec![b"www".to_vec(), b"miek".to_vec(), b"nl".to_vec()]
        );
        assert_eq!(reader.read_u8().unwrap(), 0xFF);
    }

    #[test]
    fn test_pointer_loop_rejected() {
        let packet = b"\xC0\x00";
        let mut reader = WireReader::new(packet);
        assert!(matches!(reader.read_labels(), Err(ParseError::PointerLoop)));
    }

    #[test]
    fn test_binary_label_kept_verbatim() {
        let mut reader = WireReader::new(b"\x01\xff\x04miek\x02nl\x00");
        let labels = reader.read_labels().unwrap();
        assert_eq!(labels[0], vec![0xFF]);

        let mut buf = BytesMut::new();
        write_labels(&labels, &mut buf).unwrap();
        assert_eq!(&buf[..], b"\x01\xff\x04miek\x02nl\x00");
    }

    #[test]
    fn test_truncated_name() {
        let mut reader = WireReader::new(b"\x04mi");
        assert!(matches!(reader.read_labels(), Err(ParseError::UnexpectedEnd)));
    }
}
