//! Git pkt-line framing.
//!
//! Every packet starts with four hex digits giving its length including the
//! prefix. `0000`, `0001` and `0002` are the flush, delimiter and
//! response-end markers of protocol v2.

use super::pack::PackError;

/// Largest payload a single pkt-line may carry
const MAX_PAYLOAD: usize = 65_516;

/// One decoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Data(&'a [u8]),
    Flush,
    Delim,
    ResponseEnd,
}

impl<'a> Packet<'a> {
    /// Payload with a single trailing newline removed
    pub fn line(&self) -> Option<&'a [u8]> {
        match self {
            Packet::Data(data) => Some(data.strip_suffix(b"\n").unwrap_or(data)),
            _ => None,
        }
    }
}

/// Append `payload` as one data packet
pub fn write_data(out: &mut Vec<u8>, payload: &str) {
    debug_assert!(payload.len() <= MAX_PAYLOAD);
    out.extend_from_slice(format!("{:04x}", payload.len() + 4).as_bytes());
    out.extend_from_slice(payload.as_bytes());
}

pub fn write_flush(out: &mut Vec<u8>) {
    out.extend_from_slice(b"0000");
}

pub fn write_delim(out: &mut Vec<u8>) {
    out.extend_from_slice(b"0001");
}

/// Iterator over the packets of a response body
#[derive(Debug)]
pub struct PktReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PktReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read(&mut self) -> Result<Packet<'a>, PackError> {
        let header = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or(PackError::Truncated("pkt-line length"))?;
        let header = std::str::from_utf8(header).map_err(|_| PackError::BadPktLine)?;
        let len = usize::from_str_radix(header, 16).map_err(|_| PackError::BadPktLine)?;
        self.pos += 4;
        match len {
            0 => Ok(Packet::Flush),
            1 => Ok(Packet::Delim),
            2 => Ok(Packet::ResponseEnd),
            3 => Err(PackError::BadPktLine),
            _ => {
                let data = self
                    .buf
                    .get(self.pos..self.pos + len - 4)
                    .ok_or(PackError::Truncated("pkt-line payload"))?;
                self.pos += len - 4;
                Ok(Packet::Data(data))
            }
        }
    }
}

impl<'a> Iterator for PktReader<'a> {
    type Item = Result<Packet<'a>, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let packet = self.read();
        if packet.is_err() {
            // Framing is lost after a bad header.
            self.pos = self.buf.len();
        }
        Some(packet)
    }
}
