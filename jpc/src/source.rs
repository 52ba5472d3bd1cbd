use std::io::{self, Read, Seek, SeekFrom};

use crate::error::Result;
use crate::marker::MarkerSymbol;

/// Anything the decoder can read a codestream from.
pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

/// A byte range of the codestream, read on demand instead of copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Substream {
    pub offset: u64,
    pub length: u32,
}

impl Substream {
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Seekable big-endian reader over the codestream bytes.
///
/// Every position is absolute, counted from the first byte of the
/// codestream (the SOC marker).
pub struct ByteSource {
    inner: Box<dyn SeekRead>,
    origin: u64,
    length: u64,
}

impl ByteSource {
    /// Wraps `reader`, taking its current position as the codestream start.
    pub fn new<R: SeekRead + 'static>(mut reader: R) -> Result<ByteSource> {
        let origin = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(origin))?;

        Ok(ByteSource {
            inner: Box::new(reader),
            origin,
            length: end.saturating_sub(origin),
        })
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<ByteSource> {
        ByteSource::new(io::Cursor::new(data))
    }

    /// Total length of the codestream in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()? - self.origin)
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(self.origin + position))?;
        Ok(())
    }

    pub fn skip_bytes(&mut self, count: u64) -> Result<()> {
        let position = self.position()?;
        self.seek(position + count)
    }

    pub fn remaining(&mut self) -> Result<u64> {
        Ok(self.length.saturating_sub(self.position()?))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buffer = [0u8; 1];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buffer = [0u8; 2];
        self.inner.read_exact(&mut buffer)?;
        Ok(u16::from_be_bytes(buffer))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buffer = [0u8; 4];
        self.inner.read_exact(&mut buffer)?;
        Ok(u32::from_be_bytes(buffer))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buffer = [0u8; 8];
        self.inner.read_exact(&mut buffer)?;
        Ok(u64::from_be_bytes(buffer))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; count];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub fn read_marker(&mut self) -> Result<MarkerSymbol> {
        let mut marker: MarkerSymbol = [0; 2];
        self.inner.read_exact(&mut marker)?;
        Ok(marker)
    }

    /// Returns the next two bytes without consuming them, `None` at the end
    /// of the codestream.
    pub fn peek_marker(&mut self) -> Result<Option<MarkerSymbol>> {
        if self.remaining()? < 2 {
            return Ok(None);
        }
        let position = self.position()?;
        let marker = self.read_marker()?;
        self.seek(position)?;
        Ok(Some(marker))
    }

    /// Reads the bytes of `substream`, leaving the position unchanged.
    pub fn read_substream(&mut self, substream: Substream) -> Result<Vec<u8>> {
        let position = self.position()?;
        self.seek(substream.offset)?;
        let data = self.read_bytes(substream.length as usize);
        self.seek(position)?;
        data
    }

    /// Scans forward from the current position for `marker`, stopping before
    /// `limit`. On success the position is left on the marker.
    pub fn find_marker(&mut self, marker: MarkerSymbol, limit: u64) -> Result<Option<u64>> {
        let mut position = self.position()?;
        let limit = limit.min(self.length);
        let mut previous = None;

        while position < limit {
            let byte = self.read_u8()?;
            if previous == Some(marker[0]) && byte == marker[1] {
                let start = position - 1;
                self.seek(start)?;
                return Ok(Some(start));
            }
            previous = Some(byte);
            position += 1;
        }

        Ok(None)
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for ByteSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let absolute = match pos {
            SeekFrom::Start(offset) => self.inner.seek(SeekFrom::Start(self.origin + offset))?,
            other => self.inner.seek(other)?,
        };
        Ok(absolute.saturating_sub(self.origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_big_endian() {
        let mut source =
            ByteSource::from_bytes(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]).unwrap();
        assert_eq!(source.read_u8().unwrap(), 0x01);
        assert_eq!(source.read_u16().unwrap(), 0x0203);
        assert_eq!(source.read_u32().unwrap(), 0x0405_0607);
        assert!(source.read_u8().is_err());
    }

    #[test]
    fn test_origin_is_reader_position() {
        let mut cursor = io::Cursor::new(vec![0xAA, 0xFF, 0x4F, 0xFF, 0x51]);
        cursor.set_position(1);
        let mut source = ByteSource::new(cursor).unwrap();
        assert_eq!(source.len(), 4);
        assert_eq!(source.position().unwrap(), 0);
        assert_eq!(source.peek_marker().unwrap(), Some([0xFF, 0x4F]));
        assert_eq!(source.position().unwrap(), 0);
    }

    #[test]
    fn test_substream_keeps_position() {
        let mut source = ByteSource::from_bytes((0u8..16).collect()).unwrap();
        source.seek(3).unwrap();
        let data = source
            .read_substream(Substream {
                offset: 8,
                length: 4,
            })
            .unwrap();
        assert_eq!(data, vec![8, 9, 10, 11]);
        assert_eq!(source.position().unwrap(), 3);
    }

    #[test]
    fn test_find_marker() {
        let mut source =
            ByteSource::from_bytes(vec![0x00, 0xFF, 0x00, 0xFF, 0x91, 0x00, 0x04]).unwrap();
        assert_eq!(source.find_marker([0xFF, 0x91], 7).unwrap(), Some(3));
        assert_eq!(source.position().unwrap(), 3);

        source.seek(0).unwrap();
        assert_eq!(source.find_marker([0xFF, 0x91], 4).unwrap(), None);
    }
}
