use std::io::{self, Read};

use crate::error::{CodestreamError, Result};

/// Bit reader for packet headers (B.10.1).
///
/// Bits are read most significant first. After a 0xFF byte the next byte
/// contributes only its seven low bits; the stuffed most significant bit has
/// to be zero.
pub struct PacketBitReader<R: Read> {
    inner: R,
    byte: u8,
    bits_left: u8,
    last_was_ff: bool,
    consumed: u64,
    // Absolute offset of the first byte, used in error reports
    base_offset: u64,
}

impl<R: Read> PacketBitReader<R> {
    pub fn new(inner: R, base_offset: u64) -> Self {
        PacketBitReader {
            inner,
            byte: 0,
            bits_left: 0,
            last_was_ff: false,
            consumed: 0,
            base_offset,
        }
    }

    fn next_byte(&mut self) -> Result<u8> {
        let mut buffer = [0u8; 1];
        match self.inner.read_exact(&mut buffer) {
            Ok(()) => {
                self.consumed += 1;
                Ok(buffer[0])
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(CodestreamError::TruncatedPacket {
                    offset: self.base_offset + self.consumed,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_bit(&mut self) -> Result<u8> {
        if self.bits_left == 0 {
            let byte = self.next_byte()?;
            if self.last_was_ff {
                if byte & 0x80 != 0 {
                    return Err(CodestreamError::CorruptBitstuffing {
                        offset: self.base_offset + self.consumed - 1,
                    });
                }
                self.bits_left = 7;
            } else {
                self.bits_left = 8;
            }
            self.last_was_ff = byte == 0xFF;
            self.byte = byte;
        }

        self.bits_left -= 1;
        Ok((self.byte >> self.bits_left) & 1)
    }

    /// Reads `count` bits, at most 32, as an unsigned integer.
    pub fn read_bits(&mut self, count: u8) -> Result<u32> {
        debug_assert!(count <= 32);
        let mut value: u32 = 0;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    /// Discards the rest of the current byte. A header ending on 0xFF is
    /// followed by one stuffed byte, which is consumed as well.
    pub fn align(&mut self) -> Result<()> {
        self.bits_left = 0;
        if self.last_was_ff {
            self.next_byte()?;
            self.last_was_ff = false;
        }
        Ok(())
    }

    /// Bytes taken from the underlying reader so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
