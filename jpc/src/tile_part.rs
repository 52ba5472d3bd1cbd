//! Locating tile-parts in the codestream (A.4.2, A.7.1).

use log::{debug, warn};

use crate::error::{CodestreamError, Result};
use crate::marker::{TilePartLengthsSegment, MARKER_SYMBOL_EOC, MARKER_SYMBOL_SOT};
use crate::source::ByteSource;

/// Where one tile-part lives: `start` is the offset of its SOT marker and
/// `length` covers everything up to the next tile-part or EOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePartPointer {
    pub tile_part: u8,
    pub tile: u32,
    pub start: u64,
    pub length: u64,
}

impl TilePartPointer {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Tile-part pointers in codestream order, taken from TLM segments when the
/// main header has them and discovered by walking SOT markers otherwise.
#[derive(Debug)]
pub struct TilePartIndex {
    pointers: Vec<TilePartPointer>,
    // Offset of the next SOT not yet visited, None once EOC was seen
    scan_offset: Option<u64>,
    // Tile-parts found per tile, for TPsot bookkeeping
    parts_per_tile: Vec<(u32, u8)>,
}

impl TilePartIndex {
    /// An index filled lazily as tile-parts are scanned from `first_offset`.
    pub fn incremental(first_offset: u64) -> Self {
        TilePartIndex {
            pointers: vec![],
            scan_offset: Some(first_offset),
            parts_per_tile: vec![],
        }
    }

    /// An index built from the TLM segments of the main header.
    pub fn from_tlm(first_offset: u64, segments: &[TilePartLengthsSegment]) -> Self {
        let mut ordered: Vec<&TilePartLengthsSegment> = segments.iter().collect();
        ordered.sort_by_key(|segment| segment.index());

        let mut index = TilePartIndex {
            pointers: vec![],
            scan_offset: None,
            parts_per_tile: vec![],
        };

        let mut offset = first_offset;
        for (i, entry) in ordered
            .into_iter()
            .flat_map(|segment| segment.tile_part_lengths().iter())
            .enumerate()
        {
            // Without Ttlm the tile-parts are in tile order, one per tile
            let tile = entry.tile_index.map_or(i as u32, |tile| tile as u32);
            let tile_part = index.next_part(tile);
            index.pointers.push(TilePartPointer {
                tile_part,
                tile,
                start: offset,
                length: entry.length as u64,
            });
            offset += entry.length as u64;
        }

        debug!("TLM index of {} tile-parts", index.pointers.len());
        index
    }

    fn next_part(&mut self, tile: u32) -> u8 {
        match self.parts_per_tile.iter_mut().find(|(t, _)| *t == tile) {
            Some((_, parts)) => {
                let part = *parts;
                *parts = parts.saturating_add(1);
                part
            }
            None => {
                self.parts_per_tile.push((tile, 1));
                0
            }
        }
    }

    /// The `i`-th tile-part in codestream order, scanning SOT markers as far
    /// as needed. `None` once the codestream has no more tile-parts.
    pub fn pointer(
        &mut self,
        i: usize,
        source: &mut ByteSource,
    ) -> Result<Option<TilePartPointer>> {
        while self.pointers.len() <= i {
            if !self.scan_next(source)? {
                return Ok(None);
            }
        }
        Ok(self.pointers.get(i).copied())
    }

    /// Number of tile-parts known so far.
    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    // Reads the SOT at the scan offset and records its pointer
    fn scan_next(&mut self, source: &mut ByteSource) -> Result<bool> {
        let offset = match self.scan_offset {
            Some(offset) => offset,
            None => return Ok(false),
        };

        let length = source.len();
        if offset + 2 > length {
            warn!("codestream ends at byte offset {} without EOC", length);
            self.scan_offset = None;
            return Ok(false);
        }

        let position = source.position()?;
        source.seek(offset)?;
        let marker = source.read_marker()?;
        if marker == MARKER_SYMBOL_EOC {
            source.seek(position)?;
            self.scan_offset = None;
            return Ok(false);
        }
        if marker != MARKER_SYMBOL_SOT {
            source.seek(position)?;
            return Err(CodestreamError::MarkerUnexpected { marker, offset });
        }

        // Lsot, Isot, Psot, TPsot
        source.skip_bytes(2)?;
        let tile = source.read_u16()? as u32;
        let psot = source.read_u32()? as u64;
        let tile_part = source.read_u8()?;
        source.seek(position)?;

        let expected = self.next_part(tile);
        if expected != tile_part {
            warn!(
                "tile {} tile-part {} found where tile-part {} was expected",
                tile, tile_part, expected
            );
        }

        // Psot of zero: the tile-part runs up to EOC
        let tile_part_length = if psot == 0 {
            let end = if self.ends_with_eoc(source)? {
                length - 2
            } else {
                length
            };
            end - offset
        } else {
            psot
        };

        if offset + tile_part_length > length {
            warn!(
                "tile-part {} of tile {} claims {} bytes, only {} remain",
                tile_part,
                tile,
                tile_part_length,
                length - offset
            );
        }

        let pointer = TilePartPointer {
            tile_part,
            tile,
            start: offset,
            length: tile_part_length.min(length - offset),
        };
        debug!("found {:?}", pointer);
        self.pointers.push(pointer);

        self.scan_offset = if psot == 0 || pointer.end() >= length {
            None
        } else {
            Some(pointer.end())
        };

        Ok(true)
    }

    fn ends_with_eoc(&self, source: &mut ByteSource) -> Result<bool> {
        let length = source.len();
        if length < 2 {
            return Ok(false);
        }
        let position = source.position()?;
        source.seek(length - 2)?;
        let marker = source.read_marker()?;
        source.seek(position)?;
        Ok(marker == MARKER_SYMBOL_EOC)
    }
}
