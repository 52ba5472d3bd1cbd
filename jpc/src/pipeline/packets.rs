use std::io::Read;

use log::{debug, trace, warn};

use super::{PacketSlot, PacketUnit, Receiver, StageContext};
use crate::bit_reader::PacketBitReader;
use crate::error::{invalid, CodestreamError, Result};
use crate::marker::{MarkerSymbol, MARKER_SYMBOL_EPH, MARKER_SYMBOL_SOP};
use crate::model::tile::Tile;
use crate::packet::{decode_packet_header, empty_contributions, PacketHeader};
use crate::source::{ByteSource, Substream};

// Lsop is fixed
const SOP_SEGMENT_LENGTH: u16 = 4;

/// Reads packet headers from the tile-part or from packed headers.
///
/// A header that cannot be read is replaced by an empty one and the reader
/// realigns on the next SOP marker when the tile uses them. Without SOP
/// markers the rest of the tile-part is given up.
#[derive(Debug, Default)]
pub(crate) struct PacketHeaderReader;

impl Receiver<PacketSlot> for PacketHeaderReader {
    type Out = PacketUnit;

    fn receive(
        &mut self,
        slot: PacketSlot,
        ctx: &mut StageContext<'_>,
    ) -> Result<Option<PacketUnit>> {
        let strict = ctx.request.strict;
        let tile = ctx
            .codestream
            .tile_mut(slot.tile)
            .ok_or_else(|| invalid!("tile {} not instantiated", slot.tile))?;

        if tile.packets_to_skip > 0 {
            tile.packets_to_skip -= 1;
            tile.packet_index = tile.packet_index.wrapping_add(1);
            trace!("packet {:?} passed over while resynchronising", slot.key);
            return abandoned(tile, slot, ctx.source.position()?).map(Some);
        }

        let start = ctx.source.position()?;
        match read_header(tile, slot, ctx.source, strict) {
            Ok(header) => Ok(Some(PacketUnit {
                header,
                data_end: slot.data_end,
                abandoned: false,
            })),
            Err(e) if e.is_packet_local() && !strict => {
                warn!(
                    "tile {} packet {:?} at byte offset {} abandoned: {}",
                    slot.tile, slot.key, start, e
                );
                ctx.diagnostics.corrupt_packet(slot.tile, slot.key, &e);
                resynchronize(tile, slot, start, ctx.source)?;
                abandoned(tile, slot, ctx.source.position()?).map(Some)
            }
            Err(e) => Err(e),
        }
    }
}

/// A packet that contributes nothing.
fn abandoned(tile: &mut Tile, slot: PacketSlot, position: u64) -> Result<PacketUnit> {
    let component = tile
        .components
        .get_mut(slot.key.component as usize)
        .ok_or_else(|| invalid!("packet {:?} for missing component", slot.key))?;
    Ok(PacketUnit {
        header: PacketHeader {
            tile: slot.tile,
            key: slot.key,
            empty: true,
            contributions: empty_contributions(component, slot.key)?,
            header_length: 0,
            body_offset: position,
            body_length: 0,
        },
        data_end: slot.data_end,
        abandoned: true,
    })
}

fn missing_marker(marker: MarkerSymbol, slot: PacketSlot, strict: bool) -> Result<()> {
    if strict {
        return Err(CodestreamError::MarkerMissing { marker });
    }
    warn!(
        "tile {} packet {:?}: EPH marker missing after the header",
        slot.tile, slot.key
    );
    Ok(())
}

fn read_header(
    tile: &mut Tile,
    slot: PacketSlot,
    source: &mut ByteSource,
    strict: bool,
) -> Result<PacketHeader> {
    let start = source.position()?;
    let uses_eph = tile.coding_style.uses_eph();

    // A.8.1 SOP may precede the packet, in the tile-part even when the
    // header itself is packed elsewhere
    if tile.coding_style.may_use_sop() && source.peek_marker()? == Some(MARKER_SYMBOL_SOP) {
        source.skip_bytes(2)?;
        let length = source.read_u16()?;
        if length != SOP_SEGMENT_LENGTH {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_SOP,
                error: format!("Lsop {} instead of {}", length, SOP_SEGMENT_LENGTH),
            });
        }
        let sequence = source.read_u16()?;
        if sequence != tile.packet_index {
            warn!(
                "tile {}: SOP sequence number {} where {} was expected",
                slot.tile, sequence, tile.packet_index
            );
        }
    }
    tile.packet_index = tile.packet_index.wrapping_add(1);

    let Tile {
        components,
        packed_headers,
        packed_position,
        ..
    } = tile;
    let component = components
        .get_mut(slot.key.component as usize)
        .ok_or_else(|| invalid!("packet {:?} for missing component", slot.key))?;

    let mut header = match packed_headers {
        // A.7.4 and A.7.5 header from PPM or PPT
        Some(packed) => {
            let position = (*packed_position).min(packed.len());
            let data = &packed[position..];
            let mut bits = PacketBitReader::new(data, position as u64);
            let header = decode_packet_header(slot.tile, component, slot.key, &mut bits)?;
            bits.align()?;
            *packed_position = position + bits.bytes_consumed() as usize;

            if uses_eph {
                let rest = &packed[(*packed_position).min(packed.len())..];
                if rest.starts_with(&MARKER_SYMBOL_EPH) {
                    *packed_position += 2;
                } else {
                    missing_marker(MARKER_SYMBOL_EPH, slot, strict)?;
                }
            }
            header
        }
        None => {
            let position = source.position()?;
            let available = slot.data_end.saturating_sub(position);
            let mut bits = PacketBitReader::new((&mut *source).take(available), position);
            let header = decode_packet_header(slot.tile, component, slot.key, &mut bits)?;
            bits.align()?;
            drop(bits);

            if uses_eph {
                if source.peek_marker()? == Some(MARKER_SYMBOL_EPH) {
                    source.skip_bytes(2)?;
                } else {
                    missing_marker(MARKER_SYMBOL_EPH, slot, strict)?;
                }
            }
            header
        }
    };

    header.body_offset = source.position()?;
    header.header_length = header.body_offset - start;
    trace!(
        "tile {} packet {:?}: header {} bytes, body {} bytes",
        slot.tile,
        slot.key,
        header.header_length,
        header.body_length
    );
    Ok(header)
}

/// Moves the source to where the next packet is believed to start. `start`
/// is where the abandoned packet, and its own SOP if any, began.
fn resynchronize(
    tile: &mut Tile,
    slot: PacketSlot,
    start: u64,
    source: &mut ByteSource,
) -> Result<()> {
    if tile.packed_headers.is_none() && tile.coding_style.may_use_sop() {
        // The header reader may have run into the next SOP already
        source.seek((start + 1).min(slot.data_end))?;
        if let Some(found) = source.find_marker(MARKER_SYMBOL_SOP, slot.data_end)? {
            source.skip_bytes(4)?;
            let sequence = source.read_u16()?;
            source.seek(found)?;
            let skipped = sequence.wrapping_sub(tile.packet_index);
            debug!(
                "tile {}: resynchronised on SOP {} at byte offset {}, {} packets passed over",
                slot.tile, sequence, found, skipped
            );
            tile.packets_to_skip = skipped as u32;
            return Ok(());
        }
    }

    // Without a marker to realign on, nothing further in this tile-part can
    // be trusted
    warn!(
        "tile {}: giving up on the rest of the tile-part after packet {:?}",
        slot.tile, slot.key
    );
    source.seek(slot.data_end)?;
    tile.desynchronized = true;
    if let Some(packed) = &tile.packed_headers {
        tile.packed_position = packed.len();
    }
    Ok(())
}

/// Locates the codeword bytes of each code-block in the packet body.
#[derive(Debug, Default)]
pub(crate) struct PacketBodyReader;

impl Receiver<PacketUnit> for PacketBodyReader {
    type Out = PacketUnit;

    fn receive(
        &mut self,
        mut packet: PacketUnit,
        ctx: &mut StageContext<'_>,
    ) -> Result<Option<PacketUnit>> {
        let header = &mut packet.header;
        let tile = ctx
            .codestream
            .tile_mut(header.tile)
            .ok_or_else(|| invalid!("tile {} not instantiated", header.tile))?;

        if packet.abandoned {
            // Keep PLT in step with the packets
            tile.packet_lengths.pop_front();
            return Ok(Some(packet));
        }

        let mut offset = header.body_offset;
        let mut truncated = false;
        for contribution in header.contributions.iter_mut() {
            for segment in contribution.segments.iter_mut() {
                let end = offset + segment.length as u64;
                if end > packet.data_end {
                    truncated = true;
                    segment.data = None;
                } else {
                    segment.data = Some(Substream {
                        offset,
                        length: segment.length,
                    });
                }
                offset = end;
            }
        }

        if truncated {
            let error = CodestreamError::TruncatedPacket {
                offset: packet.data_end,
            };
            if ctx.request.strict {
                return Err(error);
            }
            warn!(
                "tile {} packet {:?}: body of {} bytes cut short by the tile-part end",
                header.tile, header.key, header.body_length
            );
            ctx.diagnostics.corrupt_packet(header.tile, header.key, &error);
        }
        ctx.source.seek(offset.min(packet.data_end))?;

        // A.7.3 cross-check against PLT or PLM
        if let Some(expected) = tile.packet_lengths.pop_front() {
            let actual = header.header_length + header.body_length;
            if expected as u64 != actual {
                warn!(
                    "tile {} packet {:?}: {} bytes signalled, {} bytes read",
                    header.tile, header.key, expected, actual
                );
            }
        }

        ctx.diagnostics.packet(
            header.tile,
            header.key,
            header.header_length,
            header.body_length,
        );
        Ok(Some(packet))
    }
}
