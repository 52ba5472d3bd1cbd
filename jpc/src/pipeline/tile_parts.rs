use log::{debug, info, warn};

use super::{Receiver, StageContext, TilePartUnit};
use crate::error::{invalid, Result};
use crate::marker::marker_name;
use crate::parser::decode_tile_part_header;
use crate::tile_part::TilePartPointer;

/// Reads tile-part headers, instantiating a tile on its first tile-part and
/// feeding later ones into it.
#[derive(Debug, Default)]
pub(crate) struct TilePartHeaderReader;

impl Receiver<TilePartPointer> for TilePartHeaderReader {
    type Out = TilePartUnit;

    fn receive(
        &mut self,
        pointer: TilePartPointer,
        ctx: &mut StageContext<'_>,
    ) -> Result<Option<TilePartUnit>> {
        ctx.diagnostics.tile_part(&pointer);

        // PPM and PLM are stored in tile-part order, skipped tile-parts
        // consume their share too
        let (packed_headers, packet_lengths) = ctx.codestream.take_tile_part_side_data();

        if !ctx.codestream.is_requested(pointer.tile) {
            debug!(
                "tile {} tile-part {} not requested, skipped",
                pointer.tile, pointer.tile_part
            );
            return Ok(None);
        }
        if ctx.codestream.tile(pointer.tile).is_some_and(|tile| tile.is_finished()) {
            warn!(
                "tile {} tile-part {} arrived after the tile was finished, skipped",
                pointer.tile, pointer.tile_part
            );
            return Ok(None);
        }

        ctx.source.seek(pointer.start)?;
        let header = decode_tile_part_header(
            &mut *ctx.source,
            ctx.codestream.siz().no_components(),
            ctx.codestream.has_packed_packet_headers(),
        )?;
        if header.sot.tile_index() as u32 != pointer.tile {
            return Err(invalid!(
                "tile-part at byte offset {} is for tile {}, expected {}",
                pointer.start,
                header.sot.tile_index(),
                pointer.tile
            ));
        }
        let data_offset = header.data_offset;
        if data_offset > pointer.end() {
            return Err(invalid!(
                "tile {} tile-part {} header runs past its end",
                pointer.tile,
                pointer.tile_part
            ));
        }
        for segment in header.segments() {
            debug!(
                "tile {} tile-part {}: {} at byte offset {}, length {}",
                pointer.tile,
                pointer.tile_part,
                marker_name(segment.marker),
                segment.offset,
                segment.length
            );
        }
        // PLM only stands in for PLT
        let has_plt = !header.plts.is_empty();

        let first = ctx.codestream.tile(pointer.tile).is_none();
        let tile = if first {
            let tile = ctx.codestream.instantiate_tile(pointer.tile, header)?;
            info!("tile {} instantiated {:?}", pointer.tile, tile.region);
            ctx.diagnostics.tile_instantiated(pointer.tile);
            for component in &tile.components {
                for resolution in component.resolutions() {
                    if resolution.is_decoded() {
                        ctx.diagnostics.resolution_started(
                            pointer.tile,
                            component.index(),
                            resolution.index(),
                            resolution.no_blocks(),
                        );
                    }
                }
            }
            tile
        } else {
            let tile = ctx
                .codestream
                .tile_mut(pointer.tile)
                .ok_or_else(|| invalid!("tile {} vanished", pointer.tile))?;
            tile.add_tile_part(header)?;
            tile
        };

        if let Some(chunk) = packed_headers {
            tile.add_packed_headers(chunk);
        }
        if let Some(lengths) = packet_lengths {
            if !has_plt {
                tile.packet_lengths.extend(lengths);
            }
        }

        Ok(Some(TilePartUnit {
            tile: pointer.tile,
            tile_part: pointer.tile_part,
            data_offset,
            data_end: pointer.end(),
        }))
    }
}
