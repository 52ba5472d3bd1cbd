//! The decode pipeline.
//!
//! Tile-parts flow through a chain of stages, each taking one unit and
//! forwarding at most one unit to the next:
//!
//! tile-part pointer > tile-part header > packet header > packet body >
//! code-block contributions > resolution > tile-component > tile > image
//!
//! Completion is driven bottom up by countdowns: the last code-block of a
//! resolution completes it, the last resolution its tile-component and so
//! on.

mod aggregate;
mod blocks;
mod packets;
mod tile_parts;

use log::{debug, warn};

use crate::decoder::DecodeRequest;
use crate::diagnostics::Diagnostics;
use crate::error::{invalid, CodestreamError, Result};
use crate::geometry::Region;
use crate::model::codestream::Codestream;
use crate::packet::{empty_contributions, PacketHeader};
use crate::progression::PacketKey;
use crate::source::ByteSource;
use crate::tasks::{ImageLayout, Tasks};

pub(crate) use aggregate::{ResolutionAggregator, TileAggregator, TileComponentAggregator};
pub(crate) use blocks::BlockContributionStage;
pub(crate) use packets::{PacketBodyReader, PacketHeaderReader};
pub(crate) use tile_parts::TilePartHeaderReader;

/// Everything a stage may touch while handling a unit.
pub struct StageContext<'a> {
    pub codestream: &'a mut Codestream,
    pub source: &'a mut ByteSource,
    pub request: &'a DecodeRequest,
    pub tasks: &'a mut Tasks,
    pub diagnostics: &'a mut dyn Diagnostics,
}

/// One stage of the pipeline.
pub trait Receiver<In> {
    type Out;

    /// Handles `unit`, returning the unit for the next stage if one is ready.
    fn receive(&mut self, unit: In, ctx: &mut StageContext<'_>) -> Result<Option<Self::Out>>;
}

/// The bit stream of a tile-part whose header has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePartUnit {
    pub tile: u32,
    pub tile_part: u8,
    /// First byte after SOD.
    pub data_offset: u64,
    /// First byte after the tile-part.
    pub data_end: u64,
}

/// The next packet to read from a tile-part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSlot {
    pub tile: u32,
    pub key: PacketKey,
    pub data_end: u64,
}

/// A packet header on its way through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketUnit {
    pub header: PacketHeader,
    pub data_end: u64,
    /// The header could not be read, or the packet was never present.
    pub abandoned: bool,
}

/// A resolution of a tile-component that may have completed. Without a
/// resolution it asks for a sweep over all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionEvent {
    pub tile: u32,
    pub component: u16,
    pub resolution: Option<u8>,
}

/// A tile-component whose resolutions have all been reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentEvent {
    pub tile: u32,
    pub component: u16,
}

/// A tile whose components are all reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEvent {
    pub tile: u32,
}

/// Every requested tile has been handed to the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageComplete;

/// The chain of stages.
#[derive(Debug, Default)]
pub struct Pipeline {
    tile_parts: TilePartHeaderReader,
    headers: PacketHeaderReader,
    bodies: PacketBodyReader,
    blocks: BlockContributionStage,
    resolutions: ResolutionAggregator,
    components: TileComponentAggregator,
    tiles: TileAggregator,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads tile-parts until every requested tile is composed or the
    /// codestream ends.
    pub fn run(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        let layout = ImageLayout {
            region: requested_region(ctx.codestream, ctx.request),
            reduce: ctx.request.reduce,
            components: ctx.codestream.components().to_vec(),
        };
        ctx.tasks
            .assembler
            .begin(&layout)
            .map_err(|e| CodestreamError::task("assembler", "image-begin", e))?;

        let mut complete = false;
        while !complete {
            let index = ctx.codestream.next_tile_part;
            let pointer = match ctx.codestream.tile_parts.as_mut() {
                Some(tile_parts) => tile_parts.pointer(index, ctx.source)?,
                None => return Err(invalid!("main header not read")),
            };
            let pointer = match pointer {
                Some(pointer) => pointer,
                None => break,
            };
            ctx.codestream.next_tile_part += 1;

            let unit = match self.tile_parts.receive(pointer, ctx)? {
                Some(unit) => unit,
                None => continue,
            };
            self.read_packets(unit, ctx)?;

            let last = ctx
                .codestream
                .tile(unit.tile)
                .is_some_and(|tile| tile.is_last_tile_part_read());
            if last {
                complete = self.close_tile(unit.tile, ctx)?;
            }
            complete = complete || ctx.codestream.is_complete();
        }

        if !complete {
            // End of codestream, tiles still open get what arrived
            let open: Vec<u32> = ctx
                .codestream
                .tiles
                .iter()
                .filter(|(_, tile)| !tile.is_finished())
                .map(|(index, _)| index)
                .collect();
            for index in open {
                debug!("tile {} closed at the end of the codestream", index);
                self.close_tile(index, ctx)?;
            }
        }

        let missing: Vec<u32> = ctx
            .codestream
            .requested_tiles()
            .iter()
            .copied()
            .filter(|&index| ctx.codestream.tile(index).is_none())
            .collect();
        for tile in missing {
            if ctx.request.strict {
                return Err(CodestreamError::TileNotFound { tile });
            }
            warn!("no tile-part found for requested tile {}", tile);
        }
        Ok(())
    }

    /// Reads the packets of one tile-part in progression order.
    fn read_packets(&mut self, unit: TilePartUnit, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.source.seek(unit.data_offset)?;
        loop {
            let position = ctx.source.position()?;
            let tile = ctx
                .codestream
                .tile_mut(unit.tile)
                .ok_or_else(|| invalid!("tile {} not instantiated", unit.tile))?;
            // With reduce a tile can complete before its discarded
            // resolutions were read
            if tile.desynchronized || tile.is_finished() {
                break;
            }
            // Packed headers describe packets whose body may be empty
            let headers_left = tile
                .remaining_packed_headers()
                .is_some_and(|packed| !packed.is_empty());
            if position >= unit.data_end && !headers_left && tile.packets_to_skip == 0 {
                break;
            }

            let key = match tile.next_packet()? {
                Some(key) => key,
                None => {
                    if position < unit.data_end {
                        warn!(
                            "tile {} tile-part {}: {} bytes after the last packet",
                            unit.tile,
                            unit.tile_part,
                            unit.data_end - position
                        );
                    }
                    break;
                }
            };

            let slot = PacketSlot {
                tile: unit.tile,
                key,
                data_end: unit.data_end,
            };
            let header = match self.headers.receive(slot, ctx)? {
                Some(header) => header,
                None => continue,
            };
            if let Some(packet) = self.bodies.receive(header, ctx)? {
                self.feed_blocks(packet, ctx)?;
            }
        }
        Ok(())
    }

    /// Sends every packet the tile did not deliver through as empty, then
    /// sweeps its resolutions. Returns whether the image completed.
    fn close_tile(&mut self, index: u32, ctx: &mut StageContext<'_>) -> Result<bool> {
        let mut drained = 0;
        loop {
            let tile = match ctx.codestream.tile_mut(index) {
                Some(tile) if !tile.is_finished() => tile,
                _ => return Ok(ctx.codestream.is_complete()),
            };
            let key = match tile.next_packet()? {
                Some(key) => key,
                None => break,
            };
            let component = tile
                .components
                .get_mut(key.component as usize)
                .ok_or_else(|| invalid!("packet {:?} for missing component", key))?;
            let contributions = empty_contributions(component, key)?;
            let packet = PacketUnit {
                header: PacketHeader {
                    tile: index,
                    key,
                    empty: true,
                    contributions,
                    header_length: 0,
                    body_offset: 0,
                    body_length: 0,
                },
                data_end: 0,
                abandoned: true,
            };
            drained += 1;
            if self.feed_blocks(packet, ctx)? {
                return Ok(true);
            }
        }
        if drained > 0 {
            warn!("tile {}: {} packets missing, decoded as empty", index, drained);
        }

        let no_components = ctx
            .codestream
            .tile(index)
            .map_or(0, |tile| tile.components().len() as u16);
        for component in 0..no_components {
            let event = ResolutionEvent {
                tile: index,
                component,
                resolution: None,
            };
            if self.propagate(event, ctx)? {
                return Ok(true);
            }
        }
        Ok(ctx.codestream.is_complete())
    }

    fn feed_blocks(&mut self, packet: PacketUnit, ctx: &mut StageContext<'_>) -> Result<bool> {
        match self.blocks.receive(packet, ctx)? {
            Some(event) => self.propagate(event, ctx),
            None => Ok(false),
        }
    }

    /// Pushes a resolution event up the aggregators. Returns whether the
    /// image completed.
    fn propagate(&mut self, event: ResolutionEvent, ctx: &mut StageContext<'_>) -> Result<bool> {
        let component = match self.resolutions.receive(event, ctx)? {
            Some(component) => component,
            None => return Ok(false),
        };
        let tile = match self.components.receive(component, ctx)? {
            Some(tile) => tile,
            None => return Ok(false),
        };
        Ok(self.tiles.receive(tile, ctx)?.is_some())
    }
}

/// The part of the canvas a request covers.
pub(crate) fn requested_region(codestream: &Codestream, request: &DecodeRequest) -> Region {
    match request.region {
        Some(region) => region.intersect(&codestream.canvas()),
        None => codestream.canvas(),
    }
}
