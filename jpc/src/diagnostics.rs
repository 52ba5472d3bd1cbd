use crate::error::CodestreamError;
use crate::progression::PacketKey;
use crate::tile_part::TilePartPointer;

/// Observer hooks threaded through a decode.
///
/// Every hook does nothing by default, so an implementation only overrides
/// the events it cares about.
pub trait Diagnostics {
    fn tile_part(&mut self, _pointer: &TilePartPointer) {}

    fn tile_instantiated(&mut self, _tile: u32) {}

    fn packet(&mut self, _tile: u32, _key: PacketKey, _header_length: u64, _body_length: u64) {}

    /// A packet that was abandoned, `error` being the reason.
    fn corrupt_packet(&mut self, _tile: u32, _key: PacketKey, _error: &CodestreamError) {}

    /// A resolution of a new tile-component waits for `blocks` code-blocks.
    fn resolution_started(&mut self, _tile: u32, _component: u16, _resolution: u8, _blocks: u64) {}

    /// One code-block reported to its resolution.
    fn block_finished(&mut self, _tile: u32, _component: u16, _resolution: u8) {}

    fn resolution_finished(&mut self, _tile: u32, _component: u16, _resolution: u8) {}

    fn tile_finished(&mut self, _tile: u32) {}
}

/// Diagnostics that ignore everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiagnostics;

impl Diagnostics for NoDiagnostics {}
