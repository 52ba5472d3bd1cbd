#![allow(dead_code)]

use std::collections::BTreeMap;

use jpc::tasks::{CodeBlockJob, EntropyDecoder, TaskResult};
use jpc::{CodestreamError, Diagnostics, PacketKey};

/// Writes codestreams marker segment by marker segment.
pub struct CodestreamBuilder {
    bytes: Vec<u8>,
}

impl CodestreamBuilder {
    /// Starts with SOC.
    pub fn new() -> Self {
        CodestreamBuilder {
            bytes: vec![0xFF, 0x4F],
        }
    }

    /// Any marker segment, Lxxx is derived from `body`.
    pub fn segment(mut self, code: u8, body: &[u8]) -> Self {
        self.bytes.extend([0xFF, code]);
        self.bytes.extend(((body.len() + 2) as u16).to_be_bytes());
        self.bytes.extend(body);
        self
    }

    /// SIZ with no offsets, 8 bit unsigned components sampled 1:1.
    pub fn siz(
        self,
        width: u32,
        height: u32,
        tile_width: u32,
        tile_height: u32,
        components: u16,
    ) -> Self {
        let mut body = vec![];
        body.extend(0u16.to_be_bytes());
        for value in [width, height, 0, 0, tile_width, tile_height, 0, 0] {
            body.extend(value.to_be_bytes());
        }
        body.extend(components.to_be_bytes());
        for _ in 0..components {
            body.extend([7, 1, 1]);
        }
        self.segment(0x51, &body)
    }

    /// COD with 64x64 code-blocks, the 5/3 filter and maximal precincts.
    pub fn cod(self, scod: u8, progression: u8, layers: u16, levels: u8) -> Self {
        let mut body = vec![scod, progression];
        body.extend(layers.to_be_bytes());
        body.extend([0, levels, 4, 4, 0, 1]);
        self.segment(0x52, &body)
    }

    /// QCD without quantization, one exponent per band.
    pub fn qcd(self, levels: u8) -> Self {
        let mut body = vec![0x40];
        for _ in 0..(3 * levels as usize + 1) {
            body.push(8 << 3);
        }
        self.segment(0x5C, &body)
    }

    /// A tile-part whose Psot covers `data`.
    pub fn tile_part(self, tile: u16, part: u8, parts: u8, data: &[u8]) -> Self {
        self.tile_part_with(tile, part, parts, &[], data)
    }

    /// A tile-part with extra marker segments between SOT and SOD.
    pub fn tile_part_with(
        mut self,
        tile: u16,
        part: u8,
        parts: u8,
        segments: &[(u8, &[u8])],
        data: &[u8],
    ) -> Self {
        let header: usize = segments.iter().map(|(_, body)| body.len() + 4).sum();
        let psot = (12 + header + 2 + data.len()) as u32;
        self.bytes.extend([0xFF, 0x90, 0x00, 0x0A]);
        self.bytes.extend(tile.to_be_bytes());
        self.bytes.extend(psot.to_be_bytes());
        self.bytes.extend([part, parts]);
        for (code, body) in segments {
            self = self.segment(*code, body);
        }
        self.bytes.extend([0xFF, 0x93]);
        self.bytes.extend(data);
        self
    }

    pub fn eoc(mut self) -> Self {
        self.bytes.extend([0xFF, 0xD9]);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Records what the pipeline reports.
#[derive(Debug, Default)]
pub struct Recorder {
    pub tiles: Vec<u32>,
    pub packets: Vec<(u32, PacketKey, u64, u64)>,
    pub corrupt: Vec<(u32, PacketKey)>,
    // (tile, component, resolution) -> blocks expected
    pub started: BTreeMap<(u32, u16, u8), u64>,
    pub blocks: BTreeMap<(u32, u16, u8), u64>,
    pub resolutions: Vec<(u32, u16, u8)>,
    pub finished: Vec<u32>,
}

impl Diagnostics for Recorder {
    fn tile_instantiated(&mut self, tile: u32) {
        self.tiles.push(tile);
    }

    fn packet(&mut self, tile: u32, key: PacketKey, header_length: u64, body_length: u64) {
        self.packets.push((tile, key, header_length, body_length));
    }

    fn corrupt_packet(&mut self, tile: u32, key: PacketKey, _error: &CodestreamError) {
        self.corrupt.push((tile, key));
    }

    fn resolution_started(&mut self, tile: u32, component: u16, resolution: u8, blocks: u64) {
        self.started.insert((tile, component, resolution), blocks);
    }

    fn block_finished(&mut self, tile: u32, component: u16, resolution: u8) {
        *self.blocks.entry((tile, component, resolution)).or_default() += 1;
    }

    fn resolution_finished(&mut self, tile: u32, component: u16, resolution: u8) {
        self.resolutions.push((tile, component, resolution));
    }

    fn tile_finished(&mut self, tile: u32) {
        self.finished.push(tile);
    }
}

/// An entropy decoder that remembers the jobs it was given.
#[derive(Debug, Default)]
pub struct JobLog {
    pub jobs: std::sync::Mutex<Vec<(u32, Vec<(u32, u32)>, Vec<u8>)>>,
}

/// Shares a [`JobLog`] with the test that installed it.
pub struct LoggingEntropyDecoder(pub std::sync::Arc<JobLog>);

impl EntropyDecoder for LoggingEntropyDecoder {
    fn decode(&self, job: &CodeBlockJob<'_>, _samples: &mut [f32]) -> TaskResult<()> {
        let segments = job
            .segments
            .iter()
            .map(|segment| (segment.passes, segment.length))
            .collect();
        self.0
            .jobs
            .lock()
            .map_err(|_| "job log poisoned")?
            .push((job.passes, segments, job.codeword.to_vec()));
        Ok(())
    }
}
