//! Packet header decoding (B.10).

use std::io::Read;

use log::{trace, warn};

use crate::bit_reader::PacketBitReader;
use crate::countdown::Countdown;
use crate::error::{invalid, Result};
use crate::marker::CodeBlockStyle;
use crate::model::band::Subband;
use crate::model::component::TileComponent;
use crate::model::resolution::Resolution;
use crate::progression::PacketKey;
use crate::source::Substream;

// Passes in the first, arithmetic coded, segment of the bypass mode
const BYPASS_FIRST_SEGMENT_PASSES: u32 = 10;

/// Codeword bytes of one segment as signalled by one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodewordSegment {
    /// Segment the passes belong to, counted over the life of the code-block.
    pub index: u32,
    pub passes: u32,
    pub length: u32,
    /// Where the bytes are in the codestream, None until the body was read
    /// or when the body was cut short.
    pub data: Option<Substream>,
}

/// What one packet adds to one code-block of its precinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContribution {
    /// Position of the band in its resolution.
    pub band: usize,
    /// Raster index of the code-block in its band-precinct.
    pub block: u32,
    pub new_passes: u32,
    pub segments: Vec<CodewordSegment>,
}

impl BlockContribution {
    fn empty(band: usize, block: u32) -> Self {
        BlockContribution {
            band,
            block,
            new_passes: 0,
            segments: vec![],
        }
    }

    pub fn body_length(&self) -> u64 {
        self.segments.iter().map(|segment| segment.length as u64).sum()
    }
}

/// A decoded packet header and the extent of its packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub tile: u32,
    pub key: PacketKey,
    /// Zero length packet, the first header bit was 0.
    pub empty: bool,
    /// One entry per code-block of the precinct, in band then raster order.
    pub contributions: Vec<BlockContribution>,
    /// Bytes of header read from the tile-part, SOP and EPH included. Zero
    /// when the header came from PPM or PPT.
    pub header_length: u64,
    /// Offset of the first body byte.
    pub body_offset: u64,
    pub body_length: u64,
}

/// B.10.6 number of new coding passes (Table B.4).
pub fn decode_pass_count<R: Read>(bits: &mut PacketBitReader<R>) -> Result<u32> {
    let mut passes = 1 + bits.read_bit()? as u32;
    if passes >= 2 {
        passes += bits.read_bit()? as u32;
        if passes >= 3 {
            passes += bits.read_bits(2)?;
            if passes >= 6 {
                passes += bits.read_bits(5)?;
                if passes >= 37 {
                    passes += bits.read_bits(7)?;
                }
            }
        }
    }
    Ok(passes)
}

/// Codeword segment of pass `pass` (0 based) of a code-block (Table D.9).
pub fn segment_index(style: CodeBlockStyle, pass: u32) -> u32 {
    if style.termination_on_each_pass() {
        pass
    } else if style.selective_bypass() {
        if pass < BYPASS_FIRST_SEGMENT_PASSES {
            0
        } else {
            // Raw significance and refinement passes share a segment, each
            // cleanup pass has its own
            let offset = pass - BYPASS_FIRST_SEGMENT_PASSES;
            1 + 2 * (offset / 3) + u32::from(offset % 3 == 2)
        }
    } else {
        0
    }
}

/// Splits `new_passes` passes following `first_pass` into runs that share a
/// codeword segment, as `(index, passes)` pairs.
fn segment_runs(style: CodeBlockStyle, first_pass: u32, new_passes: u32) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = vec![];
    for pass in first_pass..first_pass + new_passes {
        let index = segment_index(style, pass);
        match runs.last_mut() {
            Some((last, passes)) if *last == index => *passes += 1,
            _ => runs.push((index, 1)),
        }
    }
    runs
}

/// Zero contributions for every code-block of the precinct, instantiating
/// the ones not seen yet.
fn empty_band_contributions(
    bands: &mut [Subband],
    countdown: Option<&Countdown>,
    key: PacketKey,
    cell: (u32, u32),
) -> Result<Vec<BlockContribution>> {
    let mut contributions = vec![];
    for (band_index, band) in bands.iter_mut().enumerate() {
        let block_partition = band.block_partition;
        let precinct = band.precinct_mut(key.precinct, cell)?;
        for block in 0..precinct.no_blocks() {
            precinct.block_mut(block, &block_partition, countdown)?;
            contributions.push(BlockContribution::empty(band_index, block));
        }
    }
    Ok(contributions)
}

fn resolution_mut(component: &mut TileComponent, key: PacketKey) -> Result<&mut Resolution> {
    let index = component.index;
    component
        .resolutions
        .get_mut(key.resolution as usize)
        .ok_or_else(|| {
            invalid!(
                "packet {:?} for missing resolution of component {}",
                key,
                index
            )
        })
}

/// Contributions of a packet that carries nothing, either because it is
/// empty or because its header could not be read.
pub(crate) fn empty_contributions(
    component: &mut TileComponent,
    key: PacketKey,
) -> Result<Vec<BlockContribution>> {
    let resolution = resolution_mut(component, key)?;
    resolution.precinct_mut(key.precinct)?;
    let cell = resolution.precinct_cell(key.precinct);
    let Resolution {
        bands, countdown, ..
    } = resolution;
    empty_band_contributions(bands, countdown.as_ref(), key, cell)
}

/// B.10 decodes the header of packet `key` of `component`, updating the
/// inclusion, bit-plane and LBlock state of its code-blocks.
pub(crate) fn decode_packet_header<R: Read>(
    tile: u32,
    component: &mut TileComponent,
    key: PacketKey,
    bits: &mut PacketBitReader<R>,
) -> Result<PacketHeader> {
    let style = component.coding.code_block_style();
    let resolution = resolution_mut(component, key)?;
    resolution.precinct_mut(key.precinct)?.packets_read += 1;
    let cell = resolution.precinct_cell(key.precinct);
    let Resolution {
        bands, countdown, ..
    } = resolution;

    let mut header = PacketHeader {
        tile,
        key,
        empty: false,
        contributions: vec![],
        header_length: 0,
        body_offset: 0,
        body_length: 0,
    };

    // B.10.3 zero length packet
    if bits.read_bit()? == 0 {
        trace!("packet {:?} is empty", key);
        header.empty = true;
        header.contributions = empty_band_contributions(bands, countdown.as_ref(), key, cell)?;
        return Ok(header);
    }

    for (band_index, band) in bands.iter_mut().enumerate() {
        let block_partition = band.block_partition;
        let max_bitplanes = band.max_bitplanes;
        let precinct = band.precinct_mut(key.precinct, cell)?;
        let blocks_wide = precinct.blocks_wide();

        for b in 0..precinct.no_blocks() {
            let (x, y) = (b % blocks_wide, b / blocks_wide);
            let included_before = precinct
                .block_mut(b, &block_partition, countdown.as_ref())?
                .included;

            // B.10.4 code-block inclusion
            let included = if included_before {
                bits.read_bit()? == 1
            } else {
                precinct
                    .inclusion
                    .decode(bits, x, y, key.layer as u32 + 1)?
                    .is_some()
            };
            if !included {
                header.contributions.push(BlockContribution::empty(band_index, b));
                continue;
            }

            // B.10.5 zero bit-planes, read on first inclusion
            let zero_bitplanes = if included_before {
                None
            } else {
                let mut threshold = 1;
                loop {
                    if let Some(value) = precinct.zero_bitplanes.decode(bits, x, y, threshold)? {
                        break Some(value);
                    }
                    threshold += 1;
                    if threshold > u8::MAX as u32 {
                        return Err(invalid!(
                            "zero bit-planes of code-block {} exceed {}",
                            b,
                            u8::MAX
                        ));
                    }
                }
            };

            let new_passes = decode_pass_count(bits)?;

            let block = precinct.block_mut(b, &block_partition, countdown.as_ref())?;
            if let Some(zero_bitplanes) = zero_bitplanes {
                if zero_bitplanes > max_bitplanes {
                    warn!(
                        "code-block {:?} signals {} zero bit-planes of {}",
                        block.region, zero_bitplanes, max_bitplanes
                    );
                }
                block.included = true;
                block.zero_bitplanes = zero_bitplanes;
                block.beta = 3;
            }

            // B.10.7.1 LBlock grows by the number of leading 1 bits
            while bits.read_bit()? == 1 {
                block.beta = block
                    .beta
                    .checked_add(1)
                    .ok_or_else(|| invalid!("LBlock of code-block {:?} overflows", block.region))?;
            }

            let mut segments = vec![];
            for (index, passes) in segment_runs(style, block.passes, new_passes) {
                // B.10.7.2 beta + floor(log2(passes)) length bits
                let length_bits = block.beta as u32 + passes.ilog2();
                if length_bits > 32 {
                    return Err(invalid!(
                        "{} bit codeword length for code-block {:?}",
                        length_bits,
                        block.region
                    ));
                }
                let length = bits.read_bits(length_bits as u8)?;
                segments.push(CodewordSegment {
                    index,
                    passes,
                    length,
                    data: None,
                });
            }
            block.passes += new_passes;

            trace!(
                "packet {:?} band {} block {}: {} passes, lblock {}, lengths {:?}",
                key,
                band_index,
                b,
                new_passes,
                block.beta,
                segments.iter().map(|s| s.length).collect::<Vec<_>>()
            );

            let contribution = BlockContribution {
                band: band_index,
                block: b,
                new_passes,
                segments,
            };
            header.body_length += contribution.body_length();
            header.contributions.push(contribution);
        }
    }

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Region;
    use crate::marker::{
        CodingStyleParameters, ComponentSize, Quantization, QuantizationStyle, StepSize,
    };
    use rstest::rstest;
    use std::io::Cursor;

    fn bits(data: &[u8]) -> PacketBitReader<Cursor<Vec<u8>>> {
        PacketBitReader::new(Cursor::new(data.to_vec()), 0)
    }

    fn component(width: u32, height: u32, style: u8) -> TileComponent {
        TileComponent::new(
            0,
            Region::new(0, 0, width, height),
            ComponentSize {
                depth: 7,
                horizontal_separation: 1,
                vertical_separation: 1,
            },
            CodingStyleParameters {
                no_decomposition_levels: 0,
                code_block_width_offset: 0,
                code_block_height_offset: 0,
                code_block_style: CodeBlockStyle(style),
                ..Default::default()
            },
            Quantization {
                style: QuantizationStyle::No,
                guard_bits: 2,
                step_sizes: vec![StepSize {
                    exponent: 8,
                    mantissa: 0,
                }],
            },
            0,
            0,
            None,
        )
        .unwrap()
    }

    #[rstest]
    #[case(&[0x00], 1)]
    #[case(&[0x80], 2)]
    #[case(&[0xC0], 3)]
    #[case(&[0xD0], 4)]
    #[case(&[0xE0], 5)]
    #[case(&[0xF0, 0x00], 6)]
    #[case(&[0xFF, 0x00], 36)]
    #[case(&[0xFF, 0x40, 0x00], 37)]
    fn test_pass_count_codewords(#[case] data: &[u8], #[case] expected: u32) {
        assert_eq!(decode_pass_count(&mut bits(data)).unwrap(), expected);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(9, 0)]
    #[case(10, 1)]
    #[case(11, 1)]
    #[case(12, 2)]
    #[case(13, 3)]
    #[case(15, 4)]
    fn test_bypass_segments(#[case] pass: u32, #[case] expected: u32) {
        assert_eq!(segment_index(CodeBlockStyle(0b0000_0001), pass), expected);
    }

    #[test]
    fn test_segment_runs() {
        assert_eq!(segment_runs(CodeBlockStyle(0), 3, 4), vec![(0, 4)]);
        assert_eq!(
            segment_runs(CodeBlockStyle(0b0000_0100), 1, 3),
            vec![(1, 1), (2, 1), (3, 1)]
        );
        assert_eq!(
            segment_runs(CodeBlockStyle(0b0000_0001), 8, 6),
            vec![(0, 2), (1, 2), (2, 1), (3, 1)]
        );
    }

    #[test]
    fn test_two_layer_trace() {
        // One 4x4 code-block in a single 4x4 precinct
        let mut component = component(4, 4, 0);

        // Layer 0: included, 2 zero bit-planes, 3 passes, 10 bytes
        let mut reader = bits(&[0xCE, 0x28]);
        let header =
            decode_packet_header(0, &mut component, PacketKey::new(0, 0, 0, 0), &mut reader)
                .unwrap();
        assert!(!header.empty);
        assert_eq!(header.contributions.len(), 1);
        assert_eq!(header.contributions[0].new_passes, 3);
        assert_eq!(header.contributions[0].segments[0].length, 10);
        assert_eq!(header.body_length, 10);
        assert_eq!(reader.bytes_consumed(), 2);

        // Layer 1: 1 pass, LBlock grows to 4, 5 bytes
        let mut reader = bits(&[0xD2, 0x80]);
        let header =
            decode_packet_header(0, &mut component, PacketKey::new(0, 0, 1, 0), &mut reader)
                .unwrap();
        assert_eq!(header.contributions[0].new_passes, 1);
        assert_eq!(header.contributions[0].segments[0].length, 5);

        let block = component.resolutions[0].bands[0]
            .precinct(0)
            .and_then(|precinct| precinct.block(0))
            .unwrap();
        assert_eq!(block.zero_bitplanes(), 2);
        assert_eq!(block.lblock(), 4);
        assert_eq!(block.passes(), 4);
    }

    #[test]
    fn test_empty_packet_touches_every_block() {
        // 4x2 code-blocks of 4x4 samples
        let mut component = component(16, 8, 0);
        let header = decode_packet_header(
            0,
            &mut component,
            PacketKey::new(0, 0, 0, 0),
            &mut bits(&[0x00]),
        )
        .unwrap();
        assert!(header.empty);
        assert_eq!(header.contributions.len(), 8);
        assert!(header
            .contributions
            .iter()
            .all(|contribution| contribution.new_passes == 0));
        assert_eq!(
            component.resolutions[0].bands[0]
                .precinct(0)
                .map(|precinct| precinct.blocks.len()),
            Some(8)
        );
    }

    #[test]
    fn test_missing_resolution() {
        let mut component = component(4, 4, 0);
        assert!(decode_packet_header(
            0,
            &mut component,
            PacketKey::new(0, 1, 0, 0),
            &mut bits(&[0x00])
        )
        .is_err());
    }
}
