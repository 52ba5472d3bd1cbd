use log::trace;

use super::{PacketUnit, Receiver, ResolutionEvent, StageContext};
use crate::countdown::CompletionToken;
use crate::error::{invalid, CodestreamError, Result};
use crate::geometry::{BandKind, Region};
use crate::marker::StepSize;
use crate::model::block::QueuedSegment;
use crate::model::component::TileComponent;
use crate::source::ByteSource;
use crate::tasks::{CodeBlockJob, DequantizationJob, Tasks};

/// A code-block that has seen all its layers.
struct FinishedBlock {
    band: BandKind,
    band_region: Region,
    region: Region,
    max_bitplanes: u32,
    zero_bitplanes: u32,
    passes: u32,
    segments: Vec<QueuedSegment>,
    step: StepSize,
    token: Option<CompletionToken>,
}

/// Queues the codeword segments of each packet on their code-blocks and
/// decodes a code-block once its last layer arrived.
#[derive(Debug, Default)]
pub(crate) struct BlockContributionStage;

impl Receiver<PacketUnit> for BlockContributionStage {
    type Out = ResolutionEvent;

    fn receive(
        &mut self,
        packet: PacketUnit,
        ctx: &mut StageContext<'_>,
    ) -> Result<Option<ResolutionEvent>> {
        let header = packet.header;
        let key = header.key;
        let tile = ctx
            .codestream
            .tile_mut(header.tile)
            .ok_or_else(|| invalid!("tile {} not instantiated", header.tile))?;
        let no_layers = tile.no_layers;
        let component = tile
            .components
            .get_mut(key.component as usize)
            .ok_or_else(|| invalid!("packet {:?} for missing component", key))?;

        let mut completed = false;
        for contribution in &header.contributions {
            let mut finished = {
                let resolution = component
                    .resolutions
                    .get_mut(key.resolution as usize)
                    .ok_or_else(|| invalid!("packet {:?} for missing resolution", key))?;
                let band = resolution
                    .bands
                    .get_mut(contribution.band)
                    .ok_or_else(|| invalid!("packet {:?} for missing band", key))?;
                let (kind, band_region, max_bitplanes, step) =
                    (band.kind, band.region, band.max_bitplanes, band.step);
                let block = band
                    .precincts
                    .get_mut(key.precinct)
                    .and_then(|precinct| precinct.blocks.get_mut(contribution.block))
                    .ok_or_else(|| {
                        invalid!(
                            "packet {:?} for missing code-block {}",
                            key,
                            contribution.block
                        )
                    })?;
                if block.finished {
                    continue;
                }

                for segment in &contribution.segments {
                    block.queue(segment);
                }
                block.layers_seen += 1;
                if block.layers_seen < no_layers {
                    continue;
                }

                let finished = FinishedBlock {
                    band: kind,
                    band_region,
                    region: block.region,
                    max_bitplanes,
                    zero_bitplanes: block.zero_bitplanes,
                    passes: block.queued_passes(),
                    segments: std::mem::take(&mut block.segments),
                    step,
                    token: block.token.take(),
                };
                block.release();
                finished
            };

            if let Some(token) = finished.token.take() {
                decode_block(
                    component,
                    key.resolution,
                    &finished,
                    ctx.source,
                    ctx.tasks,
                )?;
                let resolution = &component.resolutions[key.resolution as usize];
                if let Some(countdown) = &resolution.countdown {
                    completed |= countdown.complete(token)?;
                }
                ctx.diagnostics
                    .block_finished(header.tile, component.index, key.resolution);
            }
        }

        if completed {
            trace!(
                "tile {} component {} resolution {} complete",
                header.tile,
                key.component,
                key.resolution
            );
            return Ok(Some(ResolutionEvent {
                tile: header.tile,
                component: key.component,
                resolution: Some(key.resolution),
            }));
        }
        Ok(None)
    }
}

/// Entropy decodes and dequantizes `block`, then writes its coefficients to
/// the band's place in the tile-component buffer.
fn decode_block(
    component: &mut TileComponent,
    resolution: u8,
    block: &FinishedBlock,
    source: &mut ByteSource,
    tasks: &mut Tasks,
) -> Result<()> {
    let width = block.region.width() as usize;
    let height = block.region.height() as usize;
    let mut samples = vec![0.0f32; width * height];

    if block.passes > 0 {
        let mut codeword = vec![];
        for segment in &block.segments {
            for range in &segment.ranges {
                codeword.extend(source.read_substream(*range)?);
            }
        }
        let job = CodeBlockJob {
            region: block.region,
            band: block.band,
            style: component.coding.code_block_style(),
            max_bitplanes: block.max_bitplanes,
            zero_bitplanes: block.zero_bitplanes,
            passes: block.passes,
            segments: &block.segments,
            codeword: &codeword,
        };
        tasks
            .entropy
            .decode(&job, &mut samples)
            .map_err(|e| CodestreamError::task("entropy", "block-decode", e))?;

        let job = DequantizationJob {
            band: block.band,
            style: component.quantization.style,
            step: block.step,
            precision: component.size.precision(),
        };
        tasks
            .dequantizer
            .dequantize(&job, &mut samples)
            .map_err(|e| CodestreamError::task("dequantizer", "block-dequantize", e))?;
    }

    let (band_x, band_y) = component.band_origin(resolution, block.band);
    let x0 = (band_x + block.region.x0 - block.band_region.x0) as usize;
    let y0 = (band_y + block.region.y0 - block.band_region.y0) as usize;
    let stride = component.output_region().width() as usize;
    let index = component.index;
    let buffer = component.samples_mut();
    for (row, line) in samples.chunks(width.max(1)).enumerate() {
        let start = (y0 + row) * stride + x0;
        let target = buffer.get_mut(start..start + line.len()).ok_or_else(|| {
            invalid!(
                "code-block {:?} falls outside component {} samples",
                block.region,
                index
            )
        })?;
        target.copy_from_slice(line);
    }
    Ok(())
}
