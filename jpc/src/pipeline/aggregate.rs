use log::{debug, info};

use super::{ComponentEvent, ImageComplete, Receiver, ResolutionEvent, StageContext, TileEvent};
use crate::error::{invalid, CodestreamError, Result};
use crate::tasks::{ComponentTransformJob, TilePlane, TileSamples, WaveletJob};

/// Reconstructs the resolutions of a tile-component in increasing order as
/// they complete.
#[derive(Debug, Default)]
pub(crate) struct ResolutionAggregator;

impl Receiver<ResolutionEvent> for ResolutionAggregator {
    type Out = ComponentEvent;

    fn receive(
        &mut self,
        event: ResolutionEvent,
        ctx: &mut StageContext<'_>,
    ) -> Result<Option<ComponentEvent>> {
        let tile = match ctx.codestream.tile_mut(event.tile) {
            Some(tile) if !tile.is_finished() => tile,
            _ => return Ok(None),
        };
        let component = tile
            .components
            .get_mut(event.component as usize)
            .ok_or_else(|| invalid!("event for missing component {}", event.component))?;

        let mut done = false;
        // F.3 each level needs the one below it
        while component.next_resolution <= component.top_resolution {
            let r = component.next_resolution;
            if !component.resolutions[r as usize].is_complete() {
                break;
            }

            if r > 0 {
                let job = WaveletJob {
                    resolution: r,
                    filter: component.coding.filter(),
                    region: component.resolutions[r as usize].region,
                    low: component.resolutions[r as usize - 1].region,
                    stride: component.output_region().width() as usize,
                };
                ctx.tasks
                    .wavelet
                    .inverse(&job, component.samples_mut())
                    .map_err(|e| CodestreamError::task("wavelet", "resolution-inverse", e))?;
            }

            let token = component.resolutions[r as usize]
                .token
                .take()
                .ok_or_else(|| invalid!("resolution {} finished twice", r))?;
            done = component.countdown.complete(token)?;
            ctx.diagnostics
                .resolution_finished(event.tile, component.index, r);
            component.next_resolution += 1;
        }

        if done {
            debug!(
                "tile {} component {} reconstructed",
                event.tile, event.component
            );
            return Ok(Some(ComponentEvent {
                tile: event.tile,
                component: event.component,
            }));
        }
        Ok(None)
    }
}

/// Counts the reconstructed components of a tile.
#[derive(Debug, Default)]
pub(crate) struct TileComponentAggregator;

impl Receiver<ComponentEvent> for TileComponentAggregator {
    type Out = TileEvent;

    fn receive(
        &mut self,
        event: ComponentEvent,
        ctx: &mut StageContext<'_>,
    ) -> Result<Option<TileEvent>> {
        let tile = ctx
            .codestream
            .tile_mut(event.tile)
            .ok_or_else(|| invalid!("tile {} not instantiated", event.tile))?;
        let token = tile
            .components
            .get_mut(event.component as usize)
            .and_then(|component| component.token.take())
            .ok_or_else(|| invalid!("component {} finished twice", event.component))?;
        if tile.countdown.complete(token)? {
            return Ok(Some(TileEvent { tile: event.tile }));
        }
        Ok(None)
    }
}

/// Applies the inverse component transform to a finished tile and hands it
/// to the assembler.
#[derive(Debug, Default)]
pub(crate) struct TileAggregator;

impl Receiver<TileEvent> for TileAggregator {
    type Out = ImageComplete;

    fn receive(
        &mut self,
        event: TileEvent,
        ctx: &mut StageContext<'_>,
    ) -> Result<Option<ImageComplete>> {
        let tile = ctx
            .codestream
            .tile_mut(event.tile)
            .ok_or_else(|| invalid!("tile {} not instantiated", event.tile))?;

        let filter = tile
            .components
            .first()
            .map(|component| component.coding.filter())
            .ok_or_else(|| invalid!("tile {} has no components", event.tile))?;
        let job = ComponentTransformJob {
            transformation: tile.component_transformation,
            filter,
        };
        let mut samples = TileSamples {
            tile: event.tile,
            planes: tile
                .components
                .iter_mut()
                .map(|component| TilePlane {
                    component: component.index,
                    region: component.output_region(),
                    size: component.size,
                    samples: component.take_samples(),
                })
                .collect(),
        };

        ctx.tasks
            .component_transform
            .inverse(&job, &mut samples)
            .map_err(|e| CodestreamError::task("component-transform", "tile-inverse", e))?;
        ctx.tasks
            .assembler
            .place_tile(&samples)
            .map_err(|e| CodestreamError::task("assembler", "tile-place", e))?;

        let token = tile.token.take();
        tile.release();
        ctx.diagnostics.tile_finished(event.tile);
        info!("tile {} finished", event.tile);

        if let (Some(countdown), Some(token)) = (&ctx.codestream.countdown, token) {
            if countdown.complete(token)? {
                return Ok(Some(ImageComplete));
            }
        }
        Ok(None)
    }
}
