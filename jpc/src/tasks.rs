//! The decode tasks the pipeline hands work to.
//!
//! Tier-1 decoding, the wavelet kernels, dequantization, the component
//! transforms and image composition sit behind the traits below. Each call
//! owns the buffer it is given, so tasks of different code-blocks or
//! resolutions can run on a worker pool.

use std::error;

use log::trace;

use crate::geometry::{BandKind, Region};
use crate::marker::{
    CodeBlockStyle, ComponentSize, ComponentTransformation, QuantizationStyle, StepSize,
    WaveletFilter,
};
use crate::model::block::QueuedSegment;

pub type TaskError = Box<dyn error::Error + Send + Sync>;
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Everything the entropy decoder gets for one code-block.
#[derive(Debug)]
pub struct CodeBlockJob<'a> {
    /// Region of the code-block on its band.
    pub region: Region,
    pub band: BandKind,
    pub style: CodeBlockStyle,
    /// Mb of the band.
    pub max_bitplanes: u32,
    pub zero_bitplanes: u32,
    pub passes: u32,
    pub segments: &'a [QueuedSegment],
    /// The bytes of all segments, one after the other.
    pub codeword: &'a [u8],
}

/// Tier-1 decoding (Annex D).
pub trait EntropyDecoder: Send + Sync {
    /// Writes the coefficients of the code-block to `samples`, row by row
    /// with the width of the code-block as stride.
    fn decode(&self, job: &CodeBlockJob<'_>, samples: &mut [f32]) -> TaskResult<()>;
}

/// Leaves every coefficient at zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughEntropyDecoder;

impl EntropyDecoder for PassThroughEntropyDecoder {
    fn decode(&self, job: &CodeBlockJob<'_>, samples: &mut [f32]) -> TaskResult<()> {
        let expected: u64 = job.segments.iter().map(|s| s.length as u64).sum();
        if expected != job.codeword.len() as u64 {
            return Err(format!(
                "codeword of {} bytes for segments of {} bytes",
                job.codeword.len(),
                expected
            )
            .into());
        }
        trace!(
            "code-block {:?}: {} passes in {} bytes left undecoded",
            job.region,
            job.passes,
            job.codeword.len()
        );
        samples.fill(0.0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DequantizationJob {
    pub band: BandKind,
    pub style: QuantizationStyle,
    pub step: StepSize,
    /// Rb without the band gain, the component precision.
    pub precision: u8,
}

/// Scalar dequantization (E.1).
pub trait Dequantizer: Send + Sync {
    fn dequantize(&self, job: &DequantizationJob, samples: &mut [f32]) -> TaskResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScalarDequantizer;

impl ScalarDequantizer {
    /// E-3 step size of a band.
    pub fn step_size(job: &DequantizationJob) -> f32 {
        let range = job.precision as i32 + job.band.gain() as i32;
        let exponent = range - job.step.exponent as i32;
        2f32.powi(exponent) * (1.0 + job.step.mantissa as f32 / 2048.0)
    }
}

impl Dequantizer for ScalarDequantizer {
    fn dequantize(&self, job: &DequantizationJob, samples: &mut [f32]) -> TaskResult<()> {
        // Reversible coefficients are integers already
        if job.style == QuantizationStyle::No {
            return Ok(());
        }
        let step = Self::step_size(job);
        for sample in samples.iter_mut() {
            *sample *= step;
        }
        Ok(())
    }
}

/// One level of inverse wavelet transform over a tile-component buffer.
///
/// The buffer holds the lower resolution in its top left corner, followed by
/// the HL, LH and HH bands of `resolution`.
#[derive(Debug, Clone, Copy)]
pub struct WaveletJob {
    pub resolution: u8,
    pub filter: WaveletFilter,
    pub region: Region,
    pub low: Region,
    /// Row stride of the buffer.
    pub stride: usize,
}

/// Inverse discrete wavelet transform (Annex F).
pub trait WaveletTransform: Send + Sync {
    fn inverse(&self, job: &WaveletJob, samples: &mut [f32]) -> TaskResult<()>;
}

/// Leaves the bands where they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityWavelet;

impl WaveletTransform for IdentityWavelet {
    fn inverse(&self, job: &WaveletJob, samples: &mut [f32]) -> TaskResult<()> {
        let needed = job.region.height() as usize * job.stride;
        if samples.len() < needed {
            return Err(format!(
                "resolution {} needs {} samples, buffer has {}",
                job.resolution,
                needed,
                samples.len()
            )
            .into());
        }
        Ok(())
    }
}

/// The samples of one component of one tile.
#[derive(Debug, Clone)]
pub struct TilePlane {
    pub component: u16,
    /// Region on the component grid, after resolution reduction.
    pub region: Region,
    pub size: ComponentSize,
    pub samples: Vec<f32>,
}

/// All components of one decoded tile.
#[derive(Debug, Clone)]
pub struct TileSamples {
    pub tile: u32,
    pub planes: Vec<TilePlane>,
}

#[derive(Debug, Clone, Copy)]
pub struct ComponentTransformJob {
    pub transformation: ComponentTransformation,
    /// Filter of the first component, which picks RCT or ICT.
    pub filter: WaveletFilter,
}

/// Inverse multiple component transformation and DC level shift (G.1, G.2).
pub trait ComponentTransform: Send + Sync {
    fn inverse(&self, job: &ComponentTransformJob, tile: &mut TileSamples) -> TaskResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LevelShiftTransform;

impl ComponentTransform for LevelShiftTransform {
    fn inverse(&self, job: &ComponentTransformJob, tile: &mut TileSamples) -> TaskResult<()> {
        if job.transformation == ComponentTransformation::Multiple {
            let count = tile.planes.len();
            let [y0, y1, y2] = match &mut tile.planes[..] {
                [y0, y1, y2, ..] => [y0, y1, y2],
                _ => {
                    return Err(
                        format!("component transformation with {} components", count).into(),
                    )
                }
            };
            if y0.samples.len() != y1.samples.len() || y0.samples.len() != y2.samples.len() {
                return Err("component transformation over differently sized components".into());
            }

            let reversible = job.filter.is_reversible();
            for i in 0..y0.samples.len() {
                let (a, b, c) = (y0.samples[i], y1.samples[i], y2.samples[i]);
                let (r, g, bl) = if reversible {
                    // G-7, G-6, G-8
                    let g = a - ((b + c) / 4.0).floor();
                    (c + g, g, b + g)
                } else {
                    // G-12, G-13, G-14
                    (
                        a + 1.402 * c,
                        a - 0.344_13 * b - 0.714_14 * c,
                        a + 1.772 * b,
                    )
                };
                y0.samples[i] = r;
                y1.samples[i] = g;
                y2.samples[i] = bl;
            }
        }

        // G-1 DC level shift of unsigned components
        for plane in tile.planes.iter_mut() {
            if plane.size.is_signed() {
                continue;
            }
            let shift = 2f32.powi(plane.size.precision() as i32 - 1);
            for sample in plane.samples.iter_mut() {
                *sample += shift;
            }
        }
        Ok(())
    }
}

/// Where the decoded image lies: `region` on the reference grid, with
/// `reduce` resolution levels discarded.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    pub region: Region,
    pub reduce: u8,
    pub components: Vec<ComponentSize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlane {
    /// Region on the component grid, after resolution reduction.
    pub region: Region,
    pub precision: u8,
    pub signed: bool,
    pub samples: Vec<f32>,
}

impl ImagePlane {
    pub fn width(&self) -> u32 {
        self.region.width()
    }

    pub fn height(&self) -> u32 {
        self.region.height()
    }

    /// Sample at `(x, y)` relative to the top left of the plane.
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        self.samples
            .get(y as usize * self.width() as usize + x as usize)
            .copied()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedImage {
    pub components: Vec<ImagePlane>,
}

/// Composes decoded tiles into the caller's image.
pub trait ImageAssembler: Send {
    fn begin(&mut self, layout: &ImageLayout) -> TaskResult<()>;

    fn place_tile(&mut self, tile: &TileSamples) -> TaskResult<()>;

    fn finish(&mut self) -> TaskResult<DecodedImage>;
}

/// One buffer per component covering the requested region.
#[derive(Debug, Default)]
pub struct PlanarAssembler {
    planes: Vec<ImagePlane>,
}

impl ImageAssembler for PlanarAssembler {
    fn begin(&mut self, layout: &ImageLayout) -> TaskResult<()> {
        self.planes = layout
            .components
            .iter()
            .map(|size| {
                let region = layout
                    .region
                    .scale_ceil(
                        size.horizontal_separation() as u32,
                        size.vertical_separation() as u32,
                    )
                    .scale_pow2_ceil(layout.reduce);
                ImagePlane {
                    region,
                    precision: size.precision(),
                    signed: size.is_signed(),
                    samples: vec![0.0; region.area() as usize],
                }
            })
            .collect();
        Ok(())
    }

    fn place_tile(&mut self, tile: &TileSamples) -> TaskResult<()> {
        for plane in &tile.planes {
            let image = self
                .planes
                .get_mut(plane.component as usize)
                .ok_or_else(|| format!("tile {} has unknown component {}", tile.tile, plane.component))?;
            let overlap = plane.region.intersect(&image.region);
            if overlap.is_empty() {
                continue;
            }

            let source_stride = plane.region.width() as usize;
            let target_stride = image.region.width() as usize;
            let width = overlap.width() as usize;
            for y in overlap.y0..overlap.y1 {
                let from = (y - plane.region.y0) as usize * source_stride
                    + (overlap.x0 - plane.region.x0) as usize;
                let to = (y - image.region.y0) as usize * target_stride
                    + (overlap.x0 - image.region.x0) as usize;
                image.samples[to..to + width].copy_from_slice(&plane.samples[from..from + width]);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> TaskResult<DecodedImage> {
        Ok(DecodedImage {
            components: std::mem::take(&mut self.planes),
        })
    }
}

/// The decode tasks of one decode.
pub struct Tasks {
    pub entropy: Box<dyn EntropyDecoder>,
    pub dequantizer: Box<dyn Dequantizer>,
    pub wavelet: Box<dyn WaveletTransform>,
    pub component_transform: Box<dyn ComponentTransform>,
    pub assembler: Box<dyn ImageAssembler>,
}

impl Default for Tasks {
    fn default() -> Self {
        Tasks {
            entropy: Box::new(PassThroughEntropyDecoder),
            dequantizer: Box::new(ScalarDequantizer),
            wavelet: Box::new(IdentityWavelet),
            component_transform: Box::new(LevelShiftTransform),
            assembler: Box::<PlanarAssembler>::default(),
        }
    }
}
