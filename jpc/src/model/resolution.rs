use log::trace;

use crate::countdown::{CompletionToken, Countdown};
use crate::error::{invalid, Result};
use crate::geometry::{band_region, BandKind, GridRegion, Partition, Region};
use crate::marker::{CodingStyleParameters, Quantization, QuantizationStyle, StepSize};
use crate::model::band::Subband;
use crate::sparse::SparseArray;

// Upper bound on precincts per resolution
const MAX_PRECINCTS: u64 = 1 << 30;

/// A precinct of a resolution, the spatial unit of one packet per layer.
#[derive(Debug)]
pub struct Precinct {
    pub(crate) index: u32,
    pub(crate) region: Region,
    pub(crate) packets_read: u16,
}

impl Precinct {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn packets_read(&self) -> u16 {
        self.packets_read
    }
}

impl GridRegion for Precinct {
    fn region(&self) -> Region {
        self.region
    }
}

/// One resolution level of a tile-component.
#[derive(Debug)]
pub struct Resolution {
    pub(crate) index: u8,
    pub(crate) region: Region,
    pub(crate) precinct_partition: Partition,
    pub(crate) first_precinct: (u32, u32),
    pub(crate) precincts: SparseArray<Precinct>,
    pub(crate) bands: Vec<Subband>,
    pub(crate) no_blocks: u64,

    // Code-blocks still to finish, None when the resolution is discarded
    pub(crate) countdown: Option<Countdown>,
    // Reported to the tile-component once every code-block finished
    pub(crate) token: Option<CompletionToken>,
}

/// Everything a resolution needs from its tile-component.
pub(crate) struct ResolutionParameters<'a> {
    pub tile_component: Region,
    pub coding: &'a CodingStyleParameters,
    pub quantization: &'a Quantization,
    pub roi_shift: u8,
}

// E.1.1.2 step size of band b at level nb
fn band_step(quantization: &Quantization, b: usize, levels: u8, nb: u8) -> Result<StepSize> {
    match quantization.style {
        QuantizationStyle::ScalarDerived => {
            let base = quantization
                .step_sizes
                .first()
                .copied()
                .ok_or_else(|| invalid!("derived quantization without a step size"))?;
            let exponent = base.exponent as i32 - levels as i32 + nb as i32;
            if exponent < 0 {
                return Err(invalid!("derived step exponent {} for band {}", exponent, b));
            }
            Ok(StepSize {
                exponent: exponent as u8,
                mantissa: base.mantissa,
            })
        }
        QuantizationStyle::No | QuantizationStyle::ScalarExpounded => quantization
            .step_sizes
            .get(b)
            .copied()
            .ok_or_else(|| {
                invalid!(
                    "{} step sizes signalled, band {} needs one",
                    quantization.step_sizes.len(),
                    b
                )
            }),
    }
}

impl Resolution {
    pub(crate) fn new(
        parameters: &ResolutionParameters<'_>,
        index: u8,
        decoded: bool,
        token: Option<CompletionToken>,
    ) -> Result<Self> {
        let levels = parameters.coding.no_decomposition_levels();
        let region = parameters
            .tile_component
            .scale_pow2_ceil(levels - index);

        // B.6 precinct partition, anchored at the origin
        let precinct_size = parameters.coding.precinct_size(index);
        let (ppx, ppy) = (
            precinct_size.width_exponent(),
            precinct_size.height_exponent(),
        );
        let precinct_partition = Partition::pow2(ppx, ppy);
        let (precincts_wide, precincts_high) = region.num_children(&precinct_partition);
        let no_precincts = precincts_wide as u64 * precincts_high as u64;
        if no_precincts > MAX_PRECINCTS {
            return Err(invalid!(
                "{} precincts in resolution {} exceed 2^30",
                no_precincts,
                index
            ));
        }
        let first_precinct = if region.is_empty() {
            (0, 0)
        } else {
            region.first_child_idx(&precinct_partition)
        };

        // B.7 band-precincts are half the precinct size except at NLLL
        let (bppx, bppy) = if index == 0 {
            (ppx, ppy)
        } else {
            (ppx - 1, ppy - 1)
        };
        let block_partition = Partition::pow2(
            parameters.coding.code_block_width_exponent().min(bppx),
            parameters.coding.code_block_height_exponent().min(bppy),
        );

        let kinds: &[BandKind] = if index == 0 {
            &[BandKind::LL]
        } else {
            &[BandKind::HL, BandKind::LH, BandKind::HH]
        };
        let level = if index == 0 { levels } else { levels - index + 1 };

        let mut bands = Vec::with_capacity(kinds.len());
        for (k, kind) in kinds.iter().enumerate() {
            let b = if index == 0 {
                0
            } else {
                1 + 3 * (index as usize - 1) + k
            };
            let step = band_step(parameters.quantization, b, levels, level)?;
            // E-2, extended by the region of interest shift
            let max_bitplanes = (parameters.quantization.guard_bits as u32
                + step.exponent as u32)
                .saturating_sub(1)
                + parameters.roi_shift as u32;

            bands.push(Subband {
                kind: *kind,
                index: b,
                region: band_region(&parameters.tile_component, *kind, level),
                level,
                step,
                max_bitplanes,
                block_partition,
                precinct_partition: Partition::pow2(bppx, bppy),
                precincts: SparseArray::new(precincts_wide, precincts_high),
            });
        }

        let no_blocks = bands.iter().map(|band| band.no_blocks()).sum();
        trace!(
            "resolution {} {:?}: {}x{} precincts, {} code-blocks",
            index,
            region,
            precincts_wide,
            precincts_high,
            no_blocks
        );

        Ok(Resolution {
            index,
            region,
            precinct_partition,
            first_precinct,
            precincts: SparseArray::new(precincts_wide, precincts_high),
            bands,
            no_blocks,
            countdown: if decoded {
                Some(Countdown::new(no_blocks as usize))
            } else {
                None
            },
            token,
        })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn bands(&self) -> &[Subband] {
        &self.bands
    }

    pub fn no_blocks(&self) -> u64 {
        self.no_blocks
    }

    pub fn no_precincts(&self) -> u32 {
        self.precincts.capacity() as u32
    }

    /// Whether the code-blocks of this resolution get decoded.
    pub fn is_decoded(&self) -> bool {
        self.countdown.is_some()
    }

    /// Whether every code-block of a decoded resolution has finished.
    pub fn is_complete(&self) -> bool {
        self.countdown
            .as_ref()
            .is_some_and(|countdown| countdown.is_complete())
    }

    /// Absolute cell index of precinct `precinct`.
    pub(crate) fn precinct_cell(&self, precinct: u32) -> (u32, u32) {
        let width = self.precincts.width().max(1);
        (
            self.first_precinct.0 + precinct % width,
            self.first_precinct.1 + precinct / width,
        )
    }

    pub(crate) fn precinct_mut(&mut self, precinct: u32) -> Result<&mut Precinct> {
        if precinct >= self.no_precincts() {
            return Err(invalid!(
                "precinct {} of resolution {} out of range",
                precinct,
                self.index
            ));
        }
        let (x, y) = self.precinct_cell(precinct);
        let region = crate::geometry::replicate(&self.precinct_partition, x, y, Some(&self.region));
        self.precincts.get_or_try_insert_with(precinct, || {
            Ok(Precinct {
                index: precinct,
                region,
                packets_read: 0,
            })
        })
    }
}

impl GridRegion for Resolution {
    fn region(&self) -> Region {
        self.region
    }
}
