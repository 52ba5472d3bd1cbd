use log::trace;

use crate::countdown::Countdown;
use crate::error::{invalid, Result};
use crate::geometry::{replicate, BandKind, GridRegion, Partition, Region};
use crate::marker::StepSize;
use crate::model::block::CodeBlock;
use crate::sparse::SparseArray;
use crate::tag_tree::TagTreeDecoder;

/// One sub-band of a resolution.
#[derive(Debug)]
pub struct Subband {
    pub(crate) kind: BandKind,
    // b of E.1: 0 for NLLL, then HL, LH, HH of each resolution
    pub(crate) index: usize,
    pub(crate) region: Region,
    // nb, decomposition level of the band
    pub(crate) level: u8,
    pub(crate) step: StepSize,
    // Mb including the region of interest shift
    pub(crate) max_bitplanes: u32,
    pub(crate) block_partition: Partition,
    pub(crate) precinct_partition: Partition,
    pub(crate) precincts: SparseArray<BandPrecinct>,
}

/// The part of a sub-band that falls inside one precinct.
#[derive(Debug)]
pub struct BandPrecinct {
    pub(crate) region: Region,
    pub(crate) first_block: (u32, u32),
    pub(crate) blocks: SparseArray<CodeBlock>,
    pub(crate) inclusion: TagTreeDecoder,
    pub(crate) zero_bitplanes: TagTreeDecoder,
}

impl Subband {
    pub fn kind(&self) -> BandKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn step(&self) -> StepSize {
        self.step
    }

    pub fn max_bitplanes(&self) -> u32 {
        self.max_bitplanes
    }

    pub fn block_partition(&self) -> &Partition {
        &self.block_partition
    }

    /// Number of code-blocks in the whole band.
    pub fn no_blocks(&self) -> u64 {
        self.region.num_elements(&self.block_partition)
    }

    /// The band-precinct of precinct cell `cell`, created on first use.
    pub(crate) fn precinct_mut(
        &mut self,
        precinct: u32,
        cell: (u32, u32),
    ) -> Result<&mut BandPrecinct> {
        let region = replicate(&self.precinct_partition, cell.0, cell.1, Some(&self.region));
        let block_partition = self.block_partition;
        self.precincts.get_or_try_insert_with(precinct, || {
            BandPrecinct::new(region, &block_partition)
        })
    }

    pub fn precinct(&self, precinct: u32) -> Option<&BandPrecinct> {
        self.precincts.get(precinct)
    }
}

impl GridRegion for Subband {
    fn region(&self) -> Region {
        self.region
    }
}

impl BandPrecinct {
    fn new(region: Region, block_partition: &Partition) -> Result<Self> {
        let (width, height) = region.num_children(block_partition);
        if width as u64 * height as u64 > u32::MAX as u64 {
            return Err(invalid!("{}x{} code-blocks in one precinct", width, height));
        }
        let first_block = if region.is_empty() {
            (0, 0)
        } else {
            region.first_child_idx(block_partition)
        };
        trace!(
            "band-precinct {:?} with {}x{} code-blocks",
            region,
            width,
            height
        );

        Ok(BandPrecinct {
            region,
            first_block,
            blocks: SparseArray::new(width, height),
            inclusion: TagTreeDecoder::new(width, height),
            zero_bitplanes: TagTreeDecoder::new(width, height),
        })
    }

    pub fn blocks_wide(&self) -> u32 {
        self.blocks.width()
    }

    pub fn blocks_high(&self) -> u32 {
        self.blocks.height()
    }

    pub fn no_blocks(&self) -> u32 {
        self.blocks.width() * self.blocks.height()
    }

    pub fn block(&self, index: u32) -> Option<&CodeBlock> {
        self.blocks.get(index)
    }

    /// The code-block at raster `index`, created on first use. A new block
    /// takes one completion token from `countdown`.
    pub(crate) fn block_mut(
        &mut self,
        index: u32,
        block_partition: &Partition,
        countdown: Option<&Countdown>,
    ) -> Result<&mut CodeBlock> {
        let x = self.first_block.0 + index % self.blocks.width();
        let y = self.first_block.1 + index / self.blocks.width();
        let bound = self.region;
        self.blocks.get_or_try_insert_with(index, || {
            let token = match countdown {
                Some(countdown) => Some(
                    countdown
                        .issue()
                        .ok_or_else(|| invalid!("more code-blocks than counted"))?,
                ),
                None => None,
            };
            Ok(CodeBlock::new(
                replicate(block_partition, x, y, Some(&bound)),
                token,
            ))
        })
    }
}

impl GridRegion for BandPrecinct {
    fn region(&self) -> Region {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(region: Region) -> Subband {
        Subband {
            kind: BandKind::HL,
            index: 1,
            region,
            level: 1,
            step: StepSize::default(),
            max_bitplanes: 9,
            block_partition: Partition::pow2(2, 2),
            precinct_partition: Partition::pow2(3, 3),
            precincts: SparseArray::new(2, 1),
        }
    }

    #[test]
    fn test_band_precinct_blocks() {
        let mut band = band(Region::new(2, 0, 14, 6));
        assert_eq!(band.no_blocks(), 8);

        let countdown = Countdown::new(8);
        let block_partition = band.block_partition;
        let precinct = band.precinct_mut(1, (1, 0)).unwrap();
        assert_eq!(precinct.region, Region::new(8, 0, 14, 6));
        assert_eq!((precinct.blocks_wide(), precinct.blocks_high()), (2, 2));
        assert_eq!(precinct.first_block, (2, 0));

        let block = precinct.block_mut(3, &block_partition, Some(&countdown)).unwrap();
        assert_eq!(block.region, Region::new(12, 4, 14, 6));
        assert!(block.token.is_some());

        // Creating the same block again issues no token
        precinct.block_mut(3, &block_partition, Some(&countdown)).unwrap();
        let rest: Vec<_> = (0..8).filter_map(|_| countdown.issue()).collect();
        assert_eq!(rest.len(), 7);
        assert_eq!(countdown.remaining(), 8);
    }
}
