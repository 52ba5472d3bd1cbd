use std::collections::VecDeque;

use log::{debug, info, warn};

use crate::countdown::Countdown;
use crate::error::{invalid, CodestreamError, Result};
use crate::geometry::{replicate, GridRegion, Partition, Region};
use crate::marker::{
    split_packed_packet_headers, split_packet_lengths, Capabilities, CodingStyleMarkerSegment,
    ComponentSize, ImageAndTileSizeMarkerSegment, MainHeader, Profile, TilePartHeader,
    MARKER_SYMBOL_PPM,
};
use crate::model::tile::{check_code_block_size, Tile, TileParameters};
use crate::parser::{decode_main_header, decode_soc_siz};
use crate::source::ByteSource;
use crate::sparse::SparseArray;
use crate::tile_part::TilePartIndex;

// Isot is 16 bits
const MAX_TILES: u64 = 65535;

/// Summary of a codestream's main header.
#[derive(Debug, Clone)]
pub struct CodestreamInfo {
    pub canvas: Region,
    pub tile_partition: Partition,
    pub tiles_wide: u32,
    pub tiles_high: u32,
    pub capabilities: Capabilities,
    pub components: Vec<ComponentSize>,
    pub coding_style: Option<CodingStyleMarkerSegment>,
    pub progression_changes: usize,
    pub tile_part_lengths: usize,
    pub packed_packet_headers: bool,
    pub comments: Vec<String>,
}

/// Root of the spatial model.
#[derive(Debug)]
pub struct Codestream {
    header: MainHeader,
    main_header_read: bool,

    canvas: Region,
    tile_partition: Partition,
    tiles_wide: u32,
    tiles_high: u32,
    pub(crate) tiles: SparseArray<Tile>,

    pub(crate) tile_parts: Option<TilePartIndex>,
    first_tile_part_offset: u64,
    // Index of the next tile-part to read, in codestream order
    pub(crate) next_tile_part: usize,

    // One PPM chunk and one PLM series per tile-part, in codestream order
    ppm_chunks: VecDeque<Vec<u8>>,
    plm_lengths: VecDeque<Vec<u32>>,

    // Requested tiles still to finish
    pub(crate) countdown: Option<Countdown>,
    requested_tiles: Vec<u32>,
    reduce: u8,
}

impl Codestream {
    /// Reads SOC and SIZ and lays out the tile grid.
    pub fn init(source: &mut ByteSource) -> Result<Codestream> {
        let siz = decode_soc_siz(source)?;

        let canvas = Region::new(
            siz.image_horizontal_offset(),
            siz.image_vertical_offset(),
            siz.reference_grid_width(),
            siz.reference_grid_height(),
        );
        let tile_partition = Partition::new(
            siz.tile_horizontal_offset(),
            siz.tile_vertical_offset(),
            siz.reference_tile_width(),
            siz.reference_tile_height(),
        );

        // B-5, B-6
        let tiles_wide = (siz.reference_grid_width() - siz.tile_horizontal_offset())
            .div_ceil(siz.reference_tile_width());
        let tiles_high = (siz.reference_grid_height() - siz.tile_vertical_offset())
            .div_ceil(siz.reference_tile_height());
        let no_tiles = tiles_wide as u64 * tiles_high as u64;
        if no_tiles > MAX_TILES {
            return Err(invalid!(
                "{}x{} tiles exceed the {} tile limit",
                tiles_wide,
                tiles_high,
                MAX_TILES
            ));
        }

        info!(
            "canvas {:?}, {}x{} tiles of {}x{}, {} components",
            canvas,
            tiles_wide,
            tiles_high,
            tile_partition.width,
            tile_partition.height,
            siz.no_components()
        );

        Ok(Codestream {
            header: MainHeader {
                siz,
                ..Default::default()
            },
            main_header_read: false,
            canvas,
            tile_partition,
            tiles_wide,
            tiles_high,
            tiles: SparseArray::new(tiles_wide, tiles_high),
            tile_parts: None,
            first_tile_part_offset: 0,
            next_tile_part: 0,
            ppm_chunks: VecDeque::new(),
            plm_lengths: VecDeque::new(),
            countdown: None,
            requested_tiles: vec![],
            reduce: 0,
        })
    }

    /// Reads the rest of the main header, up to the first SOT, and checks it
    /// against the profile signalled in Rsiz.
    pub fn read_main_header(&mut self, source: &mut ByteSource) -> Result<()> {
        let header = decode_main_header(source, self.header.siz.clone())?;
        self.validate_profile(&header)?;

        self.first_tile_part_offset = source.position()?;
        self.next_tile_part = 0;
        self.tile_parts = Some(if header.tlms.is_empty() {
            TilePartIndex::incremental(self.first_tile_part_offset)
        } else {
            TilePartIndex::from_tlm(self.first_tile_part_offset, &header.tlms)
        });
        self.ppm_chunks = split_packed_packet_headers(&header.ppms)?.into();
        self.plm_lengths = split_packet_lengths(&header.plms)?.into();

        debug!(
            "main header read, first tile-part at byte offset {}",
            self.first_tile_part_offset
        );
        self.header = header;
        self.main_header_read = true;
        Ok(())
    }

    fn validate_profile(&self, header: &MainHeader) -> Result<()> {
        let capabilities = header.siz.capabilities();
        if capabilities.profile() == Profile::Profile0 && !header.ppms.is_empty() {
            return Err(CodestreamError::MarkerUnexpected {
                marker: MARKER_SYMBOL_PPM,
                offset: header.ppms[0].offset,
            });
        }
        let restricted = capabilities.is_restricted();
        check_code_block_size(&header.coding_style_marker_segment()?.parameters, restricted)?;
        for coc in &header.cocs {
            check_code_block_size(&coc.parameters, restricted)?;
        }
        Ok(())
    }

    pub fn header(&self) -> &MainHeader {
        &self.header
    }

    pub fn siz(&self) -> &ImageAndTileSizeMarkerSegment {
        &self.header.siz
    }

    pub fn is_main_header_read(&self) -> bool {
        self.main_header_read
    }

    pub fn canvas(&self) -> Region {
        self.canvas
    }

    pub fn tile_partition(&self) -> Partition {
        self.tile_partition
    }

    pub fn no_tiles(&self) -> (u32, u32) {
        (self.tiles_wide, self.tiles_high)
    }

    pub fn components(&self) -> &[ComponentSize] {
        self.header.siz.components()
    }

    pub fn first_tile_part_offset(&self) -> u64 {
        self.first_tile_part_offset
    }

    pub fn reduce(&self) -> u8 {
        self.reduce
    }

    /// B.3 region of tile `index`, clipped to the canvas.
    pub fn tile_region(&self, index: u32) -> Region {
        let x = index % self.tiles_wide.max(1);
        let y = index / self.tiles_wide.max(1);
        replicate(&self.tile_partition, x, y, Some(&self.canvas))
    }

    /// Selects the tiles to decode: the ones intersecting `region`, or all of
    /// them. Only these are instantiated or waited for.
    pub fn request(&mut self, region: Option<Region>, reduce: u8) -> Result<()> {
        let wanted = match region {
            Some(region) => {
                let wanted = region.intersect(&self.canvas);
                if wanted.is_empty() {
                    return Err(invalid!(
                        "requested region {:?} misses the canvas {:?}",
                        region,
                        self.canvas
                    ));
                }
                wanted
            }
            None => self.canvas,
        };

        self.requested_tiles = (0..self.tiles_wide * self.tiles_high)
            .filter(|&index| self.tile_region(index).intersects(&wanted))
            .collect();
        self.countdown = Some(Countdown::new(self.requested_tiles.len()));
        self.reduce = reduce;

        debug!(
            "{} of {} tiles requested for {:?}",
            self.requested_tiles.len(),
            self.tiles_wide * self.tiles_high,
            wanted
        );
        Ok(())
    }

    pub fn requested_tiles(&self) -> &[u32] {
        &self.requested_tiles
    }

    pub fn is_requested(&self, tile: u32) -> bool {
        self.requested_tiles.binary_search(&tile).is_ok()
    }

    pub fn is_complete(&self) -> bool {
        self.countdown
            .as_ref()
            .is_some_and(|countdown| countdown.is_complete())
    }

    pub fn tile(&self, index: u32) -> Option<&Tile> {
        self.tiles.get(index)
    }

    pub(crate) fn tile_mut(&mut self, index: u32) -> Option<&mut Tile> {
        self.tiles.get_mut(index)
    }

    /// Instantiates tile `index` from the header of its first tile-part.
    pub(crate) fn instantiate_tile(
        &mut self,
        index: u32,
        header: TilePartHeader,
    ) -> Result<&mut Tile> {
        if index >= self.tiles_wide * self.tiles_high {
            return Err(invalid!(
                "tile {} outside the {}x{} tile grid",
                index,
                self.tiles_wide,
                self.tiles_high
            ));
        }
        if !self.is_requested(index) {
            return Err(invalid!("tile {} was not requested", index));
        }

        let token = match &self.countdown {
            Some(countdown) => Some(
                countdown
                    .issue()
                    .ok_or_else(|| invalid!("more tiles than requested"))?,
            ),
            None => None,
        };
        let parameters = TileParameters {
            main: &self.header,
            region: self.tile_region(index),
            reduce: self.reduce,
            restricted: self.header.siz.capabilities().is_restricted(),
        };
        let tile = Tile::new(index, header, &parameters, token)?;
        self.tiles.get_or_try_insert_with(index, || Ok(tile))
    }

    /// The PPM chunk and PLM series that belong to the next tile-part. Both
    /// are consumed even when the tile-part itself is skipped.
    pub(crate) fn take_tile_part_side_data(&mut self) -> (Option<Vec<u8>>, Option<Vec<u32>>) {
        (self.ppm_chunks.pop_front(), self.plm_lengths.pop_front())
    }

    pub fn has_packed_packet_headers(&self) -> bool {
        !self.header.ppms.is_empty()
    }

    pub fn info(&self) -> CodestreamInfo {
        CodestreamInfo {
            canvas: self.canvas,
            tile_partition: self.tile_partition,
            tiles_wide: self.tiles_wide,
            tiles_high: self.tiles_high,
            capabilities: self.header.siz.capabilities(),
            components: self.header.siz.components().to_vec(),
            coding_style: self.header.cod.clone(),
            progression_changes: self
                .header
                .pocs
                .iter()
                .map(|poc| poc.changes.len())
                .sum(),
            tile_part_lengths: self
                .header
                .tlms
                .iter()
                .map(|tlm| tlm.tile_part_lengths.len())
                .sum(),
            packed_packet_headers: self.has_packed_packet_headers(),
            comments: self
                .header
                .comments
                .iter()
                .filter_map(|comment| match comment.comment_utf8() {
                    Ok(text) => Some(text.to_string()),
                    Err(_) => {
                        warn!("binary comment of {} bytes", comment.comment().len());
                        None
                    }
                })
                .collect(),
        }
    }

    /// Drops all tiles and completion state.
    pub fn free(&mut self) {
        self.tiles.clear();
        self.countdown = None;
        self.requested_tiles.clear();
    }
}

impl GridRegion for Codestream {
    fn region(&self) -> Region {
        self.canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn siz(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0x4F, 0xFF, 0x51, 0x00, 0x29, 0x00, 0x00];
        for value in [width, height, 0, 0, tile_width, tile_height, 0, 0] {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        bytes.extend_from_slice(&[0x00, 0x01, 0x07, 0x01, 0x01]);
        bytes
    }

    #[test]
    fn test_tile_grid() {
        let mut source = ByteSource::from_bytes(siz(100, 50, 32, 32)).unwrap();
        let codestream = Codestream::init(&mut source).unwrap();
        assert_eq!(codestream.no_tiles(), (4, 2));
        assert_eq!(codestream.tile_region(3), Region::new(96, 0, 100, 32));
        assert_eq!(codestream.tile_region(4), Region::new(0, 32, 32, 50));
        assert!(!codestream.is_main_header_read());
    }

    #[test]
    fn test_request_gates_tiles() {
        let mut source = ByteSource::from_bytes(siz(100, 50, 32, 32)).unwrap();
        let mut codestream = Codestream::init(&mut source).unwrap();
        codestream
            .request(Some(Region::new(40, 10, 70, 20)), 0)
            .unwrap();
        assert_eq!(codestream.requested_tiles(), &[1, 2]);
        assert_eq!(codestream.countdown.as_ref().unwrap().remaining(), 2);
        assert!(!codestream.is_requested(0));

        assert!(codestream
            .request(Some(Region::new(200, 0, 300, 10)), 0)
            .is_err());
    }

    #[test]
    fn test_too_many_tiles() {
        let mut source = ByteSource::from_bytes(siz(1000, 1000, 1, 1)).unwrap();
        assert!(matches!(
            Codestream::init(&mut source),
            Err(CodestreamError::Validation(_))
        ));
    }
}
