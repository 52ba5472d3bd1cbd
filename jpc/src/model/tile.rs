use std::collections::VecDeque;

use log::{debug, warn};

use crate::countdown::{CompletionToken, Countdown};
use crate::error::{invalid, Result};
use crate::geometry::{GridRegion, Region};
use crate::marker::{
    CodingStyleFlags, CodingStyleParameters, ComponentTransformation, MainHeader, ProgressionChange,
    Quantization, TilePartHeader,
};
use crate::model::component::TileComponent;
use crate::progression::{PacketBounds, PacketJigsaw, PacketKey, PacketSequencer, ProgressionOrder};

/// One cell of the tile grid.
#[derive(Debug)]
pub struct Tile {
    pub(crate) index: u32,
    pub(crate) region: Region,

    // Header of the first tile-part, the only one that sets coding parameters
    pub(crate) header: TilePartHeader,
    pub(crate) later_headers: Vec<TilePartHeader>,

    pub(crate) coding_style: CodingStyleFlags,
    pub(crate) no_layers: u16,
    pub(crate) progression_order: ProgressionOrder,
    pub(crate) component_transformation: ComponentTransformation,
    pub(crate) components: Vec<TileComponent>,

    pub(crate) sequencer: PacketSequencer,
    full_progression_appended: bool,

    // Components still to finish
    pub(crate) countdown: Countdown,
    // Reported to the codestream once every component finished
    pub(crate) token: Option<CompletionToken>,

    // Packet headers from PPM or PPT, read instead of the tile-part data
    pub(crate) packed_headers: Option<Vec<u8>>,
    pub(crate) packed_position: usize,
    // PLT lengths of packets not read yet
    pub(crate) packet_lengths: VecDeque<u32>,

    // Nsop expected on the next SOP
    pub(crate) packet_index: u16,
    // Packets passed over when resynchronising on a SOP
    pub(crate) packets_to_skip: u32,
    pub(crate) tile_parts_read: u8,
    pub(crate) expected_tile_parts: Option<u8>,
    // Set once the packets of a tile-part could not be followed, later
    // tile-parts of the tile are not read
    pub(crate) desynchronized: bool,
    pub(crate) finished: bool,
}

/// What a tile takes from the codestream when it is instantiated.
pub(crate) struct TileParameters<'a> {
    pub main: &'a MainHeader,
    pub region: Region,
    pub reduce: u8,
    pub restricted: bool,
}

// A.6.1, A.6.2: tile COC > tile COD > main COC > main COD
fn resolve_coding(
    main: &MainHeader,
    header: &TilePartHeader,
    component: u16,
) -> Result<CodingStyleParameters> {
    if let Some(coc) = header.cocs.iter().find(|coc| coc.component_index == component) {
        return Ok(coc.parameters.clone());
    }
    if let Some(cod) = &header.cod {
        return Ok(cod.parameters.clone());
    }
    if let Some(coc) = main.cocs.iter().find(|coc| coc.component_index == component) {
        return Ok(coc.parameters.clone());
    }
    Ok(main.coding_style_marker_segment()?.parameters.clone())
}

// A.6.4, A.6.5: tile QCC > tile QCD > main QCC > main QCD
fn resolve_quantization(
    main: &MainHeader,
    header: &TilePartHeader,
    component: u16,
) -> Result<Quantization> {
    if let Some(qcc) = header.qccs.iter().find(|qcc| qcc.component_index == component) {
        return Ok(qcc.into());
    }
    if let Some(qcd) = &header.qcd {
        return Ok(qcd.into());
    }
    if let Some(qcc) = main.qccs.iter().find(|qcc| qcc.component_index == component) {
        return Ok(qcc.into());
    }
    Ok(main.quantization_default_marker_segment()?.into())
}

// A.6.3: tile RGN > main RGN
fn resolve_roi_shift(main: &MainHeader, header: &TilePartHeader, component: u16) -> u8 {
    header
        .rgns
        .iter()
        .chain(main.rgns.iter())
        .find(|rgn| rgn.component_index == component)
        .map_or(0, |rgn| rgn.shift)
}

/// Code-blocks larger than 64x64 are not allowed under profiles 0 and 1.
pub(crate) fn check_code_block_size(coding: &CodingStyleParameters, restricted: bool) -> Result<()> {
    if restricted && (coding.code_block_width() > 64 || coding.code_block_height() > 64) {
        return Err(invalid!(
            "{}x{} code-blocks exceed the 64x64 profile limit",
            coding.code_block_width(),
            coding.code_block_height()
        ));
    }
    Ok(())
}

fn solve(
    components: &[TileComponent],
    order: ProgressionOrder,
    bounds: &PacketBounds,
) -> Result<Vec<PacketKey>> {
    let jigsaw = PacketJigsaw::solve(order, bounds, |c, r| {
        components
            .get(c as usize)
            .and_then(|component| component.resolutions.get(r as usize))
            .map_or(0, |resolution| resolution.no_precincts())
    })?;
    Ok(jigsaw.into_sequence())
}

impl Tile {
    pub(crate) fn new(
        index: u32,
        header: TilePartHeader,
        parameters: &TileParameters<'_>,
        token: Option<CompletionToken>,
    ) -> Result<Self> {
        let main = parameters.main;
        let siz = &main.siz;
        let cod = match &header.cod {
            Some(cod) => cod,
            None => main.coding_style_marker_segment()?,
        };
        let coding_style = cod.coding_style;
        let no_layers = cod.no_layers;
        let progression_order = cod.progression_order;
        let component_transformation = cod.multiple_component_transformation;

        let no_components = siz.no_components();
        let countdown = Countdown::new(no_components as usize);
        let mut components = Vec::with_capacity(no_components as usize);
        for (c, size) in siz.components().iter().enumerate() {
            let c = c as u16;
            let coding = resolve_coding(main, &header, c)?;
            check_code_block_size(&coding, parameters.restricted)?;
            let quantization = resolve_quantization(main, &header, c)?;
            let roi_shift = resolve_roi_shift(main, &header, c);

            // B.3 tile-component region
            let region = parameters.region.scale_ceil(
                size.horizontal_separation() as u32,
                size.vertical_separation() as u32,
            );
            let token = countdown
                .issue()
                .ok_or_else(|| invalid!("more components than counted"))?;
            components.push(TileComponent::new(
                c,
                region,
                *size,
                coding,
                quantization,
                roi_shift,
                parameters.reduce,
                Some(token),
            )?);
        }

        let mut tile = Tile {
            index,
            region: parameters.region,
            coding_style,
            no_layers,
            progression_order,
            component_transformation,
            components,
            sequencer: PacketSequencer::new(),
            full_progression_appended: false,
            countdown,
            token,
            packed_headers: None,
            packed_position: 0,
            packet_lengths: header.packet_lengths().into(),
            packet_index: 0,
            packets_to_skip: 0,
            tile_parts_read: 1,
            expected_tile_parts: header.sot.no_tile_parts(),
            desynchronized: false,
            finished: false,
            later_headers: vec![],
            header,
        };

        if !tile.header.ppts.is_empty() {
            tile.packed_headers = Some(tile.header.packed_packet_headers());
        }

        // B.12.1 a tile POC replaces the main one
        let changes: Vec<ProgressionChange> = if tile.header.pocs.is_empty() {
            main.pocs.iter().flat_map(|poc| poc.changes.clone()).collect()
        } else {
            tile.header.pocs.iter().flat_map(|poc| poc.changes.clone()).collect()
        };
        for change in &changes {
            tile.append_change(change)?;
        }
        if changes.is_empty() {
            tile.append_full_progression()?;
        }

        debug!(
            "tile {} {:?}: {} components, {} layers, {:?}, {} packets sequenced",
            tile.index,
            tile.region,
            tile.components.len(),
            tile.no_layers,
            tile.progression_order,
            tile.sequencer.len()
        );

        Ok(tile)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn header(&self) -> &TilePartHeader {
        &self.header
    }

    pub fn later_headers(&self) -> &[TilePartHeader] {
        &self.later_headers
    }

    pub fn no_layers(&self) -> u16 {
        self.no_layers
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        self.progression_order
    }

    pub fn components(&self) -> &[TileComponent] {
        &self.components
    }

    pub fn sequencer(&self) -> &PacketSequencer {
        &self.sequencer
    }

    pub fn tile_parts_read(&self) -> u8 {
        self.tile_parts_read
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Highest number of resolutions over all components.
    fn max_resolutions(&self) -> u8 {
        self.components
            .iter()
            .map(|component| component.coding.no_decomposition_levels() + 1)
            .max()
            .unwrap_or(0)
    }

    fn append_change(&mut self, change: &ProgressionChange) -> Result<()> {
        let bounds = PacketBounds {
            components: change.component_start
                ..change.component_end.min(self.components.len() as u16),
            resolutions: change.resolution_start..change.resolution_end.min(self.max_resolutions()),
            layers: change.layer_end.min(self.no_layers),
        };
        let packets = solve(&self.components, change.order, &bounds)?;
        let added = self.sequencer.append(packets);
        debug!(
            "tile {} progression change {:?} {:?}: {} new packets",
            self.index, change.order, bounds, added
        );
        Ok(())
    }

    fn append_full_progression(&mut self) -> Result<()> {
        let bounds = PacketBounds {
            components: 0..self.components.len() as u16,
            resolutions: 0..self.max_resolutions(),
            layers: self.no_layers,
        };
        let packets = solve(&self.components, self.progression_order, &bounds)?;
        self.sequencer.append(packets);
        self.full_progression_appended = true;
        Ok(())
    }

    /// The next packet in progression order. Packets no progression change
    /// covered follow in the COD progression once the changes are used up.
    pub(crate) fn next_packet(&mut self) -> Result<Option<PacketKey>> {
        if let Some(key) = self.sequencer.next() {
            return Ok(Some(key));
        }
        if !self.full_progression_appended {
            self.append_full_progression()?;
            if self.sequencer.remaining() > 0 {
                debug!(
                    "tile {}: {} packets left outside the progression changes",
                    self.index,
                    self.sequencer.remaining()
                );
            }
            return Ok(self.sequencer.next());
        }
        Ok(None)
    }

    /// Takes in the header of a later tile-part of this tile.
    pub(crate) fn add_tile_part(&mut self, header: TilePartHeader) -> Result<()> {
        if header.has_coding_parameters() {
            warn!(
                "tile {} tile-part {} carries COD, COC, QCD, QCC or RGN, ignored",
                self.index, header.sot.tile_part_index
            );
        }

        let changes: Vec<ProgressionChange> = header
            .pocs
            .iter()
            .flat_map(|poc| poc.changes.clone())
            .collect();
        for change in &changes {
            self.append_change(change)?;
        }

        if !header.ppts.is_empty() {
            self.add_packed_headers(header.packed_packet_headers());
        }
        self.packet_lengths.extend(header.packet_lengths());

        if self.expected_tile_parts.is_none() {
            self.expected_tile_parts = header.sot.no_tile_parts();
        }
        self.tile_parts_read = self.tile_parts_read.saturating_add(1);
        self.later_headers.push(header);
        Ok(())
    }

    /// Appends packed packet header bytes.
    pub(crate) fn add_packed_headers(&mut self, data: Vec<u8>) {
        match &mut self.packed_headers {
            Some(packed) => packed.extend(data),
            None => self.packed_headers = Some(data),
        }
    }

    /// Packed header bytes not consumed yet.
    pub(crate) fn remaining_packed_headers(&self) -> Option<&[u8]> {
        self.packed_headers
            .as_deref()
            .map(|packed| &packed[self.packed_position.min(packed.len())..])
    }

    /// Whether TNsot says no further tile-part follows.
    pub fn is_last_tile_part_read(&self) -> bool {
        self.expected_tile_parts
            .is_some_and(|expected| self.tile_parts_read >= expected)
    }

    /// Drops the working state once the tile has been composed.
    pub(crate) fn release(&mut self) {
        self.components = vec![];
        self.packed_headers = None;
        self.packet_lengths.clear();
        self.finished = true;
    }
}

impl GridRegion for Tile {
    fn region(&self) -> Region {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::{
        CodingStyleMarkerSegment, ComponentSize, ImageAndTileSizeMarkerSegment,
        ProgressionOrderChangeSegment, QuantizationDefaultMarkerSegment, QuantizationStyle,
        RegionOfInterestSegment, StartOfTileSegment, StepSize,
    };

    fn main_header(levels: u8, layers: u16) -> MainHeader {
        MainHeader {
            siz: ImageAndTileSizeMarkerSegment {
                reference_grid_width: 16,
                reference_grid_height: 16,
                reference_tile_width: 16,
                reference_tile_height: 16,
                components: vec![
                    ComponentSize {
                        depth: 7,
                        horizontal_separation: 1,
                        vertical_separation: 1,
                    };
                    2
                ],
                ..Default::default()
            },
            cod: Some(CodingStyleMarkerSegment {
                progression_order: ProgressionOrder::Lrcp,
                no_layers: layers,
                parameters: CodingStyleParameters {
                    no_decomposition_levels: levels,
                    code_block_width_offset: 2,
                    code_block_height_offset: 2,
                    ..Default::default()
                },
                ..Default::default()
            }),
            qcd: Some(QuantizationDefaultMarkerSegment {
                quantization_style: QuantizationStyle::No,
                guard_bits: 2,
                step_sizes: vec![StepSize::default(); 3 * levels as usize + 1],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn tile_part(parts: u8) -> TilePartHeader {
        TilePartHeader {
            sot: StartOfTileSegment {
                no_tile_parts: parts,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn tile(main: &MainHeader, header: TilePartHeader) -> Tile {
        let parameters = TileParameters {
            main,
            region: Region::new(0, 0, 16, 16),
            reduce: 0,
            restricted: false,
        };
        Tile::new(0, header, &parameters, None).unwrap()
    }

    #[test]
    fn test_full_progression() {
        let main = main_header(1, 2);
        let mut tile = tile(&main, tile_part(1));
        // 2 components x 2 resolutions x 2 layers x 1 precinct
        assert_eq!(tile.sequencer().len(), 8);
        assert_eq!(
            tile.next_packet().unwrap(),
            Some(PacketKey::new(0, 0, 0, 0))
        );
        assert_eq!(
            tile.next_packet().unwrap(),
            Some(PacketKey::new(1, 0, 0, 0))
        );
        assert_eq!(tile.countdown.remaining(), 2);
        assert!(tile.is_last_tile_part_read());
    }

    #[test]
    fn test_progression_change_then_rest() {
        let main = main_header(1, 2);
        let mut header = tile_part(0);
        header.pocs.push(ProgressionOrderChangeSegment {
            changes: vec![ProgressionChange {
                resolution_start: 0,
                component_start: 1,
                layer_end: 1,
                resolution_end: 2,
                component_end: 2,
                order: ProgressionOrder::Rlcp,
            }],
            ..Default::default()
        });
        let mut tile = tile(&main, header);
        assert_eq!(tile.sequencer().len(), 2);

        let mut keys = vec![];
        while let Some(key) = tile.next_packet().unwrap() {
            keys.push(key);
        }
        assert_eq!(keys.len(), 8);
        assert_eq!(keys[0], PacketKey::new(1, 0, 0, 0));
        assert_eq!(keys[1], PacketKey::new(1, 1, 0, 0));
        // The rest follows in LRCP, skipping the two packets above
        assert_eq!(keys[2], PacketKey::new(0, 0, 0, 0));
        assert_eq!(keys[3], PacketKey::new(0, 1, 0, 0));
        assert_eq!(keys[4], PacketKey::new(0, 0, 1, 0));
        assert!(!tile.is_last_tile_part_read());
    }

    #[test]
    fn test_parameter_precedence() {
        let mut main = main_header(1, 1);
        main.rgns.push(RegionOfInterestSegment {
            component_index: 1,
            shift: 4,
            ..Default::default()
        });
        let mut header = tile_part(1);
        header.cod = Some(CodingStyleMarkerSegment {
            no_layers: 3,
            parameters: CodingStyleParameters {
                no_decomposition_levels: 0,
                code_block_width_offset: 2,
                code_block_height_offset: 2,
                ..Default::default()
            },
            ..Default::default()
        });
        let tile = tile(&main, header);
        assert_eq!(tile.no_layers(), 3);
        assert_eq!(tile.components()[0].resolutions().len(), 1);
        assert_eq!(tile.components()[0].roi_shift(), 0);
        assert_eq!(tile.components()[1].roi_shift(), 4);
    }

    #[test]
    fn test_later_tile_part() {
        let main = main_header(0, 1);
        let mut tile = tile(&main, tile_part(0));
        assert!(!tile.is_last_tile_part_read());
        assert!(tile.remaining_packed_headers().is_none());

        tile.add_packed_headers(vec![0x80, 0x00]);
        tile.packed_position = 1;
        assert_eq!(tile.remaining_packed_headers(), Some(&[0x00][..]));

        tile.desynchronized = true;
        let mut later = tile_part(2);
        later.sot.tile_part_index = 1;
        tile.add_tile_part(later).unwrap();
        assert!(tile.is_last_tile_part_read());
        assert_eq!(tile.later_headers().len(), 1);
        assert!(tile.desynchronized);
    }

    #[test]
    fn test_profile_code_block_limit() {
        let coding = CodingStyleParameters {
            code_block_width_offset: 5,
            code_block_height_offset: 2,
            ..Default::default()
        };
        assert!(check_code_block_size(&coding, true).is_err());
        assert!(check_code_block_size(&coding, false).is_ok());
    }
}
