//! Marker codes and the typed marker segments of ITU-T T.800 Annex A.

use std::str;

use crate::error::{invalid, unsupported, CodestreamError, Result};
use crate::progression::ProgressionOrder;

pub type MarkerSymbol = [u8; 2];

// Delimiting markers and marker segments
pub const MARKER_SYMBOL_SOC: MarkerSymbol = [0xFF, 0x4F]; // Start of codestream
pub const MARKER_SYMBOL_SOT: MarkerSymbol = [0xFF, 0x90]; // Start of tile-part
pub const MARKER_SYMBOL_SOD: MarkerSymbol = [0xFF, 0x93]; // Start of data
pub const MARKER_SYMBOL_EOC: MarkerSymbol = [0xFF, 0xD9]; // End of codestream

// Fixed information marker segments
pub const MARKER_SYMBOL_SIZ: MarkerSymbol = [0xFF, 0x51]; // Image and tile size

// Functional marker segments
pub const MARKER_SYMBOL_COD: MarkerSymbol = [0xFF, 0x52]; // Coding style default
pub const MARKER_SYMBOL_COC: MarkerSymbol = [0xFF, 0x53]; // Coding style component
pub const MARKER_SYMBOL_RGN: MarkerSymbol = [0xFF, 0x5E]; // Region-of-interest
pub const MARKER_SYMBOL_QCD: MarkerSymbol = [0xFF, 0x5C]; // Quantization default
pub const MARKER_SYMBOL_QCC: MarkerSymbol = [0xFF, 0x5D]; // Quantization component
pub const MARKER_SYMBOL_POC: MarkerSymbol = [0xFF, 0x5F]; // Progression order change

// Pointer marker segments
pub const MARKER_SYMBOL_TLM: MarkerSymbol = [0xFF, 0x55]; // Tile-part lengths
pub const MARKER_SYMBOL_PLM: MarkerSymbol = [0xFF, 0x57]; // Packet length, main header
pub const MARKER_SYMBOL_PLT: MarkerSymbol = [0xFF, 0x58]; // Packet length, tile-part header
pub const MARKER_SYMBOL_PPM: MarkerSymbol = [0xFF, 0x60]; // Packed packet headers, main header
pub const MARKER_SYMBOL_PPT: MarkerSymbol = [0xFF, 0x61]; // Packed packet headers, tile-part header

// In bit stream markers and marker segments
pub const MARKER_SYMBOL_SOP: MarkerSymbol = [0xFF, 0x91]; // Start of packet
pub const MARKER_SYMBOL_EPH: MarkerSymbol = [0xFF, 0x92]; // End of packet header

// Informational marker segments
pub const MARKER_SYMBOL_CRG: MarkerSymbol = [0xFF, 0x63]; // Component registration
pub const MARKER_SYMBOL_COM: MarkerSymbol = [0xFF, 0x64]; // Comment

/// Short mnemonic used in log lines.
pub fn marker_name(marker: MarkerSymbol) -> &'static str {
    match marker {
        MARKER_SYMBOL_SOC => "SOC",
        MARKER_SYMBOL_SOT => "SOT",
        MARKER_SYMBOL_SOD => "SOD",
        MARKER_SYMBOL_EOC => "EOC",
        MARKER_SYMBOL_SIZ => "SIZ",
        MARKER_SYMBOL_COD => "COD",
        MARKER_SYMBOL_COC => "COC",
        MARKER_SYMBOL_RGN => "RGN",
        MARKER_SYMBOL_QCD => "QCD",
        MARKER_SYMBOL_QCC => "QCC",
        MARKER_SYMBOL_POC => "POC",
        MARKER_SYMBOL_TLM => "TLM",
        MARKER_SYMBOL_PLM => "PLM",
        MARKER_SYMBOL_PLT => "PLT",
        MARKER_SYMBOL_PPM => "PPM",
        MARKER_SYMBOL_PPT => "PPT",
        MARKER_SYMBOL_SOP => "SOP",
        MARKER_SYMBOL_EPH => "EPH",
        MARKER_SYMBOL_CRG => "CRG",
        MARKER_SYMBOL_COM => "COM",
        _ => "unknown",
    }
}

/// Rsiz capabilities (Table A.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Capabilities specified in ITU-T T.800 only
    Unrestricted,
    Profile0,
    Profile1,
    /// Any other Rsiz value, decoded as unrestricted
    Other(u16),
}

impl Capabilities {
    pub fn profile(&self) -> Profile {
        match self.0 {
            0 => Profile::Unrestricted,
            1 => Profile::Profile0,
            2 => Profile::Profile1,
            value => Profile::Other(value),
        }
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self.profile(), Profile::Profile0 | Profile::Profile1)
    }
}

/// Scod / Scoc flags (Table A.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodingStyleFlags(pub u8);

impl CodingStyleFlags {
    // xxxx xxx1 Entropy coder with precincts defined below
    pub fn has_defined_precinct_size(&self) -> bool {
        self.0 & 0b0000_0001 != 0
    }

    // xxxx xx1x SOP marker segments may be used
    pub fn may_use_sop(&self) -> bool {
        self.0 & 0b0000_0010 != 0
    }

    // xxxx x1xx EPH marker shall be used
    pub fn uses_eph(&self) -> bool {
        self.0 & 0b0000_0100 != 0
    }
}

/// Code-block style (Table A.19).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeBlockStyle(pub u8);

impl CodeBlockStyle {
    pub fn selective_bypass(&self) -> bool {
        self.0 & 0b0000_0001 != 0
    }

    pub fn reset_context_probabilities(&self) -> bool {
        self.0 & 0b0000_0010 != 0
    }

    pub fn termination_on_each_pass(&self) -> bool {
        self.0 & 0b0000_0100 != 0
    }

    pub fn vertically_causal_context(&self) -> bool {
        self.0 & 0b0000_1000 != 0
    }

    pub fn predictable_termination(&self) -> bool {
        self.0 & 0b0001_0000 != 0
    }

    pub fn segmentation_symbols(&self) -> bool {
        self.0 & 0b0010_0000 != 0
    }
}

/// Wavelet transformation (Table A.20).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveletFilter {
    // 9-7 irreversible filter
    #[default]
    Irreversible97,
    // 5-3 reversible filter
    Reversible53,
}

impl WaveletFilter {
    pub(crate) fn new(value: u8) -> Result<WaveletFilter> {
        match value {
            0 => Ok(WaveletFilter::Irreversible97),
            1 => Ok(WaveletFilter::Reversible53),
            _ => Err(unsupported!("wavelet transformation {}", value)),
        }
    }

    pub fn is_reversible(&self) -> bool {
        *self == WaveletFilter::Reversible53
    }
}

/// Multiple component transformation (Table A.17).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComponentTransformation {
    #[default]
    None,
    // Applied to components 0, 1, 2; RCT with the 5-3 filter, ICT with the 9-7 filter
    Multiple,
}

impl ComponentTransformation {
    pub(crate) fn new(value: u8) -> Result<ComponentTransformation> {
        match value {
            0 => Ok(ComponentTransformation::None),
            1 => Ok(ComponentTransformation::Multiple),
            _ => Err(unsupported!("multiple component transformation {}", value)),
        }
    }
}

// A.5.1
//
// Image and tile size (SIZ)
#[derive(Debug, Clone, Default)]
pub struct ImageAndTileSizeMarkerSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Rsiz
    pub(crate) capabilities: Capabilities,

    // Xsiz, Ysiz
    pub(crate) reference_grid_width: u32,
    pub(crate) reference_grid_height: u32,

    // XOsiz, YOsiz
    pub(crate) image_horizontal_offset: u32,
    pub(crate) image_vertical_offset: u32,

    // XTsiz, YTsiz
    pub(crate) reference_tile_width: u32,
    pub(crate) reference_tile_height: u32,

    // XTOsiz, YTOsiz
    pub(crate) tile_horizontal_offset: u32,
    pub(crate) tile_vertical_offset: u32,

    // Ssiz, XRsiz, YRsiz for each of the Csiz components
    pub(crate) components: Vec<ComponentSize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentSize {
    pub(crate) depth: u8,
    pub(crate) horizontal_separation: u8,
    pub(crate) vertical_separation: u8,
}

impl ComponentSize {
    /// Bit depth of the component samples before DC level shifting.
    pub fn precision(&self) -> u8 {
        (self.depth & 0x7F) + 1
    }

    pub fn is_signed(&self) -> bool {
        self.depth & 0x80 != 0
    }

    pub fn horizontal_separation(&self) -> u8 {
        self.horizontal_separation
    }

    pub fn vertical_separation(&self) -> u8 {
        self.vertical_separation
    }
}

impl ImageAndTileSizeMarkerSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn reference_grid_width(&self) -> u32 {
        self.reference_grid_width
    }

    pub fn reference_grid_height(&self) -> u32 {
        self.reference_grid_height
    }

    pub fn image_horizontal_offset(&self) -> u32 {
        self.image_horizontal_offset
    }

    pub fn image_vertical_offset(&self) -> u32 {
        self.image_vertical_offset
    }

    pub fn reference_tile_width(&self) -> u32 {
        self.reference_tile_width
    }

    pub fn reference_tile_height(&self) -> u32 {
        self.reference_tile_height
    }

    pub fn tile_horizontal_offset(&self) -> u32 {
        self.tile_horizontal_offset
    }

    pub fn tile_vertical_offset(&self) -> u32 {
        self.tile_vertical_offset
    }

    pub fn no_components(&self) -> u16 {
        self.components.len() as u16
    }

    pub fn component(&self, i: usize) -> Option<&ComponentSize> {
        self.components.get(i)
    }

    pub fn components(&self) -> &[ComponentSize] {
        &self.components
    }
}

// A.4.2
//
// Start of tile-part (SOT)
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOfTileSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Isot
    pub(crate) tile_index: u16,

    // Psot, zero when the tile-part runs until EOC
    pub(crate) tile_part_length: u32,

    // TPsot
    pub(crate) tile_part_index: u8,

    // TNsot, zero when unknown
    pub(crate) no_tile_parts: u8,
}

impl StartOfTileSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn tile_index(&self) -> u16 {
        self.tile_index
    }

    pub fn tile_part_length(&self) -> u32 {
        self.tile_part_length
    }

    pub fn tile_part_index(&self) -> u8 {
        self.tile_part_index
    }

    pub fn no_tile_parts(&self) -> Option<u8> {
        match self.no_tile_parts {
            0 => None,
            n => Some(n),
        }
    }
}

/// A.13 precinct size byte: PPx in the low nibble, PPy in the high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecinctSize(pub u8);

impl PrecinctSize {
    pub const DEFAULT: PrecinctSize = PrecinctSize(0xFF);

    pub fn width_exponent(&self) -> u8 {
        self.0 & 0x0F
    }

    pub fn height_exponent(&self) -> u8 {
        self.0 >> 4
    }
}

// SPcod / SPcoc (Table A.15)
#[derive(Debug, Clone, Default)]
pub struct CodingStyleParameters {
    pub(crate) no_decomposition_levels: u8,

    // Exponent offsets xcb - 2 and ycb - 2
    pub(crate) code_block_width_offset: u8,
    pub(crate) code_block_height_offset: u8,

    pub(crate) code_block_style: CodeBlockStyle,
    pub(crate) filter: WaveletFilter,

    // One entry per resolution level starting at NLLL, only when signalled
    pub(crate) precinct_sizes: Vec<PrecinctSize>,
}

impl CodingStyleParameters {
    pub fn no_decomposition_levels(&self) -> u8 {
        self.no_decomposition_levels
    }

    /// Code-block width exponent xcb.
    pub fn code_block_width_exponent(&self) -> u8 {
        self.code_block_width_offset + 2
    }

    /// Code-block height exponent ycb.
    pub fn code_block_height_exponent(&self) -> u8 {
        self.code_block_height_offset + 2
    }

    pub fn code_block_width(&self) -> u32 {
        1 << self.code_block_width_exponent()
    }

    pub fn code_block_height(&self) -> u32 {
        1 << self.code_block_height_exponent()
    }

    pub fn code_block_style(&self) -> CodeBlockStyle {
        self.code_block_style
    }

    pub fn filter(&self) -> WaveletFilter {
        self.filter
    }

    /// Precinct size of resolution `r`, PPx = PPy = 15 when none was signalled.
    pub fn precinct_size(&self, r: u8) -> PrecinctSize {
        self.precinct_sizes
            .get(r as usize)
            .copied()
            .unwrap_or(PrecinctSize::DEFAULT)
    }

    pub fn precinct_sizes(&self) -> &[PrecinctSize] {
        &self.precinct_sizes
    }
}

// A.6.1
//
// Coding style default (COD)
#[derive(Debug, Clone, Default)]
pub struct CodingStyleMarkerSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Scod
    pub(crate) coding_style: CodingStyleFlags,

    // SGcod
    pub(crate) progression_order: ProgressionOrder,
    pub(crate) no_layers: u16,
    pub(crate) multiple_component_transformation: ComponentTransformation,

    // SPcod
    pub(crate) parameters: CodingStyleParameters,
}

impl CodingStyleMarkerSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn coding_style(&self) -> CodingStyleFlags {
        self.coding_style
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        self.progression_order
    }

    pub fn no_layers(&self) -> u16 {
        self.no_layers
    }

    pub fn multiple_component_transformation(&self) -> ComponentTransformation {
        self.multiple_component_transformation
    }

    pub fn parameters(&self) -> &CodingStyleParameters {
        &self.parameters
    }
}

// A.6.2
//
// Coding style component (COC)
#[derive(Debug, Clone, Default)]
pub struct CodingStyleComponentSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Ccoc
    pub(crate) component_index: u16,

    // Scoc, only the precinct flag is meaningful
    pub(crate) coding_style: CodingStyleFlags,

    // SPcoc
    pub(crate) parameters: CodingStyleParameters,
}

impl CodingStyleComponentSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn component_index(&self) -> u16 {
        self.component_index
    }

    pub fn coding_style(&self) -> CodingStyleFlags {
        self.coding_style
    }

    pub fn parameters(&self) -> &CodingStyleParameters {
        &self.parameters
    }
}

/// Quantization style of Sqcd / Sqcc (Table A.28).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuantizationStyle {
    #[default]
    No,
    ScalarDerived,
    ScalarExpounded,
}

impl QuantizationStyle {
    /// Splits the style byte into the style and its guard bit count.
    pub(crate) fn new(value: u8) -> Result<(QuantizationStyle, u8)> {
        let guard_bits = value >> 5;
        let style = match value & 0b0001_1111 {
            0 => QuantizationStyle::No,
            1 => QuantizationStyle::ScalarDerived,
            2 => QuantizationStyle::ScalarExpounded,
            other => return Err(unsupported!("quantization style {}", other)),
        };

        Ok((style, guard_bits))
    }
}

/// One SPqcd / SPqcc entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepSize {
    pub exponent: u8,
    pub mantissa: u16,
}

impl StepSize {
    // Table A.29, reversible: exponent in the five most significant bits
    pub(crate) fn from_reversible(value: u8) -> StepSize {
        StepSize {
            exponent: value >> 3,
            mantissa: 0,
        }
    }

    // Table A.30, irreversible: five bit exponent, eleven bit mantissa
    pub(crate) fn from_irreversible(value: u16) -> StepSize {
        StepSize {
            exponent: (value >> 11) as u8,
            mantissa: value & 0x07FF,
        }
    }
}

// A.6.4
//
// Quantization default (QCD)
#[derive(Debug, Clone, Default)]
pub struct QuantizationDefaultMarkerSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Sqcd
    pub(crate) quantization_style: QuantizationStyle,
    pub(crate) guard_bits: u8,

    // SPqcd
    pub(crate) step_sizes: Vec<StepSize>,
}

impl QuantizationDefaultMarkerSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn quantization_style(&self) -> QuantizationStyle {
        self.quantization_style
    }

    pub fn guard_bits(&self) -> u8 {
        self.guard_bits
    }

    pub fn step_sizes(&self) -> &[StepSize] {
        &self.step_sizes
    }
}

// A.6.5
//
// Quantization component (QCC)
#[derive(Debug, Clone, Default)]
pub struct QuantizationComponentSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Cqcc
    pub(crate) component_index: u16,

    // Sqcc
    pub(crate) quantization_style: QuantizationStyle,
    pub(crate) guard_bits: u8,

    // SPqcc
    pub(crate) step_sizes: Vec<StepSize>,
}

impl QuantizationComponentSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn component_index(&self) -> u16 {
        self.component_index
    }

    pub fn quantization_style(&self) -> QuantizationStyle {
        self.quantization_style
    }

    pub fn guard_bits(&self) -> u8 {
        self.guard_bits
    }

    pub fn step_sizes(&self) -> &[StepSize] {
        &self.step_sizes
    }
}

/// The quantization fields shared by QCD and QCC.
#[derive(Debug, Clone, Default)]
pub struct Quantization {
    pub style: QuantizationStyle,
    pub guard_bits: u8,
    pub step_sizes: Vec<StepSize>,
}

impl From<&QuantizationDefaultMarkerSegment> for Quantization {
    fn from(segment: &QuantizationDefaultMarkerSegment) -> Self {
        Quantization {
            style: segment.quantization_style,
            guard_bits: segment.guard_bits,
            step_sizes: segment.step_sizes.clone(),
        }
    }
}

impl From<&QuantizationComponentSegment> for Quantization {
    fn from(segment: &QuantizationComponentSegment) -> Self {
        Quantization {
            style: segment.quantization_style,
            guard_bits: segment.guard_bits,
            step_sizes: segment.step_sizes.clone(),
        }
    }
}

// A.6.3
//
// Region of interest (RGN)
#[derive(Debug, Clone, Default)]
pub struct RegionOfInterestSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Crgn
    pub(crate) component_index: u16,

    // Srgn, only the implicit (max shift) style is defined
    pub(crate) style: u8,

    // SPrgn
    pub(crate) shift: u8,
}

impl RegionOfInterestSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn component_index(&self) -> u16 {
        self.component_index
    }

    pub fn style(&self) -> u8 {
        self.style
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }
}

// A.6.6
//
// Progression order change (POC)
#[derive(Debug, Clone, Default)]
pub struct ProgressionOrderChangeSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,
    pub(crate) changes: Vec<ProgressionChange>,
}

impl ProgressionOrderChangeSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn changes(&self) -> &[ProgressionChange] {
        &self.changes
    }
}

/// One progression of a POC segment. Start bounds are inclusive, end
/// bounds exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressionChange {
    // RSpoc, CSpoc
    pub resolution_start: u8,
    pub component_start: u16,

    // LYEpoc, REpoc, CEpoc
    pub layer_end: u16,
    pub resolution_end: u8,
    pub component_end: u16,

    // Ppoc
    pub order: ProgressionOrder,
}

// A.7.1
//
// Tile-part lengths (TLM)
#[derive(Debug, Clone, Default)]
pub struct TilePartLengthsSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Ztlm
    pub(crate) index: u8,

    // Ttlm (absent when tiles hold exactly one tile-part each), Ptlm
    pub(crate) tile_part_lengths: Vec<TilePartLength>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePartLength {
    pub tile_index: Option<u16>,
    pub length: u32,
}

impl TilePartLengthsSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn tile_part_lengths(&self) -> &[TilePartLength] {
        &self.tile_part_lengths
    }
}

// A.7.2
//
// Packet length, main header (PLM)
//
// The Nplm/Iplm series may continue from one PLM segment to the next, so the
// raw bytes are kept and split once the main header is complete.
#[derive(Debug, Clone, Default)]
pub struct PacketLengthSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Zplm
    pub(crate) index: u8,

    pub(crate) data: Vec<u8>,
}

impl PacketLengthSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}

// A.7.3
//
// Packet length, tile-part header (PLT)
#[derive(Debug, Clone, Default)]
pub struct TilePacketLengthSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Zplt
    pub(crate) index: u8,

    // Iplt
    pub(crate) packet_lengths: Vec<u32>,
}

impl TilePacketLengthSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn packet_lengths(&self) -> &[u32] {
        &self.packet_lengths
    }
}

// A.7.4
//
// Packed packet headers, main header (PPM)
#[derive(Debug, Clone, Default)]
pub struct PackedPacketHeaderSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Zppm
    pub(crate) index: u8,

    // Nppm/Ippm series, possibly continued from the previous segment
    pub(crate) data: Vec<u8>,
}

impl PackedPacketHeaderSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}

// A.7.5
//
// Packed packet headers, tile-part header (PPT)
#[derive(Debug, Clone, Default)]
pub struct TilePackedPacketHeaderSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Zppt
    pub(crate) index: u8,

    // Ippt
    pub(crate) data: Vec<u8>,
}

impl TilePackedPacketHeaderSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}

// A.9.1
//
// Component registration (CRG)
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistrationSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Xcrg, Ycrg in units of 1/65536 of the component separation
    pub(crate) offsets: Vec<(u16, u16)>,
}

impl ComponentRegistrationSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn offsets(&self) -> &[(u16, u16)] {
        &self.offsets
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentRegistrationValue {
    Binary,
    Latin,
    Reserved { value: u16 },
}

impl CommentRegistrationValue {
    pub(crate) fn new(value: u16) -> CommentRegistrationValue {
        // Table A.44
        match value {
            0 => CommentRegistrationValue::Binary,
            1 => CommentRegistrationValue::Latin,
            _ => CommentRegistrationValue::Reserved { value },
        }
    }
}

// A.9.2
//
// Comment (COM)
#[derive(Debug, Clone)]
pub struct CommentMarkerSegment {
    pub(crate) offset: u64,
    pub(crate) length: u16,

    // Rcom
    pub(crate) registration_value: CommentRegistrationValue,

    // Ccom
    pub(crate) comment: Vec<u8>,
}

impl CommentMarkerSegment {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn registration_value(&self) -> CommentRegistrationValue {
        self.registration_value
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn comment_utf8(&self) -> std::result::Result<&str, str::Utf8Error> {
        str::from_utf8(&self.comment)
    }
}

/// Where a marker segment lies: `offset` is the byte offset of its length
/// field and `length` the value of that field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLocation {
    pub marker: MarkerSymbol,
    pub offset: u64,
    pub length: u16,
}

impl SegmentLocation {
    fn new(marker: MarkerSymbol, offset: u64, length: u16) -> SegmentLocation {
        SegmentLocation {
            marker,
            offset,
            length,
        }
    }
}

/// Marker segments of the main header (A.3).
#[derive(Debug, Clone, Default)]
pub struct MainHeader {
    pub(crate) siz: ImageAndTileSizeMarkerSegment,
    pub(crate) cod: Option<CodingStyleMarkerSegment>,
    pub(crate) cocs: Vec<CodingStyleComponentSegment>,
    pub(crate) qcd: Option<QuantizationDefaultMarkerSegment>,
    pub(crate) qccs: Vec<QuantizationComponentSegment>,
    pub(crate) rgns: Vec<RegionOfInterestSegment>,
    pub(crate) pocs: Vec<ProgressionOrderChangeSegment>,
    pub(crate) ppms: Vec<PackedPacketHeaderSegment>,
    pub(crate) tlms: Vec<TilePartLengthsSegment>,
    pub(crate) plms: Vec<PacketLengthSegment>,
    pub(crate) crg: Option<ComponentRegistrationSegment>,
    pub(crate) comments: Vec<CommentMarkerSegment>,
}

impl MainHeader {
    pub fn image_and_tile_size_marker_segment(&self) -> &ImageAndTileSizeMarkerSegment {
        &self.siz
    }

    /// Coding style default, present once the main header was read.
    pub fn coding_style_marker_segment(&self) -> Result<&CodingStyleMarkerSegment> {
        self.cod.as_ref().ok_or(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_COD,
        })
    }

    /// Coding style component segments of the main header.
    ///
    /// Each overrides the COD coding style for one component and may in turn
    /// be overridden by a tile-part COD or COC.
    pub fn coding_style_component_segments(&self) -> &[CodingStyleComponentSegment] {
        &self.cocs
    }

    pub fn quantization_default_marker_segment(
        &self,
    ) -> Result<&QuantizationDefaultMarkerSegment> {
        self.qcd.as_ref().ok_or(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_QCD,
        })
    }

    pub fn quantization_component_segments(&self) -> &[QuantizationComponentSegment] {
        &self.qccs
    }

    pub fn region_of_interest_segments(&self) -> &[RegionOfInterestSegment] {
        &self.rgns
    }

    pub fn progression_order_change_segments(&self) -> &[ProgressionOrderChangeSegment] {
        &self.pocs
    }

    pub fn tile_part_lengths_segments(&self) -> &[TilePartLengthsSegment] {
        &self.tlms
    }

    pub fn packet_length_segments(&self) -> &[PacketLengthSegment] {
        &self.plms
    }

    pub fn packed_packet_header_segments(&self) -> &[PackedPacketHeaderSegment] {
        &self.ppms
    }

    pub fn component_registration_segment(&self) -> Option<&ComponentRegistrationSegment> {
        self.crg.as_ref()
    }

    pub fn comment_marker_segments(&self) -> &[CommentMarkerSegment] {
        &self.comments
    }

    /// Every marker segment of the main header in codestream order.
    pub fn segments(&self) -> Vec<SegmentLocation> {
        let mut segments = vec![SegmentLocation::new(
            MARKER_SYMBOL_SIZ,
            self.siz.offset,
            self.siz.length,
        )];
        let mut push = |marker: MarkerSymbol, offset: u64, length: u16| {
            segments.push(SegmentLocation::new(marker, offset, length))
        };
        if let Some(cod) = &self.cod {
            push(MARKER_SYMBOL_COD, cod.offset, cod.length);
        }
        if let Some(qcd) = &self.qcd {
            push(MARKER_SYMBOL_QCD, qcd.offset, qcd.length);
        }
        if let Some(crg) = &self.crg {
            push(MARKER_SYMBOL_CRG, crg.offset, crg.length);
        }
        self.cocs.iter().for_each(|s| push(MARKER_SYMBOL_COC, s.offset, s.length));
        self.qccs.iter().for_each(|s| push(MARKER_SYMBOL_QCC, s.offset, s.length));
        self.rgns.iter().for_each(|s| push(MARKER_SYMBOL_RGN, s.offset, s.length));
        self.pocs.iter().for_each(|s| push(MARKER_SYMBOL_POC, s.offset, s.length));
        self.ppms.iter().for_each(|s| push(MARKER_SYMBOL_PPM, s.offset, s.length));
        self.tlms.iter().for_each(|s| push(MARKER_SYMBOL_TLM, s.offset, s.length));
        self.plms.iter().for_each(|s| push(MARKER_SYMBOL_PLM, s.offset, s.length));
        self.comments.iter().for_each(|s| push(MARKER_SYMBOL_COM, s.offset, s.length));
        segments.sort_by_key(|segment| segment.offset);
        segments
    }
}

/// Marker segments of one tile-part header (A.4).
#[derive(Debug, Clone, Default)]
pub struct TilePartHeader {
    pub(crate) sot: StartOfTileSegment,
    pub(crate) cod: Option<CodingStyleMarkerSegment>,
    pub(crate) cocs: Vec<CodingStyleComponentSegment>,
    pub(crate) qcd: Option<QuantizationDefaultMarkerSegment>,
    pub(crate) qccs: Vec<QuantizationComponentSegment>,
    pub(crate) rgns: Vec<RegionOfInterestSegment>,
    pub(crate) pocs: Vec<ProgressionOrderChangeSegment>,
    pub(crate) ppts: Vec<TilePackedPacketHeaderSegment>,
    pub(crate) plts: Vec<TilePacketLengthSegment>,
    pub(crate) comments: Vec<CommentMarkerSegment>,

    // First byte after SOD
    pub(crate) data_offset: u64,
}

impl TilePartHeader {
    pub fn start_of_tile_segment(&self) -> &StartOfTileSegment {
        &self.sot
    }

    pub fn coding_style_marker_segment(&self) -> Option<&CodingStyleMarkerSegment> {
        self.cod.as_ref()
    }

    pub fn coding_style_component_segments(&self) -> &[CodingStyleComponentSegment] {
        &self.cocs
    }

    pub fn quantization_default_marker_segment(&self) -> Option<&QuantizationDefaultMarkerSegment> {
        self.qcd.as_ref()
    }

    pub fn quantization_component_segments(&self) -> &[QuantizationComponentSegment] {
        &self.qccs
    }

    pub fn region_of_interest_segments(&self) -> &[RegionOfInterestSegment] {
        &self.rgns
    }

    pub fn progression_order_change_segments(&self) -> &[ProgressionOrderChangeSegment] {
        &self.pocs
    }

    pub fn comment_marker_segments(&self) -> &[CommentMarkerSegment] {
        &self.comments
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Every marker segment of the tile-part header in codestream order,
    /// starting with SOT.
    pub fn segments(&self) -> Vec<SegmentLocation> {
        let mut segments = vec![SegmentLocation::new(
            MARKER_SYMBOL_SOT,
            self.sot.offset,
            self.sot.length,
        )];
        let mut push = |marker: MarkerSymbol, offset: u64, length: u16| {
            segments.push(SegmentLocation::new(marker, offset, length))
        };
        if let Some(cod) = &self.cod {
            push(MARKER_SYMBOL_COD, cod.offset, cod.length);
        }
        if let Some(qcd) = &self.qcd {
            push(MARKER_SYMBOL_QCD, qcd.offset, qcd.length);
        }
        self.cocs.iter().for_each(|s| push(MARKER_SYMBOL_COC, s.offset, s.length));
        self.qccs.iter().for_each(|s| push(MARKER_SYMBOL_QCC, s.offset, s.length));
        self.rgns.iter().for_each(|s| push(MARKER_SYMBOL_RGN, s.offset, s.length));
        self.pocs.iter().for_each(|s| push(MARKER_SYMBOL_POC, s.offset, s.length));
        self.ppts.iter().for_each(|s| push(MARKER_SYMBOL_PPT, s.offset, s.length));
        self.plts.iter().for_each(|s| push(MARKER_SYMBOL_PLT, s.offset, s.length));
        self.comments.iter().for_each(|s| push(MARKER_SYMBOL_COM, s.offset, s.length));
        segments.sort_by_key(|segment| segment.offset);
        segments
    }

    /// Whether the header carries segments that only the first tile-part of
    /// a tile may carry.
    pub(crate) fn has_coding_parameters(&self) -> bool {
        self.cod.is_some()
            || self.qcd.is_some()
            || !self.cocs.is_empty()
            || !self.qccs.is_empty()
            || !self.rgns.is_empty()
    }

    /// Packed packet header bytes of this tile-part, concatenated in Zppt order.
    pub(crate) fn packed_packet_headers(&self) -> Vec<u8> {
        let mut segments: Vec<&TilePackedPacketHeaderSegment> = self.ppts.iter().collect();
        segments.sort_by_key(|segment| segment.index);
        segments
            .into_iter()
            .flat_map(|segment| segment.data.iter().copied())
            .collect()
    }

    /// Packet lengths of this tile-part, concatenated in Zplt order.
    pub(crate) fn packet_lengths(&self) -> Vec<u32> {
        let mut segments: Vec<&TilePacketLengthSegment> = self.plts.iter().collect();
        segments.sort_by_key(|segment| segment.index);
        segments
            .into_iter()
            .flat_map(|segment| segment.packet_lengths.iter().copied())
            .collect()
    }
}

/// Splits the concatenated PPM data into one packed header chunk per
/// tile-part, in codestream order (A.7.4).
pub(crate) fn split_packed_packet_headers(
    segments: &[PackedPacketHeaderSegment],
) -> Result<Vec<Vec<u8>>> {
    let mut ordered: Vec<&PackedPacketHeaderSegment> = segments.iter().collect();
    ordered.sort_by_key(|segment| segment.index);
    let data: Vec<u8> = ordered
        .into_iter()
        .flat_map(|segment| segment.data.iter().copied())
        .collect();

    let mut chunks = vec![];
    let mut position = 0;
    while position < data.len() {
        if position + 4 > data.len() {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_PPM,
                error: "truncated Nppm".to_string(),
            });
        }
        let mut nppm = [0u8; 4];
        nppm.copy_from_slice(&data[position..position + 4]);
        let length = u32::from_be_bytes(nppm) as usize;
        position += 4;

        let end = position + length;
        if end > data.len() {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_PPM,
                error: format!(
                    "Nppm {} exceeds the remaining {} bytes",
                    length,
                    data.len() - position
                ),
            });
        }
        chunks.push(data[position..end].to_vec());
        position = end;
    }

    Ok(chunks)
}

/// Splits the concatenated PLM data into the packet lengths of each
/// tile-part, in codestream order (A.7.2).
pub(crate) fn split_packet_lengths(segments: &[PacketLengthSegment]) -> Result<Vec<Vec<u32>>> {
    let mut ordered: Vec<&PacketLengthSegment> = segments.iter().collect();
    ordered.sort_by_key(|segment| segment.index);
    let data: Vec<u8> = ordered
        .into_iter()
        .flat_map(|segment| segment.data.iter().copied())
        .collect();

    let mut tile_parts = vec![];
    let mut position = 0;
    while position < data.len() {
        let nplm = data[position] as usize;
        position += 1;
        let end = position + nplm;
        if end > data.len() {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_PLM,
                error: format!(
                    "Nplm {} exceeds the remaining {} bytes",
                    nplm,
                    data.len() - position
                ),
            });
        }
        tile_parts.push(decode_packet_lengths(&data[position..end])?);
        position = end;
    }

    Ok(tile_parts)
}

/// Decodes a series of 7-bit continuation coded packet lengths.
pub(crate) fn decode_packet_lengths(data: &[u8]) -> Result<Vec<u32>> {
    let mut lengths = vec![];
    let mut value: u32 = 0;
    let mut pending = false;

    for byte in data {
        // Most significant 7-bit group first, 1xxx xxxx continues the value
        value = value
            .checked_shl(7)
            .filter(|_| value >> 25 == 0)
            .ok_or_else(|| invalid!("packet length overflows 32 bits"))?
            | (byte & 0x7F) as u32;
        pending = byte & 0x80 != 0;
        if !pending {
            lengths.push(value);
            value = 0;
        }
    }

    if pending {
        return Err(invalid!("packet length series ends inside a length"));
    }

    Ok(lengths)
}
