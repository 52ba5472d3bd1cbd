//! Decoding of the main header and tile-part header marker segments.

use log::{debug, info, warn};
use std::io;

use crate::error::{invalid, CodestreamError, Result};
use crate::marker::*;
use crate::progression::ProgressionOrder;

fn read_u8<R: io::Read>(reader: &mut R) -> Result<u8> {
    let mut buffer = [0u8; 1];
    reader.read_exact(&mut buffer)?;
    Ok(buffer[0])
}

fn read_u16<R: io::Read>(reader: &mut R) -> Result<u16> {
    let mut buffer = [0u8; 2];
    reader.read_exact(&mut buffer)?;
    Ok(u16::from_be_bytes(buffer))
}

fn read_u32<R: io::Read>(reader: &mut R) -> Result<u32> {
    let mut buffer = [0u8; 4];
    reader.read_exact(&mut buffer)?;
    Ok(u32::from_be_bytes(buffer))
}

fn read_marker<R: io::Read>(reader: &mut R) -> Result<MarkerSymbol> {
    let mut marker: MarkerSymbol = [0; 2];
    reader.read_exact(&mut marker)?;
    Ok(marker)
}

fn read_vec<R: io::Read>(reader: &mut R, length: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

// Length of marker segment in bytes (not including the marker).
fn decode_length<R: io::Read>(reader: &mut R, marker: MarkerSymbol, minimum: u16) -> Result<u16> {
    let length = read_u16(reader)?;
    if length < minimum {
        return Err(CodestreamError::MarkerError {
            marker,
            error: format!("segment length {} below minimum {}", length, minimum),
        });
    }
    Ok(length)
}

/// Moves the reader to the end of a segment of `length` bytes whose length
/// field started at `offset`, failing if the segment body overran it.
fn finish_segment<R: io::Read + io::Seek>(
    reader: &mut R,
    marker: MarkerSymbol,
    offset: u64,
    length: u16,
) -> Result<()> {
    let end = offset + length as u64;
    let position = reader.stream_position()?;
    if position > end {
        return Err(CodestreamError::MarkerError {
            marker,
            error: format!("segment body overruns its length {} by {} bytes", length, position - end),
        });
    }
    if position < end {
        debug!(
            "{} skipping {} trailing bytes",
            marker_name(marker),
            end - position
        );
        reader.seek(io::SeekFrom::Start(end))?;
    }
    info!("{} end at byte offset {}", marker_name(marker), end);
    Ok(())
}

// Either 8 or 16 bits depending on Csiz.
fn decode_component_index<R: io::Read>(
    reader: &mut R,
    marker: MarkerSymbol,
    no_components: u16,
) -> Result<u16> {
    let index = if no_components < 257 {
        read_u8(reader)? as u16
    } else {
        read_u16(reader)?
    };

    if index >= no_components {
        return Err(CodestreamError::MarkerError {
            marker,
            error: format!("component index {} exceeds Csiz {}", index, no_components),
        });
    }

    Ok(index)
}

fn component_index_size(no_components: u16) -> u16 {
    if no_components < 257 {
        1
    } else {
        2
    }
}

// A.5.1 - Image and tile size (SIZ)
pub(crate) fn decode_siz<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<ImageAndTileSizeMarkerSegment> {
    info!("SIZ start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_SIZ, 41)?;

    let mut segment = ImageAndTileSizeMarkerSegment {
        offset,
        length,
        capabilities: Capabilities(read_u16(reader)?),
        reference_grid_width: read_u32(reader)?,
        reference_grid_height: read_u32(reader)?,
        image_horizontal_offset: read_u32(reader)?,
        image_vertical_offset: read_u32(reader)?,
        reference_tile_width: read_u32(reader)?,
        reference_tile_height: read_u32(reader)?,
        tile_horizontal_offset: read_u32(reader)?,
        tile_vertical_offset: read_u32(reader)?,
        components: vec![],
    };

    let no_components = read_u16(reader)?;
    if no_components == 0 || no_components > 16384 {
        return Err(invalid!("Csiz {} outside 1..=16384", no_components));
    }
    if length as u32 != 38 + 3 * no_components as u32 {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_SIZ,
            error: format!("Lsiz {} does not match Csiz {}", length, no_components),
        });
    }

    segment.components = Vec::with_capacity(no_components as usize);
    for i in 0..no_components {
        let component = ComponentSize {
            depth: read_u8(reader)?,
            horizontal_separation: read_u8(reader)?,
            vertical_separation: read_u8(reader)?,
        };

        if component.precision() > 38 {
            return Err(invalid!(
                "component {} precision {} exceeds 38 bits",
                i,
                component.precision()
            ));
        }
        if component.horizontal_separation == 0 || component.vertical_separation == 0 {
            return Err(invalid!("component {} has a zero sample separation", i));
        }

        segment.components.push(component);
    }

    validate_siz(&segment)?;
    finish_segment(reader, MARKER_SYMBOL_SIZ, offset, length)?;

    Ok(segment)
}

fn validate_siz(segment: &ImageAndTileSizeMarkerSegment) -> Result<()> {
    if segment.reference_grid_width <= segment.image_horizontal_offset
        || segment.reference_grid_height <= segment.image_vertical_offset
    {
        return Err(invalid!(
            "empty image area {}x{} at offset {},{}",
            segment.reference_grid_width,
            segment.reference_grid_height,
            segment.image_horizontal_offset,
            segment.image_vertical_offset
        ));
    }

    if segment.reference_tile_width == 0 || segment.reference_tile_height == 0 {
        return Err(invalid!("zero tile size"));
    }

    // 0 <= XTOsiz <= XOsiz, 0 <= YTOsiz <= YOsiz
    if segment.tile_horizontal_offset > segment.image_horizontal_offset
        || segment.tile_vertical_offset > segment.image_vertical_offset
    {
        return Err(CodestreamError::TileGridOffsetOverflow {
            tile_horizontal_offset: segment.tile_horizontal_offset,
            tile_vertical_offset: segment.tile_vertical_offset,
            image_horizontal_offset: segment.image_horizontal_offset,
            image_vertical_offset: segment.image_vertical_offset,
        });
    }

    // XTsiz + XTOsiz > XOsiz, YTsiz + YTOsiz > YOsiz
    let tile_right = segment.reference_tile_width as u64 + segment.tile_horizontal_offset as u64;
    let tile_bottom = segment.reference_tile_height as u64 + segment.tile_vertical_offset as u64;
    if tile_right <= segment.image_horizontal_offset as u64
        || tile_bottom <= segment.image_vertical_offset as u64
    {
        return Err(CodestreamError::TileSizeOverflow {
            image_horizontal_offset: segment.image_horizontal_offset,
            image_vertical_offset: segment.image_vertical_offset,
            tile_horizontal_offset: segment.tile_horizontal_offset,
            tile_vertical_offset: segment.tile_vertical_offset,
            reference_tile_width: segment.reference_tile_width,
            reference_tile_height: segment.reference_tile_height,
        });
    }

    Ok(())
}

// A.4.2 - Start of tile-part (SOT)
pub(crate) fn decode_sot<R: io::Read + io::Seek>(reader: &mut R) -> Result<StartOfTileSegment> {
    info!("SOT start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_SOT, 10)?;
    if length != 10 {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_SOT,
            error: format!("Lsot {} is not 10", length),
        });
    }

    let segment = StartOfTileSegment {
        offset,
        length,
        tile_index: read_u16(reader)?,
        tile_part_length: read_u32(reader)?,
        tile_part_index: read_u8(reader)?,
        no_tile_parts: read_u8(reader)?,
    };

    if segment.no_tile_parts != 0 && segment.tile_part_index >= segment.no_tile_parts {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_SOT,
            error: format!(
                "TPsot {} not below TNsot {}",
                segment.tile_part_index, segment.no_tile_parts
            ),
        });
    }

    finish_segment(reader, MARKER_SYMBOL_SOT, offset, length)?;

    Ok(segment)
}

fn decode_coding_style_parameters<R: io::Read>(
    reader: &mut R,
    marker: MarkerSymbol,
    coding_style: CodingStyleFlags,
) -> Result<CodingStyleParameters> {
    let mut parameters = CodingStyleParameters {
        no_decomposition_levels: read_u8(reader)?,
        code_block_width_offset: read_u8(reader)?,
        code_block_height_offset: read_u8(reader)?,
        code_block_style: CodeBlockStyle(read_u8(reader)?),
        filter: WaveletFilter::new(read_u8(reader)?)?,
        precinct_sizes: vec![],
    };

    if parameters.no_decomposition_levels > 32 {
        return Err(invalid!(
            "{} decomposition levels {} exceed 32",
            marker_name(marker),
            parameters.no_decomposition_levels
        ));
    }

    // A.18: 2^2 to 2^10 and xcb + ycb <= 12
    if parameters.code_block_width_offset > 8
        || parameters.code_block_height_offset > 8
        || parameters.code_block_width_offset + parameters.code_block_height_offset > 8
    {
        return Err(invalid!(
            "{} code-block size 2^{}x2^{} out of range",
            marker_name(marker),
            parameters.code_block_width_exponent(),
            parameters.code_block_height_exponent()
        ));
    }

    if parameters.code_block_style.0 & 0b1100_0000 != 0 {
        return Err(unsupported_style(marker, parameters.code_block_style.0));
    }

    if coding_style.has_defined_precinct_size() {
        // The first entry is the NLLL sub-band, then each resolution in order
        for r in 0..=parameters.no_decomposition_levels {
            let size = PrecinctSize(read_u8(reader)?);
            if r > 0 && (size.width_exponent() == 0 || size.height_exponent() == 0) {
                return Err(invalid!(
                    "{} precinct exponent 0 at resolution {}",
                    marker_name(marker),
                    r
                ));
            }
            parameters.precinct_sizes.push(size);
        }
    }

    Ok(parameters)
}

fn unsupported_style(marker: MarkerSymbol, value: u8) -> CodestreamError {
    crate::error::unsupported!("{} code-block style 0x{:02X}", marker_name(marker), value)
}

// A.6.1 - Coding style default (COD)
pub(crate) fn decode_cod<R: io::Read + io::Seek>(reader: &mut R) -> Result<CodingStyleMarkerSegment> {
    info!("COD start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_COD, 12)?;

    let coding_style = CodingStyleFlags(read_u8(reader)?);
    let progression_order = ProgressionOrder::new(read_u8(reader)?)?;
    let no_layers = read_u16(reader)?;
    if no_layers == 0 {
        return Err(invalid!("COD signals zero layers"));
    }
    let multiple_component_transformation = ComponentTransformation::new(read_u8(reader)?)?;
    let parameters = decode_coding_style_parameters(reader, MARKER_SYMBOL_COD, coding_style)?;

    finish_segment(reader, MARKER_SYMBOL_COD, offset, length)?;

    Ok(CodingStyleMarkerSegment {
        offset,
        length,
        coding_style,
        progression_order,
        no_layers,
        multiple_component_transformation,
        parameters,
    })
}

// A.6.2 - Coding style component (COC)
pub(crate) fn decode_coc<R: io::Read + io::Seek>(
    reader: &mut R,
    no_components: u16,
) -> Result<CodingStyleComponentSegment> {
    info!("COC start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_COC, 9)?;

    let component_index = decode_component_index(reader, MARKER_SYMBOL_COC, no_components)?;
    let coding_style = CodingStyleFlags(read_u8(reader)?);
    let parameters = decode_coding_style_parameters(reader, MARKER_SYMBOL_COC, coding_style)?;

    finish_segment(reader, MARKER_SYMBOL_COC, offset, length)?;

    Ok(CodingStyleComponentSegment {
        offset,
        length,
        component_index,
        coding_style,
        parameters,
    })
}

fn decode_step_sizes<R: io::Read>(
    reader: &mut R,
    marker: MarkerSymbol,
    style: QuantizationStyle,
    available: u16,
) -> Result<Vec<StepSize>> {
    let count = match style {
        QuantizationStyle::No => available,
        QuantizationStyle::ScalarDerived => 1,
        QuantizationStyle::ScalarExpounded => available / 2,
    };

    if count == 0 {
        return Err(CodestreamError::MarkerError {
            marker,
            error: "no quantization step sizes".to_string(),
        });
    }

    let mut step_sizes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let step_size = match style {
            // Reversible transformation values
            QuantizationStyle::No => StepSize::from_reversible(read_u8(reader)?),
            // Irreversible transformation values
            QuantizationStyle::ScalarDerived | QuantizationStyle::ScalarExpounded => {
                StepSize::from_irreversible(read_u16(reader)?)
            }
        };
        step_sizes.push(step_size);
    }

    Ok(step_sizes)
}

// A.6.4 - Quantization default (QCD)
pub(crate) fn decode_qcd<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<QuantizationDefaultMarkerSegment> {
    info!("QCD start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_QCD, 4)?;

    let (quantization_style, guard_bits) = QuantizationStyle::new(read_u8(reader)?)?;
    let step_sizes = decode_step_sizes(reader, MARKER_SYMBOL_QCD, quantization_style, length - 3)?;

    finish_segment(reader, MARKER_SYMBOL_QCD, offset, length)?;

    Ok(QuantizationDefaultMarkerSegment {
        offset,
        length,
        quantization_style,
        guard_bits,
        step_sizes,
    })
}

// A.6.5 - Quantization component (QCC)
pub(crate) fn decode_qcc<R: io::Read + io::Seek>(
    reader: &mut R,
    no_components: u16,
) -> Result<QuantizationComponentSegment> {
    info!("QCC start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let index_size = component_index_size(no_components);
    let length = decode_length(reader, MARKER_SYMBOL_QCC, 4 + index_size)?;

    let component_index = decode_component_index(reader, MARKER_SYMBOL_QCC, no_components)?;
    let (quantization_style, guard_bits) = QuantizationStyle::new(read_u8(reader)?)?;
    let step_sizes = decode_step_sizes(
        reader,
        MARKER_SYMBOL_QCC,
        quantization_style,
        length - 3 - index_size,
    )?;

    finish_segment(reader, MARKER_SYMBOL_QCC, offset, length)?;

    Ok(QuantizationComponentSegment {
        offset,
        length,
        component_index,
        quantization_style,
        guard_bits,
        step_sizes,
    })
}

// A.6.3 - Region of interest (RGN)
pub(crate) fn decode_rgn<R: io::Read + io::Seek>(
    reader: &mut R,
    no_components: u16,
) -> Result<RegionOfInterestSegment> {
    info!("RGN start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_RGN, 5)?;

    let component_index = decode_component_index(reader, MARKER_SYMBOL_RGN, no_components)?;
    let style = read_u8(reader)?;
    if style != 0 {
        return Err(crate::error::unsupported!("RGN style {}", style));
    }
    let shift = read_u8(reader)?;

    finish_segment(reader, MARKER_SYMBOL_RGN, offset, length)?;

    Ok(RegionOfInterestSegment {
        offset,
        length,
        component_index,
        style,
        shift,
    })
}

// A.6.6 - Progression order change (POC)
pub(crate) fn decode_poc<R: io::Read + io::Seek>(
    reader: &mut R,
    no_components: u16,
) -> Result<ProgressionOrderChangeSegment> {
    info!("POC start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let index_size = component_index_size(no_components);
    let entry_size = 5 + 2 * index_size;
    let length = decode_length(reader, MARKER_SYMBOL_POC, 2 + entry_size)?;

    // The number of progression changes follows from the segment length
    let no_changes = (length - 2) / entry_size;
    let mut changes = Vec::with_capacity(no_changes as usize);

    for _ in 0..no_changes {
        let resolution_start = read_u8(reader)?;
        let component_start = if index_size == 1 {
            read_u8(reader)? as u16
        } else {
            read_u16(reader)?
        };
        let layer_end = read_u16(reader)?;
        let resolution_end = read_u8(reader)?;
        let component_end = if index_size == 1 {
            // 0 is interpreted as 256
            match read_u8(reader)? {
                0 => 256,
                value => value as u16,
            }
        } else {
            read_u16(reader)?
        };
        let order = ProgressionOrder::new(read_u8(reader)?)?;

        if resolution_start >= resolution_end || component_start >= component_end || layer_end == 0
        {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_POC,
                error: format!(
                    "empty progression RS {} RE {} CS {} CE {} LYE {}",
                    resolution_start, resolution_end, component_start, component_end, layer_end
                ),
            });
        }

        changes.push(ProgressionChange {
            resolution_start,
            component_start,
            layer_end,
            resolution_end,
            component_end: component_end.min(no_components),
            order,
        });
    }

    finish_segment(reader, MARKER_SYMBOL_POC, offset, length)?;

    Ok(ProgressionOrderChangeSegment {
        offset,
        length,
        changes,
    })
}

// A.7.1 - Tile-part lengths (TLM)
pub(crate) fn decode_tlm<R: io::Read + io::Seek>(reader: &mut R) -> Result<TilePartLengthsSegment> {
    info!("TLM start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_TLM, 4)?;

    let index = read_u8(reader)?;
    let stlm = read_u8(reader)?;

    // Stlm: ST in bits 4-5, SP in bit 6
    let tile_index_size: u16 = match (stlm >> 4) & 0b11 {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_TLM,
                error: format!("reserved Stlm 0x{:02X}", stlm),
            })
        }
    };
    let tile_length_size: u16 = if (stlm >> 6) & 1 == 0 { 2 } else { 4 };

    let no_tile_parts = (length - 4) / (tile_index_size + tile_length_size);
    let mut tile_part_lengths = Vec::with_capacity(no_tile_parts as usize);

    for _ in 0..no_tile_parts {
        let tile_index = match tile_index_size {
            0 => None,
            1 => Some(read_u8(reader)? as u16),
            _ => Some(read_u16(reader)?),
        };
        let length = match tile_length_size {
            2 => read_u16(reader)? as u32,
            _ => read_u32(reader)?,
        };
        tile_part_lengths.push(TilePartLength { tile_index, length });
    }

    finish_segment(reader, MARKER_SYMBOL_TLM, offset, length)?;

    Ok(TilePartLengthsSegment {
        offset,
        length,
        index,
        tile_part_lengths,
    })
}

// A.7.2 - Packet length, main header (PLM)
pub(crate) fn decode_plm<R: io::Read + io::Seek>(reader: &mut R) -> Result<PacketLengthSegment> {
    info!("PLM start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_PLM, 3)?;

    let index = read_u8(reader)?;
    let data = read_vec(reader, (length - 3) as usize)?;

    finish_segment(reader, MARKER_SYMBOL_PLM, offset, length)?;

    Ok(PacketLengthSegment {
        offset,
        length,
        index,
        data,
    })
}

// A.7.3 - Packet length, tile-part header (PLT)
pub(crate) fn decode_plt<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<TilePacketLengthSegment> {
    info!("PLT start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_PLT, 3)?;

    let index = read_u8(reader)?;
    let data = read_vec(reader, (length - 3) as usize)?;
    let packet_lengths = decode_packet_lengths(&data).map_err(|e| CodestreamError::MarkerError {
        marker: MARKER_SYMBOL_PLT,
        error: e.to_string(),
    })?;

    finish_segment(reader, MARKER_SYMBOL_PLT, offset, length)?;

    Ok(TilePacketLengthSegment {
        offset,
        length,
        index,
        packet_lengths,
    })
}

// A.7.4 - Packed packet headers, main header (PPM)
pub(crate) fn decode_ppm<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<PackedPacketHeaderSegment> {
    info!("PPM start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_PPM, 3)?;

    let index = read_u8(reader)?;
    let data = read_vec(reader, (length - 3) as usize)?;

    finish_segment(reader, MARKER_SYMBOL_PPM, offset, length)?;

    Ok(PackedPacketHeaderSegment {
        offset,
        length,
        index,
        data,
    })
}

// A.7.5 - Packed packet headers, tile-part header (PPT)
pub(crate) fn decode_ppt<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<TilePackedPacketHeaderSegment> {
    info!("PPT start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_PPT, 3)?;

    let index = read_u8(reader)?;
    let data = read_vec(reader, (length - 3) as usize)?;

    finish_segment(reader, MARKER_SYMBOL_PPT, offset, length)?;

    Ok(TilePackedPacketHeaderSegment {
        offset,
        length,
        index,
        data,
    })
}

// A.9.1 - Component registration (CRG)
pub(crate) fn decode_crg<R: io::Read + io::Seek>(
    reader: &mut R,
    no_components: u16,
) -> Result<ComponentRegistrationSegment> {
    info!("CRG start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_CRG, 2 + 4 * no_components)?;

    let mut offsets = Vec::with_capacity(no_components as usize);
    for _ in 0..no_components {
        offsets.push((read_u16(reader)?, read_u16(reader)?));
    }

    finish_segment(reader, MARKER_SYMBOL_CRG, offset, length)?;

    Ok(ComponentRegistrationSegment {
        offset,
        length,
        offsets,
    })
}

// A.9.2 - Comment (COM)
pub(crate) fn decode_com<R: io::Read + io::Seek>(reader: &mut R) -> Result<CommentMarkerSegment> {
    info!("COM start at byte offset {}", reader.stream_position()? - 2);
    let offset = reader.stream_position()?;
    let length = decode_length(reader, MARKER_SYMBOL_COM, 4)?;

    let registration_value = CommentRegistrationValue::new(read_u16(reader)?);
    let comment = read_vec(reader, (length - 4) as usize)?;

    finish_segment(reader, MARKER_SYMBOL_COM, offset, length)?;

    Ok(CommentMarkerSegment {
        offset,
        length,
        registration_value,
        comment,
    })
}

/// Skips a segment this decoder does not interpret.
fn skip_segment<R: io::Read + io::Seek>(reader: &mut R, marker: MarkerSymbol) -> Result<()> {
    let offset = reader.stream_position()?;
    // 0xFF30 to 0xFF3F carry no parameters
    if (0x30..=0x3F).contains(&marker[1]) {
        return Ok(());
    }
    let length = decode_length(reader, marker, 2)?;
    warn!(
        "skipping unknown marker segment 0x{:02X}{:02X} of {} bytes at byte offset {}",
        marker[0],
        marker[1],
        length,
        offset - 2
    );
    reader.seek(io::SeekFrom::Start(offset + length as u64))?;
    Ok(())
}

/// Reads SOC and SIZ, the two segments every codestream starts with.
pub(crate) fn decode_soc_siz<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<ImageAndTileSizeMarkerSegment> {
    // SOC (Required as the first marker)
    let marker = read_marker(reader)?;
    if marker != MARKER_SYMBOL_SOC {
        return Err(CodestreamError::MarkerUnexpected {
            marker,
            offset: reader.stream_position()? - 2,
        });
    }
    info!("SOC start at byte offset {}", reader.stream_position()? - 2);

    // SIZ (Required as the second marker segment)
    let marker = read_marker(reader)?;
    if marker != MARKER_SYMBOL_SIZ {
        return Err(CodestreamError::MarkerUnexpected {
            marker,
            offset: reader.stream_position()? - 2,
        });
    }

    decode_siz(reader)
}

// A.3 - Construction of the main header
//
// Consumes the marker segments following SIZ and leaves the reader on the
// first SOT marker.
pub(crate) fn decode_main_header<R: io::Read + io::Seek>(
    reader: &mut R,
    siz: ImageAndTileSizeMarkerSegment,
) -> Result<MainHeader> {
    let no_components = siz.no_components();
    let mut header = MainHeader {
        siz,
        ..Default::default()
    };

    loop {
        let marker = read_marker(reader)?;
        match marker {
            MARKER_SYMBOL_COD => {
                if header.cod.is_some() {
                    warn!("duplicate COD in main header, last one wins");
                }
                header.cod = Some(decode_cod(reader)?);
            }
            MARKER_SYMBOL_COC => {
                let segment = decode_coc(reader, no_components)?;
                check_unique(
                    MARKER_SYMBOL_COC,
                    header.cocs.iter().map(|s| s.component_index),
                    segment.component_index,
                )?;
                header.cocs.push(segment);
            }
            MARKER_SYMBOL_QCD => {
                if header.qcd.is_some() {
                    warn!("duplicate QCD in main header, last one wins");
                }
                header.qcd = Some(decode_qcd(reader)?);
            }
            MARKER_SYMBOL_QCC => {
                let segment = decode_qcc(reader, no_components)?;
                check_unique(
                    MARKER_SYMBOL_QCC,
                    header.qccs.iter().map(|s| s.component_index),
                    segment.component_index,
                )?;
                header.qccs.push(segment);
            }
            MARKER_SYMBOL_RGN => {
                let segment = decode_rgn(reader, no_components)?;
                check_unique(
                    MARKER_SYMBOL_RGN,
                    header.rgns.iter().map(|s| s.component_index),
                    segment.component_index,
                )?;
                header.rgns.push(segment);
            }
            MARKER_SYMBOL_POC => header.pocs.push(decode_poc(reader, no_components)?),
            MARKER_SYMBOL_PPM => header.ppms.push(decode_ppm(reader)?),
            MARKER_SYMBOL_TLM => header.tlms.push(decode_tlm(reader)?),
            MARKER_SYMBOL_PLM => header.plms.push(decode_plm(reader)?),
            MARKER_SYMBOL_CRG => header.crg = Some(decode_crg(reader, no_components)?),
            MARKER_SYMBOL_COM => header.comments.push(decode_com(reader)?),

            // Start of tile bit-stream
            MARKER_SYMBOL_SOT => {
                reader.seek(io::SeekFrom::Current(-2))?;
                break;
            }

            MARKER_SYMBOL_SOC
            | MARKER_SYMBOL_SIZ
            | MARKER_SYMBOL_SOD
            | MARKER_SYMBOL_EOC
            | MARKER_SYMBOL_PLT
            | MARKER_SYMBOL_PPT
            | MARKER_SYMBOL_SOP
            | MARKER_SYMBOL_EPH => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker,
                    offset: reader.stream_position()? - 2,
                });
            }
            _ if marker[0] == 0xFF => skip_segment(reader, marker)?,
            _ => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker,
                    offset: reader.stream_position()? - 2,
                });
            }
        }
    }

    // Required
    if header.cod.is_none() {
        return Err(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_COD,
        });
    }
    if header.qcd.is_none() {
        return Err(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_QCD,
        });
    }

    Ok(header)
}

// A.6.2, A.6.3, A.6.5: no more than one per component in a header
fn check_unique(
    marker: MarkerSymbol,
    mut existing: impl Iterator<Item = u16>,
    component: u16,
) -> Result<()> {
    if existing.any(|index| index == component) {
        return Err(CodestreamError::MarkerError {
            marker,
            error: format!("more than one segment for component {}", component),
        });
    }
    Ok(())
}

// A.4 - Construction of a tile-part header
//
// Expects the reader on the SOT marker and leaves it on the first byte of
// the tile-part bit stream.
pub(crate) fn decode_tile_part_header<R: io::Read + io::Seek>(
    reader: &mut R,
    no_components: u16,
    has_ppm: bool,
) -> Result<TilePartHeader> {
    // SOT (Required as the first marker segment of every tile-part header)
    let marker = read_marker(reader)?;
    if marker != MARKER_SYMBOL_SOT {
        return Err(CodestreamError::MarkerUnexpected {
            marker,
            offset: reader.stream_position()? - 2,
        });
    }

    let mut header = TilePartHeader {
        sot: decode_sot(reader)?,
        ..Default::default()
    };

    loop {
        let marker = read_marker(reader)?;
        match marker {
            MARKER_SYMBOL_COD => header.cod = Some(decode_cod(reader)?),
            MARKER_SYMBOL_COC => {
                let segment = decode_coc(reader, no_components)?;
                check_unique(
                    MARKER_SYMBOL_COC,
                    header.cocs.iter().map(|s| s.component_index),
                    segment.component_index,
                )?;
                header.cocs.push(segment);
            }
            MARKER_SYMBOL_QCD => header.qcd = Some(decode_qcd(reader)?),
            MARKER_SYMBOL_QCC => {
                let segment = decode_qcc(reader, no_components)?;
                check_unique(
                    MARKER_SYMBOL_QCC,
                    header.qccs.iter().map(|s| s.component_index),
                    segment.component_index,
                )?;
                header.qccs.push(segment);
            }
            MARKER_SYMBOL_RGN => {
                let segment = decode_rgn(reader, no_components)?;
                check_unique(
                    MARKER_SYMBOL_RGN,
                    header.rgns.iter().map(|s| s.component_index),
                    segment.component_index,
                )?;
                header.rgns.push(segment);
            }
            MARKER_SYMBOL_POC => header.pocs.push(decode_poc(reader, no_components)?),
            MARKER_SYMBOL_PPT => {
                // With PPM present all packet headers live in the main header
                if has_ppm {
                    return Err(CodestreamError::MarkerUnexpected {
                        marker,
                        offset: reader.stream_position()? - 2,
                    });
                }
                header.ppts.push(decode_ppt(reader)?);
            }
            MARKER_SYMBOL_PLT => header.plts.push(decode_plt(reader)?),
            MARKER_SYMBOL_COM => header.comments.push(decode_com(reader)?),

            // Required as the last marker segment of every tile-part header
            MARKER_SYMBOL_SOD => {
                info!("SOD start at byte offset {}", reader.stream_position()? - 2);
                header.data_offset = reader.stream_position()?;
                break;
            }

            MARKER_SYMBOL_SOC
            | MARKER_SYMBOL_SIZ
            | MARKER_SYMBOL_SOT
            | MARKER_SYMBOL_EOC
            | MARKER_SYMBOL_TLM
            | MARKER_SYMBOL_PLM
            | MARKER_SYMBOL_PPM
            | MARKER_SYMBOL_CRG
            | MARKER_SYMBOL_SOP
            | MARKER_SYMBOL_EPH => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker,
                    offset: reader.stream_position()? - 2,
                });
            }
            _ if marker[0] == 0xFF => skip_segment(reader, marker)?,
            _ => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker,
                    offset: reader.stream_position()? - 2,
                });
            }
        }
    }

    Ok(header)
}
