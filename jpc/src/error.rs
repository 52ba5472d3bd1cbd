use std::error;
use std::io;

use thiserror::Error;

use crate::marker::MarkerSymbol;

/// Errors raised while decoding a codestream.
///
/// Structural and validation errors found in the main header or while
/// locating a tile abort the whole decode. Errors scoped to a single packet
/// (see [`CodestreamError::is_packet_local`]) are contained by the packet
/// stage unless strict decoding was requested.
#[derive(Debug, Error)]
pub enum CodestreamError {
    #[error("marker 0x{:02X}{:02X} error {error}", .marker[0], .marker[1])]
    MarkerError { marker: MarkerSymbol, error: String },

    #[error("missing marker 0x{:02X}{:02X}", .marker[0], .marker[1])]
    MarkerMissing { marker: MarkerSymbol },

    #[error("unexpected marker 0x{:02X}{:02X} at byte offset {offset}", .marker[0], .marker[1])]
    MarkerUnexpected { marker: MarkerSymbol, offset: u64 },

    #[error(
        "tile grid offset overflow: XOsiz = {image_horizontal_offset}, YOsiz = {image_vertical_offset}, XTOsiz = {tile_horizontal_offset}, YTOsiz = {tile_vertical_offset}"
    )]
    TileGridOffsetOverflow {
        tile_horizontal_offset: u32,
        tile_vertical_offset: u32,
        image_horizontal_offset: u32,
        image_vertical_offset: u32,
    },

    #[error(
        "tile size overflow: XOsiz = {image_horizontal_offset}, YOsiz = {image_vertical_offset}, XTOsiz = {tile_horizontal_offset}, YTOsiz = {tile_vertical_offset}, XTsiz = {reference_tile_width}, YTsiz = {reference_tile_height}"
    )]
    TileSizeOverflow {
        image_horizontal_offset: u32,
        image_vertical_offset: u32,
        tile_horizontal_offset: u32,
        tile_vertical_offset: u32,
        reference_tile_width: u32,
        reference_tile_height: u32,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unsupported feature: {0}")]
    Unsupported(String),

    #[error("corrupt bit stuffing in packet header at byte offset {offset}")]
    CorruptBitstuffing { offset: u64 },

    #[error("packet data truncated at byte offset {offset}")]
    TruncatedPacket { offset: u64 },

    #[error("no tile-part found for tile {tile}")]
    TileNotFound { tile: u32 },

    #[error("{task} task failed [{message_id}]: {source}")]
    Task {
        task: &'static str,
        message_id: &'static str,
        #[source]
        source: Box<dyn error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CodestreamError {
    /// Whether the error only invalidates the packet being read.
    pub fn is_packet_local(&self) -> bool {
        matches!(
            self,
            Self::CorruptBitstuffing { .. } | Self::TruncatedPacket { .. }
        )
    }

    pub(crate) fn task<E>(task: &'static str, message_id: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Task {
            task,
            message_id,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodestreamError>;

macro_rules! invalid {
    ($($arg:tt)*) => {
        $crate::error::CodestreamError::Validation(format!($($arg)*))
    };
}

macro_rules! unsupported {
    ($($arg:tt)*) => {
        $crate::error::CodestreamError::Unsupported(format!($($arg)*))
    };
}

pub(crate) use invalid;
pub(crate) use unsupported;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::{MARKER_SYMBOL_SIZ, MARKER_SYMBOL_SOC};

    #[test]
    fn test_marker_display() {
        let error = CodestreamError::MarkerUnexpected {
            marker: MARKER_SYMBOL_SOC,
            offset: 12,
        };
        assert_eq!(
            error.to_string(),
            "unexpected marker 0xFF4F at byte offset 12"
        );

        let error = CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_SIZ,
        };
        assert_eq!(error.to_string(), "missing marker 0xFF51");
    }

    #[test]
    fn test_packet_local() {
        assert!(CodestreamError::CorruptBitstuffing { offset: 0 }.is_packet_local());
        assert!(CodestreamError::TruncatedPacket { offset: 0 }.is_packet_local());
        assert!(!invalid!("bad").is_packet_local());
        assert!(!CodestreamError::TileNotFound { tile: 3 }.is_packet_local());
    }
}
