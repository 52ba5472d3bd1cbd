//! JPEG 2000 codestream decoding (ITU-T T.800).
//!
//! The crate reads the marker segments of a codestream, walks its packets in
//! progression order and reports every code-block to the decode tasks that
//! reconstruct the image. The entropy decoder, wavelet, dequantizer,
//! component transform and image assembly are supplied through [`Tasks`].

mod bit_reader;
mod parser;

pub mod countdown;
pub mod decoder;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod marker;
pub mod model;
pub mod packet;
pub mod pipeline;
pub mod progression;
pub mod source;
pub mod sparse;
pub mod tag_tree;
pub mod tasks;
pub mod tile_part;

pub use bit_reader::PacketBitReader;
pub use decoder::{decode_jpc, DecodeRequest, Decoder};
pub use diagnostics::{Diagnostics, NoDiagnostics};
pub use error::{CodestreamError, Result};
pub use geometry::{BandKind, Partition, Region};
pub use model::codestream::{Codestream, CodestreamInfo};
pub use progression::{PacketKey, ProgressionOrder};
pub use source::ByteSource;
pub use tasks::{DecodedImage, ImagePlane, Tasks};
