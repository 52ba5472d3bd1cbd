//! The decoding state of a codestream, from the codestream down to its
//! code-blocks.

pub mod band;
pub mod block;
pub mod codestream;
pub mod component;
pub mod resolution;
pub mod tile;
