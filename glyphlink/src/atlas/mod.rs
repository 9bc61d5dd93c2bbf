//! Glyph atlas: shelf packing and the shared atlas texture.

mod assembler;
mod packer;

pub use assembler::{AtlasAssembler, AtlasSlot, AtlasStats, BuildBlock, SAMPLE_EMOJI, sample_alphabet};
pub use packer::{PackCursor, PackRect, PackUnit, Packable, PixelRect, ShelfPacker, UvRect};
