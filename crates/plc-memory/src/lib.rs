//! The shared memory image: the PLC simulator's single source of truth for
//! process data.
//!
//! Four sections hold process values: a bit-addressable `bits` section and
//! three word-addressable sections (`words16`, `words32`, `words64`). All
//! four live behind one coarse-grained mutex -- every request from the
//! fieldbus engine and every tick from a signal producer takes the same
//! lock, so reads and writes never interleave within a section or across
//! sections.

mod image;

pub use image::{MemoryImage, Section};
