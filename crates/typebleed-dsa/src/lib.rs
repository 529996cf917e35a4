#![no_std]
extern crate alloc;

pub mod placement;
pub mod ring;

pub use placement::Placements;
pub use ring::SequencedRing;
