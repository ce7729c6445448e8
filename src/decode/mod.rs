//! Decoders the frame sources read from.

pub mod apng;
pub mod track;
