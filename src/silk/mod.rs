//! Stub for the Silk decoder.
//!
//! CELT-only decoding rejects SILK and Hybrid packets at the TOC byte (see
//! [`crate::decoder::Decoder`]), so this module never actually runs the Silk decode
//! path. It is kept as a minimal placeholder so the top-level `Decoder` struct has
//! somewhere to hold silk-shaped state without special-casing mode dispatch, mirroring
//! how the reference decoder keeps both sub-decoders resident regardless of which one
//! a given stream uses.
//!
//! Non-goal: never implement the actual Silk/Hybrid decode path.

pub(crate) use decoder::SilkDecoder;

mod decoder;
