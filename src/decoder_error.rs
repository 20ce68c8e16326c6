//! Decoder errors.

/// Errors thrown by the decoder.
///
/// Negative error codes in the reference decoder map one-to-one onto these variants;
/// a successful call has no counterpart here and is represented by `Result::Ok`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DecoderError {
    /// A call was made in the wrong decoder state (e.g. `decode()` before a page was parsed).
    #[error("decoder called out of sequence")]
    DecoderAsync,
    /// The input does not contain (or no longer contains) an `OggS` sync word.
    #[error("no Ogg sync word found")]
    OggSyncNotFound,
    /// The channel count carried by `OpusHead` is neither 1 nor 2.
    #[error("unsupported number of channels")]
    ChannelsUnsupported,
    /// `OpusHead` declared a sample rate other than 48000 Hz.
    #[error("unsupported sample rate, only 48000 Hz is supported")]
    InvalidSampleRate,
    /// `OpusHead` declared a channel mapping family this decoder does not implement.
    #[error("channel mapping families other than 0 and 1 are not supported")]
    ExtraChannelsUnsupported,
    /// The packet's TOC byte selects a SILK configuration (config < 12).
    #[error("SILK and Hybrid mode packets are not supported, CELT only")]
    SilkModeUnsupported,
    /// The packet's TOC byte selects a Hybrid configuration (12 <= config < 16).
    #[error("Hybrid mode packets are not supported, CELT only")]
    HybridModeUnsupported,
    /// An argument given to the decoder was malformed (bad packet length, null buffer, etc.).
    #[error("bad argument: {0}")]
    BadArgument(&'static str),
    /// A scratch buffer could not be allocated.
    #[error("allocation failure")]
    AllocFail,
    /// The packet could not be parsed into valid Opus frames.
    #[error("invalid packet")]
    InvalidPacket,
    /// The frame size given by the caller is too small for the packet.
    #[error("the frame size is too small for the packet")]
    FrameSizeTooSmall,
    /// The output buffer is too small to hold the decoded samples.
    #[error("buffer is too small")]
    BufferToSmall,
    /// An internal invariant was violated (e.g. the range decoder consumed more bits than
    /// the packet held).
    #[error("internal decoder error: {0}")]
    InternalError(&'static str),
    /// The requested operation is not implemented.
    #[error("unimplemented")]
    Unimplemented,
}
