//! Stub for the Silk decoder state.
//!
//! Never actually decodes: [`crate::decoder::Decoder`] rejects SILK and Hybrid
//! packets at the TOC byte before any dispatch would reach this type.

use crate::DecoderError;
use crate::{Channels, SamplingRate};

/// The Silk decoder's resident state.
///
/// Held by [`crate::decoder::Decoder`] purely so the top-level decoder has a
/// uniform shape regardless of which sub-decoder a stream would use; its
/// methods are never invoked on the CELT-only decode path.
#[derive(Clone, Debug)]
pub(crate) struct SilkDecoder {
    sampling_rate: SamplingRate,
    channels: Channels,
}

impl SilkDecoder {
    /// Creates a new Silk decoder stub.
    pub(crate) fn new(sampling_rate: SamplingRate, channels: Channels) -> Result<Self, DecoderError> {
        Ok(Self {
            sampling_rate,
            channels,
        })
    }

    /// Returns the sampling rate this stub was constructed with.
    pub(crate) fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    /// Returns the channel count this stub was constructed with.
    pub(crate) fn channels(&self) -> Channels {
        self.channels
    }
}
