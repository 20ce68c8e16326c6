//! Ogg container framing and the top-level stream decoder.
//!
//! Implements just enough of RFC 3533 (Ogg) and RFC 7845 (the Ogg encapsulation for
//! Opus) to walk a byte stream of concatenated pages: sync word discovery,
//! segment-table reconstruction into packet lengths, `OpusHead`/`OpusTags` parsing,
//! and delivery of the remaining packets to [`crate::Decoder`]. Page CRCs are parsed
//! but never verified, matching the reference decoder this crate is grounded on.
//!
//! [`OggOpusDecoder`] mirrors that reference decoder's caller contract: the caller
//! owns the byte stream (file, socket, ring buffer) and keeps calling
//! [`OggOpusDecoder::decode`] with `input` positioned wherever the previous call's
//! `bytes_left` said to resume from. There is no internal buffering of packet bytes;
//! only the current page's reconstructed segment-length table survives between calls.

mod metadata;
mod page;

use crate::{Channels, Decoder, DecoderConfiguration, DecoderError, SamplingRate};

/// Outcome of one call to [`OggOpusDecoder::decode`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeStatus {
    /// An Ogg page header (and any `OpusHead`/`OpusTags` it carried) was consumed;
    /// no audio was produced by this call.
    ParsedOggPage,
    /// One Opus packet was decoded into the caller's output buffer.
    Decoded {
        /// Samples per channel written to the output buffer.
        samples: u32,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// Awaiting a caller-driven [`OggOpusDecoder::find_sync_word`] call.
    Searching,
    /// The next `decode()` call parses one Ogg page header.
    ParsePage,
    /// The next `decode()` call consumes one entry of the segment table.
    Frame,
}

/// Decodes a byte stream of concatenated Ogg pages carrying CELT-only Opus packets
/// into interleaved, 48 kHz, 16-bit PCM, and extracts the stream's title from
/// `OpusTags`.
///
/// Construct with [`OggOpusDecoder::new`], locate the first page with
/// [`OggOpusDecoder::find_sync_word`], then repeatedly call
/// [`OggOpusDecoder::decode`]. Each call reports how many bytes of `input` it
/// consumed through `bytes_left`; the caller is responsible for advancing its own
/// read position by that amount before the next call.
pub struct OggOpusDecoder {
    state: State,
    decoder: Decoder,

    channels: u8,
    pre_skip: u16,
    awaiting_tags_page: bool,

    segment_lengths: Vec<usize>,
    segment_cursor: usize,

    stream_title: Option<String>,
    output_samples: u32,
}

impl OggOpusDecoder {
    /// Creates a decoder awaiting the first `OggS` sync word.
    ///
    /// Scratch buffers are sized for stereo regardless of what `OpusHead` later
    /// reports, mirroring the reference decoder allocating its CELT state once, up
    /// front, for the maximum supported channel count.
    pub fn new() -> Result<Self, DecoderError> {
        let decoder = Decoder::new(&DecoderConfiguration {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Stereo,
            gain: 0,
        })?;

        Ok(Self {
            state: State::Searching,
            decoder,
            channels: 0,
            pre_skip: 0,
            awaiting_tags_page: false,
            segment_lengths: Vec::with_capacity(256),
            segment_cursor: 0,
            stream_title: None,
            output_samples: 0,
        })
    }

    /// Resets the decoder to the state of a freshly constructed one.
    pub fn clear(&mut self) -> Result<(), DecoderError> {
        *self = Self::new()?;
        Ok(())
    }

    /// The number of channels declared by `OpusHead`, once parsed.
    pub fn channels(&self) -> Option<Channels> {
        match self.channels {
            1 => Some(Channels::Mono),
            2 => Some(Channels::Stereo),
            _ => None,
        }
    }

    /// Output sampling rate. Always 48 kHz: this decoder never resamples.
    pub fn sample_rate(&self) -> SamplingRate {
        SamplingRate::Hz48000
    }

    /// Bits per output sample. Always 16.
    pub fn bits_per_sample(&self) -> u8 {
        16
    }

    /// The number of samples (at 48 kHz) to discard from the start of the decoded
    /// stream, as declared by `OpusHead`. This decoder reports the value but does not
    /// apply the skip itself, matching the reference decoder it is grounded on.
    pub fn pre_skip(&self) -> u16 {
        self.pre_skip
    }

    /// Samples per channel produced by the most recent [`OggOpusDecoder::decode`] call
    /// that decoded audio.
    pub fn output_samples(&self) -> u32 {
        self.output_samples
    }

    /// The stream's bitrate. Always `1`: the reference decoder never computes an
    /// actual bitrate either, and this keeps parity with it rather than fabricating
    /// one.
    pub fn bit_rate(&self) -> u32 {
        1
    }

    /// Returns the stream title (`"<artist> - <title>"`, or whichever of the two was
    /// present) extracted from the most recent `OpusTags` page, once. Subsequent
    /// calls return `None` until another `OpusTags` page supplies a new title.
    pub fn stream_title(&mut self) -> Option<String> {
        self.stream_title.take()
    }

    /// Searches `buf` for the `OggS` capture pattern and, if found, arms the decoder
    /// to parse a page starting at the returned offset on the next
    /// [`OggOpusDecoder::decode`] call.
    ///
    /// Applications resyncing after a corrupt or missing page should call this again
    /// rather than assuming `decode()` will recover on its own.
    pub fn find_sync_word(&mut self, buf: &[u8]) -> Result<usize, DecoderError> {
        let offset = page::find_sync_word(buf)?;
        self.state = State::ParsePage;
        Ok(offset)
    }

    /// Processes one Ogg page header when between pages, or one Opus packet when a
    /// page's segment table still has entries left. Advances `bytes_left` by the
    /// number of bytes of `input` this call consumed; `input` must start exactly
    /// where the previous call's `bytes_left` said to resume.
    pub fn decode(
        &mut self,
        input: &[u8],
        bytes_left: &mut usize,
        output_pcm: &mut [i16],
    ) -> Result<DecodeStatus, DecoderError> {
        match self.state {
            State::Searching => Err(DecoderError::DecoderAsync),
            State::ParsePage => self.decode_page(input, bytes_left),
            State::Frame => self.decode_frame(input, bytes_left, output_pcm),
        }
    }

    fn decode_page(
        &mut self,
        input: &[u8],
        bytes_left: &mut usize,
    ) -> Result<DecodeStatus, DecoderError> {
        let (header, header_len, lengths) = page::parse_header(input)?;

        // Only the page immediately following a BOS page is treated as a candidate
        // for `OpusTags`; any earlier or later page that happens to start with the
        // right magic is just audio data and is left alone.
        let is_header_candidate = header.bos || self.awaiting_tags_page;
        self.awaiting_tags_page = header.bos;

        if is_header_candidate {
            let packet_len = lengths.first().copied().unwrap_or(0);
            let packet = input
                .get(header_len..header_len + packet_len)
                .ok_or(DecoderError::BadArgument("Ogg page payload is truncated"))?;

            if let Some(head) = metadata::parse_head(packet)? {
                log::debug!(
                    "OpusHead: {} channel(s), {} pre-skip samples",
                    head.channel_count,
                    head.pre_skip
                );
                self.channels = head.channel_count;
                self.pre_skip = head.pre_skip;
            }
            if let Some(title) = metadata::parse_tags(packet) {
                log::trace!("OpusTags: stream title set to {title:?}");
                self.stream_title = Some(title);
            }

            *bytes_left = input.len() - (header_len + packet_len);
            self.state = State::ParsePage;
            return Ok(DecodeStatus::ParsedOggPage);
        }

        *bytes_left = input.len() - header_len;
        self.segment_cursor = 0;
        self.state = if lengths.is_empty() {
            State::ParsePage
        } else {
            State::Frame
        };
        self.segment_lengths = lengths;
        Ok(DecodeStatus::ParsedOggPage)
    }

    fn decode_frame(
        &mut self,
        input: &[u8],
        bytes_left: &mut usize,
        output_pcm: &mut [i16],
    ) -> Result<DecodeStatus, DecoderError> {
        let len = *self
            .segment_lengths
            .get(self.segment_cursor)
            .ok_or(DecoderError::InternalError("segment table exhausted"))?;
        let packet = input
            .get(..len)
            .ok_or(DecoderError::BadArgument("Opus packet is truncated"))?;

        let samples = self.decoder.decode(packet, output_pcm)?;
        self.output_samples = samples;
        self.segment_cursor += 1;
        *bytes_left = input.len() - len;

        if self.segment_cursor >= self.segment_lengths.len() {
            self.segment_lengths.clear();
            self.segment_cursor = 0;
            self.state = State::ParsePage;
        }

        Ok(DecodeStatus::Decoded { samples })
    }
}
