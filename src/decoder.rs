//! Implement the Opus decoder.

use crate::celt::CeltDecoder;
use crate::range_coder::{RangeDecoder, Tell};
use crate::silk::SilkDecoder;
use crate::{
    parse_packet, query_packet_channel_count, query_packet_codec_mode,
    query_packet_samples_per_frame, Bandwidth, Channels, CodecMode, DecoderError, Sample,
    SamplingRate,
};

/// Configures the decoder on creation.
///
/// Internally Opus stores data at 48000 Hz, so that should be the default
/// value for the sampling rate. However, the decoder can efficiently decode
/// to buffers at 8, 12, 16, and 24 kHz so if for some reason the caller cannot
/// use data at the full sample rate, or knows the compressed data doesn't
/// use the full frequency range, it can request decoding at a reduced
/// rate. Likewise, the decoder is capable of filling in either mono or
/// interleaved stereo pcm buffers, at the caller's request.
#[derive(Clone, Debug)]
pub struct DecoderConfiguration {
    /// Sample rate to decode at (Hz). Default: 48000 kHz.
    pub sampling_rate: SamplingRate,
    /// Number of channels to decode. Default: Stereo.
    pub channels: Channels,
    /// Scales the decoded output by a factor specified in Q8 dB units. Default: 0.
    pub gain: i16,
}

impl Default for DecoderConfiguration {
    fn default() -> Self {
        Self {
            sampling_rate: SamplingRate::Hz48000,
            channels: Channels::Stereo,
            gain: 0,
        }
    }
}

/// Opus decoder, restricted to the CELT-only coding mode.
///
/// SILK and Hybrid frames are rejected at the TOC byte with
/// [`DecoderError::SilkModeUnsupported`] / [`DecoderError::HybridModeUnsupported`]; packet
/// loss concealment (a missing packet) is likewise out of scope and rejected the same way a
/// too-small packet would be.
#[derive(Clone, Debug)]
pub struct Decoder {
    celt_dec: CeltDecoder,
    silk_dec: SilkDecoder,
    channels: Channels,
    sampling_rate: SamplingRate,
    decode_gain: i16,

    bandwidth: Bandwidth,
    prev_mode: Option<CodecMode>,
    last_packet_duration: Option<u32>,

    final_range: u32,
}

impl Decoder {
    /// Creates a new `Decoder` with the given configuration.
    pub fn new(configuration: &DecoderConfiguration) -> Result<Self, DecoderError> {
        let celt_dec = CeltDecoder::new(configuration.sampling_rate, configuration.channels)?;
        let silk_dec = SilkDecoder::new(configuration.sampling_rate, configuration.channels)?;

        Ok(Self {
            celt_dec,
            silk_dec,
            sampling_rate: configuration.sampling_rate,
            channels: configuration.channels,
            decode_gain: configuration.gain,
            bandwidth: Bandwidth::Auto,
            prev_mode: None,
            last_packet_duration: None,

            final_range: 0,
        })
    }

    /// Resets the Decoder to be equivalent to a freshly initialized decoder.
    ///
    /// This should be called when switching streams in order to prevent
    /// the back to back decoding from giving different results from
    /// one at a time decoding.
    pub fn reset(&mut self) -> Result<(), DecoderError> {
        self.celt_dec.reset()?;

        self.bandwidth = Bandwidth::Auto;
        self.prev_mode = None;
        self.last_packet_duration = None;
        self.final_range = 0;

        Ok(())
    }

    /// Returns the sampling rate the decoder was initialized with.
    pub fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }

    /// Returns the channels the decoder was initialized with.
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Returns the amount to scale PCM signal by in Q8 dB units.
    pub fn gain(&self) -> i16 {
        self.decode_gain
    }

    /// Returns the decoder's last bandpass.
    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    /// Returns the pitch of the last decoded frame, measured in samples at 48 kHz.
    pub fn pitch(&self) -> Option<u32> {
        self.prev_mode.map(|_| self.celt_dec.pitch())
    }

    /// Returns the duration (in samples) of the last packet successfully decoded.
    pub fn last_packet_duration(&self) -> Option<u32> {
        self.last_packet_duration
    }

    /// Returns the final state of the codec's entropy coder.
    ///
    /// This is used for testing purposes, the encoder and decoder state
    /// should be identical after coding a payload assuming no data
    /// corruption or software bugs).
    pub fn final_range(&mut self) -> u32 {
        self.final_range
    }

    /// Decode an Opus packet with a generic sample output.
    ///
    /// Returns the number of decoded samples per channel.
    ///
    /// Caller needs to make sure that the samples buffer has enough space to fit
    /// all samples inside the packet. Call `query_packet_sample_count()` to query
    /// the number of samples inside a packet and resize the buffer if needed.
    ///
    /// The internal format is `f32`. Use `decode_float()` to access it directly.
    pub fn decode<S: Sample>(&mut self, packet: &[u8], samples: &mut [S]) -> Result<u32, DecoderError> {
        let mut float_buf = vec![0.0f32; samples.len()];
        let n = self.decode_float(packet, &mut float_buf)?;
        for (dst, src) in samples.iter_mut().zip(float_buf.iter()) {
            *dst = S::from_f32(*src);
        }
        Ok(n)
    }

    /// Decode an Opus packet with floating point output.
    ///
    /// Returns the number of decoded samples per channel.
    ///
    /// Caller needs to make sure that the samples buffer has enough space to fit
    /// all samples inside the packet. Call `query_packet_sample_count()` to query
    /// the number of samples inside a packet and resize the buffer if needed.
    pub fn decode_float(&mut self, packet: &[u8], samples: &mut [f32]) -> Result<u32, DecoderError> {
        if packet.len() < 2 {
            return Err(DecoderError::BadArgument("packet is too small to hold a CELT frame"));
        }

        match query_packet_codec_mode(packet) {
            CodecMode::Silk => {
                log::warn!("rejecting SILK-mode packet: only CELT is supported");
                return Err(DecoderError::SilkModeUnsupported);
            }
            CodecMode::Hybrid => {
                log::warn!("rejecting Hybrid-mode packet: only CELT is supported");
                return Err(DecoderError::HybridModeUnsupported);
            }
            CodecMode::Celt => {}
        }

        let stereo = query_packet_channel_count(packet) == Channels::Stereo;
        let channels = if stereo { 2usize } else { 1usize };
        let lm = i32::from((packet[0] >> 3) & 0x3);
        let samples_per_frame = query_packet_samples_per_frame(packet, self.sampling_rate);

        let mut sizes = [0usize; 48];
        let mut payload_offset = 0usize;
        let count = parse_packet(packet, false, None, &mut sizes, Some(&mut payload_offset), None)?;

        let needed = count * samples_per_frame * channels;
        if samples.len() < needed {
            return Err(DecoderError::BufferToSmall);
        }

        let mut offset = payload_offset;
        let mut out_off = 0usize;
        for &size in sizes.iter().take(count) {
            let frame = &packet[offset..offset + size];
            let mut dec = RangeDecoder::new(frame);

            self.celt_dec.decode_frame(
                &mut dec,
                lm,
                stereo,
                (size * 8) as i32,
                &mut samples[out_off..out_off + samples_per_frame * channels],
            )?;

            self.final_range = dec.range();
            offset += size;
            out_off += samples_per_frame * channels;
        }

        self.bandwidth = Bandwidth::Fullband;
        self.prev_mode = Some(CodecMode::Celt);
        self.last_packet_duration = Some((count * samples_per_frame) as u32);

        if self.decode_gain != 0 {
            let scale = 10f32.powf(f32::from(self.decode_gain) / (20.0 * 256.0));
            for s in samples[..needed].iter_mut() {
                *s *= scale;
            }
        }

        Ok((count * samples_per_frame) as u32)
    }
}
