//! Implements the CELT decoder: per-frame orchestration of the range-coded
//! bitstream into 48 kHz PCM.
//!
//! [`CeltDecoder::decode_frame`] runs the full per-packet sequence: silence
//! flag, post-filter parameters, transient/intra flags, coarse energy,
//! time-frequency resolution, spreading, dynamic allocation, bit allocation,
//! fine energy, spectral quantization, anti-collapse, synthesis, comb
//! filtering and de-emphasis. Everything that needs to survive between
//! packets (band energy history, post-filter state, MDCT overlap, the
//! de-emphasis memory) lives on `CeltDecoder` itself.

use crate::celt::bands::{compute_allocation, init_caps};
use crate::celt::energy::{unquant_coarse_energy, unquant_energy_finalise, unquant_fine_energy};
use crate::celt::mdct::{celt_synthesis, denormalise_bands};
use crate::celt::mode::{
    EBAND5MS, NB_EBANDS, OVERLAP, PREEMPH, SPREAD_ICDF, TAPSET_ICDF, TF_SELECT_TABLE, TRIM_ICDF,
};
use crate::celt::comb_filter::comb_filter_inplace;
use crate::celt::quant::{anti_collapse, quant_all_bands};
use crate::range_coder::{RangeDecoder, Tell};
use crate::{Channels, DecoderError, SamplingRate};

const BITRES: i32 = 3;

/// Log-energy (Q10) floor a freshly reset decoder starts its prediction from.
const INITIAL_LOG_E: i16 = -28 * 1024;

/// Samples of per-channel history kept for the comb filter's pitch lookback,
/// ahead of the current frame. Must exceed the largest decodable pitch
/// period (`16<<6 + 2^(4+6)-1` for the highest octave) with margin for the
/// filter's 2-tap FIR spread.
const HIST_LEN: usize = 2048;

/// The CELT decoder's resident state: everything that must survive between
/// packets of the same stream.
#[derive(Clone, Debug)]
pub(crate) struct CeltDecoder {
    channels: Channels,
    start: usize,
    end: usize,

    old_e_bands: [i16; 2 * NB_EBANDS],
    old_log_e2: [i16; 2 * NB_EBANDS],
    background_log_e: [i16; 2 * NB_EBANDS],

    postfilter_period: usize,
    postfilter_period_old: usize,
    postfilter_gain: f32,
    postfilter_gain_old: f32,
    postfilter_tapset: usize,
    postfilter_tapset_old: usize,

    overlap_mem: [[f32; OVERLAP]; 2],
    history: [Vec<f32>; 2],
    preemph_mem: [f32; 2],

    rng: u32,
}

impl CeltDecoder {
    /// Creates a new CELT decoder.
    pub(crate) fn new(_sampling_rate: SamplingRate, channels: Channels) -> Result<Self, DecoderError> {
        Ok(Self {
            channels,
            start: 0,
            end: NB_EBANDS,
            old_e_bands: [INITIAL_LOG_E; 2 * NB_EBANDS],
            old_log_e2: [INITIAL_LOG_E; 2 * NB_EBANDS],
            background_log_e: [INITIAL_LOG_E; 2 * NB_EBANDS],
            postfilter_period: 0,
            postfilter_period_old: 0,
            postfilter_gain: 0.0,
            postfilter_gain_old: 0.0,
            postfilter_tapset: 0,
            postfilter_tapset_old: 0,
            overlap_mem: [[0.0; OVERLAP]; 2],
            history: [vec![0.0; HIST_LEN], vec![0.0; HIST_LEN]],
            preemph_mem: [0.0; 2],
            rng: 0,
        })
    }

    /// Resets the CELT decoder to the state of a freshly constructed one.
    pub(crate) fn reset(&mut self) -> Result<(), DecoderError> {
        *self = Self::new(SamplingRate::Hz48000, self.channels)?;
        Ok(())
    }

    /// Gets the pitch period (in samples) used by the post-filter on the last decoded frame.
    pub(crate) fn pitch(&self) -> u32 {
        self.postfilter_period as u32
    }

    /// Decodes one CELT frame from `dec` (a range decoder scoped to exactly this
    /// frame's bytes) into `out_pcm`, interleaved if `stereo`.
    ///
    /// `lm` is the frame size class (0..=3, i.e. 120<<lm samples at 48 kHz).
    /// `budget_bits` is the frame's size in bits (`frame_bytes * 8`).
    pub(crate) fn decode_frame(
        &mut self,
        dec: &mut RangeDecoder,
        lm: i32,
        stereo: bool,
        budget_bits: i32,
        out_pcm: &mut [f32],
    ) -> Result<(), DecoderError> {
        let c = if stereo { 2i32 } else { 1i32 };
        let m = 1i32 << lm;
        let n = (120usize) << lm;
        let start = self.start;
        let end = self.end;

        if out_pcm.len() < n * c as usize {
            return Err(DecoderError::BufferToSmall);
        }

        let silence = if dec.tell() as i32 >= budget_bits {
            true
        } else if dec.tell() as i32 == 1 {
            dec.decode_bit_logp(15)
        } else {
            false
        };

        let mut postfilter_gain = 0.0f32;
        let mut postfilter_period = 0usize;
        let mut postfilter_tapset = 0usize;
        if !silence && start == 0 && dec.tell() as i32 + 16 <= budget_bits {
            let enabled = dec.decode_bit_logp(1);
            if enabled {
                let octave = dec.decode_uint(6);
                postfilter_period = ((16 << octave) + dec.decode_bits(4 + octave) - 1) as usize;
                let qg = dec.decode_bits(3);
                postfilter_gain = 0.09375 * (qg as f32 + 1.0);
                postfilter_tapset = if dec.tell() as i32 + 2 <= budget_bits {
                    dec.decode_icdf(&TAPSET_ICDF, 2) as usize
                } else {
                    0
                };
            }
        }

        let is_transient = lm > 0 && !silence && dec.tell() as i32 + 3 <= budget_bits && dec.decode_bit_logp(3);
        let intra = !silence && dec.tell() as i32 + 3 <= budget_bits && dec.decode_bit_logp(3);

        let mut prev1 = self.old_e_bands;
        if !silence {
            unquant_coarse_energy(dec, &mut self.old_e_bands, intra, c, lm, end, budget_bits);
        }

        let total_bits_frac = budget_bits << BITRES;

        let mut spread = 2i32; // SPREAD_NORMAL
        let cap = init_caps(lm, c);
        let mut offsets = [0i32; NB_EBANDS];
        let mut alloc_trim = 5i32;
        let mut anti_collapse_rsv = 0i32;

        if !silence {
            tf_decode(dec, start, end, is_transient, lm, budget_bits);

            spread = if dec.tell() as i32 + 4 <= budget_bits {
                dec.decode_icdf(&SPREAD_ICDF, 5) as i32
            } else {
                2
            };

            let dynalloc_budget = (total_bits_frac - dec.tell_frac() as i32 - 1).max(0);
            offsets = decode_dynalloc(dec, start, end, lm, c, &cap, dynalloc_budget);

            alloc_trim = if dec.tell_frac() as i32 + (6 << BITRES) <= total_bits_frac {
                dec.decode_icdf(&TRIM_ICDF, 7) as i32
            } else {
                5
            };

            anti_collapse_rsv = if is_transient
                && lm >= 2
                && dec.tell_frac() as i32 + (1 << BITRES) <= total_bits_frac
            {
                1 << BITRES
            } else {
                0
            };
        }

        let total_for_alloc = (total_bits_frac - dec.tell_frac() as i32 - 1 - anti_collapse_rsv).max(0);
        let alloc = compute_allocation(dec, &offsets, &cap, alloc_trim, total_for_alloc, c, lm, end);

        if !silence {
            unquant_fine_energy(dec, &mut self.old_e_bands, &alloc.fine_quant, c, end);
        }

        let bound = (m * i32::from(EBAND5MS[end])) as usize;
        let mut x = vec![0.0f32; bound];
        let mut y = if stereo { Some(vec![0.0f32; bound]) } else { None };
        let mut collapse_masks = vec![0u8; NB_EBANDS * c as usize];

        self.rng = dec.range();
        let mut seed = self.rng;

        if !silence {
            quant_all_bands(
                dec,
                &mut x,
                y.as_deref_mut(),
                &mut collapse_masks,
                &alloc.pulses,
                is_transient,
                spread,
                alloc.dual_stereo != 0,
                alloc.intensity,
                lm,
                alloc.coded_bands,
                &mut seed,
            );
        }

        let anti_collapse_on = anti_collapse_rsv > 0 && dec.decode_bits(1) != 0;

        let bits_left = (budget_bits - dec.tell() as i32).max(0);
        if !silence {
            unquant_energy_finalise(
                dec,
                &mut self.old_e_bands,
                &alloc.fine_quant,
                &alloc.fine_priority,
                bits_left,
                c,
                end,
            );
        }

        if anti_collapse_on {
            anti_collapse(
                &mut x,
                y.as_deref_mut(),
                &collapse_masks,
                lm,
                c,
                start,
                end,
                &alloc.pulses,
                &self.old_e_bands,
                &prev1,
                &self.old_log_e2,
                &mut seed,
            );
        }

        if dec.tell() as i32 > budget_bits {
            return Err(DecoderError::InternalError("range decoder overran the frame budget"));
        }

        for ch in 0..c as usize {
            let spectrum: &[f32] = match (ch, y.as_ref()) {
                (0, _) => &x,
                (_, Some(side)) => side,
                (_, None) => &x,
            };
            let old_e = &self.old_e_bands[ch * NB_EBANDS..(ch + 1) * NB_EBANDS];

            let mut freq = vec![0.0f32; n];
            denormalise_bands(spectrum, &mut freq, old_e, start, end, m, &EBAND5MS, bound.min(n));

            let mut syn = vec![0.0f32; n];
            let b = if is_transient { 1usize << lm } else { 1usize };
            celt_synthesis(&freq, &mut syn, &mut self.overlap_mem[ch], n, b);

            let hist = &mut self.history[ch];
            let mut buf = vec![0.0f32; HIST_LEN + n];
            buf[..HIST_LEN].copy_from_slice(hist);
            buf[HIST_LEN..].copy_from_slice(&syn);

            comb_filter_inplace(
                &mut buf,
                HIST_LEN,
                self.postfilter_period_old.max(1),
                postfilter_period.max(1),
                n,
                self.postfilter_gain_old,
                postfilter_gain,
                self.postfilter_tapset_old,
                postfilter_tapset,
                OVERLAP,
            );

            hist.copy_from_slice(&buf[n..]);

            let coef = f32::from(PREEMPH[0]) / 32768.0;
            let mut mem = self.preemph_mem[ch];
            for i in 0..n {
                let sample = buf[HIST_LEN + i] + mem;
                mem = coef * sample;
                out_pcm[i * c as usize + ch] = (sample / 32768.0).clamp(-1.0, 1.0);
            }
            self.preemph_mem[ch] = mem;
        }

        self.postfilter_period_old = if postfilter_gain > 0.0 { postfilter_period } else { self.postfilter_period_old };
        self.postfilter_gain_old = postfilter_gain;
        self.postfilter_tapset_old = postfilter_tapset;
        self.postfilter_period = postfilter_period;
        self.postfilter_gain = postfilter_gain;
        self.postfilter_tapset = postfilter_tapset;

        if is_transient {
            for i in 0..c as usize * NB_EBANDS {
                self.old_log_e2[i] = self.old_log_e2[i].min(prev1[i]);
            }
        } else {
            let step = m as i16;
            for i in 0..c as usize * NB_EBANDS {
                self.background_log_e[i] = (self.background_log_e[i] + step).min(self.old_e_bands[i]);
                self.old_log_e2[i] = prev1[i];
            }
        }
        for i in c as usize * NB_EBANDS..2 * NB_EBANDS {
            prev1[i] = INITIAL_LOG_E;
        }

        for ch in 0..2usize {
            for i in end..NB_EBANDS {
                self.old_e_bands[ch * NB_EBANDS + i] = INITIAL_LOG_E;
            }
        }

        Ok(())
    }
}

/// Decodes the per-band time/frequency split flags, consuming bits in
/// lockstep with the reference sequence even though this implementation
/// keeps a single frame-wide block count (see DESIGN.md).
fn tf_decode(
    dec: &mut RangeDecoder,
    start: usize,
    end: usize,
    is_transient: bool,
    lm: i32,
    budget_bits: i32,
) -> [i32; NB_EBANDS] {
    let mut tf_res = [0i32; NB_EBANDS];
    let mut curr = 0i32;
    let mut tf_changed = 0i32;
    let mut logp: i32 = if is_transient { 2 } else { 4 };
    let tf_select_rsv = lm > 0 && dec.tell() as i32 + logp + 1 <= budget_bits;
    let budget = budget_bits - i32::from(tf_select_rsv);

    for slot in tf_res.iter_mut().take(end).skip(start) {
        if dec.tell() as i32 + logp <= budget {
            let bit = i32::from(dec.decode_bit_logp(logp as u32));
            curr ^= bit;
            tf_changed |= curr;
        }
        *slot = curr;
        logp = if is_transient { 4 } else { 5 };
    }

    let mut tf_select = 0usize;
    if tf_select_rsv {
        let a = TF_SELECT_TABLE[(lm as usize) * 8 + usize::from(is_transient) * 4 + tf_changed as usize];
        let b = TF_SELECT_TABLE[(lm as usize) * 8 + usize::from(is_transient) * 4 + 2 + tf_changed as usize];
        if a != b {
            tf_select = usize::from(dec.decode_bit_logp(1));
        }
    }

    for slot in tf_res.iter_mut().take(end).skip(start) {
        let idx = (lm as usize) * 8 + usize::from(is_transient) * 4 + tf_select * 2 + *slot as usize;
        *slot = i32::from(TF_SELECT_TABLE[idx]);
    }

    tf_res
}

/// Decodes per-band bit-allocation boosts, each flag bit cheaper than the
/// last within a band and the per-band starting cost decaying across bands.
#[allow(clippy::too_many_arguments)]
fn decode_dynalloc(
    dec: &mut RangeDecoder,
    start: usize,
    end: usize,
    lm: i32,
    c: i32,
    cap: &[i32; NB_EBANDS],
    total_bits: i32,
) -> [i32; NB_EBANDS] {
    let mut offsets = [0i32; NB_EBANDS];
    let mut dynalloc_logp: i32 = 6;
    let mut total = total_bits;

    for i in start..end {
        let width = (c * (i32::from(EBAND5MS[i + 1]) - i32::from(EBAND5MS[i]))) << lm;
        let width = width.max(c << lm);
        let quanta = (width << BITRES).min((c << BITRES).max(width));
        let mut dynalloc_loop_logp = dynalloc_logp;
        let mut boost = 0i32;

        while (dec.tell_frac() as i32 + (dynalloc_loop_logp << BITRES)) < total && boost < cap[i] {
            let flag = dec.decode_bit_logp(dynalloc_loop_logp as u32);
            if !flag {
                break;
            }
            boost += quanta;
            total -= quanta;
            dynalloc_loop_logp = 1;
        }

        offsets[i] = boost;
        if boost > 0 {
            dynalloc_logp = (dynalloc_logp - 1).max(2);
        }
    }

    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SamplingRate;

    #[test]
    fn test_tf_decode_values_bounded_by_select_table() {
        let buffer = vec![0u8; 64];
        let mut dec = RangeDecoder::new(&buffer);
        let tf_res = tf_decode(&mut dec, 0, NB_EBANDS, true, 3, 64 * 8);
        for &v in &tf_res {
            assert!((0..=1).contains(&v));
        }
    }

    #[test]
    fn test_tf_decode_respects_start_end_window() {
        let buffer = vec![0u8; 64];
        let mut dec = RangeDecoder::new(&buffer);
        let tf_res = tf_decode(&mut dec, 5, 10, false, 1, 64 * 8);
        for &v in tf_res[..5].iter().chain(tf_res[10..].iter()) {
            assert_eq!(v, 0);
        }
    }

    #[test]
    fn test_decode_dynalloc_is_non_negative_and_bounded() {
        let buffer = vec![0u8; 64];
        let mut dec = RangeDecoder::new(&buffer);
        let cap = init_caps(3, 2);
        let total_bits = 64 * 8 << BITRES;
        let offsets = decode_dynalloc(&mut dec, 0, NB_EBANDS, 3, 2, &cap, total_bits);
        for i in 0..NB_EBANDS {
            assert!(offsets[i] >= 0);
            // The loop's own exit check caps each offset within one quantum of
            // the band's cap (it re-checks `boost < cap[i]` before each bit).
            let width = (2 * (i32::from(EBAND5MS[i + 1]) - i32::from(EBAND5MS[i]))) << 3;
            let width = width.max(2 << 3);
            let quanta = (width << BITRES).min((2 << BITRES).max(width));
            assert!(offsets[i] <= cap[i] + quanta);
        }
    }

    #[test]
    fn test_new_decoder_starts_at_energy_floor() {
        let dec = CeltDecoder::new(SamplingRate::Hz48000, Channels::Stereo).unwrap();
        assert!(dec.old_e_bands.iter().all(|&e| e == INITIAL_LOG_E));
        assert_eq!(dec.start, 0);
        assert_eq!(dec.end, NB_EBANDS);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut dec = CeltDecoder::new(SamplingRate::Hz48000, Channels::Mono).unwrap();
        dec.old_e_bands[0] = 1234;
        dec.rng = 42;
        dec.reset().unwrap();
        assert_eq!(dec.old_e_bands[0], INITIAL_LOG_E);
        assert_eq!(dec.rng, 0);
    }
}
