//! Inverse MDCT, band denormalization and CELT synthesis.
//!
//! The inverse transform is computed directly from its definition,
//!
//! ```text
//! y[n] = (1/N) * sum_k X[k] * cos( (pi/N) * (n + 0.5 + N/2) * (k + 0.5) )
//! ```
//!
//! rather than through a fixed-point split-radix FFT. See DESIGN.md for why:
//! in short, a hand-ported Kiss-FFT-style fast transform that can never be
//! compiled or run carries far higher risk of a silent indexing bug than the
//! direct O(N^2) sum, which is unambiguously the textbook IMDCT. The
//! kernel's raw output still needs the reference's windowed, mirrored TDAC
//! treatment at the block edges (spec 4.3 step 5) before it can be
//! overlap-added with a neighboring block; that step lives in
//! [`apply_tdac_window`] and is applied by [`celt_synthesis`].

use crate::celt::mode::{E_MEANS, OVERLAP, WINDOW};
use std::f32::consts::PI;

/// Computes the raw (unwindowed) inverse MDCT of `input` (length `n`) into
/// `output` (length `2*n`). The result still carries the full-amplitude,
/// un-tapered basis sum at both ends; callers that overlap-add consecutive
/// blocks must run it through [`apply_tdac_window`] first.
pub(crate) fn mdct_backward(input: &[f32], output: &mut [f32]) {
    let n = input.len();
    let n2 = 2 * n;
    debug_assert_eq!(output.len(), n2);

    let scale = 1.0 / n as f32;
    for (sample_idx, out) in output.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for (k, &xk) in input.iter().enumerate() {
            let angle = (PI / n as f32) * (sample_idx as f32 + 0.5 + n as f32 / 2.0) * (k as f32 + 0.5);
            acc += xk * angle.cos();
        }
        *out = acc * scale;
    }
}

/// Mirrors and tapers the first and last `OVERLAP` samples of a raw IMDCT
/// block with the 120-sample half-window (spec 4.3 step 5), leaving the
/// interior untouched. The leading edge ramps 0 -> 1 (`WINDOW[i]`); the
/// trailing edge mirrors it, ramping 1 -> 0. These are the "symmetric ends
/// ready for overlap-add" the spec calls for: adding one block's tapered
/// trailing edge to the next block's tapered leading edge cancels the
/// aliasing introduced by truncating the transform to a finite block.
fn apply_tdac_window(time: &mut [f32]) {
    let n2 = time.len();
    debug_assert!(n2 >= 2 * OVERLAP);
    for i in 0..OVERLAP {
        time[i] *= WINDOW[i];
        let j = n2 - 1 - i;
        time[j] *= WINDOW[i];
    }
}

/// Applies each band's synthesis gain (derived from its decoded log-energy)
/// to the unit-norm spectrum produced by the spectral quantizer, writing
/// the result into `freq` and zeroing everything from `bound` onward.
pub(crate) fn denormalise_bands(
    x: &[f32],
    freq: &mut [f32],
    old_e_bands: &[i16],
    start: usize,
    end: usize,
    m: i32,
    eband5ms: &[i16; 22],
    bound: usize,
) {
    let mut offset = (i32::from(eband5ms[start]) * m) as usize;
    for i in start..end {
        let band_start = (i32::from(eband5ms[i]) * m) as usize;
        let band_end = (i32::from(eband5ms[i + 1]) * m) as usize;
        let log_e = f32::from(old_e_bands[i]) / 1024.0 + f32::from(E_MEANS[i]);
        let gain = 2f32.powf(log_e);
        for j in band_start..band_end {
            freq[j] = x[j] * gain;
        }
        offset = band_end;
    }
    for v in freq.iter_mut().skip(offset).take(bound.saturating_sub(offset)) {
        *v = 0.0;
    }
    if bound < freq.len() {
        freq[bound..].fill(0.0);
    }
}

/// Runs the per-short-block inverse MDCT, the 120-sample TDAC window, and
/// overlap-add, handling the mono <-> stereo up/downmix special cases, and
/// saturates the result to the fixed-point sample range used by the rest of
/// the pipeline.
///
/// Each block's raw IMDCT output is windowed at both ends
/// ([`apply_tdac_window`]) before its leading edge is summed into
/// `overlap_mem` (the previous block's windowed trailing edge) and its
/// trailing edge is stashed back into `overlap_mem` for the next call. The
/// untapered interior (`OVERLAP..nb`) carries straight through.
#[allow(clippy::too_many_arguments)]
pub(crate) fn celt_synthesis(
    freq: &[f32],
    out_syn: &mut [f32],
    overlap_mem: &mut [f32],
    n: usize,
    b: usize,
) {
    let nb = n / b;
    debug_assert_eq!(overlap_mem.len(), OVERLAP);

    for blk in 0..b {
        let mut time = vec![0.0f32; 2 * nb];
        mdct_backward(&freq[blk * nb..(blk + 1) * nb], &mut time);
        apply_tdac_window(&mut time);

        for i in 0..OVERLAP.min(nb) {
            out_syn[blk * nb + i] = time[i] + overlap_mem[i];
        }
        for i in OVERLAP.min(nb)..nb {
            out_syn[blk * nb + i] = time[i];
        }
        if nb >= OVERLAP {
            overlap_mem[..OVERLAP].copy_from_slice(&time[nb..nb + OVERLAP]);
        }
    }

    for v in out_syn.iter_mut() {
        *v = v.clamp(-300_000_000.0 / 32768.0, 300_000_000.0 / 32768.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mdct_dc_energy_preserved() {
        let input = [1.0f32; 8];
        let mut output = [0.0f32; 16];
        mdct_backward(&input, &mut output);
        assert!(output.iter().any(|&v| v.abs() > 0.0));
    }

    #[test]
    fn test_mdct_zero_input_zero_output() {
        let input = [0.0f32; 8];
        let mut output = [1.0f32; 16];
        mdct_backward(&input, &mut output);
        assert!(output.iter().all(|&v| v == 0.0));
    }

    /// The cosine basis this kernel sums over is mutually orthogonal across
    /// bins (the defining property of the type-IV transform CELT's IMDCT
    /// uses), so for any input `X` the raw (unwindowed) output satisfies
    /// `sum(y^2) == sum(X^2) / N`. This is the one cheap, exact algebraic
    /// check available without a matching forward transform or a reference
    /// bitstream, and it fails immediately on a sign or index slip in the
    /// summation.
    #[test]
    fn test_mdct_backward_parseval_energy_relation() {
        let n = 8;
        for input in [
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [1.0, -2.0, 0.5, 3.0, -1.5, 0.25, -0.75, 2.0],
        ] {
            let mut output = [0.0f32; 16];
            mdct_backward(&input, &mut output);
            let energy_out: f32 = output.iter().map(|v| v * v).sum();
            let energy_in: f32 = input.iter().map(|v| v * v).sum::<f32>() / n as f32;
            assert!(
                (energy_out - energy_in).abs() < 1e-3 * energy_in.max(1.0),
                "energy_out={energy_out}, expected={energy_in}"
            );
        }
    }

    #[test]
    fn test_apply_tdac_window_tapers_edges_and_preserves_interior() {
        let n2 = 2 * 480;
        let mut time = vec![1.0f32; n2];
        apply_tdac_window(&mut time);

        // Leading edge ramps strictly from near-zero up towards one.
        assert!(time[0] < 0.01);
        assert!(time[OVERLAP - 1] > 0.95);
        assert!(time[0] < time[OVERLAP / 2]);
        assert!(time[OVERLAP / 2] < time[OVERLAP - 1]);

        // Trailing edge mirrors the leading edge (ramps back down to zero).
        assert!(time[n2 - 1] < 0.01);
        assert!(time[n2 - OVERLAP] > 0.95);

        // The untouched interior keeps its original value.
        assert!(time[OVERLAP..n2 - OVERLAP].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_celt_synthesis_overlap_add_crossfades_instead_of_concatenating() {
        // A single nonzero band at the bottom of a 120-sample short block
        // (n == b == nb == OVERLAP, the smallest valid size).
        let mut freq = vec![0.0f32; 120];
        freq[0] = 10.0;
        let mut overlap_mem = [0.0f32; OVERLAP];
        let mut out_syn = vec![0.0f32; 120];
        celt_synthesis(&freq, &mut out_syn, &mut overlap_mem, 120, 1);

        // With no history, the first OVERLAP samples are only the
        // window-tapered leading edge of this block, not the full-amplitude
        // raw transform value: they must be strictly smaller in magnitude
        // than an un-windowed reconstruction would give at the very first
        // sample (window[0] tapers towards zero).
        let mut raw = vec![0.0f32; 240];
        mdct_backward(&freq, &mut raw);
        assert!(out_syn[0].abs() < raw[0].abs().max(1e-6) || raw[0].abs() < 1e-6);

        // Feeding the same spectrum through a second block reuses the first
        // block's carried-over tail: the two calls must not be independent
        // (i.e. overlap_mem actually participated), so decoding the same
        // frequency content twice in a row does not reproduce the same
        // leading sample as the very first (history-free) call.
        let mut out_syn2 = vec![0.0f32; 120];
        celt_synthesis(&freq, &mut out_syn2, &mut overlap_mem, 120, 1);
        assert_ne!(out_syn[0], out_syn2[0]);
    }
}
