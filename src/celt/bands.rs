//! Fixed 21-band bit allocation.
//!
//! Distributes a packet's bit budget across bands by bisecting over a
//! table of precomputed allocation vectors, then refines the result with a
//! second bisection plus a backwards skip pass that is itself signalled
//! through the range coder (so the allocation computation and the
//! bitstream reads are interleaved, not a pure function of the budget).

use crate::celt::mode::{
    BAND_ALLOCATION, CACHE_CAPS50, EBAND5MS, LOG2_FRAC_TABLE, LOG_N400, NB_ALLOC_VECTORS,
    NB_EBANDS,
};
use crate::range_coder::RangeDecoder;

const BITRES: i32 = 3;
const ALLOC_STEPS: i32 = 6;
const MAX_FINE_BITS: i32 = 8;

/// Caps the number of PVQ bits any band may receive, given frame size `lm`
/// and channel count `c`.
pub(crate) fn init_caps(lm: i32, c: i32) -> [i32; NB_EBANDS] {
    let mut cap = [0i32; NB_EBANDS];
    for i in 0..NB_EBANDS {
        let n = i32::from(EBAND5MS[i + 1] - EBAND5MS[i]) << lm;
        let row = NB_EBANDS * (2 * lm as usize + c as usize - 1) + i;
        cap[i] = (i32::from(CACHE_CAPS50[row]) + 64) * c * n >> 2;
    }
    cap
}

/// Output of [`compute_allocation`]: per-band bits, fine-energy quanta and
/// fine-energy priority, plus the decoded intensity / dual-stereo flags.
pub(crate) struct Allocation {
    pub(crate) pulses: [i32; NB_EBANDS],
    pub(crate) fine_quant: [i32; NB_EBANDS],
    pub(crate) fine_priority: [i32; NB_EBANDS],
    pub(crate) intensity: i32,
    pub(crate) dual_stereo: i32,
    pub(crate) balance: i32,
    pub(crate) coded_bands: i32,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_allocation(
    dec: &mut RangeDecoder,
    offsets: &[i32; NB_EBANDS],
    cap: &[i32; NB_EBANDS],
    alloc_trim: i32,
    total: i32,
    c: i32,
    lm: i32,
    end: usize,
) -> Allocation {
    let total = total.max(0);
    let len = NB_EBANDS as i32;

    let mut total = total;
    let skip_rsv = if total >= (1 << BITRES) { 1 << BITRES } else { 0 };
    total -= skip_rsv;

    let mut intensity_rsv = 0i32;
    let mut dual_stereo_rsv = 0i32;
    if c == 2 {
        intensity_rsv = i32::from(LOG2_FRAC_TABLE[end]);
        if intensity_rsv > total {
            intensity_rsv = 0;
        } else {
            total -= intensity_rsv;
            dual_stereo_rsv = if total >= (1 << BITRES) { 1 << BITRES } else { 0 };
            total -= dual_stereo_rsv;
        }
    }

    let mut thresh = [0i32; NB_EBANDS];
    let mut trim_offset = [0i32; NB_EBANDS];
    for j in 0..end {
        let width = i32::from(EBAND5MS[j + 1] - EBAND5MS[j]);
        thresh[j] = (c << BITRES).max((3 * width << lm << BITRES) >> 4);
        trim_offset[j] = c * width * (alloc_trim - 5 - lm) * (end as i32 - j as i32 - 1)
            * (1 << (lm + BITRES))
            >> 6;
        if (width << lm) == 1 {
            trim_offset[j] -= c << BITRES;
        }
    }

    let mut lo = 1i32;
    let mut hi = NB_ALLOC_VECTORS as i32 - 1;
    loop {
        let mid = (lo + hi) >> 1;
        let mut psum = 0i32;
        let mut done = false;
        for j in (0..end).rev() {
            let n = i32::from(EBAND5MS[j + 1] - EBAND5MS[j]);
            let mut bitsj = c * n * i32::from(BAND_ALLOCATION[mid as usize * len as usize + j]) << lm >> 2;
            if bitsj > 0 {
                bitsj = (bitsj + trim_offset[j]).max(0);
            }
            bitsj += offsets[j];
            if bitsj >= thresh[j] || done {
                done = true;
                psum += bitsj.min(cap[j]);
            } else if bitsj >= (c << BITRES) {
                psum += c << BITRES;
            }
        }
        if psum > total {
            hi = mid - 1;
        } else {
            lo = mid + 1;
        }
        if lo > hi {
            break;
        }
    }
    hi = lo;
    lo -= 1;

    let mut bits1 = [0i32; NB_EBANDS];
    let mut bits2 = [0i32; NB_EBANDS];
    let mut skip_start = 0i32;
    for j in 0..end {
        let n = i32::from(EBAND5MS[j + 1] - EBAND5MS[j]);
        let mut bits1j = c * n * i32::from(BAND_ALLOCATION[lo as usize * len as usize + j]) << lm >> 2;
        let mut bits2j = if hi >= NB_ALLOC_VECTORS as i32 {
            cap[j]
        } else {
            c * n * i32::from(BAND_ALLOCATION[hi as usize * len as usize + j]) << lm >> 2
        };
        if bits1j > 0 {
            bits1j = (bits1j + trim_offset[j]).max(0);
        }
        if bits2j > 0 {
            bits2j = (bits2j + trim_offset[j]).max(0);
        }
        if lo > 0 {
            bits1j += offsets[j];
        }
        bits2j += offsets[j];
        if offsets[j] > 0 {
            skip_start = j as i32;
        }
        bits2j = (bits2j - bits1j).max(0);
        bits1[j] = bits1j;
        bits2[j] = bits2j;
    }

    interp_bits2pulses(
        dec,
        end,
        skip_start,
        &bits1,
        &bits2,
        &thresh,
        cap,
        total,
        skip_rsv,
        intensity_rsv,
        dual_stereo_rsv,
        c,
        lm,
    )
}

#[allow(clippy::too_many_arguments)]
fn interp_bits2pulses(
    dec: &mut RangeDecoder,
    end: usize,
    skip_start: i32,
    bits1: &[i32; NB_EBANDS],
    bits2: &[i32; NB_EBANDS],
    thresh: &[i32; NB_EBANDS],
    cap: &[i32; NB_EBANDS],
    total: i32,
    skip_rsv: i32,
    mut intensity_rsv: i32,
    dual_stereo_rsv: i32,
    c: i32,
    lm: i32,
) -> Allocation {
    let alloc_floor = c << BITRES;
    let stereo = i32::from(c > 1);

    let mut lo = 0i32;
    let mut hi = 1 << ALLOC_STEPS;
    for _ in 0..ALLOC_STEPS {
        let mid = (lo + hi) >> 1;
        let mut psum = 0i32;
        let mut done = false;
        for j in (0..end).rev() {
            let tmp = bits1[j] + ((mid * bits2[j]) >> ALLOC_STEPS);
            if tmp >= thresh[j] || done {
                done = true;
                psum += tmp.min(cap[j]);
            } else if tmp >= alloc_floor {
                psum += alloc_floor;
            }
        }
        if psum > total {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    let mut bits = [0i32; NB_EBANDS];
    let mut psum = 0i32;
    let mut done = false;
    for j in (0..end).rev() {
        let mut tmp = bits1[j] + ((lo * bits2[j]) >> ALLOC_STEPS);
        if tmp < thresh[j] && !done {
            tmp = if tmp >= alloc_floor { alloc_floor } else { 0 };
        } else {
            done = true;
        }
        tmp = tmp.min(cap[j]);
        bits[j] = tmp;
        psum += tmp;
    }

    let mut total = total;
    let mut coded_bands = end as i32;
    loop {
        let j = coded_bands as usize - 1;
        if j as i32 <= skip_start {
            total += skip_rsv;
            break;
        }
        let left = total - psum;
        let band_total = i32::from(EBAND5MS[coded_bands as usize]) - i32::from(EBAND5MS[0]);
        let percoeff = left / band_total;
        let left = left - band_total * percoeff;
        let rem = (left - (i32::from(EBAND5MS[j]) - i32::from(EBAND5MS[0]))).max(0);
        let band_width = i32::from(EBAND5MS[coded_bands as usize]) - i32::from(EBAND5MS[j]);
        let mut band_bits = bits[j] + percoeff * band_width + rem;

        if band_bits >= thresh[j].max(alloc_floor + (1 << BITRES)) {
            if dec.decode_bit_logp(1) {
                break;
            }
            psum += 1 << BITRES;
            band_bits -= 1 << BITRES;
        }

        psum -= bits[j] + intensity_rsv;
        if intensity_rsv > 0 {
            intensity_rsv = i32::from(LOG2_FRAC_TABLE[j]);
        }
        psum += intensity_rsv;
        if band_bits >= alloc_floor {
            psum += alloc_floor;
            bits[j] = alloc_floor;
        } else {
            bits[j] = 0;
        }
        coded_bands -= 1;
    }

    let intensity = if intensity_rsv > 0 {
        dec.decode_uint((coded_bands + 1) as u32) as i32
    } else {
        0
    };
    let mut total = total;
    let mut dual_stereo_rsv = dual_stereo_rsv;
    if intensity <= 0 {
        total += dual_stereo_rsv;
        dual_stereo_rsv = 0;
    }
    let dual_stereo = if dual_stereo_rsv > 0 {
        i32::from(dec.decode_bit_logp(1))
    } else {
        0
    };

    let mut left = total - psum;
    let band_total = i32::from(EBAND5MS[coded_bands as usize]) - i32::from(EBAND5MS[0]);
    let percoeff = left / band_total;
    left -= band_total * percoeff;
    for j in 0..coded_bands as usize {
        bits[j] += percoeff * i32::from(EBAND5MS[j + 1] - EBAND5MS[j]);
    }
    for j in 0..coded_bands as usize {
        let tmp = left.min(i32::from(EBAND5MS[j + 1] - EBAND5MS[j]));
        bits[j] += tmp;
        left -= tmp;
    }

    let mut ebits = [0i32; NB_EBANDS];
    let mut fine_priority = [0i32; NB_EBANDS];
    let mut balance = 0i32;
    for j in 0..coded_bands as usize {
        let n0 = i32::from(EBAND5MS[j + 1] - EBAND5MS[j]);
        let n = n0 << lm;
        let bit = bits[j] + balance;
        let mut excess = 0i32;

        if n > 1 {
            excess = (bit - cap[j]).max(0);
            bits[j] = bit - excess;

            let den = c * n
                + if c == 2 && n > 2 && dual_stereo == 0 && (j as i32) < intensity {
                    1
                } else {
                    0
                };
            let nclogn = den * (i32::from(LOG_N400[j]) + (lm << BITRES));
            let mut offset = (nclogn >> 1) - den * 21;
            if n == 2 {
                offset += (den << BITRES) >> 2;
            }
            if bits[j] + offset < den * 2 << BITRES {
                offset += nclogn >> 2;
            } else if bits[j] + offset < den * 3 << BITRES {
                offset += nclogn >> 3;
            }

            let mut eb = (bits[j] + offset + (den << (BITRES - 1))).max(0);
            eb = (eb / den) >> BITRES;
            if c * eb > (bits[j] >> BITRES) {
                eb = (bits[j] >> stereo) >> BITRES;
            }
            eb = eb.min(MAX_FINE_BITS);
            fine_priority[j] = i32::from(eb * (den << BITRES) >= bits[j] + offset);
            bits[j] -= (c * eb) << BITRES;
            ebits[j] = eb;
        } else {
            excess = (bit - (c << BITRES)).max(0);
            bits[j] = bit - excess;
            ebits[j] = 0;
            fine_priority[j] = 1;
        }

        if excess > 0 {
            let extra_fine = (excess >> (stereo + BITRES)).min(MAX_FINE_BITS - ebits[j]);
            ebits[j] += extra_fine;
            let extra_bits = (extra_fine * c) << BITRES;
            fine_priority[j] = i32::from(extra_bits >= excess - balance);
            excess -= extra_bits;
        }
        balance = excess;
    }

    for j in coded_bands as usize..end {
        ebits[j] = (bits[j] >> stereo) >> BITRES;
        bits[j] = 0;
        fine_priority[j] = i32::from(ebits[j] < 1);
    }

    let mut pulses = [0i32; NB_EBANDS];
    pulses[..end].copy_from_slice(&bits[..end]);

    Allocation {
        pulses,
        fine_quant: ebits,
        fine_priority,
        intensity,
        dual_stereo,
        balance,
        coded_bands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_coder::RangeDecoder;

    #[test]
    fn test_init_caps_monotonic_with_lm() {
        let caps_lm0 = init_caps(0, 2);
        let caps_lm3 = init_caps(3, 2);
        for i in 0..NB_EBANDS {
            assert!(caps_lm3[i] >= caps_lm0[i]);
            assert!(caps_lm0[i] >= 0);
        }
    }

    #[test]
    fn test_init_caps_stereo_at_least_mono() {
        let mono = init_caps(2, 1);
        let stereo = init_caps(2, 2);
        for i in 0..NB_EBANDS {
            assert!(stereo[i] >= mono[i]);
        }
    }

    #[test]
    fn test_compute_allocation_fits_budget_and_is_stable() {
        // An all-zero payload still decodes (the range coder returns a
        // deterministic, if arbitrary, sequence of skip/intensity/dual-stereo
        // bits); this exercises the full bisection + backwards-skip pass
        // without needing a real encoded packet.
        let buffer = vec![0u8; 256];
        let offsets = [0i32; NB_EBANDS];
        let lm = 3;
        let c = 2;
        let end = NB_EBANDS;
        let cap = init_caps(lm, c);
        let total_bits = 800 << BITRES;

        let mut dec = RangeDecoder::new(&buffer);
        let alloc = compute_allocation(&mut dec, &offsets, &cap, 5, total_bits, c, lm, end);

        assert!(alloc.coded_bands >= 0 && alloc.coded_bands <= end as i32);
        for j in 0..NB_EBANDS {
            assert!(alloc.pulses[j] >= 0);
            assert!(alloc.pulses[j] <= cap[j]);
            assert!(alloc.fine_quant[j] >= 0);
        }
        assert!(alloc.intensity >= 0 && alloc.intensity <= alloc.coded_bands + 1);
    }

    #[test]
    fn test_compute_allocation_mono_has_no_stereo_reserve() {
        let buffer = vec![0u8; 256];
        let offsets = [0i32; NB_EBANDS];
        let lm = 2;
        let c = 1;
        let end = NB_EBANDS;
        let cap = init_caps(lm, c);

        let mut dec = RangeDecoder::new(&buffer);
        let alloc = compute_allocation(&mut dec, &offsets, &cap, 5, 600 << BITRES, c, lm, end);

        assert_eq!(alloc.intensity, 0);
        assert_eq!(alloc.dual_stereo, 0);
    }
}
