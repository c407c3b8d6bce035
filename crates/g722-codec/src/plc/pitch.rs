//! Pitch extraction for the PLC: 8:1 decimated coarse search plus full-rate
//! refinement.
//!
//! The coarse stage works on the decimated weighted speech (`xwd`), picking
//! correlation peaks with cross-multiplied `cor^2 / energy` comparisons so
//! no division is needed, then applying the multiple-pitch and last-pitch
//! checks. The refinement stage searches the undecimated history around the
//! coarse lag and derives the pitch tap.

use crate::basicop::*;
use crate::plc::lpc::DEC_FIR;
use crate::plc::state::PlcState;
use crate::plc::{
    DECF, DFM_LEN, FRSZ, FRSZD, LXQ, M1, M2, MAXPP, MINPP, WSZD, XWD_LEN,
};

/// Peaks examined by the coarse search.
pub const MAX_NPEAKS: usize = 7;

/// Multiple-pitch thresholds, Q15 fractions of the global maximum.
const MPTH: [Word16; 4] = [24576, 26214, 27853, 29491];
/// Threshold applied to multiples beyond the table.
const MPTH4: Word16 = 29491;
/// Last-pitch bias: candidate must reach this fraction of the maximum.
const LPTH1: Word16 = 25559;
/// Last-pitch bias on the energy-normalised measure.
const LPTH2: Word16 = 14746;
/// Longest lag whose multiples are checked.
const MPLTH: usize = M2 - 1;

/// Filter the weighted frame, decimate 8:1 and append to the `xwd` ring,
/// renormalising the ring when the new samples need more headroom.
pub fn decimate_weighted(st: &mut PlcState, xw: &[Word16]) {
    debug_assert_eq!(xw.len(), FRSZ);
    let mut fresh = [0i16; FRSZD];
    for (d, out) in fresh.iter_mut().enumerate() {
        // FIR over the last DFM_LEN inputs ending at sample 8d+7
        let end = d * DECF + DECF - 1;
        let mut acc: Word32 = 0;
        for (t, &tap) in DEC_FIR.iter().enumerate() {
            let idx = end as i32 - t as i32;
            let s = if idx >= 0 {
                xw[idx as usize]
            } else {
                st.dfm[(DFM_LEN as i32 + idx) as usize % DFM_LEN]
            };
            acc = l_mac(acc, s, tap);
        }
        *out = round(acc);
    }
    // filter memory: the last DFM_LEN input samples, newest last
    let keep = DFM_LEN.min(FRSZ);
    st.dfm.copy_within(keep.., 0);
    st.dfm[DFM_LEN - keep..].copy_from_slice(&xw[FRSZ - keep..]);

    // headroom: the correlation window accumulates 15 products
    let mut shift = 0;
    while fresh.iter().any(|&v| (v >> shift).abs() >= 8192) {
        shift += 1;
    }
    if shift > 0 {
        for v in st.xwd.iter_mut() {
            *v >>= shift;
        }
        st.xwd_exp += shift as Word16;
        for v in fresh.iter_mut() {
            *v >>= shift;
        }
    }

    st.xwd.copy_within(FRSZD.., 0);
    st.xwd[XWD_LEN - FRSZD..].copy_from_slice(&fresh);
}

/// One correlation/energy pair at decimated lag `n`.
fn cor_en(xwd: &[Word16; XWD_LEN], n: usize) -> (Word32, Word32) {
    let base = XWD_LEN - WSZD;
    let mut cor: Word32 = 0;
    let mut en: Word32 = 1;
    for i in 0..WSZD {
        cor = l_mac0(cor, xwd[base + i], xwd[base + i - n]);
        en = l_mac0(en, xwd[base + i - n], xwd[base + i - n]);
    }
    (cor, en)
}

/// Compare `cor_a^2/en_a > cor_b^2/en_b` by cross multiplication with
/// mantissa/exponent normalisation.
pub(crate) fn cmp_ratio(cor_a: Word32, en_a: Word32, cor_b: Word32, en_b: Word32) -> bool {
    let na = norm_l(l_abs(cor_a).max(1));
    let nb = norm_l(l_abs(cor_b).max(1));
    let ca = extract_h(l_shl(cor_a, na));
    let cb = extract_h(l_shl(cor_b, nb));
    let lhs_m = l_mult0(mult(ca, ca), 1);
    let rhs_m = l_mult0(mult(cb, cb), 1);
    // lhs = ca^2 * 2^-2na / ena  vs  rhs = cb^2 * 2^-2nb / enb
    // cross-multiply: ca^2 * enb * 2^-2na  >  cb^2 * ena * 2^-2nb
    let ea = norm_l(en_a.max(1));
    let eb = norm_l(en_b.max(1));
    let ma = extract_h(l_shl(en_a.max(1), ea));
    let mb = extract_h(l_shl(en_b.max(1), eb));
    let lhs = l_mult0(extract_h(l_shl(lhs_m, 15)), mb);
    let rhs = l_mult0(extract_h(l_shl(rhs_m, 15)), ma);
    // exponent bookkeeping for each side
    let lexp = -2 * na as i32 - eb as i32;
    let rexp = -2 * nb as i32 - ea as i32;
    let d = lexp - rexp;
    if d >= 0 {
        l_shr(rhs, d.min(31) as Word16) < lhs
    } else {
        rhs < l_shr(lhs, (-d).min(31) as Word16)
    }
}

/// Coarse pitch on the decimated weighted speech.
///
/// `cpplast` is the previous coarse pitch (decimated lag); a nearby peak of
/// comparable strength is preferred, and a short lag whose multiples all
/// show peaks wins over the raw maximum.
pub fn coarse_pitch(st: &PlcState, cpplast: Word16) -> Word16 {
    let mut cor = [0i32; M2];
    let mut en = [0i32; M2];
    for n in M1..M2 {
        let (c, e) = cor_en(&st.xwd, n);
        cor[n] = c;
        en[n] = e;
    }

    // positive peak picking; if none, the signal is inverted-periodic
    let mut peaks = [0usize; MAX_NPEAKS];
    let mut npeaks = pick_peaks(&cor, &mut peaks, false);
    if npeaks == 0 {
        npeaks = pick_peaks(&cor, &mut peaks, true);
    }
    if npeaks == 0 {
        return cpplast.clamp(M1 as Word16, (M2 - 1) as Word16);
    }

    // global best by cor^2/en
    let mut best = peaks[0];
    for &p in peaks.iter().take(npeaks).skip(1) {
        if cmp_ratio(cor[p], en[p], cor[best], en[best]) {
            best = p;
        }
    }

    // multiple-pitch check: shortest lag whose multiples all carry peaks
    for &cand in peaks.iter().take(npeaks) {
        if cand >= best {
            continue;
        }
        let nmult = (MPLTH / cand).min(4).max(2);
        let mut all_pass = true;
        for m in 2..=nmult {
            let centre = cand * m;
            if centre >= M2 {
                break;
            }
            let th = if m - 2 < MPTH.len() {
                MPTH[m - 2]
            } else {
                MPTH4
            };
            if !peak_near(&cor, peaks.iter().take(npeaks), centre, 2)
                || !passes_fraction(cor[centre.min(M2 - 1)], cor[best], th)
            {
                all_pass = false;
                break;
            }
        }
        if all_pass {
            best = cand;
            break;
        }
    }

    // last-pitch bias
    let last = cpplast as usize;
    if (M1..M2).contains(&last) {
        let tol = (last / 4).max(1);
        for &p in peaks.iter().take(npeaks) {
            if p.abs_diff(last) <= tol
                && p != best
                && passes_fraction(cor[p], cor[best], LPTH1)
                && passes_fraction(en[best], en[p].max(1), LPTH2)
            {
                best = p;
                break;
            }
        }
    }

    best as Word16
}

fn pick_peaks(cor: &[Word32; M2], peaks: &mut [usize; MAX_NPEAKS], flip: bool) -> usize {
    let sign = |v: Word32| if flip { l_negate(v) } else { v };
    let mut n = 0;
    for i in (M1 + 1)..(M2 - 1) {
        let c = sign(cor[i]);
        if c > 0 && c > sign(cor[i - 1]) && c >= sign(cor[i + 1]) {
            peaks[n] = i;
            n += 1;
            if n == MAX_NPEAKS {
                break;
            }
        }
    }
    n
}

fn peak_near<'a>(
    _cor: &[Word32; M2],
    peaks: impl Iterator<Item = &'a usize>,
    centre: usize,
    tol: usize,
) -> bool {
    for &p in peaks {
        if p.abs_diff(centre) <= tol {
            return true;
        }
    }
    false
}

/// `value >= (frac * reference) >> 15` with 32-bit intermediates.
fn passes_fraction(value: Word32, reference: Word32, frac: Word16) -> bool {
    let n = norm_l(reference.max(1));
    let m = extract_h(l_shl(reference.max(1), n)); // reference mantissa
    let scaled = l_shr(l_mult0(m, frac), 15);
    let v = l_shr(l_shl(value.max(0), n), 16);
    v >= scaled
}

/// Full-rate refinement around the coarse pitch: returns the integer lag and
/// the Q14 pitch tap clipped to +-1.
pub fn refine_pitch(st: &PlcState, cpp: Word16) -> (Word16, Word16) {
    let centre = (cpp as usize) * DECF;
    let lo = centre.saturating_sub(DECF).max(MINPP);
    let hi = (centre + DECF).min(MAXPP);

    // search window: the newest 120 samples of the history, with headroom
    const WSZ: usize = 120;
    let end = LXQ;
    let mut best_lag = lo;
    let mut best_cor: Word32 = 0;
    let mut best_en: Word32 = 1;
    let mut found = false;
    for lag in lo..=hi {
        let mut cor: Word32 = 0;
        let mut en: Word32 = 1;
        for i in 0..WSZ {
            let a = st.xq[end - WSZ + i] >> 4;
            let b = st.xq[end - WSZ + i - lag] >> 4;
            cor = l_mac0(cor, a, b);
            en = l_mac0(en, b, b);
        }
        if cor > 0 && (!found || cmp_ratio(cor, en, best_cor, best_en)) {
            best_lag = lag;
            best_cor = cor;
            best_en = en;
            found = true;
        }
    }

    // ptfe = cor/en in Q14, clipped to [-1, 1]
    let ptfe = if !found || best_cor <= 0 {
        0
    } else if best_cor >= best_en {
        16384
    } else {
        let n = norm_l(best_en);
        let den = extract_h(l_shl(best_en, n));
        let num = extract_h(l_shl(best_cor, n));
        shr(div_s(num.max(0), den.max(1)), 1)
    };
    (best_lag as Word16, ptfe)
}
