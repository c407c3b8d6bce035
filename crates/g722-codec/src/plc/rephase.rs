//! Re-phasing and time-warping of the first good frame after an erasure.
//!
//! The extrapolated history continues `MAXOS + 24` samples past the frame
//! boundary; correlating it against the first good frame's decoded output
//! gives the phase offset the concealment accumulated. The decoder state is
//! replayed by that offset and the output is warped so the playout clock
//! survives.

use crate::basicop::*;
use crate::plc::state::PlcState;
use crate::plc::{FRSZ, LAG_NONE, LSW, MAXOS, MIN_UNSTBL, MLO, RSR, XQOFF};

/// Voicing gate for re-phasing: the pre-loss history must be periodic and
/// the first good frame must correlate with itself at one sample lag.
pub fn testrpc(st: &PlcState, tout: &[Word16]) -> bool {
    if st.merit <= 256 * MLO {
        return false;
    }
    let mut r0: Word32 = 1;
    let mut r1: Word32 = 0;
    for i in MIN_UNSTBL..tout.len() - 1 {
        let a = tout[i] >> 4;
        let b = tout[i + 1] >> 4;
        r0 = l_mac0(r0, a, a);
        r1 = l_mac0(r1, a, b);
    }
    // non-unvoiced: normalised lag-1 correlation above ~0.3
    if r1 <= 0 {
        return false;
    }
    let n = norm_l(r0);
    let den = extract_h(l_shl(r0, n)).max(1);
    let num = extract_h(l_shl(r1, n)).clamp(0, den);
    div_s(num, den) > 9830
}

/// Cross-correlation search of the extrapolated continuation against the
/// first good frame. Returns the offset in samples, or [`LAG_NONE`] when
/// the best alignment is too weak (correlation cosine below 0.3).
pub fn ppchange(st: &PlcState, tout: &[Word16]) -> i32 {
    debug_assert!(tout.len() >= LSW);
    let mut best_off = 0i32;
    let mut best_cor: Word32 = 0;
    let mut best_en: Word32 = 1;
    let mut found = false;

    for off in -(MAXOS as i32)..=(MAXOS as i32) {
        let mut cor: Word32 = 0;
        let mut en: Word32 = 1;
        for i in 0..LSW {
            let idx = XQOFF as i32 + i as i32 + off;
            let a = st.xq[idx as usize] >> 4;
            let b = tout[i] >> 4;
            cor = l_mac0(cor, a, b);
            en = l_mac0(en, a, a);
        }
        if cor > 0 && (!found || super::pitch::cmp_ratio(cor, en, best_cor, best_en)) {
            best_off = off;
            best_cor = cor;
            best_en = en;
            found = true;
        }
    }
    if !found {
        return LAG_NONE;
    }

    // correlation cosine gate: cor^2 > 0.09 * en_x * en_t
    let mut en_t: Word32 = 1;
    for &t in tout.iter().take(LSW) {
        en_t = l_mac0(en_t, t >> 4, t >> 4);
    }
    let nc = norm_l(best_cor.max(1));
    let cm = extract_h(l_shl(best_cor, nc));
    let ne = norm_l(best_en);
    let na = norm_l(en_t);
    let em = extract_h(l_shl(best_en, ne));
    let am = extract_h(l_shl(en_t, na));
    // mantissa comparison with exponent bookkeeping
    let lhs = l_mult0(mult(cm, cm), 1);
    let rhs = l_shr(l_mult0(mult(em, am), 2949), 15); // 0.09 in Q15
    let lexp = -2 * nc as i32;
    let rexp = -(ne as i32) - na as i32;
    let d = lexp - rexp;
    let pass = if d >= 0 {
        l_shr(rhs, d.min(31) as Word16) < lhs
    } else {
        rhs < l_shr(lhs, (-d).min(31) as Word16)
    };
    if pass {
        best_off
    } else {
        LAG_NONE
    }
}

/// Refine a coarse re-phasing lag within `+-RSR` samples over the
/// overlap-add window.
pub fn refine_lag(st: &PlcState, tout: &[Word16], lag: i32) -> i32 {
    let mut best = lag;
    let mut best_cor: Word32 = 0;
    let mut best_en: Word32 = 1;
    let mut found = false;
    for off in (lag - RSR as i32)..=(lag + RSR as i32) {
        if off.unsigned_abs() as usize > MAXOS {
            continue;
        }
        let mut cor: Word32 = 0;
        let mut en: Word32 = 1;
        for i in 0..LSW {
            let idx = XQOFF as i32 + i as i32 + off;
            let a = st.xq[idx as usize] >> 4;
            let b = tout[i] >> 4;
            cor = l_mac0(cor, a, b);
            en = l_mac0(en, a, a);
        }
        if cor > 0 && (!found || super::pitch::cmp_ratio(cor, en, best_cor, best_en)) {
            best = off;
            best_cor = cor;
            best_en = en;
            found = true;
        }
    }
    best
}

/// One-shot time warp: map `FRSZ + delta` input samples onto `FRSZ` output
/// samples by dropping (`delta > 0`) or repeating (`delta < 0`) single
/// samples at evenly spread splice points, cross-faded with short ramps.
///
/// The first [`MIN_UNSTBL`] input samples are assumed already discarded by
/// the caller (ADPCM adaptation transients).
pub fn resample(input: &[Word16], delta: i32, out: &mut [Word16]) {
    debug_assert!(out.len() >= FRSZ);
    debug_assert!(input.len() as i32 >= FRSZ as i32 + delta);
    if delta == 0 {
        out[..FRSZ].copy_from_slice(&input[..FRSZ]);
        return;
    }

    let n = delta.unsigned_abs() as usize;
    let spacing = FRSZ / (n + 1);
    let ola_len = spacing.saturating_sub(1).clamp(3, 8);

    let mut rd = 0usize; // input cursor
    let mut next_splice = spacing;
    let mut remaining = n;
    for (i, o) in out.iter_mut().take(FRSZ).enumerate() {
        if remaining > 0 && i == next_splice {
            if delta > 0 {
                rd += 1; // drop one input sample
            } else {
                rd -= 1; // repeat one input sample
            }
            remaining -= 1;
            next_splice += spacing;
        }
        let s = input[rd.min(input.len() - 1)];
        // cross-fade into the shifted stream after each splice
        let since = i as i32 - (next_splice as i32 - spacing as i32);
        if (0..ola_len as i32).contains(&since) && remaining != n {
            let w = (((since + 1) as Word32) << 15) / (ola_len as Word32 + 1);
            let alt_idx = if delta > 0 { rd.wrapping_sub(1) } else { rd + 1 };
            let alt = input[alt_idx.min(input.len() - 1)];
            *o = saturate((s as Word32 * w + alt as Word32 * (32768 - w)) >> 15);
        } else {
            *o = s;
        }
        rd += 1;
    }
}
