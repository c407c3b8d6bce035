//! Temporal envelope analysis and the log-domain helpers shared by the
//! envelope coders.
//!
//! The 5-ms high-band frame is split into four 1.25-ms segments; their mean
//! magnitudes, in Q10 log2, drive transient detection, the temporal-envelope
//! indices and the decoder-side envelope shaping.

use crate::basicop::{norm_l, sub, Word16, Word32};

/// Temporal envelope segments per frame.
pub const SWB_TENV: usize = 4;
/// Samples per temporal-envelope segment.
pub const TENV_SEG: usize = 20;

/// Transient decision threshold: 3.0 in Q10 log2 (18 dB).
const TRANSI_THRESH: Word16 = 3072;

/// log2 of a positive 32-bit value in Q10.
///
/// Linear interpolation on the normalised mantissa; paired with
/// [`exp2_q10`], which applies the same linearisation in reverse, the two
/// are mutual inverses up to one Q10 step.
pub fn log2_q10(x: Word32) -> Word16 {
    if x <= 0 {
        return 0;
    }
    let norm = norm_l(x);
    let e = 30 - norm as i32; // floor(log2 x)
    // mantissa in [1024, 2047], i.e. 1.0..2.0 in Q10
    let m = ((x << norm) >> 20) & 0x7ff;
    let frac = (m - 1024).max(0);
    ((e << 10) + frac) as Word16
}

/// Inverse of [`log2_q10`].
pub fn exp2_q10(v: Word16) -> Word32 {
    if v < 0 {
        return 0;
    }
    let e = (v >> 10) as i32;
    let m = 1024 + (v & 1023) as Word32;
    if e >= 10 {
        let sh = e - 10;
        if sh >= 21 {
            return Word32::MAX;
        }
        m << sh
    } else {
        m >> (10 - e)
    }
}

/// Result of temporal-envelope analysis.
#[derive(Debug, Clone, Copy)]
pub struct TenvAnalysis {
    /// Per-segment mean-magnitude envelope, Q10 log2.
    pub env: [Word16; SWB_TENV],
    /// Transient flag.
    pub transi: bool,
    /// Segment index holding the energy peak.
    pub t_pos: usize,
    /// Set when the transient sits in the second half of the frame; the
    /// decoder then shifts its envelope shaping one segment later.
    pub t_modify: bool,
}

/// Compute the temporal envelope of one high-band frame.
///
/// `prev_last_env` is the last segment envelope of the previous frame, so a
/// sharp rise across the frame boundary also trips the transient flag.
pub fn calc_tenv(hb: &[Word16], prev_last_env: Word16) -> TenvAnalysis {
    debug_assert_eq!(hb.len(), SWB_TENV * TENV_SEG);
    let mut env = [0i16; SWB_TENV];
    for (t, seg) in hb.chunks_exact(TENV_SEG).enumerate() {
        let mut sum: Word32 = 0;
        for &s in seg {
            sum += (s as Word32).abs();
        }
        env[t] = log2_q10(sum.max(1));
    }

    let mut t_pos = 0;
    let mut emax = env[0];
    let mut emin = env[0];
    for (t, &e) in env.iter().enumerate() {
        if e > emax {
            emax = e;
            t_pos = t;
        }
        if e < emin {
            emin = e;
        }
    }

    let transi =
        sub(emax, emin) > TRANSI_THRESH || sub(emax, prev_last_env) > TRANSI_THRESH;
    TenvAnalysis {
        env,
        transi,
        t_pos,
        t_modify: transi && t_pos >= 2,
    }
}
