//! Wideband enhancement layer (low-band refinement bits).
//!
//! In the SWB modes the encoder may spend 1 or 2 extra bits per low-band
//! sample to subdivide the 6-bit quantisation cell. The refinement only
//! touches the decoded output; the predictor adaptation keeps running on the
//! core indices so refined and unrefined decoders share one trajectory.

use crate::basicop::*;
use crate::g722::adpcm::{adaptive_prediction, invqal, invqbl, logscl, quantl, scalel};
use crate::g722::state::SubBandState;

/// Enhancement depth for the low band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WbeMode {
    /// Core only, no refinement bits.
    Off,
    /// One refinement bit per sample (`mode_enh = 2`).
    OneBit,
    /// Two refinement bits per sample (`mode_enh = 3`).
    TwoBit,
}

impl WbeMode {
    /// Refinement bits spent per low-band sample.
    pub fn bits(self) -> u32 {
        match self {
            WbeMode::Off => 0,
            WbeMode::OneBit => 1,
            WbeMode::TwoBit => 2,
        }
    }
}

/// One-bit refinement offsets, Q15 relative to `detl`; half the minimum
/// spacing of the 6-bit reconstruction levels.
const WBE_Q1: [Word16; 2] = [-148, 148];

/// Two-bit refinement offsets, Q15 relative to `detl`.
const WBE_Q2: [Word16; 4] = [-222, -74, 74, 222];

/// Refinement correction for a decoded enhancement index.
pub fn wbe_correction(index: Word16, detl: Word16, mode: WbeMode) -> Word16 {
    let q = match mode {
        WbeMode::Off => return 0,
        WbeMode::OneBit => WBE_Q1[(index & 1) as usize],
        WbeMode::TwoBit => WBE_Q2[(index & 3) as usize],
    };
    ((detl as Word32 * q as Word32) >> 15) as Word16
}

/// Pick the enhancement index minimising the refined residual.
pub fn wbe_quantise(residual: Word16, detl: Word16, mode: WbeMode) -> Word16 {
    match mode {
        WbeMode::Off => 0,
        WbeMode::OneBit => {
            if residual < 0 {
                0
            } else {
                1
            }
        }
        WbeMode::TwoBit => {
            let mut best = 0;
            let mut best_err = Word32::MAX;
            for (i, _) in WBE_Q2.iter().enumerate() {
                let c = wbe_correction(i as Word16, detl, mode);
                let e = l_abs(l_deposit_l(sub(residual, c)));
                if e < best_err {
                    best_err = e;
                    best = i as Word16;
                }
            }
            best
        }
    }
}

/// Two-stage index shaping for the 64-kbit/s encoder.
///
/// The candidate indices one step up/down inside the same 5-bit (stage one)
/// and 4-bit (stage two) cells are scored against a blend of the 64-k and
/// truncated-rate reconstruction errors, so chopping the frame tail to
/// 56/48 kbit/s stays close to a native lower-rate encode.
pub fn shape_index(el: Word16, il: Word16, detl: Word16) -> Word16 {
    let mut best = il;
    let mut best_cost = shaping_cost(el, il, detl);
    for cand in [sub(il, 1), add(il, 1)] {
        if !(0..64).contains(&cand) {
            continue;
        }
        // stage one keeps the 5-bit field, stage two the 4-bit field
        if cand >> 1 != il >> 1 || cand >> 2 != il >> 2 {
            continue;
        }
        let cost = shaping_cost(el, cand, detl);
        if cost < best_cost {
            best_cost = cost;
            best = cand;
        }
    }
    best
}

fn shaping_cost(el: Word16, il: Word16, detl: Word16) -> Word32 {
    let e64 = l_abs(l_deposit_l(sub(el, invqbl(il, detl, 1))));
    let e56 = l_abs(l_deposit_l(sub(el, invqbl(il, detl, 2))));
    let e48 = l_abs(l_deposit_l(sub(el, invqbl(il, detl, 3))));
    // 64-k error dominates; the truncations act as tie-breakers
    l_add(l_add(l_shl(e64, 2), e56), e48)
}

/// Low sub-band encoder step with enhancement: returns `(il, enh_index)`.
pub fn lsb_encode_enh(xl: Word16, st: &mut SubBandState, mode: WbeMode) -> (Word16, Word16) {
    let el = sub(xl, st.s);
    let il = shape_index(el, quantl(el, st.det), st.det);

    let enh = if mode == WbeMode::Off {
        0
    } else {
        let residual = sub(el, invqbl(il, st.det, 1));
        wbe_quantise(residual, st.det, mode)
    };

    let dlt = invqal(il, st.det);
    st.nb = logscl(il, st.nb);
    st.det = scalel(st.nb);
    adaptive_prediction(st, dlt, None);

    (il, enh)
}

/// Low sub-band decoder step with enhancement correction on the output.
pub fn lsb_decode_enh(
    ilr: Word16,
    enh: Word16,
    wbe: WbeMode,
    st: &mut SubBandState,
) -> Word16 {
    let det = st.det;
    let dl = add(invqbl(ilr, det, 1), wbe_correction(enh, det, wbe));
    let rl = add(st.s, dl);

    let dlt = invqal(ilr, det);
    st.nb = logscl(ilr, st.nb);
    st.det = scalel(st.nb);
    adaptive_prediction(st, dlt, None);

    rl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction_symmetry() {
        for det in [32, 512, 4096] {
            assert_eq!(
                wbe_correction(0, det, WbeMode::OneBit),
                negate(wbe_correction(1, det, WbeMode::OneBit))
            );
            assert_eq!(
                wbe_correction(0, det, WbeMode::TwoBit),
                negate(wbe_correction(3, det, WbeMode::TwoBit))
            );
        }
        assert_eq!(wbe_correction(1, 4096, WbeMode::Off), 0);
    }

    #[test]
    fn test_refinement_reduces_residual() {
        for det in [512, 2048, 8192] {
            for residual in [-900i16, -60, 45, 700] {
                for mode in [WbeMode::OneBit, WbeMode::TwoBit] {
                    let idx = wbe_quantise(residual, det, mode);
                    let corrected = sub(residual, wbe_correction(idx, det, mode));
                    assert!(
                        corrected.abs() <= residual.abs().max(1),
                        "refinement must not grow the residual: det={} r={} mode={:?}",
                        det,
                        residual,
                        mode
                    );
                }
            }
        }
    }

    #[test]
    fn test_shaping_keeps_truncation_fields() {
        for det in [32, 1000] {
            for el in [-5000i16, -100, 0, 99, 4999] {
                let il = quantl(el, det);
                let shaped = shape_index(el, il, det);
                assert_eq!(shaped >> 2, il >> 2, "4-bit field must survive shaping");
            }
        }
    }

    #[test]
    fn test_enh_encode_matches_core_adaptation() {
        use crate::g722::adpcm::lsb_encode;
        use crate::g722::state::SubBandState;
        let mut plain = SubBandState::new_low();
        let mut enh = SubBandState::new_low();
        for n in 0..200i32 {
            let x = ((n * 91) % 3001 - 1500) as Word16;
            let il_a = lsb_encode(x, &mut plain);
            let (il_b, _) = lsb_encode_enh(x, &mut enh, WbeMode::OneBit);
            // shaping may move il inside the 4-bit cell but adaptation input
            // (the 4-bit truncation) must agree
            assert_eq!(il_a >> 2, il_b >> 2, "sample {}", n);
            assert_eq!(plain.nb, enh.nb);
        }
    }
}
