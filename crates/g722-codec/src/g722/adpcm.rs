//! Sub-band ADPCM encoder/decoder kernels.
//!
//! Low band: 6-bit log quantiser with mode-aware inverse quantisation
//! (64/56/48-kbit/s tables). High band: 2-bit quantiser. Both share the same
//! pole/zero predictor adaptation, factored into [`adaptive_prediction`] so
//! the packet-loss re-convergence path can drive it with a high-pass-filtered
//! parrec sample.

use crate::basicop::*;
use crate::g722::state::SubBandState;
use crate::g722::tables::*;

/// 6-bit low-band quantisation of the prediction error `el`.
pub fn quantl(el: Word16, detl: Word16) -> Word16 {
    let wd = abs_s(el);
    let mut i = 1usize;
    while i < 30 {
        let wd1 = ((Q6[i] as Word32 * detl as Word32) >> 12) as Word32;
        if (wd as Word32) < wd1 {
            break;
        }
        i += 1;
    }
    if el < 0 {
        ILN[i]
    } else {
        ILP[i]
    }
}

/// 2-bit high-band quantisation of the prediction error `eh`.
pub fn quanth(eh: Word16, deth: Word16) -> Word16 {
    let wd = abs_s(eh);
    let wd1 = ((Q2 as Word32 * deth as Word32) >> 12) as Word32;
    let mih: usize = if (wd as Word32) >= wd1 { 2 } else { 1 };
    if eh < 0 {
        IHN[mih]
    } else {
        IHP[mih]
    }
}

/// Inverse quantisation of the 4-bit truncated low-band difference.
///
/// This is the variant both encoder and decoder use for predictor
/// adaptation, so that all rates share one adaptation trajectory.
pub fn invqal(il: Word16, detl: Word16) -> Word16 {
    let ril = (il >> 2) as usize & 15;
    ((detl as Word32 * QM4[ril] as Word32) >> 15) as Word16
}

/// Inverse quantisation of the 2-bit high-band difference.
pub fn invqah(ih: Word16, deth: Word16) -> Word16 {
    ((deth as Word32 * QM2[(ih & 3) as usize] as Word32) >> 15) as Word16
}

/// Mode-aware full-precision inverse quantisation of the received low-band
/// index: 64 kbit/s uses all 6 bits, 56 kbit/s 5 bits, 48 kbit/s 4 bits.
pub fn invqbl(ilr: Word16, detl: Word16, mode: Word16) -> Word16 {
    let wd2 = match mode {
        1 => QM6[(ilr & 63) as usize],
        2 => QM5[(ilr >> 1) as usize & 31],
        _ => QM4[(ilr >> 2) as usize & 15],
    };
    ((detl as Word32 * wd2 as Word32) >> 15) as Word16
}

/// Low-band log scale-factor adaptation with 127/128 leakage.
pub fn logscl(il: Word16, nbl: Word16) -> Word16 {
    let ril = (il >> 2) & 15;
    let il4 = RL42[ril as usize];
    let wd = mult(nbl, SCALE_LEAK);
    let nbpl = add(wd, WL[il4 as usize]);
    nbpl.clamp(0, NBL_MAX)
}

/// High-band log scale-factor adaptation.
pub fn logsch(ih: Word16, nbh: Word16) -> Word16 {
    let ih2 = RH2[(ih & 3) as usize];
    let wd = mult(nbh, SCALE_LEAK);
    let nbph = add(wd, WH[ih2 as usize]);
    nbph.clamp(0, NBH_MAX)
}

/// Piecewise log->linear mapping from `nb` to the quantiser scale factor.
///
/// The mantissa comes from [`ILB`], the exponent from the top bits of `nb`;
/// `base` is 8 for the low band and 10 for the high band.
pub fn scale_factor(nb: Word16, base: Word16) -> Word16 {
    let wd1 = (nb >> 6) & 31;
    let wd2 = nb >> 11;
    let wd3 = if wd2 < base {
        ILB[wd1 as usize] >> (base - wd2)
    } else {
        shl(ILB[wd1 as usize], wd2 - base)
    };
    shl(wd3, 2)
}

/// Low-band linear scale factor.
#[inline]
pub fn scalel(nbl: Word16) -> Word16 {
    scale_factor(nbl, 8)
}

/// High-band linear scale factor.
#[inline]
pub fn scaleh(nbh: Word16) -> Word16 {
    scale_factor(nbh, 10)
}

/// Zero-section prediction: `sz = sum(b[i] * 2*d[i])` with per-tap saturation.
pub fn filtez(d: &[Word16; 7], b: &[Word16; 7]) -> Word16 {
    let mut sz: Word16 = 0;
    for i in 1..7 {
        let wd = add(d[i], d[i]);
        sz = add(sz, mult(b[i], wd));
    }
    sz
}

/// Pole-section prediction: `sp = a1*r[1] + a2*r[2]`, doubled-Q accumulation.
pub fn filtep(r: &[Word16; 3], a: &[Word16; 3]) -> Word16 {
    let wd1 = add(r[1], r[1]);
    let wd1 = mult(a[1], wd1);
    let wd2 = add(r[2], r[2]);
    let wd2 = mult(a[2], wd2);
    add(wd1, wd2)
}

/// Zero-coefficient adaptation: 255/256 leakage plus a +-128 sign-matching
/// term, then the difference-signal delay line shifts down.
pub fn upzero(d: &mut [Word16; 7], b: &mut [Word16; 7]) {
    let wd1: Word16 = if d[0] == 0 { 0 } else { 128 };
    let sg0 = (d[0] >> 15) & 1;
    for i in 1..7 {
        let sgi = (d[i] >> 15) & 1;
        let wd2 = if sg0 == sgi { wd1 } else { negate(wd1) };
        let wd3 = mult(b[i], 32640);
        b[i] = add(wd2, wd3);
    }
    for i in (1..7).rev() {
        d[i] = d[i - 1];
    }
}

/// Second pole-coefficient adaptation, clipped to +-12288.
pub fn uppol2(a: &mut [Word16; 3], p: &[Word16; 3]) {
    let sg0 = (p[0] >> 15) & 1;
    let sg1 = (p[1] >> 15) & 1;
    let sg2 = (p[2] >> 15) & 1;
    let wd1 = shl(a[1], 2);
    let wd2 = if sg0 == sg1 { negate(wd1) } else { wd1 };
    let wd2 = shr(wd2, 7);
    let wd3 = if sg0 == sg2 { 128 } else { -128 };
    let wd4 = add(wd2, wd3);
    let wd5 = mult(a[2], SCALE_LEAK);
    let apl2 = add(wd4, wd5);
    a[2] = apl2.clamp(-12288, 12288);
}

/// First pole-coefficient adaptation; the clip keeps the pole pair inside
/// the stability triangle (`|a1| <= 15360 - a2`).
pub fn uppol1(a: &mut [Word16; 3], p: &[Word16; 3]) {
    let sg0 = (p[0] >> 15) & 1;
    let sg1 = (p[1] >> 15) & 1;
    let wd1 = if sg0 == sg1 { 192 } else { -192 };
    let wd2 = mult(a[1], 32640);
    let apl1 = add(wd1, wd2);
    let wd3 = sub(15360, a[2]);
    a[1] = apl1.clamp(negate(wd3), wd3);
}

/// Shared predictor update step.
///
/// `dx` is the inverse-quantised difference for the current sample.
/// `p0_override` replaces the current parrec sample in the *pole* adaptation
/// only; the PLC feeds a high-pass-filtered value here while it stabilises
/// the high band after an erasure. Sequence follows the reference BLOCK 4.
pub fn adaptive_prediction(st: &mut SubBandState, dx: Word16, p0_override: Option<Word16>) {
    st.d[0] = dx;
    st.r[0] = add(st.s, dx);
    st.p[0] = add(st.sz, dx);

    let p_adapt = [p0_override.unwrap_or(st.p[0]), st.p[1], st.p[2]];
    uppol2(&mut st.a, &p_adapt);
    uppol1(&mut st.a, &p_adapt);
    upzero(&mut st.d, &mut st.b);

    st.r[2] = st.r[1];
    st.r[1] = st.r[0];
    st.p[2] = st.p[1];
    st.p[1] = st.p[0];

    st.sz = filtez(&st.d, &st.b);
    st.sp = filtep(&st.r, &st.a);
    st.s = add(st.sp, st.sz);
}

/// Low sub-band encoder step (`lsbcod`): one 8-kHz sample to a 6-bit index.
pub fn lsb_encode(xl: Word16, st: &mut SubBandState) -> Word16 {
    // el = xl - sl
    let el = sub(xl, st.s);
    // il = quantl(el, detl)
    let il = quantl(el, st.det);
    // adaptation runs on the 4-bit truncation at every rate
    let dlt = invqal(il, st.det);
    // nbl / detl update
    st.nb = logscl(il, st.nb);
    st.det = scalel(st.nb);
    // predictor update
    adaptive_prediction(st, dlt, None);
    il
}

/// High sub-band encoder step (`hsbcod`): one 8-kHz sample to a 2-bit index.
pub fn hsb_encode(xh: Word16, st: &mut SubBandState) -> Word16 {
    let eh = sub(xh, st.s);
    let ih = quanth(eh, st.det);
    let dh = invqah(ih, st.det);
    st.nb = logsch(ih, st.nb);
    st.det = scaleh(st.nb);
    adaptive_prediction(st, dh, None);
    ih
}

/// Low sub-band decoder step (`lsbdec`).
///
/// The output sample uses the mode-aware full-precision difference; the
/// predictor adaptation uses the 4-bit truncation, exactly as the encoder
/// does, so both sides stay in lock-step at every rate.
pub fn lsb_decode(ilr: Word16, mode: Word16, st: &mut SubBandState) -> Word16 {
    let dl = invqbl(ilr, st.det, mode);
    let rl = add(st.s, dl);

    let dlt = invqal(ilr, st.det);
    st.nb = logscl(ilr, st.nb);
    st.det = scalel(st.nb);
    adaptive_prediction(st, dlt, None);

    rl
}

/// High sub-band decoder step (`hsbdec`).
pub fn hsb_decode(ih: Word16, st: &mut SubBandState) -> Word16 {
    let dh = invqah(ih, st.det);
    st.nb = logsch(ih, st.nb);
    st.det = scaleh(st.nb);
    adaptive_prediction(st, dh, None);
    // rh = r[1] after the shift, i.e. s_prev + dh
    st.r[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::g722::state::SubBandState;

    #[test]
    fn test_quantl_range_and_sign() {
        for det in [32, 100, 1000, 8192] {
            for el in [-20000, -512, -1, 0, 1, 512, 20000] {
                let il = quantl(el, det);
                assert!((0..64).contains(&il), "il={} out of range", il);
                if el >= 0 {
                    assert!((32..62).contains(&il), "positive el must map to ILP");
                } else {
                    assert!((4..=63).contains(&il) && !(32..62).contains(&il));
                }
            }
        }
    }

    #[test]
    fn test_quanth_codes() {
        assert_eq!(quanth(10_000, 8), 2);
        assert_eq!(quanth(-10_000, 8), 0);
        assert_eq!(quanth(0, 8), 3);
        assert_eq!(quanth(-1, 8), 0);
    }

    #[test]
    fn test_invqbl_modes_agree_on_truncation() {
        // at 48 kbit/s the full-precision reconstruction equals the
        // adaptation reconstruction
        for il in 0..64 {
            assert_eq!(invqbl(il, 100, 3), invqal(il, 100));
        }
    }

    #[test]
    fn test_logscl_caps() {
        assert_eq!(logscl(0, 0), 0); // negative step clamps at zero
        let mut nbl = 0;
        for _ in 0..2000 {
            nbl = logscl(60, nbl); // large magnitude index pushes upward
        }
        assert_eq!(nbl, NBL_MAX);
    }

    #[test]
    fn test_scale_factor_monotone_in_nb() {
        let mut last = 0;
        for nb in (0..NBL_MAX).step_by(64) {
            let det = scalel(nb);
            assert!(det >= last, "det must not decrease with nb");
            last = det;
        }
        assert_eq!(scalel(0), 32);
        assert_eq!(scaleh(0), 8);
    }

    #[test]
    fn test_pole_stability_invariant() {
        let mut st = SubBandState::new_low();
        // hammer the adaptation with alternating-sign large differences
        for i in 0..4000 {
            let dx = if i % 2 == 0 { 12000 } else { -11000 };
            adaptive_prediction(&mut st, dx, None);
            assert!(st.a[2].abs() <= 12288);
            assert!(st.a[1].abs() <= 15360 - st.a[2]);
        }
    }

    #[test]
    fn test_encoder_decoder_lockstep() {
        // feeding the decoder the encoder's indices must reproduce the
        // encoder's adaptation state exactly
        let mut enc = SubBandState::new_low();
        let mut dec = SubBandState::new_low();
        for n in 0..500i32 {
            let x = ((n * 37) % 4001 - 2000) as Word16;
            let il = lsb_encode(x, &mut enc);
            let _ = lsb_decode(il, 1, &mut dec);
            assert_eq!(enc.nb, dec.nb, "nb diverged at sample {}", n);
            assert_eq!(enc.det, dec.det);
            assert_eq!(enc.a, dec.a);
            assert_eq!(enc.b, dec.b);
        }
    }

    #[test]
    fn test_high_band_lockstep() {
        let mut enc = SubBandState::new_high();
        let mut dec = SubBandState::new_high();
        for n in 0..500i32 {
            let x = ((n * 53) % 1601 - 800) as Word16;
            let ih = hsb_encode(x, &mut enc);
            let _ = hsb_decode(ih, &mut dec);
            assert_eq!(enc.nb, dec.nb);
            assert_eq!(enc.s, dec.s);
        }
    }
}
