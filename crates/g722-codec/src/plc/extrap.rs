//! Waveform extrapolation for erased frames and the per-good-frame
//! analysis that feeds it.
//!
//! Good frames maintain LPC, pitch, the average residual magnitude and the
//! figure of merit; erased frames synthesise a periodic/noise mixture gated
//! by the merit, overlap-added with the cascaded filter ringing on the
//! first erasure and attenuated to silence across the loss burst.

use crate::basicop::*;
use crate::g722::state::G722State;
use crate::plc::lpc::{ap_filter, autocorr, az_filter, levinson, weight_lpc, WN};
use crate::plc::pitch::{coarse_pitch, decimate_weighted, refine_pitch};
use crate::plc::state::PlcState;
use crate::plc::{
    FRSZ, GATTEND, GATTST, LPC_ORDER, LPC_WIN, LXQ, MAXPP, MHI, MINPP, MLO, NGFAE_MAX, OLAL,
    XQOFF, XTEND,
};

/// Per-good-frame analysis (`WB_PLC` common tail).
///
/// Copies the decoded frame into the history ring, refreshes LPC, weighted
/// speech, pitch and merit, snapshots the decoder state, then shifts the
/// ring.
pub fn update_good_frame(st: &mut PlcState, frame: &[Word16], g722: &G722State) {
    debug_assert_eq!(frame.len(), FRSZ);
    st.xq[XQOFF..XQOFF + FRSZ].copy_from_slice(frame);

    // LPC on the newest analysis window
    let mut r = [0i32; LPC_ORDER + 1];
    let win_start = XQOFF + FRSZ - LPC_WIN;
    let mut window = [0i16; LPC_WIN];
    window.copy_from_slice(&st.xq[win_start..win_start + LPC_WIN]);
    autocorr(&window, &mut r);
    let mut a = st.al;
    if levinson(&r, &mut a) {
        st.alast = st.al;
        st.al = a;
    }

    // weighted speech -> decimated pitch domain
    let aw = weight_lpc(&st.al);
    let mut xw = [0i16; FRSZ];
    az_filter(&aw, frame, &mut xw, &mut st.stwpml);
    decimate_weighted(st, &xw);

    // pitch track (good frames only)
    let cpp = coarse_pitch(st, st.pp >> 3);
    let (pp, ptfe) = refine_pitch(st, cpp);
    st.pph.copy_within(..4, 1);
    st.pph[0] = pp;
    st.pp = pp;
    st.ppf = shl(pp, 6);
    st.ptfe = ptfe;

    // average residual magnitude for the noise branch
    let mut resid = [0i16; FRSZ];
    let al = st.al;
    az_filter(&al, frame, &mut resid, &mut st.stsyml);
    let mut mag: Word32 = 0;
    for &e in resid.iter() {
        mag = l_add(mag, l_deposit_l(abs_s(e)));
    }
    let mean = (mag / FRSZ as Word32) as Word16;
    st.avm = add(mult(st.avm, 24576), mult(mean, 8192));

    st.merit = compute_merit(st);
    st.snapshot(g722);

    st.cfecount = 0;
    if st.ngfae < NGFAE_MAX {
        st.ngfae += 1;
    }
    st.shift_xq();
}

/// Figure of merit, Q8: pitch-prediction gain plus a spectral-tilt bonus.
///
/// Gates the periodic/noise mixture: above `256 * MHI` the extrapolation is
/// purely periodic, below `256 * MLO` purely noise.
pub fn compute_merit(st: &PlcState) -> Word32 {
    // normalised first autocorrelation over the newest samples
    let mut r0: Word32 = 1;
    let mut r1: Word32 = 0;
    for i in (XQOFF - 120)..(XQOFF - 1) {
        let a = st.xq[i] >> 4;
        let b = st.xq[i + 1] >> 4;
        r0 = l_mac0(r0, a, a);
        r1 = l_mac0(r1, a, b);
    }
    let tilt_q8: Word32 = if r1 <= 0 {
        0
    } else if r1 >= r0 {
        256
    } else {
        let n = norm_l(r0);
        let den = extract_h(l_shl(r0, n)).max(1);
        let num = extract_h(l_shl(r1, n)).clamp(0, den);
        (div_s(num, den) >> 7) as Word32
    };
    // ptfe Q14 -> Q8 voicing term scaled to the merit gates
    let voicing = (st.ptfe.max(0) as Word32 * 28) >> 6;
    voicing + tilt_q8 * 8
}

/// Synthesise one erased frame into `out` and extend the history ring by
/// the re-phasing search span.
pub fn conceal_frame(st: &mut PlcState, out: &mut [Word16]) {
    debug_assert!(out.len() >= FRSZ);
    st.cfecount += 1;
    st.ngfae = 0;

    if st.cfecount == 1 {
        st.lag = crate::plc::LAG_NONE;
        // pitch drift estimate from the recent track, Q6 per frame
        let drift = (st.pph[0] as i32 - st.pph[4] as i32) << 6;
        st.ppinc = (drift / 4).clamp(-128, 128) as Word16;
        st.ppf = shl(st.pp, 6);
        compute_ringing(st);
        st.nzml = st.stsyml;
    } else {
        st.ppf = add(st.ppf, st.ppinc)
            .clamp((MINPP as Word16) << 6, saturate((MAXPP as Word32) << 6));
        st.pp = st.ppf >> 6;
    }
    let pp = st.pp.clamp(MINPP as Word16, MAXPP as Word16) as usize;

    // periodic extrapolation across frame + QMF warm-up + re-phasing span
    let merit = st.merit;
    let periodic = merit > 256 * MLO;
    let ptfe = if periodic { st.ptfe } else { 0 };
    for i in 0..XTEND {
        let src = st.xq[XQOFF + i - pp];
        let mut s = ((ptfe as Word32 * src as Word32) >> 14) as Word32;
        if st.cfecount == 1 && i < OLAL {
            // cross-fade the filter ringing into the periodic branch
            let w = ((i as Word32) << 15) / OLAL as Word32;
            s = (s * w + (st.ring[i] as Word32) * (32768 - w)) >> 15;
        }
        st.xq[XQOFF + i] = saturate(s);
    }

    // noise branch, LPC-shaped, mixed in by merit
    if merit < 256 * MHI {
        let wn_q8 = if merit <= 256 * MLO {
            256
        } else {
            ((256 * MHI - merit) >> 3).clamp(0, 256)
        };
        let mut noise = [0i16; XTEND];
        for n in noise.iter_mut() {
            let w = WN[(st.nseed & 255) as usize];
            st.nseed = st.nseed.wrapping_mul(31821).wrapping_add(13849);
            *n = saturate((w as Word32 * st.avm as Word32) >> 12);
        }
        let mut shaped = [0i16; XTEND];
        let al = st.al;
        ap_filter(&al, &noise, &mut shaped, &mut st.nzml);
        for i in 0..XTEND {
            let p = st.xq[XQOFF + i] as Word32;
            let mixed = (p * (256 - wn_q8) + shaped[i] as Word32 * wn_q8) >> 8;
            st.xq[XQOFF + i] = saturate(mixed);
        }
    }

    apply_attenuation(st);

    out[..FRSZ].copy_from_slice(&st.xq[XQOFF..XQOFF + FRSZ]);
}

/// Filter ringing through the cascaded long-term and short-term synthesis
/// filters, used to splice the first erased frame onto the history.
fn compute_ringing(st: &mut PlcState) {
    let pp = st.pp.clamp(MINPP as Word16, MAXPP as Word16) as usize;
    let mut exc = [0i16; OLAL];
    for (i, e) in exc.iter_mut().enumerate() {
        let src = st.xq[XQOFF + i - pp];
        *e = saturate((st.ptfe as Word32 * src as Word32) >> 14);
    }
    // residual of the long-term prediction drives the short-term filter
    let mut resid = [0i16; OLAL];
    let alast = st.alast;
    let mut mem_a = st.stsyml;
    az_filter(&alast, &exc, &mut resid, &mut mem_a);
    let mut ring = [0i16; OLAL];
    let mut mem_b = st.stsyml;
    ap_filter(&alast, &resid, &mut ring, &mut mem_b);
    st.ring = ring;
}

/// Linear gain window across the loss burst: unity before `GATTST`, ramping
/// to mute at `GATTEND`, silence afterwards.
fn apply_attenuation(st: &mut PlcState) {
    let c = st.cfecount;
    if c < GATTST {
        return;
    }
    let span = (GATTEND - GATTST + 1) as Word32;
    let g_end: Word32 = if c >= GATTEND {
        0
    } else {
        (256 * (GATTEND - c) as Word32) / span
    };
    let g_start: Word32 = if c - 1 >= GATTEND {
        0
    } else if c - 1 < GATTST {
        256
    } else {
        (256 * (GATTEND - (c - 1)) as Word32) / span
    };

    // per-sample ramp across the frame, then hold for the extension
    let step_q16 = (((g_end - g_start) << 16) / FRSZ as Word32) as i32;
    let mut g_q16 = (g_start << 16) as i32;
    for i in 0..XTEND {
        let g = (g_q16 >> 16).clamp(0, 256);
        let v = (st.xq[XQOFF + i] as Word32 * g) >> 8;
        st.xq[XQOFF + i] = saturate(v);
        if i < FRSZ {
            g_q16 += step_q16;
        }
    }
}
