//! ADPCM state re-convergence across erasures.
//!
//! During loss the extrapolated wideband signal is split back into its
//! sub-bands and re-encoded against the decoder's own ADPCM states, so the
//! predictors and scale factors keep moving the way they would have with
//! real input. Pathological DC bias across a burst triggers an adaptive
//! reset; on the first good frame the scale factors are restored from their
//! pre-erasure statistics.

use crate::basicop::*;
use crate::g722::adpcm::{
    adaptive_prediction, invqah, invqal, logsch, logscl, quanth, quantl, scaleh, scalel,
};
use crate::g722::state::SubBandState;
use crate::plc::state::{DcRemove, PlcState};
use crate::plc::{NBPH_TH1, NBPH_TH2};
use tracing::trace;

/// `nbl` stationarity gates for the first-good-frame interpolation.
const NBPL_TH_LO: Word16 = 512;
/// Upper stationarity gate.
const NBPL_TH_HI: Word16 = 2048;

/// Low-band re-convergence step: re-encode one extrapolated low-band sample
/// against the decoder state. Returns the re-encoded index. With `hp` the
/// pole adaptation sees the DC-removed parrec sample (re-phasing replay).
pub fn lsb_update(xl: Word16, st: &mut SubBandState, hp: Option<&mut DcRemove>) -> Word16 {
    let el = sub(xl, st.s);
    let il = quantl(el, st.det);
    let dlt = invqal(il, st.det);
    st.nb = logscl(il, st.nb);
    st.det = scalel(st.nb);
    let p0 = hp.map(|f| f.step(add(st.sz, dlt)));
    adaptive_prediction(st, dlt, p0);
    il
}

/// High sub-band decode with the DC-removed pole adaptation: the `hp_flag`
/// path run on the first samples of a good frame after loss.
pub fn hsb_decode_hp(ih: Word16, st: &mut SubBandState, hp: &mut DcRemove) -> Word16 {
    let dh = invqah(ih, st.det);
    st.nb = logsch(ih, st.nb);
    st.det = scaleh(st.nb);
    let p0 = hp.step(add(st.sz, dh));
    adaptive_prediction(st, dh, Some(p0));
    st.r[1]
}

/// High-band re-convergence step; when `hp` is given the pole adaptation
/// sees the DC-removed parrec sample (the `hp_flag` stabilisation).
pub fn hsb_update(xh: Word16, st: &mut SubBandState, hp: Option<&mut DcRemove>) -> Word16 {
    let eh = sub(xh, st.s);
    let ih = quanth(eh, st.det);
    let dh = invqah(ih, st.det);
    st.nb = logsch(ih, st.nb);
    st.det = scaleh(st.nb);
    let p0 = hp.map(|f| f.step(add(st.sz, dh)));
    adaptive_prediction(st, dh, p0);
    ih
}

/// Accumulate the band-sign statistics of one erased frame.
pub fn accumulate_bias(st: &mut PlcState, lb: &[Word16], hb: &[Word16]) {
    for &s in lb {
        st.pl_postn += s.signum() as Word32;
    }
    for &s in hb {
        st.ph_postn += s.signum() as Word32;
    }
    st.bias_frames += 1;
}

/// Detect runaway DC bias over a loss burst and arm the adaptive resets.
///
/// A near-constant sign across three or more erased frames means the
/// predictor is being driven into a corner it will not come back from.
pub fn check_bias(st: &mut PlcState, samples_per_frame: usize) {
    if st.bias_frames < 3 {
        return;
    }
    let total = (st.bias_frames as usize * samples_per_frame) as Word32;
    let limit = total - total / 8;
    if st.pl_postn.abs() > limit {
        st.lb_reset = true;
        trace!(postn = st.pl_postn, "low-band DC bias: adaptive reset armed");
    }
    if st.ph_postn.abs() > limit {
        st.hb_reset = true;
        trace!(postn = st.ph_postn, "high-band DC bias: adaptive reset armed");
    }
}

/// Apply any armed adaptive resets and clear the bias bookkeeping.
pub fn apply_resets(st: &mut PlcState, low: &mut SubBandState, high: &mut SubBandState) {
    if st.lb_reset {
        low.reset_low();
        st.lb_reset = false;
    }
    if st.hb_reset {
        high.reset_high();
        st.hb_reset = false;
    }
    st.pl_postn = 0;
    st.ph_postn = 0;
    st.bias_frames = 0;
}

/// Good-frame update of the scale-factor statistics.
pub fn track_scale_factors(st: &mut PlcState, nbl: Word16, nbh: Word16) {
    // two-stage low-pass on nbl, one-stage on nbh
    st.nbpl_mean1 = add(st.nbpl_mean1, shr(sub(nbl, st.nbpl_mean1), 2));
    st.nbpl_mean2 = add(st.nbpl_mean2, shr(sub(st.nbpl_mean1, st.nbpl_mean2), 2));
    st.nbph_mean = add(st.nbph_mean, shr(sub(nbh, st.nbph_mean), 3));
}

/// First-good-frame restoration of the low-band log scale factor.
///
/// `nbl_reenc` is the value the re-convergence produced by the end of the
/// loss. Fully stationary history takes the pre-erasure mean, fully
/// non-stationary keeps the re-encoded value, and the band between blends
/// linearly on the change measure.
pub fn restore_nbl(st: &PlcState, nbl_reenc: Word16) -> Word16 {
    let chng = abs_s(sub(nbl_reenc, st.nbpl_mean2));
    if chng <= NBPL_TH_LO {
        st.nbpl_mean2
    } else if chng >= NBPL_TH_HI {
        nbl_reenc
    } else {
        // w in Q12 over the [TH_LO, TH_HI) span
        let span = NBPL_TH_HI - NBPL_TH_LO;
        let w = (((chng - NBPL_TH_LO) as Word32) << 12) / span as Word32;
        let blend = (nbl_reenc as Word32 * w + st.nbpl_mean2 as Word32 * (4096 - w)) >> 12;
        saturate(blend)
    }
}

/// First-good-frame restoration of the high-band log scale factor and the
/// tracking mode for the frame: 2 = frozen toward the mean, 1 = low-pass
/// tracking, 0 = unfiltered.
pub fn restore_nbh(st: &mut PlcState, nbh_reenc: Word16) -> Word16 {
    let chng = abs_s(sub(nbh_reenc, st.nbph_mean));
    st.nbh_mode = if chng <= NBPH_TH1 {
        2
    } else if chng <= NBPH_TH2 {
        1
    } else {
        0
    };
    st.nbph_mean
}

/// Per-sample `nbh` tracking during the first good frame, selected by
/// `nbh_mode` (the tagged variant replacing the reference's function
/// pointer switch).
pub fn track_nbh(band: &mut SubBandState, prev_nb: Word16, mode: u8) -> Word16 {
    match mode {
        2 => {
            // heavy low-pass toward the restored value
            band.nb = add(mult(prev_nb, 24576), mult(band.nb, 8192));
            band.det = scaleh(band.nb);
            band.nb
        }
        1 => {
            band.nb = add(mult(prev_nb, 16384), mult(band.nb, 16384));
            band.det = scaleh(band.nb);
            band.nb
        }
        _ => band.nb,
    }
}
