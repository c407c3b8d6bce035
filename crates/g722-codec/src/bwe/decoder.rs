//! BWE decoder: envelope reconstruction, AVQ overwrite hook, inverse MDCT
//! and temporal shaping, plus the loss-concealment path.

use crate::basicop::{saturate, Word16, Word32};
use crate::bitstream::BitReader;
use crate::bwe::mdct::{MdctSynthesis, MDCT_N};
use crate::bwe::tables::NOISE_SHAPE;
use crate::bwe::tenv::{calc_tenv, exp2_q10, SWB_TENV, TENV_SEG};
use crate::bwe::tables::TENV_DELTA;
use crate::bwe::{BweParams, CodMode, FENV_BAND, SWB_FENV};

/// Fixed working block exponent of the reconstruction domain.
pub const Q_DEC: Word16 = 18;

/// Coefficient attenuation per consecutive lost frame, Q15 (0.75).
const LOSS_ATTEN: Word16 = 24576;

/// Parse the 40-bit SWB0 payload.
pub fn read_swb0(r: &mut BitReader<'_>) -> BweParams {
    let cod_mode = CodMode::from_bits(r.get(2));
    let mut tenv_idx = [0u8; SWB_TENV];
    for t in tenv_idx.iter_mut() {
        *t = r.get(2) as u8;
    }
    let gain_idx = r.get(5) as u8;
    let mut fenv_idx = [0u8; SWB_FENV / 2];
    for f in fenv_idx.iter_mut() {
        *f = r.get(5) as u8;
    }
    BweParams {
        cod_mode,
        tenv_idx,
        gain_idx,
        fenv_idx,
    }
}

/// Envelope-driven coefficient reconstruction in the `Q_DEC` domain.
///
/// Each band is filled with the mode-dependent shape, then rescaled so the
/// band magnitude sum matches the decoded envelope exactly. Deterministic
/// integer arithmetic, shared by encoder (residual computation) and decoder.
pub fn reconstruct_coef(params: &BweParams) -> [Word16; MDCT_N] {
    let logs = params.band_logs();
    let mut coef = [0i16; MDCT_N];
    for b in 0..SWB_FENV {
        // raw band shape
        let mut shape = [0i32; FENV_BAND];
        for k in 0..FENV_BAND {
            let s = NOISE_SHAPE[b * FENV_BAND + k] as i32;
            shape[k] = match params.cod_mode {
                CodMode::Normal => s,
                CodMode::Harmonic => {
                    if k % 4 == 0 {
                        if s >= 0 {
                            29000
                        } else {
                            -29000
                        }
                    } else {
                        s >> 2
                    }
                }
                CodMode::Transient => {
                    if s >= 0 {
                        16384
                    } else {
                        -16384
                    }
                }
            };
        }
        let sum_abs: i64 = shape.iter().map(|&v| v.abs() as i64).sum::<i64>().max(1);

        // band magnitude target in the working domain
        let v = (logs[b] - ((Q_DEC as i32 - 15) << 10)).clamp(0, 18 << 10);
        let target = exp2_q10(v as Word16) as i64;

        for k in 0..FENV_BAND {
            let val = shape[k] as i64 * target / sum_abs;
            coef[b * FENV_BAND + k] = saturate(val.clamp(-32768, 32767) as Word32);
        }
    }
    coef
}

/// BWE decoder state.
#[derive(Debug, Clone)]
pub struct BweDecoder {
    syn: MdctSynthesis,
    prev_mode: CodMode,
    prev_coef: [Word16; MDCT_N],
    prev_env_last: Word16,
    /// Consecutive-loss counter driving the concealment attenuation.
    loss_count: u32,
    /// Transient-position modifier carried across frames.
    t_modify: bool,
}

impl BweDecoder {
    /// Fresh decoder.
    pub fn new() -> Self {
        Self {
            syn: MdctSynthesis::new(),
            prev_mode: CodMode::Normal,
            prev_coef: [0; MDCT_N],
            prev_env_last: 0,
            loss_count: 0,
            t_modify: false,
        }
    }

    /// Reset to stream start.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Previous frame classification (drives the erasure-upgrade rule).
    pub fn prev_mode(&self) -> CodMode {
        self.prev_mode
    }

    /// Reconstruct this frame's coefficients from good-frame parameters.
    ///
    /// The caller may overwrite the leading bins with AVQ refinements before
    /// [`Self::synthesise`].
    pub fn decode_freqcoef(&mut self, params: &BweParams) -> [Word16; MDCT_N] {
        self.loss_count = 0;
        reconstruct_coef(params)
    }

    /// Coefficient concealment for a lost frame: previous coefficients with
    /// a deepening attenuation.
    pub fn conceal_freqcoef(&mut self) -> [Word16; MDCT_N] {
        self.loss_count += 1;
        let mut coef = self.prev_coef;
        let steps = self.loss_count.min(8);
        for c in coef.iter_mut() {
            let mut v = *c as Word32;
            for _ in 0..steps {
                v = (v * LOSS_ATTEN as Word32) >> 15;
            }
            *c = v as Word16;
        }
        coef
    }

    /// Inverse MDCT plus temporal-envelope shaping; produces the 80-sample
    /// high band and rolls the decoder state forward.
    pub fn synthesise(
        &mut self,
        coef: &[Word16; MDCT_N],
        params: Option<&BweParams>,
        out: &mut [Word16],
    ) {
        debug_assert!(out.len() >= MDCT_N);
        self.syn.frame(coef, Q_DEC, &mut out[..MDCT_N]);

        if let Some(p) = params {
            self.shape_time(p, &mut out[..MDCT_N]);
            self.prev_mode = p.cod_mode;
        }
        self.prev_coef.copy_from_slice(coef);
        let t = calc_tenv(&out[..MDCT_N], self.prev_env_last);
        self.prev_env_last = t.env[SWB_TENV - 1];
    }

    /// Run the state-update path without emitting output, for frames whose
    /// mode carried no BWE payload.
    pub fn update_only(&mut self) {
        let mut sink = [0i16; MDCT_N];
        let zeros = [0i16; MDCT_N];
        self.syn.frame(&zeros, Q_DEC, &mut sink);
        // keep decaying the concealment memory
        for c in self.prev_coef.iter_mut() {
            *c = ((*c as Word32 * LOSS_ATTEN as Word32) >> 15) as Word16;
        }
    }

    /// Per-segment envelope correction toward the transmitted shape.
    fn shape_time(&mut self, params: &BweParams, hb: &mut [Word16]) {
        let actual = calc_tenv(hb, self.prev_env_last);
        let actual_mean: i32 =
            actual.env.iter().map(|&e| e as i32).sum::<i32>() / SWB_TENV as i32;

        // transient position from the quantised shape
        let peak = params
            .tenv_idx
            .iter()
            .enumerate()
            .max_by_key(|&(_, &v)| v)
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.t_modify = params.cod_mode == CodMode::Transient && peak >= 2;

        for (t, seg) in hb.chunks_exact_mut(TENV_SEG).enumerate() {
            let target = TENV_DELTA[params.tenv_idx[t] as usize] as i32;
            let have = actual.env[t] as i32 - actual_mean;
            // gain = 2^(target - have), Q10 factor clamped to [1/4, 4]
            let diff = (target - have).clamp(-2048, 2048);
            let mut g = exp2_q10((diff + (10 << 10)) as Word16) as Word32;
            if self.t_modify && t < peak {
                g >>= 1; // sharpen the attack
            }
            let g = g.clamp(256, 4096);
            for s in seg.iter_mut() {
                *s = saturate((*s as Word32 * g) >> 10);
            }
        }
    }
}

impl Default for BweDecoder {
    fn default() -> Self {
        Self::new()
    }
}
