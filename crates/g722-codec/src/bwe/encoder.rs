//! BWE encoder: classification, envelope extraction and SWB0 packing.

use crate::basicop::{Word16, Word32};
use crate::bitstream::BitWriter;
use crate::bwe::mdct::{mdct_forward, MDCT_2N, MDCT_N};
use crate::bwe::tables::{FENV_CB, GAIN_BASE, GAIN_STEP, TENV_DELTA};
use crate::bwe::tenv::{calc_tenv, log2_q10, SWB_TENV};
use crate::bwe::{decoder, BweParams, CodMode, FENV_BAND, SWB_FENV};

/// Harmonic-classification peakiness threshold, Q10 log2.
const HARM_THRESH: i32 = 2048;
/// Lowered threshold while the previous frame was harmonic.
const HARM_THRESH_HYST: i32 = 1536;

/// Result of encoding one high-band frame.
#[derive(Debug, Clone)]
pub struct BweEncodeResult {
    /// Quantised frame parameters (already written to the payload).
    pub params: BweParams,
    /// True MDCT coefficients in the fixed working domain.
    pub coef: [Word16; MDCT_N],
    /// Envelope-only reconstruction the decoder will produce, same domain.
    pub recon: [Word16; MDCT_N],
}

/// BWE encoder state.
#[derive(Debug, Clone)]
pub struct BweEncoder {
    /// Previous high-band frame (MDCT analysis memory).
    prev_frame: [Word16; MDCT_N],
    /// Last temporal-envelope segment of the previous frame, Q10 log2.
    prev_env_last: Word16,
    /// Previous frame classification.
    prev_mode: CodMode,
}

impl BweEncoder {
    /// Fresh encoder.
    pub fn new() -> Self {
        Self {
            prev_frame: [0; MDCT_N],
            prev_env_last: 0,
            prev_mode: CodMode::Normal,
        }
    }

    /// Reset to stream start.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Previous frame classification (gates the WBE layer).
    pub fn prev_mode(&self) -> CodMode {
        self.prev_mode
    }

    /// Encode one 80-sample high-band frame and write the 40-bit SWB0
    /// payload.
    pub fn encode(&mut self, hb: &[Word16], w: &mut BitWriter) -> BweEncodeResult {
        debug_assert_eq!(hb.len(), MDCT_N);

        // temporal envelope + transient detection
        let t = calc_tenv(hb, self.prev_env_last);

        // MDCT over the overlap block
        let mut block = [0i16; MDCT_2N];
        block[..MDCT_N].copy_from_slice(&self.prev_frame);
        block[MDCT_N..].copy_from_slice(hb);
        let (coef_raw, q_raw) = mdct_forward(&block);

        // align to the fixed working exponent the decoder reconstructs at
        let coef = align_coef(&coef_raw, q_raw);

        // per-band envelope in the absolute (float-MDCT) log domain
        let mut blogs = [0i32; SWB_FENV];
        for b in 0..SWB_FENV {
            let mut sum: Word32 = 0;
            for k in 0..FENV_BAND {
                sum += (coef_raw[b * FENV_BAND + k] as Word32).abs();
            }
            blogs[b] = log2_q10(sum.max(1)) as i32 + ((q_raw as i32 - 15) << 10);
        }
        let mean_log: i32 = blogs.iter().sum::<i32>() / SWB_FENV as i32;

        // classification
        let max_log = *blogs.iter().max().unwrap();
        let thresh = if self.prev_mode == CodMode::Harmonic {
            HARM_THRESH_HYST
        } else {
            HARM_THRESH
        };
        let cod_mode = if t.transi {
            CodMode::Transient
        } else if max_log - mean_log > thresh {
            CodMode::Harmonic
        } else {
            CodMode::Normal
        };

        // global gain
        let gain_idx =
            (((mean_log - GAIN_BASE as i32) + GAIN_STEP as i32 / 2) / GAIN_STEP as i32)
                .clamp(0, 31) as u8;
        let dec_frame_log = GAIN_BASE as i32 + gain_idx as i32 * GAIN_STEP as i32;

        // frequency envelope: pair VQ against the decoded gain
        let mut fenv_idx = [0u8; SWB_FENV / 2];
        for p in 0..SWB_FENV / 2 {
            let d0 = (blogs[2 * p] - dec_frame_log).clamp(-4096, 4095);
            let d1 = (blogs[2 * p + 1] - dec_frame_log).clamp(-4096, 4095);
            let mut best = 0usize;
            let mut best_err = i64::MAX;
            for (i, cb) in FENV_CB.iter().enumerate() {
                let e0 = (d0 - cb[0] as i32) as i64;
                let e1 = (d1 - cb[1] as i32) as i64;
                let err = e0 * e0 + e1 * e1;
                if err < best_err {
                    best_err = err;
                    best = i;
                }
            }
            fenv_idx[p] = best as u8;
        }

        // temporal envelope: mean-removed deltas
        let env_mean: i32 = t.env.iter().map(|&e| e as i32).sum::<i32>() / SWB_TENV as i32;
        let mut tenv_idx = [0u8; SWB_TENV];
        for (i, &e) in t.env.iter().enumerate() {
            let delta = e as i32 - env_mean;
            let mut best = 0usize;
            let mut best_err = i32::MAX;
            for (j, &lvl) in TENV_DELTA.iter().enumerate() {
                let err = (delta - lvl as i32).abs();
                if err < best_err {
                    best_err = err;
                    best = j;
                }
            }
            tenv_idx[i] = best as u8;
        }

        let params = BweParams {
            cod_mode,
            tenv_idx,
            gain_idx,
            fenv_idx,
        };
        write_swb0(&params, w);

        let recon = decoder::reconstruct_coef(&params);

        self.prev_frame.copy_from_slice(hb);
        self.prev_env_last = t.env[SWB_TENV - 1];
        self.prev_mode = cod_mode;

        BweEncodeResult {
            params,
            coef,
            recon,
        }
    }
}

impl Default for BweEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shift raw coefficients into the fixed working exponent domain.
pub(crate) fn align_coef(coef: &[Word16; MDCT_N], q: Word16) -> [Word16; MDCT_N] {
    let mut out = [0i16; MDCT_N];
    let diff = q as i32 - decoder::Q_DEC as i32;
    for k in 0..MDCT_N {
        let v = coef[k] as i32;
        out[k] = if diff >= 0 {
            (v << diff.min(15)).clamp(-32768, 32767) as i16
        } else {
            (v >> (-diff).min(31)) as i16
        };
    }
    out
}

/// Write the 40-bit SWB0 payload.
pub fn write_swb0(params: &BweParams, w: &mut BitWriter) {
    w.put(params.cod_mode.to_bits(), 2);
    for &t in &params.tenv_idx {
        w.put(t as u32, 2);
    }
    w.put(params.gain_idx as u32, 5);
    for &f in &params.fenv_idx {
        w.put(f as u32, 5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bwe::decoder::read_swb0;
    use crate::bitstream::BitReader;

    fn tone_frame(amp: i16, period: f64) -> [i16; 80] {
        let mut hb = [0i16; 80];
        for (n, v) in hb.iter_mut().enumerate() {
            *v = (amp as f64 * f64::sin(2.0 * std::f64::consts::PI * n as f64 / period)) as i16;
        }
        hb
    }

    #[test]
    fn test_swb0_is_40_bits() {
        let mut enc = BweEncoder::new();
        let mut w = BitWriter::new(5);
        let _ = enc.encode(&tone_frame(6000, 7.0), &mut w);
        assert_eq!(w.bit_len(), 40);
        assert_eq!(w.finish().len(), 5);
    }

    #[test]
    fn test_swb0_roundtrip() {
        let mut enc = BweEncoder::new();
        let mut w = BitWriter::new(5);
        let res = enc.encode(&tone_frame(9000, 11.0), &mut w);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        let params = read_swb0(&mut r);
        assert_eq!(params.cod_mode, res.params.cod_mode);
        assert_eq!(params.gain_idx, res.params.gain_idx);
        assert_eq!(params.tenv_idx, res.params.tenv_idx);
        assert_eq!(params.fenv_idx, res.params.fenv_idx);
    }

    #[test]
    fn test_transient_classification() {
        let mut enc = BweEncoder::new();
        // quiet frame first so the onset crosses the frame boundary test
        let mut w = BitWriter::new(5);
        let _ = enc.encode(&[20i16; 80], &mut w);
        let mut hb = [20i16; 80];
        for s in hb[40..].iter_mut() {
            *s = 14000;
        }
        let mut w = BitWriter::new(5);
        let res = enc.encode(&hb, &mut w);
        assert_eq!(res.params.cod_mode, CodMode::Transient);
    }

    #[test]
    fn test_gain_index_tracks_level() {
        let mut enc_a = BweEncoder::new();
        let mut enc_b = BweEncoder::new();
        let mut w1 = BitWriter::new(5);
        let mut w2 = BitWriter::new(5);
        let loud = enc_a.encode(&tone_frame(16000, 9.0), &mut w1);
        let quiet = enc_b.encode(&tone_frame(300, 9.0), &mut w2);
        assert!(loud.params.gain_idx > quiet.params.gain_idx);
    }
}
