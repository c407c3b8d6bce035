//! Session decoder with wideband packet-loss concealment.
//!
//! Good frames decode the layered core (plus the SWB layers in the SWB
//! modes) and keep the PLC's history analysis running. Erased frames hand
//! the wideband core to the PLC, which extrapolates speech and keeps the
//! ADPCM predictors converged on the extrapolated bands. The first good
//! frame after a loss is re-phased against the extrapolated continuation,
//! its scale factors restored from pre-erasure statistics, and its output
//! time-warped to absorb the phase offset.

use crate::avq::{avq_decode_layer, AvqState, AVQ_BINS_PER_LAYER};
use crate::basicop::{add, Word16, Word32, MAX_16};
use crate::bitstream::{unpack_layered, BitReader};
use crate::bwe::decoder::{read_swb0, BweDecoder, Q_DEC};
use crate::bwe::{BweParams, CodMode};
use crate::error::{CodecError, Result};
use crate::g722::adpcm::{hsb_decode, lsb_decode, scaleh, scalel};
use crate::g722::state::G722State;
use crate::g722::wbe::{lsb_decode_enh, WbeMode};
use crate::plc::extrap::{conceal_frame, update_good_frame};
use crate::plc::reconverge::{
    accumulate_bias, apply_resets, check_bias, hsb_decode_hp, hsb_update, lsb_update,
    restore_nbh, restore_nbl, track_nbh, track_scale_factors,
};
use crate::plc::rephase::{ppchange, refine_lag, resample, testrpc};
use crate::plc::state::PlcState;
use crate::plc::{FRSZ, LAG_NONE, MAXOS, MIN_UNSTBL, XQOFF, XTEND};
use crate::qmf::{QmfAnalysis, QmfSynthesis};
use crate::session::{unpack_codeword, SATTENU_REST, SATTENU_STEP};
use crate::types::{
    CodecInfo, FrameDecoder, Mode, SampleRate, L_FRAME_NB, L_FRAME_SWB, L_FRAME_WB,
};
use tracing::{debug, trace};

/// Introspection snapshot of the concealment engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlcDiagnostics {
    /// Re-phasing lag chosen for the last first-good-frame, or the
    /// do-not-re-phase sentinel.
    pub lag: i32,
    /// Figure of merit at the last erasure, Q8.
    pub merit: i32,
    /// Consecutive erased frames in the current burst.
    pub cfecount: u32,
    /// Good frames since the last erasure (saturating).
    pub ngfae: u32,
}

/// Frame-synchronous decoder session.
pub struct Decoder {
    mode: Mode,
    /// Output forced to 32 kHz after a runtime mode change.
    forced_swb_out: bool,
    g722: G722State,
    qmf_rx: QmfSynthesis,
    qmf_swb_syn: QmfSynthesis,
    plc: PlcState,
    bwe: BweDecoder,
    avq: AvqState,
    // mode-transition bookkeeping
    sattenu: Word16,
    bit_switch_flag: u8,
    prev_mode: Mode,
    prev2_mode: Mode,
    prev_ploss: bool,
}

impl Decoder {
    /// Construct a decoder for `mode`.
    pub fn new(mode_index: u8) -> Result<Self> {
        let mode =
            Mode::from_index(mode_index).ok_or(CodecError::UnsupportedMode { index: mode_index })?;
        debug!(mode = %mode, "decoder session created");
        Ok(Self {
            mode,
            forced_swb_out: false,
            g722: G722State::new(),
            qmf_rx: QmfSynthesis::new_wb(),
            qmf_swb_syn: QmfSynthesis::new_swb(),
            plc: PlcState::new(),
            bwe: BweDecoder::new(),
            avq: AvqState::new(),
            sattenu: MAX_16,
            bit_switch_flag: 0,
            prev_mode: mode,
            prev2_mode: mode,
            prev_ploss: false,
        })
    }

    /// Runtime mode change; the output sampling rate is forced to 32 kHz
    /// from this call on and a cross-fade masks the transition.
    pub fn set_mode(&mut self, mode_index: u8) -> Result<()> {
        let mode =
            Mode::from_index(mode_index).ok_or(CodecError::UnsupportedMode { index: mode_index })?;
        if mode != self.mode {
            self.prev2_mode = self.prev_mode;
            self.prev_mode = self.mode;
            self.mode = mode;
            self.bit_switch_flag = 2;
            self.sattenu = SATTENU_REST;
            debug!(from = %self.prev_mode, to = %mode, "decoder mode switch");
        }
        self.forced_swb_out = true;
        Ok(())
    }

    /// Operating mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Output sampling rate.
    pub fn output_rate(&self) -> SampleRate {
        if self.mode.is_swb() || self.forced_swb_out {
            SampleRate::Rate32000
        } else {
            SampleRate::Rate16000
        }
    }

    /// Concealment introspection (re-phasing lag, merit, counters).
    pub fn plc_diagnostics(&self) -> PlcDiagnostics {
        PlcDiagnostics {
            lag: self.plc.lag,
            merit: self.plc.merit,
            cfecount: self.plc.cfecount,
            ngfae: self.plc.ngfae,
        }
    }

    /// Decode the wideband core of a clean good frame.
    fn decode_wb_normal(&mut self, codes: &[u8; L_FRAME_NB], wbe: &WbeLayer, wb: &mut [Word16]) {
        let g722_mode = self.mode.g722_mode();
        for n in 0..L_FRAME_NB {
            let (il, ih) = unpack_codeword(codes[n]);
            let rl = match wbe {
                WbeLayer::Active(bits) => {
                    lsb_decode_enh(il, bits[n], WbeMode::OneBit, &mut self.g722.low)
                }
                WbeLayer::Off => lsb_decode(il, g722_mode, &mut self.g722.low),
            };
            let rh = hsb_decode(ih, &mut self.g722.high);
            let (x0, x1) = self.qmf_rx.step(rl, rh);
            wb[2 * n] = x0;
            wb[2 * n + 1] = x1;
        }
        track_scale_factors(&mut self.plc, self.g722.low.nb, self.g722.high.nb);
        update_good_frame(&mut self.plc, wb, &self.g722);
    }

    /// Conceal one erased wideband frame and keep the decoder state
    /// converged on the extrapolated bands.
    fn conceal_wb(&mut self, wb: &mut [Word16]) {
        trace!(cfecount = self.plc.cfecount + 1, "erased frame: extrapolating");
        // snapshot before this frame's re-convergence so the first good
        // frame can replay an alternate sample count
        self.plc.snapshot(&self.g722);

        conceal_frame(&mut self.plc, wb);

        // split the extrapolated continuation back into sub-bands
        let mut ana = QmfAnalysis::new_wb();
        let hist_start = XQOFF - 24;
        let hist: Vec<Word16> = self.plc.xq[hist_start..XQOFF].to_vec();
        ana.prime(&hist);
        let ext: Vec<Word16> = self.plc.xq[XQOFF..XQOFF + XTEND].to_vec();
        let mut lb = [0i16; XTEND / 2];
        let mut hb = [0i16; XTEND / 2];
        ana.process(&ext, &mut lb, &mut hb);
        self.plc.last_lb.copy_from_slice(&lb);
        self.plc.last_hb.copy_from_slice(&hb);

        // nominal-count re-convergence over the frame's own band samples
        for n in 0..FRSZ / 2 {
            let _ = lsb_update(lb[n], &mut self.g722.low, None);
            let _ = hsb_update(hb[n], &mut self.g722.high, None);
        }
        accumulate_bias(&mut self.plc, &lb[..FRSZ / 2], &hb[..FRSZ / 2]);
        check_bias(&mut self.plc, FRSZ / 2);
        apply_resets(&mut self.plc, &mut self.g722.low, &mut self.g722.high);

        self.plc.shift_xq();
    }

    /// First good frame after an erasure: re-phase, restore scale factors,
    /// decode with the stabilisation hooks, then time-warp the output.
    fn decode_first_good(
        &mut self,
        codes: &[u8; L_FRAME_NB],
        wbe: &WbeLayer,
        wb: &mut [Word16],
    ) {
        let g722_mode = self.mode.g722_mode();

        // partially re-decode this frame against the pre-reconvergence
        // snapshot to approximate the encoder-side waveform
        let mut tout = [0i16; L_FRAME_WB];
        {
            let mut ds = self.plc.ds.clone();
            let mut qmf = QmfSynthesis::new_wb();
            qmf.refill(&self.plc.last_lb[..FRSZ / 2], &self.plc.last_hb[..FRSZ / 2]);
            for n in 0..L_FRAME_NB {
                let (il, ih) = unpack_codeword(codes[n]);
                let rl = lsb_decode(il, g722_mode, &mut ds.low);
                let rh = hsb_decode(ih, &mut ds.high);
                let (x0, x1) = qmf.step(rl, rh);
                tout[2 * n] = x0;
                tout[2 * n + 1] = x1;
            }
        }

        // re-phasing lag
        let mut lag = LAG_NONE;
        if testrpc(&self.plc, &tout) {
            lag = ppchange(&self.plc, &tout);
            if lag != LAG_NONE {
                lag = refine_lag(&self.plc, &tout, lag);
            }
        }
        self.plc.lag = lag;
        trace!(lag, merit = self.plc.merit, "first good frame after loss");

        // replay the band re-convergence at the re-phased sample count
        if lag != LAG_NONE && lag != 0 {
            self.g722 = self.plc.ds.clone();
            self.plc.restore_dc_memories();
            let count = (((FRSZ as i32) + lag) / 2)
                .clamp(0, (FRSZ / 2 + MAXOS) as i32) as usize;
            let last_lb = self.plc.last_lb;
            let last_hb = self.plc.last_hb;
            for n in 0..count {
                let xl = self.plc.rh_m1.step(last_lb[n]);
                let xh = self.plc.rhhp_m1.step(last_hb[n]);
                let _ = lsb_update(xl, &mut self.g722.low, Some(&mut self.plc.ph_m1));
                let _ = hsb_update(xh, &mut self.g722.high, Some(&mut self.plc.phhp_m1));
            }
            // the QMF memory follows the chosen phase
            self.qmf_rx.refill(&last_lb[..count], &last_hb[..count]);
        } else {
            self.qmf_rx
                .refill(&self.plc.last_lb[..FRSZ / 2], &self.plc.last_hb[..FRSZ / 2]);
        }

        // scale-factor restoration
        let nbl = restore_nbl(&self.plc, self.g722.low.nb);
        self.g722.low.nb = nbl;
        self.g722.low.det = scalel(nbl);
        let nbh = restore_nbh(&mut self.plc, self.g722.high.nb);
        self.g722.high.nb = nbh;
        self.g722.high.det = scaleh(nbh);
        let nbh_restored = nbh;

        // decode with the high-band stabilisation hooks
        self.plc.hp_flag = true;
        let mut decoded = [0i16; L_FRAME_WB];
        for n in 0..L_FRAME_NB {
            let (il, ih) = unpack_codeword(codes[n]);
            let rl = match wbe {
                WbeLayer::Active(bits) => {
                    lsb_decode_enh(il, bits[n], WbeMode::OneBit, &mut self.g722.low)
                }
                WbeLayer::Off => lsb_decode(il, g722_mode, &mut self.g722.low),
            };
            let rh = if n < 4 {
                hsb_decode_hp(ih, &mut self.g722.high, &mut self.plc.phhp_m1)
            } else {
                hsb_decode(ih, &mut self.g722.high)
            };
            track_nbh(&mut self.g722.high, nbh_restored, self.plc.nbh_mode);
            let (x0, x1) = self.qmf_rx.step(rl, rh);
            decoded[2 * n] = x0;
            decoded[2 * n + 1] = x1;
        }
        self.plc.hp_flag = false;

        // time-warp the frame to absorb the phase offset
        if lag != LAG_NONE && lag != 0 {
            let take_ext = ((MIN_UNSTBL as i32) + lag).clamp(0, (24 + MAXOS) as i32) as usize;
            let mut input = Vec::with_capacity(take_ext + L_FRAME_WB - MIN_UNSTBL);
            input.extend_from_slice(&self.plc.xq[XQOFF..XQOFF + take_ext]);
            input.extend_from_slice(&decoded[MIN_UNSTBL..]);
            let delta = input.len() as i32 - L_FRAME_WB as i32;
            resample(&input, delta, wb);
        } else {
            wb[..L_FRAME_WB].copy_from_slice(&decoded);
        }

        track_scale_factors(&mut self.plc, self.g722.low.nb, self.g722.high.nb);
        update_good_frame(&mut self.plc, wb, &self.g722);
    }

    /// Assemble the output at the session's output rate and run the
    /// mode-transition cross-fade.
    fn emit(&mut self, wb: &[Word16], shb: Option<&[Word16]>, out: &mut [i16]) -> usize {
        let n = match self.output_rate() {
            SampleRate::Rate16000 => {
                out[..L_FRAME_WB].copy_from_slice(&wb[..L_FRAME_WB]);
                L_FRAME_WB
            }
            SampleRate::Rate32000 => {
                let zeros = [0i16; L_FRAME_WB];
                let high = shb.unwrap_or(&zeros);
                self.qmf_swb_syn
                    .process(&wb[..L_FRAME_WB], high, &mut out[..L_FRAME_SWB]);
                L_FRAME_SWB
            }
        };
        self.apply_mode_attenuation(&mut out[..n]);
        n
    }

    /// Mode-switch cross-fade: ramps `sattenu` per sample; on saturation it
    /// rests at 3277 and the switch flag clears before `prev2_mode`
    /// rotates, preserving the reference sequencing.
    fn apply_mode_attenuation(&mut self, out: &mut [i16]) {
        if self.bit_switch_flag != 2 {
            return;
        }
        for s in out.iter_mut() {
            *s = (((*s as Word32) * (self.sattenu as Word32)) >> 15) as i16;
            self.sattenu = add(self.sattenu, SATTENU_STEP);
            if self.sattenu == MAX_16 {
                self.sattenu = SATTENU_REST;
                self.bit_switch_flag = 0;
                self.prev2_mode = self.prev_mode;
                break;
            }
        }
    }
}

/// Wideband-enhancement bits of the current frame, if the layer is active.
enum WbeLayer {
    Off,
    Active([Word16; L_FRAME_NB]),
}

impl FrameDecoder for Decoder {
    fn decode(&mut self, bitstream: &[u8], output: &mut [i16], ploss: bool) -> Result<usize> {
        let mode = self.mode;
        let out_len = self.output_rate().frame_samples();
        if output.len() < out_len {
            return Err(CodecError::BufferTooSmall {
                needed: out_len,
                actual: output.len(),
            });
        }
        if !ploss && bitstream.len() != mode.frame_bytes() {
            return Err(CodecError::invalid_payload(format!(
                "mode {} expects {} bytes, got {}",
                mode,
                mode.frame_bytes(),
                bitstream.len()
            )));
        }

        // an SWB erasure followed by a non-SWB frame classified as
        // harmonic/normal is treated as a further erasure so a corrupt BWE
        // tail never leaks
        let erased = ploss
            || (self.prev_ploss
                && !mode.is_swb()
                && self.prev_mode.is_swb()
                && matches!(self.bwe.prev_mode(), CodMode::Normal | CodMode::Harmonic));

        let mut wb = [0i16; L_FRAME_WB];
        let mut shb_buf = [0i16; L_FRAME_WB];
        let mut shb: Option<&[Word16]> = None;

        if erased {
            self.conceal_wb(&mut wb);
            if mode.is_swb() {
                self.avq.buf_reset();
                let coef = self.bwe.conceal_freqcoef();
                self.bwe.synthesise(&coef, None, &mut shb_buf);
                shb = Some(&shb_buf);
            }
        } else {
            // SWB parameters first: the WBE flag gates the core decode
            let mut params: Option<BweParams> = None;
            let mut wbe = WbeLayer::Off;
            if mode.is_swb() {
                let mut r = BitReader::new(&bitstream[mode.core_bytes()..]);
                let p = read_swb0(&mut r);
                if mode == Mode::R3sm && p.cod_mode != CodMode::Transient {
                    // the WBE segment follows the SWB-1 payload
                    let mut wr = BitReader::new(&bitstream[mode.core_bytes() + 10..]);
                    let mut bits = [0i16; L_FRAME_NB];
                    for b in bits.iter_mut() {
                        *b = wr.get(1) as Word16;
                    }
                    wbe = WbeLayer::Active(bits);
                }
                params = Some(p);
            }

            let mut codes = [0u8; L_FRAME_NB];
            unpack_layered(&bitstream[..mode.core_bytes()], &mut codes);

            if self.plc.ngfae == 0 {
                self.decode_first_good(&codes, &wbe, &mut wb);
            } else {
                self.decode_wb_normal(&codes, &wbe, &mut wb);
            }

            if let Some(p) = params {
                let mut coef = self.bwe.decode_freqcoef(&p);
                if matches!(mode, Mode::R2sm | Mode::R3sm) {
                    let gains = p.avq_gains(Q_DEC);
                    let mut r1 = BitReader::new(&bitstream[mode.core_bytes() + 5..]);
                    let corr = avq_decode_layer(&gains, &mut r1);
                    for k in 0..AVQ_BINS_PER_LAYER {
                        coef[k] = add(coef[k], corr[k]);
                    }
                    self.avq.resid_l1.copy_from_slice(&corr);
                    if mode == Mode::R3sm {
                        let gains2 = [gains[1], gains[1]];
                        let mut r2 =
                            BitReader::new(&bitstream[mode.core_bytes() + 15..]);
                        let corr2 = avq_decode_layer(&gains2, &mut r2);
                        for k in 0..AVQ_BINS_PER_LAYER {
                            let bin = AVQ_BINS_PER_LAYER + k;
                            coef[bin] = add(coef[bin], corr2[k]);
                        }
                        self.avq.resid_l2.copy_from_slice(&corr2);
                    }
                    self.avq.pre_cod_mode = p.cod_mode.to_bits() as u8;
                }
                self.bwe.synthesise(&coef, Some(&p), &mut shb_buf);
                shb = Some(&shb_buf);
            } else if self.forced_swb_out {
                // WB mode after a switch: keep the BWE state moving
                self.bwe.update_only();
            }
        }

        let n = self.emit(&wb, shb, output);
        self.prev_ploss = erased;
        Ok(n)
    }

    fn reset(&mut self) {
        self.g722.reset();
        self.qmf_rx.reset();
        self.qmf_swb_syn.reset();
        self.plc.reset();
        self.bwe.reset();
        self.avq.buf_reset();
        self.sattenu = MAX_16;
        self.bit_switch_flag = 0;
        self.prev_ploss = false;
        debug!("decoder session reset");
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: "G722",
            mode: self.mode,
            sample_rate: self.output_rate().hz(),
            bitrate: self.mode.bitrate(),
            frame_size: self.output_rate().frame_samples(),
            frame_bytes: self.mode.frame_bytes(),
        }
    }
}

