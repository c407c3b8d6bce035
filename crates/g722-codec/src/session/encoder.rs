//! Session encoder.

use crate::avq::{avq_encode_layer, AvqState, AVQ_BINS_PER_LAYER};
use crate::basicop::{sub, Word16};
use crate::bitstream::{pack_layered, BitWriter};
use crate::bwe::encoder::BweEncoder;
use crate::bwe::CodMode;
use crate::error::{CodecError, Result};
use crate::g722::adpcm::{hsb_encode, lsb_encode};
use crate::g722::state::G722State;
use crate::g722::wbe::{lsb_encode_enh, WbeMode};
use crate::qmf::QmfAnalysis;
use crate::session::highpass::Highpass;
use crate::session::pack_codeword;
use crate::types::{
    CodecConfig, CodecInfo, FrameEncoder, Mode, SampleRate, L_FRAME_NB, L_FRAME_SWB, L_FRAME_WB,
};
use tracing::debug;

/// Frame-synchronous encoder session.
pub struct Encoder {
    config: CodecConfig,
    hp: Highpass,
    qmf_swb: QmfAnalysis,
    qmf_wb: QmfAnalysis,
    g722: G722State,
    bwe: BweEncoder,
    avq: AvqState,
}

impl Encoder {
    /// Construct an encoder for `(sample_rate, mode)`.
    pub fn new(sample_rate: u32, mode_index: u8) -> Result<Self> {
        let mode =
            Mode::from_index(mode_index).ok_or(CodecError::UnsupportedMode { index: mode_index })?;
        let rate = SampleRate::from_hz(sample_rate).ok_or(CodecError::InvalidSampleRate {
            rate: sample_rate,
            supported: vec![16000, 32000],
        })?;
        let config = CodecConfig::new(mode).with_sample_rate(rate);
        config.validate()?;
        debug!(mode = %mode, rate = sample_rate, "encoder session created");
        Ok(Self {
            config,
            hp: if mode.is_swb() {
                Highpass::new_swb()
            } else {
                Highpass::new_wb()
            },
            qmf_swb: QmfAnalysis::new_swb(),
            qmf_wb: QmfAnalysis::new_wb(),
            g722: G722State::new(),
            bwe: BweEncoder::new(),
            avq: AvqState::new(),
        })
    }

    /// Convenience constructor from a validated config.
    pub fn from_config(config: CodecConfig) -> Result<Self> {
        Self::new(config.sample_rate.hz(), config.mode.index())
    }

    /// Operating mode.
    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// Encode the wideband core: 80 16-kHz samples to 40 codewords, packed
    /// into the layered core segment.
    fn encode_core(&mut self, wb: &[Word16], wbe: WbeMode, out: &mut [u8]) -> [Word16; L_FRAME_NB] {
        let mut lb = [0i16; L_FRAME_NB];
        let mut hb = [0i16; L_FRAME_NB];
        self.qmf_wb.process(wb, &mut lb, &mut hb);

        let mut codes = [0u8; L_FRAME_NB];
        let mut enh = [0i16; L_FRAME_NB];
        let shaping = self.config.mode.g722_mode() == 1;
        for n in 0..L_FRAME_NB {
            let il = if shaping {
                let (il, e) = lsb_encode_enh(lb[n], &mut self.g722.low, wbe);
                enh[n] = e;
                il
            } else {
                lsb_encode(lb[n], &mut self.g722.low)
            };
            let ih = hsb_encode(hb[n], &mut self.g722.high);
            codes[n] = pack_codeword(il, ih);
        }
        let mut layered = [0u8; L_FRAME_NB];
        pack_layered(&codes, &mut layered);
        let core_len = self.config.mode.core_bytes();
        out[..core_len].copy_from_slice(&layered[..core_len]);
        enh
    }
}

impl FrameEncoder for Encoder {
    fn encode(&mut self, samples: &[i16], output: &mut [u8]) -> Result<usize> {
        let mode = self.config.mode;
        let frame_len = self.config.sample_rate.frame_samples();
        if samples.len() != frame_len {
            return Err(CodecError::InvalidFrameSize {
                expected: frame_len,
                actual: samples.len(),
            });
        }
        let nbytes = mode.frame_bytes();
        if output.len() < nbytes {
            return Err(CodecError::BufferTooSmall {
                needed: nbytes,
                actual: output.len(),
            });
        }

        let mut input = vec![0i16; frame_len];
        input.copy_from_slice(samples);
        self.hp.process(&mut input);

        if !mode.is_swb() {
            debug_assert_eq!(frame_len, L_FRAME_WB);
            let _ = self.encode_core(&input, WbeMode::Off, output);
            return Ok(nbytes);
        }

        // SWB: split 32 kHz into the wideband core and the 8-14 kHz band
        debug_assert_eq!(frame_len, L_FRAME_SWB);
        let mut wb = [0i16; L_FRAME_WB];
        let mut shb = [0i16; L_FRAME_WB];
        self.qmf_swb.process(&input, &mut wb, &mut shb);

        // BWE first: the classification gates the core's enhancement bits
        let mut swb0 = BitWriter::new(5);
        let bwe_res = self.bwe.encode(&shb, &mut swb0);
        let wbe = if mode == Mode::R3sm && bwe_res.params.cod_mode != CodMode::Transient {
            WbeMode::OneBit
        } else {
            WbeMode::Off
        };

        let core_len = mode.core_bytes();
        let enh = self.encode_core(&wb, wbe, output);
        let mut cursor = core_len;

        let swb0_bytes = swb0.finish();
        output[cursor..cursor + 5].copy_from_slice(&swb0_bytes);
        cursor += 5;

        if matches!(mode, Mode::R2sm | Mode::R3sm) {
            // AVQ stage 1 refines the first 16 bins
            let gains = bwe_res.params.avq_gains(crate::bwe::decoder::Q_DEC);
            let mut resid = [0i16; AVQ_BINS_PER_LAYER];
            for (k, r) in resid.iter_mut().enumerate() {
                *r = sub(bwe_res.coef[k], bwe_res.recon[k]);
            }
            let mut w1 = BitWriter::new(5);
            let recon1 = avq_encode_layer(&resid, &gains, &mut w1);
            self.avq.resid_l1.copy_from_slice(&recon1);
            output[cursor..cursor + 5].copy_from_slice(&w1.finish());
            cursor += 5;

            if mode == Mode::R3sm {
                // WBE enhancement bits, one per low-band sample
                let mut ww = BitWriter::new(5);
                for &e in enh.iter() {
                    ww.put(e as u32 & 1, 1);
                }
                output[cursor..cursor + 5].copy_from_slice(&ww.finish());
                cursor += 5;

                // AVQ stage 2 refines bins 16..32
                let mut resid2 = [0i16; AVQ_BINS_PER_LAYER];
                for (k, r) in resid2.iter_mut().enumerate() {
                    let bin = AVQ_BINS_PER_LAYER + k;
                    *r = sub(bwe_res.coef[bin], bwe_res.recon[bin]);
                }
                let gains2 = [gains[1], gains[1]];
                let mut w2 = BitWriter::new(5);
                let recon2 = avq_encode_layer(&resid2, &gains2, &mut w2);
                self.avq.resid_l2.copy_from_slice(&recon2);
                output[cursor..cursor + 5].copy_from_slice(&w2.finish());
                cursor += 5;
            }
        }

        debug_assert_eq!(cursor, nbytes);
        Ok(nbytes)
    }

    fn reset(&mut self) {
        self.hp.reset();
        self.qmf_swb.reset();
        self.qmf_wb.reset();
        self.g722.reset();
        self.bwe.reset();
        self.avq.buf_reset();
        debug!("encoder session reset");
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: "G722",
            mode: self.config.mode,
            sample_rate: self.config.sample_rate.hz(),
            bitrate: self.config.mode.bitrate(),
            frame_size: self.config.sample_rate.frame_samples(),
            frame_bytes: self.config.mode.frame_bytes(),
        }
    }
}
