//! Core types and traits for the codec library.
//!
//! Operating modes, sampling rates, session configuration and the
//! frame-codec traits implemented by the session objects.

use crate::error::{CodecError, Result};
use std::fmt;

/// Samples per 5-ms frame at 8 kHz.
pub const L_FRAME_NB: usize = 40;
/// Samples per 5-ms frame at 16 kHz.
pub const L_FRAME_WB: usize = 80;
/// Samples per 5-ms frame at 32 kHz.
pub const L_FRAME_SWB: usize = 160;

/// Operating mode of a session.
///
/// The wideband modes carry the G.722 core alone at three rates; the
/// super-wideband modes stack the Annex B scalable layers on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Wideband, 48 kbit/s (G.722 core truncated to 6 bits/sample).
    R00wm,
    /// Wideband, 56 kbit/s.
    R0wm,
    /// Wideband, 64 kbit/s.
    R1wm,
    /// Super-wideband, 64 kbit/s (56-k core + BWE layer).
    R1sm,
    /// Super-wideband, 80 kbit/s (64-k core + BWE + AVQ stage 1).
    R2sm,
    /// Super-wideband, 96 kbit/s (adds WBE and AVQ stage 2).
    R3sm,
}

impl Mode {
    /// All modes, index order matching the on-the-wire mode numbers 0..5.
    pub const ALL: [Mode; 6] = [
        Mode::R00wm,
        Mode::R0wm,
        Mode::R1wm,
        Mode::R1sm,
        Mode::R2sm,
        Mode::R3sm,
    ];

    /// Mode from its wire index.
    pub fn from_index(index: u8) -> Option<Mode> {
        Self::ALL.get(index as usize).copied()
    }

    /// Wire index of this mode.
    pub fn index(self) -> u8 {
        Self::ALL.iter().position(|&m| m == self).unwrap() as u8
    }

    /// Total bitstream bytes per 5-ms frame.
    pub fn frame_bytes(self) -> usize {
        match self {
            Mode::R00wm => 30,
            Mode::R0wm => 35,
            Mode::R1wm | Mode::R1sm => 40,
            Mode::R2sm => 50,
            Mode::R3sm => 60,
        }
    }

    /// Bytes of the layered G.722 core segment inside the frame.
    pub fn core_bytes(self) -> usize {
        match self {
            Mode::R00wm => 30,
            Mode::R0wm | Mode::R1sm => 35,
            Mode::R1wm | Mode::R2sm | Mode::R3sm => 40,
        }
    }

    /// G.722 core mode number: 1 = 64 kbit/s, 2 = 56, 3 = 48.
    pub fn g722_mode(self) -> i16 {
        match self {
            Mode::R00wm => 3,
            Mode::R0wm | Mode::R1sm => 2,
            Mode::R1wm | Mode::R2sm | Mode::R3sm => 1,
        }
    }

    /// Whether the super-wideband layers are present.
    pub fn is_swb(self) -> bool {
        matches!(self, Mode::R1sm | Mode::R2sm | Mode::R3sm)
    }

    /// Bitrate in bits per second (200 frames of 5 ms per second).
    pub fn bitrate(self) -> u32 {
        (self.frame_bytes() * 8 * 200) as u32
    }

    /// Name used in logs and codec info.
    pub fn name(self) -> &'static str {
        match self {
            Mode::R00wm => "R00wm",
            Mode::R0wm => "R0wm",
            Mode::R1wm => "R1wm",
            Mode::R1sm => "R1sm",
            Mode::R2sm => "R2sm",
            Mode::R3sm => "R3sm",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Input/output sampling rate of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleRate {
    /// 16 kHz (wideband).
    Rate16000,
    /// 32 kHz (super-wideband).
    Rate32000,
}

impl SampleRate {
    /// Rate in Hz.
    pub fn hz(self) -> u32 {
        match self {
            Self::Rate16000 => 16000,
            Self::Rate32000 => 32000,
        }
    }

    /// Rate from Hz.
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            16000 => Some(Self::Rate16000),
            32000 => Some(Self::Rate32000),
            _ => None,
        }
    }

    /// Samples in one 5-ms frame at this rate.
    pub fn frame_samples(self) -> usize {
        match self {
            Self::Rate16000 => L_FRAME_WB,
            Self::Rate32000 => L_FRAME_SWB,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Copy)]
pub struct CodecConfig {
    /// Operating mode.
    pub mode: Mode,
    /// Input (encoder) sampling rate.
    pub sample_rate: SampleRate,
}

impl CodecConfig {
    /// New configuration with the rate matching the mode family.
    pub fn new(mode: Mode) -> Self {
        let sample_rate = if mode.is_swb() {
            SampleRate::Rate32000
        } else {
            SampleRate::Rate16000
        };
        Self { mode, sample_rate }
    }

    /// Override the sampling rate.
    pub fn with_sample_rate(mut self, sample_rate: SampleRate) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Check mode/rate consistency.
    pub fn validate(&self) -> Result<()> {
        let needed = if self.mode.is_swb() {
            SampleRate::Rate32000
        } else {
            SampleRate::Rate16000
        };
        if self.sample_rate != needed {
            return Err(CodecError::InvalidSampleRate {
                rate: self.sample_rate.hz(),
                supported: vec![needed.hz()],
            });
        }
        Ok(())
    }
}

/// Codec information snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    /// Codec name.
    pub name: &'static str,
    /// Operating mode.
    pub mode: Mode,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bitrate in bits per second.
    pub bitrate: u32,
    /// Frame size in samples.
    pub frame_size: usize,
    /// Frame size in bitstream bytes.
    pub frame_bytes: usize,
}

/// Frame-synchronous encoder seam.
pub trait FrameEncoder: Send {
    /// Encode exactly one 5-ms frame into `output`, returning the byte count.
    fn encode(&mut self, samples: &[i16], output: &mut [u8]) -> Result<usize>;

    /// Reset all codec state to stream start.
    fn reset(&mut self);

    /// Codec information.
    fn info(&self) -> CodecInfo;
}

/// Frame-synchronous decoder seam.
pub trait FrameDecoder: Send {
    /// Decode one 5-ms frame. `ploss` marks the frame as erased; the
    /// bitstream contents are ignored in that case.
    fn decode(&mut self, bitstream: &[u8], output: &mut [i16], ploss: bool) -> Result<usize>;

    /// Reset all codec state to stream start.
    fn reset(&mut self);

    /// Codec information.
    fn info(&self) -> CodecInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_table() {
        assert_eq!(Mode::R00wm.frame_bytes(), 30);
        assert_eq!(Mode::R0wm.frame_bytes(), 35);
        assert_eq!(Mode::R1wm.frame_bytes(), 40);
        assert_eq!(Mode::R1sm.frame_bytes(), 40);
        assert_eq!(Mode::R2sm.frame_bytes(), 50);
        assert_eq!(Mode::R3sm.frame_bytes(), 60);

        assert_eq!(Mode::R1wm.bitrate(), 64000);
        assert_eq!(Mode::R2sm.bitrate(), 80000);
        assert_eq!(Mode::R3sm.bitrate(), 96000);
    }

    #[test]
    fn test_mode_roundtrip_index() {
        for (i, &m) in Mode::ALL.iter().enumerate() {
            assert_eq!(Mode::from_index(i as u8), Some(m));
            assert_eq!(m.index(), i as u8);
        }
        assert_eq!(Mode::from_index(6), None);
    }

    #[test]
    fn test_core_layout_consistency() {
        // the core plus the SWB layers must add up to the frame size
        assert_eq!(Mode::R1sm.core_bytes() + 5, Mode::R1sm.frame_bytes());
        assert_eq!(Mode::R2sm.core_bytes() + 10, Mode::R2sm.frame_bytes());
        assert_eq!(
            Mode::R3sm.core_bytes() + 10 + 5 + 5,
            Mode::R3sm.frame_bytes()
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(CodecConfig::new(Mode::R1wm).validate().is_ok());
        assert!(CodecConfig::new(Mode::R3sm).validate().is_ok());
        let bad = CodecConfig::new(Mode::R1wm).with_sample_rate(SampleRate::Rate32000);
        assert!(bad.validate().is_err());
    }
}
