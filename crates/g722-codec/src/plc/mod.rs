//! Wideband packet-loss concealment.
//!
//! Wraps the G.722 decoder state: on good frames it maintains LPC, pitch and
//! signal history; on erased frames it extrapolates speech, keeps the ADPCM
//! predictors converged on the extrapolated bands, and on the first good
//! frame re-phases and time-warps the decoder back onto the encoder's clock.

pub mod extrap;
pub mod lpc;
pub mod pitch;
pub mod reconverge;
pub mod rephase;
pub mod state;

pub use state::PlcState;

/// Wideband samples per 5-ms frame.
pub const FRSZ: usize = 80;
/// LPC order.
pub const LPC_ORDER: usize = 8;
/// LPC analysis window length.
pub const LPC_WIN: usize = 160;
/// Maximum re-phasing offset in 16-kHz samples.
pub const MAXOS: usize = 24;
/// Overlap-add length between filter ringing and periodic extrapolation.
pub const OLAL: usize = 20;
/// Minimum pitch lag at 16 kHz.
pub const MINPP: usize = 40;
/// Maximum pitch lag at 16 kHz.
pub const MAXPP: usize = 264;
/// Offset of the current frame inside the output history ring.
pub const XQOFF: usize = 272;
/// Nominal history length (history up to and including the current frame).
pub const LXQ: usize = XQOFF + FRSZ;
/// Full history ring length: extrapolation writes `FRSZ + 24 + MAXOS`.
pub const XQ_LEN: usize = LXQ + 24 + MAXOS;
/// Samples the extrapolation produces beyond the frame (QMF warm-up plus
/// the re-phasing search span).
pub const XTEND: usize = FRSZ + 24 + MAXOS;

/// Decimation factor of the coarse-pitch domain.
pub const DECF: usize = 8;
/// Decimated frame length.
pub const FRSZD: usize = FRSZ / DECF;
/// Coarse-pitch correlation window, decimated samples.
pub const WSZD: usize = 15;
/// Decimated lag search range.
pub const M1: usize = MINPP / DECF;
/// Decimated lag search limit (exclusive).
pub const M2: usize = MAXPP / DECF;
/// Decimated-history ring length.
pub const XWD_LEN: usize = M2 + WSZD + FRSZD;
/// Decimation filter length.
pub const DFM_LEN: usize = 60;
/// Half decimation span for the quadratic peak refinement.
pub const HDECF: usize = DECF / 2;

/// First frame of the gain-attenuation window (erasure count).
pub const GATTST: u32 = 2;
/// Erasure count after which the output is muted.
pub const GATTEND: u32 = 6;
/// Lower merit gate: pure periodic extrapolation above `256 * MLO`.
pub const MLO: i32 = 20;
/// Upper merit gate: pure noise below; blend in between.
pub const MHI: i32 = 28;
/// Good-frame counter saturation.
pub const NGFAE_MAX: u32 = 9;

/// Leading good-frame samples discarded by the time-warp (ADPCM adaptation
/// transients).
pub const MIN_UNSTBL: usize = 16;
/// Re-phasing refinement search span.
pub const RSR: usize = 4;
/// Re-phasing correlation window length.
pub const LSW: usize = 20;
/// Sentinel: do not re-phase.
pub const LAG_NONE: i32 = -100;

/// `nbph` stationarity thresholds selecting the first-good-frame tracking
/// mode (LP-filtered / unfiltered / frozen).
pub const NBPH_TH1: i16 = 819;
/// Upper `nbph` threshold.
pub const NBPH_TH2: i16 = 1311;
