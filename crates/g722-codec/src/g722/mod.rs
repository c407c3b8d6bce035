//! G.722 sub-band ADPCM core.
//!
//! Low band (0-4 kHz): 6-bit log quantiser over an 8-tap pole/zero
//! predictor; high band (4-8 kHz): 2-bit quantiser over the same predictor
//! form. The optional wideband enhancement layer refines the low band in the
//! SWB modes.

pub mod adpcm;
pub mod state;
pub mod tables;
pub mod wbe;

pub use adpcm::{hsb_decode, hsb_encode, lsb_decode, lsb_encode};
pub use state::{G722State, SubBandState};
pub use wbe::WbeMode;
