//! # G.722 third-edition codec family
//!
//! Bit-exact fixed-point implementation of the ITU-T G.722 wideband codec
//! with the Annex B super-wideband scalable layers and the Appendix III
//! wideband packet-loss concealment.
//!
//! ## Features
//!
//! - **Wideband core**: QMF band split plus sub-band ADPCM (6-bit low band,
//!   2-bit high band) at 48/56/64 kbit/s with layered, truncatable framing
//! - **Super-wideband layers**: MDCT-domain bandwidth extension plus RE8
//!   algebraic VQ enhancement at 64/80/96 kbit/s
//! - **Packet-loss concealment**: LPC and pitch driven extrapolation,
//!   ADPCM state re-convergence, re-phasing and time-warping of the first
//!   good frame
//!
//! ## Usage
//!
//! ```rust
//! use g722_codec::{Decoder, Encoder, FrameDecoder, FrameEncoder};
//!
//! // R1wm: wideband at 64 kbit/s
//! let mut enc = Encoder::new(16000, 2)?;
//! let mut dec = Decoder::new(2)?;
//!
//! let samples = vec![0i16; 80]; // one 5-ms frame at 16 kHz
//! let mut payload = [0u8; 40];
//! let n = enc.encode(&samples, &mut payload)?;
//!
//! let mut out = [0i16; 80];
//! dec.decode(&payload[..n], &mut out, false)?;
//! # Ok::<(), g722_codec::CodecError>(())
//! ```
//!
//! Packet loss is signalled per frame through the `ploss` flag; the decoder
//! conceals the frame and re-converges on the next good one:
//!
//! ```rust
//! # use g722_codec::{Decoder, FrameDecoder};
//! # let mut dec = Decoder::new(2)?;
//! let mut out = [0i16; 80];
//! dec.decode(&[], &mut out, true)?; // erased frame, payload ignored
//! # Ok::<(), g722_codec::CodecError>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_range_loop)]

pub mod avq;
pub mod basicop;
pub mod bitstream;
pub mod bwe;
pub mod error;
pub mod g722;
pub mod plc;
pub mod qmf;
pub mod session;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use error::{CodecError, Result};
pub use session::decoder::PlcDiagnostics;
pub use session::{Decoder, Encoder};
pub use types::{CodecConfig, CodecInfo, FrameDecoder, FrameEncoder, Mode, SampleRate};

/// Version information for the codec library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the codec library.
///
/// Installs a default tracing subscriber if none is set. Safe to call
/// multiple times; all codec state is per-session, so this is purely a
/// logging convenience.
pub fn init() {
    let _ = tracing_subscriber::fmt::try_init();
    tracing::info!("g722-codec v{} initialized", VERSION);
}
