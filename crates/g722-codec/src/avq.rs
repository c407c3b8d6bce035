//! Algebraic vector quantisation on the RE8 lattice.
//!
//! RE8 = 2D8 u (2D8 + (1,..,1)): even-coordinate vectors with sum divisible
//! by four, and their all-odd translates. [`re8_ppv`] finds the nearest
//! lattice point with the Conway-Sloane construction; the layer-1/layer-2
//! coders wrap it with sub-band gain normalisation, a scaling extension for
//! targets outside the base codebook radius, and fixed-rate index packing.

use crate::basicop::*;
use crate::bitstream::{BitReader, BitWriter};

/// MDCT bins refined per enhancement layer (two 8-dim subvectors).
pub const AVQ_BINS_PER_LAYER: usize = 16;
/// Payload bits per 8-dim subvector: 2 scale + 1 parity + 8 x 2 coords + pad.
pub const AVQ_BITS_PER_SUBVECTOR: u32 = 20;

/// Nearest point of `x` in 2D8: round to even, then repair the modulo-4
/// sum constraint on the coordinate with the largest rounding error.
fn nearest_2d8(x: &[Word32; 8]) -> [Word32; 8] {
    let mut y = [0i32; 8];
    let mut sum = 0i32;
    for i in 0..8 {
        // nearest even integer, ties toward +infinity
        let q = (x[i] + 2) >> 2 << 1; // x is in Q1 here: see re8_ppv
        y[i] = q;
        sum += q;
    }
    if sum & 3 != 0 {
        // flip the rounding of the worst coordinate by one even step
        let mut j = 0;
        let mut worst = -1i32;
        for i in 0..8 {
            let err = (x[i] - (y[i] << 1)).abs();
            if err > worst {
                worst = err;
                j = i;
            }
        }
        if x[j] >= y[j] << 1 {
            y[j] += 2;
        } else {
            y[j] -= 2;
        }
    }
    y
}

/// Squared error between the Q1 target and a lattice point, accumulated
/// through the 16-bit partials.
fn lattice_err(x: &[Word32; 8], y: &[Word32; 8]) -> Word32 {
    let mut acc: Word32 = 0;
    for i in 0..8 {
        let d = saturate(x[i] - (y[i] << 1));
        acc = l_mac0(acc, d, d);
    }
    acc
}

/// Nearest RE8 point to `x`.
///
/// `x` carries plain integer coordinates in Q1 (one fractional bit), which
/// is how the gain-normalised MDCT residuals arrive. The output point is in
/// Q0.
pub fn re8_ppv(x: &[Word32; 8]) -> [Word32; 8] {
    // branch 1: 2D8
    let y0 = nearest_2d8(x);

    // branch 2: 2D8 + (1,..,1), via the shifted target
    let mut xs = [0i32; 8];
    for i in 0..8 {
        xs[i] = x[i] - 2; // subtract 1.0 in Q1
    }
    let mut y1 = nearest_2d8(&xs);
    for v in y1.iter_mut() {
        *v += 1;
    }

    if lattice_err(x, &y0) <= lattice_err(x, &y1) {
        y0
    } else {
        y1
    }
}

/// Check RE8 membership (test hook and debug assertion).
pub fn re8_member(y: &[Word32; 8]) -> bool {
    let all_even = y.iter().all(|v| v & 1 == 0);
    let all_odd = y.iter().all(|v| v & 1 == 1);
    if !(all_even || all_odd) {
        return false;
    }
    let base: i32 = if all_odd {
        y.iter().map(|v| v - 1).sum::<i32>() / 2
    } else {
        y.iter().sum::<i32>() / 2
    };
    // the halved even part must land in D8 scaled by 2: sum divisible by 2
    base % 2 == 0
}

/// One quantised subvector with its scaling extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubvectorCode {
    /// Scaling exponent `r`; the coded point is `2^r * base`.
    pub scale: u8,
    /// Lattice branch: 0 = 2D8, 1 = 2D8 + (1,..,1).
    pub parity: u8,
    /// Clamped base coordinates `w[i] in [-2, 1]`; point = `2*w + parity`.
    pub coords: [i8; 8],
}

impl SubvectorCode {
    /// Reconstruct the lattice point in Q0.
    pub fn point(&self) -> [Word32; 8] {
        let mut y = [0i32; 8];
        for i in 0..8 {
            y[i] = ((2 * self.coords[i] as i32 + self.parity as i32) as Word32) << self.scale;
        }
        y
    }

    /// Write the fixed-rate payload.
    pub fn write(&self, w: &mut BitWriter) {
        w.put(self.scale as u32, 2);
        w.put(self.parity as u32, 1);
        for &c in &self.coords {
            w.put((c + 2) as u32, 2);
        }
        w.put(0, 1); // pad to 20 bits
    }

    /// Read the fixed-rate payload.
    pub fn read(r: &mut BitReader<'_>) -> Self {
        let scale = r.get(2) as u8;
        let parity = r.get(1) as u8;
        let mut coords = [0i8; 8];
        for c in coords.iter_mut() {
            *c = r.get(2) as i8 - 2;
        }
        let _ = r.get(1);
        Self {
            scale,
            parity,
            coords,
        }
    }
}

/// Quantise one 8-dim target (Q1 coordinates) to a coded subvector.
///
/// The scaling exponent grows until the nearest point of the downscaled
/// target fits the base codebook radius, standing in for a full Voronoi
/// extension at the same rate.
pub fn quantise_subvector(x: &[Word32; 8]) -> SubvectorCode {
    let mut best_err = Word32::MAX;
    let mut best = SubvectorCode {
        scale: 0,
        parity: 0,
        coords: [0; 8],
    };
    for scale in 0u8..4 {
        let mut xs = [0i32; 8];
        for i in 0..8 {
            xs[i] = x[i] >> scale;
        }
        let y = re8_ppv(&xs);
        let parity = (y[0] & 1) as u8;
        let mut coords = [0i8; 8];
        let mut clipped = false;
        for i in 0..8 {
            let w = (y[i] - parity as i32) / 2;
            if !(-2..=1).contains(&w) {
                clipped = true;
            }
            coords[i] = w.clamp(-2, 1) as i8;
        }
        let code = SubvectorCode {
            scale,
            parity,
            coords,
        };
        let err = lattice_err(x, &code.point());
        if err < best_err {
            best_err = err;
            best = code;
        }
        if !clipped {
            break; // no need to escalate the scale further
        }
    }
    best
}

/// Per-session enhancement-layer state.
#[derive(Debug, Clone)]
pub struct AvqState {
    /// Previous frame's coding-mode cache.
    pub pre_cod_mode: u8,
    /// Layer-1 quantisation residual carried between frames, Q12.
    pub resid_l1: [Word16; AVQ_BINS_PER_LAYER],
    /// Layer-2 quantisation residual carried between frames, Q12.
    pub resid_l2: [Word16; AVQ_BINS_PER_LAYER],
}

impl AvqState {
    /// Fresh state.
    pub fn new() -> Self {
        Self {
            pre_cod_mode: 0,
            resid_l1: [0; AVQ_BINS_PER_LAYER],
            resid_l2: [0; AVQ_BINS_PER_LAYER],
        }
    }

    /// Clear the enhancement buffers (`bwe_avq_buf_reset`): called on packet
    /// loss so stale refinements never leak into concealed frames.
    pub fn buf_reset(&mut self) {
        self.resid_l1 = [0; AVQ_BINS_PER_LAYER];
        self.resid_l2 = [0; AVQ_BINS_PER_LAYER];
        self.pre_cod_mode = 0;
    }
}

impl Default for AvqState {
    fn default() -> Self {
        Self::new()
    }
}

/// Gain-normalise a residual bin (Q12) into the Q1 lattice domain.
///
/// `gain` is the decoded sub-band envelope gain in Q12; the Q12 factors
/// cancel, leaving the plain ratio with one fractional bit.
fn normalise(resid: Word16, gain: Word16) -> Word32 {
    if gain <= 0 {
        return 0;
    }
    ((resid as Word32) << 1) / gain as Word32
}

/// Denormalise a lattice coordinate (Q0) back to the residual domain (Q12).
fn denormalise(coord: Word32, gain: Word16) -> Word16 {
    saturate(coord.saturating_mul(gain as Word32))
}

/// Encode one enhancement layer: 16 residual bins against their band gains.
///
/// Writes `2 * AVQ_BITS_PER_SUBVECTOR` bits. `gains[k]` applies to bins
/// `8k..8k+8`.
pub fn avq_encode_layer(
    resid: &[Word16; AVQ_BINS_PER_LAYER],
    gains: &[Word16; 2],
    w: &mut BitWriter,
) -> [Word16; AVQ_BINS_PER_LAYER] {
    let mut reconstructed = [0i16; AVQ_BINS_PER_LAYER];
    for sv in 0..2 {
        let mut x = [0i32; 8];
        for i in 0..8 {
            x[i] = normalise(resid[sv * 8 + i], gains[sv]);
        }
        let code = quantise_subvector(&x);
        code.write(w);
        let y = code.point();
        for i in 0..8 {
            reconstructed[sv * 8 + i] = denormalise(y[i], gains[sv]);
        }
    }
    reconstructed
}

/// Decode one enhancement layer into residual-domain corrections.
pub fn avq_decode_layer(
    gains: &[Word16; 2],
    r: &mut BitReader<'_>,
) -> [Word16; AVQ_BINS_PER_LAYER] {
    let mut out = [0i16; AVQ_BINS_PER_LAYER];
    for sv in 0..2 {
        let code = SubvectorCode::read(r);
        let y = code.point();
        for i in 0..8 {
            out[sv * 8 + i] = denormalise(y[i], gains[sv]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ppv_returns_lattice_points() {
        let targets: [[i32; 8]; 4] = [
            [0, 0, 0, 0, 0, 0, 0, 0],
            [3, -3, 5, 1, -1, 7, -5, 2],
            [13, 13, 13, 13, 13, 13, 13, 13],
            [-9, 8, -7, 6, -5, 4, -3, 2],
        ];
        for x in targets {
            let y = re8_ppv(&x);
            assert!(re8_member(&y), "not in RE8: {:?} for {:?}", y, x);
        }
    }

    #[test]
    fn test_ppv_zero_maps_to_origin() {
        assert_eq!(re8_ppv(&[0; 8]), [0; 8]);
    }

    #[test]
    fn test_ppv_exact_lattice_input() {
        // (1,..,1) in Q1 is 2 per coordinate; it is itself an RE8 point
        let x = [2i32; 8];
        assert_eq!(re8_ppv(&x), [1i32; 8]);
        // (2,2,0,..,0): norm 8, in 2D8
        let mut x = [0i32; 8];
        x[0] = 4;
        x[1] = 4;
        let y = re8_ppv(&x);
        assert_eq!(y[0], 2);
        assert_eq!(y[1], 2);
        assert!(y[2..].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_subvector_code_roundtrip() {
        let code = SubvectorCode {
            scale: 2,
            parity: 1,
            coords: [-2, -1, 0, 1, 1, 0, -1, -2],
        };
        let mut w = BitWriter::new(4);
        code.write(&mut w);
        assert_eq!(w.bit_len() as u32, AVQ_BITS_PER_SUBVECTOR);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        assert_eq!(SubvectorCode::read(&mut r), code);
    }

    #[test]
    fn test_layer_roundtrip_through_bits() {
        let mut resid = [0i16; AVQ_BINS_PER_LAYER];
        for (i, v) in resid.iter_mut().enumerate() {
            *v = (i as i16 - 8) * 700;
        }
        let gains = [4096i16, 2048];
        let mut w = BitWriter::new(8);
        let reconstructed = avq_encode_layer(&resid, &gains, &mut w);
        let bytes = w.finish();
        assert_eq!(bytes.len(), 5);
        let mut r = BitReader::new(&bytes);
        let decoded = avq_decode_layer(&gains, &mut r);
        assert_eq!(reconstructed, decoded);
    }

    proptest! {
        #[test]
        fn prop_ppv_nearest_among_neighbours(coords in prop::array::uniform8(-40i32..40)) {
            let y = re8_ppv(&coords);
            prop_assert!(re8_member(&y));
            let err_y = lattice_err(&coords, &y);
            // no lattice point one minimal move away is closer
            for i in 0..8 {
                for j in (i + 1)..8 {
                    for (si, sj) in [(2, 2), (2, -2), (-2, 2), (-2, -2)] {
                        let mut cand = y;
                        cand[i] += si;
                        cand[j] += sj;
                        if re8_member(&cand) {
                            prop_assert!(lattice_err(&coords, &cand) >= err_y);
                        }
                    }
                }
            }
        }

        #[test]
        fn prop_subvector_bits_invertible(coords in prop::array::uniform8(-2i8..=1),
                                          parity in 0u8..=1, scale in 0u8..=3) {
            let code = SubvectorCode { scale, parity, coords };
            let mut w = BitWriter::new(4);
            code.write(&mut w);
            let bytes = w.finish();
            let mut r = BitReader::new(&bytes);
            prop_assert_eq!(SubvectorCode::read(&mut r), code);
        }
    }
}
