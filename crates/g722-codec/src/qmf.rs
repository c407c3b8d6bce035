//! Quadrature mirror filter banks.
//!
//! 24-tap bank for the wideband core (16 kHz <-> 8+8 kHz) and a 32-tap bank
//! for the super-wideband split (32 kHz <-> 16+16 kHz). Analysis followed by
//! synthesis is a pure delay of `ntap - 2` input samples.

use crate::basicop::{add, saturate, sub, Word16};

/// Wideband analysis/synthesis taps (doubled reference values, symmetric).
pub const QMF_TAPS_WB: [Word16; 24] = [
    6, -22, -22, 106, 24, -312, 64, 724, -420, -1610, 1902, 7752, 7752, 1902, -1610, -420, 724,
    64, -312, 24, 106, -22, -22, 6,
];

/// Super-wideband bank taps, same Q format and DC gain as the WB bank.
pub const QMF_TAPS_SWB: [Word16; 32] = [
    12, -28, -9, 53, 34, -153, -14, 305, -70, -516, 246, 862, -642, -1634, 2105, 7643, 7643,
    2105, -1634, -642, 862, 246, -516, -70, 305, -14, -153, 34, 53, -9, -28, 12,
];

/// Per-pair polyphase accumulation over the delay line.
fn accumulate(delay: &[Word16], taps: &'static [Word16]) -> (i64, i64) {
    let mut acc_a = 0i64;
    let mut acc_b = 0i64;
    for i in 0..taps.len() / 2 {
        acc_a += delay[i * 2] as i64 * taps[i * 2] as i64;
        acc_b += delay[i * 2 + 1] as i64 * taps[i * 2 + 1] as i64;
    }
    (acc_a, acc_b)
}

fn shift_in(delay: &mut [Word16], s0: Word16, s1: Word16) {
    let n = delay.len();
    for i in (2..n).rev() {
        delay[i] = delay[i - 2];
    }
    delay[0] = s0;
    delay[1] = s1;
}

/// Analysis bank: splits pairs of input samples into (low, high) pairs.
#[derive(Debug, Clone)]
pub struct QmfAnalysis {
    taps: &'static [Word16],
    delay: Vec<Word16>,
}

impl QmfAnalysis {
    /// 24-tap wideband bank.
    pub fn new_wb() -> Self {
        Self {
            taps: &QMF_TAPS_WB,
            delay: vec![0; QMF_TAPS_WB.len()],
        }
    }

    /// 32-tap super-wideband bank.
    pub fn new_swb() -> Self {
        Self {
            taps: &QMF_TAPS_SWB,
            delay: vec![0; QMF_TAPS_SWB.len()],
        }
    }

    /// Zero the delay line.
    pub fn reset(&mut self) {
        self.delay.fill(0);
    }

    /// One step: two input samples in, one (low, high) pair out.
    pub fn step(&mut self, x0: Word16, x1: Word16) -> (Word16, Word16) {
        shift_in(&mut self.delay, x0, x1);
        let (acc_a, acc_b) = accumulate(&self.delay, self.taps);
        let low = saturate((((acc_a + acc_b) * 2) >> 16) as i32);
        let high = saturate((((acc_a - acc_b) * 2) >> 16) as i32);
        (low, high)
    }

    /// Warm the delay line from history samples, discarding the outputs.
    pub fn prime(&mut self, hist: &[Word16]) {
        debug_assert_eq!(hist.len() % 2, 0);
        for pair in hist.chunks_exact(2) {
            let _ = self.step(pair[0], pair[1]);
        }
    }

    /// Split a frame; `input.len()` must be `2 * low.len()` and
    /// `low.len() == high.len()`.
    pub fn process(&mut self, input: &[Word16], low: &mut [Word16], high: &mut [Word16]) {
        debug_assert_eq!(input.len(), 2 * low.len());
        debug_assert_eq!(low.len(), high.len());
        for (i, pair) in input.chunks_exact(2).enumerate() {
            let (l, h) = self.step(pair[0], pair[1]);
            low[i] = l;
            high[i] = h;
        }
    }
}

/// Synthesis bank: merges (low, high) pairs back into pairs of samples.
#[derive(Debug, Clone)]
pub struct QmfSynthesis {
    taps: &'static [Word16],
    delay: Vec<Word16>,
}

impl QmfSynthesis {
    /// 24-tap wideband bank.
    pub fn new_wb() -> Self {
        Self {
            taps: &QMF_TAPS_WB,
            delay: vec![0; QMF_TAPS_WB.len()],
        }
    }

    /// 32-tap super-wideband bank.
    pub fn new_swb() -> Self {
        Self {
            taps: &QMF_TAPS_SWB,
            delay: vec![0; QMF_TAPS_SWB.len()],
        }
    }

    /// Zero the delay line.
    pub fn reset(&mut self) {
        self.delay.fill(0);
    }

    /// One step: one (low, high) pair in, two output samples out.
    pub fn step(&mut self, rl: Word16, rh: Word16) -> (Word16, Word16) {
        shift_in(&mut self.delay, sub(rl, rh), add(rl, rh));
        let (acc_a, acc_b) = accumulate(&self.delay, self.taps);
        // odd phase leads: the pair interleaves as (odd, even)
        let x0 = saturate((acc_b >> 12) as i32);
        let x1 = saturate((acc_a >> 12) as i32);
        (x0, x1)
    }

    /// Merge a frame; `out.len()` must be `2 * low.len()`.
    pub fn process(&mut self, low: &[Word16], high: &[Word16], out: &mut [Word16]) {
        debug_assert_eq!(out.len(), 2 * low.len());
        debug_assert_eq!(low.len(), high.len());
        for i in 0..low.len() {
            let (x0, x1) = self.step(low[i], high[i]);
            out[2 * i] = x0;
            out[2 * i + 1] = x1;
        }
    }

    /// Rebuild the delay line from band histories, newest sample last.
    ///
    /// The packet-loss path uses this after re-phasing so the filter memory
    /// matches the phase chosen for the first good frame.
    pub fn refill(&mut self, low_hist: &[Word16], high_hist: &[Word16]) {
        let pairs = self.taps.len() / 2;
        debug_assert!(low_hist.len() >= pairs && high_hist.len() >= pairs);
        self.delay.fill(0);
        // most recent pair lands at the head of the delay line
        for k in 0..pairs {
            let rl = low_hist[low_hist.len() - 1 - k];
            let rh = high_hist[high_hist.len() - 1 - k];
            self.delay[2 * k] = sub(rl, rh);
            self.delay[2 * k + 1] = add(rl, rh);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taps_symmetric() {
        for (i, &t) in QMF_TAPS_WB.iter().enumerate() {
            assert_eq!(t, QMF_TAPS_WB[QMF_TAPS_WB.len() - 1 - i]);
        }
        for (i, &t) in QMF_TAPS_SWB.iter().enumerate() {
            assert_eq!(t, QMF_TAPS_SWB[QMF_TAPS_SWB.len() - 1 - i]);
        }
    }

    #[test]
    fn test_analysis_delay_line_shift() {
        let mut ana = QmfAnalysis::new_wb();
        let _ = ana.step(100, 200);
        let _ = ana.step(300, 400);
        assert_eq!(ana.delay[0], 300);
        assert_eq!(ana.delay[1], 400);
        assert_eq!(ana.delay[2], 100);
        assert_eq!(ana.delay[3], 200);
    }

    #[test]
    fn test_dc_split() {
        // a DC input must end up almost entirely in the low band
        let mut ana = QmfAnalysis::new_wb();
        let input = [4096i16; 240];
        let mut low = [0i16; 120];
        let mut high = [0i16; 120];
        ana.process(&input, &mut low, &mut high);
        // past the filter warm-up the high band is tiny; the analysis DC
        // gain into the low band is 1/2 (the synthesis restores it)
        for n in 40..120 {
            assert!(high[n].abs() <= 8, "high[{}]={}", n, high[n]);
            assert!((low[n] - 2048).abs() < 128, "low[{}]={}", n, low[n]);
        }
    }

    #[test]
    fn test_reconstruction_delay() {
        // analysis + synthesis reproduces the input at ntap-2 samples delay
        let mut ana = QmfAnalysis::new_wb();
        let mut syn = QmfSynthesis::new_wb();
        let mut input = [0i16; 640];
        for (n, v) in input.iter_mut().enumerate() {
            // mid-band tone, comfortably inside both bands
            *v = (6000.0 * f64::sin(2.0 * std::f64::consts::PI * n as f64 / 23.0)) as i16;
        }
        let mut low = [0i16; 320];
        let mut high = [0i16; 320];
        let mut out = [0i16; 640];
        ana.process(&input, &mut low, &mut high);
        syn.process(&low, &high, &mut out);

        let delay = QMF_TAPS_WB.len() - 2;
        let mut err_energy = 0i64;
        let mut sig_energy = 0i64;
        for n in 100..600 {
            let e = (out[n] - input[n - delay]) as i64;
            err_energy += e * e;
            sig_energy += input[n - delay] as i64 * input[n - delay] as i64;
        }
        assert!(
            err_energy * 1000 < sig_energy,
            "reconstruction error too large: {} vs {}",
            err_energy,
            sig_energy
        );
    }

    #[test]
    fn test_refill_matches_streamed_state() {
        // refilling from histories must equal having streamed those pairs
        let mut streamed = QmfSynthesis::new_wb();
        let mut low_hist = Vec::new();
        let mut high_hist = Vec::new();
        for n in 0..40i16 {
            let rl = n * 131;
            let rh = n * -57;
            let _ = streamed.step(rl, rh);
            low_hist.push(rl);
            high_hist.push(rh);
        }
        let mut refilled = QmfSynthesis::new_wb();
        refilled.refill(&low_hist, &high_hist);
        assert_eq!(streamed.delay, refilled.delay);
    }
}
