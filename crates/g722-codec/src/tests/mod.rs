//! End-to-end session tests: clean coding, layered truncation, packet-loss
//! concealment and runtime mode switching.

use crate::bitstream::G192Frame;
use crate::session::decoder::PlcDiagnostics;
use crate::types::{FrameDecoder, FrameEncoder};
use crate::{Decoder, Encoder, Mode};

fn speechish(frames: usize, samples_per_frame: usize) -> Vec<Vec<i16>> {
    // voiced-like test signal: a pitch pulse train through a slow envelope
    let mut out = Vec::new();
    let mut t = 0usize;
    for _ in 0..frames {
        let mut f = vec![0i16; samples_per_frame];
        for s in f.iter_mut() {
            let pitch = 80.0;
            let ph = (t as f64) % pitch / pitch;
            let env = 0.6 + 0.4 * f64::sin(2.0 * std::f64::consts::PI * t as f64 / 1600.0);
            let v = (f64::sin(2.0 * std::f64::consts::PI * ph) * 0.7
                + f64::sin(4.0 * std::f64::consts::PI * ph) * 0.3)
                * env
                * 9000.0;
            *s = v as i16;
            t += 1;
        }
        out.push(f);
    }
    out
}

fn energy(x: &[i16]) -> i64 {
    x.iter().map(|&s| s as i64 * s as i64).sum()
}

#[test]
fn test_r1wm_clean_roundtrip() {
    let mut enc = Encoder::new(16000, 2).unwrap();
    let mut dec = Decoder::new(2).unwrap();
    let frames = speechish(40, 80);
    let mut out = [0i16; 80];
    let mut in_energy = 0i64;
    let mut out_energy = 0i64;
    for (i, f) in frames.iter().enumerate() {
        let mut payload = [0u8; 40];
        let n = enc.encode(f, &mut payload).unwrap();
        assert_eq!(n, 40);
        let m = dec.decode(&payload, &mut out, false).unwrap();
        assert_eq!(m, 80);
        if i >= 4 {
            in_energy += energy(f);
            out_energy += energy(&out);
        }
    }
    // the decoded energy must be in the same ballpark as the input
    assert!(out_energy > in_energy / 8, "decoded too quiet");
    assert!(out_energy < in_energy * 8, "decoded too loud");
}

#[test]
fn test_decoders_are_deterministic() {
    // two decoders fed identical inputs produce byte-identical outputs
    let mut enc = Encoder::new(16000, 2).unwrap();
    let mut dec_a = Decoder::new(2).unwrap();
    let mut dec_b = Decoder::new(2).unwrap();
    let frames = speechish(20, 80);
    for (i, f) in frames.iter().enumerate() {
        let mut payload = [0u8; 40];
        enc.encode(f, &mut payload).unwrap();
        let erased = i % 7 == 3;
        let mut out_a = [0i16; 80];
        let mut out_b = [0i16; 80];
        dec_a.decode(&payload, &mut out_a, erased).unwrap();
        dec_b.decode(&payload, &mut out_b, erased).unwrap();
        assert_eq!(out_a, out_b, "frame {}", i);
    }
}

#[test]
fn test_truncation_matches_native_lower_rate() {
    // decoding the 30-byte prefix of an R1wm stream as R00wm equals
    // decoding a native R00wm stream: the shared planes are identical
    let mut enc_full = Encoder::new(16000, 2).unwrap();
    let mut enc_48 = Encoder::new(16000, 0).unwrap();
    let mut dec_trunc = Decoder::new(0).unwrap();
    let mut dec_native = Decoder::new(0).unwrap();
    let frames = speechish(25, 80);
    for (i, f) in frames.iter().enumerate() {
        let mut full = [0u8; 40];
        let mut native = [0u8; 30];
        enc_full.encode(f, &mut full).unwrap();
        enc_48.encode(f, &mut native).unwrap();
        assert_eq!(&full[..30], &native[..], "prefix differs at frame {}", i);

        let mut out_a = [0i16; 80];
        let mut out_b = [0i16; 80];
        dec_trunc.decode(&full[..30], &mut out_a, false).unwrap();
        dec_native.decode(&native, &mut out_b, false).unwrap();
        assert_eq!(out_a, out_b, "decode differs at frame {}", i);
    }
}

#[test]
fn test_r0wm_prefix_decode() {
    // 35-byte prefix decodes as R0wm without error and at sane level
    let mut enc = Encoder::new(16000, 2).unwrap();
    let mut dec = Decoder::new(1).unwrap();
    let frames = speechish(20, 80);
    let mut out = [0i16; 80];
    for f in &frames {
        let mut full = [0u8; 40];
        enc.encode(f, &mut full).unwrap();
        dec.decode(&full[..35], &mut out, false).unwrap();
    }
    assert!(energy(&out) > 0);
}

#[test]
fn test_swb_modes_roundtrip() {
    for (idx, bytes) in [(3u8, 40usize), (4, 50), (5, 60)] {
        let mut enc = Encoder::new(32000, idx).unwrap();
        let mut dec = Decoder::new(idx).unwrap();
        let frames = speechish(24, 160);
        let mut out = [0i16; 160];
        for f in &frames {
            let mut payload = [0u8; 64];
            let n = enc.encode(f, &mut payload).unwrap();
            assert_eq!(n, bytes);
            let m = dec.decode(&payload[..n], &mut out, false).unwrap();
            assert_eq!(m, 160);
        }
        assert!(energy(&out) > 0, "mode {} silent", idx);
    }
}

#[test]
fn test_plc_single_loss_recovers() {
    let mut enc = Encoder::new(16000, 2).unwrap();
    let mut dec = Decoder::new(2).unwrap();
    let frames = speechish(40, 80);
    let mut out = [0i16; 80];
    let mut conceal_energy = 0i64;
    for (i, f) in frames.iter().enumerate() {
        let mut payload = [0u8; 40];
        enc.encode(f, &mut payload).unwrap();
        let erased = i == 20;
        dec.decode(&payload, &mut out, erased).unwrap();
        if erased {
            conceal_energy = energy(&out);
            let d: PlcDiagnostics = dec.plc_diagnostics();
            assert_eq!(d.cfecount, 1);
            assert_eq!(d.ngfae, 0);
        }
        if i == 21 {
            let d = dec.plc_diagnostics();
            assert_eq!(d.ngfae, 1, "good-frame counter must restart");
        }
    }
    // the concealed frame must carry signal, not silence
    assert!(conceal_energy > 0, "concealment produced silence");
    let d = dec.plc_diagnostics();
    assert_eq!(d.cfecount, 0);
    assert_eq!(d.ngfae, 9, "counter must saturate after recovery");
}

#[test]
fn test_plc_burst_mutes_then_recovers() {
    let mut enc = Encoder::new(16000, 2).unwrap();
    let mut dec = Decoder::new(2).unwrap();
    let frames = speechish(60, 80);
    let mut out = [0i16; 80];
    for (i, f) in frames.iter().enumerate() {
        let mut payload = [0u8; 40];
        enc.encode(f, &mut payload).unwrap();
        let erased = (20..32).contains(&i);
        dec.decode(&payload, &mut out, erased).unwrap();
        if i == 31 {
            // deep in the burst the attenuation window has muted the output
            assert_eq!(energy(&out), 0, "long burst must mute");
        }
    }
    // after recovery the decoder produces audio again
    assert!(energy(&out) > 0);
}

#[test]
fn test_plc_swb_loss_clears_enhancement() {
    let mut enc = Encoder::new(32000, 4).unwrap();
    let mut dec = Decoder::new(4).unwrap();
    let frames = speechish(20, 160);
    let mut out = [0i16; 160];
    for (i, f) in frames.iter().enumerate() {
        let mut payload = [0u8; 50];
        enc.encode(f, &mut payload).unwrap();
        dec.decode(&payload, &mut out, i == 10).unwrap();
    }
    assert!(energy(&out) > 0);
}

#[test]
fn test_mode_switch_forces_swb_output() {
    let mut enc_swb = Encoder::new(32000, 4).unwrap();
    let mut enc_wb = Encoder::new(16000, 1).unwrap();
    let mut dec = Decoder::new(4).unwrap();
    let frames_swb = speechish(10, 160);
    let frames_wb = speechish(10, 80);
    let mut out = [0i16; 160];
    for f in &frames_swb {
        let mut payload = [0u8; 50];
        enc_swb.encode(f, &mut payload).unwrap();
        let n = dec.decode(&payload, &mut out, false).unwrap();
        assert_eq!(n, 160);
    }
    dec.set_mode(1).unwrap();
    for (i, f) in frames_wb.iter().enumerate() {
        let mut payload = [0u8; 35];
        enc_wb.encode(f, &mut payload).unwrap();
        let n = dec.decode(&payload, &mut out, false).unwrap();
        // output stays at 32 kHz after the runtime switch
        assert_eq!(n, 160, "frame {}", i);
    }
}

#[test]
fn test_malformed_payload_leaves_state_unchanged() {
    let mut enc = Encoder::new(16000, 2).unwrap();
    let mut dec = Decoder::new(2).unwrap();
    let frames = speechish(6, 80);
    let mut payloads = Vec::new();
    for f in &frames {
        let mut p = [0u8; 40];
        enc.encode(f, &mut p).unwrap();
        payloads.push(p);
    }
    let mut reference = Decoder::new(2).unwrap();
    let mut out_a = [0i16; 80];
    let mut out_b = [0i16; 80];
    for (i, p) in payloads.iter().enumerate() {
        if i == 3 {
            // short frame is rejected without touching the state
            assert!(dec.decode(&p[..17], &mut out_a, false).is_err());
        }
        dec.decode(p, &mut out_a, false).unwrap();
        reference.decode(p, &mut out_b, false).unwrap();
        assert_eq!(out_a, out_b, "frame {}", i);
    }
}

#[test]
fn test_g192_transport_roundtrip() {
    let mut enc = Encoder::new(16000, 2).unwrap();
    let frames = speechish(5, 80);
    for f in &frames {
        let mut payload = [0u8; 40];
        enc.encode(f, &mut payload).unwrap();
        let g192 = G192Frame::from_bytes(&payload);
        assert!(g192.is_good_frame);
        assert_eq!(g192.to_bytes().unwrap(), payload);
    }
}

#[test]
fn test_session_reset_is_stream_start() {
    let mut enc = Encoder::new(32000, 5).unwrap();
    let mut dec = Decoder::new(5).unwrap();
    let frames = speechish(8, 160);
    let mut first_run = Vec::new();
    let mut out = [0i16; 160];
    for f in &frames {
        let mut p = [0u8; 60];
        enc.encode(f, &mut p).unwrap();
        dec.decode(&p, &mut out, false).unwrap();
        first_run.push(out);
    }
    enc.reset();
    dec.reset();
    for (i, f) in frames.iter().enumerate() {
        let mut p = [0u8; 60];
        enc.encode(f, &mut p).unwrap();
        dec.decode(&p, &mut out, false).unwrap();
        assert_eq!(out, first_run[i], "frame {} after reset", i);
    }
}

#[test]
fn test_all_modes_info() {
    for m in Mode::ALL {
        let rate = if m.is_swb() { 32000 } else { 16000 };
        let enc = Encoder::new(rate, m.index()).unwrap();
        let info = enc.info();
        assert_eq!(info.frame_bytes, m.frame_bytes());
        assert_eq!(info.bitrate, m.bitrate());
        let dec = Decoder::new(m.index()).unwrap();
        assert_eq!(dec.info().frame_bytes, m.frame_bytes());
    }
}
