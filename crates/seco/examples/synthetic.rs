//! Minimal dereverberation demo on a synthetic subband stream.
//!
//! Builds a dry random signal, adds a late-reverberant tail per subband,
//! estimates the prediction filters, and reports how much of the tail the
//! streaming filter removes.
//!
//! ```sh
//! cargo run -p seco --example synthetic
//! ```

use num_complex::Complex64;
use seco::{BufferedSource, SingleChannelWpe, WpeConfig};

const WIDTH: usize = 64;
const FRAMES: usize = 600;

fn main() {
    let config = WpeConfig {
        num_subbands: WIDTH,
        lower_lag: 1,
        upper_lag: 4,
        iterations: 3,
        load_db: -40.0,
        ..Default::default()
    };

    let taps = [
        Complex64::new(0.30, 0.10),
        Complex64::new(-0.20, 0.05),
        Complex64::new(0.10, -0.05),
        Complex64::new(-0.05, 0.02),
    ];
    let (dry, wet) = synthesize(FRAMES, 1, &taps);

    let source = BufferedSource::new(WIDTH, wet.clone());
    let mut wpe = SingleChannelWpe::new(source, config).expect("valid configuration");

    let frames_used = wpe.estimate_filter(0, 0).expect("estimation succeeds");
    println!("estimated prediction filters from {frames_used} frames");

    let mut output = Vec::with_capacity(FRAMES);
    for frame_no in 0..FRAMES {
        output.push(wpe.next(frame_no).expect("stream frame").to_vec());
    }

    let before = residual_db(&wet, &dry);
    let after = residual_db(&output, &dry);
    println!("reverberant tail vs dry signal: {before:.1} dB");
    println!("after dereverberation:          {after:.1} dB");

    assert!(
        after < before,
        "dereverberation should have reduced the reverberant energy"
    );
}

/// Dry random frames and their late-reverberant version
/// `y[n] = x[n] + Σ taps[i]·x[n − delay − i]`.
fn synthesize(
    count: usize,
    delay: usize,
    taps: &[Complex64],
) -> (Vec<Vec<Complex64>>, Vec<Vec<Complex64>>) {
    let half = WIDTH / 2;
    // Small deterministic generator; the demo needs no statistical rigor.
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut uniform = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
    };

    let mut dry = Vec::with_capacity(count);
    for _ in 0..count {
        let mut frame = vec![Complex64::ZERO; WIDTH];
        frame[0] = Complex64::new(uniform(), 0.0);
        frame[half] = Complex64::new(uniform(), 0.0);
        for bin in 1..half {
            let value = Complex64::new(uniform(), uniform());
            frame[bin] = value;
            frame[WIDTH - bin] = value.conj();
        }
        dry.push(frame);
    }

    let mut wet = dry.clone();
    for n in 0..count {
        for (i, tap) in taps.iter().enumerate() {
            let lag = delay + i;
            if n >= lag {
                for bin in 0..=half {
                    let echo = tap * dry[n - lag][bin];
                    wet[n][bin] += echo;
                }
            }
        }
        // Restore the Hermitian mirror after the tail is added.
        for bin in 1..half {
            wet[n][WIDTH - bin] = wet[n][bin].conj();
        }
    }
    (dry, wet)
}

fn residual_db(frames: &[Vec<Complex64>], reference: &[Vec<Complex64>]) -> f64 {
    let residual: f64 = frames
        .iter()
        .zip(reference.iter())
        .flat_map(|(f, r)| f.iter().zip(r.iter()))
        .map(|(a, b)| (a - b).norm_sqr())
        .sum();
    let signal: f64 = reference
        .iter()
        .flat_map(|f| f.iter())
        .map(Complex64::norm_sqr)
        .sum();
    10.0 * (residual / signal).log10()
}
