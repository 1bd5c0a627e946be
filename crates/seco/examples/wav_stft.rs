//! Dereverberates a WAV file end to end.
//!
//! Runs a square-root-Hann STFT over the input, feeds the subband frames
//! through the single-channel WPE estimator and filter, and resynthesizes
//! the output by overlap-add. The analysis/synthesis here is demo plumbing;
//! the library itself only ever sees subband frames.
//!
//! ```sh
//! cargo run -p seco --features examples --example wav_stft -- in.wav out.wav
//! ```

use std::f64::consts::PI;
use std::path::PathBuf;

use anyhow::{Context, ensure};
use clap::Parser;
use num_complex::Complex64;
use seco::{BufferedSource, SingleChannelWpe, WpeConfig};

#[derive(Debug, Parser)]
struct Args {
    /// Input WAV file (the first channel is used).
    input: PathBuf,
    /// Output WAV file (mono, 16 bit).
    output: PathBuf,
    /// STFT window length; must be a power of two.
    #[arg(long, default_value_t = 512)]
    window: usize,
    /// Prediction delay in frames.
    #[arg(long, default_value_t = 2)]
    lower_lag: usize,
    /// Last prediction lag in frames.
    #[arg(long, default_value_t = 21)]
    upper_lag: usize,
    /// Estimator passes.
    #[arg(long, default_value_t = 2)]
    iterations: usize,
    /// Relative diagonal load in dB.
    #[arg(long, default_value_t = -20.0)]
    load_db: f64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    ensure!(
        args.window.is_power_of_two(),
        "window length {} must be a power of two",
        args.window
    );

    let mut reader = hound::WavReader::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let samples: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = f64::from(1u32 << (spec.bits_per_sample - 1));
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| Ok(f64::from(s?) / scale))
                .collect::<anyhow::Result<_>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .map(|s| Ok(f64::from(s?)))
            .collect::<anyhow::Result<_>>()?,
    };

    let config = WpeConfig {
        num_subbands: args.window,
        lower_lag: args.lower_lag,
        upper_lag: args.upper_lag,
        iterations: args.iterations,
        load_db: args.load_db,
        sample_rate_hz: f64::from(spec.sample_rate),
        ..Default::default()
    };

    let frames = analyze(&samples, args.window);
    let frame_count = frames.len();
    println!("{} samples → {frame_count} subband frames", samples.len());

    let source = BufferedSource::new(args.window, frames);
    let mut wpe = SingleChannelWpe::new(source, config)?;
    let used = wpe.estimate_filter(0, 0)?;
    println!("estimated prediction filters from {used} frames");

    let mut output_frames = Vec::with_capacity(frame_count);
    for frame_no in 0..frame_count {
        output_frames.push(wpe.next(frame_no)?.to_vec());
    }

    let output = synthesize(&output_frames, args.window, samples.len());
    let out_spec = hound::WavSpec {
        channels: 1,
        sample_rate: spec.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.output, out_spec)
        .with_context(|| format!("creating {}", args.output.display()))?;
    for sample in output {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    println!("wrote {}", args.output.display());
    Ok(())
}

fn sqrt_hann(window: usize) -> Vec<f64> {
    (0..window)
        .map(|i| (PI * i as f64 / window as f64).sin())
        .collect()
}

/// Windowed STFT with half-window hop.
fn analyze(samples: &[f64], window: usize) -> Vec<Vec<Complex64>> {
    let hop = window / 2;
    let taper = sqrt_hann(window);
    let mut frames = Vec::new();
    let mut start = 0;
    while start + window <= samples.len() {
        let mut frame: Vec<Complex64> = samples[start..start + window]
            .iter()
            .zip(taper.iter())
            .map(|(s, w)| Complex64::new(s * w, 0.0))
            .collect();
        fft(&mut frame, false);
        frames.push(frame);
        start += hop;
    }
    frames
}

/// Inverse STFT by overlap-add with the same taper.
fn synthesize(frames: &[Vec<Complex64>], window: usize, length: usize) -> Vec<f64> {
    let hop = window / 2;
    let taper = sqrt_hann(window);
    let mut output = vec![0.0; length];
    for (index, frame) in frames.iter().enumerate() {
        let mut time = frame.clone();
        fft(&mut time, true);
        let start = index * hop;
        for (i, value) in time.iter().enumerate() {
            if start + i < length {
                output[start + i] += value.re * taper[i];
            }
        }
    }
    output
}

/// Iterative radix-2 FFT; `inverse` includes the 1/N scale.
fn fft(buffer: &mut [Complex64], inverse: bool) {
    let n = buffer.len();
    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buffer.swap(i, j);
        }
    }

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let angle = sign * 2.0 * PI / len as f64;
        let root = Complex64::new(angle.cos(), angle.sin());
        for chunk in buffer.chunks_mut(len) {
            let mut twiddle = Complex64::new(1.0, 0.0);
            for i in 0..len / 2 {
                let even = chunk[i];
                let odd = chunk[i + len / 2] * twiddle;
                chunk[i] = even + odd;
                chunk[i + len / 2] = even - odd;
                twiddle *= root;
            }
        }
        len <<= 1;
    }

    if inverse {
        let scale = 1.0 / n as f64;
        for value in buffer.iter_mut() {
            *value *= scale;
        }
    }
}
