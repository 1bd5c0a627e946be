//! Identification, determinism, and regularization behavior of the
//! estimator on synthetic late-reverberant signals.

use num_complex::Complex64;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use seco::{BufferedSource, SingleChannelWpe, WpeConfig};

/// Synthesizes a dry half-spectrum signal and its late-reverberant version
/// `y[n] = x[n] + Σ h[i]·x[n − delay − i]`, returned as Hermitian frames.
fn reverberant_pair(
    seed: u64,
    width: usize,
    count: usize,
    delay: usize,
    taps: &[Complex64],
) -> (Vec<Vec<Complex64>>, Vec<Vec<Complex64>>) {
    let half = width / 2;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    // Dry half-spectrum samples, bins 0 and Nyquist real.
    let mut dry_bins = vec![vec![Complex64::ZERO; half + 1]; count];
    for frame in dry_bins.iter_mut() {
        frame[0] = Complex64::new(rng.random::<f64>() - 0.5, 0.0);
        frame[half] = Complex64::new(rng.random::<f64>() - 0.5, 0.0);
        for bin in 1..half {
            frame[bin] =
                Complex64::new(rng.random::<f64>() - 0.5, rng.random::<f64>() - 0.5);
        }
    }

    let mirror = |bins: &[Complex64]| {
        let mut frame = vec![Complex64::ZERO; width];
        frame[..=half].copy_from_slice(bins);
        for bin in 1..half {
            frame[width - bin] = bins[bin].conj();
        }
        frame
    };

    let mut dry = Vec::with_capacity(count);
    let mut wet = Vec::with_capacity(count);
    for n in 0..count {
        let mut wet_bins = dry_bins[n].clone();
        for (i, tap) in taps.iter().enumerate() {
            let lag = delay + i;
            if n >= lag {
                for bin in 0..=half {
                    wet_bins[bin] += tap * dry_bins[n - lag][bin];
                }
            }
        }
        dry.push(mirror(&dry_bins[n]));
        wet.push(mirror(&wet_bins));
    }
    (dry, wet)
}

fn energy_of_difference(a: &[Vec<Complex64>], b: &[Vec<Complex64>]) -> f64 {
    a.iter()
        .zip(b.iter())
        .flat_map(|(fa, fb)| fa.iter().zip(fb.iter()))
        .map(|(va, vb)| (va - vb).norm_sqr())
        .sum()
}

fn config(width: usize) -> WpeConfig {
    WpeConfig {
        num_subbands: width,
        lower_lag: 1,
        upper_lag: 2,
        iterations: 3,
        load_db: -40.0,
        ..Default::default()
    }
}

#[test]
fn estimator_removes_most_of_the_synthetic_tail() {
    let taps = [Complex64::new(0.25, 0.1), Complex64::new(-0.15, 0.05)];
    let (dry, wet) = reverberant_pair(97, 8, 400, 1, &taps);

    let source = BufferedSource::new(8, wet.clone());
    let mut wpe = SingleChannelWpe::new(source, config(8)).unwrap();
    wpe.estimate_filter(0, 0).unwrap();

    let mut output = Vec::with_capacity(wet.len());
    for frame_no in 0..wet.len() {
        output.push(wpe.next(frame_no).unwrap().to_vec());
    }

    let reverberant_energy = energy_of_difference(&wet, &dry);
    let residual_energy = energy_of_difference(&output, &dry);
    assert!(reverberant_energy > 0.0);
    assert!(
        residual_energy < 0.35 * reverberant_energy,
        "residual {residual_energy} not well below reverberant {reverberant_energy}"
    );
}

#[test]
fn tighter_tolerance_with_more_frames() {
    let taps = [Complex64::new(0.2, 0.05), Complex64::new(-0.1, 0.0)];
    let mut previous_ratio = f64::INFINITY;
    for count in [100usize, 800] {
        let (dry, wet) = reverberant_pair(41, 8, count, 1, &taps);
        let source = BufferedSource::new(8, wet.clone());
        let mut wpe = SingleChannelWpe::new(source, config(8)).unwrap();
        wpe.estimate_filter(0, 0).unwrap();

        let mut output = Vec::with_capacity(count);
        for frame_no in 0..count {
            output.push(wpe.next(frame_no).unwrap().to_vec());
        }
        let ratio = energy_of_difference(&output, &dry) / energy_of_difference(&wet, &dry);
        assert!(
            ratio < previous_ratio.max(0.5),
            "ratio {ratio} did not stay controlled at {count} frames"
        );
        previous_ratio = ratio;
    }
}

#[test]
fn repeated_estimation_is_bitwise_deterministic() {
    let taps = [Complex64::new(0.3, -0.1)];
    let (_, wet) = reverberant_pair(7, 8, 120, 1, &taps);

    let source = BufferedSource::new(8, wet);
    let mut wpe = SingleChannelWpe::new(source, config(8)).unwrap();

    wpe.estimate_filter(0, 0).unwrap();
    let first: Vec<Vec<Complex64>> = (0..=4).map(|k| wpe.filter(k).to_vec()).collect();

    wpe.reset_filter();
    wpe.estimate_filter(0, 0).unwrap();
    for (k, filter) in first.iter().enumerate() {
        assert_eq!(filter.as_slice(), wpe.filter(k), "subband {k}");
    }
}

#[test]
fn strong_diagonal_load_damps_the_filter_to_zero() {
    let taps = [Complex64::new(0.25, 0.1), Complex64::new(-0.15, 0.05)];
    let (_, wet) = reverberant_pair(19, 8, 200, 1, &taps);

    let strong = WpeConfig {
        load_db: 120.0,
        ..config(8)
    };
    let source = BufferedSource::new(8, wet);
    let mut wpe = SingleChannelWpe::new(source, strong).unwrap();
    wpe.estimate_filter(0, 0).unwrap();

    for k in 0..=4 {
        let norm: f64 = wpe.filter(k).iter().map(|g| g.norm_sqr()).sum::<f64>().sqrt();
        assert!(norm < 1e-6, "subband {k} filter survived the load: {norm}");
    }
}
