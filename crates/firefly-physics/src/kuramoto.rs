// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Kuramoto Coupling Rules
// ─────────────────────────────────────────────────────────────────────
//! First-order Euler discretisations of the Kuramoto coupling ODE
//!
//!   dφ_i/dt = (K/N) Σ_j sin(φ_j − φ_i)
//!
//! in the two signal families used by the oscillators:
//!
//! - flash: neighbors report the *time* they flashed. A flash at `t_j`
//!   means `2πf·t_j − asin(θ) ≡ φ_j`, so the coupling term becomes
//!   `sin(2πf·t_j − asin(θ) − φ_i)`. Phase accumulates unbounded.
//! - sampled: neighbors report their phase directly. Phase is kept in
//!   [0, 2π).
//!
//! Pure functions only; locking and state live in `firefly-core`.

use std::f64::consts::TAU;

/// Activity of a flash-family oscillator: `sin(2πf·t − φ)` ∈ [-1, 1].
#[inline]
pub fn flash_activity(frequency_hz: f64, phase: f64, t: f64) -> f64 {
    (TAU * frequency_hz * t - phase).sin()
}

/// Activity of a sampled-family oscillator: `sin(2πf·t + φ)` ∈ [-1, 1].
#[inline]
pub fn sampled_activity(frequency_hz: f64, phase: f64, t: f64) -> f64 {
    (TAU * frequency_hz * t + phase).sin()
}

/// Flash time an oscillator with `phase` would report for its own flash.
///
/// Used as the default neighbor signal: plugged back into
/// [`flash_coupling_delta`] it contributes exactly `sin(0) = 0`.
pub fn self_flash_time(frequency_hz: f64, threshold: f64, phase: f64) -> f64 {
    (threshold.asin() + phase) / (TAU * frequency_hz)
}

/// Phase increment from neighbor flash times.
///
/// Returns 0 when `flash_times` is empty.
pub fn flash_coupling_delta(
    frequency_hz: f64,
    threshold: f64,
    coupling: f64,
    phase: f64,
    flash_times: &[f64],
) -> f64 {
    if flash_times.is_empty() {
        return 0.0;
    }
    let offset = threshold.asin();
    let sum: f64 = flash_times
        .iter()
        .map(|&t| (TAU * frequency_hz * t - offset - phase).sin())
        .sum();
    coupling / flash_times.len() as f64 * sum
}

/// Phase increment from sampled neighbor phases.
///
/// Returns 0 when `samples` is empty.
pub fn sampled_coupling_delta(coupling: f64, phase: f64, samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s - phase).sin()).sum();
    coupling / samples.len() as f64 * sum
}

/// Reduce a phase to [0, 2π).
#[inline]
pub fn wrap_phase(phase: f64) -> f64 {
    let wrapped = phase.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs.
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Circular distance between two phases, in [0, π].
///
/// Works for wrapped and unbounded representations alike.
pub fn phase_distance(a: f64, b: f64) -> f64 {
    let d = wrap_phase(a - b);
    d.min(TAU - d)
}

/// Kuramoto order parameter R = |⟨e^{iφ}⟩| ∈ [0, 1].
///
/// Returns 0 for an empty population.
pub fn order_parameter(phases: &[f64]) -> f64 {
    if phases.is_empty() {
        return 0.0;
    }
    let n = phases.len() as f64;
    let (sum_sin, sum_cos) = phases
        .iter()
        .fold((0.0, 0.0), |(s, c), &p| (s + p.sin(), c + p.cos()));
    ((sum_sin / n).powi(2) + (sum_cos / n).powi(2))
        .sqrt()
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_range() {
        let phases = [-1e6, -7.0, -0.5, 0.0, 1.0, 3.3, 6.2, 1e9];
        let freqs = [0.01, 0.1, 1.0, 13.7];
        let times = [0.0, 0.001, 2.5, 1e4, 1.7e9];
        for &p in &phases {
            for &f in &freqs {
                for &t in &times {
                    let a = flash_activity(f, p, t);
                    let b = sampled_activity(f, p, t);
                    assert!((-1.0..=1.0).contains(&a), "flash a={a} p={p} f={f} t={t}");
                    assert!((-1.0..=1.0).contains(&b), "sampled a={b} p={p} f={f} t={t}");
                }
            }
        }
    }

    #[test]
    fn test_self_flash_time_hits_threshold() {
        let (f, th, p) = (0.7, 0.9, 1.3);
        let t = self_flash_time(f, th, p);
        assert!((flash_activity(f, p, t) - th).abs() < 1e-12);
    }

    #[test]
    fn test_self_flash_time_contributes_nothing() {
        let (f, th, p) = (0.1, 0.99, 4.2);
        let t = self_flash_time(f, th, p);
        let delta = flash_coupling_delta(f, th, 1.0, p, &[t, t, t, t]);
        assert!(delta.abs() < 1e-12, "delta={delta}");
    }

    #[test]
    fn test_flash_delta_pulls_toward_neighbor() {
        let (f, th) = (1.0, 0.9);
        // Neighbor phase is 0.5 rad larger: own phase should increase.
        let neighbor_t = self_flash_time(f, th, 1.5);
        let delta = flash_coupling_delta(f, th, 1.0, 1.0, &[neighbor_t]);
        assert!((delta - 0.5f64.sin()).abs() < 1e-9, "delta={delta}");
    }

    #[test]
    fn test_flash_delta_periodic_in_time() {
        let (f, th, p) = (0.5, 0.8, 0.3);
        let t = 12.34;
        let a = flash_coupling_delta(f, th, 1.0, p, &[t]);
        let b = flash_coupling_delta(f, th, 1.0, p, &[t + 3.0 / f]);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_sampled_delta_average() {
        let delta = sampled_coupling_delta(2.0, 0.0, &[0.5, -0.5, 0.2, 0.0]);
        let expected = 2.0 / 4.0 * (0.5f64.sin() - 0.5f64.sin() + 0.2f64.sin());
        assert!((delta - expected).abs() < 1e-12);
    }

    #[test]
    fn test_empty_neighbors_zero_delta() {
        assert_eq!(flash_coupling_delta(1.0, 0.9, 1.0, 2.0, &[]), 0.0);
        assert_eq!(sampled_coupling_delta(1.0, 2.0, &[]), 0.0);
    }

    #[test]
    fn test_zero_coupling_zero_delta() {
        assert_eq!(flash_coupling_delta(1.0, 0.9, 0.0, 2.0, &[0.1, 7.3]), 0.0);
        assert_eq!(sampled_coupling_delta(0.0, 2.0, &[0.1, 3.0]), 0.0);
    }

    #[test]
    fn test_wrap_phase() {
        assert!((wrap_phase(TAU + 0.25) - 0.25).abs() < 1e-12);
        assert!((wrap_phase(-0.25) - (TAU - 0.25)).abs() < 1e-12);
        assert!(wrap_phase(-1e-18) < TAU);
        assert_eq!(wrap_phase(0.0), 0.0);
    }

    #[test]
    fn test_phase_distance() {
        assert!((phase_distance(0.1, TAU - 0.1) - 0.2).abs() < 1e-12);
        assert!((phase_distance(100.0 * TAU + 1.0, 1.0)).abs() < 1e-9);
        assert!((phase_distance(0.0, std::f64::consts::PI) - std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(phase_distance(2.0, 2.0), 0.0);
    }

    #[test]
    fn test_order_parameter() {
        assert!((order_parameter(&[0.5; 8]) - 1.0).abs() < 1e-12);
        let spread = [0.0, std::f64::consts::PI];
        assert!(order_parameter(&spread) < 1e-12);
        assert_eq!(order_parameter(&[]), 0.0);
    }
}
