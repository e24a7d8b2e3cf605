use std::time::Duration;

#[cfg(feature = "metrics")]
pub mod metrics;
pub mod patch;

mod error;

pub use error::*;

/// The default interval for requeuing a managed resource.
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Hard deadline for a single reconcile pass.
pub(crate) const RECONCILE_DEADLINE: Duration = Duration::from_secs(30);

/// Name of the kubernetes resource manager.
pub(crate) const MANAGER_NAME: &str = "ambient-operator";

pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let spec_bytes = serde_json::to_vec(spec).unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Exponential requeue backoff: 1 s doubling to a 5 min cap, with the
/// given jitter fraction applied (±20 % in production, 0 in tests).
pub fn backoff_duration(attempt: u32, jitter: f64) -> Duration {
    let base = Duration::from_secs(1)
        .saturating_mul(2_u32.saturating_pow(attempt.min(16)))
        .min(Duration::from_secs(300));
    let jittered = base.as_secs_f64() * (1.0 + jitter.clamp(-0.2, 0.2));
    Duration::from_secs_f64(jittered.max(0.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_duration(0, 0.0), Duration::from_secs(1));
        assert_eq!(backoff_duration(1, 0.0), Duration::from_secs(2));
        assert_eq!(backoff_duration(5, 0.0), Duration::from_secs(32));
        assert_eq!(backoff_duration(12, 0.0), Duration::from_secs(300));
        assert_eq!(backoff_duration(u32::MAX, 0.0), Duration::from_secs(300));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = backoff_duration(3, 0.0).as_secs_f64();
        let low = backoff_duration(3, -0.2).as_secs_f64();
        let high = backoff_duration(3, 0.2).as_secs_f64();
        assert!((low - base * 0.8).abs() < 1e-9);
        assert!((high - base * 1.2).abs() < 1e-9);
        // Out-of-range jitter is clamped, not trusted.
        assert!((backoff_duration(3, 5.0).as_secs_f64() - high).abs() < 1e-9);
    }

    #[test]
    fn hash_is_stable_for_equal_values() {
        #[derive(serde::Serialize)]
        struct S {
            a: u32,
            b: String,
        }
        let one = hash_spec(&S { a: 1, b: "x".into() });
        let two = hash_spec(&S { a: 1, b: "x".into() });
        assert_eq!(one, two);
        assert_ne!(one, hash_spec(&S { a: 2, b: "x".into() }));
    }
}
