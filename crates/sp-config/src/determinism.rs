// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::{rngs::StdRng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

const ENV_ENABLED: &str = "SPIRALPOINT_DETERMINISTIC";
const ENV_SEED: &str = "SPIRALPOINT_DETERMINISTIC_SEED";
const ENV_REDUCTION: &str = "SPIRALPOINT_DETERMINISTIC_REDUCTION";

/// Unified deterministic runtime configuration.
#[derive(Clone, Debug)]
pub struct DeterminismConfig {
    /// Whether deterministic execution is enabled globally.
    pub enabled: bool,
    /// Base seed used to derive per-component seeds.
    pub base_seed: u64,
    /// If true convolution kernels run sequentially so reductions keep a stable order.
    pub fix_reduction: bool,
}

impl DeterminismConfig {
    /// Builds a configuration snapshot from environment variables.
    fn from_env() -> Self {
        let enabled = std::env::var(ENV_ENABLED)
            .ok()
            .map(|v| !matches!(v.as_str(), "0" | "false" | "False" | "off" | "OFF"))
            .unwrap_or(false);

        let base_seed = std::env::var(ENV_SEED)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(42);

        let fix_reduction = std::env::var(ENV_REDUCTION)
            .ok()
            .map(|v| matches!(v.as_str(), "1" | "true" | "True" | "on" | "ON"))
            .unwrap_or(enabled);

        Self {
            enabled,
            base_seed,
            fix_reduction,
        }
    }

    /// Derives a deterministic seed for a given component label.
    pub fn seed_for<L: Hash>(&self, label: L) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.base_seed.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    }
}

static CONFIG: OnceLock<DeterminismConfig> = OnceLock::new();

/// Returns the lazily initialised deterministic configuration.
pub fn config() -> &'static DeterminismConfig {
    CONFIG.get_or_init(DeterminismConfig::from_env)
}

/// Returns a RNG derived from the provided label. When determinism is disabled
/// this falls back to a random seed from the operating system.
pub fn rng_from_label(label: &str) -> StdRng {
    let cfg = config();
    if cfg.enabled {
        StdRng::seed_from_u64(cfg.seed_for(label))
    } else {
        StdRng::from_entropy()
    }
}

/// Returns a RNG seeded from an optional explicit seed, respecting deterministic
/// overrides when the seed is not provided.
pub fn rng_from_optional(seed: Option<u64>, label: &str) -> StdRng {
    match seed {
        Some(value) => StdRng::seed_from_u64(value),
        None => rng_from_label(label),
    }
}

/// Mixes a base seed with a component label so sibling layers built from the
/// same network seed draw independent streams.
pub fn derive_seed(seed: Option<u64>, label: &str) -> Option<u64> {
    seed.map(|base| {
        let mut hasher = DefaultHasher::new();
        base.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    })
}

/// Returns whether reductions should be forced to run sequentially.
pub fn lock_reduction_order() -> bool {
    config().enabled && config().fix_reduction
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
    use std::sync::{Mutex, OnceLock};

    fn with_env(vars: &[(&str, Option<&str>)], test: impl FnOnce()) {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        let _lock = GUARD.get_or_init(|| Mutex::new(())).lock().unwrap();

        let snapshot: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                match value {
                    Some(val) => std::env::set_var(key, val),
                    None => std::env::remove_var(key),
                }
                ((*key).to_string(), previous)
            })
            .collect();

        let result = catch_unwind(AssertUnwindSafe(test));

        for (key, value) in snapshot {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }

        if let Err(err) = result {
            resume_unwind(err);
        }
    }

    #[test]
    fn defaults_disable_determinism() {
        with_env(
            &[(ENV_ENABLED, None), (ENV_SEED, None), (ENV_REDUCTION, None)],
            || {
                let cfg = DeterminismConfig::from_env();
                assert!(!cfg.enabled);
                assert_eq!(cfg.base_seed, 42);
                assert!(!cfg.fix_reduction);
            },
        );
    }

    #[test]
    fn explicit_enables_override_defaults() {
        with_env(
            &[
                (ENV_ENABLED, Some("1")),
                (ENV_SEED, Some("1337")),
                (ENV_REDUCTION, Some("false")),
            ],
            || {
                let cfg = DeterminismConfig::from_env();
                assert!(cfg.enabled);
                assert_eq!(cfg.base_seed, 1337);
                assert!(!cfg.fix_reduction);
            },
        );
    }

    #[test]
    fn textual_false_values_disable_flags() {
        with_env(&[(ENV_ENABLED, Some("off"))], || {
            let cfg = DeterminismConfig::from_env();
            assert!(!cfg.enabled);
        });
    }

    #[test]
    fn reduction_lock_follows_enable_flag_when_unspecified() {
        with_env(&[(ENV_ENABLED, Some("1")), (ENV_REDUCTION, None)], || {
            let cfg = DeterminismConfig::from_env();
            assert!(cfg.fix_reduction);
        });
    }

    #[test]
    fn derived_seeds_are_stable_per_label() {
        with_env(&[(ENV_ENABLED, Some("1")), (ENV_SEED, Some("99"))], || {
            let cfg = DeterminismConfig::from_env();
            assert_eq!(cfg.seed_for("conv1a"), cfg.seed_for("conv1a"));
            assert_ne!(cfg.seed_for("conv1a"), cfg.seed_for("conv1b"));
        });
    }

    #[test]
    fn explicit_seed_produces_repeatable_streams() {
        let mut first = rng_from_optional(Some(7), "unused");
        let mut second = rng_from_optional(Some(7), "other");
        assert_eq!(first.next_u64(), second.next_u64());
    }

    #[test]
    fn derive_seed_separates_labels_and_keeps_none() {
        assert_eq!(derive_seed(None, "convPa"), None);
        let a = derive_seed(Some(3), "convPa");
        let b = derive_seed(Some(3), "convDa");
        assert!(a.is_some());
        assert_ne!(a, b);
        assert_eq!(a, derive_seed(Some(3), "convPa"));
    }
}
