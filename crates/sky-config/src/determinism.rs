use rand::{rngs::StdRng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Unified deterministic runtime configuration.
#[derive(Clone, Debug)]
pub struct DeterminismConfig {
    /// Whether deterministic execution is enabled globally.
    pub enabled: bool,
    /// Base seed used to derive per-component seeds.
    pub base_seed: u64,
    /// Fixed worker count for parallel sampling stages. Reproducibility of
    /// the sampler output is tied to this value, so deterministic runs should
    /// pin it rather than inherit the machine's thread count.
    pub worker_count: Option<usize>,
}

impl DeterminismConfig {
    /// Builds a configuration snapshot from environment variables.
    fn from_env() -> Self {
        let enabled = std::env::var("SKYSIM_DETERMINISTIC")
            .ok()
            .map(|v| !matches!(v.as_str(), "0" | "false" | "False" | "off" | "OFF"))
            .unwrap_or(false);

        let base_seed = std::env::var("SKYSIM_SEED")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(42);

        let worker_count = std::env::var("SKYSIM_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0);

        Self {
            enabled,
            base_seed,
            worker_count,
        }
    }

    /// Derives a deterministic seed for a given component label.
    pub fn seed_for<L: Hash>(&self, label: L) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.base_seed.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    }

    /// Worker count to use, falling back to the available parallelism.
    pub fn workers(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

static CONFIG: OnceLock<DeterminismConfig> = OnceLock::new();

/// Returns the lazily initialised deterministic configuration.
pub fn config() -> &'static DeterminismConfig {
    CONFIG.get_or_init(DeterminismConfig::from_env)
}

/// Overrides the deterministic configuration. Intended for tests.
pub fn configure(cfg: DeterminismConfig) -> &'static DeterminismConfig {
    CONFIG.get_or_init(|| cfg)
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

/// Returns a RNG seeded from an optional explicit seed, respecting the
/// deterministic overrides when the seed is not provided.
pub fn rng_from_optional(seed: Option<u64>, label: &str) -> StdRng {
    match seed {
        Some(value) => StdRng::seed_from_u64(value),
        None => rng_from_label(label),
    }
}
