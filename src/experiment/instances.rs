//! Task instance pool and per-iteration sampling.
//!
//! The pool is loaded once per run from either a JSON array or a JSONL file
//! (one instance per line; blank lines are skipped). Batches and warmup
//! calibration sets are drawn uniformly without replacement from the
//! iteration's seeded RNG, so a resumed run samples the same instances.

use std::path::Path;

use anyhow::{Context, bail};
use rand::Rng;
use rand::seq::index;

use super::TaskInstance;

#[derive(Clone, Debug, Default)]
pub struct InstancePool {
    instances: Vec<TaskInstance>,
}

impl InstancePool {
    pub fn new(instances: Vec<TaskInstance>) -> Self {
        Self { instances }
    }

    /// Load instances from a `.json` array or a `.jsonl` file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read instances from {}", path.display()))?;

        let trimmed = contents.trim_start();
        let instances: Vec<TaskInstance> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed)
                .with_context(|| format!("Failed to parse instance array {}", path.display()))?
        } else {
            trimmed
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(i, line)| {
                    serde_json::from_str(line).with_context(|| {
                        format!("Failed to parse instance on line {} of {}", i + 1, path.display())
                    })
                })
                .collect::<anyhow::Result<_>>()?
        };

        let mut seen = std::collections::HashSet::new();
        for inst in &instances {
            if !seen.insert(inst.instance_id.as_str()) {
                bail!("Duplicate instance id `{}` in {}", inst.instance_id, path.display());
            }
        }

        tracing::info!(path = %path.display(), count = instances.len(), "Loaded task instances");
        Ok(Self { instances })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> &[TaskInstance] {
        &self.instances
    }

    /// Draw up to `n` distinct instances, preserving pool order in the output.
    /// Returns the whole pool when `n >= len`.
    pub fn sample_batch<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Vec<TaskInstance> {
        if n >= self.instances.len() {
            return self.instances.clone();
        }
        let mut picked = index::sample(rng, self.instances.len(), n).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| self.instances[i].clone()).collect()
    }
}
