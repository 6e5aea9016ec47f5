//! # Scenario Files
//!
//! A scenario is one TOML file: link, run length, class hierarchy and the
//! traffic offered to it.
//!
//! ```toml
//! seed = 7
//! duration_ms = 2_000
//! link_rate_bps = 10_000_000
//!
//! [hierarchy]
//! [[hierarchy.class]]
//! id = 10
//! rsc = { m1 = 1_000_000, d = 10_000, m2 = 128_000 }
//!
//! [[hierarchy.class]]
//! id = 20
//! fsc = { m2 = 9_000_000 }
//!
//! [[source]]
//! class = 10
//! rate_bps = 64_000
//! packet_size = 160
//!
//! [[source]]
//! class = 20
//! rate_bps = 20_000_000
//! packet_size = 1_200
//! size_jitter = 300
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, bail};
use hfsc_core::ClassId;
use hfsc_core::HierarchyConfig;
use hfsc_core::config::HierarchyConfigInput;
use serde::Deserialize;

use crate::traffic::HEADER_LEN;

const DEFAULT_SEED: u64 = 1;
const DEFAULT_DURATION_MS: u64 = 1_000;
const DEFAULT_LINK_RATE_BPS: u64 = 10_000_000;
const DEFAULT_PACKET_SIZE: usize = 1_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioConfigInput {
    pub seed: Option<u64>,
    pub duration_ms: Option<u64>,
    pub link_rate_bps: Option<u64>,
    pub hierarchy: HierarchyConfigInput,
    pub source: Vec<SourceConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceConfigInput {
    pub class: Option<u32>,
    pub rate_bps: Option<u64>,
    pub packet_size: Option<usize>,
    pub size_jitter: usize,
    pub start_ms: u64,
    pub stop_ms: Option<u64>,
}

/// Constant-rate traffic aimed at one leaf class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub class: ClassId,
    pub rate_bps: u64,
    /// Mean packet size in bytes.
    pub packet_size: usize,
    /// Sizes are uniform in `packet_size ± size_jitter`.
    pub size_jitter: usize,
    pub start_ms: u64,
    pub stop_ms: u64,
}

/// Validated scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub seed: u64,
    pub duration_ms: u64,
    pub link_rate_bps: u64,
    pub hierarchy: HierarchyConfig,
    pub sources: Vec<SourceConfig>,
}

impl ScenarioConfigInput {
    pub fn resolve(self) -> anyhow::Result<ScenarioConfig> {
        let duration_ms = self.duration_ms.unwrap_or(DEFAULT_DURATION_MS);
        let link_rate_bps = self.link_rate_bps.unwrap_or(DEFAULT_LINK_RATE_BPS);
        if duration_ms == 0 {
            bail!("duration_ms must be positive");
        }
        if link_rate_bps == 0 {
            bail!("link_rate_bps must be positive");
        }

        let hierarchy = self
            .hierarchy
            .resolve()
            .context("invalid [hierarchy] section")?;
        let parents: HashSet<ClassId> = hierarchy.classes.iter().map(|c| c.parent).collect();
        let leaves: HashSet<ClassId> = hierarchy
            .classes
            .iter()
            .map(|c| c.id)
            .filter(|id| !parents.contains(id))
            .collect();

        let mut sources = Vec::with_capacity(self.source.len());
        for (index, input) in self.source.into_iter().enumerate() {
            let Some(class) = input.class.map(ClassId) else {
                bail!("source {index} has no class");
            };
            if !leaves.contains(&class) {
                bail!("source {index} targets class {class}, which is not a leaf");
            }
            let rate_bps = input.rate_bps.unwrap_or(0);
            if rate_bps == 0 {
                bail!("source {index} needs a positive rate_bps");
            }
            let packet_size = input.packet_size.unwrap_or(DEFAULT_PACKET_SIZE);
            if packet_size < HEADER_LEN + input.size_jitter {
                bail!(
                    "source {index}: packet_size {packet_size} minus size_jitter {} is below {HEADER_LEN} bytes",
                    input.size_jitter
                );
            }
            let stop_ms = input.stop_ms.unwrap_or(duration_ms);
            if input.start_ms >= stop_ms {
                bail!(
                    "source {index}: start_ms {} is not before stop_ms {stop_ms}",
                    input.start_ms
                );
            }
            sources.push(SourceConfig {
                class,
                rate_bps,
                packet_size,
                size_jitter: input.size_jitter,
                start_ms: input.start_ms,
                stop_ms,
            });
        }

        Ok(ScenarioConfig {
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            duration_ms,
            link_rate_bps,
            hierarchy,
            sources,
        })
    }
}

impl ScenarioConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let parsed: ScenarioConfigInput = toml::from_str(input).context("invalid scenario TOML")?;
        parsed.resolve()
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("loading scenario {}", path.display()))
    }
}
