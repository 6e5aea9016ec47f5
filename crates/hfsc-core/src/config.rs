//! # Hierarchy Configuration
//!
//! A class tree described in TOML:
//!
//! ```toml
//! version = 1
//! root = 1
//! default = 30
//! queue_limit = 500
//!
//! [[class]]
//! id = 10
//! fsc = { m2 = 60_000_000 }
//!
//! [[class]]
//! id = 30
//! parent = 10
//! rsc = { m1 = 20_000_000, d = 5_000, m2 = 5_000_000 }
//! fsc = { m2 = 30_000_000 }
//! usc = { m2 = 50_000_000 }
//! ```
//!
//! Rates are bits per second, `d` is microseconds. Parents must be declared
//! before their children; `parent` defaults to the root.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use crate::class::{ClassCurves, ClassId};
use crate::curve::ServiceCurve;
use crate::error::{ConfigError, Error};
use crate::queue::{DEFAULT_QUEUE_LIMIT, FifoQueue};
use crate::scheduler::Scheduler;

pub const CONFIG_VERSION: u32 = 1;

pub const DEFAULT_ROOT_ID: ClassId = ClassId(1);

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid hierarchy TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("class entry {index} has no id")]
    MissingId { index: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HierarchyConfigInput {
    pub version: u32,
    pub root: Option<u32>,
    pub default: Option<u32>,
    pub queue_limit: Option<usize>,
    pub class: Vec<ClassConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassConfigInput {
    pub id: Option<u32>,
    pub parent: Option<u32>,
    pub rsc: Option<ServiceCurve>,
    pub fsc: Option<ServiceCurve>,
    pub usc: Option<ServiceCurve>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassConfig {
    pub id: ClassId,
    pub parent: ClassId,
    pub curves: ClassCurves,
}

/// Validated class tree, ready to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyConfig {
    pub version: u32,
    pub root: ClassId,
    pub default_class: Option<ClassId>,
    pub queue_limit: usize,
    /// In declaration order, parents first.
    pub classes: Vec<ClassConfig>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            root: DEFAULT_ROOT_ID,
            default_class: None,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            classes: Vec::new(),
        }
    }
}

impl HierarchyConfigInput {
    pub fn resolve(self) -> Result<HierarchyConfig, LoadError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(LoadError::UnsupportedVersion(version));
        }

        let root = self.root.map_or(DEFAULT_ROOT_ID, ClassId);
        // declared id -> has link-sharing curve
        let mut declared: HashMap<ClassId, bool> = HashMap::new();
        declared.insert(root, true);

        let mut classes = Vec::with_capacity(self.class.len());
        for (index, input) in self.class.into_iter().enumerate() {
            let id = ClassId(input.id.ok_or(LoadError::MissingId { index })?);
            let parent = input.parent.map_or(root, ClassId);
            let curves = ClassCurves {
                rsc: input.rsc,
                fsc: input.fsc,
                usc: input.usc,
            }
            .normalize()?;

            if declared.contains_key(&id) {
                return Err(ConfigError::DuplicateId(id).into());
            }
            let parent_has_fsc = *declared
                .get(&parent)
                .ok_or(ConfigError::UnknownParent(parent))?;
            if curves.rsc.is_none() && curves.fsc.is_none() {
                return Err(ConfigError::NoCurveSpecified.into());
            }
            if curves.fsc.is_some() && parent != root && !parent_has_fsc {
                return Err(ConfigError::ParentLacksLinkShare(parent).into());
            }

            declared.insert(id, curves.fsc.is_some());
            classes.push(ClassConfig { id, parent, curves });
        }

        let default_class = match self.default.map(ClassId) {
            Some(id) if !declared.contains_key(&id) => {
                return Err(ConfigError::UnknownClass(id).into());
            }
            other => other,
        };

        Ok(HierarchyConfig {
            version,
            root,
            default_class,
            queue_limit: self.queue_limit.unwrap_or(DEFAULT_QUEUE_LIMIT).max(1),
            classes,
        })
    }
}

impl HierarchyConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, LoadError> {
        if input.trim().is_empty() {
            return Ok(HierarchyConfig::default());
        }
        let parsed: HierarchyConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// Create the scheduler described by this tree, with FIFO leaves.
    pub fn build(&self, now: u64) -> Result<Scheduler<FifoQueue>, Error> {
        let mut sched = Scheduler::with_queue_limit(self.root, self.queue_limit);
        for class in &self.classes {
            sched.create_class(class.id, class.parent, class.curves, now)?;
        }
        sched.set_default_class(self.default_class)?;
        tracing::debug!(
            root = %self.root,
            classes = self.classes.len(),
            default = ?self.default_class,
            "hierarchy built"
        );
        Ok(sched)
    }
}
