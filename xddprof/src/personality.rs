//! Named benchmarking sweeps ("personalities"): each is a cross-product of
//! request sizes, queue depths, direct-I/O settings, orderings, access
//! patterns and allocation strategies to exercise against a volume.
//!
//! Grounded on `original_source/.../xdd/profileparameters.py`'s
//! `ProfileParameters` subclasses. Per the "Global state" design note, the
//! registry is a plain `HashMap` built explicitly by the caller (see
//! [`registry`]) rather than a lazily-initialized global.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Serial,
    Loose,
    None,
}

impl Ordering {
    pub fn mover_flag(self) -> &'static str {
        match self {
            Ordering::Serial => "-serialordering",
            Ordering::Loose => "-looseordering",
            Ordering::None => "-noordering",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Sequential,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alloc {
    Demand,
    Preallocate,
    Pretruncate,
}

/// One named sweep configuration.
#[derive(Debug, Clone)]
pub struct ProfileParameters {
    pub name: String,
    pub reqsizes: Vec<u64>,
    pub queue_depths: Vec<u32>,
    pub dios: Vec<bool>,
    pub offsets: Vec<u64>,
    pub orders: Vec<Ordering>,
    pub patterns: Vec<Pattern>,
    pub allocs: Vec<Alloc>,
    pub keep_files: bool,
}

impl ProfileParameters {
    /// Total number of (reqsize, qdepth, dio, order, pattern, alloc)
    /// combinations this sweep will run, before multiplying by trial count.
    pub fn sweep_size(&self) -> usize {
        self.reqsizes.len()
            * self.queue_depths.len()
            * self.dios.len()
            * self.orders.len()
            * self.patterns.len()
            * self.allocs.len()
    }
}

fn default_params() -> ProfileParameters {
    ProfileParameters {
        name: "default".to_string(),
        reqsizes: vec![4096, 64 * 1024, 256 * 1024, 1024 * 1024, 4 * 1024 * 1024, 8 * 1024 * 1024],
        queue_depths: vec![1, 2, 3, 4, 6, 8, 12, 16],
        dios: vec![true, false],
        offsets: vec![0],
        orders: vec![Ordering::Serial, Ordering::Loose, Ordering::None],
        patterns: vec![Pattern::Sequential, Pattern::Random],
        allocs: vec![Alloc::Demand, Alloc::Preallocate, Alloc::Pretruncate],
        keep_files: false,
    }
}

fn ramses_params() -> ProfileParameters {
    ProfileParameters {
        name: "ramses".to_string(),
        reqsizes: vec![1024 * 1024, 4 * 1024 * 1024, 8 * 1024 * 1024],
        queue_depths: vec![1, 2, 3, 4, 8],
        dios: vec![true, false],
        offsets: vec![0],
        orders: vec![Ordering::Serial, Ordering::Loose],
        patterns: vec![Pattern::Sequential],
        allocs: vec![Alloc::Preallocate],
        keep_files: false,
    }
}

fn joshpork_params() -> ProfileParameters {
    ProfileParameters {
        name: "joshpork".to_string(),
        ..ramses_params()
    }
}

fn memory_params() -> ProfileParameters {
    ProfileParameters {
        name: "memory".to_string(),
        reqsizes: vec![4096, 64 * 1024, 256 * 1024, 1024 * 1024, 4 * 1024 * 1024],
        queue_depths: vec![1, 2, 3, 4, 6, 8, 12, 16],
        dios: vec![true, false],
        offsets: vec![0],
        orders: vec![Ordering::Serial, Ordering::Loose, Ordering::None],
        patterns: vec![Pattern::Sequential, Pattern::Random],
        allocs: vec![Alloc::Demand, Alloc::Preallocate, Alloc::Pretruncate],
        keep_files: false,
    }
}

fn testing_params() -> ProfileParameters {
    ProfileParameters {
        name: "testing".to_string(),
        reqsizes: vec![4 * 1024, 64 * 1024, 1024 * 1024, 4096 * 1024],
        queue_depths: vec![1, 2, 4],
        dios: vec![false, true],
        offsets: vec![0],
        orders: vec![Ordering::Loose, Ordering::Serial, Ordering::None],
        patterns: vec![Pattern::Sequential, Pattern::Random],
        allocs: vec![Alloc::Demand, Alloc::Preallocate],
        keep_files: false,
    }
}

/// Build the registry of named personalities. Called once from `main`.
pub fn registry() -> HashMap<String, ProfileParameters> {
    let mut map = HashMap::new();
    for params in [
        default_params(),
        ramses_params(),
        joshpork_params(),
        memory_params(),
        testing_params(),
    ] {
        map.insert(params.name.clone(), params);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_all_five_personalities() {
        let reg = registry();
        for name in ["default", "ramses", "joshpork", "memory", "testing"] {
            assert!(reg.contains_key(name), "missing personality '{name}'");
        }
    }

    #[test]
    fn default_sweep_size_matches_cross_product() {
        let reg = registry();
        let default = &reg["default"];
        assert_eq!(default.sweep_size(), 6 * 8 * 2 * 3 * 2 * 3);
    }

    #[test]
    fn joshpork_mirrors_ramses_apart_from_name() {
        let reg = registry();
        assert_eq!(reg["joshpork"].reqsizes, reg["ramses"].reqsizes);
        assert_ne!(reg["joshpork"].name, reg["ramses"].name);
    }
}
