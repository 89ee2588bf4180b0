//! # Configuration
//!
//! Allocator and tree settings, loadable from TOML once at startup.
//!
//! ```toml
//! initial_capacity = 1024
//!
//! [[roots]]
//! name = "textures"
//! allocator = { kind = "pool", block_size = 256, blocks_in_pool = 4096, start_pools = 4 }
//!
//! [[roots]]
//! name = "scratch"
//! allocator = { kind = "arena", capacity = 1048576 }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ObjResult, ObjectError};
use crate::memory::{Allocator, ArenaAllocator, HeapAllocator, PoolAllocator};

/// Default maximal size of a pooled allocation.
pub const DEFAULT_BLOCK_SIZE: usize = 256;
/// Default number of blocks per pool (about 1MB per pool with the default block size).
pub const DEFAULT_BLOCKS_IN_POOL: usize = 4096;
/// Default number of pools reserved upfront.
pub const DEFAULT_START_POOLS: usize = 4;

/// Pool allocator settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximal size of a pooled allocation; larger requests use the heap.
    pub block_size: usize,
    /// Number of blocks per pool.
    pub blocks_in_pool: usize,
    /// Pools reserved at creation.
    pub start_pools: usize,
    /// Upper bound on pools, `None` to grow without limit.
    pub max_pools: Option<usize>,
}

impl PoolConfig {
    /// Creates an unbounded pool configuration.
    #[must_use]
    pub const fn new(block_size: usize, blocks_in_pool: usize, start_pools: usize) -> Self {
        Self {
            block_size,
            blocks_in_pool,
            start_pools,
            max_pools: None,
        }
    }

    /// Caps the number of pools.
    #[must_use]
    pub const fn with_max_pools(mut self, max_pools: usize) -> Self {
        self.max_pools = Some(max_pools);
        self
    }

    /// Replaces zero values with the defaults.
    #[must_use]
    pub fn normalized(self) -> Self {
        fn or_default(value: usize, default: usize) -> usize {
            if value == 0 {
                default
            } else {
                value
            }
        }
        let start_pools = or_default(self.start_pools, DEFAULT_START_POOLS);
        Self {
            block_size: or_default(self.block_size, DEFAULT_BLOCK_SIZE),
            blocks_in_pool: or_default(self.blocks_in_pool, DEFAULT_BLOCKS_IN_POOL),
            start_pools: self.max_pools.map_or(start_pools, |max| start_pools.min(max)),
            max_pools: self.max_pools,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE, DEFAULT_BLOCKS_IN_POOL, DEFAULT_START_POOLS)
    }
}

/// Which allocator a root owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AllocatorConfig {
    /// General purpose heap.
    Heap {
        /// Optional byte budget.
        #[serde(default)]
        max_bytes: Option<usize>,
    },
    /// Fixed-size block pools.
    Pool(PoolConfig),
    /// Bump region.
    Arena {
        /// Region size in bytes.
        capacity: usize,
    },
}

impl AllocatorConfig {
    /// Builds the allocator described by this config.
    #[must_use]
    pub fn build(&self) -> Box<dyn Allocator> {
        match *self {
            Self::Heap { max_bytes: None } => Box::new(HeapAllocator::new()),
            Self::Heap {
                max_bytes: Some(max),
            } => Box::new(HeapAllocator::with_budget(max)),
            Self::Pool(config) => Box::new(PoolAllocator::new(config)),
            Self::Arena { capacity } => Box::new(ArenaAllocator::new(capacity)),
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::Heap { max_bytes: None }
    }
}

/// A root created when a tree is built from config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    /// Name given to the root object.
    pub name: String,
    /// The root's allocator.
    #[serde(default)]
    pub allocator: AllocatorConfig,
}

/// Settings for a whole [`ObjectTree`](crate::ObjectTree).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Object slots reserved upfront.
    pub initial_capacity: usize,
    /// Roots created at startup, in order.
    pub roots: Vec<RootConfig>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            roots: Vec::new(),
        }
    }
}

impl TreeConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// [`ObjectError::InvalidConfig`] if the document does not describe a
    /// tree config, or names the same root twice.
    pub fn from_toml_str(source: &str) -> ObjResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ObjectError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// [`ObjectError::InvalidConfig`] on duplicate root names or an arena
    /// without capacity.
    pub fn validate(&self) -> ObjResult<()> {
        for (i, root) in self.roots.iter().enumerate() {
            if self.roots[..i].iter().any(|other| other.name == root.name) {
                return Err(ObjectError::InvalidConfig(format!(
                    "duplicate root name \"{}\"",
                    root.name
                )));
            }
            if matches!(root.allocator, AllocatorConfig::Arena { capacity: 0 }) {
                return Err(ObjectError::InvalidConfig(format!(
                    "arena of root \"{}\" has no capacity",
                    root.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree_config() {
        let config = TreeConfig::from_toml_str(
            r#"
            initial_capacity = 64

            [[roots]]
            name = "assets"
            allocator = { kind = "pool", block_size = 128, max_pools = 2 }

            [[roots]]
            name = "scratch"
            allocator = { kind = "arena", capacity = 4096 }

            [[roots]]
            name = "main"
            "#,
        )
        .unwrap();

        assert_eq!(config.initial_capacity, 64);
        assert_eq!(config.roots.len(), 3);
        assert_eq!(
            config.roots[0].allocator,
            AllocatorConfig::Pool(PoolConfig {
                block_size: 128,
                blocks_in_pool: DEFAULT_BLOCKS_IN_POOL,
                start_pools: DEFAULT_START_POOLS,
                max_pools: Some(2),
            })
        );
        assert_eq!(config.roots[1].allocator, AllocatorConfig::Arena { capacity: 4096 });
        assert_eq!(config.roots[2].allocator, AllocatorConfig::default());
    }

    #[test]
    fn test_duplicate_root_rejected() {
        let err = TreeConfig::from_toml_str(
            r#"
            [[roots]]
            name = "a"
            [[roots]]
            name = "a"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ObjectError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = TreeConfig::from_toml_str(
            r#"
            [[roots]]
            name = "a"
            allocator = { kind = "slab" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ObjectError::InvalidConfig(_)));
    }

    #[test]
    fn test_pool_normalized_defaults() {
        let config = PoolConfig::new(0, 0, 0).with_max_pools(2).normalized();
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.blocks_in_pool, DEFAULT_BLOCKS_IN_POOL);
        // start_pools is capped by max_pools
        assert_eq!(config.start_pools, 2);
    }
}
