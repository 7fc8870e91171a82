pub mod dead_block_elimination;
pub mod merge_return;
pub mod pass;
pub mod ssa_repair;

use crate::transform::dead_block_elimination::DeadBlockElimination;
use crate::transform::merge_return::MergeReturn;
use crate::transform::pass::PassManager;

/// Selects the passes of the default pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PassConfig {
    pub dead_block_elimination: bool,
    pub merge_return: bool,
    /// Check the SSA invariants of every function after each pass.
    pub verify: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            dead_block_elimination: true,
            merge_return: true,
            verify: cfg!(debug_assertions),
        }
    }
}

impl PassConfig {
    /// Create a config with all passes enabled except those in the skip list.
    ///
    /// Pass names correspond to `Pass::name()` values:
    /// - `"dead-block-elimination"`
    /// - `"merge-return"`
    /// - `"verify"`: disables the invariant checks between passes
    ///
    /// Unknown names are ignored.
    pub fn from_skip_list(skip: &[&str]) -> Self {
        let mut config = Self::default();

        for name in skip {
            match *name {
                "dead-block-elimination" => config.dead_block_elimination = false,
                "merge-return" => config.merge_return = false,
                "verify" => config.verify = false,
                _ => {}
            }
        }

        config
    }
}

/// Assembles the enabled passes in their default order: dead block elimination, then merge
/// return.
pub fn default_pipeline(config: &PassConfig) -> PassManager {
    let mut manager = PassManager::new();

    if config.dead_block_elimination {
        manager.add_pass(DeadBlockElimination);
    }

    if config.merge_return {
        manager.add_pass(MergeReturn);
    }

    manager.set_verify(config.verify);

    manager
}
