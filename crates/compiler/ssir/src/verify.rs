use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::analyse::dominators::DominatorTree;
use crate::cfg::graph::Predecessors;
use crate::cfg::{BasicBlock, Body, LocalValue, Value};

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum VerifyError {
    #[error("block {block:?} targets {target:?}, which is not part of the function layout")]
    DanglingTarget {
        block: BasicBlock,
        target: BasicBlock,
    },
    #[error("phi {phi:?} in block {block:?} follows a statement that is not a phi")]
    PhiNotAtBlockStart { block: BasicBlock, phi: LocalValue },
    #[error(
        "phi {phi:?} in block {block:?} has {found} incoming entries, but the block has {expected} \
         predecessors"
    )]
    PhiEntryCount {
        block: BasicBlock,
        phi: LocalValue,
        expected: usize,
        found: usize,
    },
    #[error("phi {phi:?} in block {block:?} has no entry for predecessor {pred:?}")]
    PhiMissingPredecessor {
        block: BasicBlock,
        phi: LocalValue,
        pred: BasicBlock,
    },
    #[error("value {value:?} is defined more than once")]
    MultipleDefinitions { value: LocalValue },
    #[error("value {value:?} is used in block {block:?} but never defined")]
    UndefinedValue { value: LocalValue, block: BasicBlock },
    #[error("value {value:?} is used in block {block:?}, which its definition does not dominate")]
    UseNotDominated { value: LocalValue, block: BasicBlock },
}

/// Checks the SSA invariants of [body].
///
/// - every branch and merge target is part of the layout;
/// - phis precede all other statements of their block;
/// - every phi has exactly one entry per predecessor of its block;
/// - every value is defined once, and every use in a reachable block is dominated by the
///   definition. A phi's incoming value only has to be available at the end of the
///   corresponding predecessor.
pub fn verify_body(body: &Body) -> Result<(), VerifyError> {
    if body.entry().is_none() {
        return Ok(());
    }

    let in_layout: FxHashSet<BasicBlock> = body.layout.iter().copied().collect();

    for bb in &body.layout {
        let data = &body.basic_blocks[*bb];
        let merge_targets = data
            .merge
            .iter()
            .flat_map(|merge| [Some(merge.merge_block()), merge.continue_target()])
            .flatten();

        for target in data.terminator.targets().into_iter().chain(merge_targets) {
            if !in_layout.contains(&target) {
                return Err(VerifyError::DanglingTarget { block: *bb, target });
            }
        }
    }

    let defs = body
        .def_sites()
        .map_err(|value| VerifyError::MultipleDefinitions { value })?;

    let predecessors = Predecessors::compute(body);
    let dominators = DominatorTree::compute(body);

    let check_use = |value: &Value, block: BasicBlock, index: usize| -> Result<(), VerifyError> {
        let Value::Local(value) = *value else {
            return Ok(());
        };

        let Some(site) = defs.get(&value) else {
            return Err(VerifyError::UndefinedValue { value, block });
        };

        if !dominators.is_reachable(block) {
            return Ok(());
        }

        if site.reaches(&dominators, block, index) {
            Ok(())
        } else {
            Err(VerifyError::UseNotDominated { value, block })
        }
    };

    for bb in &body.layout {
        let data = &body.basic_blocks[*bb];
        let preds = predecessors.of(*bb);
        let phi_count = data.first_non_phi();

        for (index, stmt) in data.statements.iter().enumerate() {
            if let Some(phi) = stmt.op.as_phi() {
                if index >= phi_count {
                    return Err(VerifyError::PhiNotAtBlockStart {
                        block: *bb,
                        phi: phi.result,
                    });
                }

                if phi.incoming.len() != preds.len() {
                    return Err(VerifyError::PhiEntryCount {
                        block: *bb,
                        phi: phi.result,
                        expected: preds.len(),
                        found: phi.incoming.len(),
                    });
                }

                for pred in preds {
                    if phi.incoming_for(*pred).is_none() {
                        return Err(VerifyError::PhiMissingPredecessor {
                            block: *bb,
                            phi: phi.result,
                            pred: *pred,
                        });
                    }
                }

                for incoming in &phi.incoming {
                    let pred_end = body.basic_blocks[incoming.block].statements.len();

                    check_use(&incoming.value, incoming.block, pred_end)?;
                }
            } else {
                let mut result = Ok(());

                stmt.op.visit_values(|value| {
                    if result.is_ok() {
                        result = check_use(value, *bb, index);
                    }
                });

                result?;
            }
        }

        let mut result = Ok(());

        data.terminator.visit_values(|value| {
            if result.is_ok() {
                result = check_use(value, *bb, data.statements.len());
            }
        });

        result?;
    }

    Ok(())
}

/// The reachable blocks that end in a `Return` or `ReturnValue` terminator.
pub fn reachable_return_blocks(body: &Body) -> Vec<BasicBlock> {
    let dominators = DominatorTree::compute(body);

    body.return_blocks()
        .into_iter()
        .filter(|bb| dominators.is_reachable(*bb))
        .collect()
}
