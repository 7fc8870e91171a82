use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, instrument};

use crate::cfg::graph::Predecessors;
use crate::cfg::visit::reachable;
use crate::cfg::{BasicBlock, Body, Cfg, LocalValue, PhiIncoming, Terminator, Value};
use crate::dependencies::reachable_functions;
use crate::error::PassError;
use crate::transform::pass::{Diagnostics, Pass, Status};
use crate::Module;

/// What remains of an unreachable block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Residue {
    /// The merge block of a reachable header; reduced to a bare `Unreachable`.
    Merge,
    /// The continue target of a reachable loop; reduced to a bare branch to the loop header.
    Continue { header: BasicBlock },
}

#[derive(Default)]
pub struct DeadBlockEliminator {
    residues: FxHashMap<BasicBlock, Residue>,
    removed_values: Vec<LocalValue>,
}

impl DeadBlockEliminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the blocks of [body] that cannot be reached from its entry block.
    ///
    /// Unreachable blocks that a reachable header names as its merge block or continue target
    /// cannot be removed; they are emptied instead. Values defined in removed code are replaced
    /// with undefined values. Returns whether [body] was changed.
    pub fn eliminate_in_fn(&mut self, body: &mut Body) -> bool {
        let reachable = reachable(body);

        if reachable.len() == body.layout.len() {
            return false;
        }

        self.residues.clear();
        self.removed_values.clear();

        for bb in body.blocks().filter(|bb| reachable.contains(bb)) {
            let Some(merge) = body.basic_blocks[bb].merge else {
                continue;
            };

            if let Some(continue_target) = merge.continue_target() {
                if !reachable.contains(&continue_target) {
                    self.residues
                        .insert(continue_target, Residue::Continue { header: bb });
                }
            }

            if !reachable.contains(&merge.merge_block()) {
                self.residues.insert(merge.merge_block(), Residue::Merge);
            }
        }

        let dead: Vec<BasicBlock> = body
            .blocks()
            .filter(|bb| !reachable.contains(bb))
            .collect();
        let mut changed = false;

        for bb in dead {
            let residue = self.residues.get(&bb).copied();
            let terminator = match residue {
                Some(Residue::Merge) => Terminator::Unreachable,
                Some(Residue::Continue { header }) => Terminator::Branch(header),
                None => {
                    if let Some(data) = body.remove_block(bb) {
                        self.removed_values
                            .extend(data.statements.iter().filter_map(|stmt| stmt.op.result()));
                    }

                    changed = true;

                    continue;
                }
            };

            let data = &mut body.basic_blocks[bb];

            if data.statements.is_empty() && data.merge.is_none() && data.terminator == terminator
            {
                continue;
            }

            self.removed_values
                .extend(data.statements.drain(..).filter_map(|stmt| stmt.op.result()));
            data.merge = None;
            data.terminator = terminator;
            data.terminator_loc = None;

            changed = true;
        }

        changed |= fix_phi_incoming(body);

        for value in self.removed_values.drain(..) {
            let ty = body[value].ty;

            body.replace_all_uses(value, Value::Undef(ty));
            body.local_values.remove(value);
        }

        changed
    }
}

/// Makes the entries of every phi match the predecessors of its block again: entries for
/// blocks that no longer branch to the phi's block are dropped, and new predecessors receive an
/// undefined value.
fn fix_phi_incoming(body: &mut Body) -> bool {
    let predecessors = Predecessors::compute(body);
    let mut changed = false;

    let Body {
        local_values,
        basic_blocks,
        layout,
        ..
    } = body;

    for bb in layout.iter() {
        let preds = predecessors.of(*bb);
        let seen: FxHashSet<BasicBlock> = preds.iter().copied().collect();

        for phi in basic_blocks[*bb].phis_mut() {
            let before = phi.incoming.len();

            phi.incoming.retain(|incoming| seen.contains(&incoming.block));

            changed |= phi.incoming.len() != before;

            for pred in preds {
                if phi.incoming_for(*pred).is_none() {
                    phi.incoming.push(PhiIncoming {
                        value: Value::Undef(local_values[phi.result].ty),
                        block: *pred,
                    });

                    changed = true;
                }
            }
        }
    }

    changed
}

/// Removes unreachable blocks from every function in the call tree of [module].
#[instrument(skip_all, fields(module = %module.name))]
pub fn eliminate_dead_blocks(module: &Module, cfg: &mut Cfg) -> Status {
    let mut eliminator = DeadBlockEliminator::new();
    let mut changed = false;

    for function in reachable_functions(module, cfg) {
        if eliminator.eliminate_in_fn(&mut cfg.function_body[function]) {
            debug!(function = %function, "removed unreachable blocks");

            changed = true;
        }
    }

    Status::changed(changed)
}

/// Pass wrapper around [eliminate_dead_blocks].
#[derive(Clone, Copy, Default, Debug)]
pub struct DeadBlockElimination;

impl Pass for DeadBlockElimination {
    fn name(&self) -> &'static str {
        "dead-block-elimination"
    }

    fn run(
        &mut self,
        module: &mut Module,
        cfg: &mut Cfg,
        _diagnostics: &mut Diagnostics,
    ) -> Result<Status, PassError> {
        Ok(eliminate_dead_blocks(module, cfg))
    }
}

#[cfg(test)]
mod tests {
    use thin_vec::thin_vec;

    use super::*;
    use crate::analyse::structured::check_structure;
    use crate::cfg::{Merge, OpBinary, OpPhi};
    use crate::ty::TY_U32;
    use crate::verify::verify_body;
    use crate::BinaryOperator;

    fn add(body: &mut Body, bb: BasicBlock, lhs: Value, rhs: Value) -> LocalValue {
        let result = body.add_value(TY_U32);

        body.basic_blocks[bb].statements.push(
            OpBinary {
                operator: BinaryOperator::Add,
                lhs,
                rhs,
                result,
            }
            .into(),
        );

        result
    }

    #[test]
    fn test_removes_unreachable_block() {
        let mut body = Body::default();

        //   bb0 --> bb1
        //            ^
        //   dead ----+
        //
        // bb1 has a phi with entries for bb0 and dead.

        let bb0 = body.append_block();
        let dead = body.append_block();
        let bb1 = body.append_block();

        let dead_value = add(&mut body, dead, 1u32.into(), 2u32.into());
        let phi = body.add_value(TY_U32);

        body.basic_blocks[bb0].terminator = Terminator::Branch(bb1);
        body.basic_blocks[dead].terminator = Terminator::Branch(bb1);
        body.basic_blocks[bb1].statements.push(
            OpPhi {
                incoming: thin_vec![
                    PhiIncoming {
                        value: 0u32.into(),
                        block: bb0,
                    },
                    PhiIncoming {
                        value: dead_value.into(),
                        block: dead,
                    },
                ],
                result: phi,
            }
            .into(),
        );
        body.basic_blocks[bb1].terminator = Terminator::ReturnValue(phi.into());

        assert!(DeadBlockEliminator::new().eliminate_in_fn(&mut body));

        assert_eq!(body.layout, vec![bb0, bb1]);
        assert!(!body.basic_blocks.contains_key(dead));
        assert!(!body.local_values.contains_key(dead_value));

        let phi = body.basic_blocks[bb1].statements[0].op.expect_phi();

        assert_eq!(phi.incoming.len(), 1);
        assert_eq!(phi.incoming_for(bb0), Some(0u32.into()));
        assert_eq!(verify_body(&body), Ok(()));
    }

    #[test]
    fn test_unreachable_merge_and_continue_are_emptied() {
        let mut body = Body::default();

        //   bb0 (loop header, merge bb3, continue bb2)
        //    |
        //    v
        //   bb1: return
        //
        //   bb2: code; branch bb0        (unreachable continue target)
        //   bb3: code; return            (unreachable merge block)

        let bb0 = body.append_block();
        let bb1 = body.append_block();
        let bb2 = body.append_block();
        let bb3 = body.append_block();

        body.basic_blocks[bb0].merge = Some(Merge::Loop {
            merge: bb3,
            continue_target: bb2,
        });
        body.basic_blocks[bb0].terminator = Terminator::Branch(bb1);
        body.basic_blocks[bb1].terminator = Terminator::Return;

        add(&mut body, bb2, 1u32.into(), 1u32.into());
        body.basic_blocks[bb2].terminator = Terminator::Branch(bb0);

        add(&mut body, bb3, 2u32.into(), 2u32.into());
        body.basic_blocks[bb3].terminator = Terminator::Return;

        assert!(check_structure(&body).is_err());
        assert!(DeadBlockEliminator::new().eliminate_in_fn(&mut body));

        assert_eq!(body.layout, vec![bb0, bb1, bb2, bb3]);
        assert!(body.basic_blocks[bb2].statements.is_empty());
        assert_eq!(body.basic_blocks[bb2].terminator, Terminator::Branch(bb0));
        assert!(body.basic_blocks[bb3].statements.is_empty());
        assert_eq!(body.basic_blocks[bb3].terminator, Terminator::Unreachable);
        assert_eq!(check_structure(&body), Ok(()));

        assert!(!DeadBlockEliminator::new().eliminate_in_fn(&mut body));
    }

    #[test]
    fn test_reachable_body_is_unchanged() {
        let mut body = Body::default();

        let bb0 = body.append_block();
        let bb1 = body.append_block();

        body.basic_blocks[bb0].terminator = Terminator::Branch(bb1);
        body.basic_blocks[bb1].terminator = Terminator::Return;

        assert!(!DeadBlockEliminator::new().eliminate_in_fn(&mut body));
        assert_eq!(body.layout, vec![bb0, bb1]);
    }
}
