//! Merge return for bodies with structured control flow.
//!
//! The body is first wrapped in a switch construct with a single default case, whose merge block
//! becomes the new and only return. Every return then turns into a store of the return value, a
//! store to a boolean "return flag" and a branch to the merge block of the innermost construct it
//! may break out of. In a second walk, the blocks on the way from such a merge block to the final
//! return are split: the first half checks the return flag and, if it is set, breaks on to the
//! next enclosing merge block. The second half holds the original code.
//!
//! `Unreachable` terminators on the way are redirected in the same way, without setting the flag.
//! This makes the merge blocks of constructs whose every path returns reachable, so that their
//! returns reconverge there.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::analyse::structured::{structured_order, StructureError};
use crate::cfg::graph::{add_undef_phi_incoming, split_block, split_loop_header};
use crate::cfg::{
    BasicBlock, Body, LocalValue, Merge, Op, OpAlloca, OpLoad, OpStore, Statement, Switch,
    Terminator,
};
use crate::ty::{TypeRegistry, TY_BOOL};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct BreakTarget {
    merge: BasicBlock,
    is_loop: bool,
}

/// The innermost construct a block can break out of, and the merge block that ends the
/// construct the block is in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct ControlState {
    break_target: Option<BreakTarget>,
    current_merge: Option<BasicBlock>,
}

impl ControlState {
    fn root() -> Self {
        ControlState {
            break_target: None,
            current_merge: None,
        }
    }

    fn break_merge(&self) -> Option<BasicBlock> {
        self.break_target.map(|target| target.merge)
    }
}

struct StructuredMergeReturn<'a> {
    body: &'a mut Body,
    types: &'a mut TypeRegistry,
    return_flag: Option<LocalValue>,
    return_value: Option<LocalValue>,
    final_return: BasicBlock,
    /// Blocks that used to return and now break towards the final return.
    return_blocks: FxHashSet<BasicBlock>,
    state: Vec<ControlState>,
    order: Vec<BasicBlock>,
    /// Index into [order] of the next block to process.
    cursor: usize,
}

impl<'a> StructuredMergeReturn<'a> {
    fn new(body: &'a mut Body, types: &'a mut TypeRegistry) -> Self {
        let mut return_value = None;

        if let Some(ret_ty) = body.ret_ty {
            let ptr_ty = types.ptr(ret_ty);
            let var = body.add_value(ptr_ty);
            let entry = body.expect_entry();

            body.basic_blocks[entry].statements.insert(
                0,
                OpAlloca {
                    ty: ret_ty,
                    result: var,
                }
                .into(),
            );

            return_value = Some(var);
        }

        let final_return = body.append_block();

        if let (Some(ret_ty), Some(var)) = (body.ret_ty, return_value) {
            let loaded = body.add_value(ret_ty);
            let data = &mut body.basic_blocks[final_return];

            data.statements.push(
                OpLoad {
                    ptr: var.into(),
                    result: loaded,
                }
                .into(),
            );
            data.terminator = Terminator::ReturnValue(loaded.into());
        } else {
            body.basic_blocks[final_return].terminator = Terminator::Return;
        }

        StructuredMergeReturn {
            body,
            types,
            return_flag: None,
            return_value,
            final_return,
            return_blocks: FxHashSet::default(),
            state: Vec::new(),
            order: Vec::new(),
            cursor: 0,
        }
    }

    fn current_state(&self) -> ControlState {
        self.state
            .last()
            .copied()
            .expect("the root state is never popped")
    }

    /// Moves everything after the variables of the entry block into a new block and makes the
    /// entry block the header of a switch that only has that block as its default target. The
    /// switch merges into the final return block.
    fn wrap_in_switch(&mut self) {
        let entry = self.body.expect_entry();
        let split_at = entry_variable_count(self.body, entry);
        let body_start = split_block(self.body, entry, split_at);

        let data = &mut self.body.basic_blocks[entry];

        data.merge = Some(Merge::Selection {
            merge: self.final_return,
        });
        data.terminator = Terminator::Switch(Switch {
            selector: 0u32.into(),
            default: body_start,
            cases: SmallVec::new(),
        });
    }

    fn return_flag(&mut self) -> LocalValue {
        if let Some(flag) = self.return_flag {
            return flag;
        }

        let ptr_ty = self.types.ptr(TY_BOOL);
        let flag = self.body.add_value(ptr_ty);
        let entry = self.body.expect_entry();

        let statements = &mut self.body.basic_blocks[entry].statements;

        statements.insert(
            0,
            OpAlloca {
                ty: TY_BOOL,
                result: flag,
            }
            .into(),
        );

        let init_at = statements
            .iter()
            .position(|stmt| !matches!(stmt.op, Op::OpAlloca(_)))
            .unwrap_or(statements.len());

        statements.insert(
            init_at,
            OpStore {
                ptr: flag.into(),
                value: false.into(),
            }
            .into(),
        );

        self.return_flag = Some(flag);

        flag
    }

    /// Inserts [new] into the traversal order directly after [after].
    fn insert_into_order(&mut self, after: BasicBlock, new: BasicBlock) {
        let position = self
            .order
            .iter()
            .position(|bb| *bb == after)
            .map(|p| p + 1)
            .unwrap_or(self.order.len());

        self.order.insert(position, new);

        if position < self.cursor {
            self.cursor += 1;
        }
    }

    fn split_loop_header(&mut self, header: BasicBlock) -> Result<BasicBlock, StructureError> {
        let new_header =
            split_loop_header(self.body, header).ok_or(StructureError::Unsupported {
                block: header,
                reason: "cannot find the back-edge of the loop",
            })?;

        self.insert_into_order(header, new_header);

        Ok(new_header)
    }

    fn generate_state(&mut self, bb: BasicBlock) {
        let data = &self.body.basic_blocks[bb];

        let Some(merge) = data.merge else {
            return;
        };

        let top = self.current_state();

        let state = match merge {
            Merge::Loop { merge, .. } => ControlState {
                break_target: Some(BreakTarget {
                    merge,
                    is_loop: true,
                }),
                current_merge: Some(merge),
            },
            Merge::Selection { merge } => {
                if let Terminator::Switch(_) = data.terminator {
                    // Inside a loop, returns in a switch break straight to the loop's merge.
                    let break_target = match top.break_target {
                        Some(target) if target.is_loop => target,
                        _ => BreakTarget {
                            merge,
                            is_loop: false,
                        },
                    };

                    ControlState {
                        break_target: Some(break_target),
                        current_merge: Some(merge),
                    }
                } else {
                    ControlState {
                        break_target: top.break_target,
                        current_merge: Some(merge),
                    }
                }
            }
        };

        self.state.push(state);
    }

    fn pop_finished_construct(&mut self, bb: BasicBlock) {
        if self.current_state().current_merge == Some(bb) {
            self.state.pop();
        }
    }

    /// Replaces the terminator of [bb] with a branch to [target].
    ///
    /// A return first records the returned value and sets the return flag.
    fn branch_to_block(
        &mut self,
        bb: BasicBlock,
        target: BasicBlock,
    ) -> Result<(), StructureError> {
        let terminator = self.body.basic_blocks[bb].terminator.clone();
        let terminator_loc = self.body.basic_blocks[bb].terminator_loc;

        if terminator.is_return() {
            let flag = self.return_flag();
            let mut stores = vec![Statement::from(OpStore {
                ptr: flag.into(),
                value: true.into(),
            })
            .with_debug_loc(terminator_loc)];

            if let (Terminator::ReturnValue(value), Some(var)) = (&terminator, self.return_value)
            {
                stores.push(
                    Statement::from(OpStore {
                        ptr: var.into(),
                        value: *value,
                    })
                    .with_debug_loc(terminator_loc),
                );
            }

            self.body.basic_blocks[bb].statements.extend(stores);
        }

        if self.body.basic_blocks[target].is_loop_header() {
            self.split_loop_header(target)?;
        }

        add_undef_phi_incoming(self.body, target, bb);

        self.body.basic_blocks[bb].terminator = Terminator::Branch(target);

        Ok(())
    }

    fn process_returns(&mut self, bb: BasicBlock) -> Result<(), StructureError> {
        match self.body.basic_blocks[bb].terminator {
            Terminator::Return | Terminator::ReturnValue(_) | Terminator::Unreachable => {}
            _ => return Ok(()),
        }

        let Some(target) = self.current_state().break_merge() else {
            return Err(StructureError::Unsupported {
                block: bb,
                reason: "block is not enclosed by the function-wide construct",
            });
        };

        self.branch_to_block(bb, target)?;
        self.return_blocks.insert(bb);

        Ok(())
    }

    /// Makes every block on the way from [return_block] to the final return check the return
    /// flag and break out of its construct if it is set.
    fn predicate_blocks(
        &mut self,
        return_block: BasicBlock,
        predicated: &mut FxHashSet<BasicBlock>,
    ) -> Result<(), StructureError> {
        let successors = self.body.successors(return_block);

        let &[successor] = successors.as_slice() else {
            return Err(StructureError::Unsupported {
                block: return_block,
                reason: "redirected return does not have exactly one successor",
            });
        };

        let mut block = successor;

        let mut level = self.state.len() - 1;
        let top = self.state[level];

        if top.current_merge == Some(block) {
            level = level.checked_sub(1).ok_or(StructureError::Unsupported {
                block: return_block,
                reason: "return breaks out of the function-wide construct",
            })?;
        } else if top.break_merge() == Some(block) {
            while level > 0 && self.state[level].break_merge() == Some(block) {
                level -= 1;
            }
        }

        while block != self.final_return {
            if !predicated.insert(block) {
                break;
            }

            let Some(target) = self.state[level].break_target else {
                return Err(StructureError::Unsupported {
                    block,
                    reason: "no construct to break out of on the way to the final return",
                });
            };

            while level > 0 && self.state[level].break_merge() == Some(target.merge) {
                level -= 1;
            }

            self.break_from_construct(block, predicated, target)?;

            block = target.merge;
        }

        Ok(())
    }

    /// Splits [block] so that its first half breaks to [target] when the return flag is set and
    /// otherwise continues with the original code in the second half.
    fn break_from_construct(
        &mut self,
        block: BasicBlock,
        predicated: &mut FxHashSet<BasicBlock>,
        target: BreakTarget,
    ) -> Result<(), StructureError> {
        if self.body.basic_blocks[block].is_loop_header() {
            self.split_loop_header(block)?;
        }

        if self.body.basic_blocks[target.merge].is_loop_header() {
            self.split_loop_header(target.merge)?;
        }

        let split_at = self.body.basic_blocks[block].first_non_phi();
        let old_body = split_block(self.body, block, split_at);

        self.insert_into_order(block, old_body);
        predicated.insert(old_body);

        if self.return_blocks.remove(&block) {
            self.return_blocks.insert(old_body);
        }

        if target.is_loop {
            // The block may be the continue target of the loop we are breaking out of.
            for data in self.body.basic_blocks.values_mut() {
                if let Some(Merge::Loop {
                    merge,
                    continue_target,
                }) = &mut data.merge
                {
                    if *merge == target.merge && *continue_target == block {
                        *continue_target = old_body;
                    }
                }
            }
        }

        let flag = self.return_flag();
        let loaded = self.body.add_value(TY_BOOL);
        let data = &mut self.body.basic_blocks[block];

        data.statements.push(
            OpLoad {
                ptr: flag.into(),
                result: loaded,
            }
            .into(),
        );
        data.merge = Some(Merge::Selection { merge: old_body });
        data.terminator = Terminator::BranchConditional {
            condition: loaded.into(),
            true_target: target.merge,
            false_target: old_body,
        };

        add_undef_phi_incoming(self.body, target.merge, block);

        Ok(())
    }

    fn run(mut self) -> Result<Option<LocalValue>, StructureError> {
        self.wrap_in_switch();

        self.order = structured_order(self.body);
        self.state = vec![ControlState::root()];
        self.cursor = 0;

        while self.cursor < self.order.len() {
            let bb = self.order[self.cursor];

            self.cursor += 1;

            if bb == self.final_return {
                continue;
            }

            self.pop_finished_construct(bb);
            self.process_returns(bb)?;
            self.generate_state(bb);
        }

        self.order = structured_order(self.body);
        self.state = vec![ControlState::root()];
        self.cursor = 0;

        let mut predicated = FxHashSet::default();

        while self.cursor < self.order.len() {
            let bb = self.order[self.cursor];

            self.cursor += 1;

            self.pop_finished_construct(bb);

            if self.return_blocks.contains(&bb) {
                self.predicate_blocks(bb, &mut predicated)?;
            }

            self.generate_state(bb);
        }

        Ok(self.return_value)
    }
}

fn entry_variable_count(body: &Body, entry: BasicBlock) -> usize {
    body.basic_blocks[entry]
        .statements
        .iter()
        .take_while(|stmt| matches!(stmt.op, Op::OpAlloca(_)))
        .count()
}

/// Restructures [body] so that it has a single return, while keeping its control flow
/// structured.
///
/// Returned values are routed through a new function-scope variable; returns the variable so
/// that it can be promoted once the dominance of other values is repaired.
pub(super) fn merge_return(
    body: &mut Body,
    types: &mut TypeRegistry,
) -> Result<Option<LocalValue>, StructureError> {
    StructuredMergeReturn::new(body, types).run()
}
