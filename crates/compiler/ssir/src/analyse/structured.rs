use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use thiserror::Error;

use crate::analyse::dominators::DominatorTree;
use crate::cfg::graph::Predecessors;
use crate::cfg::visit::{reachable, visit_depth_first, Visitor};
use crate::cfg::{BasicBlock, Body, DebugLoc, Merge, Terminator};

/// The successors of [bb] as seen by structured traversals: the merge block first, then the
/// continue target, then the branch targets.
pub fn structured_successors(body: &Body, bb: BasicBlock) -> SmallVec<[BasicBlock; 4]> {
    let data = &body.basic_blocks[bb];
    let mut successors = SmallVec::new();

    if let Some(merge) = data.merge {
        successors.push(merge.merge_block());

        if let Some(continue_target) = merge.continue_target() {
            successors.push(continue_target);
        }
    }

    for target in data.terminator.targets() {
        if !successors.contains(&target) {
            successors.push(target);
        }
    }

    successors
}

struct StructuredPostOrder {
    seen: FxHashSet<BasicBlock>,
    order: Vec<BasicBlock>,
}

impl Visitor for StructuredPostOrder {
    fn should_visit(&mut self, _body: &Body, bb: BasicBlock) -> bool {
        self.seen.insert(bb)
    }

    fn successors(&mut self, body: &Body, bb: BasicBlock) -> SmallVec<[BasicBlock; 4]> {
        structured_successors(body, bb)
    }

    fn leave(&mut self, _body: &Body, bb: BasicBlock) {
        self.order.push(bb);
    }
}

/// Reverse post-order over [structured_successors], starting at the entry block.
///
/// In this order a header precedes every block of its construct, and the blocks of a construct
/// precede its merge block. A loop's continue construct follows the rest of the loop body.
/// Merge blocks and continue targets are included even when no branch reaches them.
pub fn structured_order(body: &Body) -> Vec<BasicBlock> {
    let mut visitor = StructuredPostOrder {
        seen: FxHashSet::default(),
        order: Vec::with_capacity(body.layout.len()),
    };

    if let Some(entry) = body.entry() {
        visit_depth_first(&mut visitor, body, entry);
    }

    visitor.order.reverse();

    visitor.order
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ConstructKind {
    Selection,
    Switch,
    Loop,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ConstructInfo {
    pub header: BasicBlock,
    pub kind: ConstructKind,
    pub merge: BasicBlock,
    pub continue_target: Option<BasicBlock>,
    /// The header of the innermost construct that contains this construct's header.
    pub parent: Option<BasicBlock>,
    /// Nesting depth; constructs not contained in any other construct have depth `0`.
    pub depth: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
struct BlockInfo {
    containing_construct: Option<BasicBlock>,
    containing_loop: Option<BasicBlock>,
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    header: BasicBlock,
    kind: ConstructKind,
    merge: BasicBlock,
}

/// The structured constructs of a function body and the construct each block belongs to.
///
/// A header belongs to the construct it opens only in the sense of being its [ConstructInfo];
/// for nesting queries it counts as part of the enclosing construct. A merge block belongs to
/// the construct that encloses the construct it merges.
#[derive(Clone, Default, Debug)]
pub struct StructuredCfg {
    blocks: FxHashMap<BasicBlock, BlockInfo>,
    constructs: FxHashMap<BasicBlock, ConstructInfo>,
    construct_order: Vec<BasicBlock>,
}

impl StructuredCfg {
    pub fn analyse(body: &Body) -> Self {
        let mut structured = StructuredCfg::default();
        let mut stack: Vec<Frame> = Vec::new();

        for bb in structured_order(body) {
            if stack.last().is_some_and(|top| top.merge == bb) {
                stack.pop();
            }

            let info = BlockInfo {
                containing_construct: stack.last().map(|top| top.header),
                containing_loop: stack
                    .iter()
                    .rev()
                    .find(|frame| frame.kind == ConstructKind::Loop)
                    .map(|frame| frame.header),
            };

            structured.blocks.insert(bb, info);

            let data = &body.basic_blocks[bb];

            if let Some(merge) = data.merge {
                let kind = match (merge, &data.terminator) {
                    (Merge::Loop { .. }, _) => ConstructKind::Loop,
                    (Merge::Selection { .. }, Terminator::Switch(_)) => ConstructKind::Switch,
                    (Merge::Selection { .. }, _) => ConstructKind::Selection,
                };

                structured.constructs.insert(
                    bb,
                    ConstructInfo {
                        header: bb,
                        kind,
                        merge: merge.merge_block(),
                        continue_target: merge.continue_target(),
                        parent: info.containing_construct,
                        depth: stack.len(),
                    },
                );
                structured.construct_order.push(bb);

                stack.push(Frame {
                    header: bb,
                    kind,
                    merge: merge.merge_block(),
                });
            }
        }

        structured
    }

    fn block_info(&self, bb: BasicBlock) -> BlockInfo {
        self.blocks.get(&bb).copied().unwrap_or_default()
    }

    pub fn containing_construct(&self, bb: BasicBlock) -> Option<BasicBlock> {
        self.block_info(bb).containing_construct
    }

    pub fn containing_loop(&self, bb: BasicBlock) -> Option<BasicBlock> {
        self.block_info(bb).containing_loop
    }

    pub fn construct(&self, header: BasicBlock) -> Option<&ConstructInfo> {
        self.constructs.get(&header)
    }

    /// Headers ordered so that every construct comes before the constructs that contain it.
    pub fn headers_innermost_first(&self) -> Vec<BasicBlock> {
        let mut headers = self.construct_order.clone();

        headers.sort_by_key(|header| std::cmp::Reverse(self.constructs[header].depth));

        headers
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum StructureError {
    #[error("block {block:?} is unreachable and is not a trivial merge block or continue target")]
    UnreachableBlock {
        block: BasicBlock,
        position: Option<DebugLoc>,
    },
    #[error("block {block:?} targets {target:?}, which is not a block of this function")]
    DanglingTarget {
        block: BasicBlock,
        target: BasicBlock,
    },
    #[error("construct headed by {header:?} is malformed: {reason}")]
    MalformedConstruct {
        header: BasicBlock,
        reason: &'static str,
    },
    #[error("unsupported control flow at {block:?}: {reason}")]
    Unsupported {
        block: BasicBlock,
        reason: &'static str,
    },
}

/// Checks that the structured control flow of [body] is consistent enough to be restructured.
///
/// Unreachable blocks are tolerated only when they are a merge block consisting of nothing but an
/// `Unreachable` terminator, or a continue target consisting of nothing but a branch back to its
/// loop header. Everything else that is unreachable has to be removed first.
pub fn check_structure(body: &Body) -> Result<(), StructureError> {
    let Some(entry) = body.entry() else {
        return Ok(());
    };

    let predecessors = Predecessors::compute(body);

    if predecessors.count(entry) > 0 {
        return Err(StructureError::Unsupported {
            block: entry,
            reason: "the entry block has predecessors",
        });
    }

    let in_layout: FxHashSet<BasicBlock> = body.layout.iter().copied().collect();
    let mut merge_owner: FxHashMap<BasicBlock, BasicBlock> = FxHashMap::default();
    let mut continue_owner: FxHashMap<BasicBlock, BasicBlock> = FxHashMap::default();

    for bb in &body.layout {
        let data = &body.basic_blocks[*bb];
        let merge_targets = data
            .merge
            .iter()
            .flat_map(|merge| [Some(merge.merge_block()), merge.continue_target()])
            .flatten();

        for target in data.terminator.targets().into_iter().chain(merge_targets) {
            if !in_layout.contains(&target) {
                return Err(StructureError::DanglingTarget { block: *bb, target });
            }
        }

        let Some(merge) = data.merge else {
            continue;
        };

        let malformed = |reason| StructureError::MalformedConstruct {
            header: *bb,
            reason,
        };

        if merge.merge_block() == *bb {
            return Err(malformed("a construct cannot merge into its own header"));
        }

        if merge_owner.insert(merge.merge_block(), *bb).is_some() {
            return Err(malformed("the merge block is shared with another construct"));
        }

        match merge {
            Merge::Loop {
                merge,
                continue_target,
            } => {
                if merge == continue_target {
                    return Err(malformed("the merge block and continue target coincide"));
                }

                if continue_owner.insert(continue_target, *bb).is_some() {
                    return Err(malformed("the continue target is shared with another loop"));
                }

                if !matches!(
                    data.terminator,
                    Terminator::Branch(_) | Terminator::BranchConditional { .. }
                ) {
                    return Err(malformed("a loop header must end in a branch"));
                }
            }
            Merge::Selection { .. } => {
                if !matches!(
                    data.terminator,
                    Terminator::BranchConditional { .. } | Terminator::Switch(_)
                ) {
                    return Err(malformed(
                        "a selection header must end in a conditional branch or a switch",
                    ));
                }
            }
        }
    }

    let reachable = reachable(body);

    for bb in &body.layout {
        if reachable.contains(bb) {
            continue;
        }

        let data = &body.basic_blocks[*bb];
        let is_empty = data.statements.is_empty() && data.merge.is_none();

        let is_trivial = if let Some(header) = continue_owner.get(bb) {
            is_empty && data.terminator == Terminator::Branch(*header)
        } else if merge_owner.contains_key(bb) {
            is_empty && data.terminator == Terminator::Unreachable
        } else {
            false
        };

        if !is_trivial {
            let position = data
                .statements
                .iter()
                .find_map(|stmt| stmt.debug_loc)
                .or(data.terminator_loc);

            return Err(StructureError::UnreachableBlock {
                block: *bb,
                position,
            });
        }
    }

    let dominators = DominatorTree::compute(body);
    let structured = StructuredCfg::analyse(body);

    for header in structured.headers_innermost_first() {
        let Some(construct) = structured.construct(header) else {
            continue;
        };

        if !dominators.is_reachable(header) {
            continue;
        }

        let unsupported = |reason| StructureError::Unsupported {
            block: header,
            reason,
        };

        if structured.containing_construct(construct.merge) != construct.parent {
            return Err(unsupported(
                "the merge block lies inside another construct than its header",
            ));
        }

        if let Some(continue_target) = construct.continue_target {
            if continue_target != header && structured.containing_loop(continue_target) != Some(header)
            {
                return Err(unsupported("the continue target lies outside of its loop"));
            }

            let has_back_edge = predecessors
                .of(header)
                .iter()
                .any(|pred| dominators.dominates(header, *pred) || !dominators.is_reachable(*pred));

            if !has_back_edge {
                return Err(unsupported("the loop header has no back-edge"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{OpBinary, Switch, SwitchCase};
    use crate::ty::TY_U32;
    use crate::BinaryOperator;

    /// A loop containing a selection:
    ///
    ///        bb0
    ///         |
    ///         v
    ///        bb1 (loop header, merge bb6, continue bb5) <--+
    ///         |                                             |
    ///         v                                             |
    ///        bb2 (selection header, merge bb4)              |
    ///        / \                                            |
    ///       v   |                                           |
    ///      bb3  |                                           |
    ///        \  |                                           |
    ///         v v                                           |
    ///         bb4                                           |
    ///          |                                            |
    ///          v                                            |
    ///         bb5 ------------------------------------------+
    ///          |
    ///          v
    ///         bb6
    fn loop_with_selection() -> (Body, [BasicBlock; 7]) {
        let mut body = Body::default();

        let bb0 = body.append_block();
        let bb1 = body.append_block();
        let bb2 = body.append_block();
        let bb3 = body.append_block();
        let bb4 = body.append_block();
        let bb5 = body.append_block();
        let bb6 = body.append_block();

        body.basic_blocks[bb0].terminator = Terminator::Branch(bb1);
        body.basic_blocks[bb1].merge = Some(Merge::Loop {
            merge: bb6,
            continue_target: bb5,
        });
        body.basic_blocks[bb1].terminator = Terminator::Branch(bb2);
        body.basic_blocks[bb2].merge = Some(Merge::Selection { merge: bb4 });
        body.basic_blocks[bb2].terminator = Terminator::BranchConditional {
            condition: true.into(),
            true_target: bb3,
            false_target: bb4,
        };
        body.basic_blocks[bb3].terminator = Terminator::Branch(bb4);
        body.basic_blocks[bb4].terminator = Terminator::Branch(bb5);
        body.basic_blocks[bb5].terminator = Terminator::BranchConditional {
            condition: true.into(),
            true_target: bb1,
            false_target: bb6,
        };
        body.basic_blocks[bb6].terminator = Terminator::Return;

        (body, [bb0, bb1, bb2, bb3, bb4, bb5, bb6])
    }

    #[test]
    fn test_structured_order() {
        let (body, [bb0, bb1, bb2, bb3, bb4, bb5, bb6]) = loop_with_selection();

        assert_eq!(
            structured_order(&body),
            vec![bb0, bb1, bb2, bb3, bb4, bb5, bb6]
        );
    }

    #[test]
    fn test_structured_order_visits_unreachable_merge() {
        let mut body = Body::default();

        //      bb0 (selection header, merge bb3)
        //      / \
        //     v   v
        //   bb1   bb2
        //
        // Both arms return, bb3 is only reachable through the merge declaration.

        let bb0 = body.append_block();
        let bb1 = body.append_block();
        let bb2 = body.append_block();
        let bb3 = body.append_block();

        body.basic_blocks[bb0].merge = Some(Merge::Selection { merge: bb3 });
        body.basic_blocks[bb0].terminator = Terminator::BranchConditional {
            condition: true.into(),
            true_target: bb1,
            false_target: bb2,
        };
        body.basic_blocks[bb1].terminator = Terminator::Return;
        body.basic_blocks[bb2].terminator = Terminator::Return;

        let order = structured_order(&body);

        assert_eq!(order.first(), Some(&bb0));
        assert_eq!(order.last(), Some(&bb3));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_analyse_nesting() {
        let (body, [bb0, bb1, bb2, bb3, bb4, bb5, bb6]) = loop_with_selection();
        let structured = StructuredCfg::analyse(&body);

        assert_eq!(structured.containing_construct(bb0), None);
        assert_eq!(structured.containing_construct(bb1), None);
        assert_eq!(structured.containing_construct(bb2), Some(bb1));
        assert_eq!(structured.containing_construct(bb3), Some(bb2));
        assert_eq!(structured.containing_construct(bb4), Some(bb1));
        assert_eq!(structured.containing_construct(bb5), Some(bb1));
        assert_eq!(structured.containing_construct(bb6), None);

        assert_eq!(structured.containing_loop(bb3), Some(bb1));
        assert_eq!(structured.containing_loop(bb5), Some(bb1));
        assert_eq!(structured.containing_loop(bb6), None);

        let selection = structured.construct(bb2).unwrap();

        assert_eq!(selection.kind, ConstructKind::Selection);
        assert_eq!(selection.parent, Some(bb1));
        assert_eq!(selection.depth, 1);
        assert_eq!(structured.construct(bb1).unwrap().depth, 0);
        assert_eq!(structured.headers_innermost_first(), vec![bb2, bb1]);
    }

    #[test]
    fn test_analyse_switch_inside_loop() {
        let (mut body, [_, bb1, bb2, bb3, bb4, _, bb6]) = loop_with_selection();

        body.basic_blocks[bb2].terminator = Terminator::Switch(Switch {
            selector: 1u32.into(),
            default: bb4,
            cases: smallvec::smallvec![SwitchCase {
                value: 0,
                target: bb3
            }],
        });

        let structured = StructuredCfg::analyse(&body);

        assert_eq!(structured.construct(bb2).unwrap().kind, ConstructKind::Switch);
        assert_eq!(structured.construct(bb2).unwrap().parent, Some(bb1));
        assert_eq!(structured.containing_construct(bb3), Some(bb2));
        assert_eq!(structured.containing_construct(bb4), Some(bb1));
        assert_eq!(structured.containing_loop(bb3), Some(bb1));
        assert_eq!(structured.containing_loop(bb6), None);
    }

    #[test]
    fn test_check_structure_accepts_well_formed() {
        let (body, _) = loop_with_selection();

        assert_eq!(check_structure(&body), Ok(()));
    }

    #[test]
    fn test_check_structure_accepts_trivial_unreachable_merge() {
        let mut body = Body::default();

        let bb0 = body.append_block();
        let bb1 = body.append_block();
        let bb2 = body.append_block();
        let bb3 = body.append_block();

        body.basic_blocks[bb0].merge = Some(Merge::Selection { merge: bb3 });
        body.basic_blocks[bb0].terminator = Terminator::BranchConditional {
            condition: true.into(),
            true_target: bb1,
            false_target: bb2,
        };
        body.basic_blocks[bb1].terminator = Terminator::Return;
        body.basic_blocks[bb2].terminator = Terminator::Return;
        body.basic_blocks[bb3].terminator = Terminator::Unreachable;

        assert_eq!(check_structure(&body), Ok(()));
    }

    #[test]
    fn test_check_structure_rejects_nontrivial_unreachable_block() {
        let (mut body, [.., bb6]) = loop_with_selection();

        let dead = body.append_block();
        let value = body.add_value(TY_U32);

        body.basic_blocks[dead].statements.push(
            OpBinary {
                operator: BinaryOperator::Add,
                lhs: 1u32.into(),
                rhs: 1u32.into(),
                result: value,
            }
            .into(),
        );
        body.basic_blocks[dead].terminator = Terminator::Branch(bb6);

        assert_eq!(
            check_structure(&body),
            Err(StructureError::UnreachableBlock {
                block: dead,
                position: None
            })
        );
    }

    #[test]
    fn test_check_structure_rejects_unreachable_merge_with_statements() {
        let mut body = Body::default();

        let bb0 = body.append_block();
        let bb1 = body.append_block();
        let bb2 = body.append_block();
        let value = body.add_value(TY_U32);

        body.basic_blocks[bb0].merge = Some(Merge::Selection { merge: bb2 });
        body.basic_blocks[bb0].terminator = Terminator::BranchConditional {
            condition: true.into(),
            true_target: bb1,
            false_target: bb1,
        };
        body.basic_blocks[bb1].terminator = Terminator::Return;
        body.basic_blocks[bb2].statements.push(
            OpBinary {
                operator: BinaryOperator::Add,
                lhs: 1u32.into(),
                rhs: 1u32.into(),
                result: value,
            }
            .into(),
        );
        body.basic_blocks[bb2].terminator = Terminator::Unreachable;

        assert!(matches!(
            check_structure(&body),
            Err(StructureError::UnreachableBlock { block, .. }) if block == bb2
        ));
    }

    #[test]
    fn test_check_structure_rejects_shared_merge() {
        let (mut body, [_, bb1, bb2, bb3, _, _, bb6]) = loop_with_selection();

        body.basic_blocks[bb2].merge = Some(Merge::Selection { merge: bb6 });
        body.basic_blocks[bb3].terminator = Terminator::Branch(bb6);

        assert!(matches!(
            check_structure(&body),
            Err(StructureError::MalformedConstruct { header, .. }) if header == bb2 || header == bb1
        ));
    }

    #[test]
    fn test_check_structure_rejects_entry_with_predecessors() {
        let (mut body, [bb0, _, _, _, _, bb5, bb6]) = loop_with_selection();

        body.basic_blocks[bb5].terminator = Terminator::BranchConditional {
            condition: true.into(),
            true_target: bb0,
            false_target: bb6,
        };

        assert!(matches!(
            check_structure(&body),
            Err(StructureError::Unsupported { block, .. }) if block == bb0
        ));
    }
}
