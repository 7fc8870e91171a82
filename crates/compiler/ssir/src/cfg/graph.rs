use std::mem;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use thin_vec::ThinVec;

use crate::analyse::dominators::DominatorTree;
use crate::cfg::{
    BasicBlock, BasicBlockData, Body, Merge, Op, OpPhi, PhiIncoming, Statement, Terminator, Value,
};

/// The distinct predecessors of every block.
///
/// A block that branches to the same target along several edges (e.g. a conditional branch with
/// identical targets) counts as a single predecessor, matching the one-entry-per-predecessor rule
/// for phis. Predecessors are listed in layout order.
#[derive(Clone, Default, Debug)]
pub struct Predecessors {
    map: FxHashMap<BasicBlock, SmallVec<[BasicBlock; 4]>>,
}

impl Predecessors {
    pub fn compute(body: &Body) -> Self {
        let mut map: FxHashMap<BasicBlock, SmallVec<[BasicBlock; 4]>> = FxHashMap::default();

        for bb in &body.layout {
            for succ in body.successors(*bb) {
                map.entry(succ).or_default().push(*bb);
            }
        }

        Predecessors { map }
    }

    pub fn of(&self, bb: BasicBlock) -> &[BasicBlock] {
        self.map.get(&bb).map(|p| p.as_slice()).unwrap_or(&[])
    }

    pub fn count(&self, bb: BasicBlock) -> usize {
        self.of(bb).len()
    }
}

pub fn rename_phi_incoming(body: &mut Body, target: BasicBlock, old: BasicBlock, new: BasicBlock) {
    for phi in body.basic_blocks[target].phis_mut() {
        for incoming in &mut phi.incoming {
            if incoming.block == old {
                incoming.block = new;
            }
        }
    }
}

/// Gives every phi in [target] an undefined incoming value for the new predecessor [new_pred].
pub fn add_undef_phi_incoming(body: &mut Body, target: BasicBlock, new_pred: BasicBlock) {
    let Body {
        local_values,
        basic_blocks,
        ..
    } = body;

    for phi in basic_blocks[target].phis_mut() {
        let ty = local_values[phi.result].ty;

        phi.incoming.push(PhiIncoming {
            value: Value::Undef(ty),
            block: new_pred,
        });
    }
}

/// Splits [bb] before the statement at index [at].
///
/// The statements from [at] onward, the merge annotation and the terminator move to a new block
/// that directly follows [bb] in the layout; [bb] is left branching to the new block. Phis in the
/// successors are updated to name the new block as their predecessor.
pub fn split_block(body: &mut Body, bb: BasicBlock, at: usize) -> BasicBlock {
    let new_bb = body.insert_block_after(bb);

    let data = &mut body.basic_blocks[bb];
    let tail = data.statements.split_off(at);
    let merge = data.merge.take();
    let terminator = mem::replace(&mut data.terminator, Terminator::Branch(new_bb));
    let terminator_loc = data.terminator_loc.take();

    body.basic_blocks[new_bb] = BasicBlockData {
        statements: tail,
        merge,
        terminator,
        terminator_loc,
    };

    for succ in body.successors(new_bb) {
        rename_phi_incoming(body, succ, bb, new_bb);
    }

    new_bb
}

/// Splits a loop header so that [header] becomes a pre-header for the loop.
///
/// Everything after the phis, including the loop's merge annotation, moves into a new header
/// block. The phis move along with it: each keeps its back-edge entry and receives the value
/// flowing in from the pre-header for the remaining entries. Where more than one pre-header entry
/// remains, a new phi in the pre-header combines them. The back-edge is redirected to the new
/// header, so new edges into [header] no longer add predecessors to the loop.
///
/// Returns `None` if the back-edge block cannot be found; [body] is left unchanged in that case.
pub fn split_loop_header(body: &mut Body, header: BasicBlock) -> Option<BasicBlock> {
    let predecessors = Predecessors::compute(body);
    let dominators = DominatorTree::compute(body);

    let mut latch = predecessors
        .of(header)
        .iter()
        .copied()
        .find(|pred| dominators.dominates(header, *pred) || !dominators.is_reachable(*pred))?;

    let phi_count = body.basic_blocks[header].first_non_phi();
    let new_header = split_block(body, header, phi_count);

    if latch == header {
        latch = new_header;
    }

    if let Some(Merge::Loop {
        continue_target, ..
    }) = &mut body.basic_blocks[new_header].merge
    {
        if *continue_target == header {
            *continue_target = new_header;
        }
    }

    let phis = mem::take(&mut body.basic_blocks[header].statements);
    let mut preheader_phis = Vec::new();
    let mut header_phis = Vec::with_capacity(phis.len());

    for Statement { op, debug_loc } in phis {
        let Op::OpPhi(OpPhi { incoming, result }) = op else {
            unreachable!("only phis remain in the pre-header")
        };

        let ty = body[result].ty;
        let (mut back_edge, preheader): (ThinVec<_>, ThinVec<_>) = incoming
            .into_iter()
            .partition(|incoming: &PhiIncoming| incoming.block == latch);

        let preheader_value = match preheader.len() {
            0 => Value::Undef(ty),
            1 => preheader[0].value,
            _ => {
                let merged = body.add_value(ty);

                preheader_phis.push(
                    Statement::from(OpPhi {
                        incoming: preheader,
                        result: merged,
                    })
                    .with_debug_loc(debug_loc),
                );

                merged.into()
            }
        };

        back_edge.push(PhiIncoming {
            value: preheader_value,
            block: header,
        });

        header_phis.push(
            Statement::from(OpPhi {
                incoming: back_edge,
                result,
            })
            .with_debug_loc(debug_loc),
        );
    }

    body.basic_blocks[header].statements = preheader_phis;
    body.basic_blocks[new_header]
        .statements
        .splice(0..0, header_phis);
    body.basic_blocks[latch]
        .terminator
        .replace_target(header, new_header);

    Some(new_header)
}
