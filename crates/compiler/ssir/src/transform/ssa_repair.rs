//! Restores the dominance property of SSA values after control flow was rewired.
//!
//! Control-flow transformations such as merge return add edges into blocks that used to be
//! reachable only through the definition of some value. Uses of that value then see a path on
//! which it was never computed. [repair_ssa] finds such uses and feeds them a value that is
//! defined on every path: phis are placed where paths join, with an undefined placeholder for
//! paths that skip the definition. Address computations are recomputed next to the use instead,
//! unless the module allows phis over pointers.

use std::mem;

use rustc_hash::{FxHashMap, FxHashSet};
use thin_vec::ThinVec;
use tracing::{instrument, trace, warn};

use crate::analyse::dominators::DominatorTree;
use crate::cfg::graph::Predecessors;
use crate::cfg::{
    BasicBlock, Body, DefSite, LocalValue, Op, OpPhi, PhiIncoming, Statement, Value,
};
use crate::ty::{Type, TypeRegistry};

struct PendingPhi {
    block: BasicBlock,
    result: LocalValue,
    incoming: ThinVec<PhiIncoming>,
}

/// Computes which definition of a value reaches a given point in the control-flow graph.
///
/// The updater is told which value is available at the end of the blocks that (re)define the
/// variable it tracks; every other block sees the value flowing in from its predecessors. Blocks
/// with several predecessors get a phi, blocks without predecessors get an undefined value.
///
/// Phis are recorded as pending and only become part of the body through
/// [SsaUpdater::materialize_phis], so queries can be made while statement indices of the body
/// are still in use.
pub struct SsaUpdater {
    ty: Type,
    available: FxHashMap<BasicBlock, Value>,
    at_start: FxHashMap<BasicBlock, Value>,
    phis: Vec<PendingPhi>,
}

impl SsaUpdater {
    pub fn new(ty: Type) -> Self {
        SsaUpdater {
            ty,
            available: FxHashMap::default(),
            at_start: FxHashMap::default(),
            phis: Vec::new(),
        }
    }

    /// Records [value] as the value of the variable at the end of [bb].
    pub fn set_available(&mut self, bb: BasicBlock, value: Value) {
        self.available.insert(bb, value);
    }

    pub fn value_at_end(
        &mut self,
        body: &mut Body,
        predecessors: &Predecessors,
        bb: BasicBlock,
    ) -> Value {
        if let Some(value) = self.available.get(&bb) {
            return *value;
        }

        self.value_at_start(body, predecessors, bb)
    }

    pub fn value_at_start(
        &mut self,
        body: &mut Body,
        predecessors: &Predecessors,
        bb: BasicBlock,
    ) -> Value {
        if let Some(value) = self.at_start.get(&bb) {
            return *value;
        }

        // Walk up the chain of single predecessors. Only a block with several predecessors can
        // close a reachable cycle, and it records its phi before querying its predecessors.
        let mut chain = vec![bb];
        let mut current = bb;

        let value = loop {
            match predecessors.of(current) {
                [] => break Value::Undef(self.ty),
                [pred] => {
                    if let Some(value) = self
                        .available
                        .get(pred)
                        .or_else(|| self.at_start.get(pred))
                    {
                        break *value;
                    }

                    // A cycle of single-predecessor blocks is unreachable.
                    if chain.contains(pred) {
                        break Value::Undef(self.ty);
                    }

                    chain.push(*pred);
                    current = *pred;
                }
                preds => break self.insert_phi(body, predecessors, current, preds),
            }
        };

        for block in chain {
            self.at_start.insert(block, value);
        }

        value
    }

    fn insert_phi(
        &mut self,
        body: &mut Body,
        predecessors: &Predecessors,
        bb: BasicBlock,
        preds: &[BasicBlock],
    ) -> Value {
        let result = body.add_value(self.ty);
        let index = self.phis.len();

        self.at_start.insert(bb, result.into());
        self.phis.push(PendingPhi {
            block: bb,
            result,
            incoming: ThinVec::with_capacity(preds.len()),
        });

        for pred in preds {
            let value = self.value_at_end(body, predecessors, *pred);

            self.phis[index].incoming.push(PhiIncoming {
                value,
                block: *pred,
            });
        }

        result.into()
    }

    /// Inserts the phis created by queries at the start of their blocks and returns their
    /// results.
    pub fn materialize_phis(&mut self, body: &mut Body) -> Vec<LocalValue> {
        let mut created = Vec::with_capacity(self.phis.len());

        for PendingPhi {
            block,
            result,
            incoming,
        } in self.phis.drain(..)
        {
            body.basic_blocks[block]
                .statements
                .insert(0, OpPhi { incoming, result }.into());

            created.push(result);
        }

        created
    }
}

/// Removes phis among [candidates] whose incoming values, ignoring the phi itself, are all the
/// same value. Uses of a removed phi are replaced with that value. Repeats until no candidate
/// is trivial, as removing one phi can make another trivial.
pub fn remove_trivial_phis(body: &mut Body, candidates: &[LocalValue]) -> usize {
    let candidate_set: FxHashSet<LocalValue> = candidates.iter().copied().collect();
    let mut removed = 0;

    loop {
        let mut trivial = None;

        'search: for bb in &body.layout {
            for (index, stmt) in body.basic_blocks[*bb].statements.iter().enumerate() {
                let Some(phi) = stmt.op.as_phi() else {
                    break;
                };

                if !candidate_set.contains(&phi.result) {
                    continue;
                }

                if let Some(replacement) = trivial_phi_value(body, phi) {
                    trivial = Some((*bb, index, phi.result, replacement));

                    break 'search;
                }
            }
        }

        let Some((bb, index, result, replacement)) = trivial else {
            return removed;
        };

        body.basic_blocks[bb].statements.remove(index);
        body.replace_all_uses(result, replacement);
        body.local_values.remove(result);

        removed += 1;
    }
}

fn trivial_phi_value(body: &Body, phi: &OpPhi) -> Option<Value> {
    let mut same = None;

    for incoming in &phi.incoming {
        if incoming.value == Value::Local(phi.result) {
            continue;
        }

        match same {
            None => same = Some(incoming.value),
            Some(value) if value == incoming.value => {}
            Some(_) => return None,
        }
    }

    Some(same.unwrap_or(Value::Undef(body[phi.result].ty)))
}

/// A place where a value is used.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum UseSite {
    Statement {
        block: BasicBlock,
        index: usize,
    },
    PhiIncoming {
        block: BasicBlock,
        index: usize,
        incoming: usize,
    },
    Terminator {
        block: BasicBlock,
    },
}

impl UseSite {
    /// The block and statement index before which the used value has to be available.
    fn point(&self, body: &Body) -> (BasicBlock, usize) {
        match *self {
            UseSite::Statement { block, index } => (block, index),
            UseSite::PhiIncoming {
                block,
                index,
                incoming,
            } => {
                let pred = body.basic_blocks[block].statements[index]
                    .op
                    .expect_phi()
                    .incoming[incoming]
                    .block;

                (pred, body.basic_blocks[pred].statements.len())
            }
            UseSite::Terminator { block } => (block, body.basic_blocks[block].statements.len()),
        }
    }

    fn replace(&self, body: &mut Body, old: LocalValue, new: Value) {
        let replace = |value: &mut Value| {
            if *value == Value::Local(old) {
                *value = new;
            }
        };

        match *self {
            UseSite::Statement { block, index } => {
                body.basic_blocks[block].statements[index]
                    .op
                    .visit_values_mut(replace);
            }
            UseSite::PhiIncoming {
                block,
                index,
                incoming,
            } => {
                let phi = body.basic_blocks[block].statements[index].op.expect_phi_mut();

                replace(&mut phi.incoming[incoming].value);
            }
            UseSite::Terminator { block } => {
                body.basic_blocks[block].terminator.visit_values_mut(replace);
            }
        }
    }
}

fn is_available(
    defs: &FxHashMap<LocalValue, DefSite>,
    dominators: &DominatorTree,
    value: LocalValue,
    block: BasicBlock,
    index: usize,
) -> bool {
    // Values without a definition are reported by the verifier, not repaired here.
    defs.get(&value)
        .map_or(true, |site| site.reaches(dominators, block, index))
}

fn find_violations(
    body: &Body,
    defs: &FxHashMap<LocalValue, DefSite>,
    dominators: &DominatorTree,
) -> Vec<(LocalValue, UseSite)> {
    let mut violations = Vec::new();

    let mut record = |value: &Value, block: BasicBlock, index: usize, site: UseSite| {
        if let Value::Local(value) = *value {
            if !is_available(defs, dominators, value, block, index)
                && !violations.contains(&(value, site))
            {
                violations.push((value, site));
            }
        }
    };

    for bb in body.blocks() {
        if !dominators.is_reachable(bb) {
            continue;
        }

        let data = &body.basic_blocks[bb];

        for (index, stmt) in data.statements.iter().enumerate() {
            if let Op::OpPhi(phi) = &stmt.op {
                for (i, incoming) in phi.incoming.iter().enumerate() {
                    if !dominators.is_reachable(incoming.block) {
                        continue;
                    }

                    let pred_end = body.basic_blocks[incoming.block].statements.len();

                    record(
                        &incoming.value,
                        incoming.block,
                        pred_end,
                        UseSite::PhiIncoming {
                            block: bb,
                            index,
                            incoming: i,
                        },
                    );
                }
            } else {
                stmt.op.visit_values(|value| {
                    record(value, bb, index, UseSite::Statement { block: bb, index })
                });
            }
        }

        data.terminator.visit_values(|value| {
            record(
                value,
                bb,
                data.statements.len(),
                UseSite::Terminator { block: bb },
            )
        });
    }

    violations
}

struct Repair<'a> {
    body: &'a mut Body,
    types: &'a TypeRegistry,
    allow_pointer_phis: bool,
    dominators: DominatorTree,
    predecessors: Predecessors,
    defs: FxHashMap<LocalValue, DefSite>,
    updaters: FxHashMap<LocalValue, SsaUpdater>,
    recomputed: FxHashMap<(LocalValue, BasicBlock, usize), LocalValue>,
    insertions: FxHashMap<BasicBlock, Vec<(usize, Statement)>>,
}

impl Repair<'_> {
    fn value_at(&mut self, value: LocalValue, block: BasicBlock, index: usize) -> Value {
        if is_available(&self.defs, &self.dominators, value, block, index) {
            return value.into();
        }

        let ty = self.body[value].ty;

        if !self.allow_pointer_phis && self.types.is_ptr(ty) {
            if let Some(recomputed) = self.recompute(value, block, index) {
                return recomputed.into();
            }

            warn!(
                ?value,
                ?block,
                "pointer value cannot be recomputed at its use; merging it with a phi"
            );
        }

        let def_block = self.defs[&value].block;
        let body = &mut *self.body;
        let updater = self.updaters.entry(value).or_insert_with(|| {
            let mut updater = SsaUpdater::new(ty);

            updater.set_available(def_block, value.into());

            updater
        });

        updater.value_at_start(body, &self.predecessors, block)
    }

    /// Recomputes the address [value] right before [index] in [block], if it is the result of
    /// an address computation.
    fn recompute(
        &mut self,
        value: LocalValue,
        block: BasicBlock,
        index: usize,
    ) -> Option<LocalValue> {
        if let Some(recomputed) = self.recomputed.get(&(value, block, index)) {
            return Some(*recomputed);
        }

        let site = self.defs.get(&value)?;
        let def_index = site.index?;
        let original = &self.body.basic_blocks[site.block].statements[def_index];

        let Op::OpPtrElementPtr(op) = &original.op else {
            return None;
        };

        let mut op = op.clone();
        let debug_loc = original.debug_loc;

        op.ptr = self.repair_operand(op.ptr, block, index);

        for i in 0..op.indices.len() {
            op.indices[i] = self.repair_operand(op.indices[i], block, index);
        }

        let ty = self.body[value].ty;
        let result = self.body.add_value(ty);

        op.result = result;

        trace!(?value, ?result, ?block, "recomputed pointer value");

        self.insertions
            .entry(block)
            .or_default()
            .push((index, Statement::from(op).with_debug_loc(debug_loc)));
        self.recomputed.insert((value, block, index), result);

        Some(result)
    }

    fn repair_operand(&mut self, operand: Value, block: BasicBlock, index: usize) -> Value {
        match operand {
            Value::Local(value) => self.value_at(value, block, index),
            other => other,
        }
    }

    /// Applies the deferred insertions and returns the phis that were created.
    fn finish(mut self) -> Vec<LocalValue> {
        for (block, mut insertions) in mem::take(&mut self.insertions) {
            // Stable sort keeps operands ahead of the statements that use them when they are
            // inserted at the same index.
            insertions.sort_by_key(|(index, _)| *index);

            let statements = &mut self.body.basic_blocks[block].statements;

            for (index, stmt) in insertions.into_iter().rev() {
                statements.insert(index, stmt);
            }
        }

        let mut created = Vec::new();

        for updater in self.updaters.values_mut() {
            created.extend(updater.materialize_phis(self.body));
        }

        created
    }
}

/// Repairs every use in a reachable block that its definition no longer dominates.
///
/// Pointer-typed results of address computations are recomputed before the offending use unless
/// [allow_pointer_phis] is set; all other values are merged with phis. Returns whether [body]
/// was changed.
#[instrument(skip_all)]
pub fn repair_ssa(body: &mut Body, types: &TypeRegistry, allow_pointer_phis: bool) -> bool {
    let dominators = DominatorTree::compute(body);
    let Ok(defs) = body.def_sites() else {
        warn!("a value is defined more than once; leaving the body to the verifier");

        return false;
    };
    let violations = find_violations(body, &defs, &dominators);

    if violations.is_empty() {
        return false;
    }

    trace!(count = violations.len(), "repairing uses not dominated by their definition");

    let predecessors = Predecessors::compute(body);
    let mut repair = Repair {
        body: &mut *body,
        types,
        allow_pointer_phis,
        dominators,
        predecessors,
        defs,
        updaters: FxHashMap::default(),
        recomputed: FxHashMap::default(),
        insertions: FxHashMap::default(),
    };

    for (value, site) in violations {
        let (block, index) = site.point(&*repair.body);
        let new_value = repair.value_at(value, block, index);

        site.replace(&mut *repair.body, value, new_value);
    }

    let created = repair.finish();

    remove_trivial_phis(body, &created);

    true
}

/// Replaces the function-scope variable [var] with SSA values.
///
/// Loads take the value of the last store before them in the same block, or the value flowing
/// into the block. The variable must not escape: if [var] is used as anything but the pointer
/// operand of a load or store, the body is left unchanged and `false` is returned.
#[instrument(skip_all)]
pub fn promote_variable(body: &mut Body, var: LocalValue) -> bool {
    let mut ty = None;
    let mut escapes = false;

    for bb in body.blocks() {
        let data = &body.basic_blocks[bb];

        for stmt in &data.statements {
            match &stmt.op {
                Op::OpAlloca(op) if op.result == var => ty = Some(op.ty),
                Op::OpLoad(_) => {}
                Op::OpStore(op) => escapes |= op.value == Value::Local(var),
                op => op.visit_values(|value| escapes |= *value == Value::Local(var)),
            }
        }

        data.terminator
            .visit_values(|value| escapes |= *value == Value::Local(var));
    }

    let Some(ty) = ty else {
        return false;
    };

    if escapes {
        return false;
    }

    let predecessors = Predecessors::compute(body);
    let mut updater = SsaUpdater::new(ty);
    let mut accesses: Vec<(BasicBlock, Vec<Access>)> = Vec::new();

    for bb in body.blocks() {
        let mut block_accesses = Vec::new();

        for stmt in &body.basic_blocks[bb].statements {
            match &stmt.op {
                Op::OpStore(op) if op.ptr == Value::Local(var) => {
                    block_accesses.push(Access::Store(op.value))
                }
                Op::OpLoad(op) if op.ptr == Value::Local(var) => {
                    block_accesses.push(Access::Load(op.result))
                }
                _ => {}
            }
        }

        if let Some(Access::Store(value)) = block_accesses
            .iter()
            .rev()
            .find(|access| matches!(access, Access::Store(_)))
        {
            updater.set_available(bb, *value);
        }

        if !block_accesses.is_empty() {
            accesses.push((bb, block_accesses));
        }
    }

    let mut replacements: Vec<(LocalValue, Value)> = Vec::new();

    for (bb, block_accesses) in accesses {
        let mut current = None;

        for access in block_accesses {
            match access {
                Access::Store(value) => current = Some(value),
                Access::Load(result) => {
                    let value = match current {
                        Some(value) => value,
                        None => updater.value_at_start(body, &predecessors, bb),
                    };

                    replacements.push((result, value));
                }
            }
        }
    }

    for data in body.basic_blocks.values_mut() {
        data.statements.retain(|stmt| match &stmt.op {
            Op::OpAlloca(op) => op.result != var,
            Op::OpLoad(op) => op.ptr != Value::Local(var),
            Op::OpStore(op) => op.ptr != Value::Local(var),
            _ => true,
        });
    }

    let created = updater.materialize_phis(body);

    for i in 0..replacements.len() {
        let (result, value) = replacements[i];

        body.replace_all_uses(result, value);
        body.local_values.remove(result);

        for (_, later) in &mut replacements[i + 1..] {
            if *later == Value::Local(result) {
                *later = value;
            }
        }
    }

    body.local_values.remove(var);

    remove_trivial_phis(body, &created);

    true
}

#[derive(Clone, Copy, Debug)]
enum Access {
    Store(Value),
    Load(LocalValue),
}
