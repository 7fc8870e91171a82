pub mod graph;
pub mod visit;

#[cfg(test)]
pub(crate) mod eval;

use std::fmt;
use std::ops::{Index, IndexMut};

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use smallvec::SmallVec;
use thin_vec::ThinVec;

use crate::analyse::dominators::DominatorTree;
use crate::ty::{Type, TY_BOOL, TY_F32, TY_I32, TY_U32};
use crate::{BinaryOperator, FnSig, Function, Symbol, UnaryOperator};

slotmap::new_key_type! {
    pub struct LocalValue;
    pub struct BasicBlock;
}

#[derive(Clone, Serialize, Deserialize, Default, Debug)]
pub struct Cfg {
    pub function_body: FunctionBodyRegistry,
}

#[derive(Clone, Serialize, Deserialize, Default, Debug)]
pub struct FunctionBodyRegistry {
    store: FxHashMap<Function, Body>,
}

impl FunctionBodyRegistry {
    pub fn contains(&self, function: Function) -> bool {
        self.store.contains_key(&function)
    }

    pub fn insert(&mut self, function: Function, body: Body) {
        self.store.insert(function, body);
    }

    pub fn get(&self, function: Function) -> Option<&Body> {
        self.store.get(&function)
    }

    pub fn get_mut(&mut self, function: Function) -> Option<&mut Body> {
        self.store.get_mut(&function)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Function, &Body)> {
        self.store.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = Function> + use<'_> {
        self.store.keys().copied()
    }
}

impl Index<Function> for FunctionBodyRegistry {
    type Output = Body;

    fn index(&self, function: Function) -> &Self::Output {
        self.get(function).expect("function not registered")
    }
}

impl IndexMut<Function> for FunctionBodyRegistry {
    fn index_mut(&mut self, function: Function) -> &mut Self::Output {
        self.get_mut(function).expect("function not registered")
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct LocalValueData {
    pub ty: Type,
}

/// A source position attached to a statement or terminator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct DebugLoc {
    pub file: Symbol,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for DebugLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum InlineConst {
    U32(u32),
    I32(i32),
    F32(OrderedFloat<f32>),
    Bool(bool),
}

impl From<f32> for InlineConst {
    fn from(value: f32) -> Self {
        InlineConst::F32(OrderedFloat(value))
    }
}

impl InlineConst {
    pub fn ty(&self) -> Type {
        match self {
            InlineConst::U32(_) => TY_U32,
            InlineConst::I32(_) => TY_I32,
            InlineConst::F32(_) => TY_F32,
            InlineConst::Bool(_) => TY_BOOL,
        }
    }
}

impl fmt::Display for InlineConst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InlineConst::U32(v) => write!(f, "{}u32", v),
            InlineConst::I32(v) => write!(f, "{}i32", v),
            InlineConst::F32(v) => write!(f, "{}f32", v),
            InlineConst::Bool(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum Value {
    Local(LocalValue),
    InlineConst(InlineConst),
    /// A value of the given type whose contents are unspecified.
    ///
    /// Stands in for a value on control-flow paths along which the value was never computed.
    Undef(Type),
}

impl Value {
    pub fn is_local(&self) -> bool {
        matches!(self, Value::Local(_))
    }

    pub fn as_local(&self) -> Option<LocalValue> {
        if let Value::Local(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn expect_local(&self) -> LocalValue {
        if let Value::Local(v) = self {
            *v
        } else {
            panic!("expected local value")
        }
    }

    pub fn expect_inline_const(&self) -> InlineConst {
        if let Value::InlineConst(v) = self {
            *v
        } else {
            panic!("expected inline const")
        }
    }
}

impl From<LocalValue> for Value {
    fn from(value: LocalValue) -> Self {
        Value::Local(value)
    }
}

impl From<&'_ LocalValue> for Value {
    fn from(value: &LocalValue) -> Self {
        Value::Local(*value)
    }
}

impl From<InlineConst> for Value {
    fn from(value: InlineConst) -> Self {
        Value::InlineConst(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        InlineConst::U32(value).into()
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        InlineConst::I32(value).into()
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        InlineConst::F32(OrderedFloat(value)).into()
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        InlineConst::Bool(value).into()
    }
}

/// Allocates function-scope storage for a value of type [ty]; the [result] is a pointer to it.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct OpAlloca {
    pub ty: Type,
    pub result: LocalValue,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct OpAssign {
    pub value: Value,
    pub result: LocalValue,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct OpLoad {
    pub ptr: Value,
    pub result: LocalValue,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct OpStore {
    pub ptr: Value,
    pub value: Value,
}

/// Computes the address of an element inside the aggregate [ptr] points to.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct OpPtrElementPtr {
    pub element_ty: Type,
    pub ptr: Value,
    pub indices: ThinVec<Value>,
    pub result: LocalValue,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct OpUnary {
    pub operator: UnaryOperator,
    pub value: Value,
    pub result: LocalValue,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct OpBinary {
    pub operator: BinaryOperator,
    pub lhs: Value,
    pub rhs: Value,
    pub result: LocalValue,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct OpCall {
    pub function: Function,
    pub args: ThinVec<Value>,
    pub result: Option<LocalValue>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct PhiIncoming {
    pub value: Value,
    pub block: BasicBlock,
}

/// Selects a value based on the predecessor block control arrived from.
///
/// A phi must have exactly one [PhiIncoming] entry for every distinct predecessor of the block it
/// lives in. Phis always precede all other statements in a block.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct OpPhi {
    pub incoming: ThinVec<PhiIncoming>,
    pub result: LocalValue,
}

impl OpPhi {
    pub fn incoming_for(&self, block: BasicBlock) -> Option<Value> {
        self.incoming
            .iter()
            .find(|incoming| incoming.block == block)
            .map(|incoming| incoming.value)
    }
}

macro_rules! gen_op {
    ($($op:ident,)*) => {
        #[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
        pub enum Op {
            $($op($op),)*
        }

        $(impl From<$op> for Op {
            fn from(op: $op) -> Self {
                Op::$op(op)
            }
        })*

        $(impl From<$op> for Statement {
            fn from(op: $op) -> Self {
                Statement::new(Op::$op(op))
            }
        })*
    };
}

gen_op! {
    OpAlloca,
    OpAssign,
    OpLoad,
    OpStore,
    OpPtrElementPtr,
    OpUnary,
    OpBinary,
    OpCall,
    OpPhi,
}

impl Op {
    pub fn result(&self) -> Option<LocalValue> {
        match self {
            Op::OpAlloca(op) => Some(op.result),
            Op::OpAssign(op) => Some(op.result),
            Op::OpLoad(op) => Some(op.result),
            Op::OpStore(_) => None,
            Op::OpPtrElementPtr(op) => Some(op.result),
            Op::OpUnary(op) => Some(op.result),
            Op::OpBinary(op) => Some(op.result),
            Op::OpCall(op) => op.result,
            Op::OpPhi(op) => Some(op.result),
        }
    }

    pub fn result_mut(&mut self) -> Option<&mut LocalValue> {
        match self {
            Op::OpAlloca(op) => Some(&mut op.result),
            Op::OpAssign(op) => Some(&mut op.result),
            Op::OpLoad(op) => Some(&mut op.result),
            Op::OpStore(_) => None,
            Op::OpPtrElementPtr(op) => Some(&mut op.result),
            Op::OpUnary(op) => Some(&mut op.result),
            Op::OpBinary(op) => Some(&mut op.result),
            Op::OpCall(op) => op.result.as_mut(),
            Op::OpPhi(op) => Some(&mut op.result),
        }
    }

    /// Calls [f] for every value operand, including the incoming values of a phi.
    pub fn visit_values(&self, mut f: impl FnMut(&Value)) {
        match self {
            Op::OpAlloca(_) => {}
            Op::OpAssign(op) => f(&op.value),
            Op::OpLoad(op) => f(&op.ptr),
            Op::OpStore(op) => {
                f(&op.ptr);
                f(&op.value);
            }
            Op::OpPtrElementPtr(op) => {
                f(&op.ptr);
                op.indices.iter().for_each(f);
            }
            Op::OpUnary(op) => f(&op.value),
            Op::OpBinary(op) => {
                f(&op.lhs);
                f(&op.rhs);
            }
            Op::OpCall(op) => op.args.iter().for_each(f),
            Op::OpPhi(op) => op.incoming.iter().for_each(|incoming| f(&incoming.value)),
        }
    }

    pub fn visit_values_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            Op::OpAlloca(_) => {}
            Op::OpAssign(op) => f(&mut op.value),
            Op::OpLoad(op) => f(&mut op.ptr),
            Op::OpStore(op) => {
                f(&mut op.ptr);
                f(&mut op.value);
            }
            Op::OpPtrElementPtr(op) => {
                f(&mut op.ptr);
                op.indices.iter_mut().for_each(f);
            }
            Op::OpUnary(op) => f(&mut op.value),
            Op::OpBinary(op) => {
                f(&mut op.lhs);
                f(&mut op.rhs);
            }
            Op::OpCall(op) => op.args.iter_mut().for_each(f),
            Op::OpPhi(op) => op
                .incoming
                .iter_mut()
                .for_each(|incoming| f(&mut incoming.value)),
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Op::OpPhi(_))
    }

    pub fn as_phi(&self) -> Option<&OpPhi> {
        if let Op::OpPhi(op) = self {
            Some(op)
        } else {
            None
        }
    }

    pub fn expect_phi(&self) -> &OpPhi {
        self.as_phi().expect("expected phi")
    }

    pub fn expect_phi_mut(&mut self) -> &mut OpPhi {
        if let Op::OpPhi(op) = self {
            op
        } else {
            panic!("expected phi")
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Statement {
    pub op: Op,
    pub debug_loc: Option<DebugLoc>,
}

impl Statement {
    pub fn new(op: Op) -> Self {
        Statement { op, debug_loc: None }
    }

    pub fn with_debug_loc(mut self, debug_loc: Option<DebugLoc>) -> Self {
        self.debug_loc = debug_loc;

        self
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SwitchCase {
    pub value: u32,
    pub target: BasicBlock,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Switch {
    pub selector: Value,
    pub default: BasicBlock,
    pub cases: SmallVec<[SwitchCase; 4]>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub enum Terminator {
    Branch(BasicBlock),
    BranchConditional {
        condition: Value,
        true_target: BasicBlock,
        false_target: BasicBlock,
    },
    Switch(Switch),
    Return,
    ReturnValue(Value),
    Unreachable,
}

impl Terminator {
    pub fn is_return(&self) -> bool {
        matches!(self, Terminator::Return | Terminator::ReturnValue(_))
    }

    /// Returns the branch targets in operand order, duplicates included.
    pub fn targets(&self) -> SmallVec<[BasicBlock; 4]> {
        let mut targets = SmallVec::new();

        match self {
            Terminator::Branch(dest) => targets.push(*dest),
            Terminator::BranchConditional {
                true_target,
                false_target,
                ..
            } => {
                targets.push(*true_target);
                targets.push(*false_target);
            }
            Terminator::Switch(switch) => {
                targets.push(switch.default);
                targets.extend(switch.cases.iter().map(|case| case.target));
            }
            Terminator::Return | Terminator::ReturnValue(_) | Terminator::Unreachable => {}
        }

        targets
    }

    pub fn for_each_target_mut(&mut self, mut f: impl FnMut(&mut BasicBlock)) {
        match self {
            Terminator::Branch(dest) => f(dest),
            Terminator::BranchConditional {
                true_target,
                false_target,
                ..
            } => {
                f(true_target);
                f(false_target);
            }
            Terminator::Switch(switch) => {
                f(&mut switch.default);

                for case in &mut switch.cases {
                    f(&mut case.target);
                }
            }
            Terminator::Return | Terminator::ReturnValue(_) | Terminator::Unreachable => {}
        }
    }

    /// Redirects every edge to [old] towards [new].
    pub fn replace_target(&mut self, old: BasicBlock, new: BasicBlock) {
        self.for_each_target_mut(|target| {
            if *target == old {
                *target = new;
            }
        });
    }

    pub fn visit_values(&self, mut f: impl FnMut(&Value)) {
        match self {
            Terminator::BranchConditional { condition, .. } => f(condition),
            Terminator::Switch(switch) => f(&switch.selector),
            Terminator::ReturnValue(value) => f(value),
            Terminator::Branch(_) | Terminator::Return | Terminator::Unreachable => {}
        }
    }

    pub fn visit_values_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            Terminator::BranchConditional { condition, .. } => f(condition),
            Terminator::Switch(switch) => f(&mut switch.selector),
            Terminator::ReturnValue(value) => f(value),
            Terminator::Branch(_) | Terminator::Return | Terminator::Unreachable => {}
        }
    }
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::Unreachable
    }
}

/// Structured control-flow annotation on a header block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum Merge {
    Selection {
        merge: BasicBlock,
    },
    Loop {
        merge: BasicBlock,
        continue_target: BasicBlock,
    },
}

impl Merge {
    pub fn merge_block(&self) -> BasicBlock {
        match self {
            Merge::Selection { merge } => *merge,
            Merge::Loop { merge, .. } => *merge,
        }
    }

    pub fn continue_target(&self) -> Option<BasicBlock> {
        match self {
            Merge::Selection { .. } => None,
            Merge::Loop {
                continue_target, ..
            } => Some(*continue_target),
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, Merge::Loop { .. })
    }
}

#[derive(Clone, PartialEq, Default, Serialize, Deserialize, Debug)]
pub struct BasicBlockData {
    pub statements: Vec<Statement>,
    pub merge: Option<Merge>,
    pub terminator: Terminator,
    pub terminator_loc: Option<DebugLoc>,
}

impl BasicBlockData {
    /// The index of the first statement that is not a phi.
    pub fn first_non_phi(&self) -> usize {
        self.statements
            .iter()
            .position(|stmt| !stmt.op.is_phi())
            .unwrap_or(self.statements.len())
    }

    pub fn phis(&self) -> impl Iterator<Item = &OpPhi> {
        self.statements
            .iter()
            .map_while(|stmt| stmt.op.as_phi())
    }

    pub fn phis_mut(&mut self) -> impl Iterator<Item = &mut OpPhi> {
        self.statements.iter_mut().map_while(|stmt| {
            if let Op::OpPhi(op) = &mut stmt.op {
                Some(op)
            } else {
                None
            }
        })
    }

    pub fn is_loop_header(&self) -> bool {
        self.merge.is_some_and(|merge| merge.is_loop())
    }
}

/// Where a value is defined.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DefSite {
    pub block: BasicBlock,
    /// `None` for function parameters, which are defined before the entry block's first
    /// statement.
    pub index: Option<usize>,
}

impl DefSite {
    /// Whether the definition is available to a use right before the statement at [index] of
    /// [block]. An index past the last statement stands for the block's terminator.
    pub fn reaches(&self, dominators: &DominatorTree, block: BasicBlock, index: usize) -> bool {
        if self.block == block {
            self.index.map_or(true, |def_index| def_index < index)
        } else {
            dominators.dominates(self.block, block)
        }
    }
}

/// A function body.
///
/// Blocks live in an arena; [Body::layout] records the order in which they appear in the
/// function. The first block in the layout is the entry block.
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct Body {
    pub local_values: SlotMap<LocalValue, LocalValueData>,
    pub basic_blocks: SlotMap<BasicBlock, BasicBlockData>,
    pub layout: Vec<BasicBlock>,
    pub params: Vec<LocalValue>,
    pub ret_ty: Option<Type>,
}

impl Body {
    pub fn init(sig: &FnSig) -> Self {
        let mut values: SlotMap<LocalValue, LocalValueData> = SlotMap::with_key();
        let mut params = Vec::with_capacity(sig.args.len());

        for arg in &sig.args {
            let value = values.insert(LocalValueData { ty: arg.ty });

            params.push(value);
        }

        Body {
            local_values: values,
            basic_blocks: Default::default(),
            layout: Vec::new(),
            params,
            ret_ty: sig.ret_ty,
        }
    }

    /// The blocks of the body in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = BasicBlock> + use<'_> {
        self.layout.iter().copied()
    }

    pub fn entry(&self) -> Option<BasicBlock> {
        self.layout.first().copied()
    }

    pub fn expect_entry(&self) -> BasicBlock {
        self.entry().expect("body must have an entry block")
    }

    pub fn append_block(&mut self) -> BasicBlock {
        let bb = self.basic_blocks.insert(BasicBlockData::default());

        self.layout.push(bb);

        bb
    }

    /// Creates a new block that directly follows [after] in the layout.
    pub fn insert_block_after(&mut self, after: BasicBlock) -> BasicBlock {
        let bb = self.basic_blocks.insert(BasicBlockData::default());
        let position = self
            .layout_position(after)
            .map(|p| p + 1)
            .unwrap_or(self.layout.len());

        self.layout.insert(position, bb);

        bb
    }

    pub fn remove_block(&mut self, bb: BasicBlock) -> Option<BasicBlockData> {
        self.layout.retain(|b| *b != bb);

        self.basic_blocks.remove(bb)
    }

    pub fn layout_position(&self, bb: BasicBlock) -> Option<usize> {
        self.layout.iter().position(|b| *b == bb)
    }

    pub fn add_value(&mut self, ty: Type) -> LocalValue {
        self.local_values.insert(LocalValueData { ty })
    }

    pub fn value_ty(&self, value: &Value) -> Type {
        match value {
            Value::Local(v) => self[*v].ty,
            Value::InlineConst(c) => c.ty(),
            Value::Undef(ty) => *ty,
        }
    }

    /// The distinct successors of [bb], in terminator operand order.
    pub fn successors(&self, bb: BasicBlock) -> SmallVec<[BasicBlock; 4]> {
        let mut successors: SmallVec<[BasicBlock; 4]> = SmallVec::new();

        for target in self.basic_blocks[bb].terminator.targets() {
            if !successors.contains(&target) {
                successors.push(target);
            }
        }

        successors
    }

    /// Replaces every use of [old] with [new], in statements as well as terminators.
    pub fn replace_all_uses(&mut self, old: LocalValue, new: Value) {
        let replace = |value: &mut Value| {
            if *value == Value::Local(old) {
                *value = new;
            }
        };

        for data in self.basic_blocks.values_mut() {
            for stmt in &mut data.statements {
                stmt.op.visit_values_mut(replace);
            }

            data.terminator.visit_values_mut(replace);
        }
    }

    /// The definition site of every parameter and statement result.
    ///
    /// Fails with the first value that is found to be defined more than once.
    pub fn def_sites(&self) -> Result<FxHashMap<LocalValue, DefSite>, LocalValue> {
        let mut defs = FxHashMap::default();

        if let Some(entry) = self.entry() {
            for param in &self.params {
                defs.insert(
                    *param,
                    DefSite {
                        block: entry,
                        index: None,
                    },
                );
            }
        }

        for bb in self.blocks() {
            for (index, stmt) in self.basic_blocks[bb].statements.iter().enumerate() {
                let Some(result) = stmt.op.result() else {
                    continue;
                };

                let site = DefSite {
                    block: bb,
                    index: Some(index),
                };

                if defs.insert(result, site).is_some() {
                    return Err(result);
                }
            }
        }

        Ok(defs)
    }

    pub fn return_blocks(&self) -> Vec<BasicBlock> {
        self.layout
            .iter()
            .copied()
            .filter(|bb| self.basic_blocks[*bb].terminator.is_return())
            .collect()
    }
}

impl Index<LocalValue> for Body {
    type Output = LocalValueData;

    fn index(&self, value: LocalValue) -> &Self::Output {
        self.local_values.get(value).expect("undefined value")
    }
}

impl IndexMut<LocalValue> for Body {
    fn index_mut(&mut self, value: LocalValue) -> &mut Self::Output {
        self.local_values.get_mut(value).expect("undefined value")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_block_after_keeps_layout_order() {
        let mut body = Body::default();

        let bb0 = body.append_block();
        let bb1 = body.append_block();
        let bb2 = body.insert_block_after(bb0);

        assert_eq!(body.layout, vec![bb0, bb2, bb1]);
        assert_eq!(body.entry(), Some(bb0));
    }

    #[test]
    fn test_successors_are_deduplicated() {
        let mut body = Body::default();

        let bb0 = body.append_block();
        let bb1 = body.append_block();
        let bb2 = body.append_block();

        body.basic_blocks[bb0].terminator = Terminator::Switch(Switch {
            selector: 0u32.into(),
            default: bb1,
            cases: smallvec::smallvec![
                SwitchCase {
                    value: 0,
                    target: bb2
                },
                SwitchCase {
                    value: 1,
                    target: bb1
                },
            ],
        });

        assert_eq!(body.basic_blocks[bb0].terminator.targets().len(), 3);
        assert_eq!(body.successors(bb0).as_slice(), &[bb1, bb2]);
    }

    #[test]
    fn test_replace_all_uses() {
        let mut body = Body::default();

        let bb0 = body.append_block();
        let a = body.add_value(TY_U32);
        let b = body.add_value(TY_U32);

        body.basic_blocks[bb0].statements.push(
            OpBinary {
                operator: BinaryOperator::Add,
                lhs: a.into(),
                rhs: a.into(),
                result: b,
            }
            .into(),
        );
        body.basic_blocks[bb0].terminator = Terminator::ReturnValue(a.into());

        body.replace_all_uses(a, 7u32.into());

        assert_eq!(
            body.basic_blocks[bb0].statements[0].op,
            Op::OpBinary(OpBinary {
                operator: BinaryOperator::Add,
                lhs: 7u32.into(),
                rhs: 7u32.into(),
                result: b,
            })
        );
        assert_eq!(
            body.basic_blocks[bb0].terminator,
            Terminator::ReturnValue(7u32.into())
        );
    }

    #[test]
    fn test_def_sites() {
        let mut body = Body::init(&FnSig {
            name: Symbol::from_ref("f"),
            args: vec![crate::FnArg { ty: TY_U32 }],
            ret_ty: Some(TY_U32),
        });

        //   bb0: a = x + 1
        //    |
        //    v
        //   bb1: return a

        let x = body.params[0];
        let bb0 = body.append_block();
        let bb1 = body.append_block();
        let a = body.add_value(TY_U32);

        body.basic_blocks[bb0].statements.push(
            OpBinary {
                operator: BinaryOperator::Add,
                lhs: x.into(),
                rhs: 1u32.into(),
                result: a,
            }
            .into(),
        );
        body.basic_blocks[bb0].terminator = Terminator::Branch(bb1);
        body.basic_blocks[bb1].terminator = Terminator::ReturnValue(a.into());

        let defs = body.def_sites().unwrap();
        let dominators = DominatorTree::compute(&body);

        assert_eq!(
            defs[&x],
            DefSite {
                block: bb0,
                index: None
            }
        );
        assert!(defs[&x].reaches(&dominators, bb0, 0));
        assert!(!defs[&a].reaches(&dominators, bb0, 0));
        assert!(defs[&a].reaches(&dominators, bb0, 1));
        assert!(defs[&a].reaches(&dominators, bb1, 0));

        body.basic_blocks[bb1].statements.push(
            OpAssign {
                value: x.into(),
                result: a,
            }
            .into(),
        );

        assert_eq!(body.def_sites(), Err(a));
    }
}
