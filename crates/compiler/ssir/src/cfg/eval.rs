//! A reference interpreter for function bodies, used by tests to compare the behavior of a body
//! before and after a transformation.

use rustc_hash::FxHashMap;

use crate::cfg::{BasicBlock, Body, InlineConst, LocalValue, Op, Terminator, Value};
use crate::{BinaryOperator, UnaryOperator};

const STEP_LIMIT: usize = 10_000;

#[derive(Clone, PartialEq, Debug)]
pub enum Val {
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    Ptr { var: LocalValue, path: Vec<u32> },
    Undef,
}

impl From<InlineConst> for Val {
    fn from(value: InlineConst) -> Self {
        match value {
            InlineConst::U32(v) => Val::U32(v),
            InlineConst::I32(v) => Val::I32(v),
            InlineConst::F32(v) => Val::F32(v.0),
            InlineConst::Bool(v) => Val::Bool(v),
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Outcome {
    Returned(Option<Val>),
    ReachedUnreachable(BasicBlock),
    StepLimit,
}

struct Interpreter<'a> {
    body: &'a Body,
    values: FxHashMap<LocalValue, Val>,
    memory: FxHashMap<(LocalValue, Vec<u32>), Val>,
}

impl Interpreter<'_> {
    fn value(&self, value: &Value) -> Val {
        match value {
            Value::Local(v) => self.values.get(v).cloned().unwrap_or(Val::Undef),
            Value::InlineConst(c) => (*c).into(),
            Value::Undef(_) => Val::Undef,
        }
    }

    fn exec_op(&mut self, op: &Op) {
        match op {
            Op::OpAlloca(op) => {
                self.values.insert(
                    op.result,
                    Val::Ptr {
                        var: op.result,
                        path: Vec::new(),
                    },
                );
            }
            Op::OpAssign(op) => {
                let value = self.value(&op.value);

                self.values.insert(op.result, value);
            }
            Op::OpLoad(op) => {
                let value = match self.value(&op.ptr) {
                    Val::Ptr { var, path } => {
                        self.memory.get(&(var, path)).cloned().unwrap_or(Val::Undef)
                    }
                    _ => Val::Undef,
                };

                self.values.insert(op.result, value);
            }
            Op::OpStore(op) => {
                if let Val::Ptr { var, path } = self.value(&op.ptr) {
                    let value = self.value(&op.value);

                    self.memory.insert((var, path), value);
                }
            }
            Op::OpPtrElementPtr(op) => {
                let value = match self.value(&op.ptr) {
                    Val::Ptr { var, mut path } => {
                        for index in &op.indices {
                            match self.value(index) {
                                Val::U32(i) => path.push(i),
                                Val::I32(i) => path.push(i as u32),
                                _ => return,
                            }
                        }

                        Val::Ptr { var, path }
                    }
                    _ => Val::Undef,
                };

                self.values.insert(op.result, value);
            }
            Op::OpUnary(op) => {
                let value = match (op.operator, self.value(&op.value)) {
                    (UnaryOperator::Not, Val::Bool(v)) => Val::Bool(!v),
                    (UnaryOperator::Neg, Val::I32(v)) => Val::I32(v.wrapping_neg()),
                    (UnaryOperator::Neg, Val::F32(v)) => Val::F32(-v),
                    _ => Val::Undef,
                };

                self.values.insert(op.result, value);
            }
            Op::OpBinary(op) => {
                let lhs = self.value(&op.lhs);
                let rhs = self.value(&op.rhs);

                self.values.insert(op.result, binary(op.operator, lhs, rhs));
            }
            Op::OpCall(_) => panic!("calls are not supported by the test interpreter"),
            Op::OpPhi(_) => unreachable!("phis are evaluated on block entry"),
        }
    }

    fn enter_block(&mut self, bb: BasicBlock, pred: Option<BasicBlock>) {
        let incoming: Vec<(LocalValue, Val)> = self.body.basic_blocks[bb]
            .phis()
            .map(|phi| {
                let value = pred
                    .and_then(|pred| phi.incoming_for(pred))
                    .map(|value| self.value(&value))
                    .unwrap_or(Val::Undef);

                (phi.result, value)
            })
            .collect();

        self.values.extend(incoming);
    }

    fn run(&mut self, args: &[Val]) -> Outcome {
        let body = self.body;

        for (param, arg) in body.params.iter().zip(args) {
            self.values.insert(*param, arg.clone());
        }

        let mut bb = body.expect_entry();
        let mut pred = None;

        for _ in 0..STEP_LIMIT {
            self.enter_block(bb, pred);

            let data = &body.basic_blocks[bb];

            for stmt in data.statements.iter().filter(|stmt| !stmt.op.is_phi()) {
                self.exec_op(&stmt.op);
            }

            let next = match &data.terminator {
                Terminator::Branch(target) => *target,
                Terminator::BranchConditional {
                    condition,
                    true_target,
                    false_target,
                } => match self.value(condition) {
                    Val::Bool(true) => *true_target,
                    Val::Bool(false) => *false_target,
                    other => panic!("branch on non-boolean value {:?} in {:?}", other, bb),
                },
                Terminator::Switch(switch) => {
                    let Val::U32(selector) = self.value(&switch.selector) else {
                        panic!("switch on non-u32 selector in {:?}", bb)
                    };

                    switch
                        .cases
                        .iter()
                        .find(|case| case.value == selector)
                        .map(|case| case.target)
                        .unwrap_or(switch.default)
                }
                Terminator::Return => return Outcome::Returned(None),
                Terminator::ReturnValue(value) => return Outcome::Returned(Some(self.value(value))),
                Terminator::Unreachable => return Outcome::ReachedUnreachable(bb),
            };

            pred = Some(bb);
            bb = next;
        }

        Outcome::StepLimit
    }
}

fn binary(operator: BinaryOperator, lhs: Val, rhs: Val) -> Val {
    use BinaryOperator::*;

    match (lhs, rhs) {
        (Val::U32(a), Val::U32(b)) => match operator {
            Add => Val::U32(a.wrapping_add(b)),
            Sub => Val::U32(a.wrapping_sub(b)),
            Mul => Val::U32(a.wrapping_mul(b)),
            Eq => Val::Bool(a == b),
            NotEq => Val::Bool(a != b),
            Gt => Val::Bool(a > b),
            GtEq => Val::Bool(a >= b),
            Lt => Val::Bool(a < b),
            LtEq => Val::Bool(a <= b),
            And | Or => Val::Undef,
        },
        (Val::I32(a), Val::I32(b)) => match operator {
            Add => Val::I32(a.wrapping_add(b)),
            Sub => Val::I32(a.wrapping_sub(b)),
            Mul => Val::I32(a.wrapping_mul(b)),
            Eq => Val::Bool(a == b),
            NotEq => Val::Bool(a != b),
            Gt => Val::Bool(a > b),
            GtEq => Val::Bool(a >= b),
            Lt => Val::Bool(a < b),
            LtEq => Val::Bool(a <= b),
            And | Or => Val::Undef,
        },
        (Val::F32(a), Val::F32(b)) => match operator {
            Add => Val::F32(a + b),
            Sub => Val::F32(a - b),
            Mul => Val::F32(a * b),
            Eq => Val::Bool(a == b),
            NotEq => Val::Bool(a != b),
            Gt => Val::Bool(a > b),
            GtEq => Val::Bool(a >= b),
            Lt => Val::Bool(a < b),
            LtEq => Val::Bool(a <= b),
            And | Or => Val::Undef,
        },
        (Val::Bool(a), Val::Bool(b)) => match operator {
            And => Val::Bool(a && b),
            Or => Val::Bool(a || b),
            Eq => Val::Bool(a == b),
            NotEq => Val::Bool(a != b),
            _ => Val::Undef,
        },
        _ => Val::Undef,
    }
}

/// Runs [body] with the given arguments.
pub fn eval(body: &Body, args: &[Val]) -> Outcome {
    Interpreter {
        body,
        values: FxHashMap::default(),
        memory: FxHashMap::default(),
    }
    .run(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{OpAlloca, OpBinary, OpLoad, OpStore};
    use crate::ty::{TY_BOOL, TY_U32};
    use crate::{FnArg, FnSig, Symbol};

    #[test]
    fn test_eval_memory_and_branches() {
        let mut body = Body::init(&FnSig {
            name: Symbol::from_ref("f"),
            args: vec![FnArg { ty: TY_U32 }],
            ret_ty: Some(TY_U32),
        });

        //   bb0: var = alloca; store var, 5; cond = x > 3
        //    |  \
        //    v   v
        //   bb1  bb2: return 0
        //   return load var

        let x = body.params[0];
        let bb0 = body.append_block();
        let bb1 = body.append_block();
        let bb2 = body.append_block();
        let var = body.add_value(TY_U32);
        let cond = body.add_value(TY_BOOL);
        let loaded = body.add_value(TY_U32);

        body.basic_blocks[bb0].statements.push(
            OpAlloca {
                ty: TY_U32,
                result: var,
            }
            .into(),
        );
        body.basic_blocks[bb0].statements.push(
            OpStore {
                ptr: var.into(),
                value: 5u32.into(),
            }
            .into(),
        );
        body.basic_blocks[bb0].statements.push(
            OpBinary {
                operator: BinaryOperator::Gt,
                lhs: x.into(),
                rhs: 3u32.into(),
                result: cond,
            }
            .into(),
        );
        body.basic_blocks[bb0].terminator = Terminator::BranchConditional {
            condition: cond.into(),
            true_target: bb1,
            false_target: bb2,
        };
        body.basic_blocks[bb1].statements.push(
            OpLoad {
                ptr: var.into(),
                result: loaded,
            }
            .into(),
        );
        body.basic_blocks[bb1].terminator = Terminator::ReturnValue(loaded.into());
        body.basic_blocks[bb2].terminator = Terminator::ReturnValue(0u32.into());

        assert_eq!(
            eval(&body, &[Val::U32(4)]),
            Outcome::Returned(Some(Val::U32(5)))
        );
        assert_eq!(
            eval(&body, &[Val::U32(2)]),
            Outcome::Returned(Some(Val::U32(0)))
        );
    }
}
