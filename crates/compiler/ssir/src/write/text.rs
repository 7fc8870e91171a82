use std::fmt::Write;
use std::hash::Hash;

use indexmap::IndexSet;

use crate::cfg::{
    BasicBlock, Body, Cfg, LocalValue, Merge, Op, OpPhi, Statement, Terminator, Value,
};
use crate::dependencies::reachable_functions;
use crate::ty::{Type, TypeRegistry};
use crate::{Function, Module};

const INDENT: &'static str = "    ";

struct IdWriter<K> {
    mapping: IndexSet<K>,
    prefix: &'static str,
}

impl<K> IdWriter<K>
where
    K: Eq + Hash,
{
    fn new(prefix: &'static str) -> Self {
        Self {
            mapping: Default::default(),
            prefix,
        }
    }

    fn register(&mut self, key: K) {
        self.mapping.insert(key);
    }

    fn write<W: Write>(&mut self, w: &mut W, key: K) {
        let (id, _) = self.mapping.insert_full(key);

        w.write_str(self.prefix).unwrap();
        write!(w, "{}", id).unwrap();
    }
}

struct TextWriter<'a> {
    w: String,
    types: &'a TypeRegistry,
    value_id_writer: IdWriter<LocalValue>,
    block_id_writer: IdWriter<BasicBlock>,
}

impl<'a> TextWriter<'a> {
    fn new(types: &'a TypeRegistry) -> Self {
        TextWriter {
            w: String::new(),
            types,
            value_id_writer: IdWriter::new("v"),
            block_id_writer: IdWriter::new("bb"),
        }
    }

    fn write_newline(&mut self, indent_level: usize) {
        self.w.push('\n');

        for _ in 0..indent_level {
            self.w.push_str(INDENT);
        }
    }

    fn write_type(&mut self, ty: Type) {
        self.w.push_str(&ty.to_string(self.types));
    }

    fn write_local(&mut self, value: LocalValue) {
        self.value_id_writer.write(&mut self.w, value);
    }

    fn write_block(&mut self, bb: BasicBlock) {
        self.block_id_writer.write(&mut self.w, bb);
    }

    fn write_value(&mut self, value: &Value) {
        match value {
            Value::Local(v) => self.write_local(*v),
            Value::InlineConst(c) => write!(&mut self.w, "{}", c).unwrap(),
            Value::Undef(ty) => {
                self.w.push_str("undef<");
                self.write_type(*ty);
                self.w.push('>');
            }
        }
    }

    fn write_value_list<'b>(&mut self, values: impl IntoIterator<Item = &'b Value>) {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.w.push_str(", ");
            }

            self.write_value(value);
        }
    }

    fn write_function(&mut self, function: Function, body: &Body) {
        for bb in body.blocks() {
            self.block_id_writer.register(bb);
        }

        for param in &body.params {
            self.value_id_writer.register(*param);
        }

        write!(&mut self.w, "fn {}(", function).unwrap();

        for (i, param) in body.params.iter().enumerate() {
            if i > 0 {
                self.w.push_str(", ");
            }

            self.write_local(*param);
            self.w.push_str(": ");
            self.write_type(body[*param].ty);
        }

        self.w.push(')');

        if let Some(ret_ty) = body.ret_ty {
            self.w.push_str(" -> ");
            self.write_type(ret_ty);
        }

        self.w.push_str(" {");

        for bb in body.blocks() {
            self.write_newline(0);
            self.write_block(bb);
            self.w.push(':');

            let data = &body.basic_blocks[bb];

            for stmt in &data.statements {
                self.write_newline(1);
                self.write_statement(body, stmt);
            }

            if let Some(merge) = &data.merge {
                self.write_newline(1);
                self.write_merge(merge);
            }

            self.write_newline(1);
            self.write_terminator(&data.terminator);
        }

        self.write_newline(0);
        self.w.push_str("}\n");
    }

    fn write_statement(&mut self, body: &Body, stmt: &Statement) {
        if let Some(result) = stmt.op.result() {
            self.write_local(result);
            self.w.push_str(": ");
            self.write_type(body[result].ty);
            self.w.push_str(" = ");
        }

        match &stmt.op {
            Op::OpAlloca(op) => {
                self.w.push_str("alloca ");
                self.write_type(op.ty);
            }
            Op::OpAssign(op) => self.write_value(&op.value),
            Op::OpLoad(op) => {
                self.w.push_str("load ");
                self.write_value(&op.ptr);
            }
            Op::OpStore(op) => {
                self.w.push_str("store ");
                self.write_value(&op.ptr);
                self.w.push_str(", ");
                self.write_value(&op.value);
            }
            Op::OpPtrElementPtr(op) => {
                self.w.push_str("ptr_element_ptr ");
                self.write_value(&op.ptr);
                self.w.push_str(" [");
                self.write_value_list(&op.indices);
                self.w.push(']');
            }
            Op::OpUnary(op) => {
                write!(&mut self.w, "{}", op.operator).unwrap();
                self.write_value(&op.value);
            }
            Op::OpBinary(op) => {
                self.write_value(&op.lhs);
                write!(&mut self.w, " {} ", op.operator).unwrap();
                self.write_value(&op.rhs);
            }
            Op::OpCall(op) => {
                write!(&mut self.w, "call {}(", op.function).unwrap();
                self.write_value_list(&op.args);
                self.w.push(')');
            }
            Op::OpPhi(op) => self.write_phi(op),
        }

        if let Some(debug_loc) = &stmt.debug_loc {
            write!(&mut self.w, " @ {}", debug_loc).unwrap();
        }
    }

    fn write_phi(&mut self, phi: &OpPhi) {
        self.w.push_str("phi [");

        for (i, incoming) in phi.incoming.iter().enumerate() {
            if i > 0 {
                self.w.push_str(", ");
            }

            self.write_block(incoming.block);
            self.w.push_str(": ");
            self.write_value(&incoming.value);
        }

        self.w.push(']');
    }

    fn write_merge(&mut self, merge: &Merge) {
        match merge {
            Merge::Selection { merge } => {
                self.w.push_str("selection_merge ");
                self.write_block(*merge);
            }
            Merge::Loop {
                merge,
                continue_target,
            } => {
                self.w.push_str("loop_merge ");
                self.write_block(*merge);
                self.w.push_str(" continue ");
                self.write_block(*continue_target);
            }
        }
    }

    fn write_terminator(&mut self, terminator: &Terminator) {
        match terminator {
            Terminator::Branch(target) => {
                self.w.push_str("branch ");
                self.write_block(*target);
            }
            Terminator::BranchConditional {
                condition,
                true_target,
                false_target,
            } => {
                self.w.push_str("branch_conditional ");
                self.write_value(condition);
                self.w.push_str(", ");
                self.write_block(*true_target);
                self.w.push_str(", ");
                self.write_block(*false_target);
            }
            Terminator::Switch(switch) => {
                self.w.push_str("switch ");
                self.write_value(&switch.selector);
                self.w.push_str(" default ");
                self.write_block(switch.default);

                for case in &switch.cases {
                    write!(&mut self.w, ", {}: ", case.value).unwrap();
                    self.write_block(case.target);
                }
            }
            Terminator::Return => self.w.push_str("return"),
            Terminator::ReturnValue(value) => {
                self.w.push_str("return ");
                self.write_value(value);
            }
            Terminator::Unreachable => self.w.push_str("unreachable"),
        }
    }

    fn finish(self) -> String {
        self.w
    }
}

/// Renders a function body in a human-readable form, for logs and test failure output.
///
/// Blocks are numbered in layout order and values in order of first appearance, so the dump
/// of a body does not depend on arena key values.
pub fn write_function(types: &TypeRegistry, function: Function, body: &Body) -> String {
    let mut writer = TextWriter::new(types);

    writer.write_function(function, body);

    writer.finish()
}

/// Renders every function of the module's call tree that has a body.
pub fn write_module(module: &Module, cfg: &Cfg) -> String {
    let mut out = String::new();

    for function in reachable_functions(module, cfg) {
        if let Some(body) = cfg.function_body.get(function) {
            out.push_str(&write_function(&module.ty, function, body));
        }
    }

    out
}
