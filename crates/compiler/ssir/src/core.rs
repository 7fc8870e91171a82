use std::fmt;
use std::fmt::Display;
use std::ops::{Index, IndexMut};

use indexmap::IndexSet;
use internment::Intern;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::ty::{Type, TypeRegistry};

pub type Symbol = Intern<String>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Function {
    pub name: Symbol,
    pub module: Symbol,
}

impl Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.name)
    }
}

#[derive(Clone, Serialize, Deserialize, Default, Debug)]
pub struct FnSigRegistry {
    store: FxHashMap<Function, FnSig>,
}

impl FnSigRegistry {
    pub fn register(&mut self, function: Function, sig: FnSig) {
        self.store.insert(function, sig);
    }

    pub fn contains(&self, function: Function) -> bool {
        self.store.contains_key(&function)
    }

    pub fn get(&self, function: Function) -> Option<&FnSig> {
        self.store.get(&function)
    }

    pub fn get_mut(&mut self, function: Function) -> Option<&mut FnSig> {
        self.store.get_mut(&function)
    }

    pub fn keys(&self) -> impl Iterator<Item = Function> + use<'_> {
        self.store.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Function, &FnSig)> + use<'_> {
        self.store.iter()
    }
}

impl Index<Function> for FnSigRegistry {
    type Output = FnSig;

    fn index(&self, function: Function) -> &Self::Output {
        self.get(function).expect("function not registered")
    }
}

impl IndexMut<Function> for FnSigRegistry {
    fn index_mut(&mut self, function: Function) -> &mut Self::Output {
        self.get_mut(function).expect("function not registered")
    }
}

#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct EntryPointRegistry {
    data: FxHashMap<Function, EntryPointKind>,
}

impl EntryPointRegistry {
    pub fn register(&mut self, function: Function, entry_point: EntryPointKind) {
        self.data.insert(function, entry_point);
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Function, EntryPointKind)> + use<'_> {
        self.data.iter().map(|(f, e)| (*f, *e))
    }
}

/// Features a module declares it relies on.
///
/// The capabilities select how control-flow transformations treat a module: a [Capability::Shader]
/// module must keep its control flow structured, and only a module that declares
/// [Capability::VariablePointers] may select between pointer values with a phi.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum Capability {
    Shader,
    Kernel,
    VariablePointers,
}

#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct CapabilitySet {
    store: IndexSet<Capability>,
}

impl CapabilitySet {
    pub fn declare(&mut self, capability: Capability) {
        self.store.insert(capability);
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.store.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + use<'_> {
        self.store.iter().copied()
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Module {
    pub name: Symbol,
    pub ty: TypeRegistry,
    pub fn_sigs: FnSigRegistry,
    pub entry_points: EntryPointRegistry,
    pub capabilities: CapabilitySet,
}

impl Module {
    pub fn new(name: Symbol) -> Self {
        Module {
            name,
            ty: Default::default(),
            fn_sigs: Default::default(),
            entry_points: Default::default(),
            capabilities: Default::default(),
        }
    }

    pub fn is_shader(&self) -> bool {
        self.capabilities.has(Capability::Shader)
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct FnSig {
    pub name: Symbol,
    pub args: Vec<FnArg>,
    pub ret_ty: Option<Type>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct FnArg {
    pub ty: Type,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum EntryPointKind {
    Vertex,
    Fragment,
    Compute(u32, u32, u32),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum UnaryOperator {
    Not,
    Neg,
}

impl Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOperator::Not => write!(f, "!"),
            UnaryOperator::Neg => write!(f, "-"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum BinaryOperator {
    And,
    Or,
    Add,
    Sub,
    Mul,
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
        )
    }
}

impl Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOperator::And => write!(f, "&&"),
            BinaryOperator::Or => write!(f, "||"),
            BinaryOperator::Add => write!(f, "+"),
            BinaryOperator::Sub => write!(f, "-"),
            BinaryOperator::Mul => write!(f, "*"),
            BinaryOperator::Eq => write!(f, "=="),
            BinaryOperator::NotEq => write!(f, "!="),
            BinaryOperator::Gt => write!(f, ">"),
            BinaryOperator::GtEq => write!(f, ">="),
            BinaryOperator::Lt => write!(f, "<"),
            BinaryOperator::LtEq => write!(f, "<="),
        }
    }
}
