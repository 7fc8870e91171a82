use std::fmt;
use std::ops::Index;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Type(TypeInner);

impl Type {
    pub fn to_string(&self, registry: &TypeRegistry) -> String {
        registry[*self].to_string(registry)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
enum TypeInner {
    U32,
    I32,
    F32,
    Bool,
    Vec2F32,
    Vec3F32,
    Vec4F32,
    Registered(usize),
}

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum TypeKind {
    Scalar(ScalarKind),
    Vector { scalar: ScalarKind, size: VectorSize },
    Array { base: Type, count: u64 },
    Ptr(Type),
}

impl TypeKind {
    pub fn is_ptr(&self) -> bool {
        matches!(self, TypeKind::Ptr(_))
    }

    pub fn expect_ptr(&self) -> Type {
        if let TypeKind::Ptr(pointee_ty) = self {
            *pointee_ty
        } else {
            panic!("not a pointer type");
        }
    }

    fn to_string(&self, registry: &TypeRegistry) -> String {
        match self {
            TypeKind::Scalar(scalar) => format!("{}", scalar),
            TypeKind::Vector { size, scalar } => format!("vec{}<{}>", size.to_u32(), scalar),
            TypeKind::Array { base, count } => {
                format!("array<{}, {}>", base.to_string(registry), count)
            }
            TypeKind::Ptr(pointee_ty) => format!("ptr<{}>", pointee_ty.to_string(registry)),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum ScalarKind {
    I32,
    U32,
    F32,
    Bool,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::I32 => write!(f, "i32"),
            ScalarKind::U32 => write!(f, "u32"),
            ScalarKind::F32 => write!(f, "f32"),
            ScalarKind::Bool => write!(f, "bool"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum VectorSize {
    Two,
    Three,
    Four,
}

impl VectorSize {
    pub fn to_u32(&self) -> u32 {
        match self {
            VectorSize::Two => 2,
            VectorSize::Three => 3,
            VectorSize::Four => 4,
        }
    }
}

pub const TY_KIND_U32: TypeKind = TypeKind::Scalar(ScalarKind::U32);
pub const TY_KIND_I32: TypeKind = TypeKind::Scalar(ScalarKind::I32);
pub const TY_KIND_F32: TypeKind = TypeKind::Scalar(ScalarKind::F32);
pub const TY_KIND_BOOL: TypeKind = TypeKind::Scalar(ScalarKind::Bool);
pub const TY_KIND_VEC2_F32: TypeKind = TypeKind::Vector {
    scalar: ScalarKind::F32,
    size: VectorSize::Two,
};
pub const TY_KIND_VEC3_F32: TypeKind = TypeKind::Vector {
    scalar: ScalarKind::F32,
    size: VectorSize::Three,
};
pub const TY_KIND_VEC4_F32: TypeKind = TypeKind::Vector {
    scalar: ScalarKind::F32,
    size: VectorSize::Four,
};

pub const TY_U32: Type = Type(TypeInner::U32);
pub const TY_I32: Type = Type(TypeInner::I32);
pub const TY_F32: Type = Type(TypeInner::F32);
pub const TY_BOOL: Type = Type(TypeInner::Bool);
pub const TY_VEC2_F32: Type = Type(TypeInner::Vec2F32);
pub const TY_VEC3_F32: Type = Type(TypeInner::Vec3F32);
pub const TY_VEC4_F32: Type = Type(TypeInner::Vec4F32);

/// Interns [TypeKind]s.
///
/// Builtin scalar and vector types resolve to the `TY_*` constants without touching the store, so
/// they compare equal across registries. Every other kind is stored once; registering an equal
/// kind again returns the same [Type].
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct TypeRegistry {
    store: IndexSet<TypeKind>,
}

impl TypeRegistry {
    pub fn register(&mut self, ty_kind: TypeKind) -> Type {
        match &ty_kind {
            TypeKind::Scalar(ScalarKind::I32) => return TY_I32,
            TypeKind::Scalar(ScalarKind::U32) => return TY_U32,
            TypeKind::Scalar(ScalarKind::F32) => return TY_F32,
            TypeKind::Scalar(ScalarKind::Bool) => return TY_BOOL,
            TypeKind::Vector {
                scalar: ScalarKind::F32,
                size: VectorSize::Two,
            } => return TY_VEC2_F32,
            TypeKind::Vector {
                scalar: ScalarKind::F32,
                size: VectorSize::Three,
            } => return TY_VEC3_F32,
            TypeKind::Vector {
                scalar: ScalarKind::F32,
                size: VectorSize::Four,
            } => return TY_VEC4_F32,
            _ => (),
        }

        let index = self.store.insert_full(ty_kind).0;

        Type(TypeInner::Registered(index))
    }

    pub fn ptr(&mut self, pointee_ty: Type) -> Type {
        self.register(TypeKind::Ptr(pointee_ty))
    }

    pub fn is_ptr(&self, ty: Type) -> bool {
        self[ty].is_ptr()
    }
}

impl Index<Type> for TypeRegistry {
    type Output = TypeKind;

    fn index(&self, ty: Type) -> &Self::Output {
        match ty.0 {
            TypeInner::U32 => &TY_KIND_U32,
            TypeInner::I32 => &TY_KIND_I32,
            TypeInner::F32 => &TY_KIND_F32,
            TypeInner::Bool => &TY_KIND_BOOL,
            TypeInner::Vec2F32 => &TY_KIND_VEC2_F32,
            TypeInner::Vec3F32 => &TY_KIND_VEC3_F32,
            TypeInner::Vec4F32 => &TY_KIND_VEC4_F32,
            TypeInner::Registered(index) => self.store.get_index(index).expect("unregistered type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtin_does_not_grow_store() {
        let mut registry = TypeRegistry::default();

        assert_eq!(registry.register(TY_KIND_BOOL), TY_BOOL);
        assert_eq!(registry.register(TY_KIND_VEC4_F32), TY_VEC4_F32);
        assert_eq!(registry.store.len(), 0);
    }

    #[test]
    fn test_register_ptr_is_interned() {
        let mut registry = TypeRegistry::default();

        let a = registry.ptr(TY_U32);
        let b = registry.register(TypeKind::Ptr(TY_U32));
        let c = registry.ptr(TY_BOOL);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(registry.is_ptr(a));
        assert!(!registry.is_ptr(TY_U32));
        assert_eq!(registry[a].expect_ptr(), TY_U32);
        assert_eq!(a.to_string(&registry), "ptr<u32>");
    }
}
