//! Object stamps and the class hierarchy they refer to.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// =============================================================================
// Class hierarchy
// =============================================================================

/// Immutable class metadata. Single inheritance; `superclass == None` is the root.
#[derive(Debug)]
pub struct ClassType {
    pub id: u32,
    pub name: Arc<str>,
    pub superclass: Option<TypeRef>,
    pub is_final: bool,
}

/// Shared handle to a [`ClassType`]. Equality and hashing use the class id.
#[derive(Clone)]
pub struct TypeRef(Arc<ClassType>);

impl TypeRef {
    pub fn new(id: u32, name: &str, superclass: Option<TypeRef>, is_final: bool) -> Self {
        TypeRef(Arc::new(ClassType {
            id,
            name: Arc::from(name),
            superclass,
            is_final,
        }))
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.0.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.0.is_final
    }

    pub fn superclass(&self) -> Option<&TypeRef> {
        self.0.superclass.as_ref()
    }

    /// `self` equals `other` or inherits from it.
    pub fn is_subtype_of(&self, other: &TypeRef) -> bool {
        let mut cur = Some(self);
        while let Some(t) = cur {
            if t == other {
                return true;
            }
            cur = t.superclass();
        }
        false
    }

    /// Closest class both types inherit from.
    pub fn common_super(&self, other: &TypeRef) -> Option<TypeRef> {
        let mut cur = Some(self);
        while let Some(t) = cur {
            if other.is_subtype_of(t) {
                return Some(t.clone());
            }
            cur = t.superclass();
        }
        None
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

// =============================================================================
// ObjectStamp
// =============================================================================

/// Abstract object reference.
///
/// `ty == None` means any object. `exact` pins the dynamic class to `ty`.
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectStamp {
    ty: Option<TypeRef>,
    exact: bool,
    non_null: bool,
    always_null: bool,
}

enum TypeMeet {
    Type(Option<TypeRef>, bool),
    Contradiction,
}

impl ObjectStamp {
    pub fn new(ty: Option<TypeRef>, exact: bool, non_null: bool) -> Self {
        let exact = exact || ty.as_ref().is_some_and(TypeRef::is_final);
        ObjectStamp {
            exact: exact && ty.is_some(),
            ty,
            non_null,
            always_null: false,
        }
    }

    pub fn unrestricted() -> Self {
        Self::new(None, false, false)
    }

    pub fn null() -> Self {
        ObjectStamp {
            ty: None,
            exact: false,
            non_null: false,
            always_null: true,
        }
    }

    pub fn ty(&self) -> Option<&TypeRef> {
        self.ty.as_ref()
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn is_non_null(&self) -> bool {
        self.non_null
    }

    pub fn is_always_null(&self) -> bool {
        self.always_null
    }

    pub fn is_empty(&self) -> bool {
        self.non_null && self.always_null
    }

    /// Non-null values of this stamp are all instances of `ty`.
    pub fn is_subtype_of(&self, ty: &TypeRef) -> bool {
        self.ty.as_ref().is_some_and(|own| own.is_subtype_of(ty))
    }

    /// No non-null value of this stamp can be an instance of `ty`.
    pub fn is_disjoint_from(&self, ty: &TypeRef) -> bool {
        match &self.ty {
            None => false,
            Some(own) if self.exact => !own.is_subtype_of(ty),
            Some(own) => !own.is_subtype_of(ty) && !ty.is_subtype_of(own),
        }
    }

    pub fn join(&self, other: &Self) -> Self {
        if self.always_null && other.always_null {
            return Self::null();
        }
        if self.always_null {
            return ObjectStamp {
                non_null: false,
                ..other.clone()
            };
        }
        if other.always_null {
            return ObjectStamp {
                non_null: false,
                ..self.clone()
            };
        }
        let (ty, exact) = match (&self.ty, &other.ty) {
            (Some(a), Some(b)) if a == b => (Some(a.clone()), self.exact && other.exact),
            (Some(a), Some(b)) => (a.common_super(b), false),
            _ => (None, false),
        };
        ObjectStamp {
            ty,
            exact,
            non_null: self.non_null && other.non_null,
            always_null: false,
        }
    }

    /// Intersection; `None` when empty.
    pub fn meet(&self, other: &Self) -> Option<Self> {
        let non_null = self.non_null || other.non_null;
        let always_null = self.always_null || other.always_null;
        if non_null && always_null {
            return None;
        }
        if always_null {
            return Some(Self::null());
        }
        match self.meet_types(other) {
            TypeMeet::Type(ty, exact) => Some(ObjectStamp {
                ty,
                exact,
                non_null,
                always_null: false,
            }),
            TypeMeet::Contradiction if non_null => None,
            TypeMeet::Contradiction => Some(Self::null()),
        }
    }

    fn meet_types(&self, other: &Self) -> TypeMeet {
        match (&self.ty, &other.ty) {
            (None, _) => TypeMeet::Type(other.ty.clone(), other.exact),
            (_, None) => TypeMeet::Type(self.ty.clone(), self.exact),
            (Some(a), Some(b)) if a == b => TypeMeet::Type(Some(a.clone()), self.exact || other.exact),
            (Some(a), Some(b)) if a.is_subtype_of(b) => {
                if other.exact {
                    TypeMeet::Contradiction
                } else {
                    TypeMeet::Type(Some(a.clone()), self.exact)
                }
            }
            (Some(a), Some(b)) if b.is_subtype_of(a) => {
                if self.exact {
                    TypeMeet::Contradiction
                } else {
                    TypeMeet::Type(Some(b.clone()), other.exact)
                }
            }
            _ => TypeMeet::Contradiction,
        }
    }
}

impl fmt::Debug for ObjectStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.always_null {
            return f.write_str("a null");
        }
        f.write_str("a")?;
        if self.non_null {
            f.write_str("!")?;
        }
        if self.exact {
            f.write_str("#")?;
        }
        match &self.ty {
            Some(t) => write!(f, " {t:?}"),
            None => f.write_str(" Object"),
        }
    }
}
