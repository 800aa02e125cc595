use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::ast::BlockBody;
use crate::class::ClassRef;
use crate::method::CompiledMethod;
use crate::selector::SelectorId;

pub type Ref<T> = Rc<RefCell<T>>;

pub fn new_ref<T>(value: T) -> Ref<T> {
    Rc::new(RefCell::new(value))
}

/// Object with reference fields: fixed named slots first, then the
/// indexable part if the class format allows one.
pub struct PointersObject {
    pub class: ClassRef,
    pub slots: Vec<Object>,
}

/// Indexable byte storage (strings, byte arrays).
pub struct BytesObject {
    pub class: ClassRef,
    pub bytes: Vec<u8>,
}

/// Indexable 32-bit word storage.
pub struct WordsObject {
    pub class: ClassRef,
    pub words: Vec<u32>,
}

/// A closure captured at its creation site. `home_marker` identifies the
/// method activation that `^` returns from.
pub struct BlockClosure {
    pub body: Rc<BlockBody>,
    pub method: Rc<CompiledMethod>,
    pub receiver: Object,
    pub copied: Vec<Object>,
    pub home_marker: u64,
}

impl BlockClosure {
    pub fn num_args(&self) -> u8 {
        self.body.num_args
    }
}

/// Reified view of a live activation.
pub struct ContextSnapshot {
    pub marker: u64,
    pub method: Rc<CompiledMethod>,
    pub receiver: Object,
}

#[derive(Clone)]
pub enum Object {
    Nil,
    True,
    False,
    SmallInt(i64),
    LargeInt(Rc<BigInt>),
    Float(f64),
    Char(char),
    Symbol(SelectorId),
    /// Placeholder passed for block parameters the caller did not supply.
    NoArg,
    Pointers(Ref<PointersObject>),
    Bytes(Ref<BytesObject>),
    Words(Ref<WordsObject>),
    Method(Rc<CompiledMethod>),
    Block(Rc<BlockClosure>),
    Context(Rc<ContextSnapshot>),
    Class(ClassRef),
}

impl Object {
    pub fn boolean(value: bool) -> Object {
        if value { Object::True } else { Object::False }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Object::Nil)
    }

    /// `Some(bool)` only for the two boolean objects. Conditions in folded
    /// control flow must be booleans, anything else is a type error.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::True => Some(true),
            Object::False => Some(false),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Object::Nil => "nil",
            Object::True | Object::False => "boolean",
            Object::SmallInt(_) => "small integer",
            Object::LargeInt(_) => "large integer",
            Object::Float(_) => "float",
            Object::Char(_) => "character",
            Object::Symbol(_) => "symbol",
            Object::NoArg => "no argument",
            Object::Pointers(_) => "pointers object",
            Object::Bytes(_) => "bytes object",
            Object::Words(_) => "words object",
            Object::Method(_) => "compiled method",
            Object::Block(_) => "block closure",
            Object::Context(_) => "context",
            Object::Class(_) => "class",
        }
    }

    /// Reference identity for heap objects, value identity for immediates.
    pub fn identical(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Nil, Object::Nil) => true,
            (Object::True, Object::True) => true,
            (Object::False, Object::False) => true,
            (Object::NoArg, Object::NoArg) => true,
            (Object::SmallInt(a), Object::SmallInt(b)) => a == b,
            (Object::LargeInt(a), Object::LargeInt(b)) => Rc::ptr_eq(a, b),
            (Object::Float(a), Object::Float(b)) => {
                a.to_bits() == b.to_bits()
            }
            (Object::Char(a), Object::Char(b)) => a == b,
            (Object::Symbol(a), Object::Symbol(b)) => a == b,
            (Object::Pointers(a), Object::Pointers(b)) => Rc::ptr_eq(a, b),
            (Object::Bytes(a), Object::Bytes(b)) => Rc::ptr_eq(a, b),
            (Object::Words(a), Object::Words(b)) => Rc::ptr_eq(a, b),
            (Object::Method(a), Object::Method(b)) => Rc::ptr_eq(a, b),
            (Object::Block(a), Object::Block(b)) => Rc::ptr_eq(a, b),
            (Object::Context(a), Object::Context(b)) => Rc::ptr_eq(a, b),
            (Object::Class(a), Object::Class(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn identity_hash(&self) -> u64 {
        match self {
            Object::Nil => 1,
            Object::True => 2,
            Object::False => 3,
            Object::NoArg => 4,
            Object::SmallInt(v) => *v as u64,
            Object::LargeInt(v) => Rc::as_ptr(v) as u64,
            Object::Float(v) => v.to_bits(),
            Object::Char(c) => *c as u64,
            Object::Symbol(id) => u64::from(id.as_u32()),
            Object::Pointers(v) => Rc::as_ptr(v) as u64,
            Object::Bytes(v) => Rc::as_ptr(v) as u64,
            Object::Words(v) => Rc::as_ptr(v) as u64,
            Object::Method(v) => Rc::as_ptr(v) as u64,
            Object::Block(v) => Rc::as_ptr(v) as u64,
            Object::Context(v) => Rc::as_ptr(v) as u64,
            Object::Class(v) => Rc::as_ptr(v) as u64,
        }
    }

    /// UTF-8 view of a bytes object, if this is one.
    pub fn as_byte_string(&self) -> Option<String> {
        match self {
            Object::Bytes(b) => {
                Some(String::from_utf8_lossy(&b.borrow().bytes).into_owned())
            }
            _ => None,
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        self.identical(other)
    }
}

// The object graph is cyclic, so Debug stays shallow.
impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Nil => write!(f, "nil"),
            Object::True => write!(f, "true"),
            Object::False => write!(f, "false"),
            Object::SmallInt(v) => write!(f, "{v}"),
            Object::LargeInt(v) => write!(f, "{v}"),
            Object::Float(v) => write!(f, "{v:?}"),
            Object::Char(c) => write!(f, "${c}"),
            Object::Symbol(id) => write!(f, "#sym:{}", id.as_u32()),
            Object::NoArg => write!(f, "<no argument>"),
            Object::Pointers(p) => {
                let p = p.borrow();
                write!(f, "a {}[{}]", p.class.borrow().name(), p.slots.len())
            }
            Object::Bytes(b) => {
                let b = b.borrow();
                write!(
                    f,
                    "'{}'",
                    String::from_utf8_lossy(&b.bytes).escape_debug()
                )
            }
            Object::Words(w) => {
                write!(f, "words[{}]", w.borrow().words.len())
            }
            Object::Method(m) => write!(f, "{m:?}"),
            Object::Block(b) => {
                write!(f, "a block/{}", b.body.num_args)
            }
            Object::Context(c) => write!(f, "context#{}", c.marker),
            Object::Class(c) => write!(f, "{}", c.borrow().name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booleans_convert_and_nothing_else_does() {
        assert_eq!(Object::True.as_bool(), Some(true));
        assert_eq!(Object::False.as_bool(), Some(false));
        assert_eq!(Object::Nil.as_bool(), None);
        assert_eq!(Object::SmallInt(1).as_bool(), None);
    }

    #[test]
    fn small_ints_are_identical_by_value() {
        assert!(Object::SmallInt(7).identical(&Object::SmallInt(7)));
        assert!(!Object::SmallInt(7).identical(&Object::SmallInt(8)));
        assert!(!Object::SmallInt(0).identical(&Object::Nil));
    }

    #[test]
    fn large_ints_are_identical_by_reference() {
        let a = Rc::new(BigInt::from(1_000_000_000_000_000_000_000_i128));
        let b = Rc::new(BigInt::from(1_000_000_000_000_000_000_000_i128));
        let obj_a = Object::LargeInt(Rc::clone(&a));
        assert!(obj_a.identical(&Object::LargeInt(a)));
        assert!(!obj_a.identical(&Object::LargeInt(b)));
    }

    #[test]
    fn no_arg_sentinel_is_distinct_from_nil() {
        assert!(!Object::NoArg.identical(&Object::Nil));
        assert!(Object::NoArg.identical(&Object::NoArg));
    }
}
