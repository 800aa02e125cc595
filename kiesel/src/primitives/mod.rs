//! Primitive dispatch. Primitives live in ordered sets scanned in
//! registration order; the first set that claims an index wins. A failed
//! primitive falls back to the method's bytecode body, so most functions
//! here report trouble as a plain failure rather than a hard error.

use log::debug;

use crate::bytecode::SpecialConstant;
use crate::interpreter::{Machine, RuntimeError, Unwind};
use crate::method::CompiledMethod;
use crate::value::Object;

pub mod arithmetic;
pub mod evaluation;
pub mod io;
pub mod quick;
pub mod storage;
pub mod system;

/// Primitive index that redirects through a (module, name) pair stored in
/// the method's first literal.
pub const EXTERNAL_CALL_INDEX: u16 = 117;

pub type PrimitiveFn =
    fn(&mut Machine, Object, &[Object]) -> Result<Object, Unwind>;

#[derive(Clone, Copy)]
pub struct PrimitiveDesc {
    pub name: &'static str,
    pub arity: u8,
    pub func: PrimitiveFn,
}

impl PrimitiveDesc {
    pub const fn new(name: &'static str, arity: u8, func: PrimitiveFn) -> Self {
        Self { name, arity, func }
    }
}

/// What activating a primitive index does. Quick primitives answer
/// without running any code of their own.
#[derive(Clone, Copy)]
pub enum PrimitiveAction {
    Call(PrimitiveDesc),
    ReturnReceiver,
    ReturnConstant(SpecialConstant),
    ReturnInstVar(u16),
}

pub struct NamedPrimitive {
    pub module: &'static str,
    pub name: &'static str,
    pub desc: PrimitiveDesc,
}

impl NamedPrimitive {
    pub const fn new(
        module: &'static str,
        name: &'static str,
        desc: PrimitiveDesc,
    ) -> Self {
        Self { module, name, desc }
    }
}

pub struct PrimitiveSet {
    pub name: &'static str,
    pub indexed: Vec<(u16, PrimitiveDesc)>,
    pub named: Vec<NamedPrimitive>,
    pub ranged: Option<fn(u16) -> Option<PrimitiveAction>>,
}

impl PrimitiveSet {
    fn resolve_index(&self, index: u16) -> Option<PrimitiveAction> {
        for (registered, desc) in &self.indexed {
            if *registered == index {
                return Some(PrimitiveAction::Call(*desc));
            }
        }
        self.ranged.and_then(|resolve| resolve(index))
    }
}

pub struct PrimitiveTable {
    sets: Vec<PrimitiveSet>,
}

impl PrimitiveTable {
    pub fn bootstrap() -> Self {
        Self {
            sets: vec![
                arithmetic::set(),
                evaluation::set(),
                io::set(),
                quick::set(),
                storage::set(),
                system::set(),
            ],
        }
    }

    pub fn resolve(
        &self,
        index: u16,
        method: &CompiledMethod,
    ) -> Option<PrimitiveAction> {
        if index == EXTERNAL_CALL_INDEX {
            let (module, name) = method.external_target()?;
            return self.resolve_named(&module, &name);
        }
        self.sets.iter().find_map(|set| set.resolve_index(index))
    }

    fn resolve_named(
        &self,
        module: &str,
        name: &str,
    ) -> Option<PrimitiveAction> {
        for set in &self.sets {
            for entry in &set.named {
                if entry.module == module && entry.name == name {
                    return Some(PrimitiveAction::Call(entry.desc));
                }
            }
        }
        debug!("no primitive registered for {module}::{name}");
        None
    }
}

pub(crate) fn fail() -> Unwind {
    RuntimeError::PrimitiveFailed.into()
}

pub(crate) fn first_arg(args: &[Object]) -> Result<&Object, Unwind> {
    args.first().ok_or_else(fail)
}

pub(crate) fn expect_small(value: &Object) -> Result<i64, Unwind> {
    match value {
        Object::SmallInt(v) => Ok(*v),
        _ => Err(fail()),
    }
}

/// 1-based index argument, as used by all indexable accessors.
pub(crate) fn expect_index(value: &Object) -> Result<usize, Unwind> {
    match value {
        Object::SmallInt(v) if *v >= 1 => Ok(*v as usize),
        _ => Err(fail()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method_with_primitive(index: u16) -> CompiledMethod {
        CompiledMethod::new(None, 0, 0, Some(index), vec![0x78], vec![])
    }

    #[test]
    fn arithmetic_claims_the_low_indices() {
        let table = PrimitiveTable::bootstrap();
        let method = method_with_primitive(1);
        assert!(matches!(
            table.resolve(1, &method),
            Some(PrimitiveAction::Call(_))
        ));
    }

    #[test]
    fn quick_indices_return_actions_without_code() {
        let table = PrimitiveTable::bootstrap();
        let method = method_with_primitive(256);
        assert!(matches!(
            table.resolve(256, &method),
            Some(PrimitiveAction::ReturnReceiver)
        ));
        assert!(matches!(
            table.resolve(262, &method),
            Some(PrimitiveAction::ReturnConstant(SpecialConstant::One))
        ));
        assert!(matches!(
            table.resolve(270, &method),
            Some(PrimitiveAction::ReturnInstVar(6))
        ));
    }

    #[test]
    fn unknown_indices_resolve_to_nothing() {
        let table = PrimitiveTable::bootstrap();
        let method = method_with_primitive(9999);
        assert!(table.resolve(9999, &method).is_none());
    }

    #[test]
    fn external_calls_need_a_target_literal() {
        let table = PrimitiveTable::bootstrap();
        let bare = method_with_primitive(EXTERNAL_CALL_INDEX);
        assert!(table.resolve(EXTERNAL_CALL_INDEX, &bare).is_none());

        let image = crate::image::Image::bootstrap();
        let target = image.new_array(vec![
            image.new_string("FilePlugin"),
            image.new_string("primitiveFileStdioHandles"),
        ]);
        let method = CompiledMethod::new(
            None,
            0,
            0,
            Some(EXTERNAL_CALL_INDEX),
            vec![0x78],
            vec![target],
        );
        assert!(matches!(
            table.resolve(EXTERNAL_CALL_INDEX, &method),
            Some(PrimitiveAction::Call(_))
        ));
    }
}
