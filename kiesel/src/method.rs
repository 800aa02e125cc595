use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::ast::MethodBody;
use crate::class::WeakClassRef;
use crate::decompiler;
use crate::selector::SelectorId;
use crate::value::Object;

/// A method: primitive header, literal frame, raw bytecode, and the folded
/// body built on first use.
pub struct CompiledMethod {
    pub selector: Option<SelectorId>,
    pub num_args: u8,
    /// Total temp slots, arguments included.
    pub num_temps: u8,
    pub primitive: Option<u16>,
    pub bytecode: Vec<u8>,
    pub literals: Vec<Object>,
    /// Class this method was installed into, for super sends.
    pub holder: RefCell<Option<WeakClassRef>>,
    body: OnceCell<Rc<MethodBody>>,
}

impl CompiledMethod {
    pub fn new(
        selector: Option<SelectorId>,
        num_args: u8,
        num_temps: u8,
        primitive: Option<u16>,
        bytecode: Vec<u8>,
        literals: Vec<Object>,
    ) -> Self {
        Self {
            selector,
            num_args,
            num_temps,
            primitive,
            bytecode,
            literals,
            holder: RefCell::new(None),
            body: OnceCell::new(),
        }
    }

    /// Folded body, built once from the bytecode and reused by every
    /// activation of this method.
    pub fn body(&self) -> Rc<MethodBody> {
        Rc::clone(self.body.get_or_init(|| {
            Rc::new(decompiler::decompile(&self.bytecode, self.primitive))
        }))
    }

    pub fn has_body(&self) -> bool {
        !self.bytecode.is_empty()
    }

    pub fn literal(&self, index: usize) -> Option<Object> {
        self.literals.get(index).cloned()
    }

    /// For external primitives the first literal is an array whose first
    /// two fields name the module and the function.
    pub fn external_target(&self) -> Option<(String, String)> {
        let Some(Object::Pointers(target)) = self.literal(0) else {
            return None;
        };
        let target = target.borrow();
        let module = target.slots.first()?.as_byte_string()?;
        let name = target.slots.get(1)?.as_byte_string()?;
        Some((module, name))
    }
}

impl fmt::Debug for CompiledMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "method/{} ({} bytes, {} literals",
            self.num_args,
            self.bytecode.len(),
            self.literals.len()
        )?;
        if let Some(index) = self.primitive {
            write!(f, ", primitive {index}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{new_class, InstanceFormat};
    use crate::value::{new_ref, BytesObject, PointersObject};

    fn byte_string(text: &str) -> Object {
        let class =
            new_class("ByteString", None, InstanceFormat::VariableBytes, &[]);
        Object::Bytes(new_ref(BytesObject {
            class,
            bytes: text.as_bytes().to_vec(),
        }))
    }

    #[test]
    fn body_is_built_once_and_shared() {
        let method =
            CompiledMethod::new(None, 0, 0, None, vec![0x70, 0x7C], vec![]);
        let first = method.body();
        let second = method.body();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.statements.len(), 1);
    }

    #[test]
    fn external_target_reads_the_first_literal() {
        let class = new_class("Array", None, InstanceFormat::Variable, &[]);
        let target = Object::Pointers(new_ref(PointersObject {
            class,
            slots: vec![
                byte_string("FilePlugin"),
                byte_string("primitiveFileWrite"),
            ],
        }));
        let method = CompiledMethod::new(
            None,
            0,
            0,
            Some(117),
            vec![0x78],
            vec![target],
        );
        assert_eq!(
            method.external_target(),
            Some(("FilePlugin".into(), "primitiveFileWrite".into()))
        );

        let bare = CompiledMethod::new(None, 0, 0, Some(117), vec![], vec![]);
        assert_eq!(bare.external_target(), None);
    }
}
