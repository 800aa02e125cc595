//! Test harness: hand-assembled bytecode run against a bootstrapped
//! image. Control transfers that escape the synthetic activation are a
//! bug in the code under test, so the harness turns them into panics
//! rather than values.

use std::rc::Rc;

use crate::image::Image;
use crate::interpreter::{Machine, RuntimeError, Unwind};
use crate::method::CompiledMethod;
use crate::value::Object;

/// Result of a harness run with the escaping transfer kinds already
/// handled.
#[derive(Debug)]
pub enum Outcome {
    Value(Object),
    Error(RuntimeError),
    Exit { status: i32 },
}

impl Outcome {
    /// The computed value. Panics on the other outcomes, which makes
    /// assertion failures point at the run that produced them.
    pub fn value(self) -> Object {
        match self {
            Outcome::Value(value) => value,
            Outcome::Error(error) => panic!("run failed: {error}"),
            Outcome::Exit { status } => {
                panic!("run exited with status {status}")
            }
        }
    }
}

pub struct Harness {
    pub machine: Machine,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            machine: Machine::new(Image::bootstrap()),
        }
    }

    /// Assemble an anonymous method from raw bytecode and a literal
    /// frame.
    pub fn method(
        &self,
        num_args: u8,
        num_temps: u8,
        bytecode: Vec<u8>,
        literals: Vec<Object>,
    ) -> Rc<CompiledMethod> {
        Rc::new(CompiledMethod::new(
            None, num_args, num_temps, None, bytecode, literals,
        ))
    }

    /// Bind `method` to the receiver and arguments and run it to
    /// completion. A non-local return or process switch reaching the
    /// harness means the activation it targeted no longer exists, which
    /// no well-formed run produces.
    pub fn run(
        &mut self,
        method: Rc<CompiledMethod>,
        receiver: Object,
        arguments: Vec<Object>,
    ) -> Outcome {
        match self.machine.invoke(method, receiver, arguments) {
            Ok(value) => Outcome::Value(value),
            Err(Unwind::Error(error)) => Outcome::Error(error),
            Err(Unwind::Exit { status }) => Outcome::Exit { status },
            Err(Unwind::Return { home, .. }) => {
                panic!("non-local return escaped the run (home {home})")
            }
            Err(Unwind::ProcessSwitch { .. }) => {
                panic!("process switch escaped the run")
            }
        }
    }

    /// One-step convenience for the common case.
    pub fn run_bytes(
        &mut self,
        bytecode: Vec<u8>,
        literals: Vec<Object>,
        receiver: Object,
        arguments: Vec<Object>,
    ) -> Outcome {
        let num_args = arguments.len() as u8;
        let method = self.method(num_args, num_args, bytecode, literals);
        self.run(method, receiver, arguments)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::class::{
        add_method, new_class, set_superclass, InstanceFormat,
    };
    use crate::value::{new_ref, PointersObject};

    #[test]
    fn addition_runs_through_the_bytecode() {
        let mut h = Harness::new();
        let value = h
            .run_bytes(
                vec![0x70, 0x76, 0xB0, 0x7C],
                vec![],
                Object::SmallInt(41),
                vec![],
            )
            .value();
        assert!(matches!(value, Object::SmallInt(42)));
    }

    #[test]
    fn reparenting_invalidates_cached_lookups() {
        let mut h = Harness::new();
        let selector = h.machine.image.selectors.intern("answerSeven");
        let object = h.machine.image.classes.object.clone();
        let parent =
            new_class("Parent", Some(object.clone()), InstanceFormat::Fixed, &[]);
        let child =
            new_class("Child", Some(object), InstanceFormat::Fixed, &[]);
        let instance = Object::Pointers(new_ref(PointersObject {
            class: child.clone(),
            slots: vec![],
        }));

        let cache = RefCell::new(None);
        let miss = h.machine.send(
            instance.clone(),
            selector,
            vec![],
            Some(&cache),
        );
        assert!(matches!(
            miss,
            Err(Unwind::Error(RuntimeError::DoesNotUnderstand { .. }))
        ));

        let method = Rc::new(CompiledMethod::new(
            Some(selector),
            0,
            0,
            None,
            vec![0x20, 0x7C],
            vec![Object::SmallInt(7)],
        ));
        add_method(&parent, selector, method);
        set_superclass(&child, Some(parent));

        let hit =
            h.machine.send(instance, selector, vec![], Some(&cache));
        assert!(matches!(hit, Ok(Object::SmallInt(7))));
    }

    #[test]
    fn returning_from_a_dead_home_is_an_error() {
        let mut h = Harness::new();
        // ^ [ ^ nil ]
        let escaped = h
            .run_bytes(
                vec![0x8F, 0x00, 0x00, 0x02, 0x73, 0x7C, 0x7C],
                vec![],
                Object::Nil,
                vec![],
            )
            .value();
        let Object::Block(block) = escaped else {
            panic!("expected the block to escape");
        };
        assert!(matches!(
            h.machine.call_block(block, vec![]),
            Err(Unwind::Error(
                RuntimeError::NonLocalReturnFromDeadContext
            ))
        ));
    }

    #[test]
    fn missing_arguments_are_padded_with_the_sentinel() {
        let mut h = Harness::new();
        // ^ [:t0 | t0]
        let block = h
            .run_bytes(
                vec![0x8F, 0x01, 0x00, 0x02, 0x10, 0x7D, 0x7C],
                vec![],
                Object::Nil,
                vec![],
            )
            .value();
        let Object::Block(block) = block else {
            panic!("expected a block");
        };
        assert!(matches!(
            h.machine.call_block(Rc::clone(&block), vec![]),
            Ok(Object::NoArg)
        ));
        assert!(matches!(
            h.machine.call_block(
                block,
                vec![Object::SmallInt(1), Object::SmallInt(2)]
            ),
            Err(Unwind::Error(RuntimeError::WrongArgumentCount {
                expected: 1,
                got: 2
            }))
        ));
    }

    #[test]
    fn unknown_selectors_surface_the_message() {
        let mut h = Harness::new();
        let selector = h.machine.image.selectors.intern("frobnicate:");
        let result = h.machine.send(
            Object::SmallInt(5),
            selector,
            vec![Object::SmallInt(1)],
            None,
        );
        let Err(Unwind::Error(RuntimeError::DoesNotUnderstand {
            selector,
        })) = result
        else {
            panic!("expected a does-not-understand error");
        };
        assert_eq!(selector, "frobnicate:");
    }

    #[test]
    #[should_panic(expected = "process switch escaped the run")]
    fn escaping_process_switch_is_a_hard_failure() {
        let mut h = Harness::new();
        let method = Rc::new(CompiledMethod::new(
            None,
            0,
            0,
            Some(167),
            vec![],
            vec![],
        ));
        let _ = h.run(method, Object::Nil, vec![]);
    }
}
