//! Block activation, perform-style sends and the two hooks the error
//! machinery runs through: handler-context search and the final
//! unhandled-message report.

use std::rc::Rc;

use crate::interpreter::{Machine, RuntimeError, Unwind};
use crate::primitives::{
    fail, first_arg, NamedPrimitive, PrimitiveDesc, PrimitiveSet,
};
use crate::value::{ContextSnapshot, Object};

pub fn set() -> PrimitiveSet {
    PrimitiveSet {
        name: "evaluation",
        indexed: vec![
            (83, PrimitiveDesc::new("object_perform", 1, perform)),
            (
                197,
                PrimitiveDesc::new(
                    "context_next_handler",
                    0,
                    next_handler_context,
                ),
            ),
            (201, PrimitiveDesc::new("block_value", 0, block_value)),
            (202, PrimitiveDesc::new("block_value", 1, block_value)),
            (203, PrimitiveDesc::new("block_value", 2, block_value)),
            (204, PrimitiveDesc::new("block_value", 3, block_value)),
            (205, PrimitiveDesc::new("block_value", 4, block_value)),
            (
                206,
                PrimitiveDesc::new(
                    "block_value_with_arguments",
                    1,
                    block_value_with_arguments,
                ),
            ),
        ],
        named: vec![NamedPrimitive::new(
            "Kernel",
            "primitiveUnhandledMessage",
            PrimitiveDesc::new("unhandled_message", 1, unhandled_message),
        )],
        ranged: None,
    }
}

/// `perform:` and its `with:` variants: the first argument is the
/// selector, the rest become the message arguments.
pub fn perform(
    machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let Object::Symbol(selector) = first_arg(args)? else {
        return Err(fail());
    };
    machine.send(receiver, *selector, args[1..].to_vec(), None)
}

/// Answers the innermost enclosing handler context. With no handler on
/// the stack the error is unrecoverable and the image shuts down.
pub fn next_handler_context(
    machine: &mut Machine,
    _receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    match machine.handler_frame() {
        Some(frame) => Ok(Object::Context(Rc::new(ContextSnapshot {
            marker: frame.marker,
            method: Rc::clone(&frame.method),
            receiver: frame.receiver.clone(),
        }))),
        None => {
            eprintln!("=== Unhandled Error ===");
            eprint!("{}", machine.stack_dump());
            Err(Unwind::Exit { status: 1 })
        }
    }
}

pub fn block_value(
    machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let Object::Block(closure) = receiver else {
        return Err(fail());
    };
    machine.call_block(closure, args.to_vec())
}

pub fn block_value_with_arguments(
    machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let Object::Block(closure) = receiver else {
        return Err(fail());
    };
    let Object::Pointers(array) = first_arg(args)? else {
        return Err(fail());
    };
    let values = array.borrow().slots.clone();
    machine.call_block(closure, values)
}

/// Terminal `doesNotUnderstand:` target. The argument is the reified
/// message whose first slot holds the selector.
pub fn unhandled_message(
    machine: &mut Machine,
    _receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let selector = match first_arg(args)? {
        Object::Pointers(message) => match message.borrow().slots.first() {
            Some(Object::Symbol(id)) => machine.image.selectors.display(*id),
            _ => "?".to_owned(),
        },
        _ => "?".to_owned(),
    };
    Err(RuntimeError::DoesNotUnderstand { selector }.into())
}
