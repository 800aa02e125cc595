//! Tree-walking execution over folded method bodies: activations with
//! markers, send-site caches, and unwind-based non-local control.

use std::cell::RefCell;
use std::fmt;
use std::fmt::Write as _;
use std::rc::Rc;

use log::{debug, error, warn};

use crate::ast::{Node, SendCache};
use crate::bytecode::{SelectorRef, SpecialConstant, StoreTarget};
use crate::class::{self, ClassRef};
use crate::image::Image;
use crate::method::CompiledMethod;
use crate::primitives::{PrimitiveAction, PrimitiveTable};
use crate::selector::SelectorId;
use crate::value::{BlockClosure, ContextSnapshot, Object};

/// Methods whose primitive index is this value mark exception handler
/// frames; the index performs no operation of its own.
pub const EXCEPTION_HANDLER_MARKER: u16 = 199;

const STACK_DEPTH_LIMIT: usize = 10_000;

#[derive(Debug, Clone)]
pub enum RuntimeError {
    PrimitiveFailed,
    UnknownBytecode { byte: u8 },
    NonLocalReturnFromDeadContext,
    LookupMissing { selector: String },
    DoesNotUnderstand { selector: String },
    WrongType { expected: &'static str, got: Object },
    WrongArgumentCount { expected: u8, got: usize },
    IndexOutOfBounds { index: i64, size: usize },
    StackOverflow,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::PrimitiveFailed => write!(f, "primitive failed"),
            RuntimeError::UnknownBytecode { byte } => {
                write!(f, "unknown bytecode {byte}")
            }
            RuntimeError::NonLocalReturnFromDeadContext => {
                write!(f, "non-local return from a dead context")
            }
            RuntimeError::LookupMissing { selector } => {
                write!(f, "lookup failed for #{selector}")
            }
            RuntimeError::DoesNotUnderstand { selector } => {
                write!(f, "message not understood: #{selector}")
            }
            RuntimeError::WrongType { expected, got } => {
                write!(f, "expected {expected}, got {got:?}")
            }
            RuntimeError::WrongArgumentCount { expected, got } => {
                write!(f, "expected {expected} arguments, got {got}")
            }
            RuntimeError::IndexOutOfBounds { index, size } => {
                write!(f, "index {index} out of bounds for size {size}")
            }
            RuntimeError::StackOverflow => write!(f, "stack depth exceeded"),
        }
    }
}

/// Control transfer threaded through evaluation as the error arm.
#[derive(Debug)]
pub enum Unwind {
    /// `^` unwinding to the method activation identified by `home`.
    Return { home: u64, value: Object },
    /// Cooperative transfer out of the current process.
    ProcessSwitch { value: Object },
    /// Image requested shutdown.
    Exit { status: i32 },
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(error: RuntimeError) -> Self {
        Unwind::Error(error)
    }
}

/// Bookkeeping for one live activation, used for liveness checks, handler
/// search and stack dumps.
pub struct FrameInfo {
    pub marker: u64,
    pub home_marker: u64,
    pub method: Rc<CompiledMethod>,
    pub receiver: Object,
    pub arguments: Vec<Object>,
    pub is_block: bool,
    pub handler: bool,
}

struct Activation {
    receiver: Object,
    temps: Vec<Object>,
    marker: u64,
    home_marker: u64,
    method: Rc<CompiledMethod>,
}

pub struct Machine {
    pub image: Image,
    pub primitives: PrimitiveTable,
    pub frames: Vec<FrameInfo>,
    /// System attribute table served by the introspection primitive.
    pub attributes: std::collections::HashMap<i64, String>,
    /// Open files owned by the I/O primitives.
    pub files: crate::primitives::io::FileRegistry,
    /// Zero point of the millisecond clock.
    pub started: std::time::Instant,
    next_marker: u64,
}

impl Machine {
    pub fn new(image: Image) -> Self {
        let mut attributes = std::collections::HashMap::new();
        attributes.insert(1001, std::env::consts::OS.to_owned());
        attributes.insert(1002, env!("CARGO_PKG_VERSION").to_owned());
        Self {
            image,
            primitives: PrimitiveTable::bootstrap(),
            frames: Vec::new(),
            attributes,
            files: crate::primitives::io::FileRegistry::new(),
            started: std::time::Instant::now(),
            next_marker: 1,
        }
    }

    fn fresh_marker(&mut self) -> u64 {
        let marker = self.next_marker;
        self.next_marker += 1;
        marker
    }

    fn marker_is_live(&self, marker: u64) -> bool {
        self.frames.iter().any(|frame| frame.marker == marker)
    }

    /// Innermost handler frame outside the current activation.
    pub fn handler_frame(&self) -> Option<&FrameInfo> {
        self.frames.iter().rev().skip(1).find(|frame| frame.handler)
    }

    pub fn send(
        &mut self,
        receiver: Object,
        selector: SelectorId,
        arguments: Vec<Object>,
        cache: Option<&RefCell<Option<SendCache>>>,
    ) -> Result<Object, Unwind> {
        let class = self.image.class_of(&receiver);

        if let Some(cell) = cache {
            let cached = cell.borrow().clone();
            if let Some(entry) = cached {
                if let Some(cached_class) = entry.class.upgrade() {
                    if Rc::ptr_eq(&cached_class, &class)
                        && cached_class.borrow().version() == entry.version
                    {
                        return self.dispatch(
                            entry.method,
                            entry.is_dnu,
                            receiver,
                            selector,
                            arguments,
                        );
                    }
                }
            }
        }

        let (method, is_dnu) = self.resolve_method(&class, selector)?;
        if let Some(cell) = cache {
            *cell.borrow_mut() = Some(SendCache {
                class: Rc::downgrade(&class),
                version: class.borrow().version(),
                method: Rc::clone(&method),
                is_dnu,
            });
        }
        self.dispatch(method, is_dnu, receiver, selector, arguments)
    }

    /// Lookup starting above the holder of the current method.
    fn send_super(
        &mut self,
        method: &Rc<CompiledMethod>,
        receiver: Object,
        selector: SelectorId,
        arguments: Vec<Object>,
    ) -> Result<Object, Unwind> {
        let holder = method.holder.borrow().clone();
        let start = holder
            .and_then(|weak| weak.upgrade())
            .and_then(|class| class.borrow().superclass.clone());
        let Some(start) = start else {
            return Err(RuntimeError::LookupMissing {
                selector: self.image.selectors.display(selector),
            }
            .into());
        };
        let (found, is_dnu) = self.resolve_method(&start, selector)?;
        self.dispatch(found, is_dnu, receiver, selector, arguments)
    }

    fn resolve_method(
        &mut self,
        class: &ClassRef,
        selector: SelectorId,
    ) -> Result<(Rc<CompiledMethod>, bool), Unwind> {
        if let Some((method, _)) = class::lookup(class, selector) {
            return Ok((method, false));
        }
        let dnu = self.image.well_known.does_not_understand;
        if let Some((method, _)) = class::lookup(class, dnu) {
            debug!(
                "#{} not understood by {}",
                self.image.selectors.display(selector),
                class.borrow().name()
            );
            return Ok((method, true));
        }
        Err(RuntimeError::LookupMissing {
            selector: self.image.selectors.display(selector),
        }
        .into())
    }

    fn dispatch(
        &mut self,
        method: Rc<CompiledMethod>,
        is_dnu: bool,
        receiver: Object,
        selector: SelectorId,
        arguments: Vec<Object>,
    ) -> Result<Object, Unwind> {
        if is_dnu {
            let message = self.image.new_message(selector, arguments);
            self.invoke(method, receiver, vec![message])
        } else {
            self.invoke(method, receiver, arguments)
        }
    }

    /// Activate a method: run its primitive if it has one, falling back to
    /// the bytecode body when the primitive fails.
    pub fn invoke(
        &mut self,
        method: Rc<CompiledMethod>,
        receiver: Object,
        arguments: Vec<Object>,
    ) -> Result<Object, Unwind> {
        if self.frames.len() >= STACK_DEPTH_LIMIT {
            return Err(RuntimeError::StackOverflow.into());
        }
        let marker = self.fresh_marker();
        self.frames.push(FrameInfo {
            marker,
            home_marker: marker,
            method: Rc::clone(&method),
            receiver: receiver.clone(),
            arguments: arguments.clone(),
            is_block: false,
            handler: method.primitive == Some(EXCEPTION_HANDLER_MARKER),
        });
        let result = self.run_method(&method, receiver, arguments, marker);
        self.frames.pop();
        match result {
            Err(Unwind::Return { home, value }) if home == marker => {
                Ok(value)
            }
            other => other,
        }
    }

    fn run_method(
        &mut self,
        method: &Rc<CompiledMethod>,
        receiver: Object,
        arguments: Vec<Object>,
        marker: u64,
    ) -> Result<Object, Unwind> {
        if let Some(index) = method.primitive {
            if index != EXCEPTION_HANDLER_MARKER {
                match self.run_primitive(index, method, &receiver, &arguments)
                {
                    Ok(value) => return Ok(value),
                    Err(Unwind::Error(RuntimeError::PrimitiveFailed)) => {
                        // fall through to the bytecode body
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        if !method.has_body() {
            return Err(RuntimeError::PrimitiveFailed.into());
        }
        let body = method.body();
        let mut temps = arguments;
        let slots = (method.num_temps as usize).max(temps.len());
        temps.resize(slots, Object::Nil);
        let mut activation = Activation {
            receiver,
            temps,
            marker,
            home_marker: marker,
            method: Rc::clone(method),
        };
        for node in &body.statements {
            self.eval(&mut activation, node)?;
        }
        Ok(activation.receiver)
    }

    fn run_primitive(
        &mut self,
        index: u16,
        method: &Rc<CompiledMethod>,
        receiver: &Object,
        arguments: &[Object],
    ) -> Result<Object, Unwind> {
        let Some(action) = self.primitives.resolve(index, method) else {
            warn!("primitive {index} has no implementation, failing");
            return Err(RuntimeError::PrimitiveFailed.into());
        };
        match action {
            PrimitiveAction::Call(desc) => {
                (desc.func)(self, receiver.clone(), arguments)
            }
            PrimitiveAction::ReturnReceiver => Ok(receiver.clone()),
            PrimitiveAction::ReturnConstant(constant) => {
                Ok(constant_object(constant))
            }
            PrimitiveAction::ReturnInstVar(index) => match receiver {
                Object::Pointers(object) => object
                    .borrow()
                    .slots
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| RuntimeError::PrimitiveFailed.into()),
                _ => Err(RuntimeError::PrimitiveFailed.into()),
            },
        }
    }

    /// Activate a block. Missing arguments are padded with the no-argument
    /// placeholder, surplus arguments are an error.
    pub fn call_block(
        &mut self,
        closure: Rc<BlockClosure>,
        mut arguments: Vec<Object>,
    ) -> Result<Object, Unwind> {
        let expected = closure.num_args() as usize;
        if arguments.len() > expected {
            return Err(RuntimeError::WrongArgumentCount {
                expected: expected as u8,
                got: arguments.len(),
            }
            .into());
        }
        while arguments.len() < expected {
            arguments.push(Object::NoArg);
        }
        if self.frames.len() >= STACK_DEPTH_LIMIT {
            return Err(RuntimeError::StackOverflow.into());
        }
        let marker = self.fresh_marker();
        let mut temps = arguments.clone();
        temps.extend(closure.copied.iter().cloned());
        let mut activation = Activation {
            receiver: closure.receiver.clone(),
            temps,
            marker,
            home_marker: closure.home_marker,
            method: Rc::clone(&closure.method),
        };
        self.frames.push(FrameInfo {
            marker,
            home_marker: closure.home_marker,
            method: Rc::clone(&closure.method),
            receiver: closure.receiver.clone(),
            arguments,
            is_block: true,
            handler: false,
        });
        let mut result = Ok(Object::Nil);
        for node in &closure.body.statements {
            match self.eval(&mut activation, node) {
                Ok(value) => result = Ok(value),
                Err(unwind) => {
                    result = Err(unwind);
                    break;
                }
            }
        }
        self.frames.pop();
        match result {
            // The block's own return value arrives as an unwind to its
            // marker.
            Err(Unwind::Return { home, value }) if home == marker => {
                Ok(value)
            }
            Err(other) => Err(other),
            Ok(value) => Ok(value),
        }
    }

    fn eval(
        &mut self,
        activation: &mut Activation,
        node: &Node,
    ) -> Result<Object, Unwind> {
        match node {
            Node::Receiver => Ok(activation.receiver.clone()),
            Node::ReceiverVariable { index } => {
                read_ivar(&activation.receiver, *index as usize)
            }
            Node::Temporary { index } => Ok(activation
                .temps
                .get(*index as usize)
                .cloned()
                .unwrap_or(Object::Nil)),
            Node::RemoteTemp { index, vector } => {
                let holder = activation
                    .temps
                    .get(*vector as usize)
                    .cloned()
                    .unwrap_or(Object::Nil);
                read_ivar(&holder, *index as usize)
            }
            Node::LiteralConstant { index } => Ok(activation
                .method
                .literal(*index as usize)
                .unwrap_or(Object::Nil)),
            Node::LiteralVariable { index } => {
                let literal = activation
                    .method
                    .literal(*index as usize)
                    .unwrap_or(Object::Nil);
                association_value(&literal)
            }
            Node::Constant(constant) => Ok(constant_object(*constant)),
            Node::ActiveContext => {
                Ok(Object::Context(Rc::new(ContextSnapshot {
                    marker: activation.marker,
                    method: Rc::clone(&activation.method),
                    receiver: activation.receiver.clone(),
                })))
            }
            Node::NewArray { size, elements } => {
                let values = if elements.is_empty() {
                    vec![Object::Nil; *size as usize]
                } else {
                    let mut values = Vec::with_capacity(elements.len());
                    for element in elements {
                        values.push(self.eval(activation, element)?);
                    }
                    values
                };
                Ok(self.image.new_array(values))
            }
            Node::Closure { copied, body } => {
                let mut values = Vec::with_capacity(copied.len());
                for node in copied {
                    values.push(self.eval(activation, node)?);
                }
                Ok(Object::Block(Rc::new(BlockClosure {
                    body: Rc::clone(body),
                    method: Rc::clone(&activation.method),
                    receiver: activation.receiver.clone(),
                    copied: values,
                    home_marker: activation.home_marker,
                })))
            }
            Node::Send {
                receiver,
                selector,
                arguments,
                super_send,
                cache,
            } => {
                let receiver_value = self.eval(activation, receiver)?;
                let mut argument_values =
                    Vec::with_capacity(arguments.len());
                for argument in arguments {
                    argument_values.push(self.eval(activation, argument)?);
                }
                let selector_id =
                    self.resolve_selector(&activation.method, selector)?;
                if *super_send {
                    let method = Rc::clone(&activation.method);
                    self.send_super(
                        &method,
                        receiver_value,
                        selector_id,
                        argument_values,
                    )
                } else {
                    self.send(
                        receiver_value,
                        selector_id,
                        argument_values,
                        Some(cache),
                    )
                }
            }
            Node::Store { target, value } => {
                let value = self.eval(activation, value)?;
                self.store(activation, *target, value.clone())?;
                Ok(value)
            }
            Node::StoreAndPop { target, value } => {
                let value = self.eval(activation, value)?;
                self.store(activation, *target, value)?;
                Ok(Object::Nil)
            }
            Node::MethodReturn { value } => {
                let value = self.eval(activation, value)?;
                let home = activation.home_marker;
                if home != activation.marker && !self.marker_is_live(home) {
                    error!(
                        "non-local return into a dead context\n{}",
                        self.stack_dump()
                    );
                    return Err(
                        RuntimeError::NonLocalReturnFromDeadContext.into()
                    );
                }
                Err(Unwind::Return { home, value })
            }
            Node::BlockReturn { value } => {
                let value = self.eval(activation, value)?;
                Err(Unwind::Return {
                    home: activation.marker,
                    value,
                })
            }
            Node::If {
                condition,
                jump_on,
                then_statements,
                then_value,
                else_statements,
                else_value,
            } => {
                let condition = self.eval(activation, condition)?;
                let truth = expect_boolean(condition)?;
                let (statements, value) = if truth != *jump_on {
                    (then_statements, then_value)
                } else {
                    (else_statements, else_value)
                };
                for node in statements {
                    self.eval(activation, node)?;
                }
                match value {
                    Some(node) => self.eval(activation, node),
                    None => Ok(Object::Nil),
                }
            }
            Node::Loop {
                condition,
                jump_on,
                body,
            } => {
                loop {
                    let value = self.eval(activation, condition)?;
                    if expect_boolean(value)? == *jump_on {
                        break;
                    }
                    for node in body {
                        self.eval(activation, node)?;
                    }
                }
                Ok(Object::Nil)
            }
            Node::PrimitiveCall { index } => {
                warn!("primitive escape {index} in method body");
                Err(RuntimeError::PrimitiveFailed.into())
            }
            Node::UnknownBytecode { byte } => {
                Err(RuntimeError::UnknownBytecode { byte: *byte }.into())
            }
        }
    }

    fn resolve_selector(
        &mut self,
        method: &Rc<CompiledMethod>,
        selector: &SelectorRef,
    ) -> Result<SelectorId, Unwind> {
        match selector {
            SelectorRef::Special(index) => {
                Ok(self.image.special_selectors[*index as usize].0)
            }
            SelectorRef::Literal(index) => {
                match method.literal(*index as usize) {
                    Some(Object::Symbol(id)) => Ok(id),
                    Some(other) => Err(RuntimeError::WrongType {
                        expected: "symbol",
                        got: other,
                    }
                    .into()),
                    None => Err(RuntimeError::IndexOutOfBounds {
                        index: i64::from(*index),
                        size: method.literals.len(),
                    }
                    .into()),
                }
            }
        }
    }

    fn store(
        &mut self,
        activation: &mut Activation,
        target: StoreTarget,
        value: Object,
    ) -> Result<(), Unwind> {
        match target {
            StoreTarget::ReceiverVariable(index) => {
                write_ivar(&activation.receiver, index as usize, value)
            }
            StoreTarget::Temporary(index) => {
                let index = index as usize;
                if index >= activation.temps.len() {
                    activation.temps.resize(index + 1, Object::Nil);
                }
                activation.temps[index] = value;
                Ok(())
            }
            StoreTarget::LiteralVariable(index) => {
                let literal = activation
                    .method
                    .literal(index as usize)
                    .unwrap_or(Object::Nil);
                store_association_value(&literal, value)
            }
            StoreTarget::RemoteTemp { index, vector } => {
                let holder = activation
                    .temps
                    .get(vector as usize)
                    .cloned()
                    .unwrap_or(Object::Nil);
                write_ivar(&holder, index as usize, value)
            }
        }
    }

    pub fn stack_dump(&self) -> String {
        let mut out = String::new();
        for frame in self.frames.iter().rev() {
            let _ = writeln!(out, "  {}", self.describe_frame(frame));
        }
        out
    }

    fn describe_frame(&self, frame: &FrameInfo) -> String {
        let selector = match frame.method.selector {
            Some(id) => self.image.selectors.display(id),
            None => "<anonymous>".to_owned(),
        };
        let holder = frame
            .method
            .holder
            .borrow()
            .clone()
            .and_then(|weak| weak.upgrade())
            .map(|class| class.borrow().name())
            .unwrap_or_else(|| "?".to_owned());
        let prefix = if frame.is_block { "[] in " } else { "" };
        format!(
            "{prefix}{holder}>>{selector} receiver: {:?} args: {:?}",
            frame.receiver, frame.arguments
        )
    }
}

pub fn constant_object(constant: SpecialConstant) -> Object {
    match constant {
        SpecialConstant::True => Object::True,
        SpecialConstant::False => Object::False,
        SpecialConstant::Nil => Object::Nil,
        SpecialConstant::MinusOne => Object::SmallInt(-1),
        SpecialConstant::Zero => Object::SmallInt(0),
        SpecialConstant::One => Object::SmallInt(1),
        SpecialConstant::Two => Object::SmallInt(2),
    }
}

fn expect_boolean(value: Object) -> Result<bool, Unwind> {
    value.as_bool().ok_or_else(|| {
        RuntimeError::WrongType {
            expected: "boolean",
            got: value,
        }
        .into()
    })
}

fn read_ivar(object: &Object, index: usize) -> Result<Object, Unwind> {
    match object {
        Object::Pointers(pointers) => Ok(pointers
            .borrow()
            .slots
            .get(index)
            .cloned()
            .unwrap_or(Object::Nil)),
        other => Err(RuntimeError::WrongType {
            expected: "pointers object",
            got: other.clone(),
        }
        .into()),
    }
}

fn write_ivar(
    object: &Object,
    index: usize,
    value: Object,
) -> Result<(), Unwind> {
    match object {
        Object::Pointers(pointers) => {
            let mut pointers = pointers.borrow_mut();
            let size = pointers.slots.len();
            match pointers.slots.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(RuntimeError::IndexOutOfBounds {
                    index: index as i64,
                    size,
                }
                .into()),
            }
        }
        other => Err(RuntimeError::WrongType {
            expected: "pointers object",
            got: other.clone(),
        }
        .into()),
    }
}

fn association_value(literal: &Object) -> Result<Object, Unwind> {
    match literal {
        Object::Pointers(pointers) => Ok(pointers
            .borrow()
            .slots
            .get(1)
            .cloned()
            .unwrap_or(Object::Nil)),
        other => Err(RuntimeError::WrongType {
            expected: "association",
            got: other.clone(),
        }
        .into()),
    }
}

fn store_association_value(
    literal: &Object,
    value: Object,
) -> Result<(), Unwind> {
    write_ivar(literal, 1, value)
}

#[cfg(test)]
mod tests {
    use crate::harness::Harness;
    use crate::value::Object;

    #[test]
    fn loops_run_the_body_while_the_guard_holds() {
        let mut h = Harness::new();
        // t0 := 0. [t0 < 5] whileTrue: [t0 := t0 + 1]. ^ t0
        let method = h.method(
            0,
            1,
            vec![
                0x75, 0x68, 0x10, 0x20, 0xB2, 0x9D, 0x10, 0x76, 0xB0,
                0x68, 0xA3, 0xF6, 0x10, 0x7C,
            ],
            vec![Object::SmallInt(5)],
        );
        let value = h.run(method, Object::Nil, vec![]).value();
        assert!(matches!(value, Object::SmallInt(5)));
    }

    #[test]
    fn conditionals_pick_a_branch_from_the_receiver() {
        let mut h = Harness::new();
        // ^ self > 0 ifTrue: [1] ifFalse: [-1]
        let bytecode =
            vec![0x70, 0x75, 0xB3, 0x99, 0x76, 0x90, 0x74, 0x7C];
        let positive = h
            .run_bytes(bytecode.clone(), vec![], Object::SmallInt(3), vec![])
            .value();
        assert!(matches!(positive, Object::SmallInt(1)));
        let negative = h
            .run_bytes(bytecode, vec![], Object::SmallInt(-2), vec![])
            .value();
        assert!(matches!(negative, Object::SmallInt(-1)));
    }
}
