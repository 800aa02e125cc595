use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::bytecode::{SelectorRef, SpecialConstant, StoreTarget};
use crate::class::ClassObject;
use crate::method::CompiledMethod;

/// Folded method body: a statement list with control flow reconstructed
/// from the jump structure.
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub statements: Vec<Node>,
}

/// Body of an inline closure, folded the same way as a method body.
#[derive(Debug, Clone)]
pub struct BlockBody {
    pub num_args: u8,
    pub num_copied: u8,
    pub statements: Vec<Node>,
}

/// Per-send-site lookup cache. Valid while the receiver class is the same
/// object and its version token has not moved.
#[derive(Clone)]
pub struct SendCache {
    pub class: Weak<RefCell<ClassObject>>,
    pub version: u64,
    pub method: Rc<CompiledMethod>,
    pub is_dnu: bool,
}

impl fmt::Debug for SendCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache(v{}{})",
            self.version,
            if self.is_dnu { ", dnu" } else { "" }
        )
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Receiver,
    ReceiverVariable {
        index: u8,
    },
    Temporary {
        index: u8,
    },
    RemoteTemp {
        index: u8,
        vector: u8,
    },
    LiteralConstant {
        index: u8,
    },
    LiteralVariable {
        index: u8,
    },
    Constant(SpecialConstant),
    ActiveContext,
    /// `elements` is empty for the uninitialized form, which allocates
    /// `size` nil slots instead.
    NewArray {
        size: u8,
        elements: Vec<Node>,
    },
    Closure {
        copied: Vec<Node>,
        body: Rc<BlockBody>,
    },
    Send {
        receiver: Box<Node>,
        selector: SelectorRef,
        arguments: Vec<Node>,
        super_send: bool,
        cache: RefCell<Option<SendCache>>,
    },
    /// Store that leaves the value available as this node's result.
    Store {
        target: StoreTarget,
        value: Box<Node>,
    },
    StoreAndPop {
        target: StoreTarget,
        value: Box<Node>,
    },
    MethodReturn {
        value: Box<Node>,
    },
    BlockReturn {
        value: Box<Node>,
    },
    /// Reconstructed conditional. The branch runs when the condition
    /// differs from `jump_on`, mirroring the skip-over jump it came from.
    If {
        condition: Box<Node>,
        jump_on: bool,
        then_statements: Vec<Node>,
        then_value: Option<Box<Node>>,
        else_statements: Vec<Node>,
        else_value: Option<Box<Node>>,
    },
    /// Reconstructed pre-test loop. Repeats while the condition differs
    /// from `jump_on`.
    Loop {
        condition: Box<Node>,
        jump_on: bool,
        body: Vec<Node>,
    },
    /// Primitive escape encountered mid-body rather than in the header.
    PrimitiveCall {
        index: u16,
    },
    UnknownBytecode {
        byte: u8,
    },
}

impl Node {
    /// True when evaluating this node can produce a value for an enclosing
    /// expression, used when deciding whether a folded If is a value.
    pub fn is_value_producing(&self) -> bool {
        !matches!(
            self,
            Node::MethodReturn { .. }
                | Node::BlockReturn { .. }
                | Node::StoreAndPop { .. }
                | Node::Loop { .. }
                | Node::UnknownBytecode { .. }
        )
    }
}
