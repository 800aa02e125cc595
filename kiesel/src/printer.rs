//! Pretty-printing of decompiled methods for debuggers and source maps.
//!
//! The printed text is stable for a given method: the same bytecode always
//! renders to the same string, so offsets recorded by one consumer remain
//! valid for another. Span lookup is best-effort and answers `None` for
//! nodes the printer never visited.

use std::rc::Rc;

use crate::ast::{BlockBody, MethodBody, Node};
use crate::bytecode::{SelectorRef, StoreTarget, SPECIAL_SELECTOR_NAMES};
use crate::method::CompiledMethod;
use crate::selector::Selectors;
use crate::value::Object;

/// Byte range of a node within the printed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

/// A rendered method together with the span of every node the printer
/// visited. Holds the folded body alive so node addresses stay meaningful.
pub struct Printed {
    pub text: String,
    body: Rc<MethodBody>,
    spans: Vec<(*const Node, Span)>,
}

impl Printed {
    pub fn body(&self) -> &Rc<MethodBody> {
        &self.body
    }

    /// Span of `node` in the printed text. The keys are compared as
    /// addresses, never dereferenced, so a node from a different method
    /// simply answers `None`.
    pub fn span_of(&self, node: &Node) -> Option<Span> {
        let key = node as *const Node;
        self.spans
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, span)| *span)
    }
}

/// Render a whole method: header, temp declarations, primitive marker and
/// the folded statement list.
pub fn print_method(
    selectors: &Selectors,
    method: &CompiledMethod,
) -> Printed {
    let body = method.body();
    let mut printer = Printer {
        selectors,
        method,
        out: String::new(),
        spans: Vec::new(),
    };
    printer.header();
    if method.num_temps > method.num_args {
        printer.out.push_str("    | ");
        for index in method.num_args..method.num_temps {
            printer.out.push_str(&format!("t{index} "));
        }
        printer.out.push_str("|\n");
    }
    if let Some(index) = method.primitive {
        printer.out.push_str(&format!("    <primitive: {index}>\n"));
    }
    for statement in &body.statements {
        printer.out.push_str("    ");
        printer.node(statement);
        printer.out.push_str(".\n");
    }
    Printed {
        text: printer.out,
        body,
        spans: printer.spans,
    }
}

/// Render a single node without header context, for log lines and error
/// reports.
pub fn print_node(
    selectors: &Selectors,
    method: &CompiledMethod,
    node: &Node,
) -> String {
    let mut printer = Printer {
        selectors,
        method,
        out: String::new(),
        spans: Vec::new(),
    };
    printer.node(node);
    printer.out
}

struct Printer<'a> {
    selectors: &'a Selectors,
    method: &'a CompiledMethod,
    out: String,
    spans: Vec<(*const Node, Span)>,
}

impl Printer<'_> {
    fn header(&mut self) {
        let name = match self.method.selector {
            Some(id) => self.selectors.display(id),
            None => "doIt".to_owned(),
        };
        if name.ends_with(':') {
            for (index, part) in name.split_terminator(':').enumerate() {
                if index > 0 {
                    self.out.push(' ');
                }
                self.out.push_str(&format!("{part}: t{index}"));
            }
        } else if self.method.num_args == 1 {
            self.out.push_str(&format!("{name} t0"));
        } else {
            self.out.push_str(&name);
        }
        self.out.push('\n');
    }

    fn node(&mut self, node: &Node) {
        let start = self.out.len();
        match node {
            Node::Receiver => self.out.push_str("self"),
            Node::ReceiverVariable { index } => {
                self.out.push_str(&format!("ivar{index}"));
            }
            Node::Temporary { index } => {
                self.out.push_str(&format!("t{index}"));
            }
            Node::RemoteTemp { index, vector } => {
                self.out.push_str(&format!("t{vector}[{index}]"));
            }
            Node::LiteralConstant { index } => self.literal(*index),
            Node::LiteralVariable { index } => self.global(*index),
            Node::Constant(value) => {
                self.out.push_str(&value.to_string());
            }
            Node::ActiveContext => self.out.push_str("thisContext"),
            Node::NewArray { size, elements } => {
                if elements.is_empty() {
                    self.out.push_str(&format!("(Array new: {size})"));
                } else {
                    self.out.push('{');
                    for (index, element) in elements.iter().enumerate() {
                        if index > 0 {
                            self.out.push_str(". ");
                        }
                        self.node(element);
                    }
                    self.out.push('}');
                }
            }
            Node::Closure { body, .. } => self.block(body),
            Node::Send {
                receiver,
                selector,
                arguments,
                super_send,
                ..
            } => {
                self.send(receiver, selector, arguments, *super_send);
            }
            Node::Store { target, value }
            | Node::StoreAndPop { target, value } => {
                self.store_target(target);
                self.out.push_str(" := ");
                self.node(value);
            }
            Node::MethodReturn { value } => {
                self.out.push_str("^ ");
                self.node(value);
            }
            Node::BlockReturn { value } => self.node(value),
            Node::If {
                condition,
                jump_on,
                then_statements,
                then_value,
                else_statements,
                else_value,
            } => {
                self.nested(condition);
                let has_else =
                    !else_statements.is_empty() || else_value.is_some();
                let (first, second) = if *jump_on {
                    ("ifFalse:", "ifTrue:")
                } else {
                    ("ifTrue:", "ifFalse:")
                };
                self.out.push_str(&format!(" {first} "));
                self.branch(then_statements, then_value.as_deref());
                if has_else {
                    self.out.push_str(&format!(" {second} "));
                    self.branch(else_statements, else_value.as_deref());
                }
            }
            Node::Loop {
                condition,
                jump_on,
                body,
            } => {
                self.out.push('[');
                self.node(condition);
                let selector =
                    if *jump_on { "whileFalse:" } else { "whileTrue:" };
                self.out.push_str(&format!("] {selector} "));
                self.branch(body, None);
            }
            Node::PrimitiveCall { index } => {
                self.out.push_str(&format!("<primitive: {index}>"));
            }
            Node::UnknownBytecode { byte } => {
                self.out.push_str(&format!("<unknown: 16r{byte:02X}>"));
            }
        }
        let span = Span {
            offset: start,
            len: self.out.len() - start,
        };
        self.spans.push((node as *const Node, span));
    }

    /// Parenthesize anything that would otherwise bind ambiguously when
    /// used as a receiver or argument.
    fn nested(&mut self, node: &Node) {
        let needs_parens = match node {
            Node::Send { arguments, .. } => !arguments.is_empty(),
            Node::Store { .. }
            | Node::If { .. }
            | Node::Loop { .. } => true,
            _ => false,
        };
        if needs_parens {
            self.out.push('(');
            self.node(node);
            self.out.push(')');
        } else {
            self.node(node);
        }
    }

    fn send(
        &mut self,
        receiver: &Node,
        selector: &SelectorRef,
        arguments: &[Node],
        super_send: bool,
    ) {
        if super_send {
            self.out.push_str("super");
            let span = Span {
                offset: self.out.len() - 5,
                len: 5,
            };
            self.spans.push((receiver as *const Node, span));
        } else {
            self.nested(receiver);
        }
        let name = self.selector_name(selector);
        if name.ends_with(':') {
            for (index, part) in
                name.split_terminator(':').enumerate()
            {
                self.out.push_str(&format!(" {part}: "));
                match arguments.get(index) {
                    Some(argument) => self.nested(argument),
                    None => self.out.push_str("<missing>"),
                }
            }
        } else if arguments.len() == 1 {
            self.out.push_str(&format!(" {name} "));
            self.nested(&arguments[0]);
        } else {
            self.out.push_str(&format!(" {name}"));
        }
    }

    fn block(&mut self, body: &BlockBody) {
        self.out.push('[');
        if body.num_args > 0 {
            for index in 0..body.num_args {
                self.out.push_str(&format!(":t{index} "));
            }
            self.out.push_str("| ");
        }
        for (index, statement) in body.statements.iter().enumerate() {
            if index > 0 {
                self.out.push_str(". ");
            }
            self.node(statement);
        }
        self.out.push(']');
    }

    fn branch(&mut self, statements: &[Node], value: Option<&Node>) {
        self.out.push('[');
        let mut first = true;
        for statement in statements {
            if !first {
                self.out.push_str(". ");
            }
            self.node(statement);
            first = false;
        }
        if let Some(value) = value {
            if !first {
                self.out.push_str(". ");
            }
            self.node(value);
        }
        self.out.push(']');
    }

    fn store_target(&mut self, target: &StoreTarget) {
        match target {
            StoreTarget::ReceiverVariable(index) => {
                self.out.push_str(&format!("ivar{index}"));
            }
            StoreTarget::Temporary(index) => {
                self.out.push_str(&format!("t{index}"));
            }
            StoreTarget::LiteralVariable(index) => self.global(*index),
            StoreTarget::RemoteTemp { index, vector } => {
                self.out.push_str(&format!("t{vector}[{index}]"));
            }
        }
    }

    fn selector_name(&self, selector: &SelectorRef) -> String {
        match selector {
            SelectorRef::Special(index) => {
                SPECIAL_SELECTOR_NAMES[*index as usize].to_owned()
            }
            SelectorRef::Literal(index) => {
                match self.method.literal(*index as usize) {
                    Some(Object::Symbol(id)) => self.selectors.display(id),
                    _ => format!("<literal {index}>"),
                }
            }
        }
    }

    fn literal(&mut self, index: u8) {
        let text = match self.method.literal(index as usize) {
            Some(Object::Symbol(id)) => {
                format!("#{}", self.selectors.display(id))
            }
            Some(other) => format!("{other:?}"),
            None => format!("<literal {index}>"),
        };
        self.out.push_str(&text);
    }

    /// Literal-variable slots hold associations; the printed name is the
    /// association key when one is readable.
    fn global(&mut self, index: u8) {
        let name = match self.method.literal(index as usize) {
            Some(Object::Pointers(binding)) => binding
                .borrow()
                .slots
                .first()
                .and_then(Object::as_byte_string),
            _ => None,
        };
        match name {
            Some(name) => self.out.push_str(&name),
            None => self.out.push_str(&format!("global{index}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method_returning_self_plus_one(
        selectors: &Selectors,
    ) -> CompiledMethod {
        let selector = selectors.intern("increment");
        CompiledMethod::new(
            Some(selector),
            0,
            0,
            None,
            vec![0x70, 0x76, 0xB0, 0x7C],
            vec![],
        )
    }

    #[test]
    fn binary_sends_read_infix() {
        let selectors = Selectors::new();
        let method = method_returning_self_plus_one(&selectors);
        let printed = print_method(&selectors, &method);
        assert_eq!(printed.text, "increment\n    ^ self + 1.\n");
    }

    #[test]
    fn spans_cover_the_printed_node() {
        let selectors = Selectors::new();
        let method = method_returning_self_plus_one(&selectors);
        let printed = print_method(&selectors, &method);
        let body = Rc::clone(printed.body());
        let Node::MethodReturn { value } = &body.statements[0] else {
            panic!("expected a return");
        };
        let span = printed.span_of(value).unwrap();
        assert_eq!(
            &printed.text[span.offset..span.offset + span.len],
            "self + 1"
        );
    }

    #[test]
    fn foreign_nodes_have_no_span() {
        let selectors = Selectors::new();
        let method = method_returning_self_plus_one(&selectors);
        let printed = print_method(&selectors, &method);
        let stray = Node::Receiver;
        assert!(printed.span_of(&stray).is_none());
    }

    #[test]
    fn keyword_headers_interleave_arguments() {
        let selectors = Selectors::new();
        let selector = selectors.intern("at:put:");
        let method = CompiledMethod::new(
            Some(selector),
            2,
            3,
            None,
            vec![0x10, 0x7C],
            vec![],
        );
        let printed = print_method(&selectors, &method);
        assert!(printed.text.starts_with("at: t0 put: t1\n"));
        assert!(printed.text.contains("| t2 |"));
    }

    #[test]
    fn primitive_methods_carry_the_marker() {
        let selectors = Selectors::new();
        let selector = selectors.intern("size");
        let method = CompiledMethod::new(
            Some(selector),
            0,
            0,
            Some(62),
            vec![0x70, 0x7C],
            vec![],
        );
        let printed = print_method(&selectors, &method);
        assert!(printed.text.contains("<primitive: 62>"));
    }
}
