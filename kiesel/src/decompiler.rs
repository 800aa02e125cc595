//! Rebuilds statement lists, conditionals and pre-test loops from the flat
//! jump structure of method bytecode.

use std::rc::Rc;

use log::debug;

use crate::ast::{BlockBody, MethodBody, Node};
use crate::bytecode::{
    decode_at, BytecodeDecoder, Instruction, SpecialConstant,
};

#[derive(Clone)]
struct Slot {
    instruction: Instruction,
    pc: usize,
}

/// Byte-indexed instruction sequence. Every instruction occupies the slot
/// of its last encoded byte, so a branch ending at byte `n` has its final
/// instruction at slot `n - 1` regardless of encoding length.
struct Sequence {
    slots: Vec<Option<Slot>>,
}

impl Sequence {
    fn build(bytes: &[u8]) -> Self {
        let mut slots = vec![None; bytes.len()];
        for (pc, instruction, len) in BytecodeDecoder::new(bytes) {
            slots[pc + len - 1] = Some(Slot { instruction, pc });
        }
        Self { slots }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

pub fn decompile(bytes: &[u8], primitive: Option<u16>) -> MethodBody {
    let mut sequence = Sequence::build(bytes);

    // A leading primitive escape repeats the header; drop it so the body
    // is pure fallback code.
    if primitive.is_some() && !bytes.is_empty() {
        let (first, len) = decode_at(bytes, 0);
        if matches!(first, Instruction::CallPrimitive { .. }) {
            sequence.slots[len - 1] = None;
        }
    }

    let mut stack = Vec::new();
    let end = sequence.len();
    let mut statements = fold_slice(&mut sequence, 0, end, &mut stack);
    // Values still on the stack at the end were produced but never
    // consumed; keep them as trailing statements.
    statements.append(&mut stack);
    MethodBody { statements }
}

fn pop_or_nil(stack: &mut Vec<Node>) -> Node {
    stack
        .pop()
        .unwrap_or(Node::Constant(SpecialConstant::Nil))
}

/// Fold the instructions in `[start, end)` into a statement list, using
/// `stack` for pending expression values. Consumed slots are cleared so
/// enclosing folds skip them.
fn fold_slice(
    sequence: &mut Sequence,
    start: usize,
    end: usize,
    stack: &mut Vec<Node>,
) -> Vec<Node> {
    let mut statements = Vec::new();
    let end = end.min(sequence.len());
    let mut index = start;
    while index < end {
        let Some(slot) = sequence.slots[index].clone() else {
            index += 1;
            continue;
        };
        let size = statements.len();
        interpret(sequence, index, &slot, stack, &mut statements);
        if !stack.is_empty() && statements.len() > size {
            // A statement was emitted while a value was still pending
            // beneath it. The value was produced first, so it belongs
            // before the statement.
            let pending = pop_or_nil(stack);
            statements.insert(size, pending);
        }
        sequence.slots[index] = None;
        index += 1;
    }
    statements
}

fn interpret(
    sequence: &mut Sequence,
    index: usize,
    slot: &Slot,
    stack: &mut Vec<Node>,
    statements: &mut Vec<Node>,
) {
    match slot.instruction {
        Instruction::PushReceiverVariable { index } => {
            stack.push(Node::ReceiverVariable { index });
        }
        Instruction::PushTemporary { index } => {
            stack.push(Node::Temporary { index });
        }
        Instruction::PushLiteralConstant { index } => {
            stack.push(Node::LiteralConstant { index });
        }
        Instruction::PushLiteralVariable { index } => {
            stack.push(Node::LiteralVariable { index });
        }
        Instruction::PushReceiver => stack.push(Node::Receiver),
        Instruction::PushConstant { value } => {
            stack.push(Node::Constant(value));
        }
        Instruction::PushActiveContext => stack.push(Node::ActiveContext),
        Instruction::PushNewArray { size, pop_elements } => {
            let elements = if pop_elements {
                let split = stack.len().saturating_sub(size as usize);
                stack.split_off(split)
            } else {
                Vec::new()
            };
            stack.push(Node::NewArray { size, elements });
        }
        Instruction::PushRemoteTemp { index, vector } => {
            stack.push(Node::RemoteTemp { index, vector });
        }
        Instruction::PushClosure {
            num_args,
            num_copied,
            block_size,
        } => {
            let split = stack.len().saturating_sub(num_copied as usize);
            let copied = stack.split_off(split);
            let after = index + 1;
            let block_end = after + block_size as usize;
            let mut block_stack = Vec::new();
            let mut block_statements =
                fold_slice(sequence, after, block_end, &mut block_stack);
            block_statements.append(&mut block_stack);
            stack.push(Node::Closure {
                copied,
                body: Rc::new(BlockBody {
                    num_args,
                    num_copied,
                    statements: block_statements,
                }),
            });
        }
        Instruction::Store { target } => {
            let value = Box::new(pop_or_nil(stack));
            stack.push(Node::Store { target, value });
        }
        Instruction::StoreAndPop { target } => {
            let value = Box::new(pop_or_nil(stack));
            statements.push(Node::StoreAndPop { target, value });
        }
        Instruction::ReturnReceiver => {
            statements.push(Node::MethodReturn {
                value: Box::new(Node::Receiver),
            });
        }
        Instruction::ReturnConstant { value } => {
            statements.push(Node::MethodReturn {
                value: Box::new(Node::Constant(value)),
            });
        }
        Instruction::ReturnTop => {
            statements.push(Node::MethodReturn {
                value: Box::new(pop_or_nil(stack)),
            });
        }
        Instruction::BlockReturnTop => {
            statements.push(Node::BlockReturn {
                value: Box::new(pop_or_nil(stack)),
            });
        }
        Instruction::Pop => {
            let value = pop_or_nil(stack);
            statements.push(value);
        }
        Instruction::Dup => {
            let top = stack
                .last()
                .cloned()
                .unwrap_or(Node::Constant(SpecialConstant::Nil));
            stack.push(top);
        }
        Instruction::CallPrimitive { index } => {
            statements.push(Node::PrimitiveCall { index });
        }
        Instruction::Jump { offset } => {
            // Back jumps belong to loops and were consumed when their
            // conditional was folded; anything left over has no
            // structured counterpart.
            debug!("unconsumed jump {offset} at {}", slot.pc);
        }
        Instruction::JumpIfTrue { offset } => {
            fold_conditional(sequence, index, offset, true, stack, statements);
        }
        Instruction::JumpIfFalse { offset } => {
            fold_conditional(
                sequence, index, offset, false, stack, statements,
            );
        }
        Instruction::Send {
            selector,
            num_args,
            super_send,
        } => {
            let split = stack.len().saturating_sub(num_args as usize);
            let arguments = stack.split_off(split);
            let receiver = Box::new(pop_or_nil(stack));
            stack.push(Node::Send {
                receiver,
                selector,
                arguments,
                super_send,
                cache: std::cell::RefCell::new(None),
            });
        }
        Instruction::Unknown { byte } => {
            statements.push(Node::UnknownBytecode { byte });
        }
    }
}

/// Fold a conditional jump: the bytes it skips are its branch. A trailing
/// back jump makes it the condition of a pre-test loop, a trailing forward
/// jump introduces an else branch.
fn fold_conditional(
    sequence: &mut Sequence,
    index: usize,
    offset: i32,
    jump_on: bool,
    stack: &mut Vec<Node>,
    statements: &mut Vec<Node>,
) {
    let condition = Box::new(pop_or_nil(stack));
    let after = index + 1;
    if offset <= 0 {
        debug!("conditional jump with non-forward offset {offset}");
        statements.push(Node::If {
            condition,
            jump_on,
            then_statements: Vec::new(),
            then_value: None,
            else_statements: Vec::new(),
            else_value: None,
        });
        return;
    }
    let branch_end = (after + offset as usize).min(sequence.len());

    let mut trailing = None;
    if branch_end > after {
        if let Some(slot) = &sequence.slots[branch_end - 1] {
            if let Instruction::Jump { offset } = slot.instruction {
                trailing = Some(offset);
                sequence.slots[branch_end - 1] = None;
            }
        }
    }

    match trailing {
        Some(out) if out < 0 => {
            // The branch is a loop body whose back jump re-runs the
            // condition.
            let mut loop_stack = Vec::new();
            let body =
                fold_slice(sequence, after, branch_end, &mut loop_stack);
            statements.push(Node::Loop {
                condition,
                jump_on,
                body,
            });
        }
        Some(out) if out > 0 => {
            let else_end = (branch_end + out as usize).min(sequence.len());
            let mut sub = Vec::new();
            let then_statements =
                fold_slice(sequence, after, branch_end, &mut sub);
            let then_value = sub.pop().map(Box::new);
            let else_statements =
                fold_slice(sequence, branch_end, else_end, &mut sub);
            let else_value = sub.pop().map(Box::new);
            push_if(
                Node::If {
                    condition,
                    jump_on,
                    then_statements,
                    then_value,
                    else_statements,
                    else_value,
                },
                stack,
                statements,
            );
        }
        _ => {
            let mut sub = Vec::new();
            let then_statements =
                fold_slice(sequence, after, branch_end, &mut sub);
            let then_value = sub.pop().map(Box::new);
            push_if(
                Node::If {
                    condition,
                    jump_on,
                    then_statements,
                    then_value,
                    else_statements: Vec::new(),
                    else_value: None,
                },
                stack,
                statements,
            );
        }
    }
}

/// A conditional that yields a value in either branch is an expression,
/// otherwise it is a statement.
fn push_if(node: Node, stack: &mut Vec<Node>, statements: &mut Vec<Node>) {
    let Node::If {
        ref then_value,
        ref else_value,
        ..
    } = node
    else {
        unreachable!()
    };
    if then_value.is_some() || else_value.is_some() {
        stack.push(node);
    } else {
        statements.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_method_folds_to_statements() {
        let body = decompile(&[0x70, 0x7C], None);
        assert_eq!(body.statements.len(), 1);
        assert!(matches!(
            &body.statements[0],
            Node::MethodReturn { value } if matches!(**value, Node::Receiver)
        ));
    }

    #[test]
    fn leading_primitive_escape_is_dropped() {
        let body = decompile(&[0x8B, 0x75, 0x00, 0x70, 0x7C], Some(117));
        assert_eq!(body.statements.len(), 1);
        assert!(matches!(body.statements[0], Node::MethodReturn { .. }));

        // Without a primitive header the escape stays visible.
        let body = decompile(&[0x8B, 0x75, 0x00, 0x78], None);
        assert!(matches!(
            body.statements[0],
            Node::PrimitiveCall { index: 117 }
        ));
    }

    #[test]
    fn forward_jump_with_tail_jump_folds_to_if_else_value() {
        // temp0 < lit0 ifTrue: [1] ifFalse: [2], returned
        let bytes = [0x10, 0x20, 0xB2, 0x99, 0x76, 0x90, 0x77, 0x7C];
        let body = decompile(&bytes, None);
        assert_eq!(body.statements.len(), 1);
        let Node::MethodReturn { value } = &body.statements[0] else {
            panic!("expected a return, got {:?}", body.statements[0]);
        };
        let Node::If {
            condition,
            jump_on,
            then_statements,
            then_value,
            else_statements,
            else_value,
        } = &**value
        else {
            panic!("expected an if, got {value:?}");
        };
        assert!(!jump_on);
        assert!(matches!(**condition, Node::Send { .. }));
        assert!(then_statements.is_empty());
        assert!(else_statements.is_empty());
        assert!(matches!(
            then_value.as_deref(),
            Some(Node::Constant(SpecialConstant::One))
        ));
        assert!(matches!(
            else_value.as_deref(),
            Some(Node::Constant(SpecialConstant::Two))
        ));
    }

    #[test]
    fn branch_without_value_folds_to_if_statement() {
        // temp0 ifTrue: [self], then return self
        let bytes = [0x10, 0x99, 0x70, 0x87, 0x78];
        let body = decompile(&bytes, None);
        assert_eq!(body.statements.len(), 2);
        let Node::If {
            then_statements,
            then_value,
            else_statements,
            ..
        } = &body.statements[0]
        else {
            panic!("expected an if statement");
        };
        assert_eq!(then_statements.len(), 1);
        assert!(then_value.is_none());
        assert!(else_statements.is_empty());
        assert!(matches!(body.statements[1], Node::MethodReturn { .. }));
    }

    #[test]
    fn backward_tail_jump_folds_to_loop() {
        // temp0 := 0. [temp0 < lit0] whileTrue: [temp0 := temp0 + 1].
        // return temp0
        let bytes = [
            0x75, 0x68, 0x10, 0x20, 0xB2, 0x9D, 0x10, 0x76, 0xB0, 0x68,
            0xA3, 0xF6, 0x10, 0x7C,
        ];
        let body = decompile(&bytes, None);
        assert_eq!(body.statements.len(), 3);
        assert!(matches!(body.statements[0], Node::StoreAndPop { .. }));
        let Node::Loop {
            condition,
            jump_on,
            body: loop_body,
        } = &body.statements[1]
        else {
            panic!("expected a loop, got {:?}", body.statements[1]);
        };
        assert!(!jump_on);
        assert!(matches!(**condition, Node::Send { .. }));
        assert_eq!(loop_body.len(), 1);
        assert!(matches!(loop_body[0], Node::StoreAndPop { .. }));
        assert!(matches!(body.statements[2], Node::MethodReturn { .. }));
    }

    #[test]
    fn closure_body_is_folded_inline() {
        // [lit0] value, returned
        let bytes = [0x8F, 0x00, 0x00, 0x02, 0x20, 0x7C, 0xC9, 0x7C];
        let body = decompile(&bytes, None);
        assert_eq!(body.statements.len(), 1);
        let Node::MethodReturn { value } = &body.statements[0] else {
            panic!("expected a return");
        };
        let Node::Send { receiver, .. } = &**value else {
            panic!("expected a send of value");
        };
        let Node::Closure { copied, body } = &**receiver else {
            panic!("expected a closure receiver, got {receiver:?}");
        };
        assert!(copied.is_empty());
        assert_eq!(body.num_args, 0);
        assert_eq!(body.statements.len(), 1);
        assert!(matches!(body.statements[0], Node::MethodReturn { .. }));
    }

    #[test]
    fn closure_captures_copied_values() {
        // push temp0, closure copying it, send value, return
        let bytes = [0x10, 0x8F, 0x10, 0x00, 0x02, 0x10, 0x7D, 0xC9, 0x7C];
        let body = decompile(&bytes, None);
        let Node::MethodReturn { value } = &body.statements[0] else {
            panic!("expected a return");
        };
        let Node::Send { receiver, .. } = &**value else {
            panic!("expected a send");
        };
        let Node::Closure { copied, body } = &**receiver else {
            panic!("expected a closure");
        };
        assert_eq!(copied.len(), 1);
        assert!(matches!(copied[0], Node::Temporary { index: 0 }));
        assert_eq!(body.num_copied, 1);
        assert!(matches!(body.statements[0], Node::BlockReturn { .. }));
    }

    #[test]
    fn popped_sends_become_statements() {
        // self foo (lit0, 0 args), popped; return self
        let bytes = [0x70, 0xD0, 0x87, 0x78];
        let body = decompile(&bytes, None);
        assert_eq!(body.statements.len(), 2);
        assert!(matches!(body.statements[0], Node::Send { .. }));
        assert!(matches!(body.statements[1], Node::MethodReturn { .. }));
    }

    #[test]
    fn unknown_bytes_survive_as_leaves() {
        let body = decompile(&[0x7E, 0x78], None);
        assert!(matches!(
            body.statements[0],
            Node::UnknownBytecode { byte: 0x7E }
        ));
    }

    #[test]
    fn unterminated_method_keeps_pending_values() {
        let body = decompile(&[0x70, 0x20], None);
        assert_eq!(body.statements.len(), 2);
        assert!(matches!(body.statements[0], Node::Receiver));
        assert!(matches!(
            body.statements[1],
            Node::LiteralConstant { index: 0 }
        ));
    }
}
