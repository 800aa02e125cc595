//! A bytecode virtual machine for a Smalltalk-style object system:
//! Squeak-V3 instruction decoding, a decompiler that folds bytecode into
//! an executable AST, an AST-walking interpreter with polymorphic send
//! caches, a layered numeric tower, and a primitive table covering
//! arithmetic, storage, block evaluation, system and file access.

pub mod ast;
pub mod bytecode;
pub mod class;
pub mod decompiler;
pub mod harness;
pub mod image;
pub mod interpreter;
pub mod method;
pub mod numeric;
pub mod primitives;
pub mod printer;
pub mod selector;
pub mod value;

pub use harness::Harness;
pub use image::Image;
pub use interpreter::{Machine, RuntimeError, Unwind};
pub use method::CompiledMethod;
pub use value::Object;
