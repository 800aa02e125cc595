//! Image bootstrap: the kernel class graph with its metaclasses, the
//! interned special-selector table, primitive-backed kernel methods, and
//! constructors for the object shapes the runtime builds itself.

use std::rc::Rc;

use crate::bytecode::{SPECIAL_SELECTOR_ARG_COUNTS, SPECIAL_SELECTOR_NAMES};
use crate::class::{self, ClassRef, InstanceFormat};
use crate::interpreter::EXCEPTION_HANDLER_MARKER;
use crate::method::CompiledMethod;
use crate::primitives::EXTERNAL_CALL_INDEX;
use crate::selector::{arg_count, SelectorId, Selectors};
use crate::value::{new_ref, BytesObject, Object, PointersObject};

/// Selectors the machine itself sends or compares against.
pub struct WellKnown {
    pub does_not_understand: SelectorId,
}

/// The kernel classes, all reachable by name.
pub struct Classes {
    pub object: ClassRef,
    pub class: ClassRef,
    pub undefined_object: ClassRef,
    pub boolean: ClassRef,
    pub true_class: ClassRef,
    pub false_class: ClassRef,
    pub number: ClassRef,
    pub small_integer: ClassRef,
    pub large_integer: ClassRef,
    pub float: ClassRef,
    pub character: ClassRef,
    pub string: ClassRef,
    pub symbol: ClassRef,
    pub array: ClassRef,
    pub association: ClassRef,
    pub message: ClassRef,
    pub compiled_method: ClassRef,
    pub block_closure: ClassRef,
    pub context: ClassRef,
    pub system_dictionary: ClassRef,
}

impl Classes {
    /// Every kernel class, for tools that walk the whole set.
    pub fn all(&self) -> [&ClassRef; 20] {
        [
            &self.object,
            &self.class,
            &self.undefined_object,
            &self.boolean,
            &self.true_class,
            &self.false_class,
            &self.number,
            &self.small_integer,
            &self.large_integer,
            &self.float,
            &self.character,
            &self.string,
            &self.symbol,
            &self.array,
            &self.association,
            &self.message,
            &self.compiled_method,
            &self.block_closure,
            &self.context,
            &self.system_dictionary,
        ]
    }
}

pub struct Image {
    pub selectors: Selectors,
    /// The 32 selectors addressable directly from send bytecodes, paired
    /// with their argument counts.
    pub special_selectors: Vec<(SelectorId, u8)>,
    pub well_known: WellKnown,
    pub classes: Classes,
    /// The singleton the system-facing methods are installed on.
    pub system: Object,
}

impl Image {
    pub fn bootstrap() -> Self {
        let selectors = Selectors::new();
        let classes = build_classes();
        let special_selectors = SPECIAL_SELECTOR_NAMES
            .iter()
            .zip(SPECIAL_SELECTOR_ARG_COUNTS)
            .map(|(name, args)| (selectors.intern(name), args))
            .collect();
        let well_known = WellKnown {
            does_not_understand: selectors.intern("doesNotUnderstand:"),
        };
        let system = Object::Pointers(new_ref(PointersObject {
            class: Rc::clone(&classes.system_dictionary),
            slots: Vec::new(),
        }));
        let image = Self {
            selectors,
            special_selectors,
            well_known,
            classes,
            system,
        };
        image.install_kernel_methods();
        image
    }

    pub fn class_of(&self, object: &Object) -> ClassRef {
        let classes = &self.classes;
        match object {
            Object::Nil | Object::NoArg => {
                Rc::clone(&classes.undefined_object)
            }
            Object::True => Rc::clone(&classes.true_class),
            Object::False => Rc::clone(&classes.false_class),
            Object::SmallInt(_) => Rc::clone(&classes.small_integer),
            Object::LargeInt(_) => Rc::clone(&classes.large_integer),
            Object::Float(_) => Rc::clone(&classes.float),
            Object::Char(_) => Rc::clone(&classes.character),
            Object::Symbol(_) => Rc::clone(&classes.symbol),
            Object::Pointers(p) => Rc::clone(&p.borrow().class),
            Object::Bytes(b) => Rc::clone(&b.borrow().class),
            Object::Words(w) => Rc::clone(&w.borrow().class),
            Object::Method(_) => Rc::clone(&classes.compiled_method),
            Object::Block(_) => Rc::clone(&classes.block_closure),
            Object::Context(_) => Rc::clone(&classes.context),
            Object::Class(c) => c
                .borrow()
                .metaclass
                .clone()
                .unwrap_or_else(|| Rc::clone(&classes.class)),
        }
    }

    pub fn new_string(&self, text: &str) -> Object {
        Object::Bytes(new_ref(BytesObject {
            class: Rc::clone(&self.classes.string),
            bytes: text.as_bytes().to_vec(),
        }))
    }

    pub fn new_symbol(&self, name: &str) -> Object {
        Object::Symbol(self.selectors.intern(name))
    }

    pub fn new_array(&self, values: Vec<Object>) -> Object {
        Object::Pointers(new_ref(PointersObject {
            class: Rc::clone(&self.classes.array),
            slots: values,
        }))
    }

    pub fn new_association(&self, key: Object, value: Object) -> Object {
        Object::Pointers(new_ref(PointersObject {
            class: Rc::clone(&self.classes.association),
            slots: vec![key, value],
        }))
    }

    /// Reified message, as handed to `doesNotUnderstand:`.
    pub fn new_message(
        &self,
        selector: SelectorId,
        arguments: Vec<Object>,
    ) -> Object {
        let arguments = self.new_array(arguments);
        Object::Pointers(new_ref(PointersObject {
            class: Rc::clone(&self.classes.message),
            slots: vec![Object::Symbol(selector), arguments],
        }))
    }

    fn install_primitive(&self, class: &ClassRef, name: &str, index: u16) {
        let selector = self.selectors.intern(name);
        let args = arg_count(name);
        let method = Rc::new(CompiledMethod::new(
            Some(selector),
            args,
            args,
            Some(index),
            Vec::new(),
            Vec::new(),
        ));
        class::add_method(class, selector, method);
    }

    fn install_external(
        &self,
        class: &ClassRef,
        name: &str,
        module: &str,
        primitive_name: &str,
    ) {
        let selector = self.selectors.intern(name);
        let args = arg_count(name);
        let target = self.new_array(vec![
            self.new_string(module),
            self.new_string(primitive_name),
        ]);
        let method = Rc::new(CompiledMethod::new(
            Some(selector),
            args,
            args,
            Some(EXTERNAL_CALL_INDEX),
            Vec::new(),
            vec![target],
        ));
        class::add_method(class, selector, method);
    }

    fn install_kernel_methods(&self) {
        let classes = &self.classes;

        self.install_primitive(&classes.object, "==", 110);
        self.install_primitive(&classes.object, "class", 111);
        self.install_primitive(&classes.object, "identityHash", 75);
        self.install_primitive(&classes.object, "at:", 60);
        self.install_primitive(&classes.object, "at:put:", 61);
        self.install_primitive(&classes.object, "size", 62);
        self.install_primitive(&classes.object, "shallowCopy", 148);
        self.install_primitive(&classes.object, "instVarAt:", 73);
        self.install_primitive(&classes.object, "instVarAt:put:", 74);
        self.install_primitive(
            &classes.object,
            "replaceFrom:to:with:startingAt:",
            105,
        );
        self.install_primitive(&classes.object, "perform:", 83);
        self.install_primitive(&classes.object, "perform:with:", 83);
        self.install_primitive(&classes.object, "perform:with:with:", 83);
        self.install_primitive(&classes.object, "yourself", 256);
        self.install_external(
            &classes.object,
            "doesNotUnderstand:",
            "Kernel",
            "primitiveUnhandledMessage",
        );

        // Metaclass chains end at Class, so every class responds.
        self.install_primitive(&classes.class, "new", 70);
        self.install_primitive(&classes.class, "new:", 71);
        self.install_primitive(&classes.class, "basicNew", 70);
        self.install_primitive(&classes.class, "basicNew:", 71);

        let small_ops = kernel_arithmetic_selectors();
        for (offset, name) in small_ops.iter().enumerate() {
            self.install_primitive(
                &classes.small_integer,
                name,
                1 + offset as u16,
            );
            self.install_primitive(
                &classes.large_integer,
                name,
                21 + offset as u16,
            );
        }
        self.install_primitive(&classes.small_integer, "asFloat", 40);
        self.install_primitive(&classes.large_integer, "asFloat", 40);
        self.install_primitive(&classes.small_integer, "asCharacter", 170);

        let float_ops =
            ["+", "-", "<", ">", "<=", ">=", "=", "~=", "*", "/"];
        for (offset, name) in float_ops.iter().enumerate() {
            self.install_primitive(&classes.float, name, 41 + offset as u16);
        }
        self.install_primitive(&classes.float, "truncated", 51);

        self.install_primitive(&classes.string, "at:", 63);
        self.install_primitive(&classes.string, "at:put:", 64);
        self.install_primitive(&classes.compiled_method, "objectAt:", 68);

        if let Some(meta) = classes.character.borrow().metaclass.clone() {
            self.install_primitive(&meta, "value:", 170);
        }

        self.install_primitive(&classes.block_closure, "value", 201);
        self.install_primitive(&classes.block_closure, "value:", 202);
        self.install_primitive(&classes.block_closure, "value:value:", 203);
        self.install_primitive(
            &classes.block_closure,
            "value:value:value:",
            204,
        );
        self.install_primitive(
            &classes.block_closure,
            "value:value:value:value:",
            205,
        );
        self.install_primitive(
            &classes.block_closure,
            "valueWithArguments:",
            206,
        );
        self.install_handler_method();

        self.install_primitive(&classes.context, "nextHandlerContext", 197);

        let system = &classes.system_dictionary;
        self.install_primitive(system, "quit", 113);
        self.install_primitive(system, "quit:", 113);
        self.install_primitive(system, "getSystemAttribute:", 149);
        self.install_primitive(system, "yield", 167);
        self.install_primitive(system, "millisecondClockValue", 135);
        self.install_primitive(system, "utcMicrosecondClock", 240);
        self.install_external(
            system,
            "stdioHandles",
            "FilePlugin",
            "primitiveFileStdioHandles",
        );
        self.install_external(
            system,
            "fileOpen:writable:",
            "FilePlugin",
            "primitiveFileOpen",
        );
        self.install_external(
            system,
            "fileClose:",
            "FilePlugin",
            "primitiveFileClose",
        );
        self.install_external(
            system,
            "fileRead:into:startingAt:count:",
            "FilePlugin",
            "primitiveFileRead",
        );
        self.install_external(
            system,
            "fileWrite:from:startingAt:count:",
            "FilePlugin",
            "primitiveFileWrite",
        );
        self.install_external(
            system,
            "fileSize:",
            "FilePlugin",
            "primitiveFileSize",
        );
    }

    /// `on:do:` marks its frame as a handler and runs the protected
    /// block. The marker index performs nothing, so the body is the whole
    /// behavior: push the receiver, send `value`, return.
    fn install_handler_method(&self) {
        let selector = self.selectors.intern("on:do:");
        let method = Rc::new(CompiledMethod::new(
            Some(selector),
            2,
            2,
            Some(EXCEPTION_HANDLER_MARKER),
            vec![0x70, 0xC9, 0x7C],
            Vec::new(),
        ));
        class::add_method(&self.classes.block_closure, selector, method);
    }
}

fn attach_metaclass(class: &ClassRef, class_class: &ClassRef) {
    let super_meta = class
        .borrow()
        .superclass
        .as_ref()
        .and_then(|parent| parent.borrow().metaclass.clone());
    let meta = class::new_class(
        "",
        Some(super_meta.unwrap_or_else(|| Rc::clone(class_class))),
        InstanceFormat::Fixed,
        &[],
    );
    meta.borrow_mut().instance = Some(Rc::downgrade(class));
    class.borrow_mut().metaclass = Some(meta);
}

fn build_classes() -> Classes {
    use InstanceFormat::{Fixed, Variable, VariableBytes};

    let object = class::new_class("Object", None, Fixed, &[]);
    let class = class::new_class(
        "Class",
        Some(Rc::clone(&object)),
        Fixed,
        &[],
    );
    let subclass = |name: &str,
                    superclass: &ClassRef,
                    format: InstanceFormat,
                    ivars: &[&str]| {
        let new =
            class::new_class(name, Some(Rc::clone(superclass)), format, ivars);
        attach_metaclass(&new, &class);
        new
    };
    attach_metaclass(&object, &class);
    attach_metaclass(&class, &class);

    let undefined_object = subclass("UndefinedObject", &object, Fixed, &[]);
    let boolean = subclass("Boolean", &object, Fixed, &[]);
    let true_class = subclass("True", &boolean, Fixed, &[]);
    let false_class = subclass("False", &boolean, Fixed, &[]);
    let number = subclass("Number", &object, Fixed, &[]);
    let small_integer = subclass("SmallInteger", &number, Fixed, &[]);
    let large_integer = subclass("LargeInteger", &number, Fixed, &[]);
    let float = subclass("Float", &number, Fixed, &[]);
    let character = subclass("Character", &object, Fixed, &[]);
    let string = subclass("String", &object, VariableBytes, &[]);
    let symbol = subclass("Symbol", &string, VariableBytes, &[]);
    let array = subclass("Array", &object, Variable, &[]);
    let association =
        subclass("Association", &object, Fixed, &["key", "value"]);
    let message =
        subclass("Message", &object, Fixed, &["selector", "arguments"]);
    let compiled_method = subclass("CompiledMethod", &object, Fixed, &[]);
    let block_closure = subclass("BlockClosure", &object, Fixed, &[]);
    let context = subclass("MethodContext", &object, Fixed, &[]);
    let system_dictionary =
        subclass("SystemDictionary", &object, Fixed, &[]);

    Classes {
        object,
        class,
        undefined_object,
        boolean,
        true_class,
        false_class,
        number,
        small_integer,
        large_integer,
        float,
        character,
        string,
        symbol,
        array,
        association,
        message,
        compiled_method,
        block_closure,
        context,
        system_dictionary,
    }
}

fn kernel_arithmetic_selectors() -> [&'static str; 17] {
    [
        "+",
        "-",
        "<",
        ">",
        "<=",
        ">=",
        "=",
        "~=",
        "*",
        "/",
        "\\\\",
        "//",
        "quo:",
        "bitAnd:",
        "bitOr:",
        "bitXor:",
        "bitShift:",
    ]
}
