use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::method::CompiledMethod;
use crate::selector::SelectorId;

pub type ClassRef = Rc<RefCell<ClassObject>>;
pub type WeakClassRef = Weak<RefCell<ClassObject>>;

/// Storage layout of instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceFormat {
    /// Named slots only.
    Fixed,
    /// Named slots followed by an indexable pointer part.
    Variable,
    /// Indexable byte part, no named slots of its own.
    VariableBytes,
    /// Indexable 32-bit word part.
    VariableWords,
}

#[derive(Default)]
pub struct MethodDictionary {
    methods: HashMap<SelectorId, Rc<CompiledMethod>>,
}

impl MethodDictionary {
    pub fn get(&self, selector: SelectorId) -> Option<Rc<CompiledMethod>> {
        self.methods.get(&selector).cloned()
    }

    pub fn insert(
        &mut self,
        selector: SelectorId,
        method: Rc<CompiledMethod>,
    ) {
        self.methods.insert(selector, method);
    }

    pub fn remove(&mut self, selector: SelectorId) -> bool {
        self.methods.remove(&selector).is_some()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&SelectorId, &Rc<CompiledMethod>)> {
        self.methods.iter()
    }
}

pub struct ClassObject {
    name: String,
    pub superclass: Option<ClassRef>,
    pub methods: MethodDictionary,
    pub ivar_names: Vec<String>,
    pub format: InstanceFormat,
    /// Class side of this class, if one was built.
    pub metaclass: Option<ClassRef>,
    /// For metaclasses, the singleton class they describe.
    pub instance: Option<WeakClassRef>,
    subclasses: Vec<WeakClassRef>,
    version: u64,
}

impl ClassObject {
    fn new(
        name: &str,
        superclass: Option<ClassRef>,
        format: InstanceFormat,
        ivar_names: &[&str],
    ) -> Self {
        Self {
            name: name.to_owned(),
            superclass,
            methods: MethodDictionary::default(),
            ivar_names: ivar_names.iter().map(|s| (*s).to_owned()).collect(),
            format,
            metaclass: None,
            instance: None,
            subclasses: Vec::new(),
            version: 0,
        }
    }

    /// Display name. Metaclasses have no name slot of their own and derive
    /// theirs from the singleton class they describe.
    pub fn name(&self) -> String {
        if let Some(instance) = &self.instance {
            if let Some(class) = instance.upgrade() {
                return format!("Metaclass ({})", class.borrow().basic_name());
            }
        }
        self.name.clone()
    }

    pub fn basic_name(&self) -> String {
        self.name.clone()
    }

    /// Monotonic token bumped whenever lookup results through this class may
    /// have changed. Send caches key on it.
    pub fn version(&self) -> u64 {
        self.version
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn is_variable(&self) -> bool {
        !matches!(self.format, InstanceFormat::Fixed)
    }
}

pub fn new_class(
    name: &str,
    superclass: Option<ClassRef>,
    format: InstanceFormat,
    ivar_names: &[&str],
) -> ClassRef {
    let class = Rc::new(RefCell::new(ClassObject::new(
        name,
        superclass.clone(),
        format,
        ivar_names,
    )));
    if let Some(parent) = superclass {
        attach_subclass(&parent, &class);
    }
    class
}

fn attach_subclass(parent: &ClassRef, child: &ClassRef) {
    parent.borrow_mut().subclasses.push(Rc::downgrade(child));
}

fn detach_subclass(parent: &ClassRef, child: &ClassRef) {
    parent.borrow_mut().subclasses.retain(|weak| {
        weak.upgrade()
            .map(|c| !Rc::ptr_eq(&c, child))
            .unwrap_or(false)
    });
}

/// Walk the superclass chain for `selector`. Returns the method together
/// with the class that holds it, which super sends resume lookup above.
pub fn lookup(
    start: &ClassRef,
    selector: SelectorId,
) -> Option<(Rc<CompiledMethod>, ClassRef)> {
    let mut current = Some(Rc::clone(start));
    while let Some(class) = current {
        let found = class.borrow().methods.get(selector);
        if let Some(method) = found {
            return Some((method, class));
        }
        let next = class.borrow().superclass.clone();
        current = next;
    }
    None
}

/// Install a method and invalidate the hierarchy below, so stale send
/// caches re-resolve.
pub fn add_method(
    class: &ClassRef,
    selector: SelectorId,
    method: Rc<CompiledMethod>,
) {
    *method.holder.borrow_mut() = Some(Rc::downgrade(class));
    class.borrow_mut().methods.insert(selector, method);
    invalidate_hierarchy(class);
}

pub fn remove_method(class: &ClassRef, selector: SelectorId) -> bool {
    let removed = class.borrow_mut().methods.remove(selector);
    if removed {
        invalidate_hierarchy(class);
    }
    removed
}

/// Detach from the old superclass, attach to the new one, and invalidate
/// this class and everything below it.
pub fn set_superclass(class: &ClassRef, new_superclass: Option<ClassRef>) {
    let old = class.borrow().superclass.clone();
    if let Some(old) = old {
        detach_subclass(&old, class);
    }
    class.borrow_mut().superclass = new_superclass.clone();
    if let Some(parent) = new_superclass {
        attach_subclass(&parent, class);
    }
    invalidate_hierarchy(class);
}

/// Bump the version of `class` and all transitive subclasses. The visited
/// set keeps a malformed cyclic hierarchy from looping forever.
pub fn invalidate_hierarchy(class: &ClassRef) {
    let mut visited: Vec<*const RefCell<ClassObject>> = Vec::new();
    let mut queue = vec![Rc::clone(class)];
    while let Some(current) = queue.pop() {
        let ptr = Rc::as_ptr(&current);
        if visited.contains(&ptr) {
            continue;
        }
        visited.push(ptr);
        current.borrow_mut().bump_version();
        let subclasses: Vec<ClassRef> = current
            .borrow()
            .subclasses
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        queue.extend(subclasses);
    }
}

/// Number of named slots in an instance, inherited slots included.
pub fn instance_size(class: &ClassRef) -> usize {
    let mut total = 0;
    let mut current = Some(Rc::clone(class));
    while let Some(c) = current {
        total += c.borrow().ivar_names.len();
        let next = c.borrow().superclass.clone();
        current = next;
    }
    total
}

pub fn inherits_from(class: &ClassRef, ancestor: &ClassRef) -> bool {
    let mut current = class.borrow().superclass.clone();
    while let Some(c) = current {
        if Rc::ptr_eq(&c, ancestor) {
            return true;
        }
        let next = c.borrow().superclass.clone();
        current = next;
    }
    false
}
