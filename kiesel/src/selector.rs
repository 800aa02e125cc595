use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

/// Interned selector. Two ids compare equal iff they were interned from the
/// same string, so message lookup never compares characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectorId(u32);

impl SelectorId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

struct SelectorsImpl {
    names: Vec<Arc<str>>,
    ids: HashMap<String, SelectorId>,
}

impl SelectorsImpl {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            ids: HashMap::new(),
        }
    }

    fn get_or_add(&mut self, name: &str) -> SelectorId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = SelectorId(self.names.len() as u32);
        self.names.push(Arc::<str>::from(name));
        self.ids.insert(name.to_owned(), id);
        id
    }

    fn get(&self, id: SelectorId) -> Option<Arc<str>> {
        self.names.get(id.0 as usize).cloned()
    }
}

#[derive(Clone)]
pub struct Selectors(Arc<RwLock<SelectorsImpl>>);

impl Selectors {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(SelectorsImpl::new())))
    }

    pub fn intern(&self, name: &str) -> SelectorId {
        self.0.write().get_or_add(name)
    }

    pub fn name(&self, id: SelectorId) -> Option<Arc<str>> {
        self.0.read().get(id)
    }

    /// Printable form for diagnostics, valid even for a foreign id.
    pub fn display(&self, id: SelectorId) -> String {
        match self.name(id) {
            Some(name) => name.to_string(),
            None => format!("<selector {}>", id.as_u32()),
        }
    }
}

impl Default for Selectors {
    fn default() -> Self {
        Self::new()
    }
}

/// Argument count implied by a selector's spelling: one colon per keyword
/// argument, one argument for binary selectors, none for unary ones.
pub fn arg_count(name: &str) -> u8 {
    let colons = name.bytes().filter(|&b| b == b':').count();
    if colons > 0 {
        return colons as u8;
    }
    match name.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => 0,
        Some(_) => 1,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let selectors = Selectors::new();
        let a = selectors.intern("at:put:");
        let b = selectors.intern("at:put:");
        assert_eq!(a, b);
        assert_eq!(selectors.name(a).as_deref(), Some("at:put:"));
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let selectors = Selectors::new();
        assert_ne!(selectors.intern("value"), selectors.intern("value:"));
    }

    #[test]
    fn arg_counts_follow_spelling() {
        assert_eq!(arg_count("size"), 0);
        assert_eq!(arg_count("+"), 1);
        assert_eq!(arg_count("at:"), 1);
        assert_eq!(arg_count("at:put:"), 2);
        assert_eq!(arg_count("value:value:value:"), 3);
        assert_eq!(arg_count("=="), 1);
    }

    #[test]
    fn display_survives_unknown_ids() {
        let selectors = Selectors::new();
        let id = selectors.intern("printString");
        assert_eq!(selectors.display(id), "printString");
        assert_eq!(
            Selectors::new().display(id),
            format!("<selector {}>", id.as_u32())
        );
    }
}
