//! An insertion-ordered string-keyed map with a parent fallback chain.
//!
//! The compiler depends on deterministic iteration order in several places
//! (closure userdata field order, import re-export order), so a plain
//! `HashMap` is not enough: entries iterate in insertion order.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type SharedTable<T> = Rc<RefCell<Table<T>>>;

#[derive(Debug)]
pub struct Table<T> {
    entries: Vec<(String, T)>,
    index: HashMap<String, usize>,
    pub fallback: Option<SharedTable<T>>,
}

impl<T: Clone> Table<T> {
    pub fn new() -> Self {
        Table { entries: vec![], index: HashMap::new(), fallback: None }
    }

    pub fn shared() -> SharedTable<T> {
        Rc::new(RefCell::new(Table::new()))
    }

    pub fn shared_with_fallback(fallback: SharedTable<T>) -> SharedTable<T> {
        Rc::new(RefCell::new(Table { entries: vec![], index: HashMap::new(), fallback: Some(fallback) }))
    }

    /// Look up a name here or anywhere up the fallback chain.
    pub fn get(&self, name: &str) -> Option<T> {
        if let Some(&i) = self.index.get(name) {
            return Some(self.entries[i].1.clone());
        }
        self.fallback.as_ref().and_then(|fb| fb.borrow().get(name))
    }

    /// Look up a name in this table only.
    pub fn get_local(&self, name: &str) -> Option<T> {
        self.index.get(name).map(|&i| self.entries[i].1.clone())
    }

    /// Insert or overwrite a local entry.
    pub fn set(&mut self, name: String, value: T) {
        match self.index.get(&name) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    /// Local entries in insertion order.
    pub fn entries(&self) -> Vec<(String, T)> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `other` is this table or one of its ancestors.
    pub fn chains_to(table: &SharedTable<T>, other: &SharedTable<T>) -> bool {
        if Rc::ptr_eq(table, other) {
            return true;
        }
        let fallback = table.borrow().fallback.clone();
        match fallback {
            Some(fb) => Table::chains_to(&fb, other),
            None => false,
        }
    }
}

impl<T: Clone> Default for Table<T> {
    fn default() -> Self {
        Table::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_falls_back_to_parents() {
        let root = Table::shared();
        root.borrow_mut().set("x".into(), 1);
        let child = Table::shared_with_fallback(root.clone());
        child.borrow_mut().set("y".into(), 2);
        assert_eq!(child.borrow().get("x"), Some(1));
        assert_eq!(child.borrow().get("y"), Some(2));
        assert_eq!(child.borrow().get_local("x"), None);
        assert_eq!(root.borrow().get("y"), None);
    }

    #[test]
    fn entries_keep_insertion_order() {
        let table = Table::shared();
        for name in ["c", "a", "b"] {
            table.borrow_mut().set(name.into(), name.len());
        }
        let names: Vec<String> = table.borrow().entries().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn shadowing_overwrites_locally() {
        let root = Table::shared();
        root.borrow_mut().set("x".into(), 1);
        let child = Table::shared_with_fallback(root.clone());
        child.borrow_mut().set("x".into(), 10);
        assert_eq!(child.borrow().get("x"), Some(10));
        assert_eq!(root.borrow().get("x"), Some(1));
    }
}
