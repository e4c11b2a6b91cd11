//! Pointer-graph resolvers.
//!
//! One resolver instance lives for the duration of a single save or load
//! call and reconciles object identity across the stream.
//!
//! Saving: the first strong reference to an object queues a top-level
//! record under the object's address; every reference (first included)
//! is written as a reference token. The queue is drained after the root
//! value, so records may reference each other and cycles terminate.
//!
//! Loading: the first reference to a not-yet-materialized address creates
//! a typed placeholder object; all aliasing slots receive the placeholder
//! immediately, and the record, whenever it arrives, is parsed into the
//! placeholder in place. Aliases therefore observe the final value without
//! any pointer rewriting. An address that is referenced but never defined
//! is a dangling reference.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::address::AddressString;
use crate::error::{Error, Result};
use crate::pointer::SharedHandle;

// ---------------------------------------------------------------------------
// Save side
// ---------------------------------------------------------------------------

pub(crate) struct SaveResolver {
    saved: HashSet<AddressString>,
    unique: HashSet<AddressString>,
    pending: VecDeque<(AddressString, SharedHandle)>,
    queued: HashSet<AddressString>,
}

impl SaveResolver {
    pub fn new() -> Self {
        Self {
            saved: HashSet::new(),
            unique: HashSet::new(),
            pending: VecDeque::new(),
            queued: HashSet::new(),
        }
    }

    /// Mark an address as written. Returns false if it already was.
    pub fn mark_saved(&mut self, addr: AddressString) -> bool {
        self.saved.insert(addr)
    }

    /// Note a strong or weak reference to an object; queues its record if
    /// the object has not been written or queued yet.
    pub fn reference(&mut self, addr: AddressString, handle: SharedHandle) -> Result<()> {
        if self.unique.contains(&addr) {
            return Err(Error::UniqueAliasViolation { address: addr });
        }
        if !self.saved.contains(&addr) && self.queued.insert(addr) {
            self.pending.push_back((addr, handle));
        }
        Ok(())
    }

    /// Claim an address for a uniquely-owned record. Any other reference
    /// to the same address, before or after, is an aliasing error.
    pub fn record_unique(&mut self, addr: AddressString) -> Result<()> {
        if self.saved.contains(&addr) || self.queued.contains(&addr) || !self.unique.insert(addr) {
            return Err(Error::UniqueAliasViolation { address: addr });
        }
        Ok(())
    }

    /// Next queued record that still needs writing.
    pub fn next_pending(&mut self) -> Option<(AddressString, SharedHandle)> {
        while let Some((addr, handle)) = self.pending.pop_front() {
            if !self.saved.contains(&addr) {
                return Some((addr, handle));
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Load side
// ---------------------------------------------------------------------------

struct LoadEntry {
    handle: SharedHandle,
    filled: bool,
}

pub(crate) struct LoadResolver {
    entries: HashMap<AddressString, LoadEntry>,
    unique: HashSet<AddressString>,
}

impl LoadResolver {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            unique: HashSet::new(),
        }
    }

    /// The handle for a referenced address, creating a placeholder when the
    /// record has not been seen yet.
    pub fn reference(
        &mut self,
        addr: AddressString,
        placeholder: fn() -> SharedHandle,
    ) -> Result<SharedHandle> {
        if self.unique.contains(&addr) {
            return Err(Error::UniqueAliasViolation { address: addr });
        }
        let entry = self.entries.entry(addr).or_insert_with(|| LoadEntry {
            handle: placeholder(),
            filled: false,
        });
        Ok(entry.handle.clone())
    }

    /// The handle a record at `addr` must be parsed into: the existing
    /// placeholder if the address was forward-referenced, otherwise the
    /// caller-provided fresh object. Marks the record filled.
    pub fn define(
        &mut self,
        addr: AddressString,
        fallback: impl FnOnce() -> SharedHandle,
    ) -> Result<SharedHandle> {
        if self.unique.contains(&addr) {
            return Err(Error::UniqueAliasViolation { address: addr });
        }
        let entry = self.entries.entry(addr).or_insert_with(|| LoadEntry {
            handle: fallback(),
            filled: false,
        });
        if entry.filled {
            return Err(Error::protocol(format!(
                "duplicate record for address '{addr}'"
            )));
        }
        entry.filled = true;
        Ok(entry.handle.clone())
    }

    /// Claim an address for a uniquely-owned record.
    pub fn record_unique(&mut self, addr: AddressString) -> Result<()> {
        if self.entries.contains_key(&addr) || !self.unique.insert(addr) {
            return Err(Error::UniqueAliasViolation { address: addr });
        }
        Ok(())
    }

    /// Verify that every referenced address was eventually defined.
    pub fn finish(&self) -> Result<()> {
        for (addr, entry) in &self.entries {
            if !entry.filled {
                return Err(Error::DanglingReference { address: *addr });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::concrete_mut;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn placeholder_i32() -> SharedHandle {
        SharedHandle::of(Rc::new(RefCell::new(0i32)))
    }

    #[test]
    fn save_resolver_queues_each_address_once() {
        let mut r = SaveResolver::new();
        let addr = AddressString::from_token("a1").unwrap();
        let handle = placeholder_i32();
        r.reference(addr, handle.clone()).unwrap();
        r.reference(addr, handle).unwrap();
        assert!(r.next_pending().is_some());
        assert!(r.next_pending().is_none());
    }

    #[test]
    fn saved_addresses_are_not_replayed() {
        let mut r = SaveResolver::new();
        let addr = AddressString::from_token("a1").unwrap();
        r.reference(addr, placeholder_i32()).unwrap();
        r.mark_saved(addr);
        assert!(r.next_pending().is_none());
    }

    #[test]
    fn unique_alias_is_rejected_on_save() {
        let mut r = SaveResolver::new();
        let addr = AddressString::from_token("a1").unwrap();
        r.record_unique(addr).unwrap();
        let err = r.reference(addr, placeholder_i32()).unwrap_err();
        assert!(matches!(err, Error::UniqueAliasViolation { .. }));
    }

    #[test]
    fn forward_reference_fills_through_placeholder() {
        let mut r = LoadResolver::new();
        let addr = AddressString::from_token("obj").unwrap();

        // Two aliases taken before the record arrives.
        let a = r.reference(addr, placeholder_i32).unwrap();
        let b = r.reference(addr, placeholder_i32).unwrap();
        assert!(r.finish().is_err());

        let target = r.define(addr, placeholder_i32).unwrap();
        {
            let mut guard = target.borrow_mut().unwrap();
            *concrete_mut::<i32>(&mut *guard) = 99;
        }
        r.finish().unwrap();

        assert_eq!(*a.downcast_cell::<i32>().unwrap().borrow(), 99);
        assert_eq!(*b.downcast_cell::<i32>().unwrap().borrow(), 99);
    }

    #[test]
    fn duplicate_record_is_rejected_on_load() {
        let mut r = LoadResolver::new();
        let addr = AddressString::from_token("obj").unwrap();
        r.define(addr, placeholder_i32).unwrap();
        assert!(r.define(addr, placeholder_i32).is_err());
    }

    #[test]
    fn unreferenced_dangling_address_is_reported() {
        let mut r = LoadResolver::new();
        let addr = AddressString::from_token("ghost").unwrap();
        r.reference(addr, placeholder_i32).unwrap();
        let err = r.finish().unwrap_err();
        assert!(matches!(err, Error::DanglingReference { .. }));
    }
}
