//! Graph pointers and pointer-apply strategies.
//!
//! Serializable object graphs use crate-provided pointer wrappers:
//!
//! - [`Shared<T>`] — aliasable shared ownership with interior mutability,
//!   so cyclic graphs and deferred reference resolution are expressible in
//!   safe code
//! - [`WeakRef<T>`] — a non-owning reference into the graph
//! - `Box<T>` — unique ownership
//! - `Option<T>` — an optional value without indirection
//!
//! [`PointerOps`] is the closed set of apply strategies: one variant per
//! member kind, matched exhaustively at every access site. Each variant
//! carries monomorphized function pointers that translate between the
//! type-erased member slot and its pointee.

use std::any::{Any, TypeId, type_name};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::address::AddressString;
use crate::descriptor::{concrete, concrete_mut};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Shared / WeakRef
// ---------------------------------------------------------------------------

/// Shared ownership of a graph node.
///
/// Cloning aliases the same object; equality compares the pointed-to
/// values. After a load, every slot that referenced the same address in
/// the stream holds an alias of one object.
///
/// The default handle is null and owns nothing, so self-referential
/// types (`struct Node { next: Shared<Node> }`) construct without
/// allocating the whole chain. A null handle serializes as a null
/// reference.
pub struct Shared<T> {
    pub(crate) cell: Option<Rc<RefCell<T>>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: Some(Rc::new(RefCell::new(value))),
        }
    }

    /// The null handle. Equal to `Shared::default()`.
    pub fn null() -> Self {
        Self { cell: None }
    }

    pub fn is_null(&self) -> bool {
        self.cell.is_none()
    }

    /// Borrow the pointed-to value.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null or the value is mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.require().borrow()
    }

    /// Mutably borrow the pointed-to value.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null or the value is already borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.require().borrow_mut()
    }

    fn require(&self) -> &Rc<RefCell<T>> {
        match &self.cell {
            Some(cell) => cell,
            None => panic!("dereferenced a null Shared<{}>", type_name::<T>()),
        }
    }

    /// Whether two handles alias the same object. Two null handles alias.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.cell, &other.cell) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// A non-owning reference to the same node. Null handles downgrade to
    /// an empty reference.
    pub fn downgrade(&self) -> WeakRef<T> {
        WeakRef {
            weak: self.cell.as_ref().map_or_else(Weak::new, Rc::downgrade),
        }
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.cell, &other.cell) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(cell) = &self.cell else {
            return write!(f, "Shared(null)");
        };
        write!(f, "Shared(")?;
        match cell.try_borrow() {
            Ok(guard) => write!(f, "{:?}", &*guard)?,
            Err(_) => write!(f, "<borrowed>")?,
        }
        write!(f, ")")
    }
}

/// A non-owning reference to a [`Shared`] graph node.
///
/// The default value is an empty reference that upgrades to `None`.
pub struct WeakRef<T> {
    pub(crate) weak: Weak<RefCell<T>>,
}

impl<T> WeakRef<T> {
    pub fn new() -> Self {
        Self { weak: Weak::new() }
    }

    pub fn upgrade(&self) -> Option<Shared<T>> {
        self.weak.upgrade().map(|cell| Shared { cell: Some(cell) })
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            weak: Weak::clone(&self.weak),
        }
    }
}

impl<T> Default for WeakRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakRef({})", type_name::<T>())
    }
}

// ---------------------------------------------------------------------------
// SharedHandle — type-erased Shared
// ---------------------------------------------------------------------------

type BorrowFn = for<'a> fn(&'a dyn Any) -> Result<Ref<'a, dyn Any>>;
type BorrowMutFn = for<'a> fn(&'a dyn Any) -> Result<RefMut<'a, dyn Any>>;

/// A type-erased clone of a [`Shared`] pointer, used by the pointer-graph
/// resolver to hold and hand out aliases without knowing the pointee type.
pub struct SharedHandle {
    cell: Rc<dyn Any>,
    type_id: TypeId,
    type_name: &'static str,
    borrow_fn: BorrowFn,
    borrow_mut_fn: BorrowMutFn,
}

impl SharedHandle {
    pub(crate) fn of<T: Any>(cell: Rc<RefCell<T>>) -> Self {
        Self {
            cell,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            borrow_fn: handle_borrow::<T>,
            borrow_mut_fn: handle_borrow_mut::<T>,
        }
    }

    /// Identity key of the pointed-to allocation.
    pub(crate) fn address(&self) -> AddressString {
        AddressString::from_ptr(Rc::as_ptr(&self.cell) as *const () as usize)
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrow the pointee for reading.
    pub(crate) fn borrow(&self) -> Result<Ref<'_, dyn Any>> {
        (self.borrow_fn)(self.cell.as_ref())
    }

    /// Borrow the pointee for in-place loading.
    pub(crate) fn borrow_mut(&self) -> Result<RefMut<'_, dyn Any>> {
        (self.borrow_mut_fn)(self.cell.as_ref())
    }

    pub(crate) fn downcast_cell<T: Any>(&self) -> Option<Rc<RefCell<T>>> {
        Rc::clone(&self.cell).downcast::<RefCell<T>>().ok()
    }
}

impl Clone for SharedHandle {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
            type_id: self.type_id,
            type_name: self.type_name,
            borrow_fn: self.borrow_fn,
            borrow_mut_fn: self.borrow_mut_fn,
        }
    }
}

impl fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedHandle({} @ {})", self.type_name, self.address())
    }
}

fn handle_borrow<T: Any>(cell: &dyn Any) -> Result<Ref<'_, dyn Any>> {
    let cell = concrete::<RefCell<T>>(cell);
    let guard = cell
        .try_borrow()
        .map_err(|_| Error::protocol("shared object is mutably borrowed during traversal"))?;
    Ok(Ref::map(guard, |t| t as &dyn Any))
}

fn handle_borrow_mut<T: Any>(cell: &dyn Any) -> Result<RefMut<'_, dyn Any>> {
    let cell = concrete::<RefCell<T>>(cell);
    let guard = cell.try_borrow_mut().map_err(|_| {
        Error::protocol("shared object is already borrowed (recursive inline record?)")
    })?;
    Ok(RefMut::map(guard, |t| t as &mut dyn Any))
}

// ---------------------------------------------------------------------------
// Pointer-apply strategies
// ---------------------------------------------------------------------------

type AddressFn = fn(&dyn Any) -> AddressString;
type DerefFn = for<'a> fn(&'a dyn Any) -> &'a dyn Any;
type DerefMutFn = for<'a> fn(&'a mut dyn Any) -> &'a mut dyn Any;
type HandleFn = fn(&dyn Any) -> Option<SharedHandle>;
type AssignFn = fn(&mut dyn Any, &SharedHandle) -> Result<()>;
type PlaceholderFn = fn() -> SharedHandle;
type UpgradeFn = fn(&dyn Any) -> Option<SharedHandle>;
type OptDerefFn = for<'a> fn(&'a dyn Any) -> Option<&'a dyn Any>;
type SetDefaultFn = for<'a> fn(&'a mut dyn Any) -> &'a mut dyn Any;
type ClearFn = fn(&mut dyn Any);

/// Strategy for a `Shared<T>` member slot. `handle` is `None` for a null
/// slot, which serializes as a null reference.
pub struct SharedOps {
    pub(crate) handle: HandleFn,
    pub(crate) assign: AssignFn,
    pub(crate) clear: ClearFn,
    pub(crate) placeholder: PlaceholderFn,
}

/// Strategy for a `WeakRef<T>` member slot.
pub struct WeakOps {
    pub(crate) upgrade: UpgradeFn,
    pub(crate) assign: AssignFn,
    pub(crate) clear: ClearFn,
    pub(crate) placeholder: PlaceholderFn,
}

/// Strategy for a `Box<T>` member slot.
pub struct UniqueOps {
    pub(crate) address: AddressFn,
    pub(crate) deref: DerefFn,
    pub(crate) deref_mut: DerefMutFn,
}

/// Strategy for an `Option<T>` member slot.
pub struct OptionalOps {
    pub(crate) deref: OptDerefFn,
    pub(crate) set_default: SetDefaultFn,
    pub(crate) clear: ClearFn,
}

/// The closed set of pointer-apply strategies. One instance is built per
/// declared member type at registration and matched exhaustively wherever
/// a member slot is read or written.
pub enum PointerOps {
    /// Plain value, no indirection.
    Value,
    Shared(SharedOps),
    Weak(WeakOps),
    Unique(UniqueOps),
    Optional(OptionalOps),
}

impl PointerOps {
    pub fn value() -> Self {
        PointerOps::Value
    }

    pub fn shared<T: Any + Default>() -> Self {
        PointerOps::Shared(SharedOps {
            handle: shared_handle::<T>,
            assign: shared_assign::<T>,
            clear: shared_clear::<T>,
            placeholder: shared_placeholder::<T>,
        })
    }

    pub fn weak<T: Any + Default>() -> Self {
        PointerOps::Weak(WeakOps {
            upgrade: weak_upgrade::<T>,
            assign: weak_assign::<T>,
            clear: weak_clear::<T>,
            placeholder: shared_placeholder::<T>,
        })
    }

    pub fn unique<T: Any>() -> Self {
        PointerOps::Unique(UniqueOps {
            address: unique_address::<T>,
            deref: unique_deref::<T>,
            deref_mut: unique_deref_mut::<T>,
        })
    }

    pub fn optional<T: Any + Default>() -> Self {
        PointerOps::Optional(OptionalOps {
            deref: optional_deref::<T>,
            set_default: optional_set_default::<T>,
            clear: optional_clear::<T>,
        })
    }

    /// True for members with indirection (everything but `Value` and
    /// `Optional`).
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            PointerOps::Shared(_) | PointerOps::Weak(_) | PointerOps::Unique(_)
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PointerOps::Value => "value",
            PointerOps::Shared(_) => "shared",
            PointerOps::Weak(_) => "weak",
            PointerOps::Unique(_) => "unique",
            PointerOps::Optional(_) => "optional",
        }
    }
}

impl fmt::Debug for PointerOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PointerOps::{}", self.kind_name())
    }
}

// --- Shared<T> slot operations ---

fn shared_handle<T: Any>(slot: &dyn Any) -> Option<SharedHandle> {
    concrete::<Shared<T>>(slot)
        .cell
        .as_ref()
        .map(|cell| SharedHandle::of(Rc::clone(cell)))
}

fn shared_assign<T: Any>(slot: &mut dyn Any, handle: &SharedHandle) -> Result<()> {
    let cell = handle
        .downcast_cell::<T>()
        .ok_or_else(|| Error::SchemaMismatch {
            property: String::new(),
            expected: type_name::<T>().to_owned(),
            actual: handle.type_name().to_owned(),
        })?;
    *concrete_mut::<Shared<T>>(slot) = Shared { cell: Some(cell) };
    Ok(())
}

fn shared_clear<T: Any>(slot: &mut dyn Any) {
    *concrete_mut::<Shared<T>>(slot) = Shared::null();
}

fn shared_placeholder<T: Any + Default>() -> SharedHandle {
    SharedHandle::of(Rc::new(RefCell::new(T::default())))
}

// --- WeakRef<T> slot operations ---

fn weak_upgrade<T: Any>(slot: &dyn Any) -> Option<SharedHandle> {
    concrete::<WeakRef<T>>(slot)
        .weak
        .upgrade()
        .map(SharedHandle::of)
}

fn weak_assign<T: Any>(slot: &mut dyn Any, handle: &SharedHandle) -> Result<()> {
    let cell = handle
        .downcast_cell::<T>()
        .ok_or_else(|| Error::SchemaMismatch {
            property: String::new(),
            expected: type_name::<T>().to_owned(),
            actual: handle.type_name().to_owned(),
        })?;
    concrete_mut::<WeakRef<T>>(slot).weak = Rc::downgrade(&cell);
    Ok(())
}

fn weak_clear<T: Any>(slot: &mut dyn Any) {
    *concrete_mut::<WeakRef<T>>(slot) = WeakRef::new();
}

// --- Box<T> slot operations ---

fn unique_address<T: Any>(slot: &dyn Any) -> AddressString {
    let b = concrete::<Box<T>>(slot);
    AddressString::from_ptr(&**b as *const T as usize)
}

fn unique_deref<T: Any>(slot: &dyn Any) -> &dyn Any {
    &**concrete::<Box<T>>(slot)
}

fn unique_deref_mut<T: Any>(slot: &mut dyn Any) -> &mut dyn Any {
    &mut **concrete_mut::<Box<T>>(slot)
}

// --- Option<T> slot operations ---

fn optional_deref<T: Any>(slot: &dyn Any) -> Option<&dyn Any> {
    concrete::<Option<T>>(slot).as_ref().map(|v| v as &dyn Any)
}

fn optional_set_default<T: Any + Default>(slot: &mut dyn Any) -> &mut dyn Any {
    concrete_mut::<Option<T>>(slot).insert(T::default())
}

fn optional_clear<T: Any>(slot: &mut dyn Any) {
    *concrete_mut::<Option<T>>(slot) = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_aliases() {
        let a = Shared::new(5i32);
        let b = a.clone();
        *b.borrow_mut() = 7;
        assert_eq!(*a.borrow(), 7);
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn weak_upgrades_while_owner_lives() {
        let a = Shared::new(String::from("x"));
        let w = a.downgrade();
        assert!(w.upgrade().is_some());
        drop(a);
        assert!(w.upgrade().is_none());
    }

    #[test]
    fn default_is_null_and_self_reference_terminates() {
        #[derive(Default)]
        struct Node {
            next: Shared<Node>,
        }
        let node = Node::default();
        assert!(node.next.is_null());
        assert!(node.next.ptr_eq(&Shared::null()));
        assert!(node.next.downgrade().upgrade().is_none());
        assert!(shared_handle::<Node>(&node.next).is_none());
    }

    #[test]
    fn clear_resets_slot_to_null() {
        let mut slot = Shared::new(3i32);
        shared_clear::<i32>(&mut slot);
        assert!(slot.is_null());
    }

    #[test]
    fn handle_round_trips_through_erasure() {
        let a = Shared::new(41i32);
        let slot: &dyn Any = &a;
        let handle = shared_handle::<i32>(slot).unwrap();

        let mut b = Shared::new(0i32);
        shared_assign::<i32>(&mut b, &handle).unwrap();
        assert!(a.ptr_eq(&b));
        *b.borrow_mut() = 42;
        assert_eq!(*a.borrow(), 42);
    }

    #[test]
    fn handle_assign_rejects_wrong_pointee() {
        let a = Shared::new(1i32);
        let handle = shared_handle::<i32>(&a).unwrap();
        let mut b = Shared::new(String::new());
        let err = shared_assign::<String>(&mut b, &handle).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[test]
    fn optional_ops_toggle() {
        let mut slot: Option<u8> = None;
        assert!(optional_deref::<u8>(&slot).is_none());
        {
            let inner = optional_set_default::<u8>(&mut slot);
            *concrete_mut::<u8>(inner) = 9;
        }
        assert_eq!(slot, Some(9));
        optional_clear::<u8>(&mut slot);
        assert_eq!(slot, None);
    }

    #[test]
    fn placeholder_is_fillable() {
        let handle = shared_placeholder::<i32>();
        {
            let mut guard = handle.borrow_mut().unwrap();
            *concrete_mut::<i32>(&mut *guard) = 13;
        }
        let cell = handle.downcast_cell::<i32>().unwrap();
        assert_eq!(*cell.borrow(), 13);
    }
}
