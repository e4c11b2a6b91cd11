//! Runtime type metadata: [`TypeDescriptor`] and [`PropertyDescriptor`].
//!
//! A `TypeDescriptor` describes one serializable type: identity (name and
//! numeric id), version stamp, construction, atomic value conversion and —
//! for compound types — the ordered property table. Member access goes
//! through typed getter closures captured at registration time instead of
//! byte offsets, and indirection is described by a closed
//! [`PointerOps`](crate::pointer::PointerOps) variant per member.
//!
//! Descriptors are created once through the
//! [`Registry`](crate::registry::Registry) builders and are immutable
//! afterwards.

use std::any::{Any, TypeId};
use std::fmt;

use crate::error::{Error, Result};
use crate::pointer::{PointerOps, SharedHandle};
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// Downcast helpers
// ---------------------------------------------------------------------------

/// Downcast a type-erased value to its concrete type.
///
/// # Panics
///
/// Panics if the descriptor machinery applied an accessor to a value of the
/// wrong concrete type. Accessors are captured together with their parent
/// type at registration, so this indicates a bug in the engine, not in the
/// caller's data.
pub(crate) fn concrete<T: Any>(any: &dyn Any) -> &T {
    any.downcast_ref::<T>()
        .expect("property accessor applied to a value of the wrong concrete type")
}

/// Mutable counterpart of [`concrete`].
pub(crate) fn concrete_mut<T: Any>(any: &mut dyn Any) -> &mut T {
    any.downcast_mut::<T>()
        .expect("property accessor applied to a value of the wrong concrete type")
}

// ---------------------------------------------------------------------------
// Atomic values
// ---------------------------------------------------------------------------

/// Byte width of an integer member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    W1,
    W2,
    W4,
    W8,
}

impl IntWidth {
    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W1 => 1,
            IntWidth::W2 => 2,
            IntWidth::W4 => 4,
            IntWidth::W8 => 8,
        }
    }

    pub fn from_bytes(n: usize) -> Option<Self> {
        match n {
            1 => Some(IntWidth::W1),
            2 => Some(IntWidth::W2),
            4 => Some(IntWidth::W4),
            8 => Some(IntWidth::W8),
            _ => None,
        }
    }
}

/// Byte width of a floating-point member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatWidth {
    W4,
    W8,
}

/// A scalar in transit between an object member and a codec.
///
/// Binary parsing produces fully typed variants; the textual formats
/// produce [`AtomicValue::Str`] and leave conversion to the receiving
/// descriptor's `from_atomic` operation.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicValue {
    Bool(bool),
    Char(char),
    Signed(i64, IntWidth),
    Unsigned(u64, IntWidth),
    F32(f32),
    F64(f64),
    Str(String),
    /// An enum variant. Binary streams carry only the numeric value,
    /// textual streams only the name; either side may be empty.
    Enum { name: String, value: i64 },
}

impl AtomicValue {
    /// Raw text rendition used by the text and YAML writers (unquoted).
    ///
    /// Floats are printed with 10 (f32) / 18 (f64) significant digits so
    /// the nearest representable value survives a textual round trip.
    pub fn to_text(&self) -> String {
        match self {
            AtomicValue::Bool(v) => v.to_string(),
            AtomicValue::Char(c) => c.to_string(),
            AtomicValue::Signed(v, _) => v.to_string(),
            AtomicValue::Unsigned(v, _) => v.to_string(),
            AtomicValue::F32(v) => {
                if v.is_finite() {
                    format!("{v:.9e}")
                } else {
                    v.to_string()
                }
            }
            AtomicValue::F64(v) => {
                if v.is_finite() {
                    format!("{v:.17e}")
                } else {
                    v.to_string()
                }
            }
            AtomicValue::Str(s) => s.clone(),
            AtomicValue::Enum { name, value } => {
                if name.is_empty() {
                    value.to_string()
                } else {
                    name.clone()
                }
            }
        }
    }

    /// Short label for error messages.
    pub fn type_label(&self) -> String {
        match self {
            AtomicValue::Bool(_) => "bool".into(),
            AtomicValue::Char(_) => "char".into(),
            AtomicValue::Signed(_, w) => format!("{}-byte signed", w.bytes()),
            AtomicValue::Unsigned(_, w) => format!("{}-byte unsigned", w.bytes()),
            AtomicValue::F32(_) => "f32".into(),
            AtomicValue::F64(_) => "f64".into(),
            AtomicValue::Str(_) => "string".into(),
            AtomicValue::Enum { .. } => "enum".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Property flags
// ---------------------------------------------------------------------------

bitflags::bitflags! {
    /// Behavioral flags on a property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyFlags: u8 {
        /// Serialized out but never overwritten on load.
        const READ_ONLY = 1 << 0;
        /// Load fails if the stream does not carry this property.
        const REQUIRED = 1 << 1;
        /// Embedded base type whose properties are flattened into the
        /// owner's record.
        const ANCESTOR = 1 << 2;
    }
}

// ---------------------------------------------------------------------------
// Container operations
// ---------------------------------------------------------------------------

type LenFn = fn(&dyn Any) -> usize;
type AtFn = for<'a> fn(&'a dyn Any, usize) -> &'a dyn Any;
type ClearFn = fn(&mut dyn Any);
type PushFn = for<'a> fn(&'a mut dyn Any) -> &'a mut dyn Any;
type VisitFn =
    for<'a> fn(&'a dyn Any, &mut dyn FnMut(&dyn Any, &dyn Any) -> Result<()>) -> Result<()>;
type InsertFn = for<'a> fn(&'a mut dyn Any, Box<dyn Any>) -> Result<&'a mut dyn Any>;

/// Type-erased element access for sequence containers.
pub struct SequenceOps {
    pub(crate) elem_type: TypeId,
    pub(crate) elem_type_name: &'static str,
    pub(crate) elem_ops: PointerOps,
    pub(crate) len: LenFn,
    pub(crate) at: AtFn,
    pub(crate) clear: ClearFn,
    /// Append a default-constructed element at the tail and return it for
    /// in-place loading.
    pub(crate) push_default: PushFn,
}

/// Type-erased pair access for associative containers.
pub struct MapOps {
    pub(crate) key_type: TypeId,
    pub(crate) key_type_name: &'static str,
    pub(crate) value_type: TypeId,
    pub(crate) value_type_name: &'static str,
    pub(crate) visit: VisitFn,
    pub(crate) clear: ClearFn,
    /// Insert a default value under the given key and return the value
    /// slot for in-place loading.
    pub(crate) insert_default: InsertFn,
}

// ---------------------------------------------------------------------------
// Property descriptors
// ---------------------------------------------------------------------------

pub(crate) type GetFn = Box<dyn for<'a> Fn(&'a dyn Any) -> &'a dyn Any>;
pub(crate) type GetMutFn = Box<dyn for<'a> Fn(&'a mut dyn Any) -> &'a mut dyn Any>;
pub(crate) type DefaultFn = Box<dyn Fn(&mut dyn Any)>;

/// Metadata for one member of a compound type.
pub struct PropertyDescriptor {
    pub(crate) name: String,
    pub(crate) flags: PropertyFlags,
    /// `TypeId` of the member's value type (the pointee for pointer kinds).
    pub(crate) member_type: TypeId,
    pub(crate) member_type_name: &'static str,
    pub(crate) ops: PointerOps,
    pub(crate) default: Option<DefaultFn>,
    pub(crate) get: GetFn,
    pub(crate) get_mut: GetMutFn,
}

impl PropertyDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    pub fn is_ancestor(&self) -> bool {
        self.flags.contains(PropertyFlags::ANCESTOR)
    }

    pub fn is_required(&self) -> bool {
        self.flags.contains(PropertyFlags::REQUIRED)
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(PropertyFlags::READ_ONLY)
    }

    pub fn pointer_ops(&self) -> &PointerOps {
        &self.ops
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("member_type", &self.member_type_name)
            .finish()
    }
}

/// The ordered member table of a compound type.
pub struct CompoundInfo {
    pub(crate) properties: Vec<PropertyDescriptor>,
}

/// A property located within a compound, together with the chain of
/// ancestor accessors leading to it.
pub struct PropertyPath<'a> {
    pub(crate) ancestors: Vec<&'a PropertyDescriptor>,
    pub(crate) prop: &'a PropertyDescriptor,
}

impl<'a> PropertyPath<'a> {
    pub fn property(&self) -> &'a PropertyDescriptor {
        self.prop
    }

    /// Borrow the member slot from its (transitively owning) parent.
    pub fn member<'v>(&self, parent: &'v dyn Any) -> &'v dyn Any {
        let mut cur = parent;
        for anc in &self.ancestors {
            cur = (anc.get)(cur);
        }
        (self.prop.get)(cur)
    }

    /// Mutable counterpart of [`member`](Self::member).
    pub fn member_mut<'v>(&self, parent: &'v mut dyn Any) -> &'v mut dyn Any {
        let mut cur = parent;
        for anc in &self.ancestors {
            cur = (anc.get_mut)(cur);
        }
        (self.prop.get_mut)(cur)
    }
}

// ---------------------------------------------------------------------------
// Type descriptors
// ---------------------------------------------------------------------------

/// Classification of a registered type.
pub enum TypeKind {
    Bool,
    Char,
    Signed(IntWidth),
    Unsigned(IntWidth),
    Float(FloatWidth),
    Str,
    Enum,
    Compound(CompoundInfo),
    Sequence(SequenceOps),
    Map(MapOps),
}

pub(crate) type ToAtomicFn = Box<dyn Fn(&dyn Any) -> AtomicValue>;
pub(crate) type FromAtomicFn = Box<dyn Fn(&mut dyn Any, &AtomicValue) -> Result<()>>;

/// Runtime metadata record describing one serializable type.
pub struct TypeDescriptor {
    pub(crate) name: String,
    pub(crate) id: u32,
    pub(crate) version: u8,
    pub(crate) accept_any_version: bool,
    pub(crate) type_id: TypeId,
    pub(crate) rust_name: &'static str,
    pub(crate) kind: TypeKind,
    pub(crate) create: fn() -> Box<dyn Any>,
    pub(crate) assign_default: fn(&mut dyn Any),
    pub(crate) make_shared: fn() -> SharedHandle,
    pub(crate) to_atomic: Option<ToAtomicFn>,
    pub(crate) from_atomic: Option<FromAtomicFn>,
}

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The Rust type this descriptor was registered for.
    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn is_compound(&self) -> bool {
        matches!(self.kind, TypeKind::Compound(_))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.kind, TypeKind::Sequence(_))
    }

    pub fn is_associative(&self) -> bool {
        matches!(self.kind, TypeKind::Map(_))
    }

    pub fn is_atomic(&self) -> bool {
        !self.is_compound() && !self.is_sequence() && !self.is_associative()
    }

    /// Instantiate a default value of this type.
    pub fn create(&self) -> Box<dyn Any> {
        (self.create)()
    }

    pub(crate) fn compound(&self) -> Option<&CompoundInfo> {
        match &self.kind {
            TypeKind::Compound(info) => Some(info),
            _ => None,
        }
    }

    /// Number of declared properties (compound types only).
    pub fn property_count(&self) -> usize {
        self.compound().map_or(0, |c| c.properties.len())
    }

    pub fn property_at(&self, index: usize) -> Option<&PropertyDescriptor> {
        self.compound().and_then(|c| c.properties.get(index))
    }

    /// Find a property by name. Linear and case-sensitive; ancestor tables
    /// are searched transparently after the own table.
    pub fn find_property<'a>(
        &'a self,
        registry: &'a Registry,
        name: &str,
    ) -> Result<Option<PropertyPath<'a>>> {
        let Some(info) = self.compound() else {
            return Ok(None);
        };
        for prop in &info.properties {
            if !prop.is_ancestor() && prop.name == name {
                return Ok(Some(PropertyPath {
                    ancestors: Vec::new(),
                    prop,
                }));
            }
        }
        for prop in &info.properties {
            if prop.is_ancestor() {
                let base = registry.lookup_type_id(prop.member_type, prop.member_type_name)?;
                if let Some(mut path) = base.find_property(registry, name)? {
                    path.ancestors.insert(0, prop);
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    }

    /// Convert a value of this type to an [`AtomicValue`].
    pub(crate) fn to_atomic(&self, value: &dyn Any) -> Result<AtomicValue> {
        match &self.to_atomic {
            Some(op) => Ok(op(value)),
            None => Err(Error::protocol(format!(
                "type '{}' has no atomic representation",
                self.name
            ))),
        }
    }

    /// Assign an [`AtomicValue`] into a value of this type.
    pub(crate) fn from_atomic(&self, dst: &mut dyn Any, value: &AtomicValue) -> Result<()> {
        match &self.from_atomic {
            Some(op) => op(dst, value),
            None => Err(Error::protocol(format!(
                "type '{}' has no atomic representation",
                self.name
            ))),
        }
    }

    /// Verify a stream version stamp against the declared version.
    pub(crate) fn check_version(&self, stream: u8) -> Result<()> {
        if self.accept_any_version || stream == self.version {
            Ok(())
        } else {
            Err(Error::VersionMismatch {
                type_name: self.name.clone(),
                expected: self.version,
                actual: stream,
            })
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("rust_name", &self.rust_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_text_preserves_nearest_representable() {
        let v = 0.1f32;
        let text = AtomicValue::F32(v).to_text();
        assert_eq!(text.parse::<f32>().unwrap(), v);
    }

    #[test]
    fn f64_text_preserves_nearest_representable() {
        let v = std::f64::consts::PI;
        let text = AtomicValue::F64(v).to_text();
        assert_eq!(text.parse::<f64>().unwrap(), v);
    }

    #[test]
    fn int_width_round_trip() {
        for w in [IntWidth::W1, IntWidth::W2, IntWidth::W4, IntWidth::W8] {
            assert_eq!(IntWidth::from_bytes(w.bytes()), Some(w));
        }
        assert_eq!(IntWidth::from_bytes(3), None);
    }

    #[test]
    fn enum_text_prefers_name() {
        let v = AtomicValue::Enum {
            name: "Red".into(),
            value: 2,
        };
        assert_eq!(v.to_text(), "Red");
        let v = AtomicValue::Enum {
            name: String::new(),
            value: 2,
        };
        assert_eq!(v.to_text(), "2");
    }
}
