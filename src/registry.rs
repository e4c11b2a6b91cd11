//! The type registry and the registration builders.
//!
//! A [`Registry`] is an explicit value constructed once by the embedding
//! application at start-up and passed into every save/load call. It maps
//! type names, numeric ids and Rust `TypeId`s to [`TypeDescriptor`]s.
//! Registration must complete before the first save or load; the registry
//! is read-only afterwards. Concurrent registration is unsupported.
//!
//! Compound types register through [`TypeBuilder`], C-like enums through
//! [`EnumBuilder`]; container instantiations register through
//! [`Registry::register_sequence`] and friends. Atomic types are
//! pre-registered by [`Registry::new`].

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::descriptor::{
    AtomicValue, CompoundInfo, FloatWidth, FromAtomicFn, IntWidth, MapOps, PropertyDescriptor,
    PropertyFlags, SequenceOps, ToAtomicFn, TypeDescriptor, TypeKind, concrete, concrete_mut,
};
use crate::error::{Error, Result};
use crate::pointer::{PointerOps, Shared, SharedHandle, WeakRef};

// ---------------------------------------------------------------------------
// Built-in numeric ids
// ---------------------------------------------------------------------------

/// Ids below this value are reserved for built-in atomic types.
pub const FIRST_USER_TYPE_ID: u32 = 0x100;

// ---------------------------------------------------------------------------
// Generic descriptor plumbing
// ---------------------------------------------------------------------------

fn create_default<T: Any + Default>() -> Box<dyn Any> {
    Box::new(T::default())
}

fn assign_default_impl<T: Any + Default>(dst: &mut dyn Any) {
    *concrete_mut::<T>(dst) = T::default();
}

fn make_shared_impl<T: Any + Default>() -> SharedHandle {
    SharedHandle::of(Rc::new(RefCell::new(T::default())))
}

fn descriptor_of<T: Any + Default>(
    name: &str,
    id: u32,
    kind: TypeKind,
    to_atomic: Option<ToAtomicFn>,
    from_atomic: Option<FromAtomicFn>,
) -> TypeDescriptor {
    TypeDescriptor {
        name: name.to_owned(),
        id,
        version: 0,
        accept_any_version: true,
        type_id: TypeId::of::<T>(),
        rust_name: type_name::<T>(),
        kind,
        create: create_default::<T>,
        assign_default: assign_default_impl::<T>,
        make_shared: make_shared_impl::<T>,
        to_atomic,
        from_atomic,
    }
}

fn kind_mismatch(expected: &str, actual: &AtomicValue) -> Error {
    Error::SchemaMismatch {
        property: String::new(),
        expected: expected.to_owned(),
        actual: actual.type_label(),
    }
}

fn width_mismatch(expected: &str, width: IntWidth, actual: &AtomicValue) -> Error {
    Error::SchemaMismatch {
        property: String::new(),
        expected: format!("{expected} ({} bytes)", width.bytes()),
        actual: actual.type_label(),
    }
}

fn parse_mismatch(expected: &str, raw: &str) -> Error {
    Error::SchemaMismatch {
        property: String::new(),
        expected: expected.to_owned(),
        actual: format!("'{raw}'"),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide mapping from type name / numeric id / Rust `TypeId` to
/// [`TypeDescriptor`].
pub struct Registry {
    types: Vec<TypeDescriptor>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<u32, usize>,
    by_type: HashMap<TypeId, usize>,
}

impl Registry {
    /// A registry with all atomic types pre-registered.
    pub fn new() -> Self {
        let mut reg = Self {
            types: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            by_type: HashMap::new(),
        };
        reg.register_builtins()
            .expect("built-in type registration cannot conflict");
        reg
    }

    fn insert(&mut self, desc: TypeDescriptor) -> Result<&TypeDescriptor> {
        if self.by_name.contains_key(&desc.name)
            || self.by_id.contains_key(&desc.id)
            || self.by_type.contains_key(&desc.type_id)
        {
            return Err(Error::DuplicateType {
                name: desc.name.clone(),
                id: desc.id,
            });
        }
        let index = self.types.len();
        self.by_name.insert(desc.name.clone(), index);
        self.by_id.insert(desc.id, index);
        self.by_type.insert(desc.type_id, index);
        self.types.push(desc);
        Ok(&self.types[index])
    }

    /// Register a compound type from its builder.
    pub fn register<T: Any + Default>(&mut self, builder: TypeBuilder<T>) -> Result<&TypeDescriptor> {
        let mut desc = descriptor_of::<T>(
            &builder.name,
            builder.id,
            TypeKind::Compound(CompoundInfo {
                properties: builder.properties,
            }),
            None,
            None,
        );
        desc.version = builder.version;
        desc.accept_any_version = builder.accept_any_version;
        self.insert(desc)
    }

    /// Register a C-like enum from its builder.
    pub fn register_enum<T>(&mut self, builder: EnumBuilder<T>) -> Result<&TypeDescriptor>
    where
        T: Any + Default + Clone + PartialEq,
    {
        let name = builder.name.clone();
        let variants = Rc::new(builder.variants);

        let vs = Rc::clone(&variants);
        let enum_name = name.clone();
        let to: ToAtomicFn = Box::new(move |any| {
            let t = concrete::<T>(any);
            for (vname, vvalue, v) in vs.iter() {
                if v == t {
                    return AtomicValue::Enum {
                        name: (*vname).to_owned(),
                        value: *vvalue,
                    };
                }
            }
            log::warn!("value of enum '{enum_name}' matches no registered variant");
            AtomicValue::Enum {
                name: String::new(),
                value: 0,
            }
        });

        let vs = Rc::clone(&variants);
        let enum_name = name.clone();
        let from: FromAtomicFn = Box::new(move |dst, val| {
            let out = concrete_mut::<T>(dst);
            let found = match val {
                AtomicValue::Enum { name, value } if !name.is_empty() => {
                    vs.iter().find(|(n, _, _)| n == name)
                }
                AtomicValue::Enum { value, .. } => vs.iter().find(|(_, v, _)| v == value),
                AtomicValue::Signed(v, _) => vs.iter().find(|(_, val, _)| val == v),
                AtomicValue::Str(s) => {
                    if let Some(v) = vs.iter().find(|(n, _, _)| *n == s.as_str()) {
                        Some(v)
                    } else if let Ok(num) = s.trim().parse::<i64>() {
                        vs.iter().find(|(_, v, _)| *v == num)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            match found {
                Some((_, _, v)) => {
                    *out = v.clone();
                    Ok(())
                }
                None => Err(Error::SchemaMismatch {
                    property: String::new(),
                    expected: format!("variant of enum '{enum_name}'"),
                    actual: val.to_text(),
                }),
            }
        });

        self.insert(descriptor_of::<T>(
            &name,
            builder.id,
            TypeKind::Enum,
            Some(to),
            Some(from),
        ))
    }

    /// Register `Vec<E>` as a sequence of plain values.
    pub fn register_sequence<E: Any + Default>(
        &mut self,
        name: &str,
        id: u32,
    ) -> Result<&TypeDescriptor> {
        self.insert(descriptor_of::<Vec<E>>(
            name,
            id,
            TypeKind::Sequence(SequenceOps {
                elem_type: TypeId::of::<E>(),
                elem_type_name: type_name::<E>(),
                elem_ops: PointerOps::value(),
                len: seq_len::<E>,
                at: seq_at::<E>,
                clear: seq_clear::<E>,
                push_default: seq_push::<E>,
            }),
            None,
            None,
        ))
    }

    /// Register `Vec<Shared<T>>` as a sequence of shared pointers.
    pub fn register_shared_sequence<T: Any + Default>(
        &mut self,
        name: &str,
        id: u32,
    ) -> Result<&TypeDescriptor> {
        self.insert(descriptor_of::<Vec<Shared<T>>>(
            name,
            id,
            TypeKind::Sequence(SequenceOps {
                elem_type: TypeId::of::<T>(),
                elem_type_name: type_name::<T>(),
                elem_ops: PointerOps::shared::<T>(),
                len: seq_len::<Shared<T>>,
                at: seq_at::<Shared<T>>,
                clear: seq_clear::<Shared<T>>,
                push_default: seq_push::<Shared<T>>,
            }),
            None,
            None,
        ))
    }

    /// Register `BTreeMap<K, V>` as an associative container.
    pub fn register_map<K, V>(&mut self, name: &str, id: u32) -> Result<&TypeDescriptor>
    where
        K: Any + Default + Ord,
        V: Any + Default,
    {
        self.insert(descriptor_of::<BTreeMap<K, V>>(
            name,
            id,
            TypeKind::Map(MapOps {
                key_type: TypeId::of::<K>(),
                key_type_name: type_name::<K>(),
                value_type: TypeId::of::<V>(),
                value_type_name: type_name::<V>(),
                visit: map_visit::<K, V>,
                clear: map_clear::<K, V>,
                insert_default: map_insert::<K, V>,
            }),
            None,
            None,
        ))
    }

    /// Bind an additional name to an already-registered descriptor.
    pub fn add_alias(&mut self, alias: &str, existing: &str) -> Result<()> {
        let index = *self
            .by_name
            .get(existing)
            .ok_or_else(|| Error::UnknownType {
                name: existing.to_owned(),
            })?;
        if self.by_name.contains_key(alias) {
            return Err(Error::DuplicateType {
                name: alias.to_owned(),
                id: self.types[index].id,
            });
        }
        self.by_name.insert(alias.to_owned(), index);
        Ok(())
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name.get(name).map(|&i| &self.types[i])
    }

    pub fn lookup_by_id(&self, id: u32) -> Option<&TypeDescriptor> {
        self.by_id.get(&id).map(|&i| &self.types[i])
    }

    /// Look up the descriptor registered for a Rust type.
    pub fn lookup<T: Any>(&self) -> Option<&TypeDescriptor> {
        self.by_type.get(&TypeId::of::<T>()).map(|&i| &self.types[i])
    }

    /// Like [`lookup`](Self::lookup) by raw `TypeId`; a missing entry is an
    /// error naming the Rust type.
    pub(crate) fn lookup_type_id(
        &self,
        type_id: TypeId,
        rust_name: &str,
    ) -> Result<&TypeDescriptor> {
        self.by_type
            .get(&type_id)
            .map(|&i| &self.types[i])
            .ok_or_else(|| Error::UnknownType {
                name: rust_name.to_owned(),
            })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    // -- built-in atomics ---------------------------------------------------

    fn register_builtins(&mut self) -> Result<()> {
        macro_rules! int_type {
            ($t:ty, $name:literal, $id:expr, $w:expr, Signed) => {{
                let to: ToAtomicFn =
                    Box::new(|any| AtomicValue::Signed(*concrete::<$t>(any) as i64, $w));
                let from: FromAtomicFn = Box::new(|dst, val| {
                    let out = concrete_mut::<$t>(dst);
                    match val {
                        AtomicValue::Signed(v, w) => {
                            if *w != $w {
                                return Err(width_mismatch($name, $w, val));
                            }
                            *out = <$t>::try_from(*v)
                                .map_err(|_| parse_mismatch($name, &v.to_string()))?;
                            Ok(())
                        }
                        AtomicValue::Str(s) => {
                            *out = s.trim().parse::<$t>().map_err(|_| parse_mismatch($name, s))?;
                            Ok(())
                        }
                        other => Err(kind_mismatch($name, other)),
                    }
                });
                self.insert(descriptor_of::<$t>(
                    $name,
                    $id,
                    TypeKind::Signed($w),
                    Some(to),
                    Some(from),
                ))?;
            }};
            ($t:ty, $name:literal, $id:expr, $w:expr, Unsigned) => {{
                let to: ToAtomicFn =
                    Box::new(|any| AtomicValue::Unsigned(*concrete::<$t>(any) as u64, $w));
                let from: FromAtomicFn = Box::new(|dst, val| {
                    let out = concrete_mut::<$t>(dst);
                    match val {
                        AtomicValue::Unsigned(v, w) => {
                            if *w != $w {
                                return Err(width_mismatch($name, $w, val));
                            }
                            *out = <$t>::try_from(*v)
                                .map_err(|_| parse_mismatch($name, &v.to_string()))?;
                            Ok(())
                        }
                        AtomicValue::Str(s) => {
                            *out = s.trim().parse::<$t>().map_err(|_| parse_mismatch($name, s))?;
                            Ok(())
                        }
                        other => Err(kind_mismatch($name, other)),
                    }
                });
                self.insert(descriptor_of::<$t>(
                    $name,
                    $id,
                    TypeKind::Unsigned($w),
                    Some(to),
                    Some(from),
                ))?;
            }};
        }

        int_type!(i8, "i8", 3, IntWidth::W1, Signed);
        int_type!(i16, "i16", 4, IntWidth::W2, Signed);
        int_type!(i32, "i32", 5, IntWidth::W4, Signed);
        int_type!(i64, "i64", 6, IntWidth::W8, Signed);
        int_type!(u8, "u8", 7, IntWidth::W1, Unsigned);
        int_type!(u16, "u16", 8, IntWidth::W2, Unsigned);
        int_type!(u32, "u32", 9, IntWidth::W4, Unsigned);
        int_type!(u64, "u64", 10, IntWidth::W8, Unsigned);

        // bool
        {
            let to: ToAtomicFn = Box::new(|any| AtomicValue::Bool(*concrete::<bool>(any)));
            let from: FromAtomicFn = Box::new(|dst, val| {
                let out = concrete_mut::<bool>(dst);
                match val {
                    AtomicValue::Bool(v) => {
                        *out = *v;
                        Ok(())
                    }
                    AtomicValue::Str(s) => match s.trim() {
                        "true" | "1" => {
                            *out = true;
                            Ok(())
                        }
                        "false" | "0" => {
                            *out = false;
                            Ok(())
                        }
                        _ => Err(parse_mismatch("bool", s)),
                    },
                    other => Err(kind_mismatch("bool", other)),
                }
            });
            self.insert(descriptor_of::<bool>(
                "bool",
                1,
                TypeKind::Bool,
                Some(to),
                Some(from),
            ))?;
        }

        // char
        {
            let to: ToAtomicFn = Box::new(|any| AtomicValue::Char(*concrete::<char>(any)));
            let from: FromAtomicFn = Box::new(|dst, val| {
                let out = concrete_mut::<char>(dst);
                match val {
                    AtomicValue::Char(c) => {
                        *out = *c;
                        Ok(())
                    }
                    AtomicValue::Str(s) => {
                        let mut chars = s.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => {
                                *out = c;
                                Ok(())
                            }
                            _ => Err(parse_mismatch("char", s)),
                        }
                    }
                    other => Err(kind_mismatch("char", other)),
                }
            });
            self.insert(descriptor_of::<char>(
                "char",
                2,
                TypeKind::Char,
                Some(to),
                Some(from),
            ))?;
        }

        // floats
        {
            let to: ToAtomicFn = Box::new(|any| AtomicValue::F32(*concrete::<f32>(any)));
            let from: FromAtomicFn = Box::new(|dst, val| {
                let out = concrete_mut::<f32>(dst);
                match val {
                    AtomicValue::F32(v) => {
                        *out = *v;
                        Ok(())
                    }
                    AtomicValue::Str(s) => {
                        *out = s.trim().parse::<f32>().map_err(|_| parse_mismatch("f32", s))?;
                        Ok(())
                    }
                    other => Err(kind_mismatch("f32", other)),
                }
            });
            self.insert(descriptor_of::<f32>(
                "f32",
                11,
                TypeKind::Float(FloatWidth::W4),
                Some(to),
                Some(from),
            ))?;
        }
        {
            let to: ToAtomicFn = Box::new(|any| AtomicValue::F64(*concrete::<f64>(any)));
            let from: FromAtomicFn = Box::new(|dst, val| {
                let out = concrete_mut::<f64>(dst);
                match val {
                    AtomicValue::F64(v) => {
                        *out = *v;
                        Ok(())
                    }
                    AtomicValue::Str(s) => {
                        *out = s.trim().parse::<f64>().map_err(|_| parse_mismatch("f64", s))?;
                        Ok(())
                    }
                    other => Err(kind_mismatch("f64", other)),
                }
            });
            self.insert(descriptor_of::<f64>(
                "f64",
                12,
                TypeKind::Float(FloatWidth::W8),
                Some(to),
                Some(from),
            ))?;
        }

        // string
        {
            let to: ToAtomicFn = Box::new(|any| AtomicValue::Str(concrete::<String>(any).clone()));
            let from: FromAtomicFn = Box::new(|dst, val| {
                let out = concrete_mut::<String>(dst);
                match val {
                    AtomicValue::Str(s) => {
                        *out = s.clone();
                        Ok(())
                    }
                    other => Err(kind_mismatch("string", other)),
                }
            });
            self.insert(descriptor_of::<String>(
                "string",
                13,
                TypeKind::Str,
                Some(to),
                Some(from),
            ))?;
        }

        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// --- container operation impls ---------------------------------------------

fn seq_len<E: Any>(any: &dyn Any) -> usize {
    concrete::<Vec<E>>(any).len()
}

fn seq_at<E: Any>(any: &dyn Any, index: usize) -> &dyn Any {
    &concrete::<Vec<E>>(any)[index]
}

fn seq_clear<E: Any>(any: &mut dyn Any) {
    concrete_mut::<Vec<E>>(any).clear();
}

fn seq_push<E: Any + Default>(any: &mut dyn Any) -> &mut dyn Any {
    let v = concrete_mut::<Vec<E>>(any);
    v.push(E::default());
    v.last_mut().expect("element was just pushed")
}

fn map_visit<K: Any + Ord, V: Any>(
    any: &dyn Any,
    f: &mut dyn FnMut(&dyn Any, &dyn Any) -> Result<()>,
) -> Result<()> {
    for (k, v) in concrete::<BTreeMap<K, V>>(any) {
        f(k, v)?;
    }
    Ok(())
}

fn map_clear<K: Any + Ord, V: Any>(any: &mut dyn Any) {
    concrete_mut::<BTreeMap<K, V>>(any).clear();
}

fn map_insert<K: Any + Ord, V: Any + Default>(
    any: &mut dyn Any,
    key: Box<dyn Any>,
) -> Result<&mut dyn Any> {
    let m = concrete_mut::<BTreeMap<K, V>>(any);
    let key = key
        .downcast::<K>()
        .map_err(|_| Error::protocol("map key has the wrong concrete type"))?;
    Ok(m.entry(*key).or_insert_with(V::default))
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn erase_get<T: Any, M: Any>(get: fn(&T) -> &M) -> crate::descriptor::GetFn {
    Box::new(move |any: &dyn Any| -> &dyn Any { get(concrete::<T>(any)) })
}

fn erase_get_mut<T: Any, M: Any>(get_mut: fn(&mut T) -> &mut M) -> crate::descriptor::GetMutFn {
    Box::new(move |any: &mut dyn Any| -> &mut dyn Any { get_mut(concrete_mut::<T>(any)) })
}

/// Builder for a compound type's descriptor and property table.
///
/// Each serializable struct declares its property table once:
///
/// ```ignore
/// registry.register(
///     TypeBuilder::<Transform>::new("Transform", 0x101)
///         .version(1)
///         .property("x", PropertyFlags::empty(), |t: &Transform| &t.x, |t| &mut t.x)
///         .shared("parent", PropertyFlags::empty(), |t: &Transform| &t.parent, |t| &mut t.parent),
/// )?;
/// ```
pub struct TypeBuilder<T> {
    name: String,
    id: u32,
    version: u8,
    accept_any_version: bool,
    properties: Vec<PropertyDescriptor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Default> TypeBuilder<T> {
    pub fn new(name: &str, id: u32) -> Self {
        Self {
            name: name.to_owned(),
            id,
            version: 0,
            accept_any_version: false,
            properties: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Declare the type's version stamp.
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Opt out of version verification on load.
    pub fn accept_any_version(mut self) -> Self {
        self.accept_any_version = true;
        self
    }

    fn push<M: Any>(
        mut self,
        name: &str,
        flags: PropertyFlags,
        ops: PointerOps,
        default: Option<crate::descriptor::DefaultFn>,
        get: crate::descriptor::GetFn,
        get_mut: crate::descriptor::GetMutFn,
    ) -> Self {
        self.properties.push(PropertyDescriptor {
            name: name.to_owned(),
            flags,
            member_type: TypeId::of::<M>(),
            member_type_name: type_name::<M>(),
            ops,
            default,
            get,
            get_mut,
        });
        self
    }

    /// A plain value member.
    pub fn property<M: Any>(
        self,
        name: &str,
        flags: PropertyFlags,
        get: fn(&T) -> &M,
        get_mut: fn(&mut T) -> &mut M,
    ) -> Self {
        self.push::<M>(
            name,
            flags,
            PointerOps::value(),
            None,
            erase_get(get),
            erase_get_mut(get_mut),
        )
    }

    /// A plain value member with a declared default, applied when the
    /// property is absent from the input.
    pub fn property_default<M: Any + Clone>(
        self,
        name: &str,
        flags: PropertyFlags,
        default: M,
        get: fn(&T) -> &M,
        get_mut: fn(&mut T) -> &mut M,
    ) -> Self {
        let default_fn: crate::descriptor::DefaultFn = Box::new(move |slot: &mut dyn Any| {
            *concrete_mut::<M>(slot) = default.clone();
        });
        self.push::<M>(
            name,
            flags,
            PointerOps::value(),
            Some(default_fn),
            erase_get(get),
            erase_get_mut(get_mut),
        )
    }

    /// A `Shared<M>` member.
    pub fn shared<M: Any + Default>(
        self,
        name: &str,
        flags: PropertyFlags,
        get: fn(&T) -> &Shared<M>,
        get_mut: fn(&mut T) -> &mut Shared<M>,
    ) -> Self {
        self.push::<M>(
            name,
            flags,
            PointerOps::shared::<M>(),
            None,
            erase_get(get),
            erase_get_mut(get_mut),
        )
    }

    /// A `WeakRef<M>` member.
    pub fn weak<M: Any + Default>(
        self,
        name: &str,
        flags: PropertyFlags,
        get: fn(&T) -> &WeakRef<M>,
        get_mut: fn(&mut T) -> &mut WeakRef<M>,
    ) -> Self {
        self.push::<M>(
            name,
            flags,
            PointerOps::weak::<M>(),
            None,
            erase_get(get),
            erase_get_mut(get_mut),
        )
    }

    /// A `Box<M>` member.
    pub fn unique<M: Any + Default>(
        self,
        name: &str,
        flags: PropertyFlags,
        get: fn(&T) -> &Box<M>,
        get_mut: fn(&mut T) -> &mut Box<M>,
    ) -> Self {
        self.push::<M>(
            name,
            flags,
            PointerOps::unique::<M>(),
            None,
            erase_get(get),
            erase_get_mut(get_mut),
        )
    }

    /// An `Option<M>` member.
    pub fn optional<M: Any + Default>(
        self,
        name: &str,
        flags: PropertyFlags,
        get: fn(&T) -> &Option<M>,
        get_mut: fn(&mut T) -> &mut Option<M>,
    ) -> Self {
        self.push::<M>(
            name,
            flags,
            PointerOps::optional::<M>(),
            None,
            erase_get(get),
            erase_get_mut(get_mut),
        )
    }

    /// An embedded base type whose properties are flattened into this
    /// type's record. Inserted at the front of the table.
    pub fn inherit<B: Any + Default>(
        mut self,
        get: fn(&T) -> &B,
        get_mut: fn(&mut T) -> &mut B,
    ) -> Self {
        self.properties.insert(
            0,
            PropertyDescriptor {
                name: String::new(),
                flags: PropertyFlags::ANCESTOR,
                member_type: TypeId::of::<B>(),
                member_type_name: type_name::<B>(),
                ops: PointerOps::value(),
                default: None,
                get: erase_get(get),
                get_mut: erase_get_mut(get_mut),
            },
        );
        self
    }
}

/// Builder for a C-like enum's descriptor.
pub struct EnumBuilder<T> {
    name: String,
    id: u32,
    variants: Vec<(&'static str, i64, T)>,
}

impl<T: Any + Default + Clone + PartialEq> EnumBuilder<T> {
    pub fn new(name: &str, id: u32) -> Self {
        Self {
            name: name.to_owned(),
            id,
            variants: Vec::new(),
        }
    }

    pub fn variant(mut self, name: &'static str, value: i64, instance: T) -> Self {
        self.variants.push((name, value, instance));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, PartialEq, Debug)]
    struct Base {
        id: u32,
    }

    #[derive(Default, PartialEq, Debug)]
    struct Derived {
        base: Base,
        label: String,
    }

    fn test_registry() -> Registry {
        let mut reg = Registry::new();
        reg.register(
            TypeBuilder::<Base>::new("Base", 0x100).property(
                "id",
                PropertyFlags::empty(),
                |b: &Base| &b.id,
                |b| &mut b.id,
            ),
        )
        .unwrap();
        reg.register(
            TypeBuilder::<Derived>::new("Derived", 0x101)
                .inherit(|d: &Derived| &d.base, |d| &mut d.base)
                .property(
                    "label",
                    PropertyFlags::empty(),
                    |d: &Derived| &d.label,
                    |d| &mut d.label,
                ),
        )
        .unwrap();
        reg
    }

    #[test]
    fn builtins_are_registered() {
        let reg = Registry::new();
        assert!(reg.lookup::<i32>().is_some());
        assert!(reg.lookup::<String>().is_some());
        assert_eq!(reg.lookup_by_name("f64").unwrap().name(), "f64");
        assert!(reg.lookup_by_id(1).is_some());
        assert_eq!(
            reg.lookup::<i32>().unwrap().rust_name(),
            std::any::type_name::<i32>()
        );
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = Registry::new();
        reg.register(TypeBuilder::<Base>::new("Base", 0x100))
            .unwrap();
        let err = reg
            .register(TypeBuilder::<Derived>::new("Base", 0x101))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateType { .. }));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut reg = Registry::new();
        reg.register(TypeBuilder::<Base>::new("Base", 0x100))
            .unwrap();
        let err = reg
            .register(TypeBuilder::<Derived>::new("Derived", 0x100))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateType { .. }));
    }

    #[test]
    fn alias_resolves_to_same_descriptor() {
        let mut reg = test_registry();
        reg.add_alias("BaseObject", "Base").unwrap();
        assert_eq!(
            reg.lookup_by_name("BaseObject").unwrap().id(),
            reg.lookup_by_name("Base").unwrap().id()
        );
        assert!(reg.add_alias("Derived", "Base").is_err());
    }

    #[test]
    fn find_property_searches_ancestors() {
        let reg = test_registry();
        let derived = reg.lookup::<Derived>().unwrap();

        let own = derived.find_property(&reg, "label").unwrap().unwrap();
        assert!(own.ancestors.is_empty());

        let inherited = derived.find_property(&reg, "id").unwrap().unwrap();
        assert_eq!(inherited.ancestors.len(), 1);

        let mut d = Derived {
            base: Base { id: 7 },
            label: "x".into(),
        };
        let slot = inherited.member(&d);
        assert_eq!(*slot.downcast_ref::<u32>().unwrap(), 7);
        *inherited.member_mut(&mut d).downcast_mut::<u32>().unwrap() = 9;
        assert_eq!(d.base.id, 9);
    }

    #[test]
    fn enum_round_trips_by_name_and_value() {
        #[derive(Default, Clone, PartialEq, Debug)]
        enum Color {
            #[default]
            Red,
            Green,
        }
        let mut reg = Registry::new();
        reg.register_enum(
            EnumBuilder::<Color>::new("Color", 0x100)
                .variant("Red", 0, Color::Red)
                .variant("Green", 1, Color::Green),
        )
        .unwrap();
        let desc = reg.lookup::<Color>().unwrap();

        let atomic = desc.to_atomic(&Color::Green).unwrap();
        assert_eq!(
            atomic,
            AtomicValue::Enum {
                name: "Green".into(),
                value: 1
            }
        );

        let mut c = Color::Red;
        desc.from_atomic(&mut c, &AtomicValue::Str("Green".into()))
            .unwrap();
        assert_eq!(c, Color::Green);
        desc.from_atomic(&mut c, &AtomicValue::Signed(0, IntWidth::W4))
            .unwrap();
        assert_eq!(c, Color::Red);
        assert!(
            desc.from_atomic(&mut c, &AtomicValue::Str("Blue".into()))
                .is_err()
        );
    }

    #[test]
    fn int_width_mismatch_is_schema_error() {
        let reg = Registry::new();
        let desc = reg.lookup::<i16>().unwrap();
        let mut v = 0i16;
        let err = desc
            .from_atomic(&mut v, &AtomicValue::Signed(5, IntWidth::W4))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        desc.from_atomic(&mut v, &AtomicValue::Signed(5, IntWidth::W2))
            .unwrap();
        assert_eq!(v, 5);
    }

    #[test]
    fn sequence_ops_grow_and_index() {
        let mut reg = Registry::new();
        reg.register_sequence::<i32>("vec_i32", 0x100).unwrap();
        let desc = reg.lookup::<Vec<i32>>().unwrap();
        let TypeKind::Sequence(ops) = desc.kind() else {
            panic!("expected sequence kind");
        };

        let mut v: Vec<i32> = Vec::new();
        {
            let slot = (ops.push_default)(&mut v);
            *slot.downcast_mut::<i32>().unwrap() = 4;
        }
        assert_eq!((ops.len)(&v), 1);
        assert_eq!((ops.at)(&v, 0).downcast_ref::<i32>(), Some(&4));
        (ops.clear)(&mut v);
        assert!(v.is_empty());
    }

    #[test]
    fn map_ops_insert_and_visit() {
        let mut reg = Registry::new();
        reg.register_map::<String, i32>("map_string_i32", 0x100)
            .unwrap();
        let desc = reg.lookup::<BTreeMap<String, i32>>().unwrap();
        let TypeKind::Map(ops) = desc.kind() else {
            panic!("expected map kind");
        };

        let mut m: BTreeMap<String, i32> = BTreeMap::new();
        {
            let slot = (ops.insert_default)(&mut m, Box::new(String::from("a"))).unwrap();
            *slot.downcast_mut::<i32>().unwrap() = 1;
        }
        assert_eq!(m.len(), 1);
        let mut seen = Vec::new();
        (ops.visit)(&m, &mut |k, v| {
            seen.push((
                k.downcast_ref::<String>().unwrap().clone(),
                *v.downcast_ref::<i32>().unwrap(),
            ));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![("a".to_string(), 1)]);
    }
}
