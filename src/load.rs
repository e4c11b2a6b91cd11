//! Format-independent load applier.
//!
//! [`Loader`] pulls [`ParseEvent`]s from a [`FormatParser`] and applies
//! them in place onto a destination value through its descriptors.
//! Loading is tolerant of unknown properties (skipped with a warning) and
//! strict about types: schema mismatches, missing required properties and
//! version conflicts abort the call.
//!
//! Pointer records are reconciled through the
//! [`LoadResolver`](crate::resolver::LoadResolver); after the root value,
//! remaining top-level records are parsed into their placeholders, and any
//! address that never received a record is a dangling reference.

use std::any::Any;
use std::collections::HashSet;

use crate::descriptor::{AtomicValue, MapOps, SequenceOps, TypeDescriptor, TypeKind};
use crate::error::{Error, Result};
use crate::formats::{FormatParser, OwnedMeta, ParseEvent};
use crate::iter::PropertyIter;
use crate::pointer::PointerOps;
use crate::registry::Registry;
use crate::resolver::LoadResolver;
use crate::save::name_property;

pub(crate) struct Loader<'a> {
    registry: &'a Registry,
    resolver: LoadResolver,
}

impl<'a> Loader<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            resolver: LoadResolver::new(),
        }
    }

    /// Load the root record into `dst`, then drain trailing records.
    pub fn load_root(
        &mut self,
        parser: &mut dyn FormatParser,
        dst: &mut dyn Any,
        desc: &TypeDescriptor,
    ) -> Result<()> {
        let event = parser.next_event()?;
        if matches!(event, ParseEvent::End) {
            return Err(Error::protocol("stream contains no root record"));
        }
        if let Some(meta) = event.meta() {
            self.check_meta(meta, desc)?;
        }
        self.apply(parser, event, dst, desc)?;
        self.drain_trailing(parser)?;
        self.resolver.finish()
    }

    /// Load a stream whose root type is taken from the stream itself.
    pub fn load_any(
        &mut self,
        parser: &mut dyn FormatParser,
    ) -> Result<(Box<dyn Any>, &'a TypeDescriptor)> {
        let event = parser.next_event()?;
        if matches!(event, ParseEvent::End) {
            return Err(Error::protocol("stream contains no root record"));
        }
        let meta = event.meta().cloned().unwrap_or_default();
        let type_name = meta
            .type_name
            .as_deref()
            .ok_or_else(|| Error::protocol("root record carries no type annotation"))?;
        let desc = self
            .registry
            .lookup_by_name(type_name)
            .ok_or_else(|| Error::UnknownType {
                name: type_name.to_owned(),
            })?;
        if let Some(version) = meta.version {
            desc.check_version(version)?;
        }
        let mut value = desc.create();
        self.apply(parser, event, value.as_mut(), desc)?;
        self.drain_trailing(parser)?;
        self.resolver.finish()?;
        Ok((value, desc))
    }

    /// Verify an item's type and version annotations against the expected
    /// descriptor. Aliases resolve to the same descriptor and pass.
    fn check_meta(&self, meta: &OwnedMeta, desc: &TypeDescriptor) -> Result<()> {
        if let Some(type_name) = &meta.type_name {
            match self.registry.lookup_by_name(type_name) {
                Some(found) if found.id() == desc.id() => {}
                Some(found) => {
                    return Err(Error::SchemaMismatch {
                        property: meta.property_name.clone(),
                        expected: desc.name().to_owned(),
                        actual: found.name().to_owned(),
                    });
                }
                None => {
                    return Err(Error::UnknownType {
                        name: type_name.clone(),
                    });
                }
            }
        }
        if let Some(version) = meta.version {
            desc.check_version(version)?;
        }
        Ok(())
    }

    /// Records after the root value define forward-referenced objects.
    fn drain_trailing(&mut self, parser: &mut dyn FormatParser) -> Result<()> {
        loop {
            let event = parser.next_event()?;
            if matches!(event, ParseEvent::End) {
                return Ok(());
            }
            let meta = event.meta().cloned().unwrap_or_default();
            let address = meta
                .address
                .ok_or_else(|| Error::protocol("top-level record carries no address"))?;
            let type_name = meta
                .type_name
                .as_deref()
                .ok_or_else(|| Error::protocol("addressed record carries no type annotation"))?;
            let desc = self
                .registry
                .lookup_by_name(type_name)
                .ok_or_else(|| Error::UnknownType {
                    name: type_name.to_owned(),
                })?;
            if let Some(version) = meta.version {
                desc.check_version(version)?;
            }
            let handle = self.resolver.define(address, || (desc.make_shared)())?;
            if handle.type_id() != desc.type_id() {
                return Err(Error::SchemaMismatch {
                    property: address.to_string(),
                    expected: desc.name().to_owned(),
                    actual: handle.type_name().to_owned(),
                });
            }
            let mut guard = handle.borrow_mut()?;
            self.apply(parser, event, &mut *guard, desc)?;
        }
    }

    /// Apply one item onto a value of a known type.
    fn apply(
        &mut self,
        parser: &mut dyn FormatParser,
        event: ParseEvent,
        dst: &mut dyn Any,
        desc: &TypeDescriptor,
    ) -> Result<()> {
        match event {
            ParseEvent::Null(_) => {
                (desc.assign_default)(dst);
                Ok(())
            }
            ParseEvent::Atomic(_, value) if desc.is_atomic() => desc.from_atomic(dst, &value),
            ParseEvent::BlockBegin(_) if desc.is_compound() => {
                self.apply_compound(parser, dst, desc)
            }
            // A block-shaped item with named entries also loads into a map:
            // the indented-mapping syntax has no separate pair markers.
            ParseEvent::BlockBegin(_) => match desc.kind() {
                TypeKind::Map(ops) => self.apply_map_named(parser, dst, ops),
                _ => Err(unexpected(desc, "block")),
            },
            ParseEvent::ListBegin(_) => match desc.kind() {
                TypeKind::Sequence(ops) => self.apply_sequence(parser, dst, ops),
                _ => Err(unexpected(desc, "list")),
            },
            ParseEvent::MapBegin(_) => match desc.kind() {
                TypeKind::Map(ops) => self.apply_map_pairs(parser, dst, ops),
                _ => Err(unexpected(desc, "map")),
            },
            ParseEvent::Pointer(_, _) => Err(unexpected(desc, "reference")),
            ParseEvent::End => Err(Error::protocol("unexpected end of stream")),
            other => Err(unexpected(desc, other.describe())),
        }
    }

    fn apply_compound(
        &mut self,
        parser: &mut dyn FormatParser,
        dst: &mut dyn Any,
        desc: &TypeDescriptor,
    ) -> Result<()> {
        let mut seen: HashSet<String> = HashSet::new();
        loop {
            let event = parser.next_event()?;
            match event {
                ParseEvent::BlockEnd => break,
                ParseEvent::End => return Err(Error::protocol("unterminated record")),
                event => {
                    let meta = event.meta().cloned().unwrap_or_default();
                    if meta.property_name.is_empty() {
                        return Err(Error::protocol(format!(
                            "unnamed item inside record of '{}'",
                            desc.name()
                        )));
                    }
                    let name = meta.property_name.clone();
                    match desc.find_property(self.registry, &name)? {
                        None => {
                            let (file, line) = parser.position();
                            log::warn!(
                                "{file}({line}): unknown property '{name}' in '{}', skipping",
                                desc.name()
                            );
                            skip_subtree(parser, &event)?;
                        }
                        Some(path) if path.property().is_read_only() => {
                            log::debug!(
                                "property '{name}' in '{}' is read-only, skipping",
                                desc.name()
                            );
                            skip_subtree(parser, &event)?;
                        }
                        Some(path) => {
                            let prop = path.property();
                            let slot = path.member_mut(dst);
                            self.apply_slot(parser, event, slot, prop.pointer_ops(), prop)
                                .map_err(|e| name_property(e, &name))?;
                            seen.insert(name);
                        }
                    }
                }
            }
        }
        self.finish_compound(dst, desc, &seen)
    }

    /// Defaults and required-property checks after a record closes.
    fn finish_compound(
        &mut self,
        dst: &mut dyn Any,
        desc: &TypeDescriptor,
        seen: &HashSet<String>,
    ) -> Result<()> {
        let mut iter = PropertyIter::new(self.registry, desc)?;
        while let Some(path) = iter.current() {
            let prop = path.property();
            if !seen.contains(prop.name()) && !prop.is_read_only() {
                if prop.is_required() {
                    return Err(Error::MissingProperty {
                        property: prop.name().to_owned(),
                        type_name: desc.name().to_owned(),
                    });
                }
                if let Some(default) = &prop.default {
                    default(path.member_mut(dst));
                }
            }
            iter.advance();
        }
        Ok(())
    }

    fn apply_sequence(
        &mut self,
        parser: &mut dyn FormatParser,
        dst: &mut dyn Any,
        ops: &SequenceOps,
    ) -> Result<()> {
        (ops.clear)(dst);
        loop {
            let event = parser.next_event()?;
            match event {
                ParseEvent::ListEnd => return Ok(()),
                ParseEvent::End => return Err(Error::protocol("unterminated list")),
                event => {
                    let slot = (ops.push_default)(dst);
                    self.apply_slot_ops(
                        parser,
                        event,
                        slot,
                        &ops.elem_ops,
                        ops.elem_type,
                        ops.elem_type_name,
                    )?;
                }
            }
        }
    }

    /// Map in pair form: alternating unnamed key and value items.
    fn apply_map_pairs(
        &mut self,
        parser: &mut dyn FormatParser,
        dst: &mut dyn Any,
        ops: &MapOps,
    ) -> Result<()> {
        let key_desc = self.registry.lookup_type_id(ops.key_type, ops.key_type_name)?;
        let value_desc = self
            .registry
            .lookup_type_id(ops.value_type, ops.value_type_name)?;
        (ops.clear)(dst);
        loop {
            let event = parser.next_event()?;
            match event {
                ParseEvent::MapEnd => return Ok(()),
                ParseEvent::End => return Err(Error::protocol("unterminated map")),
                key_event => {
                    let mut key = key_desc.create();
                    self.apply(parser, key_event, key.as_mut(), key_desc)?;
                    let value_event = parser.next_event()?;
                    if matches!(value_event, ParseEvent::MapEnd | ParseEvent::End) {
                        return Err(Error::protocol("map entry is missing its value"));
                    }
                    let slot = (ops.insert_default)(dst, key)?;
                    self.apply(parser, value_event, slot, value_desc)?;
                }
            }
        }
    }

    /// Map in block form: named entries whose property names are the keys.
    fn apply_map_named(
        &mut self,
        parser: &mut dyn FormatParser,
        dst: &mut dyn Any,
        ops: &MapOps,
    ) -> Result<()> {
        let key_desc = self.registry.lookup_type_id(ops.key_type, ops.key_type_name)?;
        let value_desc = self
            .registry
            .lookup_type_id(ops.value_type, ops.value_type_name)?;
        (ops.clear)(dst);
        loop {
            let event = parser.next_event()?;
            match event {
                ParseEvent::BlockEnd => return Ok(()),
                ParseEvent::End => return Err(Error::protocol("unterminated map")),
                event => {
                    let meta = event.meta().cloned().unwrap_or_default();
                    let mut key = key_desc.create();
                    key_desc
                        .from_atomic(key.as_mut(), &AtomicValue::Str(meta.property_name.clone()))
                        .map_err(|e| name_property(e, &meta.property_name))?;
                    let slot = (ops.insert_default)(dst, key)?;
                    self.apply(parser, event, slot, value_desc)?;
                }
            }
        }
    }

    fn apply_slot(
        &mut self,
        parser: &mut dyn FormatParser,
        event: ParseEvent,
        slot: &mut dyn Any,
        ops: &PointerOps,
        prop: &crate::descriptor::PropertyDescriptor,
    ) -> Result<()> {
        self.apply_slot_ops(
            parser,
            event,
            slot,
            ops,
            prop.member_type,
            prop.member_type_name,
        )
    }

    /// Apply one item onto a member slot, dispatching on its pointer
    /// strategy.
    fn apply_slot_ops(
        &mut self,
        parser: &mut dyn FormatParser,
        event: ParseEvent,
        slot: &mut dyn Any,
        ops: &PointerOps,
        member_type: std::any::TypeId,
        member_type_name: &'static str,
    ) -> Result<()> {
        match ops {
            PointerOps::Value => {
                let desc = self.registry.lookup_type_id(member_type, member_type_name)?;
                if let Some(meta) = event.meta() {
                    self.check_meta(meta, desc)?;
                }
                self.apply(parser, event, slot, desc)
            }
            PointerOps::Shared(s) => match event {
                ParseEvent::Pointer(_, address) => {
                    let handle = self.resolver.reference(address, s.placeholder)?;
                    (s.assign)(slot, &handle)
                }
                ParseEvent::Null(_) => {
                    (s.clear)(slot);
                    Ok(())
                }
                event => {
                    let desc = self.registry.lookup_type_id(member_type, member_type_name)?;
                    let meta = event.meta().cloned().unwrap_or_default();
                    self.check_meta(&meta, desc)?;
                    // A null slot gets a fresh allocation to load into.
                    let own = (s.handle)(&*slot).unwrap_or_else(|| (s.placeholder)());
                    let handle = match meta.address {
                        Some(address) => self.resolver.define(address, move || own)?,
                        None => own,
                    };
                    if handle.type_id() != desc.type_id() {
                        return Err(Error::SchemaMismatch {
                            property: String::new(),
                            expected: desc.name().to_owned(),
                            actual: handle.type_name().to_owned(),
                        });
                    }
                    (s.assign)(slot, &handle)?;
                    let mut guard = handle.borrow_mut()?;
                    self.apply(parser, event, &mut *guard, desc)
                }
            },
            PointerOps::Weak(w) => match event {
                ParseEvent::Null(_) => {
                    (w.clear)(slot);
                    Ok(())
                }
                ParseEvent::Pointer(_, address) => {
                    let handle = self.resolver.reference(address, w.placeholder)?;
                    (w.assign)(slot, &handle)
                }
                other => Err(Error::SchemaMismatch {
                    property: String::new(),
                    expected: "reference or null".to_owned(),
                    actual: other.describe().to_owned(),
                }),
            },
            PointerOps::Unique(u) => match event {
                ParseEvent::Null(_) => {
                    let desc = self.registry.lookup_type_id(member_type, member_type_name)?;
                    (desc.assign_default)((u.deref_mut)(slot));
                    Ok(())
                }
                ParseEvent::Pointer(_, _) => Err(Error::protocol(
                    "uniquely owned member cannot be loaded from a reference",
                )),
                event => {
                    let desc = self.registry.lookup_type_id(member_type, member_type_name)?;
                    let meta = event.meta().cloned().unwrap_or_default();
                    self.check_meta(&meta, desc)?;
                    if let Some(address) = meta.address {
                        self.resolver.record_unique(address)?;
                    }
                    self.apply(parser, event, (u.deref_mut)(slot), desc)
                }
            },
            PointerOps::Optional(o) => match event {
                ParseEvent::Null(_) => {
                    (o.clear)(slot);
                    Ok(())
                }
                event => {
                    let desc = self.registry.lookup_type_id(member_type, member_type_name)?;
                    if let Some(meta) = event.meta() {
                        self.check_meta(meta, desc)?;
                    }
                    let inner = (o.set_default)(slot);
                    self.apply(parser, event, inner, desc)
                }
            },
        }
    }
}

fn unexpected(desc: &TypeDescriptor, found: &str) -> Error {
    Error::SchemaMismatch {
        property: String::new(),
        expected: desc.name().to_owned(),
        actual: found.to_owned(),
    }
}

/// Consume the remainder of an item whose opening event has been read.
fn skip_subtree(parser: &mut dyn FormatParser, opening: &ParseEvent) -> Result<()> {
    let mut depth = match opening {
        ParseEvent::BlockBegin(_) | ParseEvent::ListBegin(_) | ParseEvent::MapBegin(_) => 1usize,
        _ => return Ok(()),
    };
    while depth > 0 {
        match parser.next_event()? {
            ParseEvent::BlockBegin(_) | ParseEvent::ListBegin(_) | ParseEvent::MapBegin(_) => {
                depth += 1;
            }
            ParseEvent::BlockEnd | ParseEvent::ListEnd | ParseEvent::MapEnd => depth -= 1,
            ParseEvent::End => return Err(Error::protocol("unterminated item while skipping")),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{IntWidth, PropertyFlags};
    use crate::formats::OwnedMeta;
    use crate::pointer::Shared;
    use crate::registry::TypeBuilder;
    use std::collections::VecDeque;

    struct EventParser {
        events: VecDeque<ParseEvent>,
    }

    impl EventParser {
        fn new(events: Vec<ParseEvent>) -> Self {
            Self {
                events: events.into(),
            }
        }
    }

    impl FormatParser for EventParser {
        fn next_event(&mut self) -> Result<ParseEvent> {
            Ok(self.events.pop_front().unwrap_or(ParseEvent::End))
        }

        fn position(&self) -> (String, u32) {
            ("events".into(), 0)
        }
    }

    fn named(name: &str) -> OwnedMeta {
        OwnedMeta {
            property_name: name.into(),
            ..OwnedMeta::default()
        }
    }

    #[derive(Default)]
    struct Node {
        label: String,
        next: Shared<Node>,
    }

    fn node_registry() -> Registry {
        let mut reg = Registry::new();
        reg.register(
            TypeBuilder::<Node>::new("Node", 0x100)
                .property(
                    "label",
                    PropertyFlags::empty(),
                    |n: &Node| &n.label,
                    |n| &mut n.label,
                )
                .shared("next", PropertyFlags::empty(), |n: &Node| &n.next, |n| {
                    &mut n.next
                }),
        )
        .unwrap();
        reg
    }

    fn addr(token: &str) -> crate::address::AddressString {
        crate::address::AddressString::from_token(token).unwrap()
    }

    #[test]
    fn unknown_property_is_skipped() {
        let reg = node_registry();
        let desc = reg.lookup::<Node>().unwrap();
        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(named("scene")),
            ParseEvent::Atomic(named("label"), AtomicValue::Str("a".into())),
            ParseEvent::BlockBegin(named("legacy")),
            ParseEvent::Atomic(named("x"), AtomicValue::Str("1".into())),
            ParseEvent::BlockEnd,
            ParseEvent::BlockEnd,
        ]);
        let mut node = Node::default();
        let mut loader = Loader::new(&reg);
        loader.load_root(&mut parser, &mut node, desc).unwrap();
        assert_eq!(node.label, "a");
    }

    #[test]
    fn required_property_must_be_present() {
        #[derive(Default)]
        struct Strict {
            id: u32,
        }
        let mut reg = Registry::new();
        reg.register(TypeBuilder::<Strict>::new("Strict", 0x100).property(
            "id",
            PropertyFlags::REQUIRED,
            |s: &Strict| &s.id,
            |s| &mut s.id,
        ))
        .unwrap();
        let desc = reg.lookup::<Strict>().unwrap();

        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(named("s")),
            ParseEvent::BlockEnd,
        ]);
        let mut value = Strict::default();
        let mut loader = Loader::new(&reg);
        let err = loader.load_root(&mut parser, &mut value, desc).unwrap_err();
        assert!(matches!(err, Error::MissingProperty { .. }));
    }

    #[test]
    fn declared_default_applies_when_absent() {
        #[derive(Default)]
        struct Config {
            retries: u32,
        }
        let mut reg = Registry::new();
        reg.register(TypeBuilder::<Config>::new("Config", 0x100).property_default(
            "retries",
            PropertyFlags::empty(),
            3u32,
            |c: &Config| &c.retries,
            |c| &mut c.retries,
        ))
        .unwrap();
        let desc = reg.lookup::<Config>().unwrap();

        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(named("c")),
            ParseEvent::BlockEnd,
        ]);
        let mut value = Config::default();
        let mut loader = Loader::new(&reg);
        loader.load_root(&mut parser, &mut value, desc).unwrap();
        assert_eq!(value.retries, 3);
    }

    #[test]
    fn forward_reference_resolves_through_trailing_record() {
        let reg = node_registry();
        let desc = reg.lookup::<Node>().unwrap();

        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(named("scene")),
            ParseEvent::Atomic(named("label"), AtomicValue::Str("root".into())),
            ParseEvent::Pointer(named("next"), addr("t1")),
            ParseEvent::BlockEnd,
            ParseEvent::BlockBegin(OwnedMeta {
                property_name: String::new(),
                type_name: Some("Node".into()),
                version: Some(0),
                address: Some(addr("t1")),
            }),
            ParseEvent::Atomic(named("label"), AtomicValue::Str("tail".into())),
            ParseEvent::BlockEnd,
        ]);
        let mut node = Node::default();
        let mut loader = Loader::new(&reg);
        loader.load_root(&mut parser, &mut node, desc).unwrap();
        assert_eq!(node.label, "root");
        assert_eq!(node.next.borrow().label, "tail");
    }

    #[test]
    fn null_member_loads_as_null_handle() {
        let reg = node_registry();
        let desc = reg.lookup::<Node>().unwrap();
        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(named("scene")),
            ParseEvent::Atomic(named("label"), AtomicValue::Str("lone".into())),
            ParseEvent::Null(named("next")),
            ParseEvent::BlockEnd,
        ]);
        let mut node = Node {
            label: String::new(),
            next: Shared::new(Node::default()),
        };
        let mut loader = Loader::new(&reg);
        loader.load_root(&mut parser, &mut node, desc).unwrap();
        assert_eq!(node.label, "lone");
        assert!(node.next.is_null());
    }

    #[test]
    fn dangling_reference_is_an_error() {
        let reg = node_registry();
        let desc = reg.lookup::<Node>().unwrap();
        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(named("scene")),
            ParseEvent::Pointer(named("next"), addr("ghost")),
            ParseEvent::BlockEnd,
        ]);
        let mut node = Node::default();
        let mut loader = Loader::new(&reg);
        let err = loader.load_root(&mut parser, &mut node, desc).unwrap_err();
        assert!(matches!(err, Error::DanglingReference { .. }));
    }

    #[test]
    fn aliases_share_one_object() {
        #[derive(Default)]
        struct Pair {
            left: Shared<Node>,
            right: Shared<Node>,
        }
        let mut reg = node_registry();
        reg.register(
            TypeBuilder::<Pair>::new("Pair", 0x101)
                .shared("left", PropertyFlags::empty(), |p: &Pair| &p.left, |p| {
                    &mut p.left
                })
                .shared("right", PropertyFlags::empty(), |p: &Pair| &p.right, |p| {
                    &mut p.right
                }),
        )
        .unwrap();
        let desc = reg.lookup::<Pair>().unwrap();

        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(named("pair")),
            ParseEvent::Pointer(named("left"), addr("n1")),
            ParseEvent::Pointer(named("right"), addr("n1")),
            ParseEvent::BlockEnd,
            ParseEvent::BlockBegin(OwnedMeta {
                property_name: String::new(),
                type_name: Some("Node".into()),
                version: Some(0),
                address: Some(addr("n1")),
            }),
            ParseEvent::Atomic(named("label"), AtomicValue::Str("both".into())),
            ParseEvent::BlockEnd,
        ]);
        let mut pair = Pair::default();
        let mut loader = Loader::new(&reg);
        loader.load_root(&mut parser, &mut pair, desc).unwrap();
        assert!(pair.left.ptr_eq(&pair.right));
        assert_eq!(pair.left.borrow().label, "both");
        pair.left.borrow_mut().label.push('!');
        assert_eq!(pair.right.borrow().label, "both!");
    }

    #[test]
    fn version_mismatch_is_rejected() {
        #[derive(Default)]
        struct V2 {
            x: u32,
        }
        let mut reg = Registry::new();
        reg.register(TypeBuilder::<V2>::new("V2", 0x100).version(2).property(
            "x",
            PropertyFlags::empty(),
            |v: &V2| &v.x,
            |v| &mut v.x,
        ))
        .unwrap();
        let desc = reg.lookup::<V2>().unwrap();

        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(OwnedMeta {
                property_name: "v".into(),
                type_name: Some("V2".into()),
                version: Some(1),
                address: None,
            }),
            ParseEvent::BlockEnd,
        ]);
        let mut value = V2::default();
        let mut loader = Loader::new(&reg);
        let err = loader.load_root(&mut parser, &mut value, desc).unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { .. }));
    }

    #[test]
    fn map_loads_from_both_shapes() {
        use std::collections::BTreeMap;
        let mut reg = Registry::new();
        reg.register_map::<String, i32>("map_string_i32", 0x100)
            .unwrap();
        let desc = reg.lookup::<BTreeMap<String, i32>>().unwrap();

        // Pair shape: alternating key and value items.
        let mut parser = EventParser::new(vec![
            ParseEvent::MapBegin(named("m")),
            ParseEvent::Atomic(OwnedMeta::default(), AtomicValue::Str("a".into())),
            ParseEvent::Atomic(OwnedMeta::default(), AtomicValue::Signed(1, IntWidth::W4)),
            ParseEvent::MapEnd,
        ]);
        let mut m: BTreeMap<String, i32> = BTreeMap::new();
        Loader::new(&reg)
            .load_root(&mut parser, &mut m, desc)
            .unwrap();
        assert_eq!(m.get("a"), Some(&1));

        // Block shape: property names are the keys.
        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(named("m")),
            ParseEvent::Atomic(named("b"), AtomicValue::Str("2".into())),
            ParseEvent::BlockEnd,
        ]);
        let mut m: BTreeMap<String, i32> = BTreeMap::new();
        Loader::new(&reg)
            .load_root(&mut parser, &mut m, desc)
            .unwrap();
        assert_eq!(m.get("b"), Some(&2));
    }

    #[test]
    fn read_only_property_is_not_overwritten() {
        #[derive(Default)]
        struct Meta {
            generation: u32,
        }
        let mut reg = Registry::new();
        reg.register(TypeBuilder::<Meta>::new("Meta", 0x100).property(
            "generation",
            PropertyFlags::READ_ONLY,
            |m: &Meta| &m.generation,
            |m| &mut m.generation,
        ))
        .unwrap();
        let desc = reg.lookup::<Meta>().unwrap();

        let mut parser = EventParser::new(vec![
            ParseEvent::BlockBegin(named("m")),
            ParseEvent::Atomic(named("generation"), AtomicValue::Str("9".into())),
            ParseEvent::BlockEnd,
        ]);
        let mut value = Meta { generation: 4 };
        Loader::new(&reg)
            .load_root(&mut parser, &mut value, desc)
            .unwrap();
        assert_eq!(value.generation, 4);
    }
}
