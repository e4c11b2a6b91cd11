//! Format-independent save walker.
//!
//! [`Saver`] traverses a value through its descriptors and feeds structural
//! items to a [`FormatWriter`]. Pointer identity goes through the
//! [`SaveResolver`]: every strong or weak reference is written as a
//! reference token and the referenced record is queued; queued records are
//! drained after the root value as addressed top-level records. Cycles
//! terminate because an address is queued at most once.

use std::any::{Any, TypeId};

use crate::descriptor::{MapOps, SequenceOps, TypeDescriptor, TypeKind};
use crate::error::{Error, Result};
use crate::formats::{FormatWriter, ItemMeta};
use crate::iter::PropertyIter;
use crate::pointer::PointerOps;
use crate::registry::Registry;
use crate::resolver::SaveResolver;

pub(crate) struct Saver<'a> {
    registry: &'a Registry,
    resolver: SaveResolver,
}

impl<'a> Saver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            resolver: SaveResolver::new(),
        }
    }

    /// Write `value` as the root record, then drain queued pointer targets.
    pub fn save_root(
        &mut self,
        writer: &mut dyn FormatWriter,
        value: &dyn Any,
        desc: &TypeDescriptor,
        name: &str,
    ) -> Result<()> {
        writer.begin_stream()?;
        let meta = ItemMeta {
            property_name: name,
            type_name: Some(desc.name()),
            version: Some(desc.version()),
            address: None,
        };
        self.save_value(writer, value, desc, meta)?;

        while let Some((addr, handle)) = self.resolver.next_pending() {
            self.resolver.mark_saved(addr);
            let desc = self
                .registry
                .lookup_type_id(handle.type_id(), handle.type_name())?;
            let guard = handle.borrow()?;
            let meta = ItemMeta {
                property_name: "",
                type_name: Some(desc.name()),
                version: Some(desc.version()),
                address: Some(addr),
            };
            self.save_value(writer, &*guard, desc, meta)?;
        }
        writer.end_stream()
    }

    fn save_value(
        &mut self,
        writer: &mut dyn FormatWriter,
        value: &dyn Any,
        desc: &TypeDescriptor,
        meta: ItemMeta<'_>,
    ) -> Result<()> {
        match desc.kind() {
            TypeKind::Compound(_) => self.save_compound(writer, value, desc, meta),
            TypeKind::Sequence(ops) => self.save_sequence(writer, value, ops, meta),
            TypeKind::Map(ops) => self.save_map(writer, value, ops, meta),
            _ => {
                let atomic = desc.to_atomic(value)?;
                writer.atomic(&meta, &atomic)
            }
        }
    }

    fn save_compound(
        &mut self,
        writer: &mut dyn FormatWriter,
        value: &dyn Any,
        desc: &TypeDescriptor,
        meta: ItemMeta<'_>,
    ) -> Result<()> {
        writer.begin_block(&meta)?;
        let mut iter = PropertyIter::new(self.registry, desc)?;
        while let Some(path) = iter.current() {
            let prop = path.property();
            let slot = path.member(value);
            self.save_slot(
                writer,
                slot,
                prop.name(),
                prop.pointer_ops(),
                prop.member_type,
                prop.member_type_name,
            )
            .map_err(|e| name_property(e, prop.name()))?;
            iter.advance();
        }
        writer.end_block()
    }

    fn save_sequence(
        &mut self,
        writer: &mut dyn FormatWriter,
        value: &dyn Any,
        ops: &SequenceOps,
        meta: ItemMeta<'_>,
    ) -> Result<()> {
        writer.begin_list(&meta)?;
        for index in 0..(ops.len)(value) {
            let elem = (ops.at)(value, index);
            self.save_slot(
                writer,
                elem,
                "",
                &ops.elem_ops,
                ops.elem_type,
                ops.elem_type_name,
            )?;
        }
        writer.end_list()
    }

    fn save_map(
        &mut self,
        writer: &mut dyn FormatWriter,
        value: &dyn Any,
        ops: &MapOps,
        meta: ItemMeta<'_>,
    ) -> Result<()> {
        let key_desc = self.registry.lookup_type_id(ops.key_type, ops.key_type_name)?;
        let value_desc = self
            .registry
            .lookup_type_id(ops.value_type, ops.value_type_name)?;
        writer.begin_map(&meta)?;
        (ops.visit)(value, &mut |key, val| {
            self.save_value(writer, key, key_desc, ItemMeta::default())?;
            self.save_value(writer, val, value_desc, ItemMeta::default())
        })?;
        writer.end_map()
    }

    /// Write one member slot, dispatching on its pointer strategy.
    fn save_slot(
        &mut self,
        writer: &mut dyn FormatWriter,
        slot: &dyn Any,
        name: &str,
        ops: &PointerOps,
        member_type: TypeId,
        member_type_name: &'static str,
    ) -> Result<()> {
        let meta = ItemMeta {
            property_name: name,
            ..ItemMeta::default()
        };
        match ops {
            PointerOps::Value => {
                let desc = self.registry.lookup_type_id(member_type, member_type_name)?;
                self.save_value(writer, slot, desc, meta)
            }
            PointerOps::Shared(s) => match (s.handle)(slot) {
                None => writer.null(&meta),
                Some(handle) => {
                    let addr = handle.address();
                    writer.pointer(&meta, addr)?;
                    self.resolver.reference(addr, handle)
                }
            },
            PointerOps::Weak(w) => match (w.upgrade)(slot) {
                None => writer.null(&meta),
                Some(handle) => {
                    let addr = handle.address();
                    writer.pointer(&meta, addr)?;
                    self.resolver.reference(addr, handle)
                }
            },
            PointerOps::Unique(u) => {
                let addr = (u.address)(slot);
                self.resolver.record_unique(addr)?;
                let desc = self.registry.lookup_type_id(member_type, member_type_name)?;
                let meta = ItemMeta {
                    property_name: name,
                    type_name: Some(desc.name()),
                    version: Some(desc.version()),
                    address: Some(addr),
                };
                self.save_value(writer, (u.deref)(slot), desc, meta)
            }
            PointerOps::Optional(o) => match (o.deref)(slot) {
                None => writer.null(&meta),
                Some(inner) => {
                    let desc = self.registry.lookup_type_id(member_type, member_type_name)?;
                    self.save_value(writer, inner, desc, meta)
                }
            },
        }
    }
}

/// Attach a property name to schema mismatches raised below it.
pub(crate) fn name_property(err: Error, name: &str) -> Error {
    match err {
        Error::SchemaMismatch {
            property,
            expected,
            actual,
        } if property.is_empty() => Error::SchemaMismatch {
            property: name.to_owned(),
            expected,
            actual,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AtomicValue, PropertyFlags};
    use crate::pointer::Shared;
    use crate::registry::TypeBuilder;

    /// Records writer calls as flat strings for structural assertions.
    #[derive(Default)]
    struct RecordingWriter {
        items: Vec<String>,
    }

    impl RecordingWriter {
        fn label(meta: &ItemMeta<'_>) -> String {
            let mut out = meta.property_name.to_owned();
            if let Some(t) = meta.type_name {
                out.push_str(&format!(" !{t}"));
            }
            if let Some(a) = meta.address {
                out.push_str(&format!(" &{a}"));
            }
            out
        }
    }

    impl FormatWriter for RecordingWriter {
        fn comment(&mut self, text: &str) -> Result<()> {
            self.items.push(format!("# {text}"));
            Ok(())
        }

        fn atomic(&mut self, meta: &ItemMeta<'_>, value: &AtomicValue) -> Result<()> {
            self.items
                .push(format!("atom({}) = {}", Self::label(meta), value.to_text()));
            Ok(())
        }

        fn null(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
            self.items.push(format!("null({})", Self::label(meta)));
            Ok(())
        }

        fn pointer(&mut self, meta: &ItemMeta<'_>, target: crate::address::AddressString) -> Result<()> {
            self.items
                .push(format!("ptr({}) -> {target}", Self::label(meta)));
            Ok(())
        }

        fn begin_block(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
            self.items.push(format!("block({})", Self::label(meta)));
            Ok(())
        }

        fn end_block(&mut self) -> Result<()> {
            self.items.push("end_block".into());
            Ok(())
        }

        fn begin_list(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
            self.items.push(format!("list({})", Self::label(meta)));
            Ok(())
        }

        fn end_list(&mut self) -> Result<()> {
            self.items.push("end_list".into());
            Ok(())
        }

        fn begin_map(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
            self.items.push(format!("map({})", Self::label(meta)));
            Ok(())
        }

        fn end_map(&mut self) -> Result<()> {
            self.items.push("end_map".into());
            Ok(())
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

    #[test]
    fn scalar_root_is_one_atom() {
        let reg = Registry::new();
        let mut w = RecordingWriter::default();
        let mut saver = Saver::new(&reg);
        let desc = reg.lookup::<i32>().unwrap();
        saver.save_root(&mut w, &42i32, desc, "answer").unwrap();
        assert_eq!(w.items, ["atom(answer !i32) = 42"]);
    }

    #[test]
    fn shared_member_emits_reference_and_trailing_record() {
        let reg = node_registry();
        let desc = reg.lookup::<Node>().unwrap();

        let root = Node {
            label: "root".into(),
            next: Shared::new(Node {
                label: "tail".into(),
                ..Node::default()
            }),
        };

        let mut w = RecordingWriter::default();
        let mut saver = Saver::new(&reg);
        saver.save_root(&mut w, &root, desc, "scene").unwrap();

        // Root block, a reference, then the queued record. The tail's own
        // `next` is null and stays inline.
        assert!(w.items[0].starts_with("block(scene !Node)"));
        assert!(w.items.iter().any(|i| i.starts_with("ptr(next)")));
        assert!(w.items.iter().any(|i| i.starts_with("null(next)")));
        let trailing = w
            .items
            .iter()
            .filter(|i| i.starts_with("block( !Node &"))
            .count();
        assert_eq!(trailing, 1);
    }

    #[test]
    fn null_shared_slot_writes_null() {
        let reg = node_registry();
        let desc = reg.lookup::<Node>().unwrap();

        let root = Node::default();
        let mut w = RecordingWriter::default();
        let mut saver = Saver::new(&reg);
        saver.save_root(&mut w, &root, desc, "scene").unwrap();

        assert!(w.items.iter().any(|i| i.starts_with("null(next)")));
        assert!(!w.items.iter().any(|i| i.starts_with("ptr(")));
        assert!(!w.items.iter().any(|i| i.starts_with("block( !Node &")));
    }

    #[test]
    fn cyclic_graph_terminates() {
        let reg = node_registry();
        let desc = reg.lookup::<Node>().unwrap();

        let a = Shared::new(Node::default());
        let b = Shared::new(Node::default());
        a.borrow_mut().next = b.clone();
        b.borrow_mut().next = a.clone();

        let root = Node {
            label: "entry".into(),
            next: a.clone(),
        };
        let mut w = RecordingWriter::default();
        let mut saver = Saver::new(&reg);
        saver.save_root(&mut w, &root, desc, "scene").unwrap();

        // Both cycle members appear exactly once as records.
        let records = w
            .items
            .iter()
            .filter(|i| i.starts_with("block( !Node &"))
            .count();
        assert_eq!(records, 2);
    }

    #[test]
    fn aliases_share_one_record() {
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

        let shared = Shared::new(Node::default());
        let pair = Pair {
            left: shared.clone(),
            right: shared.clone(),
        };
        let desc = reg.lookup::<Pair>().unwrap();
        let mut w = RecordingWriter::default();
        let mut saver = Saver::new(&reg);
        saver.save_root(&mut w, &pair, desc, "pair").unwrap();

        let refs = w.items.iter().filter(|i| i.starts_with("ptr(")).count();
        let records = w
            .items
            .iter()
            .filter(|i| i.starts_with("block( !Node &"))
            .count();
        // Two references to the shared node; its own `next` is null.
        assert_eq!(refs, 2);
        assert_eq!(records, 1);
    }
}
