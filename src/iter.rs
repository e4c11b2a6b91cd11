//! Flattened property iteration.
//!
//! Ancestor members are transparent in streams: a derived type's record
//! carries the base properties inline, in declaration order, base first.
//! [`PropertyIter`] resolves that flattening once per compound type so the
//! save walker and the post-load property sweep see a single linear table.

use crate::descriptor::{PropertyPath, TypeDescriptor, TypeKind};
use crate::error::Result;
use crate::registry::Registry;

/// Iterator over the flattened property table of a compound type.
///
/// Yields one [`PropertyPath`] per serializable member, ancestors expanded
/// in place. Empty for non-compound types.
pub struct PropertyIter<'a> {
    items: Vec<PropertyPath<'a>>,
    index: usize,
}

impl<'a> PropertyIter<'a> {
    pub fn new(registry: &'a Registry, desc: &'a TypeDescriptor) -> Result<Self> {
        let mut items = Vec::new();
        flatten(registry, desc, &mut Vec::new(), &mut items)?;
        Ok(Self { items, index: 0 })
    }

    pub fn is_end(&self) -> bool {
        self.index >= self.items.len()
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }

    pub fn current(&self) -> Option<&PropertyPath<'a>> {
        self.items.get(self.index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn flatten<'a>(
    registry: &'a Registry,
    desc: &'a TypeDescriptor,
    ancestors: &mut Vec<&'a crate::descriptor::PropertyDescriptor>,
    out: &mut Vec<PropertyPath<'a>>,
) -> Result<()> {
    let TypeKind::Compound(info) = desc.kind() else {
        return Ok(());
    };
    for prop in &info.properties {
        if prop.is_ancestor() {
            let base = registry.lookup_type_id(prop.member_type, prop.member_type_name)?;
            ancestors.push(prop);
            flatten(registry, base, ancestors, out)?;
            ancestors.pop();
        } else {
            out.push(PropertyPath {
                ancestors: ancestors.clone(),
                prop,
            });
        }
    }
    Ok(())
}
