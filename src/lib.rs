//! # Propstream
//!
//! Reflection-driven object serialization. Types register themselves in a
//! [`Registry`] as descriptors with typed property accessors; a
//! format-independent walker then saves and loads whole object graphs,
//! including shared, weak, unique and optional pointer members, through
//! any of three codecs:
//!
//! - a compact binary stream,
//! - an indented text syntax with a C-style preprocessor,
//! - an indentation-structured YAML-style syntax.
//!
//! Shared objects keep their identity across a save/load cycle: every
//! strong or weak reference is written as an address token and the
//! referenced record once, so aliases still point at the same object
//! after loading and cyclic graphs round-trip.
//!
//! ```
//! use propstream::{Format, PropertyFlags, Registry, Shared, TypeBuilder};
//!
//! #[derive(Default)]
//! struct Anchor {
//!     tag: String,
//! }
//!
//! #[derive(Default)]
//! struct Node {
//!     label: String,
//!     anchor: Shared<Anchor>,
//! }
//!
//! let mut registry = Registry::new();
//! registry
//!     .register(TypeBuilder::<Anchor>::new("Anchor", 0x100).property(
//!         "tag",
//!         PropertyFlags::empty(),
//!         |a: &Anchor| &a.tag,
//!         |a| &mut a.tag,
//!     ))
//!     .unwrap();
//! registry
//!     .register(
//!         TypeBuilder::<Node>::new("Node", 0x101)
//!             .property("label", PropertyFlags::empty(), |n: &Node| &n.label, |n| {
//!                 &mut n.label
//!             })
//!             .shared("anchor", PropertyFlags::empty(), |n: &Node| &n.anchor, |n| {
//!                 &mut n.anchor
//!             }),
//!     )
//!     .unwrap();
//!
//! let node = Node::default();
//! let bytes = propstream::encode(&registry, Format::Text, &node, "node").unwrap();
//! let mut restored = Node::default();
//! propstream::decode(&registry, Format::Text, &bytes, "node.txt", &mut restored).unwrap();
//! ```

pub mod address;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod formats;
pub mod iter;
pub mod pointer;
pub mod registry;

mod load;
mod resolver;
mod save;

pub use address::AddressString;
pub use descriptor::{
    AtomicValue, PropertyDescriptor, PropertyFlags, PropertyPath, TypeDescriptor, TypeKind,
};
pub use error::{Error, Result};
pub use formats::{
    BinaryParser, BinaryWriter, Format, FormatParser, FormatWriter, Preprocessor, TextParser,
    TextWriter, YamlParser, YamlWriter,
};
pub use iter::PropertyIter;
pub use pointer::{Shared, SharedHandle, WeakRef};
pub use registry::{EnumBuilder, Registry, TypeBuilder};

use std::any::{type_name, Any};

use load::Loader;
use save::Saver;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Save `value` as the root record of a stream. Returns the root's
/// descriptor.
///
/// The value's type must be registered. Strong and weak references inside
/// the graph are written as trailing addressed records after the root.
pub fn save<'a, T: Any>(
    registry: &'a Registry,
    writer: &mut dyn FormatWriter,
    value: &T,
    name: &str,
) -> Result<&'a TypeDescriptor> {
    let desc = registry.lookup::<T>().ok_or_else(|| Error::UnknownType {
        name: type_name::<T>().to_owned(),
    })?;
    Saver::new(registry).save_root(writer, value, desc, name)?;
    Ok(desc)
}

/// Load a stream into `dst`, resolving all references. Returns the root's
/// descriptor.
///
/// The stream's root type annotation, when present, must match the
/// registered descriptor of `T`.
pub fn load<'a, T: Any>(
    registry: &'a Registry,
    parser: &mut dyn FormatParser,
    dst: &mut T,
) -> Result<&'a TypeDescriptor> {
    let desc = registry.lookup::<T>().ok_or_else(|| Error::UnknownType {
        name: type_name::<T>().to_owned(),
    })?;
    Loader::new(registry).load_root(parser, dst, desc)?;
    Ok(desc)
}

/// Load a stream whose root type is determined by the stream's own type
/// annotation. Returns the loaded value together with its descriptor.
pub fn load_any<'a>(
    registry: &'a Registry,
    parser: &mut dyn FormatParser,
) -> Result<(Box<dyn Any>, &'a TypeDescriptor)> {
    Loader::new(registry).load_any(parser)
}

/// Save `value` into a freshly encoded byte buffer of the given format.
pub fn encode<T: Any>(
    registry: &Registry,
    format: Format,
    value: &T,
    name: &str,
) -> Result<Vec<u8>> {
    match format {
        Format::Binary => {
            let mut writer = BinaryWriter::new();
            save(registry, &mut writer, value, name)?;
            Ok(writer.into_bytes())
        }
        Format::Text => {
            let mut writer = TextWriter::new();
            save(registry, &mut writer, value, name)?;
            Ok(writer.into_string().into_bytes())
        }
        Format::Yaml => {
            let mut writer = YamlWriter::new();
            save(registry, &mut writer, value, name)?;
            Ok(writer.into_string().into_bytes())
        }
    }
}

/// Load `dst` from an encoded byte buffer. `source_name` labels the
/// stream in error messages for the textual formats.
pub fn decode<T: Any>(
    registry: &Registry,
    format: Format,
    data: &[u8],
    source_name: &str,
    dst: &mut T,
) -> Result<()> {
    match format {
        Format::Binary => {
            let mut parser = BinaryParser::new(data);
            load(registry, &mut parser, dst).map(|_| ())
        }
        Format::Text => {
            let text = text_of(data)?;
            let mut parser = TextParser::from_str(source_name, text)?;
            load(registry, &mut parser, dst).map(|_| ())
        }
        Format::Yaml => {
            let text = text_of(data)?;
            let mut parser = YamlParser::from_str(source_name, text)?;
            load(registry, &mut parser, dst).map(|_| ())
        }
    }
}

fn text_of(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|_| Error::protocol("stream is not valid UTF-8"))
}
