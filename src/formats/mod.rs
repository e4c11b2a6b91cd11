//! Stream codecs.
//!
//! Each format implements two traits against the format-independent
//! walkers in [`save`](crate::save) and [`load`](crate::load):
//!
//! - [`FormatWriter`] — a sink of structural items. The save walker calls
//!   it in stream order; the writer renders syntax.
//! - [`FormatParser`] — a source of [`ParseEvent`]s. Each parser drives
//!   the shared [`ParserContext`](crate::context::ParserContext) state
//!   machine and reduces its syntax to the same event vocabulary.
//!
//! The binary codec produces fully typed atomics; the textual codecs
//! produce raw strings and leave conversion to the receiving descriptor.

use crate::address::AddressString;
use crate::descriptor::AtomicValue;
use crate::error::Result;

pub mod binary;
pub mod preprocessor;
pub mod text;
pub mod yaml;

pub use binary::{BinaryParser, BinaryWriter};
pub use preprocessor::{Preprocessor, SourceLine};
pub use text::{TextParser, TextWriter};
pub use yaml::{YamlParser, YamlWriter};

/// Identifies one of the built-in codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Binary,
    Text,
    Yaml,
}

/// Borrowed metadata attached to an item being written.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemMeta<'a> {
    /// Property name; empty for container elements and trailing records.
    pub property_name: &'a str,
    /// Dynamic type annotation, carried by addressable and top-level
    /// records.
    pub type_name: Option<&'a str>,
    /// Version stamp, carried together with the type annotation.
    pub version: Option<u8>,
    /// Address under which this item defines an object.
    pub address: Option<AddressString>,
}

/// Owned metadata attached to a parsed item.
#[derive(Debug, Clone, Default)]
pub struct OwnedMeta {
    pub property_name: String,
    pub type_name: Option<String>,
    pub version: Option<u8>,
    pub address: Option<AddressString>,
}

/// One structural item decoded from a stream.
#[derive(Debug, Clone)]
pub enum ParseEvent {
    /// `{` of a compound record.
    BlockBegin(OwnedMeta),
    BlockEnd,
    ListBegin(OwnedMeta),
    ListEnd,
    MapBegin(OwnedMeta),
    MapEnd,
    /// A scalar payload.
    Atomic(OwnedMeta, AtomicValue),
    /// An explicit null or empty payload. Loads as the default value.
    Null(OwnedMeta),
    /// A reference to an addressed object.
    Pointer(OwnedMeta, AddressString),
    /// End of the stream.
    End,
}

impl ParseEvent {
    /// The metadata of an item-opening event.
    pub fn meta(&self) -> Option<&OwnedMeta> {
        match self {
            ParseEvent::BlockBegin(m)
            | ParseEvent::ListBegin(m)
            | ParseEvent::MapBegin(m)
            | ParseEvent::Atomic(m, _)
            | ParseEvent::Null(m)
            | ParseEvent::Pointer(m, _) => Some(m),
            _ => None,
        }
    }

    /// Short label for error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            ParseEvent::BlockBegin(_) => "block",
            ParseEvent::BlockEnd => "end of block",
            ParseEvent::ListBegin(_) => "list",
            ParseEvent::ListEnd => "end of list",
            ParseEvent::MapBegin(_) => "map",
            ParseEvent::MapEnd => "end of map",
            ParseEvent::Atomic(_, _) => "scalar",
            ParseEvent::Null(_) => "null",
            ParseEvent::Pointer(_, _) => "reference",
            ParseEvent::End => "end of stream",
        }
    }
}

/// A sink of structural items rendered into one concrete syntax.
pub trait FormatWriter {
    /// Called once before the first item.
    fn begin_stream(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once after the last item.
    fn end_stream(&mut self) -> Result<()> {
        Ok(())
    }

    /// An out-of-band comment. Formats without comment syntax drop it.
    fn comment(&mut self, text: &str) -> Result<()>;

    fn atomic(&mut self, meta: &ItemMeta<'_>, value: &AtomicValue) -> Result<()>;
    fn null(&mut self, meta: &ItemMeta<'_>) -> Result<()>;
    fn pointer(&mut self, meta: &ItemMeta<'_>, target: AddressString) -> Result<()>;

    fn begin_block(&mut self, meta: &ItemMeta<'_>) -> Result<()>;
    fn end_block(&mut self) -> Result<()>;
    fn begin_list(&mut self, meta: &ItemMeta<'_>) -> Result<()>;
    fn end_list(&mut self) -> Result<()>;
    fn begin_map(&mut self, meta: &ItemMeta<'_>) -> Result<()>;
    fn end_map(&mut self) -> Result<()>;
}

/// A source of [`ParseEvent`]s decoded from one concrete syntax.
pub trait FormatParser {
    /// The next structural item. Returns [`ParseEvent::End`] at the end of
    /// input; calling again after `End` keeps returning `End`.
    fn next_event(&mut self) -> Result<ParseEvent>;

    /// Source name and position for diagnostics.
    fn position(&self) -> (String, u32);
}
