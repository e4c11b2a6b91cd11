//! Error types for the property-stream engine.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! follow the failure taxonomy of the engine: registry conflicts, schema
//! mismatches, grammar errors (annotated with file and line), pointer-graph
//! errors, protocol errors and version mismatches. No operation is retried
//! internally; an error aborts the whole save or load call.

use crate::address::AddressString;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by registration, saving and loading.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A type name, numeric id or Rust `TypeId` is already registered.
    #[error("type '{name}' (id {id}) is already registered")]
    DuplicateType { name: String, id: u32 },

    /// A type was looked up that is not in the registry.
    #[error("unknown type '{name}'")]
    UnknownType { name: String },

    /// An incoming value does not match the receiving member's declared type.
    #[error("schema mismatch for '{property}': expected {expected}, found {actual}")]
    SchemaMismatch {
        property: String,
        expected: String,
        actual: String,
    },

    /// A property flagged `required` was absent from the input.
    #[error("missing required property '{property}' in '{type_name}'")]
    MissingProperty {
        property: String,
        type_name: String,
    },

    /// Unexpected token or state transition, annotated with position.
    #[error("{file}({line}): {message}")]
    Grammar {
        file: String,
        line: u32,
        message: String,
    },

    /// A pointer reference never resolved to a materialized object.
    #[error("dangling reference to address '{address}'")]
    DanglingReference { address: AddressString },

    /// A second owner was bound to an already uniquely-owned address.
    #[error("address '{address}' is already uniquely owned")]
    UniqueAliasViolation { address: AddressString },

    /// Malformed or unsupported wire data (unknown control byte,
    /// unterminated structure, unsupported payload width).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The stream declares a byte order the host cannot read.
    #[error("stream endianness ({stream}) differs from host ({host})")]
    UnsupportedEndianness {
        stream: &'static str,
        host: &'static str,
    },

    /// Stream version differs from the registered type's declared version.
    #[error("version mismatch for '{type_name}': stream has {actual}, registered {expected}")]
    VersionMismatch {
        type_name: String,
        expected: u8,
        actual: u8,
    },

    /// Underlying I/O failure (include file resolution).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Grammar error at an explicit position.
    pub fn grammar(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Error::Grammar {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    /// Protocol error from a plain message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_error_carries_position() {
        let err = Error::grammar("scene.txt", 12, "unexpected '}'");
        assert_eq!(err.to_string(), "scene.txt(12): unexpected '}'");
    }

    #[test]
    fn duplicate_type_message() {
        let err = Error::DuplicateType {
            name: "Node".into(),
            id: 0x100,
        };
        assert!(err.to_string().contains("Node"));
        assert!(err.to_string().contains("256"));
    }
}
