//! Shared parser state machine.
//!
//! All three format parsers drive the same [`ParserContext`]: a stack of
//! [`ParserState`] values plus per-item scratch fields. Only the transitions
//! differ per format, driven by each format's lexical tokens. Pops are
//! checked against an expected state and report both the expected and the
//! actual state on mismatch.

use std::fmt;
use std::rc::Rc;

use crate::address::AddressString;
use crate::error::{Error, Result};

/// One state of the parse stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Before the first item and between top-level records. Behaves as an
    /// implicit one-member block.
    TopLevel,
    Block,
    List,
    Map,
    /// Inside a value payload.
    Value,
    /// Inside a size field (binary only).
    Size,
    /// Reading a scalar token (textual formats).
    ReadValue,
    /// Flow-style `{...}` (YAML only).
    FlowBlock,
    /// Flow-style `[...]` (YAML only).
    FlowList,
    /// Scalar inside a flow collection (YAML only).
    FlowValue,
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParserState::TopLevel => "TopLevel",
            ParserState::Block => "Block",
            ParserState::List => "List",
            ParserState::Map => "Map",
            ParserState::Value => "Value",
            ParserState::Size => "Size",
            ParserState::ReadValue => "ReadValue",
            ParserState::FlowBlock => "FlowBlock",
            ParserState::FlowList => "FlowList",
            ParserState::FlowValue => "FlowValue",
        };
        f.write_str(name)
    }
}

/// Per-parse mutable state: the state stack plus scratch fields for the
/// item currently being assembled. Created fresh for each top-level save
/// or load call.
pub struct ParserContext {
    stack: Vec<ParserState>,
    /// Payload size of the current item (binary).
    pub size: usize,
    /// Type name attached to the current item, empty if none.
    pub type_name: String,
    /// Version stamp attached to the current item.
    pub version: Option<u8>,
    /// Address under which the current item defines an object.
    pub address: Option<AddressString>,
    /// Property name of the current item, empty for container elements.
    pub property_name: String,
    /// Raw scalar text of the current item (textual formats).
    pub value: String,
    /// Address referenced by the current item, if it is a pointer.
    pub pointer_ref: Option<AddressString>,
    /// Comments collected while parsing.
    pub comments: Vec<String>,
    /// Source name for diagnostics.
    pub file: Rc<str>,
    /// Current line (textual formats) or item ordinal (binary).
    pub line: u32,
}

impl ParserContext {
    pub fn new(file: impl Into<Rc<str>>) -> Self {
        Self {
            stack: vec![ParserState::TopLevel],
            size: 0,
            type_name: String::new(),
            version: None,
            address: None,
            property_name: String::new(),
            value: String::new(),
            pointer_ref: None,
            comments: Vec::new(),
            file: file.into(),
            line: 1,
        }
    }

    /// The state on top of the stack.
    pub fn state(&self) -> ParserState {
        *self.stack.last().unwrap_or(&ParserState::TopLevel)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push_state(&mut self, state: ParserState) {
        self.stack.push(state);
    }

    /// Pop the top state, which must match `expected`.
    pub fn pop_state(&mut self, expected: ParserState) -> Result<ParserState> {
        let actual = self.state();
        if actual != expected {
            return Err(self.grammar_error(format!(
                "cannot leave state {expected}: parser is in state {actual}"
            )));
        }
        if self.stack.len() <= 1 {
            return Err(self.grammar_error("state stack underflow"));
        }
        Ok(self.stack.pop().expect("stack is non-empty"))
    }

    /// Replace the top state, which must match `expected`, with `to`.
    pub fn change_state(&mut self, expected: ParserState, to: ParserState) -> Result<()> {
        let actual = self.state();
        if actual != expected {
            return Err(self.grammar_error(format!(
                "cannot change state {expected} -> {to}: parser is in state {actual}"
            )));
        }
        *self.stack.last_mut().expect("stack is non-empty") = to;
        Ok(())
    }

    /// True inside a block. The top level counts as an implicit block.
    pub fn is_block(&self) -> bool {
        matches!(
            self.state(),
            ParserState::Block | ParserState::TopLevel | ParserState::FlowBlock
        )
    }

    pub fn is_list(&self) -> bool {
        matches!(self.state(), ParserState::List | ParserState::FlowList)
    }

    pub fn is_map(&self) -> bool {
        matches!(self.state(), ParserState::Map)
    }

    /// Reset the per-item scratch fields.
    pub fn clear_item(&mut self) {
        self.size = 0;
        self.type_name.clear();
        self.version = None;
        self.address = None;
        self.property_name.clear();
        self.value.clear();
        self.pointer_ref = None;
    }

    /// A grammar error annotated with the current position.
    pub fn grammar_error(&self, message: impl Into<String>) -> Error {
        Error::grammar(self.file.as_ref(), self.line, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_top_level() {
        let ctx = ParserContext::new("test");
        assert_eq!(ctx.state(), ParserState::TopLevel);
        assert!(ctx.is_block());
        assert!(!ctx.is_list());
    }

    #[test]
    fn push_pop_round_trip() {
        let mut ctx = ParserContext::new("test");
        ctx.push_state(ParserState::Block);
        ctx.push_state(ParserState::List);
        assert!(ctx.is_list());
        ctx.pop_state(ParserState::List).unwrap();
        ctx.pop_state(ParserState::Block).unwrap();
        assert_eq!(ctx.state(), ParserState::TopLevel);
    }

    #[test]
    fn pop_wrong_state_names_both() {
        let mut ctx = ParserContext::new("scene.txt");
        ctx.push_state(ParserState::Map);
        let err = ctx.pop_state(ParserState::List).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("List"), "{text}");
        assert!(text.contains("Map"), "{text}");
        assert!(text.contains("scene.txt"), "{text}");
    }

    #[test]
    fn pop_top_level_underflows() {
        let mut ctx = ParserContext::new("test");
        assert!(ctx.pop_state(ParserState::TopLevel).is_err());
    }

    #[test]
    fn change_state_swaps_top() {
        let mut ctx = ParserContext::new("test");
        ctx.push_state(ParserState::Value);
        ctx.change_state(ParserState::Value, ParserState::ReadValue)
            .unwrap();
        assert_eq!(ctx.state(), ParserState::ReadValue);
        assert!(
            ctx.change_state(ParserState::Block, ParserState::List)
                .is_err()
        );
    }
}
