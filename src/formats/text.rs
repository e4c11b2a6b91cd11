//! Human-editable text codec.
//!
//! Each item follows the grammar
//!
//! ```text
//! item  := name? ('&' ADDR)? '=' value ';'
//! value := ('!' TYPE ('@' VERSION)?)? (scalar | '*' ADDR | 'null'
//!          | '{' item* '}' | '[' item* ']' | '<' pair* '>')
//! pair  := scalar '=' value ';'
//! ```
//!
//! Strings are double-quoted with C-style escapes; all other scalars are
//! bare words whose interpretation is left to the receiving descriptor.
//! `//` starts a line comment. Input is expected to have passed through
//! the [`Preprocessor`](super::preprocessor::Preprocessor) first, so every
//! token knows its original file and line.

use std::rc::Rc;

use crate::address::AddressString;
use crate::context::{ParserContext, ParserState};
use crate::descriptor::AtomicValue;
use crate::error::{Error, Result};
use crate::formats::{FormatParser, FormatWriter, ItemMeta, OwnedMeta, ParseEvent};
use crate::formats::preprocessor::{Preprocessor, SourceLine};

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

enum WriterFrame {
    Block,
    List,
    Map { expect_value: bool },
}

/// Renders items as indented text.
pub struct TextWriter {
    out: String,
    stack: Vec<WriterFrame>,
}

impl TextWriter {
    pub fn new() -> Self {
        Self {
            out: String::new(),
            stack: Vec::new(),
        }
    }

    pub fn into_string(self) -> String {
        self.out
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    fn indent(&mut self) {
        for _ in 0..self.stack.len() {
            self.out.push_str("    ");
        }
    }

    fn head(&mut self, meta: &ItemMeta<'_>) {
        self.indent();
        if !meta.property_name.is_empty() {
            self.out.push_str(meta.property_name);
            self.out.push(' ');
        }
        if let Some(address) = meta.address {
            self.out.push('&');
            self.out.push_str(address.as_str());
            self.out.push(' ');
        }
        self.out.push_str("= ");
        if let Some(type_name) = meta.type_name {
            self.out.push('!');
            self.out.push_str(type_name);
            if let Some(version) = meta.version {
                self.out.push('@');
                self.out.push_str(&version.to_string());
            }
            self.out.push(' ');
        }
    }

    /// Whether the next item is a map key, a map value, or neither.
    fn map_position(&mut self) -> Option<&mut bool> {
        match self.stack.last_mut() {
            Some(WriterFrame::Map { expect_value }) => Some(expect_value),
            _ => None,
        }
    }

    fn render(value: &AtomicValue) -> String {
        match value {
            AtomicValue::Str(s) => quote(s),
            AtomicValue::Char(c) => quote(&c.to_string()),
            other => other.to_text(),
        }
    }

    /// Scalars, nulls and references share the same tail handling.
    fn scalar_item(&mut self, meta: &ItemMeta<'_>, rendered: &str, is_key_ok: bool) -> Result<()> {
        if let Some(expect_value) = self.map_position() {
            if *expect_value {
                *expect_value = false;
                self.out.push_str(rendered);
                self.out.push_str(";\n");
                return Ok(());
            }
            if !is_key_ok {
                return Err(Error::protocol("map keys must be scalar values"));
            }
            *expect_value = true;
            self.indent();
            self.out.push_str(rendered);
            self.out.push_str(" = ");
            return Ok(());
        }
        self.head(meta);
        self.out.push_str(rendered);
        self.out.push_str(";\n");
        Ok(())
    }

    fn open(&mut self, meta: &ItemMeta<'_>, bracket: char, frame: WriterFrame) -> Result<()> {
        match self.map_position() {
            Some(expect_value) if *expect_value => {
                *expect_value = false;
                self.out.push(bracket);
                self.out.push('\n');
            }
            Some(_) => {
                return Err(Error::protocol("map keys must be scalar values"));
            }
            None => {
                self.head(meta);
                self.out.push(bracket);
                self.out.push('\n');
            }
        }
        self.stack.push(frame);
        Ok(())
    }

    fn close(&mut self, bracket: char, expected: &str) -> Result<()> {
        match self.stack.pop() {
            Some(frame) => {
                let matches = matches!(
                    (&frame, expected),
                    (WriterFrame::Block, "block")
                        | (WriterFrame::List, "list")
                        | (WriterFrame::Map { .. }, "map")
                );
                if !matches {
                    return Err(Error::protocol(format!("mismatched {expected} close")));
                }
            }
            None => return Err(Error::protocol(format!("{expected} close without open"))),
        }
        self.indent();
        self.out.push(bracket);
        self.out.push_str(";\n");
        Ok(())
    }
}

impl Default for TextWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatWriter for TextWriter {
    fn comment(&mut self, text: &str) -> Result<()> {
        self.indent();
        self.out.push_str("// ");
        self.out.push_str(text);
        self.out.push('\n');
        Ok(())
    }

    fn atomic(&mut self, meta: &ItemMeta<'_>, value: &AtomicValue) -> Result<()> {
        let rendered = Self::render(value);
        self.scalar_item(meta, &rendered, true)
    }

    fn null(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.scalar_item(meta, "null", false)
    }

    fn pointer(&mut self, meta: &ItemMeta<'_>, target: AddressString) -> Result<()> {
        let rendered = format!("*{target}");
        self.scalar_item(meta, &rendered, false)
    }

    fn begin_block(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.open(meta, '{', WriterFrame::Block)
    }

    fn end_block(&mut self) -> Result<()> {
        self.close('}', "block")
    }

    fn begin_list(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.open(meta, '[', WriterFrame::List)
    }

    fn end_list(&mut self) -> Result<()> {
        self.close(']', "list")
    }

    fn begin_map(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.open(
            meta,
            '<',
            WriterFrame::Map {
                expect_value: false,
            },
        )
    }

    fn end_map(&mut self) -> Result<()> {
        self.close('>', "map")
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// A bare word: names, numbers, keywords.
    Word(String),
    /// A quoted string, escapes resolved.
    Str(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Positioned {
    token: Token,
    file: Rc<str>,
    line: u32,
}

const PUNCTS: &str = "=;{}[]<>!&*@";

fn tokenize(lines: &[SourceLine]) -> Result<Vec<Positioned>> {
    let mut tokens = Vec::new();
    for source in lines {
        let mut chars = source.text.char_indices().peekable();
        while let Some(&(at, c)) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
            } else if c == '/' {
                let text = &source.text[at..];
                if text.starts_with("//") {
                    break;
                }
                return Err(Error::grammar(
                    source.file.as_ref(),
                    source.line,
                    "unexpected '/'",
                ));
            } else if c == '"' {
                chars.next();
                let text = read_string(&mut chars, source)?;
                tokens.push(Positioned {
                    token: Token::Str(text),
                    file: Rc::clone(&source.file),
                    line: source.line,
                });
            } else if PUNCTS.contains(c) {
                chars.next();
                tokens.push(Positioned {
                    token: Token::Punct(c),
                    file: Rc::clone(&source.file),
                    line: source.line,
                });
            } else {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || PUNCTS.contains(c) || c == '"' || c == '/' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Positioned {
                    token: Token::Word(word),
                    file: Rc::clone(&source.file),
                    line: source.line,
                });
            }
        }
    }
    Ok(tokens)
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    source: &SourceLine,
) -> Result<String> {
    let mut out = String::new();
    loop {
        let Some((_, c)) = chars.next() else {
            return Err(Error::grammar(
                source.file.as_ref(),
                source.line,
                "unterminated string literal",
            ));
        };
        match c {
            '"' => return Ok(out),
            '\\' => {
                let Some((_, escape)) = chars.next() else {
                    return Err(Error::grammar(
                        source.file.as_ref(),
                        source.line,
                        "unterminated escape sequence",
                    ));
                };
                match escape {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '\\' => out.push('\\'),
                    '"' => out.push('"'),
                    // Octal: one to three digits, \0 included.
                    d @ '0'..='7' => {
                        let mut value = d as u32 - '0' as u32;
                        for _ in 0..2 {
                            let Some(&(_, c)) = chars.peek() else { break };
                            let Some(digit) = c.to_digit(8) else { break };
                            value = value * 8 + digit;
                            chars.next();
                        }
                        let c = char::from_u32(value).ok_or_else(|| {
                            Error::grammar(
                                source.file.as_ref(),
                                source.line,
                                "invalid octal escape",
                            )
                        })?;
                        out.push(c);
                    }
                    'x' => {
                        let mut value = 0u32;
                        for _ in 0..2 {
                            let Some(&(_, c)) = chars.peek() else { break };
                            let Some(digit) = c.to_digit(16) else { break };
                            value = value * 16 + digit;
                            chars.next();
                        }
                        let c = char::from_u32(value).ok_or_else(|| {
                            Error::grammar(
                                source.file.as_ref(),
                                source.line,
                                "invalid \\x escape",
                            )
                        })?;
                        out.push(c);
                    }
                    other => {
                        return Err(Error::grammar(
                            source.file.as_ref(),
                            source.line,
                            format!("unknown escape '\\{other}'"),
                        ));
                    }
                }
            }
            c => out.push(c),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Decodes items from preprocessed text.
pub struct TextParser {
    tokens: Vec<Positioned>,
    index: usize,
    ctx: ParserContext,
    /// Per open map: whether the next item is the pair's value.
    map_expect_value: Vec<bool>,
    done: bool,
}

impl TextParser {
    pub fn new(lines: &[SourceLine]) -> Result<Self> {
        let name = lines
            .first()
            .map(|l| l.file.as_ref().to_owned())
            .unwrap_or_else(|| "<text>".to_owned());
        Ok(Self {
            tokens: tokenize(lines)?,
            index: 0,
            ctx: ParserContext::new(name.as_str()),
            map_expect_value: Vec::new(),
            done: false,
        })
    }

    /// Preprocess and parse in-memory text with default settings.
    pub fn from_str(source_name: &str, text: &str) -> Result<Self> {
        let lines = Preprocessor::new().preprocess_str(source_name, text)?;
        Self::new(&lines)
    }

    fn peek(&self) -> Option<&Positioned> {
        self.tokens.get(self.index)
    }

    fn bump(&mut self) -> Option<Positioned> {
        let token = self.tokens.get(self.index).cloned();
        if let Some(t) = &token {
            self.ctx.file = Rc::clone(&t.file);
            self.ctx.line = t.line;
            self.index += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> Error {
        self.ctx.grammar_error(message)
    }

    fn expect_punct(&mut self, punct: char) -> Result<()> {
        match self.bump() {
            Some(t) if t.token == Token::Punct(punct) => Ok(()),
            Some(t) => Err(self.error(format!("expected '{punct}', found {}", describe(&t.token)))),
            None => Err(self.error(format!("expected '{punct}', found end of input"))),
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<String> {
        match self.bump() {
            Some(Positioned {
                token: Token::Word(word),
                ..
            }) => Ok(word),
            Some(t) => Err(self.error(format!("expected {what}, found {}", describe(&t.token)))),
            None => Err(self.error(format!("expected {what}, found end of input"))),
        }
    }

    /// `name? ('&' addr)? '=' value ';'`
    fn parse_item(&mut self) -> Result<ParseEvent> {
        let mut meta = OwnedMeta::default();
        if let Some(t) = self.peek() {
            if let Token::Word(word) = &t.token {
                meta.property_name = word.clone();
                self.bump();
            }
        }
        if matches!(self.peek(), Some(t) if t.token == Token::Punct('&')) {
            self.bump();
            let token = self.expect_word("an address")?;
            meta.address = Some(AddressString::from_token(&token)?);
        }
        self.expect_punct('=')?;
        self.parse_value(meta)
    }

    /// The right-hand side of an item, with optional `!Type@version`.
    fn parse_value(&mut self, mut meta: OwnedMeta) -> Result<ParseEvent> {
        if matches!(self.peek(), Some(t) if t.token == Token::Punct('!')) {
            self.bump();
            meta.type_name = Some(self.expect_word("a type name")?);
            if matches!(self.peek(), Some(t) if t.token == Token::Punct('@')) {
                self.bump();
                let word = self.expect_word("a version number")?;
                let version = word
                    .parse::<u8>()
                    .map_err(|_| self.error(format!("bad version '{word}'")))?;
                meta.version = Some(version);
            }
        }

        let Some(t) = self.bump() else {
            return Err(self.error("expected a value, found end of input"));
        };
        match t.token {
            Token::Punct('{') => {
                self.ctx.push_state(ParserState::Block);
                Ok(ParseEvent::BlockBegin(meta))
            }
            Token::Punct('[') => {
                self.ctx.push_state(ParserState::List);
                Ok(ParseEvent::ListBegin(meta))
            }
            Token::Punct('<') => {
                self.ctx.push_state(ParserState::Map);
                self.map_expect_value.push(false);
                Ok(ParseEvent::MapBegin(meta))
            }
            Token::Punct('*') => {
                let token = self.expect_word("an address")?;
                self.expect_punct(';')?;
                Ok(ParseEvent::Pointer(meta, AddressString::from_token(&token)?))
            }
            Token::Str(text) => {
                self.ctx.push_state(ParserState::ReadValue);
                self.expect_punct(';')?;
                self.ctx.pop_state(ParserState::ReadValue)?;
                Ok(ParseEvent::Atomic(meta, AtomicValue::Str(text)))
            }
            Token::Word(word) => {
                self.ctx.push_state(ParserState::ReadValue);
                self.expect_punct(';')?;
                self.ctx.pop_state(ParserState::ReadValue)?;
                if word == "null" {
                    Ok(ParseEvent::Null(meta))
                } else {
                    Ok(ParseEvent::Atomic(meta, AtomicValue::Str(word)))
                }
            }
            token => Err(self.error(format!("expected a value, found {}", describe(&token)))),
        }
    }

    /// The next token if it closes a container.
    fn close_punct(&self) -> Option<char> {
        match self.peek() {
            Some(Positioned {
                token: Token::Punct(c @ ('}' | ']' | '>')),
                ..
            }) => Some(*c),
            _ => None,
        }
    }

    fn mismatched_close(&self, punct: char) -> Error {
        self.error(format!(
            "cannot leave state {}: parser is in state {}",
            close_state(punct),
            self.ctx.state()
        ))
    }

    fn parse_map_entry(&mut self) -> Result<ParseEvent> {
        let expect_value = *self
            .map_expect_value
            .last()
            .expect("map state implies a map frame");
        if expect_value {
            *self.map_expect_value.last_mut().expect("checked above") = false;
            return self.parse_value(OwnedMeta::default());
        }

        if matches!(self.peek(), Some(t) if t.token == Token::Punct('>')) {
            self.bump();
            self.ctx.pop_state(ParserState::Map)?;
            self.map_expect_value.pop();
            self.expect_punct(';')?;
            return Ok(ParseEvent::MapEnd);
        }

        let key = match self.bump() {
            Some(Positioned {
                token: Token::Word(word),
                ..
            }) => word,
            Some(Positioned {
                token: Token::Str(text),
                ..
            }) => text,
            Some(t) => {
                return Err(self.error(format!("expected a map key, found {}", describe(&t.token))));
            }
            None => return Err(self.error("unterminated map")),
        };
        self.expect_punct('=')?;
        *self.map_expect_value.last_mut().expect("checked above") = true;
        Ok(ParseEvent::Atomic(OwnedMeta::default(), AtomicValue::Str(key)))
    }
}

fn close_state(punct: char) -> ParserState {
    match punct {
        '}' => ParserState::Block,
        ']' => ParserState::List,
        _ => ParserState::Map,
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) => format!("'{w}'"),
        Token::Str(_) => "a string literal".to_owned(),
        Token::Punct(c) => format!("'{c}'"),
    }
}

impl FormatParser for TextParser {
    fn next_event(&mut self) -> Result<ParseEvent> {
        if self.done {
            return Ok(ParseEvent::End);
        }
        match self.ctx.state() {
            ParserState::TopLevel => {
                if self.peek().is_none() {
                    self.done = true;
                    return Ok(ParseEvent::End);
                }
                self.parse_item()
            }
            ParserState::Block => {
                match self.close_punct() {
                    Some('}') => {
                        self.bump();
                        self.ctx.pop_state(ParserState::Block)?;
                        self.expect_punct(';')?;
                        return Ok(ParseEvent::BlockEnd);
                    }
                    Some(other) => {
                        self.bump();
                        return Err(self.mismatched_close(other));
                    }
                    None => {}
                }
                if self.peek().is_none() {
                    return Err(self.error("unterminated block"));
                }
                self.parse_item()
            }
            ParserState::List => {
                match self.close_punct() {
                    Some(']') => {
                        self.bump();
                        self.ctx.pop_state(ParserState::List)?;
                        self.expect_punct(';')?;
                        return Ok(ParseEvent::ListEnd);
                    }
                    Some(other) => {
                        self.bump();
                        return Err(self.mismatched_close(other));
                    }
                    None => {}
                }
                if self.peek().is_none() {
                    return Err(self.error("unterminated list"));
                }
                self.parse_item()
            }
            ParserState::Map => {
                if let Some(other @ ('}' | ']')) = self.close_punct() {
                    self.bump();
                    return Err(self.mismatched_close(other));
                }
                if self.peek().is_none() {
                    return Err(self.error("unterminated map"));
                }
                self.parse_map_entry()
            }
            other => Err(self.error(format!("parser stuck in state {other}"))),
        }
    }

    fn position(&self) -> (String, u32) {
        (self.ctx.file.as_ref().to_owned(), self.ctx.line)
    }
}
