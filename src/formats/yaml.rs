//! Indentation-structured codec in the YAML style.
//!
//! The writer emits block style only: two-space indentation, `- ` list
//! elements, `key: value` entries. Type, version and address annotations
//! ride on the entry line as `!Type@version` and `&addr`; references are
//! `*addr` and null is `~`. Top-level records after the root use their
//! address as the entry key (`&addr: !Type`).
//!
//! The parser additionally accepts flow style (`{a: 1, b: 2}`, `[1, 2]`)
//! and the `null` spelling, so hand-written streams stay flexible. Flow
//! items expand into queued events. Since the indented-mapping syntax has
//! no dedicated map markers, associative containers are emitted and parsed
//! in block shape; the load applier accepts that shape for map types.
//!
//! The same preprocessor directives as the text format run first;
//! any other `#` starts a comment outside of quoted strings.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::address::AddressString;
use crate::context::{ParserContext, ParserState};
use crate::descriptor::AtomicValue;
use crate::error::{Error, Result};
use crate::formats::preprocessor::{Preprocessor, SourceLine};
use crate::formats::{FormatParser, FormatWriter, ItemMeta, OwnedMeta, ParseEvent};

const INDENT: &str = "  ";

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

enum WriterFrame {
    Block,
    List,
    Map { pending: Option<String> },
}

/// Renders items as indented YAML-style text.
pub struct YamlWriter {
    out: String,
    stack: Vec<WriterFrame>,
}

impl YamlWriter {
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
            self.out.push_str(INDENT);
        }
    }

    /// The entry key: the property name, or the address for unnamed
    /// top-level records.
    fn entry_key(meta: &ItemMeta<'_>) -> String {
        if !meta.property_name.is_empty() {
            meta.property_name.to_owned()
        } else if let Some(address) = meta.address {
            format!("&{address}")
        } else {
            "~".to_owned()
        }
    }

    fn annotations(meta: &ItemMeta<'_>) -> String {
        let mut out = String::new();
        if let Some(type_name) = meta.type_name {
            out.push_str(" !");
            out.push_str(type_name);
            if let Some(version) = meta.version {
                out.push('@');
                out.push_str(&version.to_string());
            }
        }
        if !meta.property_name.is_empty() {
            // For unnamed records the address is the key instead.
            if let Some(address) = meta.address {
                out.push_str(&format!(" &{address}"));
            }
        }
        out
    }

    fn render(value: &AtomicValue) -> String {
        match value {
            AtomicValue::Str(s) => quote(s),
            AtomicValue::Char(c) => quote(&c.to_string()),
            other => other.to_text(),
        }
    }

    /// A key rendered bare when possible, quoted otherwise.
    fn render_key(value: &AtomicValue) -> String {
        match value {
            AtomicValue::Str(s)
                if !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                s.clone()
            }
            other => Self::render(other),
        }
    }

    fn scalar_entry(&mut self, meta: &ItemMeta<'_>, rendered: &str) -> Result<()> {
        match self.stack.last_mut() {
            Some(WriterFrame::Map { pending }) => match pending.take() {
                Some(key) => {
                    self.indent();
                    self.out.push_str(&key);
                    self.out.push_str(": ");
                    self.out.push_str(rendered);
                    self.out.push('\n');
                    Ok(())
                }
                None => Err(Error::protocol("map keys must be scalar values")),
            },
            Some(WriterFrame::List) => {
                self.indent();
                self.out.push_str("- ");
                self.out.push_str(rendered);
                self.out.push('\n');
                Ok(())
            }
            _ => {
                self.indent();
                let key = Self::entry_key(meta);
                let annotations = Self::annotations(meta);
                self.out.push_str(&key);
                self.out.push(':');
                self.out.push_str(&annotations);
                self.out.push(' ');
                self.out.push_str(rendered);
                self.out.push('\n');
                Ok(())
            }
        }
    }

    fn open(&mut self, meta: &ItemMeta<'_>, frame: WriterFrame) -> Result<()> {
        match self.stack.last_mut() {
            Some(WriterFrame::Map { pending }) => match pending.take() {
                Some(key) => {
                    self.indent();
                    self.out.push_str(&key);
                    self.out.push(':');
                    self.out.push('\n');
                }
                None => {
                    return Err(Error::protocol("map keys must be scalar values"));
                }
            },
            Some(WriterFrame::List) => {
                self.indent();
                self.out.push('-');
                self.out.push_str(&Self::annotations(meta));
                self.out.push('\n');
            }
            _ => {
                self.indent();
                self.out.push_str(&Self::entry_key(meta));
                self.out.push(':');
                self.out.push_str(&Self::annotations(meta));
                self.out.push('\n');
            }
        }
        self.stack.push(frame);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stack
            .pop()
            .map(|_| ())
            .ok_or_else(|| Error::protocol("container close without open"))
    }
}

impl Default for YamlWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatWriter for YamlWriter {
    fn comment(&mut self, text: &str) -> Result<()> {
        self.indent();
        self.out.push_str("# ");
        self.out.push_str(text);
        self.out.push('\n');
        Ok(())
    }

    fn atomic(&mut self, meta: &ItemMeta<'_>, value: &AtomicValue) -> Result<()> {
        // Map keys are buffered until their value arrives.
        if let Some(WriterFrame::Map { pending }) = self.stack.last_mut() {
            if pending.is_none() {
                *pending = Some(Self::render_key(value));
                return Ok(());
            }
        }
        let rendered = Self::render(value);
        self.scalar_entry(meta, &rendered)
    }

    fn null(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.scalar_entry(meta, "~")
    }

    fn pointer(&mut self, meta: &ItemMeta<'_>, target: AddressString) -> Result<()> {
        let rendered = format!("*{target}");
        self.scalar_entry(meta, &rendered)
    }

    fn begin_block(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.open(meta, WriterFrame::Block)
    }

    fn end_block(&mut self) -> Result<()> {
        self.close()
    }

    fn begin_list(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.open(meta, WriterFrame::List)
    }

    fn end_list(&mut self) -> Result<()> {
        self.close()
    }

    fn begin_map(&mut self, meta: &ItemMeta<'_>) -> Result<()> {
        self.open(meta, WriterFrame::Map { pending: None })
    }

    fn end_map(&mut self) -> Result<()> {
        self.close()
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
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum FrameKind {
    Block,
    List,
}

struct Frame {
    /// Column at which this container's items sit.
    indent: usize,
    kind: FrameKind,
}

struct Line {
    indent: usize,
    content: String,
    file: Rc<str>,
    line: u32,
}

/// Decodes items from indentation-structured text.
pub struct YamlParser {
    lines: Vec<Line>,
    index: usize,
    queue: VecDeque<ParseEvent>,
    frames: Vec<Frame>,
    ctx: ParserContext,
    done: bool,
}

impl YamlParser {
    pub fn new(source: &[SourceLine]) -> Result<Self> {
        let mut lines = Vec::new();
        for raw in source {
            if raw.text.contains('\t') {
                return Err(Error::grammar(
                    raw.file.as_ref(),
                    raw.line,
                    "tabs are not allowed in indentation-structured text",
                ));
            }
            let stripped = strip_comment(&raw.text);
            let content = stripped.trim_end();
            if content.trim().is_empty() {
                continue;
            }
            let indent = content.len() - content.trim_start().len();
            lines.push(Line {
                indent,
                content: content.trim_start().to_owned(),
                file: Rc::clone(&raw.file),
                line: raw.line,
            });
        }
        let file = lines
            .first()
            .map(|l| Rc::clone(&l.file))
            .unwrap_or_else(|| Rc::from("<stream>"));
        Ok(Self {
            lines,
            index: 0,
            queue: VecDeque::new(),
            frames: Vec::new(),
            ctx: ParserContext::new(file),
            done: false,
        })
    }

    /// Preprocess and parse in-memory text. Directive lines run through
    /// the preprocessor; unrecognized `#` lines are comments.
    pub fn from_str(source_name: &str, text: &str) -> Result<Self> {
        let lines = Preprocessor::new()
            .pass_unknown_directives()
            .preprocess_str(source_name, text)?;
        Self::new(&lines)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        self.ctx.grammar_error(message)
    }

    fn pop_frame(&mut self) -> Result<ParseEvent> {
        let frame = self.frames.pop().expect("caller checked a frame exists");
        match frame.kind {
            FrameKind::Block => {
                self.ctx.pop_state(ParserState::Block)?;
                Ok(ParseEvent::BlockEnd)
            }
            FrameKind::List => {
                self.ctx.pop_state(ParserState::List)?;
                Ok(ParseEvent::ListEnd)
            }
        }
    }

    /// Indent of the next line, and whether it is a list element.
    fn peek_line(&self) -> Option<(usize, bool)> {
        self.lines
            .get(self.index)
            .map(|l| (l.indent, l.content.starts_with('-')))
    }

    /// Produce the events for the next line (or close frames) into the
    /// queue.
    fn advance(&mut self) -> Result<()> {
        let Some(line) = self.lines.get(self.index) else {
            while !self.frames.is_empty() {
                let end = self.pop_frame()?;
                self.queue.push_back(end);
            }
            self.queue.push_back(ParseEvent::End);
            self.done = true;
            return Ok(());
        };

        let indent = line.indent;
        let content = line.content.clone();
        self.ctx.file = Rc::clone(&line.file);
        self.ctx.line = line.line;
        self.index += 1;

        // Close frames the new line has dedented out of.
        loop {
            let Some(frame) = self.frames.last() else {
                if indent != 0 {
                    return Err(self.error("unexpected indentation at top level"));
                }
                break;
            };
            let (frame_indent, frame_kind) = (frame.indent, frame.kind);
            if indent > frame_indent {
                return Err(self.error("unexpected indentation"));
            }
            if indent < frame_indent
                || (frame_kind == FrameKind::List && !content.starts_with('-'))
            {
                let end = self.pop_frame()?;
                self.queue.push_back(end);
                continue;
            }
            break;
        }

        if matches!(self.frames.last(), Some(f) if f.kind == FrameKind::List) {
            let rest = content
                .strip_prefix('-')
                .expect("list items start with '-'")
                .trim_start()
                .to_owned();
            if rest.starts_with("- ") || rest == "-" {
                return Err(self.error("nested sequences must be indented"));
            }
            let events = self.parse_value(OwnedMeta::default(), &rest, indent)?;
            self.queue.extend(events);
            return Ok(());
        }

        // Block or top-level entry: `key: value`.
        let Some((key, rest)) = split_entry(&content) else {
            return Err(self.error(format!("expected 'key: value', found '{content}'")));
        };
        let mut meta = OwnedMeta::default();
        let key = key.trim();
        if let Some(address) = key.strip_prefix('&') {
            meta.address = Some(AddressString::from_token(address)?);
        } else if key.starts_with('"') {
            meta.property_name = unquote(key, &self.ctx)?;
        } else {
            meta.property_name = key.to_owned();
        }
        let events = self.parse_value(meta, rest.trim(), indent)?;
        self.queue.extend(events);
        Ok(())
    }

    /// Decode an entry's value part, annotations first.
    fn parse_value(
        &mut self,
        mut meta: OwnedMeta,
        rest: &str,
        indent: usize,
    ) -> Result<Vec<ParseEvent>> {
        let mut rest = rest.trim();
        loop {
            if let Some(after) = rest.strip_prefix('!') {
                let (token, tail) = split_token(after);
                let (type_name, version) = match token.split_once('@') {
                    Some((t, v)) => {
                        let version = v
                            .parse::<u8>()
                            .map_err(|_| self.error(format!("bad version '{v}'")))?;
                        (t, Some(version))
                    }
                    None => (token, None),
                };
                meta.type_name = Some(type_name.to_owned());
                meta.version = version;
                rest = tail.trim_start();
            } else if let Some(after) = rest.strip_prefix('&') {
                let (token, tail) = split_token(after);
                meta.address = Some(AddressString::from_token(token)?);
                rest = tail.trim_start();
            } else {
                break;
            }
        }

        if rest.is_empty() {
            // Children on the following lines decide the container kind.
            return match self.peek_line() {
                Some((child_indent, is_list)) if child_indent > indent => {
                    if is_list {
                        self.frames.push(Frame {
                            indent: child_indent,
                            kind: FrameKind::List,
                        });
                        self.ctx.push_state(ParserState::List);
                        Ok(vec![ParseEvent::ListBegin(meta)])
                    } else {
                        self.frames.push(Frame {
                            indent: child_indent,
                            kind: FrameKind::Block,
                        });
                        self.ctx.push_state(ParserState::Block);
                        Ok(vec![ParseEvent::BlockBegin(meta)])
                    }
                }
                _ => Ok(vec![ParseEvent::Null(meta)]),
            };
        }

        if let Some(address) = rest.strip_prefix('*') {
            return Ok(vec![ParseEvent::Pointer(
                meta,
                AddressString::from_token(address.trim())?,
            )]);
        }
        if rest == "~" || rest == "null" || rest == "Null" || rest == "NULL" {
            return Ok(vec![ParseEvent::Null(meta)]);
        }
        if rest.starts_with('{') || rest.starts_with('[') {
            let mut cursor = FlowCursor::new(rest);
            let mut events = Vec::new();
            self.parse_flow_value(meta, &mut cursor, &mut events)?;
            cursor.skip_ws();
            if !cursor.at_end() {
                return Err(self.error("trailing text after flow value"));
            }
            return Ok(events);
        }
        if rest.starts_with('"') {
            return Ok(vec![ParseEvent::Atomic(
                meta,
                AtomicValue::Str(unquote(rest, &self.ctx)?),
            )]);
        }
        Ok(vec![ParseEvent::Atomic(
            meta,
            AtomicValue::Str(rest.to_owned()),
        )])
    }

    // -- flow style ---------------------------------------------------------

    fn parse_flow_value(
        &mut self,
        meta: OwnedMeta,
        cursor: &mut FlowCursor<'_>,
        out: &mut Vec<ParseEvent>,
    ) -> Result<()> {
        cursor.skip_ws();
        match cursor.peek() {
            Some('{') => {
                cursor.bump();
                self.ctx.push_state(ParserState::FlowBlock);
                out.push(ParseEvent::BlockBegin(meta));
                loop {
                    cursor.skip_ws();
                    if cursor.peek() == Some('}') {
                        cursor.bump();
                        break;
                    }
                    let key = self.flow_scalar(cursor)?;
                    cursor.skip_ws();
                    if cursor.bump() != Some(':') {
                        return Err(self.error("expected ':' in flow mapping"));
                    }
                    let entry = OwnedMeta {
                        property_name: key,
                        ..OwnedMeta::default()
                    };
                    self.parse_flow_value(entry, cursor, out)?;
                    cursor.skip_ws();
                    match cursor.peek() {
                        Some(',') => {
                            cursor.bump();
                        }
                        Some('}') => {}
                        _ => return Err(self.error("expected ',' or '}' in flow mapping")),
                    }
                }
                self.ctx.pop_state(ParserState::FlowBlock)?;
                out.push(ParseEvent::BlockEnd);
                Ok(())
            }
            Some('[') => {
                cursor.bump();
                self.ctx.push_state(ParserState::FlowList);
                out.push(ParseEvent::ListBegin(meta));
                loop {
                    cursor.skip_ws();
                    if cursor.peek() == Some(']') {
                        cursor.bump();
                        break;
                    }
                    self.parse_flow_value(OwnedMeta::default(), cursor, out)?;
                    cursor.skip_ws();
                    match cursor.peek() {
                        Some(',') => {
                            cursor.bump();
                        }
                        Some(']') => {}
                        _ => return Err(self.error("expected ',' or ']' in flow sequence")),
                    }
                }
                self.ctx.pop_state(ParserState::FlowList)?;
                out.push(ParseEvent::ListEnd);
                Ok(())
            }
            Some('*') => {
                cursor.bump();
                let token = self.flow_scalar(cursor)?;
                out.push(ParseEvent::Pointer(meta, AddressString::from_token(&token)?));
                Ok(())
            }
            Some(_) => {
                self.ctx.push_state(ParserState::FlowValue);
                let token = self.flow_scalar(cursor)?;
                self.ctx.pop_state(ParserState::FlowValue)?;
                if token == "~" || token == "null" {
                    out.push(ParseEvent::Null(meta));
                } else {
                    out.push(ParseEvent::Atomic(meta, AtomicValue::Str(token)));
                }
                Ok(())
            }
            None => Err(self.error("unterminated flow value")),
        }
    }

    fn flow_scalar(&self, cursor: &mut FlowCursor<'_>) -> Result<String> {
        cursor.skip_ws();
        if cursor.peek() == Some('"') {
            let raw = cursor.take_quoted(&self.ctx)?;
            return unquote(&raw, &self.ctx);
        }
        let token = cursor.take_while(|c| !",:]}".contains(c));
        let token = token.trim().to_owned();
        if token.is_empty() {
            return Err(self.error("expected a flow scalar"));
        }
        Ok(token)
    }
}

impl FormatParser for YamlParser {
    fn next_event(&mut self) -> Result<ParseEvent> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Ok(event);
            }
            if self.done {
                return Ok(ParseEvent::End);
            }
            self.advance()?;
        }
    }

    fn position(&self) -> (String, u32) {
        (self.ctx.file.as_ref().to_owned(), self.ctx.line)
    }
}

/// Cut a line at the entry colon, honoring quoted keys.
fn split_entry(content: &str) -> Option<(&str, &str)> {
    let mut in_quote = false;
    let mut escaped = false;
    for (at, c) in content.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            ':' if !in_quote => {
                let rest = &content[at + 1..];
                if rest.is_empty() || rest.starts_with(' ') {
                    return Some((&content[..at], rest));
                }
            }
            _ => {}
        }
    }
    None
}

/// First whitespace-delimited token and the remainder.
fn split_token(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(at) => (&s[..at], &s[at..]),
        None => (s, ""),
    }
}

fn strip_comment(raw: &str) -> &str {
    let mut in_quote = false;
    let mut escaped = false;
    for (at, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            '#' if !in_quote => return &raw[..at],
            _ => {}
        }
    }
    raw
}

fn unquote(s: &str, ctx: &ParserContext) -> Result<String> {
    let inner = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| ctx.grammar_error(format!("malformed string '{s}'")))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            // Octal: one to three digits, \0 included.
            Some(d @ '0'..='7') => {
                let mut value = d as u32 - '0' as u32;
                for _ in 0..2 {
                    let Some(digit) = chars.peek().and_then(|c| c.to_digit(8)) else {
                        break;
                    };
                    value = value * 8 + digit;
                    chars.next();
                }
                match char::from_u32(value) {
                    Some(c) => out.push(c),
                    None => return Err(ctx.grammar_error("invalid octal escape")),
                }
            }
            Some('x') => {
                let hi = chars.next().and_then(|c| c.to_digit(16));
                let lo = chars.next().and_then(|c| c.to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        let c = char::from_u32(hi * 16 + lo)
                            .ok_or_else(|| ctx.grammar_error("invalid \\x escape"))?;
                        out.push(c);
                    }
                    _ => return Err(ctx.grammar_error("invalid \\x escape")),
                }
            }
            other => {
                return Err(ctx.grammar_error(format!(
                    "unknown escape '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

/// Character cursor for flow-style fragments.
struct FlowCursor<'s> {
    s: &'s str,
    pos: usize,
}

impl<'s> FlowCursor<'s> {
    fn new(s: &'s str) -> Self {
        Self { s, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.s[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.s.len()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> &'s str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if keep(c)) {
            self.bump();
        }
        &self.s[start..self.pos]
    }

    /// Consume a quoted string including its quotes, escapes untouched.
    fn take_quoted(&mut self, ctx: &ParserContext) -> Result<String> {
        let start = self.pos;
        self.bump();
        loop {
            match self.bump() {
                Some('\\') => {
                    self.bump();
                }
                Some('"') => return Ok(self.s[start..self.pos].to_owned()),
                Some(_) => {}
                None => return Err(ctx.grammar_error("unterminated string literal")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::IntWidth;

    fn parse_all(text: &str) -> Result<Vec<ParseEvent>> {
        let mut parser = YamlParser::from_str("test.yaml", text)?;
        let mut events = Vec::new();
        loop {
            let event = parser.next_event()?;
            if matches!(event, ParseEvent::End) {
                return Ok(events);
            }
            events.push(event);
        }
    }

    #[test]
    fn writer_renders_block_style() {
        let mut w = YamlWriter::new();
        w.begin_block(&ItemMeta {
            property_name: "scene",
            type_name: Some("Scene"),
            version: Some(1),
            address: None,
        })
        .unwrap();
        w.atomic(
            &ItemMeta {
                property_name: "name",
                ..ItemMeta::default()
            },
            &AtomicValue::Str("hub".into()),
        )
        .unwrap();
        w.begin_list(&ItemMeta {
            property_name: "items",
            ..ItemMeta::default()
        })
        .unwrap();
        w.atomic(&ItemMeta::default(), &AtomicValue::Signed(4, IntWidth::W4))
            .unwrap();
        w.end_list().unwrap();
        w.end_block().unwrap();

        assert_eq!(
            w.as_str(),
            "scene: !Scene@1\n  name: \"hub\"\n  items:\n    - 4\n"
        );
    }

    #[test]
    fn written_stream_parses_back() {
        let mut w = YamlWriter::new();
        w.begin_block(&ItemMeta {
            property_name: "node",
            type_name: Some("Node"),
            version: Some(0),
            address: None,
        })
        .unwrap();
        w.pointer(
            &ItemMeta {
                property_name: "next",
                ..ItemMeta::default()
            },
            AddressString::from_token("5a3f").unwrap(),
        )
        .unwrap();
        w.null(&ItemMeta {
            property_name: "prev",
            ..ItemMeta::default()
        })
        .unwrap();
        w.end_block().unwrap();
        w.begin_block(&ItemMeta {
            property_name: "",
            type_name: Some("Node"),
            version: Some(0),
            address: Some(AddressString::from_token("5a3f").unwrap()),
        })
        .unwrap();
        w.atomic(
            &ItemMeta {
                property_name: "label",
                ..ItemMeta::default()
            },
            &AtomicValue::Str("tail".into()),
        )
        .unwrap();
        w.end_block().unwrap();

        let events = parse_all(w.as_str()).unwrap();
        assert!(matches!(&events[0], ParseEvent::BlockBegin(m)
            if m.property_name == "node" && m.type_name.as_deref() == Some("Node")));
        assert!(matches!(&events[1], ParseEvent::Pointer(m, a)
            if m.property_name == "next" && a.as_str() == "5a3f"));
        assert!(matches!(&events[2], ParseEvent::Null(_)));
        assert!(matches!(&events[3], ParseEvent::BlockEnd));
        assert!(matches!(&events[4], ParseEvent::BlockBegin(m)
            if m.property_name.is_empty()
                && m.address.map(|a| a.to_string()) == Some("5a3f".into())
                && m.type_name.as_deref() == Some("Node")));
        assert!(matches!(&events[5], ParseEvent::Atomic(m, AtomicValue::Str(s))
            if m.property_name == "label" && s == "tail"));
        assert!(matches!(&events[6], ParseEvent::BlockEnd));
    }

    #[test]
    fn nested_lists_and_blocks_close_on_dedent() {
        let text = "root:\n  children:\n    -\n      name: \"a\"\n    -\n      name: \"b\"\n  tag: done\n";
        let events = parse_all(text).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.describe()).collect();
        assert_eq!(
            kinds,
            [
                "block", "list", "block", "scalar", "end of block", "block", "scalar",
                "end of block", "end of list", "scalar", "end of block"
            ]
        );
    }

    #[test]
    fn flow_style_expands_to_events() {
        let text = "point: {x: 1, y: 2}\nitems: [1, ~, \"s\"]\n";
        let events = parse_all(text).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.describe()).collect();
        assert_eq!(
            kinds,
            [
                "block", "scalar", "scalar", "end of block", "list", "scalar", "null", "scalar",
                "end of list"
            ]
        );
        assert!(matches!(&events[1], ParseEvent::Atomic(m, AtomicValue::Str(v))
            if m.property_name == "x" && v == "1"));
    }

    #[test]
    fn null_spellings() {
        let events = parse_all("a: ~\nb: null\nc:\n").unwrap();
        assert_eq!(events.len(), 3);
        assert!(
            events
                .iter()
                .all(|e| matches!(e, ParseEvent::Null(_)))
        );
    }

    #[test]
    fn octal_escapes_decode() {
        let events = parse_all("text: \"\\101\\102\\0end\"\n").unwrap();
        assert!(
            matches!(&events[0], ParseEvent::Atomic(_, AtomicValue::Str(s)) if s == "AB\0end")
        );
    }

    #[test]
    fn comments_are_stripped_outside_strings() {
        let events = parse_all("a: 1 # trailing\nb: \"x # y\"\n# whole line\n").unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ParseEvent::Atomic(_, AtomicValue::Str(s)) if s == "x # y"));
    }

    #[test]
    fn directives_run_before_parsing() {
        let events = parse_all("#define SIZE 4\n#ifdef SIZE\na: SIZE\n#endif\n").unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ParseEvent::Atomic(_, AtomicValue::Str(s)) if s == "4"));
    }

    #[test]
    fn bad_indentation_is_a_grammar_error() {
        let err = parse_all("a:\n  b: 1\n    c: 2\n").unwrap_err();
        assert!(matches!(err, Error::Grammar { .. }));
    }

    #[test]
    fn tabs_are_rejected() {
        let err = parse_all("a:\n\tb: 1\n").unwrap_err();
        assert!(matches!(err, Error::Grammar { .. }));
    }

    #[test]
    fn map_written_in_block_shape() {
        let mut w = YamlWriter::new();
        w.begin_map(&ItemMeta {
            property_name: "limits",
            ..ItemMeta::default()
        })
        .unwrap();
        w.atomic(&ItemMeta::default(), &AtomicValue::Str("depth".into()))
            .unwrap();
        w.atomic(&ItemMeta::default(), &AtomicValue::Unsigned(8, IntWidth::W4))
            .unwrap();
        w.end_map().unwrap();
        assert_eq!(w.as_str(), "limits:\n  depth: 8\n");

        let events = parse_all(w.as_str()).unwrap();
        assert!(matches!(&events[0], ParseEvent::BlockBegin(_)));
        assert!(matches!(&events[1], ParseEvent::Atomic(m, AtomicValue::Str(v))
            if m.property_name == "depth" && v == "8"));
        assert!(matches!(&events[2], ParseEvent::BlockEnd));
    }
}
