//! Line preprocessor for the text format.
//!
//! Runs before tokenization and resolves `#include`, object-like
//! `#define`/`#undef` substitution and the conditional directives
//! (`#ifdef`, `#ifndef`, `#if`, `#elif`, `#else`, `#endif`). The output is
//! a flat list of [`SourceLine`]s, each tagged with the file and line it
//! originally came from so downstream grammar errors point at the right
//! place even across includes.
//!
//! `#if` expressions support integer literals, macro names (undefined
//! names evaluate to 0), `defined(NAME)`, `!`, `==`, `!=` and parentheses.
//! Substitution is a single pass on identifier boundaries and does not
//! touch string literals.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Error, Result};

/// One line of preprocessed text with its original position.
#[derive(Debug, Clone)]
pub struct SourceLine {
    pub text: String,
    pub file: Rc<str>,
    pub line: u32,
}

/// Preprocessor configuration: search paths and pre-set macros.
pub struct Preprocessor {
    include_dirs: Vec<PathBuf>,
    defines: HashMap<String, String>,
    pass_unknown: bool,
}

struct Conditional {
    /// Lines in the current branch are emitted.
    active: bool,
    /// Some branch of this conditional has already been taken.
    taken: bool,
    seen_else: bool,
    /// Whether the enclosing context was active.
    parent_active: bool,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            include_dirs: Vec::new(),
            defines: HashMap::new(),
            pass_unknown: false,
        }
    }

    /// Drop unrecognized `#` lines instead of failing. The YAML codec
    /// shares `#` between comments and directives.
    pub fn pass_unknown_directives(&mut self) -> &mut Self {
        self.pass_unknown = true;
        self
    }

    /// Add a directory searched by `#include`.
    pub fn add_include_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Pre-set a macro, as if the stream started with `#define`.
    pub fn define(&mut self, name: &str, value: &str) -> &mut Self {
        self.defines.insert(name.to_owned(), value.to_owned());
        self
    }

    /// Preprocess in-memory text. `source_name` is used in diagnostics.
    pub fn preprocess_str(&mut self, source_name: &str, text: &str) -> Result<Vec<SourceLine>> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        self.process(source_name, None, text, &mut stack, &mut out)?;
        Ok(out)
    }

    /// Preprocess a file from disk.
    pub fn preprocess_file(&mut self, path: &Path) -> Result<Vec<SourceLine>> {
        let text = std::fs::read_to_string(path)?;
        let mut out = Vec::new();
        let mut stack = vec![path.to_path_buf()];
        self.process(
            &path.display().to_string(),
            path.parent().map(Path::to_path_buf),
            &text,
            &mut stack,
            &mut out,
        )?;
        Ok(out)
    }

    fn process(
        &mut self,
        source_name: &str,
        source_dir: Option<PathBuf>,
        text: &str,
        include_stack: &mut Vec<PathBuf>,
        out: &mut Vec<SourceLine>,
    ) -> Result<()> {
        let file: Rc<str> = Rc::from(source_name);
        let mut conds: Vec<Conditional> = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = index as u32 + 1;
            let active = conds.last().map_or(true, |c| c.active);
            let trimmed = raw.trim_start();

            if let Some(directive) = trimmed.strip_prefix('#') {
                self.directive(
                    directive,
                    &file,
                    line,
                    source_dir.as_deref(),
                    &mut conds,
                    include_stack,
                    out,
                )?;
            } else if active && !trimmed.is_empty() {
                out.push(SourceLine {
                    text: self.expand(raw),
                    file: Rc::clone(&file),
                    line,
                });
            }
        }

        if !conds.is_empty() {
            return Err(Error::grammar(
                file.as_ref(),
                text.lines().count() as u32,
                "unterminated conditional directive",
            ));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn directive(
        &mut self,
        directive: &str,
        file: &Rc<str>,
        line: u32,
        source_dir: Option<&Path>,
        conds: &mut Vec<Conditional>,
        include_stack: &mut Vec<PathBuf>,
        out: &mut Vec<SourceLine>,
    ) -> Result<()> {
        let directive = directive.trim();
        let (word, rest) = match directive.find(char::is_whitespace) {
            Some(at) => (&directive[..at], directive[at..].trim()),
            None => (directive, ""),
        };
        let active = conds.last().map_or(true, |c| c.active);

        match word {
            "include" if active => {
                let (target, angled) = parse_include_path(rest)
                    .ok_or_else(|| Error::grammar(file.as_ref(), line, "malformed #include"))?;
                let resolved = self
                    .resolve_include(source_dir.filter(|_| !angled), target)
                    .ok_or_else(|| {
                        Error::grammar(
                            file.as_ref(),
                            line,
                            format!("cannot resolve #include \"{target}\""),
                        )
                    })?;
                if include_stack.contains(&resolved) {
                    return Err(Error::grammar(
                        file.as_ref(),
                        line,
                        format!("recursive #include of '{}'", resolved.display()),
                    ));
                }
                let text = std::fs::read_to_string(&resolved)?;
                include_stack.push(resolved.clone());
                self.process(
                    &resolved.display().to_string(),
                    resolved.parent().map(Path::to_path_buf),
                    &text,
                    include_stack,
                    out,
                )?;
                include_stack.pop();
            }
            "include" => {}
            "define" if active => {
                let (name, value) = match rest.find(char::is_whitespace) {
                    Some(at) => (&rest[..at], rest[at..].trim()),
                    None => (rest, ""),
                };
                if !is_identifier(name) {
                    return Err(Error::grammar(
                        file.as_ref(),
                        line,
                        format!("'{name}' is not a valid macro name"),
                    ));
                }
                self.defines.insert(name.to_owned(), value.to_owned());
            }
            "define" => {}
            "undef" if active => {
                self.defines.remove(rest);
            }
            "undef" => {}
            "ifdef" => {
                let cond = active && self.defines.contains_key(rest);
                conds.push(Conditional {
                    active: cond,
                    taken: cond,
                    seen_else: false,
                    parent_active: active,
                });
            }
            "ifndef" => {
                let cond = active && !self.defines.contains_key(rest);
                conds.push(Conditional {
                    active: cond,
                    taken: cond,
                    seen_else: false,
                    parent_active: active,
                });
            }
            "if" => {
                let cond = active && self.eval(rest, file, line)? != 0;
                conds.push(Conditional {
                    active: cond,
                    taken: cond,
                    seen_else: false,
                    parent_active: active,
                });
            }
            "elif" => {
                let top = conds
                    .last_mut()
                    .ok_or_else(|| Error::grammar(file.as_ref(), line, "#elif without #if"))?;
                if top.seen_else {
                    return Err(Error::grammar(file.as_ref(), line, "#elif after #else"));
                }
                if top.taken || !top.parent_active {
                    top.active = false;
                } else {
                    let value = self.eval(rest, file, line)? != 0;
                    top.active = value;
                    top.taken = value;
                }
            }
            "else" => {
                let top = conds
                    .last_mut()
                    .ok_or_else(|| Error::grammar(file.as_ref(), line, "#else without #if"))?;
                if top.seen_else {
                    return Err(Error::grammar(file.as_ref(), line, "duplicate #else"));
                }
                top.seen_else = true;
                top.active = top.parent_active && !top.taken;
                top.taken = true;
            }
            "endif" => {
                if conds.pop().is_none() {
                    return Err(Error::grammar(file.as_ref(), line, "#endif without #if"));
                }
            }
            other => {
                if !self.pass_unknown {
                    return Err(Error::grammar(
                        file.as_ref(),
                        line,
                        format!("unknown directive '#{other}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn resolve_include(&self, source_dir: Option<&Path>, target: &str) -> Option<PathBuf> {
        if let Some(dir) = source_dir {
            let candidate = dir.join(target);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        for dir in &self.include_dirs {
            let candidate = dir.join(target);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Substitute defined macros on identifier boundaries, leaving string
    /// literals alone.
    fn expand(&self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let mut chars = line.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            if c == '"' {
                // Copy the string literal verbatim, escapes included.
                out.push(c);
                while let Some((_, c)) = chars.next() {
                    out.push(c);
                    if c == '\\' {
                        if let Some((_, escaped)) = chars.next() {
                            out.push(escaped);
                        }
                    } else if c == '"' {
                        break;
                    }
                }
            } else if c.is_ascii_alphabetic() || c == '_' {
                let mut end = start + c.len_utf8();
                while let Some(&(at, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = at + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let ident = &line[start..end];
                match self.defines.get(ident) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(ident),
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    fn eval(&self, expr: &str, file: &Rc<str>, line: u32) -> Result<i64> {
        let mut parser = ExprParser {
            defines: &self.defines,
            tokens: lex_expr(expr, file, line)?,
            index: 0,
            file,
            line,
        };
        let value = parser.equality()?;
        if parser.index != parser.tokens.len() {
            return Err(Error::grammar(
                file.as_ref(),
                line,
                "trailing tokens in #if expression",
            ));
        }
        Ok(value)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

/// `"file"` searches the including file's directory first; `<file>`
/// searches the registered include directories only.
fn parse_include_path(rest: &str) -> Option<(&str, bool)> {
    let rest = rest.trim();
    if let Some(inner) = rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Some((inner, false));
    }
    rest.strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .map(|inner| (inner, true))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// --- #if expression evaluation ---------------------------------------------

#[derive(Debug, PartialEq)]
enum ExprToken {
    Int(i64),
    Name(String),
    Defined,
    Not,
    Eq,
    Ne,
    LParen,
    RParen,
}

fn lex_expr(expr: &str, file: &Rc<str>, line: u32) -> Result<Vec<ExprToken>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(ExprToken::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(ExprToken::RParen);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(ExprToken::Ne);
                } else {
                    tokens.push(ExprToken::Not);
                }
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(Error::grammar(file.as_ref(), line, "expected '=='"));
                }
                tokens.push(ExprToken::Eq);
            }
            c if c.is_ascii_digit() => {
                let mut num = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = num.parse::<i64>().map_err(|_| {
                    Error::grammar(file.as_ref(), line, format!("bad integer '{num}'"))
                })?;
                tokens.push(ExprToken::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name == "defined" {
                    tokens.push(ExprToken::Defined);
                } else {
                    tokens.push(ExprToken::Name(name));
                }
            }
            other => {
                return Err(Error::grammar(
                    file.as_ref(),
                    line,
                    format!("unexpected character '{other}' in #if expression"),
                ));
            }
        }
    }
    Ok(tokens)
}

struct ExprParser<'a> {
    defines: &'a HashMap<String, String>,
    tokens: Vec<ExprToken>,
    index: usize,
    file: &'a Rc<str>,
    line: u32,
}

impl ExprParser<'_> {
    fn error(&self, message: &str) -> Error {
        Error::grammar(self.file.as_ref(), self.line, message)
    }

    fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<&ExprToken> {
        let token = self.tokens.get(self.index);
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn equality(&mut self) -> Result<i64> {
        let mut left = self.unary()?;
        loop {
            match self.peek() {
                Some(ExprToken::Eq) => {
                    self.index += 1;
                    let right = self.unary()?;
                    left = (left == right) as i64;
                }
                Some(ExprToken::Ne) => {
                    self.index += 1;
                    let right = self.unary()?;
                    left = (left != right) as i64;
                }
                _ => return Ok(left),
            }
        }
    }

    fn unary(&mut self) -> Result<i64> {
        if matches!(self.peek(), Some(ExprToken::Not)) {
            self.index += 1;
            let value = self.unary()?;
            return Ok((value == 0) as i64);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64> {
        match self.next() {
            Some(ExprToken::Int(v)) => Ok(*v),
            Some(ExprToken::Name(name)) => {
                let name = name.clone();
                // Undefined names and non-numeric values evaluate to 0.
                Ok(self
                    .defines
                    .get(&name)
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .unwrap_or(0))
            }
            Some(ExprToken::Defined) => {
                let parenthesized = matches!(self.peek(), Some(ExprToken::LParen));
                if parenthesized {
                    self.index += 1;
                }
                let name = match self.next() {
                    Some(ExprToken::Name(name)) => name.clone(),
                    _ => return Err(self.error("expected a name after 'defined'")),
                };
                if parenthesized && !matches!(self.next(), Some(ExprToken::RParen)) {
                    return Err(self.error("expected ')' after defined(NAME"));
                }
                Ok(self.defines.contains_key(&name) as i64)
            }
            Some(ExprToken::LParen) => {
                let value = self.equality()?;
                if !matches!(self.next(), Some(ExprToken::RParen)) {
                    return Err(self.error("expected ')'"));
                }
                Ok(value)
            }
            _ => Err(self.error("malformed #if expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(pp: &mut Preprocessor, text: &str) -> Vec<String> {
        pp.preprocess_str("test.txt", text)
            .unwrap()
            .into_iter()
            .map(|l| l.text)
            .collect()
    }

    #[test]
    fn define_expands_on_identifier_boundaries() {
        let mut pp = Preprocessor::new();
        let out = lines(
            &mut pp,
            "#define COUNT 4\nitems = COUNT;\nname = \"COUNT\";\ntotal = COUNTER;\n",
        );
        assert_eq!(
            out,
            ["items = 4;", "name = \"COUNT\";", "total = COUNTER;"]
        );
    }

    #[test]
    fn undef_stops_expansion() {
        let mut pp = Preprocessor::new();
        let out = lines(&mut pp, "#define X 1\na = X;\n#undef X\nb = X;\n");
        assert_eq!(out, ["a = 1;", "b = X;"]);
    }

    #[test]
    fn ifdef_else_selects_branch() {
        let mut pp = Preprocessor::new();
        let out = lines(
            &mut pp,
            "#define DEBUG\n#ifdef DEBUG\nverbose = true;\n#else\nverbose = false;\n#endif\n",
        );
        assert_eq!(out, ["verbose = true;"]);

        let mut pp = Preprocessor::new();
        let out = lines(
            &mut pp,
            "#ifdef DEBUG\nverbose = true;\n#else\nverbose = false;\n#endif\n",
        );
        assert_eq!(out, ["verbose = false;"]);
    }

    #[test]
    fn if_elif_chain_takes_first_true_branch() {
        let mut pp = Preprocessor::new();
        pp.define("LEVEL", "2");
        let out = lines(
            &mut pp,
            "#if LEVEL == 1\na;\n#elif LEVEL == 2\nb;\n#elif LEVEL == 2\nc;\n#else\nd;\n#endif\n",
        );
        assert_eq!(out, ["b;"]);
    }

    #[test]
    fn if_expression_operators() {
        let mut pp = Preprocessor::new();
        pp.define("A", "3");
        let out = lines(
            &mut pp,
            "#if defined(A)\nx;\n#endif\n#if !defined(B)\ny;\n#endif\n#if A != 4\nz;\n#endif\n",
        );
        assert_eq!(out, ["x;", "y;", "z;"]);
    }

    #[test]
    fn nested_inactive_blocks_stay_inactive() {
        let mut pp = Preprocessor::new();
        let out = lines(
            &mut pp,
            "#ifdef MISSING\n#ifdef ALSO_MISSING\na;\n#else\nb;\n#endif\nc;\n#endif\nd;\n",
        );
        assert_eq!(out, ["d;"]);
    }

    #[test]
    fn unterminated_conditional_is_an_error() {
        let mut pp = Preprocessor::new();
        let err = pp.preprocess_str("t.txt", "#ifdef X\na;\n").unwrap_err();
        assert!(matches!(err, Error::Grammar { .. }));
    }

    #[test]
    fn source_positions_survive_preprocessing() {
        let mut pp = Preprocessor::new();
        let out = pp
            .preprocess_str("t.txt", "#define X 1\n\nfirst;\nsecond;\n")
            .unwrap();
        assert_eq!(out[0].line, 3);
        assert_eq!(out[1].line, 4);
        assert_eq!(out[0].file.as_ref(), "t.txt");
    }

    #[test]
    fn include_splices_file_with_its_own_positions() {
        let dir = std::env::temp_dir().join(format!("propstream-pp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let inc = dir.join("common.txt");
        std::fs::write(&inc, "shared = 1;\n").unwrap();

        let mut pp = Preprocessor::new();
        pp.add_include_dir(&dir);
        let out = pp
            .preprocess_str("main.txt", "before;\n#include \"common.txt\"\nafter;\n")
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].text, "shared = 1;");
        assert!(out[1].file.contains("common.txt"));
        assert_eq!(out[1].line, 1);
        assert_eq!(out[2].line, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn angle_bracket_include_searches_include_dirs() {
        let dir = std::env::temp_dir().join(format!("propstream-ppa-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let inc = dir.join("common.txt");
        std::fs::write(&inc, "shared = 2;\n").unwrap();

        let mut pp = Preprocessor::new();
        pp.add_include_dir(&dir);
        let out = pp
            .preprocess_str("main.txt", "#include <common.txt>\n")
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "shared = 2;");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn recursive_include_is_rejected() {
        let dir = std::env::temp_dir().join(format!("propstream-rec-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.txt");
        std::fs::write(&a, "#include \"a.txt\"\n").unwrap();

        let mut pp = Preprocessor::new();
        let err = pp.preprocess_file(&a).unwrap_err();
        assert!(matches!(err, Error::Grammar { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }
}
