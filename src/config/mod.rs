//! Configuration-file parser.
//!
//! The grammar is line-oriented only where it has to be:
//!
//! ```text
//! config         := (blank | comment | directive)*
//! comment        := '#' <to end of line>
//! directive      := context-header | rule
//! context-header := '-' blank regex
//! rule           := regex blank template-line
//! regex          := '/' body '/' flags | 'm' <delim> body <delim> flags
//! template-line  := bytes up to an unescaped newline
//! ```
//!
//! A context header with an empty body (`- //`) introduces a default
//! context, matching every caller. A rule whose template line is exactly
//! `.` matches but does not rewrite. Rules appearing before any header
//! belong to an implicit initial default context. Every lexical or
//! semantic error is fatal; there is no partial acceptance.

use std::path::Path;

use anyhow::{Context as _, Result, bail};

use crate::rewrite::Engine;
use crate::rewrite::pattern::{Flags, Pattern};
use crate::rewrite::template::Template;
use crate::rewrite::types::{Context, Rule};

/// Load and parse the config file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn load(path: &Path) -> Result<Engine> {
    let content = std::fs::read(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    parse(&content).with_context(|| format!("in config file {}", path.display()))
}

/// Parse raw config bytes into an engine.
///
/// # Errors
///
/// Returns an error identifying the offending construct and its line.
pub fn parse(input: &[u8]) -> Result<Engine> {
    Parser { input, pos: 0 }.parse_config()
}

enum Item {
    ContextHeader(Option<Pattern>),
    Rule(Rule),
    End,
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn parse_config(mut self) -> Result<Engine> {
        // The implicit initial default context; rules before any header
        // land here.
        let mut contexts = vec![Context {
            caller: None,
            rules: Vec::new(),
        }];

        loop {
            match self.parse_item()? {
                Item::ContextHeader(caller) => contexts.push(Context {
                    caller,
                    rules: Vec::new(),
                }),
                Item::Rule(rule) => {
                    if let Some(current) = contexts.last_mut() {
                        current.rules.push(rule);
                    }
                }
                Item::End => break,
            }
        }

        Ok(Engine::new(contexts))
    }

    fn parse_item(&mut self) -> Result<Item> {
        loop {
            self.skip_blanks();
            match self.peek() {
                None => return Ok(Item::End),
                Some(b'#') => self.skip_comment(),
                Some(b'-') => {
                    self.bump();
                    self.skip_blanks();
                    return Ok(Item::ContextHeader(self.parse_caller_pattern()?));
                }
                Some(b'/' | b'm') => return Ok(Item::Rule(self.parse_rule()?)),
                Some(other) => bail!(
                    "unexpected character {:?} at line {}",
                    char::from(other),
                    self.line()
                ),
            }
        }
    }

    /// Context-header regex. An empty body means "default context".
    fn parse_caller_pattern(&mut self) -> Result<Option<Pattern>> {
        let line = self.line();
        let (body, flags) = self.parse_regex_parts()?;
        if body.is_empty() {
            return Ok(None);
        }
        compile(&body, flags).with_context(|| format!("in context header at line {line}"))
    }

    fn parse_rule(&mut self) -> Result<Rule> {
        let line = self.line();
        let (body, flags) = self.parse_regex_parts()?;
        // An empty rule body compiles to the empty regex, which matches
        // every path; only context headers treat it as a sentinel.
        let pattern = match compile(&body, flags).with_context(|| format!("in rule at line {line}"))? {
            Some(pattern) => pattern,
            None => Pattern::compile("", flags)?,
        };

        self.skip_blanks();
        let raw_template = self.read_template_line()?;
        let template = if raw_template == b"." {
            None
        } else {
            Some(
                Template::parse(&raw_template)
                    .with_context(|| format!("in rule at line {line}"))?,
            )
        };

        Ok(Rule { pattern, template })
    }

    /// `'/' body '/' flags` or `'m' <delim> body <delim> flags`.
    fn parse_regex_parts(&mut self) -> Result<(Vec<u8>, Flags)> {
        let sep = match self.bump() {
            Some(b'/') => b'/',
            Some(b'm') => match self.bump() {
                Some(delim) => delim,
                None => bail!("unexpected end of file after 'm'"),
            },
            Some(other) => bail!(
                "unexpected character {:?} at line {}",
                char::from(other),
                self.line()
            ),
            None => bail!("unexpected end of file, expected a regex"),
        };
        let body = self.read_delimited(sep)?;
        let flags = self.read_flags()?;
        Ok((body, flags))
    }

    /// Body bytes up to an unescaped `sep`. `\\` collapses to `\`,
    /// `\<sep>` to the bare separator; any other escape pair is kept
    /// verbatim for the regex engine.
    fn read_delimited(&mut self, sep: u8) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        loop {
            let Some(byte) = self.bump() else {
                bail!(
                    "unexpected end of file, unterminated regex (missing {:?})",
                    char::from(sep)
                );
            };
            if byte == b'\\' {
                let Some(escaped) = self.bump() else {
                    bail!("unexpected end of file after '\\' in regex");
                };
                if escaped != b'\\' && escaped != sep {
                    body.push(b'\\');
                }
                body.push(escaped);
            } else if byte == sep {
                return Ok(body);
            } else {
                body.push(byte);
            }
        }
    }

    fn read_flags(&mut self) -> Result<Flags> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_whitespace() {
                break;
            }
            self.bump();
        }
        Flags::parse(&self.input[start..self.pos])
            .with_context(|| format!("at line {}", self.line()))
    }

    /// Raw template bytes up to an unescaped newline. Escape pairs are
    /// kept verbatim; [`Template::parse`] interprets them.
    fn read_template_line(&mut self) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        loop {
            match self.bump() {
                None if raw.is_empty() => {
                    bail!("unexpected end of file, rule is missing its template")
                }
                None | Some(b'\n') => return Ok(raw),
                Some(b'\\') => {
                    raw.push(b'\\');
                    match self.bump() {
                        Some(escaped) => raw.push(escaped),
                        None => bail!("unexpected end of file after '\\' in template"),
                    }
                }
                Some(byte) => raw.push(byte),
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn skip_blanks(&mut self) {
        while let Some(byte) = self.peek()
            && byte.is_ascii_whitespace()
        {
            self.bump();
        }
    }

    fn skip_comment(&mut self) {
        while let Some(byte) = self.bump()
            && byte != b'\n'
        {}
    }

    fn line(&self) -> usize {
        self.input[..self.pos]
            .iter()
            .filter(|&&byte| byte == b'\n')
            .count()
            + 1
    }
}

fn compile(body: &[u8], flags: Flags) -> Result<Option<Pattern>> {
    if body.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(body).context("pattern is not valid UTF-8")?;
    Pattern::compile(text, flags).map(Some)
}

#[cfg(test)]
mod tests;
