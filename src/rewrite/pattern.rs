use anyhow::{Context as _, bail};
use regex::bytes::{Captures, Regex, RegexBuilder};

/// Single-letter pattern flags accepted after a regex body.
///
/// `i`, `x` and `u` are regex-engine options. `g` is not: it is stored on
/// the compiled pattern and consulted by the substitution routine, which
/// re-applies the replacement to the remainder of the subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// `i`: case-insensitive matching.
    pub case_insensitive: bool,
    /// `x`: extended mode, whitespace in the pattern is insignificant.
    pub extended: bool,
    /// `u`: Unicode character classes (subjects are treated as UTF-8).
    pub unicode: bool,
    /// `g`: replace every non-overlapping match, not just the first.
    pub global: bool,
}

impl Flags {
    /// Parse a run of flag letters.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unknown letter.
    pub fn parse(letters: &[u8]) -> anyhow::Result<Self> {
        let mut flags = Self::default();
        for &letter in letters {
            match letter {
                b'i' => flags.case_insensitive = true,
                b'x' => flags.extended = true,
                b'u' => flags.unicode = true,
                b'g' => flags.global = true,
                other => bail!("unknown flag {:?}", char::from(other)),
            }
        }
        Ok(flags)
    }
}

/// A compiled filename or caller pattern.
///
/// Subjects are raw path bytes, so the underlying engine is
/// `regex::bytes`. Unicode mode is off unless the `u` flag was given,
/// keeping `\w` and friends ASCII by default. The original source text is
/// retained for diagnostics and for the config dump.
#[derive(Debug, Clone)]
pub struct Pattern {
    re: Regex,
    flags: Flags,
    raw: String,
}

impl Pattern {
    /// Compile `body` with `flags`.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the engine diagnostic and the pattern
    /// source when `body` is not a valid regular expression.
    pub fn compile(body: &str, flags: Flags) -> anyhow::Result<Self> {
        let re = RegexBuilder::new(body)
            .case_insensitive(flags.case_insensitive)
            .ignore_whitespace(flags.extended)
            .unicode(flags.unicode)
            .build()
            .with_context(|| format!("invalid regular expression {body:?}"))?;
        Ok(Self {
            re,
            flags,
            raw: body.to_string(),
        })
    }

    pub fn is_match(&self, subject: &[u8]) -> bool {
        self.re.is_match(subject)
    }

    pub fn captures<'s>(&self, subject: &'s [u8]) -> Option<Captures<'s>> {
        self.re.captures(subject)
    }

    /// Number of capture groups, excluding the implicit whole-match group.
    pub fn capture_count(&self) -> usize {
        self.re.captures_len() - 1
    }

    pub const fn global(&self) -> bool {
        self.flags.global
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}
