use anyhow::bail;
use regex::bytes::Captures;

/// One piece of a parsed replacement template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// A literal byte run, adjacent literals coalesced.
    Literal(Vec<u8>),
    /// A backreference to capture group 0..=9.
    Group(usize),
}

/// A parsed substitution string: literal chunks interleaved with `\0`..`\9`
/// backreferences.
///
/// The sentinel "do not rewrite" template (the config literal `.`) is not a
/// `Template`; rules store `Option<Template>` and represent it as `None`.
#[derive(Debug, Clone)]
pub struct Template {
    parts: Vec<Part>,
    raw: String,
}

impl Template {
    /// Parse raw template bytes.
    ///
    /// Escapes: `\\` is a literal backslash, `\0`..`\9` a backreference,
    /// `\<newline>` a literal newline (line continuation). Anything else
    /// after a backslash is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown escape or a trailing backslash.
    pub fn parse(src: &[u8]) -> anyhow::Result<Self> {
        let mut parts = Vec::new();
        let mut lit = Vec::new();
        let mut bytes = src.iter().copied();
        while let Some(byte) = bytes.next() {
            if byte != b'\\' {
                lit.push(byte);
                continue;
            }
            let Some(escaped) = bytes.next() else {
                bail!("trailing backslash in template {:?}", display(src));
            };
            match escaped {
                b'\\' => lit.push(b'\\'),
                b'\n' => lit.push(b'\n'),
                b'0'..=b'9' => {
                    if !lit.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut lit)));
                    }
                    parts.push(Part::Group(usize::from(escaped - b'0')));
                }
                other => bail!(
                    "unknown escape \\{} in template {:?}",
                    char::from(other),
                    display(src)
                ),
            }
        }
        if parts.is_empty() || !lit.is_empty() {
            parts.push(Part::Literal(lit));
        }
        Ok(Self {
            parts,
            raw: display(src),
        })
    }

    /// Expand the template over one match, appending to `out`.
    ///
    /// A group reference that did not participate in the match, or that
    /// exceeds the pattern's group count, expands to nothing.
    pub fn apply_into(&self, caps: &Captures<'_>, out: &mut Vec<u8>) {
        for part in &self.parts {
            match part {
                Part::Literal(data) => out.extend_from_slice(data),
                Part::Group(group) => {
                    if let Some(m) = caps.get(*group) {
                        out.extend_from_slice(m.as_bytes());
                    }
                }
            }
        }
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// The template source text, for diagnostics and the config dump.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

fn display(src: &[u8]) -> String {
    String::from_utf8_lossy(src).into_owned()
}
