//! The rewrite engine: ordered caller contexts, first-match-wins rules,
//! and the regex substitution that turns a guest path into a host-relative
//! one.

pub mod pattern;
pub mod template;
pub mod types;

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use log::{debug, info, trace};

use crate::caller::Caller;
use pattern::Pattern;
use template::Template;
use types::{Context, Rule};

/// Immutable engine state, built once from the parsed configuration and
/// shared freely across worker threads.
///
/// The default engine has no contexts and passes every path through.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    contexts: Vec<Context>,
}

impl Engine {
    pub const fn new(contexts: Vec<Context>) -> Self {
        Self { contexts }
    }

    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    /// Translate a guest path into a path relative to the source directory.
    ///
    /// The subject for rule matching is the guest path with its leading `/`
    /// stripped; the root maps to `.`. The first context whose caller
    /// pattern matches (or which is a default context) wins, and within it
    /// the first rule whose pattern matches the subject wins. When the
    /// caller command line cannot be obtained, every non-default context is
    /// skipped. Contexts with no rules cannot affect the result and are
    /// skipped without probing the caller.
    pub fn rewrite(&self, guest: &Path, caller: &mut Caller) -> PathBuf {
        let subject = strip_root(guest.as_os_str().as_bytes());
        trace!("{}:", guest.display());

        for context in &self.contexts {
            if context.rules.is_empty() {
                continue;
            }
            match &context.caller {
                None => trace!("  ctx default"),
                Some(pat) => {
                    let Some(cmdline) = caller.cmdline() else {
                        continue;
                    };
                    if !pat.is_match(cmdline) {
                        trace!("  ctx nomatch {:?}", pat.raw());
                        continue;
                    }
                    trace!("  ctx ok {:?}", pat.raw());
                }
            }

            for rule in &context.rules {
                if rule.pattern.is_match(subject) {
                    trace!("    rule ok {:?}", rule.pattern.raw());
                    return apply_rule(guest, subject, rule);
                }
                trace!("    rule nomatch {:?}", rule.pattern.raw());
            }
            // First matching context wins; a miss in its rules is final.
            break;
        }

        pass_through(guest, subject)
    }
}

fn apply_rule(guest: &Path, subject: &[u8], rule: &Rule) -> PathBuf {
    let Some(template) = &rule.template else {
        return pass_through(guest, subject);
    };
    let rewritten = substitute(&rule.pattern, template, subject);
    let host = bytes_to_path(rewritten);
    info!("  {} -> {}", guest.display(), host.display());
    host
}

fn pass_through(guest: &Path, subject: &[u8]) -> PathBuf {
    debug!("  (ignored) {}", guest.display());
    if subject.is_empty() {
        PathBuf::from(".")
    } else {
        bytes_to_path(subject.to_vec())
    }
}

/// Replace the pattern in `subject` by the expanded template.
///
/// Non-global patterns replace the first match only. Global patterns
/// re-apply the procedure to the remainder of the subject as a fresh
/// subject, so anchors re-anchor at the start of each remainder, matching
/// the recursive formulation this engine inherits. A zero-width match
/// under the global flag emits one subject byte and advances past it so
/// the scan always terminates.
fn substitute(pattern: &Pattern, template: &Template, subject: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(subject.len());
    let mut rest = subject;

    loop {
        let Some(caps) = pattern.captures(rest) else {
            out.extend_from_slice(rest);
            break;
        };
        let Some(whole) = caps.get(0) else {
            out.extend_from_slice(rest);
            break;
        };

        out.extend_from_slice(&rest[..whole.start()]);
        template.apply_into(&caps, &mut out);

        if !pattern.global() {
            out.extend_from_slice(&rest[whole.end()..]);
            break;
        }

        let mut next = whole.end();
        if whole.start() == whole.end() {
            match rest.get(next) {
                Some(&byte) => {
                    out.push(byte);
                    next += 1;
                }
                None => break,
            }
        }
        rest = &rest[next..];
        if rest.is_empty() {
            break;
        }
    }

    out
}

fn strip_root(path: &[u8]) -> &[u8] {
    path.strip_prefix(b"/").unwrap_or(path)
}

fn bytes_to_path(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(OsString::from_vec(bytes))
}

#[cfg(test)]
mod tests;
