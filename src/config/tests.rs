#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::rewrite::template::Part;

fn contexts(source: &str) -> Vec<Context> {
    parse(source.as_bytes()).unwrap().contexts().to_vec()
}

// --- structure ---

#[test]
fn empty_input_yields_the_implicit_default_context() {
    let ctxs = contexts("");
    assert_eq!(ctxs.len(), 1);
    assert!(ctxs[0].caller.is_none());
    assert!(ctxs[0].rules.is_empty());
}

#[test]
fn blank_lines_and_comments_are_skipped() {
    let ctxs = contexts("\n\n# a comment\n   # another\n\n/^a/  b\n# trailing\n");
    assert_eq!(ctxs.len(), 1);
    assert_eq!(ctxs[0].rules.len(), 1);
}

#[test]
fn rules_before_any_header_join_the_implicit_context() {
    let ctxs = contexts("/^a/  b\n/^c/  d\n");
    assert_eq!(ctxs.len(), 1);
    assert!(ctxs[0].caller.is_none());
    assert_eq!(ctxs[0].rules.len(), 2);
}

#[test]
fn context_headers_open_new_contexts_in_order() {
    let source = "/^a/  b\n- /bash$/\n/^c/  d\n/^e/  f\n- /zsh$/\n/^g/  h\n";
    let ctxs = contexts(source);
    assert_eq!(ctxs.len(), 3);
    assert!(ctxs[0].caller.is_none());
    assert_eq!(ctxs[1].caller.as_ref().unwrap().raw(), "bash$");
    assert_eq!(ctxs[1].rules.len(), 2);
    assert_eq!(ctxs[2].caller.as_ref().unwrap().raw(), "zsh$");
    assert_eq!(ctxs[2].rules.len(), 1);
}

#[test]
fn empty_header_body_is_a_default_context() {
    let ctxs = contexts("- //\n/^a/  b\n");
    assert_eq!(ctxs.len(), 2);
    assert!(ctxs[1].caller.is_none());
}

#[test]
fn header_regex_accepts_the_m_form() {
    let ctxs = contexts("- m,bash$,\n/^a/  b\n");
    assert_eq!(ctxs[1].caller.as_ref().unwrap().raw(), "bash$");
}

// --- rule parsing ---

#[test]
fn dot_template_is_stored_as_none() {
    let ctxs = contexts("/secret/  .\n");
    assert!(ctxs[0].rules[0].template.is_none());
}

#[test]
fn dot_with_trailing_text_is_an_ordinary_template() {
    let ctxs = contexts("/secret/  .hidden\n");
    let tpl = ctxs[0].rules[0].template.as_ref().unwrap();
    assert_eq!(tpl.parts(), [Part::Literal(b".hidden".to_vec())]);
}

#[test]
fn template_may_start_on_the_next_line() {
    // Blanks after the flags include newlines, as in the original grammar.
    let ctxs = contexts("/^a/\n  b\n");
    let tpl = ctxs[0].rules[0].template.as_ref().unwrap();
    assert_eq!(tpl.parts(), [Part::Literal(b"b".to_vec())]);
}

#[test]
fn m_form_uses_the_next_byte_as_delimiter() {
    let ctxs = contexts("m|a|g  x\n");
    let rule = &ctxs[0].rules[0];
    assert_eq!(rule.pattern.raw(), "a");
    assert!(rule.pattern.global());
}

#[test]
fn escaped_separator_joins_the_body() {
    let ctxs = contexts("/a\\/b/  c\n");
    assert_eq!(ctxs[0].rules[0].pattern.raw(), "a/b");
}

#[test]
fn other_escapes_in_the_body_reach_the_engine() {
    let ctxs = contexts("/(\\w+)\\.txt$/  \\1.md\n");
    assert_eq!(ctxs[0].rules[0].pattern.raw(), "(\\w+)\\.txt$");
}

#[test]
fn flags_are_parsed_off_the_regex() {
    let ctxs = contexts("/readme/ig  x\n");
    let rule = &ctxs[0].rules[0];
    assert!(rule.pattern.is_match(b"README"));
    assert!(rule.pattern.global());
}

#[test]
fn rule_without_trailing_newline_parses() {
    let ctxs = contexts("/^a/  b");
    assert_eq!(ctxs[0].rules.len(), 1);
}

// --- fatal errors ---

#[test]
fn unknown_flag_is_fatal() {
    let err = parse(b"/a/q  x\n").unwrap_err();
    assert!(format!("{err:#}").contains("unknown flag"), "{err:#}");
}

#[test]
fn invalid_regex_is_fatal() {
    let err = parse(b"/(unclosed/  x\n").unwrap_err();
    assert!(format!("{err:#}").contains("invalid regular expression"), "{err:#}");
}

#[test]
fn unexpected_character_is_fatal() {
    let err = parse(b"rule without slash\n").unwrap_err();
    assert!(format!("{err:#}").contains("unexpected character"), "{err:#}");
}

#[test]
fn unterminated_regex_is_fatal() {
    let err = parse(b"/never-closed  x\n").unwrap_err();
    assert!(format!("{err:#}").contains("unterminated regex"), "{err:#}");
}

#[test]
fn missing_template_is_fatal() {
    let err = parse(b"/^a/\n").unwrap_err();
    assert!(format!("{err:#}").contains("missing its template"), "{err:#}");
}

#[test]
fn unknown_template_escape_is_fatal() {
    let err = parse(b"/^a/  new\\q\n").unwrap_err();
    assert!(format!("{err:#}").contains("unknown escape"), "{err:#}");
}

#[test]
fn errors_name_the_line() {
    let err = parse(b"# comment\n\n/a/q  x\n").unwrap_err();
    assert!(format!("{err:#}").contains("line 3"), "{err:#}");
}

// --- the documented example ---

#[test]
fn readme_example_parses() {
    let source = "\
# default context: all callers
/^old/          new\\1

- /bash$/       # only when invoked by bash
/secret/        .
/\\.bak$/        archive/\\0
";
    let ctxs = contexts(source);
    assert_eq!(ctxs.len(), 2);
    assert_eq!(ctxs[0].rules.len(), 1);
    assert_eq!(ctxs[1].caller.as_ref().unwrap().raw(), "bash$");
    assert_eq!(ctxs[1].rules.len(), 2);
    assert!(ctxs[1].rules[0].template.is_none());
}
