#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};

use super::Engine;
use crate::caller::Caller;
use crate::config;

fn engine(source: &str) -> Engine {
    config::parse(source.as_bytes()).unwrap()
}

fn rewrite(engine: &Engine, guest: &str) -> PathBuf {
    engine.rewrite(Path::new(guest), &mut Caller::fixed(None))
}

fn rewrite_as(engine: &Engine, guest: &str, cmdline: &str) -> PathBuf {
    engine.rewrite(
        Path::new(guest),
        &mut Caller::fixed(Some(cmdline.as_bytes().to_vec())),
    )
}

// --- pass-through behavior ---

#[test]
fn empty_config_passes_through() {
    let engine = Engine::default();
    assert_eq!(rewrite(&engine, "/a/b"), Path::new("a/b"));
}

#[test]
fn root_maps_to_dot() {
    let engine = Engine::default();
    assert_eq!(rewrite(&engine, "/"), Path::new("."));
}

#[test]
fn root_maps_to_dot_with_matching_passthrough_rule() {
    let engine = engine("//  .\n");
    assert_eq!(rewrite(&engine, "/"), Path::new("."));
}

#[test]
fn no_matching_rule_passes_through() {
    let engine = engine("/^foo/  bar\n");
    assert_eq!(rewrite(&engine, "/baz"), Path::new("baz"));
}

#[test]
fn dot_template_matches_but_does_not_rewrite() {
    let engine = engine("/secret/  .\n");
    assert_eq!(rewrite(&engine, "/dir/secret/file"), Path::new("dir/secret/file"));
}

// --- substitution ---

#[test]
fn prefix_rewrite() {
    let engine = engine("/^foo/  bar\n");
    assert_eq!(rewrite(&engine, "/foobaz"), Path::new("barbaz"));
}

#[test]
fn backreference_rewrite() {
    let engine = engine("/(\\w+)\\.txt$/  \\1.md\n");
    assert_eq!(rewrite(&engine, "/dir/notes.txt"), Path::new("dir/notes.md"));
}

#[test]
fn whole_match_backreference() {
    let engine = engine("/^.*\\.bak$/  archive/\\0\n");
    assert_eq!(rewrite(&engine, "/data.bak"), Path::new("archive/data.bak"));
}

#[test]
fn match_prefix_and_suffix_are_preserved() {
    let engine = engine("/\\.bak$/  .backup\n");
    assert_eq!(rewrite(&engine, "/data.bak"), Path::new("data.backup"));
}

#[test]
fn global_flag_replaces_every_match() {
    let engine = engine("m|a|g  x\n");
    assert_eq!(rewrite(&engine, "/banana"), Path::new("bxnxnx"));
}

#[test]
fn non_global_replaces_first_match_only() {
    let engine = engine("m|a|  x\n");
    assert_eq!(rewrite(&engine, "/banana"), Path::new("bxnana"));
}

#[test]
fn global_anchor_reanchors_on_the_remainder() {
    // Each round matches the remainder as a fresh subject, so `^.`
    // keeps matching the new first byte.
    let engine = engine("m|^.|g  -\n");
    assert_eq!(rewrite(&engine, "/abc"), Path::new("---"));
}

#[test]
fn zero_width_global_match_terminates() {
    let engine = engine("/x*/g  -\n");
    // Zero-width matches emit one subject byte and advance past it.
    assert_eq!(rewrite(&engine, "/ab"), Path::new("-a-b"));
}

#[test]
fn reference_past_capture_count_expands_empty() {
    let engine = engine("/(a)(b)/  x\\5y\n");
    assert_eq!(rewrite(&engine, "/ab"), Path::new("xy"));
}

#[test]
fn non_backreference_template_is_prefix_literal_suffix() {
    let engine = engine("/bbb/  X\n");
    assert_eq!(rewrite(&engine, "/aaabbbccc"), Path::new("aaaXccc"));
}

// --- rule and context ordering ---

#[test]
fn first_matching_rule_wins() {
    let engine = engine("/^file/  first\n/^file/  second\n");
    assert_eq!(rewrite(&engine, "/file"), Path::new("first"));
}

#[test]
fn first_matching_context_wins() {
    let engine = engine("- //\n/^f/  one\n- //\n/^f/  two\n");
    assert_eq!(rewrite(&engine, "/f"), Path::new("one"));
}

#[test]
fn rule_miss_in_winning_context_is_final() {
    // The default context matches every caller; its rules miss, and later
    // contexts are not consulted.
    let engine = engine("- //\n/^zzz/  one\n- //\n/^f/  two\n");
    assert_eq!(rewrite(&engine, "/f"), Path::new("f"));
}

// --- caller contexts ---

#[test]
fn caller_context_selects_its_rules() {
    let source = "- /^vim/\n/\\.swp$/  .\n- //\n/^.*\\.swp$/  hidden/\\0\n";
    let engine = engine(source);
    assert_eq!(
        rewrite_as(&engine, "/file.swp", "vim file.txt"),
        Path::new("file.swp")
    );
    assert_eq!(
        rewrite_as(&engine, "/file.swp", "emacs file.txt"),
        Path::new("hidden/file.swp")
    );
}

#[test]
fn default_context_ignores_the_caller() {
    let engine = engine("/^a/  b\n");
    assert_eq!(rewrite_as(&engine, "/a", "anything at all"), Path::new("b"));
    assert_eq!(rewrite(&engine, "/a"), Path::new("b"));
}

#[test]
fn unknown_caller_skips_non_default_contexts() {
    let source = "- /^vim/\n/\\.swp$/  .\n- //\n/^.*\\.swp$/  hidden/\\0\n";
    let engine = engine(source);
    // Probe failure: the vim context is skipped, the default one applies.
    assert_eq!(rewrite(&engine, "/file.swp"), Path::new("hidden/file.swp"));
}

#[test]
fn leading_context_header_leaves_implicit_default_empty() {
    // No rule precedes the header, so the implicit initial context is
    // empty and must not swallow the request.
    let engine = engine("- /^vim/\n/^a/  b\n");
    assert_eq!(rewrite_as(&engine, "/a", "vim"), Path::new("b"));
    assert_eq!(rewrite_as(&engine, "/a", "emacs"), Path::new("a"));
}

// --- idempotence ---

#[test]
fn passthrough_rule_is_idempotent() {
    let engine = engine("/secret/  .\n");
    let once = rewrite(&engine, "/a/secret");
    let twice = rewrite(&engine, &format!("/{}", once.display()));
    assert_eq!(once, twice);
}

#[test]
fn non_self_matching_rewrite_reaches_fixed_point_after_one_pass() {
    let engine = engine("/^old/  new\\0\n");
    let once = rewrite(&engine, "/oldfile");
    assert_eq!(once, Path::new("newoldfile"));
    let twice = rewrite(&engine, &format!("/{}", once.display()));
    assert_eq!(once, twice);
}
