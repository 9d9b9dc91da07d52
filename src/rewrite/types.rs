use super::pattern::Pattern;
use super::template::Template;

/// A single rewrite rule: filename pattern plus replacement template.
///
/// `template` is `None` for the config literal `.`: the rule matches but
/// the path passes through unchanged.
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Pattern,
    pub template: Option<Template>,
}

/// A group of rules gated by a caller-command-line pattern.
///
/// `caller` is `None` for a default context, which matches every caller.
/// Contexts keep their declaration order; the first match wins.
#[derive(Debug, Clone)]
pub struct Context {
    pub caller: Option<Pattern>,
    pub rules: Vec<Rule>,
}
