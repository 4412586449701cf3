//! Allow/deny rules for image tags.
//!
//! A rule is either a literal tag or `regexp:<pattern>`. Rules that cannot
//! be parsed reject every tag in both the allow and the deny position.
//! An empty allow rule is a literal that no real tag equals, so it rejects
//! everything; an empty deny rule likewise denies nothing.

use regex::Regex;

const REGEX_PREFIX_MARKER: &str = "regexp";

/// A parsed tag rule.
#[derive(Debug, Clone)]
pub enum TagRule {
    Literal(String),
    Pattern(Regex),
    /// Not a literal and not a compilable `regexp:` rule.
    Unparseable { raw: String, reason: String },
}

impl TagRule {
    /// Parses a rule string.
    ///
    /// The string is split on `:`. One part is a literal (trimmed). Two parts
    /// whose first part contains `regexp` form a pattern (trimmed). Anything
    /// else is unparseable, including a pattern that fails to compile.
    pub fn parse(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split(':').collect();
        match parts.as_slice() {
            [literal] => TagRule::Literal(literal.trim().to_string()),
            [prefix, pattern] if prefix.contains(REGEX_PREFIX_MARKER) => {
                match Regex::new(pattern.trim()) {
                    Ok(regex) => TagRule::Pattern(regex),
                    Err(e) => TagRule::Unparseable {
                        raw: raw.to_string(),
                        reason: e.to_string(),
                    },
                }
            }
            [prefix, _] => TagRule::Unparseable {
                raw: raw.to_string(),
                reason: format!("unknown rule prefix '{}'", prefix),
            },
            _ => TagRule::Unparseable {
                raw: raw.to_string(),
                reason: format!("expected at most one ':' but found {}", parts.len() - 1),
            },
        }
    }

    /// Returns the parse problem, if any.
    pub fn parse_error(&self) -> Option<&str> {
        match self {
            TagRule::Unparseable { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn is_empty_literal(&self) -> bool {
        matches!(self, TagRule::Literal(s) if s.is_empty())
    }

    /// Allow position: the tag must satisfy the rule.
    pub fn allows(&self, tag: &str) -> bool {
        match self {
            TagRule::Literal(literal) => literal == tag,
            TagRule::Pattern(regex) => regex.is_match(tag),
            TagRule::Unparseable { .. } => false,
        }
    }

    /// Deny position: the tag passes unless it satisfies the rule.
    pub fn passes_deny(&self, tag: &str) -> bool {
        match self {
            TagRule::Literal(literal) => literal != tag,
            TagRule::Pattern(regex) => !regex.is_match(tag),
            TagRule::Unparseable { .. } => false,
        }
    }
}

/// Why a tag was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagDecision {
    Accepted,
    NotAllowed,
    Denied,
}

/// The allow and deny rules of one registry rule.
#[derive(Debug, Clone)]
pub struct TagPolicy {
    pub allow: TagRule,
    pub deny: TagRule,
}

impl TagPolicy {
    pub fn new(allow: &str, deny: &str) -> Self {
        Self {
            allow: TagRule::parse(allow),
            deny: TagRule::parse(deny),
        }
    }

    /// Allow is checked before deny.
    pub fn evaluate(&self, tag: &str) -> TagDecision {
        if !self.allow.allows(tag) {
            TagDecision::NotAllowed
        } else if !self.deny.passes_deny(tag) {
            TagDecision::Denied
        } else {
            TagDecision::Accepted
        }
    }
}
