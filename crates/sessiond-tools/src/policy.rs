// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

/// What C3 does once a tool call is ready to run, absent an explicit
/// per-session decision from C4: run it unattended, ask the user, or refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    Auto,
    Ask,
    Deny,
}

/// Glob-pattern based policy for one tool's invocation patterns (e.g. a shell
/// command string, or a `tool:pattern` key). Deny beats auto; anything
/// matching neither list falls through to `Ask`.
pub struct ToolPolicy {
    auto_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
}

impl ToolPolicy {
    pub fn new(auto_patterns: &[String], deny_patterns: &[String]) -> Self {
        Self {
            auto_patterns: auto_patterns.iter().filter_map(|p| glob_to_regex(p)).collect(),
            deny_patterns: deny_patterns.iter().filter_map(|p| glob_to_regex(p)).collect(),
        }
    }

    pub fn decide(&self, candidate: &str) -> ApprovalPolicy {
        if self.deny_patterns.iter().any(|r| r.is_match(candidate)) {
            return ApprovalPolicy::Deny;
        }
        if self.auto_patterns.iter().any(|r| r.is_match(candidate)) {
            return ApprovalPolicy::Auto;
        }
        ApprovalPolicy::Ask
    }
}

/// Compile a `*`/`?` glob into an anchored regex. All other characters are
/// escaped literally, so `.`, `(`, etc. in a pattern match themselves.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_beats_auto() {
        let policy = ToolPolicy::new(&["*".to_string()], &["rm *".to_string()]);
        assert_eq!(policy.decide("rm -rf /"), ApprovalPolicy::Deny);
    }

    #[test]
    fn deny_exact_match() {
        let policy = ToolPolicy::new(&[], &["shutdown".to_string()]);
        assert_eq!(policy.decide("shutdown"), ApprovalPolicy::Deny);
        assert_eq!(policy.decide("shutdown now"), ApprovalPolicy::Ask);
    }

    #[test]
    fn auto_approve_wildcard() {
        let policy = ToolPolicy::new(&["cat *".to_string(), "ls".to_string()], &[]);
        assert_eq!(policy.decide("cat file.txt"), ApprovalPolicy::Auto);
        assert_eq!(policy.decide("ls"), ApprovalPolicy::Auto);
    }

    #[test]
    fn question_mark_matches_single_char() {
        let policy = ToolPolicy::new(&["v?.txt".to_string()], &[]);
        assert_eq!(policy.decide("v1.txt"), ApprovalPolicy::Auto);
        assert_eq!(policy.decide("v12.txt"), ApprovalPolicy::Ask);
    }

    #[test]
    fn unmatched_falls_back_to_ask() {
        let policy = ToolPolicy::new(&["cat *".to_string()], &[]);
        assert_eq!(policy.decide("cargo build"), ApprovalPolicy::Ask);
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let re = glob_to_regex("a.b").unwrap();
        assert!(re.is_match("a.b"));
        assert!(!re.is_match("aXb"));
    }
}
