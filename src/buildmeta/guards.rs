//! Conditional guards around build-script directives
//!
//! `if/elseif/else/endif` blocks are tracked on a stack of [`Guard`]
//! entries. Folding the stack yields the guard vector for the current line:
//! within one `if` group every condition that was passed over is negated,
//! and the branch currently open contributes its own condition positively
//! (an `else` branch negates all of them).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stack entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Start of an `if(...)` group
    IfFrame,
    /// `else()` of the innermost group
    Else,
    /// Condition text of an `if` or `elseif`
    Condition(String),
}

/// One predicate in a guard vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuardTerm {
    pub condition: String,
    pub holds: bool,
}

impl GuardTerm {
    pub fn new(condition: impl Into<String>, holds: bool) -> Self {
        Self {
            condition: condition.into(),
            holds,
        }
    }
}

impl fmt::Display for GuardTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", u8::from(self.holds), self.condition)
    }
}

/// Render a guard vector as `["1(A)", "0(B)"]` strings.
pub fn render(terms: &[GuardTerm]) -> Vec<String> {
    terms.iter().map(ToString::to_string).collect()
}

/// Stack of open conditional blocks while scanning one file.
#[derive(Debug, Default, Clone)]
pub struct ConditionStack {
    entries: Vec<Guard>,
}

impl ConditionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_if(&mut self, condition: &str) {
        self.entries.push(Guard::IfFrame);
        self.entries.push(Guard::Condition(collapse(condition)));
    }

    pub fn push_elseif(&mut self, condition: &str) {
        self.entries.push(Guard::Condition(collapse(condition)));
    }

    pub fn push_else(&mut self) {
        self.entries.push(Guard::Else);
    }

    /// Pop through the innermost `IfFrame`. Unbalanced `endif` is ignored.
    pub fn pop_endif(&mut self) {
        while let Some(entry) = self.entries.pop() {
            if entry == Guard::IfFrame {
                break;
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| **e == Guard::IfFrame)
            .count()
    }

    /// Guard vector for a directive at the current position, outermost first.
    pub fn guards(&self) -> Vec<GuardTerm> {
        let mut terms = Vec::new();
        let mut group: Vec<&str> = Vec::new();
        let mut in_else = false;

        let flush = |group: &mut Vec<&str>, in_else: bool, terms: &mut Vec<GuardTerm>| {
            let last = group.len().saturating_sub(1);
            for (i, cond) in group.iter().enumerate() {
                terms.push(GuardTerm::new(*cond, !in_else && i == last));
            }
            group.clear();
        };

        for entry in &self.entries {
            match entry {
                Guard::IfFrame => {
                    flush(&mut group, in_else, &mut terms);
                    in_else = false;
                }
                Guard::Else => in_else = true,
                Guard::Condition(cond) => group.push(cond),
            }
        }
        flush(&mut group, in_else, &mut terms);
        terms
    }
}

fn collapse(condition: &str) -> String {
    condition.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identifiers referenced by a condition, without CMake keywords.
pub fn condition_variables(condition: &str) -> Vec<String> {
    const KEYWORDS: &[&str] = &[
        "NOT",
        "AND",
        "OR",
        "DEFINED",
        "TARGET",
        "EXISTS",
        "COMMAND",
        "POLICY",
        "TEST",
        "ON",
        "OFF",
        "TRUE",
        "FALSE",
        "YES",
        "NO",
        "STREQUAL",
        "STRLESS",
        "STRGREATER",
        "EQUAL",
        "LESS",
        "GREATER",
        "LESS_EQUAL",
        "GREATER_EQUAL",
        "MATCHES",
        "VERSION_LESS",
        "VERSION_GREATER",
        "VERSION_EQUAL",
        "VERSION_LESS_EQUAL",
        "VERSION_GREATER_EQUAL",
        "IS_DIRECTORY",
        "IS_ABSOLUTE",
        "IN_LIST",
        "CACHE",
        "ENV",
    ];

    let mut vars = Vec::new();
    let mut current = String::new();
    for c in condition.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c);
            continue;
        }
        if !current.is_empty() {
            let word = std::mem::take(&mut current);
            let is_number = word.chars().all(|ch| ch.is_ascii_digit());
            if !is_number && !KEYWORDS.contains(&word.to_ascii_uppercase().as_str()) && !vars.contains(&word)
            {
                vars.push(word);
            }
        }
    }
    vars
}
