//! Location matcher
//!
//! Selects the location nginx would use for a request path. The tiers are
//! applied strictly in this order:
//!
//! 1. exact `=` match
//! 2. longest prefix among plain and `^~` locations
//! 3. that prefix wins outright when it is `^~`
//! 4. first matching `~` / `~*` regex in declaration order
//! 5. the longest prefix from step 2, if any

use crate::config::{LocationConfig, LocationModifier};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// Which tier produced the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    PrefixPriority,
    Regex,
    Prefix,
    None,
}

/// Outcome of matching a request path
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult<'a> {
    /// Selected location, `None` when nothing matches
    pub matched: Option<&'a LocationConfig>,
    pub kind: MatchKind,
    /// Human readable account of the decision
    pub explanation: String,
    /// Regex patterns that could not be compiled
    pub diagnostics: Vec<String>,
}

/// Compiled location pattern. Look-around and backreferences, which PCRE
/// accepts and `regex` does not, go through `fancy_regex`.
#[derive(Debug, Clone)]
enum Pattern {
    Linear(Regex),
    Backtracking(fancy_regex::Regex),
}

impl Pattern {
    fn compile(source: &str, case_insensitive: bool) -> Result<Self, String> {
        let linear = match RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
        {
            Ok(regex) => return Ok(Pattern::Linear(regex)),
            Err(e) => e,
        };

        let flagged = if case_insensitive {
            format!("(?i){}", source)
        } else {
            source.to_string()
        };
        fancy_regex::Regex::new(&flagged)
            .map(Pattern::Backtracking)
            .map_err(|fancy| format!("{}; {}", linear, fancy))
    }

    fn is_match(&self, path: &str) -> bool {
        match self {
            Pattern::Linear(regex) => regex.is_match(path),
            Pattern::Backtracking(regex) => regex.is_match(path).unwrap_or_else(|e| {
                tracing::warn!("Regex {} gave up on {}: {}", regex.as_str(), path, e);
                false
            }),
        }
    }
}

/// Regex location with its compiled pattern
#[derive(Debug, Clone)]
struct CompiledRegex<'a> {
    location: &'a LocationConfig,
    regex: Pattern,
}

/// Location set with regexes compiled once for repeated matching
#[derive(Debug, Clone)]
pub struct LocationMatcher<'a> {
    locations: &'a [LocationConfig],
    regexes: Vec<CompiledRegex<'a>>,
    diagnostics: Vec<String>,
}

impl<'a> LocationMatcher<'a> {
    /// Compile the regex locations of `locations`, keeping declaration order.
    /// Patterns that fail to compile are skipped and recorded.
    pub fn new(locations: &'a [LocationConfig]) -> Self {
        let mut regexes = Vec::new();
        let mut diagnostics = Vec::new();

        for location in locations.iter().filter(|l| l.modifier.is_regex()) {
            let case_insensitive = location.modifier == LocationModifier::RegexCaseInsensitive;
            match Pattern::compile(&location.path, case_insensitive) {
                Ok(regex) => regexes.push(CompiledRegex { location, regex }),
                Err(e) => {
                    tracing::warn!(
                        "Skipping location {} {}: invalid regex: {}",
                        location.modifier,
                        location.path,
                        e
                    );
                    diagnostics.push(format!(
                        "location {} {} skipped: invalid regular expression ({})",
                        location.modifier, location.path, e
                    ));
                }
            }
        }

        Self {
            locations,
            regexes,
            diagnostics,
        }
    }

    /// Match a request path against the location set
    pub fn match_path(&self, path: &str) -> MatchResult<'a> {
        // Exact
        if let Some(location) = self
            .locations
            .iter()
            .find(|l| l.modifier == LocationModifier::Exact && l.path == path)
        {
            return self.result(
                Some(location),
                MatchKind::Exact,
                format!("exact match on location = {}", location.path),
            );
        }

        // Longest prefix; ties keep the first declared
        let mut best_prefix: Option<&'a LocationConfig> = None;
        for location in self.locations.iter().filter(|l| l.modifier.is_prefix()) {
            if path.starts_with(location.path.as_str())
                && best_prefix.is_none_or(|best| location.path.len() > best.path.len())
            {
                best_prefix = Some(location);
            }
        }

        if let Some(prefix) = best_prefix {
            if prefix.modifier == LocationModifier::PrefixPriority {
                return self.result(
                    Some(prefix),
                    MatchKind::PrefixPriority,
                    format!(
                        "longest prefix ^~ {} suppresses the regex search",
                        prefix.path
                    ),
                );
            }
        }

        // Regexes, first match in declaration order
        if let Some(compiled) = self.regexes.iter().find(|c| c.regex.is_match(path)) {
            let location = compiled.location;
            return self.result(
                Some(location),
                MatchKind::Regex,
                format!(
                    "first matching regex location {} {}",
                    location.modifier, location.path
                ),
            );
        }

        match best_prefix {
            Some(prefix) => self.result(
                Some(prefix),
                MatchKind::Prefix,
                format!("no regex matched; longest prefix {} applies", prefix.path),
            ),
            None => self.result(
                None,
                MatchKind::None,
                format!("no location matches {}", path),
            ),
        }
    }

    /// Diagnostics collected while compiling regexes
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    fn result(
        &self,
        matched: Option<&'a LocationConfig>,
        kind: MatchKind,
        explanation: String,
    ) -> MatchResult<'a> {
        MatchResult {
            matched,
            kind,
            explanation,
            diagnostics: self.diagnostics.clone(),
        }
    }
}

/// Match a request path against a location list. Never fails.
pub fn match_location<'a>(path: &str, locations: &'a [LocationConfig]) -> MatchResult<'a> {
    LocationMatcher::new(locations).match_path(path)
}
