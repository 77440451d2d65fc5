//! Audit and fix engine
//!
//! `run_audit` scores a config against [`RULES`]. `apply_all_fixes` applies
//! every automatic fix repeatedly until a pass changes nothing, bounded by
//! [`MAX_FIX_ITERATIONS`].

use crate::rules::{Issue, RULES, RuleScope, Severity, find_rule};
use ngxforge_core::config::{Config, ConfigPatch, NodeId};
use serde::Serialize;
use std::fmt;

/// Upper bound on audit → fix passes
pub const MAX_FIX_ITERATIONS: usize = 10;

/// Letter grade derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 90 => Grade::A,
            s if s >= 75 => Grade::B,
            s if s >= 60 => Grade::C,
            s if s >= 40 => Grade::D,
            _ => Grade::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(letter)
    }
}

/// Outcome of one audit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    /// 0..=100
    pub score: u32,
    pub grade: Grade,
    /// Most severe first; rule order within a severity
    pub issues: Vec<Issue>,
    /// Rules that reported nothing
    pub passed_rules: usize,
    pub total_rules: usize,
}

impl AuditReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// Result of [`apply_all_fixes`]
#[derive(Debug, Clone, PartialEq)]
pub struct FixOutcome {
    pub config: Config,
    /// Audit passes run, including the final one that changed nothing
    pub iterations: usize,
    /// `false` when the iteration cap was reached with changes still pending
    pub converged: bool,
}

pub fn run_audit(config: &Config) -> AuditReport {
    let mut issues = Vec::new();
    let mut passed_rules = 0;

    for rule in RULES {
        let found = rule.check(config);
        if found.is_empty() {
            passed_rules += 1;
        } else {
            tracing::debug!("Rule {} reported {} issues", rule.id, found.len());
        }
        issues.extend(found);
    }

    // Stable: rule order is kept within a severity
    issues.sort_by_key(|issue| issue.severity);

    let penalty: u32 = issues.iter().map(|i| i.severity.penalty()).sum();
    let score = 100u32.saturating_sub(penalty);

    AuditReport {
        score,
        grade: Grade::from_score(score),
        issues,
        passed_rules,
        total_rules: RULES.len(),
    }
}

/// Fix produced by one rule. `None` when the rule is unknown or has no
/// automatic fix.
pub fn apply_fix(config: &Config, rule_id: &str, node_id: Option<&NodeId>) -> Option<ConfigPatch> {
    let rule = find_rule(rule_id)?;
    let patch = rule.fix(config, node_id)?;
    tracing::debug!(
        "Fix {} for {}: {}",
        rule_id,
        node_id.map_or_else(|| "all nodes".to_string(), NodeId::to_string),
        if patch.is_empty() { "no change" } else { "patched" }
    );
    Some(patch)
}

/// Apply every fixable issue of one audit, in scope order. Returns the
/// number of patches that were not empty.
fn fix_pass(config: &mut Config, report: &AuditReport) -> usize {
    let mut applied = 0;

    for scope in [
        RuleScope::Global,
        RuleScope::Events,
        RuleScope::Http,
        RuleScope::Server,
        RuleScope::Location,
        RuleScope::Upstream,
        RuleScope::Redirect,
    ] {
        for rule in RULES.iter().filter(|r| r.scope == scope && r.can_auto_fix()) {
            for issue in report.issues.iter().filter(|i| i.rule_id == rule.id) {
                let Some(patch) = rule.fix(config, issue.node_id.as_ref()) else {
                    continue;
                };
                if !patch.is_empty() {
                    config.apply(patch);
                    applied += 1;
                }
            }
        }
    }

    applied
}

/// Audit and fix until a pass changes nothing
pub fn apply_all_fixes(config: &Config) -> FixOutcome {
    let mut current = config.clone();

    for iteration in 1..=MAX_FIX_ITERATIONS {
        let report = run_audit(&current);
        let before = current.clone();
        let applied = fix_pass(&mut current, &report);
        tracing::debug!(
            "Fix pass {}: {} issues, {} patches applied",
            iteration,
            report.issues.len(),
            applied
        );

        if current == before {
            return FixOutcome {
                config: current,
                iterations: iteration,
                converged: true,
            };
        }
    }

    tracing::warn!(
        "Fixes did not converge after {} passes; re-run the audit to see what remains",
        MAX_FIX_ITERATIONS
    );
    FixOutcome {
        config: current,
        iterations: MAX_FIX_ITERATIONS,
        converged: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngxforge_core::config::{ServerConfig, UpstreamConfig};

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(Grade::from_score(100), Grade::A);
        assert_eq!(Grade::from_score(90), Grade::A);
        assert_eq!(Grade::from_score(89), Grade::B);
        assert_eq!(Grade::from_score(75), Grade::B);
        assert_eq!(Grade::from_score(74), Grade::C);
        assert_eq!(Grade::from_score(60), Grade::C);
        assert_eq!(Grade::from_score(59), Grade::D);
        assert_eq!(Grade::from_score(40), Grade::D);
        assert_eq!(Grade::from_score(39), Grade::F);
        assert_eq!(Grade::from_score(0), Grade::F);
    }

    #[test]
    fn test_score_of_default_config() {
        // Defaults: worker_processes 1, worker_connections 512, sendfile off
        // (3 info) plus server_tokens on and gzip off (2 warnings)
        let report = run_audit(&Config::default());
        assert_eq!(report.count(Severity::Info), 3);
        assert_eq!(report.count(Severity::Warning), 2);
        assert_eq!(report.score, 100 - 2 * 10 - 3 * 3);
        assert_eq!(report.grade, Grade::C);
        assert_eq!(report.total_rules, RULES.len());
        assert_eq!(report.passed_rules, RULES.len() - 5);
    }

    #[test]
    fn test_issues_sorted_by_severity() {
        let mut config = Config::default();
        config.upstreams.push(UpstreamConfig::new("empty"));
        let report = run_audit(&config);

        assert_eq!(report.issues[0].rule_id, "upstream-empty");
        assert!(report.issues.windows(2).all(|w| w[0].severity <= w[1].severity));
        // Rule order within one severity
        let warnings: Vec<&str> = report
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .map(|i| i.rule_id)
            .collect();
        assert_eq!(warnings, vec!["server-tokens", "gzip-disabled"]);
    }

    #[test]
    fn test_score_floors_at_zero() {
        let mut config = Config::default();
        for i in 0..10 {
            config.upstreams.push(UpstreamConfig::new(format!("empty{}", i)));
        }
        let report = run_audit(&config);
        assert_eq!(report.score, 0);
        assert_eq!(report.grade, Grade::F);
    }

    #[test]
    fn test_apply_fix_lookup() {
        let config = Config::default();
        assert!(apply_fix(&config, "no-such-rule", None).is_none());
        assert!(apply_fix(&config, "upstream-empty", None).is_none());

        let patch = apply_fix(&config, "server-tokens", None).unwrap();
        let fixed = config.with_patch(patch);
        assert!(!fixed.http.server_tokens);
    }

    #[test]
    fn test_clean_config_converges_immediately() {
        let once = apply_all_fixes(&Config::default()).config;
        let again = apply_all_fixes(&once);
        assert!(again.converged);
        assert_eq!(again.iterations, 1);
        assert_eq!(again.config, once);
    }

    #[test]
    fn test_detection_only_issues_remain() {
        let mut config = Config::default();
        config.servers.push(ServerConfig::new("_"));
        let outcome = apply_all_fixes(&config);
        assert!(outcome.converged);

        let report = run_audit(&outcome.config);
        let remaining: Vec<&str> = report.issues.iter().map(|i| i.rule_id).collect();
        assert_eq!(remaining, vec!["server-name-missing"]);
    }
}
