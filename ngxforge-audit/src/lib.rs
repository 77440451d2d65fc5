//! ngxforge Audit Engine
//!
//! Scores a structured nginx config against a fixed rule list and repairs
//! it. Repairs edit the model and, through the [`cleaner`], the passthrough
//! text, so a fixed config never carries a directive twice.
//!
//! # Example
//!
//! ```rust,ignore
//! use ngxforge_audit::{apply_all_fixes, run_audit};
//!
//! let report = run_audit(&config);
//! println!("{} ({})", report.score, report.grade);
//!
//! let outcome = apply_all_fixes(&config);
//! assert!(outcome.converged);
//! ```

pub mod cleaner;
pub mod engine;
pub mod redirect;
pub mod rules;

pub use engine::{
    AuditReport, FixOutcome, Grade, MAX_FIX_ITERATIONS, apply_all_fixes, apply_fix, run_audit,
};
pub use redirect::resolve_https_redirect;
pub use rules::{AuditRule, Category, Issue, RULES, RuleScope, Severity, find_rule, is_redirect_only};
