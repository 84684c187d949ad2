//! # Error Types
//!
//! Compile-time errors, non-fatal warnings, and the runtime error surface the
//! generated tables must support.
//!
//! ## Overview
//!
//! - [`CompileError`]: fatal grammar-compilation errors. A failed compile
//!   discards all partial artifacts; no table type can exist half-built.
//! - [`CompileWarning`]: non-fatal findings (unreachable rules, over-defensive
//!   conflict declarations) collected on the compile result.
//! - [`ParseError`]: errors produced by the reference runtime in
//!   [`crate::testing`]; the real parse-execution runtime is external, but the
//!   table artifacts expose per-state valid-token sets so a downstream parser
//!   can implement skip/insert recovery.
//!
//! When the `diagnostics` feature is enabled, errors integrate with [`miette`]
//! for rich reporting.

use compact_str::CompactString;
use thiserror::Error;

#[cfg(feature = "diagnostics")]
use miette::Diagnostic;

/// Fatal errors raised while compiling a grammar.
///
/// Every variant names the offending rule(s) and, where applicable, the
/// triggering lookahead token, so latent grammar bugs surface early instead of
/// producing a silently wrong parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum CompileError {
    /// A reference names a rule not declared in the grammar.
    #[error("undefined rule `{referenced}` referenced from `{referencing}`")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::undefined_rule)))]
    UndefinedRule {
        referenced: CompactString,
        referencing: CompactString,
    },

    /// A rule name collides with a reserved combinator name.
    #[error("rule name `{name}` collides with a reserved combinator name")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::reserved_rule_name)))]
    ReservedRuleName { name: CompactString },

    /// Every derivation of the rule recurses into itself with no base case.
    #[error("rule `{name}` never terminates: every derivation recurses with no base case")]
    #[cfg_attr(
        feature = "diagnostics",
        diagnostic(code(karst::non_terminating_recursion))
    )]
    NonTerminatingRecursion { name: CompactString },

    /// `repeat` wraps a rule that can only ever match the empty string, which
    /// would loop forever.
    #[error("rule `{name}` repeats content that can only match the empty string")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::repeat_of_nullable)))]
    RepeatOfNullable { name: CompactString },

    /// A named precedence level is not present in the grammar's level table.
    #[error("rule `{rule}` references unknown precedence level `{level}`")]
    #[cfg_attr(
        feature = "diagnostics",
        diagnostic(code(karst::unknown_precedence_level))
    )]
    UnknownPrecedenceLevel {
        rule: CompactString,
        level: CompactString,
    },

    /// Mutual inlining with no fixed point.
    #[error("inline cycle: {}", format_names(.cycle))]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::inline_cycle)))]
    InlineCycle { cycle: Vec<CompactString> },

    /// Two static terminals with identical literal text and different token
    /// identity.
    #[error("tokens `{first}` and `{second}` both match the literal text {text:?}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::ambiguous_token)))]
    AmbiguousToken {
        first: CompactString,
        second: CompactString,
        text: CompactString,
    },

    /// A pattern terminal contains an invalid regular expression.
    #[error("token `{token}` has an invalid pattern: {message}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::invalid_pattern)))]
    InvalidPattern {
        token: CompactString,
        message: String,
    },

    /// A rule is used somewhere only a lexical token is allowed (extras,
    /// word) but is not itself a token.
    #[error("`{name}` is used as {context} but is not a lexical token")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::not_a_token)))]
    NotAToken {
        name: CompactString,
        context: &'static str,
    },

    /// A shift/reduce or reduce/reduce tie with no precedence, associativity,
    /// or declared conflict set to resolve it.
    #[error(
        "unresolved conflict between {} on lookahead `{lookahead}`",
        format_names(.symbols)
    )]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::unresolved_conflict)))]
    UnresolvedConflict {
        symbols: Vec<CompactString>,
        lookahead: CompactString,
    },

    /// The grammar declares no rules, so there is no start symbol.
    #[error("grammar `{grammar}` declares no rules")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::missing_start_rule)))]
    MissingStartRule { grammar: CompactString },
}

fn format_names(names: &[CompactString]) -> String {
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('`');
        out.push_str(name);
        out.push('`');
    }
    out
}

/// Non-fatal findings collected during compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileWarning {
    /// A declared rule is never referenced from the start symbol.
    UnreachableRule { name: CompactString },
    /// A declared conflict set never suppressed a conflict.
    UnusedConflictSet { members: Vec<CompactString> },
}

impl std::fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnreachableRule { name } => {
                write!(f, "rule `{name}` is unreachable from the start symbol")
            }
            Self::UnusedConflictSet { members } => {
                write!(
                    f,
                    "conflict declaration {} never suppressed a conflict",
                    format_names(members)
                )
            }
        }
    }
}

/// Errors produced by the reference runtime in [`crate::testing`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum ParseError {
    /// No valid token matched at the given byte offset.
    #[error("no valid token at byte {offset}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::lex_error)))]
    NoValidToken { offset: usize },

    /// A token was recognized but no action exists for it in the current
    /// state.
    #[error("unexpected token `{token}` at byte {offset}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::unexpected_token)))]
    UnexpectedToken {
        token: CompactString,
        offset: usize,
        expected: Vec<CompactString>,
    },

    /// More than one parse survived to end-of-input with equal dynamic
    /// precedence.
    #[error("ambiguous parse: {alternatives:?}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::ambiguous_parse)))]
    Ambiguity { alternatives: Vec<String> },

    /// GLR branching exceeded the configured limit.
    #[error("too many concurrent parse branches (limit {limit})")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(karst::too_many_branches)))]
    TooManyBranches { limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_conflict_names_symbols_and_lookahead() {
        let err = CompileError::UnresolvedConflict {
            symbols: vec!["expr".into(), "type".into()],
            lookahead: "identifier".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("`expr`"));
        assert!(msg.contains("`type`"));
        assert!(msg.contains("`identifier`"));
    }

    #[test]
    fn warning_display() {
        let warning = CompileWarning::UnreachableRule {
            name: "orphan".into(),
        };
        assert!(warning.to_string().contains("orphan"));
    }
}
