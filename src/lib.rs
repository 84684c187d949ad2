//! # karst
//!
//! A grammar compiler: from a declarative grammar (rules, precedence,
//! conflict declarations, external token hooks) to a conflict-aware LR/GLR
//! parsing automaton.
//!
//! The pipeline has four stages:
//!
//! 1. **Declaration** ([`grammar`]): rules are combinator expressions
//!    assembled through [`GrammarBuilder`], validated into an immutable
//!    [`Grammar`].
//! 2. **Lowering** ([`prepare`]): terminals are extracted into a lexical
//!    grammar, syntactic rules are flattened into plain productions, and
//!    inline rules are substituted away.
//! 3. **Lexer compilation** ([`lexer`]): every terminal gets a literal or
//!    anchored-regex matcher, driven per parse state by maximal munch.
//! 4. **Table construction** ([`tables`]): LR states with precedence-based
//!    conflict resolution; ties covered by a declared conflict set are kept
//!    as multiple actions for a GLR runtime to fork on.
//!
//! The [`testing`] module carries a small reference runtime the crate's own
//! tests drive the tables with.
//!
//! ```
//! use karst::grammar::{choice, lit, pattern, prec_left, seq, sym, GrammarBuilder};
//!
//! let grammar = GrammarBuilder::new("arithmetic")
//!     .rule(
//!         "expression",
//!         choice([
//!             prec_left(2, seq([sym("expression"), lit("*"), sym("expression")])),
//!             prec_left(1, seq([sym("expression"), lit("+"), sym("expression")])),
//!             sym("number"),
//!         ]),
//!     )
//!     .rule("number", pattern("[0-9]+"))
//!     .extra(pattern(r"\s+"))
//!     .build()?;
//!
//! let compiled = karst::compile(&grammar)?;
//! let tree = karst::testing::parse(&compiled, "1 + 2 * 3")?;
//! assert_eq!(
//!     tree.to_sexp(),
//!     "(expression (expression (number)) \
//!      (expression (expression (number)) (expression (number))))"
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod grammar;
pub mod lexer;
pub mod prepare;
pub mod tables;
pub mod testing;

pub use error::{CompileError, CompileWarning, ParseError};
pub use grammar::{Grammar, GrammarBuilder};
pub use lexer::{ExternalMatch, ExternalScanner, Lexer, TokenSet};
pub use tables::{Action, ActionKey, NodeTypeInfo, ParseState, ParseTable};

/// Everything a runtime needs to parse with the grammar.
///
/// The table, grammar halves, and node types serialize; the lexer is
/// rebuilt from the lexical grammar with [`Lexer::compile`] on load.
#[derive(Debug)]
pub struct CompiledGrammar {
    pub syntax: prepare::SyntaxGrammar,
    pub lexical: prepare::LexicalGrammar,
    pub lexer: Lexer,
    pub table: ParseTable,
    pub node_types: Vec<NodeTypeInfo>,
    /// Non-fatal findings: unreachable rules, conflict declarations that
    /// never fired.
    pub warnings: Vec<CompileWarning>,
}

/// Run the full pipeline on a validated grammar.
///
/// # Errors
///
/// Any [`CompileError`]: lowering failures (token collisions, unknown
/// precedence levels, inline cycles), invalid patterns, or unresolved
/// parse-table conflicts. A failed compile yields no partial artifacts.
pub fn compile(grammar: &Grammar) -> Result<CompiledGrammar, CompileError> {
    let (syntax, lexical) = prepare::prepare(grammar)?;
    let lexer = Lexer::compile(&lexical, &syntax.extra_tokens, syntax.word_token)?;
    let (table, warnings) = tables::build_parse_table(&syntax, &lexical)?;
    let node_types = tables::node_types(&syntax, &lexical);
    log::info!(
        "compiled grammar `{}`: {} tokens, {} variables, {} states, {} warnings",
        grammar.name(),
        lexical.tokens.len(),
        syntax.variables.len(),
        table.states.len(),
        warnings.len()
    );
    Ok(CompiledGrammar {
        syntax,
        lexical,
        lexer,
        table,
        node_types,
        warnings,
    })
}
