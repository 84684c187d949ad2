//! # Prepare Module
//!
//! Lowers a validated [`Grammar`](crate::grammar::Grammar) into the two
//! intermediate grammars the table and lexer compilers consume:
//!
//! - [`LexicalGrammar`]: every terminal reachable from the rules plus the
//!   extras, each with a literal or pattern matcher ([`extract`]).
//! - [`SyntaxGrammar`]: each syntactic rule flattened into plain productions
//!   over symbols, with precedence, associativity, field, and alias metadata
//!   baked into the steps ([`flatten`]), and inline rules substituted at
//!   every use site ([`inline`]).

pub mod extract;
pub mod flatten;
pub mod inline;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::grammar::{Associativity, Grammar};

/// Index of a syntactic variable (nonterminal) in a [`SyntaxGrammar`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VariableId(pub u32);

/// Index of a terminal in a [`LexicalGrammar`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TokenId(pub u32);

/// A grammar symbol after name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    /// A static terminal, matched by the compiled lexer.
    Terminal(TokenId),
    /// A nonterminal.
    Variable(VariableId),
    /// An externally scanned token, by index into the externals list.
    External(u32),
}

/// How a variable appears in emitted trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    /// Produces a named node.
    Named,
    /// Declared with a leading underscore: parsed normally, but its node is
    /// spliced into the parent.
    Hidden,
    /// Generated for a `repeat`; never produces a node.
    Auxiliary,
}

/// One step of a flattened production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionStep {
    pub symbol: Symbol,
    pub field: Option<CompactString>,
    pub alias: Option<CompactString>,
}

impl ProductionStep {
    #[must_use]
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            field: None,
            alias: None,
        }
    }
}

/// A flattened production: a plain sequence of symbols plus the precedence
/// metadata resolved from the alternative's `Prec` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Production {
    pub steps: Vec<ProductionStep>,
    /// Static precedence, resolved to a number. Higher wins at construction
    /// time.
    pub precedence: Option<i32>,
    pub associativity: Option<Associativity>,
    /// Score accumulated per reduction and compared among surviving GLR
    /// branches at completion.
    pub dynamic_precedence: i32,
}

/// A nonterminal with its flattened productions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub name: CompactString,
    pub kind: VariableKind,
    pub productions: Vec<Production>,
}

/// An externally scanned token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalToken {
    pub name: CompactString,
}

/// The grammar's syntactic half: variables over resolved symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxGrammar {
    pub variables: Vec<Variable>,
    /// Tokens implicitly insertable between any two grammar tokens.
    pub extra_tokens: Vec<TokenId>,
    /// Declared conflict sets, resolved to variable ids.
    pub conflicts: Vec<Vec<VariableId>>,
    pub external_tokens: Vec<ExternalToken>,
    /// The keyword-disambiguation token, if the grammar designates one.
    pub word_token: Option<TokenId>,
    /// Variables whose uses are substituted before conflict detection.
    pub inline_variables: Vec<VariableId>,
}

impl SyntaxGrammar {
    #[must_use]
    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    #[must_use]
    pub fn variable_name(&self, id: VariableId) -> &str {
        &self.variables[id.0 as usize].name
    }
}

/// The matcher for a static terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenPattern {
    /// Exact text. Beats a pattern of the same match length.
    Literal(CompactString),
    /// A regular expression, matched anchored at the current position.
    Pattern(String),
}

/// A static terminal collected from the grammar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalToken {
    pub name: CompactString,
    pub pattern: TokenPattern,
    /// True for tokens backed by a named rule; anonymous literals are
    /// unnamed.
    pub is_named: bool,
    /// Declaration order, the final tie-breaker in maximal munch.
    pub decl_index: u32,
}

impl LexicalToken {
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self.pattern, TokenPattern::Literal(_))
    }
}

/// The grammar's lexical half.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexicalGrammar {
    pub tokens: Vec<LexicalToken>,
}

impl LexicalGrammar {
    #[must_use]
    pub fn token(&self, id: TokenId) -> &LexicalToken {
        &self.tokens[id.0 as usize]
    }

    #[must_use]
    pub fn token_name(&self, id: TokenId) -> &str {
        &self.tokens[id.0 as usize].name
    }
}

/// Run the full lowering pipeline: token extraction, flattening, then
/// inlining.
///
/// # Errors
///
/// Propagates token collisions ([`CompileError::AmbiguousToken`]), unknown
/// precedence levels, and inline cycles.
pub fn prepare(grammar: &Grammar) -> Result<(SyntaxGrammar, LexicalGrammar), CompileError> {
    let mut extraction = extract::extract_tokens(grammar)?;
    let mut syntax = flatten::flatten_grammar(grammar, &mut extraction)?;
    inline::apply_inlines(&mut syntax)?;
    Ok((syntax, extraction.lexical))
}
