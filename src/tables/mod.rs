//! # Parse Table Module
//!
//! LR parse table construction with conflict-aware resolution.
//!
//! States are LR(0) item sets; reduce lookaheads come from FOLLOW sets.
//! Where two actions compete on the same lookahead, resolution proceeds in
//! order:
//!
//! 1. static precedence and associativity,
//! 2. declared conflict sets, which retain every competing action so a GLR
//!    runtime can fork a branch per action,
//! 3. otherwise the grammar fails to compile with
//!    [`CompileError::UnresolvedConflict`](crate::error::CompileError).
//!
//! Each state also records the set of tokens and external tokens valid in
//! it, which drives state-dependent lexing and lets a downstream runtime
//! implement recovery without re-deriving the automaton.

mod build;

pub use build::build_parse_table;

use compact_str::CompactString;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::grammar::Associativity;
use crate::lexer::TokenSet;
use crate::prepare::{
    LexicalGrammar, ProductionStep, SyntaxGrammar, TokenId, VariableId, VariableKind,
};

/// Index of a production in [`ParseTable::productions`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ProductionId(pub u32);

/// A lookahead the parser dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKey {
    Token(TokenId),
    External(u32),
    Eof,
}

/// One parser action. A lookahead mapping to more than one action is a
/// deliberately retained ambiguity: the runtime forks a branch per action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Shift { state: u32 },
    Reduce { production: ProductionId },
    Accept,
}

/// A production as stored in the table: the flattened steps plus the
/// metadata conflict resolution and the runtime need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableProduction {
    /// Reduced-to variable. The augmented start production stores a sentinel
    /// never looked up.
    pub variable: VariableId,
    pub steps: Vec<ProductionStep>,
    /// Resolved static precedence; unannotated productions sit at 0.
    pub precedence: i32,
    pub associativity: Option<Associativity>,
    pub dynamic_precedence: i32,
}

impl TableProduction {
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.steps.len()
    }
}

/// One parser state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseState {
    /// Keys serialize as entry sequences: action keys are not stringly.
    #[serde(with = "serde_entries")]
    pub actions: HashMap<ActionKey, SmallVec<[Action; 2]>, ahash::RandomState>,
    #[serde(with = "serde_entries")]
    pub gotos: HashMap<VariableId, u32, ahash::RandomState>,
    /// Static tokens the lexer should attempt in this state.
    pub valid_tokens: TokenSet,
    /// External tokens to offer the scanner in this state.
    pub valid_externals: TokenSet,
}

impl ParseState {
    #[must_use]
    pub fn has_conflict(&self) -> bool {
        self.actions.values().any(|actions| actions.len() > 1)
    }
}

/// The compiled automaton. State 0 is the start state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseTable {
    pub states: Vec<ParseState>,
    pub productions: Vec<TableProduction>,
    pub start_variable: VariableId,
}

mod serde_entries {
    use core::hash::Hash;

    use hashbrown::HashMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K, V, S>(
        map: &HashMap<K, V, ahash::RandomState>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(
        deserializer: D,
    ) -> Result<HashMap<K, V, ahash::RandomState>, D::Error>
    where
        K: Deserialize<'de> + Eq + Hash,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let entries = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

/// A node kind exposed by the compiled grammar, for downstream tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeInfo {
    pub name: CompactString,
    pub named: bool,
    /// Field names that can appear on this node, sorted.
    pub fields: Vec<CompactString>,
}

/// Enumerate the node kinds the grammar can emit: every named variable and
/// every named token, in declaration order.
#[must_use]
pub fn node_types(syntax: &SyntaxGrammar, lexical: &LexicalGrammar) -> Vec<NodeTypeInfo> {
    let mut out = Vec::new();
    for variable in &syntax.variables {
        if variable.kind != VariableKind::Named {
            continue;
        }
        let mut fields: Vec<CompactString> = variable
            .productions
            .iter()
            .flat_map(|p| p.steps.iter().filter_map(|s| s.field.clone()))
            .collect();
        fields.sort_unstable();
        fields.dedup();
        out.push(NodeTypeInfo {
            name: variable.name.clone(),
            named: true,
            fields,
        });
    }
    for token in &lexical.tokens {
        out.push(NodeTypeInfo {
            name: token.name.clone(),
            named: token.is_named,
            fields: Vec::new(),
        });
    }
    out
}
