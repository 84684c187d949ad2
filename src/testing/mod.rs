//! # Testing Module
//!
//! A small reference runtime that drives a compiled table directly, used by
//! the crate's own tests to check end-to-end behavior (tree shapes,
//! associativity, GLR forking, dynamic precedence). It favors clarity over
//! speed: branches are independent clones rather than a graph-structured
//! stack.
//!
//! Trees render as S-expressions over named nodes, with hidden and
//! auxiliary variables spliced into their parent and anonymous tokens
//! omitted.

use compact_str::CompactString;

use crate::error::ParseError;
use crate::lexer::{ExternalScanner, TokenSet};
use crate::prepare::{SyntaxGrammar, VariableKind};
use crate::tables::{Action, ActionKey, ParseState, ParseTable};
use crate::CompiledGrammar;

/// Upper bound on concurrent branches before the parse is abandoned.
pub const MAX_BRANCHES: usize = 64;

/// A node of a parsed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNode {
    pub name: CompactString,
    /// Anonymous tokens and unnamed helpers are omitted from S-expressions.
    pub named: bool,
    /// Field name attached by the enclosing production, if any.
    pub field: Option<CompactString>,
    pub children: Vec<ParseNode>,
    /// True for hidden and auxiliary variables: the node dissolves into its
    /// parent at the next reduction.
    splice: bool,
}

impl ParseNode {
    fn leaf(name: CompactString, named: bool) -> Self {
        Self {
            name,
            named,
            field: None,
            children: Vec::new(),
            splice: false,
        }
    }

    /// Render the named skeleton of the tree.
    #[must_use]
    pub fn to_sexp(&self) -> String {
        let mut out = String::new();
        self.write_sexp(&mut out);
        out
    }

    fn write_sexp(&self, out: &mut String) {
        if let Some(field) = &self.field {
            out.push_str(field);
            out.push_str(": ");
        }
        out.push('(');
        out.push_str(&self.name);
        for child in &self.children {
            if child.named {
                out.push(' ');
                child.write_sexp(out);
            }
        }
        out.push(')');
    }
}

#[derive(Debug, Clone)]
struct StackEntry {
    state: u32,
    node: Option<ParseNode>,
}

#[derive(Debug, Clone)]
struct Branch {
    stack: Vec<StackEntry>,
    offset: usize,
    /// Dynamic precedence accumulated over reductions.
    score: i64,
}

impl Branch {
    fn new() -> Self {
        Self {
            stack: vec![StackEntry {
                state: 0,
                node: None,
            }],
            offset: 0,
            score: 0,
        }
    }

    fn state(&self) -> u32 {
        self.stack.last().map_or(0, |entry| entry.state)
    }
}

/// Parse `text` with the compiled grammar's static lexer only.
///
/// # Errors
///
/// Surfaces lex failures, unexpected tokens, branch explosions, and parses
/// that remain ambiguous after dynamic precedence comparison.
pub fn parse(grammar: &CompiledGrammar, text: &str) -> Result<ParseNode, ParseError> {
    run(grammar, text, None)
}

/// Parse `text`, consulting `scanner` before the static lexer wherever the
/// current state admits external tokens.
///
/// # Errors
///
/// Same as [`parse`].
pub fn parse_with_scanner(
    grammar: &CompiledGrammar,
    text: &str,
    scanner: &mut dyn ExternalScanner,
) -> Result<ParseNode, ParseError> {
    run(grammar, text, Some(scanner))
}

fn run(
    grammar: &CompiledGrammar,
    text: &str,
    mut scanner: Option<&mut dyn ExternalScanner>,
) -> Result<ParseNode, ParseError> {
    let table = &grammar.table;
    let mut live = vec![Branch::new()];
    let mut finished: Vec<(ParseNode, i64)> = Vec::new();
    let mut best_error: Option<(usize, ParseError)> = None;

    while let Some(mut branch) = live.pop() {
        let state_id = branch.state();
        let state = &table.states[state_id as usize];

        // An extra is skipped unless it has a real action in this state.
        branch.offset = grammar
            .lexer
            .skip_extras(text, branch.offset, &actionable_tokens(state));

        let lookahead = match_lookahead(grammar, state_id, text, branch.offset, &mut scanner);
        let (key, leaf, length) = match lookahead {
            Ok(found) => found,
            Err(error) => {
                record_error(&mut best_error, branch.offset, error);
                continue;
            }
        };

        let Some(actions) = state.actions.get(&key) else {
            let error = unexpected(grammar, state_id, &key, branch.offset);
            record_error(&mut best_error, branch.offset, error);
            continue;
        };

        if live.len() + actions.len() > MAX_BRANCHES {
            return Err(ParseError::TooManyBranches {
                limit: MAX_BRANCHES,
            });
        }
        for (i, action) in actions.iter().enumerate() {
            let mut fork = if i + 1 == actions.len() {
                std::mem::replace(&mut branch, Branch::new())
            } else {
                branch.clone()
            };
            match action {
                Action::Shift { state } => {
                    fork.stack.push(StackEntry {
                        state: *state,
                        node: leaf.clone(),
                    });
                    fork.offset += length;
                    live.push(fork);
                }
                Action::Reduce { production } => {
                    match reduce(&mut fork, table, &grammar.syntax, production.0) {
                        Ok(()) => live.push(fork),
                        Err(error) => record_error(&mut best_error, fork.offset, error),
                    }
                }
                Action::Accept => {
                    if let Some(root) = fork.stack.pop().and_then(|entry| entry.node) {
                        finished.push((root, fork.score));
                    }
                }
            }
        }
    }

    pick_winner(finished, best_error)
}

fn actionable_tokens(state: &ParseState) -> TokenSet {
    state
        .actions
        .keys()
        .filter_map(|key| match key {
            ActionKey::Token(t) => Some(t.0),
            _ => None,
        })
        .collect()
}

type Lookahead = (ActionKey, Option<ParseNode>, usize);

fn match_lookahead(
    grammar: &CompiledGrammar,
    state_id: u32,
    text: &str,
    offset: usize,
    scanner: &mut Option<&mut dyn ExternalScanner>,
) -> Result<Lookahead, ParseError> {
    let state = &grammar.table.states[state_id as usize];
    if let Some(scanner) = scanner.as_deref_mut() {
        if !state.valid_externals.is_empty() {
            if let Some(m) = scanner.scan(&text[offset..], &state.valid_externals) {
                let name = grammar.syntax.external_tokens[m.token as usize].name.clone();
                return Ok((
                    ActionKey::External(m.token),
                    Some(ParseNode::leaf(name, true)),
                    m.length,
                ));
            }
        }
    }
    if offset == text.len() {
        return Ok((ActionKey::Eof, None, 0));
    }
    let m = grammar.lexer.next_token(text, offset, &state.valid_tokens)?;
    let token = grammar.lexical.token(m.token);
    Ok((
        ActionKey::Token(m.token),
        Some(ParseNode::leaf(token.name.clone(), token.is_named)),
        m.length,
    ))
}

fn reduce(
    branch: &mut Branch,
    table: &ParseTable,
    syntax: &SyntaxGrammar,
    production_index: u32,
) -> Result<(), ParseError> {
    let production = &table.productions[production_index as usize];
    let count = production.child_count();
    let split = branch.stack.len().saturating_sub(count);

    let mut children = Vec::with_capacity(count);
    for (entry, step) in branch.stack.drain(split..).zip(&production.steps) {
        let Some(mut node) = entry.node else {
            continue;
        };
        if let Some(alias) = &step.alias {
            node.name = alias.clone();
            node.named = true;
            node.splice = false;
        }
        if node.splice {
            children.extend(node.children);
        } else {
            if node.field.is_none() {
                node.field = step.field.clone();
            }
            children.push(node);
        }
    }

    let variable = production.variable;
    let kind = syntax.variable(variable).kind;
    let node = ParseNode {
        name: syntax.variable_name(variable).into(),
        named: kind == VariableKind::Named,
        field: None,
        children,
        splice: kind != VariableKind::Named,
    };
    branch.score += i64::from(production.dynamic_precedence);

    let top = branch.stack.last().map_or(0, |entry| entry.state);
    let target = table.states[top as usize]
        .gotos
        .get(&variable)
        .copied()
        .ok_or(ParseError::NoValidToken {
            offset: branch.offset,
        })?;
    branch.stack.push(StackEntry {
        state: target,
        node: Some(node),
    });
    Ok(())
}

fn unexpected(
    grammar: &CompiledGrammar,
    state_id: u32,
    key: &ActionKey,
    offset: usize,
) -> ParseError {
    let state = &grammar.table.states[state_id as usize];
    let token = match key {
        ActionKey::Token(t) => grammar.lexical.token_name(*t).into(),
        ActionKey::External(e) => grammar.syntax.external_tokens[*e as usize].name.clone(),
        ActionKey::Eof => "end of input".into(),
    };
    let mut expected: Vec<CompactString> = state
        .actions
        .keys()
        .filter_map(|key| match key {
            ActionKey::Token(t) => Some(grammar.lexical.token_name(*t).into()),
            ActionKey::External(e) => {
                Some(grammar.syntax.external_tokens[*e as usize].name.clone())
            }
            ActionKey::Eof => None,
        })
        .collect();
    expected.sort_unstable();
    ParseError::UnexpectedToken {
        token,
        offset,
        expected,
    }
}

fn record_error(best: &mut Option<(usize, ParseError)>, offset: usize, error: ParseError) {
    if best.as_ref().map_or(true, |(at, _)| offset >= *at) {
        *best = Some((offset, error));
    }
}

/// Among completed branches: keep the distinct trees with the highest
/// dynamic score; more than one is an ambiguity.
fn pick_winner(
    finished: Vec<(ParseNode, i64)>,
    best_error: Option<(usize, ParseError)>,
) -> Result<ParseNode, ParseError> {
    if finished.is_empty() {
        return Err(best_error
            .map(|(_, error)| error)
            .unwrap_or(ParseError::NoValidToken { offset: 0 }));
    }
    let top = finished.iter().map(|&(_, score)| score).max().unwrap_or(0);
    let mut winners: Vec<ParseNode> = Vec::new();
    for (node, score) in finished {
        if score == top && !winners.contains(&node) {
            winners.push(node);
        }
    }
    if winners.len() > 1 {
        return Err(ParseError::Ambiguity {
            alternatives: winners.iter().map(ParseNode::to_sexp).collect(),
        });
    }
    // Non-empty: at least one finished branch carries the top score.
    Ok(winners.swap_remove(0))
}
