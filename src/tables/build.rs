//! LR automaton construction and conflict resolution.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::error::{CompileError, CompileWarning};
use crate::grammar::Associativity;
use crate::lexer::TokenSet;
use crate::prepare::{LexicalGrammar, Symbol, SyntaxGrammar, VariableId, VariableKind};
use crate::tables::{
    Action, ActionKey, ParseState, ParseTable, ProductionId, TableProduction,
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Sentinel variable for the augmented start production.
const AUGMENTED: VariableId = VariableId(u32::MAX);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Item {
    production: u32,
    dot: u32,
}

#[derive(Debug, Clone)]
struct ShiftCandidate {
    target: u32,
    /// Static precedences of the productions whose items shift here.
    precedences: SmallVec<[i32; 4]>,
    variables: SmallVec<[VariableId; 4]>,
}

/// A state before conflict resolution.
#[derive(Debug, Default)]
struct RawState {
    shifts: HashMap<ActionKey, ShiftCandidate, ahash::RandomState>,
    gotos: HashMap<VariableId, u32, ahash::RandomState>,
    reduces: HashMap<ActionKey, Vec<u32>, ahash::RandomState>,
    accept: bool,
}

/// Build the parse table for a lowered grammar.
///
/// # Errors
///
/// Returns [`CompileError::UnresolvedConflict`] for any action tie that
/// neither precedence nor a declared conflict set resolves.
pub fn build_parse_table(
    syntax: &SyntaxGrammar,
    lexical: &LexicalGrammar,
) -> Result<(ParseTable, Vec<CompileWarning>), CompileError> {
    let start_variable = VariableId(0);
    let productions = collect_productions(syntax, start_variable);
    let prods_of = productions_by_variable(syntax, &productions);
    let follow = compute_follow(syntax, &productions, start_variable);

    let raw_states = build_states(&productions, &prods_of, &follow);
    log::debug!(
        "automaton: {} states, {} productions",
        raw_states.len(),
        productions.len()
    );

    let conflict_sets: Vec<HashSet<VariableId, ahash::RandomState>> = syntax
        .conflicts
        .iter()
        .map(|set| set.iter().copied().collect())
        .collect();

    #[cfg(feature = "parallel")]
    let resolved: Result<Vec<_>, CompileError> = raw_states
        .par_iter()
        .map(|raw| resolve_state(raw, &productions, &conflict_sets, syntax, lexical))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let resolved: Result<Vec<_>, CompileError> = raw_states
        .iter()
        .map(|raw| resolve_state(raw, &productions, &conflict_sets, syntax, lexical))
        .collect();

    let mut states = Vec::with_capacity(raw_states.len());
    let mut used_sets: HashSet<usize, ahash::RandomState> =
        HashSet::with_hasher(ahash::RandomState::new());
    for (state, used) in resolved? {
        used_sets.extend(used);
        states.push(state);
    }

    for state in &mut states {
        for &extra in &syntax.extra_tokens {
            state.valid_tokens.insert(extra.0);
        }
    }

    let mut warnings = unused_conflict_warnings(syntax, &used_sets);
    warnings.extend(unreachable_warnings(syntax, lexical, start_variable));

    Ok((
        ParseTable {
            states,
            productions,
            start_variable,
        },
        warnings,
    ))
}

/// Production 0 is the augmented start; the rest follow variable order.
fn collect_productions(
    syntax: &SyntaxGrammar,
    start_variable: VariableId,
) -> Vec<TableProduction> {
    let mut productions = vec![TableProduction {
        variable: AUGMENTED,
        steps: vec![crate::prepare::ProductionStep::new(Symbol::Variable(
            start_variable,
        ))],
        precedence: 0,
        associativity: None,
        dynamic_precedence: 0,
    }];
    for (id, variable) in syntax.variables.iter().enumerate() {
        let id = VariableId(id as u32);
        if syntax.inline_variables.contains(&id) {
            // Substituted everywhere; nothing can reach these.
            continue;
        }
        for production in &variable.productions {
            productions.push(TableProduction {
                variable: id,
                steps: production.steps.clone(),
                precedence: production.precedence.unwrap_or(0),
                associativity: production.associativity,
                dynamic_precedence: production.dynamic_precedence,
            });
        }
    }
    productions
}

fn productions_by_variable(
    syntax: &SyntaxGrammar,
    productions: &[TableProduction],
) -> Vec<Vec<u32>> {
    let mut prods_of = vec![Vec::new(); syntax.variables.len()];
    for (index, production) in productions.iter().enumerate() {
        if production.variable != AUGMENTED {
            prods_of[production.variable.0 as usize].push(index as u32);
        }
    }
    prods_of
}

fn step_key(symbol: Symbol) -> Option<ActionKey> {
    match symbol {
        Symbol::Terminal(t) => Some(ActionKey::Token(t)),
        Symbol::External(e) => Some(ActionKey::External(e)),
        Symbol::Variable(_) => None,
    }
}

/// SLR lookaheads: FOLLOW per variable, computed to a fixed point.
fn compute_follow(
    syntax: &SyntaxGrammar,
    productions: &[TableProduction],
    start_variable: VariableId,
) -> Vec<HashSet<ActionKey, ahash::RandomState>> {
    let variable_count = syntax.variables.len();
    let mut nullable = vec![false; variable_count];
    loop {
        let mut changed = false;
        for production in &productions[1..] {
            let id = production.variable.0 as usize;
            if nullable[id] {
                continue;
            }
            let all_nullable = production.steps.iter().all(|step| match step.symbol {
                Symbol::Variable(v) => nullable[v.0 as usize],
                _ => false,
            });
            if all_nullable {
                nullable[id] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut first: Vec<HashSet<ActionKey, ahash::RandomState>> =
        vec![HashSet::with_hasher(ahash::RandomState::new()); variable_count];
    loop {
        let mut changed = false;
        for production in &productions[1..] {
            let id = production.variable.0 as usize;
            for step in &production.steps {
                match step.symbol {
                    Symbol::Variable(v) => {
                        let additions: Vec<ActionKey> =
                            first[v.0 as usize].iter().copied().collect();
                        for key in additions {
                            changed |= first[id].insert(key);
                        }
                        if !nullable[v.0 as usize] {
                            break;
                        }
                    }
                    other => {
                        if let Some(key) = step_key(other) {
                            changed |= first[id].insert(key);
                        }
                        break;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    let mut follow: Vec<HashSet<ActionKey, ahash::RandomState>> =
        vec![HashSet::with_hasher(ahash::RandomState::new()); variable_count];
    follow[start_variable.0 as usize].insert(ActionKey::Eof);
    loop {
        let mut changed = false;
        for production in &productions[1..] {
            let owner = production.variable.0 as usize;
            for (i, step) in production.steps.iter().enumerate() {
                let Symbol::Variable(v) = step.symbol else {
                    continue;
                };
                let v = v.0 as usize;
                let mut suffix_nullable = true;
                for later in &production.steps[i + 1..] {
                    match later.symbol {
                        Symbol::Variable(w) => {
                            let additions: Vec<ActionKey> =
                                first[w.0 as usize].iter().copied().collect();
                            for key in additions {
                                changed |= follow[v].insert(key);
                            }
                            if !nullable[w.0 as usize] {
                                suffix_nullable = false;
                                break;
                            }
                        }
                        other => {
                            if let Some(key) = step_key(other) {
                                changed |= follow[v].insert(key);
                            }
                            suffix_nullable = false;
                            break;
                        }
                    }
                }
                if suffix_nullable {
                    let additions: Vec<ActionKey> = follow[owner].iter().copied().collect();
                    for key in additions {
                        changed |= follow[v].insert(key);
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    follow
}

fn closure(kernel: &[Item], productions: &[TableProduction], prods_of: &[Vec<u32>]) -> Vec<Item> {
    let mut items: HashSet<Item, ahash::RandomState> =
        HashSet::with_hasher(ahash::RandomState::new());
    let mut worklist: Vec<Item> = kernel.to_vec();
    while let Some(item) = worklist.pop() {
        if !items.insert(item) {
            continue;
        }
        let production = &productions[item.production as usize];
        if let Some(step) = production.steps.get(item.dot as usize) {
            if let Symbol::Variable(v) = step.symbol {
                for &p in &prods_of[v.0 as usize] {
                    worklist.push(Item {
                        production: p,
                        dot: 0,
                    });
                }
            }
        }
    }
    let mut items: Vec<Item> = items.into_iter().collect();
    items.sort_unstable();
    items
}

fn symbol_order(symbol: Symbol) -> (u8, u32) {
    match symbol {
        Symbol::Terminal(t) => (0, t.0),
        Symbol::External(e) => (1, e),
        Symbol::Variable(v) => (2, v.0),
    }
}

fn build_states(
    productions: &[TableProduction],
    prods_of: &[Vec<u32>],
    follow: &[HashSet<ActionKey, ahash::RandomState>],
) -> Vec<RawState> {
    let start_kernel = vec![Item {
        production: 0,
        dot: 0,
    }];
    let mut kernels = vec![start_kernel.clone()];
    let mut state_ids: HashMap<Vec<Item>, u32, ahash::RandomState> =
        HashMap::with_hasher(ahash::RandomState::new());
    state_ids.insert(start_kernel, 0);
    let mut raw_states = Vec::new();

    let mut next = 0usize;
    while next < kernels.len() {
        let items = closure(&kernels[next], productions, prods_of);
        next += 1;

        let mut raw = RawState::default();

        // Group in-progress items by the symbol after the dot. Sorted so
        // state numbering does not depend on hash order.
        let mut by_symbol: Vec<(Symbol, Vec<Item>)> = Vec::new();
        for &item in &items {
            let production = &productions[item.production as usize];
            match production.steps.get(item.dot as usize) {
                Some(step) => {
                    match by_symbol.iter_mut().find(|(s, _)| *s == step.symbol) {
                        Some((_, group)) => group.push(item),
                        None => by_symbol.push((step.symbol, vec![item])),
                    }
                }
                None => {
                    // Completed item: reduce on every FOLLOW lookahead.
                    if item.production == 0 {
                        raw.accept = true;
                    } else {
                        for &key in &follow[production.variable.0 as usize] {
                            raw.reduces.entry(key).or_default().push(item.production);
                        }
                    }
                }
            }
        }
        by_symbol.sort_unstable_by_key(|(symbol, _)| symbol_order(*symbol));

        for (symbol, group) in by_symbol {
            let mut kernel: Vec<Item> = group
                .iter()
                .map(|item| Item {
                    production: item.production,
                    dot: item.dot + 1,
                })
                .collect();
            kernel.sort_unstable();
            let target = match state_ids.get(&kernel) {
                Some(&id) => id,
                None => {
                    let id = kernels.len() as u32;
                    state_ids.insert(kernel.clone(), id);
                    kernels.push(kernel);
                    id
                }
            };
            match step_key(symbol) {
                Some(key) => {
                    let mut candidate = ShiftCandidate {
                        target,
                        precedences: SmallVec::new(),
                        variables: SmallVec::new(),
                    };
                    for item in &group {
                        let production = &productions[item.production as usize];
                        candidate.precedences.push(production.precedence);
                        if production.variable != AUGMENTED
                            && !candidate.variables.contains(&production.variable)
                        {
                            candidate.variables.push(production.variable);
                        }
                    }
                    raw.shifts.insert(key, candidate);
                }
                None => {
                    if let Symbol::Variable(v) = symbol {
                        raw.gotos.insert(v, target);
                    }
                }
            }
        }
        raw_states.push(raw);
    }
    raw_states
}

fn lookahead_name(
    key: ActionKey,
    syntax: &SyntaxGrammar,
    lexical: &LexicalGrammar,
) -> compact_str::CompactString {
    match key {
        ActionKey::Token(t) => lexical.token_name(t).into(),
        ActionKey::External(e) => syntax.external_tokens[e as usize].name.clone(),
        ActionKey::Eof => "end of input".into(),
    }
}

fn resolve_state(
    raw: &RawState,
    productions: &[TableProduction],
    conflict_sets: &[HashSet<VariableId, ahash::RandomState>],
    syntax: &SyntaxGrammar,
    lexical: &LexicalGrammar,
) -> Result<(ParseState, Vec<usize>), CompileError> {
    let mut state = ParseState::default();
    let mut used_sets = Vec::new();

    let mut keys: Vec<ActionKey> = raw
        .shifts
        .keys()
        .chain(raw.reduces.keys())
        .copied()
        .collect();
    if raw.accept {
        keys.push(ActionKey::Eof);
    }
    keys.sort_unstable_by_key(|key| match key {
        ActionKey::Token(t) => (0, t.0),
        ActionKey::External(e) => (1, *e),
        ActionKey::Eof => (2, 0),
    });
    keys.dedup();

    for key in keys {
        let shift = raw.shifts.get(&key);
        let reduces = raw.reduces.get(&key).cloned().unwrap_or_default();
        let accept = raw.accept && key == ActionKey::Eof;
        let actions = resolve_actions(
            key,
            shift,
            reduces,
            accept,
            productions,
            conflict_sets,
            syntax,
            lexical,
            &mut used_sets,
        )?;
        match key {
            ActionKey::Token(t) => state.valid_tokens.insert(t.0),
            ActionKey::External(e) => state.valid_externals.insert(e),
            ActionKey::Eof => {}
        }
        state.actions.insert(key, actions);
    }
    state.gotos = raw.gotos.clone();
    Ok((state, used_sets))
}

#[allow(clippy::too_many_arguments)]
fn resolve_actions(
    key: ActionKey,
    shift: Option<&ShiftCandidate>,
    mut reduces: Vec<u32>,
    accept: bool,
    productions: &[TableProduction],
    conflict_sets: &[HashSet<VariableId, ahash::RandomState>],
    syntax: &SyntaxGrammar,
    lexical: &LexicalGrammar,
    used_sets: &mut Vec<usize>,
) -> Result<SmallVec<[Action; 2]>, CompileError> {
    let prec = |p: u32| productions[p as usize].precedence;
    reduces.sort_unstable();
    reduces.dedup();

    // A reduction whose precedence strictly dominates all rivals wins the
    // reduce/reduce tie outright.
    if reduces.len() > 1 {
        if let Some(&best) = reduces.iter().max_by_key(|&&p| prec(p)) {
            let best_prec = prec(best);
            if reduces.iter().all(|&p| p == best || prec(p) < best_prec) {
                reduces = vec![best];
            }
        }
    }

    let mut keep_shift = shift.is_some();
    if let Some(shift) = shift {
        // Shift beats every reduction with strictly lower precedence.
        reduces.retain(|&r| !shift.precedences.iter().all(|&s| s > prec(r)));
        if !reduces.is_empty() {
            let all_reduce_win = reduces
                .iter()
                .all(|&r| shift.precedences.iter().all(|&s| prec(r) > s));
            if all_reduce_win {
                keep_shift = false;
            } else if reduces.len() == 1 {
                let r = reduces[0];
                if shift.precedences.iter().all(|&s| s == prec(r)) {
                    match productions[r as usize].associativity {
                        Some(Associativity::Left) => keep_shift = false,
                        Some(Associativity::Right) => reduces.clear(),
                        _ => {}
                    }
                }
            }
        }
    }

    let mut actions: SmallVec<[Action; 2]> = SmallVec::new();
    if keep_shift {
        if let Some(shift) = shift {
            actions.push(Action::Shift {
                state: shift.target,
            });
        }
    }
    for &r in &reduces {
        actions.push(Action::Reduce {
            production: ProductionId(r),
        });
    }
    if accept {
        actions.push(Action::Accept);
    }
    if actions.len() <= 1 {
        return Ok(actions);
    }

    // Precedence left a tie. A declared conflict set covering every involved
    // variable downgrades the tie to a deliberate ambiguity.
    let mut involved: Vec<VariableId> = Vec::new();
    if keep_shift {
        if let Some(shift) = shift {
            involved.extend(shift.variables.iter().copied());
        }
    }
    for &r in &reduces {
        let v = productions[r as usize].variable;
        if v != AUGMENTED {
            involved.push(v);
        }
    }
    involved.sort_unstable();
    involved.dedup();

    let matchable: Vec<VariableId> = involved
        .iter()
        .copied()
        .filter(|&v| syntax.variable(v).kind != VariableKind::Auxiliary)
        .collect();
    if !matchable.is_empty() {
        for (index, set) in conflict_sets.iter().enumerate() {
            if matchable.iter().all(|v| set.contains(v)) {
                used_sets.push(index);
                return Ok(actions);
            }
        }
    }

    let mut symbols: Vec<compact_str::CompactString> = involved
        .iter()
        .map(|&v| syntax.variable(v).name.clone())
        .collect();
    symbols.sort_unstable();
    Err(CompileError::UnresolvedConflict {
        symbols,
        lookahead: lookahead_name(key, syntax, lexical),
    })
}

fn unused_conflict_warnings(
    syntax: &SyntaxGrammar,
    used: &HashSet<usize, ahash::RandomState>,
) -> Vec<CompileWarning> {
    syntax
        .conflicts
        .iter()
        .enumerate()
        .filter(|(index, _)| !used.contains(index))
        .map(|(_, set)| CompileWarning::UnusedConflictSet {
            members: set
                .iter()
                .map(|&v| syntax.variable(v).name.clone())
                .collect(),
        })
        .collect()
}

/// Rules no production chain from the start symbol can reach: variables,
/// plus named token rules nothing reachable references.
fn unreachable_warnings(
    syntax: &SyntaxGrammar,
    lexical: &LexicalGrammar,
    start: VariableId,
) -> Vec<CompileWarning> {
    let mut reachable: HashSet<VariableId, ahash::RandomState> =
        HashSet::with_hasher(ahash::RandomState::new());
    let mut used_tokens = TokenSet::new();
    let mut worklist = vec![start];
    while let Some(id) = worklist.pop() {
        if !reachable.insert(id) {
            continue;
        }
        for production in &syntax.variable(id).productions {
            for step in &production.steps {
                match step.symbol {
                    Symbol::Variable(v) => worklist.push(v),
                    Symbol::Terminal(t) => used_tokens.insert(t.0),
                    Symbol::External(_) => {}
                }
            }
        }
    }
    for &extra in &syntax.extra_tokens {
        used_tokens.insert(extra.0);
    }
    if let Some(word) = syntax.word_token {
        used_tokens.insert(word.0);
    }

    let mut warnings: Vec<CompileWarning> = syntax
        .variables
        .iter()
        .enumerate()
        .filter(|(index, variable)| {
            let id = VariableId(*index as u32);
            variable.kind != VariableKind::Auxiliary
                && !reachable.contains(&id)
                && !syntax.inline_variables.contains(&id)
        })
        .map(|(_, variable)| CompileWarning::UnreachableRule {
            name: variable.name.clone(),
        })
        .collect();
    for (index, token) in lexical.tokens.iter().enumerate() {
        if token.is_named && !used_tokens.contains(index as u32) {
            warnings.push(CompileWarning::UnreachableRule {
                name: token.name.clone(),
            });
        }
    }
    warnings
}
