//! Flattening: rewrites each syntactic rule's combinator tree into plain
//! productions over resolved symbols.
//!
//! `choice` forks alternatives, `seq` takes the cross product, `optional`
//! forks an empty alternative, and `repeat` is rewritten into a
//! left-recursive auxiliary variable (left recursion keeps the LR stack
//! flat). Precedence annotations resolve named levels against the grammar's
//! level table and attach to the flattened production; field and alias tags
//! attach to the steps they wrap.

use compact_str::CompactString;
use hashbrown::HashMap;

use crate::error::CompileError;
use crate::grammar::{Associativity, Grammar, PrecValue, Rule};
use crate::prepare::extract::{anonymous_token, TokenExtraction};
use crate::prepare::{
    ExternalToken, Production, ProductionStep, Symbol, SyntaxGrammar, Variable, VariableId,
    VariableKind,
};

#[derive(Debug, Clone, Default)]
struct Draft {
    steps: Vec<ProductionStep>,
    precedence: Option<i32>,
    associativity: Option<Associativity>,
    dynamic_precedence: i32,
}

struct FlattenContext<'a> {
    grammar: &'a Grammar,
    extraction: &'a mut TokenExtraction,
    variable_ids: HashMap<CompactString, VariableId, ahash::RandomState>,
    external_ids: HashMap<CompactString, u32, ahash::RandomState>,
    variables: Vec<Variable>,
}

pub(crate) fn flatten_grammar(
    grammar: &Grammar,
    extraction: &mut TokenExtraction,
) -> Result<SyntaxGrammar, CompileError> {
    let mut variable_ids = HashMap::with_hasher(ahash::RandomState::new());
    let mut variables = Vec::new();
    for (name, _) in grammar.rules() {
        if extraction.rule_tokens.contains_key(name.as_str()) {
            continue;
        }
        let id = VariableId(u32::try_from(variables.len()).unwrap_or(u32::MAX));
        variable_ids.insert(name.clone(), id);
        let kind = if name.starts_with('_') {
            VariableKind::Hidden
        } else {
            VariableKind::Named
        };
        variables.push(Variable {
            name: name.clone(),
            kind,
            productions: Vec::new(),
        });
    }

    let external_ids: HashMap<CompactString, u32, ahash::RandomState> = grammar
        .external_tokens()
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), u32::try_from(i).unwrap_or(u32::MAX)))
        .collect();

    let mut ctx = FlattenContext {
        grammar,
        extraction,
        variable_ids,
        external_ids,
        variables,
    };

    for (name, rule) in grammar.rules() {
        let Some(&id) = ctx.variable_ids.get(name.as_str()) else {
            continue; // token rule
        };
        let drafts = flatten_rule(&mut ctx, name, rule)?;
        ctx.variables[id.0 as usize].productions = drafts.into_iter().map(finish).collect();
    }

    let conflicts = grammar
        .conflicts()
        .iter()
        .map(|set| {
            set.members()
                .iter()
                .filter_map(|name| ctx.variable_ids.get(name.as_str()).copied())
                .collect()
        })
        .collect();

    let inline_variables = grammar
        .inline_rules()
        .iter()
        .filter_map(|name| ctx.variable_ids.get(name.as_str()).copied())
        .collect();

    Ok(SyntaxGrammar {
        variables: ctx.variables,
        extra_tokens: ctx.extraction.extra_tokens.clone(),
        conflicts,
        external_tokens: grammar
            .external_tokens()
            .iter()
            .map(|name| ExternalToken { name: name.clone() })
            .collect(),
        word_token: ctx.extraction.word_token,
        inline_variables,
    })
}

fn finish(draft: Draft) -> Production {
    Production {
        steps: draft.steps,
        precedence: draft.precedence,
        associativity: draft.associativity,
        dynamic_precedence: draft.dynamic_precedence,
    }
}

fn single_step(symbol: Symbol) -> Vec<Draft> {
    vec![Draft {
        steps: vec![ProductionStep::new(symbol)],
        ..Draft::default()
    }]
}

fn flatten_rule(
    ctx: &mut FlattenContext<'_>,
    owner: &str,
    rule: &Rule,
) -> Result<Vec<Draft>, CompileError> {
    match rule {
        Rule::Blank => Ok(vec![Draft::default()]),

        Rule::Literal(_) | Rule::Pattern(_) | Rule::Token(_) => {
            let id = anonymous_token(ctx.extraction, owner, rule)?;
            Ok(single_step(Symbol::Terminal(id)))
        }

        Rule::Symbol(name) => {
            if let Some(&id) = ctx.extraction.rule_tokens.get(name.as_str()) {
                Ok(single_step(Symbol::Terminal(id)))
            } else if let Some(&id) = ctx.variable_ids.get(name.as_str()) {
                Ok(single_step(Symbol::Variable(id)))
            } else if let Some(&id) = ctx.external_ids.get(name.as_str()) {
                Ok(single_step(Symbol::External(id)))
            } else {
                // The builder validated references already.
                Err(CompileError::UndefinedRule {
                    referenced: name.clone(),
                    referencing: owner.into(),
                })
            }
        }

        Rule::External(name) => {
            let id = ctx.external_ids.get(name.as_str()).copied().ok_or_else(|| {
                CompileError::UndefinedRule {
                    referenced: name.clone(),
                    referencing: owner.into(),
                }
            })?;
            Ok(single_step(Symbol::External(id)))
        }

        Rule::Seq(rules) => {
            let mut acc = vec![Draft::default()];
            for part in rules {
                let part_drafts = flatten_rule(ctx, owner, part)?;
                let mut next = Vec::with_capacity(acc.len() * part_drafts.len());
                for base in &acc {
                    for extension in &part_drafts {
                        let mut combined = base.clone();
                        combined.steps.extend(extension.steps.iter().cloned());
                        // Element-level static precedence does not bubble out
                        // of a longer sequence; dynamic scores accumulate.
                        combined.dynamic_precedence += extension.dynamic_precedence;
                        next.push(combined);
                    }
                }
                acc = next;
            }
            Ok(acc)
        }

        Rule::Choice(rules) => {
            let mut out = Vec::new();
            for alternative in rules {
                out.extend(flatten_rule(ctx, owner, alternative)?);
            }
            Ok(out)
        }

        Rule::Optional(inner) => {
            let mut out = flatten_rule(ctx, owner, inner)?;
            out.push(Draft::default());
            Ok(out)
        }

        Rule::Repeat { rule: inner, min } => {
            let aux = make_repeat_variable(ctx, owner, inner)?;
            let mut out = single_step(Symbol::Variable(aux));
            if *min == 0 {
                out.push(Draft::default());
            }
            Ok(out)
        }

        Rule::Prec { prec, rule: inner } => {
            let value = match &prec.value {
                PrecValue::Numeric(n) => *n,
                PrecValue::Named(level) => {
                    ctx.grammar.precedence_level(level).ok_or_else(|| {
                        CompileError::UnknownPrecedenceLevel {
                            rule: owner.into(),
                            level: level.clone(),
                        }
                    })?
                }
            };
            let mut drafts = flatten_rule(ctx, owner, inner)?;
            for draft in &mut drafts {
                if prec.associativity == Associativity::Dynamic {
                    if draft.dynamic_precedence == 0 {
                        draft.dynamic_precedence = value;
                    }
                } else if draft.precedence.is_none() {
                    // The innermost annotation enclosing the alternative wins.
                    draft.precedence = Some(value);
                    draft.associativity = Some(prec.associativity);
                }
            }
            Ok(drafts)
        }

        Rule::Field { name, rule: inner } => {
            let mut drafts = flatten_rule(ctx, owner, inner)?;
            for draft in &mut drafts {
                for step in &mut draft.steps {
                    if step.field.is_none() {
                        step.field = Some(name.clone());
                    }
                }
            }
            Ok(drafts)
        }

        Rule::Alias { value, rule: inner } => {
            let mut drafts = flatten_rule(ctx, owner, inner)?;
            for draft in &mut drafts {
                if draft.steps.len() == 1 && draft.steps[0].alias.is_none() {
                    draft.steps[0].alias = Some(value.clone());
                }
            }
            Ok(drafts)
        }
    }
}

/// Rewrite `repeat(r)` into a left-recursive auxiliary variable:
/// `aux -> r | aux r`.
fn make_repeat_variable(
    ctx: &mut FlattenContext<'_>,
    owner: &str,
    inner: &Rule,
) -> Result<VariableId, CompileError> {
    let index = ctx.variables.len();
    let id = VariableId(u32::try_from(index).unwrap_or(u32::MAX));
    let name: CompactString = format!("{owner}_repeat{index}").into();
    ctx.variables.push(Variable {
        name,
        kind: VariableKind::Auxiliary,
        productions: Vec::new(),
    });

    let element_drafts = flatten_rule(ctx, owner, inner)?;
    let mut productions = Vec::with_capacity(element_drafts.len() * 2);
    for draft in &element_drafts {
        productions.push(finish(draft.clone()));
    }
    for draft in element_drafts {
        let mut recursive = draft;
        recursive
            .steps
            .insert(0, ProductionStep::new(Symbol::Variable(id)));
        productions.push(finish(recursive));
    }
    ctx.variables[index].productions = productions;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{
        alias, choice, field, lit, optional, pattern, prec_dynamic, prec_left, repeat1, seq, sym,
        GrammarBuilder,
    };
    use crate::prepare::extract::extract_tokens;

    fn flatten(grammar: &Grammar) -> SyntaxGrammar {
        let mut extraction = extract_tokens(grammar).unwrap();
        flatten_grammar(grammar, &mut extraction).unwrap()
    }

    fn variable<'a>(syntax: &'a SyntaxGrammar, name: &str) -> &'a Variable {
        syntax
            .variables
            .iter()
            .find(|v| v.name == name)
            .unwrap_or_else(|| panic!("no variable {name}"))
    }

    #[test]
    fn choice_forks_into_productions() {
        let grammar = GrammarBuilder::new("g")
            .rule("stmt", choice([lit("break"), lit("continue")]))
            .build()
            .unwrap();
        let syntax = flatten(&grammar);
        assert_eq!(variable(&syntax, "stmt").productions.len(), 2);
    }

    #[test]
    fn optional_forks_an_empty_production() {
        let grammar = GrammarBuilder::new("g")
            .rule("stmt", seq([lit("return"), optional(lit("x"))]))
            .build()
            .unwrap();
        let syntax = flatten(&grammar);
        let prods = &variable(&syntax, "stmt").productions;
        assert_eq!(prods.len(), 2);
        assert_eq!(prods[0].steps.len(), 2);
        assert_eq!(prods[1].steps.len(), 1);
    }

    #[test]
    fn repeat_creates_left_recursive_auxiliary() {
        let grammar = GrammarBuilder::new("g")
            .rule("list", repeat1(lit("x")))
            .build()
            .unwrap();
        let syntax = flatten(&grammar);
        let aux = syntax
            .variables
            .iter()
            .find(|v| v.kind == VariableKind::Auxiliary)
            .expect("auxiliary variable");
        assert_eq!(aux.productions.len(), 2);
        // The recursive production starts with the auxiliary itself.
        let recursive = &aux.productions[1];
        assert!(matches!(recursive.steps[0].symbol, Symbol::Variable(_)));
    }

    #[test]
    fn named_precedence_levels_resolve() {
        let grammar = GrammarBuilder::new("g")
            .rule(
                "expr",
                choice([
                    prec_left("PLUS", seq([sym("expr"), lit("+"), sym("expr")])),
                    pattern("[0-9]+"),
                ]),
            )
            .precedence_level("PLUS", 4)
            .build()
            .unwrap();
        let syntax = flatten(&grammar);
        let prods = &variable(&syntax, "expr").productions;
        assert_eq!(prods[0].precedence, Some(4));
        assert_eq!(prods[0].associativity, Some(Associativity::Left));
        assert_eq!(prods[1].precedence, None);
    }

    #[test]
    fn unknown_precedence_level_is_an_error() {
        let grammar = GrammarBuilder::new("g")
            .rule("expr", prec_left("MISSING", lit("x")))
            .build()
            .unwrap();
        let mut extraction = extract_tokens(&grammar).unwrap();
        let result = flatten_grammar(&grammar, &mut extraction);
        assert!(matches!(
            result,
            Err(CompileError::UnknownPrecedenceLevel { .. })
        ));
    }

    #[test]
    fn dynamic_precedence_is_recorded_separately() {
        let grammar = GrammarBuilder::new("g")
            .rule("expr", prec_dynamic(10, lit("x")))
            .build()
            .unwrap();
        let syntax = flatten(&grammar);
        let prod = &variable(&syntax, "expr").productions[0];
        assert_eq!(prod.dynamic_precedence, 10);
        assert_eq!(prod.precedence, None);
    }

    #[test]
    fn fields_and_aliases_attach_to_steps() {
        let grammar = GrammarBuilder::new("g")
            .rule(
                "call",
                seq([
                    field("function", sym("name")),
                    alias(lit("("), "open_paren"),
                    lit(")"),
                ]),
            )
            .rule("name", pattern("[a-z]+"))
            .build()
            .unwrap();
        let syntax = flatten(&grammar);
        let prod = &variable(&syntax, "call").productions[0];
        assert_eq!(prod.steps[0].field.as_deref(), Some("function"));
        assert_eq!(prod.steps[1].alias.as_deref(), Some("open_paren"));
        assert_eq!(prod.steps[2].alias, None);
    }

    #[test]
    fn hidden_variables_are_marked() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", sym("_expr"))
            .rule("_expr", choice([lit("x"), lit("y")]))
            .build()
            .unwrap();
        let syntax = flatten(&grammar);
        assert_eq!(variable(&syntax, "_expr").kind, VariableKind::Hidden);
    }

    #[test]
    fn external_references_resolve_to_external_symbols() {
        let grammar = GrammarBuilder::new("g")
            .rule("string", seq([lit("\""), sym("heredoc_body"), lit("\"")]))
            .external_token("heredoc_body")
            .build()
            .unwrap();
        let syntax = flatten(&grammar);
        let prod = &variable(&syntax, "string").productions[0];
        assert_eq!(prod.steps[1].symbol, Symbol::External(0));
        assert_eq!(syntax.external_tokens[0].name, "heredoc_body");
    }
}
