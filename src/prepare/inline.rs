//! Inlining: substitutes each inline variable's productions at every use
//! site before conflict detection, so purely structural helper rules never
//! appear in emitted trees or in conflict reports.
//!
//! Substitution is a production-level cross product. Inline variables may
//! reference each other as long as the references are acyclic; a cycle has
//! no finite expansion and is reported as [`CompileError::InlineCycle`].

use hashbrown::{HashMap, HashSet};

use crate::error::CompileError;
use crate::prepare::{Production, Symbol, SyntaxGrammar, VariableId};

pub(crate) fn apply_inlines(syntax: &mut SyntaxGrammar) -> Result<(), CompileError> {
    if syntax.inline_variables.is_empty() {
        return Ok(());
    }

    let inline_set: HashSet<VariableId, ahash::RandomState> =
        syntax.inline_variables.iter().copied().collect();
    check_cycles(syntax, &inline_set)?;

    // Expand each inline variable to productions free of inline references.
    // The cycle check above guarantees the recursion terminates.
    let mut expanded: HashMap<VariableId, Vec<Production>, ahash::RandomState> =
        HashMap::with_hasher(ahash::RandomState::new());
    for &id in &syntax.inline_variables {
        expand(syntax, &inline_set, &mut expanded, id);
    }

    for (id, variable) in syntax.variables.iter_mut().enumerate() {
        let id = VariableId(u32::try_from(id).unwrap_or(u32::MAX));
        if inline_set.contains(&id) {
            // Dead after substitution; nothing references it anymore.
            variable.productions = expanded[&id].clone();
            continue;
        }
        let productions = std::mem::take(&mut variable.productions);
        variable.productions = productions
            .into_iter()
            .flat_map(|p| substitute(&p, &expanded))
            .collect();
    }
    Ok(())
}

fn expand(
    syntax: &SyntaxGrammar,
    inline_set: &HashSet<VariableId, ahash::RandomState>,
    expanded: &mut HashMap<VariableId, Vec<Production>, ahash::RandomState>,
    id: VariableId,
) {
    if expanded.contains_key(&id) {
        return;
    }
    for production in &syntax.variable(id).productions {
        for step in &production.steps {
            if let Symbol::Variable(v) = step.symbol {
                if v != id && inline_set.contains(&v) {
                    expand(syntax, inline_set, expanded, v);
                }
            }
        }
    }
    let result: Vec<Production> = syntax
        .variable(id)
        .productions
        .iter()
        .flat_map(|p| substitute(p, expanded))
        .collect();
    expanded.insert(id, result);
}

/// Replace every step that references an expanded variable with that
/// variable's productions, taking the cross product over all such steps.
fn substitute(
    production: &Production,
    expanded: &HashMap<VariableId, Vec<Production>, ahash::RandomState>,
) -> Vec<Production> {
    let mut acc = vec![Production {
        steps: Vec::with_capacity(production.steps.len()),
        precedence: production.precedence,
        associativity: production.associativity,
        dynamic_precedence: production.dynamic_precedence,
    }];

    for step in &production.steps {
        let replacements = match step.symbol {
            Symbol::Variable(v) => expanded.get(&v),
            _ => None,
        };
        let Some(replacements) = replacements else {
            for draft in &mut acc {
                draft.steps.push(step.clone());
            }
            continue;
        };

        let mut next = Vec::with_capacity(acc.len() * replacements.len());
        for base in &acc {
            for replacement in replacements {
                let mut combined = base.clone();
                for inner in &replacement.steps {
                    let mut inner = inner.clone();
                    // A field or alias on the use site distributes to
                    // substituted steps that carry none of their own.
                    if inner.field.is_none() {
                        inner.field = step.field.clone();
                    }
                    if replacement.steps.len() == 1 && inner.alias.is_none() {
                        inner.alias = step.alias.clone();
                    }
                    combined.steps.push(inner);
                }
                combined.dynamic_precedence += replacement.dynamic_precedence;
                // A production that was nothing but this reference inherits
                // the substituted production's precedence.
                if production.steps.len() == 1 && combined.precedence.is_none() {
                    combined.precedence = replacement.precedence;
                    combined.associativity = replacement.associativity;
                }
                next.push(combined);
            }
        }
        acc = next;
    }
    acc
}

/// Depth-first search over references among inline variables only.
fn check_cycles(
    syntax: &SyntaxGrammar,
    inline_set: &HashSet<VariableId, ahash::RandomState>,
) -> Result<(), CompileError> {
    let mut finished: HashSet<VariableId, ahash::RandomState> =
        HashSet::with_hasher(ahash::RandomState::new());
    for &start in &syntax.inline_variables {
        let mut path = Vec::new();
        visit(syntax, inline_set, &mut finished, &mut path, start)?;
    }
    Ok(())
}

fn visit(
    syntax: &SyntaxGrammar,
    inline_set: &HashSet<VariableId, ahash::RandomState>,
    finished: &mut HashSet<VariableId, ahash::RandomState>,
    path: &mut Vec<VariableId>,
    id: VariableId,
) -> Result<(), CompileError> {
    if finished.contains(&id) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|&v| v == id) {
        let cycle = path[start..]
            .iter()
            .map(|&v| syntax.variable(v).name.clone())
            .collect();
        return Err(CompileError::InlineCycle { cycle });
    }
    path.push(id);
    for production in &syntax.variable(id).productions {
        for step in &production.steps {
            if let Symbol::Variable(v) = step.symbol {
                if inline_set.contains(&v) {
                    visit(syntax, inline_set, finished, path, v)?;
                }
            }
        }
    }
    path.pop();
    finished.insert(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{choice, lit, seq, sym, GrammarBuilder};
    use crate::prepare::extract::extract_tokens;
    use crate::prepare::flatten::flatten_grammar;
    use crate::prepare::VariableKind;

    fn lower(grammar: &crate::grammar::Grammar) -> Result<SyntaxGrammar, CompileError> {
        let mut extraction = extract_tokens(grammar).unwrap();
        let mut syntax = flatten_grammar(grammar, &mut extraction)?;
        apply_inlines(&mut syntax)?;
        Ok(syntax)
    }

    fn productions<'a>(syntax: &'a SyntaxGrammar, name: &str) -> &'a [Production] {
        &syntax
            .variables
            .iter()
            .find(|v| v.name == name)
            .unwrap()
            .productions
    }

    #[test]
    fn inline_reference_is_replaced_by_its_alternatives() {
        let grammar = GrammarBuilder::new("g")
            .rule("stmt", seq([sym("_kw"), lit(";")]))
            .rule("_kw", choice([lit("break"), lit("continue")]))
            .inline("_kw")
            .build()
            .unwrap();
        let syntax = lower(&grammar).unwrap();
        let prods = productions(&syntax, "stmt");
        assert_eq!(prods.len(), 2);
        for prod in prods {
            assert_eq!(prod.steps.len(), 2);
            assert!(matches!(prod.steps[0].symbol, Symbol::Terminal(_)));
        }
    }

    #[test]
    fn two_inline_references_take_the_cross_product() {
        let grammar = GrammarBuilder::new("g")
            .rule("pair", seq([sym("_x"), sym("_x")]))
            .rule("_x", choice([lit("a"), lit("b")]))
            .inline("_x")
            .build()
            .unwrap();
        let syntax = lower(&grammar).unwrap();
        assert_eq!(productions(&syntax, "pair").len(), 4);
    }

    #[test]
    fn nested_inlines_expand_transitively() {
        let grammar = GrammarBuilder::new("g")
            .rule("stmt", sym("_a"))
            .rule("_a", seq([lit("x"), sym("_b")]))
            .rule("_b", choice([lit("y"), lit("z")]))
            .inline("_a")
            .inline("_b")
            .build()
            .unwrap();
        let syntax = lower(&grammar).unwrap();
        let prods = productions(&syntax, "stmt");
        assert_eq!(prods.len(), 2);
        assert!(prods
            .iter()
            .all(|p| p.steps.iter().all(|s| matches!(s.symbol, Symbol::Terminal(_)))));
    }

    #[test]
    fn inline_cycle_is_an_error() {
        let grammar = GrammarBuilder::new("g")
            .rule("stmt", sym("_a"))
            .rule("_a", choice([lit("x"), sym("_b")]))
            .rule("_b", sym("_a"))
            .inline("_a")
            .inline("_b")
            .build()
            .unwrap();
        let result = lower(&grammar);
        assert!(matches!(result, Err(CompileError::InlineCycle { .. })));
    }

    #[test]
    fn inlining_is_idempotent() {
        let grammar = GrammarBuilder::new("g")
            .rule("stmt", seq([sym("_kw"), lit(";")]))
            .rule("_kw", choice([lit("break"), lit("continue")]))
            .inline("_kw")
            .build()
            .unwrap();
        let mut syntax = lower(&grammar).unwrap();
        let before: Vec<Vec<Production>> = syntax
            .variables
            .iter()
            .map(|v| v.productions.clone())
            .collect();
        apply_inlines(&mut syntax).unwrap();
        let after: Vec<Vec<Production>> = syntax
            .variables
            .iter()
            .map(|v| v.productions.clone())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn use_site_field_distributes_to_substituted_steps() {
        use crate::grammar::field;
        let grammar = GrammarBuilder::new("g")
            .rule("stmt", field("keyword", sym("_kw")))
            .rule("_kw", choice([lit("break"), lit("continue")]))
            .inline("_kw")
            .build()
            .unwrap();
        let syntax = lower(&grammar).unwrap();
        for prod in productions(&syntax, "stmt") {
            assert_eq!(prod.steps[0].field.as_deref(), Some("keyword"));
        }
    }

    #[test]
    fn auxiliary_repeat_variables_are_untouched() {
        let grammar = GrammarBuilder::new("g")
            .rule("list", crate::grammar::repeat1(sym("_item")))
            .rule("_item", choice([lit("a"), lit("b")]))
            .inline("_item")
            .build()
            .unwrap();
        let syntax = lower(&grammar).unwrap();
        let aux = syntax
            .variables
            .iter()
            .find(|v| v.kind == VariableKind::Auxiliary)
            .unwrap();
        // Two base alternatives and two recursive ones after substitution.
        assert_eq!(aux.productions.len(), 4);
    }
}
