//! Structural validation of a grammar declaration, run once by
//! [`crate::grammar::GrammarBuilder::build`].
//!
//! Checks performed here are purely graph-shaped: dangling references,
//! reserved names, rules that can never terminate, and repeats of
//! always-empty content. Tokenization and precedence resolution happen in
//! later passes.

use compact_str::CompactString;
use hashbrown::HashSet;

use crate::error::CompileError;
use crate::grammar::builder::ConflictSet;
use crate::grammar::rule::{Rule, RESERVED_RULE_NAMES};

pub(crate) fn validate_grammar(
    rules: &[(CompactString, Rule)],
    extras: &[Rule],
    conflicts: &[ConflictSet],
    inline_rules: &[CompactString],
    external_tokens: &[CompactString],
    word_rule: Option<&str>,
) -> Result<(), CompileError> {
    let mut defined: HashSet<&str, ahash::RandomState> =
        HashSet::with_hasher(ahash::RandomState::new());
    for (name, _) in rules {
        if RESERVED_RULE_NAMES.contains(&name.as_str()) {
            return Err(CompileError::ReservedRuleName { name: name.clone() });
        }
        defined.insert(name.as_str());
    }
    let externals: HashSet<&str, ahash::RandomState> =
        external_tokens.iter().map(CompactString::as_str).collect();

    // Dangling references, from rules and extras.
    for (name, rule) in rules {
        check_references(name, rule, &defined, &externals)?;
    }
    for rule in extras {
        check_references("extras", rule, &defined, &externals)?;
    }

    // Names mentioned in conflict declarations, the inline set, and the word
    // designation must all be declared rules.
    for set in conflicts {
        for member in set.members() {
            if !defined.contains(member.as_str()) {
                return Err(CompileError::UndefinedRule {
                    referenced: member.clone(),
                    referencing: "conflicts".into(),
                });
            }
        }
    }
    for name in inline_rules {
        if !defined.contains(name.as_str()) {
            return Err(CompileError::UndefinedRule {
                referenced: name.clone(),
                referencing: "inline".into(),
            });
        }
    }
    if let Some(word) = word_rule {
        if !defined.contains(word) {
            return Err(CompileError::UndefinedRule {
                referenced: word.into(),
                referencing: "word".into(),
            });
        }
    }

    check_termination(rules, &externals)?;
    check_repeats(rules, &externals)?;
    Ok(())
}

fn check_references(
    owner: &str,
    rule: &Rule,
    defined: &HashSet<&str, ahash::RandomState>,
    externals: &HashSet<&str, ahash::RandomState>,
) -> Result<(), CompileError> {
    let mut error = None;
    rule.visit(&mut |r| {
        if error.is_some() {
            return;
        }
        match r {
            Rule::Symbol(name) => {
                // A symbol may resolve to a declared rule or to an external
                // token reserved in the externals list.
                if !defined.contains(name.as_str()) && !externals.contains(name.as_str()) {
                    error = Some(CompileError::UndefinedRule {
                        referenced: name.clone(),
                        referencing: owner.into(),
                    });
                }
            }
            Rule::External(name) => {
                if !externals.contains(name.as_str()) {
                    error = Some(CompileError::UndefinedRule {
                        referenced: name.clone(),
                        referencing: owner.into(),
                    });
                }
            }
            _ => {}
        }
    });
    error.map_or(Ok(()), Err)
}

/// A rule terminates if some derivation bottoms out without recursing. This
/// is the standard "productive nonterminal" fixpoint: terminals are
/// productive, a sequence is productive when all parts are, a choice when any
/// alternative is. A symbol resolving to an external token is a terminal.
fn check_termination(
    rules: &[(CompactString, Rule)],
    externals: &HashSet<&str, ahash::RandomState>,
) -> Result<(), CompileError> {
    let mut productive: HashSet<&str, ahash::RandomState> =
        HashSet::with_hasher(ahash::RandomState::new());
    let mut changed = true;
    while changed {
        changed = false;
        for (name, rule) in rules {
            if !productive.contains(name.as_str()) && is_productive(rule, &productive, externals) {
                productive.insert(name.as_str());
                changed = true;
            }
        }
    }
    for (name, _) in rules {
        if !productive.contains(name.as_str()) {
            return Err(CompileError::NonTerminatingRecursion { name: name.clone() });
        }
    }
    Ok(())
}

fn is_productive(
    rule: &Rule,
    productive: &HashSet<&str, ahash::RandomState>,
    externals: &HashSet<&str, ahash::RandomState>,
) -> bool {
    match rule {
        Rule::Blank | Rule::Literal(_) | Rule::Pattern(_) | Rule::External(_) => true,
        Rule::Token(_) => true,
        Rule::Symbol(name) => {
            productive.contains(name.as_str()) || externals.contains(name.as_str())
        }
        Rule::Seq(rules) => rules.iter().all(|r| is_productive(r, productive, externals)),
        Rule::Choice(rules) => rules.iter().any(|r| is_productive(r, productive, externals)),
        // A zero-minimum repeat or an optional can always derive empty.
        Rule::Repeat { rule, min } => *min == 0 || is_productive(rule, productive, externals),
        Rule::Optional(_) => true,
        Rule::Prec { rule, .. } | Rule::Field { rule, .. } | Rule::Alias { rule, .. } => {
            is_productive(rule, productive, externals)
        }
    }
}

/// Reject `repeat` of content that can only ever match the empty string,
/// which would loop without consuming input.
fn check_repeats(
    rules: &[(CompactString, Rule)],
    externals: &HashSet<&str, ahash::RandomState>,
) -> Result<(), CompileError> {
    // First compute which rules can consume at least one character.
    let mut consuming: HashSet<&str, ahash::RandomState> =
        HashSet::with_hasher(ahash::RandomState::new());
    let mut changed = true;
    while changed {
        changed = false;
        for (name, rule) in rules {
            if !consuming.contains(name.as_str()) && can_consume(rule, &consuming, externals) {
                consuming.insert(name.as_str());
                changed = true;
            }
        }
    }

    for (name, rule) in rules {
        let mut bad = false;
        rule.visit(&mut |r| {
            if let Rule::Repeat { rule: inner, .. } = r {
                if !can_consume(inner, &consuming, externals) {
                    bad = true;
                }
            }
        });
        if bad {
            return Err(CompileError::RepeatOfNullable { name: name.clone() });
        }
    }
    Ok(())
}

fn can_consume(
    rule: &Rule,
    consuming: &HashSet<&str, ahash::RandomState>,
    externals: &HashSet<&str, ahash::RandomState>,
) -> bool {
    match rule {
        Rule::Blank => false,
        Rule::Literal(text) => !text.is_empty(),
        Rule::Pattern(_) | Rule::External(_) => true,
        Rule::Token(rule) => can_consume(rule, consuming, externals),
        Rule::Symbol(name) => consuming.contains(name.as_str()) || externals.contains(name.as_str()),
        Rule::Seq(rules) => rules.iter().any(|r| can_consume(r, consuming, externals)),
        Rule::Choice(rules) => rules.iter().any(|r| can_consume(r, consuming, externals)),
        Rule::Repeat { rule, .. } | Rule::Optional(rule) => can_consume(rule, consuming, externals),
        Rule::Prec { rule, .. } | Rule::Field { rule, .. } | Rule::Alias { rule, .. } => {
            can_consume(rule, consuming, externals)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::rule::{blank, choice, lit, optional, repeat, seq, sym};
    use crate::grammar::GrammarBuilder;

    #[test]
    fn reserved_name_is_rejected() {
        let result = GrammarBuilder::new("g").rule("choice", lit("x")).build();
        assert!(matches!(
            result,
            Err(CompileError::ReservedRuleName { .. })
        ));
    }

    #[test]
    fn recursion_without_base_case_is_rejected() {
        let result = GrammarBuilder::new("g")
            .rule("a", seq([lit("x"), sym("a")]))
            .build();
        assert!(matches!(
            result,
            Err(CompileError::NonTerminatingRecursion { name }) if name == "a"
        ));
    }

    #[test]
    fn recursion_with_base_case_is_accepted() {
        let result = GrammarBuilder::new("g")
            .rule("a", choice([seq([lit("x"), sym("a")]), lit("x")]))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn mutual_recursion_with_base_case_is_accepted() {
        let result = GrammarBuilder::new("g")
            .rule("a", choice([sym("b"), lit("x")]))
            .rule("b", sym("a"))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn repeat_of_blank_is_rejected() {
        let result = GrammarBuilder::new("g")
            .rule("a", repeat(blank()))
            .build();
        assert!(matches!(
            result,
            Err(CompileError::RepeatOfNullable { .. })
        ));
    }

    #[test]
    fn repeat_of_optional_content_is_accepted() {
        // optional("x") can consume, so repeating it terminates per match.
        let result = GrammarBuilder::new("g")
            .rule("a", repeat(optional(lit("x"))))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn external_reference_requires_declaration() {
        let result = GrammarBuilder::new("g")
            .rule("a", sym("heredoc"))
            .build();
        assert!(matches!(result, Err(CompileError::UndefinedRule { .. })));

        let result = GrammarBuilder::new("g")
            .rule("a", sym("heredoc"))
            .external_token("heredoc")
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn externally_scanned_content_terminates_and_consumes() {
        // The symbol resolves to an external token, which is a terminal for
        // both fixpoint analyses.
        let result = GrammarBuilder::new("g")
            .rule("string", seq([lit("\""), sym("content"), lit("\"")]))
            .external_token("content")
            .build();
        assert!(result.is_ok());

        let result = GrammarBuilder::new("g")
            .rule("doc", repeat(sym("chunk")))
            .external_token("chunk")
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn word_designation_must_name_a_rule() {
        let result = GrammarBuilder::new("g")
            .rule("program", lit("x"))
            .word("identifier")
            .build();
        assert!(matches!(result, Err(CompileError::UndefinedRule { .. })));
    }
}
