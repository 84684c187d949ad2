//! Terminal extraction: collects every static terminal from the grammar's
//! rules and extras into a [`LexicalGrammar`].
//!
//! Three kinds of terminals are collected, in this order:
//!
//! 1. Named tokens: rules whose body is a bare literal, a bare pattern, or a
//!    `token(...)` wrapper (possibly under precedence annotations).
//! 2. Anonymous tokens: literal strings, patterns, and inline `token(...)`
//!    subtrees appearing inside syntactic rules, deduplicated by content.
//! 3. Extras, resolved to tokens from either group.
//!
//! Two static terminals with identical literal text but different token
//! identity are a compile-time [`CompileError::AmbiguousToken`].

use compact_str::CompactString;
use hashbrown::HashMap;

use crate::error::CompileError;
use crate::grammar::{Grammar, Rule};
use crate::prepare::{LexicalGrammar, LexicalToken, TokenId, TokenPattern};

/// The lexical grammar plus the lookup maps the flattening pass uses to
/// resolve rule leaves to token ids.
pub(crate) struct TokenExtraction {
    pub lexical: LexicalGrammar,
    /// Anonymous literal text -> token.
    pub literal_tokens: HashMap<CompactString, TokenId, ahash::RandomState>,
    /// Anonymous pattern source -> token.
    pub pattern_tokens: HashMap<String, TokenId, ahash::RandomState>,
    /// Named token rule -> token.
    pub rule_tokens: HashMap<CompactString, TokenId, ahash::RandomState>,
    pub extra_tokens: Vec<TokenId>,
    pub word_token: Option<TokenId>,
}

impl TokenExtraction {
    fn add_token(
        &mut self,
        name: CompactString,
        pattern: TokenPattern,
        is_named: bool,
    ) -> Result<TokenId, CompileError> {
        if let TokenPattern::Literal(text) = &pattern {
            for existing in &self.lexical.tokens {
                if let TokenPattern::Literal(other) = &existing.pattern {
                    if other == text {
                        return Err(CompileError::AmbiguousToken {
                            first: existing.name.clone(),
                            second: name,
                            text: text.clone(),
                        });
                    }
                }
            }
        }
        let id = TokenId(u32::try_from(self.lexical.tokens.len()).unwrap_or(u32::MAX));
        self.lexical.tokens.push(LexicalToken {
            name,
            pattern,
            is_named,
            decl_index: id.0,
        });
        Ok(id)
    }
}

/// If the rule (after stripping precedence annotations) is a single terminal
/// definition, return its lexical body.
fn token_body(rule: &Rule) -> Option<&Rule> {
    match rule {
        Rule::Literal(_) | Rule::Pattern(_) => Some(rule),
        Rule::Token(inner) => Some(inner),
        Rule::Prec { rule, .. } => token_body(rule),
        _ => None,
    }
}

/// Compile a purely lexical rule subtree into an equivalent regex source.
fn rule_to_regex(owner: &str, rule: &Rule) -> Result<String, CompileError> {
    match rule {
        Rule::Blank => Ok(String::new()),
        Rule::Literal(text) => Ok(regex::escape(text)),
        Rule::Pattern(source) => Ok(format!("(?:{source})")),
        Rule::Seq(rules) => {
            let mut out = String::new();
            for r in rules {
                out.push_str(&rule_to_regex(owner, r)?);
            }
            Ok(out)
        }
        Rule::Choice(rules) => {
            let mut parts = Vec::with_capacity(rules.len());
            for r in rules {
                parts.push(rule_to_regex(owner, r)?);
            }
            Ok(format!("(?:{})", parts.join("|")))
        }
        Rule::Repeat { rule, min } => {
            let inner = rule_to_regex(owner, rule)?;
            let op = if *min == 0 { '*' } else { '+' };
            Ok(format!("(?:{inner}){op}"))
        }
        Rule::Optional(rule) => Ok(format!("(?:{})?", rule_to_regex(owner, rule)?)),
        Rule::Prec { rule, .. }
        | Rule::Field { rule, .. }
        | Rule::Alias { rule, .. }
        | Rule::Token(rule) => rule_to_regex(owner, rule),
        Rule::Symbol(_) | Rule::External(_) => Err(CompileError::InvalidPattern {
            token: owner.into(),
            message: "token content must not reference other rules".to_string(),
        }),
    }
}

fn lexical_token_pattern(owner: &str, body: &Rule) -> Result<TokenPattern, CompileError> {
    match body {
        Rule::Literal(text) => Ok(TokenPattern::Literal(text.clone())),
        other => Ok(TokenPattern::Pattern(rule_to_regex(owner, other)?)),
    }
}

pub(crate) fn extract_tokens(grammar: &Grammar) -> Result<TokenExtraction, CompileError> {
    let mut extraction = TokenExtraction {
        lexical: LexicalGrammar::default(),
        literal_tokens: HashMap::with_hasher(ahash::RandomState::new()),
        pattern_tokens: HashMap::with_hasher(ahash::RandomState::new()),
        rule_tokens: HashMap::with_hasher(ahash::RandomState::new()),
        extra_tokens: Vec::new(),
        word_token: None,
    };

    // Named tokens first: explicit declarations outrank derived tokens. The
    // start rule always stays syntactic, even with a purely lexical body.
    for (name, rule) in grammar.rules().iter().skip(1) {
        if let Some(body) = token_body(rule) {
            let pattern = lexical_token_pattern(name, body)?;
            let is_named = !name.starts_with('_');
            let id = extraction.add_token(name.clone(), pattern, is_named)?;
            extraction.rule_tokens.insert(name.clone(), id);
        }
    }

    // Anonymous tokens from syntactic rule bodies.
    for (name, rule) in grammar.rules() {
        if !extraction.rule_tokens.contains_key(name.as_str()) {
            collect_anonymous(&mut extraction, name, rule)?;
        }
    }

    // Extras: named token references, or anonymous terminals of their own.
    for extra in grammar.extras() {
        let id = match extra {
            Rule::Symbol(name) => {
                extraction
                    .rule_tokens
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| CompileError::NotAToken {
                        name: name.clone(),
                        context: "an extra",
                    })?
            }
            other => anonymous_token(&mut extraction, "extras", other)?,
        };
        if !extraction.extra_tokens.contains(&id) {
            extraction.extra_tokens.push(id);
        }
    }

    if let Some(word) = grammar.word_rule() {
        let id = extraction
            .rule_tokens
            .get(word)
            .copied()
            .ok_or_else(|| CompileError::NotAToken {
                name: word.into(),
                context: "the word token",
            })?;
        extraction.word_token = Some(id);
    }

    Ok(extraction)
}

/// Walk a syntactic rule body and register every terminal leaf. `token(...)`
/// subtrees are registered whole and not descended into.
fn collect_anonymous(
    extraction: &mut TokenExtraction,
    owner: &str,
    rule: &Rule,
) -> Result<(), CompileError> {
    match rule {
        Rule::Literal(_) | Rule::Pattern(_) | Rule::Token(_) => {
            anonymous_token(extraction, owner, rule)?;
            Ok(())
        }
        Rule::Blank | Rule::Symbol(_) | Rule::External(_) => Ok(()),
        Rule::Seq(rules) | Rule::Choice(rules) => {
            for r in rules {
                collect_anonymous(extraction, owner, r)?;
            }
            Ok(())
        }
        Rule::Repeat { rule, .. }
        | Rule::Optional(rule)
        | Rule::Prec { rule, .. }
        | Rule::Field { rule, .. }
        | Rule::Alias { rule, .. } => collect_anonymous(extraction, owner, rule),
    }
}

/// Register (or reuse) an anonymous token for a terminal leaf.
pub(crate) fn anonymous_token(
    extraction: &mut TokenExtraction,
    owner: &str,
    rule: &Rule,
) -> Result<TokenId, CompileError> {
    match rule {
        Rule::Literal(text) => {
            if let Some(&id) = extraction.literal_tokens.get(text.as_str()) {
                return Ok(id);
            }
            let id = extraction.add_token(
                text.clone(),
                TokenPattern::Literal(text.clone()),
                false,
            )?;
            extraction.literal_tokens.insert(text.clone(), id);
            Ok(id)
        }
        Rule::Pattern(source) => {
            let regex_source = format!("(?:{source})");
            if let Some(&id) = extraction.pattern_tokens.get(&regex_source) {
                return Ok(id);
            }
            let id = extraction.add_token(
                source.clone(),
                TokenPattern::Pattern(regex_source.clone()),
                false,
            )?;
            extraction.pattern_tokens.insert(regex_source, id);
            Ok(id)
        }
        Rule::Token(inner) => compound_token(extraction, owner, inner),
        // A purely lexical subtree (a compound extra, say) is atomic too.
        other if other.is_lexical() => compound_token(extraction, owner, other),
        other => Err(CompileError::InvalidPattern {
            token: owner.into(),
            message: format!("expected a terminal, found {other:?}"),
        }),
    }
}

/// Compile compound lexical content into a single pattern token, reusing an
/// existing token with the same source.
fn compound_token(
    extraction: &mut TokenExtraction,
    owner: &str,
    body: &Rule,
) -> Result<TokenId, CompileError> {
    let regex_source = rule_to_regex(owner, body)?;
    if let Some(&id) = extraction.pattern_tokens.get(&regex_source) {
        return Ok(id);
    }
    let name: CompactString = regex_source.as_str().into();
    let id = extraction.add_token(name, TokenPattern::Pattern(regex_source.clone()), false)?;
    extraction.pattern_tokens.insert(regex_source, id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{choice, lit, pattern, seq, sym, token, GrammarBuilder};

    #[test]
    fn named_literal_rule_becomes_named_token() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", sym("kw"))
            .rule("kw", lit("class"))
            .build()
            .unwrap();
        let extraction = extract_tokens(&grammar).unwrap();
        let id = extraction.rule_tokens["kw"];
        let tok = extraction.lexical.token(id);
        assert!(tok.is_named);
        assert_eq!(tok.pattern, TokenPattern::Literal("class".into()));
    }

    #[test]
    fn token_wrapped_rule_compiles_to_one_pattern() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", sym("comment"))
            .rule(
                "comment",
                token(seq([lit("/*"), pattern(r"[^*]*"), lit("*/")])),
            )
            .build()
            .unwrap();
        let extraction = extract_tokens(&grammar).unwrap();
        let id = extraction.rule_tokens["comment"];
        match &extraction.lexical.token(id).pattern {
            TokenPattern::Pattern(src) => {
                assert!(src.starts_with("/\\*"));
                assert!(src.ends_with("\\*/"));
            }
            other => panic!("expected pattern, got {other:?}"),
        }
    }

    #[test]
    fn anonymous_literals_dedupe_by_text() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", seq([lit("+"), choice([lit("+"), lit("-")])]))
            .build()
            .unwrap();
        let extraction = extract_tokens(&grammar).unwrap();
        assert_eq!(extraction.lexical.tokens.len(), 2);
    }

    #[test]
    fn identical_literal_tokens_collide() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", seq([sym("a"), sym("b")]))
            .rule("a", lit("class"))
            .rule("b", lit("class"))
            .build()
            .unwrap();
        let result = extract_tokens(&grammar);
        assert!(matches!(result, Err(CompileError::AmbiguousToken { .. })));
    }

    #[test]
    fn extras_resolve_to_tokens() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", lit("x"))
            .rule("comment", token(seq([lit("#"), pattern("[^\\n]*")])))
            .extra(sym("comment"))
            .extra(pattern(r"\s+"))
            .build()
            .unwrap();
        let extraction = extract_tokens(&grammar).unwrap();
        assert_eq!(extraction.extra_tokens.len(), 2);
    }

    #[test]
    fn compound_lexical_extra_lexes_atomically() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", lit("x"))
            .extra(seq([lit("//"), pattern("[^\\n]*")]))
            .build()
            .unwrap();
        let extraction = extract_tokens(&grammar).unwrap();
        assert_eq!(extraction.extra_tokens.len(), 1);
        let tok = extraction.lexical.token(extraction.extra_tokens[0]);
        assert!(matches!(tok.pattern, TokenPattern::Pattern(_)));
    }

    #[test]
    fn non_lexical_extra_is_rejected() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", lit("x"))
            .rule("pair", seq([sym("program"), sym("program")]))
            .extra(sym("pair"))
            .build()
            .unwrap();
        let result = extract_tokens(&grammar);
        assert!(matches!(result, Err(CompileError::NotAToken { .. })));
    }

    #[test]
    fn word_must_be_lexical() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", sym("identifier"))
            .rule("identifier", pattern("[a-z]+"))
            .word("identifier")
            .build()
            .unwrap();
        let extraction = extract_tokens(&grammar).unwrap();
        assert_eq!(
            extraction.word_token,
            Some(extraction.rule_tokens["identifier"])
        );
    }
}
