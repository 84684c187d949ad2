//! Grammar assembly: the builder collects the declarative surface of a
//! grammar (rules, extras, conflicts, inline set, externals, word token,
//! precedence levels) and validates it into an immutable [`Grammar`].

use compact_str::CompactString;
use hashbrown::HashMap;
use lasso::{Rodeo, Spur};

use crate::error::CompileError;
use crate::grammar::rule::Rule;
use crate::grammar::validate::validate_grammar;

/// An explicit whitelist of rule names permitted to remain ambiguous with one
/// another. Where exactly these rules (or a subset of them) compete at a
/// parser state, the generator keeps all viable actions as parallel GLR
/// branches instead of raising a hard error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSet {
    members: Vec<CompactString>,
}

impl ConflictSet {
    #[must_use]
    pub fn new(members: impl IntoIterator<Item = CompactString>) -> Self {
        let mut members: Vec<_> = members.into_iter().collect();
        members.sort_unstable();
        members.dedup();
        Self { members }
    }

    #[must_use]
    pub fn members(&self) -> &[CompactString] {
        &self.members
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m == name)
    }
}

/// A complete, validated grammar declaration.
///
/// Rule order is declaration order; the first rule is the start symbol. The
/// grammar and its rule graph are immutable after construction. Rule names
/// are interned so downstream passes can compare them cheaply.
#[derive(Debug)]
pub struct Grammar {
    name: CompactString,
    rules: Vec<(CompactString, Rule)>,
    rule_index: HashMap<Spur, usize, ahash::RandomState>,
    extras: Vec<Rule>,
    conflicts: Vec<ConflictSet>,
    inline_rules: Vec<CompactString>,
    external_tokens: Vec<CompactString>,
    word_rule: Option<CompactString>,
    precedence_levels: HashMap<CompactString, i32, ahash::RandomState>,
    interner: Rodeo,
}

impl Grammar {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rules in declaration order. The first rule is the start symbol.
    #[must_use]
    pub fn rules(&self) -> &[(CompactString, Rule)] {
        &self.rules
    }

    /// Look up a rule body by name, through the interner.
    #[must_use]
    pub fn get_rule(&self, name: &str) -> Option<&Rule> {
        let spur = self.interner.get(name)?;
        self.rule_index.get(&spur).map(|&i| &self.rules[i].1)
    }

    /// The start symbol: the first declared rule.
    #[must_use]
    pub fn start_rule(&self) -> &str {
        &self.rules[0].0
    }

    /// Terminals implicitly insertable between any two grammar tokens.
    #[must_use]
    pub fn extras(&self) -> &[Rule] {
        &self.extras
    }

    #[must_use]
    pub fn conflicts(&self) -> &[ConflictSet] {
        &self.conflicts
    }

    /// Rule names whose uses are replaced by their definitions at compile
    /// time.
    #[must_use]
    pub fn inline_rules(&self) -> &[CompactString] {
        &self.inline_rules
    }

    /// Names of tokens matched by the external scanner, in declaration order.
    #[must_use]
    pub fn external_tokens(&self) -> &[CompactString] {
        &self.external_tokens
    }

    /// The designated identifier-like rule used for keyword disambiguation.
    #[must_use]
    pub fn word_rule(&self) -> Option<&str> {
        self.word_rule.as_deref()
    }

    /// Resolve a named precedence level against the grammar's level table.
    #[must_use]
    pub fn precedence_level(&self, name: &str) -> Option<i32> {
        self.precedence_levels.get(name).copied()
    }

    /// Get the interned key for a rule name, if the name was declared.
    #[must_use]
    pub fn interned_rule_name(&self, name: &str) -> Option<lasso::Spur> {
        self.interner.get(name)
    }

    /// Resolve an interned key back to its rule name.
    #[must_use]
    pub fn resolve_interned(&self, spur: lasso::Spur) -> &str {
        self.interner.resolve(&spur)
    }
}

/// Builder for [`Grammar`].
///
/// # Example
///
/// ```
/// use karst::grammar::{GrammarBuilder, choice, lit, pattern, prec_left, seq, sym};
///
/// let grammar = GrammarBuilder::new("arithmetic")
///     .rule("expr", choice([
///         prec_left(1, seq([sym("expr"), lit("+"), sym("expr")])),
///         prec_left(2, seq([sym("expr"), lit("*"), sym("expr")])),
///         sym("number"),
///     ]))
///     .rule("number", pattern("[0-9]+"))
///     .extra(pattern(r"\s+"))
///     .build()
///     .expect("grammar should validate");
///
/// assert_eq!(grammar.start_rule(), "expr");
/// ```
#[derive(Debug)]
pub struct GrammarBuilder {
    name: CompactString,
    rules: Vec<(CompactString, Rule)>,
    extras: Vec<Rule>,
    conflicts: Vec<ConflictSet>,
    inline_rules: Vec<CompactString>,
    external_tokens: Vec<CompactString>,
    word_rule: Option<CompactString>,
    precedence_levels: HashMap<CompactString, i32, ahash::RandomState>,
}

impl GrammarBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            extras: Vec::new(),
            conflicts: Vec::new(),
            inline_rules: Vec::new(),
            external_tokens: Vec::new(),
            word_rule: None,
            precedence_levels: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Declare a rule. The first declared rule is the start symbol.
    #[must_use]
    pub fn rule(mut self, name: &str, rule: Rule) -> Self {
        self.rules.push((name.into(), rule));
        self
    }

    /// Declare a terminal implicitly insertable between any two tokens
    /// (whitespace, comments).
    #[must_use]
    pub fn extra(mut self, rule: Rule) -> Self {
        self.extras.push(rule);
        self
    }

    /// Whitelist a set of rules as mutually (or self-) ambiguous.
    #[must_use]
    pub fn conflict<'a>(mut self, members: impl IntoIterator<Item = &'a str>) -> Self {
        self.conflicts
            .push(ConflictSet::new(members.into_iter().map(Into::into)));
        self
    }

    /// Mark a rule for inlining: its uses are replaced by its definition so
    /// the emitted tree contains no node for it.
    #[must_use]
    pub fn inline(mut self, name: &str) -> Self {
        self.inline_rules.push(name.into());
        self
    }

    /// Declare a token matched by the external scanner.
    #[must_use]
    pub fn external_token(mut self, name: &str) -> Self {
        self.external_tokens.push(name.into());
        self
    }

    /// Designate the identifier-like rule used for keyword disambiguation.
    #[must_use]
    pub fn word(mut self, name: &str) -> Self {
        self.word_rule = Some(name.into());
        self
    }

    /// Define a named precedence level. Rules reference levels symbolically
    /// via [`crate::grammar::PrecValue::Named`].
    #[must_use]
    pub fn precedence_level(mut self, name: &str, value: i32) -> Self {
        self.precedence_levels.insert(name.into(), value);
        self
    }

    /// Validate and freeze the grammar.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] if the grammar declares no rules, a rule
    /// name is reserved or duplicated, a reference is dangling, a rule can
    /// never terminate, or a repeat wraps always-empty content.
    pub fn build(self) -> Result<Grammar, CompileError> {
        if self.rules.is_empty() {
            return Err(CompileError::MissingStartRule { grammar: self.name });
        }

        validate_grammar(
            &self.rules,
            &self.extras,
            &self.conflicts,
            &self.inline_rules,
            &self.external_tokens,
            self.word_rule.as_deref(),
        )?;

        let mut interner = Rodeo::new();
        let mut rule_index = HashMap::with_hasher(ahash::RandomState::new());
        for (i, (name, _)) in self.rules.iter().enumerate() {
            rule_index.insert(interner.get_or_intern(name.as_str()), i);
        }

        Ok(Grammar {
            name: self.name,
            rules: self.rules,
            rule_index,
            extras: self.extras,
            conflicts: self.conflicts,
            inline_rules: self.inline_rules,
            external_tokens: self.external_tokens,
            word_rule: self.word_rule,
            precedence_levels: self.precedence_levels,
            interner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::rule::{lit, pattern, seq, sym};

    #[test]
    fn first_rule_is_start_symbol() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", sym("item"))
            .rule("item", lit("x"))
            .build()
            .unwrap();
        assert_eq!(grammar.start_rule(), "program");
        assert_eq!(grammar.rules().len(), 2);
    }

    #[test]
    fn empty_grammar_is_rejected() {
        let result = GrammarBuilder::new("empty").build();
        assert!(matches!(
            result,
            Err(CompileError::MissingStartRule { .. })
        ));
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let result = GrammarBuilder::new("g")
            .rule("program", sym("missing"))
            .build();
        assert!(matches!(result, Err(CompileError::UndefinedRule { .. })));
    }

    #[test]
    fn conflict_set_members_are_sorted_and_deduped() {
        let set = ConflictSet::new(["b".into(), "a".into(), "b".into()]);
        assert_eq!(set.members(), ["a", "b"]);
        assert!(set.contains("a"));
        assert!(!set.contains("c"));
    }

    #[test]
    fn precedence_levels_resolve() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", seq([lit("a"), lit("b")]))
            .precedence_level("TIMES", 6)
            .precedence_level("PLUS", 4)
            .build()
            .unwrap();
        assert_eq!(grammar.precedence_level("TIMES"), Some(6));
        assert_eq!(grammar.precedence_level("missing"), None);
    }

    #[test]
    fn rule_names_are_interned() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", pattern("[a-z]+"))
            .build()
            .unwrap();
        let spur = grammar.interned_rule_name("program").unwrap();
        assert_eq!(grammar.resolve_interned(spur), "program");
    }

    #[test]
    fn rule_lookup_resolves_through_the_interner() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", sym("item"))
            .rule("item", lit("x"))
            .build()
            .unwrap();
        assert_eq!(grammar.get_rule("item"), Some(&lit("x")));
        assert!(grammar.get_rule("missing").is_none());
        assert!(grammar.interned_rule_name("missing").is_none());
    }
}
