//! The canonical rule graph: a tagged variant over the grammar DSL's
//! combinators.
//!
//! Rules form a DAG. Recursive references are always by name
//! ([`Rule::Symbol`]), never by structural embedding, so self- and mutually
//! recursive definitions stay finite.

use compact_str::CompactString;

/// Associativity of a precedence annotation.
///
/// `Left` prefers reducing the left alternative first, `Right` prefers
/// shifting. `None` makes a same-precedence tie an error unless the competing
/// rules are whitelisted in a conflict declaration. `Dynamic` defers the
/// decision to runtime: the annotation's value is a score accumulated per
/// reduction and compared among surviving GLR branches at completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Associativity {
    Left,
    Right,
    None,
    Dynamic,
}

/// A precedence value: either a bare integer or a named level resolved
/// against the grammar's level table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrecValue {
    Numeric(i32),
    Named(CompactString),
}

impl From<i32> for PrecValue {
    fn from(value: i32) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for PrecValue {
    fn from(name: &str) -> Self {
        Self::Named(name.into())
    }
}

/// A precedence annotation attached to a rule alternative.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Precedence {
    pub value: PrecValue,
    pub associativity: Associativity,
}

/// A node in the rule graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Rule {
    /// Matches the empty string.
    Blank,
    /// An exact literal string terminal.
    Literal(CompactString),
    /// A regex-like pattern terminal.
    Pattern(CompactString),
    /// A reference to another rule, by name.
    Symbol(CompactString),
    /// A reference to an externally scanned token, by name.
    External(CompactString),
    /// Matches each sub-rule in order.
    Seq(Vec<Rule>),
    /// Matches any one of the sub-rules.
    Choice(Vec<Rule>),
    /// Matches the sub-rule `min` or more times (`min` is 0 or 1).
    Repeat { rule: Box<Rule>, min: u8 },
    /// Matches the sub-rule zero or one time.
    Optional(Box<Rule>),
    /// Tags the wrapped alternative with a precedence and associativity.
    Prec {
        prec: Precedence,
        rule: Box<Rule>,
    },
    /// Tags the wrapped rule with a field name in the emitted tree.
    Field {
        name: CompactString,
        rule: Box<Rule>,
    },
    /// Renames the node produced by the wrapped rule.
    Alias {
        value: CompactString,
        rule: Box<Rule>,
    },
    /// Forces the wrapped subtree to be lexed as one atomic terminal.
    Token(Box<Rule>),
}

/// Rule names that collide with combinator names are rejected by the builder.
pub const RESERVED_RULE_NAMES: &[&str] = &[
    "seq", "choice", "repeat", "repeat1", "optional", "prec", "field", "alias", "token", "blank",
];

/// Matches the empty string.
#[must_use]
pub const fn blank() -> Rule {
    Rule::Blank
}

/// An exact literal string terminal.
#[must_use]
pub fn lit(text: &str) -> Rule {
    Rule::Literal(text.into())
}

/// A regex-like pattern terminal.
#[must_use]
pub fn pattern(source: &str) -> Rule {
    Rule::Pattern(source.into())
}

/// A reference to another rule, by name.
#[must_use]
pub fn sym(name: &str) -> Rule {
    Rule::Symbol(name.into())
}

/// A reference to an externally scanned token, by name.
#[must_use]
pub fn external(name: &str) -> Rule {
    Rule::External(name.into())
}

/// Matches each rule in order. A single-element sequence collapses to its
/// element.
#[must_use]
pub fn seq<I>(rules: I) -> Rule
where
    I: IntoIterator<Item = Rule>,
{
    let vec: Vec<_> = rules.into_iter().collect();
    if vec.len() == 1 {
        vec.into_iter().next().unwrap()
    } else {
        Rule::Seq(vec)
    }
}

/// Matches any one of the rules. A single-element choice collapses to its
/// element.
#[must_use]
pub fn choice<I>(rules: I) -> Rule
where
    I: IntoIterator<Item = Rule>,
{
    let vec: Vec<_> = rules.into_iter().collect();
    if vec.len() == 1 {
        vec.into_iter().next().unwrap()
    } else {
        Rule::Choice(vec)
    }
}

/// Matches the rule zero or more times.
#[must_use]
pub fn repeat(rule: Rule) -> Rule {
    Rule::Repeat {
        rule: Box::new(rule),
        min: 0,
    }
}

/// Matches the rule one or more times.
#[must_use]
pub fn repeat1(rule: Rule) -> Rule {
    Rule::Repeat {
        rule: Box::new(rule),
        min: 1,
    }
}

/// Matches the rule zero or one time.
#[must_use]
pub fn optional(rule: Rule) -> Rule {
    Rule::Optional(Box::new(rule))
}

/// Tags the alternative with a precedence and no associativity.
#[must_use]
pub fn prec(value: impl Into<PrecValue>, rule: Rule) -> Rule {
    Rule::Prec {
        prec: Precedence {
            value: value.into(),
            associativity: Associativity::None,
        },
        rule: Box::new(rule),
    }
}

/// Tags the alternative with a precedence and left associativity.
#[must_use]
pub fn prec_left(value: impl Into<PrecValue>, rule: Rule) -> Rule {
    Rule::Prec {
        prec: Precedence {
            value: value.into(),
            associativity: Associativity::Left,
        },
        rule: Box::new(rule),
    }
}

/// Tags the alternative with a precedence and right associativity.
#[must_use]
pub fn prec_right(value: impl Into<PrecValue>, rule: Rule) -> Rule {
    Rule::Prec {
        prec: Precedence {
            value: value.into(),
            associativity: Associativity::Right,
        },
        rule: Box::new(rule),
    }
}

/// Tags the alternative with a dynamic precedence score, compared only among
/// surviving GLR branches at completion.
#[must_use]
pub fn prec_dynamic(score: i32, rule: Rule) -> Rule {
    Rule::Prec {
        prec: Precedence {
            value: PrecValue::Numeric(score),
            associativity: Associativity::Dynamic,
        },
        rule: Box::new(rule),
    }
}

/// Tags the wrapped rule with a field name in the emitted tree.
#[must_use]
pub fn field(name: &str, rule: Rule) -> Rule {
    Rule::Field {
        name: name.into(),
        rule: Box::new(rule),
    }
}

/// Renames the node produced by the wrapped rule.
#[must_use]
pub fn alias(rule: Rule, value: &str) -> Rule {
    Rule::Alias {
        value: value.into(),
        rule: Box::new(rule),
    }
}

/// Forces the wrapped subtree to be lexed as one atomic terminal.
#[must_use]
pub fn token(rule: Rule) -> Rule {
    Rule::Token(Box::new(rule))
}

impl Rule {
    /// Whether this rule's content is purely lexical: no symbol or external
    /// references anywhere. A named rule with purely lexical content becomes
    /// a single terminal in the compiled lexer.
    #[must_use]
    pub fn is_lexical(&self) -> bool {
        match self {
            Self::Blank | Self::Literal(_) | Self::Pattern(_) => true,
            Self::Token(_) => true,
            Self::Symbol(_) | Self::External(_) => false,
            Self::Seq(rules) | Self::Choice(rules) => rules.iter().all(Self::is_lexical),
            Self::Repeat { rule, .. } | Self::Optional(rule) => rule.is_lexical(),
            Self::Prec { rule, .. } | Self::Field { rule, .. } | Self::Alias { rule, .. } => {
                rule.is_lexical()
            }
        }
    }

    /// Visit every node in the rule tree, depth-first.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Rule)) {
        f(self);
        match self {
            Self::Seq(rules) | Self::Choice(rules) => {
                for rule in rules {
                    rule.visit(f);
                }
            }
            Self::Repeat { rule, .. }
            | Self::Optional(rule)
            | Self::Prec { rule, .. }
            | Self::Field { rule, .. }
            | Self::Alias { rule, .. }
            | Self::Token(rule) => rule.visit(f),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_element_seq_collapses() {
        assert_eq!(seq([lit("a")]), lit("a"));
        assert_eq!(choice([lit("a")]), lit("a"));
    }

    #[test]
    fn lexical_classification() {
        assert!(lit("+").is_lexical());
        assert!(token(seq([lit("/*"), pattern(r"[^*]*"), lit("*/")])).is_lexical());
        assert!(!seq([lit("("), sym("expr"), lit(")")]).is_lexical());
        assert!(!external("heredoc").is_lexical());
    }

    #[test]
    fn prec_builders_set_associativity() {
        let left = prec_left(4, lit("-"));
        match left {
            Rule::Prec { prec, .. } => {
                assert_eq!(prec.associativity, Associativity::Left);
                assert_eq!(prec.value, PrecValue::Numeric(4));
            }
            other => panic!("expected Prec, got {other:?}"),
        }

        let named = prec("TIMES", lit("*"));
        match named {
            Rule::Prec { prec, .. } => {
                assert_eq!(prec.value, PrecValue::Named("TIMES".into()));
            }
            other => panic!("expected Prec, got {other:?}"),
        }
    }

    #[test]
    fn visit_reaches_nested_nodes() {
        let rule = seq([sym("a"), optional(choice([lit("x"), sym("b")]))]);
        let mut symbols = Vec::new();
        rule.visit(&mut |r| {
            if let Rule::Symbol(name) = r {
                symbols.push(name.clone());
            }
        });
        assert_eq!(symbols, vec!["a", "b"]);
    }
}
