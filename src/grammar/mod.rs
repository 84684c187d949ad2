//! # Grammar Module
//!
//! Grammar declaration and validation.
//!
//! A grammar is assembled from combinator expressions ([`rule`]) via the
//! [`GrammarBuilder`], which validates the declaration into an immutable
//! [`Grammar`]: an ordered mapping of rule name to rule graph plus the
//! grammar's extras, conflict declarations, inline set, external tokens,
//! word designation, and named precedence levels.
//!
//! Recursive rule references are represented by name and resolved lazily by
//! later passes, so self- and mutually recursive definitions never produce
//! cyclic data structures.

pub mod builder;
pub mod rule;
pub mod validate;

pub use builder::{ConflictSet, Grammar, GrammarBuilder};
pub use rule::{
    alias, blank, choice, external, field, lit, optional, pattern, prec, prec_dynamic, prec_left,
    prec_right, repeat, repeat1, seq, sym, token, Associativity, PrecValue, Precedence, Rule,
};
