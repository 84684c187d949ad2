//! # Lexer Module
//!
//! Compiles a [`LexicalGrammar`](crate::prepare::LexicalGrammar) into a
//! runnable maximal-munch lexer.
//!
//! Every token is backed by either an exact literal or an anchored regular
//! expression. At each position the lexer tries every token valid in the
//! current parse state and picks a winner by, in order:
//!
//! 1. longest match,
//! 2. literal over pattern at equal length,
//! 3. earliest declaration.
//!
//! When the grammar designates a word token, literal tokens whose text is
//! itself a word ("keywords") are captured through it: a keyword match is
//! discarded whenever the word pattern matches strictly longer at the same
//! position, so `in` never wins against the identifier `integer`.

mod set;

pub use set::TokenSet;

use compact_str::CompactString;

use crate::error::{CompileError, ParseError};
use crate::prepare::{LexicalGrammar, TokenId, TokenPattern};

/// A successful lexical match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexMatch {
    pub token: TokenId,
    /// Match length in bytes. Always non-zero.
    pub length: usize,
}

/// A token recognized by an external scanner, by index into the grammar's
/// external token list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalMatch {
    pub token: u32,
    pub length: usize,
}

/// Hook for tokens the static lexer cannot express.
///
/// The runtime consults the scanner before internal lexing at every token
/// boundary, passing the set of external tokens valid in the current state.
/// The scanner may keep mutable state across calls (nesting depth, heredoc
/// tags). Returning `None` falls through to the internal lexer.
pub trait ExternalScanner {
    fn scan(&mut self, text: &str, valid: &TokenSet) -> Option<ExternalMatch>;
}

#[derive(Debug)]
enum Matcher {
    Literal(CompactString),
    Pattern(regex::Regex),
}

impl Matcher {
    fn match_length(&self, text: &str) -> Option<usize> {
        match self {
            Self::Literal(expected) => text.starts_with(expected.as_str()).then(|| expected.len()),
            Self::Pattern(regex) => regex.find(text).map(|m| m.end()),
        }
    }
}

#[derive(Debug)]
struct CompiledToken {
    matcher: Matcher,
    decl_index: u32,
    /// Literal whose text the word pattern fully matches.
    is_keyword: bool,
}

/// A compiled maximal-munch lexer.
#[derive(Debug)]
pub struct Lexer {
    tokens: Vec<CompiledToken>,
    extras: Vec<TokenId>,
    word_token: Option<TokenId>,
}

impl Lexer {
    /// Compile every token's matcher.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidPattern`] if a pattern token's regular
    /// expression fails to compile.
    pub fn compile(
        grammar: &LexicalGrammar,
        extras: &[TokenId],
        word_token: Option<TokenId>,
    ) -> Result<Self, CompileError> {
        let mut tokens = Vec::with_capacity(grammar.tokens.len());
        for token in &grammar.tokens {
            let matcher = match &token.pattern {
                TokenPattern::Literal(text) => Matcher::Literal(text.clone()),
                TokenPattern::Pattern(source) => {
                    let anchored = format!("^(?:{source})");
                    let regex =
                        regex::Regex::new(&anchored).map_err(|e| CompileError::InvalidPattern {
                            token: token.name.clone(),
                            message: e.to_string(),
                        })?;
                    Matcher::Pattern(regex)
                }
            };
            tokens.push(CompiledToken {
                matcher,
                decl_index: token.decl_index,
                is_keyword: false,
            });
        }

        let mut lexer = Self {
            tokens,
            extras: extras.to_vec(),
            word_token,
        };
        if let Some(word) = word_token {
            for i in 0..lexer.tokens.len() {
                let Matcher::Literal(text) = &lexer.tokens[i].matcher else {
                    continue;
                };
                if TokenId(i as u32) == word {
                    continue;
                }
                let text = text.clone();
                let covers_whole = lexer.tokens[word.0 as usize]
                    .matcher
                    .match_length(&text)
                    .is_some_and(|len| len == text.len());
                lexer.tokens[i].is_keyword = covers_whole;
            }
        }
        Ok(lexer)
    }

    /// Advance past any extra tokens (whitespace, comments) that are not
    /// themselves valid in the current state. Returns the new offset.
    #[must_use]
    pub fn skip_extras(&self, text: &str, mut offset: usize, valid: &TokenSet) -> usize {
        loop {
            let rest = &text[offset..];
            let mut skipped = 0;
            for &extra in &self.extras {
                if valid.contains(extra.0) {
                    continue;
                }
                if let Some(len) = self.tokens[extra.0 as usize].matcher.match_length(rest) {
                    skipped = skipped.max(len);
                }
            }
            if skipped == 0 {
                return offset;
            }
            offset += skipped;
        }
    }

    /// Match the longest valid token at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::NoValidToken`] if nothing in `valid` matches.
    pub fn next_token(
        &self,
        text: &str,
        offset: usize,
        valid: &TokenSet,
    ) -> Result<LexMatch, ParseError> {
        let rest = &text[offset..];
        let word_length = self
            .word_token
            .and_then(|word| self.tokens[word.0 as usize].matcher.match_length(rest));

        let mut best: Option<(LexMatch, bool, u32)> = None;
        for index in valid.iter() {
            let Some(token) = self.tokens.get(index as usize) else {
                continue;
            };
            let Some(length) = token.matcher.match_length(rest) else {
                continue;
            };
            if length == 0 {
                continue;
            }
            // A keyword inside a longer word is not a keyword here.
            if token.is_keyword && word_length.is_some_and(|w| w > length) {
                continue;
            }
            let is_literal = matches!(token.matcher, Matcher::Literal(_));
            let candidate = (
                LexMatch {
                    token: TokenId(index),
                    length,
                },
                is_literal,
                token.decl_index,
            );
            let wins = match &best {
                None => true,
                Some((current, current_literal, current_decl)) => {
                    length > current.length
                        || (length == current.length && is_literal && !current_literal)
                        || (length == current.length
                            && is_literal == *current_literal
                            && token.decl_index < *current_decl)
                }
            };
            if wins {
                best = Some(candidate);
            }
        }
        best.map(|(m, _, _)| m)
            .ok_or(ParseError::NoValidToken { offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{lit, pattern, seq, sym, GrammarBuilder};
    use crate::prepare::prepare;

    fn compile(grammar: &crate::grammar::Grammar) -> (Lexer, crate::prepare::LexicalGrammar) {
        let (syntax, lexical) = prepare(grammar).unwrap();
        let lexer = Lexer::compile(&lexical, &syntax.extra_tokens, syntax.word_token).unwrap();
        (lexer, lexical)
    }

    fn all_valid(lexical: &crate::prepare::LexicalGrammar) -> TokenSet {
        let mut set = TokenSet::new();
        for i in 0..lexical.tokens.len() {
            set.insert(i as u32);
        }
        set
    }

    #[test]
    fn longest_match_wins() {
        let grammar = GrammarBuilder::new("g")
            .rule("ops", seq([lit("="), lit("==")]))
            .build()
            .unwrap();
        let (lexer, lexical) = compile(&grammar);
        let valid = all_valid(&lexical);
        let m = lexer.next_token("== x", 0, &valid).unwrap();
        assert_eq!(lexical.token_name(m.token), "==");
        assert_eq!(m.length, 2);
    }

    #[test]
    fn literal_beats_pattern_at_equal_length() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", seq([sym("identifier"), lit("if")]))
            .rule("identifier", pattern("[a-z]+"))
            .build()
            .unwrap();
        let (lexer, lexical) = compile(&grammar);
        let valid = all_valid(&lexical);
        let m = lexer.next_token("if", 0, &valid).unwrap();
        assert_eq!(lexical.token_name(m.token), "if");
    }

    #[test]
    fn keyword_inside_longer_word_does_not_match() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", seq([sym("identifier"), lit("in")]))
            .rule("identifier", pattern("[a-z]+"))
            .word("identifier")
            .build()
            .unwrap();
        let (lexer, lexical) = compile(&grammar);
        let valid = all_valid(&lexical);
        let m = lexer.next_token("integer", 0, &valid).unwrap();
        assert_eq!(lexical.token_name(m.token), "identifier");
        assert_eq!(m.length, 7);

        let m = lexer.next_token("in ", 0, &valid).unwrap();
        assert_eq!(lexical.token_name(m.token), "in");
        assert_eq!(m.length, 2);
    }

    #[test]
    fn invalid_token_set_restricts_matches() {
        let grammar = GrammarBuilder::new("g")
            .rule("pair", seq([lit("a"), lit("b")]))
            .build()
            .unwrap();
        let (lexer, lexical) = compile(&grammar);
        let mut only_b = TokenSet::new();
        for (i, token) in lexical.tokens.iter().enumerate() {
            if token.name == "b" {
                only_b.insert(i as u32);
            }
        }
        assert!(matches!(
            lexer.next_token("a", 0, &only_b),
            Err(ParseError::NoValidToken { offset: 0 })
        ));
    }

    #[test]
    fn extras_are_skipped() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", lit("x"))
            .extra(pattern(r"\s+"))
            .extra(pattern("#[^\\n]*"))
            .build()
            .unwrap();
        let (lexer, lexical) = compile(&grammar);
        let valid = all_valid(&lexical);
        let text = "  # note\n  x";
        let offset = lexer.skip_extras(text, 0, &TokenSet::new());
        assert_eq!(&text[offset..], "x");
        let m = lexer.next_token(text, offset, &valid).unwrap();
        assert_eq!(lexical.token_name(m.token), "x");
    }

    #[test]
    fn bad_pattern_is_a_compile_error() {
        let grammar = GrammarBuilder::new("g")
            .rule("program", pattern("[unclosed"))
            .build()
            .unwrap();
        let (syntax, lexical) = prepare(&grammar).unwrap();
        let result = Lexer::compile(&lexical, &syntax.extra_tokens, syntax.word_token);
        assert!(matches!(result, Err(CompileError::InvalidPattern { .. })));
    }
}
