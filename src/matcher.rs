//! Rule-driven instruction matching.
//!
//! Instead of hand-writing parsing code for all 35 instruction forms, the
//! canonical format strings in [`FORMATS`] are lexed once into rules, and
//! incoming tokens are matched against every still-viable rule at once.

use lazy_static::lazy_static;

use crate::chip8::{Instruction, FORMATS, INS_CNT};
use crate::lexer::{Lexer, Token, TokenKind};

/// Outcome of feeding one token to the matcher. The operand classes tell
/// the parser which statement slot the token fills.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Matched {
    None,
    /// More than one viable rule accepted the token under different
    /// classes; binding is deferred until a later atom disambiguates.
    Multiple,
    Register,
    Label,
    Address,
    Byte,
    Nibble,
    Exact,
}

/// One element of a rule. Lowercase `v`/`a`/`b`/`n` in a format string are
/// operand classes; any other lexeme must match literally.
#[derive(Debug)]
enum Atom {
    V,
    A,
    B,
    N,
    Exact(&'static str),
}

lazy_static! {
    static ref RULES: Vec<Vec<Atom>> = FORMATS
        .iter()
        .map(|format| {
            let mut lexer = Lexer::new(format);
            let mut atoms = Vec::with_capacity(6);
            loop {
                let tok = lexer.next();
                if tok.kind == TokenKind::Eof {
                    break;
                }
                atoms.push(match tok.lexeme {
                    "v" => Atom::V,
                    "a" => Atom::A,
                    "b" => Atom::B,
                    "n" => Atom::N,
                    other => Atom::Exact(other),
                });
            }
            atoms
        })
        .collect();
}

fn match_one(atom: &Atom, tok: &Token) -> Matched {
    match atom {
        Atom::V if tok.kind == TokenKind::Reg => Matched::Register,
        Atom::A if tok.kind == TokenKind::Ident => Matched::Label,
        Atom::A if tok.kind == TokenKind::Imm => Matched::Address,
        Atom::B if tok.kind == TokenKind::Imm => Matched::Byte,
        Atom::N if tok.kind == TokenKind::Imm => Matched::Nibble,
        Atom::Exact(s) if s.eq_ignore_ascii_case(tok.lexeme) => Matched::Exact,
        _ => Matched::None,
    }
}

/// Tracks which instruction rules are still compatible with the tokens
/// seen so far. Viability is a bitmask over rule indices.
pub struct RuleMatcher {
    viable: u64,
    match_count: usize,
    matched: Option<Instruction>,
}

const ALL_VIABLE: u64 = (1 << INS_CNT) - 1;

impl RuleMatcher {
    pub fn new() -> Self {
        RuleMatcher {
            viable: ALL_VIABLE,
            match_count: 0,
            matched: None,
        }
    }

    pub fn start_new_match(&mut self) {
        self.viable = ALL_VIABLE;
        self.match_count = 0;
        self.matched = None;
    }

    /// The winning rule, if one has consumed all of its atoms.
    pub fn matched_rule(&self) -> Option<Instruction> {
        self.matched
    }

    /// Try matching the token against every viable rule and advance if any
    /// accepted it.
    ///
    /// The rule table is authored so that an immediate position is uniquely
    /// an address, byte, or nibble given the already-matched prefix; an
    /// immediate therefore never produces [`Matched::Multiple`].
    pub fn try_next(&mut self, tok: &Token) -> Matched {
        if self.matched.is_some() {
            return Matched::None;
        }
        let mut code = Matched::None;

        for (i, rule) in RULES.iter().enumerate() {
            if self.viable & (1 << i) == 0 {
                continue;
            }

            let c = match_one(&rule[self.match_count], tok);
            if c == Matched::None {
                self.viable &= !(1 << i);
            }
            if code == Matched::None {
                code = c;
            } else if c != Matched::None && code != c {
                code = Matched::Multiple;
            }

            if c != Matched::None && self.match_count == rule.len() - 1 {
                self.matched = Some(Instruction::ENCODABLE[i]);
                break;
            }
        }

        if code != Matched::None {
            self.match_count += 1;
        }
        code
    }
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self::new()
    }
}
