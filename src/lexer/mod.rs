//! Tokenizer for CHIP-8 assembly source.
//!
//! Mnemonics and register names are case-insensitive. Statements are
//! newline-terminated, so `\n` comes out as an ordinary [`TokenKind::Char`]
//! token instead of being swallowed as whitespace.

use miette::SourceSpan;

use crate::chip8::{MNEMONICS, REGISTERS, SPECIAL_REGISTERS};
use crate::lexer::cursor::Cursor;

pub mod cursor;

/// Byte range within the source, used for diagnostic labels.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Span {
    offs: usize,
    len: usize,
}

impl Span {
    pub fn new(offs: usize, len: usize) -> Self {
        Span { offs, len }
    }

    /// Non-source span.
    pub fn dummy() -> Self {
        Span { offs: 0, len: 0 }
    }

    pub fn offs(&self) -> usize {
        self.offs
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs.into(), value.len)
    }
}

/// 1-based line/column of a token, for diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

impl Position {
    pub fn dummy() -> Self {
        Position { line: 0, col: 0 }
    }
}

/// Name and definition site of the macro a token was expanded from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MacroOrigin {
    pub name: &'static str,
    pub def_line: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Invalid,
    /// The `db` data-byte directive.
    Db,
    /// The `%define` macro directive.
    Define,
    Instr,
    Reg,
    SpecialReg,
    Ident,
    Imm,
    Char,
    /// Remainder of the current line, fetched on request for macro bodies.
    Raw,
    Eof,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: &'static str,
    pub span: Span,
    pub pos: Position,
    /// Parsed integer for immediates, register index for registers,
    /// the byte itself for `Char` tokens.
    pub value: i32,
    /// Set when the token came out of a macro expansion.
    pub origin: Option<MacroOrigin>,
}

impl Token {
    pub fn eof() -> Token {
        Token {
            kind: TokenKind::Eof,
            lexeme: "",
            span: Span::dummy(),
            pos: Position::dummy(),
            value: 0,
            origin: None,
        }
    }

    pub fn is_char(&self, c: char) -> bool {
        self.kind == TokenKind::Char && self.value == c as i32
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use TokenKind as K;
        let name = match self.kind {
            K::Invalid => "Invalid",
            K::Db => "Db",
            K::Define => "Define",
            K::Instr => "Instr",
            K::Reg => "Reg",
            K::SpecialReg => "SpecialReg",
            K::Ident => "Ident",
            K::Imm => "Imm",
            K::Char => "Char",
            K::Raw => "Raw",
            K::Eof => "Eof",
        };
        match self.kind {
            K::Char => {
                let c = self.value as u8 as char;
                if c.is_ascii_graphic() || c == ' ' {
                    write!(f, "[{name}, '{c}']")
                } else {
                    write!(f, "[{name}, {}]", self.value)
                }
            }
            K::Imm | K::Reg => write!(f, "[{name}, {}]", self.value),
            K::SpecialReg | K::Ident | K::Instr => {
                write!(f, "[{name}, '{}']", self.lexeme)
            }
            _ => write!(f, "[{name}]"),
        }
    }
}

pub struct Lexer {
    cursor: Cursor,
    /// Armed by [`Lexer::set_next_token_as_line`]; one fetch, then back
    /// to normal tokenization.
    next_token_as_line: bool,
}

impl Lexer {
    pub fn new(src: &'static str) -> Lexer {
        Lexer {
            cursor: Cursor::new(src),
            next_token_as_line: false,
        }
    }

    /// The next fetch returns the rest of the line as one [`TokenKind::Raw`]
    /// token. Used to capture a `%define` substitution body.
    pub fn set_next_token_as_line(&mut self) {
        self.next_token_as_line = true;
    }

    pub fn next(&mut self) -> Token {
        if !self.next_token_as_line {
            return self.next_token();
        }
        self.next_token_as_line = false;
        self.skip_blanks();

        let pos = self.position();
        let start = self.cursor.offset();
        loop {
            let c = self.cursor.first();
            if self.cursor.is_at_end() || c == ';' || c == '\n' {
                break;
            }
            self.cursor.bump();
        }

        let lexeme = self.cursor.slice(start).trim_end();
        Token {
            kind: TokenKind::Raw,
            lexeme,
            span: Span::new(start, lexeme.len()),
            pos,
            value: 0,
            origin: None,
        }
    }

    fn next_token(&mut self) -> Token {
        self.skip_blanks();
        if self.cursor.first() == ';' {
            // Discard comment up to (not including) the newline.
            while !self.cursor.is_at_end() && self.cursor.first() != '\n' {
                self.cursor.bump();
            }
        }

        let pos = self.position();
        let start = self.cursor.offset();
        let c = self.cursor.first();

        let (kind, value) = if self.cursor.is_at_end() {
            (TokenKind::Eof, 0)
        } else if c.is_ascii_digit() || c == '+' || c == '-' {
            self.immediate()
        } else if c.is_ascii_alphabetic() || c == '_' {
            self.identifier()
        } else if c == '%'
            && (self.cursor.second().is_ascii_alphabetic()
                || self.cursor.second() == '_')
        {
            self.macro_directive()
        } else {
            (TokenKind::Char, self.cursor.bump() as i32)
        };

        let lexeme = self.cursor.slice(start);
        Token {
            kind,
            lexeme,
            span: Span::new(start, lexeme.len()),
            pos,
            value,
            origin: None,
        }
    }

    /// Signed decimal, or unsigned hex/binary/octal with a `0x`/`0b`/`0o`
    /// prefix. A sign is only allowed on decimal literals. Overflowing the
    /// accumulator is a lexical error.
    fn immediate(&mut self) -> (TokenKind, i32) {
        let invalid = (TokenKind::Invalid, 0);
        let mut base: u32 = 10;
        let mut is_neg = false;
        let mut has_sign = false;
        let mut ret: i32 = 0;

        let c = self.cursor.first();
        if c == '+' || c == '-' {
            is_neg = c == '-';
            has_sign = true;
            self.cursor.bump();
        }

        if self.cursor.first() == '0' {
            base = match self.cursor.second().to_ascii_lowercase() {
                'x' => 16,
                'b' => 2,
                'o' => 8,
                _ => 10,
            };
        }
        if base != 10 {
            if has_sign {
                return invalid;
            }
            // Eat the base prefix; it must be followed by digits.
            self.cursor.bump();
            self.cursor.bump();
            if !self.cursor.first().is_ascii_alphanumeric() {
                return invalid;
            }
        }

        loop {
            let c = self.cursor.first();
            if !c.is_ascii_alphanumeric() {
                break;
            }
            let digit = match c.to_digit(36) {
                Some(d) if d < base => d as i32,
                _ => return invalid,
            };
            ret = match ret
                .checked_mul(base as i32)
                .and_then(|v| v.checked_add(digit))
            {
                Some(v) => v,
                None => return invalid,
            };
            self.cursor.bump();
        }

        if is_neg {
            ret = -ret;
        }
        (TokenKind::Imm, ret)
    }

    fn identifier(&mut self) -> (TokenKind, i32) {
        let start = self.cursor.offset();
        while is_ident_tail_char(self.cursor.first()) {
            self.cursor.bump();
        }
        let ident = self.cursor.slice(start);
        let icase = |s: &&str| s.eq_ignore_ascii_case(ident);

        if ident.eq_ignore_ascii_case("db") {
            (TokenKind::Db, 0)
        } else if MNEMONICS.iter().any(|m| m.eq_ignore_ascii_case(ident)) {
            (TokenKind::Instr, 0)
        } else if let Some(r) = REGISTERS.iter().position(icase) {
            (TokenKind::Reg, r as i32)
        } else if SPECIAL_REGISTERS.iter().any(|s| s.eq_ignore_ascii_case(ident)) {
            (TokenKind::SpecialReg, 0)
        } else {
            (TokenKind::Ident, 0)
        }
    }

    fn macro_directive(&mut self) -> (TokenKind, i32) {
        let start = self.cursor.offset();
        self.cursor.bump(); // eat '%'
        while is_ident_tail_char(self.cursor.first()) {
            self.cursor.bump();
        }
        if self.cursor.slice(start).eq_ignore_ascii_case("%define") {
            (TokenKind::Define, 0)
        } else {
            (TokenKind::Invalid, 0)
        }
    }

    fn skip_blanks(&mut self) {
        while matches!(self.cursor.first(), ' ' | '\t' | '\r') {
            self.cursor.bump();
        }
    }

    fn position(&self) -> Position {
        Position {
            line: self.cursor.line(),
            col: self.cursor.col(),
        }
    }
}

fn is_ident_tail_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinds(src: &'static str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next();
            if tok.kind == TokenKind::Eof {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    fn first(src: &'static str) -> Token {
        Lexer::new(src).next()
    }

    #[test]
    fn classifies_statement() {
        use TokenKind as K;
        assert_eq!(
            kinds("loop: LD V0, 0x42 ; load\n"),
            vec![K::Ident, K::Char, K::Instr, K::Reg, K::Char, K::Imm, K::Char]
        );
    }

    #[test]
    fn registers_carry_index() {
        let tok = first("vA");
        assert_eq!(tok.kind, TokenKind::Reg);
        assert_eq!(tok.value, 0xA);
        assert_eq!(first("vf").value, 0xF);
        // V16 is not a register name
        assert_eq!(first("V16").kind, TokenKind::Ident);
    }

    #[test]
    fn special_registers() {
        for name in ["I", "dt", "St", "K", "f", "b"] {
            assert_eq!(first(name).kind, TokenKind::SpecialReg, "{name}");
        }
    }

    #[test]
    fn literal_bases() {
        assert_eq!(first("42").value, 42);
        assert_eq!(first("-7").value, -7);
        assert_eq!(first("+7").value, 7);
        assert_eq!(first("0x1FF").value, 0x1FF);
        assert_eq!(first("0b1010").value, 10);
        assert_eq!(first("0o17").value, 15);
    }

    #[test]
    fn literal_errors() {
        // sign is decimal-only
        assert_eq!(first("-0x10").kind, TokenKind::Invalid);
        // bare prefix
        assert_eq!(first("0x").kind, TokenKind::Invalid);
        // digit not in base
        assert_eq!(first("0b12").kind, TokenKind::Invalid);
        // accumulator overflow
        assert_eq!(first("99999999999").kind, TokenKind::Invalid);
    }

    #[test]
    fn comment_runs_to_newline() {
        let mut lexer = Lexer::new("; whole line\nRET\n");
        assert!(lexer.next().is_char('\n'));
        assert_eq!(lexer.next().kind, TokenKind::Instr);
    }

    #[test]
    fn raw_mode_takes_rest_of_line() {
        let mut lexer = Lexer::new("%define TWO  1 + 1  ; comment\n");
        assert_eq!(lexer.next().kind, TokenKind::Define);
        lexer.next(); // TWO
        lexer.set_next_token_as_line();
        let body = lexer.next();
        assert_eq!(body.kind, TokenKind::Raw);
        assert_eq!(body.lexeme, "1 + 1");
        // Mode reverts after one fetch.
        assert!(lexer.next().is_char('\n'));
    }

    #[test]
    fn tracks_line_and_column() {
        let mut lexer = Lexer::new("CLS\n  RET\n");
        let cls = lexer.next();
        assert_eq!((cls.pos.line, cls.pos.col), (1, 1));
        lexer.next(); // newline
        let ret = lexer.next();
        assert_eq!((ret.pos.line, ret.pos.col), (2, 3));
    }

    #[test]
    fn percent_needs_directive() {
        assert_eq!(first("%bogus").kind, TokenKind::Invalid);
        assert_eq!(first("%Define").kind, TokenKind::Define);
        // lone '%' is just a char
        assert_eq!(first("% x").kind, TokenKind::Char);
    }
}
