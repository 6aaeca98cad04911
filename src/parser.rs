//! Statement parsing and macro expansion.
//!
//! The parser keeps a one-token lookahead over the lexer, expands
//! `%define` aliases transparently inside [`AsmParser::bump`], and drives
//! the [`RuleMatcher`] over each instruction's operand tokens. Diagnostics
//! are collected rather than propagated; parsing recovers at the next
//! newline and gives up after [`ERROR_LIMIT`] reports.

use fxhash::FxHashMap;
use miette::Report;

use crate::error;
use crate::lexer::{Lexer, MacroOrigin, Position, Span, Token, TokenKind};
use crate::matcher::{Matched, RuleMatcher};
use crate::obj::{limit_value, ObjCode, Statement};

/// Assembly aborts once this many errors have been reported.
pub const ERROR_LIMIT: usize = 10;

/// A stored `%define` substitution. The body is a slice of the source
/// line it was defined on.
struct MacroDef {
    body: &'static str,
    def_line: u32,
}

/// A macro expansion in flight: a nested lexer over the stored body.
/// Expanded tokens take the call site's span and position so diagnostics
/// point at the invocation.
struct ActiveMacro {
    origin: MacroOrigin,
    call_span: Span,
    call_pos: Position,
    lexer: Lexer,
}

pub struct AsmParser {
    src: &'static str,
    lexer: Lexer,
    prev: Token,
    current: Token,
    matcher: RuleMatcher,
    active_macro: Option<ActiveMacro>,
    macros: FxHashMap<&'static str, MacroDef>,
    obj: ObjCode,
    errors: Vec<Report>,
}

/// `Err` means the statement is unsalvageable and the parser should skip
/// to the next newline. The diagnostic has already been recorded.
type Parse = Result<(), ()>;

impl AsmParser {
    pub fn new(src: &'static str) -> Self {
        AsmParser {
            src,
            lexer: Lexer::new(src),
            prev: Token::eof(),
            current: Token::eof(),
            matcher: RuleMatcher::new(),
            active_macro: None,
            macros: FxHashMap::default(),
            obj: ObjCode::new(src),
            errors: Vec::new(),
        }
    }

    /// First pass: parse every statement, collecting addresses for labels
    /// and diagnostics for anything malformed.
    pub fn parse(mut self) -> (ObjCode, Vec<Report>) {
        self.bump(); // take in the first token
        while self.current.kind != TokenKind::Eof {
            if self.errors.len() >= ERROR_LIMIT {
                self.errors.push(error::too_many_errors(ERROR_LIMIT));
                return (self.obj, self.errors);
            }
            if self.parse_statement().is_err() {
                self.recover();
            }
        }
        (self.obj, self.errors)
    }

    /// Run both passes and encode. Bytes are produced only when not a
    /// single error was reported.
    pub fn assemble(self) -> Result<Vec<u8>, Vec<Report>> {
        let (mut obj, mut errors) = self.parse();
        if errors.len() < ERROR_LIMIT {
            if let Err(mut unresolved) = obj.backpatch() {
                errors.append(&mut unresolved);
                if errors.len() > ERROR_LIMIT {
                    errors.truncate(ERROR_LIMIT);
                    errors.push(error::too_many_errors(ERROR_LIMIT));
                }
            }
        }
        if errors.is_empty() {
            Ok(obj.emit())
        } else {
            Err(errors)
        }
    }

    // statement := [label ":"] (instruction | directive)? "\n"
    fn parse_statement(&mut self) -> Parse {
        if self.match_advance(TokenKind::Reg) || self.match_advance(TokenKind::SpecialReg)
        {
            // A register name in label position is the one reserved-name
            // shape the lexer cannot reject on its own.
            let name = self.prev;
            if self.current.is_char(':') {
                self.report(error::reserved_label(&name, self.src));
            } else {
                self.report(error::expected_token(
                    "an instruction, directive, or label",
                    &name,
                    self.src,
                ));
            }
            return Err(());
        }

        if self.match_advance(TokenKind::Ident) {
            self.parse_label()?;
        }

        if self.match_advance(TokenKind::Instr) {
            self.parse_instruction()?;
        } else if self.match_advance(TokenKind::Db) {
            self.parse_db()?;
        } else if self.match_advance(TokenKind::Define) {
            self.parse_define()?;
        }

        self.expect_newline()
    }

    fn parse_label(&mut self) -> Parse {
        let label = self.prev;
        if !self.current.is_char(':') {
            self.report(error::expected_token(
                "':' after label name",
                &self.current,
                self.src,
            ));
            return Err(());
        }
        self.bump();

        if !self.obj.insert_label(label.lexeme) {
            self.report(error::duplicate_label(&label, self.src));
        }
        Ok(())
    }

    /// Feed operand tokens to the rule matcher until one instruction form
    /// wins, recording each matched operand into the statement.
    fn parse_instruction(&mut self) -> Parse {
        let mut stmt = Statement::default();
        let mut regs_matched = 0;
        self.matcher.start_new_match();

        // The mnemonic itself is the first atom of every candidate rule.
        let first = self.matcher.try_next(&self.prev);
        assert!(first != Matched::None, "mnemonic token must open a rule");

        loop {
            if let Some(ins) = self.matcher.matched_rule() {
                stmt.opcode = ins.opcode();
                self.obj.add_stmt(stmt);
                return Ok(());
            }

            match self.matcher.try_next(&self.current) {
                Matched::None => {
                    self.report(error::unexpected_operand(&self.current, self.src));
                    return Err(());
                }
                Matched::Multiple => {
                    // Binding is deferred; a later atom disambiguates.
                    // The rule table keeps immediates unambiguous.
                    debug_assert!(self.current.kind != TokenKind::Imm);
                }
                Matched::Register => {
                    match regs_matched {
                        0 => stmt.vx = self.current.value as u8,
                        1 => stmt.vy = self.current.value as u8,
                        _ => unreachable!("no rule has more than two registers"),
                    }
                    regs_matched += 1;
                }
                Matched::Label => stmt.label = Some(self.current),
                class @ (Matched::Address | Matched::Byte | Matched::Nibble) => {
                    let bits = match class {
                        Matched::Address => 12,
                        Matched::Byte => 8,
                        _ => 4,
                    };
                    match limit_value(self.current.value, bits) {
                        Some(v) => stmt.imm = v,
                        None => {
                            self.report(error::imm_out_of_range(
                                &self.current,
                                bits,
                                self.src,
                            ));
                        }
                    }
                }
                Matched::Exact => {}
            }
            self.bump();
        }
    }

    // directive := "db" immediate
    fn parse_db(&mut self) -> Parse {
        self.expect(TokenKind::Imm, "an immediate after db")?;
        let imm = match limit_value(self.prev.value, 8) {
            Some(v) => v,
            None => {
                self.report(error::imm_out_of_range(&self.prev, 8, self.src));
                0
            }
        };
        self.obj.add_stmt(Statement {
            imm,
            is_data_byte: true,
            ..Default::default()
        });
        Ok(())
    }

    // directive := "%define" identifier rest-of-line
    fn parse_define(&mut self) -> Parse {
        // Arm the lexer before consuming the name so the next fetch
        // captures the remainder of the line as the body.
        self.lexer.set_next_token_as_line();
        self.expect(TokenKind::Ident, "an identifier after %define")?;
        let name = self.prev;

        self.bump();
        let body = self.prev;
        debug_assert!(body.kind == TokenKind::Raw || body.origin.is_some());
        if body.kind != TokenKind::Raw || body.lexeme.is_empty() {
            self.report(error::empty_define_body(&name, self.src));
            return Err(());
        }

        // Redefinition replaces the previous entry.
        self.macros.insert(
            name.lexeme,
            MacroDef {
                body: body.lexeme,
                def_line: name.pos.line,
            },
        );
        Ok(())
    }

    fn expect_newline(&mut self) -> Parse {
        if self.current.kind == TokenKind::Eof || self.current.is_char('\n') {
            self.bump();
            Ok(())
        } else {
            self.report(error::expected_token(
                "a newline to end the statement",
                &self.current,
                self.src,
            ));
            Err(())
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Parse {
        if self.match_advance(kind) {
            Ok(())
        } else {
            self.report(error::expected_token(what, &self.current, self.src));
            Err(())
        }
    }

    fn match_advance(&mut self, kind: TokenKind) -> bool {
        if self.current.kind == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Skip to just past the next newline so parsing can continue with the
    /// following statement.
    fn recover(&mut self) {
        loop {
            if self.current.kind == TokenKind::Eof {
                break;
            }
            if self.current.is_char('\n') {
                self.bump();
                break;
            }
            self.bump();
        }
    }

    fn report(&mut self, report: Report) {
        self.errors.push(report);
    }

    /// Advance the lookahead by one token, routing through the active
    /// macro expansion when one is in flight. An identifier naming a known
    /// macro pushes a nested lexer over the stored body; its tokens are
    /// never themselves looked up again, so expansion is single-level.
    /// The token right after `%define` is exempt from expansion, which is
    /// what lets an existing macro be redefined.
    fn bump(&mut self) -> Token {
        let expandable = self.current.kind != TokenKind::Define;
        self.prev = self.current;

        loop {
            if let Some(active) = &mut self.active_macro {
                let mut tok = active.lexer.next();
                if tok.kind != TokenKind::Eof {
                    tok.origin = Some(active.origin);
                    tok.span = active.call_span;
                    tok.pos = active.call_pos;
                    self.current = tok;
                    break;
                }
                self.active_macro = None;
            } else {
                let tok = self.lexer.next();
                if expandable && tok.kind == TokenKind::Ident {
                    if let Some(def) = self.macros.get(tok.lexeme) {
                        self.active_macro = Some(ActiveMacro {
                            origin: MacroOrigin {
                                name: tok.lexeme,
                                def_line: def.def_line,
                            },
                            call_span: tok.span,
                            call_pos: tok.pos,
                            lexer: Lexer::new(def.body),
                        });
                        continue;
                    }
                }
                self.current = tok;
                break;
            }
        }

        self.prev
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn assemble(src: &'static str) -> Result<Vec<u8>, Vec<Report>> {
        AsmParser::new(src).assemble()
    }

    fn assemble_ok(src: &'static str) -> Vec<u8> {
        match assemble(src) {
            Ok(bytes) => bytes,
            Err(errors) => panic!("unexpected errors: {errors:?}"),
        }
    }

    fn error_count(src: &'static str) -> usize {
        match assemble(src) {
            Ok(_) => 0,
            Err(errors) => errors.len(),
        }
    }

    #[test]
    fn assembles_ld_byte() {
        assert_eq!(assemble_ok("\tLD V0, 0x42\n"), vec![0x60, 0x42]);
    }

    #[test]
    fn assembles_backward_label() {
        assert_eq!(assemble_ok("start:\n\tJP start\n"), vec![0x12, 0x00]);
    }

    #[test]
    fn assembles_drw() {
        assert_eq!(assemble_ok("\tDRW V1, V2, 5\n"), vec![0xD1, 0x25]);
    }

    #[test]
    fn expands_macro_byte() {
        assert_eq!(
            assemble_ok("%define BYTE 255\n\tLD V3, BYTE\n"),
            vec![0x63, 0xFF]
        );
        assert_eq!(
            assemble_ok("%define X 0xAB\n\tLD V0, X\n"),
            vec![0x60, 0xAB]
        );
    }

    #[test]
    fn expands_macro_with_operand_list() {
        // A body can hold several tokens.
        assert_eq!(
            assemble_ok("%define ARGS V1, V2, 5\nDRW ARGS\n"),
            vec![0xD1, 0x25]
        );
    }

    #[test]
    fn macro_redefinition_replaces() {
        assert_eq!(
            assemble_ok("%define N 1\n%define N 2\nLD V0, N\n"),
            vec![0x60, 0x02]
        );
    }

    #[test]
    fn macro_body_not_rescanned() {
        // Expansion is single-level: an identifier inside a body is not
        // looked up as a macro again. In byte position it can match
        // nothing and is an error...
        assert_eq!(error_count("%define M1 1\n%define M2 M1\nLD V0, M2\n"), 1);
        // ...in address position it is a plain label reference.
        assert_eq!(
            assemble_ok("%define TARGET spin\nspin:\n\tJP TARGET\n"),
            vec![0x12, 0x00]
        );
    }

    #[test]
    fn forward_label_resolves() {
        // Label on its own line binds to the next instruction's address.
        let bytes = assemble_ok("\tJP end\n\tCLS\nend:\n\tRET\n");
        assert_eq!(bytes, vec![0x12, 0x04, 0x00, 0xE0, 0x00, 0xEE]);
    }

    #[test]
    fn db_counts_one_byte() {
        // Labels after a db are off by one, not two.
        let bytes = assemble_ok("here: db 0xAA\nthere:\n\tJP there\n");
        assert_eq!(bytes, vec![0xAA, 0x12, 0x01]);
    }

    #[test]
    fn db_negative_wraps() {
        assert_eq!(assemble_ok("\tdb -1\n"), vec![0xFF]);
    }

    #[test]
    fn negative_byte_operand() {
        assert_eq!(assemble_ok("\tLD V0, -1\n"), vec![0x60, 0xFF]);
    }

    #[test]
    fn rejects_unknown_label() {
        assert_eq!(error_count("\tJP nowhere\n"), 1);
    }

    #[test]
    fn rejects_duplicate_label() {
        assert_eq!(error_count("a:\na:\n\tRET\n"), 1);
    }

    #[test]
    fn rejects_second_label_on_line() {
        assert!(error_count("a: b: RET\n") > 0);
    }

    #[test]
    fn rejects_reserved_label() {
        assert_eq!(error_count("DT: RET\n"), 1);
        assert_eq!(error_count("V0: RET\n"), 1);
    }

    #[test]
    fn rejects_out_of_range_imm() {
        assert_eq!(error_count("\tLD V0, 256\n"), 1);
        assert_eq!(error_count("\tDRW V0, V1, 16\n"), 1);
        assert_eq!(error_count("\tdb 300\n"), 1);
        assert_eq!(error_count("\tJP 0x1000\n"), 1);
    }

    #[test]
    fn rejects_missing_db_operand() {
        assert_eq!(error_count("\tdb\n"), 1);
    }

    #[test]
    fn rejects_empty_define_body() {
        assert_eq!(error_count("%define EMPTY\nRET\n"), 1);
    }

    #[test]
    fn recovers_and_collects_errors() {
        // One bad statement must not hide errors on later lines.
        assert_eq!(error_count("\tLD V0, 256\n\tJP nowhere\n\tRET\n"), 2);
    }

    #[test]
    fn no_output_with_any_error() {
        assert!(assemble("\tRET\n\tLD V0, 999\n").is_err());
    }

    #[test]
    fn stops_at_error_limit() {
        // 12 bad lines, but the report list is capped at the limit plus
        // the abort notice.
        let src: &'static str = "\tLD V0, 256\n".repeat(12).leak();
        let n = error_count(src);
        assert_eq!(n, ERROR_LIMIT + 1);
    }

    #[test]
    fn macro_error_names_origin() {
        let errors = assemble("%define BIG 999\n\tLD V0, BIG\n").unwrap_err();
        let msg = format!("{}", errors[0]);
        assert!(msg.contains("macro 'BIG'"), "{msg}");
        assert!(msg.contains("line 1"), "{msg}");
    }

    #[test]
    fn statement_fields_recorded() {
        let (obj, errors) = AsmParser::new("\tSE VA, VB\n\tSYS 0x123\n").parse();
        assert!(errors.is_empty());
        assert_eq!(obj.len(), 2);
        let se = obj.get(0);
        assert_eq!((se.opcode, se.vx, se.vy), (0x5000, 0xA, 0xB));
        let sys = obj.get(1);
        assert_eq!((sys.opcode, sys.imm), (0x0000, 0x123));
    }

    #[test]
    fn assembly_round_trips_through_decoder() {
        use crate::chip8::Instruction;
        use crate::decoder::DecodedIns;

        let bytes = assemble_ok("\tSE V1, 0x20\n\tDRW VA, VB, 7\n\tADD I, V7\n");
        let words: Vec<u16> = bytes
            .chunks(2)
            .map(|c| (c[0] as u16) << 8 | c[1] as u16)
            .collect();

        let se = DecodedIns::new(words[0]);
        assert_eq!((se.kind, se.vx, se.byte), (Instruction::SeB, 1, 0x20));
        let drw = DecodedIns::new(words[1]);
        assert_eq!(
            (drw.kind, drw.vx, drw.vy, drw.nibble),
            (Instruction::Drw, 0xA, 0xB, 7)
        );
        let addi = DecodedIns::new(words[2]);
        assert_eq!((addi.kind, addi.vx), (Instruction::AddI, 7));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        assert_eq!(
            assemble_ok("; setup\n\n\tCLS ; wipe\n\n"),
            vec![0x00, 0xE0]
        );
    }

    #[test]
    fn source_without_trailing_newline() {
        assert_eq!(assemble_ok("\tRET"), vec![0x00, 0xEE]);
    }
}
