//! Diagnostic constructors for the assembler.
//!
//! Every reportable condition gets its own function so call sites stay
//! small. Messages lead with the token's own `line:column` so the text
//! stays greppable even without the source snippet; tokens that came out
//! of a macro expansion name the macro and its definition site.

use miette::{miette, LabeledSpan, Report, Severity};

use crate::lexer::{Token, TokenKind};

/// `Line 4:9 ERROR on [Imm, 300]`, plus the macro trail if there is one.
fn describe(tok: &Token) -> String {
    let mut at = format!("Line {}:{} ERROR on {}", tok.pos.line, tok.pos.col, tok);
    if let Some(origin) = tok.origin {
        at.push_str(&format!(
            " (expanded from macro '{}' defined on line {})",
            origin.name, origin.def_line
        ));
    }
    at
}

// Lexical errors

pub fn invalid_token(tok: &Token, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::invalid",
        help = "immediates are decimal (optionally signed) or unsigned 0x/0b/0o \
                and must fit the host integer; '%' only introduces %define.",
        labels = vec![LabeledSpan::at(tok.span, "invalid token")],
        "{}: Invalid token or numeric literal.",
        describe(tok),
    )
    .with_source_code(src)
}

// Syntactic errors

pub fn expected_token(expected: &str, found: &Token, src: &'static str) -> Report {
    if found.kind == TokenKind::Eof {
        return unexpected_eof(expected, src);
    }
    if found.kind == TokenKind::Invalid {
        return invalid_token(found, src);
    }
    miette!(
        severity = Severity::Error,
        code = "parse::unexpected_token",
        help = "statements are `[label:] instruction|directive` followed by a newline.",
        labels = vec![LabeledSpan::at(found.span, "unexpected token")],
        "{}: Expected {}.",
        describe(found),
        expected,
    )
    .with_source_code(src)
}

pub fn unexpected_eof(expected: &str, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::unexpected_eof",
        help = "the last statement may be missing operands or its newline.",
        labels = vec![LabeledSpan::at_offset(
            src.len().saturating_sub(1),
            "input ends here"
        )],
        "Unexpected end of input, expected {}.",
        expected,
    )
    .with_source_code(src)
}

pub fn unexpected_operand(tok: &Token, src: &'static str) -> Report {
    if tok.kind == TokenKind::Invalid {
        return invalid_token(tok, src);
    }
    miette!(
        severity = Severity::Error,
        code = "parse::operand",
        help = "no operand form of this instruction accepts that token; \
                check the instruction's format.",
        labels = vec![LabeledSpan::at(tok.span, "unexpected operand")],
        "{}: No instruction matches these operands.",
        describe(tok),
    )
    .with_source_code(src)
}

pub fn empty_define_body(name: &Token, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::define",
        help = "%define takes a name and a substitution body on the same line.",
        labels = vec![LabeledSpan::at(name.span, "macro has no body")],
        "{}: Missing substitution body after %define.",
        describe(name),
    )
    .with_source_code(src)
}

// Semantic errors

pub fn imm_out_of_range(tok: &Token, bits: u32, src: &'static str) -> Report {
    let umax = (1u32 << bits) - 1;
    let smin = -(1i32 << (bits - 1));
    miette!(
        severity = Severity::Error,
        code = "parse::imm_range",
        help = format!("this operand is a {bits}-bit field: {smin}..={umax}"),
        labels = vec![LabeledSpan::at(tok.span, "out-of-range immediate")],
        "{}: Immediate out of range.",
        describe(tok),
    )
    .with_source_code(src)
}

pub fn duplicate_label(tok: &Token, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::duplicate_label",
        help = "each label may be defined only once per file.",
        labels = vec![LabeledSpan::at(tok.span, "duplicate label")],
        "{}: Duplicate label definition.",
        describe(tok),
    )
    .with_source_code(src)
}

pub fn label_not_found(tok: &Token, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::label_not_found",
        help = "labels must be defined somewhere in the file with `name:`.",
        labels = vec![LabeledSpan::at(tok.span, "unresolved label")],
        "{}: Label not found.",
        describe(tok),
    )
    .with_source_code(src)
}

pub fn reserved_label(tok: &Token, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::reserved_label",
        help = "instruction mnemonics, V registers, and the special \
                registers I, DT, ST, K, F, B cannot be labels.",
        labels = vec![LabeledSpan::at(tok.span, "reserved name")],
        "{}: Reserved name cannot be used as a label.",
        describe(tok),
    )
    .with_source_code(src)
}

// Fatal

pub fn too_many_errors(limit: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::too_many_errors",
        "Too many errors ({limit}), stopping assembly.",
    )
}
