pub mod chip8;
pub mod error;
pub mod term;

pub mod parser;
pub use parser::AsmParser;

pub mod obj;
pub use obj::ObjCode;

pub mod decoder;
pub use decoder::DecodedIns;

pub mod emulator;
pub use emulator::Emulator;

pub mod lexer;
pub mod matcher;
