//! Instruction decoding for the interpreter.

use std::fmt::{self, Write as _};

use crate::chip8::{Instruction, REGISTERS, VX_OFFSET, VY_OFFSET};

/// A 16-bit opcode word split into its instruction kind and every operand
/// field. All fields are extracted up front; only the ones the kind uses
/// are meaningful.
///
/// Encoding formats (MSB left):
/// ```text
/// oooo xxxx yyyy oooo
/// oooo aaaa aaaa aaaa
/// oooo xxxx oooo oooo
/// oooo xxxx bbbb bbbb
/// oooo xxxx yyyy nnnn
/// ```
/// Symbols: `x` Vx, `y` Vy, `o` opcode, `a` address, `b` byte, `n` nibble.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DecodedIns {
    pub kind: Instruction,
    pub bincode: u16,
    pub addr: u16,
    pub vx: u8,
    pub vy: u8,
    pub byte: u8,
    pub nibble: u8,
}

fn get_bits(word: u16, offset: u16, n: u16) -> u16 {
    (word >> offset) & ((1 << n) - 1)
}

impl DecodedIns {
    pub fn new(ins: u16) -> Self {
        use Instruction as I;

        // Table-driven subdispatch for the 0x8xyN group, N = 0..7.
        const X8_MAP: [Instruction; 8] = [
            I::LdV,
            I::Or,
            I::And,
            I::Xor,
            I::AddV,
            I::Sub,
            I::Shr,
            I::Subn,
        ];

        let vx = get_bits(ins, VX_OFFSET, 4) as u8;
        let vy = get_bits(ins, VY_OFFSET, 4) as u8;
        let addr = get_bits(ins, 0, 12);
        let byte = get_bits(ins, 0, 8) as u8;
        let nibble = get_bits(ins, 0, 4) as u8;

        let kind = match get_bits(ins, 12, 4) {
            0x0 => match ins {
                0x00E0 => I::Cls,
                0x00EE => I::Ret,
                _ => I::Sys,
            },
            0x1 => I::Jp,
            0x2 => I::Call,
            0x3 => I::SeB,
            0x4 => I::SneB,
            0x5 => I::SeV,
            0x6 => I::LdB,
            0x7 => I::AddB,
            0x8 => match nibble {
                0x0..=0x7 => X8_MAP[nibble as usize],
                0xE => I::Shl,
                _ => I::Illegal,
            },
            0x9 => I::SneV,
            0xA => I::LdI,
            0xB => I::JpV0,
            0xC => I::Rnd,
            0xD => I::Drw,
            0xE => match byte {
                0x9E => I::Skp,
                0xA1 => I::Sknp,
                _ => I::Illegal,
            },
            0xF => match byte {
                0x07 => I::LdVDt,
                0x0A => I::LdVKey,
                0x15 => I::LdDtV,
                0x18 => I::LdStV,
                0x1E => I::AddI,
                0x29 => I::LdFont,
                0x33 => I::LdBcd,
                0x55 => I::StoreRegs,
                0x65 => I::LoadRegs,
                _ => I::Illegal,
            },
            _ => unreachable!("4-bit nibble"),
        };

        DecodedIns {
            kind,
            bincode: ins,
            addr,
            vx,
            vy,
            byte,
            nibble,
        }
    }
}

/// Renders the canonical assembly form with operand values substituted,
/// e.g. `0xD125` displays as `DRW V1, V2, 5`.
impl fmt::Display for DecodedIns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == Instruction::Illegal {
            return write!(f, "<! DECODING ERROR !>");
        }
        // Mnemonics are uppercase, so the lowercase class letters in the
        // format are exactly the operand slots.
        let mut vregs = [self.vx, self.vy].into_iter();
        for c in self.kind.format().chars() {
            match c {
                'a' => write!(f, "{:#05X}", self.addr)?,
                'b' => write!(f, "{}", self.byte)?,
                'n' => write!(f, "{}", self.nibble)?,
                'v' => {
                    let r = vregs.next().unwrap_or_default();
                    f.write_str(REGISTERS[r as usize])?;
                }
                _ => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chip8::OPCODES;

    #[test]
    fn decodes_operand_fields() {
        let ins = DecodedIns::new(0xD125);
        assert_eq!(ins.kind, Instruction::Drw);
        assert_eq!((ins.vx, ins.vy, ins.nibble), (1, 2, 5));

        let ins = DecodedIns::new(0x6A42);
        assert_eq!(ins.kind, Instruction::LdB);
        assert_eq!((ins.vx, ins.byte), (0xA, 0x42));

        let ins = DecodedIns::new(0x1456);
        assert_eq!(ins.kind, Instruction::Jp);
        assert_eq!(ins.addr, 0x456);
    }

    #[test]
    fn zero_group_dispatch() {
        assert_eq!(DecodedIns::new(0x00E0).kind, Instruction::Cls);
        assert_eq!(DecodedIns::new(0x00EE).kind, Instruction::Ret);
        // Anything else in the 0x0 group is SYS, ignored at execution.
        assert_eq!(DecodedIns::new(0x0123).kind, Instruction::Sys);
    }

    #[test]
    fn alu_group_dispatch() {
        assert_eq!(DecodedIns::new(0x8120).kind, Instruction::LdV);
        assert_eq!(DecodedIns::new(0x8124).kind, Instruction::AddV);
        assert_eq!(DecodedIns::new(0x8126).kind, Instruction::Shr);
        assert_eq!(DecodedIns::new(0x812E).kind, Instruction::Shl);
        assert_eq!(DecodedIns::new(0x8128).kind, Instruction::Illegal);
        assert_eq!(DecodedIns::new(0x812F).kind, Instruction::Illegal);
    }

    #[test]
    fn key_and_timer_dispatch() {
        assert_eq!(DecodedIns::new(0xE29E).kind, Instruction::Skp);
        assert_eq!(DecodedIns::new(0xE2A1).kind, Instruction::Sknp);
        assert_eq!(DecodedIns::new(0xE200).kind, Instruction::Illegal);
        assert_eq!(DecodedIns::new(0xF255).kind, Instruction::StoreRegs);
        assert_eq!(DecodedIns::new(0xF265).kind, Instruction::LoadRegs);
        assert_eq!(DecodedIns::new(0xF2FF).kind, Instruction::Illegal);
    }

    #[test]
    fn accepted_words_reencode() {
        // For every word the decoder accepts, ORing the operand slots back
        // into the base opcode reproduces the word.
        for word in [
            0x00E0, 0x00EE, 0x0333, 0x1FFF, 0x2204, 0x3A55, 0x4001, 0x5120,
            0x6b77, 0x7f01, 0x8ab0, 0x8ab1, 0x8ab2, 0x8ab3, 0x8ab4, 0x8ab5,
            0x8ab6, 0x8ab7, 0x8abE, 0x9120, 0xA123, 0xB001, 0xC2F0, 0xD01F,
            0xE19E, 0xE1A1, 0xF107, 0xF10A, 0xF115, 0xF118, 0xF11E, 0xF129,
            0xF133, 0xF155, 0xF165,
        ] {
            let ins = DecodedIns::new(word);
            assert_ne!(ins.kind, Instruction::Illegal, "{word:#06X}");
            let mut reencoded = OPCODES[ins.kind as usize];
            match ins.kind {
                Instruction::Cls | Instruction::Ret => {}
                Instruction::Sys
                | Instruction::Jp
                | Instruction::Call
                | Instruction::LdI
                | Instruction::JpV0 => reencoded |= ins.addr,
                Instruction::SeB
                | Instruction::SneB
                | Instruction::LdB
                | Instruction::AddB
                | Instruction::Rnd => {
                    reencoded |= (ins.vx as u16) << VX_OFFSET | ins.byte as u16
                }
                Instruction::Drw => {
                    reencoded |= (ins.vx as u16) << VX_OFFSET
                        | (ins.vy as u16) << VY_OFFSET
                        | ins.nibble as u16
                }
                Instruction::SeV
                | Instruction::SneV
                | Instruction::LdV
                | Instruction::Or
                | Instruction::And
                | Instruction::Xor
                | Instruction::AddV
                | Instruction::Sub
                | Instruction::Subn
                | Instruction::Shr
                | Instruction::Shl => {
                    reencoded |= (ins.vx as u16) << VX_OFFSET
                        | (ins.vy as u16) << VY_OFFSET
                }
                _ => reencoded |= (ins.vx as u16) << VX_OFFSET,
            }
            assert_eq!(reencoded, word, "{word:#06X}");
        }
    }

    #[test]
    fn renders_assembly_form() {
        assert_eq!(DecodedIns::new(0xD125).to_string(), "DRW V1, V2, 5");
        assert_eq!(DecodedIns::new(0x6A42).to_string(), "LD VA, 66");
        assert_eq!(DecodedIns::new(0xA123).to_string(), "LD I, 0x123");
        assert_eq!(DecodedIns::new(0xF265).to_string(), "LD V2, [I]");
        assert_eq!(DecodedIns::new(0x812F).to_string(), "<! DECODING ERROR !>");
    }
}
