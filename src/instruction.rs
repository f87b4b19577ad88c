use std::fmt;

use serde::{Deserialize, Serialize};

/// Redcode operation codes (ICWS-94 without P-space).
///
/// `CMP` is accepted by the compiler as an alias of `SEQ`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Dat,
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Jmp,
    Jmz,
    Jmn,
    Djn,
    Spl,
    Seq,
    Sne,
    Slt,
    Nop,
}

impl Opcode {
    pub const ALL: [Opcode; 16] = [
        Opcode::Dat,
        Opcode::Mov,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Jmp,
        Opcode::Jmz,
        Opcode::Jmn,
        Opcode::Djn,
        Opcode::Spl,
        Opcode::Seq,
        Opcode::Sne,
        Opcode::Slt,
        Opcode::Nop,
    ];

    /// Look up a mnemonic, ignoring case.
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        let op = match s.to_ascii_uppercase().as_str() {
            "DAT" => Opcode::Dat,
            "MOV" => Opcode::Mov,
            "ADD" => Opcode::Add,
            "SUB" => Opcode::Sub,
            "MUL" => Opcode::Mul,
            "DIV" => Opcode::Div,
            "MOD" => Opcode::Mod,
            "JMP" => Opcode::Jmp,
            "JMZ" => Opcode::Jmz,
            "JMN" => Opcode::Jmn,
            "DJN" => Opcode::Djn,
            "SPL" => Opcode::Spl,
            "CMP" | "SEQ" => Opcode::Seq,
            "SNE" => Opcode::Sne,
            "SLT" => Opcode::Slt,
            "NOP" => Opcode::Nop,
            _ => return None,
        };
        Some(op)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Dat => "DAT",
            Opcode::Mov => "MOV",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Jmp => "JMP",
            Opcode::Jmz => "JMZ",
            Opcode::Jmn => "JMN",
            Opcode::Djn => "DJN",
            Opcode::Spl => "SPL",
            Opcode::Seq => "SEQ",
            Opcode::Sne => "SNE",
            Opcode::Slt => "SLT",
            Opcode::Nop => "NOP",
        }
    }
}

/// Selects which fields of the source and destination an opcode touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modifier {
    /// A-field to A-field.
    A,
    /// B-field to B-field.
    B,
    /// A-field to B-field.
    AB,
    /// B-field to A-field.
    BA,
    /// Both fields, A to A and B to B.
    F,
    /// Both fields crossed, A to B and B to A.
    X,
    /// The whole instruction.
    I,
}

impl Modifier {
    pub const ALL: [Modifier; 7] = [
        Modifier::A,
        Modifier::B,
        Modifier::AB,
        Modifier::BA,
        Modifier::F,
        Modifier::X,
        Modifier::I,
    ];

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        let m = match s.to_ascii_uppercase().as_str() {
            "A" => Modifier::A,
            "B" => Modifier::B,
            "AB" => Modifier::AB,
            "BA" => Modifier::BA,
            "F" => Modifier::F,
            "X" => Modifier::X,
            "I" => Modifier::I,
            _ => return None,
        };
        Some(m)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Modifier::A => "A",
            Modifier::B => "B",
            Modifier::AB => "AB",
            Modifier::BA => "BA",
            Modifier::F => "F",
            Modifier::X => "X",
            Modifier::I => "I",
        }
    }

    /// The ICWS-94 default modifier for an instruction written without one.
    pub fn default_for(opcode: Opcode, a_mode: AddressMode, b_mode: AddressMode) -> Self {
        let a_imm = a_mode == AddressMode::Immediate;
        let b_imm = b_mode == AddressMode::Immediate;
        match opcode {
            Opcode::Dat | Opcode::Nop => Modifier::F,
            Opcode::Mov | Opcode::Seq | Opcode::Sne => {
                if a_imm {
                    Modifier::AB
                } else if b_imm {
                    Modifier::B
                } else {
                    Modifier::I
                }
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                if a_imm {
                    Modifier::AB
                } else if b_imm {
                    Modifier::B
                } else {
                    Modifier::F
                }
            }
            Opcode::Slt => {
                if a_imm {
                    Modifier::AB
                } else {
                    Modifier::B
                }
            }
            Opcode::Jmp | Opcode::Jmz | Opcode::Jmn | Opcode::Djn | Opcode::Spl => Modifier::B,
        }
    }
}

/// Operand addressing modes.
///
/// `@ < >` follow the pointer cell's B-field, `* { }` its A-field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressMode {
    Immediate,
    Direct,
    AIndirect,
    BIndirect,
    APredecrement,
    BPredecrement,
    APostincrement,
    BPostincrement,
}

impl AddressMode {
    pub const ALL: [AddressMode; 8] = [
        AddressMode::Immediate,
        AddressMode::Direct,
        AddressMode::AIndirect,
        AddressMode::BIndirect,
        AddressMode::APredecrement,
        AddressMode::BPredecrement,
        AddressMode::APostincrement,
        AddressMode::BPostincrement,
    ];

    pub fn from_symbol(c: char) -> Option<Self> {
        let mode = match c {
            '#' => AddressMode::Immediate,
            '$' => AddressMode::Direct,
            '*' => AddressMode::AIndirect,
            '@' => AddressMode::BIndirect,
            '{' => AddressMode::APredecrement,
            '<' => AddressMode::BPredecrement,
            '}' => AddressMode::APostincrement,
            '>' => AddressMode::BPostincrement,
            _ => return None,
        };
        Some(mode)
    }

    pub fn symbol(self) -> char {
        match self {
            AddressMode::Immediate => '#',
            AddressMode::Direct => '$',
            AddressMode::AIndirect => '*',
            AddressMode::BIndirect => '@',
            AddressMode::APredecrement => '{',
            AddressMode::BPredecrement => '<',
            AddressMode::APostincrement => '}',
            AddressMode::BPostincrement => '>',
        }
    }
}

/// A single Redcode instruction.
///
/// In a compiled warrior the values are relative offsets of any sign. Once
/// loaded into a [`Core`](crate::memory::Core) every value is normalized into
/// `0..core_size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub modifier: Modifier,
    pub a_mode: AddressMode,
    pub a_value: i64,
    pub b_mode: AddressMode,
    pub b_value: i64,
}

impl Default for Instruction {
    /// `DAT.F $0, $0`, the contents of an empty core cell.
    fn default() -> Self {
        Self {
            opcode: Opcode::Dat,
            modifier: Modifier::F,
            a_mode: AddressMode::Direct,
            a_value: 0,
            b_mode: AddressMode::Direct,
            b_value: 0,
        }
    }
}

impl Instruction {
    pub fn new(
        opcode: Opcode,
        modifier: Modifier,
        (a_mode, a_value): (AddressMode, i64),
        (b_mode, b_value): (AddressMode, i64),
    ) -> Self {
        Self {
            opcode,
            modifier,
            a_mode,
            a_value,
            b_mode,
            b_value,
        }
    }

    /// Append a fixed 12-byte encoding of this instruction to `out`.
    ///
    /// Values are written as little-endian u32 after reduction modulo 2^32,
    /// which is lossless for normalized core cells.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode as u8);
        out.push(self.modifier as u8);
        out.push(self.a_mode as u8);
        out.push(self.b_mode as u8);
        out.extend_from_slice(&(self.a_value as u32).to_le_bytes());
        out.extend_from_slice(&(self.b_value as u32).to_le_bytes());
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} {}{}, {}{}",
            self.opcode.mnemonic(),
            self.modifier.mnemonic(),
            self.a_mode.symbol(),
            self.a_value,
            self.b_mode.symbol(),
            self.b_value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AddressMode::*;

    #[test]
    fn test_default_is_dat_f() {
        let ins = Instruction::default();
        assert_eq!(ins.to_string(), "DAT.F $0, $0");
    }

    #[test]
    fn test_mnemonics_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
        for m in Modifier::ALL {
            assert_eq!(Modifier::from_mnemonic(m.mnemonic()), Some(m));
        }
        for mode in AddressMode::ALL {
            assert_eq!(AddressMode::from_symbol(mode.symbol()), Some(mode));
        }
    }

    #[test]
    fn test_cmp_is_seq() {
        assert_eq!(Opcode::from_mnemonic("cmp"), Some(Opcode::Seq));
        assert_eq!(Opcode::from_mnemonic("Seq"), Some(Opcode::Seq));
        assert_eq!(Opcode::from_mnemonic("LDP"), None);
    }

    #[test]
    fn test_default_modifier_table() {
        use Modifier as M;
        use Opcode as O;
        assert_eq!(M::default_for(O::Dat, Immediate, Immediate), M::F);
        assert_eq!(M::default_for(O::Nop, Direct, Direct), M::F);

        for op in [O::Mov, O::Seq, O::Sne] {
            assert_eq!(M::default_for(op, Immediate, Direct), M::AB);
            assert_eq!(M::default_for(op, Immediate, Immediate), M::AB);
            assert_eq!(M::default_for(op, Direct, Immediate), M::B);
            assert_eq!(M::default_for(op, BIndirect, BPredecrement), M::I);
        }
        for op in [O::Add, O::Sub, O::Mul, O::Div, O::Mod] {
            assert_eq!(M::default_for(op, Immediate, Direct), M::AB);
            assert_eq!(M::default_for(op, Direct, Immediate), M::B);
            assert_eq!(M::default_for(op, Direct, Direct), M::F);
        }
        assert_eq!(M::default_for(O::Slt, Immediate, Direct), M::AB);
        assert_eq!(M::default_for(O::Slt, Direct, Immediate), M::B);
        assert_eq!(M::default_for(O::Slt, Direct, Direct), M::B);
        for op in [O::Jmp, O::Jmz, O::Jmn, O::Djn, O::Spl] {
            assert_eq!(M::default_for(op, Immediate, Immediate), M::B);
            assert_eq!(M::default_for(op, Direct, Direct), M::B);
        }
    }

    #[test]
    fn test_display() {
        let ins = Instruction::new(Opcode::Mov, Modifier::I, (BPredecrement, -3), (APostincrement, 7));
        assert_eq!(ins.to_string(), "MOV.I <-3, }7");
    }

    #[test]
    fn test_encoding_is_fixed_width() {
        let mut buf = Vec::new();
        Instruction::default().encode_into(&mut buf);
        Instruction::new(Opcode::Spl, Modifier::B, (Immediate, 7999), (Direct, 1)).encode_into(&mut buf);
        assert_eq!(buf.len(), 24);
        assert_eq!(&buf[16..20], &7999u32.to_le_bytes());
    }
}
