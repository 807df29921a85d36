//! The instruction set: operations, instruction classes, function codes,
//! register names and the kernel-header directive.

use crate::error::Error;
use crate::params::{BLOCK_DIM_REG, BLOCK_IDX_REG, REG_FILE_SIZE, THREAD_IDX_REG, ZERO_REG};
use std::fmt;

pub type Reg = usize;

pub const OPC_SHIFT: u32 = 29;
pub const PRED_BIT: u32 = 28;
pub const FUNC_SHIFT: u32 = 10;
pub const RS2_SHIFT: u32 = 15;
pub const RS1_SHIFT: u32 = 5;
pub const REG_MASK: u32 = 0x1f;
pub const I_IMM_SHIFT: u32 = 15;
pub const I_IMM_MASK: u32 = 0x1fff;
pub const U_IMM_MASK: u32 = 0x3ffff;
pub const C_LOW_MASK: u32 = 0x3ff;
pub const C_HIGH_SHIFT: u32 = 13;
pub const C_HIGH_MASK: u32 = 0x7fff;

/// Bits [31:29] value reserved for kernel headers.
pub const HEADER_CLASS: u32 = 0b101;
pub const HEADER_COUNT_MASK: u32 = 0x0fff_ffff;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Class {
    R,
    I,
    U,
    F,
    M,
    D,
    C,
    P,
}

impl Class {
    /// Opcode class field. Pseudo instructions have none; they expand into
    /// instructions of other classes.
    pub fn opc(self) -> Option<u32> {
        match self {
            Class::R => Some(0b000),
            Class::I => Some(0b001),
            Class::U => Some(0b010),
            Class::F => Some(0b011),
            Class::M => Some(0b100),
            Class::D => Some(0b110),
            Class::C => Some(0b111),
            Class::P => None,
        }
    }

    pub fn predicable(self) -> bool {
        match self {
            Class::D | Class::C => false,
            _ => true,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Abs,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sra,
    Slt,
    Seq,
    Addi,
    Subi,
    Muli,
    Divi,
    Remi,
    Andi,
    Ori,
    Xori,
    Slli,
    Srli,
    Srai,
    Slti,
    Seqi,
    Lui,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fabs,
    Frcp,
    Fsqrt,
    Frsqrt,
    Fsin,
    Fcos,
    Flog,
    Fexp,
    Fslt,
    Fseq,
    Cvtif,
    Cvtfi,
    Cvtfr,
    Cvtfc,
    Lw,
    Sw,
    Spix,
    Disp,
    Jump,
    Branch,
    Call,
    Ret,
    Sync,
    Exit,
    Li,
    Nop,
}

impl Op {
    pub const ALL: &'static [Op] = &[
        Op::Add, Op::Sub, Op::Mul, Op::Div, Op::Rem, Op::Abs, Op::And, Op::Or,
        Op::Xor, Op::Sll, Op::Srl, Op::Sra, Op::Slt, Op::Seq,
        Op::Addi, Op::Subi, Op::Muli, Op::Divi, Op::Remi, Op::Andi, Op::Ori,
        Op::Xori, Op::Slli, Op::Srli, Op::Srai, Op::Slti, Op::Seqi,
        Op::Lui,
        Op::Fadd, Op::Fsub, Op::Fmul, Op::Fdiv, Op::Fabs, Op::Frcp, Op::Fsqrt,
        Op::Frsqrt, Op::Fsin, Op::Fcos, Op::Flog, Op::Fexp, Op::Fslt, Op::Fseq,
        Op::Cvtif, Op::Cvtfi, Op::Cvtfr, Op::Cvtfc,
        Op::Lw, Op::Sw, Op::Spix,
        Op::Disp,
        Op::Jump, Op::Branch, Op::Call, Op::Ret, Op::Sync, Op::Exit,
        Op::Li, Op::Nop,
    ];

    pub fn from_mnemonic(name: &str) -> Option<Op> {
        Op::ALL.iter().cloned().find(|op| op.mnemonic() == name)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Rem => "rem",
            Op::Abs => "abs",
            Op::And => "and",
            Op::Or => "or",
            Op::Xor => "xor",
            Op::Sll => "sll",
            Op::Srl => "srl",
            Op::Sra => "sra",
            Op::Slt => "slt",
            Op::Seq => "seq",
            Op::Addi => "addi",
            Op::Subi => "subi",
            Op::Muli => "muli",
            Op::Divi => "divi",
            Op::Remi => "remi",
            Op::Andi => "andi",
            Op::Ori => "ori",
            Op::Xori => "xori",
            Op::Slli => "slli",
            Op::Srli => "srli",
            Op::Srai => "srai",
            Op::Slti => "slti",
            Op::Seqi => "seqi",
            Op::Lui => "lui",
            Op::Fadd => "fadd",
            Op::Fsub => "fsub",
            Op::Fmul => "fmul",
            Op::Fdiv => "fdiv",
            Op::Fabs => "fabs",
            Op::Frcp => "frcp",
            Op::Fsqrt => "fsqrt",
            Op::Frsqrt => "frsqrt",
            Op::Fsin => "fsin",
            Op::Fcos => "fcos",
            Op::Flog => "flog",
            Op::Fexp => "fexp",
            Op::Fslt => "fslt",
            Op::Fseq => "fseq",
            Op::Cvtif => "cvtif",
            Op::Cvtfi => "cvtfi",
            Op::Cvtfr => "cvtfr",
            Op::Cvtfc => "cvtfc",
            Op::Lw => "lw",
            Op::Sw => "sw",
            Op::Spix => "spix",
            Op::Disp => "disp",
            Op::Jump => "jump",
            Op::Branch => "branch",
            Op::Call => "call",
            Op::Ret => "ret",
            Op::Sync => "sync",
            Op::Exit => "exit",
            Op::Li => "li",
            Op::Nop => "nop",
        }
    }

    pub fn class(self) -> Class {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Rem | Op::Abs | Op::And
            | Op::Or | Op::Xor | Op::Sll | Op::Srl | Op::Sra | Op::Slt | Op::Seq => Class::R,
            Op::Addi | Op::Subi | Op::Muli | Op::Divi | Op::Remi | Op::Andi | Op::Ori
            | Op::Xori | Op::Slli | Op::Srli | Op::Srai | Op::Slti | Op::Seqi => Class::I,
            Op::Lui => Class::U,
            Op::Fadd | Op::Fsub | Op::Fmul | Op::Fdiv | Op::Fabs | Op::Frcp | Op::Fsqrt
            | Op::Frsqrt | Op::Fsin | Op::Fcos | Op::Flog | Op::Fexp | Op::Fslt
            | Op::Fseq | Op::Cvtif | Op::Cvtfi | Op::Cvtfr | Op::Cvtfc => Class::F,
            Op::Lw | Op::Sw | Op::Spix => Class::M,
            Op::Disp => Class::D,
            Op::Jump | Op::Branch | Op::Call | Op::Ret | Op::Sync | Op::Exit => Class::C,
            Op::Li | Op::Nop => Class::P,
        }
    }

    /// The 5-bit function code of R, I, U and F instructions. The same code
    /// names unrelated operations in the integer and float families.
    pub fn func5(self) -> Option<u32> {
        let code = match self {
            Op::Add | Op::Addi | Op::Fadd => 0b00000,
            Op::Sub | Op::Subi | Op::Fsub => 0b00001,
            Op::Mul | Op::Muli | Op::Fmul => 0b00010,
            Op::Div | Op::Divi | Op::Fdiv => 0b00100,
            Op::Rem | Op::Remi => 0b00101,
            Op::Abs | Op::Fabs => 0b00110,
            Op::And | Op::Andi | Op::Frcp => 0b00111,
            Op::Or | Op::Ori | Op::Fsqrt => 0b01000,
            Op::Xor | Op::Xori | Op::Frsqrt => 0b01001,
            Op::Sll | Op::Slli | Op::Fsin => 0b01010,
            Op::Srl | Op::Srli | Op::Fcos => 0b01011,
            Op::Sra | Op::Srai | Op::Flog => 0b01100,
            Op::Fexp => 0b01101,
            Op::Cvtif => 0b10000,
            Op::Cvtfi => 0b10001,
            Op::Cvtfr => 0b10010,
            Op::Cvtfc => 0b10011,
            Op::Slt | Op::Slti | Op::Fslt => 0b11100,
            Op::Seq | Op::Seqi | Op::Fseq => 0b11101,
            Op::Lui => 0b11111,
            Op::Lw | Op::Sw | Op::Spix | Op::Disp | Op::Jump | Op::Branch | Op::Call
            | Op::Ret | Op::Sync | Op::Exit | Op::Li | Op::Nop => return None,
        };
        Some(code)
    }

    /// The 3-bit function code of control instructions.
    pub fn func3(self) -> Option<u32> {
        match self {
            Op::Jump => Some(0b000),
            Op::Branch => Some(0b001),
            Op::Call => Some(0b010),
            Op::Ret => Some(0b011),
            Op::Sync => Some(0b110),
            Op::Exit => Some(0b111),
            _ => None,
        }
    }

    /// Comparisons write the predicate flag instead of a destination register.
    pub fn sets_predicate(self) -> bool {
        match self {
            Op::Slt | Op::Slti | Op::Seq | Op::Seqi | Op::Fslt | Op::Fseq => true,
            _ => false,
        }
    }

    /// Operations encoded without an rs2 field.
    pub fn single_operand(self) -> bool {
        match self {
            Op::Abs | Op::Fabs | Op::Frcp | Op::Fsqrt | Op::Frsqrt | Op::Fsin | Op::Fcos
            | Op::Flog | Op::Fexp | Op::Cvtif | Op::Cvtfi | Op::Cvtfr | Op::Cvtfc => true,
            _ => false,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

pub fn reg_name(reg: Reg) -> String {
    match reg {
        ZERO_REG => "zero".to_string(),
        BLOCK_IDX_REG => "%blockidx".to_string(),
        BLOCK_DIM_REG => "%blockdim".to_string(),
        THREAD_IDX_REG => "%threadidx".to_string(),
        n => format!("r{}", n),
    }
}

pub fn parse_reg(token: &str) -> Result<Reg, Error> {
    let lower = token.to_ascii_lowercase();
    match lower.as_str() {
        "zero" => return Ok(ZERO_REG),
        "%blockidx" => return Ok(BLOCK_IDX_REG),
        "%blockdim" => return Ok(BLOCK_DIM_REG),
        "%threadidx" => return Ok(THREAD_IDX_REG),
        _ => {}
    }
    if !lower.starts_with('r') {
        return Err(Error::invalid_operand(token, "register name must start with 'r'"));
    }
    let digits = &lower[1..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::invalid_operand(token, "expected a register number"));
    }
    match digits.parse::<usize>() {
        Ok(n) if n < REG_FILE_SIZE => Ok(n),
        _ => Err(Error::invalid_operand(token, "register number out of range")),
    }
}

/// Decimal or `0x`-prefixed hexadecimal literal.
pub fn parse_imm(token: &str) -> Result<u32, Error> {
    let lower = token.to_ascii_lowercase();
    let parsed = if lower.starts_with("0x") {
        u32::from_str_radix(&lower[2..], 16)
    } else {
        lower.parse::<u32>()
    };
    parsed.map_err(|_| Error::invalid_operand(token, "expected an unsigned 32-bit integer"))
}

/// `<blocks, blockdim>` launch directive. Only the block count is encoded;
/// the block dimension is informational.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct KernelHeader {
    pub blocks: u32,
    pub block_dim: Option<u32>,
}

impl KernelHeader {
    /// Parses the tokens between `<` and `>`, the closing bracket included.
    pub fn parse(tokens: &[String]) -> Result<KernelHeader, Error> {
        let (last, inner) = match tokens.split_last() {
            Some(split) => split,
            None => return Err(Error::MissingOperand("<".to_string())),
        };
        if last != ">" {
            return Err(Error::invalid_operand(last, "kernel header must end with '>'"));
        }
        let blocks = match inner.first() {
            Some(tok) => parse_imm(tok)?,
            None => return Err(Error::MissingOperand("<".to_string())),
        };
        if blocks > HEADER_COUNT_MASK {
            return Err(Error::invalid_operand(&inner[0], "block count does not fit in 28 bits"));
        }
        let block_dim = match inner.get(1) {
            Some(tok) => Some(parse_imm(tok)?),
            None => None,
        };
        if inner.len() > 2 {
            return Err(Error::invalid_operand(&inner[2], "unexpected token in kernel header"));
        }
        Ok(KernelHeader { blocks, block_dim })
    }

    pub fn encode(&self) -> u32 {
        (HEADER_CLASS << OPC_SHIFT) | (self.blocks & HEADER_COUNT_MASK)
    }
}

impl fmt::Display for KernelHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.block_dim {
            Some(dim) => write!(f, "<{}, {}>", self.blocks, dim),
            None => write!(f, "<{}>", self.blocks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &[&str]) -> Vec<String> {
        s.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_mnemonics_are_unique() {
        for op in Op::ALL {
            assert_eq!(Op::from_mnemonic(op.mnemonic()), Some(*op));
        }
        assert_eq!(Op::from_mnemonic("bogus"), None);
    }

    #[test]
    fn test_function_codes_shared_across_families() {
        assert_eq!(Op::And.func5(), Op::Frcp.func5());
        assert_eq!(Op::Andi.func5(), Op::Frcp.func5());
        assert_eq!(Op::Slt.func5(), Op::Fslt.func5());
        assert_eq!(Op::Lui.func5(), Some(0b11111));
        assert_ne!(Op::And.class(), Op::Frcp.class());
    }

    #[test]
    fn test_every_arith_op_has_a_function_code() {
        for op in Op::ALL {
            match op.class() {
                Class::R | Class::I | Class::U | Class::F => assert!(op.func5().is_some(), "{}", op),
                Class::C => assert!(op.func3().is_some(), "{}", op),
                _ => assert!(op.func5().is_none(), "{}", op),
            }
        }
    }

    #[test]
    fn test_only_display_and_control_are_unpredicable() {
        assert!(!Class::D.predicable());
        assert!(!Class::C.predicable());
        assert!(Class::M.predicable());
        assert!(Class::P.predicable());
    }

    #[test]
    fn test_parse_reg() {
        assert_eq!(parse_reg("zero").unwrap(), 0);
        assert_eq!(parse_reg("%BlockIdx").unwrap(), 1);
        assert_eq!(parse_reg("%blockdim").unwrap(), 2);
        assert_eq!(parse_reg("%threadidx").unwrap(), 3);
        assert_eq!(parse_reg("r31").unwrap(), 31);
        assert_eq!(parse_reg("R7").unwrap(), 7);
        assert!(parse_reg("r32").is_err());
        assert!(parse_reg("x4").is_err());
        assert!(parse_reg("r").is_err());
        assert!(parse_reg("r1a").is_err());
    }

    #[test]
    fn test_parse_imm() {
        assert_eq!(parse_imm("100000").unwrap(), 100000);
        assert_eq!(parse_imm("0x1f").unwrap(), 31);
        assert_eq!(parse_imm("0XFF").unwrap(), 255);
        assert!(parse_imm("abc").is_err());
        assert!(parse_imm("4294967296").is_err());
    }

    #[test]
    fn test_header_ignores_block_dim() {
        let a = KernelHeader::parse(&toks(&["7", "8", ">"])).unwrap();
        let b = KernelHeader::parse(&toks(&["7", "64", ">"])).unwrap();
        assert_eq!(a.encode(), 0xa000_0007);
        assert_eq!(a.encode(), b.encode());
        assert_eq!(a.to_string(), "<7, 8>");
    }

    #[test]
    fn test_header_errors() {
        assert!(KernelHeader::parse(&toks(&["7", "8"])).is_err());
        assert!(KernelHeader::parse(&toks(&[">"])).is_err());
        assert!(KernelHeader::parse(&toks(&["0x10000000", ">"])).is_err());
    }
}
