use crate::error::Error;
use crate::isa::*;
use combine::error::ParseError;
use combine::parser::char::char;
use combine::stream::Stream;
use combine::{eof, many1, satisfy, sep_end_by, skip_many, Parser};
use std::io::Write;

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '%' || c == '.'
}

fn is_separator(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\r' || c == ',' || c == '(' || c == ')'
}

fn is_valid_char(c: char) -> bool {
    is_word_char(c) || is_separator(c) || c == '<' || c == '>'
}

fn separators<I>() -> impl Parser<Input = I, Output = ()>
where
    I: Stream<Item = char>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    skip_many(satisfy(is_separator))
}

fn lex_word<I>() -> impl Parser<Input = I, Output = String>
where
    I: Stream<Item = char>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    many1(satisfy(is_word_char))
        .map(|w: String| w.to_ascii_lowercase())
        .or(char('<').or(char('>')).map(|c: char| c.to_string()))
}

/// Splits one source line into lower-cased tokens. Everything after `#` is a
/// comment; `<` and `>` always stand alone.
pub fn tokenize(line: &str) -> Result<Vec<String>, Error> {
    let code = match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    };
    if let Some(c) = code.chars().find(|&c| !is_valid_char(c)) {
        return Err(Error::InvalidCharacter(c));
    }
    let mut toks = separators()
        .with(sep_end_by(lex_word(), separators()))
        .skip(eof());
    match toks.easy_parse(code) {
        Ok((tokens, _)) => Ok(tokens),
        Err(e) => Err(Error::Parse(format!("{}", e))),
    }
}

/// Pulls operands off a tokenized line in order.
struct Operands<'a> {
    op: &'a str,
    toks: &'a [String],
    pos: usize,
}

impl<'a> Operands<'a> {
    fn next(&mut self) -> Result<&'a str, Error> {
        match self.toks.get(self.pos) {
            Some(tok) => {
                self.pos += 1;
                Ok(tok.as_str())
            }
            None => Err(Error::MissingOperand(self.op.to_string())),
        }
    }

    fn reg(&mut self) -> Result<Reg, Error> {
        parse_reg(self.next()?)
    }

    fn imm(&mut self) -> Result<u32, Error> {
        parse_imm(self.next()?)
    }

    fn finish(&self) -> Result<(), Error> {
        match self.toks.get(self.pos) {
            Some(tok) => Err(Error::invalid_operand(tok, "too many operands")),
            None => Ok(()),
        }
    }
}

fn head(class: Class, pred: bool) -> u32 {
    let opc = class.opc().unwrap_or(0);
    (opc << OPC_SHIFT) | ((pred as u32) << PRED_BIT)
}

fn func(op: Op) -> u32 {
    op.func5().unwrap_or(0) << FUNC_SHIFT
}

fn fields(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    ((rs2 as u32 & REG_MASK) << RS2_SHIFT)
        | ((rs1 as u32 & REG_MASK) << RS1_SHIFT)
        | (rd as u32 & REG_MASK)
}

/// R and F layout.
pub fn encode_r(op: Op, pred: bool, rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    head(op.class(), pred) | func(op) | fields(rd, rs1, rs2)
}

/// I layout; the immediate is truncated to 13 bits.
pub fn encode_i(op: Op, pred: bool, rd: Reg, rs1: Reg, imm: u32) -> u32 {
    head(Class::I, pred) | ((imm & I_IMM_MASK) << I_IMM_SHIFT) | func(op) | fields(rd, rs1, 0)
}

/// `lui`: the 18-bit immediate lands in the top of `rd`.
pub fn encode_u(pred: bool, rd: Reg, imm: u32) -> u32 {
    let imm = imm & U_IMM_MASK;
    head(Class::U, pred)
        | ((imm & 0x3ffe0) << 10)
        | func(Op::Lui)
        | ((imm & 0x1f) << RS1_SHIFT)
        | (rd as u32 & REG_MASK)
}

fn control(op: Op) -> u32 {
    head(Class::C, false) | (op.func3().unwrap_or(0) << FUNC_SHIFT)
}

// The low target bits sit at [9:0], below func3 at [12:10].
fn branch_target(tok: &str, target: u32, high_mask: u32) -> Result<(u32, u32), Error> {
    if target & 0x3 != 0 {
        return Err(Error::invalid_operand(tok, "branch target must be word aligned"));
    }
    let high = target >> 12;
    if high & !high_mask != 0 {
        return Err(Error::invalid_operand(tok, "branch target out of range"));
    }
    Ok(((target >> 2) & C_LOW_MASK, high))
}

/// Splits a 32-bit constant into the `lui` immediate and the immediate
/// adjustments that complete it. When bit 13 is set the upper part is
/// rounded up and the excess taken back with `subi`, since neither
/// adjustment can carry more than 13 bits.
pub fn split_li(value: u32) -> (u32, Vec<(Op, u32)>) {
    let high = value >> 14;
    let low = value & 0x3fff;
    if low <= I_IMM_MASK {
        (high, vec![(Op::Addi, low)])
    } else if low == I_IMM_MASK + 1 {
        (high, vec![(Op::Addi, 0x1000), (Op::Addi, 0x1000)])
    } else {
        ((high + 1) & U_IMM_MASK, vec![(Op::Subi, 0x4000 - low)])
    }
}

fn encode_instr(op: Op, pred: bool, name: &str, toks: &[String]) -> Result<Vec<u32>, Error> {
    let class = op.class();
    if pred && !class.predicable() {
        return Err(Error::invalid_operand(name, "instruction cannot be predicated"));
    }
    let mut ops = Operands { op: name, toks, pos: 0 };
    let words = match class {
        Class::R | Class::F => {
            let (rd, rs1, rs2) = if op.sets_predicate() {
                (0, ops.reg()?, ops.reg()?)
            } else if op.single_operand() {
                (ops.reg()?, ops.reg()?, 0)
            } else {
                (ops.reg()?, ops.reg()?, ops.reg()?)
            };
            vec![encode_r(op, pred, rd, rs1, rs2)]
        }
        Class::I => {
            let rd = if op.sets_predicate() { 0 } else { ops.reg()? };
            let rs1 = ops.reg()?;
            let imm = ops.imm()?;
            if imm > I_IMM_MASK {
                warn!("{}: immediate {:#x} truncated to 13 bits", name, imm);
            }
            vec![encode_i(op, pred, rd, rs1, imm)]
        }
        Class::U => {
            let rd = ops.reg()?;
            let imm = ops.imm()?;
            if imm > U_IMM_MASK {
                warn!("{}: immediate {:#x} truncated to 18 bits", name, imm);
            }
            vec![encode_u(pred, rd, imm)]
        }
        Class::M => {
            let (r, func1) = match op {
                Op::Lw => (ops.reg()?, 0b00),
                Op::Sw => (ops.reg()? << RS2_SHIFT, 0b01),
                _ => (ops.reg()? << RS2_SHIFT, 0b11),
            };
            let rs1 = ops.reg()?;
            vec![head(class, pred) | (func1 << FUNC_SHIFT) | ((rs1 as u32) << RS1_SHIFT) | r as u32]
        }
        Class::D => vec![head(class, false) | ((ops.reg()? as u32) << RS1_SHIFT)],
        Class::C => {
            let word = match op {
                Op::Jump | Op::Branch => {
                    let tok = ops.next()?;
                    let (low, high) = branch_target(tok, parse_imm(tok)?, C_HIGH_MASK)?;
                    control(op) | (high << C_HIGH_SHIFT) | low
                }
                Op::Call => {
                    let rd = ops.reg()?;
                    let tok = ops.next()?;
                    let target = parse_imm(tok)?;
                    if target & 0x3 != 0 || target >> 2 > C_HIGH_MASK {
                        return Err(Error::invalid_operand(tok, "call target out of range"));
                    }
                    let rs1 = ops.reg()?;
                    control(op) | ((target >> 2) << C_HIGH_SHIFT) | fields(rd, rs1, 0)
                }
                Op::Ret => control(op) | ((ops.reg()? as u32) << RS1_SHIFT),
                _ => control(op),
            };
            vec![word]
        }
        Class::P => match op {
            Op::Li => {
                let rd = ops.reg()?;
                let (high, adjust) = split_li(ops.imm()?);
                let mut words = vec![encode_u(pred, rd, high)];
                words.extend(adjust.into_iter().map(|(op, imm)| encode_i(op, pred, rd, rd, imm)));
                words
            }
            // An all-zero word, predicated or not.
            _ => vec![0],
        },
    };
    ops.finish()?;
    Ok(words)
}

/// Encodes one tokenized line into zero or more words.
pub fn encode_line(tokens: &[String]) -> Result<Vec<u32>, Error> {
    let (first, rest) = match tokens.split_first() {
        Some(split) => split,
        None => return Ok(vec![]),
    };
    if first == "<" {
        return Ok(vec![KernelHeader::parse(rest)?.encode()]);
    }
    let (name, pred) = if first.ends_with(".p") {
        (&first[..first.len() - 2], true)
    } else {
        (first.as_str(), false)
    };
    match Op::from_mnemonic(name) {
        Some(op) => encode_instr(op, pred, first, rest),
        None => Err(Error::UnknownOpcode(first.to_string())),
    }
}

pub fn assemble(src: &str) -> Result<Vec<u32>, Error> {
    let mut words = Vec::new();
    for (i, line) in src.lines().enumerate() {
        let encoded = tokenize(line)
            .and_then(|toks| encode_line(&toks))
            .map_err(|e| e.at_line(i + 1))?;
        for w in &encoded {
            trace!("{:4}: {:08x}  {}", i + 1, w, line.trim());
        }
        words.extend(encoded);
    }
    info!("assembled {} words", words.len());
    Ok(words)
}

pub fn write_bin<W: Write>(out: &mut W, words: &[u32]) -> Result<(), Error> {
    for w in words {
        out.write_all(&w.to_le_bytes())?;
    }
    Ok(())
}

pub fn write_hex<W: Write>(out: &mut W, words: &[u32]) -> Result<(), Error> {
    for w in words {
        writeln!(out, "{:08x}", w)?;
    }
    Ok(())
}
