//! Generation context: owns the register and memory allocators and the
//! predicate mode, and emits mnemonic lines for the assembler.

use crate::asm::split_li;
use crate::error::Error;
use crate::heap::Heap;
use crate::isa::{reg_name, Op, Reg};
use crate::params::*;
use crate::regalloc::RegAlloc;
use crate::syntax::{X, Y};
use crate::tf18;
use std::convert::TryFrom;

const ZERO: Reg = ZERO_REG;

/// Pixels of margin left around a rotated plot so that any rotation of the
/// square stays inside the frame.
pub const ROTATION_MARGIN: f64 = 75.0;

/// `disp` lines per thread in the blank margin units above and below a plot.
pub const TOP_MARGIN_DISPS: usize = 208;

/// Logical view of an array in data memory. `shape` is always 2-D and
/// unpadded; the backing allocation covers the padded shape.
#[derive(Debug, PartialEq, Clone)]
pub struct Arr {
    pub size: usize,
    pub addr: usize,
    pub shape: Vec<usize>,
}

impl Arr {
    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    pub fn cols(&self) -> usize {
        self.shape[1]
    }

    pub fn padded(&self) -> (usize, usize) {
        (pad(self.rows()), pad(self.cols()))
    }

    pub fn padded_size(&self) -> usize {
        let (r, c) = self.padded();
        r * c
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    Reg(Reg),
    Mem(Arr),
    Real(f64),
}

/// Saved predicate state, see `Gen::pred_backup`.
#[must_use]
pub struct PredBackup {
    mode: bool,
    reg: Reg,
}

pub fn pad(dim: usize) -> usize {
    (dim + BLOCK_DIM - 1) / BLOCK_DIM * BLOCK_DIM
}

/// Element count and padded word count of a 2-D shape.
pub fn shape_words(shape: &[usize]) -> Result<(usize, usize), Error> {
    let too_large = || Error::UnsupportedShape(format!("shape {:?} is too large", shape));
    let size = shape[0].checked_mul(shape[1]).ok_or_else(too_large)?;
    let padded = |d: usize| d.checked_add(BLOCK_DIM - 1).map(|d| d / BLOCK_DIM * BLOCK_DIM);
    let words = padded(shape[0])
        .and_then(|r| padded(shape[1]).and_then(|c| r.checked_mul(c)))
        .and_then(|n| n.checked_mul(ELEM_WORDS))
        .ok_or_else(too_large)?;
    Ok((size, words))
}

/// Promotes 1-D shapes to a single row.
pub fn normalize_shape(shape: &[usize]) -> Result<Vec<usize>, Error> {
    match shape.len() {
        1 => Ok(vec![1, shape[0]]),
        2 => Ok(shape.to_vec()),
        n => Err(Error::UnsupportedShape(format!("{}-dimensional arrays", n))),
    }
}

/// Word address of the low half of element `e`. Eight consecutive elements
/// share sixteen words: their low halves, then their high halves.
pub fn elem_word(base: usize, e: usize) -> usize {
    base + 2 * e - e % BLOCK_DIM
}

fn log2(n: usize) -> u32 {
    n.trailing_zeros()
}

pub struct Gen {
    pub regs: RegAlloc,
    pub heap: Heap,
    pub pred: bool,
    pub single_out: bool,
    /// Frame-buffer base; the buffer occupies the words after the heap.
    pub frame_buffer: usize,
    coord_range: (f64, f64),
    out: Vec<String>,
}

impl Gen {
    pub fn new(config: &Config) -> Gen {
        Gen {
            regs: RegAlloc::new(config.num_registers),
            heap: Heap::new(config.mem_size),
            pred: false,
            single_out: config.single_out,
            frame_buffer: config.mem_size,
            coord_range: (0.0, PLOT_WIDTH as f64),
            out: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn lines(&self) -> &[String] {
        &self.out
    }

    pub fn into_asm(self) -> String {
        let mut s = self.out.join("\n");
        if !s.is_empty() {
            s.push('\n');
        }
        s
    }

    fn push(&mut self, line: String) {
        trace!("{}", line);
        self.out.push(line);
    }

    fn mnemonic(&self, op: Op) -> String {
        if self.pred && op.class().predicable() {
            format!("{}.p", op)
        } else {
            op.to_string()
        }
    }

    pub fn rrr(&mut self, op: Op, rd: Reg, rs1: Reg, rs2: Reg) {
        let line = format!("{} {}, {}, {}", self.mnemonic(op), reg_name(rd), reg_name(rs1), reg_name(rs2));
        self.push(line);
    }

    /// Two register operands: single-operand ops, comparisons and memory ops.
    pub fn rr(&mut self, op: Op, a: Reg, b: Reg) {
        let line = format!("{} {}, {}", self.mnemonic(op), reg_name(a), reg_name(b));
        self.push(line);
    }

    pub fn rri(&mut self, op: Op, rd: Reg, rs1: Reg, imm: u32) {
        let line = format!("{} {}, {}, {}", self.mnemonic(op), reg_name(rd), reg_name(rs1), imm);
        self.push(line);
    }

    /// One register and an immediate: `lui` and immediate comparisons.
    pub fn ri(&mut self, op: Op, r: Reg, imm: u32) {
        let line = format!("{} {}, {}", self.mnemonic(op), reg_name(r), imm);
        self.push(line);
    }

    pub fn disp(&mut self, r: Reg) {
        let line = format!("{} {}", Op::Disp, reg_name(r));
        self.push(line);
    }

    pub fn header(&mut self, blocks: usize) {
        debug!("unit {}: {} blocks", self.units(), blocks);
        self.push(format!("<{}, {}>", blocks, BLOCK_DIM));
    }

    /// Closes a generation unit. Registers, bindings and predicate mode do
    /// not survive it; memory does.
    pub fn end_unit(&mut self) {
        self.push(Op::Exit.to_string());
        self.regs.reset();
        self.pred = false;
    }

    pub fn units(&self) -> usize {
        self.out.iter().filter(|l| l.starts_with('<')).count()
    }

    pub fn set_coord_range(&mut self, min: f64, max: f64) {
        self.coord_range = (min, max);
    }

    /// Loads a tf18 constant into the top of `reg`.
    pub fn load_f(&mut self, reg: Reg, v: f64) {
        let line = format!("{} {}, {:#x}", self.mnemonic(Op::Lui), reg_name(reg), tf18::encode(v));
        self.push(line);
    }

    /// Materialises an unsigned 32-bit integer, with a single `addi` when it
    /// fits the immediate and a `lui` plus adjustments otherwise.
    pub fn load_int(&mut self, reg: Reg, v: usize) -> Result<(), Error> {
        let v = u32::try_from(v)
            .map_err(|_| Error::Runtime(format!("constant {} exceeds 32 bits", v)))?;
        if v <= 0x1fff {
            self.rri(Op::Addi, reg, ZERO, v);
            return Ok(());
        }
        let (high, adjust) = split_li(v);
        self.ri(Op::Lui, reg, high);
        for (op, imm) in adjust {
            if imm != 0 {
                self.rri(op, reg, reg, imm);
            }
        }
        Ok(())
    }

    /// `rd = rs + v` for any unsigned `v`.
    pub fn add_imm(&mut self, rd: Reg, rs: Reg, v: usize) -> Result<(), Error> {
        if v <= 0x1fff {
            if v != 0 || rd != rs {
                self.rri(Op::Addi, rd, rs, v as u32);
            }
            return Ok(());
        }
        let t = self.regs.alloc()?;
        self.load_int(t, v)?;
        self.rrr(Op::Add, rd, rs, t);
        self.regs.free(t);
        Ok(())
    }

    /// Float op against a constant operand.
    pub fn fimm(&mut self, op: Op, rd: Reg, rs: Reg, v: f64) -> Result<(), Error> {
        let t = self.regs.alloc()?;
        self.load_f(t, v);
        self.rrr(op, rd, rs, t);
        self.regs.free(t);
        Ok(())
    }

    /// Integer op against a constant, using shifts and masks for powers of two.
    pub fn int_imm(&mut self, op: Op, rd: Reg, rs: Reg, n: usize) -> Result<(), Error> {
        let pow2 = n.is_power_of_two();
        let (op, imm) = match op {
            Op::Divi if pow2 => (Op::Srli, log2(n) as usize),
            Op::Remi if pow2 => (Op::Andi, n - 1),
            Op::Muli if pow2 => (Op::Slli, log2(n) as usize),
            op => (op, n),
        };
        if imm > 0x1fff {
            return Err(Error::UnsupportedShape(format!("dimension {} is too large", n)));
        }
        self.rri(op, rd, rs, imm as u32);
        Ok(())
    }

    /// Affine map of `reg` from `[old_min, old_max]` onto `[new_min, new_max]`.
    pub fn change_scale(
        &mut self,
        reg: Reg,
        old_min: f64,
        old_max: f64,
        new_min: f64,
        new_max: f64,
    ) -> Result<(), Error> {
        if old_min != 0.0 {
            self.fimm(Op::Fsub, reg, reg, old_min)?;
        }
        let ratio = (new_max - new_min) / (old_max - old_min);
        if ratio != 1.0 {
            self.fimm(Op::Fmul, reg, reg, ratio)?;
        }
        if new_min != 0.0 {
            self.fimm(Op::Fadd, reg, reg, new_min)?;
        }
        Ok(())
    }

    /// Encodes the live predicate bit into a fresh register: 0 when set,
    /// 2 otherwise.
    pub fn pred_backup(&mut self) -> Result<PredBackup, Error> {
        let reg = self.regs.alloc()?;
        let mode = self.pred;
        self.pred = false;
        self.rri(Op::Addi, reg, ZERO, 2);
        self.pred = true;
        self.rri(Op::Addi, reg, ZERO, 0);
        self.pred = mode;
        Ok(PredBackup { mode, reg })
    }

    pub fn pred_restore(&mut self, backup: PredBackup) {
        self.pred = false;
        self.ri(Op::Slti, backup.reg, 1);
        self.regs.free(backup.reg);
        self.pred = backup.mode;
    }

    /// Global thread index scaled for element groups of `mult` lanes,
    /// cached per multiplier until the unit ends.
    pub fn index_into_reg(&mut self, mult: usize) -> Result<Reg, Error> {
        let key = format!("%idx{}", mult);
        if let Some(r) = self.regs.lookup(&key) {
            return Ok(r);
        }
        let r = self.fresh_index(mult)?;
        self.regs.bind(&key, r);
        Ok(r)
    }

    /// Like `index_into_reg` but uncached; the caller owns the register.
    pub fn fresh_index(&mut self, mult: usize) -> Result<Reg, Error> {
        let r = self.regs.alloc()?;
        self.rri(Op::Slli, r, BLOCK_IDX_REG, log2(BLOCK_DIM * mult));
        self.rrr(Op::Add, r, r, THREAD_IDX_REG);
        Ok(r)
    }

    /// Turns the linear element index in `lin` into the address of the
    /// element's low half.
    pub fn elem_addr(&mut self, lin: Reg, base: usize) -> Result<(), Error> {
        let t = self.regs.alloc()?;
        self.rri(Op::Andi, t, lin, (BLOCK_DIM - 1) as u32);
        self.rri(Op::Slli, lin, lin, 1);
        self.rrr(Op::Sub, lin, lin, t);
        self.regs.free(t);
        self.add_imm(lin, lin, base)
    }

    /// Reads both 9-bit halves of an element. `val` may equal `addr`.
    pub fn load_val(&mut self, val: Reg, addr: Reg) -> Result<(), Error> {
        let t = self.regs.alloc()?;
        let mode = self.pred;
        // Every lane computes the same high-half address.
        self.pred = false;
        self.rri(Op::Addi, t, addr, BLOCK_DIM as u32);
        self.pred = mode;
        self.rr(Op::Lw, t, t);
        self.rr(Op::Lw, val, addr);
        self.rri(Op::Slli, t, t, HALF_BITS);
        self.rrr(Op::Add, val, val, t);
        self.regs.free(t);
        Ok(())
    }

    /// Writes both 9-bit halves of `val`; `addr` is left unchanged.
    pub fn store_val(&mut self, val: Reg, addr: Reg) -> Result<(), Error> {
        let t = self.regs.alloc()?;
        self.rri(Op::Andi, t, val, (1 << HALF_BITS) - 1);
        self.rr(Op::Sw, t, addr);
        self.rri(Op::Srli, t, val, HALF_BITS);
        self.rri(Op::Addi, addr, addr, BLOCK_DIM as u32);
        self.rr(Op::Sw, t, addr);
        self.rri(Op::Subi, addr, addr, BLOCK_DIM as u32);
        self.regs.free(t);
        Ok(())
    }

    pub fn alloc_arr(&mut self, shape: &[usize]) -> Result<Arr, Error> {
        let shape = normalize_shape(shape)?;
        let (size, words) = shape_words(&shape)?;
        if size == 0 {
            return Err(Error::UnsupportedShape("empty array".to_string()));
        }
        let addr = self.heap.malloc(words)?;
        debug!("array {:?} at {} ({} words)", shape, addr, words);
        Ok(Arr { size, addr, shape })
    }

    pub fn free_arr(&mut self, arr: &Arr) -> Result<(), Error> {
        debug!("release array {:?} at {}", arr.shape, arr.addr);
        self.heap.free(arr.addr)
    }

    /// Forces a value into a register. Arrays qualify only with one element.
    pub fn to_reg(&mut self, v: &Value) -> Result<Reg, Error> {
        match v {
            Value::Reg(r) => Ok(*r),
            Value::Real(n) => {
                let r = self.regs.alloc()?;
                self.load_f(r, *n);
                Ok(r)
            }
            Value::Mem(arr) if arr.size == 1 => {
                let r = self.regs.alloc()?;
                self.load_int(r, arr.addr)?;
                self.load_val(r, r)?;
                Ok(r)
            }
            Value::Mem(arr) => Err(Error::UnsupportedShape(format!(
                "array of shape {:?} used as a scalar",
                arr.shape
            ))),
        }
    }

    /// Like `to_reg`, but never hands back a register owned by a binding.
    pub fn to_owned_reg(&mut self, v: &Value) -> Result<Reg, Error> {
        let r = self.to_reg(v)?;
        let bound = self.regs.lookup(X) == Some(r) || self.regs.lookup(Y) == Some(r);
        if !bound {
            return Ok(r);
        }
        let copy = self.regs.alloc()?;
        self.rrr(Op::Add, copy, r, ZERO);
        Ok(copy)
    }

    /// Pixel column of the current thread as a float in `[X_MIN, X_MAX]`.
    pub fn x_into_reg(&mut self) -> Result<Reg, Error> {
        if let Some(r) = self.regs.lookup(X) {
            return Ok(r);
        }
        let idx = self.index_into_reg(1)?;
        let r = self.regs.alloc()?;
        self.rri(Op::Andi, r, idx, (PLOT_WIDTH - 1) as u32);
        self.rr(Op::Cvtif, r, r);
        let (min, max) = self.coord_range;
        self.change_scale(r, min, max, X_MIN, X_MAX)?;
        self.regs.bind(X, r);
        Ok(r)
    }

    /// Pixel row of the current thread, bottom up, in `[Y_MIN, Y_MAX]`.
    pub fn y_into_reg(&mut self) -> Result<Reg, Error> {
        if let Some(r) = self.regs.lookup(Y) {
            return Ok(r);
        }
        let idx = self.index_into_reg(1)?;
        let r = self.regs.alloc()?;
        self.rri(Op::Srli, r, idx, log2(PLOT_WIDTH));
        self.rri(Op::Subi, r, r, PLOT_HEIGHT as u32);
        self.rrr(Op::Sub, r, ZERO, r);
        self.rr(Op::Cvtif, r, r);
        let (min, max) = self.coord_range;
        self.change_scale(r, min, max, Y_MIN, Y_MAX)?;
        self.regs.bind(Y, r);
        Ok(r)
    }

    /// Rotates `(x, y, z)` by the three angles into three new registers.
    pub fn rotate(&mut self, x: Reg, y: Reg, z: Reg, angles: [f64; 3]) -> Result<[Reg; 3], Error> {
        let (sx, cx) = angles[0].sin_cos();
        let (sy, cy) = angles[1].sin_cos();
        let (sz, cz) = angles[2].sin_cos();
        let rows = [
            [cy * cz, sx * sy * cz - cx * sz, cx * sy * cz + sx * sz],
            [cy * sz, sx * sy * sz + cx * cz, cx * sy * sz - sx * cz],
            [-sy, sx * cy, cx * cy],
        ];
        let tmp = self.regs.alloc()?;
        let mut out = [ZERO; 3];
        for (i, row) in rows.iter().enumerate() {
            let r = self.regs.alloc()?;
            self.load_f(r, row[0]);
            self.rrr(Op::Fmul, r, x, r);
            for (&src, &coeff) in [y, z].iter().zip(row[1..].iter()) {
                if coeff == 0.0 {
                    continue;
                }
                self.load_f(tmp, coeff);
                self.rrr(Op::Fmul, tmp, src, tmp);
                self.rrr(Op::Fadd, r, r, tmp);
            }
            out[i] = r;
        }
        self.regs.free(tmp);
        Ok(out)
    }

    /// Converts plot coordinates in `x` and `y` into a frame-buffer address.
    /// Clobbers `x` and `y`.
    pub fn float_coords_to_addr(&mut self, addr: Reg, x: Reg, y: Reg, fb: usize) -> Result<(), Error> {
        let (min, max) = self.coord_range;
        self.change_scale(x, X_MIN, X_MAX, min, max)?;
        self.change_scale(y, Y_MIN, Y_MAX, min, max)?;
        self.rr(Op::Cvtfi, x, x);
        self.rr(Op::Cvtfi, y, y);
        self.rri(Op::Subi, y, y, PLOT_HEIGHT as u32);
        self.rrr(Op::Sub, y, ZERO, y);
        self.rri(Op::Slli, addr, y, log2(PLOT_WIDTH));
        self.rrr(Op::Add, addr, addr, x);
        self.add_imm(addr, addr, fb)
    }

    /// Replaces an empty pixel with its first non-empty neighbour to the
    /// left, above, or above-left.
    pub fn interpolate(&mut self, val: Reg, addr: Reg) -> Result<(), Error> {
        let backup = self.pred_backup()?;
        let t = self.regs.alloc()?;
        self.rr(Op::Seq, val, ZERO);
        for &offset in &[1, PLOT_WIDTH, PLOT_WIDTH + 1] {
            self.pred = false;
            self.rri(Op::Subi, t, addr, offset as u32);
            self.pred = true;
            self.rr(Op::Lw, val, t);
            if offset != PLOT_WIDTH + 1 {
                self.rr(Op::Seq, val, ZERO);
            }
        }
        self.pred_restore(backup);
        self.regs.free(t);
        Ok(())
    }

    /// A unit of `disp zero` lines filling whole screen rows.
    pub fn blank_rows(&mut self, blocks: usize, per_thread: usize) {
        self.header(blocks);
        for _ in 0..per_thread {
            self.disp(ZERO);
        }
        self.end_unit();
    }

    /// Zeroes the frame buffer at `fb`; 64 words per thread.
    pub fn clear_frame_buffer(&mut self, fb: usize) -> Result<(), Error> {
        const WORDS_PER_THREAD: usize = 64;
        self.header(PLOT_WIDTH * PLOT_HEIGHT / (BLOCK_DIM * WORDS_PER_THREAD));
        let addr = self.fresh_index(WORDS_PER_THREAD)?;
        self.add_imm(addr, addr, fb)?;
        for _ in 0..WORDS_PER_THREAD {
            self.rr(Op::Sw, ZERO, addr);
            self.rri(Op::Addi, addr, addr, BLOCK_DIM as u32);
        }
        self.end_unit();
        Ok(())
    }

    /// Streams the frame buffer to the screen, framed by blank margins.
    pub fn display_frame_buffer(&mut self, fb: usize) -> Result<(), Error> {
        let lanes = NUM_THREADS * BLOCK_DIM;
        let margin_rows = (SCREEN_HEIGHT - PLOT_HEIGHT) / 2;
        let margin_blocks = margin_rows * SCREEN_WIDTH / (BLOCK_DIM * TOP_MARGIN_DISPS);
        let side = (SCREEN_WIDTH - PLOT_WIDTH) / 2 / lanes;

        self.blank_rows(margin_blocks, TOP_MARGIN_DISPS);

        self.header(PLOT_HEIGHT * NUM_THREADS);
        for _ in 0..side {
            self.disp(ZERO);
        }
        let addr = self.regs.alloc()?;
        let col = self.regs.alloc()?;
        let val = self.regs.alloc()?;
        self.rri(Op::Andi, col, BLOCK_IDX_REG, (NUM_THREADS - 1) as u32);
        self.rri(Op::Slli, col, col, log2(BLOCK_DIM));
        self.rrr(Op::Add, col, col, THREAD_IDX_REG);
        self.rri(Op::Srli, addr, BLOCK_IDX_REG, log2(NUM_THREADS));
        self.rri(Op::Slli, addr, addr, log2(PLOT_WIDTH));
        self.rrr(Op::Add, addr, addr, col);
        self.regs.free(col);
        self.add_imm(addr, addr, fb)?;
        for i in 0..PLOT_WIDTH / lanes {
            if i > 0 {
                self.rri(Op::Addi, addr, addr, lanes as u32);
            }
            self.rr(Op::Lw, val, addr);
            self.interpolate(val, addr)?;
            self.disp(val);
        }
        for _ in 0..side {
            self.disp(ZERO);
        }
        self.end_unit();

        self.blank_rows(margin_blocks, TOP_MARGIN_DISPS);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;

    fn gen() -> Gen {
        Gen::new(&Config::default())
    }

    #[test]
    fn test_element_layout() {
        assert_eq!(elem_word(0, 0), 0);
        assert_eq!(elem_word(0, 7), 7);
        assert_eq!(elem_word(0, 8), 16);
        assert_eq!(elem_word(100, 9), 117);
        assert_eq!(pad(1), 8);
        assert_eq!(pad(8), 8);
        assert_eq!(pad(9), 16);
    }

    #[test]
    fn test_predicate_suffix() {
        let mut g = gen();
        g.pred = true;
        g.rrr(Op::Fadd, 4, 5, 6);
        g.disp(4);
        g.ri(Op::Lui, 4, 3);
        assert_eq!(g.lines(), &["fadd.p r4, r5, r6", "disp r4", "lui.p r4, 3"]);
    }

    #[test]
    fn test_unit_boundary_resets_registers() {
        let mut g = gen();
        g.header(7);
        let r = g.regs.alloc().unwrap();
        g.regs.bind("%idx1", r);
        g.pred = true;
        g.end_unit();
        assert!(!g.pred);
        assert_eq!(g.regs.num_free(), NUM_GP_REGS);
        assert_eq!(g.regs.lookup("%idx1"), None);
        assert_eq!(g.lines(), &["<7, 8>", "exit"]);
        assert_eq!(assemble(&g.into_asm()).unwrap(), vec![0xa000_0007, 0xe000_1c00]);
    }

    #[test]
    fn test_predicate_backup_restore() {
        let mut g = gen();
        g.pred = true;
        let b = g.pred_backup().unwrap();
        assert!(g.pred);
        g.pred_restore(b);
        assert!(g.pred);
        assert_eq!(
            g.lines(),
            &["addi r4, zero, 2", "addi.p r4, zero, 0", "slti r4, 1"]
        );
        assert_eq!(g.regs.num_free(), NUM_GP_REGS);
    }

    #[test]
    fn test_load_int() {
        let mut g = gen();
        g.load_int(4, 5).unwrap();
        g.load_int(5, 100000).unwrap();
        g.load_int(6, 0x6000).unwrap();
        g.load_int(7, 0x4000).unwrap();
        g.load_int(8, 0x7fff).unwrap();
        assert_eq!(
            g.lines(),
            &[
                "addi r4, zero, 5",
                "lui r5, 6",
                "addi r5, r5, 1696",
                "lui r6, 1",
                "addi r6, r6, 4096",
                "addi r6, r6, 4096",
                "lui r7, 1",
                "lui r8, 2",
                "subi r8, r8, 1",
            ]
        );
        assert!(assemble(&g.into_asm()).is_ok());
    }

    #[test]
    fn test_load_int_rejects_wide_constants() {
        let mut g = gen();
        g.load_int(4, 0xffff_ffff).unwrap();
        assert_eq!(g.lines(), &["lui r4, 0", "subi r4, r4, 1"]);
        assert!(g.load_int(4, 1 << 32).is_err());
    }

    #[test]
    fn test_oversized_shapes_are_rejected() {
        let mut g = gen();
        for shape in [[1usize << 40, 1 << 40], [1, usize::max_value() - 2]].iter() {
            match g.alloc_arr(shape) {
                Err(Error::UnsupportedShape(_)) => (),
                other => panic!("{:?}", other),
            }
        }
        assert_eq!(shape_words(&[9, 2]).unwrap(), (18, 16 * 8 * 2));
    }

    #[test]
    fn test_index_cache_is_per_multiplier() {
        let mut g = gen();
        let a = g.index_into_reg(1).unwrap();
        let b = g.index_into_reg(2).unwrap();
        assert_ne!(a, b);
        assert_eq!(g.index_into_reg(1).unwrap(), a);
        assert_eq!(
            g.lines(),
            &[
                "slli r4, %blockidx, 3",
                "add r4, r4, %threadidx",
                "slli r5, %blockidx, 4",
                "add r5, r5, %threadidx",
            ]
        );
    }

    #[test]
    fn test_int_imm_uses_shifts_for_powers_of_two() {
        let mut g = gen();
        g.int_imm(Op::Divi, 4, 5, 16).unwrap();
        g.int_imm(Op::Remi, 4, 5, 16).unwrap();
        g.int_imm(Op::Divi, 4, 5, 24).unwrap();
        assert_eq!(g.lines(), &["srli r4, r5, 4", "andi r4, r5, 15", "divi r4, r5, 24"]);
        assert!(g.int_imm(Op::Muli, 4, 5, 10000).is_err());
    }

    #[test]
    fn test_load_val_keeps_high_half_address_unpredicated() {
        let mut g = gen();
        g.pred = true;
        g.load_val(5, 5).unwrap();
        assert_eq!(
            g.lines(),
            &[
                "addi r4, r5, 8",
                "lw.p r4, r4",
                "lw.p r5, r5",
                "slli.p r4, r4, 9",
                "add.p r5, r5, r4",
            ]
        );
    }

    #[test]
    fn test_to_reg_of_constant_loads_tf18() {
        let mut g = gen();
        let r = g.to_reg(&Value::Real(1.0)).unwrap();
        assert_eq!(r, 4);
        assert_eq!(g.lines(), &["lui r4, 0xfc00"]);
        let arr = Arr { size: 3, addr: 0, shape: vec![1, 3] };
        match g.to_reg(&Value::Mem(arr)) {
            Err(Error::UnsupportedShape(_)) => (),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_arrays_are_padded() {
        let mut g = gen();
        let a = g.alloc_arr(&[3]).unwrap();
        assert_eq!(a.shape, vec![1, 3]);
        assert_eq!(a.padded(), (8, 8));
        assert_eq!(g.heap.block_size(a.addr), Some(128));
        let b = g.alloc_arr(&[9, 2]).unwrap();
        assert_eq!(b.addr, 128);
        assert_eq!(g.heap.block_size(b.addr), Some(16 * 8 * 2));
        assert!(g.alloc_arr(&[2, 2, 2]).is_err());
    }

    #[test]
    fn test_display_units_assemble() {
        let mut g = gen();
        g.clear_frame_buffer(0).unwrap();
        g.display_frame_buffer(0).unwrap();
        assert_eq!(g.units(), 4);
        let words = assemble(&g.into_asm()).unwrap();
        assert_eq!(words[0], 0xa000_0000 | 512);
        assert_eq!(words.iter().filter(|&&w| w == 0xe000_1c00).count(), 4);
    }
}
