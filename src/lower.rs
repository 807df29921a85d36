//! Walks checked statements and drives `Gen` to produce generation units.

use crate::codegen::{
    elem_word, normalize_shape, pad, shape_words, Arr, Gen, Value, ROTATION_MARGIN,
};
use crate::error::Error;
use crate::isa::{Op, Reg};
use crate::params::*;
use crate::syntax::{BinaryOp, Expr, Stmt, UnaryOp, X, Y};
use std::collections::HashMap;

const ZERO: Reg = ZERO_REG;

/// Colour index written for axis pixels by `.plotx`.
const AXIS_COLOUR: u32 = 0;
const CURVE_COLOUR: u32 = 200;

fn float_op(op: BinaryOp) -> Result<Op, Error> {
    match op {
        BinaryOp::Add => Ok(Op::Fadd),
        BinaryOp::Sub => Ok(Op::Fsub),
        BinaryOp::Mul => Ok(Op::Fmul),
        BinaryOp::Div => Ok(Op::Fdiv),
        BinaryOp::Dot => Err(Error::UnsupportedShape("dot of scalars".to_string())),
    }
}

fn fold_binary(op: BinaryOp, a: f64, b: f64) -> Result<f64, Error> {
    match op {
        BinaryOp::Add => Ok(a + b),
        BinaryOp::Sub => Ok(a - b),
        BinaryOp::Mul => Ok(a * b),
        BinaryOp::Div => Ok(a / b),
        BinaryOp::Dot => Err(Error::UnsupportedShape("dot of scalars".to_string())),
    }
}

fn fold_unary(op: UnaryOp, v: f64) -> Result<f64, Error> {
    match op {
        UnaryOp::Neg => Ok(-v),
        UnaryOp::Sqrt => Ok(v.sqrt()),
        UnaryOp::Exp => Ok(v.exp()),
        UnaryOp::Sin => Ok(v.sin()),
        UnaryOp::Cos => Ok(v.cos()),
        UnaryOp::Relu => Ok(v.max(0.0)),
        UnaryOp::Transpose => Err(Error::UnsupportedShape("transpose of a scalar".to_string())),
    }
}

fn outside_unit() -> Error {
    Error::Runtime("register operand outside a generation unit".to_string())
}

/// `out = op(src)`; `out` may equal `src`.
fn unary_reg(g: &mut Gen, op: UnaryOp, out: Reg, src: Reg) -> Result<(), Error> {
    match op {
        UnaryOp::Neg => g.rrr(Op::Fsub, out, ZERO, src),
        UnaryOp::Sqrt => g.rr(Op::Fsqrt, out, src),
        UnaryOp::Exp => g.rr(Op::Fexp, out, src),
        UnaryOp::Sin | UnaryOp::Cos => {
            g.rr(Op::Cvtfr, out, src);
            let f = if op == UnaryOp::Sin { Op::Fsin } else { Op::Fcos };
            g.rr(f, out, out);
        }
        UnaryOp::Relu => {
            let backup = g.pred_backup()?;
            if out != src {
                g.rrr(Op::Add, out, src, ZERO);
            }
            g.rr(Op::Fslt, out, ZERO);
            g.pred = true;
            g.ri(Op::Lui, out, 0);
            g.pred_restore(backup);
        }
        UnaryOp::Transpose => {
            return Err(Error::UnsupportedShape("transpose of a scalar".to_string()))
        }
    }
    Ok(())
}

pub struct Lower {
    gen: Gen,
    vars: HashMap<String, Value>,
}

impl Lower {
    pub fn new(config: &Config) -> Lower {
        Lower {
            gen: Gen::new(config),
            vars: HashMap::new(),
        }
    }

    pub fn into_asm(self) -> String {
        self.gen.into_asm()
    }

    fn lookup(&self, name: &str) -> Result<Value, Error> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Semantic(format!("${} is used before it is assigned", name)))
    }

    fn is_variable(&self, arr: &Arr) -> bool {
        self.vars.values().any(|v| match v {
            Value::Mem(a) => a.addr == arr.addr,
            _ => false,
        })
    }

    fn release_temp(&mut self, arr: &Arr) -> Result<(), Error> {
        if self.is_variable(arr) {
            return Ok(());
        }
        self.gen.free_arr(arr)
    }

    pub fn stmt(&mut self, stmt: &Stmt) -> Result<(), Error> {
        debug!("lowering {}", stmt);
        match stmt {
            Stmt::Assign(name, e) => {
                let v = self.array_expr(e)?;
                if let Value::Reg(_) = v {
                    return Err(Error::Runtime(format!(
                        "${} would hold a register outside a generation unit",
                        name
                    )));
                }
                if let Some(Value::Mem(old)) = self.vars.insert(name.clone(), v) {
                    if !self.is_variable(&old) {
                        self.gen.free_arr(&old)?;
                    }
                }
                Ok(())
            }
            Stmt::Plot { var, min, max } => self.plot(var, *min, *max),
            Stmt::PlotX(body) => self.plot_x(body),
            Stmt::PlotXY { angles, body } => self.plot_xy(*angles, body),
            Stmt::PlotXYSimple { min, max, body } => self.plot_xy_simple(*min, *max, body),
        }
    }

    // Top-level expressions: scalars fold, arrays get their own units.

    fn array_expr(&mut self, e: &Expr) -> Result<Value, Error> {
        match e {
            Expr::Var(name) => self.lookup(name),
            Expr::Const(n) => Ok(Value::Real(*n)),
            Expr::Array { shape, values } => Ok(Value::Mem(self.array_literal(shape, values)?)),
            Expr::Binary(op, lhs, rhs) => {
                let l = self.array_expr(lhs)?;
                let r = self.array_expr(rhs)?;
                self.array_binary(*op, l, r)
            }
            Expr::Unary(op, e) => {
                let v = self.array_expr(e)?;
                match v {
                    Value::Real(n) => Ok(Value::Real(fold_unary(*op, n)?)),
                    Value::Mem(a) => {
                        let out = if *op == UnaryOp::Transpose {
                            self.transpose(&a)?
                        } else {
                            self.map_unary(*op, &a)?
                        };
                        self.release_temp(&a)?;
                        Ok(Value::Mem(out))
                    }
                    Value::Reg(_) => Err(outside_unit()),
                }
            }
        }
    }

    fn array_binary(&mut self, op: BinaryOp, l: Value, r: Value) -> Result<Value, Error> {
        let out = match (&l, &r) {
            (Value::Real(a), Value::Real(b)) => return Ok(Value::Real(fold_binary(op, *a, *b)?)),
            (Value::Mem(a), Value::Mem(b)) if op == BinaryOp::Dot => self.dot(a, b)?,
            (Value::Mem(a), Value::Mem(b)) => self.elementwise(op, a, b)?,
            (Value::Mem(a), Value::Real(v)) => self.broadcast(op, a, *v, false)?,
            (Value::Real(v), Value::Mem(a)) => self.broadcast(op, a, *v, true)?,
            _ => return Err(outside_unit()),
        };
        for v in &[l, r] {
            if let Value::Mem(a) = v {
                self.release_temp(a)?;
            }
        }
        Ok(Value::Mem(out))
    }

    /// One block; thread 0 writes every element in turn.
    fn array_literal(&mut self, shape: &[usize], values: &[f64]) -> Result<Arr, Error> {
        let shape = normalize_shape(shape)?;
        let (size, _) = shape_words(&shape)?;
        if size != values.len() {
            return Err(Error::MismatchedShape(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                size,
                values.len()
            )));
        }
        let arr = self.gen.alloc_arr(&shape)?;
        let (_, cp) = arr.padded();
        let g = &mut self.gen;
        g.header(1);
        g.ri(Op::Seqi, THREAD_IDX_REG, 0);
        g.pred = true;
        let addr = g.regs.alloc()?;
        let v = g.regs.alloc()?;
        let mut cur = arr.addr;
        g.load_int(addr, cur)?;
        for (i, &n) in values.iter().enumerate() {
            let w = elem_word(arr.addr, i / arr.cols() * cp + i % arr.cols());
            g.add_imm(addr, addr, w - cur)?;
            cur = w;
            g.load_f(v, n);
            g.store_val(v, addr)?;
        }
        g.end_unit();
        Ok(arr)
    }

    fn elementwise(&mut self, op: BinaryOp, a: &Arr, b: &Arr) -> Result<Arr, Error> {
        if a.shape != b.shape {
            return Err(Error::MismatchedShape(format!("{:?} {} {:?}", a.shape, op, b.shape)));
        }
        let fop = float_op(op)?;
        let out = self.gen.alloc_arr(&a.shape)?;
        let g = &mut self.gen;
        g.header(out.padded_size() / BLOCK_DIM);
        let idx = g.fresh_index(ELEM_WORDS)?;
        let pa = g.regs.alloc()?;
        g.add_imm(pa, idx, a.addr)?;
        let pb = g.regs.alloc()?;
        g.add_imm(pb, idx, b.addr)?;
        g.add_imm(idx, idx, out.addr)?;
        g.load_val(pa, pa)?;
        g.load_val(pb, pb)?;
        g.rrr(fop, pa, pa, pb);
        g.regs.free(pb);
        g.store_val(pa, idx)?;
        g.end_unit();
        Ok(out)
    }

    fn broadcast(&mut self, op: BinaryOp, a: &Arr, n: f64, scalar_first: bool) -> Result<Arr, Error> {
        let fop = float_op(op)?;
        let out = self.gen.alloc_arr(&a.shape)?;
        let g = &mut self.gen;
        g.header(out.padded_size() / BLOCK_DIM);
        let idx = g.fresh_index(ELEM_WORDS)?;
        let pa = g.regs.alloc()?;
        g.add_imm(pa, idx, a.addr)?;
        g.add_imm(idx, idx, out.addr)?;
        g.load_val(pa, pa)?;
        let c = g.regs.alloc()?;
        g.load_f(c, n);
        if scalar_first {
            g.rrr(fop, pa, c, pa);
        } else {
            g.rrr(fop, pa, pa, c);
        }
        g.regs.free(c);
        g.store_val(pa, idx)?;
        g.end_unit();
        Ok(out)
    }

    fn map_unary(&mut self, op: UnaryOp, a: &Arr) -> Result<Arr, Error> {
        let out = self.gen.alloc_arr(&a.shape)?;
        let g = &mut self.gen;
        g.header(out.padded_size() / BLOCK_DIM);
        let idx = g.fresh_index(ELEM_WORDS)?;
        let pa = g.regs.alloc()?;
        g.add_imm(pa, idx, a.addr)?;
        g.add_imm(idx, idx, out.addr)?;
        g.load_val(pa, pa)?;
        unary_reg(g, op, pa, pa)?;
        g.store_val(pa, idx)?;
        g.end_unit();
        Ok(out)
    }

    /// One thread per source element, padding included.
    fn transpose(&mut self, a: &Arr) -> Result<Arr, Error> {
        let (rp, cp) = a.padded();
        let out = self.gen.alloc_arr(&[a.cols(), a.rows()])?;
        let g = &mut self.gen;
        g.header(rp * cp / BLOCK_DIM);
        let e = g.fresh_index(1)?;
        let row = g.regs.alloc()?;
        g.int_imm(Op::Divi, row, e, cp)?;
        let col = g.regs.alloc()?;
        g.int_imm(Op::Remi, col, e, cp)?;
        g.elem_addr(e, a.addr)?;
        g.load_val(e, e)?;
        g.int_imm(Op::Muli, col, col, rp)?;
        g.rrr(Op::Add, col, col, row);
        g.regs.free(row);
        g.elem_addr(col, out.addr)?;
        g.store_val(e, col)?;
        g.end_unit();
        Ok(out)
    }

    /// Matrix product: each thread reduces one row of `a` against one
    /// column of `b`.
    fn dot(&mut self, a: &Arr, b: &Arr) -> Result<Arr, Error> {
        if a.cols() != b.rows() {
            return Err(Error::MismatchedShape(format!("{:?} dot {:?}", a.shape, b.shape)));
        }
        let (_, kp) = a.padded();
        let (_, np) = b.padded();
        let out = self.gen.alloc_arr(&[a.rows(), b.cols()])?;
        let g = &mut self.gen;
        g.header(out.padded_size() / BLOCK_DIM);
        let e = g.fresh_index(1)?;
        let row = g.regs.alloc()?;
        g.int_imm(Op::Divi, row, e, np)?;
        let col = g.regs.alloc()?;
        g.int_imm(Op::Remi, col, e, np)?;
        g.elem_addr(e, out.addr)?;
        g.int_imm(Op::Muli, row, row, kp)?;
        let acc = g.regs.alloc()?;
        g.rri(Op::Addi, acc, ZERO, 0);
        for k in 0..a.cols() {
            let t = g.regs.alloc()?;
            g.add_imm(t, row, k)?;
            g.elem_addr(t, a.addr)?;
            g.load_val(t, t)?;
            let u = g.regs.alloc()?;
            g.add_imm(u, col, k * np)?;
            g.elem_addr(u, b.addr)?;
            g.load_val(u, u)?;
            g.rrr(Op::Fmul, t, t, u);
            g.rrr(Op::Fadd, acc, acc, t);
            g.regs.free(t);
            g.regs.free(u);
        }
        g.store_val(acc, e)?;
        g.end_unit();
        Ok(out)
    }

    // Per-pixel expressions: everything lives in registers of the current unit.

    fn pixel_expr(&mut self, e: &Expr) -> Result<Value, Error> {
        match e {
            Expr::Var(name) if name == X => Ok(Value::Reg(self.gen.x_into_reg()?)),
            Expr::Var(name) if name == Y => Ok(Value::Reg(self.gen.y_into_reg()?)),
            Expr::Var(name) => match self.lookup(name)? {
                Value::Mem(arr) => Ok(Value::Reg(self.gen.to_reg(&Value::Mem(arr))?)),
                v => Ok(v),
            },
            Expr::Const(n) => Ok(Value::Real(*n)),
            Expr::Array { .. } => Err(Error::Semantic(
                "array literal inside a plot expression".to_string(),
            )),
            Expr::Binary(op, lhs, rhs) => {
                let l = self.pixel_expr(lhs)?;
                let r = self.pixel_expr(rhs)?;
                if let (Value::Real(a), Value::Real(b)) = (&l, &r) {
                    return Ok(Value::Real(fold_binary(*op, *a, *b)?));
                }
                let fop = float_op(*op)?;
                let g = &mut self.gen;
                let ra = g.to_reg(&l)?;
                let rb = g.to_reg(&r)?;
                g.regs.free(ra);
                g.regs.free(rb);
                let out = g.regs.alloc()?;
                g.rrr(fop, out, ra, rb);
                Ok(Value::Reg(out))
            }
            Expr::Unary(op, e) => {
                let v = self.pixel_expr(e)?;
                if let Value::Real(n) = v {
                    return Ok(Value::Real(fold_unary(*op, n)?));
                }
                let g = &mut self.gen;
                let src = g.to_reg(&v)?;
                g.regs.free(src);
                let out = g.regs.alloc()?;
                unary_reg(g, *op, out, src)?;
                Ok(Value::Reg(out))
            }
        }
    }

    /// Clears the frame buffer ahead of a rasterising statement.
    fn frame_buffer(&mut self) -> Result<usize, Error> {
        let fb = self.gen.frame_buffer;
        if !self.gen.single_out {
            self.gen.clear_frame_buffer(fb)?;
        }
        Ok(fb)
    }

    fn refresh(&mut self, fb: usize) -> Result<(), Error> {
        if !self.gen.single_out {
            self.gen.display_frame_buffer(fb)?;
        }
        Ok(())
    }

    fn plot(&mut self, var: &str, min: f64, max: f64) -> Result<(), Error> {
        let arr = match self.lookup(var)? {
            Value::Mem(arr) => arr,
            _ => return Err(Error::Semantic(format!("cannot .plot scalar ${}", var))),
        };
        let cp = pad(arr.cols());
        if cp > SCREEN_WIDTH {
            return Err(Error::UnsupportedShape(format!(
                "{} columns do not fit on the screen",
                arr.cols()
            )));
        }
        info!(".plot ${} of shape {:?}", var, arr.shape);
        let g = &mut self.gen;
        for i in 0..arr.rows() {
            g.header(cp / BLOCK_DIM);
            let addr = g.fresh_index(ELEM_WORDS)?;
            g.add_imm(addr, addr, elem_word(arr.addr, i * cp))?;
            let v = g.regs.alloc()?;
            g.load_val(v, addr)?;
            g.change_scale(v, min, max, 0.0, 1.0)?;
            g.rr(Op::Cvtfc, v, v);
            g.disp(v);
            g.end_unit();
            if cp < SCREEN_WIDTH {
                g.blank_rows((SCREEN_WIDTH - cp) / BLOCK_DIM, 1);
            }
        }
        Ok(())
    }

    /// Sets the predicate where `|tmp| < eps` and paints those pixels.
    fn highlight(&mut self, tmp: Reg, eps: Reg, addr: Reg, colour: u32) {
        let g = &mut self.gen;
        g.rr(Op::Fabs, tmp, tmp);
        g.rr(Op::Fslt, tmp, eps);
        g.pred = true;
        g.rri(Op::Addi, tmp, ZERO, colour);
        g.rr(Op::Spix, tmp, addr);
        g.pred = false;
    }

    fn plot_x(&mut self, body: &Expr) -> Result<(), Error> {
        let fb = self.frame_buffer()?;
        self.gen.set_coord_range(0.0, PLOT_WIDTH as f64);
        self.gen.header(PLOT_WIDTH * PLOT_HEIGHT / BLOCK_DIM);
        let addr = self.gen.fresh_index(1)?;
        self.gen.add_imm(addr, addr, fb)?;
        let v = self.pixel_expr(body)?;
        let g = &mut self.gen;
        let fx = g.to_owned_reg(&v)?;
        let tmp = g.regs.alloc()?;
        let eps = g.regs.alloc()?;
        g.load_f(eps, EQUALITY_ERROR_MARGIN);

        let x = g.x_into_reg()?;
        g.rrr(Op::Add, tmp, x, ZERO);
        self.highlight(tmp, eps, addr, AXIS_COLOUR);

        let y = self.gen.y_into_reg()?;
        self.gen.rrr(Op::Add, tmp, y, ZERO);
        self.highlight(tmp, eps, addr, AXIS_COLOUR);

        self.gen.rrr(Op::Fsub, tmp, y, fx);
        self.highlight(tmp, eps, addr, CURVE_COLOUR);

        self.gen.end_unit();
        self.refresh(fb)
    }

    fn plot_xy(&mut self, angles: [f64; 3], body: &Expr) -> Result<(), Error> {
        let fb = self.frame_buffer()?;
        self.gen
            .set_coord_range(ROTATION_MARGIN, PLOT_WIDTH as f64 - ROTATION_MARGIN);
        self.gen.header(PLOT_WIDTH * PLOT_HEIGHT / BLOCK_DIM);
        let v = self.pixel_expr(body)?;
        let g = &mut self.gen;
        let z = g.to_owned_reg(&v)?;
        let x = g.x_into_reg()?;
        let y = g.y_into_reg()?;

        // Only points inside the unrotated cube are drawn.
        let max = g.regs.alloc()?;
        let min = g.regs.alloc()?;
        g.load_f(max, X_MAX);
        g.load_f(min, X_MIN);
        g.rr(Op::Fslt, x, max);
        g.pred = true;
        g.rr(Op::Fslt, min, x);
        for &r in &[y, z] {
            g.rr(Op::Fslt, r, max);
            g.rr(Op::Fslt, min, r);
        }
        g.regs.free(max);
        g.regs.free(min);

        let [nx, ny, nz] = g.rotate(x, y, z, angles)?;
        g.regs.release(X);
        g.regs.release(Y);
        g.regs.free(z);
        g.change_scale(nz, Z_MIN, Z_MAX, 0.0, 1.0)?;
        let addr = g.regs.alloc()?;
        g.float_coords_to_addr(addr, nx, ny, fb)?;
        g.rr(Op::Cvtfc, nz, nz);
        g.rr(Op::Spix, nz, addr);
        g.end_unit();
        self.refresh(fb)
    }

    /// Scans the function straight onto the screen, one pixel per lane and
    /// column step, with no frame buffer.
    fn plot_xy_simple(&mut self, min: f64, max: f64, body: &Expr) -> Result<(), Error> {
        let lanes = NUM_THREADS * BLOCK_DIM;
        let side = (SCREEN_WIDTH - SIMPLE_PLOT_WIDTH) / 2 / lanes;
        let aspect = SCREEN_HEIGHT as f64 / SIMPLE_PLOT_WIDTH as f64;

        let g = &mut self.gen;
        g.header(SCREEN_HEIGHT * NUM_THREADS);
        for _ in 0..side {
            g.disp(ZERO);
        }
        let col = g.regs.alloc()?;
        g.rri(Op::Andi, col, BLOCK_IDX_REG, (NUM_THREADS - 1) as u32);
        g.rri(Op::Slli, col, col, BLOCK_DIM.trailing_zeros());
        g.rrr(Op::Add, col, col, THREAD_IDX_REG);
        let row = g.regs.alloc()?;
        g.rri(Op::Srli, row, BLOCK_IDX_REG, NUM_THREADS.trailing_zeros());
        g.rri(Op::Subi, row, row, SCREEN_HEIGHT as u32);
        g.rrr(Op::Sub, row, ZERO, row);
        g.rr(Op::Cvtif, row, row);
        g.change_scale(row, 0.0, SCREEN_HEIGHT as f64, Y_MIN * aspect, Y_MAX * aspect)?;
        g.regs.bind(Y, row);

        for i in 0..SIMPLE_PLOT_WIDTH / lanes {
            let g = &mut self.gen;
            let t = g.regs.alloc()?;
            g.add_imm(t, col, i * lanes)?;
            g.rr(Op::Cvtif, t, t);
            g.change_scale(t, 0.0, SIMPLE_PLOT_WIDTH as f64, X_MIN, X_MAX)?;
            g.regs.bind(X, t);

            let v = self.pixel_expr(body)?;
            let g = &mut self.gen;
            let z = g.to_owned_reg(&v)?;
            g.change_scale(z, min, max, 0.0, 1.0)?;
            g.rr(Op::Cvtfc, z, z);
            g.disp(z);
            g.regs.release(X);
            g.regs.free(z);
        }

        let g = &mut self.gen;
        g.regs.release(Y);
        g.regs.free(col);
        for _ in 0..side {
            g.disp(ZERO);
        }
        g.end_unit();
        Ok(())
    }
}

/// Lowers a checked program to mnemonic text.
pub fn compile(stmts: &[Stmt], config: &Config) -> Result<String, Error> {
    let mut lower = Lower::new(config);
    for stmt in stmts {
        lower.stmt(stmt)?;
    }
    info!(
        "{} statements lowered into {} generation units, {} data words live",
        stmts.len(),
        lower.gen.units(),
        lower.gen.heap.used()
    );
    Ok(lower.into_asm())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;
    use crate::parser::parse;
    use crate::tc::tc;

    fn lower(code: &str) -> Lower {
        let mut l = Lower::new(&Config::default());
        for stmt in tc(parse(code).unwrap()).unwrap() {
            l.stmt(&stmt).unwrap();
        }
        l
    }

    fn units(asm: &str) -> usize {
        asm.lines().filter(|l| l.starts_with('<')).count()
    }

    #[test]
    fn test_scalars_fold_without_code() {
        let l = lower("$a = 2 * 3 + sin(0)\n$b = $a - 1");
        assert_eq!(l.vars.get("a"), Some(&Value::Real(6.0)));
        assert_eq!(l.vars.get("b"), Some(&Value::Real(5.0)));
        assert!(l.into_asm().is_empty());
    }

    #[test]
    fn test_array_literal_unit() {
        let l = lower("$a = |2| [1, 2]");
        let asm = l.into_asm();
        let lines: Vec<&str> = asm.lines().collect();
        assert_eq!(lines[0], "<1, 8>");
        assert_eq!(lines[1], "seqi %threadidx, 0");
        assert!(lines[2..lines.len() - 1].iter().all(|l| l.contains(".p ")));
        assert_eq!(lines.last(), Some(&"exit"));
        assert!(assemble(&asm).is_ok());
    }

    #[test]
    fn test_elementwise_releases_temporaries() {
        let mut l = lower("$a = |2| [1, 2]\n$b = |2| [3, 4]");
        let before = l.gen.heap.largest_free();
        l.stmt(&parse("$c = $a + $b * 2").unwrap()[0]).unwrap();
        let c = match l.vars.get("c") {
            Some(Value::Mem(c)) => c.clone(),
            other => panic!("{:?}", other),
        };
        assert_eq!(c.shape, vec![1, 2]);
        // $b * 2 was freed after the addition consumed it.
        assert_eq!(l.gen.heap.free_spans()[0], (256, 128));
        assert_eq!(l.gen.heap.largest_free(), before - 256);
        assert_eq!(units(&l.into_asm()), 4);
    }

    fn free_words(l: &Lower) -> usize {
        l.gen.heap.free_spans().iter().map(|&(_, n)| n).sum()
    }

    #[test]
    fn test_reassignment_frees_previous_array() {
        let mut l = lower("$a = |2| [1, 2]");
        let free = free_words(&l);
        l.stmt(&parse("$a = $a + 1").unwrap()[0]).unwrap();
        assert_eq!(free_words(&l), free);
        assert_eq!(l.gen.heap.used(), 128);
        assert_eq!(l.gen.heap.free_spans()[0], (0, 128));
        l.stmt(&parse("$b = $a").unwrap()[0]).unwrap();
        l.stmt(&parse("$a = 0").unwrap()[0]).unwrap();
        assert!(matches!(l.vars.get("b"), Some(Value::Mem(_))));
        assert_eq!(free_words(&l), free);
    }

    #[test]
    fn test_mismatched_shapes() {
        let mut l = lower("$a = |2| [1, 2]\n$b = |3| [1, 2, 3]");
        match l.stmt(&parse("$c = $a + $b").unwrap()[0]) {
            Err(Error::MismatchedShape(_)) => (),
            other => panic!("{:?}", other),
        }
        match l.stmt(&parse("$c = $a dot $b").unwrap()[0]) {
            Err(Error::MismatchedShape(_)) => (),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_oversized_literal_is_rejected() {
        let mut l = Lower::new(&Config::default());
        let stmt = Stmt::Assign(
            "a".to_string(),
            Expr::Array { shape: vec![1 << 32, 1 << 32], values: vec![1.0] },
        );
        match l.stmt(&stmt) {
            Err(Error::UnsupportedShape(_)) => (),
            other => panic!("{:?}", other),
        }
        assert!(l.into_asm().is_empty());
    }

    #[test]
    fn test_dot_and_transpose_shapes() {
        let l = lower("$a = |2, 3| [1, 2, 3, 4, 5, 6]\n$t = $a.T\n$p = $a dot $t");
        match (l.vars.get("t"), l.vars.get("p")) {
            (Some(Value::Mem(t)), Some(Value::Mem(p))) => {
                assert_eq!(t.shape, vec![3, 2]);
                assert_eq!(p.shape, vec![2, 2]);
            }
            other => panic!("{:?}", other),
        }
        let asm = l.into_asm();
        assert_eq!(units(&asm), 3);
        assert!(asm.contains("fmul"));
        assert!(assemble(&asm).is_ok());
    }

    #[test]
    fn test_relu_restores_predicate() {
        let l = lower("$a = |2| [-1, 2]\n$r = relu($a)");
        let asm = l.into_asm();
        assert!(asm.contains("addi.p"));
        assert!(asm.contains("lui.p"));
        assert!(asm.contains("slti"));
        assert!(assemble(&asm).is_ok());
    }

    #[test]
    fn test_plot_rows_and_margins() {
        let l = lower("$a = |2, 4| [1, 2, 3, 4, 5, 6, 7, 8]\n.plot $a 0 8");
        let asm = l.into_asm();
        // literal, then a row unit and a margin unit per row
        assert_eq!(units(&asm), 5);
        assert!(asm.contains(&format!("<{}, 8>", (SCREEN_WIDTH - 8) / BLOCK_DIM)));
        assert!(assemble(&asm).is_ok());
    }

    #[test]
    fn test_plot_xy_refreshes_screen() {
        let l = lower(".plotxy 0.5 0 0.25 x * y");
        let asm = l.into_asm();
        // clear, scan, top margin, display, bottom margin
        assert_eq!(units(&asm), 5);
        assert!(asm.contains("spix.p"));
        assert!(assemble(&asm).is_ok());
    }

    #[test]
    fn test_single_out_emits_only_the_scan() {
        let config = Config {
            single_out: true,
            ..Config::default()
        };
        let stmts = tc(parse(".plotx sin(x)").unwrap()).unwrap();
        let asm = compile(&stmts, &config).unwrap();
        assert_eq!(units(&asm), 1);
        assert!(asm.contains("fsin"));
        assert!(assemble(&asm).is_ok());
    }

    #[test]
    fn test_frame_buffer_sits_after_heap() {
        let l = lower("$k = |1| [2]\n.plotx $k * x");
        assert_eq!(l.gen.heap.free_spans(), &[(128, MEM_SIZE - 128)]);
        let asm = l.into_asm();
        // clear unit: index in r4, base MEM_SIZE materialised in r5
        assert!(asm.contains("lui r5, 16\nadd r4, r4, r5"));
        assert!(assemble(&asm).is_ok());
    }

    #[test]
    fn test_simple_plot_uses_scalar_array() {
        let l = lower("$k = |1| [2]\n.simple_plotxy -1 1 $k * x - y");
        let asm = l.into_asm();
        let header = format!("<{}, 8>", SCREEN_HEIGHT * NUM_THREADS);
        assert!(asm.contains(&header));
        assert_eq!(asm.matches("\ndisp r").count(), 8);
        assert!(assemble(&asm).is_ok());
    }

    #[test]
    fn test_plot_needs_single_element_arrays() {
        let mut l = lower("$v = |3| [1, 2, 3]");
        match l.stmt(&parse(".plotx $v * x").unwrap()[0]) {
            Err(Error::UnsupportedShape(_)) => (),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_register_exhaustion_is_reported() {
        let config = Config {
            num_registers: 2,
            ..Config::default()
        };
        let stmts = tc(parse(".plotxy 0 0 0 x + y").unwrap()).unwrap();
        match compile(&stmts, &config) {
            Err(Error::RegisterExhaustion) => (),
            other => panic!("{:?}", other),
        }
    }
}
