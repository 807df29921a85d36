use std::fmt;

/// Names of the per-pixel coordinates in plot expressions.
pub const X: &str = "x";
pub const Y: &str = "y";

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Dot,
}

// Clone is needed to tokenize.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum UnaryOp {
    Neg,
    Sqrt,
    Exp,
    Sin,
    Cos,
    Relu,
    Transpose,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expr {
    Var(String),
    Const(f64),
    Array { shape: Vec<usize>, values: Vec<f64> },
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
}

#[derive(Debug, PartialEq, Clone)]
pub enum Stmt {
    Assign(String, Expr),
    /// Displays a 2-D array row by row, scaled from `min..max`.
    Plot { var: String, min: f64, max: f64 },
    /// `y = f(x)` as a curve with axes.
    PlotX(Expr),
    /// `z = f(x, y)` rotated by three angles.
    PlotXY { angles: [f64; 3], body: Expr },
    /// Direct per-pixel scan of `f(x, y)`.
    PlotXYSimple { min: f64, max: f64, body: Expr },
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn unary(op: UnaryOp, e: Expr) -> Expr {
        Expr::Unary(op, Box::new(e))
    }

    pub fn is_coord(&self) -> bool {
        match self {
            Expr::Var(name) => name == X || name == Y,
            _ => false,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Dot => "dot",
        };
        f.write_str(s)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            UnaryOp::Neg => "-",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Relu => "relu",
            UnaryOp::Transpose => ".T",
        };
        f.write_str(s)
    }
}

fn write_list<T: fmt::Debug>(f: &mut fmt::Formatter, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{:?}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Var(name) if self.is_coord() => f.write_str(name),
            Expr::Var(name) => write!(f, "${}", name),
            Expr::Const(n) => write!(f, "{:?}", n),
            Expr::Array { shape, values } => {
                f.write_str("|")?;
                write_list(f, shape)?;
                f.write_str("| [")?;
                write_list(f, values)?;
                f.write_str("]")
            }
            Expr::Binary(op, lhs, rhs) => write!(f, "({} {} {})", lhs, op, rhs),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "-({})", e),
            Expr::Unary(UnaryOp::Transpose, e) => write!(f, "({}).T", e),
            Expr::Unary(op, e) => write!(f, "{}({})", op, e),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stmt::Assign(name, e) => write!(f, "${} = {}", name, e),
            Stmt::Plot { var, min, max } => write!(f, ".plot ${} {:?} {:?}", var, min, max),
            Stmt::PlotX(e) => write!(f, ".plotx {}", e),
            Stmt::PlotXY { angles, body } => write!(
                f,
                ".plotxy {:?} {:?} {:?} {}",
                angles[0], angles[1], angles[2], body
            ),
            Stmt::PlotXYSimple { min, max, body } => {
                write!(f, ".simple_plotxy {:?} {:?} {}", min, max, body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Expr::binary(
            BinaryOp::Add,
            Expr::Var("a".to_string()),
            Expr::unary(UnaryOp::Sin, Expr::Var("x".to_string())),
        );
        assert_eq!(e.to_string(), "($a + sin(x))");
        let t = Expr::unary(UnaryOp::Transpose, Expr::Var("m".to_string()));
        assert_eq!(t.to_string(), "($m).T");
        let arr = Expr::Array {
            shape: vec![2, 2],
            values: vec![1.0, 2.0, 3.0, 4.5],
        };
        assert_eq!(arr.to_string(), "|2, 2| [1.0, 2.0, 3.0, 4.5]");
        let s = Stmt::PlotXY {
            angles: [0.0, 0.5, 1.0],
            body: Expr::Const(-2.0),
        };
        assert_eq!(s.to_string(), ".plotxy 0.0 0.5 1.0 -2.0");
    }
}
