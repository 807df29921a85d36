use crate::error::Error;
use crate::syntax::{Expr, Stmt, X, Y};
use std::collections::HashMap;

#[derive(Debug, PartialEq, Clone, Copy)]
enum Kind {
    Scalar,
    Array,
}

/// Which pixel coordinates an expression may refer to.
#[derive(Clone, Copy)]
struct Scope {
    x: bool,
    y: bool,
}

const NO_COORDS: Scope = Scope { x: false, y: false };

fn kind_of(env: &HashMap<String, Kind>, scope: Scope, e: &Expr) -> Result<Kind, Error> {
    match e {
        Expr::Var(name) if name == X || name == Y => {
            if (name == X && scope.x) || (name == Y && scope.y) {
                Ok(Kind::Scalar)
            } else {
                Err(Error::Semantic(format!(
                    "'{}' can only be used inside a plot statement that scans it",
                    name
                )))
            }
        }
        Expr::Var(name) => match env.get(name) {
            Some(k) => Ok(*k),
            None => Err(Error::Semantic(format!("${} is used before it is assigned", name))),
        },
        Expr::Const(_) => Ok(Kind::Scalar),
        Expr::Array { shape, values } => {
            if scope.x || scope.y {
                return Err(Error::Semantic(
                    "array literals are not allowed inside plot expressions".to_string(),
                ));
            }
            let n = shape
                .iter()
                .try_fold(1usize, |n, &d| n.checked_mul(d))
                .ok_or_else(|| Error::UnsupportedShape(format!("shape {:?} is too large", shape)))?;
            if n != values.len() {
                warn!("array literal of shape {:?} has {} values", shape, values.len());
            }
            Ok(Kind::Array)
        }
        Expr::Binary(_, lhs, rhs) => {
            let l = kind_of(env, scope, lhs)?;
            let r = kind_of(env, scope, rhs)?;
            if l == Kind::Array || r == Kind::Array {
                Ok(Kind::Array)
            } else {
                Ok(Kind::Scalar)
            }
        }
        Expr::Unary(_, e) => kind_of(env, scope, e),
    }
}

pub fn tc(stmts: Vec<Stmt>) -> Result<Vec<Stmt>, Error> {
    let mut env = HashMap::new();
    for stmt in &stmts {
        match stmt {
            Stmt::Assign(name, e) => {
                if name == X || name == Y {
                    return Err(Error::Semantic(format!("cannot assign to ${}", name)));
                }
                let k = kind_of(&env, NO_COORDS, e)?;
                env.insert(name.clone(), k);
            }
            Stmt::Plot { var, min, max } => match env.get(var) {
                Some(Kind::Array) => {
                    if min >= max {
                        warn!(".plot ${}: empty or reversed range {} {}", var, min, max);
                    }
                }
                Some(Kind::Scalar) => {
                    return Err(Error::Semantic(format!("cannot .plot scalar ${}", var)))
                }
                None => {
                    return Err(Error::Semantic(format!("${} is used before it is assigned", var)))
                }
            },
            Stmt::PlotX(e) => {
                kind_of(&env, Scope { x: true, y: false }, e)?;
            }
            Stmt::PlotXY { body, .. } | Stmt::PlotXYSimple { body, .. } => {
                kind_of(&env, Scope { x: true, y: true }, body)?;
            }
        }
    }
    Ok(stmts)
}
