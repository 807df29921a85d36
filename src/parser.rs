use crate::syntax::*;

use crate::error::Error;
use combine::error::ParseError;
use combine::parser::char::{alpha_num, char, digit, letter, spaces, string};
use combine::stream::easy;
use combine::stream::Stream;
use combine::{
    attempt, between, chainl1, choice, eof, many, many1, optional, satisfy_map, sep_by1, sep_end_by,
    token, Parser,
};
use std::fmt;

#[derive(Debug, PartialEq, Clone)]
pub enum Tok {
    Var(String),
    X,
    Y,
    Dot,
    Func(UnaryOp),
    Ident(String),
    Plot,
    PlotX,
    PlotXY,
    SimplePlotXY,
    Transpose,
    Caret,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Bar,
    Comma,
    Equal,
    Num(String),
    Eof,
}

impl fmt::Display for Tok {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn word(w: String) -> Tok {
    match w.as_str() {
        "x" => Tok::X,
        "y" => Tok::Y,
        "dot" => Tok::Dot,
        "exp" => Tok::Func(UnaryOp::Exp),
        "sin" => Tok::Func(UnaryOp::Sin),
        "cos" => Tok::Func(UnaryOp::Cos),
        "sqrt" => Tok::Func(UnaryOp::Sqrt),
        "relu" => Tok::Func(UnaryOp::Relu),
        _ => Tok::Ident(w),
    }
}

fn lex(s: &str) -> Result<Vec<Tok>, easy::ParseError<&str>> {
    let tok = choice((
        attempt(string(".simple_plotxy")).map(|_x| Tok::SimplePlotXY),
        attempt(string(".plotxy")).map(|_x| Tok::PlotXY),
        attempt(string(".plotx")).map(|_x| Tok::PlotX),
        attempt(string(".plot")).map(|_x| Tok::Plot),
        string(".T").map(|_x| Tok::Transpose),
        char('$')
            .with((letter(), many(alpha_num().or(char('_')))))
            .map(|(c, rest): (char, String)| Tok::Var(format!("{}{}", c, rest))),
        many1(letter()).map(word),
        (many1(digit()), optional(char('.').with(many(digit())))).map(
            |(int, frac): (String, Option<String>)| match frac {
                Some(frac) => Tok::Num(format!("{}.{}", int, frac)),
                None => Tok::Num(int),
            },
        ),
        string("^").map(|_x| Tok::Caret),
        string("+").map(|_x| Tok::Plus),
        string("-").map(|_x| Tok::Minus),
        string("*").map(|_x| Tok::Star),
        string("/").map(|_x| Tok::Slash),
        string("(").map(|_x| Tok::LParen),
        string(")").map(|_x| Tok::RParen),
        string("[").map(|_x| Tok::LBracket),
        string("]").map(|_x| Tok::RBracket),
        string("|").map(|_x| Tok::Bar),
        string(",").map(|_x| Tok::Comma),
        string("=").map(|_x| Tok::Equal),
    ));

    let ws = spaces();

    let mut toks = spaces().with(sep_end_by(tok, ws)).skip(eof()).map(
        |mut tokens: Vec<Tok>| {
            tokens.push(Tok::Eof);
            tokens
        },
    );
    toks.easy_parse(s).map(|tuple| tuple.0)
}

fn var<I>() -> impl Parser<Input = I, Output = String>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    satisfy_map(|t| match t {
        Tok::Var(name) => Some(name),
        _ => None,
    })
}

fn real<I>() -> impl Parser<Input = I, Output = f64>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    satisfy_map(|t| match t {
        Tok::Num(text) => text.parse::<f64>().ok(),
        _ => None,
    })
}

fn int<I>() -> impl Parser<Input = I, Output = usize>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    satisfy_map(|t| match t {
        Tok::Num(text) => text.parse::<usize>().ok(),
        _ => None,
    })
}

/// A literal with an optional leading minus.
fn num<I>() -> impl Parser<Input = I, Output = f64>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    optional(token(Tok::Minus))
        .and(real())
        .map(|(neg, n)| if neg.is_some() { -n } else { n })
}

fn func<I>() -> impl Parser<Input = I, Output = UnaryOp>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    satisfy_map(|t| match t {
        Tok::Func(op) => Some(op),
        _ => None,
    })
}

fn fac<I>() -> impl Parser<Input = I, Output = Expr>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    let v = var().map(Expr::Var);
    let x = token(Tok::X).map(|_x| Expr::Var(X.to_string()));
    let y = token(Tok::Y).map(|_x| Expr::Var(Y.to_string()));
    let c = real().map(Expr::Const);
    let paren = between(token(Tok::LParen), token(Tok::RParen), expr());
    let neg = token(Tok::Minus)
        .with(term())
        .map(|e| Expr::unary(UnaryOp::Neg, e));
    let array = between(token(Tok::Bar), token(Tok::Bar), sep_by1(int(), token(Tok::Comma)))
        .and(between(
            token(Tok::LBracket),
            token(Tok::RBracket),
            sep_by1(num(), token(Tok::Comma)),
        ))
        .map(|(shape, values)| Expr::Array { shape, values });
    let call = func()
        .and(between(token(Tok::LParen), token(Tok::RParen), expr()))
        .map(|(op, e)| Expr::unary(op, e));

    v.or(x).or(y).or(c).or(paren).or(neg).or(array).or(call)
}

enum Postfix {
    Pow(usize), // ^n
    Transpose,
}

fn pow<I>() -> impl Parser<Input = I, Output = Expr>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    let postfix = token(Tok::Caret)
        .with(int())
        .map(Postfix::Pow)
        .or(token(Tok::Transpose).map(|_x| Postfix::Transpose));

    fac()
        .and(many(postfix))
        .map(|(base, posts): (Expr, Vec<Postfix>)| {
            posts.into_iter().fold(base, |e, post| match post {
                Postfix::Pow(0) => Expr::Const(1.0),
                Postfix::Pow(n) => (1..n).fold(e.clone(), |acc, _| {
                    Expr::binary(BinaryOp::Mul, acc, e.clone())
                }),
                Postfix::Transpose => Expr::unary(UnaryOp::Transpose, e),
            })
        })
}

fn term_<I>() -> impl Parser<Input = I, Output = Expr>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    let op = token(Tok::Star)
        .map(|_x| BinaryOp::Mul)
        .or(token(Tok::Slash).map(|_x| BinaryOp::Div))
        .or(token(Tok::Dot).map(|_x| BinaryOp::Dot))
        .map(|op| move |l: Expr, r: Expr| Expr::binary(op, l, r));
    chainl1(pow(), op)
}

fn expr_<I>() -> impl Parser<Input = I, Output = Expr>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    let op = token(Tok::Plus)
        .map(|_x| BinaryOp::Add)
        .or(token(Tok::Minus).map(|_x| BinaryOp::Sub))
        .map(|op| move |l: Expr, r: Expr| Expr::binary(op, l, r));
    chainl1(term(), op)
}

parser!{
    fn term[I]()(I) -> Expr
    where [I: Stream<Item = Tok>]
    {
        term_()
    }
}

parser!{
    fn expr[I]()(I) -> Expr
    where [I: Stream<Item = Tok>]
    {
        expr_()
    }
}

fn stmt<I>() -> impl Parser<Input = I, Output = Stmt>
where
    I: Stream<Item = Tok>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    let assign = var()
        .skip(token(Tok::Equal))
        .and(expr())
        .map(|(name, e)| Stmt::Assign(name, e));

    let plot = token(Tok::Plot)
        .with((var(), num(), num()))
        .map(|(var, min, max)| Stmt::Plot { var, min, max });

    let plotx = token(Tok::PlotX).with(expr()).map(Stmt::PlotX);

    let plotxy = token(Tok::PlotXY)
        .with((num(), num(), num(), expr()))
        .map(|(a, b, c, body)| Stmt::PlotXY {
            angles: [a, b, c],
            body,
        });

    let simple = token(Tok::SimplePlotXY)
        .with((num(), num(), expr()))
        .map(|(min, max, body)| Stmt::PlotXYSimple { min, max, body });

    assign.or(plot).or(plotx).or(plotxy).or(simple)
}

pub fn parse(input: &str) -> Result<Vec<Stmt>, Error> {
    match lex(input) {
        Result::Err(e) => Result::Err(Error::Parse(format!("{:?}", e))),
        Result::Ok(tokens) => {
            let mut ast = many1(stmt()).skip(token(Tok::Eof));
            match ast.easy_parse(&tokens[..]) {
                Result::Err(e) => Result::Err(Error::Parse(format!("{:?}", e))),
                Result::Ok(tuple) => Result::Ok(tuple.0),
            }
        }
    }
}
