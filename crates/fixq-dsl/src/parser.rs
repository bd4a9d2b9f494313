//! `nom` parser for fixq source text.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! expr    := "fn" pat "=>" expr | orelse
//! orelse  := andalso ("orelse" andalso)*
//! andalso := cmp ("andalso" cmp)*
//! cmp     := append (("=" | "<>" | "<=" | ">=" | "<" | ">" | "elem") append)?
//! append  := sum ("@" append)?
//! sum     := app (("+" | "-") app)*
//! app     := atom atom*
//! atom    := int | string | "true" | "false" | ident ("." ident)*
//!          | "(" ")" | "(" expr ("," expr)* ")" | "[" (expr ("," expr)*)? "]"
//!          | ("from" | "exists") scan ("," scan)* step*
//! ```
//!
//! Negative integer literals are written `~3`. Comments are `(* ... *)`.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char as pchar, digit1, satisfy},
    combinator::{map, not, opt, recognize, value},
    multi::{many0, separated_list0, separated_list1},
    sequence::{pair, preceded, terminated},
    IResult,
};
use thiserror::Error;

use crate::ast::{BinOp, Decl, Expr, Literal, Name, Pat, Program, Query, Scan, Step, Type};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("parse error at line {line}, column {column}: {message}")]
    At {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("unterminated comment starting at line {line}")]
    UnterminatedComment { line: usize },
}

const KEYWORDS: &[&str] = &[
    "_", "andalso", "elem", "exists", "false", "fn", "from", "fun", "in", "orelse", "true", "val",
    "where", "yield",
];

// ============================================================================
// Entry points
// ============================================================================

pub fn parse_program(text: &str) -> Result<Program, ParseError> {
    check_comments(text)?;
    let (rest, decls) = many0(decl)(text).map_err(|e| error_at(text, e, "invalid declaration"))?;
    let (rest, _) = sp(rest).map_err(|e| error_at(text, e, "invalid trailing input"))?;
    if !rest.is_empty() {
        return Err(position_error(text, rest, "expected `val` or `fun` declaration"));
    }
    Ok(Program { decls })
}

pub fn parse_expr(text: &str) -> Result<Expr, ParseError> {
    check_comments(text)?;
    let (rest, e) = expr(text).map_err(|e| error_at(text, e, "invalid expression"))?;
    let (rest, _) = sp(rest).map_err(|e| error_at(text, e, "invalid trailing input"))?;
    if !rest.is_empty() {
        return Err(position_error(text, rest, "unexpected input after expression"));
    }
    Ok(e)
}

pub fn parse_pat(text: &str) -> Result<Pat, ParseError> {
    let (rest, p) = pat(text).map_err(|e| error_at(text, e, "invalid pattern"))?;
    let (rest, _) = sp(rest).map_err(|e| error_at(text, e, "invalid trailing input"))?;
    if !rest.is_empty() {
        return Err(position_error(text, rest, "unexpected input after pattern"));
    }
    Ok(p)
}

pub fn parse_type(text: &str) -> Result<Type, ParseError> {
    let (rest, t) = ty(text).map_err(|e| error_at(text, e, "invalid type"))?;
    let (rest, _) = sp(rest).map_err(|e| error_at(text, e, "invalid trailing input"))?;
    if !rest.is_empty() {
        return Err(position_error(text, rest, "unexpected input after type"));
    }
    Ok(t)
}

fn check_comments(text: &str) -> Result<(), ParseError> {
    let mut rest = text;
    while let Some(start) = rest.find("(*") {
        let after = &rest[start + 2..];
        match after.find("*)") {
            Some(end) => rest = &after[end + 2..],
            None => {
                let offset = text.len() - rest.len() + start;
                return Err(ParseError::UnterminatedComment {
                    line: line_col(text, offset).0,
                });
            }
        }
    }
    Ok(())
}

fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}

fn position_error(text: &str, rest: &str, message: &str) -> ParseError {
    let (line, column) = line_col(text, text.len() - rest.len());
    let found: String = rest.chars().take(16).collect();
    ParseError::At {
        line,
        column,
        message: format!("{message} (found `{found}`)"),
    }
}

fn error_at(text: &str, err: nom::Err<nom::error::Error<&str>>, message: &str) -> ParseError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => position_error(text, e.input, message),
        nom::Err::Incomplete(_) => position_error(text, "", message),
    }
}

// ============================================================================
// Lexical helpers
// ============================================================================

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '\''
}

/// Skip whitespace and `(* ... *)` comments.
fn sp(mut input: &str) -> IResult<&str, ()> {
    loop {
        let trimmed = input.trim_start();
        match trimmed.strip_prefix("(*") {
            Some(body) => match body.find("*)") {
                Some(end) => input = &body[end + 2..],
                None => {
                    return Err(nom::Err::Failure(nom::error::Error::new(
                        trimmed,
                        nom::error::ErrorKind::Eof,
                    )))
                }
            },
            None => return Ok((trimmed, ())),
        }
    }
}

fn tok<'a>(symbol: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (input, _) = sp(input)?;
        tag(symbol)(input)
    }
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (input, _) = sp(input)?;
        terminated(tag(kw), not(satisfy(is_ident_continue)))(input)
    }
}

fn word(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_ident_start), take_while(is_ident_continue)))(input)
}

fn ident(input: &str) -> IResult<&str, Name> {
    let (input, _) = sp(input)?;
    let (rest, w) = word(input)?;
    if KEYWORDS.contains(&w) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, w.to_string()))
}

/// `List.iterate`-style dotted names.
fn qualified_ident(input: &str) -> IResult<&str, Name> {
    let (mut input, first) = ident(input)?;
    let mut name = first;
    while let Ok((rest, part)) = preceded(pchar::<&str, nom::error::Error<&str>>('.'), word)(input) {
        name.push('.');
        name.push_str(part);
        input = rest;
    }
    Ok((input, name))
}

fn eq_sign(input: &str) -> IResult<&str, &str> {
    let (input, _) = sp(input)?;
    terminated(tag("="), not(pchar('>')))(input)
}

fn int_lit(input: &str) -> IResult<&str, i64> {
    let (input, _) = sp(input)?;
    let (rest, (neg, digits)) = pair(opt(pchar('~')), digit1)(input)?;
    let magnitude: i64 = digits.parse().map_err(|_| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
    })?;
    Ok((rest, if neg.is_some() { -magnitude } else { magnitude }))
}

fn string_lit(input: &str) -> IResult<&str, String> {
    let (input, _) = sp(input)?;
    let (mut rest, _) = pchar('"')(input)?;
    let mut out = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )))
            }
            Some('"') => return Ok((chars.as_str(), out)),
            Some('\\') => {
                let escaped = match chars.next() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some(c @ ('"' | '\\')) => c,
                    _ => {
                        return Err(nom::Err::Failure(nom::error::Error::new(
                            rest,
                            nom::error::ErrorKind::Escaped,
                        )))
                    }
                };
                out.push(escaped);
            }
            Some(c) => out.push(c),
        }
        rest = chars.as_str();
    }
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(int_lit, Literal::Int),
        map(string_lit, Literal::Str),
        value(Literal::Bool(true), keyword("true")),
        value(Literal::Bool(false), keyword("false")),
    ))(input)
}

// ============================================================================
// Expressions
// ============================================================================

fn expr(input: &str) -> IResult<&str, Expr> {
    alt((lambda, orelse_expr))(input)
}

fn lambda(input: &str) -> IResult<&str, Expr> {
    let (input, _) = keyword("fn")(input)?;
    let (input, param) = pat(input)?;
    let (input, _) = tok("=>")(input)?;
    let (input, body) = expr(input)?;
    Ok((input, Expr::lambda(param, body)))
}

fn orelse_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = andalso_expr(input)?;
    let (input, rest) = many0(preceded(keyword("orelse"), andalso_expr))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::or_else)))
}

fn andalso_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = cmp_expr(input)?;
    let (input, rest) = many0(preceded(keyword("andalso"), cmp_expr))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::and_also)))
}

fn cmp_op(input: &str) -> IResult<&str, BinOp> {
    alt((
        value(BinOp::Ne, tok("<>")),
        value(BinOp::Le, tok("<=")),
        value(BinOp::Ge, tok(">=")),
        value(BinOp::Lt, tok("<")),
        value(BinOp::Gt, tok(">")),
        value(BinOp::Eq, eq_sign),
        value(BinOp::Elem, keyword("elem")),
    ))(input)
}

fn cmp_expr(input: &str) -> IResult<&str, Expr> {
    let (input, left) = append_expr(input)?;
    let (input, tail) = opt(pair(cmp_op, append_expr))(input)?;
    Ok((
        input,
        match tail {
            Some((op, right)) => Expr::binary(op, left, right),
            None => left,
        },
    ))
}

fn append_expr(input: &str) -> IResult<&str, Expr> {
    let (input, left) = sum_expr(input)?;
    let (input, right) = opt(preceded(tok("@"), append_expr))(input)?;
    Ok((
        input,
        match right {
            Some(right) => Expr::binary(BinOp::Append, left, right),
            None => left,
        },
    ))
}

fn sum_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = app_expr(input)?;
    let (input, rest) = many0(pair(
        alt((value(BinOp::Add, tok("+")), value(BinOp::Sub, tok("-")))),
        app_expr,
    ))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, (op, right)| Expr::binary(op, acc, right)),
    ))
}

fn app_expr(input: &str) -> IResult<&str, Expr> {
    let (input, func) = atom(input)?;
    let (input, args) = many0(atom)(input)?;
    Ok((input, args.into_iter().fold(func, Expr::apply)))
}

fn atom(input: &str) -> IResult<&str, Expr> {
    alt((
        map(literal, Expr::Literal),
        map(preceded(keyword("from"), query), |q| Expr::From(Box::new(q))),
        map(preceded(keyword("exists"), query), |q| Expr::Exists(Box::new(q))),
        paren_expr,
        list_expr,
        map(qualified_ident, Expr::Var),
    ))(input)
}

fn paren_expr(input: &str) -> IResult<&str, Expr> {
    let (input, _) = tok("(")(input)?;
    let (input, items) = separated_list0(tok(","), expr)(input)?;
    let (input, _) = tok(")")(input)?;
    Ok((input, Expr::tuple(items)))
}

fn list_expr(input: &str) -> IResult<&str, Expr> {
    let (input, _) = tok("[")(input)?;
    let (input, items) = separated_list0(tok(","), expr)(input)?;
    let (input, _) = tok("]")(input)?;
    Ok((input, Expr::List(items)))
}

fn query(input: &str) -> IResult<&str, Query> {
    let (input, scans) = separated_list1(tok(","), scan)(input)?;
    let (input, steps) = many0(step)(input)?;
    Ok((input, Query { scans, steps }))
}

fn scan(input: &str) -> IResult<&str, Scan> {
    let (input, pat) = pat(input)?;
    let (input, source) = opt(preceded(keyword("in"), orelse_expr))(input)?;
    Ok((input, Scan { pat, source }))
}

fn step(input: &str) -> IResult<&str, Step> {
    alt((
        map(preceded(keyword("where"), expr), Step::Where),
        map(preceded(keyword("yield"), expr), Step::Yield),
    ))(input)
}

// ============================================================================
// Patterns and types
// ============================================================================

fn pat(input: &str) -> IResult<&str, Pat> {
    alt((
        value(Pat::Wildcard, keyword("_")),
        map(literal, Pat::Literal),
        paren_pat,
        map(ident, Pat::Var),
    ))(input)
}

fn paren_pat(input: &str) -> IResult<&str, Pat> {
    let (input, _) = tok("(")(input)?;
    let (input, mut items) = separated_list0(tok(","), pat)(input)?;
    let (input, _) = tok(")")(input)?;
    let p = match items.len() {
        0 => Pat::Literal(Literal::Unit),
        1 => items.remove(0),
        _ => Pat::Tuple(items),
    };
    Ok((input, p))
}

fn ty(input: &str) -> IResult<&str, Type> {
    let (input, mut parts) = separated_list1(tok("*"), ty_app)(input)?;
    Ok((
        input,
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Type::Tuple(parts)
        },
    ))
}

fn ty_app(input: &str) -> IResult<&str, Type> {
    let (input, base) = ty_atom(input)?;
    let (input, ctors) = many0(alt((keyword("list"), keyword("bag"))))(input)?;
    Ok((
        input,
        ctors.into_iter().fold(base, |t, ctor| match ctor {
            "bag" => Type::Bag(Box::new(t)),
            _ => Type::List(Box::new(t)),
        }),
    ))
}

fn ty_atom(input: &str) -> IResult<&str, Type> {
    alt((
        value(Type::Int, keyword("int")),
        value(Type::Bool, keyword("bool")),
        value(Type::String, keyword("string")),
        value(Type::Unit, keyword("unit")),
        paren_ty,
    ))(input)
}

fn paren_ty(input: &str) -> IResult<&str, Type> {
    let (input, _) = tok("(")(input)?;
    let (input, t) = ty(input)?;
    let (input, _) = tok(")")(input)?;
    Ok((input, t))
}

// ============================================================================
// Declarations
// ============================================================================

fn decl(input: &str) -> IResult<&str, Decl> {
    let (input, d) = alt((val_decl, fun_decl))(input)?;
    let (input, _) = opt(tok(";"))(input)?;
    Ok((input, d))
}

fn val_decl(input: &str) -> IResult<&str, Decl> {
    let (input, _) = keyword("val")(input)?;
    let (input, name) = ident(input)?;
    let (input, ty) = opt(preceded(tok(":"), ty))(input)?;
    let (input, value) = opt(preceded(eq_sign, expr))(input)?;
    Ok((input, Decl::Val { name, ty, value }))
}

fn fun_decl(input: &str) -> IResult<&str, Decl> {
    let (input, _) = keyword("fun")(input)?;
    let (input, name) = ident(input)?;
    let (input, param) = pat(input)?;
    let (input, _) = eq_sign(input)?;
    let (input, body) = expr(input)?;
    Ok((input, Decl::Fun { name, param, body }))
}
