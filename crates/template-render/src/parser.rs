//! Template parser.
//!
//! Splits the template source into text and `{{ }}` / `{% %}` / `{# #}` tags,
//! parses tag contents with nom, and folds the block statements into a
//! [`Node`] tree. Macros are hoisted into a separate table so they can be
//! called from anywhere in the body.

use indexmap::IndexMap;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, not, opt, recognize, value, verify},
    error::{Error as NomError, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use sqlchain_api::{ChainError, Result};

use crate::ast::{BinaryOp, Expr, LoopTarget, MacroDef, Node, UnaryOp};
use crate::value::Value;

type PResult<'a, T> = IResult<&'a str, T>;

const RESERVED: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "true", "false", "none", "null", "True",
    "False", "None",
];

/// Parsed template body plus the macros it defines.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody {
    pub nodes: Vec<Node>,
    pub macros: IndexMap<String, MacroDef>,
}

pub fn parse_template(name: &str, source: &str) -> Result<ParsedBody> {
    let tokens = tokenize(name, source)?;
    let mut builder = TreeBuilder {
        name,
        tokens: tokens.into_iter(),
        macros: IndexMap::new(),
    };
    let (nodes, _) = builder.parse_nodes(&[])?;
    Ok(ParsedBody {
        nodes,
        macros: builder.macros,
    })
}

/// Parse a standalone expression, as found inside `{{ }}`.
pub fn parse_expression(name: &str, source: &str) -> Result<Expr> {
    all_consuming(ws(expression))(source)
        .map(|(_, expr)| expr)
        .map_err(|e| ChainError::syntax(name, describe(source, e)))
}

// =============================================================================
// TOKENIZER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Output,
    Block,
    Comment,
}

#[derive(Debug)]
enum Piece {
    Text(String),
    Tag {
        kind: TagKind,
        content: String,
        trim_before: bool,
        trim_after: bool,
    },
}

#[derive(Debug)]
enum Token {
    Text(String),
    Output(String),
    Block(String),
}

fn tokenize(name: &str, source: &str) -> Result<Vec<Token>> {
    let mut pieces = Vec::new();
    let mut rest = source;

    while let Some(start) = find_tag_start(rest) {
        let (text, after) = rest.split_at(start);
        if !text.is_empty() {
            pieces.push(Piece::Text(text.to_string()));
        }
        let (kind, close) = match &after[..2] {
            "{{" => (TagKind::Output, "}}"),
            "{%" => (TagKind::Block, "%}"),
            _ => (TagKind::Comment, "#}"),
        };
        let mut body = &after[2..];
        let trim_before = body.starts_with('-');
        if trim_before {
            body = &body[1..];
        }
        let end = find_close(body, close, kind != TagKind::Comment).ok_or_else(|| {
            ChainError::syntax(name, format!("unclosed tag near `{}`", snippet(after)))
        })?;
        let mut content = &body[..end];
        let trim_after = content.ends_with('-');
        if trim_after {
            content = &content[..content.len() - 1];
        }
        pieces.push(Piece::Tag {
            kind,
            content: content.to_string(),
            trim_before,
            trim_after,
        });
        rest = &body[end + close.len()..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest.to_string()));
    }

    apply_whitespace_control(&mut pieces);

    Ok(pieces
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Text(text) if text.is_empty() => None,
            Piece::Text(text) => Some(Token::Text(text)),
            Piece::Tag {
                kind: TagKind::Output,
                content,
                ..
            } => Some(Token::Output(content)),
            Piece::Tag {
                kind: TagKind::Block,
                content,
                ..
            } => Some(Token::Block(content)),
            Piece::Tag {
                kind: TagKind::Comment,
                ..
            } => None,
        })
        .collect())
}

/// `-` markers strip neighbouring whitespace; block and comment tags also
/// swallow the single newline that follows them.
fn apply_whitespace_control(pieces: &mut [Piece]) {
    for i in 0..pieces.len() {
        let flags = match &pieces[i] {
            Piece::Tag {
                kind,
                trim_before,
                trim_after,
                ..
            } => Some((*trim_before, *trim_after, *kind != TagKind::Output)),
            Piece::Text(_) => None,
        };
        let Some((trim_before, trim_after, is_block)) = flags else {
            continue;
        };
        if trim_before && i > 0 {
            if let Piece::Text(text) = &mut pieces[i - 1] {
                let trimmed = text.trim_end().len();
                text.truncate(trimmed);
            }
        }
        if let Some(Piece::Text(text)) = pieces.get_mut(i + 1) {
            if trim_after {
                *text = text.trim_start().to_string();
            } else if is_block {
                if let Some(stripped) = text.strip_prefix("\r\n") {
                    *text = stripped.to_string();
                } else if let Some(stripped) = text.strip_prefix('\n') {
                    *text = stripped.to_string();
                }
            }
        }
    }
}

fn find_tag_start(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(1))
        .find(|&i| bytes[i] == b'{' && matches!(bytes[i + 1], b'{' | b'%' | b'#'))
}

/// Position of the closing delimiter, skipping over quoted strings.
fn find_close(body: &str, close: &str, respect_quotes: bool) -> Option<usize> {
    let bytes = body.as_bytes();
    let close = close.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == q {
                    quote = None;
                }
            }
            None => {
                if respect_quotes && (b == b'\'' || b == b'"') {
                    quote = Some(b);
                } else if i + 1 < bytes.len() && b == close[0] && bytes[i + 1] == close[1] {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

fn snippet(s: &str) -> String {
    let line = s.lines().next().unwrap_or("");
    line.chars().take(40).collect()
}

fn describe(source: &str, err: nom::Err<NomError<&str>>) -> String {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            if e.input.trim().is_empty() {
                format!("incomplete expression `{}`", source.trim())
            } else {
                format!(
                    "cannot parse `{}` near `{}`",
                    source.trim(),
                    snippet(e.input.trim_start())
                )
            }
        }
        nom::Err::Incomplete(_) => format!("incomplete expression `{}`", source.trim()),
    }
}

// =============================================================================
// STATEMENTS AND TREE BUILDING
// =============================================================================

#[derive(Debug, Clone)]
enum Stmt {
    If(Expr),
    Elif(Expr),
    Else,
    EndIf,
    For { target: LoopTarget, iterable: Expr },
    EndFor,
    Set { name: String, value: Expr },
    Do(Expr),
    Macro {
        name: String,
        params: Vec<(String, Option<Expr>)>,
    },
    EndMacro,
}

impl Stmt {
    fn keyword(&self) -> &'static str {
        match self {
            Stmt::If(_) => "if",
            Stmt::Elif(_) => "elif",
            Stmt::Else => "else",
            Stmt::EndIf => "endif",
            Stmt::For { .. } => "for",
            Stmt::EndFor => "endfor",
            Stmt::Set { .. } => "set",
            Stmt::Do(_) => "do",
            Stmt::Macro { .. } => "macro",
            Stmt::EndMacro => "endmacro",
        }
    }
}

fn parse_statement(name: &str, source: &str) -> Result<Stmt> {
    all_consuming(terminated(statement, multispace0))(source)
        .map(|(_, stmt)| stmt)
        .map_err(|e| ChainError::syntax(name, describe(source, e)))
}

struct TreeBuilder<'n> {
    name: &'n str,
    tokens: std::vec::IntoIter<Token>,
    macros: IndexMap<String, MacroDef>,
}

impl<'n> TreeBuilder<'n> {
    /// Parse nodes until one of `stop` is reached (returned alongside) or the
    /// token stream ends, which is only legal when `stop` is empty.
    fn parse_nodes(&mut self, stop: &[&str]) -> Result<(Vec<Node>, Option<Stmt>)> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Output(source) => nodes.push(Node::Output(parse_expression(self.name, &source)?)),
                Token::Block(source) => {
                    let stmt = parse_statement(self.name, &source)?;
                    if stop.contains(&stmt.keyword()) {
                        return Ok((nodes, Some(stmt)));
                    }
                    match stmt {
                        Stmt::If(cond) => nodes.push(self.parse_if(cond)?),
                        Stmt::For { target, iterable } => {
                            nodes.push(self.parse_for(target, iterable)?)
                        }
                        Stmt::Set { name, value } => nodes.push(Node::Set { name, value }),
                        Stmt::Do(expr) => nodes.push(Node::Do(expr)),
                        Stmt::Macro { name, params } => self.parse_macro(name, params)?,
                        other => {
                            return Err(ChainError::syntax(
                                self.name,
                                format!("unexpected {{% {} %}}", other.keyword()),
                            ))
                        }
                    }
                }
            }
        }
        match stop.first() {
            None => Ok((nodes, None)),
            Some(expected) => Err(ChainError::syntax(
                self.name,
                format!("unexpected end of template, expected {{% {} %}}", expected),
            )),
        }
    }

    fn parse_if(&mut self, first: Expr) -> Result<Node> {
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();
        let mut cond = first;
        loop {
            let (body, end) = self.parse_nodes(&["elif", "else", "endif"])?;
            branches.push((cond, body));
            match end {
                Some(Stmt::Elif(next)) => cond = next,
                Some(Stmt::Else) => {
                    let (body, _) = self.parse_nodes(&["endif"])?;
                    otherwise = body;
                    break;
                }
                _ => break,
            }
        }
        Ok(Node::If {
            branches,
            otherwise,
        })
    }

    fn parse_for(&mut self, target: LoopTarget, iterable: Expr) -> Result<Node> {
        let (body, end) = self.parse_nodes(&["else", "endfor"])?;
        let empty = match end {
            Some(Stmt::Else) => self.parse_nodes(&["endfor"])?.0,
            _ => Vec::new(),
        };
        Ok(Node::For {
            target,
            iterable,
            body,
            empty,
        })
    }

    fn parse_macro(&mut self, name: String, params: Vec<(String, Option<Expr>)>) -> Result<()> {
        let (body, _) = self.parse_nodes(&["endmacro"])?;
        if self.macros.contains_key(&name) {
            return Err(ChainError::syntax(
                self.name,
                format!("macro {} is defined twice", name),
            ));
        }
        self.macros.insert(
            name.clone(),
            MacroDef {
                name,
                params,
                body,
            },
        );
        Ok(())
    }
}

fn statement(input: &str) -> PResult<'_, Stmt> {
    alt((
        map(preceded(keyword("if"), expression), Stmt::If),
        map(preceded(keyword("elif"), expression), Stmt::Elif),
        value(Stmt::Else, keyword("else")),
        value(Stmt::EndIf, keyword("endif")),
        for_statement,
        value(Stmt::EndFor, keyword("endfor")),
        set_statement,
        map(preceded(keyword("do"), expression), Stmt::Do),
        macro_statement,
        value(Stmt::EndMacro, keyword("endmacro")),
    ))(input)
}

fn for_statement(input: &str) -> PResult<'_, Stmt> {
    map(
        tuple((
            keyword("for"),
            ws(identifier),
            opt(preceded(char(','), ws(identifier))),
            keyword("in"),
            expression,
        )),
        |(_, first, second, _, iterable)| {
            let target = match second {
                Some(second) => LoopTarget::Pair(first, second),
                None => LoopTarget::Single(first),
            };
            Stmt::For { target, iterable }
        },
    )(input)
}

fn set_statement(input: &str) -> PResult<'_, Stmt> {
    map(
        tuple((keyword("set"), ws(identifier), char('='), expression)),
        |(_, name, _, value)| Stmt::Set { name, value },
    )(input)
}

fn macro_statement(input: &str) -> PResult<'_, Stmt> {
    let param = pair(ws(identifier), opt(preceded(char('='), ws(expression))));
    map(
        tuple((
            keyword("macro"),
            ws(identifier),
            delimited(
                char('('),
                separated_list0(char(','), param),
                pair(multispace0, char(')')),
            ),
        )),
        |(_, name, params)| Stmt::Macro { name, params },
    )(input)
}

// =============================================================================
// EXPRESSIONS
// =============================================================================

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn raw_ident(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    ws(verify(raw_ident, move |s: &str| s == word))
}

fn identifier(input: &str) -> PResult<'_, String> {
    map(
        verify(raw_ident, |s: &str| !RESERVED.contains(&s)),
        String::from,
    )(input)
}

fn string_literal(input: &str) -> PResult<'_, Expr> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, c)) if c == '\'' || c == '"' => c,
        _ => return Err(nom::Err::Error(NomError::new(input, ErrorKind::Char))),
    };
    let mut out = String::new();
    let mut escaped = false;
    for (idx, c) in chars {
        if escaped {
            out.push(match c {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok((&input[idx + c.len_utf8()..], Expr::Literal(Value::Str(out))));
        } else {
            out.push(c);
        }
    }
    Err(nom::Err::Error(NomError::new(input, ErrorKind::Char)))
}

fn number(input: &str) -> PResult<'_, Expr> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;
    let parsed = if text.contains('.') {
        text.parse::<f64>().ok().map(Value::Float)
    } else {
        text.parse::<i64>().ok().map(Value::Int)
    };
    match parsed {
        Some(v) => Ok((rest, Expr::Literal(v))),
        None => Err(nom::Err::Error(NomError::new(input, ErrorKind::Digit))),
    }
}

fn constant(input: &str) -> PResult<'_, Expr> {
    let (rest, word) = raw_ident(input)?;
    let value = match word {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        "none" | "None" | "null" => Value::Null,
        _ => return Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag))),
    };
    Ok((rest, Expr::Literal(value)))
}

fn list_literal(input: &str) -> PResult<'_, Expr> {
    map(
        delimited(
            char('['),
            terminated(
                separated_list0(char(','), ws(expression)),
                opt(ws(char(','))),
            ),
            preceded(multispace0, char(']')),
        ),
        Expr::List,
    )(input)
}

fn dict_literal(input: &str) -> PResult<'_, Expr> {
    map(
        delimited(
            char('{'),
            terminated(
                separated_list0(
                    char(','),
                    separated_pair(ws(expression), char(':'), ws(expression)),
                ),
                opt(ws(char(','))),
            ),
            preceded(multispace0, char('}')),
        ),
        Expr::Dict,
    )(input)
}

fn parenthesized(input: &str) -> PResult<'_, Expr> {
    delimited(char('('), ws(expression), char(')'))(input)
}

fn primary(input: &str) -> PResult<'_, Expr> {
    alt((
        parenthesized,
        list_literal,
        dict_literal,
        string_literal,
        number,
        constant,
        map(identifier, Expr::Var),
    ))(input)
}

enum CallArg {
    Positional(Expr),
    Keyword(String, Expr),
}

fn call_arg(input: &str) -> PResult<'_, CallArg> {
    alt((
        map(
            separated_pair(
                ws(identifier),
                terminated(char('='), not(char('='))),
                ws(expression),
            ),
            |(name, expr)| CallArg::Keyword(name, expr),
        ),
        map(ws(expression), CallArg::Positional),
    ))(input)
}

fn call_args(input: &str) -> PResult<'_, Vec<CallArg>> {
    delimited(
        char('('),
        terminated(separated_list0(char(','), call_arg), opt(ws(char(',')))),
        preceded(multispace0, char(')')),
    )(input)
}

fn split_args(args: Vec<CallArg>) -> (Vec<Expr>, Vec<(String, Expr)>) {
    let mut positional = Vec::new();
    let mut keywords = Vec::new();
    for arg in args {
        match arg {
            CallArg::Positional(expr) => positional.push(expr),
            CallArg::Keyword(name, expr) => keywords.push((name, expr)),
        }
    }
    (positional, keywords)
}

enum Suffix {
    Attr(String),
    Index(Expr),
    Call(Vec<CallArg>),
}

fn suffix(input: &str) -> PResult<'_, Suffix> {
    alt((
        map(
            preceded(pair(multispace0, char('.')), raw_ident),
            |name: &str| Suffix::Attr(name.to_string()),
        ),
        map(
            delimited(pair(multispace0, char('[')), ws(expression), char(']')),
            Suffix::Index,
        ),
        map(preceded(multispace0, call_args), Suffix::Call),
    ))(input)
}

fn postfix(input: &str) -> PResult<'_, Expr> {
    let (input, base) = primary(input)?;
    let (input, suffixes) = many0(suffix)(input)?;
    let expr = suffixes.into_iter().fold(base, |expr, suffix| match suffix {
        Suffix::Attr(name) => Expr::Attr(Box::new(expr), name),
        Suffix::Index(index) => Expr::Index(Box::new(expr), Box::new(index)),
        Suffix::Call(args) => {
            let (args, kwargs) = split_args(args);
            Expr::Call {
                func: Box::new(expr),
                args,
                kwargs,
            }
        }
    });
    Ok((input, expr))
}

fn filtered(input: &str) -> PResult<'_, Expr> {
    let (input, base) = postfix(input)?;
    let (input, filters) = many0(preceded(
        ws(char('|')),
        pair(raw_ident, opt(call_args)),
    ))(input)?;
    let expr = filters.into_iter().fold(base, |expr, (name, args)| {
        let (args, _) = split_args(args.unwrap_or_default());
        Expr::Filter {
            value: Box::new(expr),
            name: name.to_string(),
            args,
        }
    });
    Ok((input, expr))
}

fn unary(input: &str) -> PResult<'_, Expr> {
    alt((
        map(preceded(pair(multispace0, char('-')), unary), |expr| {
            Expr::Unary(UnaryOp::Neg, Box::new(expr))
        }),
        preceded(multispace0, filtered),
    ))(input)
}

fn binary_level<'a>(
    input: &'a str,
    operand: fn(&'a str) -> PResult<'a, Expr>,
    operator: fn(&'a str) -> PResult<'a, BinaryOp>,
) -> PResult<'a, Expr> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(operator, operand))(input)?;
    let expr = rest.into_iter().fold(first, |lhs, (op, rhs)| {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    });
    Ok((input, expr))
}

fn mul_op(input: &str) -> PResult<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Mod, char('%')),
    )))(input)
}

fn add_op(input: &str) -> PResult<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    )))(input)
}

fn concat_op(input: &str) -> PResult<'_, BinaryOp> {
    ws(value(BinaryOp::Concat, char('~')))(input)
}

fn and_op(input: &str) -> PResult<'_, BinaryOp> {
    value(BinaryOp::And, keyword("and"))(input)
}

fn or_op(input: &str) -> PResult<'_, BinaryOp> {
    value(BinaryOp::Or, keyword("or"))(input)
}

fn mul_expr(input: &str) -> PResult<'_, Expr> {
    binary_level(input, unary, mul_op)
}

fn add_expr(input: &str) -> PResult<'_, Expr> {
    binary_level(input, mul_expr, add_op)
}

fn concat_expr(input: &str) -> PResult<'_, Expr> {
    binary_level(input, add_expr, concat_op)
}

fn compare_op(input: &str) -> PResult<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Neq, tag("!=")),
        value(BinaryOp::Lte, tag("<=")),
        value(BinaryOp::Gte, tag(">=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
    )))(input)
}

enum CompareTail {
    Binary(BinaryOp, Expr),
    Test(bool, String),
}

fn comparison(input: &str) -> PResult<'_, Expr> {
    let (input, lhs) = concat_expr(input)?;
    let (input, tail) = opt(alt((
        map(pair(compare_op, concat_expr), |(op, rhs)| {
            CompareTail::Binary(op, rhs)
        }),
        map(
            preceded(pair(keyword("not"), keyword("in")), concat_expr),
            |rhs| CompareTail::Binary(BinaryOp::NotIn, rhs),
        ),
        map(preceded(keyword("in"), concat_expr), |rhs| {
            CompareTail::Binary(BinaryOp::In, rhs)
        }),
        map(
            preceded(keyword("is"), pair(opt(keyword("not")), ws(raw_ident))),
            |(negated, name): (Option<&str>, &str)| {
                CompareTail::Test(negated.is_some(), name.to_string())
            },
        ),
    )))(input)?;
    let expr = match tail {
        None => lhs,
        Some(CompareTail::Binary(op, rhs)) => Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        Some(CompareTail::Test(negated, name)) => Expr::Test {
            value: Box::new(lhs),
            name,
            negated,
        },
    };
    Ok((input, expr))
}

fn not_expr(input: &str) -> PResult<'_, Expr> {
    alt((
        map(preceded(keyword("not"), not_expr), |expr| {
            Expr::Unary(UnaryOp::Not, Box::new(expr))
        }),
        comparison,
    ))(input)
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    binary_level(input, not_expr, and_op)
}

fn or_expr(input: &str) -> PResult<'_, Expr> {
    binary_level(input, and_expr, or_op)
}

fn expression(input: &str) -> PResult<'_, Expr> {
    let (input, then) = or_expr(input)?;
    let (input, cond) = opt(preceded(
        keyword("if"),
        pair(or_expr, opt(preceded(keyword("else"), expression))),
    ))(input)?;
    let expr = match cond {
        None => then,
        Some((cond, otherwise)) => Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        },
    };
    Ok((input, expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        parse_expression("test", src).unwrap()
    }

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    #[test]
    fn test_parse_attribute_call_and_filter() {
        let parsed = expr("casts.items() | length");
        match parsed {
            Expr::Filter { value, name, args } => {
                assert_eq!(name, "length");
                assert!(args.is_empty());
                match *value {
                    Expr::Call { func, args, .. } => {
                        assert!(args.is_empty());
                        assert_eq!(*func, Expr::Attr(var("casts"), "items".to_string()));
                    }
                    other => panic!("Expected call, got {:?}", other),
                }
            }
            other => panic!("Expected filter, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        // `not a in b and c` parses as `(not (a in b)) and c`
        let parsed = expr("not a in b and c");
        match parsed {
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                assert_eq!(*rhs, Expr::Var("c".to_string()));
                match *lhs {
                    Expr::Unary(UnaryOp::Not, inner) => {
                        assert_eq!(*inner, Expr::Binary(BinaryOp::In, var("a"), var("b")));
                    }
                    other => panic!("Expected not, got {:?}", other),
                }
            }
            other => panic!("Expected and, got {:?}", other),
        }
    }

    #[test]
    fn test_not_in_and_tests() {
        assert_eq!(
            expr("a not in b"),
            Expr::Binary(BinaryOp::NotIn, var("a"), var("b"))
        );
        assert_eq!(
            expr("a is not none"),
            Expr::Test {
                value: var("a"),
                name: "none".to_string(),
                negated: true,
            }
        );
    }

    #[test]
    fn test_keyword_arguments_and_literals() {
        let parsed = expr("output(name, type='NUMBER')");
        match parsed {
            Expr::Call { args, kwargs, .. } => {
                assert_eq!(args, vec![Expr::Var("name".to_string())]);
                assert_eq!(kwargs.len(), 1);
                assert_eq!(kwargs[0].0, "type");
            }
            other => panic!("Expected call, got {:?}", other),
        }
        assert_eq!(
            expr("[1, 2.5, 'x', none,]"),
            Expr::List(vec![
                Expr::Literal(Value::Int(1)),
                Expr::Literal(Value::Float(2.5)),
                Expr::Literal(Value::Str("x".to_string())),
                Expr::Literal(Value::Null),
            ])
        );
    }

    #[test]
    fn test_equality_argument_is_positional() {
        match expr("f(a == b)") {
            Expr::Call { args, kwargs, .. } => {
                assert!(kwargs.is_empty());
                assert_eq!(args, vec![Expr::Binary(BinaryOp::Eq, var("a"), var("b"))]);
            }
            other => panic!("Expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_conditional_expression() {
        match expr("', ' if not loop.last") {
            Expr::Conditional { otherwise, .. } => assert!(otherwise.is_none()),
            other => panic!("Expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_blocks_into_tree() {
        let body = parse_template(
            "test",
            "{% for c in cols %}{{ c }}{% else %}none{% endfor %}{% if a %}x{% elif b %}y{% else %}z{% endif %}",
        )
        .unwrap();
        assert_eq!(body.nodes.len(), 2);
        match &body.nodes[0] {
            Node::For { body, empty, .. } => {
                assert_eq!(body.len(), 1);
                assert_eq!(empty, &vec![Node::Text("none".to_string())]);
            }
            other => panic!("Expected for, got {:?}", other),
        }
        match &body.nodes[1] {
            Node::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise, &vec![Node::Text("z".to_string())]);
            }
            other => panic!("Expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_whitespace_control() {
        let body = parse_template("test", "a   {%- if x -%}   b   {%- endif %}\nc").unwrap();
        assert_eq!(body.nodes[0], Node::Text("a".to_string()));
        match &body.nodes[1] {
            Node::If { branches, .. } => {
                assert_eq!(branches[0].1, vec![Node::Text("b".to_string())]);
            }
            other => panic!("Expected if, got {:?}", other),
        }
        // the newline after a block tag is swallowed
        assert_eq!(body.nodes[2], Node::Text("c".to_string()));
    }

    #[test]
    fn test_macros_are_hoisted() {
        let body = parse_template(
            "test",
            "{{ pick(1) }}{% macro pick(x, y='b') %}{{ x }}{{ y }}{% endmacro %}",
        )
        .unwrap();
        assert_eq!(body.nodes.len(), 1);
        let def = &body.macros["pick"];
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].1.is_some());
    }

    #[test]
    fn test_closing_delimiter_inside_string() {
        let body = parse_template("test", "{{ '}}' }}").unwrap();
        assert_eq!(
            body.nodes,
            vec![Node::Output(Expr::Literal(Value::Str("}}".to_string())))]
        );
    }

    #[test]
    fn test_syntax_errors() {
        let unclosed = parse_template("broken", "{% if x %}a").unwrap_err();
        assert!(matches!(unclosed, ChainError::TemplateSyntax { ref template, .. } if template == "broken"));

        assert!(parse_template("broken", "{{ a + }}").is_err());
        assert!(parse_template("broken", "{% endfor %}").is_err());
        assert!(parse_template("broken", "{{ a ").is_err());
        assert!(parse_template("broken", "{% frobnicate %}").is_err());
    }
}
