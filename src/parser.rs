use thiserror::Error;

use crate::ast::{Expr, ExprInner, Literal, PathSeg, Program, Segment, Stmt, StmtInner};
use crate::scanner::{self, Keyword, Pos, Scanner, Symbol, Token, TokenType};
use ordered_float::OrderedFloat;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{kind} at line {}: {message}", pos.line)]
pub struct Error {
    /// "ParseError", or "LexError" when the scanner raised it
    pub kind: &'static str,
    pub message: String,
    pub pos: Pos,
}

impl Error {
    fn new(message: impl Into<String>, pos: Pos) -> Error {
        Error {
            kind: "ParseError",
            message: message.into(),
            pos,
        }
    }
}

impl From<scanner::Error> for Error {
    fn from(err: scanner::Error) -> Error {
        Error {
            kind: "LexError",
            message: err.error.message().to_string(),
            pos: err.pos,
        }
    }
}

/// Parse a complete source text into a program.
pub fn parse(code: &str) -> Result<Program, Error> {
    let mut scanner = Scanner::new(code);
    let mut stmts = Vec::new();
    while let Some(stmt) = statement(&mut scanner)? {
        stmts.push(stmt);
    }
    Ok(Program(stmts))
}

/// Parse the next statement, or None once the token stream is exhausted.
pub fn statement(scanner: &mut Scanner) -> Result<Option<Stmt>, Error> {
    // Stray terminators are empty statements; skip them
    while consume_next_symbol_eq(Symbol::Period, scanner) {}
    if scanner.is_at_eof() {
        return Ok(None);
    }
    let pos = scanner.peek()?.pos;
    let stmt = if let Some((name, params)) = assignment_head(scanner) {
        let expr = expression(scanner)?;
        consume_next_symbol_or_err(Symbol::Period, "expected '.' after an assignment", scanner)?;
        Stmt {
            pos,
            inner: StmtInner::Assign { name, params, expr },
        }
    } else {
        let expr = expression(scanner)?;
        consume_next_symbol_or_err(Symbol::Period, "expected '.' after an expression", scanner)?;
        Stmt {
            pos,
            inner: StmtInner::Expr(expr),
        }
    };
    Ok(Some(stmt))
}

// Probe for `IDENT { IDENT } '='` and consume through the '=' when it matches.
// Anything else rewinds the scanner and signals an expression statement.
fn assignment_head(scanner: &mut Scanner) -> Option<(String, Vec<String>)> {
    let before = scanner.clone();
    let name = match scanner.next() {
        Ok(Token {
            data: TokenType::Identifier(name),
            pos: _,
        }) => name.to_string(),
        _ => {
            *scanner = before;
            return None;
        }
    };
    let mut params = Vec::new();
    loop {
        match scanner.next() {
            Ok(Token {
                data: TokenType::Identifier(param),
                pos: _,
            }) => params.push(param.to_string()),
            Ok(Token {
                data: TokenType::Symbol(Symbol::Equal),
                pos: _,
            }) => return Some((name, params)),
            _ => {
                *scanner = before;
                return None;
            }
        }
    }
}

fn expression(scanner: &mut Scanner) -> Result<Expr, Error> {
    if let Ok(token) = scanner.peek() {
        if token.data == Keyword::If {
            return if_expression(scanner);
        }
    }
    pipeline(scanner)
}

// The branches are full expressions, so pipelines nest inside the branches
// rather than capturing the whole if
fn if_expression(scanner: &mut Scanner) -> Result<Expr, Error> {
    let pos = scanner.peek()?.pos;
    _ = scanner.next();
    let test = expression(scanner)?;
    consume_next_keyword_or_err(Keyword::Then, "expected 'then' after the condition", scanner)?;
    let if_true = expression(scanner)?;
    consume_next_keyword_or_err(Keyword::Else, "expected 'else' after the then-branch", scanner)?;
    let if_false = expression(scanner)?;
    Ok(Expr {
        pos,
        inner: ExprInner::If {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        },
    })
}

fn pipeline(scanner: &mut Scanner) -> Result<Expr, Error> {
    let mut expr = application(scanner)?;
    while consume_next_symbol_eq(Symbol::PipeTo, scanner) {
        let pos = expr.pos;
        let call = application(scanner)?;
        expr = Expr {
            pos,
            inner: ExprInner::Pipeline {
                left: Box::new(expr),
                call: Box::new(call),
            },
        };
    }
    Ok(expr)
}

// Greedy prefix application: keep taking atoms until something that cannot
// start an atom (terminator, pipeline, keyword, closing bracket) shows up
fn application(scanner: &mut Scanner) -> Result<Expr, Error> {
    let first = atom(scanner)?;
    let mut arguments = Vec::new();
    while next_starts_atom(scanner) {
        arguments.push(atom(scanner)?);
    }
    if arguments.is_empty() {
        Ok(first)
    } else {
        Ok(Expr {
            pos: first.pos,
            inner: ExprInner::Apply {
                callee: Box::new(first),
                arguments,
            },
        })
    }
}

fn next_starts_atom(scanner: &Scanner) -> bool {
    match scanner.peek() {
        Ok(token) => match token.data {
            TokenType::Identifier(_)
            | TokenType::Int(_)
            | TokenType::Float(_)
            | TokenType::Str { .. } => true,
            TokenType::Keyword(kw) => {
                matches!(kw, Keyword::True | Keyword::False | Keyword::Null)
            }
            TokenType::Symbol(symbol) => {
                symbol.builtin_name().is_some()
                    || matches!(
                        symbol,
                        Symbol::LeftParen | Symbol::LeftBracket | Symbol::LeftBrace
                    )
            }
            TokenType::Eof => false,
        },
        Err(_) => false,
    }
}

fn atom(scanner: &mut Scanner) -> Result<Expr, Error> {
    let token = scanner.next()?;
    let pos = token.pos;
    let inner = match token.data {
        TokenType::Int(int) => ExprInner::Literal(Literal::Int(int)),
        TokenType::Float(dbl) => ExprInner::Literal(Literal::Float(OrderedFloat(dbl))),
        TokenType::Str {
            content,
            interpolated: false,
        } => ExprInner::Literal(Literal::Str(content.to_string())),
        TokenType::Str {
            content,
            interpolated: true,
        } => ExprInner::Interp(split_template(content, pos)?),
        TokenType::Keyword(Keyword::True) => ExprInner::Literal(Literal::Boolean(true)),
        TokenType::Keyword(Keyword::False) => ExprInner::Literal(Literal::Boolean(false)),
        TokenType::Keyword(Keyword::Null) => ExprInner::Literal(Literal::Null),
        TokenType::Identifier(name) => {
            let base = Expr {
                pos,
                inner: ExprInner::Identifier(name.to_string()),
            };
            return path_tail(base, scanner);
        }
        TokenType::Symbol(symbol) if symbol.builtin_name().is_some() => {
            // Operator in value position names the builtin of the same spelling
            ExprInner::Identifier(symbol.builtin_name().unwrap().to_string())
        }
        TokenType::Symbol(Symbol::LeftParen) => {
            let inner = expression(scanner)?;
            consume_next_symbol_or_err(Symbol::RightParen, "expected a ')'", scanner)?;
            return Ok(inner);
        }
        TokenType::Symbol(Symbol::LeftBracket) => array_literal(scanner)?,
        TokenType::Symbol(Symbol::LeftBrace) => dict_literal(scanner)?,
        _ => {
            return Err(Error::new(
                "unexpected token: expected a number, string, identifier, bracket or '('",
                pos,
            ));
        }
    };
    Ok(Expr { pos, inner })
}

// After an identifier, a '|' opens nested access components
fn path_tail(base: Expr, scanner: &mut Scanner) -> Result<Expr, Error> {
    let mut segments = Vec::new();
    while consume_next_symbol_eq(Symbol::Pipe, scanner) {
        let token = scanner.next()?;
        let segment = match token.data {
            TokenType::Identifier(name) => PathSeg::Key(name.to_string()),
            TokenType::Int(int) => PathSeg::Index(int),
            TokenType::Float(dbl) => PathSeg::Key(format!("{}", dbl)),
            TokenType::Str { content, .. } => PathSeg::Key(content.to_string()),
            TokenType::Symbol(Symbol::LeftParen) => {
                let inner = expression(scanner)?;
                consume_next_symbol_or_err(Symbol::RightParen, "expected a ')'", scanner)?;
                PathSeg::Expr(Box::new(inner))
            }
            _ => {
                return Err(Error::new(
                    "expected a key, index, or '(' after '|'",
                    token.pos,
                ));
            }
        };
        segments.push(segment);
    }
    if segments.is_empty() {
        Ok(base)
    } else {
        let pos = base.pos;
        Ok(Expr {
            pos,
            inner: ExprInner::Path {
                base: Box::new(base),
                segments,
            },
        })
    }
}

fn array_literal(scanner: &mut Scanner) -> Result<ExprInner, Error> {
    let mut elements = Vec::new();
    if consume_next_symbol_eq(Symbol::RightBracket, scanner) {
        return Ok(ExprInner::Array(elements));
    }
    loop {
        elements.push(expression(scanner)?);
        if consume_next_symbol_eq(Symbol::Comma, scanner) {
            continue;
        }
        consume_next_symbol_or_err(Symbol::RightBracket, "expected ',' or ']'", scanner)?;
        break;
    }
    Ok(ExprInner::Array(elements))
}

fn dict_literal(scanner: &mut Scanner) -> Result<ExprInner, Error> {
    let mut pairs = Vec::new();
    if consume_next_symbol_eq(Symbol::RightBrace, scanner) {
        return Ok(ExprInner::Dict(pairs));
    }
    loop {
        let token = scanner.next()?;
        // Bareword keys read as if they were quoted; numeric keys coerce to
        // their decimal spelling
        let key = match token.data {
            TokenType::Identifier(name) => name.to_string(),
            TokenType::Str { content, .. } => content.to_string(),
            TokenType::Int(int) => format!("{}", int),
            TokenType::Float(dbl) => format!("{}", dbl),
            _ => {
                return Err(Error::new("expected a dictionary key", token.pos));
            }
        };
        consume_next_symbol_or_err(Symbol::Colon, "expected ':' after a dictionary key", scanner)?;
        let value = expression(scanner)?;
        pairs.push((key, value));
        if consume_next_symbol_eq(Symbol::Comma, scanner) {
            continue;
        }
        consume_next_symbol_or_err(Symbol::RightBrace, "expected ',' or '}'", scanner)?;
        break;
    }
    Ok(ExprInner::Dict(pairs))
}

// Split the raw text of a double-quoted string into literal fragments and
// interpolation slots. Slots hold a variable name plus an optional literal
// access path; anything fancier is rejected here rather than at runtime.
fn split_template(content: &str, pos: Pos) -> Result<Vec<Segment>, Error> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = content.char_indices();
    while let Some((start, ch)) = rest.next() {
        if ch != '{' {
            text.push(ch);
            continue;
        }
        let mut end = None;
        for (i, inner_ch) in rest.by_ref() {
            match inner_ch {
                '}' => {
                    end = Some(i);
                    break;
                }
                '{' => {
                    return Err(Error::new("nested braces in interpolation slot", pos));
                }
                _ => {}
            }
        }
        let end = end
            .ok_or_else(|| Error::new("unterminated '{' in interpolated string", pos))?;
        let raw = &content[start..=end];
        let (name, path) = parse_slot(&content[start + 1..end], raw, pos)?;
        if !text.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut text)));
        }
        segments.push(Segment::Slot {
            name,
            path,
            raw: raw.to_string(),
        });
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

// A slot is `name` or `name|component|...` where components are bare
// identifiers or numbers; expressions are not allowed inside slots
fn parse_slot(inner: &str, raw: &str, pos: Pos) -> Result<(String, Vec<PathSeg>), Error> {
    let mut parts = inner.split('|');
    let name = parts.next().unwrap_or("").trim();
    if !is_identifier(name) {
        return Err(Error::new(
            format!("invalid interpolation slot '{}'", raw),
            pos,
        ));
    }
    let mut path = Vec::new();
    for part in parts {
        let part = part.trim();
        if let Ok(int) = part.parse::<i64>() {
            path.push(PathSeg::Index(int));
        } else if is_identifier(part) {
            path.push(PathSeg::Key(part.to_string()));
        } else {
            return Err(Error::new(
                format!("invalid interpolation slot '{}'", raw),
                pos,
            ));
        }
    }
    Ok((name.to_string(), path))
}

fn is_identifier(text: &str) -> bool {
    let body = text.strip_suffix('\'').unwrap_or(text);
    let mut chars = body.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

// Consume and return the next token from the scanner if it matches the given symbol
fn consume_next_symbol_eq(required_next: Symbol, scanner: &mut Scanner) -> bool {
    scanner
        .next_if(|data| match data {
            TokenType::Symbol(symbol) => *symbol == required_next,
            _ => false,
        })
        .is_some()
}

// Consume the next token from the scanner. Error if it does not match the given input
fn consume_next_symbol_or_err(
    required_next: Symbol,
    err_msg: &str,
    scanner: &mut Scanner,
) -> Result<(), Error> {
    let token = scanner.next()?;
    if token.data == required_next {
        Ok(())
    } else {
        Err(Error::new(err_msg, token.pos))
    }
}

fn consume_next_keyword_or_err(
    required_next: Keyword,
    err_msg: &str,
    scanner: &mut Scanner,
) -> Result<(), Error> {
    let token = scanner.next()?;
    if token.data == required_next {
        Ok(())
    } else {
        Err(Error::new(err_msg, token.pos))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_one(code: &str) -> Stmt {
        let Program(stmts) = parse(code).unwrap();
        assert_eq!(1, stmts.len());
        stmts.into_iter().next().unwrap()
    }

    fn render(code: &str) -> String {
        format!("{}", parse_one(code))
    }

    #[test]
    fn parse_value_assignment() {
        assert_eq!("(= x 1)", render("x = 1."));
    }

    #[test]
    fn parse_function_definition() {
        // A multi-identifier left side defines a closure
        assert_eq!(
            "(= f a b (call (ident *) (ident a) (ident b)))",
            render("f a b = * a b.")
        );
    }

    #[test]
    fn parse_greedy_application() {
        assert_eq!(
            "(call (ident echo) (ident res) 1 'x')",
            render("echo res 1 'x'.")
        );
    }

    #[test]
    fn parse_parenthesized_argument_is_one_atom() {
        assert_eq!(
            "(call (ident map) (call (ident +) 1) (ident myarray))",
            render("map (+ 1) myarray.")
        );
    }

    #[test]
    fn parse_pipeline_is_left_associative() {
        assert_eq!(
            "(|> (|> (ident a) (ident b)) (call (ident c) 1))",
            render("a |> b |> c 1.")
        );
    }

    #[test]
    fn parse_pipeline_chain_with_operators() {
        assert_eq!(
            "(|> (|> (|> (ident nums) (call (ident map) (call (ident *) 2))) \
             (call (ident filter) (call (ident >) 5))) \
             (call (ident fold) (ident +) 0))",
            render("nums |> map (* 2) |> filter (> 5) |> fold + 0.")
        );
    }

    #[test]
    fn parse_if_branches_take_pipelines() {
        assert_eq!(
            "(if (ident c) then (|> (ident a) (ident b)) else (ident d))",
            render("if c then a |> b else d.")
        );
    }

    #[test]
    fn parse_nested_if_in_else_branch() {
        assert_eq!(
            "(if (ident a) then 1 else (if (ident b) then 2 else 3))",
            render("if a then 1 else if b then 2 else 3.")
        );
    }

    #[test]
    fn parse_if_condition_can_be_application() {
        assert_eq!(
            "(if (call (ident ==) (ident x) 1) then 'yes' else 'no')",
            render("if == x 1 then 'yes' else 'no'.")
        );
    }

    #[test]
    fn parse_path_access() {
        assert_eq!(
            "(path (ident d) x 1 (ident k))",
            render("d|x|1|(k).")
        );
    }

    #[test]
    fn parse_path_as_argument() {
        assert_eq!(
            "(call (ident echo) (path (ident d) x 1))",
            render("echo d|x|1.")
        );
    }

    #[test]
    fn parse_array_literal_with_applications() {
        assert_eq!(
            "(array (call (ident +) 1 2) 3)",
            render("[+ 1 2, 3].")
        );
    }

    #[test]
    fn parse_dict_literal_keys() {
        assert_eq!(
            "(dict x: 1 y: 'two' 3: true)",
            render("{x: 1, \"y\": 'two', 3: true}.")
        );
    }

    #[test]
    fn parse_empty_containers() {
        assert_eq!("(array)", render("[]."));
        assert_eq!("(dict)", render("{}."));
    }

    #[test]
    fn parse_interpolated_template() {
        let stmt = parse_one("echo \"Hello, {name}!\".");
        match stmt.inner {
            StmtInner::Expr(Expr {
                inner: ExprInner::Apply { arguments, .. },
                ..
            }) => match &arguments[0].inner {
                ExprInner::Interp(segments) => {
                    assert_eq!(
                        &vec![
                            Segment::Text("Hello, ".to_string()),
                            Segment::Slot {
                                name: "name".to_string(),
                                path: vec![],
                                raw: "{name}".to_string(),
                            },
                            Segment::Text("!".to_string()),
                        ],
                        segments
                    );
                }
                other => panic!("expected an interpolation: {:?}", other),
            },
            other => panic!("expected an application: {:?}", other),
        }
    }

    #[test]
    fn parse_slot_with_path() {
        let stmt = parse_one("echo \"{d|x|1}\".");
        match stmt.inner {
            StmtInner::Expr(Expr {
                inner: ExprInner::Apply { arguments, .. },
                ..
            }) => match &arguments[0].inner {
                ExprInner::Interp(segments) => {
                    assert_eq!(
                        &vec![Segment::Slot {
                            name: "d".to_string(),
                            path: vec![PathSeg::Key("x".to_string()), PathSeg::Index(1)],
                            raw: "{d|x|1}".to_string(),
                        }],
                        segments
                    );
                }
                other => panic!("expected an interpolation: {:?}", other),
            },
            other => panic!("expected an application: {:?}", other),
        }
    }

    #[test]
    fn parse_single_quotes_do_not_interpolate() {
        assert_eq!(
            "(call (ident echo) 'Hello, {name}!')",
            render("echo 'Hello, {name}!'.")
        );
    }

    #[test]
    fn reject_operator_syntax_in_slot() {
        let err = parse("echo \"{a+b}\".").unwrap_err();
        assert!(err.message.contains("invalid interpolation slot"));
    }

    #[test]
    fn reject_nested_braces_in_slot() {
        let err = parse("echo \"{a{b}}\".").unwrap_err();
        assert!(err.message.contains("nested braces"));
    }

    #[test]
    fn reject_unterminated_slot() {
        let err = parse("echo \"{a\".").unwrap_err();
        assert!(err.message.contains("unterminated '{'"));
    }

    #[test]
    fn reject_missing_period() {
        let err = parse("x = 1").unwrap_err();
        assert!(err.message.contains("expected '.'"));
    }

    #[test]
    fn empty_statements_are_elided() {
        let Program(stmts) = parse("x = 1.. y = 2. .").unwrap();
        assert_eq!(2, stmts.len());
        let Program(stmts) = parse("...").unwrap();
        assert!(stmts.is_empty());
    }

    #[test]
    fn error_carries_line() {
        let err = parse("x = 1.\ny = [1, 2").unwrap_err();
        assert_eq!(2, err.pos.line);
    }

    #[test]
    fn empty_source_is_empty_program() {
        let Program(stmts) = parse("# just a comment\n").unwrap();
        assert!(stmts.is_empty());
    }

    #[test]
    fn multiple_statements_share_one_line() {
        let Program(stmts) = parse("x = 1. y = 2. echo y.").unwrap();
        assert_eq!(3, stmts.len());
    }
}
