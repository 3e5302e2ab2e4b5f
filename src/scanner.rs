use std::fmt::{self, Display, Formatter};
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Pos {
    pub offset_in_line: usize,
    pub line: usize,
}

impl Display for Pos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.offset_in_line)
    }
}

#[derive(Clone, Error, Debug, PartialEq, Eq)]
#[error("{} at {pos}", error.message())]
pub struct Error {
    pub error: ErrorType,
    pub pos: Pos,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorType {
    UnterminatedString,
    UnrecognizedToken,
}

impl ErrorType {
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnterminatedString => "unterminated string",
            Self::UnrecognizedToken => "unrecognized token",
        }
    }
}

/// A token in the input stream
/// Contains a data which is the symbol variant and a position
/// Note that pos is always defined, but in the case of EOF will describe a location
/// potentially off the end of the input stream
#[derive(Debug, PartialEq, Clone)]
pub struct Token<'code> {
    pub data: TokenType<'code>,
    pub pos: Pos,
}

#[derive(Debug, PartialEq, Clone)]
pub enum TokenType<'code> {
    Symbol(Symbol),
    Keyword(Keyword),
    Identifier(&'code str),
    Int(i64),
    Float(f64),
    /// Raw string contents between the quotes. Double-quoted strings carry
    /// their interpolation slots unexpanded; the parser splits them.
    Str {
        content: &'code str,
        interpolated: bool,
    },
    Eof,
}

impl<'code> PartialEq<Symbol> for TokenType<'code> {
    fn eq(&self, other: &Symbol) -> bool {
        match self {
            TokenType::Symbol(sym) => *sym == *other,
            _ => false,
        }
    }
}

impl<'code> PartialEq<Keyword> for TokenType<'code> {
    fn eq(&self, other: &Keyword) -> bool {
        match self {
            TokenType::Keyword(key) => *key == *other,
            _ => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Symbol {
    // Punctuation
    Period,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Colon,
    Pipe,
    PipeTo,
    Equal,

    // Operators usable as prefix callables
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqualEqual,
    Less,
    Greater,
}

impl Symbol {
    /// The builtin-registry name for operator symbols; None for punctuation.
    pub fn builtin_name(&self) -> Option<&'static str> {
        match self {
            Symbol::Plus => Some("+"),
            Symbol::Minus => Some("-"),
            Symbol::Star => Some("*"),
            Symbol::Slash => Some("/"),
            Symbol::Percent => Some("%"),
            Symbol::EqualEqual => Some("=="),
            Symbol::Less => Some("<"),
            Symbol::Greater => Some(">"),
            _ => None,
        }
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = match self {
            Symbol::Period => ".",
            Symbol::Comma => ",",
            Symbol::LeftParen => "(",
            Symbol::RightParen => ")",
            Symbol::LeftBracket => "[",
            Symbol::RightBracket => "]",
            Symbol::LeftBrace => "{",
            Symbol::RightBrace => "}",
            Symbol::Colon => ":",
            Symbol::Pipe => "|",
            Symbol::PipeTo => "|>",
            Symbol::Equal => "=",
            Symbol::Plus => "+",
            Symbol::Minus => "-",
            Symbol::Star => "*",
            Symbol::Slash => "/",
            Symbol::Percent => "%",
            Symbol::EqualEqual => "==",
            Symbol::Less => "<",
            Symbol::Greater => ">",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    If,
    Then,
    Else,
    True,
    False,
    Null,
}

const KEYWORD_LITERAL_TO_SYMBOL: [(&str, Keyword); 6] = [
    ("if", Keyword::If),
    ("then", Keyword::Then),
    ("else", Keyword::Else),
    ("true", Keyword::True),
    ("false", Keyword::False),
    ("null", Keyword::Null),
];

impl Display for Keyword {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone)]
pub struct Scanner<'code> {
    // Code, assumed to be valid utf-8, however, we want to iterate byte by byte
    // We mostly don't care about utf-8 and this should allow it to process just fine in strings
    code: &'code [u8],
    // The offset of the next character to process
    // When offset == code.len() the next character to emit is an EOF, when offset > code.len() this is a coding error
    offset: usize,

    // Track the state for helpful offsets; lines are 1-based for error display
    line: usize,
    offset_in_line: usize,
}

impl<'lex> Scanner<'lex> {
    pub fn new(code: &'lex str) -> Scanner<'lex> {
        Scanner {
            code: code.as_bytes(),
            offset: 0,
            line: 1,
            offset_in_line: 0,
        }
    }

    /// Determine if the next token returned would be EOF
    pub fn is_at_eof(&self) -> bool {
        matches!(
            self.clone().next(),
            Ok(Token {
                data: TokenType::Eof,
                pos: _,
            })
        )
    }

    /// Consume the next token iff. it matches the given predicate.
    /// If it does not, the next call to next will return it
    /// This function cannot error, it is assumed that a consumer is uninterested in consuming error state
    pub fn next_if<P>(&mut self, predicate: P) -> Option<Token<'lex>>
    where
        P: FnOnce(&TokenType<'lex>) -> bool,
    {
        let before = self.clone();
        if let Ok(token) = self.next() {
            if predicate(&token.data) {
                return Some(token);
            }
        }
        *self = before;
        None
    }

    pub fn peek(&self) -> Result<Token<'lex>, Error> {
        let mut clone = self.clone();
        clone.next()
    }

    pub fn next(&mut self) -> Result<Token<'lex>, Error> {
        // First things first, consume any leading whitespace
        self.gobble_whitespace();
        let pos = self.current_pos();
        if self.offset > self.code.len() {
            panic!("scanned past EOF");
        } else if self.offset == self.code.len() {
            return Ok(Token {
                data: TokenType::Eof,
                pos,
            });
        }
        let ch = self.code[self.offset];
        // Track the previous offset, some tokens like to have it
        let offset = self.offset;
        self.offset += 1;
        match ch {
            b'(' => self.symbol_token(Symbol::LeftParen, pos),
            b')' => self.symbol_token(Symbol::RightParen, pos),
            b'[' => self.symbol_token(Symbol::LeftBracket, pos),
            b']' => self.symbol_token(Symbol::RightBracket, pos),
            b'{' => self.symbol_token(Symbol::LeftBrace, pos),
            b'}' => self.symbol_token(Symbol::RightBrace, pos),
            b',' => self.symbol_token(Symbol::Comma, pos),
            b'.' => self.symbol_token(Symbol::Period, pos),
            b':' => self.symbol_token(Symbol::Colon, pos),
            b'+' => self.symbol_token(Symbol::Plus, pos),
            b'*' => self.symbol_token(Symbol::Star, pos),
            b'/' => self.symbol_token(Symbol::Slash, pos),
            b'%' => self.symbol_token(Symbol::Percent, pos),
            b'<' => self.symbol_token(Symbol::Less, pos),
            b'>' => self.symbol_token(Symbol::Greater, pos),
            b'|' => {
                if self.consume_next_char_if_eq(b'>') {
                    self.offset_in_line += 2;
                    Ok(Token {
                        data: TokenType::Symbol(Symbol::PipeTo),
                        pos,
                    })
                } else {
                    self.symbol_token(Symbol::Pipe, pos)
                }
            }
            b'=' => {
                let symbol = if self.consume_next_char_if_eq(b'=') {
                    self.offset_in_line += 2;
                    Symbol::EqualEqual
                } else {
                    self.offset_in_line += 1;
                    Symbol::Equal
                };
                Ok(Token {
                    data: TokenType::Symbol(symbol),
                    pos,
                })
            }
            b'-' => {
                // A minus glued to a digit is a negative literal; the spaced
                // form is the subtraction builtin in prefix position
                if self.offset < self.code.len() && self.code[self.offset].is_ascii_digit() {
                    self.offset_in_line += 1;
                    self.number(offset, pos)
                } else {
                    self.symbol_token(Symbol::Minus, pos)
                }
            }
            b'#' => {
                // Gobble the comment (and any shebang line) and then recursively call
                let mut comment_len = 1;
                while self.consume_next_char_if_neq(b'\n') {
                    comment_len += 1;
                }
                self.offset_in_line += comment_len;
                // We don't consume the newline so there is no need to increment line here
                // This assumes that the recursive call will start by gobbling the newline
                self.next()
            }
            b'0'..=b'9' => {
                self.offset_in_line += 1;
                self.number(offset, pos)
            }
            b'\'' => self.string(offset, pos, b'\'', false),
            b'"' => self.string(offset, pos, b'"', true),
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let mut ident_len = 1;
                while self.consume_next_char_if_match(|ch| ch.is_ascii_alphanumeric() || ch == b'_')
                {
                    ident_len += 1;
                }
                // At most one trailing apostrophe (e.g. res')
                if self.consume_next_char_if_eq(b'\'') {
                    ident_len += 1;
                }
                self.offset_in_line += ident_len;
                // SAFETY: We only accept ascii characters for identifiers and keywords
                let identifier = unsafe { self.code_subslice(offset, ident_len) };
                let token = if let Some((_, kw)) = KEYWORD_LITERAL_TO_SYMBOL
                    .iter()
                    .find(|(lit, _)| *lit == identifier)
                {
                    Token {
                        data: TokenType::Keyword(*kw),
                        pos,
                    }
                } else {
                    Token {
                        data: TokenType::Identifier(identifier),
                        pos,
                    }
                };
                Ok(token)
            }
            _ => {
                self.offset_in_line += 1;
                Err(Error {
                    error: ErrorType::UnrecognizedToken,
                    pos,
                })
            }
        }
    }

    fn symbol_token(&mut self, symbol: Symbol, pos: Pos) -> Result<Token<'lex>, Error> {
        self.offset_in_line += 1;
        Ok(Token {
            data: TokenType::Symbol(symbol),
            pos,
        })
    }

    // The leading character (digit or minus) has already been consumed;
    // offset is the index of that leading character
    fn number(&mut self, offset: usize, pos: Pos) -> Result<Token<'lex>, Error> {
        let mut num_len = self.offset - offset;
        while self.consume_next_char_if_match(|ch| ch.is_ascii_digit()) {
            num_len += 1;
        }
        // Only take the dot when a digit follows, otherwise it terminates the statement
        let mut is_float = false;
        if self.offset + 1 < self.code.len()
            && self.code[self.offset] == b'.'
            && self.code[self.offset + 1].is_ascii_digit()
        {
            self.offset += 1;
            num_len += 1;
            is_float = true;
            while self.consume_next_char_if_match(|ch| ch.is_ascii_digit()) {
                num_len += 1;
            }
        }
        self.offset_in_line += num_len - 1;
        // SAFETY: numbers are built from single byte ascii characters
        let num_slice = unsafe { self.code_subslice(offset, num_len) };
        let data = if is_float {
            TokenType::Float(num_slice.parse::<f64>().unwrap())
        } else {
            match num_slice.parse::<i64>() {
                Ok(int) => TokenType::Int(int),
                // Out of integer range, fall back to the float form
                Err(_) => TokenType::Float(num_slice.parse::<f64>().unwrap()),
            }
        };
        Ok(Token { data, pos })
    }

    // The opening quote has already been consumed; offset is its index
    fn string(
        &mut self,
        offset: usize,
        pos: Pos,
        quote: u8,
        interpolated: bool,
    ) -> Result<Token<'lex>, Error> {
        self.offset_in_line += 1;
        let mut str_len = 0;
        // Strings are multiline, so we need to track things like whether or not we cross a newline
        while self.offset < self.code.len() && self.code[self.offset] != quote {
            let ch = self.code[self.offset];
            self.offset += 1;
            str_len += 1;
            if ch == b'\n' {
                self.offset_in_line = 0;
                self.line += 1;
            } else {
                self.offset_in_line += 1;
            }
        }
        if self.offset == self.code.len() {
            Err(Error {
                error: ErrorType::UnterminatedString,
                pos,
            })
        } else {
            // We validly closed the string, we also need to consume the final quote
            self.offset += 1;
            self.offset_in_line += 1;

            let content = unsafe {
                // SAFETY: The only way to terminate the string validly is between valid single byte quote characters
                self.code_subslice(offset + 1, str_len)
            };
            Ok(Token {
                data: TokenType::Str {
                    content,
                    interpolated,
                },
                pos,
            })
        }
    }

    pub fn current_pos(&self) -> Pos {
        Pos {
            line: self.line,
            offset_in_line: self.offset_in_line,
        }
    }

    fn consume_next_char_if_eq(&mut self, next_ch: u8) -> bool {
        if self.offset < self.code.len() && self.code[self.offset] == next_ch {
            self.offset += 1;
            true
        } else {
            false
        }
    }

    fn consume_next_char_if_neq(&mut self, not_next_ch: u8) -> bool {
        if self.offset < self.code.len() && self.code[self.offset] != not_next_ch {
            self.offset += 1;
            true
        } else {
            false
        }
    }

    fn consume_next_char_if_match<F>(&mut self, predicate: F) -> bool
    where
        F: FnOnce(u8) -> bool,
    {
        if self.offset < self.code.len() && predicate(self.code[self.offset]) {
            self.offset += 1;
            true
        } else {
            false
        }
    }

    fn consume_next_char_if_ws(&mut self) -> bool {
        if self.offset < self.code.len() && WS_CHARS.contains(&self.code[self.offset]) {
            self.offset += 1;
            true
        } else {
            false
        }
    }

    fn gobble_whitespace(&mut self) {
        loop {
            if self.consume_next_char_if_ws() {
                self.offset_in_line += 1;
            } else if self.consume_next_char_if_eq(b'\n') {
                self.offset_in_line = 0;
                self.line += 1;
            } else {
                break;
            }
        }
    }

    // Slice the code slice to a length and and offset
    // This requires that offset point to the start of a code point
    unsafe fn code_subslice(&self, offset: usize, len: usize) -> &'lex str {
        let initial_skip = std::str::from_utf8_unchecked(&self.code[offset..]);
        &initial_skip[0..len]
    }
}

const WS_CHARS: &[u8] = b" \r\t";
