//! Lexer for Strada source text
//!
//! Produces one token at a time from a read-only source buffer, tracking
//! line and column for diagnostics. Sigils (`$`, `@`, `%`) are distinct
//! tokens; the parser combines a sigil with the following identifier into a
//! variable reference. Regex literals are context-sensitive: a `/` starts a
//! pattern only when the previous significant token cannot end an
//! expression (after `=~`, `!~`, `(`, `,`, operators, or start of input).
//!
//! Double-quoted strings keep `\$` and `\@` verbatim as the stable
//! placeholder form; codegen's interpolation splitter consumes them.

use std::fmt;

/// Reserved words. Type names (`int`, `array`, ...) are not listed here;
/// they stay ordinary identifiers and are resolved in declaration context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    If,
    Elsif,
    Else,
    Unless,
    While,
    Until,
    For,
    Foreach,
    Last,
    Next,
    Return,
    Try,
    Catch,
    Throw,
    Goto,
    My,
    Func,
    Extern,
    Package,
    Use,
    Version,
    ImportLib,
    Struct,
    Inherit,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Kw {
    pub fn from_word(word: &str) -> Option<Kw> {
        let kw = match word {
            "if" => Kw::If,
            "elsif" => Kw::Elsif,
            "else" => Kw::Else,
            "unless" => Kw::Unless,
            "while" => Kw::While,
            "until" => Kw::Until,
            "for" => Kw::For,
            "foreach" => Kw::Foreach,
            "last" => Kw::Last,
            "next" => Kw::Next,
            "return" => Kw::Return,
            "try" => Kw::Try,
            "catch" => Kw::Catch,
            "throw" => Kw::Throw,
            "goto" => Kw::Goto,
            "my" => Kw::My,
            "func" => Kw::Func,
            "extern" => Kw::Extern,
            "package" => Kw::Package,
            "use" => Kw::Use,
            "version" => Kw::Version,
            "import_lib" => Kw::ImportLib,
            "struct" => Kw::Struct,
            "inherit" => Kw::Inherit,
            "and" => Kw::And,
            "or" => Kw::Or,
            "not" => Kw::Not,
            "eq" => Kw::Eq,
            "ne" => Kw::Ne,
            "lt" => Kw::Lt,
            "gt" => Kw::Gt,
            "le" => Kw::Le,
            "ge" => Kw::Ge,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Num(f64),
    Str { value: String, interpolated: bool },
    /// Backtick command literal, lowered to a runtime shell call
    Command(String),
    Regex { pattern: String, flags: String },
    Subst { pattern: String, replacement: String, flags: String },
    /// `qw(...)` word list, split on whitespace at lex time
    Words(Vec<String>),
    Ident(String),
    Kw(Kw),
    // Sigils. Percent doubles as the modulo operator in infix position.
    Dollar,
    At,
    Percent,
    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Colon,
    Question,
    Arrow,
    FatArrow,
    ColonColon,
    Dot,
    DotDot,
    Ellipsis,
    Backslash,
    // Operators
    Assign,
    PlusAssign,
    MinusAssign,
    ConcatAssign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    EqEq,
    BangEq,
    Lt,
    Gt,
    Le,
    Ge,
    BindMatch,
    BindNotMatch,
    AndAnd,
    OrOr,
    Bang,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    PlusPlus,
    MinusMinus,
    Eof,
}

/// A token with its source lexeme and position (1-indexed line and column).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub col: usize,
}

impl Token {
    pub fn is_kw(&self, kw: Kw) -> bool {
        self.kind == TokenKind::Kw(kw)
    }

    /// Identifier text, if this token is an identifier.
    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Eof => write!(f, "end of file"),
            _ => write!(f, "'{}'", self.lexeme),
        }
    }
}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    /// Kind of the last token produced, for the regex-vs-division decision.
    prev: Option<TokenKind>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            prev: None,
        }
    }

    /// Tokenize an entire source buffer. Convenience for the parser and tests.
    pub fn tokenize(src: &'a str) -> Result<Vec<Token>, String> {
        let mut lexer = Lexer::new(src);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn err(&self, line: usize, col: usize, msg: impl fmt::Display) -> String {
        format!("{}:{}: lex error: {}", line, col, msg)
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek_byte() == Some(b) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> Result<(), String> {
        loop {
            match self.peek_byte() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'#') => {
                    while let Some(b) = self.peek_byte() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_byte_at(1) == Some(b'*') => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek_byte() {
                            Some(b'*') if self.peek_byte_at(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(self.err(line, col, "unterminated block comment"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Whether a `/` at the current position begins a regex literal.
    /// True when the previous significant token cannot end an expression.
    fn regex_position(&self) -> bool {
        match &self.prev {
            None => true,
            Some(kind) => !matches!(
                kind,
                TokenKind::Int(_)
                    | TokenKind::Num(_)
                    | TokenKind::Str { .. }
                    | TokenKind::Command(_)
                    | TokenKind::Regex { .. }
                    | TokenKind::Subst { .. }
                    | TokenKind::Words(_)
                    | TokenKind::Ident(_)
                    | TokenKind::RParen
                    | TokenKind::RBracket
                    | TokenKind::RBrace
                    | TokenKind::PlusPlus
                    | TokenKind::MinusMinus
                    | TokenKind::Dollar
                    | TokenKind::At
                    | TokenKind::Percent
            ),
        }
    }

    pub fn next_token(&mut self) -> Result<Token, String> {
        self.skip_trivia()?;

        let start = self.pos;
        let (line, col) = (self.line, self.col);

        let make = |kind: TokenKind, lexeme: String| Token {
            kind,
            lexeme,
            line,
            col,
        };

        let b = match self.peek_byte() {
            Some(b) => b,
            None => {
                let tok = make(TokenKind::Eof, String::new());
                self.prev = Some(TokenKind::Eof);
                return Ok(tok);
            }
        };

        let kind = if b.is_ascii_alphabetic() || b == b'_' {
            self.scan_word(line, col)?
        } else if b.is_ascii_digit() {
            self.scan_number(line, col)?
        } else if b == b'"' {
            self.scan_double_quoted(line, col)?
        } else if b == b'\'' {
            self.scan_single_quoted(line, col)?
        } else if b == b'`' {
            self.scan_command(line, col)?
        } else if b == b'/' && self.regex_position() {
            self.bump();
            let (pattern, flags) = self.scan_pattern_tail(line, col, "regex literal")?;
            TokenKind::Regex { pattern, flags }
        } else {
            self.scan_operator(line, col)?
        };

        let lexeme = self.src[start..self.pos].to_string();
        self.prev = Some(kind.clone());
        Ok(make(kind, lexeme))
    }

    fn scan_word(&mut self, line: usize, col: usize) -> Result<TokenKind, String> {
        let start = self.pos;
        while let Some(b) = self.peek_byte() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let word = &self.src[start..self.pos];

        // qw(...) word-list literal
        if word == "qw" && self.peek_byte() == Some(b'(') {
            self.bump();
            let content_start = self.pos;
            loop {
                match self.peek_byte() {
                    Some(b')') => break,
                    Some(_) => {
                        self.bump();
                    }
                    None => return Err(self.err(line, col, "unterminated qw list")),
                }
            }
            let content = self.src[content_start..self.pos].to_string();
            self.bump(); // ')'
            let words = content.split_whitespace().map(str::to_string).collect();
            return Ok(TokenKind::Words(words));
        }

        // s/pat/repl/flags substitution, only in pattern position
        if word == "s"
            && self.peek_byte() == Some(b'/')
            && matches!(
                self.prev,
                Some(TokenKind::BindMatch) | Some(TokenKind::BindNotMatch)
            )
        {
            self.bump(); // '/'
            let pattern = self.scan_delimited_pattern(line, col, "substitution pattern")?;
            let replacement =
                self.scan_delimited_pattern(line, col, "substitution replacement")?;
            let flags = self.scan_regex_flags(line, col)?;
            return Ok(TokenKind::Subst {
                pattern,
                replacement,
                flags,
            });
        }

        match Kw::from_word(word) {
            Some(kw) => Ok(TokenKind::Kw(kw)),
            None => Ok(TokenKind::Ident(word.to_string())),
        }
    }

    fn scan_number(&mut self, line: usize, col: usize) -> Result<TokenKind, String> {
        let start = self.pos;

        if self.peek_byte() == Some(b'0') {
            match self.peek_byte_at(1) {
                Some(b'x') | Some(b'X') => {
                    self.bump();
                    self.bump();
                    return self.scan_radix(line, col, start + 2, 16, "hex");
                }
                Some(b'b') | Some(b'B') => {
                    self.bump();
                    self.bump();
                    return self.scan_radix(line, col, start + 2, 2, "binary");
                }
                Some(d) if d.is_ascii_digit() => {
                    self.bump();
                    return self.scan_radix(line, col, start + 1, 8, "octal");
                }
                _ => {}
            }
        }

        let mut is_float = false;
        while matches!(self.peek_byte(), Some(b) if b.is_ascii_digit()) {
            self.bump();
        }
        // A '.' starts a fraction only when a digit follows; `1..10` is a range.
        if self.peek_byte() == Some(b'.')
            && matches!(self.peek_byte_at(1), Some(b) if b.is_ascii_digit())
        {
            is_float = true;
            self.bump();
            while matches!(self.peek_byte(), Some(b) if b.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek_byte(), Some(b'e') | Some(b'E')) {
            let mut ahead = 1;
            if matches!(self.peek_byte_at(1), Some(b'+') | Some(b'-')) {
                ahead = 2;
            }
            if matches!(self.peek_byte_at(ahead), Some(b) if b.is_ascii_digit()) {
                is_float = true;
                for _ in 0..ahead {
                    self.bump();
                }
                while matches!(self.peek_byte(), Some(b) if b.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Num)
                .map_err(|_| self.err(line, col, format!("malformed numeric literal '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.err(line, col, format!("malformed numeric literal '{}'", text)))
        }
    }

    fn scan_radix(
        &mut self,
        line: usize,
        col: usize,
        digits_start: usize,
        radix: u32,
        what: &str,
    ) -> Result<TokenKind, String> {
        while matches!(self.peek_byte(), Some(b) if (b as char).is_digit(radix) ) {
            self.bump();
        }
        let digits = &self.src[digits_start..self.pos];
        if digits.is_empty() {
            return Err(self.err(line, col, format!("malformed {} literal", what)));
        }
        i64::from_str_radix(digits, radix)
            .map(TokenKind::Int)
            .map_err(|_| self.err(line, col, format!("malformed {} literal '{}'", what, digits)))
    }

    fn scan_double_quoted(&mut self, line: usize, col: usize) -> Result<TokenKind, String> {
        self.bump(); // opening quote
        let mut value: Vec<u8> = Vec::new();
        let mut interpolated = false;
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => value.push(b'\n'),
                    Some(b't') => value.push(b'\t'),
                    Some(b'r') => value.push(b'\r'),
                    Some(b'0') => value.push(b'\0'),
                    Some(b'e') => value.push(b'\x1b'),
                    Some(b'\\') => value.push(b'\\'),
                    Some(b'"') => value.push(b'"'),
                    // Escaped sigils stay verbatim for the interpolation splitter
                    Some(b'$') => value.extend_from_slice(b"\\$"),
                    Some(b'@') => value.extend_from_slice(b"\\@"),
                    Some(other) => value.push(other),
                    None => return Err(self.err(line, col, "unterminated string literal")),
                },
                Some(sigil @ (b'$' | b'@')) => {
                    if matches!(self.peek_byte(), Some(b) if b.is_ascii_alphanumeric() || b == b'_' || b == b'{')
                    {
                        interpolated = true;
                    }
                    value.push(sigil);
                }
                Some(other) => value.push(other),
                None => return Err(self.err(line, col, "unterminated string literal")),
            }
        }
        Ok(TokenKind::Str {
            value: String::from_utf8_lossy(&value).into_owned(),
            interpolated,
        })
    }

    fn scan_single_quoted(&mut self, line: usize, col: usize) -> Result<TokenKind, String> {
        self.bump(); // opening quote
        let mut value: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                Some(b'\'') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'\\') => value.push(b'\\'),
                    Some(b'\'') => value.push(b'\''),
                    Some(other) => {
                        value.push(b'\\');
                        value.push(other);
                    }
                    None => return Err(self.err(line, col, "unterminated string literal")),
                },
                Some(other) => value.push(other),
                None => return Err(self.err(line, col, "unterminated string literal")),
            }
        }
        Ok(TokenKind::Str {
            value: String::from_utf8_lossy(&value).into_owned(),
            interpolated: false,
        })
    }

    fn scan_command(&mut self, line: usize, col: usize) -> Result<TokenKind, String> {
        self.bump(); // opening backtick
        let mut value: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                Some(b'`') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'`') => value.push(b'`'),
                    Some(b'\\') => value.push(b'\\'),
                    Some(other) => {
                        value.push(b'\\');
                        value.push(other);
                    }
                    None => return Err(self.err(line, col, "unterminated command literal")),
                },
                Some(other) => value.push(other),
                None => return Err(self.err(line, col, "unterminated command literal")),
            }
        }
        Ok(TokenKind::Command(String::from_utf8_lossy(&value).into_owned()))
    }

    /// Scan `pattern/flags` after the opening `/` has been consumed.
    fn scan_pattern_tail(
        &mut self,
        line: usize,
        col: usize,
        what: &str,
    ) -> Result<(String, String), String> {
        let pattern = self.scan_delimited_pattern(line, col, what)?;
        let flags = self.scan_regex_flags(line, col)?;
        Ok((pattern, flags))
    }

    /// Read pattern characters up to an unescaped `/`, consuming the
    /// delimiter. Backslash escapes pass through verbatim except `\/`.
    fn scan_delimited_pattern(
        &mut self,
        line: usize,
        col: usize,
        what: &str,
    ) -> Result<String, String> {
        let mut out: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                Some(b'/') => return Ok(String::from_utf8_lossy(&out).into_owned()),
                Some(b'\\') => match self.bump() {
                    Some(b'/') => out.push(b'/'),
                    Some(other) => {
                        out.push(b'\\');
                        out.push(other);
                    }
                    None => return Err(self.err(line, col, format!("unterminated {}", what))),
                },
                Some(b'\n') | None => {
                    return Err(self.err(line, col, format!("unterminated {}", what)));
                }
                Some(other) => out.push(other),
            }
        }
    }

    fn scan_regex_flags(&mut self, line: usize, col: usize) -> Result<String, String> {
        let mut flags = String::new();
        while matches!(self.peek_byte(), Some(b) if b.is_ascii_lowercase()) {
            let c = self.bump().unwrap() as char;
            if !matches!(c, 'i' | 'm' | 's' | 'g') {
                return Err(self.err(line, col, format!("unknown regex flag '{}'", c)));
            }
            flags.push(c);
        }
        Ok(flags)
    }

    fn scan_operator(&mut self, line: usize, col: usize) -> Result<TokenKind, String> {
        let b = self.bump().unwrap();
        let kind = match b {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b';' => TokenKind::Semi,
            b',' => TokenKind::Comma,
            b'?' => TokenKind::Question,
            b'$' => TokenKind::Dollar,
            b'@' => TokenKind::At,
            b'\\' => TokenKind::Backslash,
            b'^' => TokenKind::Caret,
            b'~' => TokenKind::Tilde,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'.' => {
                if self.peek_byte() == Some(b'.') && self.peek_byte_at(1) == Some(b'.') {
                    self.bump();
                    self.bump();
                    TokenKind::Ellipsis
                } else if self.eat(b'.') {
                    TokenKind::DotDot
                } else if self.eat(b'=') {
                    TokenKind::ConcatAssign
                } else {
                    TokenKind::Dot
                }
            }
            b'-' => {
                if self.eat(b'>') {
                    TokenKind::Arrow
                } else if self.eat(b'-') {
                    TokenKind::MinusMinus
                } else if self.eat(b'=') {
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            b'=' => {
                if self.eat(b'~') {
                    TokenKind::BindMatch
                } else if self.eat(b'=') {
                    TokenKind::EqEq
                } else if self.eat(b'>') {
                    TokenKind::FatArrow
                } else {
                    TokenKind::Assign
                }
            }
            b'!' => {
                if self.eat(b'~') {
                    TokenKind::BindNotMatch
                } else if self.eat(b'=') {
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            b'+' => {
                if self.eat(b'+') {
                    TokenKind::PlusPlus
                } else if self.eat(b'=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            b'*' => {
                if self.eat(b'*') {
                    TokenKind::StarStar
                } else {
                    TokenKind::Star
                }
            }
            b'<' => {
                if self.eat(b'<') {
                    TokenKind::Shl
                } else if self.eat(b'=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.eat(b'>') {
                    TokenKind::Shr
                } else if self.eat(b'=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            b'&' => {
                if self.eat(b'&') {
                    TokenKind::AndAnd
                } else {
                    TokenKind::Amp
                }
            }
            b'|' => {
                if self.eat(b'|') {
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            b':' => {
                if self.eat(b':') {
                    TokenKind::ColonColon
                } else {
                    TokenKind::Colon
                }
            }
            _ => {
                return Err(self.err(line, col, format!("illegal character '{}'", b as char)));
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src)
            .expect("lexes")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_idents_and_keywords() {
        let toks = kinds("my func foo _bar2 int");
        assert_eq!(
            toks,
            vec![
                TokenKind::Kw(Kw::My),
                TokenKind::Kw(Kw::Func),
                TokenKind::Ident("foo".into()),
                TokenKind::Ident("_bar2".into()),
                TokenKind::Ident("int".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let toks = kinds("42 0x1f 0b101 017 3.5 1e3 2.5e-2");
        assert_eq!(
            toks,
            vec![
                TokenKind::Int(42),
                TokenKind::Int(31),
                TokenKind::Int(5),
                TokenKind::Int(15),
                TokenKind::Num(3.5),
                TokenKind::Num(1000.0),
                TokenKind::Num(0.025),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_range_is_not_a_float() {
        let toks = kinds("1..10");
        assert_eq!(
            toks,
            vec![
                TokenKind::Int(1),
                TokenKind::DotDot,
                TokenKind::Int(10),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings() {
        let toks = kinds(r#"'a\'b' "x\ty" "hi $name" "cost \$5""#);
        assert_eq!(
            toks,
            vec![
                TokenKind::Str {
                    value: "a'b".into(),
                    interpolated: false
                },
                TokenKind::Str {
                    value: "x\ty".into(),
                    interpolated: false
                },
                TokenKind::Str {
                    value: "hi $name".into(),
                    interpolated: true
                },
                TokenKind::Str {
                    value: "cost \\$5".into(),
                    interpolated: false
                },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_command_literal() {
        let toks = kinds("`ls -l`");
        assert_eq!(
            toks,
            vec![TokenKind::Command("ls -l".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_operators_longest_first() {
        let toks = kinds("-> => :: == != <= >= && || .= += -= ** << >> ... ..");
        assert_eq!(
            toks,
            vec![
                TokenKind::Arrow,
                TokenKind::FatArrow,
                TokenKind::ColonColon,
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::ConcatAssign,
                TokenKind::PlusAssign,
                TokenKind::MinusAssign,
                TokenKind::StarStar,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::Ellipsis,
                TokenKind::DotDot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_regex_after_bind() {
        let toks = kinds("$s =~ /ab+c/ig");
        assert_eq!(toks[0], TokenKind::Dollar);
        assert_eq!(toks[1], TokenKind::Ident("s".into()));
        assert_eq!(toks[2], TokenKind::BindMatch);
        assert_eq!(
            toks[3],
            TokenKind::Regex {
                pattern: "ab+c".into(),
                flags: "ig".into()
            }
        );
    }

    #[test]
    fn test_slash_is_division_after_value() {
        let toks = kinds("8 / 2");
        assert_eq!(
            toks,
            vec![
                TokenKind::Int(8),
                TokenKind::Slash,
                TokenKind::Int(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_regex_in_call_position() {
        let toks = kinds("split(/,/, $s)");
        assert_eq!(
            toks[2],
            TokenKind::Regex {
                pattern: ",".into(),
                flags: "".into()
            }
        );
    }

    #[test]
    fn test_substitution() {
        let toks = kinds("$s =~ s/a+/b/g");
        assert_eq!(
            toks[3],
            TokenKind::Subst {
                pattern: "a+".into(),
                replacement: "b".into(),
                flags: "g".into()
            }
        );
    }

    #[test]
    fn test_qw_list() {
        let toks = kinds("qw( alpha beta  gamma )");
        assert_eq!(
            toks,
            vec![
                TokenKind::Words(vec!["alpha".into(), "beta".into(), "gamma".into()]),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments() {
        let toks = kinds("1 # trailing\n/* block\ncomment */ 2");
        assert_eq!(
            toks,
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]
        );
    }

    #[test]
    fn test_line_and_column_tracking() {
        let toks = Lexer::tokenize("a\n  bb").expect("lexes");
        assert_eq!((toks[0].line, toks[0].col), (1, 1));
        assert_eq!((toks[1].line, toks[1].col), (2, 3));
    }

    #[test]
    fn test_unterminated_string_is_fatal() {
        let err = Lexer::tokenize("\"abc").unwrap_err();
        assert!(err.contains("unterminated string"), "{}", err);
    }

    #[test]
    fn test_unknown_regex_flag_is_fatal() {
        let err = Lexer::tokenize("$s =~ /a/x").unwrap_err();
        assert!(err.contains("unknown regex flag"), "{}", err);
    }

    #[test]
    fn test_illegal_character() {
        let err = Lexer::tokenize("§").unwrap_err();
        assert!(err.contains("lex error"), "{}", err);
    }

    #[test]
    fn test_lexeme_round_trip() {
        // Re-concatenating lexemes with whitespace lexes to the same kinds
        let src = "func main ( ) int { my array @xs = ( 1 , 2.5 , 0x1f ) ; \
                   say ( \"hi\" . 'there' ) ; return 0 ; }";
        let tokens = Lexer::tokenize(src).expect("lexes");
        let rebuilt: Vec<String> = tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.lexeme.clone())
            .collect();
        let again = Lexer::tokenize(&rebuilt.join(" ")).expect("relexes");
        let kinds_a: Vec<&TokenKind> = tokens.iter().map(|t| &t.kind).collect();
        let kinds_b: Vec<&TokenKind> = again.iter().map(|t| &t.kind).collect();
        assert_eq!(kinds_a, kinds_b);
    }
}
