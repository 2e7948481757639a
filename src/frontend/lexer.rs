use crate::frontend::token::Token;

/// Source location, 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

/// A token paired with the location where it starts.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexerError {}

/// Hand-written lexer for the PyVM source language.
///
/// Indentation is significant: the lexer measures the leading whitespace of
/// each non-blank line against a stack of open indent widths and emits
/// `Indent`/`Dedent` tokens, the way the surface language's block structure
/// requires. Inside parentheses, newlines and indentation are insignificant.
pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    indents: Vec<usize>,
    paren_depth: usize,
    at_line_start: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            indents: vec![0],
            paren_depth: 0,
            at_line_start: true,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn error(&self, message: impl Into<String>) -> LexerError {
        LexerError {
            message: message.into(),
            line: self.line,
            col: self.col,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens: Vec<Spanned> = Vec::new();

        loop {
            if self.at_line_start && self.paren_depth == 0 {
                if !self.handle_indentation(&mut tokens)? {
                    break;
                }
            }

            self.skip_inline_whitespace();

            let span = self.span();
            let ch = match self.current() {
                Some(ch) => ch,
                None => break,
            };

            match ch {
                '\n' => {
                    self.advance();
                    if self.paren_depth == 0 {
                        tokens.push(Spanned {
                            token: Token::Newline,
                            span,
                        });
                        self.at_line_start = true;
                    }
                }
                '#' => self.skip_comment(),
                ';' => {
                    self.advance();
                    tokens.push(Spanned {
                        token: Token::Semicolon,
                        span,
                    });
                }
                '"' | '\'' => {
                    let token = self.read_string(ch)?;
                    tokens.push(Spanned { token, span });
                }
                '0'..='9' => {
                    let token = self.read_number()?;
                    tokens.push(Spanned { token, span });
                }
                _ if ch.is_alphabetic() || ch == '_' => {
                    let token = self.read_word();
                    tokens.push(Spanned { token, span });
                }
                _ => {
                    let token = self.read_operator(ch)?;
                    tokens.push(Spanned { token, span });
                }
            }
        }

        // A source file that does not end in a newline still terminates its
        // last statement; inject the newline before closing open blocks.
        let needs_newline = matches!(
            tokens.last(),
            Some(Spanned { token, .. })
                if !matches!(token, Token::Newline | Token::Indent | Token::Dedent)
        );
        if needs_newline {
            tokens.push(Spanned {
                token: Token::Newline,
                span: self.span(),
            });
        }

        while self.indents.len() > 1 {
            self.indents.pop();
            tokens.push(Spanned {
                token: Token::Dedent,
                span: self.span(),
            });
        }

        tokens.push(Spanned {
            token: Token::Eof,
            span: self.span(),
        });

        Ok(tokens)
    }

    /// Measure the leading whitespace of the current line and emit
    /// `Indent`/`Dedent` tokens. Blank and comment-only lines are skipped
    /// entirely. Returns false at end of input.
    fn handle_indentation(&mut self, tokens: &mut Vec<Spanned>) -> Result<bool, LexerError> {
        loop {
            let mut width = 0usize;
            while let Some(ch) = self.current() {
                match ch {
                    ' ' => {
                        width += 1;
                        self.advance();
                    }
                    '\t' => {
                        // Tabs advance to the next multiple of eight.
                        width = (width / 8 + 1) * 8;
                        self.advance();
                    }
                    _ => break,
                }
            }

            match self.current() {
                None => return Ok(false),
                Some('\n') => {
                    self.advance();
                    continue;
                }
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some(_) => {
                    self.at_line_start = false;
                    let top = *self.indents.last().unwrap_or(&0);
                    if width > top {
                        self.indents.push(width);
                        tokens.push(Spanned {
                            token: Token::Indent,
                            span: self.span(),
                        });
                    } else if width < top {
                        while width < *self.indents.last().unwrap_or(&0) {
                            self.indents.pop();
                            tokens.push(Spanned {
                                token: Token::Dedent,
                                span: self.span(),
                            });
                        }
                        if width != *self.indents.last().unwrap_or(&0) {
                            return Err(self
                                .error("unindent does not match any outer indentation level"));
                        }
                    }
                    return Ok(true);
                }
            }
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, LexerError> {
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some(ch) if ch == quote => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => string.push('\n'),
                        Some('t') => string.push('\t'),
                        Some('r') => string.push('\r'),
                        Some('\\') => string.push('\\'),
                        Some('"') => string.push('"'),
                        Some('\'') => string.push('\''),
                        Some('0') => string.push('\0'),
                        Some(ch) => {
                            return Err(self.error(format!("unknown escape sequence: \\{}", ch)));
                        }
                        None => return Err(self.error("unterminated string literal")),
                    }
                    self.advance();
                }
                Some('\n') | None => return Err(self.error("unterminated string literal")),
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let is_float =
            self.current() == Some('.') && self.peek().map_or(false, |c| c.is_ascii_digit());
        if is_float {
            text.push('.');
            self.advance();
            while let Some(ch) = self.current() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float literal '{}'", text)))?;
            Ok(Token::Float(value))
        } else {
            let value: i32 = text
                .parse()
                .map_err(|_| self.error(format!("integer literal out of range: '{}'", text)))?;
            Ok(Token::Integer(value))
        }
    }

    fn read_word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        Token::keyword(&word).unwrap_or(Token::Ident(word))
    }

    fn read_operator(&mut self, ch: char) -> Result<Token, LexerError> {
        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => {
                self.paren_depth += 1;
                Token::LParen
            }
            ')' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Token::RParen
            }
            ':' => Token::Colon,
            ',' => Token::Comma,
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::EqEq
                } else {
                    Token::Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::NotEq
                } else {
                    return Err(self.error("unexpected character '!'"));
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::LtEq
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            _ => return Err(self.error(format!("unexpected character '{}'", ch))),
        };
        self.advance();
        Ok(token)
    }
}
