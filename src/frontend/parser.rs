use crate::frontend::lexer::{Span, Spanned};
use crate::frontend::parser_error::ParserError;
use crate::frontend::token::Token;
use crate::lang::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use crate::lang::value::Value;

/// Recursive-descent parser for the PyVM source language.
///
/// The parser consumes the lexer's `Spanned` token stream and produces a
/// `Program`. Blocks are either indented (`Newline Indent ... Dedent`) or
/// one-line suites of simple statements separated by `;` after the colon.
///
/// `elif` chains are desugared here: each `elif` becomes a nested `If` that
/// is the sole statement of the enclosing `else` body.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Span of the most recently consumed token, used for errors reported
    /// at end of input.
    last_span: Option<Span>,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser {
            tokens,
            pos: 0,
            last_span: None,
        }
    }

    fn current(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&Spanned> {
        let token = self.tokens.get(self.pos);
        if let Some(s) = token {
            self.last_span = Some(s.span.clone());
        }
        self.pos += 1;
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<Span, ParserError> {
        if self.check(&token) {
            let span = self.current().unwrap().span.clone();
            self.advance();
            Ok(span)
        } else {
            let found = self
                .peek()
                .map(|t| t.describe())
                .unwrap_or_else(|| "end of input".to_string());
            Err(self.error(&format!(
                "expected {} {}, found {}",
                token.describe(),
                context,
                found
            )))
        }
    }

    fn error(&self, message: &str) -> ParserError {
        if let Some(spanned) = self.current() {
            ParserError {
                message: message.to_string(),
                line: spanned.span.line,
                col: spanned.span.col,
            }
        } else if let Some(span) = &self.last_span {
            ParserError {
                message: message.to_string(),
                line: span.line,
                col: span.col,
            }
        } else {
            ParserError {
                message: message.to_string(),
                line: 1,
                col: 1,
            }
        }
    }

    pub fn parse(&mut self) -> Result<Program, ParserError> {
        let mut statements = Vec::new();

        loop {
            while self.check(&Token::Newline) || self.check(&Token::Semicolon) {
                self.advance();
            }
            if self.check(&Token::Eof) || self.peek().is_none() {
                break;
            }
            statements.push(self.parse_statement()?);
        }

        Ok(Program { statements })
    }

    // ─────────────────────────────── Statements ──────────────────────────────

    fn parse_statement(&mut self) -> Result<Stmt, ParserError> {
        match self.peek() {
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::Def) => self.parse_def(),
            Some(Token::Elif) => Err(self.error("'elif' without a matching 'if'")),
            Some(Token::Else) => Err(self.error("'else' without a matching 'if'")),
            Some(Token::Indent) => Err(self.error("unexpected indent")),
            _ => {
                let stmt = self.parse_simple_statement()?;
                self.end_of_statement()?;
                Ok(stmt)
            }
        }
    }

    /// A statement that fits on one line: assignment, expression, `return`,
    /// or `pass`. Does not consume the statement terminator.
    fn parse_simple_statement(&mut self) -> Result<Stmt, ParserError> {
        match self.peek() {
            Some(Token::Return) => {
                let span = self.current().unwrap().span.clone();
                self.advance();
                let value = if self.statement_ended() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                Ok(Stmt::Return { value, span })
            }
            Some(Token::Pass) => {
                let span = self.current().unwrap().span.clone();
                self.advance();
                Ok(Stmt::Pass { span })
            }
            Some(Token::If) | Some(Token::While) | Some(Token::Def) => {
                Err(self.error("compound statements are not allowed in a one-line suite"))
            }
            _ => self.parse_assignment_or_expression(),
        }
    }

    fn parse_assignment_or_expression(&mut self) -> Result<Stmt, ParserError> {
        let expr = self.parse_expression()?;

        if self.check(&Token::Assign) {
            let name = match &expr {
                Expr::Name { name, .. } => name.clone(),
                _ => return Err(self.error("assignment target must be a name")),
            };
            let span = expr.span().clone();
            self.advance();
            let value = self.parse_expression()?;
            Ok(Stmt::Assign { name, value, span })
        } else {
            Ok(Stmt::Expr(expr))
        }
    }

    /// Parses an `if`/`elif` statement; the current token must be `if` or
    /// `elif`. The `elif` continuation re-enters this function so the chain
    /// nests rightwards.
    fn parse_if(&mut self) -> Result<Stmt, ParserError> {
        let span = self.current().unwrap().span.clone();
        self.advance(); // 'if' or 'elif'

        let cond = self.parse_expression()?;
        self.expect(Token::Colon, "after the condition")?;
        let then_body = self.parse_block()?;

        let else_body = if self.check(&Token::Elif) {
            vec![self.parse_if()?]
        } else if self.eat(&Token::Else) {
            self.expect(Token::Colon, "after 'else'")?;
            self.parse_block()?
        } else {
            Vec::new()
        };

        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParserError> {
        let span = self.current().unwrap().span.clone();
        self.advance(); // 'while'

        let cond = self.parse_expression()?;
        self.expect(Token::Colon, "after the condition")?;
        let body = self.parse_block()?;

        Ok(Stmt::While { cond, body, span })
    }

    fn parse_def(&mut self) -> Result<Stmt, ParserError> {
        let span = self.current().unwrap().span.clone();
        self.advance(); // 'def'

        let name = match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                name
            }
            _ => return Err(self.error("expected function name after 'def'")),
        };

        self.expect(Token::LParen, "after the function name")?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                match self.peek() {
                    Some(Token::Ident(param)) => {
                        params.push(param.clone());
                        self.advance();
                    }
                    _ => return Err(self.error("expected parameter name")),
                }
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "after the parameter list")?;
        self.expect(Token::Colon, "after the parameter list")?;
        let body = self.parse_block()?;

        Ok(Stmt::FuncDef {
            name,
            params,
            body,
            span,
        })
    }

    /// A block is either an indented sequence of statements or a one-line
    /// suite of simple statements separated by `;`.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParserError> {
        if self.eat(&Token::Newline) {
            self.expect(Token::Indent, "to open the block")?;

            let mut statements = Vec::new();
            loop {
                while self.check(&Token::Newline) {
                    self.advance();
                }
                if self.eat(&Token::Dedent) {
                    break;
                }
                if self.check(&Token::Eof) || self.peek().is_none() {
                    return Err(self.error("unexpected end of input inside a block"));
                }
                statements.push(self.parse_statement()?);
            }

            Ok(statements)
        } else {
            let mut statements = vec![self.parse_simple_statement()?];
            while self.eat(&Token::Semicolon) {
                if self.statement_ended() {
                    break;
                }
                statements.push(self.parse_simple_statement()?);
            }
            if self.check(&Token::Newline) {
                self.advance();
            }
            Ok(statements)
        }
    }

    fn statement_ended(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::Newline)
                | Some(Token::Semicolon)
                | Some(Token::Dedent)
                | Some(Token::Eof)
        )
    }

    fn end_of_statement(&mut self) -> Result<(), ParserError> {
        match self.peek() {
            Some(Token::Newline) | Some(Token::Semicolon) => {
                self.advance();
                Ok(())
            }
            Some(Token::Dedent) | Some(Token::Eof) | None => Ok(()),
            Some(token) => {
                let found = token.describe();
                Err(self.error(&format!("expected end of statement, found {}", found)))
            }
        }
    }

    // ────────────────────────────── Expressions ──────────────────────────────

    fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_and()?;
        while self.check(&Token::Or) {
            let span = self.current().unwrap().span.clone();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_equality()?;
        while self.check(&Token::And) {
            let span = self.current().unwrap().span.clone();
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            let span = self.current().unwrap().span.clone();
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::Ge,
                _ => break,
            };
            let span = self.current().unwrap().span.clone();
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            let span = self.current().unwrap().span.clone();
            self.advance();
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            let span = self.current().unwrap().span.clone();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        match self.peek() {
            Some(Token::Minus) => {
                let span = self.current().unwrap().span.clone();
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                    span,
                })
            }
            Some(Token::Plus) => {
                // Unary plus has no effect.
                self.advance();
                self.parse_unary()
            }
            Some(Token::Not) => {
                let span = self.current().unwrap().span.clone();
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                    span,
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParserError> {
        let spanned = match self.current() {
            Some(s) => s.clone(),
            None => return Err(self.error("expected an expression")),
        };
        let span = spanned.span.clone();

        match spanned.token {
            Token::Integer(n) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Value::Integer(n),
                    span,
                })
            }
            Token::Float(x) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Value::Float(x),
                    span,
                })
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Value::String(s),
                    span,
                })
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal {
                    value: Value::Bool(true),
                    span,
                })
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal {
                    value: Value::Bool(false),
                    span,
                })
            }
            Token::Ident(name) => {
                self.advance();
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen, "to close the argument list")?;
                    Ok(Expr::Call { name, args, span })
                } else {
                    Ok(Expr::Name { name, span })
                }
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RParen, "to close the expression")?;
                Ok(expr)
            }
            token => Err(self.error(&format!("expected an expression, found {}", token.describe()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn parse(source: &str) -> Program {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn parse_err(source: &str) -> ParserError {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    #[test]
    fn test_assignment() {
        let program = parse("x = 10\n");
        assert_eq!(program.statements.len(), 1);
        assert!(matches!(
            &program.statements[0],
            Stmt::Assign { name, .. } if name == "x"
        ));
    }

    #[test]
    fn test_call_statement() {
        let program = parse("print(x + y)\n");
        match &program.statements[0] {
            Stmt::Expr(Expr::Call { name, args, .. }) => {
                assert_eq!(name, "print");
                assert_eq!(args.len(), 1);
                assert!(matches!(
                    &args[0],
                    Expr::Binary {
                        op: BinaryOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("expected call statement, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let program = parse("a = 1 + 2 * 3\n");
        match &program.statements[0] {
            Stmt::Assign { value, .. } => match value {
                Expr::Binary {
                    op: BinaryOp::Add,
                    right,
                    ..
                } => {
                    assert!(matches!(
                        right.as_ref(),
                        Expr::Binary {
                            op: BinaryOp::Mul,
                            ..
                        }
                    ));
                }
                other => panic!("expected addition at the top, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_comparison_over_and() {
        let program = parse("a = x < 1 and y > 2\n");
        match &program.statements[0] {
            Stmt::Assign { value, .. } => {
                assert!(matches!(
                    value,
                    Expr::Binary {
                        op: BinaryOp::And,
                        ..
                    }
                ));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_if_else_indented() {
        let program = parse("if x > 0:\n    print(1)\nelse:\n    print(2)\n");
        match &program.statements[0] {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("expected if statement, got {:?}", other),
        }
    }

    #[test]
    fn test_if_without_else() {
        let program = parse("if x:\n    y = 1\n");
        match &program.statements[0] {
            Stmt::If { else_body, .. } => assert!(else_body.is_empty()),
            other => panic!("expected if statement, got {:?}", other),
        }
    }

    #[test]
    fn test_elif_desugars_to_nested_if() {
        let program = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &program.statements[0] {
            Stmt::If { else_body, .. } => {
                assert_eq!(else_body.len(), 1);
                match &else_body[0] {
                    Stmt::If { else_body, .. } => assert_eq!(else_body.len(), 1),
                    other => panic!("expected nested if for elif, got {:?}", other),
                }
            }
            other => panic!("expected if statement, got {:?}", other),
        }
    }

    #[test]
    fn test_one_line_suite() {
        let program = parse("while i < 3: print(i); i = i + 1\n");
        match &program.statements[0] {
            Stmt::While { body, .. } => assert_eq!(body.len(), 2),
            other => panic!("expected while statement, got {:?}", other),
        }
    }

    #[test]
    fn test_one_line_if_else() {
        let program = parse("if x > 0: print(\"pos\")\nelse: print(\"neg\")\n");
        match &program.statements[0] {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("expected if statement, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_while() {
        let program = parse("while a:\n    while b:\n        x = 1\n    y = 2\n");
        match &program.statements[0] {
            Stmt::While { body, .. } => {
                assert_eq!(body.len(), 2);
                assert!(matches!(&body[0], Stmt::While { .. }));
            }
            other => panic!("expected while statement, got {:?}", other),
        }
    }

    #[test]
    fn test_def_and_return_parse() {
        let program = parse("def f(a, b):\n    return a + b\n");
        match &program.statements[0] {
            Stmt::FuncDef { name, params, body, .. } => {
                assert_eq!(name, "f");
                assert_eq!(params, &vec!["a".to_string(), "b".to_string()]);
                assert!(matches!(&body[0], Stmt::Return { value: Some(_), .. }));
            }
            other => panic!("expected function definition, got {:?}", other),
        }
    }

    #[test]
    fn test_unary_and_grouping() {
        let program = parse("x = -(1 + 2)\n");
        match &program.statements[0] {
            Stmt::Assign { value, .. } => {
                assert!(matches!(
                    value,
                    Expr::Unary {
                        op: UnaryOp::Neg,
                        ..
                    }
                ));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_not_operator() {
        let program = parse("x = not y\n");
        match &program.statements[0] {
            Stmt::Assign { value, .. } => {
                assert!(matches!(
                    value,
                    Expr::Unary {
                        op: UnaryOp::Not,
                        ..
                    }
                ));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_target_must_be_name() {
        let err = parse_err("1 = 2\n");
        assert!(err.message.contains("assignment target"));
    }

    #[test]
    fn test_else_without_if_is_error() {
        let err = parse_err("else: x = 1\n");
        assert!(err.message.contains("'else'"));
    }

    #[test]
    fn test_missing_colon_is_error() {
        let err = parse_err("if x\n    y = 1\n");
        assert!(err.message.contains("':'"));
    }

    #[test]
    fn test_error_carries_location() {
        let err = parse_err("x = \n");
        assert!(err.line >= 1);
        assert!(err.col >= 1);
    }

    #[test]
    fn test_pass_statement() {
        let program = parse("if x:\n    pass\n");
        match &program.statements[0] {
            Stmt::If { then_body, .. } => assert!(matches!(&then_body[0], Stmt::Pass { .. })),
            other => panic!("expected if statement, got {:?}", other),
        }
    }
}
