// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Recursive-descent parser for model scripts.
//!
//! # Grammar
//! ```text
//! program  := item*
//! item     := "fn" IDENT "(" params? ")" "=" expr ";"
//!           | "let" IDENT "=" expr ";"
//! expr     := "if" expr "then" expr "else" expr
//!           | "let" IDENT "=" expr "in" expr
//!           | or
//! or       := and ("or" and)*
//! and      := not ("and" not)*
//! not      := "not" not | cmp
//! cmp      := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)?
//! sum      := term (("+" | "-") term)*
//! term     := unary (("*" | "/" | "%") unary)*
//! unary    := "-" unary | postfix
//! postfix  := primary ("(" args? ")" | "[" expr "]" | "." IDENT)*
//! primary  := NUMBER | STRING | "true" | "false" | "null" | IDENT
//!           | "(" expr ")" | "[" args? "]" | "{" entries? "}"
//! ```

use super::lexer::{lex, Spanned, Token};
use super::ScriptError;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Let(String, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Field(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expr,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Fn(Rc<FnDef>),
    Let { name: String, value: Expr, line: usize },
}

/// Parses a whole script.
pub fn parse(source: &str) -> Result<Vec<Item>, ScriptError> {
    let mut parser = Parser {
        tokens: lex(source)?,
        pos: 0,
    };
    let mut items = Vec::new();
    while !parser.at_end() {
        items.push(parser.item()?);
    }
    Ok(items)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ScriptError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn error(&self, message: String) -> ScriptError {
        let found = match self.peek() {
            Some(token) => format!("{token:?}"),
            None => "end of input".to_string(),
        };
        ScriptError::syntax(format!("{message}, found {found}"), self.line())
    }

    fn item(&mut self) -> Result<Item, ScriptError> {
        let line = self.line();
        match self.advance() {
            Some(Token::Fn) => {
                let name = self.ident("function name")?;
                self.expect(Token::LParen, "'('")?;
                let mut params = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        params.push(self.ident("parameter name")?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or ')'")?;
                    }
                }
                self.expect(Token::Assign, "'=' after parameters")?;
                let body = self.expr()?;
                self.expect(Token::Semi, "';' after function body")?;
                Ok(Item::Fn(Rc::new(FnDef {
                    name,
                    params,
                    body,
                    line,
                })))
            }
            Some(Token::Let) => {
                let name = self.ident("binding name")?;
                self.expect(Token::Assign, "'='")?;
                let value = self.expr()?;
                self.expect(Token::Semi, "';' after binding")?;
                Ok(Item::Let { name, value, line })
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected 'fn' or 'let' at top level".into()))
            }
        }
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        if self.eat(&Token::If) {
            let cond = self.expr()?;
            self.expect(Token::Then, "'then'")?;
            let then = self.expr()?;
            self.expect(Token::Else, "'else'")?;
            let otherwise = self.expr()?;
            return Ok(Expr {
                kind: ExprKind::If(Box::new(cond), Box::new(then), Box::new(otherwise)),
                line,
            });
        }
        if self.eat(&Token::Let) {
            let name = self.ident("binding name")?;
            self.expect(Token::Assign, "'='")?;
            let value = self.expr()?;
            self.expect(Token::In, "'in'")?;
            let body = self.expr()?;
            return Ok(Expr {
                kind: ExprKind::Let(name, Box::new(value), Box::new(body)),
                line,
            });
        }
        self.or()
    }

    fn or(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::Or) {
            let line = self.line();
            self.pos += 1;
            let rhs = self.and()?;
            lhs = Expr {
                kind: ExprKind::Or(Box::new(lhs), Box::new(rhs)),
                line,
            };
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.not()?;
        while self.peek() == Some(&Token::And) {
            let line = self.line();
            self.pos += 1;
            let rhs = self.not()?;
            lhs = Expr {
                kind: ExprKind::And(Box::new(lhs), Box::new(rhs)),
                line,
            };
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        if self.eat(&Token::Not) {
            let inner = self.not()?;
            return Ok(Expr {
                kind: ExprKind::Not(Box::new(inner)),
                line,
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let lhs = self.sum()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        let line = self.line();
        self.pos += 1;
        let rhs = self.sum()?;
        Ok(Expr {
            kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
            line,
        })
    }

    fn sum(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            let line = self.line();
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr {
                kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                line,
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(lhs),
            };
            let line = self.line();
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr {
                kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                line,
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        if self.eat(&Token::Minus) {
            let inner = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Neg(Box::new(inner)),
                line,
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            let line = self.line();
            if self.eat(&Token::LParen) {
                let args = self.list_tail(Token::RParen, "')'")?;
                expr = Expr {
                    kind: ExprKind::Call(Box::new(expr), args),
                    line,
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                self.expect(Token::RBracket, "']'")?;
                expr = Expr {
                    kind: ExprKind::Index(Box::new(expr), Box::new(index)),
                    line,
                };
            } else if self.eat(&Token::Dot) {
                let field = self.ident("field name after '.'")?;
                expr = Expr {
                    kind: ExprKind::Field(Box::new(expr), field),
                    line,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to `close`, which is consumed.
    fn list_tail(&mut self, close: Token, what: &str) -> Result<Vec<Expr>, ScriptError> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(Token::Comma, &format!("',' or {what}"))?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        let kind = match self.advance() {
            Some(Token::Number(n)) => ExprKind::Num(n),
            Some(Token::Str(s)) => ExprKind::Str(s),
            Some(Token::True) => ExprKind::Bool(true),
            Some(Token::False) => ExprKind::Bool(false),
            Some(Token::Null) => ExprKind::Null,
            Some(Token::Ident(name)) => ExprKind::Var(name),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                return Ok(inner);
            }
            Some(Token::LBracket) => ExprKind::List(self.list_tail(Token::RBracket, "']'")?),
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if !self.eat(&Token::RBrace) {
                    loop {
                        let key = match self.advance() {
                            Some(Token::Ident(k)) | Some(Token::Str(k)) => k,
                            _ => {
                                self.pos = self.pos.saturating_sub(1);
                                return Err(self.error("expected map key".into()));
                            }
                        };
                        self.expect(Token::Colon, "':' after map key")?;
                        entries.push((key, self.expr()?));
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or '}'")?;
                    }
                }
                ExprKind::Map(entries)
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.error("expected an expression".into()));
            }
        };
        Ok(Expr { kind, line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_fn(source: &str) -> Rc<FnDef> {
        match parse(source).unwrap().remove(0) {
            Item::Fn(def) => def,
            other => panic!("expected fn, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let def = single_fn("fn f(a, b) = a + b * 2;");
        assert_eq!(def.params, vec!["a", "b"]);
        match &def.body.kind {
            ExprKind::Binary(BinOp::Add, _, rhs) => {
                assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Mul, _, _)))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_postfix_chain() {
        let def = single_fn("fn f(input) = sum(input.x)[0];");
        match &def.body.kind {
            ExprKind::Index(call, _) => match &call.kind {
                ExprKind::Call(callee, args) => {
                    assert_eq!(callee.kind, ExprKind::Var("sum".into()));
                    assert!(matches!(args[0].kind, ExprKind::Field(_, ref f) if f == "x"));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_let_if_and_maps() {
        let items = parse(
            r#"let scale = 0.5;
               fn f(x) = let y = x * scale in if y > 1 and not false then {"big": y, small: false} else [y];"#,
        )
        .unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Item::Let { name, line: 1, .. } if name == "scale"));
        match &items[1] {
            Item::Fn(def) => {
                assert_eq!(def.line, 2);
                assert!(matches!(def.body.kind, ExprKind::Let(..)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse("fn f(x) = x").unwrap_err();
        assert!(err.message.contains("';'"));
        let err = parse("x + 1;").unwrap_err();
        assert!(err.message.contains("top level"));
        let err = parse("fn f(x) =\n  (x + ;").unwrap_err();
        assert_eq!(err.line, Some(2));
    }
}
