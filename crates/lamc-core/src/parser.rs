//! Pratt parser for the surface syntax.
//!
//! Grammar, with binding powers in the style of a precedence-climbing
//! parser:
//!
//! ```text
//! expr    ::= 'fn' IDENT '=>' expr
//!           | 'if' expr 'then' expr 'else' expr
//!           | appExpr
//! appExpr ::= appExpr primary | primary          -- juxtaposition, bp 100/101
//! primary ::= '(' expr ')' | NUMBER | IDENT
//!           | primary ('+'|'-') primary          -- bp 1/2
//!           | primary '*' primary                -- bp 3/4
//! ```
//!
//! The infix table is injected rather than hard-coded, so tests can run the
//! parser with alternative precedences. Juxtaposition binds tighter than any
//! operator and associates to the left.

use indexmap::IndexMap;

use crate::ast::{Bop, Exp};
use crate::error::ParseError;
use crate::lexer::{Lexer, Token};

/// Infix binding powers: operator -> (left, right).
pub type InfixTable = IndexMap<Bop, (u8, u8)>;

/// Left/right binding powers of juxtaposition (function application).
const APP_BP: (u8, u8) = (100, 101);

/// The standard operator table: `+` and `-` at (1, 2), `*` at (3, 4).
pub fn default_infix_bp() -> InfixTable {
    IndexMap::from([
        (Bop::Plus, (1, 2)),
        (Bop::Minus, (1, 2)),
        (Bop::Times, (3, 4)),
    ])
}

/// Parses one expression from `source` with the standard operator table.
pub fn parse(source: &str) -> Result<Exp, ParseError> {
    Parser::new(source, default_infix_bp()).parse_expression()
}

/// Single-token-lookahead parser over a [`Lexer`].
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    peeked: Option<Token>,
    infix_bp: InfixTable,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, infix_bp: InfixTable) -> Parser<'a> {
        Parser {
            lexer: Lexer::new(source),
            current: Token::Eof,
            peeked: None,
            infix_bp,
        }
    }

    fn next_token(&mut self) -> Result<(), ParseError> {
        self.current = match self.peeked.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        Ok(())
    }

    fn peek_token(&mut self) -> Result<&Token, ParseError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    /// Parses one full expression. The parser stops at the first token that
    /// cannot continue the expression (`then`, `)`, `;`, end of input, ...),
    /// leaving it unconsumed.
    pub fn parse_expression(&mut self) -> Result<Exp, ParseError> {
        self.parse_bin_op(0)
    }

    fn parse_bin_op(&mut self, min_bp: u8) -> Result<Exp, ParseError> {
        self.next_token()?;
        let mut lhs = self.parse_primary()?;
        loop {
            let token = self.peek_token()?.clone();
            if let Some(op) = infix_op(&token) {
                let Some(&(lbp, rbp)) = self.infix_bp.get(&op) else {
                    return Ok(lhs);
                };
                if lbp < min_bp {
                    return Ok(lhs);
                }
                self.next_token()?;
                let rhs = self.parse_bin_op(rbp)?;
                lhs = Exp::bop(op, lhs, rhs);
            } else if starts_operand(&token) {
                // Lookahead of '(', a number, or an identifier continues a
                // left-associative application chain.
                let (lbp, rbp) = APP_BP;
                if lbp < min_bp {
                    return Ok(lhs);
                }
                let arg = self.parse_bin_op(rbp)?;
                lhs = Exp::app(lhs, arg);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Exp, ParseError> {
        match &self.current {
            Token::LParen => self.parse_parens(),
            Token::Number(value) => Ok(Exp::int(*value)),
            Token::Ident(name) => Ok(Exp::var(name.clone())),
            Token::Fn => self.parse_fn(),
            Token::If => self.parse_if(),
            Token::Eof => Err(ParseError::fatal("unexpected end of input")),
            token => Err(ParseError::new(format!("unexpected token '{}'", token))),
        }
    }

    fn parse_fn(&mut self) -> Result<Exp, ParseError> {
        self.next_token()?;
        let Token::Ident(param) = self.current.clone() else {
            return Err(ParseError::new(format!(
                "expected parameter name after 'fn', found '{}'",
                self.current
            )));
        };
        self.next_token()?;
        if self.current != Token::Arrow {
            return Err(ParseError::new(format!(
                "expected '=>' after function parameter, found '{}'",
                self.current
            )));
        }
        let body = self.parse_expression()?;
        Ok(Exp::lam(param, body))
    }

    fn parse_if(&mut self) -> Result<Exp, ParseError> {
        let cond = self.parse_expression()?;
        self.next_token()?;
        if self.current != Token::Then {
            return Err(ParseError::new(format!(
                "expected 'then' after if condition, found '{}'",
                self.current
            )));
        }
        let then = self.parse_expression()?;
        self.next_token()?;
        if self.current != Token::Else {
            return Err(ParseError::new(format!(
                "expected 'else' after then branch, found '{}'",
                self.current
            )));
        }
        let els = self.parse_expression()?;
        Ok(Exp::if_(cond, then, els))
    }

    fn parse_parens(&mut self) -> Result<Exp, ParseError> {
        let exp = self.parse_expression()?;
        self.next_token()?;
        if self.current != Token::RParen {
            return Err(ParseError::new(format!(
                "expected ')', found '{}'",
                self.current
            )));
        }
        Ok(exp)
    }
}

fn infix_op(token: &Token) -> Option<Bop> {
    match token {
        Token::Plus => Some(Bop::Plus),
        Token::Minus => Some(Bop::Minus),
        Token::Times => Some(Bop::Times),
        _ => None,
    }
}

fn starts_operand(token: &Token) -> bool {
    matches!(token, Token::LParen | Token::Number(_) | Token::Ident(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_precedence() {
        let exp = parse(" (fn a => a + 1 + 2 * 3 * 4 + 5 ) ").unwrap();
        assert_eq!(exp.to_string(), "(fn a => (((a + 1) + ((2 * 3) * 4)) + 5))");
    }

    #[test]
    fn parses_application_chains() {
        let exp = parse("a b c + d e f").unwrap();
        assert_eq!(exp.to_string(), "(((a b) c) + ((d e) f))");
    }

    #[test]
    fn parses_if_with_application_and_parens() {
        let exp = parse("if x then x * f (x - 1) else 1").unwrap();
        assert_eq!(exp.to_string(), "(if x then (x * (f (x - 1))) else 1)");
    }

    #[test]
    fn parses_z_combinator() {
        let exp = parse(
            "(fn g => (fn x => g (fn v => x x v)) (fn x => g (fn v => x x v))) (fn f \
             => fn x => if x then (if x - 1 then x * f (x - 1) else 1) else 1) 5",
        )
        .unwrap();
        assert_eq!(
            exp.to_string(),
            "(((fn g => ((fn x => (g (fn v => ((x x) v)))) (fn x => (g (fn v => ((x \
             x) v)))))) (fn f => (fn x => (if x then (if (x - 1) then (x * (f (x - \
             1))) else 1) else 1)))) 5)"
        );
    }

    #[test]
    fn empty_input_is_fatal() {
        let err = parse("   ").unwrap_err();
        assert!(err.fatal);
    }

    #[test]
    fn stray_token_is_recoverable() {
        let err = parse(") 1").unwrap_err();
        assert!(!err.fatal);
        assert_eq!(err.message, "unexpected token ')'");
    }
}
