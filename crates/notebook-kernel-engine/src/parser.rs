//! Recursive-descent parser.

use notebook_kernel_core::ExecutionError;

use crate::{
    lexer::{Spanned, Token, syntax_error},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let(String, Expr),
    Assign(String, Expr),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

/// Limit on both expression tree depth and bracket or prefix nesting.
///
/// Evaluation recurses over the tree, so this also bounds the evaluator.
pub const MAX_DEPTH: usize = 128;

/// A parsed expression and the depth of its tree.
struct Node {
    expr: Expr,
    depth: usize,
}

impl Node {
    const fn leaf(expr: Expr) -> Self {
        Self { expr, depth: 1 }
    }
}

/// Parse a token stream into statements.
///
/// # Errors
/// Returns a `SyntaxError` naming the offending line.
pub fn parse(tokens: &[Spanned]) -> Result<Vec<Stmt>, ExecutionError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    let mut stmts = Vec::new();

    loop {
        while parser.eat(&Token::Separator) {}
        if parser.at_end() {
            break;
        }
        stmts.push(parser.statement()?);
        if !parser.at_end() && !parser.eat(&Token::Separator) {
            return Err(parser.unexpected());
        }
    }

    Ok(stmts)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    nesting: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    const fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|s| &s.token);
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ExecutionError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(syntax_error(self.line(), format!("expected {what}")))
        }
    }

    fn too_deep(&self) -> ExecutionError {
        syntax_error(self.line(), "expression nested too deeply")
    }

    fn within_limit(&self, depth: usize) -> Result<usize, ExecutionError> {
        if depth > MAX_DEPTH {
            Err(self.too_deep())
        } else {
            Ok(depth)
        }
    }

    /// Run `f` one bracket or prefix level deeper.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ExecutionError>,
    ) -> Result<T, ExecutionError> {
        if self.nesting >= MAX_DEPTH {
            return Err(self.too_deep());
        }
        self.nesting += 1;
        let res = f(self);
        self.nesting -= 1;
        res
    }

    fn unexpected(&self) -> ExecutionError {
        match self.peek() {
            Some(token) => syntax_error(self.line(), format!("unexpected token {token:?}")),
            None => syntax_error(self.line(), "unexpected end of input"),
        }
    }

    fn statement(&mut self) -> Result<Stmt, ExecutionError> {
        let line = self.line();
        let kind = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Let), _) => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(&Token::Assign, "'=' after binding name")?;
                StmtKind::Let(name, self.expression()?)
            }
            (Some(Token::Ident(_)), Some(Token::Assign)) => {
                let name = self.ident()?;
                self.pos += 1;
                StmtKind::Assign(name, self.expression()?)
            }
            _ => StmtKind::Expr(self.expression()?),
        };
        Ok(Stmt { kind, line })
    }

    fn ident(&mut self) -> Result<String, ExecutionError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(syntax_error(self.line(), "expected a name")),
        }
    }

    fn expression(&mut self) -> Result<Expr, ExecutionError> {
        self.node().map(|node| node.expr)
    }

    fn node(&mut self) -> Result<Node, ExecutionError> {
        self.binary_level(0)
    }

    /// Binary operators by precedence, loosest first.
    fn binary_level(&mut self, level: usize) -> Result<Node, ExecutionError> {
        static LEVELS: [&[(Token, BinOp)]; 4] = [
            &[(Token::EqEq, BinOp::Eq), (Token::NotEq, BinOp::NotEq)],
            &[
                (Token::Lt, BinOp::Lt),
                (Token::Le, BinOp::Le),
                (Token::Gt, BinOp::Gt),
                (Token::Ge, BinOp::Ge),
            ],
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::Percent, BinOp::Rem),
            ],
        ];

        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };

        let mut lhs = self.binary_level(level + 1)?;
        'outer: loop {
            for (token, op) in *ops {
                if self.eat(token) {
                    let rhs = self.binary_level(level + 1)?;
                    let depth = self.within_limit(lhs.depth.max(rhs.depth) + 1)?;
                    lhs = Node {
                        expr: Expr::Binary(*op, Box::new(lhs.expr), Box::new(rhs.expr)),
                        depth,
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Result<Node, ExecutionError> {
        let op = if self.eat(&Token::Minus) {
            UnaryOp::Neg
        } else if self.eat(&Token::Bang) {
            UnaryOp::Not
        } else {
            return self.primary();
        };
        let operand = self.nested(Self::unary)?;
        let depth = self.within_limit(operand.depth + 1)?;
        Ok(Node {
            expr: Expr::Unary(op, Box::new(operand.expr)),
            depth,
        })
    }

    fn primary(&mut self) -> Result<Node, ExecutionError> {
        let line = self.line();
        let expr = match self.advance().cloned() {
            Some(Token::Int(i)) => Expr::Literal(Value::Int(i)),
            Some(Token::Float(f)) => Expr::Literal(Value::Float(f)),
            Some(Token::Str(s)) => Expr::Literal(Value::Str(s)),
            Some(Token::True) => Expr::Literal(Value::Bool(true)),
            Some(Token::False) => Expr::Literal(Value::Bool(false)),
            Some(Token::Null) => Expr::Literal(Value::Null),
            Some(Token::Ident(name)) => {
                if !self.eat(&Token::LParen) {
                    return Ok(Node::leaf(Expr::Var(name)));
                }
                let args = self.nested(Self::arguments)?;
                let depth = args.iter().map(|arg| arg.depth).max().unwrap_or(0) + 1;
                return Ok(Node {
                    expr: Expr::Call(name, args.into_iter().map(|arg| arg.expr).collect()),
                    depth: self.within_limit(depth)?,
                });
            }
            Some(Token::LParen) => {
                let inner = self.nested(Self::node)?;
                self.expect(&Token::RParen, "')'")?;
                return Ok(inner);
            }
            Some(token) => return Err(syntax_error(line, format!("unexpected token {token:?}"))),
            None => return Err(syntax_error(line, "unexpected end of input")),
        };
        Ok(Node::leaf(expr))
    }

    fn arguments(&mut self) -> Result<Vec<Node>, ExecutionError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.node()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma, "',' or ')'")?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_str(source: &str) -> Result<Vec<Stmt>, ExecutionError> {
        parse(&tokenize(source)?)
    }

    fn int(i: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::Int(i)))
    }

    #[test]
    fn test_precedence() {
        let stmts = parse_str("1 + 2 * 3").unwrap();
        assert_eq!(
            stmts[0].kind,
            StmtKind::Expr(Expr::Binary(
                BinOp::Add,
                int(1),
                Box::new(Expr::Binary(BinOp::Mul, int(2), int(3)))
            ))
        );
    }

    #[test]
    fn test_left_associative() {
        let stmts = parse_str("8 - 2 - 1").unwrap();
        assert_eq!(
            stmts[0].kind,
            StmtKind::Expr(Expr::Binary(
                BinOp::Sub,
                Box::new(Expr::Binary(BinOp::Sub, int(8), int(2))),
                int(1)
            ))
        );
    }

    #[test]
    fn test_statements_and_lines() {
        let stmts = parse_str("let x = 1\n\nx = x + 1; display(x, \"out\")").unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[0].kind, StmtKind::Let(ref n, _) if n == "x"));
        assert!(matches!(stmts[1].kind, StmtKind::Assign(ref n, _) if n == "x"));
        assert!(matches!(stmts[2].kind, StmtKind::Expr(Expr::Call(ref n, ref a)) if n == "display" && a.len() == 2));
        assert_eq!(stmts[1].line, 3);
    }

    #[test]
    fn test_missing_separator() {
        let err = parse_str("1 2").unwrap_err();
        assert_eq!(err.name, "SyntaxError");
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let too_deep = [
            format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000)),
            format!("{}1", "- ".repeat(100_000)),
            format!("{}1", "!".repeat(100_000)),
            format!("1{}", " + 1".repeat(100_000)),
            format!("{}1{}", "len(".repeat(100_000), ")".repeat(100_000)),
        ];
        for source in &too_deep {
            let err = parse_str(source).unwrap_err();
            assert_eq!(err.name, "SyntaxError");
            assert_eq!(err.message, "expression nested too deeply");
        }
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let depth = MAX_DEPTH / 2;
        assert!(parse_str(&format!("{}1{}", "(".repeat(depth), ")".repeat(depth))).is_ok());
        assert!(parse_str(&format!("{}1", "- ".repeat(depth))).is_ok());
        assert!(parse_str(&format!("1{}", " + 1".repeat(depth))).is_ok());
    }

    #[test]
    fn test_unclosed_paren() {
        let err = parse_str("(1 + 2").unwrap_err();
        assert_eq!(err.message, "expected ')'");
    }
}
