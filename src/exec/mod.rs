//! Compiled-artifact executor.
//!
//! A compiled artifact is raw text interleaved with `<?rs … ?>` code regions.
//! This module runs one: a character-based lexer turns the artifact into a
//! token stream (raw text chunks become text tokens), a recursive-descent
//! parser builds a statement AST, and a tree-walking interpreter evaluates it
//! against the caller's bindings, producing the final output string.
//!
//! Runtime values are `serde_json::Value` with loose, template-friendly
//! semantics: undefined variables read as null, `==` coerces across types,
//! `===` does not, and echo renders true as `1` and false/null as nothing.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::config::ConfigLoader;
use crate::vars::Bindings;

// ============================================================================
// Error Types
// ============================================================================

/// Artifact parsing and evaluation errors
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("eval error: {0}")]
    Eval(String),
}

// ============================================================================
// Lexer - Token Types
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// Raw text outside any code region
    Text(String),
    /// Bare identifier or keyword
    Ident(String),
    /// `$name` variable reference (without the sigil)
    Var(String),
    Num(f64),
    Str(String),
    Semi,
    Colon,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    /// `=>`
    Arrow,
    Assign,
    PlusAssign,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    line: usize,
}

/// Character-based lexer over the full artifact, text and code regions alike
struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

const REGION_OPEN: &str = "<?rs";
const REGION_CLOSE: &str = "?>";

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn tokenize(&mut self) -> Result<Vec<Spanned>, ExecError> {
        let mut tokens = Vec::new();
        while self.pos < self.chars.len() {
            if self.starts_with(REGION_OPEN) {
                self.pos += REGION_OPEN.len();
                self.lex_region(&mut tokens)?;
            } else {
                let line = self.line;
                let text = self.read_text();
                if !text.is_empty() {
                    tokens.push(Spanned {
                        tok: Tok::Text(text),
                        line,
                    });
                }
            }
        }
        Ok(tokens)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.chars[self.pos..]
            .iter()
            .zip(s.chars())
            .filter(|(a, b)| **a == *b)
            .count()
            == s.chars().count()
    }

    fn read_text(&mut self) -> String {
        let mut out = String::new();
        while self.pos < self.chars.len() && !self.starts_with(REGION_OPEN) {
            let c = self.chars[self.pos];
            if c == '\n' {
                self.line += 1;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn lex_region(&mut self, tokens: &mut Vec<Spanned>) -> Result<(), ExecError> {
        loop {
            while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
                if self.chars[self.pos] == '\n' {
                    self.line += 1;
                }
                self.pos += 1;
            }
            if self.pos >= self.chars.len() {
                return Err(self.err("unterminated code region"));
            }
            if self.starts_with(REGION_CLOSE) {
                self.pos += REGION_CLOSE.len();
                return Ok(());
            }
            let line = self.line;
            let tok = self.lex_token()?;
            tokens.push(Spanned { tok, line });
        }
    }

    fn lex_token(&mut self) -> Result<Tok, ExecError> {
        let c = self.chars[self.pos];
        if c == '$' {
            self.pos += 1;
            let name = self.read_ident();
            if name.is_empty() {
                return Err(self.err("`$` without a variable name"));
            }
            return Ok(Tok::Var(name));
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(Tok::Ident(self.read_ident()));
        }
        if c.is_ascii_digit() {
            return Ok(Tok::Num(self.read_number()?));
        }
        if c == '\'' || c == '"' {
            return Ok(Tok::Str(self.read_string(c)));
        }

        // Multi-character operators take priority over their prefixes.
        for (text, tok) in [
            ("===", Tok::EqEqEq),
            ("!==", Tok::NotEqEq),
            ("==", Tok::EqEq),
            ("!=", Tok::NotEq),
            ("<=", Tok::Le),
            (">=", Tok::Ge),
            ("&&", Tok::AndAnd),
            ("||", Tok::OrOr),
            ("=>", Tok::Arrow),
            ("+=", Tok::PlusAssign),
        ] {
            if self.starts_with(text) {
                self.pos += text.len();
                return Ok(tok);
            }
        }
        let tok = match c {
            ';' => Tok::Semi,
            ':' => Tok::Colon,
            ',' => Tok::Comma,
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            '<' => Tok::Lt,
            '>' => Tok::Gt,
            '!' => Tok::Not,
            '=' => Tok::Assign,
            '+' => Tok::Plus,
            '-' => Tok::Minus,
            '*' => Tok::Star,
            '/' => Tok::Slash,
            '%' => Tok::Percent,
            other => return Err(self.err(format!("unexpected character `{other}`"))),
        };
        self.pos += 1;
        Ok(tok)
    }

    fn read_ident(&mut self) -> String {
        let mut out = String::new();
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if c.is_ascii_alphanumeric() || c == '_' {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        out
    }

    fn read_number(&mut self) -> Result<f64, ExecError> {
        let start = self.pos;
        while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos + 1 < self.chars.len()
            && self.chars[self.pos] == '.'
            && self.chars[self.pos + 1].is_ascii_digit()
        {
            self.pos += 1;
            while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map_err(|_| self.err(format!("bad number literal `{text}`")))
    }

    /// String literal with backslash escapes for `\`, `'` and `"`; any other
    /// escape passes through verbatim. Raw newlines are allowed.
    fn read_string(&mut self, quote: char) -> String {
        self.pos += 1;
        let mut out = String::new();
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            self.pos += 1;
            match c {
                '\\' if self.pos < self.chars.len() => {
                    let next = self.chars[self.pos];
                    self.pos += 1;
                    if !matches!(next, '\\' | '\'' | '"') {
                        out.push('\\');
                    }
                    if next == '\n' {
                        self.line += 1;
                    }
                    out.push(next);
                }
                c if c == quote => break,
                '\n' => {
                    self.line += 1;
                    out.push('\n');
                }
                c => out.push(c),
            }
        }
        out
    }

    fn err(&self, message: impl Into<String>) -> ExecError {
        ExecError::Parse {
            line: self.line,
            message: message.into(),
        }
    }
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Seq,
    Sne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnOp {
    Not,
    Neg,
}

#[derive(Debug)]
enum Expr {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Var(String),
    Array(Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Isset(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AssignOp {
    Set,
    Add,
}

#[derive(Debug)]
enum Stmt {
    Text(String),
    Echo(Expr),
    If {
        arms: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    For {
        var: String,
        init: Expr,
        cond: Expr,
        step_var: String,
        step_op: AssignOp,
        step: Expr,
        body: Vec<Stmt>,
    },
    Foreach {
        collection: Expr,
        key: Option<String>,
        value: String,
        body: Vec<Stmt>,
    },
    Switch {
        subject: Expr,
        cases: Vec<(Expr, Vec<Stmt>)>,
        default: Option<Vec<Stmt>>,
    },
    Assign {
        target: String,
        indices: Vec<Expr>,
        op: AssignOp,
        value: Expr,
    },
    Cfgload(String),
    Expr(Expr),
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    toks: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn new(toks: Vec<Spanned>) -> Self {
        Self { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|s| &s.tok)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).map(|s| s.tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos)
            .or_else(|| self.toks.last())
            .map_or(1, |s| s.line)
    }

    fn err<T>(&self, message: impl Into<String>) -> Result<T, ExecError> {
        Err(ExecError::Parse {
            line: self.line(),
            message: message.into(),
        })
    }

    fn eat(&mut self, want: &Tok) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: &Tok, what: &str) -> Result<(), ExecError> {
        if self.eat(want) {
            Ok(())
        } else {
            self.err(format!("expected {what}, found {}", self.describe()))
        }
    }

    fn describe(&self) -> String {
        match self.peek() {
            None => "end of input".to_string(),
            Some(Tok::Text(_)) => "raw text".to_string(),
            Some(tok) => format!("{tok:?}"),
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, ExecError> {
        let stmts = self.parse_stmts(false)?;
        if self.pos < self.toks.len() {
            return self.err(format!("unexpected {}", self.describe()));
        }
        Ok(stmts)
    }

    /// Statement list; with `in_block` set, stops (without consuming) at `}`
    fn parse_stmts(&mut self, in_block: bool) -> Result<Vec<Stmt>, ExecError> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                None => {
                    if in_block {
                        return self.err("unexpected end of input inside a block");
                    }
                    return Ok(stmts);
                }
                Some(Tok::RBrace) => {
                    if in_block {
                        return Ok(stmts);
                    }
                    return self.err("unexpected `}`");
                }
                Some(Tok::Semi) => {
                    self.pos += 1;
                }
                Some(Tok::Text(_)) => {
                    if let Some(Tok::Text(text)) = self.bump() {
                        stmts.push(Stmt::Text(text));
                    }
                }
                Some(_) => stmts.push(self.parse_stmt()?),
            }
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ExecError> {
        self.expect(&Tok::LBrace, "`{`")?;
        let stmts = self.parse_stmts(true)?;
        self.expect(&Tok::RBrace, "`}`")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ExecError> {
        match self.peek() {
            Some(Tok::Ident(name)) => match name.as_str() {
                "echo" => {
                    self.pos += 1;
                    let expr = self.parse_expr()?;
                    self.expect(&Tok::Semi, "`;` after echo")?;
                    Ok(Stmt::Echo(expr))
                }
                "if" => self.parse_if(),
                "for" => self.parse_for(),
                "foreach" => self.parse_foreach(),
                "switch" => self.parse_switch(),
                "cfgload" => {
                    self.pos += 1;
                    let path = match self.bump() {
                        Some(Tok::Str(path)) => path,
                        _ => return self.err("expected string literal after cfgload"),
                    };
                    self.expect(&Tok::Semi, "`;` after cfgload")?;
                    Ok(Stmt::Cfgload(path))
                }
                _ => self.parse_expr_stmt(),
            },
            Some(Tok::Var(_)) => self.parse_assign_or_expr(),
            Some(_) => self.parse_expr_stmt(),
            None => self.err("expected a statement"),
        }
    }

    fn parse_expr_stmt(&mut self) -> Result<Stmt, ExecError> {
        let expr = self.parse_expr()?;
        self.expect(&Tok::Semi, "`;`")?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_if(&mut self) -> Result<Stmt, ExecError> {
        self.pos += 1; // if
        let mut arms = vec![(self.parse_expr()?, self.parse_block()?)];
        let mut otherwise = None;
        loop {
            match self.peek() {
                Some(Tok::Ident(name)) if name == "elseif" => {
                    self.pos += 1;
                    let cond = self.parse_expr()?;
                    arms.push((cond, self.parse_block()?));
                }
                Some(Tok::Ident(name)) if name == "else" => {
                    self.pos += 1;
                    otherwise = Some(self.parse_block()?);
                    break;
                }
                _ => break,
            }
        }
        Ok(Stmt::If { arms, otherwise })
    }

    fn parse_for(&mut self) -> Result<Stmt, ExecError> {
        self.pos += 1; // for
        let var = self.expect_var()?;
        self.expect(&Tok::Assign, "`=` in for initializer")?;
        let init = self.parse_expr()?;
        self.expect(&Tok::Semi, "`;` after for initializer")?;
        let cond = self.parse_expr()?;
        self.expect(&Tok::Semi, "`;` after for condition")?;
        let step_var = self.expect_var()?;
        let step_op = match self.bump() {
            Some(Tok::PlusAssign) => AssignOp::Add,
            Some(Tok::Assign) => AssignOp::Set,
            _ => return self.err("expected `+=` or `=` in for step"),
        };
        let step = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            var,
            init,
            cond,
            step_var,
            step_op,
            step,
            body,
        })
    }

    fn parse_foreach(&mut self) -> Result<Stmt, ExecError> {
        self.pos += 1; // foreach
        let collection = self.parse_expr()?;
        match self.bump() {
            Some(Tok::Ident(kw)) if kw == "as" => {}
            _ => return self.err("expected `as` in foreach"),
        }
        let first = self.expect_var()?;
        let (key, value) = if self.eat(&Tok::Arrow) {
            (Some(first), self.expect_var()?)
        } else {
            (None, first)
        };
        let body = self.parse_block()?;
        Ok(Stmt::Foreach {
            collection,
            key,
            value,
            body,
        })
    }

    /// Switch body: raw text between arms is discarded, each case runs to its
    /// `break;` (or the next arm), default has no break.
    fn parse_switch(&mut self) -> Result<Stmt, ExecError> {
        self.pos += 1; // switch
        let subject = self.parse_expr()?;
        self.expect(&Tok::LBrace, "`{` after switch subject")?;
        let mut cases = Vec::new();
        let mut default = None;
        loop {
            match self.peek() {
                Some(Tok::Text(_)) | Some(Tok::Semi) => {
                    self.pos += 1;
                }
                Some(Tok::Ident(name)) if name == "case" => {
                    self.pos += 1;
                    let value = self.parse_expr()?;
                    self.expect(&Tok::Colon, "`:` after case value")?;
                    cases.push((value, self.parse_arm_body()?));
                }
                Some(Tok::Ident(name)) if name == "default" => {
                    self.pos += 1;
                    self.expect(&Tok::Colon, "`:` after default")?;
                    default = Some(self.parse_arm_body()?);
                }
                Some(Tok::RBrace) => {
                    self.pos += 1;
                    break;
                }
                _ => return self.err(format!("unexpected {} in switch body", self.describe())),
            }
        }
        Ok(Stmt::Switch {
            subject,
            cases,
            default,
        })
    }

    fn parse_arm_body(&mut self) -> Result<Vec<Stmt>, ExecError> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                None | Some(Tok::RBrace) => return Ok(stmts),
                Some(Tok::Ident(name)) if name == "case" || name == "default" => return Ok(stmts),
                Some(Tok::Ident(name)) if name == "break" => {
                    self.pos += 1;
                    self.expect(&Tok::Semi, "`;` after break")?;
                    return Ok(stmts);
                }
                Some(Tok::Semi) => {
                    self.pos += 1;
                }
                Some(Tok::Text(_)) => {
                    if let Some(Tok::Text(text)) = self.bump() {
                        stmts.push(Stmt::Text(text));
                    }
                }
                Some(_) => stmts.push(self.parse_stmt()?),
            }
        }
    }

    /// `$x … = expr;` / `$x … += expr;`, or a bare expression statement
    /// starting with a variable
    fn parse_assign_or_expr(&mut self) -> Result<Stmt, ExecError> {
        let target = self.expect_var()?;
        let mut indices = Vec::new();
        while self.eat(&Tok::LBracket) {
            indices.push(self.parse_expr()?);
            self.expect(&Tok::RBracket, "`]`")?;
        }
        let op = match self.peek() {
            Some(Tok::Assign) => Some(AssignOp::Set),
            Some(Tok::PlusAssign) => Some(AssignOp::Add),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let value = self.parse_expr()?;
            self.expect(&Tok::Semi, "`;` after assignment")?;
            return Ok(Stmt::Assign {
                target,
                indices,
                op,
                value,
            });
        }
        // Re-assemble what was consumed and keep parsing it as an expression.
        let mut lhs = Expr::Var(target);
        for idx in indices {
            lhs = Expr::Index(Box::new(lhs), Box::new(idx));
        }
        let expr = self.parse_binary(lhs, 0)?;
        self.expect(&Tok::Semi, "`;`")?;
        Ok(Stmt::Expr(expr))
    }

    fn expect_var(&mut self) -> Result<String, ExecError> {
        match self.bump() {
            Some(Tok::Var(name)) => Ok(name),
            _ => self.err("expected a `$variable`"),
        }
    }

    // ---- expressions, precedence climbing ----

    fn parse_expr(&mut self) -> Result<Expr, ExecError> {
        let lhs = self.parse_unary()?;
        self.parse_binary(lhs, 0)
    }

    fn bin_op(tok: &Tok) -> Option<(BinOp, u8)> {
        Some(match tok {
            Tok::OrOr => (BinOp::Or, 1),
            Tok::AndAnd => (BinOp::And, 2),
            Tok::EqEq => (BinOp::Eq, 3),
            Tok::NotEq => (BinOp::Ne, 3),
            Tok::EqEqEq => (BinOp::Seq, 3),
            Tok::NotEqEq => (BinOp::Sne, 3),
            Tok::Lt => (BinOp::Lt, 4),
            Tok::Le => (BinOp::Le, 4),
            Tok::Gt => (BinOp::Gt, 4),
            Tok::Ge => (BinOp::Ge, 4),
            Tok::Plus => (BinOp::Add, 5),
            Tok::Minus => (BinOp::Sub, 5),
            Tok::Star => (BinOp::Mul, 6),
            Tok::Slash => (BinOp::Div, 6),
            Tok::Percent => (BinOp::Mod, 6),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, mut lhs: Expr, min_prec: u8) -> Result<Expr, ExecError> {
        while let Some((op, prec)) = self.peek().and_then(Self::bin_op) {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let mut rhs = self.parse_unary()?;
            while let Some((_, next_prec)) = self.peek().and_then(Self::bin_op) {
                if next_prec <= prec {
                    break;
                }
                rhs = self.parse_binary(rhs, next_prec)?;
            }
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExecError> {
        if self.eat(&Tok::Not) {
            return Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat(&Tok::Minus) {
            return Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)));
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, ExecError> {
        while self.eat(&Tok::LBracket) {
            let idx = self.parse_expr()?;
            self.expect(&Tok::RBracket, "`]`")?;
            expr = Expr::Index(Box::new(expr), Box::new(idx));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExecError> {
        match self.bump() {
            Some(Tok::Num(n)) => Ok(Expr::Num(n)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::Var(name)) => Ok(Expr::Var(name)),
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "isset" => {
                    self.expect(&Tok::LParen, "`(` after isset")?;
                    let inner = self.parse_expr()?;
                    self.expect(&Tok::RParen, "`)`")?;
                    Ok(Expr::Isset(Box::new(inner)))
                }
                _ => {
                    self.expect(&Tok::LParen, &format!("`(` after `{name}`"))?;
                    let mut args = Vec::new();
                    if !self.eat(&Tok::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.eat(&Tok::Comma) {
                                continue;
                            }
                            self.expect(&Tok::RParen, "`)` after arguments")?;
                            break;
                        }
                    }
                    Ok(Expr::Call(name, args))
                }
            },
            Some(Tok::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Tok::RParen, "`)`")?;
                Ok(expr)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Tok::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat(&Tok::Comma) {
                            continue;
                        }
                        self.expect(&Tok::RBracket, "`]` after array items")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                self.err(format!("expected an expression, found {}", self.describe()))
            }
        }
    }
}

// ============================================================================
// Value semantics
// ============================================================================

/// Template truthiness: null, false, 0, "", "0" and empty collections are
/// false; everything else is true.
pub(crate) fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn to_number(v: &Value) -> f64 {
    match v {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Array(_) | Value::Object(_) => 0.0,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn num(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Echo rendering: true prints `1`, false and null print nothing, numbers
/// drop an integral fraction, collections print as `Array`.
pub(crate) fn to_output_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => format_number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => "Array".to_string(),
    }
}

/// Loose `==`: coercing comparison across types
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, other) | (other, Value::Null) => match other {
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            Value::Null => true,
        },
        (Value::Bool(_), _) | (_, Value::Bool(_)) => truthy(a) == truthy(b),
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => s
            .trim()
            .parse::<f64>()
            .map(|p| Some(p) == n.as_f64())
            .unwrap_or(false),
        (Value::String(x), Value::String(y)) => {
            x == y
                || matches!(
                    (x.trim().parse::<f64>(), y.trim().parse::<f64>()),
                    (Ok(px), Ok(py)) if px == py
                )
        }
        _ => a == b,
    }
}

/// Strict `===`: same type, same value, no coercion
fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Null, Value::Null)
        | (Value::Bool(_), Value::Bool(_))
        | (Value::String(_), Value::String(_))
        | (Value::Array(_), Value::Array(_))
        | (Value::Object(_), Value::Object(_)) => a == b,
        _ => false,
    }
}

/// Ordering for `<`/`>` family: two non-numeric strings compare
/// lexicographically, everything else numerically.
fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        if x.trim().parse::<f64>().is_err() || y.trim().parse::<f64>().is_err() {
            return x.cmp(y);
        }
    }
    to_number(a)
        .partial_cmp(&to_number(b))
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// Map key form of a value, used for object indexing
fn value_key(v: &Value) -> String {
    to_output_string(v)
}

// ============================================================================
// Interpreter
// ============================================================================

fn identity_nocache(content: &str) -> String {
    content.to_string()
}

/// Executes compiled artifacts. The loader serves `cfgload` statements, the
/// nocache hook receives raw nocache-region content when the cache flag is
/// set, and the cache flag itself is visible to artifacts as `$__cache__`.
pub struct Executor<'a> {
    loader: &'a dyn ConfigLoader,
    nocache: &'a dyn Fn(&str) -> String,
    cache_active: bool,
}

impl<'a> Executor<'a> {
    pub fn new(loader: &'a dyn ConfigLoader) -> Self {
        Self {
            loader,
            nocache: &identity_nocache,
            cache_active: false,
        }
    }

    pub fn with_nocache_hook(mut self, hook: &'a dyn Fn(&str) -> String) -> Self {
        self.nocache = hook;
        self
    }

    pub fn with_cache_active(mut self, active: bool) -> Self {
        self.cache_active = active;
        self
    }

    /// Run one compiled artifact against the given bindings
    pub fn execute(&self, artifact: &str, bindings: &Bindings) -> Result<String, ExecError> {
        let tokens = Lexer::new(artifact).tokenize()?;
        let program = Parser::new(tokens).parse_program()?;

        let mut scope: HashMap<String, Value> =
            bindings.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        scope.insert("__cache__".to_string(), Value::Bool(self.cache_active));

        let mut interp = Interp {
            exec: self,
            scope,
            out: String::new(),
        };
        interp.run(&program)?;
        Ok(interp.out)
    }
}

struct Interp<'a, 'e> {
    exec: &'a Executor<'e>,
    scope: HashMap<String, Value>,
    out: String,
}

impl Interp<'_, '_> {
    fn run(&mut self, stmts: &[Stmt]) -> Result<(), ExecError> {
        for stmt in stmts {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<(), ExecError> {
        match stmt {
            Stmt::Text(text) => self.out.push_str(text),
            Stmt::Echo(expr) => {
                let value = self.eval(expr)?;
                self.out.push_str(&to_output_string(&value));
            }
            Stmt::If { arms, otherwise } => {
                for (cond, body) in arms {
                    if truthy(&self.eval(cond)?) {
                        return self.run(body);
                    }
                }
                if let Some(body) = otherwise {
                    self.run(body)?;
                }
            }
            Stmt::For {
                var,
                init,
                cond,
                step_var,
                step_op,
                step,
                body,
            } => {
                let start = self.eval(init)?;
                self.scope.insert(var.clone(), start);
                while truthy(&self.eval(cond)?) {
                    self.run(body)?;
                    let stepped = match step_op {
                        AssignOp::Set => self.eval(step)?,
                        AssignOp::Add => {
                            let cur = self.scope.get(step_var).cloned().unwrap_or(Value::Null);
                            num(to_number(&cur) + to_number(&self.eval(step)?))
                        }
                    };
                    self.scope.insert(step_var.clone(), stepped);
                }
            }
            Stmt::Foreach {
                collection,
                key,
                value,
                body,
            } => {
                let coll = self.eval(collection)?;
                let entries: Vec<(Value, Value)> = match coll {
                    Value::Array(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (num(i as f64), v))
                        .collect(),
                    Value::Object(map) => map
                        .into_iter()
                        .map(|(k, v)| (Value::String(k), v))
                        .collect(),
                    Value::Null => Vec::new(),
                    other => {
                        tracing::warn!(value = %to_output_string(&other), "foreach over a non-collection, skipping");
                        Vec::new()
                    }
                };
                for (k, v) in entries {
                    if let Some(key) = key {
                        self.scope.insert(key.clone(), k);
                    }
                    self.scope.insert(value.clone(), v);
                    self.run(body)?;
                }
            }
            Stmt::Switch {
                subject,
                cases,
                default,
            } => {
                let subject = self.eval(subject)?;
                for (value, body) in cases {
                    if loose_eq(&subject, &self.eval(value)?) {
                        return self.run(body);
                    }
                }
                if let Some(body) = default {
                    self.run(body)?;
                }
            }
            Stmt::Assign {
                target,
                indices,
                op,
                value,
            } => {
                let mut new = self.eval(value)?;
                let keys = indices
                    .iter()
                    .map(|idx| self.eval(idx))
                    .collect::<Result<Vec<_>, _>>()?;
                if keys.is_empty() {
                    if *op == AssignOp::Add {
                        let cur = self.scope.get(target).cloned().unwrap_or(Value::Null);
                        new = num(to_number(&cur) + to_number(&new));
                    }
                    self.scope.insert(target.clone(), new);
                } else {
                    if *op == AssignOp::Add {
                        let root = self.scope.get(target).cloned().unwrap_or(Value::Null);
                        let cur = keys.iter().fold(root, |acc, k| index_value(&acc, k));
                        new = num(to_number(&cur) + to_number(&new));
                    }
                    let root = self
                        .scope
                        .entry(target.clone())
                        .or_insert(Value::Null);
                    set_path(root, &keys, new);
                }
            }
            Stmt::Cfgload(path) => {
                let map = self
                    .exec
                    .loader
                    .load(Path::new(path))
                    .map_err(|e| ExecError::Eval(format!("cfgload {path}: {e}")))?;
                let cfg = self
                    .scope
                    .entry("__cfg".to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if let Value::Object(obj) = cfg {
                    for (k, v) in map {
                        obj.insert(k, Value::String(v));
                    }
                }
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr) -> Result<Value, ExecError> {
        Ok(match expr {
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Num(n) => num(*n),
            Expr::Str(s) => Value::String(s.clone()),
            // Undefined variables read as null, like an unset template var
            Expr::Var(name) => self.scope.get(name).cloned().unwrap_or(Value::Null),
            Expr::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Expr::Index(target, idx) => {
                let target = self.eval(target)?;
                let idx = self.eval(idx)?;
                index_value(&target, &idx)
            }
            Expr::Isset(inner) => Value::Bool(!self.eval(inner)?.is_null()),
            Expr::Unary(op, inner) => {
                let inner = self.eval(inner)?;
                match op {
                    UnOp::Not => Value::Bool(!truthy(&inner)),
                    UnOp::Neg => num(-to_number(&inner)),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                // Short-circuit logic first.
                match op {
                    BinOp::And => {
                        let l = self.eval(lhs)?;
                        if !truthy(&l) {
                            return Ok(Value::Bool(false));
                        }
                        return Ok(Value::Bool(truthy(&self.eval(rhs)?)));
                    }
                    BinOp::Or => {
                        let l = self.eval(lhs)?;
                        if truthy(&l) {
                            return Ok(Value::Bool(true));
                        }
                        return Ok(Value::Bool(truthy(&self.eval(rhs)?)));
                    }
                    _ => {}
                }
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                match op {
                    BinOp::Eq => Value::Bool(loose_eq(&l, &r)),
                    BinOp::Ne => Value::Bool(!loose_eq(&l, &r)),
                    BinOp::Seq => Value::Bool(strict_eq(&l, &r)),
                    BinOp::Sne => Value::Bool(!strict_eq(&l, &r)),
                    BinOp::Lt => Value::Bool(compare(&l, &r).is_lt()),
                    BinOp::Le => Value::Bool(compare(&l, &r).is_le()),
                    BinOp::Gt => Value::Bool(compare(&l, &r).is_gt()),
                    BinOp::Ge => Value::Bool(compare(&l, &r).is_ge()),
                    BinOp::Add => num(to_number(&l) + to_number(&r)),
                    BinOp::Sub => num(to_number(&l) - to_number(&r)),
                    BinOp::Mul => num(to_number(&l) * to_number(&r)),
                    BinOp::Div => {
                        if to_number(&r) == 0.0 {
                            return Err(ExecError::Eval("division by zero".to_string()));
                        }
                        num(to_number(&l) / to_number(&r))
                    }
                    BinOp::Mod => {
                        if to_number(&r) == 0.0 {
                            return Err(ExecError::Eval("modulo by zero".to_string()));
                        }
                        num(to_number(&l) % to_number(&r))
                    }
                    BinOp::And | BinOp::Or => unreachable!(),
                }
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, args)?
            }
        })
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
        let sarg = |i: usize| to_output_string(&arg(i));
        Ok(match name {
            "nocache" => Value::String((self.exec.nocache)(&sarg(0))),
            "in_array" => {
                let needle = arg(0);
                let found = match arg(1) {
                    Value::Array(items) => items.iter().any(|v| loose_eq(v, &needle)),
                    _ => false,
                };
                Value::Bool(found)
            }
            "upper" => Value::String(sarg(0).to_uppercase()),
            "lower" => Value::String(sarg(0).to_lowercase()),
            "trim" => Value::String(sarg(0).trim().to_string()),
            "capitalize" => {
                let s = sarg(0);
                let mut chars = s.chars();
                Value::String(match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                })
            }
            "nl2br" => Value::String(sarg(0).replace('\n', "<br />\n")),
            "escape" => Value::String(crate::parser::html_escape(&sarg(0))),
            "length" | "count" => {
                let n = match arg(0) {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    Value::Null => 0,
                    _ => 1,
                };
                num(n as f64)
            }
            "substr" => {
                let chars: Vec<char> = sarg(0).chars().collect();
                let total = chars.len() as i64;
                let mut start = to_number(&arg(1)) as i64;
                if start < 0 {
                    start = (total + start).max(0);
                }
                let start = (start as usize).min(chars.len());
                let end = match args.get(2) {
                    Some(len) => (start + (to_number(len).max(0.0) as usize)).min(chars.len()),
                    None => chars.len(),
                };
                Value::String(chars[start..end].iter().collect())
            }
            "replace" => Value::String(sarg(0).replace(&sarg(1), &sarg(2))),
            "abs" => num(to_number(&arg(0)).abs()),
            "round" => {
                let places = to_number(&arg(1)) as i32;
                let factor = 10f64.powi(places);
                num((to_number(&arg(0)) * factor).round() / factor)
            }
            "join" => {
                let sep = match args.get(1) {
                    Some(v) => to_output_string(v),
                    None => String::new(),
                };
                let joined = match arg(0) {
                    Value::Array(items) => items
                        .iter()
                        .map(to_output_string)
                        .collect::<Vec<_>>()
                        .join(&sep),
                    other => to_output_string(&other),
                };
                Value::String(joined)
            }
            _ => return Err(ExecError::UnknownFunction(name.to_string())),
        })
    }
}

fn index_value(target: &Value, idx: &Value) -> Value {
    match target {
        Value::Object(map) => map.get(&value_key(idx)).cloned().unwrap_or(Value::Null),
        Value::Array(items) => {
            let n = to_number(idx);
            if n >= 0.0 && n.fract() == 0.0 {
                items.get(n as usize).cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        }
        _ => Value::Null,
    }
}

/// Write `value` at the nested key path under `root`, materializing
/// intermediate objects as needed
fn set_path(root: &mut Value, keys: &[Value], value: Value) {
    let Some((first, rest)) = keys.split_first() else {
        *root = value;
        return;
    };
    if !matches!(root, Value::Object(_) | Value::Array(_)) {
        *root = Value::Object(serde_json::Map::new());
    }
    match root {
        Value::Object(map) => {
            let slot = map.entry(value_key(first)).or_insert(Value::Null);
            set_path(slot, rest, value);
        }
        Value::Array(items) => {
            let i = to_number(first).max(0.0) as usize;
            while items.len() <= i {
                items.push(Value::Null);
            }
            set_path(&mut items[i], rest, value);
        }
        _ => unreachable!(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlatFileConfig;
    use serde_json::json;
    use std::io::Write;

    fn bindings(v: serde_json::Value) -> Bindings {
        v.as_object().unwrap().clone()
    }

    fn run_with(artifact: &str, b: Bindings) -> String {
        Executor::new(&FlatFileConfig).execute(artifact, &b).unwrap()
    }

    fn run(artifact: &str) -> String {
        run_with(artifact, Bindings::new())
    }

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(run("hello <b>world</b>\n"), "hello <b>world</b>\n");
    }

    #[test]
    fn test_echo_output_coercions() {
        assert_eq!(run("<?rs echo 'hi'; ?>"), "hi");
        assert_eq!(run("<?rs echo 1 + 2; ?>"), "3");
        assert_eq!(run("<?rs echo 2.5; ?>"), "2.5");
        assert_eq!(run("<?rs echo true; echo false; echo null; ?>"), "1");
        assert_eq!(run("<?rs echo $missing; ?>"), "");
    }

    #[test]
    fn test_variable_and_index_access() {
        let b = bindings(json!({"user": {"name": "kay", "tags": ["a", "b"]}}));
        assert_eq!(run_with("<?rs echo $user['name']; ?>", b.clone()), "kay");
        assert_eq!(run_with("<?rs echo $user['tags'][1]; ?>", b.clone()), "b");
        assert_eq!(run_with("<?rs echo $user['ghost']; ?>", b), "");
    }

    #[test]
    fn test_if_elseif_else() {
        let tpl = "<?rs if $n > 10 { echo 'big'; } elseif $n > 1 { echo 'mid'; } else { echo 'small'; } ?>";
        assert_eq!(run_with(tpl, bindings(json!({"n": 50}))), "big");
        assert_eq!(run_with(tpl, bindings(json!({"n": 5}))), "mid");
        assert_eq!(run_with(tpl, bindings(json!({"n": 0}))), "small");
    }

    #[test]
    fn test_loose_vs_strict_equality() {
        let b = bindings(json!({"n": 5}));
        assert_eq!(run_with("<?rs if ($n == '5') { echo 'y'; } ?>", b.clone()), "y");
        assert_eq!(run_with("<?rs if ($n === '5') { echo 'y'; } else { echo 'n'; } ?>", b.clone()), "n");
        assert_eq!(run_with("<?rs if ($n === 5) { echo 'y'; } ?>", b), "y");
        assert_eq!(run("<?rs if (null == false) { echo 'a'; } ?>"), "a");
        assert_eq!(run("<?rs if ('abc' == 0) { echo 'y'; } else { echo 'n'; } ?>"), "n");
    }

    #[test]
    fn test_truthiness_of_edge_values() {
        for (binding, expected) in [
            (json!({"z": "0"}), "n"),
            (json!({"z": ""}), "n"),
            (json!({"z": []}), "n"),
            (json!({"z": 0}), "n"),
            (json!({"z": "yes"}), "y"),
            (json!({"z": [1]}), "y"),
        ] {
            let out = run_with(
                "<?rs if $z { echo 'y'; } else { echo 'n'; } ?>",
                bindings(binding.clone()),
            );
            assert_eq!(out, expected, "binding: {binding}");
        }
    }

    #[test]
    fn test_for_loop_with_text_body() {
        assert_eq!(
            run("<?rs for $i = 0; $i < 3; $i += 1 { ?>x<?rs } ?>"),
            "xxx"
        );
        assert_eq!(
            run("<?rs for $i = 0; $i < 3; $i += 1 { echo $i; } ?>"),
            "012"
        );
        assert_eq!(
            run("<?rs for $i = 9; $i >= 5; $i += -2 { echo $i; } ?>"),
            "975"
        );
    }

    #[test]
    fn test_foreach_array_and_object() {
        let b = bindings(json!({"users": ["ann", "bob"]}));
        assert_eq!(
            run_with("<?rs foreach $users as $u { echo $u; } ?>", b.clone()),
            "annbob"
        );
        assert_eq!(
            run_with(
                "<?rs foreach $users as $k => $u { echo $k; echo $u; } ?>",
                b
            ),
            "0ann1bob"
        );

        // Object iteration preserves insertion order.
        let b = bindings(json!({"site": {"title": "T", "author": "A"}}));
        assert_eq!(
            run_with(
                "<?rs foreach $site as $k => $v { echo $k; echo '='; echo $v; echo ';'; } ?>",
                b
            ),
            "title=T;author=A;"
        );
        assert_eq!(run("<?rs foreach $missing as $v { echo $v; } ?>"), "");
    }

    #[test]
    fn test_switch_case_default() {
        let tpl = "<?rs switch $kind { ?>ignored<?rs case 'a': echo \"A\"; break; case 2: echo \"two\"; break; default: echo \"other\"; } ?>";
        assert_eq!(run_with(tpl, bindings(json!({"kind": "a"}))), "A");
        // Loose match: string '2' binding hits the numeric case.
        assert_eq!(run_with(tpl, bindings(json!({"kind": "2"}))), "two");
        assert_eq!(run_with(tpl, bindings(json!({"kind": "zz"}))), "other");
    }

    #[test]
    fn test_assignment_and_accumulate() {
        assert_eq!(run("<?rs $a = 1; $a += 2; echo $a; ?>"), "3");
        assert_eq!(run("<?rs $s = 'it\\'s'; echo $s; ?>"), "it's");
        assert_eq!(
            run("<?rs $index = 1; foreach [10, 20] as $v { $index += 1; } echo $index; ?>"),
            "3"
        );
    }

    #[test]
    fn test_cfgload_populates_cfg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.cfg");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "title=My Site").unwrap();
        drop(f);

        let artifact = format!(
            "<?rs cfgload '{}'; echo $__cfg['title']; ?>",
            path.display()
        );
        assert_eq!(run(&artifact), "My Site");
    }

    #[test]
    fn test_cfgload_missing_resource_fails() {
        let err = Executor::new(&FlatFileConfig)
            .execute("<?rs cfgload '/no/such/file.cfg'; ?>", &Bindings::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::Eval(_)));
    }

    #[test]
    fn test_filters() {
        let b = bindings(json!({"name": "carol"}));
        assert_eq!(run_with("<?rs echo upper($name); ?>", b.clone()), "CAROL");
        assert_eq!(
            run_with("<?rs echo substr(upper($name),0,3); ?>", b.clone()),
            "CAR"
        );
        assert_eq!(run_with("<?rs echo capitalize($name); ?>", b), "Carol");
        assert_eq!(run("<?rs echo trim('  x  '); ?>"), "x");
        assert_eq!(run("<?rs echo length('héllo'); ?>"), "5");
        assert_eq!(run("<?rs echo count([1, 2, 3]); ?>"), "3");
        assert_eq!(run("<?rs echo replace('a-b', '-', '+'); ?>"), "a+b");
        assert_eq!(run("<?rs echo escape('<b>&</b>'); ?>"), "&lt;b&gt;&amp;&lt;/b&gt;");
        assert_eq!(run("<?rs echo nl2br('a\nb'); ?>"), "a<br />\nb");
        assert_eq!(run("<?rs echo abs(-4); echo round(2.567, 2); ?>"), "42.57");
        assert_eq!(run("<?rs echo join(['a', 'b'], ', '); ?>"), "a, b");
        assert_eq!(run("<?rs echo substr('hello', -3); ?>"), "llo");
    }

    #[test]
    fn test_in_array_is_loose() {
        let b = bindings(json!({"age": 3}));
        assert_eq!(
            run_with(
                "<?rs if (in_array($age, ['1', '3', '5'])) { echo 'hit'; } ?>",
                b
            ),
            "hit"
        );
    }

    #[test]
    fn test_isset_default_pattern() {
        let tpl = "<?rs if isset($title) { echo ($title); } else { echo \"untitled\"; } ?>";
        assert_eq!(run_with(tpl, bindings(json!({"title": "T"}))), "T");
        assert_eq!(run(tpl), "untitled");
    }

    #[test]
    fn test_nocache_dispatch() {
        let hook = |content: &str| format!("[{content}]");
        let tpl = "<?rs if $__cache__ { echo nocache(\"live\"); } else { ?>live<?rs } ?>";

        let out = Executor::new(&FlatFileConfig)
            .with_nocache_hook(&hook)
            .with_cache_active(true)
            .execute(tpl, &Bindings::new())
            .unwrap();
        assert_eq!(out, "[live]");

        let out = Executor::new(&FlatFileConfig)
            .with_nocache_hook(&hook)
            .execute(tpl, &Bindings::new())
            .unwrap();
        assert_eq!(out, "live");
    }

    #[test]
    fn test_unknown_function_is_an_error() {
        let err = Executor::new(&FlatFileConfig)
            .execute("<?rs echo mystery(1); ?>", &Bindings::new())
            .unwrap_err();
        match err {
            ExecError::UnknownFunction(name) => assert_eq!(name, "mystery"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_error_carries_line() {
        let err = Executor::new(&FlatFileConfig)
            .execute("line one\n<?rs echo ; ?>", &Bindings::new())
            .unwrap_err();
        match err {
            ExecError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_division_by_zero() {
        let err = Executor::new(&FlatFileConfig)
            .execute("<?rs echo 1 / 0; ?>", &Bindings::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::Eval(_)));
    }

    #[test]
    fn test_indexed_assignment() {
        assert_eq!(
            run("<?rs $m['a']['b'] = 7; echo $m['a']['b']; ?>"),
            "7"
        );
    }

    #[test]
    fn test_not_and_negation() {
        assert_eq!(run("<?rs if (!$missing) { echo 'y'; } ?>"), "y");
        assert_eq!(run("<?rs echo -3 + 5; ?>"), "2");
    }

    #[test]
    fn test_operator_precedence() {
        assert_eq!(run("<?rs echo 2 + 3 * 4; ?>"), "14");
        assert_eq!(
            run("<?rs if (1 == 1 && 2 > 3 || 5 >= 5) { echo 'y'; } ?>"),
            "y"
        );
    }
}
