//! Recursive-descent parser for Strada
//!
//! Statements and declarations are parsed by straightforward descent;
//! expressions use Pratt-style binding powers following the documented
//! precedence table. Two tokens of lookahead (`cur`, `next`) suffice for
//! every disambiguation in the grammar.
//!
//! The parser maintains a registry of struct names seen so far; an
//! identifier matching a known struct is read as a type in declaration
//! context. `unless` and `until` are desugared here into `if`/`while` with
//! a negated condition, and a label immediately preceding a loop attaches
//! to that loop.

use crate::ast::{
    AssignOp, BinOp, Block, Expr, FunctionDef, Param, Program, RefKind, Stmt, StructDef,
    StructField, UnOp, UseDecl,
};
use crate::lexer::{Kw, Lexer, Token, TokenKind};
use crate::types::{Sigil, Type};
use std::collections::HashSet;

/// Binding power of postfix chains (`->`, `[ ]`, `{ }`, `++`, `--`).
const POSTFIX_BP: u8 = 40;
/// Binding power to the right of a prefix operator.
const PREFIX_BP: u8 = 32;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    cur: Token,
    next: Token,
    /// Struct names seen so far; used as a type cue
    structs: HashSet<String>,
    /// Package in effect for subsequent definitions
    package: Option<String>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, String> {
        let mut lexer = Lexer::new(source);
        let cur = lexer.next_token()?;
        let next = lexer.next_token()?;
        Ok(Parser {
            lexer,
            cur,
            next,
            structs: HashSet::new(),
            package: None,
        })
    }

    /// Parse a complete source file into a program node.
    pub fn parse(source: &str) -> Result<Program, String> {
        Parser::new(source)?.parse_program()
    }

    // ========================================================================
    // Token plumbing
    // ========================================================================

    fn advance(&mut self) -> Result<Token, String> {
        let pulled = self.lexer.next_token()?;
        let next = std::mem::replace(&mut self.next, pulled);
        Ok(std::mem::replace(&mut self.cur, next))
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.cur.kind == kind
    }

    fn at_kw(&self, kw: Kw) -> bool {
        self.cur.is_kw(kw)
    }

    fn eat(&mut self, kind: &TokenKind) -> Result<bool, String> {
        if self.at(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn err(&self, msg: impl std::fmt::Display) -> String {
        format!(
            "{}:{}: parse error: {}",
            self.cur.line, self.cur.col, msg
        )
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, String> {
        if self.at(kind) {
            self.advance()
        } else {
            Err(self.err(format!("expected {}, got {}", what, self.cur)))
        }
    }

    fn expect_kw(&mut self, kw: Kw, what: &str) -> Result<Token, String> {
        if self.at_kw(kw) {
            self.advance()
        } else {
            Err(self.err(format!("expected {}, got {}", what, self.cur)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, String> {
        match self.cur.kind.clone() {
            TokenKind::Ident(name) => {
                self.advance()?;
                Ok(name)
            }
            _ => Err(self.err(format!("expected {}, got {}", what, self.cur))),
        }
    }

    // ========================================================================
    // Top level
    // ========================================================================

    pub fn parse_program(&mut self) -> Result<Program, String> {
        let mut program = Program::new();

        while !self.at(&TokenKind::Eof) {
            if self.at_kw(Kw::Package) {
                self.parse_package_decl()?;
            } else if self.at_kw(Kw::Use) {
                self.parse_use(&mut program)?;
            } else if self.at_kw(Kw::Version) {
                self.advance()?;
                let tok = self.advance()?;
                match tok.kind {
                    TokenKind::Int(_) | TokenKind::Num(_) => {
                        program.version = Some(tok.lexeme);
                    }
                    _ => return Err(self.err("expected version number")),
                }
                self.expect(&TokenKind::Semi, "';'")?;
            } else if self.at_kw(Kw::ImportLib) {
                self.advance()?;
                let lib = self.expect_str("library name")?;
                self.expect(&TokenKind::Semi, "';'")?;
                program.shim_libs.push(lib);
            } else if self.at_kw(Kw::Struct) {
                let def = self.parse_struct_def()?;
                program.structs.push(def);
            } else if self.at_kw(Kw::Func) {
                let f = self.parse_function(false)?;
                program.functions.push(f);
            } else if self.at_kw(Kw::Extern) {
                self.advance()?;
                self.expect_kw(Kw::Func, "'func' after 'extern'")?;
                let f = self.parse_function(true)?;
                program.functions.push(f);
            } else {
                let stmt = self.parse_statement()?;
                program.top_stmts.push(stmt);
            }
        }

        Ok(program)
    }

    fn parse_package_decl(&mut self) -> Result<(), String> {
        self.advance()?; // 'package'
        let name = self.parse_package_name()?;
        self.expect(&TokenKind::Semi, "';'")?;
        // `package main;` returns to the default (unprefixed) package
        self.package = if name == "main" { None } else { Some(name) };
        Ok(())
    }

    /// `Name` or `Name::Space::Deep`
    fn parse_package_name(&mut self) -> Result<String, String> {
        let mut name = self.expect_ident("package name")?;
        while self.at(&TokenKind::ColonColon) {
            self.advance()?;
            let seg = self.expect_ident("package name segment")?;
            name.push_str("::");
            name.push_str(&seg);
        }
        Ok(name)
    }

    fn expect_str(&mut self, what: &str) -> Result<String, String> {
        match self.cur.kind.clone() {
            TokenKind::Str { value, .. } => {
                self.advance()?;
                Ok(value)
            }
            _ => Err(self.err(format!("expected {}, got {}", what, self.cur))),
        }
    }

    fn parse_use(&mut self, program: &mut Program) -> Result<(), String> {
        let line = self.cur.line;
        self.advance()?; // 'use'

        // `use lib "path";`
        if self.cur.ident() == Some("lib") && matches!(self.next.kind, TokenKind::Str { .. }) {
            self.advance()?;
            let path = self.expect_str("library path")?;
            self.expect(&TokenKind::Semi, "';'")?;
            program.lib_paths.push(path);
            return Ok(());
        }

        let package = self.parse_package_name()?;
        let mut imports = Vec::new();
        if let TokenKind::Words(words) = self.cur.kind.clone() {
            self.advance()?;
            imports = words;
        }
        self.expect(&TokenKind::Semi, "';'")?;
        program.uses.push(UseDecl {
            package,
            imports,
            line,
        });
        Ok(())
    }

    // ========================================================================
    // Struct definitions
    // ========================================================================

    fn parse_struct_def(&mut self) -> Result<StructDef, String> {
        let line = self.cur.line;
        self.advance()?; // 'struct'
        let name = self.expect_ident("struct name")?;
        // Register before the fields so self-referential structs parse
        self.structs.insert(name.clone());
        self.expect(&TokenKind::LBrace, "'{'")?;

        let mut fields = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.err(format!("unexpected end of file in struct '{}'", name)));
            }
            fields.push(self.parse_struct_field()?);
        }
        self.expect(&TokenKind::RBrace, "'}'")?;

        Ok(StructDef {
            name,
            fields,
            total_size: 0,
            line,
        })
    }

    /// `type name;` or `func(type, type) ret name;`
    fn parse_struct_field(&mut self) -> Result<StructField, String> {
        let line = self.cur.line;
        let ty = self.parse_type()?;
        let name = self.expect_ident("field name")?;
        self.expect(&TokenKind::Semi, "';'")?;
        Ok(StructField {
            name,
            ty,
            offset: 0,
            line,
        })
    }

    fn parse_type(&mut self) -> Result<Type, String> {
        if self.at_kw(Kw::Func) {
            self.advance()?;
            self.expect(&TokenKind::LParen, "'('")?;
            let mut params = Vec::new();
            while !self.at(&TokenKind::RParen) {
                params.push(self.parse_type()?);
                if !self.eat(&TokenKind::Comma)? {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
            let ret = self.parse_type()?;
            return Ok(Type::Func {
                ret: Box::new(ret),
                params,
            });
        }

        let word = self.expect_ident("type name")?;
        if let Some(ty) = Type::from_keyword(&word) {
            Ok(ty)
        } else if self.structs.contains(&word) {
            Ok(Type::Struct(word))
        } else {
            Err(self.err(format!("unknown type '{}'", word)))
        }
    }

    // ========================================================================
    // Functions
    // ========================================================================

    fn parse_function(&mut self, is_extern: bool) -> Result<FunctionDef, String> {
        let line = self.cur.line;
        self.advance()?; // 'func'
        let name = self.expect_ident("function name")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let params = self.parse_params()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let ret = self.parse_type()?;

        let body = if is_extern {
            self.expect(&TokenKind::Semi, "';'")?;
            None
        } else {
            Some(self.parse_block()?)
        };

        Ok(FunctionDef {
            name,
            package: self.package.clone(),
            params,
            ret,
            body,
            line,
            emitted_name: String::new(),
            min_args: 0,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, String> {
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            params.push(self.parse_param()?);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        Ok(params)
    }

    /// `TYPE $name`, `TYPE $name = default`, or `TYPE ...$name` (final)
    fn parse_param(&mut self) -> Result<Param, String> {
        let line = self.cur.line;
        let ty = self.parse_type()?;
        let variadic = self.eat(&TokenKind::Ellipsis)?;
        let sigil = self.parse_sigil()?;
        let name = self.expect_ident("parameter name")?;
        let default = if self.eat(&TokenKind::Assign)? {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Param {
            ty,
            sigil,
            name,
            default,
            variadic,
            line,
        })
    }

    fn parse_sigil(&mut self) -> Result<Sigil, String> {
        let sigil = match self.cur.kind {
            TokenKind::Dollar => Sigil::Scalar,
            TokenKind::At => Sigil::Array,
            TokenKind::Percent => Sigil::Hash,
            _ => return Err(self.err(format!("expected sigil, got {}", self.cur))),
        };
        self.advance()?;
        Ok(sigil)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_block(&mut self) -> Result<Block, String> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.err("unexpected end of file in block"));
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, String> {
        let line = self.cur.line;
        match &self.cur.kind {
            TokenKind::Kw(Kw::My) => self.parse_var_decl(),
            TokenKind::Kw(Kw::If) => self.parse_if(false),
            TokenKind::Kw(Kw::Unless) => self.parse_if(true),
            TokenKind::Kw(Kw::While) => self.parse_while(false, None),
            TokenKind::Kw(Kw::Until) => self.parse_while(true, None),
            TokenKind::Kw(Kw::For) => self.parse_for(None),
            TokenKind::Kw(Kw::Foreach) => self.parse_foreach(None),
            TokenKind::Kw(Kw::Return) => {
                self.advance()?;
                let value = if self.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&TokenKind::Semi, "';'")?;
                Ok(Stmt::Return { value, line })
            }
            TokenKind::Kw(Kw::Last) => {
                self.advance()?;
                let label = self.opt_label()?;
                self.expect(&TokenKind::Semi, "';'")?;
                Ok(Stmt::Last { label, line })
            }
            TokenKind::Kw(Kw::Next) => {
                self.advance()?;
                let label = self.opt_label()?;
                self.expect(&TokenKind::Semi, "';'")?;
                Ok(Stmt::Next { label, line })
            }
            TokenKind::Kw(Kw::Goto) => {
                self.advance()?;
                let label = self.expect_ident("label")?;
                self.expect(&TokenKind::Semi, "';'")?;
                Ok(Stmt::Goto { label, line })
            }
            TokenKind::Kw(Kw::Try) => self.parse_try(),
            TokenKind::Kw(Kw::Throw) => {
                self.advance()?;
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semi, "';'")?;
                Ok(Stmt::Throw { value, line })
            }
            TokenKind::Kw(Kw::Inherit) => {
                self.advance()?;
                let parent = self.expect_str("parent class name")?;
                self.expect(&TokenKind::Semi, "';'")?;
                Ok(Stmt::Inherit {
                    parent,
                    package: self.package.clone(),
                    line,
                })
            }
            // `LABEL:` introduces either a labeled loop or a goto target
            TokenKind::Ident(_) if self.next.kind == TokenKind::Colon => {
                let name = self.expect_ident("label")?;
                self.advance()?; // ':'
                match &self.cur.kind {
                    TokenKind::Kw(Kw::While) => self.parse_while(false, Some(name)),
                    TokenKind::Kw(Kw::Until) => self.parse_while(true, Some(name)),
                    TokenKind::Kw(Kw::For) => self.parse_for(Some(name)),
                    TokenKind::Kw(Kw::Foreach) => self.parse_foreach(Some(name)),
                    _ => Ok(Stmt::Label { name, line }),
                }
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::Semi, "';'")?;
                Ok(Stmt::Expr { expr, line })
            }
        }
    }

    fn opt_label(&mut self) -> Result<Option<String>, String> {
        if let TokenKind::Ident(name) = self.cur.kind.clone() {
            self.advance()?;
            Ok(Some(name))
        } else {
            Ok(None)
        }
    }

    /// `my TYPE SIGILNAME [= expr] ;` or `my TYPE SIGILNAME[CAP];`
    fn parse_var_decl(&mut self) -> Result<Stmt, String> {
        let line = self.cur.line;
        self.advance()?; // 'my'
        let ty = self.parse_type()?;
        let sigil = self.parse_sigil()?;
        let name = self.expect_ident("variable name")?;

        let mut capacity = None;
        let mut init = None;
        if self.eat(&TokenKind::LBracket)? {
            capacity = Some(self.parse_expr()?);
            self.expect(&TokenKind::RBracket, "']'")?;
        } else if self.eat(&TokenKind::Assign)? {
            init = Some(self.parse_expr()?);
        }
        self.expect(&TokenKind::Semi, "';'")?;

        Ok(Stmt::VarDecl {
            ty,
            sigil,
            name,
            init,
            capacity,
            line,
        })
    }

    fn parse_cond(&mut self) -> Result<Expr, String> {
        self.expect(&TokenKind::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(cond)
    }

    fn negate(cond: Expr, line: usize) -> Expr {
        Expr::Unary {
            op: UnOp::Not,
            operand: Box::new(cond),
            line,
        }
    }

    fn parse_if(&mut self, negated: bool) -> Result<Stmt, String> {
        let line = self.cur.line;
        self.advance()?; // 'if' / 'unless'
        let mut cond = self.parse_cond()?;
        if negated {
            cond = Self::negate(cond, line);
        }
        let then_block = self.parse_block()?;

        let else_block = if self.at_kw(Kw::Elsif) {
            // An elsif chain nests as a single-statement else block
            let nested = self.parse_if(false)?;
            Some(vec![nested])
        } else if self.at_kw(Kw::Else) {
            self.advance()?;
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            line,
        })
    }

    fn parse_while(&mut self, negated: bool, label: Option<String>) -> Result<Stmt, String> {
        let line = self.cur.line;
        self.advance()?; // 'while' / 'until'
        let mut cond = self.parse_cond()?;
        if negated {
            cond = Self::negate(cond, line);
        }
        let body = self.parse_block()?;
        Ok(Stmt::While {
            cond,
            body,
            label,
            line,
        })
    }

    fn parse_for(&mut self, label: Option<String>) -> Result<Stmt, String> {
        let line = self.cur.line;
        self.advance()?; // 'for'
        self.expect(&TokenKind::LParen, "'('")?;

        let init = if self.at(&TokenKind::Semi) {
            self.advance()?;
            None
        } else if self.at_kw(Kw::My) {
            Some(Box::new(self.parse_var_decl()?))
        } else {
            let expr = self.parse_expr()?;
            let stmt = Stmt::Expr { expr, line };
            self.expect(&TokenKind::Semi, "';'")?;
            Some(Box::new(stmt))
        };

        let cond = if self.at(&TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::Semi, "';'")?;

        let update = if self.at(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::RParen, "')'")?;

        let body = self.parse_block()?;
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
            label,
            line,
        })
    }

    /// `foreach my TYPE $var (@array) { ... }`
    fn parse_foreach(&mut self, label: Option<String>) -> Result<Stmt, String> {
        let line = self.cur.line;
        self.advance()?; // 'foreach'
        self.expect_kw(Kw::My, "'my'")?;
        let ty = self.parse_type()?;
        self.expect(&TokenKind::Dollar, "'$'")?;
        let var = self.expect_ident("loop variable")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let iterable = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::Foreach {
            ty,
            var,
            iterable,
            body,
            label,
            line,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, String> {
        let line = self.cur.line;
        self.advance()?; // 'try'
        let body = self.parse_block()?;
        self.expect_kw(Kw::Catch, "'catch'")?;
        self.expect(&TokenKind::LParen, "'('")?;
        self.expect(&TokenKind::Dollar, "'$'")?;
        let catch_var = self.expect_ident("catch variable")?;
        self.expect(&TokenKind::RParen, "')'")?;
        let catch_body = self.parse_block()?;
        Ok(Stmt::Try {
            body,
            catch_var,
            catch_body,
            line,
        })
    }

    // ========================================================================
    // Expressions (Pratt)
    // ========================================================================

    pub fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_bp(0)
    }

    /// Infix binding powers: `(left, right)`. Left-assoc operators use
    /// `right = left + 1`; right-assoc use `right = left`.
    fn infix_bp(&self) -> Option<(BinOp, u8, u8)> {
        let entry = match &self.cur.kind {
            TokenKind::OrOr | TokenKind::Kw(Kw::Or) => (BinOp::Or, 8, 9),
            TokenKind::AndAnd | TokenKind::Kw(Kw::And) => (BinOp::And, 10, 11),
            TokenKind::Pipe => (BinOp::BitOr, 12, 13),
            TokenKind::Caret => (BinOp::BitXor, 14, 15),
            TokenKind::Amp => (BinOp::BitAnd, 16, 17),
            TokenKind::EqEq => (BinOp::Eq, 18, 19),
            TokenKind::BangEq => (BinOp::Ne, 18, 19),
            TokenKind::Kw(Kw::Eq) => (BinOp::StrEq, 18, 19),
            TokenKind::Kw(Kw::Ne) => (BinOp::StrNe, 18, 19),
            TokenKind::BindMatch => (BinOp::Match, 18, 19),
            TokenKind::BindNotMatch => (BinOp::NotMatch, 18, 19),
            TokenKind::Lt => (BinOp::Lt, 20, 21),
            TokenKind::Gt => (BinOp::Gt, 20, 21),
            TokenKind::Le => (BinOp::Le, 20, 21),
            TokenKind::Ge => (BinOp::Ge, 20, 21),
            TokenKind::Kw(Kw::Lt) => (BinOp::StrLt, 20, 21),
            TokenKind::Kw(Kw::Gt) => (BinOp::StrGt, 20, 21),
            TokenKind::Kw(Kw::Le) => (BinOp::StrLe, 20, 21),
            TokenKind::Kw(Kw::Ge) => (BinOp::StrGe, 20, 21),
            TokenKind::Shl => (BinOp::Shl, 22, 23),
            TokenKind::Shr => (BinOp::Shr, 22, 23),
            TokenKind::DotDot => (BinOp::Range, 24, 25),
            TokenKind::Plus => (BinOp::Add, 26, 27),
            TokenKind::Minus => (BinOp::Sub, 26, 27),
            TokenKind::Dot => (BinOp::Concat, 26, 27),
            TokenKind::Star => (BinOp::Mul, 28, 29),
            TokenKind::Slash => (BinOp::Div, 28, 29),
            TokenKind::Percent => (BinOp::Mod, 28, 29),
            TokenKind::Ident(name) if name == "x" => (BinOp::Repeat, 28, 29),
            TokenKind::StarStar => (BinOp::Pow, 30, 30),
            _ => return None,
        };
        Some(entry)
    }

    fn assign_op(&self) -> Option<AssignOp> {
        match self.cur.kind {
            TokenKind::Assign => Some(AssignOp::Assign),
            TokenKind::PlusAssign => Some(AssignOp::AddAssign),
            TokenKind::MinusAssign => Some(AssignOp::SubAssign),
            TokenKind::ConcatAssign => Some(AssignOp::ConcatAssign),
            _ => None,
        }
    }

    fn parse_bp(&mut self, min_bp: u8) -> Result<Expr, String> {
        let mut lhs = self.parse_prefix()?;

        loop {
            // Postfix: member/index/call chains and ++/--
            if POSTFIX_BP >= min_bp {
                let (stepped, applied) = self.try_parse_postfix(lhs)?;
                lhs = stepped;
                if applied {
                    continue;
                }
            }

            // Assignment (right-assoc, lowest)
            if let Some(op) = self.assign_op() {
                if 4 >= min_bp {
                    let line = self.cur.line;
                    self.advance()?;
                    let value = self.parse_bp(4)?;
                    lhs = Expr::Assign {
                        op,
                        target: Box::new(lhs),
                        value: Box::new(value),
                        line,
                    };
                    continue;
                }
            }

            // Ternary (right-assoc)
            if self.at(&TokenKind::Question) && 6 >= min_bp {
                let line = self.cur.line;
                self.advance()?;
                let then_val = self.parse_bp(0)?;
                self.expect(&TokenKind::Colon, "':'")?;
                let else_val = self.parse_bp(5)?;
                lhs = Expr::Ternary {
                    cond: Box::new(lhs),
                    then_val: Box::new(then_val),
                    else_val: Box::new(else_val),
                    line,
                };
                continue;
            }

            // Binary operators
            let (op, l_bp, r_bp) = match self.infix_bp() {
                Some(entry) => entry,
                None => break,
            };
            if l_bp < min_bp {
                break;
            }
            let line = self.cur.line;
            self.advance()?;

            // A pattern literal is only meaningful on the right of =~ / !~
            let rhs = match (&op, &self.cur.kind) {
                (BinOp::Match | BinOp::NotMatch, TokenKind::Regex { .. })
                | (BinOp::Match | BinOp::NotMatch, TokenKind::Subst { .. }) => {
                    self.parse_pattern_expr()?
                }
                _ => self.parse_bp(r_bp)?,
            };
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }

        Ok(lhs)
    }

    fn parse_pattern_expr(&mut self) -> Result<Expr, String> {
        let tok = self.advance()?;
        match tok.kind {
            TokenKind::Regex { pattern, flags } => Ok(Expr::Pattern { pattern, flags }),
            TokenKind::Subst {
                pattern,
                replacement,
                flags,
            } => Ok(Expr::SubstPattern {
                pattern,
                replacement,
                flags,
            }),
            _ => Err(self.err("expected pattern")),
        }
    }

    fn parse_prefix(&mut self) -> Result<Expr, String> {
        let line = self.cur.line;
        let op = match self.cur.kind {
            TokenKind::Bang | TokenKind::Kw(Kw::Not) => Some(UnOp::Not),
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Plus => Some(UnOp::Plus),
            TokenKind::Tilde => Some(UnOp::BitNot),
            TokenKind::PlusPlus => Some(UnOp::PreInc),
            TokenKind::MinusMinus => Some(UnOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.advance()?;
            let operand = self.parse_bp(PREFIX_BP)?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                line,
            });
        }

        if self.at(&TokenKind::Backslash) {
            return self.parse_ref();
        }
        if self.at(&TokenKind::Ellipsis) {
            self.advance()?;
            let operand = self.parse_bp(PREFIX_BP)?;
            return Ok(Expr::Spread {
                operand: Box::new(operand),
                line,
            });
        }

        self.parse_primary()
    }

    /// `\$v` `\@a` `\%h` `\&f` — the referent kind follows the operand sigil.
    fn parse_ref(&mut self) -> Result<Expr, String> {
        let line = self.cur.line;
        self.advance()?; // '\'

        if self.at(&TokenKind::Amp) {
            self.advance()?;
            let mut package = None;
            let mut name = self.expect_ident("function name")?;
            while self.at(&TokenKind::ColonColon) {
                self.advance()?;
                let seg = self.expect_ident("function name segment")?;
                match &mut package {
                    None => package = Some(name),
                    Some(pkg) => {
                        pkg.push_str("::");
                        pkg.push_str(&name);
                    }
                }
                name = seg;
            }
            return Ok(Expr::FuncRef {
                package,
                name,
                emitted: String::new(),
                line,
            });
        }

        let operand = self.parse_bp(PREFIX_BP)?;
        let kind = match &operand {
            Expr::Var {
                sigil: Sigil::Array,
                ..
            }
            | Expr::DerefToArray { .. } => RefKind::Array,
            Expr::Var {
                sigil: Sigil::Hash, ..
            }
            | Expr::DerefToHash { .. } => RefKind::Hash,
            _ => RefKind::Scalar,
        };
        Ok(Expr::Ref {
            kind,
            operand: Box::new(operand),
            line,
        })
    }

    // ------------------------------------------------------------------------
    // Postfix chains
    // ------------------------------------------------------------------------

    /// One postfix step. Returns the (possibly extended) expression and
    /// whether a step applied.
    fn try_parse_postfix(&mut self, lhs: Expr) -> Result<(Expr, bool), String> {
        let line = self.cur.line;

        match &self.cur.kind {
            TokenKind::PlusPlus => {
                self.advance()?;
                Ok((
                    Expr::Unary {
                        op: UnOp::PostInc,
                        operand: Box::new(lhs),
                        line,
                    },
                    true,
                ))
            }
            TokenKind::MinusMinus => {
                self.advance()?;
                Ok((
                    Expr::Unary {
                        op: UnOp::PostDec,
                        operand: Box::new(lhs),
                        line,
                    },
                    true,
                ))
            }
            TokenKind::LBracket => {
                // `@a[i]` element access; only sensible on array-ish bases
                if matches!(
                    lhs,
                    Expr::Var {
                        sigil: Sigil::Array,
                        ..
                    } | Expr::DerefToArray { .. }
                ) {
                    self.advance()?;
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    Ok((
                        Expr::Index {
                            base: Box::new(lhs),
                            index: Box::new(index),
                            line,
                        },
                        true,
                    ))
                } else {
                    Ok((lhs, false))
                }
            }
            TokenKind::LBrace => {
                // `%h{"k"}` element access; restricted so blocks still parse
                if matches!(
                    lhs,
                    Expr::Var {
                        sigil: Sigil::Hash,
                        ..
                    } | Expr::DerefToHash { .. }
                ) {
                    self.advance()?;
                    let key = self.parse_hash_key()?;
                    self.expect(&TokenKind::RBrace, "'}'")?;
                    Ok((
                        Expr::HashKey {
                            base: Box::new(lhs),
                            key: Box::new(key),
                            line,
                        },
                        true,
                    ))
                } else {
                    Ok((lhs, false))
                }
            }
            TokenKind::Arrow => {
                self.advance()?;
                let expr = self.parse_arrow_tail(lhs, line)?;
                Ok((expr, true))
            }
            TokenKind::Dot => {
                // `.field` member access; `.name(` stays string concatenation,
                // as does `. x` (the repeat operator's spelling)
                if let TokenKind::Ident(field) = self.next.kind.clone() {
                    if field != "x" {
                        self.advance()?; // '.'
                        self.advance()?; // ident
                        if self.at(&TokenKind::LParen) {
                            // Actually a concatenation with a call result
                            let args = self.parse_args()?;
                            let call = Expr::Call {
                                package: None,
                                name: field,
                                args,
                                emitted: String::new(),
                                line,
                            };
                            return Ok((
                                Expr::Binary {
                                    op: BinOp::Concat,
                                    lhs: Box::new(lhs),
                                    rhs: Box::new(call),
                                    line,
                                },
                                true,
                            ));
                        }
                        return Ok((
                            Expr::Member {
                                base: Box::new(lhs),
                                field,
                                line,
                            },
                            true,
                        ));
                    }
                }
                Ok((lhs, false))
            }
            _ => Ok((lhs, false)),
        }
    }

    /// `->` has four continuations: `[i]`, `{k}`, `(args)`, and an
    /// identifier (member access, or a method call when followed by `(`).
    fn parse_arrow_tail(&mut self, base: Expr, line: usize) -> Result<Expr, String> {
        match self.cur.kind.clone() {
            TokenKind::LBracket => {
                self.advance()?;
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Expr::ArrowIndex {
                    base: Box::new(base),
                    index: Box::new(index),
                    line,
                })
            }
            TokenKind::LBrace => {
                self.advance()?;
                let key = self.parse_hash_key()?;
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::ArrowKey {
                    base: Box::new(base),
                    key: Box::new(key),
                    line,
                })
            }
            TokenKind::LParen => {
                let args = self.parse_args()?;
                Ok(Expr::IndirectCall {
                    target: Box::new(base),
                    args,
                    line,
                })
            }
            TokenKind::Ident(name) => {
                self.advance()?;
                if self.at(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::MethodCall {
                        recv: Box::new(base),
                        method: name,
                        args,
                        line,
                    })
                } else {
                    Ok(Expr::Member {
                        base: Box::new(base),
                        field: name,
                        line,
                    })
                }
            }
            _ => Err(self.err(format!("expected '->' continuation, got {}", self.cur))),
        }
    }

    /// A hash key: bare identifiers autoquote (`$h->{key}`).
    fn parse_hash_key(&mut self) -> Result<Expr, String> {
        if let TokenKind::Ident(name) = self.cur.kind.clone() {
            if self.next.kind == TokenKind::RBrace {
                self.advance()?;
                return Ok(Expr::StrLit {
                    value: name,
                    interpolated: false,
                });
            }
        }
        self.parse_expr()
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, String> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            if self.at(&TokenKind::Eof) {
                return Err(self.err("unexpected end of file in argument list"));
            }
            args.push(self.parse_list_element()?);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(args)
    }

    /// A list element; bare regex literals are allowed (e.g. `split(/,/, $s)`).
    fn parse_list_element(&mut self) -> Result<Expr, String> {
        if matches!(
            self.cur.kind,
            TokenKind::Regex { .. } | TokenKind::Subst { .. }
        ) {
            return self.parse_pattern_expr();
        }
        self.parse_expr()
    }

    // ------------------------------------------------------------------------
    // Primary expressions
    // ------------------------------------------------------------------------

    fn parse_primary(&mut self) -> Result<Expr, String> {
        let line = self.cur.line;
        match self.cur.kind.clone() {
            TokenKind::Int(n) => {
                self.advance()?;
                Ok(Expr::IntLit(n))
            }
            TokenKind::Num(n) => {
                self.advance()?;
                Ok(Expr::NumLit(n))
            }
            TokenKind::Str {
                value,
                interpolated,
            } => {
                self.advance()?;
                Ok(Expr::StrLit {
                    value,
                    interpolated,
                })
            }
            TokenKind::Command(cmd) => {
                self.advance()?;
                Ok(Expr::Command(cmd))
            }
            TokenKind::Regex { .. } | TokenKind::Subst { .. } => self.parse_pattern_expr(),
            TokenKind::Words(words) => {
                self.advance()?;
                let elems = words
                    .into_iter()
                    .map(|w| Expr::StrLit {
                        value: w,
                        interpolated: false,
                    })
                    .collect();
                Ok(Expr::ArrayLit(elems))
            }
            TokenKind::Dollar => self.parse_dollar(),
            TokenKind::At => self.parse_at(),
            TokenKind::Percent => self.parse_percent(),
            TokenKind::Ident(name) => self.parse_name(name),
            TokenKind::Kw(Kw::Func) => self.parse_anon_func(),
            TokenKind::LParen => self.parse_paren_list(),
            TokenKind::LBracket => {
                self.advance()?;
                let mut elems = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    elems.push(self.parse_list_element()?);
                    if !self.eat(&TokenKind::Comma)? {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Expr::AnonArray(elems))
            }
            TokenKind::LBrace => {
                self.advance()?;
                let pairs = self.parse_hash_pairs(&TokenKind::RBrace)?;
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::AnonHash(pairs))
            }
            _ => Err(self.err(format!("expected expression, got {}", self.cur))),
        }
    }

    fn parse_dollar(&mut self) -> Result<Expr, String> {
        let line = self.cur.line;
        self.advance()?; // '$'
        match self.cur.kind.clone() {
            TokenKind::Ident(name) => {
                self.advance()?;
                Ok(Expr::Var {
                    sigil: Sigil::Scalar,
                    name,
                    line,
                })
            }
            // `$$r` scalar dereference
            TokenKind::Dollar => {
                let operand = self.parse_dollar()?;
                Ok(Expr::DerefScalar {
                    operand: Box::new(operand),
                    line,
                })
            }
            // `${ expr }` braced scalar dereference
            TokenKind::LBrace => {
                self.advance()?;
                let operand = self.parse_expr()?;
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::DerefScalar {
                    operand: Box::new(operand),
                    line,
                })
            }
            _ => Err(self.err(format!("expected variable name after '$', got {}", self.cur))),
        }
    }

    fn parse_at(&mut self) -> Result<Expr, String> {
        let line = self.cur.line;
        self.advance()?; // '@'
        match self.cur.kind.clone() {
            TokenKind::Ident(name) => {
                self.advance()?;
                Ok(Expr::Var {
                    sigil: Sigil::Array,
                    name,
                    line,
                })
            }
            TokenKind::LBrace => {
                self.advance()?;
                let operand = self.parse_expr()?;
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::DerefToArray {
                    operand: Box::new(operand),
                    line,
                })
            }
            _ => Err(self.err(format!("expected variable name after '@', got {}", self.cur))),
        }
    }

    fn parse_percent(&mut self) -> Result<Expr, String> {
        let line = self.cur.line;
        self.advance()?; // '%'
        match self.cur.kind.clone() {
            TokenKind::Ident(name) => {
                self.advance()?;
                Ok(Expr::Var {
                    sigil: Sigil::Hash,
                    name,
                    line,
                })
            }
            TokenKind::LBrace => {
                self.advance()?;
                let operand = self.parse_expr()?;
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::DerefToHash {
                    operand: Box::new(operand),
                    line,
                })
            }
            _ => Err(self.err(format!("expected variable name after '%', got {}", self.cur))),
        }
    }

    /// A bare name: package-qualified call, plain call, or an autoquoted
    /// hash-literal key (`name => ...`).
    fn parse_name(&mut self, name: String) -> Result<Expr, String> {
        let line = self.cur.line;
        self.advance()?;

        if self.at(&TokenKind::ColonColon) {
            let mut package = name;
            let mut last = {
                self.advance()?;
                self.expect_ident("name after '::'")?
            };
            while self.at(&TokenKind::ColonColon) {
                self.advance()?;
                let seg = self.expect_ident("name after '::'")?;
                package.push_str("::");
                package.push_str(&last);
                last = seg;
            }
            let args = self.parse_args()?;
            return Ok(Expr::Call {
                package: Some(package),
                name: last,
                args,
                emitted: String::new(),
                line,
            });
        }

        if self.at(&TokenKind::LParen) {
            let args = self.parse_args()?;
            if name == "clone" && args.len() == 1 {
                let operand = args.into_iter().next().unwrap();
                return Ok(Expr::Clone {
                    operand: Box::new(operand),
                    line,
                });
            }
            return Ok(Expr::Call {
                package: None,
                name,
                args,
                emitted: String::new(),
                line,
            });
        }

        if self.at(&TokenKind::FatArrow) {
            return Ok(Expr::StrLit {
                value: name,
                interpolated: false,
            });
        }

        Err(self.err(format!("unexpected bare identifier '{}'", name)))
    }

    fn parse_anon_func(&mut self) -> Result<Expr, String> {
        let line = self.cur.line;
        self.advance()?; // 'func'
        self.expect(&TokenKind::LParen, "'('")?;
        let params = self.parse_params()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let ret = self.parse_type()?;
        let body = self.parse_block()?;
        Ok(Expr::AnonFunc {
            params,
            ret,
            body,
            line,
        })
    }

    /// `( ... )`: grouping, an array literal, or a hash literal (`=>`).
    fn parse_paren_list(&mut self) -> Result<Expr, String> {
        self.advance()?; // '('

        if self.at(&TokenKind::RParen) {
            self.advance()?;
            return Ok(Expr::ArrayLit(Vec::new()));
        }

        // `ident =>` opens a hash literal with an autoquoted key
        let first = if matches!(self.cur.kind, TokenKind::Ident(_))
            && self.next.kind == TokenKind::FatArrow
        {
            let key = self.expect_ident("hash key")?;
            Expr::StrLit {
                value: key,
                interpolated: false,
            }
        } else {
            self.parse_list_element()?
        };

        if self.at(&TokenKind::FatArrow) {
            self.advance()?;
            let value = self.parse_list_element()?;
            let mut pairs = vec![(first, value)];
            if self.eat(&TokenKind::Comma)? {
                pairs.extend(self.parse_hash_pairs(&TokenKind::RParen)?);
            }
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Expr::HashLit(pairs));
        }

        if self.at(&TokenKind::Comma) {
            let mut elems = vec![first];
            while self.eat(&TokenKind::Comma)? {
                if self.at(&TokenKind::RParen) {
                    break;
                }
                elems.push(self.parse_list_element()?);
            }
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Expr::ArrayLit(elems));
        }

        self.expect(&TokenKind::RParen, "')'")?;
        Ok(first)
    }

    fn parse_hash_pairs(&mut self, terminator: &TokenKind) -> Result<Vec<(Expr, Expr)>, String> {
        let mut pairs = Vec::new();
        while !self.at(terminator) {
            if self.at(&TokenKind::Eof) {
                return Err(self.err("unexpected end of file in hash literal"));
            }
            let key = if matches!(self.cur.kind, TokenKind::Ident(_))
                && self.next.kind == TokenKind::FatArrow
            {
                let name = self.expect_ident("hash key")?;
                Expr::StrLit {
                    value: name,
                    interpolated: false,
                }
            } else {
                self.parse_expr()?
            };
            self.expect(&TokenKind::FatArrow, "'=>'")?;
            let value = self.parse_list_element()?;
            pairs.push((key, value));
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        Parser::parse(src).expect("parses")
    }

    fn parse_one_expr(src: &str) -> Expr {
        let program = parse(&format!("my int $r = {};", src));
        match &program.top_stmts[0] {
            Stmt::VarDecl { init: Some(e), .. } => e.clone(),
            other => panic!("expected var decl, got {:?}", other),
        }
    }

    #[test]
    fn test_function_definition() {
        let program = parse("func add(int $a, int $b) int { return $a + $b; }");
        assert_eq!(program.functions.len(), 1);
        let f = &program.functions[0];
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.ret, Type::Int);
        assert!(f.body.is_some());
    }

    #[test]
    fn test_package_context_recorded() {
        let program = parse("package M::N; func f(int $x) int { return $x; }");
        assert_eq!(program.functions[0].package.as_deref(), Some("M::N"));
    }

    #[test]
    fn test_package_main_resets_context() {
        let program =
            parse("package M; func f() void { } package main; func g() void { }");
        assert_eq!(program.functions[0].package.as_deref(), Some("M"));
        assert_eq!(program.functions[1].package, None);
    }

    #[test]
    fn test_package_qualified_call() {
        let e = parse_one_expr("M::N::f(21)");
        match e {
            Expr::Call { package, name, args, .. } => {
                assert_eq!(package.as_deref(), Some("M::N"));
                assert_eq!(name, "f");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let e = parse_one_expr("1 + 2 * 3");
        match e {
            Expr::Binary { op: BinOp::Add, rhs, .. } => match *rhs {
                Expr::Binary { op: BinOp::Mul, .. } => {}
                other => panic!("expected mul on the right, got {:?}", other),
            },
            other => panic!("expected add at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_power_right_assoc() {
        let e = parse_one_expr("2 ** 3 ** 2");
        match e {
            Expr::Binary { op: BinOp::Pow, lhs, rhs, .. } => {
                assert_eq!(*lhs, Expr::IntLit(2));
                assert!(matches!(*rhs, Expr::Binary { op: BinOp::Pow, .. }));
            }
            other => panic!("expected pow, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_right_assoc() {
        let program = parse("func f() void { $a = $b = 1; }");
        let body = program.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::Expr { expr: Expr::Assign { value, .. }, .. } => {
                assert!(matches!(**value, Expr::Assign { .. }));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_ternary() {
        let e = parse_one_expr("$a > 1 ? 2 : 3");
        assert!(matches!(e, Expr::Ternary { .. }));
    }

    #[test]
    fn test_struct_registry_as_type_cue() {
        let program = parse("struct P { str name; int age; } func f() void { my P $p; }");
        assert_eq!(program.structs[0].fields.len(), 2);
        let body = program.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::VarDecl { ty: Type::Struct(name), .. } => assert_eq!(name, "P"),
            other => panic!("expected struct decl, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_function_pointer_field() {
        let program = parse("struct Ops { func(int, int) int apply; }");
        match &program.structs[0].fields[0].ty {
            Type::Func { ret, params } => {
                assert_eq!(**ret, Type::Int);
                assert_eq!(params.len(), 2);
            }
            other => panic!("expected func field, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_and_variadic_params() {
        let program = parse("func f(int $a, int $b = 5, scalar ...$rest) void { }");
        let f = &program.functions[0];
        assert!(f.params[1].default.is_some());
        assert!(f.params[2].variadic);
    }

    #[test]
    fn test_unless_desugars_to_negated_if() {
        let program = parse("func f() void { unless ($a) { return; } }");
        let body = program.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::If { cond, .. } => {
                assert!(matches!(cond, Expr::Unary { op: UnOp::Not, .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_elsif_chain_nests() {
        let program =
            parse("func f() void { if ($a) { } elsif ($b) { } else { } }");
        let body = program.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::If { else_block: Some(chain), .. } => {
                assert!(matches!(chain[0], Stmt::If { .. }));
            }
            other => panic!("expected if with elsif chain, got {:?}", other),
        }
    }

    #[test]
    fn test_labeled_loop_attachment() {
        let program = parse("func f() void { OUTER: while ($a) { last OUTER; } }");
        let body = program.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::While { label: Some(l), body, .. } => {
                assert_eq!(l, "OUTER");
                assert!(matches!(&body[0], Stmt::Last { label: Some(t), .. } if t == "OUTER"));
            }
            other => panic!("expected labeled while, got {:?}", other),
        }
    }

    #[test]
    fn test_standalone_label_and_goto() {
        let program = parse("func f() void { again: $a++; goto again; }");
        let body = program.functions[0].body.as_ref().unwrap();
        assert!(matches!(&body[0], Stmt::Label { name, .. } if name == "again"));
        assert!(matches!(&body[2], Stmt::Goto { label, .. } if label == "again"));
    }

    #[test]
    fn test_foreach() {
        let program = parse("func f() void { foreach my int $i (@xs) { say($i); } }");
        let body = program.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::Foreach { ty, var, .. } => {
                assert_eq!(*ty, Type::Int);
                assert_eq!(var, "i");
            }
            other => panic!("expected foreach, got {:?}", other),
        }
    }

    #[test]
    fn test_try_catch_throw() {
        let program =
            parse("func f() void { try { throw \"bad\"; } catch ($e) { say($e); } }");
        let body = program.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::Try { catch_var, body, .. } => {
                assert_eq!(catch_var, "e");
                assert!(matches!(body[0], Stmt::Throw { .. }));
            }
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn test_match_bind_with_regex() {
        let e = parse_one_expr("$s =~ /a+b/i");
        match e {
            Expr::Binary { op: BinOp::Match, rhs, .. } => match *rhs {
                Expr::Pattern { pattern, flags } => {
                    assert_eq!(pattern, "a+b");
                    assert_eq!(flags, "i");
                }
                other => panic!("expected pattern, got {:?}", other),
            },
            other => panic!("expected match bind, got {:?}", other),
        }
    }

    #[test]
    fn test_ref_kinds_follow_sigil() {
        assert!(matches!(
            parse_one_expr("\\@xs"),
            Expr::Ref { kind: RefKind::Array, .. }
        ));
        assert!(matches!(
            parse_one_expr("\\%h"),
            Expr::Ref { kind: RefKind::Hash, .. }
        ));
        assert!(matches!(
            parse_one_expr("\\$v"),
            Expr::Ref { kind: RefKind::Scalar, .. }
        ));
        assert!(matches!(parse_one_expr("\\&f"), Expr::FuncRef { .. }));
    }

    #[test]
    fn test_deref_forms() {
        assert!(matches!(parse_one_expr("$$r"), Expr::DerefScalar { .. }));
        assert!(matches!(parse_one_expr("@{$r}"), Expr::DerefToArray { .. }));
        assert!(matches!(parse_one_expr("%{$r}"), Expr::DerefToHash { .. }));
        assert!(matches!(parse_one_expr("$r->[0]"), Expr::ArrowIndex { .. }));
        assert!(matches!(
            parse_one_expr("$r->{k}"),
            Expr::ArrowKey { .. }
        ));
    }

    #[test]
    fn test_subscripts() {
        assert!(matches!(parse_one_expr("@a[3]"), Expr::Index { .. }));
        assert!(matches!(parse_one_expr("%h{\"k\"}"), Expr::HashKey { .. }));
    }

    #[test]
    fn test_method_call_vs_member() {
        assert!(matches!(
            parse_one_expr("$obj->area(2)"),
            Expr::MethodCall { .. }
        ));
        assert!(matches!(parse_one_expr("$p->name"), Expr::Member { .. }));
        assert!(matches!(parse_one_expr("$f->(1, 2)"), Expr::IndirectCall { .. }));
    }

    #[test]
    fn test_dot_member_vs_concat() {
        assert!(matches!(parse_one_expr("$p.name"), Expr::Member { .. }));
        match parse_one_expr("$a . uc($b)") {
            Expr::Binary { op: BinOp::Concat, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Call { .. }));
            }
            other => panic!("expected concat, got {:?}", other),
        }
        assert!(matches!(
            parse_one_expr("$a . $b"),
            Expr::Binary { op: BinOp::Concat, .. }
        ));
    }

    #[test]
    fn test_repeat_operator() {
        assert!(matches!(
            parse_one_expr("\"ab\" x 3"),
            Expr::Binary { op: BinOp::Repeat, .. }
        ));
    }

    #[test]
    fn test_list_and_hash_literals() {
        assert!(matches!(parse_one_expr("(1, 2, 3)"), Expr::ArrayLit(v) if v.len() == 3));
        match parse_one_expr("(a => 1, \"b\" => 2)") {
            Expr::HashLit(pairs) => assert_eq!(pairs.len(), 2),
            other => panic!("expected hash literal, got {:?}", other),
        }
        assert!(matches!(parse_one_expr("[1, 2]"), Expr::AnonArray(v) if v.len() == 2));
        assert!(matches!(parse_one_expr("{x => 1}"), Expr::AnonHash(p) if p.len() == 1));
    }

    #[test]
    fn test_anon_func() {
        let e = parse_one_expr("func (int $x) int { return $x * 2; }");
        match e {
            Expr::AnonFunc { params, ret, body, .. } => {
                assert_eq!(params.len(), 1);
                assert_eq!(ret, Type::Int);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected anon func, got {:?}", other),
        }
    }

    #[test]
    fn test_spread_argument() {
        let program = parse("func f() void { g(1, ...@rest); }");
        let body = program.functions[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::Expr { expr: Expr::Call { args, .. }, .. } => {
                assert!(matches!(args[1], Expr::Spread { .. }));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_use_and_lib_and_version() {
        let program = parse("version 2; use Foo::Bar qw(f g); use lib \"vendor\"; import_lib \"crypto\";");
        assert_eq!(program.version.as_deref(), Some("2"));
        assert_eq!(program.uses[0].package, "Foo::Bar");
        assert_eq!(program.uses[0].imports, vec!["f", "g"]);
        assert_eq!(program.lib_paths, vec!["vendor"]);
        assert_eq!(program.shim_libs, vec!["crypto"]);
    }

    #[test]
    fn test_extern_function() {
        let program = parse("extern func getpid() int;");
        assert!(program.functions[0].body.is_none());
    }

    #[test]
    fn test_capacity_declaration() {
        let program = parse("my array @xs[16];");
        match &program.top_stmts[0] {
            Stmt::VarDecl { capacity: Some(_), init: None, .. } => {}
            other => panic!("expected capacity decl, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_token_reports_line() {
        let err = Parser::parse("func f( int ) void { }").unwrap_err();
        assert!(err.contains("parse error"), "{}", err);
        assert!(err.contains("1:"), "{}", err);
    }

    #[test]
    fn test_clone_node() {
        assert!(matches!(parse_one_expr("clone(%h)"), Expr::Clone { .. }));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let src = "struct P { str name; } \
                   func main() int { my P $p; $p->name = \"A\"; \
                   foreach my int $i (1..3) { say($i); } return 0; }";
        assert_eq!(parse(src), parse(src));
    }

    #[test]
    fn test_inherit_statement() {
        let program = parse("package Shape; inherit \"Base\";");
        match &program.top_stmts[0] {
            Stmt::Inherit { parent, package, .. } => {
                assert_eq!(parent, "Base");
                assert_eq!(package.as_deref(), Some("Shape"));
            }
            other => panic!("expected inherit, got {:?}", other),
        }
    }
}
