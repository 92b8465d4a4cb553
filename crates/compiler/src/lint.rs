//! Warning pass (`-w`)
//!
//! Walks each function body tracking `my` declarations per lexical block
//! and reports variables that are never read. Warnings go to stderr and do
//! not affect the exit status.
//!
//! Rules can be tuned with a small TOML file (`--warn-config`):
//!
//! ```toml
//! [[warn]]
//! id = "unused-variable"
//! severity = "warning"
//! enabled = false
//! ```

use crate::ast::{AssignOp, Expr, Program, Stmt};
use crate::types::Sigil;
use serde::Deserialize;

pub const UNUSED_VARIABLE: &str = "unused-variable";

/// Severity level for warning diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Hint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarnRule {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_enabled() -> bool {
    true
}

fn default_severity() -> Severity {
    Severity::Warning
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarnConfig {
    #[serde(rename = "warn", default)]
    pub rules: Vec<WarnRule>,
}

impl WarnConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("failed to parse warning config: {}", e))
    }

    /// All rules enabled at their default severity.
    pub fn default_config() -> Self {
        WarnConfig {
            rules: vec![WarnRule {
                id: UNUSED_VARIABLE.to_string(),
                enabled: true,
                severity: Severity::Warning,
            }],
        }
    }

    /// User rules override defaults with the same id.
    pub fn merge(&mut self, other: WarnConfig) {
        for rule in other.rules {
            if let Some(existing) = self.rules.iter_mut().find(|r| r.id == rule.id) {
                *existing = rule;
            } else {
                self.rules.push(rule);
            }
        }
    }

    fn rule(&self, id: &str) -> Option<&WarnRule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

impl Default for WarnConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LintDiagnostic {
    pub line: usize,
    pub id: String,
    pub severity: Severity,
    pub message: String,
}

pub fn format_diagnostics(diagnostics: &[LintDiagnostic]) -> String {
    let mut out = String::new();
    for d in diagnostics {
        let kind = match d.severity {
            Severity::Warning => "warning",
            Severity::Hint => "hint",
        };
        // Line-granular positions; post-parse diagnostics use column 1
        out.push_str(&format!("{}:1: {}: {}\n", d.line, kind, d.message));
    }
    out
}

pub struct Linter<'a> {
    config: &'a WarnConfig,
    diagnostics: Vec<LintDiagnostic>,
    /// Per-block declared variables: (sigil, name, decl line, was read)
    scopes: Vec<Vec<(Sigil, String, usize, bool)>>,
}

impl<'a> Linter<'a> {
    pub fn new(config: &'a WarnConfig) -> Self {
        Linter {
            config,
            diagnostics: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub fn lint_program(mut self, program: &Program) -> Vec<LintDiagnostic> {
        for f in &program.functions {
            if let Some(body) = &f.body {
                self.lint_block(body);
            }
        }
        self.lint_block(&program.top_stmts);
        self.diagnostics.sort_by_key(|d| d.line);
        self.diagnostics
    }

    fn lint_block(&mut self, block: &[Stmt]) {
        self.scopes.push(Vec::new());
        for stmt in block {
            self.lint_stmt(stmt);
        }
        self.pop_scope();
    }

    fn pop_scope(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        let Some(rule) = self.config.rule(UNUSED_VARIABLE) else {
            return;
        };
        if !rule.enabled {
            return;
        }
        for (sigil, name, line, read) in scope {
            if !read {
                self.diagnostics.push(LintDiagnostic {
                    line,
                    id: UNUSED_VARIABLE.to_string(),
                    severity: rule.severity,
                    message: format!("unused variable '{}{}'", sigil, name),
                });
            }
        }
    }

    fn declare(&mut self, sigil: Sigil, name: &str, line: usize) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((sigil, name.to_string(), line, false));
        }
    }

    fn mark_read(&mut self, sigil: Sigil, name: &str) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(entry) = scope
                .iter_mut()
                .rev()
                .find(|(s, n, _, _)| *s == sigil && n == name)
            {
                entry.3 = true;
                return;
            }
        }
    }

    fn lint_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl {
                sigil,
                name,
                init,
                capacity,
                line,
                ..
            } => {
                if let Some(cap) = capacity {
                    self.lint_expr(cap);
                }
                if let Some(init) = init {
                    self.lint_expr(init);
                }
                self.declare(*sigil, name, *line);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.lint_expr(cond);
                self.lint_block(then_block);
                if let Some(else_block) = else_block {
                    self.lint_block(else_block);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.lint_expr(cond);
                self.lint_block(body);
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
                ..
            } => {
                self.scopes.push(Vec::new());
                if let Some(init) = init {
                    self.lint_stmt(init);
                }
                if let Some(cond) = cond {
                    self.lint_expr(cond);
                }
                if let Some(update) = update {
                    self.lint_expr(update);
                }
                self.lint_block(body);
                self.pop_scope();
            }
            Stmt::Foreach {
                var,
                iterable,
                body,
                line,
                ..
            } => {
                self.lint_expr(iterable);
                self.scopes.push(Vec::new());
                self.declare(Sigil::Scalar, var, *line);
                // The loop variable is bound by the iteration itself; an
                // unread one is still worth a warning, so no special case.
                self.lint_block(body);
                self.pop_scope();
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.lint_expr(value);
                }
            }
            Stmt::Try {
                body, catch_body, ..
            } => {
                self.lint_block(body);
                // The catch variable is part of the construct, never warned
                self.lint_block(catch_body);
            }
            Stmt::Throw { value, .. } => self.lint_expr(value),
            Stmt::Expr { expr, .. } => self.lint_expr(expr),
            Stmt::Last { .. }
            | Stmt::Next { .. }
            | Stmt::Goto { .. }
            | Stmt::Label { .. }
            | Stmt::Inherit { .. } => {}
        }
    }

    fn lint_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Var { sigil, name, .. } => self.mark_read(*sigil, name),
            Expr::Binary { lhs, rhs, .. } => {
                self.lint_expr(lhs);
                self.lint_expr(rhs);
            }
            Expr::Unary { operand, .. } => self.lint_expr(operand),
            Expr::Assign {
                op, target, value, ..
            } => {
                // A plain `=` to a bare variable is a write, not a read.
                // Compound assignments and element writes read the target.
                match (op, target.as_ref()) {
                    (AssignOp::Assign, Expr::Var { .. }) => {}
                    _ => self.lint_expr(target),
                }
                self.lint_expr(value);
            }
            Expr::Ternary {
                cond,
                then_val,
                else_val,
                ..
            } => {
                self.lint_expr(cond);
                self.lint_expr(then_val);
                self.lint_expr(else_val);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| self.lint_expr(a)),
            Expr::IndirectCall { target, args, .. } => {
                self.lint_expr(target);
                args.iter().for_each(|a| self.lint_expr(a));
            }
            Expr::MethodCall { recv, args, .. } => {
                self.lint_expr(recv);
                args.iter().for_each(|a| self.lint_expr(a));
            }
            Expr::Index { base, index, .. } => {
                self.lint_expr(base);
                self.lint_expr(index);
            }
            Expr::HashKey { base, key, .. } => {
                self.lint_expr(base);
                self.lint_expr(key);
            }
            Expr::ArrowIndex { base, index, .. } => {
                self.lint_expr(base);
                self.lint_expr(index);
            }
            Expr::ArrowKey { base, key, .. } => {
                self.lint_expr(base);
                self.lint_expr(key);
            }
            Expr::Member { base, .. } => self.lint_expr(base),
            Expr::Ref { operand, .. } => self.lint_expr(operand),
            Expr::DerefScalar { operand, .. }
            | Expr::DerefToArray { operand, .. }
            | Expr::DerefToHash { operand, .. } => self.lint_expr(operand),
            Expr::ArrayLit(elems) | Expr::AnonArray(elems) => {
                elems.iter().for_each(|e| self.lint_expr(e))
            }
            Expr::HashLit(pairs) | Expr::AnonHash(pairs) => pairs.iter().for_each(|(k, v)| {
                self.lint_expr(k);
                self.lint_expr(v);
            }),
            Expr::AnonFunc { body, .. } => self.lint_block(body),
            Expr::Clone { operand, .. } => self.lint_expr(operand),
            Expr::Spread { operand, .. } => self.lint_expr(operand),
            Expr::IntLit(_)
            | Expr::NumLit(_)
            | Expr::StrLit { .. }
            | Expr::Command(_)
            | Expr::Pattern { .. }
            | Expr::SubstPattern { .. }
            | Expr::FuncRef { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn lint(src: &str) -> Vec<LintDiagnostic> {
        let program = Parser::parse(src).expect("parses");
        let config = WarnConfig::default_config();
        Linter::new(&config).lint_program(&program)
    }

    #[test]
    fn test_unused_variable_warns_once() {
        let diags = lint("func f() void { my int $dead = 1; }");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].id, UNUSED_VARIABLE);
        assert!(diags[0].message.contains("$dead"));
    }

    #[test]
    fn test_read_variable_is_quiet() {
        let diags = lint("func f() int { my int $x = 1; return $x; }");
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_write_only_variable_warns() {
        let diags = lint("func f() void { my int $x = 1; $x = 2; }");
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_compound_assign_counts_as_read() {
        let diags = lint("func f() void { my int $x = 1; $x += 2; }");
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_inner_scope_usage_counts() {
        let diags =
            lint("func f(int $c) void { my int $x = 1; if ($c) { say($x); } }");
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_config_can_disable() {
        let program =
            Parser::parse("func f() void { my int $dead = 1; }").expect("parses");
        let mut config = WarnConfig::default_config();
        config.merge(
            WarnConfig::from_toml(
                "[[warn]]\nid = \"unused-variable\"\nenabled = false\n",
            )
            .expect("parses config"),
        );
        let diags = Linter::new(&config).lint_program(&program);
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_format_diagnostics() {
        let diags = lint("func f() void { my int $dead = 1; }");
        let text = format_diagnostics(&diags);
        assert!(text.contains("warning: unused variable '$dead'"), "{}", text);
    }
}
