//! Semantic analysis
//!
//! Runs after parsing and before code generation, in one walk over the
//! program:
//!
//! 1. every function gets its flat emitted name (`Pkg_name`, `::` → `_`) and
//!    its `min_args` arity floor;
//! 2. struct field offsets are computed with natural alignment and frozen;
//! 3. every call site is resolved to a flat callee (local package first,
//!    then imports, then globals, then builtins) and arity-checked;
//! 4. variable references are checked against the lexical scope: the sigil
//!    and declared type category must agree, undeclared names are fatal;
//! 5. `goto`/`last`/`next` label targets are validated per function.
//!
//! The pass annotates nodes in place (emitted names, offsets, `min_args`)
//! and never changes the shape of the tree.

use crate::ast::{Expr, FunctionDef, Program, Stmt};
use crate::interp;
use crate::types::{align_up, Sigil, Type};
use std::collections::{HashMap, HashSet};

/// Builtin arities: (name, min_args, max_args). `None` means variadic.
/// IMPORTANT: keep in sync with the runtime symbol table in codegen.
pub const BUILTINS: &[(&str, usize, Option<usize>)] = &[
    ("say", 0, None),
    ("print", 0, None),
    ("warn", 1, None),
    ("push", 2, None),
    ("pop", 1, Some(1)),
    ("shift", 1, Some(1)),
    ("unshift", 2, None),
    ("size", 1, Some(1)),
    ("keys", 1, Some(1)),
    ("values", 1, Some(1)),
    ("exists", 2, Some(2)),
    ("delete", 2, Some(2)),
    ("join", 2, Some(2)),
    ("split", 2, Some(3)),
    ("sprintf", 1, None),
    ("captures", 0, Some(1)),
    ("bless", 2, Some(2)),
    ("isa", 2, Some(2)),
    ("can", 2, Some(2)),
    ("slurp", 1, Some(1)),
    ("spew", 2, Some(2)),
    ("chomp", 1, Some(1)),
    ("lc", 1, Some(1)),
    ("uc", 1, Some(1)),
    ("length", 1, Some(1)),
    ("substr", 2, Some(3)),
    ("index", 2, Some(3)),
    ("defined", 1, Some(1)),
    ("undef", 0, Some(0)),
    ("exit", 0, Some(1)),
    ("system", 1, Some(1)),
    ("sort", 1, Some(1)),
    ("reverse", 1, Some(1)),
    ("abs", 1, Some(1)),
    ("int", 1, Some(1)),
    ("num", 1, Some(1)),
    ("str", 1, Some(1)),
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.iter().any(|(n, _, _)| *n == name)
}

/// Flatten a package path: `A::B` → `A_B`.
pub fn flat_package(pkg: &str) -> String {
    pkg.replace("::", "_")
}

/// The flat emitted name for a function. The unpackaged `main` becomes
/// `strada_main`; the C `main` symbol belongs to the generated wrapper.
pub fn emitted_name(package: Option<&str>, name: &str) -> String {
    match package {
        Some(pkg) => format!("{}_{}", flat_package(pkg), name),
        None if name == "main" => "strada_main".to_string(),
        None => name.to_string(),
    }
}

#[derive(Debug, Clone)]
struct FnSig {
    min_args: usize,
    param_count: usize,
    variadic: bool,
}

pub struct Analyzer {
    /// Flat emitted name → signature, for arity checks
    functions: HashMap<String, FnSig>,
    /// Package → set of locally declared names
    package_fns: HashMap<String, HashSet<String>>,
    /// Unprefixed globals
    global_fns: HashSet<String>,
    /// Packages brought in with `use`
    used_packages: HashSet<String>,
    /// Unqualified names imported via `use Pkg qw(...)` → source package
    imports: HashMap<String, String>,
    /// Struct name → (field name → type)
    struct_fields: HashMap<String, HashMap<String, Type>>,
    /// Lexical scopes: (sigil, name) → declared type
    scopes: Vec<HashMap<(Sigil, String), Type>>,
    /// Labels of lexically enclosing loops
    loop_labels: Vec<Option<String>>,
    /// Loop nesting depth, for bare last/next
    loop_depth: usize,
    /// Package of the function being walked
    current_package: Option<String>,
    /// Line of the statement being walked, for diagnostics on nodes that
    /// carry no position of their own (string interpolation)
    current_line: usize,
}

// The AST carries line positions only; post-parse diagnostics use column 1.
fn err(line: usize, msg: impl std::fmt::Display) -> String {
    format!("{}:1: semantic error: {}", line, msg)
}

impl Analyzer {
    pub fn new() -> Self {
        Analyzer {
            functions: HashMap::new(),
            package_fns: HashMap::new(),
            global_fns: HashSet::new(),
            used_packages: HashSet::new(),
            imports: HashMap::new(),
            struct_fields: HashMap::new(),
            scopes: Vec::new(),
            loop_labels: Vec::new(),
            loop_depth: 0,
            current_package: None,
            current_line: 0,
        }
    }

    /// Annotate and check the whole program.
    pub fn analyze(program: &mut Program) -> Result<(), String> {
        let mut analyzer = Analyzer::new();
        analyzer.collect_uses(program);
        analyzer.layout_structs(program)?;
        analyzer.register_functions(program)?;

        let mut functions = std::mem::take(&mut program.functions);
        for f in &mut functions {
            analyzer.check_function(f)?;
        }
        program.functions = functions;

        // Top-level free statements run in the main wrapper, outside any
        // package, with a fresh scope.
        analyzer.current_package = None;
        analyzer.scopes.push(HashMap::new());
        let mut top = std::mem::take(&mut program.top_stmts);
        let declared_labels = collect_labels(&top);
        for stmt in &mut top {
            analyzer.check_stmt(stmt, &declared_labels)?;
        }
        program.top_stmts = top;
        analyzer.scopes.pop();

        tracing::debug!(
            functions = program.functions.len(),
            structs = program.structs.len(),
            "semantic analysis complete"
        );
        Ok(())
    }

    fn collect_uses(&mut self, program: &Program) {
        for use_decl in &program.uses {
            self.used_packages.insert(use_decl.package.clone());
            for name in &use_decl.imports {
                self.imports
                    .insert(name.clone(), use_decl.package.clone());
            }
        }
    }

    // ========================================================================
    // Struct layout
    // ========================================================================

    fn layout_structs(&mut self, program: &mut Program) -> Result<(), String> {
        for def in &mut program.structs {
            if self.struct_fields.contains_key(&def.name) {
                return Err(err(def.line, format!("duplicate struct '{}'", def.name)));
            }

            let mut offset = 0usize;
            let mut max_align = 1usize;
            let mut fields = HashMap::new();
            for field in &mut def.fields {
                if field.ty == Type::Void {
                    return Err(err(
                        field.line,
                        format!("field '{}' has no storable type", field.name),
                    ));
                }
                if fields.contains_key(&field.name) {
                    return Err(err(
                        field.line,
                        format!("duplicate field '{}' in struct '{}'", field.name, def.name),
                    ));
                }
                let align = field.ty.align();
                max_align = max_align.max(align);
                offset = align_up(offset, align);
                field.offset = offset;
                offset += field.ty.size();
                fields.insert(field.name.clone(), field.ty.clone());
            }
            def.total_size = align_up(offset, max_align);
            self.struct_fields.insert(def.name.clone(), fields);
        }
        Ok(())
    }

    // ========================================================================
    // Function registration
    // ========================================================================

    fn register_functions(&mut self, program: &mut Program) -> Result<(), String> {
        for f in &mut program.functions {
            f.emitted_name = emitted_name(f.package.as_deref(), &f.name);
            f.min_args = compute_min_args(f)?;

            if self.functions.contains_key(&f.emitted_name) {
                return Err(err(
                    f.line,
                    match &f.package {
                        Some(pkg) => {
                            format!("duplicate function '{}' in package '{}'", f.name, pkg)
                        }
                        None => format!("duplicate function '{}'", f.name),
                    },
                ));
            }
            self.functions.insert(
                f.emitted_name.clone(),
                FnSig {
                    min_args: f.min_args,
                    param_count: f.params.len(),
                    variadic: f.is_variadic(),
                },
            );
            match &f.package {
                Some(pkg) => {
                    self.package_fns
                        .entry(pkg.clone())
                        .or_default()
                        .insert(f.name.clone());
                }
                None => {
                    self.global_fns.insert(f.name.clone());
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Function bodies
    // ========================================================================

    fn check_function(&mut self, f: &mut FunctionDef) -> Result<(), String> {
        self.current_package = f.package.clone();
        self.scopes.push(HashMap::new());

        for param in &f.params {
            if param.ty.sigil() != param.sigil {
                return Err(err(
                    param.line,
                    format!(
                        "type/sigil mismatch: parameter '{}{}' declared as {}",
                        param.sigil, param.name, param.ty
                    ),
                ));
            }
            // A variadic tail arrives as an array regardless of element type
            let ty = if param.variadic {
                Type::Array
            } else {
                param.ty.clone()
            };
            let sigil = if param.variadic {
                Sigil::Array
            } else {
                param.sigil
            };
            self.declare(sigil, &param.name, ty);
        }

        if let Some(body) = &mut f.body {
            let declared_labels = collect_labels(body);
            for stmt in body.iter_mut() {
                self.check_stmt(stmt, &declared_labels)?;
            }
        }

        self.scopes.pop();
        Ok(())
    }

    fn declare(&mut self, sigil: Sigil, name: &str, ty: Type) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert((sigil, name.to_string()), ty);
        }
    }

    fn lookup(&self, sigil: Sigil, name: &str) -> Option<&Type> {
        let key = (sigil, name.to_string());
        self.scopes.iter().rev().find_map(|scope| scope.get(&key))
    }

    fn check_block(&mut self, block: &mut [Stmt], labels: &HashSet<String>) -> Result<(), String> {
        self.scopes.push(HashMap::new());
        let result = block
            .iter_mut()
            .try_for_each(|stmt| self.check_stmt(stmt, labels));
        self.scopes.pop();
        result
    }

    fn check_loop_body(
        &mut self,
        body: &mut [Stmt],
        label: &Option<String>,
        labels: &HashSet<String>,
    ) -> Result<(), String> {
        self.loop_labels.push(label.clone());
        self.loop_depth += 1;
        let result = self.check_block(body, labels);
        self.loop_depth -= 1;
        self.loop_labels.pop();
        result
    }

    fn check_stmt(&mut self, stmt: &mut Stmt, labels: &HashSet<String>) -> Result<(), String> {
        if let Some(line) = stmt_line(stmt) {
            self.current_line = line;
        }
        match stmt {
            Stmt::VarDecl {
                ty,
                sigil,
                name,
                init,
                capacity,
                line,
            } => {
                if ty.sigil() != *sigil {
                    return Err(err(
                        *line,
                        format!(
                            "type/sigil mismatch: '{}{}' declared as {}",
                            sigil, name, ty
                        ),
                    ));
                }
                if let Some(cap) = capacity {
                    self.check_expr(cap)?;
                }
                if let Some(init) = init {
                    self.check_expr(init)?;
                }
                self.declare(*sigil, name, ty.clone());
                Ok(())
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.check_expr(cond)?;
                self.check_block(then_block, labels)?;
                if let Some(else_block) = else_block {
                    self.check_block(else_block, labels)?;
                }
                Ok(())
            }
            Stmt::While {
                cond, body, label, ..
            } => {
                self.check_expr(cond)?;
                self.check_loop_body(body, label, labels)
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
                label,
                ..
            } => {
                // The init declaration scopes over cond, update and body
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.check_stmt(init, labels)?;
                }
                if let Some(cond) = cond {
                    self.check_expr(cond)?;
                }
                if let Some(update) = update {
                    self.check_expr(update)?;
                }
                let result = self.check_loop_body(body, label, labels);
                self.scopes.pop();
                result
            }
            Stmt::Foreach {
                ty,
                var,
                iterable,
                body,
                label,
                line,
            } => {
                if ty.sigil() != Sigil::Scalar {
                    return Err(err(
                        *line,
                        format!("type/sigil mismatch: foreach variable '${}' declared as {}", var, ty),
                    ));
                }
                self.check_expr(iterable)?;
                self.scopes.push(HashMap::new());
                self.declare(Sigil::Scalar, var, ty.clone());
                let result = self.check_loop_body(body, label, labels);
                self.scopes.pop();
                result
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.check_expr(value)?;
                }
                Ok(())
            }
            Stmt::Last { label, line } | Stmt::Next { label, line } => {
                if self.loop_depth == 0 {
                    return Err(err(*line, "'last'/'next' outside of a loop"));
                }
                if let Some(label) = label {
                    if !self
                        .loop_labels
                        .iter()
                        .any(|l| l.as_deref() == Some(label.as_str()))
                    {
                        return Err(err(
                            *line,
                            format!("no enclosing loop labeled '{}'", label),
                        ));
                    }
                }
                Ok(())
            }
            Stmt::Goto { label, line } => {
                if !labels.contains(label) {
                    return Err(err(*line, format!("unknown label target '{}'", label)));
                }
                Ok(())
            }
            Stmt::Label { .. } | Stmt::Inherit { .. } => Ok(()),
            Stmt::Try {
                body,
                catch_var,
                catch_body,
                ..
            } => {
                self.check_block(body, labels)?;
                self.scopes.push(HashMap::new());
                self.declare(Sigil::Scalar, catch_var, Type::Scalar);
                let result = self.check_block(catch_body, labels);
                self.scopes.pop();
                result
            }
            Stmt::Throw { value, .. } => self.check_expr(value),
            Stmt::Expr { expr, .. } => self.check_expr(expr),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Check a sigil-variable reference found inside an interpolated
    /// string, command, or pattern.
    fn check_interp(&mut self, value: &str, pattern_mode: bool) -> Result<(), String> {
        let segments = if pattern_mode {
            interp::split_pattern(value)
        } else {
            interp::split(value)
        };
        for segment in segments {
            if let interp::Segment::Var { sigil, name } = segment {
                if self.lookup(sigil, &name).is_none() {
                    return Err(err(
                        self.current_line,
                        format!(
                            "undeclared variable '{}{}' in string interpolation",
                            sigil, name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_expr(&mut self, expr: &mut Expr) -> Result<(), String> {
        match expr {
            Expr::IntLit(_) | Expr::NumLit(_) => Ok(()),
            Expr::StrLit {
                value,
                interpolated,
            } => {
                if *interpolated {
                    let value = value.clone();
                    self.check_interp(&value, false)?;
                }
                Ok(())
            }
            Expr::Command(cmd) => {
                let cmd = cmd.clone();
                self.check_interp(&cmd, false)
            }
            Expr::Pattern { pattern, .. } => {
                let pattern = pattern.clone();
                self.check_interp(&pattern, true)
            }
            Expr::SubstPattern {
                pattern,
                replacement,
                ..
            } => {
                let (pattern, replacement) = (pattern.clone(), replacement.clone());
                self.check_interp(&pattern, true)?;
                self.check_interp(&replacement, false)
            }
            Expr::Var { sigil, name, line } => {
                if self.lookup(*sigil, name).is_none() {
                    return Err(err(
                        *line,
                        format!("undeclared variable '{}{}'", sigil, name),
                    ));
                }
                Ok(())
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.check_expr(lhs)?;
                self.check_expr(rhs)
            }
            Expr::Unary { operand, .. } => self.check_expr(operand),
            Expr::Assign { target, value, .. } => {
                self.check_expr(target)?;
                self.check_expr(value)
            }
            Expr::Ternary {
                cond,
                then_val,
                else_val,
                ..
            } => {
                self.check_expr(cond)?;
                self.check_expr(then_val)?;
                self.check_expr(else_val)
            }
            Expr::Call {
                package,
                name,
                args,
                emitted,
                line,
            } => {
                *emitted = self.resolve_call(package.as_deref(), name, args, *line)?;
                for arg in args {
                    self.check_expr(arg)?;
                }
                Ok(())
            }
            Expr::IndirectCall { target, args, .. } => {
                self.check_expr(target)?;
                args.iter_mut().try_for_each(|a| self.check_expr(a))
            }
            Expr::MethodCall { recv, args, .. } => {
                self.check_expr(recv)?;
                args.iter_mut().try_for_each(|a| self.check_expr(a))
            }
            Expr::Index { base, index, .. } => {
                self.check_expr(base)?;
                self.check_expr(index)
            }
            Expr::HashKey { base, key, .. } => {
                self.check_expr(base)?;
                self.check_expr(key)
            }
            Expr::ArrowIndex { base, index, .. } => {
                self.check_expr(base)?;
                self.check_expr(index)
            }
            Expr::ArrowKey { base, key, .. } => {
                self.check_expr(base)?;
                self.check_expr(key)
            }
            Expr::Member { base, field, line } => {
                self.check_expr(base)?;
                // Field existence is checkable when the base is a declared
                // struct variable; other bases stay dynamic.
                if let Expr::Var {
                    sigil: Sigil::Scalar,
                    name,
                    ..
                } = base.as_ref()
                {
                    if let Some(Type::Struct(sname)) = self.lookup(Sigil::Scalar, name) {
                        let known = self
                            .struct_fields
                            .get(sname)
                            .is_some_and(|fields| fields.contains_key(field));
                        if !known {
                            return Err(err(
                                *line,
                                format!("no field '{}' in struct '{}'", field, sname),
                            ));
                        }
                    }
                }
                Ok(())
            }
            Expr::Ref { operand, .. } => self.check_expr(operand),
            Expr::FuncRef {
                package,
                name,
                emitted,
                line,
            } => {
                let flat = match package {
                    Some(pkg) => format!("{}_{}", flat_package(pkg), name),
                    None => emitted_name(self.current_package.as_deref(), name),
                };
                // Prefer a package-local function, then a global
                let resolved = if self.functions.contains_key(&flat) {
                    flat
                } else if package.is_none() && self.global_fns.contains(name.as_str()) {
                    name.clone()
                } else {
                    return Err(err(*line, format!("undefined function '\\&{}'", name)));
                };
                *emitted = resolved;
                Ok(())
            }
            Expr::DerefScalar { operand, .. }
            | Expr::DerefToArray { operand, .. }
            | Expr::DerefToHash { operand, .. } => self.check_expr(operand),
            Expr::ArrayLit(elems) | Expr::AnonArray(elems) => {
                elems.iter_mut().try_for_each(|e| self.check_expr(e))
            }
            Expr::HashLit(pairs) | Expr::AnonHash(pairs) => pairs.iter_mut().try_for_each(|(k, v)| {
                self.check_expr(k)?;
                self.check_expr(v)
            }),
            Expr::AnonFunc { params, body, .. } => {
                // Closure bodies see the enclosing scope (captures) plus
                // their own parameters.
                self.scopes.push(HashMap::new());
                for param in params.iter() {
                    let (sigil, ty) = if param.variadic {
                        (Sigil::Array, Type::Array)
                    } else {
                        (param.sigil, param.ty.clone())
                    };
                    self.declare(sigil, &param.name, ty);
                }
                let declared_labels = collect_labels(body);
                let result = body
                    .iter_mut()
                    .try_for_each(|stmt| self.check_stmt(stmt, &declared_labels));
                self.scopes.pop();
                result
            }
            Expr::Clone { operand, .. } => self.check_expr(operand),
            Expr::Spread { operand, .. } => self.check_expr(operand),
        }
    }

    /// Resolve a call to its flat emitted callee and check arity.
    fn resolve_call(
        &self,
        package: Option<&str>,
        name: &str,
        args: &[Expr],
        line: usize,
    ) -> Result<String, String> {
        let has_spread = args.iter().any(|a| matches!(a, Expr::Spread { .. }));

        if let Some(pkg) = package {
            let flat = format!("{}_{}", flat_package(pkg), name);
            if let Some(sig) = self.functions.get(&flat) {
                if !has_spread {
                    check_arity(sig, name, args.len(), line)?;
                }
                return Ok(flat);
            }
            if self.used_packages.contains(pkg) {
                // Foreign package: its declarations are not visible here
                return Ok(flat);
            }
            return Err(err(
                line,
                format!("undefined function '{}::{}'", pkg, name),
            ));
        }

        // Unqualified: local package wins over globals
        if let Some(pkg) = &self.current_package {
            if self
                .package_fns
                .get(pkg)
                .is_some_and(|fns| fns.contains(name))
            {
                let flat = format!("{}_{}", flat_package(pkg), name);
                if let Some(sig) = self.functions.get(&flat) {
                    if !has_spread {
                        check_arity(sig, name, args.len(), line)?;
                    }
                }
                return Ok(flat);
            }
        }

        if let Some(src_pkg) = self.imports.get(name) {
            return Ok(format!("{}_{}", flat_package(src_pkg), name));
        }

        if self.global_fns.contains(name) {
            let flat = emitted_name(None, name);
            if let Some(sig) = self.functions.get(&flat) {
                if !has_spread {
                    check_arity(sig, name, args.len(), line)?;
                }
            }
            return Ok(flat);
        }

        if let Some((_, min, max)) = BUILTINS.iter().find(|(n, _, _)| *n == name) {
            if !has_spread {
                if args.len() < *min {
                    return Err(err(
                        line,
                        format!(
                            "too few arguments to '{}': expected at least {}, got {}",
                            name,
                            min,
                            args.len()
                        ),
                    ));
                }
                if let Some(max) = max {
                    if args.len() > *max {
                        return Err(err(
                            line,
                            format!(
                                "too many arguments to '{}': expected at most {}, got {}",
                                name,
                                max,
                                args.len()
                            ),
                        ));
                    }
                }
            }
            return Ok(name.to_string());
        }

        Err(err(line, format!("call to undefined function '{}'", name)))
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn check_arity(sig: &FnSig, name: &str, arg_count: usize, line: usize) -> Result<(), String> {
    if arg_count < sig.min_args {
        return Err(err(
            line,
            format!(
                "too few arguments to '{}': expected at least {}, got {}",
                name, sig.min_args, arg_count
            ),
        ));
    }
    if !sig.variadic && arg_count > sig.param_count {
        return Err(err(
            line,
            format!(
                "too many arguments to '{}': expected at most {}, got {}",
                name, sig.param_count, arg_count
            ),
        ));
    }
    Ok(())
}

/// `min_args` is the index of the first optional or variadic parameter.
/// Required parameters may not follow optional ones.
fn compute_min_args(f: &FunctionDef) -> Result<usize, String> {
    let mut min_args = f.params.len();
    let mut seen_optional = false;
    for (i, param) in f.params.iter().enumerate() {
        if param.variadic && i + 1 != f.params.len() {
            return Err(err(
                param.line,
                format!(
                    "variadic parameter '{}' must be last in '{}'",
                    param.name, f.name
                ),
            ));
        }
        if param.default.is_some() || param.variadic {
            if !seen_optional {
                min_args = i;
                seen_optional = true;
            }
        } else if seen_optional {
            return Err(err(
                param.line,
                format!(
                    "required parameter '{}' follows an optional one in '{}'",
                    param.name, f.name
                ),
            ));
        }
    }
    Ok(min_args)
}

fn stmt_line(stmt: &Stmt) -> Option<usize> {
    let line = match stmt {
        Stmt::VarDecl { line, .. }
        | Stmt::If { line, .. }
        | Stmt::While { line, .. }
        | Stmt::For { line, .. }
        | Stmt::Foreach { line, .. }
        | Stmt::Return { line, .. }
        | Stmt::Last { line, .. }
        | Stmt::Next { line, .. }
        | Stmt::Goto { line, .. }
        | Stmt::Label { line, .. }
        | Stmt::Try { line, .. }
        | Stmt::Throw { line, .. }
        | Stmt::Inherit { line, .. }
        | Stmt::Expr { line, .. } => *line,
    };
    Some(line)
}

/// Labels available to `goto` within one function body: standalone labels
/// plus loop labels, at any nesting depth.
fn collect_labels(body: &[Stmt]) -> HashSet<String> {
    let mut labels = HashSet::new();
    collect_labels_into(body, &mut labels);
    labels
}

fn collect_labels_into(body: &[Stmt], labels: &mut HashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Label { name, .. } => {
                labels.insert(name.clone());
            }
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                collect_labels_into(then_block, labels);
                if let Some(else_block) = else_block {
                    collect_labels_into(else_block, labels);
                }
            }
            Stmt::While { body, label, .. }
            | Stmt::For { body, label, .. }
            | Stmt::Foreach { body, label, .. } => {
                if let Some(label) = label {
                    labels.insert(label.clone());
                }
                collect_labels_into(body, labels);
            }
            Stmt::Try {
                body, catch_body, ..
            } => {
                collect_labels_into(body, labels);
                collect_labels_into(catch_body, labels);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn analyze(src: &str) -> Result<Program, String> {
        let mut program = Parser::parse(src)?;
        Analyzer::analyze(&mut program)?;
        Ok(program)
    }

    #[test]
    fn test_package_name_lowering() {
        let program =
            analyze("package A::B; func f(int $x) int { return $x; }").expect("analyzes");
        assert_eq!(program.functions[0].emitted_name, "A_B_f");
    }

    #[test]
    fn test_main_is_renamed() {
        let program = analyze("func main() int { return 0; }").expect("analyzes");
        assert_eq!(program.functions[0].emitted_name, "strada_main");
    }

    #[test]
    fn test_unpackaged_function_keeps_name() {
        let program = analyze("func add(int $a, int $b) int { return $a + $b; }")
            .expect("analyzes");
        assert_eq!(program.functions[0].emitted_name, "add");
    }

    #[test]
    fn test_qualified_call_resolution() {
        let program = analyze(
            "package M; func f(int $x) int { return $x*2; } \
             package main; func main() int { say(M::f(21)); return 0; }",
        )
        .expect("analyzes");
        let main = program.find_by_emitted("strada_main").unwrap();
        let body = main.body.as_ref().unwrap();
        // say(M::f(21)) - the inner call resolves to M_f
        match &body[0] {
            Stmt::Expr {
                expr: Expr::Call { args, .. },
                ..
            } => match &args[0] {
                Expr::Call { emitted, .. } => assert_eq!(emitted, "M_f"),
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected expr stmt, got {:?}", other),
        }
    }

    #[test]
    fn test_local_package_call_is_prefixed() {
        let program = analyze(
            "package M; func helper() int { return 1; } \
             func go() int { return helper(); }",
        )
        .expect("analyzes");
        let go = program.find_by_emitted("M_go").unwrap();
        match &go.body.as_ref().unwrap()[0] {
            Stmt::Return {
                value: Some(Expr::Call { emitted, .. }),
                ..
            } => assert_eq!(emitted, "M_helper"),
            other => panic!("expected return call, got {:?}", other),
        }
    }

    #[test]
    fn test_use_import_resolution() {
        let program = analyze("use Util qw(trim); func f(str $s) str { return trim($s); }")
            .expect("analyzes");
        let f = program.find_by_emitted("f").unwrap();
        match &f.body.as_ref().unwrap()[0] {
            Stmt::Return {
                value: Some(Expr::Call { emitted, .. }),
                ..
            } => assert_eq!(emitted, "Util_trim"),
            other => panic!("expected return call, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_layout_offsets() {
        let program =
            analyze("struct P { str name; int age; }").expect("analyzes");
        let p = &program.structs[0];
        assert_eq!(p.fields[0].offset, 0);
        assert_eq!(p.fields[1].offset, 8);
        assert_eq!(p.total_size, 16);
    }

    #[test]
    fn test_struct_layout_with_padding() {
        let program = analyze("struct Mixed { bool flag; int n; int32 small; }")
            .expect("analyzes");
        let s = &program.structs[0];
        assert_eq!(s.fields[0].offset, 0);
        assert_eq!(s.fields[1].offset, 8);
        assert_eq!(s.fields[2].offset, 16);
        assert_eq!(s.total_size, 24);
        // Offsets are strictly monotonic and the total covers the last field
        assert!(s.fields.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[test]
    fn test_min_args_and_arity() {
        let program = analyze(
            "func f(int $a, int $b = 2) int { return $a + $b; } \
             func main() int { return f(1); }",
        )
        .expect("analyzes");
        assert_eq!(program.functions[0].min_args, 1);

        let too_few = analyze("func f(int $a, int $b) int { return 0; } func g() int { return f(1); }");
        assert!(too_few.unwrap_err().contains("too few arguments"));

        let too_many = analyze("func f(int $a) int { return 0; } func g() int { return f(1, 2); }");
        assert!(too_many.unwrap_err().contains("too many arguments"));
    }

    #[test]
    fn test_variadic_accepts_unbounded() {
        let result = analyze(
            "func f(int $a, scalar ...$rest) int { return $a; } \
             func g() int { return f(1, 2, 3, 4, 5); }",
        );
        assert!(result.is_ok(), "{:?}", result.err());
    }

    #[test]
    fn test_required_after_optional_rejected() {
        let result = analyze("func f(int $a = 1, int $b) int { return 0; }");
        assert!(result.unwrap_err().contains("follows an optional"));
    }

    #[test]
    fn test_sigil_mismatch_is_fatal() {
        let result = analyze("func f() void { my array $xs; }");
        assert!(result.unwrap_err().contains("type/sigil mismatch"));
    }

    #[test]
    fn test_undeclared_variable_is_fatal() {
        let result = analyze("func f() int { return $nope; }");
        assert!(result.unwrap_err().contains("undeclared variable"));
    }

    #[test]
    fn test_scopes_do_not_leak() {
        let result = analyze(
            "func f(int $c) int { if ($c) { my int $x = 1; } return $x; }",
        );
        assert!(result.unwrap_err().contains("undeclared variable"));
    }

    #[test]
    fn test_duplicate_function_in_package() {
        let result =
            analyze("package P; func f() void { } func f() void { }");
        assert!(result.unwrap_err().contains("duplicate function"));
    }

    #[test]
    fn test_goto_unknown_label() {
        let result = analyze("func f() void { goto nowhere; }");
        assert!(result.unwrap_err().contains("unknown label"));
    }

    #[test]
    fn test_labeled_last_requires_matching_loop() {
        let ok = analyze(
            "func f() void { OUTER: while (1) { while (1) { last OUTER; } } }",
        );
        assert!(ok.is_ok(), "{:?}", ok.err());

        let bad = analyze("func f() void { while (1) { last OUTER; } }");
        assert!(bad.unwrap_err().contains("no enclosing loop labeled"));
    }

    #[test]
    fn test_unknown_call_is_fatal() {
        let result = analyze("func f() void { frobnicate(1); }");
        assert!(result.unwrap_err().contains("undefined function"));
    }

    #[test]
    fn test_builtin_arity() {
        let result = analyze("func f(array @xs) void { push(@xs); }");
        assert!(result.unwrap_err().contains("too few arguments"));
    }

    #[test]
    fn test_unknown_struct_field() {
        let result = analyze(
            "struct P { str name; } func f() void { my P $p; say($p->age); }",
        );
        assert!(result.unwrap_err().contains("no field 'age'"));
    }

    #[test]
    fn test_catch_var_in_scope() {
        let result = analyze(
            "func f() void { try { throw \"x\"; } catch ($e) { say($e); } }",
        );
        assert!(result.is_ok(), "{:?}", result.err());
    }

    #[test]
    fn test_foreach_var_in_scope() {
        let result = analyze(
            "func f(array @xs) void { foreach my int $i (@xs) { say($i); } }",
        );
        assert!(result.is_ok(), "{:?}", result.err());
    }

    #[test]
    fn test_interpolated_variable_must_be_declared() {
        let ok = analyze("func f(str $who) void { say(\"hi $who\"); }");
        assert!(ok.is_ok(), "{:?}", ok.err());

        let bad = analyze("func f() void { say(\"hi $nobody\"); }");
        assert!(bad
            .unwrap_err()
            .contains("undeclared variable '$nobody' in string interpolation"));
    }
}
