//! Closure lowering
//!
//! Anonymous functions lift to top-level `static` functions with an
//! explicit capture-environment struct; the expression value is a runtime
//! closure (function pointer + environment pointer) and indirect calls
//! dispatch through `strada_call_closure`. Function references (`\&f`)
//! lift a per-function thunk with the same signature so every indirect
//! call shares one ABI: `strada_value *(void *env, strada_array *args)`.
//!
//! Captured handles are acquired into the environment; the environment
//! itself comes from the runtime arena and lives as long as the closure.

use crate::ast::{Block, Expr, Param, Stmt};
use crate::interp;
use crate::types::{Sigil, Type};
use std::collections::HashSet;
use std::fmt::Write as _;

use super::error::{internal, CodeGenError};
use super::state::{c_var_name, CVal, CodeGen, VarInfo};

impl CodeGen {
    // ========================================================================
    // Anonymous functions
    // ========================================================================

    pub(super) fn gen_anon_func(
        &mut self,
        params: &[Param],
        ret: &Type,
        body: &Block,
    ) -> Result<CVal, CodeGenError> {
        // Free variables resolvable in the enclosing scopes become captures
        let free = free_vars(params, body);
        let captures: Vec<(Sigil, String, VarInfo)> = free
            .into_iter()
            .filter_map(|(sigil, name)| {
                self.lookup_var(sigil, &name)
                    .cloned()
                    .map(|info| (sigil, name, info))
            })
            .collect();

        let id = self.env_counter;
        self.env_counter += 1;
        let env_name = format!("strada_env_{}", id);
        let lambda_name = format!("strada_lambda_{}", id);

        if !captures.is_empty() {
            writeln!(&mut self.lifted, "typedef struct {{")?;
            for (sigil, name, info) in &captures {
                let member = c_var_name(*sigil, name);
                writeln!(&mut self.lifted, "    {};", info.ty.c_decl(&member))?;
            }
            writeln!(&mut self.lifted, "}} {};", env_name)?;
            writeln!(&mut self.lifted)?;
        }

        self.gen_lambda_def(&lambda_name, &env_name, &captures, params, ret, body)?;

        // Build the closure value at the use site
        let env_ptr = if captures.is_empty() {
            "NULL".to_string()
        } else {
            let env_tmp = self.fresh_temp();
            self.out(format!(
                "{} *{} = ({} *)strada_alloc(sizeof({}));",
                env_name, env_tmp, env_name, env_name
            ))?;
            for (sigil, name, info) in &captures {
                let member = c_var_name(*sigil, name);
                let acquired = match &info.ty {
                    Type::Scalar => format!("strada_ref({})", info.c_name),
                    Type::Str => format!("strada_str_ref({})", info.c_name),
                    Type::Array => format!("strada_array_ref({})", info.c_name),
                    Type::Hash => format!("strada_hash_ref({})", info.c_name),
                    _ => info.c_name.clone(),
                };
                self.out(format!("{}->{} = {};", env_tmp, member, acquired))?;
            }
            env_tmp
        };

        let name = self.emit_temp(
            &Type::Scalar,
            &format!(
                "strada_new_closure({}, (void *){}, {})",
                lambda_name,
                env_ptr,
                params.len()
            ),
        )?;
        Ok(CVal::owned(name, Type::Scalar))
    }

    /// Generate the lifted lambda definition into the side buffer. The
    /// generator state is swapped out for the nested emission.
    fn gen_lambda_def(
        &mut self,
        lambda_name: &str,
        env_name: &str,
        captures: &[(Sigil, String, VarInfo)],
        params: &[Param],
        ret: &Type,
        body: &Block,
    ) -> Result<(), CodeGenError> {
        let saved_body = std::mem::take(&mut self.body);
        let saved_scopes = std::mem::take(&mut self.scopes);
        let saved_frames = std::mem::take(&mut self.temp_frames);
        let saved_loops = std::mem::take(&mut self.loops);
        let saved_indent = std::mem::replace(&mut self.indent, 1);
        let saved_ret = std::mem::replace(&mut self.current_ret, ret.clone());
        let saved_lambda = std::mem::replace(&mut self.lambda_ret, Some(ret.clone()));

        let result = (|| -> Result<(), CodeGenError> {
            self.push_scope();

            if captures.is_empty() {
                self.out("(void)envp;")?;
            } else {
                self.out(format!("{} *env = ({} *)envp;", env_name, env_name))?;
                for (sigil, name, info) in captures {
                    let member = c_var_name(*sigil, name);
                    let bound = VarInfo {
                        c_name: format!("env->{}", member),
                        ty: info.ty.clone(),
                    };
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.vars.insert((*sigil, name.clone()), bound);
                    }
                }
            }
            if params.is_empty() {
                self.out("(void)args;")?;
            }

            for (i, param) in params.iter().enumerate() {
                self.bind_lambda_param(i, param)?;
            }

            for stmt in body {
                self.gen_stmt(stmt)?;
            }
            self.pop_scope_releases()?;
            self.out("return strada_new_undef();")?;
            Ok(())
        })();

        let lambda_body = std::mem::replace(&mut self.body, saved_body);
        self.scopes = saved_scopes;
        self.temp_frames = saved_frames;
        self.loops = saved_loops;
        self.indent = saved_indent;
        self.current_ret = saved_ret;
        self.lambda_ret = saved_lambda;
        result?;

        writeln!(
            &mut self.lifted,
            "static strada_value *{}(void *envp, strada_array *args) {{",
            lambda_name
        )?;
        self.lifted.push_str(&lambda_body);
        writeln!(&mut self.lifted, "}}")?;
        writeln!(&mut self.lifted)?;
        Ok(())
    }

    /// Bind one lambda parameter from the boxed argument array.
    fn bind_lambda_param(&mut self, i: usize, param: &Param) -> Result<(), CodeGenError> {
        if param.variadic {
            let info = self.declare_var(Sigil::Array, &param.name, Type::Array, true);
            self.out(format!(
                "strada_array *{} = strada_array_tail(args, {});",
                info.c_name, i
            ))?;
            return Ok(());
        }

        match &param.ty {
            Type::Scalar => {
                let info = self.declare_var(param.sigil, &param.name, Type::Scalar, true);
                self.out(format!(
                    "strada_value *{} = strada_array_get(args, {});",
                    info.c_name, i
                ))?;
            }
            ty => {
                let boxed = self.fresh_temp();
                self.out(format!(
                    "strada_value *{} = strada_array_get(args, {});",
                    boxed, i
                ))?;
                let owned_local = ty.is_runtime_handle();
                let info = self.declare_var(param.sigil, &param.name, ty.clone(), owned_local);
                let unboxed = match ty {
                    Type::Str => format!("strada_to_str({})", boxed),
                    Type::Array => format!("strada_deref_array({})", boxed),
                    Type::Hash => format!("strada_deref_hash({})", boxed),
                    Type::Struct(sname) => format!("({} *)strada_to_ptr({})", sname, boxed),
                    t if t.is_native_num() => format!("strada_to_num({})", boxed),
                    _ => format!("strada_to_int({})", boxed),
                };
                self.out(format!("{} = {};", ty.c_decl(&info.c_name), unboxed))?;
                self.out(format!("strada_release({});", boxed))?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Funcref thunks
    // ========================================================================

    /// Lift (once) the closure-ABI thunk for a named function and return
    /// `(thunk_name, arity)`.
    pub(super) fn ensure_thunk(
        &mut self,
        emitted: &str,
        line: usize,
    ) -> Result<(String, usize), CodeGenError> {
        let info = self
            .fn_table
            .get(emitted)
            .cloned()
            .ok_or_else(|| internal(line, format!("unresolved function '{}'", emitted)))?;
        let thunk = format!("strada_thunk_{}", emitted);
        let arity = info.params.len();

        if !self.thunks.insert(emitted.to_string()) {
            return Ok((thunk, arity));
        }

        let mut s = String::new();
        writeln!(
            s,
            "static strada_value *{}(void *env, strada_array *args) {{",
            thunk
        )?;
        writeln!(s, "    (void)env;")?;
        if info.params.is_empty() {
            writeln!(s, "    (void)args;")?;
        }

        let mut arg_names = Vec::with_capacity(info.params.len());
        let mut cleanup = Vec::new();
        for (i, param) in info.params.iter().enumerate() {
            let v = format!("v{}", i);
            if param.variadic {
                writeln!(s, "    strada_array *{} = strada_array_tail(args, {});", v, i)?;
                cleanup.push(format!("strada_array_release({});", v));
            } else {
                match &param.ty {
                    Type::Scalar => {
                        writeln!(s, "    strada_value *{} = strada_array_get(args, {});", v, i)?;
                        cleanup.push(format!("strada_release({});", v));
                    }
                    ty => {
                        let b = format!("b{}", i);
                        writeln!(
                            s,
                            "    strada_value *{} = strada_array_get(args, {});",
                            b, i
                        )?;
                        match ty {
                            Type::Str => {
                                writeln!(s, "    strada_str *{} = strada_to_str({});", v, b)?;
                                cleanup.push(format!("strada_str_release({});", v));
                            }
                            Type::Array => {
                                writeln!(
                                    s,
                                    "    strada_array *{} = strada_deref_array({});",
                                    v, b
                                )?;
                                cleanup.push(format!("strada_array_release({});", v));
                            }
                            Type::Hash => {
                                writeln!(
                                    s,
                                    "    strada_hash *{} = strada_deref_hash({});",
                                    v, b
                                )?;
                                cleanup.push(format!("strada_hash_release({});", v));
                            }
                            Type::Struct(sname) => {
                                writeln!(
                                    s,
                                    "    {} *{} = ({} *)strada_to_ptr({});",
                                    sname, v, sname, b
                                )?;
                            }
                            t if t.is_native_num() => {
                                writeln!(s, "    double {} = strada_to_num({});", v, b)?;
                            }
                            _ => {
                                writeln!(s, "    int64_t {} = strada_to_int({});", v, b)?;
                            }
                        }
                        writeln!(s, "    strada_release({});", b)?;
                    }
                }
            }
            arg_names.push(v);
        }

        let call = format!("{}({})", emitted, arg_names.join(", "));
        match &info.ret {
            Type::Void => {
                writeln!(s, "    {};", call)?;
                for c in &cleanup {
                    writeln!(s, "    {}", c)?;
                }
                writeln!(s, "    return strada_new_undef();")?;
            }
            Type::Scalar => {
                writeln!(s, "    strada_value *r = {};", call)?;
                for c in &cleanup {
                    writeln!(s, "    {}", c)?;
                }
                writeln!(s, "    return r;")?;
            }
            Type::Str => {
                writeln!(s, "    strada_str *r = {};", call)?;
                for c in &cleanup {
                    writeln!(s, "    {}", c)?;
                }
                writeln!(s, "    strada_value *out = strada_new_str(r);")?;
                writeln!(s, "    strada_str_release(r);")?;
                writeln!(s, "    return out;")?;
            }
            Type::Array => {
                writeln!(s, "    strada_array *r = {};", call)?;
                for c in &cleanup {
                    writeln!(s, "    {}", c)?;
                }
                writeln!(s, "    strada_value *out = strada_new_ref_array(r);")?;
                writeln!(s, "    strada_array_release(r);")?;
                writeln!(s, "    return out;")?;
            }
            Type::Hash => {
                writeln!(s, "    strada_hash *r = {};", call)?;
                for c in &cleanup {
                    writeln!(s, "    {}", c)?;
                }
                writeln!(s, "    strada_value *out = strada_new_ref_hash(r);")?;
                writeln!(s, "    strada_hash_release(r);")?;
                writeln!(s, "    return out;")?;
            }
            Type::Struct(_) | Type::Ptr => {
                writeln!(s, "    void *r = (void *){};", call)?;
                for c in &cleanup {
                    writeln!(s, "    {}", c)?;
                }
                writeln!(s, "    return strada_new_ptr(r);")?;
            }
            t if t.is_native_num() => {
                writeln!(s, "    double r = {};", call)?;
                for c in &cleanup {
                    writeln!(s, "    {}", c)?;
                }
                writeln!(s, "    return strada_new_num(r);")?;
            }
            _ => {
                writeln!(s, "    int64_t r = (int64_t){};", call)?;
                for c in &cleanup {
                    writeln!(s, "    {}", c)?;
                }
                writeln!(s, "    return strada_new_int(r);")?;
            }
        }
        writeln!(s, "}}")?;
        writeln!(s)?;
        self.lifted.push_str(&s);
        Ok((thunk, arity))
    }
}

// ============================================================================
// Free-variable analysis
// ============================================================================

/// Variables read or written in `body` that are not bound by `params` or a
/// local declaration, in first-use order.
pub(super) fn free_vars(params: &[Param], body: &[Stmt]) -> Vec<(Sigil, String)> {
    let mut walker = FreeVarWalker {
        locals: vec![HashSet::new()],
        free: Vec::new(),
        seen: HashSet::new(),
    };
    for param in params {
        let sigil = if param.variadic {
            Sigil::Array
        } else {
            param.sigil
        };
        walker.bind(sigil, &param.name);
    }
    for stmt in body {
        walker.walk_stmt(stmt);
    }
    walker.free
}

struct FreeVarWalker {
    locals: Vec<HashSet<(Sigil, String)>>,
    free: Vec<(Sigil, String)>,
    seen: HashSet<(Sigil, String)>,
}

impl FreeVarWalker {
    fn bind(&mut self, sigil: Sigil, name: &str) {
        if let Some(top) = self.locals.last_mut() {
            top.insert((sigil, name.to_string()));
        }
    }

    fn reference(&mut self, sigil: Sigil, name: &str) {
        let key = (sigil, name.to_string());
        if self.locals.iter().any(|scope| scope.contains(&key)) {
            return;
        }
        if self.seen.insert(key.clone()) {
            self.free.push(key);
        }
    }

    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        self.locals.push(HashSet::new());
        f(self);
        self.locals.pop();
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl {
                sigil,
                name,
                init,
                capacity,
                ..
            } => {
                if let Some(cap) = capacity {
                    self.walk_expr(cap);
                }
                if let Some(init) = init {
                    self.walk_expr(init);
                }
                self.bind(*sigil, name);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.walk_expr(cond);
                self.scoped(|w| then_block.iter().for_each(|s| w.walk_stmt(s)));
                if let Some(else_block) = else_block {
                    self.scoped(|w| else_block.iter().for_each(|s| w.walk_stmt(s)));
                }
            }
            Stmt::While { cond, body, .. } => {
                self.walk_expr(cond);
                self.scoped(|w| body.iter().for_each(|s| w.walk_stmt(s)));
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
                ..
            } => self.scoped(|w| {
                if let Some(init) = init {
                    w.walk_stmt(init);
                }
                if let Some(cond) = cond {
                    w.walk_expr(cond);
                }
                if let Some(update) = update {
                    w.walk_expr(update);
                }
                w.scoped(|w2| body.iter().for_each(|s| w2.walk_stmt(s)));
            }),
            Stmt::Foreach {
                var,
                iterable,
                body,
                ..
            } => {
                self.walk_expr(iterable);
                self.scoped(|w| {
                    w.bind(Sigil::Scalar, var);
                    body.iter().for_each(|s| w.walk_stmt(s));
                });
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.walk_expr(value);
                }
            }
            Stmt::Try {
                body,
                catch_var,
                catch_body,
                ..
            } => {
                self.scoped(|w| body.iter().for_each(|s| w.walk_stmt(s)));
                self.scoped(|w| {
                    w.bind(Sigil::Scalar, catch_var);
                    catch_body.iter().for_each(|s| w.walk_stmt(s));
                });
            }
            Stmt::Throw { value, .. } => self.walk_expr(value),
            Stmt::Expr { expr, .. } => self.walk_expr(expr),
            Stmt::Last { .. }
            | Stmt::Next { .. }
            | Stmt::Goto { .. }
            | Stmt::Label { .. }
            | Stmt::Inherit { .. } => {}
        }
    }

    fn walk_interp(&mut self, value: &str, pattern_mode: bool) {
        let segments = if pattern_mode {
            interp::split_pattern(value)
        } else {
            interp::split(value)
        };
        for segment in segments {
            if let interp::Segment::Var { sigil, name } = segment {
                self.reference(sigil, &name);
            }
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Var { sigil, name, .. } => self.reference(*sigil, name),
            Expr::StrLit {
                value,
                interpolated,
            } => {
                if *interpolated {
                    self.walk_interp(value, false);
                }
            }
            Expr::Command(cmd) => self.walk_interp(cmd, false),
            Expr::Pattern { pattern, .. } => self.walk_interp(pattern, true),
            Expr::SubstPattern {
                pattern,
                replacement,
                ..
            } => {
                self.walk_interp(pattern, true);
                self.walk_interp(replacement, false);
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.walk_expr(lhs);
                self.walk_expr(rhs);
            }
            Expr::Unary { operand, .. } => self.walk_expr(operand),
            Expr::Assign { target, value, .. } => {
                self.walk_expr(target);
                self.walk_expr(value);
            }
            Expr::Ternary {
                cond,
                then_val,
                else_val,
                ..
            } => {
                self.walk_expr(cond);
                self.walk_expr(then_val);
                self.walk_expr(else_val);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| self.walk_expr(a)),
            Expr::IndirectCall { target, args, .. } => {
                self.walk_expr(target);
                args.iter().for_each(|a| self.walk_expr(a));
            }
            Expr::MethodCall { recv, args, .. } => {
                self.walk_expr(recv);
                args.iter().for_each(|a| self.walk_expr(a));
            }
            Expr::Index { base, index, .. } | Expr::ArrowIndex { base, index, .. } => {
                self.walk_expr(base);
                self.walk_expr(index);
            }
            Expr::HashKey { base, key, .. } | Expr::ArrowKey { base, key, .. } => {
                self.walk_expr(base);
                self.walk_expr(key);
            }
            Expr::Member { base, .. } => self.walk_expr(base),
            Expr::Ref { operand, .. } => self.walk_expr(operand),
            Expr::DerefScalar { operand, .. }
            | Expr::DerefToArray { operand, .. }
            | Expr::DerefToHash { operand, .. } => self.walk_expr(operand),
            Expr::ArrayLit(elems) | Expr::AnonArray(elems) => {
                elems.iter().for_each(|e| self.walk_expr(e))
            }
            Expr::HashLit(pairs) | Expr::AnonHash(pairs) => pairs.iter().for_each(|(k, v)| {
                self.walk_expr(k);
                self.walk_expr(v);
            }),
            Expr::AnonFunc { params, body, .. } => {
                // A nested lambda's captures are free here too, minus its
                // own parameters
                self.scoped(|w| {
                    for param in params {
                        let sigil = if param.variadic {
                            Sigil::Array
                        } else {
                            param.sigil
                        };
                        w.bind(sigil, &param.name);
                    }
                    body.iter().for_each(|s| w.walk_stmt(s));
                });
            }
            Expr::Clone { operand, .. } => self.walk_expr(operand),
            Expr::Spread { operand, .. } => self.walk_expr(operand),
            Expr::IntLit(_) | Expr::NumLit(_) | Expr::FuncRef { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn anon_parts(src: &str) -> (Vec<Param>, Block) {
        let program = Parser::parse(src).expect("parses");
        for f in &program.functions {
            if let Some(body) = &f.body {
                for stmt in body {
                    if let Stmt::VarDecl {
                        init: Some(Expr::AnonFunc { params, body, .. }),
                        ..
                    } = stmt
                    {
                        return (params.clone(), body.clone());
                    }
                }
            }
        }
        panic!("no anonymous function in {}", src);
    }

    #[test]
    fn test_free_vars_exclude_params_and_locals() {
        let (params, body) = anon_parts(
            "func outer(int $n) void { \
               my scalar $f = func (int $x) int { \
                 my int $y = 2; return $x + $y + $n; \
               }; \
             }",
        );
        let free = free_vars(&params, &body);
        assert_eq!(free, vec![(Sigil::Scalar, "n".to_string())]);
    }

    #[test]
    fn test_free_vars_from_interpolation() {
        let (params, body) = anon_parts(
            "func outer(str $who) void { \
               my scalar $f = func () void { say(\"hi $who\"); }; \
             }",
        );
        let free = free_vars(&params, &body);
        assert_eq!(free, vec![(Sigil::Scalar, "who".to_string())]);
    }

    #[test]
    fn test_free_vars_first_use_order() {
        let (params, body) = anon_parts(
            "func outer(int $a, int $b) void { \
               my scalar $f = func () int { return $b + $a + $b; }; \
             }",
        );
        let free = free_vars(&params, &body);
        assert_eq!(
            free,
            vec![(Sigil::Scalar, "b".to_string()), (Sigil::Scalar, "a".to_string())]
        );
    }
}
