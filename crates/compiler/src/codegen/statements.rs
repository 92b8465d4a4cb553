//! Statement lowering
//!
//! Control flow maps to plain C. Loops lower to `while (1)` with the
//! condition re-evaluated (and its temporaries released) at the top of each
//! iteration; `last`/`next` become gotos to generated labels so labeled
//! variants and for-loop update sections behave. `try`/`catch` lowers to a
//! setjmp frame; `throw` transfers the value to the runtime and longjmps.

use crate::ast::{Expr, Stmt};
use crate::types::{Sigil, Type};

use super::error::{internal, CodeGenError};
use super::expr::default_c_value;
use super::state::{c_quote, CVal, CodeGen};

impl CodeGen {
    /// Emit a braced block with its own lexical scope.
    pub(super) fn gen_block(&mut self, stmts: &[Stmt]) -> Result<(), CodeGenError> {
        self.open_block()?;
        self.push_scope();
        for stmt in stmts {
            self.gen_stmt(stmt)?;
        }
        self.pop_scope_releases()?;
        self.close_block()
    }

    pub(super) fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        if self.config.line_info {
            if let Some(line) = stmt_line(stmt) {
                let directive =
                    format!("#line {} {}", line, c_quote(&self.config.source_name.clone()));
                self.out(directive)?;
            }
        }

        match stmt {
            Stmt::VarDecl {
                ty,
                sigil,
                name,
                init,
                capacity,
                ..
            } => self.gen_var_decl(ty, *sigil, name, init.as_ref(), capacity.as_ref()),
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.push_temp_frame();
                let c = self.gen_cond(cond)?;
                let flag = self.emit_temp_raw(&Type::Int, &format!("({}) ? 1 : 0", c))?;
                self.release_temp_frame()?;
                self.out(format!("if ({})", flag))?;
                self.gen_block(then_block)?;
                if let Some(else_block) = else_block {
                    self.out("else")?;
                    self.gen_block(else_block)?;
                }
                Ok(())
            }
            Stmt::While {
                cond, body, label, ..
            } => {
                self.push_loop(label.clone());
                self.out("while (1)")?;
                self.open_block()?;
                self.push_temp_frame();
                let c = self.gen_cond(cond)?;
                let flag = self.emit_temp_raw(&Type::Int, &format!("({}) ? 1 : 0", c))?;
                self.release_temp_frame()?;
                self.out(format!("if (!{}) break;", flag))?;
                self.gen_block(body)?;
                let ctx = self.loops.last().expect("loop context");
                if ctx.used_cont {
                    let cont = ctx.cont.clone();
                    self.out(format!("{}: ;", cont))?;
                }
                self.close_block()?;
                let ctx = self.pop_loop();
                if ctx.used_brk {
                    self.out(format!("{}: ;", ctx.brk))?;
                }
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
                label,
                ..
            } => {
                self.open_block()?;
                self.push_scope();
                if let Some(init) = init {
                    self.gen_stmt(init)?;
                }
                self.push_loop(label.clone());
                self.out("while (1)")?;
                self.open_block()?;
                if let Some(cond) = cond {
                    self.push_temp_frame();
                    let c = self.gen_cond(cond)?;
                    let flag = self.emit_temp_raw(&Type::Int, &format!("({}) ? 1 : 0", c))?;
                    self.release_temp_frame()?;
                    self.out(format!("if (!{}) break;", flag))?;
                }
                self.gen_block(body)?;
                let ctx = self.loops.last().expect("loop context");
                if ctx.used_cont {
                    let cont = ctx.cont.clone();
                    self.out(format!("{}: ;", cont))?;
                }
                if let Some(update) = update {
                    self.push_temp_frame();
                    let v = self.gen_expr(update)?;
                    self.discard(v)?;
                    self.release_temp_frame()?;
                }
                self.close_block()?;
                let ctx = self.pop_loop();
                if ctx.used_brk {
                    self.out(format!("{}: ;", ctx.brk))?;
                }
                self.pop_scope_releases()?;
                self.close_block()
            }
            Stmt::Foreach {
                ty,
                var,
                iterable,
                body,
                label,
                ..
            } => self.gen_foreach(ty, var, iterable, body, label),
            Stmt::Return { value, .. } => self.gen_return(value.as_ref()),
            Stmt::Last { label, line } | Stmt::Next { label, line } => {
                let is_last = matches!(stmt, Stmt::Last { .. });
                let idx = self
                    .find_loop(label.as_deref())
                    .ok_or_else(|| internal(*line, "loop jump outside of a loop"))?;
                let (target, depth) = {
                    let ctx = &mut self.loops[idx];
                    if is_last {
                        ctx.used_brk = true;
                        (ctx.brk.clone(), ctx.scope_depth)
                    } else {
                        ctx.used_cont = true;
                        (ctx.cont.clone(), ctx.scope_depth)
                    }
                };
                self.emit_releases_from(depth)?;
                self.out(format!("goto {};", target))
            }
            Stmt::Goto { label, .. } => self.out(format!("goto U_{};", label)),
            Stmt::Label { name, .. } => self.out(format!("U_{}: ;", name)),
            Stmt::Try {
                body,
                catch_var,
                catch_body,
                ..
            } => self.gen_try(body, catch_var, catch_body),
            Stmt::Throw { value, .. } => {
                self.push_temp_frame();
                let v = self.gen_expr(value)?;
                let v = self.to_scalar(v)?;
                // strada_throw consumes its argument and does not return
                let v = self.to_owned_store(v)?;
                self.release_temp_frame()?;
                self.out(format!("strada_throw({});", v.code))
            }
            Stmt::Inherit {
                parent, package, ..
            } => {
                let class = package.as_deref().unwrap_or("main");
                self.out(format!(
                    "strada_inherit({}, {});",
                    c_quote(class),
                    c_quote(parent)
                ))
            }
            Stmt::Expr { expr, .. } => {
                self.push_temp_frame();
                let v = self.gen_expr(expr)?;
                self.discard(v)?;
                self.release_temp_frame()
            }
        }
    }

    /// Make sure a discarded expression's side effects still happen:
    /// borrowed inline expressions (native calls, comparisons) would
    /// otherwise never be emitted.
    fn discard(&mut self, v: CVal) -> Result<(), CodeGenError> {
        if v.ty == Type::Void || v.owned {
            return Ok(());
        }
        let trivial = v
            .code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '>' || c == '-' || c == '.');
        if !trivial {
            self.out(format!("(void)({});", v.code))?;
        }
        Ok(())
    }

    fn gen_var_decl(
        &mut self,
        ty: &Type,
        sigil: Sigil,
        name: &str,
        init: Option<&Expr>,
        capacity: Option<&Expr>,
    ) -> Result<(), CodeGenError> {
        self.push_temp_frame();

        let init_code = match init {
            Some(init_expr) => {
                let v = self.gen_expr(init_expr)?;
                let v = self.coerce(v, ty)?;
                let v = if ty.is_runtime_handle() {
                    self.to_owned_store(v)?
                } else {
                    v
                };
                v.code
            }
            None => match ty {
                Type::Scalar => "strada_new_undef()".to_string(),
                Type::Str => "strada_str_new(\"\")".to_string(),
                Type::Array | Type::Hash => {
                    let cap = match capacity {
                        Some(cap_expr) => {
                            let v = self.gen_expr(cap_expr)?;
                            self.to_int(v)?.code
                        }
                        None => "0".to_string(),
                    };
                    if *ty == Type::Array {
                        format!("strada_array_new({})", cap)
                    } else {
                        format!("strada_hash_new({})", cap)
                    }
                }
                Type::Struct(sname) => {
                    format!("({} *)strada_alloc(sizeof({}))", sname, sname)
                }
                t if t.is_native_num() => "0.0".to_string(),
                _ => "0".to_string(),
            },
        };

        let info = self.declare_var(sigil, name, ty.clone(), true);
        self.out(format!("{} = {};", ty.c_decl(&info.c_name), init_code))?;
        self.release_temp_frame()
    }

    fn gen_foreach(
        &mut self,
        ty: &Type,
        var: &str,
        iterable: &Expr,
        body: &[Stmt],
        label: &Option<String>,
    ) -> Result<(), CodeGenError> {
        // `a .. b` iterates the integer range without building an array
        if let Expr::Binary {
            op: crate::ast::BinOp::Range,
            lhs,
            rhs,
            ..
        } = iterable
        {
            return self.gen_foreach_range(ty, var, lhs, rhs, body, label);
        }

        self.open_block()?;
        self.push_scope();

        self.push_temp_frame();
        let arr = self.gen_expr(iterable)?;
        let arr = self.to_array(arr)?;
        // Keep the iterated array alive for the whole loop
        let arr_name = if arr.owned {
            self.take_temp(&arr.code);
            arr.code.clone()
        } else {
            arr.code.clone()
        };
        if arr.owned {
            if let Some(scope) = self.scopes.last_mut() {
                scope.owned.push((arr_name.clone(), Type::Array));
            }
        }
        self.release_temp_frame()?;

        let n = self.emit_temp_raw(&Type::Int, &format!("strada_array_size({})", arr_name))?;
        let i = self.emit_temp_raw(&Type::Int, "0")?;

        self.push_loop(label.clone());
        self.out("while (1)")?;
        self.open_block()?;
        self.out(format!("if ({} >= {}) break;", i, n))?;

        self.open_block()?;
        self.push_scope();
        let elem = self.fresh_temp();
        self.out(format!(
            "strada_value *{} = strada_array_get({}, {});",
            elem, arr_name, i
        ))?;
        self.bind_loop_var(ty, var, &elem)?;
        for stmt in body {
            self.gen_stmt(stmt)?;
        }
        self.pop_scope_releases()?;
        self.close_block()?;

        let ctx = self.loops.last().expect("loop context");
        if ctx.used_cont {
            let cont = ctx.cont.clone();
            self.out(format!("{}: ;", cont))?;
        }
        self.out(format!("{}++;", i))?;
        self.close_block()?;

        let ctx = self.pop_loop();
        if ctx.used_brk {
            self.out(format!("{}: ;", ctx.brk))?;
        }
        self.pop_scope_releases()?;
        self.close_block()
    }

    fn gen_foreach_range(
        &mut self,
        ty: &Type,
        var: &str,
        lo: &Expr,
        hi: &Expr,
        body: &[Stmt],
        label: &Option<String>,
    ) -> Result<(), CodeGenError> {
        self.open_block()?;
        self.push_scope();

        self.push_temp_frame();
        let lo_v = self.gen_expr(lo)?;
        let lo_c = self.to_int(lo_v)?;
        let lo_name = self.emit_temp_raw(&Type::Int, &lo_c.code)?;
        let hi_v = self.gen_expr(hi)?;
        let hi_c = self.to_int(hi_v)?;
        let hi_name = self.emit_temp_raw(&Type::Int, &hi_c.code)?;
        self.release_temp_frame()?;

        self.push_loop(label.clone());
        self.out("while (1)")?;
        self.open_block()?;
        self.out(format!("if ({} > {}) break;", lo_name, hi_name))?;

        self.open_block()?;
        self.push_scope();
        if ty.is_native_int() {
            let info = self.declare_var(Sigil::Scalar, var, ty.clone(), false);
            self.out(format!("{} = {};", ty.c_decl(&info.c_name), lo_name))?;
        } else if ty.is_native_num() {
            let info = self.declare_var(Sigil::Scalar, var, ty.clone(), false);
            self.out(format!(
                "{} = (double){};",
                ty.c_decl(&info.c_name),
                lo_name
            ))?;
        } else {
            let info = self.declare_var(Sigil::Scalar, var, Type::Scalar, true);
            self.out(format!(
                "strada_value *{} = strada_new_int({});",
                info.c_name, lo_name
            ))?;
        }
        for stmt in body {
            self.gen_stmt(stmt)?;
        }
        self.pop_scope_releases()?;
        self.close_block()?;

        let ctx = self.loops.last().expect("loop context");
        if ctx.used_cont {
            let cont = ctx.cont.clone();
            self.out(format!("{}: ;", cont))?;
        }
        self.out(format!("{}++;", lo_name))?;
        self.close_block()?;

        let ctx = self.pop_loop();
        if ctx.used_brk {
            self.out(format!("{}: ;", ctx.brk))?;
        }
        self.pop_scope_releases()?;
        self.close_block()
    }

    /// Bind the foreach loop variable from an owned element scalar.
    fn bind_loop_var(&mut self, ty: &Type, var: &str, elem: &str) -> Result<(), CodeGenError> {
        match ty {
            Type::Scalar => {
                let info = self.declare_var(Sigil::Scalar, var, Type::Scalar, true);
                self.out(format!("strada_value *{} = {};", info.c_name, elem))?;
            }
            Type::Str => {
                let info = self.declare_var(Sigil::Scalar, var, Type::Str, true);
                self.out(format!(
                    "strada_str *{} = strada_to_str({});",
                    info.c_name, elem
                ))?;
                self.out(format!("strada_release({});", elem))?;
            }
            Type::Struct(sname) => {
                let info = self.declare_var(Sigil::Scalar, var, ty.clone(), false);
                self.out(format!(
                    "{} *{} = ({} *)strada_to_ptr({});",
                    sname, info.c_name, sname, elem
                ))?;
                self.out(format!("strada_release({});", elem))?;
            }
            t if t.is_native_int() => {
                let info = self.declare_var(Sigil::Scalar, var, ty.clone(), false);
                self.out(format!(
                    "{} = strada_to_int({});",
                    ty.c_decl(&info.c_name),
                    elem
                ))?;
                self.out(format!("strada_release({});", elem))?;
            }
            t if t.is_native_num() => {
                let info = self.declare_var(Sigil::Scalar, var, ty.clone(), false);
                self.out(format!(
                    "{} = strada_to_num({});",
                    ty.c_decl(&info.c_name),
                    elem
                ))?;
                self.out(format!("strada_release({});", elem))?;
            }
            other => {
                return Err(CodeGenError::Logic(format!(
                    "foreach variable cannot have type {}",
                    other
                )))
            }
        }
        Ok(())
    }

    fn gen_return(&mut self, value: Option<&Expr>) -> Result<(), CodeGenError> {
        self.push_temp_frame();

        // Lambdas return boxed scalars through the closure ABI
        let boxing = self.lambda_ret.clone();

        match value {
            None => {
                self.release_temp_frame()?;
                self.emit_all_releases_except("")?;
                match boxing {
                    Some(_) => self.out("return strada_new_undef();"),
                    None if self.current_ret == Type::Void => self.out("return;"),
                    None => {
                        let default = default_c_value(&self.current_ret.clone());
                        self.out(format!("return {};", default))
                    }
                }
            }
            Some(value_expr) => {
                let declared = match &boxing {
                    Some(ret) => ret.clone(),
                    None => self.current_ret.clone(),
                };
                if declared == Type::Void && boxing.is_none() {
                    let v = self.gen_expr(value_expr)?;
                    self.discard(v)?;
                    self.release_temp_frame()?;
                    self.emit_all_releases_except("")?;
                    return self.out("return;");
                }
                let v = self.gen_expr(value_expr)?;
                let v = self.coerce(v, &declared)?;
                let v = if boxing.is_some() {
                    self.to_scalar(v)?
                } else {
                    v
                };
                let ret_ty = if boxing.is_some() {
                    Type::Scalar
                } else {
                    declared
                };

                let final_code = if ret_ty.is_runtime_handle() {
                    let v = self.to_owned_store(v)?;
                    v.code
                } else {
                    // Capture natives before the releases below
                    self.emit_temp_raw(&ret_ty, &v.code)?
                };
                self.release_temp_frame()?;
                self.emit_all_releases_except(&final_code)?;
                self.out(format!("return {};", final_code))
            }
        }
    }

    fn gen_try(
        &mut self,
        body: &[Stmt],
        catch_var: &str,
        catch_body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let frame = self.fresh_temp();
        self.out(format!("strada_exc_frame {};", frame))?;
        self.out(format!("strada_exc_push(&{});", frame))?;
        self.out(format!("if (setjmp({}.env) == 0)", frame))?;

        self.open_block()?;
        self.push_scope();
        for stmt in body {
            self.gen_stmt(stmt)?;
        }
        self.pop_scope_releases()?;
        self.out(format!("strada_exc_pop(&{});", frame))?;
        self.close_block()?;

        self.out("else")?;
        self.open_block()?;
        self.push_scope();
        self.out(format!("strada_exc_pop(&{});", frame))?;
        // Unwinding releases values pending since the frame was entered
        self.out("strada_exc_cleanup();")?;
        let info = self.declare_var(Sigil::Scalar, catch_var, Type::Scalar, true);
        self.out(format!(
            "strada_value *{} = strada_take_exception();",
            info.c_name
        ))?;
        for stmt in catch_body {
            self.gen_stmt(stmt)?;
        }
        self.pop_scope_releases()?;
        self.close_block()?;
        Ok(())
    }
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
