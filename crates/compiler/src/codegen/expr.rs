//! Expression lowering
//!
//! Arithmetic on `int`/`num` stays native C; anything touching a `scalar`
//! goes through the runtime. `.` concatenation, `x` repetition and string
//! interpolation always build runtime strings. Every runtime-valued
//! intermediate lands in a fresh temporary registered for release at end of
//! statement; values moved into variables, containers or returns are taken
//! out of the release frame instead.

use crate::ast::{AssignOp, BinOp, Expr, RefKind, UnOp};
use crate::interp::{self, Segment};
use crate::types::{Sigil, Type};

use super::error::{internal, CodeGenError};
use super::runtime;
use super::state::{c_quote, c_num_lit, release_call, CVal, CodeGen};

impl CodeGen {
    // ========================================================================
    // Static expression typing
    // ========================================================================

    /// The static type an expression lowers to. Mirrors the lowering rules
    /// below; `scalar` is the catch-all for dynamic results.
    pub(super) fn expr_type(&self, e: &Expr) -> Type {
        match e {
            Expr::IntLit(_) => Type::Int,
            Expr::NumLit(_) => Type::Num,
            Expr::StrLit { .. } | Expr::Command(_) => Type::Str,
            Expr::Pattern { .. } | Expr::SubstPattern { .. } => Type::Int,
            Expr::Var { sigil, name, .. } => self
                .lookup_var(*sigil, name)
                .map(|v| v.ty.clone())
                .unwrap_or(Type::Scalar),
            Expr::Binary { op, lhs, rhs, .. } => match op {
                BinOp::Concat | BinOp::Repeat => Type::Str,
                BinOp::Range => Type::Array,
                BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Gt
                | BinOp::Le
                | BinOp::Ge
                | BinOp::StrEq
                | BinOp::StrNe
                | BinOp::StrLt
                | BinOp::StrGt
                | BinOp::StrLe
                | BinOp::StrGe
                | BinOp::Match
                | BinOp::NotMatch
                | BinOp::And
                | BinOp::Or => Type::Int,
                BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
                    Type::Int
                }
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                    let lt = self.expr_type(lhs);
                    let rt = self.expr_type(rhs);
                    if lt == Type::Scalar || rt == Type::Scalar {
                        Type::Scalar
                    } else if lt.is_native_num()
                        || rt.is_native_num()
                        || lt == Type::Str
                        || rt == Type::Str
                    {
                        Type::Num
                    } else {
                        Type::Int
                    }
                }
            },
            Expr::Unary { op, operand, .. } => match op {
                UnOp::Not => Type::Int,
                UnOp::BitNot => Type::Int,
                UnOp::Neg | UnOp::Plus => self.expr_type(operand),
                UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                    self.expr_type(operand)
                }
            },
            Expr::Assign { target, .. } => self.expr_type(target),
            Expr::Ternary {
                then_val, else_val, ..
            } => {
                let tt = self.expr_type(then_val);
                let et = self.expr_type(else_val);
                if tt == et { tt } else { Type::Scalar }
            }
            Expr::Call { name, emitted, args, .. } => {
                if let Some(info) = self.fn_table.get(emitted) {
                    info.ret.clone()
                } else if name == "abs" {
                    args.first()
                        .map(|a| self.expr_type(a))
                        .filter(|t| t.is_native_num())
                        .unwrap_or(Type::Int)
                } else {
                    runtime::builtin_ret(name).unwrap_or(Type::Scalar)
                }
            }
            Expr::IndirectCall { .. } => Type::Scalar,
            Expr::MethodCall { recv, method, .. } => {
                // Typed function-pointer fields keep their declared return
                if let Type::Struct(sname) = self.expr_type(recv) {
                    if let Some(Type::Func { ret, .. }) = self
                        .structs
                        .get(&sname)
                        .and_then(|s| s.fields.iter().find(|f| &f.name == method))
                        .map(|f| f.ty.clone())
                    {
                        return *ret;
                    }
                }
                Type::Scalar
            }
            Expr::Index { .. }
            | Expr::HashKey { .. }
            | Expr::ArrowIndex { .. }
            | Expr::ArrowKey { .. } => Type::Scalar,
            Expr::Member { base, field, .. } => match self.expr_type(base) {
                Type::Struct(sname) => self
                    .structs
                    .get(&sname)
                    .and_then(|s| s.fields.iter().find(|f| &f.name == field))
                    .map(|f| f.ty.clone())
                    .unwrap_or(Type::Scalar),
                _ => Type::Scalar,
            },
            Expr::Ref { .. } | Expr::FuncRef { .. } | Expr::AnonFunc { .. } => Type::Scalar,
            Expr::DerefScalar { .. } => Type::Scalar,
            Expr::DerefToArray { .. } => Type::Array,
            Expr::DerefToHash { .. } => Type::Hash,
            Expr::ArrayLit(_) => Type::Array,
            Expr::HashLit(_) => Type::Hash,
            Expr::AnonArray(_) | Expr::AnonHash(_) => Type::Scalar,
            Expr::Clone { operand, .. } => self.expr_type(operand),
            Expr::Spread { .. } => Type::Array,
        }
    }

    // ========================================================================
    // Coercions
    // ========================================================================

    /// Box a value into a runtime scalar.
    pub(super) fn to_scalar(&mut self, v: CVal) -> Result<CVal, CodeGenError> {
        let init = match &v.ty {
            Type::Scalar => return Ok(v),
            t if t.is_native_int() => format!("strada_new_int((int64_t)({}))", v.code),
            t if t.is_native_num() => format!("strada_new_num({})", v.code),
            Type::Str => format!("strada_new_str({})", v.code),
            Type::Array => format!("strada_new_ref_array({})", v.code),
            Type::Hash => format!("strada_new_ref_hash({})", v.code),
            Type::Struct(_) | Type::Ptr => format!("strada_new_ptr((void *)({}))", v.code),
            other => {
                return Err(CodeGenError::Logic(format!(
                    "cannot box value of type {}",
                    other
                )))
            }
        };
        let name = self.emit_temp(&Type::Scalar, &init)?;
        Ok(CVal::owned(name, Type::Scalar))
    }

    /// A native int64 C expression for a value.
    pub(super) fn to_int(&mut self, v: CVal) -> Result<CVal, CodeGenError> {
        let code = match &v.ty {
            t if t.is_native_int() => v.code,
            t if t.is_native_num() => format!("(int64_t)({})", v.code),
            Type::Scalar => format!("strada_to_int({})", v.code),
            Type::Str => format!("strada_str_to_int({})", v.code),
            other => {
                return Err(CodeGenError::Logic(format!(
                    "cannot use value of type {} as an integer",
                    other
                )))
            }
        };
        Ok(CVal::borrowed(code, Type::Int))
    }

    /// A native double C expression for a value.
    pub(super) fn to_num(&mut self, v: CVal) -> Result<CVal, CodeGenError> {
        let code = match &v.ty {
            t if t.is_native_num() => v.code,
            t if t.is_native_int() => format!("(double)({})", v.code),
            Type::Scalar => format!("strada_to_num({})", v.code),
            Type::Str => format!("strada_str_to_num({})", v.code),
            other => {
                return Err(CodeGenError::Logic(format!(
                    "cannot use value of type {} as a number",
                    other
                )))
            }
        };
        Ok(CVal::borrowed(code, Type::Num))
    }

    /// An owned or borrowed `strada_str *` for a value.
    pub(super) fn to_str_val(&mut self, v: CVal) -> Result<CVal, CodeGenError> {
        let init = match &v.ty {
            Type::Str => return Ok(v),
            t if t.is_native_int() => format!("strada_str_from_int((int64_t)({}))", v.code),
            t if t.is_native_num() => format!("strada_str_from_num({})", v.code),
            Type::Scalar => format!("strada_to_str({})", v.code),
            other => {
                return Err(CodeGenError::Logic(format!(
                    "cannot use value of type {} as a string",
                    other
                )))
            }
        };
        let name = self.emit_temp(&Type::Str, &init)?;
        Ok(CVal::owned(name, Type::Str))
    }

    /// An owned or borrowed `strada_array *` for a value.
    pub(super) fn to_array(&mut self, v: CVal) -> Result<CVal, CodeGenError> {
        match &v.ty {
            Type::Array => Ok(v),
            Type::Scalar => {
                let init = format!("strada_deref_array({})", v.code);
                let name = self.emit_temp(&Type::Array, &init)?;
                Ok(CVal::owned(name, Type::Array))
            }
            other => Err(CodeGenError::Logic(format!(
                "cannot use value of type {} as an array",
                other
            ))),
        }
    }

    /// An owned or borrowed `strada_hash *` for a value.
    pub(super) fn to_hash(&mut self, v: CVal) -> Result<CVal, CodeGenError> {
        match &v.ty {
            Type::Hash => Ok(v),
            Type::Scalar => {
                let init = format!("strada_deref_hash({})", v.code);
                let name = self.emit_temp(&Type::Hash, &init)?;
                Ok(CVal::owned(name, Type::Hash))
            }
            other => Err(CodeGenError::Logic(format!(
                "cannot use value of type {} as a hash",
                other
            ))),
        }
    }

    /// Coerce a value to a declared target type (parameter passing,
    /// variable initialization, returns).
    pub(super) fn coerce(&mut self, v: CVal, target: &Type) -> Result<CVal, CodeGenError> {
        if &v.ty == target {
            return Ok(v);
        }
        match target {
            Type::Scalar => self.to_scalar(v),
            Type::Str => self.to_str_val(v),
            Type::Array => self.to_array(v),
            Type::Hash => self.to_hash(v),
            t if t.is_native_int() => self.to_int(v),
            t if t.is_native_num() => self.to_num(v),
            Type::Struct(name) => match &v.ty {
                Type::Scalar => Ok(CVal::borrowed(
                    format!("({} *)strada_to_ptr({})", name, v.code),
                    target.clone(),
                )),
                _ => Err(CodeGenError::Logic(format!(
                    "cannot convert {} to struct {}",
                    v.ty, name
                ))),
            },
            Type::Ptr => Ok(CVal::borrowed(
                format!("(void *)({})", v.code),
                Type::Ptr,
            )),
            other => Err(CodeGenError::Logic(format!(
                "cannot convert {} to {}",
                v.ty, other
            ))),
        }
    }

    /// A C truth expression for a value.
    pub(super) fn truthy(&mut self, v: CVal) -> Result<String, CodeGenError> {
        let code = match &v.ty {
            t if t.is_native_int() => format!("({})", v.code),
            t if t.is_native_num() => format!("(({}) != 0.0)", v.code),
            Type::Str => format!("strada_str_truthy({})", v.code),
            Type::Scalar => format!("strada_to_bool({})", v.code),
            Type::Array => format!("(strada_array_size({}) > 0)", v.code),
            Type::Hash => format!("(strada_hash_size({}) > 0)", v.code),
            Type::Struct(_) | Type::Ptr => format!("(({}) != NULL)", v.code),
            other => {
                return Err(CodeGenError::Logic(format!(
                    "cannot test value of type {}",
                    other
                )))
            }
        };
        Ok(code)
    }

    pub(super) fn gen_cond(&mut self, e: &Expr) -> Result<String, CodeGenError> {
        let v = self.gen_expr(e)?;
        self.truthy(v)
    }

    // ========================================================================
    // Expression dispatch
    // ========================================================================

    pub(super) fn gen_expr(&mut self, e: &Expr) -> Result<CVal, CodeGenError> {
        match e {
            Expr::IntLit(n) => Ok(CVal::borrowed(format!("INT64_C({})", n), Type::Int)),
            Expr::NumLit(n) => Ok(CVal::borrowed(c_num_lit(*n)?, Type::Num)),
            Expr::StrLit {
                value,
                interpolated,
            } => {
                if *interpolated {
                    let segments = interp::split(value);
                    self.gen_interp(&segments, e.line())
                } else {
                    let segments = interp::split(value);
                    // Un-escape the placeholder form even when nothing
                    // interpolates
                    let text = match segments.as_slice() {
                        [] => String::new(),
                        [Segment::Literal(s)] => s.clone(),
                        _ => value.clone(),
                    };
                    let name = self
                        .emit_temp(&Type::Str, &format!("strada_str_new({})", c_quote(&text)))?;
                    Ok(CVal::owned(name, Type::Str))
                }
            }
            Expr::Command(cmd) => {
                let segments = interp::split(cmd);
                let cmd_str = self.gen_segments_str(&segments, e.line())?;
                let name = self
                    .emit_temp(&Type::Str, &format!("strada_shell({})", cmd_str.code))?;
                Ok(CVal::owned(name, Type::Str))
            }
            Expr::Var { sigil, name, line } => {
                let info = self
                    .lookup_var(*sigil, name)
                    .ok_or_else(|| internal(*line, format!("unresolved variable {}{}", sigil, name)))?
                    .clone();
                Ok(CVal::borrowed(info.c_name, info.ty))
            }
            Expr::Binary { op, lhs, rhs, line } => self.gen_binary(*op, lhs, rhs, *line),
            Expr::Unary { op, operand, line } => self.gen_unary(*op, operand, *line),
            Expr::Assign {
                op,
                target,
                value,
                line,
            } => self.gen_assign(*op, target, value, *line),
            Expr::Ternary {
                cond,
                then_val,
                else_val,
                ..
            } => self.gen_ternary(cond, then_val, else_val),
            Expr::Call {
                name,
                args,
                emitted,
                line,
                ..
            } => self.gen_call(name, emitted, args, *line),
            Expr::IndirectCall { target, args, .. } => {
                let f = self.gen_expr(target)?;
                let f = self.to_scalar(f)?;
                let args_arr = self.gen_args_array(args)?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_call_closure({}, {})", f.code, args_arr),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            Expr::MethodCall {
                recv, method, args, ..
            } => {
                // A func-typed struct field is called through its typed
                // pointer, not the class registry
                if let Type::Struct(sname) = self.expr_type(recv) {
                    let field_ty = self
                        .structs
                        .get(&sname)
                        .and_then(|s| s.fields.iter().find(|f| &f.name == method))
                        .map(|f| f.ty.clone());
                    if let Some(Type::Func { ret, params }) = field_ty {
                        let b = self.gen_expr(recv)?;
                        let mut arg_codes = Vec::with_capacity(args.len());
                        for (arg, param_ty) in args.iter().zip(params.iter()) {
                            let v = self.gen_expr(arg)?;
                            let v = self.coerce(v, param_ty)?;
                            arg_codes.push(v.code);
                        }
                        let call =
                            format!("{}->{}({})", b.code, method, arg_codes.join(", "));
                        return self.finish_call(call, &ret);
                    }
                }

                let obj = self.gen_expr(recv)?;
                let obj = self.to_scalar(obj)?;
                let args_arr = self.gen_args_array(args)?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!(
                        "strada_method_call({}, {}, {})",
                        obj.code,
                        c_quote(method),
                        args_arr
                    ),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            Expr::Index { base, index, .. } | Expr::ArrowIndex { base, index, .. } => {
                let arr = self.gen_expr(base)?;
                let arr = self.to_array(arr)?;
                let idx = self.gen_expr(index)?;
                let idx = self.to_int(idx)?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_array_get({}, {})", arr.code, idx.code),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            Expr::HashKey { base, key, .. } | Expr::ArrowKey { base, key, .. } => {
                let h = self.gen_expr(base)?;
                let h = self.to_hash(h)?;
                let k = self.gen_expr(key)?;
                let k = self.to_str_val(k)?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_hash_get({}, {})", h.code, k.code),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            Expr::Member { base, field, .. } => {
                let base_ty = self.expr_type(base);
                match base_ty {
                    Type::Struct(sname) => {
                        let b = self.gen_expr(base)?;
                        let field_ty = self
                            .structs
                            .get(&sname)
                            .and_then(|s| s.fields.iter().find(|f| &f.name == field))
                            .map(|f| f.ty.clone())
                            .ok_or_else(|| {
                                internal(e.line(), format!("no field '{}' in struct '{}'", field, sname))
                            })?;
                        Ok(CVal::borrowed(
                            format!("{}->{}", b.code, field),
                            field_ty,
                        ))
                    }
                    _ => {
                        // Dynamic base: treat as hash access through a ref
                        let v = self.gen_expr(base)?;
                        let v = self.coerce_scalar_like(v)?;
                        let h = self.to_hash(v)?;
                        let k = self.emit_temp(
                            &Type::Str,
                            &format!("strada_str_new({})", c_quote(field)),
                        )?;
                        let name = self.emit_temp(
                            &Type::Scalar,
                            &format!("strada_hash_get({}, {})", h.code, k),
                        )?;
                        Ok(CVal::owned(name, Type::Scalar))
                    }
                }
            }
            Expr::Ref { kind, operand, line } => self.gen_ref(*kind, operand, *line),
            Expr::FuncRef { emitted, line, .. } => {
                let (thunk, arity) = self.ensure_thunk(emitted, *line)?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_new_closure({}, NULL, {})", thunk, arity),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            Expr::DerefScalar { operand, .. } => {
                let r = self.gen_expr(operand)?;
                let r = self.to_scalar(r)?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_deref_scalar({})", r.code),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            Expr::DerefToArray { operand, .. } => {
                let r = self.gen_expr(operand)?;
                let r = self.to_scalar(r)?;
                let name = self.emit_temp(
                    &Type::Array,
                    &format!("strada_deref_array({})", r.code),
                )?;
                Ok(CVal::owned(name, Type::Array))
            }
            Expr::DerefToHash { operand, .. } => {
                let r = self.gen_expr(operand)?;
                let r = self.to_scalar(r)?;
                let name = self.emit_temp(
                    &Type::Hash,
                    &format!("strada_deref_hash({})", r.code),
                )?;
                Ok(CVal::owned(name, Type::Hash))
            }
            Expr::ArrayLit(elems) => {
                let arr = self.emit_temp(
                    &Type::Array,
                    &format!("strada_array_new({})", elems.len()),
                )?;
                for elem in elems {
                    let v = self.gen_expr(elem)?;
                    let v = self.to_scalar(v)?;
                    self.out(format!("strada_array_push({}, {});", arr, v.code))?;
                }
                Ok(CVal::owned(arr, Type::Array))
            }
            Expr::HashLit(pairs) => {
                let h = self.emit_temp(
                    &Type::Hash,
                    &format!("strada_hash_new({})", pairs.len()),
                )?;
                for (key, value) in pairs {
                    let k = self.gen_expr(key)?;
                    let k = self.to_str_val(k)?;
                    let v = self.gen_expr(value)?;
                    let v = self.to_scalar(v)?;
                    self.out(format!("strada_hash_set({}, {}, {});", h, k.code, v.code))?;
                }
                Ok(CVal::owned(h, Type::Hash))
            }
            Expr::AnonArray(elems) => {
                let arr = self.gen_expr(&Expr::ArrayLit(elems.clone()))?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_new_ref_array({})", arr.code),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            Expr::AnonHash(pairs) => {
                let h = self.gen_expr(&Expr::HashLit(pairs.clone()))?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_new_ref_hash({})", h.code),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            Expr::AnonFunc {
                params, ret, body, ..
            } => self.gen_anon_func(params, ret, body),
            Expr::Clone { operand, .. } => {
                let v = self.gen_expr(operand)?;
                let (f, ty) = match &v.ty {
                    Type::Array => ("strada_array_clone", Type::Array),
                    Type::Hash => ("strada_hash_clone", Type::Hash),
                    Type::Scalar => ("strada_clone", Type::Scalar),
                    Type::Str => ("strada_str_copy", Type::Str),
                    _ => return Ok(v),
                };
                let name = self.emit_temp(&ty, &format!("{}({})", f, v.code))?;
                Ok(CVal::owned(name, ty))
            }
            Expr::Spread { operand, .. } => Err(internal(
                operand.line(),
                "spread outside of an argument list",
            )),
            Expr::Pattern { .. } | Expr::SubstPattern { .. } => Err(internal(
                e.line(),
                "pattern literal outside of a match context",
            )),
        }
    }

    /// Box struct pointers so dynamic member access can deref them; pass
    /// scalars through.
    fn coerce_scalar_like(&mut self, v: CVal) -> Result<CVal, CodeGenError> {
        match v.ty {
            Type::Scalar => Ok(v),
            _ => self.to_scalar(v),
        }
    }

    // ========================================================================
    // Binary operators
    // ========================================================================

    fn gen_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        line: usize,
    ) -> Result<CVal, CodeGenError> {
        match op {
            BinOp::And | BinOp::Or => return self.gen_logical(op, lhs, rhs),
            BinOp::Match | BinOp::NotMatch => return self.gen_match_bind(op, lhs, rhs, line),
            BinOp::Concat => {
                let l = self.gen_expr(lhs)?;
                let l = self.to_str_val(l)?;
                let r = self.gen_expr(rhs)?;
                let r = self.to_str_val(r)?;
                let name = self.emit_temp(
                    &Type::Str,
                    &format!("strada_str_concat({}, {})", l.code, r.code),
                )?;
                return Ok(CVal::owned(name, Type::Str));
            }
            BinOp::Repeat => {
                let l = self.gen_expr(lhs)?;
                let l = self.to_str_val(l)?;
                let r = self.gen_expr(rhs)?;
                let r = self.to_int(r)?;
                let name = self.emit_temp(
                    &Type::Str,
                    &format!("strada_str_repeat({}, {})", l.code, r.code),
                )?;
                return Ok(CVal::owned(name, Type::Str));
            }
            BinOp::Range => {
                let l = self.gen_expr(lhs)?;
                let l = self.to_int(l)?;
                let r = self.gen_expr(rhs)?;
                let r = self.to_int(r)?;
                let name = self.emit_temp(
                    &Type::Array,
                    &format!("strada_range_array({}, {})", l.code, r.code),
                )?;
                return Ok(CVal::owned(name, Type::Array));
            }
            _ => {}
        }

        let lt = self.expr_type(lhs);
        let rt = self.expr_type(rhs);

        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                if lt == Type::Scalar || rt == Type::Scalar {
                    let l = self.gen_expr(lhs)?;
                    let l = self.to_scalar(l)?;
                    let r = self.gen_expr(rhs)?;
                    let r = self.to_scalar(r)?;
                    let f = match op {
                        BinOp::Add => "strada_add",
                        BinOp::Sub => "strada_sub",
                        BinOp::Mul => "strada_mul",
                        BinOp::Div => "strada_div",
                        BinOp::Mod => "strada_mod",
                        BinOp::Pow => "strada_pow",
                        _ => unreachable!(),
                    };
                    let name = self
                        .emit_temp(&Type::Scalar, &format!("{}({}, {})", f, l.code, r.code))?;
                    return Ok(CVal::owned(name, Type::Scalar));
                }

                let as_num = lt.is_native_num()
                    || rt.is_native_num()
                    || lt == Type::Str
                    || rt == Type::Str;
                if as_num {
                    let l = self.gen_expr(lhs)?;
                    let l = self.to_num(l)?;
                    let r = self.gen_expr(rhs)?;
                    let r = self.to_num(r)?;
                    let code = match op {
                        BinOp::Add => format!("(({}) + ({}))", l.code, r.code),
                        BinOp::Sub => format!("(({}) - ({}))", l.code, r.code),
                        BinOp::Mul => format!("(({}) * ({}))", l.code, r.code),
                        BinOp::Div => format!("(({}) / ({}))", l.code, r.code),
                        BinOp::Mod => format!("fmod({}, {})", l.code, r.code),
                        BinOp::Pow => format!("pow({}, {})", l.code, r.code),
                        _ => unreachable!(),
                    };
                    Ok(CVal::borrowed(code, Type::Num))
                } else {
                    let l = self.gen_expr(lhs)?;
                    let l = self.to_int(l)?;
                    let r = self.gen_expr(rhs)?;
                    let r = self.to_int(r)?;
                    let code = match op {
                        BinOp::Add => format!("(({}) + ({}))", l.code, r.code),
                        BinOp::Sub => format!("(({}) - ({}))", l.code, r.code),
                        BinOp::Mul => format!("(({}) * ({}))", l.code, r.code),
                        BinOp::Div => format!("(({}) / ({}))", l.code, r.code),
                        BinOp::Mod => format!("(({}) % ({}))", l.code, r.code),
                        BinOp::Pow => format!("strada_ipow({}, {})", l.code, r.code),
                        _ => unreachable!(),
                    };
                    Ok(CVal::borrowed(code, Type::Int))
                }
            }

            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                if lt == Type::Scalar || rt == Type::Scalar {
                    let l = self.gen_expr(lhs)?;
                    let l = self.to_scalar(l)?;
                    let r = self.gen_expr(rhs)?;
                    let r = self.to_scalar(r)?;
                    let f = match op {
                        BinOp::Eq => "strada_eq",
                        BinOp::Ne => "strada_ne",
                        BinOp::Lt => "strada_lt",
                        BinOp::Gt => "strada_gt",
                        BinOp::Le => "strada_le",
                        BinOp::Ge => "strada_ge",
                        _ => unreachable!(),
                    };
                    return Ok(CVal::borrowed(
                        format!("{}({}, {})", f, l.code, r.code),
                        Type::Int,
                    ));
                }
                let c_op = match op {
                    BinOp::Eq => "==",
                    BinOp::Ne => "!=",
                    BinOp::Lt => "<",
                    BinOp::Gt => ">",
                    BinOp::Le => "<=",
                    BinOp::Ge => ">=",
                    _ => unreachable!(),
                };
                // Numeric comparison: strings convert to numbers first
                if lt == Type::Str || rt == Type::Str || lt.is_native_num() || rt.is_native_num()
                {
                    let l = self.gen_expr(lhs)?;
                    let l = self.to_num(l)?;
                    let r = self.gen_expr(rhs)?;
                    let r = self.to_num(r)?;
                    Ok(CVal::borrowed(
                        format!("(({}) {} ({}))", l.code, c_op, r.code),
                        Type::Int,
                    ))
                } else {
                    let l = self.gen_expr(lhs)?;
                    let l = self.to_int(l)?;
                    let r = self.gen_expr(rhs)?;
                    let r = self.to_int(r)?;
                    Ok(CVal::borrowed(
                        format!("(({}) {} ({}))", l.code, c_op, r.code),
                        Type::Int,
                    ))
                }
            }

            BinOp::StrEq | BinOp::StrNe | BinOp::StrLt | BinOp::StrGt | BinOp::StrLe
            | BinOp::StrGe => {
                let l = self.gen_expr(lhs)?;
                let l = self.to_str_val(l)?;
                let r = self.gen_expr(rhs)?;
                let r = self.to_str_val(r)?;
                let c_op = match op {
                    BinOp::StrEq => "==",
                    BinOp::StrNe => "!=",
                    BinOp::StrLt => "<",
                    BinOp::StrGt => ">",
                    BinOp::StrLe => "<=",
                    BinOp::StrGe => ">=",
                    _ => unreachable!(),
                };
                Ok(CVal::borrowed(
                    format!("(strada_str_cmp({}, {}) {} 0)", l.code, r.code, c_op),
                    Type::Int,
                ))
            }

            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
                let l = self.gen_expr(lhs)?;
                let l = self.to_int(l)?;
                let r = self.gen_expr(rhs)?;
                let r = self.to_int(r)?;
                let c_op = match op {
                    BinOp::BitAnd => "&",
                    BinOp::BitOr => "|",
                    BinOp::BitXor => "^",
                    BinOp::Shl => "<<",
                    BinOp::Shr => ">>",
                    _ => unreachable!(),
                };
                Ok(CVal::borrowed(
                    format!("(({}) {} ({}))", l.code, c_op, r.code),
                    Type::Int,
                ))
            }

            BinOp::And | BinOp::Or | BinOp::Match | BinOp::NotMatch | BinOp::Concat
            | BinOp::Repeat | BinOp::Range => unreachable!("handled above"),
        }
    }

    /// `&&` / `||` with correct short-circuit evaluation of side effects.
    fn gen_logical(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<CVal, CodeGenError> {
        let res = self.fresh_temp();
        self.out(format!("int64_t {} = 0;", res))?;
        let lc = self.gen_cond(lhs)?;
        self.out(format!("{} = ({}) ? 1 : 0;", res, lc))?;
        let guard = match op {
            BinOp::And => format!("if ({})", res),
            BinOp::Or => format!("if (!{})", res),
            _ => unreachable!(),
        };
        self.out(guard)?;
        self.open_block()?;
        self.push_temp_frame();
        let rc = self.gen_cond(rhs)?;
        self.out(format!("{} = ({}) ? 1 : 0;", res, rc))?;
        self.release_temp_frame()?;
        self.close_block()?;
        Ok(CVal::borrowed(res, Type::Int))
    }

    /// `=~` / `!~` with a regex or substitution literal (or a dynamic
    /// pattern expression) on the right.
    fn gen_match_bind(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        line: usize,
    ) -> Result<CVal, CodeGenError> {
        match rhs {
            Expr::Pattern { pattern, flags } => {
                let target = self.gen_match_target(lhs)?;
                let pat = self.gen_pattern_str(pattern, line)?;
                let code = format!(
                    "strada_regex_match({}, {}, {})",
                    target.code,
                    pat.code,
                    c_quote(flags)
                );
                let code = if op == BinOp::NotMatch {
                    format!("(!{})", code)
                } else {
                    code
                };
                Ok(CVal::borrowed(code, Type::Int))
            }
            Expr::SubstPattern {
                pattern,
                replacement,
                flags,
            } => {
                let target = self.gen_subst_target(lhs, line)?;
                let pat = self.gen_pattern_str(pattern, line)?;
                let repl_segments = interp::split(replacement);
                let repl = self.gen_segments_str(&repl_segments, line)?;
                let code = format!(
                    "strada_regex_subst({}, {}, {}, {})",
                    target,
                    pat.code,
                    repl.code,
                    c_quote(flags)
                );
                let code = if op == BinOp::NotMatch {
                    format!("(!{})", code)
                } else {
                    code
                };
                Ok(CVal::borrowed(code, Type::Int))
            }
            // Dynamic pattern: any string-valued expression
            _ => {
                let target = self.gen_match_target(lhs)?;
                let pat = self.gen_expr(rhs)?;
                let pat = self.to_str_val(pat)?;
                let code = format!(
                    "strada_regex_match({}, {}, \"\")",
                    target.code, pat.code
                );
                let code = if op == BinOp::NotMatch {
                    format!("(!{})", code)
                } else {
                    code
                };
                Ok(CVal::borrowed(code, Type::Int))
            }
        }
    }

    fn gen_match_target(&mut self, lhs: &Expr) -> Result<CVal, CodeGenError> {
        let v = self.gen_expr(lhs)?;
        self.to_scalar(v)
    }

    /// An in-place substitution needs the variable's own scalar storage.
    fn gen_subst_target(&mut self, lhs: &Expr, line: usize) -> Result<String, CodeGenError> {
        match lhs {
            Expr::Var {
                sigil: Sigil::Scalar,
                name,
                ..
            } => {
                let info = self
                    .lookup_var(Sigil::Scalar, name)
                    .ok_or_else(|| internal(line, format!("unresolved variable ${}", name)))?;
                if info.ty == Type::Scalar {
                    Ok(info.c_name.clone())
                } else {
                    Err(CodeGenError::Logic(format!(
                        "{}:1: internal error: substitution target '${}' must be a scalar",
                        line, name
                    )))
                }
            }
            _ => Err(internal(line, "substitution target must be a scalar variable")),
        }
    }

    /// Build a `strada_str *` for a regex pattern, interpolating `$var`
    /// where the anchor rule allows.
    pub(super) fn gen_pattern_str(
        &mut self,
        pattern: &str,
        line: usize,
    ) -> Result<CVal, CodeGenError> {
        let segments = interp::split_pattern(pattern);
        self.gen_segments_str(&segments, line)
    }

    // ========================================================================
    // Unary operators
    // ========================================================================

    fn gen_unary(&mut self, op: UnOp, operand: &Expr, line: usize) -> Result<CVal, CodeGenError> {
        match op {
            UnOp::Not => {
                let c = self.gen_cond(operand)?;
                Ok(CVal::borrowed(format!("(!{})", c), Type::Int))
            }
            UnOp::BitNot => {
                let v = self.gen_expr(operand)?;
                let v = self.to_int(v)?;
                Ok(CVal::borrowed(format!("(~({}))", v.code), Type::Int))
            }
            UnOp::Plus => self.gen_expr(operand),
            UnOp::Neg => {
                let v = self.gen_expr(operand)?;
                match &v.ty {
                    Type::Scalar => {
                        let name = self
                            .emit_temp(&Type::Scalar, &format!("strada_neg({})", v.code))?;
                        Ok(CVal::owned(name, Type::Scalar))
                    }
                    t if t.is_native_int() || t.is_native_num() => {
                        Ok(CVal::borrowed(format!("(-({}))", v.code), v.ty))
                    }
                    other => Err(CodeGenError::Logic(format!(
                        "cannot negate value of type {}",
                        other
                    ))),
                }
            }
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                self.gen_incdec(op, operand, line)
            }
        }
    }

    fn gen_incdec(&mut self, op: UnOp, operand: &Expr, line: usize) -> Result<CVal, CodeGenError> {
        let Expr::Var { sigil, name, .. } = operand else {
            return Err(internal(line, "++/-- requires a variable"));
        };
        let info = self
            .lookup_var(*sigil, name)
            .ok_or_else(|| internal(line, format!("unresolved variable {}{}", sigil, name)))?
            .clone();

        if info.ty.is_native_int() || info.ty.is_native_num() {
            let code = match op {
                UnOp::PreInc => format!("(++{})", info.c_name),
                UnOp::PreDec => format!("(--{})", info.c_name),
                UnOp::PostInc => format!("({}++)", info.c_name),
                UnOp::PostDec => format!("({}--)", info.c_name),
                _ => unreachable!(),
            };
            return Ok(CVal::borrowed(code, info.ty));
        }

        if info.ty == Type::Scalar {
            let runtime_op = match op {
                UnOp::PreInc | UnOp::PostInc => "strada_inc",
                UnOp::PreDec | UnOp::PostDec => "strada_dec",
                _ => unreachable!(),
            };
            return match op {
                UnOp::PreInc | UnOp::PreDec => {
                    self.out(format!("{}({});", runtime_op, info.c_name))?;
                    Ok(CVal::borrowed(info.c_name, Type::Scalar))
                }
                UnOp::PostInc | UnOp::PostDec => {
                    let old = self.emit_temp(
                        &Type::Scalar,
                        &format!("strada_copy({})", info.c_name),
                    )?;
                    self.out(format!("{}({});", runtime_op, info.c_name))?;
                    Ok(CVal::owned(old, Type::Scalar))
                }
                _ => unreachable!(),
            };
        }

        Err(CodeGenError::Logic(format!(
            "cannot apply ++/-- to value of type {}",
            info.ty
        )))
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    pub(super) fn gen_assign(
        &mut self,
        op: AssignOp,
        target: &Expr,
        value: &Expr,
        line: usize,
    ) -> Result<CVal, CodeGenError> {
        match target {
            Expr::Var { sigil, name, .. } => {
                let info = self
                    .lookup_var(*sigil, name)
                    .ok_or_else(|| internal(line, format!("unresolved variable {}{}", sigil, name)))?
                    .clone();
                self.gen_var_assign(op, &info.c_name, &info.ty, value)?;
                Ok(CVal::borrowed(info.c_name, info.ty))
            }
            Expr::Index { base, index, .. } | Expr::ArrowIndex { base, index, .. } => {
                let arr = self.gen_expr(base)?;
                let arr = self.to_array(arr)?;
                let idx = self.gen_expr(index)?;
                let idx = self.to_int(idx)?;
                let new = self.gen_element_value(op, value, || {
                    format!("strada_array_get({}, {})", arr.code, idx.code)
                })?;
                self.out(format!(
                    "strada_array_set({}, {}, {});",
                    arr.code, idx.code, new.code
                ))?;
                Ok(new)
            }
            Expr::HashKey { base, key, .. } | Expr::ArrowKey { base, key, .. } => {
                let h = self.gen_expr(base)?;
                let h = self.to_hash(h)?;
                let k = self.gen_expr(key)?;
                let k = self.to_str_val(k)?;
                let new = self.gen_element_value(op, value, || {
                    format!("strada_hash_get({}, {})", h.code, k.code)
                })?;
                self.out(format!(
                    "strada_hash_set({}, {}, {});",
                    h.code, k.code, new.code
                ))?;
                Ok(new)
            }
            Expr::Member { base, field, .. } => {
                let base_ty = self.expr_type(base);
                match base_ty {
                    Type::Struct(sname) => {
                        let b = self.gen_expr(base)?;
                        let field_ty = self
                            .structs
                            .get(&sname)
                            .and_then(|s| s.fields.iter().find(|f| &f.name == field))
                            .map(|f| f.ty.clone())
                            .ok_or_else(|| {
                                internal(line, format!("no field '{}' in struct '{}'", field, sname))
                            })?;
                        let lvalue = format!("{}->{}", b.code, field);
                        self.gen_var_assign(op, &lvalue, &field_ty, value)?;
                        Ok(CVal::borrowed(lvalue, field_ty))
                    }
                    _ => {
                        // Dynamic base: hash field through a ref
                        let v = self.gen_expr(base)?;
                        let v = self.coerce_scalar_like(v)?;
                        let h = self.to_hash(v)?;
                        let k = self.emit_temp(
                            &Type::Str,
                            &format!("strada_str_new({})", c_quote(field)),
                        )?;
                        let new = self.gen_element_value(op, value, || {
                            format!("strada_hash_get({}, {})", h.code, k)
                        })?;
                        self.out(format!(
                            "strada_hash_set({}, {}, {});",
                            h.code, k, new.code
                        ))?;
                        Ok(new)
                    }
                }
            }
            Expr::DerefScalar { operand, .. } => {
                let r = self.gen_expr(operand)?;
                let r = self.to_scalar(r)?;
                let v = self.gen_expr(value)?;
                let v = self.to_scalar(v)?;
                self.out(format!("strada_ref_assign({}, {});", r.code, v.code))?;
                Ok(v)
            }
            _ => Err(internal(line, "invalid assignment target")),
        }
    }

    /// Assign into a named lvalue (`s_x`, `p->field`), handling compound
    /// operators and ownership of the old value.
    fn gen_var_assign(
        &mut self,
        op: AssignOp,
        lvalue: &str,
        ty: &Type,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        match op {
            AssignOp::Assign => {
                // `$p->cb = \&f;` stores the function pointer directly
                if let (Type::Func { .. }, Expr::FuncRef { emitted, .. }) = (ty, value) {
                    self.out(format!("{} = {};", lvalue, emitted))?;
                    return Ok(());
                }
                let v = self.gen_expr(value)?;
                let v = self.coerce(v, ty)?;
                if ty.is_runtime_handle() {
                    let v = self.to_owned_store(v)?;
                    if let Some(call) = release_call(ty, lvalue) {
                        self.out(call)?;
                    }
                    self.out(format!("{} = {};", lvalue, v.code))?;
                } else {
                    self.out(format!("{} = {};", lvalue, v.code))?;
                }
            }
            AssignOp::AddAssign | AssignOp::SubAssign => {
                let c_op = if op == AssignOp::AddAssign { "+" } else { "-" };
                if ty.is_native_int() {
                    let v = self.gen_expr(value)?;
                    let v = self.to_int(v)?;
                    self.out(format!("{} {}= {};", lvalue, c_op, v.code))?;
                } else if ty.is_native_num() {
                    let v = self.gen_expr(value)?;
                    let v = self.to_num(v)?;
                    self.out(format!("{} {}= {};", lvalue, c_op, v.code))?;
                } else if *ty == Type::Scalar {
                    let v = self.gen_expr(value)?;
                    let v = self.to_scalar(v)?;
                    let f = if op == AssignOp::AddAssign {
                        "strada_add"
                    } else {
                        "strada_sub"
                    };
                    let new = self
                        .emit_temp_raw(&Type::Scalar, &format!("{}({}, {})", f, lvalue, v.code))?;
                    self.out(format!("strada_release({});", lvalue))?;
                    self.out(format!("{} = {};", lvalue, new))?;
                } else {
                    return Err(CodeGenError::Logic(format!(
                        "cannot apply {}= to value of type {}",
                        c_op, ty
                    )));
                }
            }
            AssignOp::ConcatAssign => match ty {
                Type::Str => {
                    let v = self.gen_expr(value)?;
                    let v = self.to_str_val(v)?;
                    let new = self.emit_temp_raw(
                        &Type::Str,
                        &format!("strada_str_concat({}, {})", lvalue, v.code),
                    )?;
                    self.out(format!("strada_str_release({});", lvalue))?;
                    self.out(format!("{} = {};", lvalue, new))?;
                }
                Type::Scalar => {
                    let v = self.gen_expr(value)?;
                    let v = self.to_scalar(v)?;
                    let new = self.emit_temp_raw(
                        &Type::Scalar,
                        &format!("strada_concat({}, {})", lvalue, v.code),
                    )?;
                    self.out(format!("strada_release({});", lvalue))?;
                    self.out(format!("{} = {};", lvalue, new))?;
                }
                other => {
                    return Err(CodeGenError::Logic(format!(
                        "cannot apply .= to value of type {}",
                        other
                    )))
                }
            },
        }
        Ok(())
    }

    /// The boxed value stored by an element assignment, applying compound
    /// operators against the current element when needed.
    fn gen_element_value(
        &mut self,
        op: AssignOp,
        value: &Expr,
        current: impl Fn() -> String,
    ) -> Result<CVal, CodeGenError> {
        let v = self.gen_expr(value)?;
        let v = self.to_scalar(v)?;
        match op {
            AssignOp::Assign => Ok(v),
            AssignOp::AddAssign | AssignOp::SubAssign | AssignOp::ConcatAssign => {
                let old = self.emit_temp(&Type::Scalar, &current())?;
                let f = match op {
                    AssignOp::AddAssign => "strada_add",
                    AssignOp::SubAssign => "strada_sub",
                    AssignOp::ConcatAssign => "strada_concat",
                    AssignOp::Assign => unreachable!(),
                };
                let name = self
                    .emit_temp(&Type::Scalar, &format!("{}({}, {})", f, old, v.code))?;
                Ok(CVal::owned(name, Type::Scalar))
            }
        }
    }

    // ========================================================================
    // Ternary
    // ========================================================================

    fn gen_ternary(
        &mut self,
        cond: &Expr,
        then_val: &Expr,
        else_val: &Expr,
    ) -> Result<CVal, CodeGenError> {
        let tt = self.expr_type(then_val);
        let et = self.expr_type(else_val);
        let ty = if tt == et { tt } else { Type::Scalar };

        let res = self.fresh_temp();
        let default = default_c_value(&ty);
        self.out(format!("{} = {};", ty.c_decl(&res), default))?;
        if ty.is_runtime_handle() {
            if let Some(frame) = self.temp_frames.last_mut() {
                frame.push((res.clone(), ty.clone()));
            }
        }

        let c = self.gen_cond(cond)?;
        self.out(format!("if ({})", c))?;
        self.open_block()?;
        self.push_temp_frame();
        let tv = self.gen_expr(then_val)?;
        let tv = self.coerce(tv, &ty)?;
        let tv = if ty.is_runtime_handle() {
            self.to_owned_store(tv)?
        } else {
            tv
        };
        self.out(format!("{} = {};", res, tv.code))?;
        self.release_temp_frame()?;
        self.close_block()?;

        self.out("else")?;
        self.open_block()?;
        self.push_temp_frame();
        let ev = self.gen_expr(else_val)?;
        let ev = self.coerce(ev, &ty)?;
        let ev = if ty.is_runtime_handle() {
            self.to_owned_store(ev)?
        } else {
            ev
        };
        self.out(format!("{} = {};", res, ev.code))?;
        self.release_temp_frame()?;
        self.close_block()?;

        Ok(CVal::borrowed(res, ty))
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn gen_call(
        &mut self,
        name: &str,
        emitted: &str,
        args: &[Expr],
        line: usize,
    ) -> Result<CVal, CodeGenError> {
        if let Some(info) = self.fn_table.get(emitted).cloned() {
            return self.gen_user_call(emitted, &info.params, &info.ret, info.variadic, args, line);
        }
        if emitted == name && crate::semantic::is_builtin(name) {
            return self.gen_builtin_call(name, args, line);
        }
        // Foreign package call: scalar-based cross-module ABI
        self.foreign.insert(emitted.to_string(), args.len());
        let mut arg_codes = Vec::with_capacity(args.len());
        for arg in args {
            let v = self.gen_expr(arg)?;
            let v = self.to_scalar(v)?;
            arg_codes.push(v.code);
        }
        let call = format!("{}({})", emitted, arg_codes.join(", "));
        let res = self.emit_temp(&Type::Scalar, &call)?;
        Ok(CVal::owned(res, Type::Scalar))
    }

    fn gen_user_call(
        &mut self,
        emitted: &str,
        params: &[crate::ast::Param],
        ret: &Type,
        variadic: bool,
        args: &[Expr],
        line: usize,
    ) -> Result<CVal, CodeGenError> {
        let (positional, spread) = split_spread(args);
        let mut arg_codes: Vec<String> = Vec::with_capacity(params.len());

        let fixed_count = if variadic {
            params.len() - 1
        } else {
            params.len()
        };

        for (i, param) in params.iter().take(fixed_count).enumerate() {
            let v = if i < positional.len() {
                self.gen_expr(positional[i])?
            } else if let Some(default) = &param.default {
                self.gen_expr(default)?
            } else {
                return Err(internal(
                    line,
                    format!("missing argument {} in call to '{}'", i + 1, emitted),
                ));
            };
            let v = self.coerce(v, &param.ty)?;
            arg_codes.push(v.code);
        }

        if variadic {
            let tail = self.emit_temp(
                &Type::Array,
                &format!(
                    "strada_array_new({})",
                    positional.len().saturating_sub(fixed_count)
                ),
            )?;
            for arg in positional.iter().skip(fixed_count) {
                let v = self.gen_expr(arg)?;
                let v = self.to_scalar(v)?;
                self.out(format!("strada_array_push({}, {});", tail, v.code))?;
            }
            if let Some(spread_expr) = spread {
                let sv = self.gen_expr(spread_expr)?;
                let sv = self.to_array(sv)?;
                self.out(format!("strada_array_append_all({}, {});", tail, sv.code))?;
            }
            arg_codes.push(tail);
        } else if let Some(spread_expr) = spread {
            // Spreading into fixed parameters is not statically expressible
            return Err(internal(
                spread_expr.line(),
                format!("cannot spread into non-variadic function '{}'", emitted),
            ));
        }

        let call = format!("{}({})", emitted, arg_codes.join(", "));
        self.finish_call(call, ret)
    }

    /// Emit a call expression with the right temp/ownership handling for
    /// its return type.
    pub(super) fn finish_call(&mut self, call: String, ret: &Type) -> Result<CVal, CodeGenError> {
        if *ret == Type::Void {
            self.out(format!("{};", call))?;
            return Ok(CVal::borrowed("0", Type::Void));
        }
        if ret.is_runtime_handle() {
            let name = self.emit_temp(ret, &call)?;
            return Ok(CVal::owned(name, ret.clone()));
        }
        // Native and struct returns can stay inline; bind to a temp so the
        // call happens exactly once in statement order.
        let name = self.emit_temp_raw(ret, &call)?;
        Ok(CVal::borrowed(name, ret.clone()))
    }

    /// Box every argument into a runtime array (closure and method calls).
    pub(super) fn gen_args_array(&mut self, args: &[Expr]) -> Result<String, CodeGenError> {
        let (positional, spread) = split_spread(args);
        let arr = self.emit_temp(
            &Type::Array,
            &format!("strada_array_new({})", positional.len()),
        )?;
        for arg in positional {
            let v = self.gen_expr(arg)?;
            let v = self.to_scalar(v)?;
            self.out(format!("strada_array_push({}, {});", arr, v.code))?;
        }
        if let Some(spread_expr) = spread {
            let sv = self.gen_expr(spread_expr)?;
            let sv = self.to_array(sv)?;
            self.out(format!("strada_array_append_all({}, {});", arr, sv.code))?;
        }
        Ok(arr)
    }

    // ========================================================================
    // String interpolation
    // ========================================================================

    /// Build a `strada_str *` from interpolation segments.
    pub(super) fn gen_segments_str(
        &mut self,
        segments: &[Segment],
        line: usize,
    ) -> Result<CVal, CodeGenError> {
        if segments.is_empty() {
            let name = self.emit_temp(&Type::Str, "strada_str_new(\"\")")?;
            return Ok(CVal::owned(name, Type::Str));
        }
        if let [Segment::Literal(text)] = segments {
            let name = self
                .emit_temp(&Type::Str, &format!("strada_str_new({})", c_quote(text)))?;
            return Ok(CVal::owned(name, Type::Str));
        }

        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            match segment {
                Segment::Literal(text) => {
                    let name = self
                        .emit_temp(&Type::Str, &format!("strada_str_new({})", c_quote(text)))?;
                    parts.push(name);
                }
                Segment::Var { sigil, name } => {
                    let info = self
                        .lookup_var(*sigil, name)
                        .ok_or_else(|| {
                            internal(line, format!("unresolved variable {}{} in string", sigil, name))
                        })?
                        .clone();
                    let v = CVal::borrowed(info.c_name, info.ty.clone());
                    let s = match info.ty {
                        // Arrays interpolate space-joined
                        Type::Array => {
                            let sep = self.emit_temp(&Type::Str, "strada_str_new(\" \")")?;
                            let name = self.emit_temp(
                                &Type::Str,
                                &format!("strada_join({}, {})", sep, v.code),
                            )?;
                            CVal::owned(name, Type::Str)
                        }
                        _ => self.to_str_val(v)?,
                    };
                    parts.push(s.code);
                }
            }
        }
        let name = self.emit_temp(
            &Type::Str,
            &format!(
                "strada_str_build({}, {})",
                parts.len(),
                parts.join(", ")
            ),
        )?;
        Ok(CVal::owned(name, Type::Str))
    }

    fn gen_interp(&mut self, segments: &[Segment], line: usize) -> Result<CVal, CodeGenError> {
        self.gen_segments_str(segments, line)
    }

    // ========================================================================
    // References
    // ========================================================================

    fn gen_ref(
        &mut self,
        kind: RefKind,
        operand: &Expr,
        line: usize,
    ) -> Result<CVal, CodeGenError> {
        match (kind, operand) {
            (RefKind::Scalar, Expr::Var { sigil: Sigil::Scalar, name, .. }) => {
                let info = self
                    .lookup_var(Sigil::Scalar, name)
                    .ok_or_else(|| internal(line, format!("unresolved variable ${}", name)))?
                    .clone();
                if info.ty != Type::Scalar {
                    return Err(CodeGenError::Logic(format!(
                        "{}:1: internal error: can only take a scalar reference to a scalar variable, '${}' is {}",
                        line, name, info.ty
                    )));
                }
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_new_ref_scalar(&{})", info.c_name),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            (RefKind::Array, _) => {
                let v = self.gen_expr(operand)?;
                let v = self.to_array(v)?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_new_ref_array({})", v.code),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            (RefKind::Hash, _) => {
                let v = self.gen_expr(operand)?;
                let v = self.to_hash(v)?;
                let name = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_new_ref_hash({})", v.code),
                )?;
                Ok(CVal::owned(name, Type::Scalar))
            }
            (RefKind::Scalar, _) => Err(internal(
                line,
                "can only take a scalar reference to a named scalar variable",
            )),
        }
    }
}

impl CodeGen {
    // ========================================================================
    // Builtins
    // ========================================================================

    /// Lower a builtin call to its runtime entry point.
    /// IMPORTANT: keep in sync with the arity table in the semantic pass
    /// and the entry-point table in `runtime.rs`.
    pub(super) fn gen_builtin_call(
        &mut self,
        name: &str,
        args: &[Expr],
        line: usize,
    ) -> Result<CVal, CodeGenError> {
        match name {
            "say" | "print" | "warn" => {
                let f = match name {
                    "say" => "strada_say",
                    "print" => "strada_print",
                    _ => "strada_warn",
                };
                let mut parts = Vec::with_capacity(args.len());
                for arg in args {
                    let v = self.gen_expr(arg)?;
                    let v = self.to_scalar(v)?;
                    parts.push(v.code);
                }
                if parts.is_empty() {
                    self.out(format!("{}(0);", f))?;
                } else {
                    self.out(format!("{}({}, {});", f, parts.len(), parts.join(", ")))?;
                }
                Ok(CVal::borrowed("0", Type::Void))
            }
            "push" | "unshift" => {
                let arr = self.gen_expr(&args[0])?;
                let arr = self.to_array(arr)?;
                let f = if name == "push" {
                    "strada_array_push"
                } else {
                    "strada_array_unshift"
                };
                let values = &args[1..];
                // unshift keeps argument order at the front
                let ordered: Vec<&Expr> = if name == "unshift" {
                    values.iter().rev().collect()
                } else {
                    values.iter().collect()
                };
                for value in ordered {
                    let v = self.gen_expr(value)?;
                    let v = self.to_scalar(v)?;
                    self.out(format!("{}({}, {});", f, arr.code, v.code))?;
                }
                Ok(CVal::borrowed("0", Type::Void))
            }
            "pop" | "shift" => {
                let arr = self.gen_expr(&args[0])?;
                let arr = self.to_array(arr)?;
                let f = if name == "pop" {
                    "strada_array_pop"
                } else {
                    "strada_array_shift"
                };
                let res = self.emit_temp(&Type::Scalar, &format!("{}({})", f, arr.code))?;
                Ok(CVal::owned(res, Type::Scalar))
            }
            "size" => {
                let v = self.gen_expr(&args[0])?;
                let code = match &v.ty {
                    Type::Array => format!("strada_array_size({})", v.code),
                    Type::Hash => format!("strada_hash_size({})", v.code),
                    Type::Str => format!("strada_str_size({})", v.code),
                    Type::Scalar => format!("strada_size({})", v.code),
                    other => {
                        return Err(CodeGenError::Logic(format!(
                            "cannot take size of value of type {}",
                            other
                        )))
                    }
                };
                Ok(CVal::borrowed(code, Type::Int))
            }
            "keys" | "values" => {
                let h = self.gen_expr(&args[0])?;
                let h = self.to_hash(h)?;
                let f = if name == "keys" {
                    "strada_hash_keys"
                } else {
                    "strada_hash_values"
                };
                let res = self.emit_temp(&Type::Array, &format!("{}({})", f, h.code))?;
                Ok(CVal::owned(res, Type::Array))
            }
            "exists" => {
                let h = self.gen_expr(&args[0])?;
                let h = self.to_hash(h)?;
                let k = self.gen_expr(&args[1])?;
                let k = self.to_str_val(k)?;
                Ok(CVal::borrowed(
                    format!("strada_hash_exists({}, {})", h.code, k.code),
                    Type::Int,
                ))
            }
            "delete" => {
                let h = self.gen_expr(&args[0])?;
                let h = self.to_hash(h)?;
                let k = self.gen_expr(&args[1])?;
                let k = self.to_str_val(k)?;
                self.out(format!("strada_hash_delete({}, {});", h.code, k.code))?;
                Ok(CVal::borrowed("0", Type::Void))
            }
            "join" => {
                let sep = self.gen_expr(&args[0])?;
                let sep = self.to_str_val(sep)?;
                let arr = self.gen_expr(&args[1])?;
                let arr = self.to_array(arr)?;
                let res = self.emit_temp(
                    &Type::Str,
                    &format!("strada_join({}, {})", sep.code, arr.code),
                )?;
                Ok(CVal::owned(res, Type::Str))
            }
            "split" => {
                let (pat, flags) = match &args[0] {
                    Expr::Pattern { pattern, flags } => {
                        (self.gen_pattern_str(pattern, line)?, flags.clone())
                    }
                    other => {
                        let v = self.gen_expr(other)?;
                        (self.to_str_val(v)?, String::new())
                    }
                };
                let s = self.gen_expr(&args[1])?;
                let s = self.to_str_val(s)?;
                let limit = if let Some(limit_expr) = args.get(2) {
                    let v = self.gen_expr(limit_expr)?;
                    self.to_int(v)?.code
                } else {
                    "-1".to_string()
                };
                let res = self.emit_temp(
                    &Type::Array,
                    &format!(
                        "strada_split({}, {}, {}, {})",
                        pat.code,
                        c_quote(&flags),
                        s.code,
                        limit
                    ),
                )?;
                Ok(CVal::owned(res, Type::Array))
            }
            "sprintf" => {
                let fmt = self.gen_expr(&args[0])?;
                let fmt = self.to_str_val(fmt)?;
                let mut parts = Vec::with_capacity(args.len() - 1);
                for arg in &args[1..] {
                    let v = self.gen_expr(arg)?;
                    let v = self.to_scalar(v)?;
                    parts.push(v.code);
                }
                let call = if parts.is_empty() {
                    format!("strada_sprintf({}, 0)", fmt.code)
                } else {
                    format!(
                        "strada_sprintf({}, {}, {})",
                        fmt.code,
                        parts.len(),
                        parts.join(", ")
                    )
                };
                let res = self.emit_temp(&Type::Str, &call)?;
                Ok(CVal::owned(res, Type::Str))
            }
            "captures" => {
                if let Some(index) = args.first() {
                    let i = self.gen_expr(index)?;
                    let i = self.to_int(i)?;
                    let res = self.emit_temp(
                        &Type::Scalar,
                        &format!("strada_regex_capture({})", i.code),
                    )?;
                    Ok(CVal::owned(res, Type::Scalar))
                } else {
                    let res = self.emit_temp(&Type::Array, "strada_regex_captures()")?;
                    Ok(CVal::owned(res, Type::Array))
                }
            }
            "bless" => {
                let v = self.gen_expr(&args[0])?;
                let v = self.to_scalar(v)?;
                let class = self.gen_expr(&args[1])?;
                let class = self.to_str_val(class)?;
                let res = self.emit_temp(
                    &Type::Scalar,
                    &format!("strada_bless({}, {})", v.code, class.code),
                )?;
                Ok(CVal::owned(res, Type::Scalar))
            }
            "isa" | "can" => {
                let v = self.gen_expr(&args[0])?;
                let v = self.to_scalar(v)?;
                let s = self.gen_expr(&args[1])?;
                let s = self.to_str_val(s)?;
                let f = if name == "isa" { "strada_isa" } else { "strada_can" };
                Ok(CVal::borrowed(
                    format!("{}({}, {})", f, v.code, s.code),
                    Type::Int,
                ))
            }
            "slurp" => {
                let path = self.gen_expr(&args[0])?;
                let path = self.to_str_val(path)?;
                let res = self
                    .emit_temp(&Type::Str, &format!("strada_slurp({})", path.code))?;
                Ok(CVal::owned(res, Type::Str))
            }
            "spew" => {
                let path = self.gen_expr(&args[0])?;
                let path = self.to_str_val(path)?;
                let content = self.gen_expr(&args[1])?;
                let content = self.to_str_val(content)?;
                self.out(format!("strada_spew({}, {});", path.code, content.code))?;
                Ok(CVal::borrowed("0", Type::Void))
            }
            "chomp" => {
                let v = self.gen_expr(&args[0])?;
                match &v.ty {
                    Type::Str => self.out(format!("strada_str_chomp({});", v.code))?,
                    Type::Scalar => self.out(format!("strada_chomp({});", v.code))?,
                    other => {
                        return Err(CodeGenError::Logic(format!(
                            "cannot chomp value of type {}",
                            other
                        )))
                    }
                }
                Ok(CVal::borrowed("0", Type::Void))
            }
            "lc" | "uc" => {
                let s = self.gen_expr(&args[0])?;
                let s = self.to_str_val(s)?;
                let f = if name == "lc" {
                    "strada_str_lc"
                } else {
                    "strada_str_uc"
                };
                let res = self.emit_temp(&Type::Str, &format!("{}({})", f, s.code))?;
                Ok(CVal::owned(res, Type::Str))
            }
            "length" => {
                let s = self.gen_expr(&args[0])?;
                let s = self.to_str_val(s)?;
                Ok(CVal::borrowed(
                    format!("strada_str_size({})", s.code),
                    Type::Int,
                ))
            }
            "substr" => {
                let s = self.gen_expr(&args[0])?;
                let s = self.to_str_val(s)?;
                let off = self.gen_expr(&args[1])?;
                let off = self.to_int(off)?;
                let len = if let Some(len_expr) = args.get(2) {
                    let v = self.gen_expr(len_expr)?;
                    self.to_int(v)?.code
                } else {
                    "-1".to_string()
                };
                let res = self.emit_temp(
                    &Type::Str,
                    &format!("strada_str_substr({}, {}, {})", s.code, off.code, len),
                )?;
                Ok(CVal::owned(res, Type::Str))
            }
            "index" => {
                let s = self.gen_expr(&args[0])?;
                let s = self.to_str_val(s)?;
                let needle = self.gen_expr(&args[1])?;
                let needle = self.to_str_val(needle)?;
                let from = if let Some(from_expr) = args.get(2) {
                    let v = self.gen_expr(from_expr)?;
                    self.to_int(v)?.code
                } else {
                    "0".to_string()
                };
                Ok(CVal::borrowed(
                    format!(
                        "strada_str_index({}, {}, {})",
                        s.code, needle.code, from
                    ),
                    Type::Int,
                ))
            }
            "defined" => {
                let v = self.gen_expr(&args[0])?;
                let v = self.to_scalar(v)?;
                Ok(CVal::borrowed(
                    format!("strada_defined({})", v.code),
                    Type::Int,
                ))
            }
            "undef" => {
                let res = self.emit_temp(&Type::Scalar, "strada_new_undef()")?;
                Ok(CVal::owned(res, Type::Scalar))
            }
            "exit" => {
                let code = if let Some(code_expr) = args.first() {
                    let v = self.gen_expr(code_expr)?;
                    self.to_int(v)?.code
                } else {
                    "0".to_string()
                };
                self.out(format!("strada_exit({});", code))?;
                Ok(CVal::borrowed("0", Type::Void))
            }
            "system" => {
                let cmd = self.gen_expr(&args[0])?;
                let cmd = self.to_str_val(cmd)?;
                Ok(CVal::borrowed(
                    format!("strada_system({})", cmd.code),
                    Type::Int,
                ))
            }
            "sort" | "reverse" => {
                let arr = self.gen_expr(&args[0])?;
                let arr = self.to_array(arr)?;
                let f = if name == "sort" {
                    "strada_array_sort"
                } else {
                    "strada_array_reverse"
                };
                let res = self.emit_temp(&Type::Array, &format!("{}({})", f, arr.code))?;
                Ok(CVal::owned(res, Type::Array))
            }
            "abs" => {
                let v = self.gen_expr(&args[0])?;
                match &v.ty {
                    t if t.is_native_num() => {
                        Ok(CVal::borrowed(format!("fabs({})", v.code), Type::Num))
                    }
                    t if t.is_native_int() => Ok(CVal::borrowed(
                        format!("strada_iabs({})", v.code),
                        Type::Int,
                    )),
                    Type::Scalar => {
                        let res = self
                            .emit_temp(&Type::Scalar, &format!("strada_abs({})", v.code))?;
                        Ok(CVal::owned(res, Type::Scalar))
                    }
                    other => Err(CodeGenError::Logic(format!(
                        "cannot take abs of value of type {}",
                        other
                    ))),
                }
            }
            "int" => {
                let v = self.gen_expr(&args[0])?;
                self.to_int(v)
            }
            "num" => {
                let v = self.gen_expr(&args[0])?;
                self.to_num(v)
            }
            "str" => {
                let v = self.gen_expr(&args[0])?;
                self.to_str_val(v)
            }
            other => Err(internal(line, format!("unknown builtin '{}'", other))),
        }
    }
}

/// Split an argument list into positional arguments and an optional final
/// spread.
fn split_spread(args: &[Expr]) -> (Vec<&Expr>, Option<&Expr>) {
    let mut positional = Vec::with_capacity(args.len());
    let mut spread = None;
    for (i, arg) in args.iter().enumerate() {
        if let Expr::Spread { operand, .. } = arg {
            if i + 1 == args.len() {
                spread = Some(operand.as_ref());
                continue;
            }
        }
        positional.push(arg);
    }
    (positional, spread)
}

/// Zero value for a C declaration of the given type.
pub(super) fn default_c_value(ty: &Type) -> &'static str {
    if ty.is_native_num() {
        "0.0"
    } else if ty.is_native_int() {
        "0"
    } else {
        "NULL"
    }
}
