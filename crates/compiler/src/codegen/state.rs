//! CodeGen state and core types
//!
//! The `CodeGen` struct owns the output buffers (current function body,
//! finished functions, lifted lambdas/thunks, module-init lines), the
//! lexical scope stack with per-block release lists, the per-statement
//! temporary frames, and the symbol tables frozen by the semantic pass.

use crate::ast::{Param, Program, StructDef};
use crate::config::CompilerConfig;
use crate::types::{Sigil, Type};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use super::error::CodeGenError;

/// A lowered C value: either an inline C expression (native types, borrowed
/// variables) or the name of a temporary holding a +1 reference.
#[derive(Debug, Clone)]
pub(super) struct CVal {
    pub code: String,
    pub ty: Type,
    /// True when `code` names a temporary we must release or move
    pub owned: bool,
}

impl CVal {
    pub fn borrowed(code: impl Into<String>, ty: Type) -> Self {
        CVal {
            code: code.into(),
            ty,
            owned: false,
        }
    }

    pub fn owned(code: impl Into<String>, ty: Type) -> Self {
        CVal {
            code: code.into(),
            ty,
            owned: true,
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct VarInfo {
    pub c_name: String,
    pub ty: Type,
}

#[derive(Debug, Default)]
pub(super) struct Scope {
    pub vars: HashMap<(Sigil, String), VarInfo>,
    /// Block locals to release at scope exit, in declaration order
    pub owned: Vec<(String, Type)>,
}

/// Context for one lexically enclosing loop.
#[derive(Debug)]
pub(super) struct LoopCtx {
    pub label: Option<String>,
    /// Generated C label placed after the loop, for `last LABEL`
    pub brk: String,
    /// Generated C label at the continue point, for `next`
    pub cont: String,
    pub used_brk: bool,
    pub used_cont: bool,
    /// Scope depth at loop entry; jumps release scopes deeper than this
    pub scope_depth: usize,
}

/// Signature info codegen needs about a callable, keyed by emitted name.
#[derive(Debug, Clone)]
pub(super) struct FnInfo {
    pub params: Vec<Param>,
    pub ret: Type,
    pub variadic: bool,
}

pub struct CodeGen {
    pub(super) config: CompilerConfig,
    /// Body of the function currently being generated
    pub(super) body: String,
    /// Finished function definitions
    pub(super) funcs_out: String,
    /// Lifted lambdas, capture-environment typedefs, and funcref thunks
    pub(super) lifted: String,
    /// Registration calls for the module init hook
    pub(super) init_lines: Vec<String>,
    pub(super) scopes: Vec<Scope>,
    /// Per-statement temporary frames; nested frames cover branch arms
    pub(super) temp_frames: Vec<Vec<(String, Type)>>,
    pub(super) loops: Vec<LoopCtx>,
    pub(super) structs: HashMap<String, StructDef>,
    pub(super) fn_table: HashMap<String, FnInfo>,
    /// Funcref thunks already lifted, by emitted function name
    pub(super) thunks: HashSet<String>,
    /// Calls into `use`d foreign packages: emitted name → arity. These get
    /// scalar-ABI forward declarations.
    pub(super) foreign: HashMap<String, usize>,
    /// Boxed return type of the lambda being generated, if any
    pub(super) lambda_ret: Option<Type>,
    pub(super) current_ret: Type,
    pub(super) indent: usize,
    temp_counter: usize,
    label_counter: usize,
    pub(super) env_counter: usize,
}

impl CodeGen {
    pub fn new(program: &Program, config: CompilerConfig) -> Self {
        let structs = program
            .structs
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();
        let fn_table = program
            .functions
            .iter()
            .map(|f| {
                (
                    f.emitted_name.clone(),
                    FnInfo {
                        params: f.params.clone(),
                        ret: f.ret.clone(),
                        variadic: f.is_variadic(),
                    },
                )
            })
            .collect();
        CodeGen {
            config,
            body: String::new(),
            funcs_out: String::new(),
            lifted: String::new(),
            init_lines: Vec::new(),
            scopes: Vec::new(),
            temp_frames: Vec::new(),
            loops: Vec::new(),
            structs,
            fn_table,
            thunks: HashSet::new(),
            foreign: HashMap::new(),
            lambda_ret: None,
            current_ret: Type::Void,
            indent: 0,
            temp_counter: 0,
            label_counter: 0,
            env_counter: 0,
        }
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Write one indented line into the current function body.
    pub(super) fn out(&mut self, line: impl AsRef<str>) -> Result<(), CodeGenError> {
        for _ in 0..self.indent {
            write!(&mut self.body, "    ")?;
        }
        writeln!(&mut self.body, "{}", line.as_ref())?;
        Ok(())
    }

    pub(super) fn open_block(&mut self) -> Result<(), CodeGenError> {
        self.out("{")?;
        self.indent += 1;
        Ok(())
    }

    pub(super) fn close_block(&mut self) -> Result<(), CodeGenError> {
        self.indent -= 1;
        self.out("}")
    }

    pub(super) fn fresh_temp(&mut self) -> String {
        let name = format!("t{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    pub(super) fn fresh_label(&mut self, prefix: &str) -> String {
        let name = format!("{}_{}", prefix, self.label_counter);
        self.label_counter += 1;
        name
    }

    // ========================================================================
    // Temporaries
    // ========================================================================

    pub(super) fn push_temp_frame(&mut self) {
        self.temp_frames.push(Vec::new());
    }

    /// Release every temporary in the top frame and pop it.
    pub(super) fn release_temp_frame(&mut self) -> Result<(), CodeGenError> {
        if let Some(frame) = self.temp_frames.pop() {
            for (name, ty) in frame.iter().rev() {
                if let Some(call) = release_call(ty, name) {
                    self.out(call)?;
                }
            }
        }
        Ok(())
    }

    /// Bind `init` to a fresh temporary registered for end-of-statement
    /// release, and return its name.
    pub(super) fn emit_temp(&mut self, ty: &Type, init: &str) -> Result<String, CodeGenError> {
        let name = self.emit_temp_raw(ty, init)?;
        if ty.is_runtime_handle() {
            if let Some(frame) = self.temp_frames.last_mut() {
                frame.push((name.clone(), ty.clone()));
            }
        }
        Ok(name)
    }

    /// Bind `init` to a fresh temporary the caller owns outright (no
    /// automatic release).
    pub(super) fn emit_temp_raw(&mut self, ty: &Type, init: &str) -> Result<String, CodeGenError> {
        let name = self.fresh_temp();
        self.out(format!("{} = {};", ty.c_decl(&name), init))?;
        Ok(name)
    }

    /// Remove a temporary from the release frames (ownership was moved).
    pub(super) fn take_temp(&mut self, name: &str) {
        for frame in self.temp_frames.iter_mut().rev() {
            if let Some(pos) = frame.iter().position(|(n, _)| n == name) {
                frame.remove(pos);
                return;
            }
        }
    }

    /// Turn a value into one the caller owns outright: owned temporaries
    /// are moved out of their frame, borrowed handles are copied.
    pub(super) fn to_owned_store(&mut self, val: CVal) -> Result<CVal, CodeGenError> {
        if !val.ty.is_runtime_handle() {
            return Ok(val);
        }
        if val.owned {
            self.take_temp(&val.code);
            return Ok(val);
        }
        let copy = copy_call(&val.ty, &val.code).ok_or_else(|| {
            CodeGenError::Logic(format!("cannot copy value of type {}", val.ty))
        })?;
        let name = self.emit_temp_raw(&val.ty.clone(), &copy)?;
        Ok(CVal::owned(name, val.ty))
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    pub(super) fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Emit releases for the top scope's block locals and pop it.
    pub(super) fn pop_scope_releases(&mut self) -> Result<(), CodeGenError> {
        if let Some(scope) = self.scopes.pop() {
            for (name, ty) in scope.owned.iter().rev() {
                if let Some(call) = release_call(ty, name) {
                    self.out(call)?;
                }
            }
        }
        Ok(())
    }

    /// Emit releases for every scope deeper than `depth`, without popping.
    /// Used ahead of `last`/`next` jumps out of loop bodies.
    pub(super) fn emit_releases_from(&mut self, depth: usize) -> Result<(), CodeGenError> {
        let pending: Vec<(String, Type)> = self
            .scopes
            .iter()
            .skip(depth)
            .rev()
            .flat_map(|scope| scope.owned.iter().rev().cloned())
            .collect();
        for (name, ty) in pending {
            if let Some(call) = release_call(&ty, &name) {
                self.out(call)?;
            }
        }
        Ok(())
    }

    /// Emit releases for every live scope, skipping `keep` (the value being
    /// returned). Used ahead of `return`.
    pub(super) fn emit_all_releases_except(&mut self, keep: &str) -> Result<(), CodeGenError> {
        let pending: Vec<(String, Type)> = self
            .scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.owned.iter().rev().cloned())
            .collect();
        for (name, ty) in pending {
            if name == keep {
                continue;
            }
            if let Some(call) = release_call(&ty, &name) {
                self.out(call)?;
            }
        }
        Ok(())
    }

    pub(super) fn declare_var(
        &mut self,
        sigil: Sigil,
        name: &str,
        ty: Type,
        owned_local: bool,
    ) -> VarInfo {
        let base = c_var_name(sigil, name);
        let c_name = self.unique_c_name(base);
        let info = VarInfo {
            c_name: c_name.clone(),
            ty: ty.clone(),
        };
        if let Some(scope) = self.scopes.last_mut() {
            if owned_local && ty.is_runtime_handle() {
                scope.owned.push((c_name, ty));
            }
            scope.vars.insert((sigil, name.to_string()), info.clone());
        }
        info
    }

    /// C forbids redeclaring a name within one block; suffix on collision.
    fn unique_c_name(&mut self, base: String) -> String {
        let clash = self
            .scopes
            .last()
            .is_some_and(|scope| scope.vars.values().any(|v| v.c_name == base));
        if clash {
            let n = self.temp_counter;
            self.temp_counter += 1;
            format!("{}_{}", base, n)
        } else {
            base
        }
    }

    pub(super) fn lookup_var(&self, sigil: Sigil, name: &str) -> Option<&VarInfo> {
        let key = (sigil, name.to_string());
        self.scopes.iter().rev().find_map(|scope| scope.vars.get(&key))
    }

    // ========================================================================
    // Loops
    // ========================================================================

    pub(super) fn push_loop(&mut self, label: Option<String>) -> usize {
        let brk = self.fresh_label("brk");
        let cont = self.fresh_label("cont");
        self.loops.push(LoopCtx {
            label,
            brk,
            cont,
            used_brk: false,
            used_cont: false,
            scope_depth: self.scopes.len(),
        });
        self.loops.len() - 1
    }

    pub(super) fn pop_loop(&mut self) -> LoopCtx {
        self.loops.pop().expect("loop stack underflow")
    }

    /// The loop targeted by `last LABEL` / `next LABEL`, or the innermost.
    pub(super) fn find_loop(&mut self, label: Option<&str>) -> Option<usize> {
        match label {
            None => {
                if self.loops.is_empty() {
                    None
                } else {
                    Some(self.loops.len() - 1)
                }
            }
            Some(want) => self
                .loops
                .iter()
                .rposition(|l| l.label.as_deref() == Some(want)),
        }
    }
}

// ============================================================================
// Naming and literals
// ============================================================================

/// C variable name for a sigil-qualified Strada variable. The sigil keeps
/// `$x`, `@x` and `%x` distinct in the emitted code.
pub(super) fn c_var_name(sigil: Sigil, name: &str) -> String {
    match sigil {
        Sigil::Scalar => format!("s_{}", name),
        Sigil::Array => format!("a_{}", name),
        Sigil::Hash => format!("h_{}", name),
    }
}

/// The release entry point for a handle type, as a full statement.
pub(super) fn release_call(ty: &Type, name: &str) -> Option<String> {
    let f = match ty {
        Type::Scalar => "strada_release",
        Type::Str => "strada_str_release",
        Type::Array => "strada_array_release",
        Type::Hash => "strada_hash_release",
        _ => return None,
    };
    Some(format!("{}({});", f, name))
}

/// The value-copy entry point for a handle type, as a C expression.
pub(super) fn copy_call(ty: &Type, code: &str) -> Option<String> {
    let f = match ty {
        Type::Scalar => "strada_copy",
        Type::Str => "strada_str_copy",
        Type::Array => "strada_array_copy",
        Type::Hash => "strada_hash_copy",
        _ => return None,
    };
    Some(format!("{}({})", f, code))
}

/// Quote a Rust string as a C string literal.
pub(super) fn c_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    out.push('"');
    out
}

/// A C double literal for a lexed floating value.
pub(super) fn c_num_lit(value: f64) -> Result<String, CodeGenError> {
    if !value.is_finite() {
        return Err(CodeGenError::Logic(format!(
            "numeric literal {} is not representable",
            value
        )));
    }
    Ok(format!("{:?}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_var_names_keep_sigils_distinct() {
        assert_eq!(c_var_name(Sigil::Scalar, "x"), "s_x");
        assert_eq!(c_var_name(Sigil::Array, "x"), "a_x");
        assert_eq!(c_var_name(Sigil::Hash, "x"), "h_x");
    }

    #[test]
    fn test_c_quote() {
        assert_eq!(c_quote("hi"), "\"hi\"");
        assert_eq!(c_quote("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
        assert_eq!(c_quote("caf\u{e9}"), "\"caf\\303\\251\"");
    }

    #[test]
    fn test_c_num_lit() {
        assert_eq!(c_num_lit(3.5).unwrap(), "3.5");
        assert_eq!(c_num_lit(1000.0).unwrap(), "1000.0");
        assert!(c_num_lit(f64::INFINITY).is_err());
    }

    #[test]
    fn test_release_and_copy_tables() {
        assert_eq!(
            release_call(&Type::Scalar, "v"),
            Some("strada_release(v);".to_string())
        );
        assert_eq!(release_call(&Type::Int, "n"), None);
        assert_eq!(
            copy_call(&Type::Array, "a"),
            Some("strada_array_copy(a)".to_string())
        );
    }
}
