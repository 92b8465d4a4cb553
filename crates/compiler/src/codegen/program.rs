//! Translation-unit assembly
//!
//! Output order: prologue (runtime include + entry-point reference),
//! struct typedefs, forward declarations (user functions, foreign scalar-ABI
//! callees), lifted lambdas and thunks, function bodies, the module init
//! hook, and the `main` wrapper (unless `--shared`).
//!
//! The module init hook registers every packaged function as a method of
//! its package's class, records `inherit` relations declared at top level,
//! and dlopens `import_lib` shims. In `--shared` mode the hook is exported
//! as `strada_module_init_<stem>` and also runs the top-level statements.

use crate::ast::{FunctionDef, Program, Stmt};
use crate::types::Type;
use std::fmt::Write as _;

use super::error::CodeGenError;
use super::runtime;
use super::state::{c_quote, c_var_name, CodeGen};

impl CodeGen {
    /// Generate the complete C translation unit for an analyzed program.
    pub fn generate(
        program: &Program,
        config: crate::config::CompilerConfig,
    ) -> Result<String, CodeGenError> {
        let mut cg = CodeGen::new(program, config);
        cg.generate_unit(program)
    }

    fn generate_unit(&mut self, program: &Program) -> Result<String, CodeGenError> {
        let has_main = self.fn_table.contains_key("strada_main");
        if !self.config.shared && !has_main && program.top_stmts.is_empty() {
            return Err(CodeGenError::Logic(
                "no main function defined".to_string(),
            ));
        }
        if has_main {
            let main_params = &self.fn_table["strada_main"].params;
            if !main_params.is_empty() {
                return Err(CodeGenError::Logic(
                    "main must take no parameters".to_string(),
                ));
            }
        }

        for f in &program.functions {
            if f.body.is_some() {
                self.gen_function(f)?;
            }
        }

        // Method registry: every packaged function is a method of its
        // package's class, dispatched through the shared closure ABI.
        for f in &program.functions {
            if f.package.is_some() && f.body.is_some() {
                let (thunk, arity) = self.ensure_thunk(&f.emitted_name, f.line)?;
                let class = f.package.clone().unwrap_or_default();
                self.init_lines.push(format!(
                    "strada_register_method({}, {}, {}, {});",
                    c_quote(&class),
                    c_quote(&f.name),
                    thunk,
                    arity
                ));
            }
        }
        for lib in &program.shim_libs {
            self.init_lines
                .push(format!("strada_load_lib({});", c_quote(lib)));
        }
        for stmt in &program.top_stmts {
            if let Stmt::Inherit {
                parent, package, ..
            } = stmt
            {
                let class = package.as_deref().unwrap_or("main");
                self.init_lines.push(format!(
                    "strada_inherit({}, {});",
                    c_quote(class),
                    c_quote(parent)
                ));
            }
        }

        let init_name = self.init_hook_name();
        let init_hook = self.gen_init_hook(program, &init_name)?;
        let main_wrapper = if self.config.shared {
            String::new()
        } else {
            self.gen_main_wrapper(program, has_main, &init_name)?
        };

        // Assemble
        let mut out = String::new();
        runtime::emit_prologue(&mut out, &self.config.source_name)?;
        self.emit_struct_typedefs(&mut out, program)?;
        self.emit_forward_decls(&mut out, program, &init_name)?;
        if !self.lifted.is_empty() {
            writeln!(out, "/* Lifted closures and function-reference thunks */")?;
            out.push_str(&self.lifted);
        }
        out.push_str(&self.funcs_out);
        out.push_str(&init_hook);
        out.push_str(&main_wrapper);

        tracing::debug!(bytes = out.len(), "emitted C translation unit");
        Ok(out)
    }

    fn init_hook_name(&self) -> String {
        if self.config.shared {
            let stem = std::path::Path::new(&self.config.source_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("module");
            let stem: String = stem
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            format!("strada_module_init_{}", stem)
        } else {
            "strada_module_init".to_string()
        }
    }

    // ========================================================================
    // Structs and declarations
    // ========================================================================

    fn emit_struct_typedefs(
        &self,
        out: &mut String,
        program: &Program,
    ) -> Result<(), CodeGenError> {
        if program.structs.is_empty() {
            return Ok(());
        }
        for def in &program.structs {
            writeln!(out, "typedef struct {} {};", def.name, def.name)?;
        }
        writeln!(out)?;
        for def in &program.structs {
            writeln!(out, "/* total size {} bytes */", def.total_size)?;
            writeln!(out, "struct {} {{", def.name)?;
            for field in &def.fields {
                writeln!(
                    out,
                    "    {}; /* offset {} */",
                    field.ty.c_decl(&field.name),
                    field.offset
                )?;
            }
            writeln!(out, "}};")?;
            writeln!(out)?;
        }
        Ok(())
    }

    fn emit_forward_decls(
        &self,
        out: &mut String,
        program: &Program,
        init_name: &str,
    ) -> Result<(), CodeGenError> {
        writeln!(out, "/* Forward declarations */")?;
        for f in &program.functions {
            writeln!(out, "{};", fn_signature(f))?;
        }
        if !self.foreign.is_empty() {
            let mut foreign: Vec<(&String, &usize)> = self.foreign.iter().collect();
            foreign.sort();
            writeln!(out, "/* Cross-package callees (scalar ABI) */")?;
            for (name, arity) in foreign {
                let params: Vec<String> = (0..*arity)
                    .map(|i| format!("strada_value *a{}", i))
                    .collect();
                let params = if params.is_empty() {
                    "void".to_string()
                } else {
                    params.join(", ")
                };
                writeln!(out, "strada_value *{}({});", name, params)?;
            }
        }
        let linkage = if self.config.shared { "" } else { "static " };
        writeln!(out, "{}void {}(void);", linkage, init_name)?;
        writeln!(out)?;
        Ok(())
    }

    // ========================================================================
    // Functions
    // ========================================================================

    fn gen_function(&mut self, f: &FunctionDef) -> Result<(), CodeGenError> {
        self.current_ret = f.ret.clone();
        self.lambda_ret = None;
        self.body.clear();
        self.indent = 1;
        self.push_scope();

        for param in &f.params {
            let (sigil, ty) = if param.variadic {
                (crate::types::Sigil::Array, Type::Array)
            } else {
                (param.sigil, param.ty.clone())
            };
            self.declare_var(sigil, &param.name, ty, false);
        }

        let body = f.body.as_ref().expect("extern functions have no body");
        for stmt in body {
            self.gen_stmt(stmt)?;
        }
        self.pop_scope_releases()?;

        // Fallthrough return for functions whose control flow reaches the
        // closing brace
        match &f.ret {
            Type::Void => {}
            Type::Scalar => self.out("return strada_new_undef();")?,
            Type::Str => self.out("return strada_str_new(\"\");")?,
            Type::Array => self.out("return strada_array_new(0);")?,
            Type::Hash => self.out("return strada_hash_new(0);")?,
            Type::Struct(_) | Type::Ptr => self.out("return NULL;")?,
            t if t.is_native_num() => self.out("return 0.0;")?,
            _ => self.out("return 0;")?,
        }

        let body_text = std::mem::take(&mut self.body);
        self.indent = 0;
        writeln!(&mut self.funcs_out, "{} {{", fn_signature(f))?;
        self.funcs_out.push_str(&body_text);
        writeln!(&mut self.funcs_out, "}}")?;
        writeln!(&mut self.funcs_out)?;
        Ok(())
    }

    // ========================================================================
    // Init hook and main wrapper
    // ========================================================================

    fn gen_init_hook(
        &mut self,
        program: &Program,
        init_name: &str,
    ) -> Result<String, CodeGenError> {
        self.body.clear();
        self.indent = 1;
        let init_lines = std::mem::take(&mut self.init_lines);
        for line in init_lines {
            self.out(line)?;
        }
        if self.config.shared {
            // Shared objects have no main; top-level statements run here
            self.current_ret = Type::Void;
            self.push_scope();
            for stmt in &program.top_stmts {
                if matches!(stmt, Stmt::Inherit { .. }) {
                    continue;
                }
                self.gen_stmt(stmt)?;
            }
            self.pop_scope_releases()?;
        }

        let body_text = std::mem::take(&mut self.body);
        self.indent = 0;
        let mut out = String::new();
        let linkage = if self.config.shared { "" } else { "static " };
        writeln!(out, "{}void {}(void) {{", linkage, init_name)?;
        out.push_str(&body_text);
        writeln!(out, "}}")?;
        writeln!(out)?;
        Ok(out)
    }

    fn gen_main_wrapper(
        &mut self,
        program: &Program,
        has_main: bool,
        init_name: &str,
    ) -> Result<String, CodeGenError> {
        self.body.clear();
        self.indent = 1;
        self.current_ret = Type::Int;
        self.lambda_ret = None;

        self.out("strada_runtime_init(argc, argv);")?;
        self.out(format!("{}();", init_name))?;

        self.push_scope();
        for stmt in &program.top_stmts {
            if matches!(stmt, Stmt::Inherit { .. }) {
                continue;
            }
            self.gen_stmt(stmt)?;
        }
        self.pop_scope_releases()?;

        if has_main {
            let ret = self.fn_table["strada_main"].ret.clone();
            match ret {
                Type::Void => {
                    self.out("strada_main();")?;
                    self.out("return 0;")?;
                }
                Type::Scalar => {
                    self.out("strada_value *r = strada_main();")?;
                    self.out("int rc = (int)strada_to_int(r);")?;
                    self.out("strada_release(r);")?;
                    self.out("return rc;")?;
                }
                t if t.is_native_int() || t.is_native_num() => {
                    self.out("return (int)strada_main();")?;
                }
                other => {
                    return Err(CodeGenError::Logic(format!(
                        "main cannot return {}",
                        other
                    )));
                }
            }
        } else {
            self.out("return 0;")?;
        }

        let body_text = std::mem::take(&mut self.body);
        self.indent = 0;
        let mut out = String::new();
        writeln!(out, "int main(int argc, char **argv) {{")?;
        out.push_str(&body_text);
        writeln!(out, "}}")?;
        Ok(out)
    }
}

/// C signature for a user function, shared by forward declarations and
/// definitions.
fn fn_signature(f: &FunctionDef) -> String {
    let params: Vec<String> = f
        .params
        .iter()
        .map(|p| {
            if p.variadic {
                Type::Array.c_decl(&c_var_name(crate::types::Sigil::Array, &p.name))
            } else {
                p.ty.c_decl(&c_var_name(p.sigil, &p.name))
            }
        })
        .collect();
    let params = if params.is_empty() {
        "void".to_string()
    } else {
        params.join(", ")
    };
    f.ret.c_decl(&format!("{}({})", f.emitted_name, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::parser::Parser;
    use crate::semantic::Analyzer;

    fn compile(src: &str) -> String {
        compile_with(src, CompilerConfig::new().with_source_name("test.strada"))
    }

    fn compile_with(src: &str, config: CompilerConfig) -> String {
        let mut program = Parser::parse(src).expect("parses");
        Analyzer::analyze(&mut program).expect("analyzes");
        CodeGen::generate(&program, config).expect("generates")
    }

    #[test]
    fn test_hello_world() {
        let c = compile("func main() int { say(\"hello\"); return 0; }");
        assert!(c.contains("#include <strada/runtime.h>"), "{}", c);
        assert!(c.contains("int64_t strada_main(void)"), "{}", c);
        assert!(c.contains("strada_str_new(\"hello\")"), "{}", c);
        assert!(c.contains("strada_say(1, "), "{}", c);
        assert!(c.contains("int main(int argc, char **argv)"), "{}", c);
        assert!(c.contains("return (int)strada_main();"), "{}", c);
    }

    #[test]
    fn test_native_arithmetic_stays_native() {
        let c = compile(
            "func add(int $a, int $b) int { return $a + $b; } \
             func main() int { say(add(2, 3)); return 0; }",
        );
        assert!(
            c.contains("int64_t add(int64_t s_a, int64_t s_b)"),
            "{}",
            c
        );
        assert!(c.contains("(s_a) + (s_b)"), "{}", c);
        // The int result boxes only at the say() boundary
        assert!(c.contains("strada_new_int"), "{}", c);
    }

    #[test]
    fn test_array_push_and_size() {
        let c = compile(
            "func main() int { my array @xs = (1, 2, 3); push(@xs, 4); \
             say(size(@xs)); return 0; }",
        );
        assert!(c.contains("strada_array_new(3)"), "{}", c);
        assert!(c.contains("strada_array_push(a_xs, "), "{}", c);
        assert!(c.contains("strada_array_size(a_xs)"), "{}", c);
        assert!(c.contains("strada_array_release(a_xs);"), "{}", c);
    }

    #[test]
    fn test_package_call_lowering() {
        let c = compile(
            "package M; func f(int $x) int { return $x * 2; } \
             package main; func main() int { say(M::f(21)); return 0; }",
        );
        assert!(c.contains("int64_t M_f(int64_t s_x)"), "{}", c);
        assert!(c.contains("M_f(INT64_C(21))"), "{}", c);
    }

    #[test]
    fn test_try_catch_throw() {
        let c = compile(
            "func main() int { try { throw \"bad\"; } catch ($e) { say($e); } return 0; }",
        );
        assert!(c.contains("strada_exc_frame"), "{}", c);
        assert!(c.contains("strada_exc_push(&"), "{}", c);
        assert!(c.contains("if (setjmp("), "{}", c);
        assert!(c.contains("strada_throw("), "{}", c);
        assert!(c.contains("strada_take_exception()"), "{}", c);
        assert!(c.contains("strada_exc_cleanup();"), "{}", c);
    }

    #[test]
    fn test_struct_layout_and_member_access() {
        let c = compile(
            "struct P { str name; int age; } \
             func main() int { my P $p; $p->name = \"A\"; $p->age = 7; \
             say($p->name . \":\" . $p->age); return 0; }",
        );
        assert!(c.contains("typedef struct P P;"), "{}", c);
        assert!(c.contains("strada_str *name; /* offset 0 */"), "{}", c);
        assert!(c.contains("int64_t age; /* offset 8 */"), "{}", c);
        assert!(c.contains("total size 16 bytes"), "{}", c);
        assert!(c.contains("(P *)strada_alloc(sizeof(P))"), "{}", c);
        assert!(c.contains("s_p->age = INT64_C(7);"), "{}", c);
        assert!(c.contains("strada_str_concat("), "{}", c);
    }

    #[test]
    fn test_foreach_over_array_and_range() {
        let c = compile(
            "func main() int { my array @xs = (1, 2); \
             foreach my int $x (@xs) { say($x); } \
             foreach my int $i (1..3) { say($i); } return 0; }",
        );
        assert!(c.contains("strada_array_get("), "{}", c);
        assert!(c.contains("strada_to_int("), "{}", c);
        // Range form iterates natively, without building an array
        assert!(!c.contains("= strada_range_array("), "{}", c);
    }

    #[test]
    fn test_labeled_last_emits_goto() {
        let c = compile(
            "func main() int { OUTER: while (1) { while (1) { last OUTER; } } return 0; }",
        );
        assert!(c.contains("goto brk_"), "{}", c);
        assert!(c.contains("brk_0: ;") || c.contains("brk_1: ;"), "{}", c);
    }

    #[test]
    fn test_interpolation_builds_string() {
        let c = compile(
            "func main() int { my str $who = \"world\"; say(\"hi $who!\"); return 0; }",
        );
        assert!(c.contains("strada_str_build(3, "), "{}", c);
    }

    #[test]
    fn test_regex_match_and_subst() {
        let c = compile(
            "func main() int { my scalar $s = \"abc\"; \
             if ($s =~ /b+/i) { say(\"yes\"); } \
             $s =~ s/a/x/g; return 0; }",
        );
        assert!(c.contains("strada_regex_match(s_s, "), "{}", c);
        assert!(c.contains("\"i\""), "{}", c);
        assert!(c.contains("strada_regex_subst(s_s, "), "{}", c);
        assert!(c.contains("\"g\""), "{}", c);
    }

    #[test]
    fn test_closure_lifts_with_env() {
        let c = compile(
            "func main() int { my int $n = 10; \
             my scalar $f = func (int $x) int { return $x + $n; }; \
             say($f->(1)); return 0; }",
        );
        assert!(c.contains("typedef struct {"), "{}", c);
        assert!(c.contains("strada_env_0"), "{}", c);
        assert!(c.contains("static strada_value *strada_lambda_0"), "{}", c);
        assert!(c.contains("strada_new_closure(strada_lambda_0"), "{}", c);
        assert!(c.contains("strada_call_closure("), "{}", c);
    }

    #[test]
    fn test_funcref_thunk() {
        let c = compile(
            "func double(int $x) int { return $x * 2; } \
             func main() int { my scalar $f = \\&double; say($f->(4)); return 0; }",
        );
        assert!(c.contains("static strada_value *strada_thunk_double"), "{}", c);
        assert!(c.contains("strada_new_closure(strada_thunk_double, NULL, 1)"), "{}", c);
    }

    #[test]
    fn test_method_registration_and_dispatch() {
        let c = compile(
            "package Counter; func get(scalar $self) int { return 1; } \
             package main; \
             func main() int { my scalar $obj = bless({count => 1}, \"Counter\"); \
             say($obj->get()); return 0; }",
        );
        assert!(
            c.contains("strada_register_method(\"Counter\", \"get\", strada_thunk_Counter_get, 1);"),
            "{}",
            c
        );
        assert!(c.contains("strada_method_call("), "{}", c);
        assert!(c.contains("strada_bless("), "{}", c);
    }

    #[test]
    fn test_function_pointer_field_calls_through_typed_pointer() {
        let c = compile(
            "struct Ops { func(int, int) int apply; } \
             func add(int $a, int $b) int { return $a + $b; } \
             func main() int { my Ops $ops; $ops->apply = \\&add; \
             say($ops->apply(2, 3)); return 0; }",
        );
        assert!(
            c.contains("int64_t (*apply)(int64_t, int64_t); /* offset 0 */"),
            "{}",
            c
        );
        assert!(c.contains("s_ops->apply = add;"), "{}", c);
        assert!(c.contains("s_ops->apply(INT64_C(2), INT64_C(3))"), "{}", c);
        // No registry dispatch for typed fields
        assert!(!c.contains("= strada_method_call("), "{}", c);
    }

    #[test]
    fn test_shared_mode_has_no_main() {
        let c = compile_with(
            "package Lib; func f(int $x) int { return $x; }",
            CompilerConfig::new()
                .with_shared(true)
                .with_source_name("lib.strada"),
        );
        assert!(!c.contains("int main(int argc"), "{}", c);
        assert!(c.contains("void strada_module_init_lib(void)"), "{}", c);
    }

    #[test]
    fn test_line_directives_with_g() {
        let c = compile_with(
            "func main() int { return 0; }",
            CompilerConfig::new()
                .with_line_info(true)
                .with_source_name("demo.strada"),
        );
        assert!(c.contains("#line 1 \"demo.strada\""), "{}", c);
    }

    #[test]
    fn test_top_level_statements_run_before_main() {
        let c = compile("say(\"boot\"); func main() int { return 0; }");
        let boot = c.find("strada_str_new(\"boot\")").expect("boot emitted");
        let call = c.find("return (int)strada_main();").expect("main call");
        assert!(boot < call, "{}", c);
    }

    #[test]
    fn test_missing_main_is_an_error() {
        let mut program = Parser::parse("func helper() int { return 1; }").expect("parses");
        Analyzer::analyze(&mut program).expect("analyzes");
        let result = CodeGen::generate(&program, CompilerConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_variadic_call_builds_tail_array() {
        let c = compile(
            "func sum(int $first, scalar ...$rest) int { return $first; } \
             func main() int { say(sum(1, 2, 3)); return 0; }",
        );
        assert!(c.contains("strada_array_new(2)"), "{}", c);
        assert!(c.contains("sum(INT64_C(1), "), "{}", c);
    }

    #[test]
    fn test_optional_defaults_fill_at_call_site() {
        let c = compile(
            "func greet(str $who = \"world\") void { say($who); } \
             func main() int { greet(); return 0; }",
        );
        assert!(c.contains("strada_str_new(\"world\")"), "{}", c);
    }

    #[test]
    fn test_emitted_calls_use_documented_entry_points() {
        let c = compile(
            "func main() int { my array @xs = (1); my hash %h; \
             %h{\"k\"} = pop(@xs); my scalar $r = \\%h; \
             say($r->{k}); return 0; }",
        );
        let known: Vec<&str> = runtime::RUNTIME_DECLARATIONS
            .iter()
            .map(|d| {
                let proto = d.proto;
                let start = proto.find("strada_").expect("strada name");
                let end = proto[start..].find('(').expect("paren") + start;
                &proto[start..end]
            })
            .collect();
        for token in c.split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_')) {
            if token.starts_with("strada_")
                && !token.starts_with("strada_main")
                && !token.starts_with("strada_module_init")
                && !token.starts_with("strada_env_")
                && !token.starts_with("strada_lambda_")
                && !token.starts_with("strada_thunk_")
                && token != "strada_exc_frame"
                && token != "strada_closure_fn"
                && token != "strada_value"
                && token != "strada_str"
                && token != "strada_array"
                && token != "strada_hash"
            {
                assert!(
                    known.contains(&token),
                    "emitted call '{}' is not a documented entry point\n{}",
                    token,
                    c
                );
            }
        }
    }
}
