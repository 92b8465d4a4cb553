//! Runtime entry points used by the emitted C.
//!
//! All runtime functions the generator may call are listed here in a single
//! data-driven table. The table drives the prologue's reference comment and
//! keeps expression lowering honest: tests assert that emitted calls only
//! use names listed here.
//!
//! Ownership contract: every entry point that returns a value transfers one
//! reference to the caller; arguments are borrowed (container writes and
//! constructors acquire internally). `strada_throw` is the one exception:
//! it consumes its argument and does not return.

use crate::types::Type;
use std::fmt::Write as _;
use std::sync::LazyLock;

use super::error::CodeGenError;

/// The runtime header the emitted translation unit includes.
pub const RUNTIME_HEADER: &str = "strada/runtime.h";

/// One documented runtime entry point.
pub struct RuntimeDecl {
    /// C prototype, for the prologue reference comment
    pub proto: &'static str,
    /// Optional category comment
    pub category: Option<&'static str>,
}

/// All runtime entry points, organized by category.
pub static RUNTIME_DECLARATIONS: LazyLock<Vec<RuntimeDecl>> = LazyLock::new(|| {
    vec![
        // Value constructors and lifetime
        RuntimeDecl {
            proto: "strada_value *strada_new_int(int64_t v)",
            category: Some("value constructors and lifetime"),
        },
        RuntimeDecl {
            proto: "strada_value *strada_new_num(double v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_new_str(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_new_undef(void)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_new_ptr(void *p)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_ref(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_copy(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_release(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "void *strada_alloc(size_t n)",
            category: None,
        },
        // Scalar operations
        RuntimeDecl {
            proto: "strada_value *strada_add(strada_value *a, strada_value *b)",
            category: Some("scalar operations"),
        },
        RuntimeDecl {
            proto: "strada_value *strada_sub(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_mul(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_div(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_mod(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_pow(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_neg(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_concat(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_abs(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_clone(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_inc(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_dec(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_eq(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_ne(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_lt(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_gt(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_le(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_ge(strada_value *a, strada_value *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_to_int(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "double strada_to_num(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_to_str(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_to_bool(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "void *strada_to_ptr(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_defined(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_size(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_iabs(int64_t v)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_ipow(int64_t base, int64_t exp)",
            category: None,
        },
        // Strings
        RuntimeDecl {
            proto: "strada_str *strada_str_new(const char *s)",
            category: Some("strings"),
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_ref(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_copy(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_str_release(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_concat(strada_str *a, strada_str *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_repeat(strada_str *s, int64_t count)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_build(int64_t n, ...)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_from_int(int64_t v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_from_num(double v)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_str_to_int(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "double strada_str_to_num(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_str_cmp(strada_str *a, strada_str *b)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_str_size(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_str_truthy(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_lc(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_uc(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_str_substr(strada_str *s, int64_t off, int64_t len)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_str_index(strada_str *s, strada_str *needle, int64_t from)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_str_chomp(strada_str *s)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_chomp(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_shell(strada_str *cmd)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_sprintf(strada_str *fmt, int64_t n, ...)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_join(strada_str *sep, strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_split(strada_str *pat, const char *flags, strada_str *s, int64_t limit)",
            category: None,
        },
        // Arrays
        RuntimeDecl {
            proto: "strada_array *strada_array_new(int64_t cap)",
            category: Some("arrays"),
        },
        RuntimeDecl {
            proto: "strada_array *strada_array_ref(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_array_copy(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_array_clone(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_array_release(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_array_push(strada_array *a, strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_array_pop(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_array_shift(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_array_unshift(strada_array *a, strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_array_get(strada_array *a, int64_t i)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_array_set(strada_array *a, int64_t i, strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_array_size(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_array_append_all(strada_array *dst, strada_array *src)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_array_tail(strada_array *a, int64_t from)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_array_sort(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_array_reverse(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_range_array(int64_t lo, int64_t hi)",
            category: None,
        },
        // Hashes
        RuntimeDecl {
            proto: "strada_hash *strada_hash_new(int64_t cap)",
            category: Some("hashes"),
        },
        RuntimeDecl {
            proto: "strada_hash *strada_hash_ref(strada_hash *h)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_hash *strada_hash_copy(strada_hash *h)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_hash *strada_hash_clone(strada_hash *h)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_hash_release(strada_hash *h)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_hash_get(strada_hash *h, strada_str *k)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_hash_set(strada_hash *h, strada_str *k, strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_hash_exists(strada_hash *h, strada_str *k)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_hash_delete(strada_hash *h, strada_str *k)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_hash_size(strada_hash *h)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_hash_keys(strada_hash *h)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_hash_values(strada_hash *h)",
            category: None,
        },
        // References
        RuntimeDecl {
            proto: "strada_value *strada_new_ref_scalar(strada_value **slot)",
            category: Some("references"),
        },
        RuntimeDecl {
            proto: "strada_value *strada_new_ref_array(strada_array *a)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_new_ref_hash(strada_hash *h)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_deref_scalar(strada_value *r)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_deref_array(strada_value *r)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_hash *strada_deref_hash(strada_value *r)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_ref_assign(strada_value *r, strada_value *v)",
            category: None,
        },
        // Regex
        RuntimeDecl {
            proto: "int64_t strada_regex_match(strada_value *v, strada_str *pat, const char *flags)",
            category: Some("regex"),
        },
        RuntimeDecl {
            proto: "int64_t strada_regex_subst(strada_value *v, strada_str *pat, strada_str *repl, const char *flags)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_regex_capture(int64_t i)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_array *strada_regex_captures(void)",
            category: None,
        },
        // Exceptions
        RuntimeDecl {
            proto: "void strada_exc_push(strada_exc_frame *f)",
            category: Some("exceptions"),
        },
        RuntimeDecl {
            proto: "void strada_exc_pop(strada_exc_frame *f)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_exc_cleanup(void)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_throw(strada_value *v)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_take_exception(void)",
            category: None,
        },
        // Dispatch and OOP
        RuntimeDecl {
            proto: "strada_value *strada_bless(strada_value *r, strada_str *class_name)",
            category: Some("dispatch and OOP"),
        },
        RuntimeDecl {
            proto: "int64_t strada_isa(strada_value *v, strada_str *class_name)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_can(strada_value *v, strada_str *method)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_inherit(const char *class_name, const char *parent)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_register_method(const char *class_name, const char *method, strada_closure_fn fn, int64_t arity)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_method_call(strada_value *obj, const char *method, strada_array *args)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_new_closure(strada_closure_fn fn, void *env, int64_t arity)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_value *strada_call_closure(strada_value *f, strada_array *args)",
            category: None,
        },
        // Program support
        RuntimeDecl {
            proto: "void strada_runtime_init(int argc, char **argv)",
            category: Some("program support"),
        },
        RuntimeDecl {
            proto: "void strada_load_lib(const char *name)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_say(int64_t n, ...)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_print(int64_t n, ...)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_warn(int64_t n, ...)",
            category: None,
        },
        RuntimeDecl {
            proto: "strada_str *strada_slurp(strada_str *path)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_spew(strada_str *path, strada_str *content)",
            category: None,
        },
        RuntimeDecl {
            proto: "int64_t strada_system(strada_str *cmd)",
            category: None,
        },
        RuntimeDecl {
            proto: "void strada_exit(int64_t code)",
            category: None,
        },
    ]
});

/// Emit the translation-unit prologue: includes plus a reference comment
/// listing the runtime entry points the module may call.
pub fn emit_prologue(out: &mut String, source_name: &str) -> Result<(), CodeGenError> {
    writeln!(out, "/* Generated by stradac from {} */", source_name)?;
    writeln!(out, "/* Single translation unit; links against the Strada runtime. */")?;
    writeln!(out)?;
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out, "#include <stdbool.h>")?;
    writeln!(out, "#include <stddef.h>")?;
    writeln!(out, "#include <setjmp.h>")?;
    writeln!(out, "#include <math.h>")?;
    writeln!(out, "#include <{}>", RUNTIME_HEADER)?;
    writeln!(out)?;
    writeln!(out, "/* Runtime entry points used below:")?;
    for decl in RUNTIME_DECLARATIONS.iter() {
        if let Some(cat) = decl.category {
            writeln!(out, " *  -- {} --", cat)?;
        }
        writeln!(out, " *  {};", decl.proto)?;
    }
    writeln!(out, " */")?;
    writeln!(out)?;
    Ok(())
}

/// Return type of a builtin, for expression typing. `abs` is typed from
/// its argument by the caller; `captures` with no argument yields an array.
/// IMPORTANT: keep in sync with the arity table in the semantic pass.
pub fn builtin_ret(name: &str) -> Option<Type> {
    let ty = match name {
        "say" | "print" | "warn" | "push" | "unshift" | "delete" | "spew" | "chomp"
        | "exit" => Type::Void,
        "pop" | "shift" | "captures" | "bless" | "undef" => Type::Scalar,
        "size" | "exists" | "length" | "index" | "defined" | "isa" | "can" | "system"
        | "abs" | "int" => Type::Int,
        "keys" | "values" | "split" | "sort" | "reverse" => Type::Array,
        "join" | "sprintf" | "slurp" | "lc" | "uc" | "substr" | "str" => Type::Str,
        "num" => Type::Num,
        _ => return None,
    };
    Some(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::BUILTINS;

    #[test]
    fn test_every_builtin_has_a_return_type() {
        for (name, _, _) in BUILTINS {
            assert!(
                builtin_ret(name).is_some(),
                "builtin '{}' missing from return-type table",
                name
            );
        }
    }

    #[test]
    fn test_prologue_includes_runtime_header() {
        let mut out = String::new();
        emit_prologue(&mut out, "demo.strada").expect("emits");
        assert!(out.contains("#include <strada/runtime.h>"));
        assert!(out.contains("strada_new_int"));
    }
}
