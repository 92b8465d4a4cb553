//! Semantic type tags for Strada
//!
//! `scalar` is the runtime-typed dynamic value; `int`, `num` and `str` are
//! statically typed and lower to native machine types. The extended C-interop
//! widths exist for struct fields and extern signatures. Struct layout
//! arithmetic (natural alignment, word-aligned offsets) lives here so the
//! semantic pass and codegen agree on sizes.

use std::fmt;

/// The variable category selected by the leading sigil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sigil {
    /// `$` - scalars, ints, nums, strs, structs, refs
    Scalar,
    /// `@` - arrays
    Array,
    /// `%` - hashes
    Hash,
}

impl fmt::Display for Sigil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sigil::Scalar => write!(f, "$"),
            Sigil::Array => write!(f, "@"),
            Sigil::Hash => write!(f, "%"),
        }
    }
}

/// Pointer/word size assumed by struct layout (LP64 targets).
pub const WORD_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Void,
    Int,
    Num,
    Str,
    /// Runtime-typed dynamic value
    Scalar,
    Array,
    Hash,
    /// User struct, by name
    Struct(String),
    /// Function-pointer type (struct fields, extern signatures)
    Func { ret: Box<Type>, params: Vec<Type> },
    // Extended C-interop widths
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Bool,
    Size,
    Ptr,
    Char,
    Short,
    Long,
}

impl Type {
    /// Map a type keyword to a type tag. Struct names are resolved by the
    /// parser against its struct registry, not here.
    pub fn from_keyword(word: &str) -> Option<Type> {
        let ty = match word {
            "void" => Type::Void,
            "int" => Type::Int,
            "num" => Type::Num,
            "str" => Type::Str,
            "scalar" => Type::Scalar,
            "array" => Type::Array,
            "hash" => Type::Hash,
            "int8" => Type::Int8,
            "int16" => Type::Int16,
            "int32" => Type::Int32,
            "int64" => Type::Int64,
            "uint8" => Type::UInt8,
            "uint16" => Type::UInt16,
            "uint32" => Type::UInt32,
            "uint64" => Type::UInt64,
            "float" => Type::Float,
            "bool" => Type::Bool,
            "size" => Type::Size,
            "ptr" => Type::Ptr,
            "char" => Type::Char,
            "short" => Type::Short,
            "long" => Type::Long,
            _ => return None,
        };
        Some(ty)
    }

    /// The sigil a declaration of this type must carry.
    pub fn sigil(&self) -> Sigil {
        match self {
            Type::Array => Sigil::Array,
            Type::Hash => Sigil::Hash,
            _ => Sigil::Scalar,
        }
    }

    /// True for values the runtime refcounts; block exit releases these.
    pub fn is_runtime_handle(&self) -> bool {
        matches!(self, Type::Scalar | Type::Str | Type::Array | Type::Hash)
    }

    /// True for types lowered to a native C integer.
    pub fn is_native_int(&self) -> bool {
        matches!(
            self,
            Type::Int
                | Type::Int8
                | Type::Int16
                | Type::Int32
                | Type::Int64
                | Type::UInt8
                | Type::UInt16
                | Type::UInt32
                | Type::UInt64
                | Type::Bool
                | Type::Size
                | Type::Char
                | Type::Short
                | Type::Long
        )
    }

    /// True for types lowered to a native C float.
    pub fn is_native_num(&self) -> bool {
        matches!(self, Type::Num | Type::Float)
    }

    /// The C type name this tag lowers to. Function pointers need a
    /// declarator around the field name; use [`Type::c_decl`] for those.
    pub fn c_name(&self) -> String {
        match self {
            Type::Void => "void".to_string(),
            Type::Int | Type::Int64 => "int64_t".to_string(),
            Type::Num => "double".to_string(),
            Type::Str => "strada_str *".to_string(),
            Type::Scalar => "strada_value *".to_string(),
            Type::Array => "strada_array *".to_string(),
            Type::Hash => "strada_hash *".to_string(),
            Type::Struct(name) => format!("{} *", name),
            Type::Func { ret, params } => {
                // Unnamed function-pointer type, for casts
                let args: Vec<String> = params.iter().map(|p| p.c_name()).collect();
                format!("{} (*)({})", ret.c_name(), args.join(", "))
            }
            Type::Int8 => "int8_t".to_string(),
            Type::Int16 => "int16_t".to_string(),
            Type::Int32 => "int32_t".to_string(),
            Type::UInt8 => "uint8_t".to_string(),
            Type::UInt16 => "uint16_t".to_string(),
            Type::UInt32 => "uint32_t".to_string(),
            Type::UInt64 => "uint64_t".to_string(),
            Type::Float => "float".to_string(),
            Type::Bool => "bool".to_string(),
            Type::Size => "size_t".to_string(),
            Type::Ptr => "void *".to_string(),
            Type::Char => "char".to_string(),
            Type::Short => "short".to_string(),
            Type::Long => "long".to_string(),
        }
    }

    /// A C declaration of `name` with this type, handling the
    /// function-pointer declarator form.
    pub fn c_decl(&self, name: &str) -> String {
        match self {
            Type::Func { ret, params } => {
                let args: Vec<String> = params.iter().map(|p| p.c_name()).collect();
                format!("{} (*{})({})", ret.c_name(), name, args.join(", "))
            }
            Type::Struct(name_ty) => format!("{} *{}", name_ty, name),
            _ => {
                let c = self.c_name();
                if c.ends_with('*') {
                    format!("{}{}", c, name)
                } else {
                    format!("{} {}", c, name)
                }
            }
        }
    }

    /// Size in bytes when stored in a struct field.
    pub fn size(&self) -> usize {
        match self {
            Type::Void => 0,
            Type::Int8 | Type::UInt8 | Type::Bool | Type::Char => 1,
            Type::Int16 | Type::UInt16 | Type::Short => 2,
            Type::Int32 | Type::UInt32 | Type::Float => 4,
            _ => WORD_SIZE,
        }
    }

    /// Natural alignment equals size for every field type we lay out.
    pub fn align(&self) -> usize {
        self.size().max(1)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int => write!(f, "int"),
            Type::Num => write!(f, "num"),
            Type::Str => write!(f, "str"),
            Type::Scalar => write!(f, "scalar"),
            Type::Array => write!(f, "array"),
            Type::Hash => write!(f, "hash"),
            Type::Struct(name) => write!(f, "{}", name),
            Type::Func { ret, params } => {
                let args: Vec<String> = params.iter().map(|p| p.to_string()).collect();
                write!(f, "func({}) {}", args.join(", "), ret)
            }
            Type::Int8 => write!(f, "int8"),
            Type::Int16 => write!(f, "int16"),
            Type::Int32 => write!(f, "int32"),
            Type::Int64 => write!(f, "int64"),
            Type::UInt8 => write!(f, "uint8"),
            Type::UInt16 => write!(f, "uint16"),
            Type::UInt32 => write!(f, "uint32"),
            Type::UInt64 => write!(f, "uint64"),
            Type::Float => write!(f, "float"),
            Type::Bool => write!(f, "bool"),
            Type::Size => write!(f, "size"),
            Type::Ptr => write!(f, "ptr"),
            Type::Char => write!(f, "char"),
            Type::Short => write!(f, "short"),
            Type::Long => write!(f, "long"),
        }
    }
}

/// Round `offset` up to the next multiple of `align`.
pub fn align_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_round_trip() {
        for kw in ["int", "num", "str", "scalar", "array", "hash", "uint32", "ptr"] {
            let ty = Type::from_keyword(kw).expect(kw);
            assert_eq!(ty.to_string(), kw);
        }
        assert!(Type::from_keyword("Point").is_none());
    }

    #[test]
    fn test_sigil_categories() {
        assert_eq!(Type::Array.sigil(), Sigil::Array);
        assert_eq!(Type::Hash.sigil(), Sigil::Hash);
        assert_eq!(Type::Int.sigil(), Sigil::Scalar);
        assert_eq!(Type::Struct("P".into()).sigil(), Sigil::Scalar);
        assert_eq!(Type::Scalar.sigil(), Sigil::Scalar);
    }

    #[test]
    fn test_c_lowering() {
        assert_eq!(Type::Int.c_name(), "int64_t");
        assert_eq!(Type::Num.c_name(), "double");
        assert_eq!(Type::Scalar.c_name(), "strada_value *");
        assert_eq!(Type::Struct("P".into()).c_name(), "P *");
        let cb = Type::Func {
            ret: Box::new(Type::Int),
            params: vec![Type::Int, Type::Int],
        };
        assert_eq!(cb.c_decl("cb"), "int64_t (*cb)(int64_t, int64_t)");
    }

    #[test]
    fn test_pointer_decl_spacing() {
        assert_eq!(Type::Scalar.c_decl("v"), "strada_value *v");
        assert_eq!(Type::Int.c_decl("n"), "int64_t n");
        assert_eq!(Type::Struct("P".into()).c_decl("p"), "P *p");
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(9, 4), 12);
        assert_eq!(align_up(16, 8), 16);
    }

    #[test]
    fn test_field_sizes() {
        assert_eq!(Type::Int.size(), 8);
        assert_eq!(Type::Str.size(), 8);
        assert_eq!(Type::Int32.size(), 4);
        assert_eq!(Type::Bool.size(), 1);
        let cb = Type::Func {
            ret: Box::new(Type::Void),
            params: vec![],
        };
        assert_eq!(cb.size(), 8);
    }
}
