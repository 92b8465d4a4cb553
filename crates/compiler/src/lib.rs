//! Strada Compiler Library
//!
//! Provides compilation from `.strada` source to a single C translation
//! unit that links against the Strada runtime library. The pipeline is
//! four stages run strictly in order, entirely in memory:
//!
//! ```text
//! source text -> [Lexer] -> tokens -> [Parser] -> AST
//!             -> [Semantic] -> annotated AST -> [CodeGen] -> C source
//! ```
//!
//! The first fatal diagnostic aborts compilation; diagnostics are plain
//! strings of the form `line:col: kind: message`, and the file-level entry
//! points prefix them with the input path.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod interp;
pub mod lexer;
pub mod lint;
pub mod parser;
pub mod semantic;
pub mod types;

pub use ast::Program;
pub use codegen::{CodeGen, CodeGenError};
pub use config::CompilerConfig;
pub use lexer::{Lexer, Token, TokenKind};
pub use lint::{LintDiagnostic, Linter, WarnConfig};
pub use parser::Parser;
pub use semantic::Analyzer;
pub use types::{Sigil, Type};

use std::fs;
use std::path::Path;

/// Compile source text to C with the given configuration.
pub fn compile_to_c(source: &str, config: &CompilerConfig) -> Result<String, String> {
    let mut program = Parser::parse(source)?;
    tracing::debug!(
        functions = program.functions.len(),
        structs = program.structs.len(),
        top_stmts = program.top_stmts.len(),
        "parsed program"
    );
    Analyzer::analyze(&mut program)?;
    let c = CodeGen::generate(&program, config.clone()).map_err(|e| e.to_string())?;
    Ok(c)
}

/// Compile a `.strada` source file to a `.c` file.
///
/// Warnings (under `-w`) go to stderr and do not affect the result. The
/// output file is written in full and closed before returning.
pub fn compile_file(
    source_path: &Path,
    output_path: &Path,
    config: &CompilerConfig,
) -> Result<(), String> {
    let source = fs::read_to_string(source_path)
        .map_err(|e| format!("failed to read {}: {}", source_path.display(), e))?;

    let display = source_path.display().to_string();
    let config = config.clone().with_source_name(display.clone());

    let mut program =
        Parser::parse(&source).map_err(|e| format!("{}:{}", display, e))?;
    Analyzer::analyze(&mut program).map_err(|e| format!("{}:{}", display, e))?;

    if config.warnings {
        let diagnostics = Linter::new(&config.warn_config).lint_program(&program);
        for line in lint::format_diagnostics(&diagnostics).lines() {
            eprintln!("{}:{}", display, line);
        }
    }

    let c = CodeGen::generate(&program, config)
        .map_err(|e| format!("{}:{}", display, e))?;

    fs::write(output_path, c)
        .map_err(|e| format!("failed to write {}: {}", output_path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_to_c_end_to_end() {
        let c = compile_to_c(
            "func main() int { say(\"hello\"); return 0; }",
            &CompilerConfig::new().with_source_name("hello.strada"),
        )
        .expect("compiles");
        assert!(c.contains("int main(int argc, char **argv)"));
    }

    #[test]
    fn test_compile_to_c_reports_first_error() {
        let err = compile_to_c("func f( {", &CompilerConfig::default()).unwrap_err();
        assert!(err.contains("parse error"), "{}", err);
    }

    #[test]
    fn test_compile_file_writes_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("demo.strada");
        let output = dir.path().join("demo.c");
        std::fs::write(&input, "func main() int { return 0; }").expect("write input");

        compile_file(&input, &output, &CompilerConfig::new()).expect("compiles");
        let c = std::fs::read_to_string(&output).expect("read output");
        assert!(c.contains("strada_main"));
    }

    #[test]
    fn test_compile_file_prefixes_diagnostics_with_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("bad.strada");
        let output = dir.path().join("bad.c");
        std::fs::write(&input, "func broken( int ) void { }").expect("write input");

        let err = compile_file(&input, &output, &CompilerConfig::new()).unwrap_err();
        assert!(err.contains("bad.strada:"), "{}", err);
        assert!(err.contains("parse error"), "{}", err);
        assert!(!output.exists());
    }

    #[test]
    fn test_missing_input_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("nope.strada");
        let output = dir.path().join("nope.c");
        let err = compile_file(&input, &output, &CompilerConfig::new()).unwrap_err();
        assert!(err.contains("failed to read"), "{}", err);
    }
}
