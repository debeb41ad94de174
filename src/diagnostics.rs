//! Compile errors and their terminal presentation.
//!
//! Every error the type checker or code generator can produce is fatal: it
//! aborts compilation of the current file. Errors carry a coarse
//! [`ErrorKind`] (useful for tests and tooling), a human-readable message and
//! the source span that triggered them. [`CompileError::report`] renders the
//! `file:line.column: message` form followed by a caret-highlighted excerpt
//! of the offending source.

use std::error::Error;
use std::fmt::{self, Display};
use std::rc::Rc;

use colored::Colorize;

use crate::ast::SourceFile;

/// Shorthand result type used throughout the type checker and code generator.
pub type CResult<T> = Result<T, CompileError>;

/// Broad classification of a compile error. The message carries the detail;
/// the kind is what tests and tools dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A variable, field, type, method or module name could not be resolved.
    UnknownName,
    /// Two types could not be unified or promoted.
    TypeMismatch,
    /// A type could not be inferred from context (e.g. a bare `none`).
    IncompleteType,
    /// A structural rule was violated (stack pointer in a collection, nested
    /// optionals, recursion through a non-pointer field, ...).
    ConstraintViolation,
    /// No constructor matched a `TypeName(...)` call.
    NoMatchingConstructor,
    /// An underscore-prefixed name was used outside its defining type.
    PrivateAccess,
    /// A `when` over an enum either misses tags or has a dead `else`.
    Exhaustiveness,
    /// A statement can never run because an earlier one always returns/aborts.
    UnreachableCode,
    /// A declaration has neither an initializer nor a default-initializable
    /// type.
    MissingValue,
    /// The AST node is not valid in the position it appeared in.
    InvalidExpression,
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            ErrorKind::UnknownName => "unknown name",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::IncompleteType => "incomplete type",
            ErrorKind::ConstraintViolation => "constraint violation",
            ErrorKind::NoMatchingConstructor => "no matching constructor",
            ErrorKind::PrivateAccess => "private member access",
            ErrorKind::Exhaustiveness => "exhaustiveness",
            ErrorKind::UnreachableCode => "unreachable code",
            ErrorKind::MissingValue => "missing value",
            ErrorKind::InvalidExpression => "invalid expression",
        }
    }
}

/// A fatal compiler error with an optional source span.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<Rc<SourceFile>>,
    pub span: Option<(usize, usize)>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CompileError { kind, message: message.into(), file: None, span: None }
    }

    pub fn at(
        file: &Rc<SourceFile>,
        start: usize,
        end: usize,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        CompileError {
            kind,
            message: message.into(),
            file: Some(file.clone()),
            span: Some((start, end)),
        }
    }

    /// `true` when stderr coloring should be used. Respects `NO_COLOR` and
    /// falls back to whether stderr is a terminal.
    fn use_color() -> bool {
        if std::env::var_os("NO_COLOR").is_some() {
            return false;
        }
        std::io::IsTerminal::is_terminal(&std::io::stderr())
    }

    /// Render the full diagnostic: location line, message, and a caret
    /// excerpt of the failing span. When `TOMO_STACKTRACE` is set, a Rust
    /// backtrace of the reporting site is appended.
    pub fn report(&self) -> String {
        let color = Self::use_color();
        let mut out = String::new();
        let header = match (&self.file, self.span) {
            (Some(file), Some((start, _))) => {
                let (line, column) = file.line_column(start);
                format!(
                    "{}:{}.{}: {}: {}",
                    file.relative_filename(),
                    line,
                    column,
                    self.kind.label(),
                    self.message
                )
            }
            _ => format!("{}: {}", self.kind.label(), self.message),
        };
        if color {
            out.push_str(&format!("{}\n\n", header.red().bold()));
        } else {
            out.push_str(&header);
            out.push_str("\n\n");
        }
        if let (Some(file), Some((start, end))) = (&self.file, self.span) {
            out.push_str(&highlight_excerpt(file, start, end, color));
        }
        if std::env::var_os("TOMO_STACKTRACE").is_some() {
            out.push_str(&format!("\n{}\n", std::backtrace::Backtrace::force_capture()));
        }
        out
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.span) {
            (Some(file), Some((start, _))) => {
                let (line, column) = file.line_column(start);
                write!(f, "{}:{}.{}: {}", file.relative_filename(), line, column, self.message)
            }
            _ => f.write_str(&self.message),
        }
    }
}

impl Error for CompileError {}

/// A few source lines around the failing span, with the span itself
/// underlined by carets (or inverse-video when coloring).
fn highlight_excerpt(file: &SourceFile, start: usize, end: usize, color: bool) -> String {
    let mut out = String::new();
    let (first_line, _) = file.line_column(start);
    let (last_line, _) = file.line_column(end.max(start));
    let context_first = first_line.saturating_sub(2).max(1);
    let context_last = (last_line + 1).min(file.line_count());
    for line_no in context_first..=context_last {
        let Some(line) = file.line_text(line_no) else { continue };
        let line_start = file.line_offset(line_no);
        out.push_str(&format!("{:>6} | {}\n", line_no, line.trim_end_matches('\n')));
        if line_no >= first_line && line_no <= last_line {
            let hl_start = start.saturating_sub(line_start).min(line.len());
            let hl_end = if line_no == last_line {
                end.saturating_sub(line_start).min(line.len())
            } else {
                line.trim_end_matches('\n').len()
            };
            if hl_end > hl_start || (line_no == first_line && hl_end == hl_start) {
                let mut marker = String::new();
                marker.push_str(&" ".repeat(hl_start));
                marker.push_str(&"^".repeat((hl_end - hl_start).max(1)));
                if color {
                    out.push_str(&format!("       | {}\n", marker.red().bold()));
                } else {
                    out.push_str(&format!("       | {}\n", marker));
                }
            }
        }
    }
    out
}

/// Bail out of the current typecheck/codegen function with a spanned error.
///
/// `code_err!(node, ErrorKind::TypeMismatch, "I expected {a}, not {b}")`
#[macro_export]
macro_rules! code_err {
    ($node:expr, $kind:expr, $($msg:tt)+) => {
        return Err($crate::diagnostics::CompileError::at(
            &$node.file,
            $node.start,
            $node.end,
            $kind,
            format!($($msg)+),
        ))
    };
}

/// Build (without returning) a spanned [`CompileError`].
#[macro_export]
macro_rules! spanned_err {
    ($node:expr, $kind:expr, $($msg:tt)+) => {
        $crate::diagnostics::CompileError::at(
            &$node.file,
            $node.start,
            $node.end,
            $kind,
            format!($($msg)+),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceFile;

    #[test]
    fn error_display_includes_location() {
        let file = Rc::new(SourceFile::new("test.tm", "x := 1\ny := nope\n"));
        let err = CompileError::at(&file, 12, 16, ErrorKind::UnknownName, "I don't know 'nope'");
        let shown = err.to_string();
        assert!(shown.starts_with("test.tm:2.6:"), "got: {shown}");
        assert!(shown.contains("I don't know 'nope'"));
    }

    #[test]
    fn excerpt_points_at_span() {
        let file = Rc::new(SourceFile::new("test.tm", "first\nsecond line\nthird\n"));
        let excerpt = highlight_excerpt(&file, 6, 12, false);
        assert!(excerpt.contains("second line"));
        assert!(excerpt.contains("^^^^^^"));
    }
}
