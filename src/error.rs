// CyberBasic Error Handling Module
// Line-annotated VM errors with best-effort call-stack traces

#[cfg(not(target_arch = "wasm32"))]
use colored::*;
use std::fmt;

/// Types of errors raised while executing bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StackUnderflow,
    StackOverflow,
    UndefinedVariable,
    UndefinedFunction,
    UnknownForeign,
    TypeError,
    DivisionByZero,
    IndexOutOfBounds,
    DimensionMismatch,
    FileError,
    ForeignCall,
    AssertionFailed,
    InvalidBytecode,
    RuntimeError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::StackUnderflow => write!(f, "StackUnderflow"),
            ErrorKind::StackOverflow => write!(f, "StackOverflow"),
            ErrorKind::UndefinedVariable => write!(f, "UndefinedVariable"),
            ErrorKind::UndefinedFunction => write!(f, "UndefinedFunction"),
            ErrorKind::UnknownForeign => write!(f, "UnknownForeign"),
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::DivisionByZero => write!(f, "DivisionByZero"),
            ErrorKind::IndexOutOfBounds => write!(f, "IndexOutOfBounds"),
            ErrorKind::DimensionMismatch => write!(f, "DimensionMismatch"),
            ErrorKind::FileError => write!(f, "FileError"),
            ErrorKind::ForeignCall => write!(f, "ForeignCallError"),
            ErrorKind::AssertionFailed => write!(f, "AssertionFailed"),
            ErrorKind::InvalidBytecode => write!(f, "InvalidBytecode"),
            ErrorKind::RuntimeError => write!(f, "RuntimeError"),
        }
    }
}

/// One entry of a stack trace: an instruction pointer and its source line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub ip: usize,
    /// `None` when the line map has no entry for `ip`
    pub line: Option<usize>,
}

impl StackFrame {
    pub fn new(ip: usize, line: Option<usize>) -> Self {
        Self { ip, line }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "  at line {} (ip {})", line, self.ip),
            None => write!(f, "  at ip {}", self.ip),
        }
    }
}

/// Main error type for the VM
#[derive(Debug, Clone)]
pub struct CyberError {
    pub kind: ErrorKind,
    pub message: String,
    /// Source line of the failing instruction, once annotated
    pub line: Option<usize>,
    /// Offset of the failing instruction, once annotated
    pub ip: Option<usize>,
    pub stack_trace: Vec<StackFrame>,
}

impl CyberError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            ip: None,
            stack_trace: Vec::new(),
        }
    }

    /// Attach the failing instruction's location. The first annotation wins,
    /// so errors bubbling out of nested host calls keep the innermost line.
    pub fn at(mut self, ip: usize, line: Option<usize>) -> Self {
        if self.ip.is_none() {
            self.ip = Some(ip);
            self.line = line;
        }
        self
    }

    pub fn with_stack_trace(mut self, trace: Vec<StackFrame>) -> Self {
        if self.stack_trace.is_empty() {
            self.stack_trace = trace;
        }
        self
    }

    fn location(&self) -> String {
        match (self.line, self.ip) {
            (Some(line), _) => format!(" at line {}", line),
            (None, Some(ip)) => format!(" at ip {}", ip),
            (None, None) => String::new(),
        }
    }

    /// Format the error for display (with colors for native)
    #[cfg(not(target_arch = "wasm32"))]
    pub fn format_with_options(&self, full_trace: bool) -> String {
        let mut output = format!(
            "{}: {}{}\n",
            self.kind.to_string().red().bold(),
            self.message.white().bold(),
            self.location()
        );

        if !self.stack_trace.is_empty() {
            output.push_str(&format!("\n{}:\n", "Stack trace".yellow().bold()));
            let shown = if full_trace { self.stack_trace.len() } else { 10 };
            for frame in self.stack_trace.iter().take(shown) {
                output.push_str(&format!("{}\n", frame));
            }
            if self.stack_trace.len() > shown {
                let hidden = self.stack_trace.len() - shown;
                output.push_str(&format!("  ... {} more\n", hidden).dimmed().to_string());
            }
        }

        output
    }

    /// Format the error for display (plain text for WASM)
    #[cfg(target_arch = "wasm32")]
    pub fn format_with_options(&self, full_trace: bool) -> String {
        let mut output = format!("{}: {}{}\n", self.kind, self.message, self.location());

        if !self.stack_trace.is_empty() {
            output.push_str("\nStack trace:\n");
            let shown = if full_trace { self.stack_trace.len() } else { 10 };
            for frame in self.stack_trace.iter().take(shown) {
                output.push_str(&format!("{}\n", frame));
            }
        }

        output
    }

    pub fn format(&self) -> String {
        self.format_with_options(false)
    }
}

impl fmt::Display for CyberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.kind, self.message, self.location())
    }
}

impl std::error::Error for CyberError {}

/// Result type for VM operations
pub type CyberResult<T> = Result<T, CyberError>;

// Convenience constructors for common errors
impl CyberError {
    pub fn stack_underflow(context: &str) -> Self {
        Self::new(ErrorKind::StackUnderflow, format!("stack underflow for {}", context))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn division_by_zero() -> Self {
        Self::new(ErrorKind::DivisionByZero, "division by zero")
    }

    pub fn invalid_bytecode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidBytecode, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message)
    }

    pub fn index_out_of_bounds(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexOutOfBounds, message)
    }

    pub fn file_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileError, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_location_wins() {
        let err = CyberError::division_by_zero().at(7, Some(3)).at(12, Some(9));
        assert_eq!(err.ip, Some(7));
        assert_eq!(err.line, Some(3));
        assert_eq!(err.to_string(), "DivisionByZero: division by zero at line 3");
    }

    #[test]
    fn test_display_without_line_uses_ip() {
        let err = CyberError::runtime_error("boom").at(4, None);
        assert_eq!(err.to_string(), "RuntimeError: boom at ip 4");
    }

    #[test]
    fn test_format_lists_frames() {
        let err = CyberError::type_error("invalid operands for +")
            .at(10, Some(2))
            .with_stack_trace(vec![StackFrame::new(10, Some(2)), StackFrame::new(3, None)]);
        let text = err.format_with_options(true);
        assert!(text.contains("invalid operands for +"));
        assert!(text.contains("at line 2 (ip 10)"));
        assert!(text.contains("at ip 3"));
    }
}
