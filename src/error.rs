use thiserror::Error;
use std::fmt;

/// 单条语句内的错误，驱动器在语句边界捕获后继续编译下一条
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatementError {
    #[error("Lexer error at column {column}: {message}")]
    Lexer { column: usize, message: String },

    #[error("Structure error: {message}")]
    Structure { message: String },

    #[error("Grammar error at token {position} ('{token}'): {message}\n{excerpt}")]
    Grammar { position: usize, token: String, message: String, excerpt: String },

    #[error("Semantic error: {message}")]
    Semantic { message: String },

    #[error("{message}")]
    Arithmetic { message: String },

    #[error("Table error: {message}")]
    Table { message: String },
}

/// 终止整个编译过程的错误
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Grammar definition error: {0}")]
    GrammarDefinition(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type StmtResult<T> = Result<T, StatementError>;
pub type FatalResult<T> = Result<T, FatalError>;

impl From<std::io::Error> for FatalError {
    fn from(e: std::io::Error) -> Self {
        FatalError::Io(e.to_string())
    }
}

/// 面向用户的诊断信息：行号 + 语句错误
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub line: usize,
    pub error: StatementError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.error)
    }
}

pub fn lexer_error(column: usize, message: impl Into<String>) -> StatementError {
    StatementError::Lexer {
        column,
        message: message.into(),
    }
}

pub fn structure_error(message: impl Into<String>) -> StatementError {
    StatementError::Structure {
        message: message.into(),
    }
}

pub fn semantic_error(message: impl Into<String>) -> StatementError {
    StatementError::Semantic {
        message: message.into(),
    }
}

pub fn arithmetic_error(message: impl Into<String>) -> StatementError {
    StatementError::Arithmetic {
        message: message.into(),
    }
}

pub fn table_error(message: impl Into<String>) -> StatementError {
    StatementError::Table {
        message: message.into(),
    }
}

/// 构造语法错误，附带插入符号指向出错的 token
pub fn grammar_error(lexemes: &[String], position: usize, message: impl Into<String>) -> StatementError {
    let mut line = String::new();
    let mut caret = String::new();
    for (i, lexeme) in lexemes.iter().enumerate() {
        if i > 0 {
            line.push(' ');
            caret.push(' ');
        }
        line.push_str(lexeme);
        let fill = if i == position { '^' } else { ' ' };
        caret.extend(std::iter::repeat(fill).take(lexeme.chars().count()));
    }
    if position >= lexemes.len() {
        if !line.is_empty() {
            line.push(' ');
            caret.push(' ');
        }
        caret.push('^');
    }
    let token = lexemes.get(position).cloned().unwrap_or_else(|| "<eof>".to_string());
    StatementError::Grammar {
        position,
        token,
        message: message.into(),
        excerpt: format!("    {}\n    {}", line, caret.trim_end()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic { line: 3, error: arithmetic_error("Can't divide by 0.") };
        assert_eq!(diag.to_string(), "Line 3: Can't divide by 0.");
    }

    #[test]
    fn test_grammar_error_caret() {
        let lexemes: Vec<String> = ["int", "x", "=", "=", "5"].iter().map(|s| s.to_string()).collect();
        match grammar_error(&lexemes, 3, "invalid symbol or missing bracket") {
            StatementError::Grammar { position, token, excerpt, .. } => {
                assert_eq!(position, 3);
                assert_eq!(token, "=");
                assert_eq!(excerpt, "    int x = = 5\n            ^");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_grammar_error_past_end() {
        let lexemes: Vec<String> = ["x", "="].iter().map(|s| s.to_string()).collect();
        match grammar_error(&lexemes, 2, "no applicable production") {
            StatementError::Grammar { token, .. } => assert_eq!(token, "<eof>"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
