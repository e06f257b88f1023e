use logos::Logos;
use std::fmt;
use crate::error::{StmtResult, lexer_error, structure_error};

/// logos 识别的原始词法单元
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\f\r\n]+")]
enum RawToken {
    #[regex(r"//[^\n]*")]
    Comment,

    // 类型关键字
    #[token("int")]
    #[token("int32")]
    #[token("float")]
    #[token("float32")]
    Type,

    // 输出语句：print 与 << 等价
    #[token("print")]
    #[token("<<")]
    Print,

    // 只允许出现在 if 块内部
    #[token("if")]
    If,
    #[token("else")]
    Else,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Name,

    #[regex(r"[0-9]+\.[0-9]+")]
    #[regex(r"\.[0-9]+")]
    Float,

    #[regex(r"[0-9]+")]
    Int,

    #[token("+")]
    #[token("-")]
    #[token("*")]
    #[token("/")]
    #[token("^")]
    #[token("=")]
    #[token(";")]
    Operator,

    #[token("?")]
    #[token(":")]
    #[token("==")]
    #[token("!=")]
    #[token("<")]
    #[token(">")]
    #[token("<=")]
    #[token(">=")]
    Ternary,

    #[token("(")]
    #[token(")")]
    #[token("{")]
    #[token("}")]
    Bracket,
}

/// 词法单元类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Name,
    Int,
    Float,
    Type,
    Operator,
    Ternary,
    Bracket,
    Comment,
    /// 整个 if/else 子句，交给语句降级处理
    IfBlock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>) -> Self {
        Token { kind, lexeme: lexeme.into() }
    }

    pub fn is(&self, lexeme: &str) -> bool {
        self.lexeme == lexeme
    }

    pub fn is_operator(&self) -> bool {
        matches!(self.kind, TokenKind::Operator | TokenKind::Ternary)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lexeme)
    }
}

/// 文本是否以关键字 `kw` 开头（后面不能紧跟标识符字符）
pub fn starts_with_keyword(text: &str, kw: &str) -> bool {
    let text = text.trim_start();
    match text.strip_prefix(kw) {
        Some(rest) => !rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        None => false,
    }
}

/// 对单条语句做词法分析
pub fn tokenize(statement: &str) -> StmtResult<Vec<Token>> {
    if starts_with_keyword(statement, "if") && statement.contains('{') {
        return Ok(vec![Token::new(TokenKind::IfBlock, statement.trim())]);
    }

    let mut lexer = RawToken::lexer(statement);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let slice = lexer.slice();
        let kind = match result {
            Ok(RawToken::Comment) => TokenKind::Comment,
            Ok(RawToken::Type) => TokenKind::Type,
            Ok(RawToken::Print) => {
                tokens.push(Token::new(TokenKind::Operator, "<<"));
                continue;
            }
            Ok(RawToken::If) | Ok(RawToken::Else) => {
                return Err(structure_error(format!(
                    "'{}' must start an if block with a braced body",
                    slice
                )));
            }
            Ok(RawToken::Name) => TokenKind::Name,
            Ok(RawToken::Float) => TokenKind::Float,
            Ok(RawToken::Int) => TokenKind::Int,
            Ok(RawToken::Operator) => TokenKind::Operator,
            Ok(RawToken::Ternary) => TokenKind::Ternary,
            Ok(RawToken::Bracket) => TokenKind::Bracket,
            Err(_) => {
                return Err(lexer_error(
                    span.start + 1,
                    format!("Unexpected character: '{}'", slice),
                ));
            }
        };
        tokens.push(Token::new(kind, slice));
    }

    Ok(tokens)
}

/// 去掉注释 token
pub fn significant_tokens(tokens: Vec<Token>) -> Vec<Token> {
    tokens.into_iter().filter(|t| t.kind != TokenKind::Comment).collect()
}

/// 在顶层 `;` 处切分文本，每段保留自己的 `;`。
/// 圆括号和花括号内部的 `;` 不切分；`//` 之后的内容整体归入最后一段。
pub fn split_statements(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if c == '/' && text[idx + 1..].starts_with('/') {
            current.push_str(&text[idx..]);
            break;
        }
        current.push(c);
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => depth -= 1,
            ';' if depth <= 0 => {
                pieces.push(std::mem::take(&mut current));
            }
            _ => {}
        }
    }

    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_declaration() {
        let tokens = tokenize("int x = 5;").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Type, TokenKind::Name, TokenKind::Operator, TokenKind::Int, TokenKind::Operator]
        );
    }

    #[test]
    fn test_print_normalized() {
        let tokens = tokenize("print y;").unwrap();
        assert_eq!(tokens[0], Token::new(TokenKind::Operator, "<<"));
        let tokens = tokenize("<< y;").unwrap();
        assert_eq!(tokens[0], Token::new(TokenKind::Operator, "<<"));
    }

    #[test]
    fn test_longest_match_operators() {
        let tokens = tokenize("a <= b == c < d").unwrap();
        let lexemes: Vec<&str> = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(lexemes, vec!["a", "<=", "b", "==", "c", "<", "d"]);
        assert!(tokens.iter().filter(|t| t.is_operator()).all(|t| t.kind == TokenKind::Ternary));
    }

    #[test]
    fn test_numbers_and_names() {
        let tokens = tokenize("float f = .5 + 2.25 * integer").unwrap();
        assert_eq!(tokens[3].kind, TokenKind::Float);
        assert_eq!(tokens[5].kind, TokenKind::Float);
        assert_eq!(tokens[7], Token::new(TokenKind::Name, "integer"));
    }

    #[test]
    fn test_comments_filtered() {
        let tokens = tokenize("x = 1; // set x").unwrap();
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Comment);
        let tokens = significant_tokens(tokens);
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn test_if_block_token() {
        let tokens = tokenize("if (a > 0) { b = 1; }").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::IfBlock);
        assert!(tokenize("iffy = 1;").unwrap()[0].kind == TokenKind::Name);
    }

    #[test]
    fn test_stray_keywords() {
        assert!(matches!(tokenize("else"), Err(crate::error::StatementError::Structure { .. })));
    }

    #[test]
    fn test_unknown_character() {
        match tokenize("x = 3 $ 4") {
            Err(crate::error::StatementError::Lexer { column, .. }) => assert_eq!(column, 7),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_split_statements() {
        assert_eq!(split_statements("int a = 1; a = 2;"), vec!["int a = 1;", " a = 2;"]);
        assert_eq!(
            split_statements("if (a > 0) { b = 1; c = 2; }"),
            vec!["if (a > 0) { b = 1; c = 2; }"]
        );
        assert_eq!(split_statements("x = 1; // a; b"), vec!["x = 1;", " // a; b"]);
    }
}
