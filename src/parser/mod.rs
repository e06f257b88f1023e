//! 表达式树构造：按运算符优先级把 token 序列划分为左右两部分
pub mod precedence;

pub use precedence::OperatorTable;

use crate::ast::{Node, NodeKind};
use crate::error::{StmtResult, semantic_error, structure_error};
use crate::lexer::{Token, TokenKind};
use crate::types::ValueType;

pub struct TreeBuilder<'a> {
    ops: &'a OperatorTable,
}

/// 找到与 `open` 处 `(` 匹配的 `)`
fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is("(") {
            depth += 1;
        } else if token.is(")") {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

impl<'a> TreeBuilder<'a> {
    pub fn new(ops: &'a OperatorTable) -> Self {
        TreeBuilder { ops }
    }

    pub fn build(&self, tokens: &[Token]) -> StmtResult<Node> {
        let mut tokens = tokens;
        if tokens.is_empty() {
            return Err(structure_error("empty statement"));
        }

        // 整体被一对括号包住时去掉括号
        while tokens.len() >= 2 && tokens[0].is("(") && matching_close(tokens, 0) == Some(tokens.len() - 1) {
            tokens = &tokens[1..tokens.len() - 1];
            if tokens.is_empty() {
                return Err(structure_error("empty brackets"));
            }
        }

        if tokens.len() == 1 {
            return self.leaf(&tokens[0]);
        }

        if tokens.len() == 2 && tokens[0].kind == TokenKind::Type && tokens[1].kind == TokenKind::Name {
            let ty = ValueType::from_keyword(&tokens[0].lexeme)
                .ok_or_else(|| structure_error(format!("unknown type '{}'", tokens[0].lexeme)))?;
            return Ok(Node::leaf(NodeKind::Declaration(ty), tokens[1].lexeme.clone()));
        }

        if tokens[0].is("<<") {
            let argument = self.build(&tokens[1..])?;
            return Ok(Node::binary(
                NodeKind::Operator,
                "<<",
                Node::leaf(NodeKind::Function, "print"),
                argument,
            ));
        }

        self.partition(tokens)
    }

    fn rank_of(&self, token: &Token) -> StmtResult<i32> {
        self.ops
            .rank(&token.lexeme)
            .ok_or_else(|| structure_error(format!("unknown operator '{}'", token.lexeme)))
    }

    fn partition(&self, tokens: &[Token]) -> StmtResult<Node> {
        let mut left: Vec<Token> = Vec::new();
        let mut right: Vec<Token> = Vec::new();
        let mut top: Option<(Token, i32)> = None;
        let mut after_operator = false;
        let mut i = 0;

        // 前导一元运算符：隐含的左操作数是它的优先级
        if tokens[0].is_operator() {
            let rank = self.rank_of(&tokens[0])?;
            left.push(Token::new(TokenKind::Int, rank.to_string()));
            top = Some((tokens[0].clone(), rank));
            after_operator = true;
            i = 1;
        }

        while i < tokens.len() {
            let token = &tokens[i];

            if token.is("(") {
                let close = matching_close(tokens, i)
                    .ok_or_else(|| structure_error("missing ')'"))?;
                let side = if top.is_none() { &mut left } else { &mut right };
                side.extend_from_slice(&tokens[i..=close]);
                after_operator = false;
                i = close + 1;
                continue;
            }
            if token.is(")") {
                return Err(structure_error("unmatched ')'"));
            }
            if token.kind == TokenKind::Bracket {
                return Err(structure_error(format!("unexpected '{}'", token.lexeme)));
            }

            if token.is_operator() && !after_operator {
                let rank = self.rank_of(token)?;
                match top.take() {
                    None => top = Some((token.clone(), rank)),
                    Some((current, current_rank)) if rank <= current_rank => {
                        // 左结合：旧的根连同右部并入左部
                        left.push(current);
                        left.append(&mut right);
                        top = Some((token.clone(), rank));
                    }
                    Some(current) => {
                        right.push(token.clone());
                        top = Some(current);
                    }
                }
                after_operator = true;
            } else {
                let side = if top.is_none() { &mut left } else { &mut right };
                side.push(token.clone());
                after_operator = token.is_operator();
            }
            i += 1;
        }

        let Some((op, rank)) = top else {
            return Err(structure_error("malformed statement"));
        };

        let left_node = if left.is_empty() {
            Node::int(rank)
        } else {
            self.build(&left)?
        };
        let right_node = if right.is_empty() {
            if op.is(";") {
                Node::leaf(NodeKind::Void, "void")
            } else {
                Node::int(rank)
            }
        } else {
            self.build(&right)?
        };

        Ok(Node::op(&op.lexeme, left_node, right_node))
    }

    fn leaf(&self, token: &Token) -> StmtResult<Node> {
        let kind = match token.kind {
            TokenKind::Name if token.lexeme == "void" => NodeKind::Void,
            TokenKind::Name | TokenKind::Type => NodeKind::Name,
            TokenKind::Int => {
                if token.lexeme.parse::<i32>().is_err() {
                    return Err(semantic_error(format!(
                        "integer literal '{}' does not fit in 32 bits",
                        token.lexeme
                    )));
                }
                NodeKind::Int
            }
            TokenKind::Float => NodeKind::Float,
            _ => {
                return Err(structure_error(format!(
                    "'{}' cannot stand alone as an operand",
                    token.lexeme
                )));
            }
        };
        Ok(Node::leaf(kind, token.lexeme.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatementError;
    use crate::lexer::{significant_tokens, tokenize};
    use pretty_assertions::assert_eq;

    fn build(text: &str) -> StmtResult<Node> {
        let ops = OperatorTable::new();
        let tokens = significant_tokens(tokenize(text).unwrap());
        TreeBuilder::new(&ops).build(&tokens)
    }

    fn shape(text: &str) -> String {
        build(text).unwrap().render()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(shape("a + b * c"), "a + (b * c)");
        assert_eq!(shape("a * b + c"), "(a * b) + c");
        assert_eq!(shape("a ^ 2 * b"), "(a ^ 2) * b");
    }

    #[test]
    fn test_left_associative() {
        assert_eq!(shape("a - b - c"), "(a - b) - c");
        assert_eq!(shape("a + b * c - d"), "(a + (b * c)) - d");
    }

    #[test]
    fn test_brackets() {
        assert_eq!(shape("(a + b) * c"), "(a + b) * c");
        assert_eq!(shape("((a))"), "a");
        assert_eq!(shape("(a) + (b)"), "a + b");
    }

    #[test]
    fn test_declaration_and_assignment() {
        let tree = build("int x = 5;").unwrap();
        assert!(tree.is_operator(";"));
        assert!(tree.right().unwrap().is_void());
        let assign = tree.left().unwrap();
        assert_eq!(assign.lexeme(), "=");
        assert_eq!(
            assign.left().unwrap().value.kind,
            NodeKind::Declaration(ValueType::Int)
        );
        assert_eq!(shape("int x"), "int x");
    }

    #[test]
    fn test_print() {
        let tree = build("print x + 1").unwrap();
        assert_eq!(tree.lexeme(), "<<");
        assert_eq!(tree.left().unwrap().value.kind, NodeKind::Function);
        assert_eq!(tree.right().unwrap().render(), "x + 1");
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(shape("-x"), "0 - x");
        assert_eq!(shape("a * -b"), "a * (0 - b)");
        assert_eq!(shape("x = -5"), "x = (0 - 5)");
    }

    #[test]
    fn test_ternary_shape() {
        let tree = build("( a > 0 ) ? ( b = 1 ; ) : ( void )").unwrap();
        assert_eq!(tree.lexeme(), "?");
        assert_eq!(tree.left().unwrap().render(), "a > 0");
        let branches = tree.right().unwrap();
        assert_eq!(branches.lexeme(), ":");
        assert_eq!(branches.left().unwrap().render(), "(b = 1) ; void");
        assert!(branches.right().unwrap().is_void());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(build("(a) (b)"), Err(StatementError::Structure { .. })));
        assert!(matches!(build("(a + b"), Err(StatementError::Structure { .. })));
        assert!(matches!(build("a + b)"), Err(StatementError::Structure { .. })));
    }

    #[test]
    fn test_int_literal_range() {
        assert_eq!(shape("x = 2147483647"), "x = 2147483647");
        match build("int y = 99999999999") {
            Err(StatementError::Semantic { message }) => assert!(message.contains("99999999999")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
