//! 表达式树的代数化简
use tracing::trace;

use crate::ast::Node;
use crate::error::{StmtResult, arithmetic_error};
use crate::types::ValueType;

/// 优化级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// 只去掉 `a ; void`、`x * 1`、`1 * x`
    Structural,
    Full,
}

pub struct Optimizer {
    level: OptLevel,
}

const FOLDABLE: [&str; 5] = ["+", "-", "*", "/", "^"];

/// 浮点结果的字面量文本，始终带小数点
fn format_float(value: f64) -> String {
    let text = format!("{}", value);
    if text.contains('.') { text } else { format!("{}.0", text) }
}

/// 对两个字面量做常量折叠，结果取较宽的类型
fn fold(op: &str, left: &Node, right: &Node) -> StmtResult<Node> {
    let (Some(lt), Some(rt)) = (left.literal_type(), right.literal_type()) else {
        return Err(arithmetic_error("folding requires two literals"));
    };
    let parse_err = |n: &Node| arithmetic_error(format!("invalid literal '{}'", n.lexeme()));

    match lt.widen(rt) {
        ValueType::Int => {
            let a: i32 = left.lexeme().parse().map_err(|_| parse_err(left))?;
            let b: i32 = right.lexeme().parse().map_err(|_| parse_err(right))?;
            let value = match op {
                "+" => a.wrapping_add(b),
                "-" => a.wrapping_sub(b),
                "*" => a.wrapping_mul(b),
                "/" => {
                    if b == 0 {
                        return Err(arithmetic_error("Can't divide by 0."));
                    }
                    a.wrapping_div(b)
                }
                _ if b >= 0 => a.wrapping_pow(b as u32),
                _ => (a as f64).powf(b as f64) as i32,
            };
            Ok(Node::int(value))
        }
        ValueType::Float => {
            let a: f64 = left.lexeme().parse().map_err(|_| parse_err(left))?;
            let b: f64 = right.lexeme().parse().map_err(|_| parse_err(right))?;
            let value = match op {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                "/" => {
                    if b == 0.0 {
                        return Err(arithmetic_error("Can't divide by 0."));
                    }
                    a / b
                }
                _ => a.powf(b),
            };
            if !value.is_finite() {
                return Err(arithmetic_error(format!(
                    "{} {} {} is not a finite number",
                    left.lexeme(),
                    op,
                    right.lexeme()
                )));
            }
            Ok(Node::literal(&format_float(value)))
        }
    }
}

impl Optimizer {
    pub fn new(level: OptLevel) -> Self {
        Optimizer { level }
    }

    /// 自底向上化简；每个节点反复应用规则直到没有规则可用
    pub fn optimize(&self, node: Node) -> StmtResult<Node> {
        let Node { value, resolved, ty, children } = node;
        let node = match children {
            None => return Ok(Node { value, resolved, ty, children: None }),
            Some(children) => {
                let (left, right) = *children;
                Node {
                    value,
                    resolved,
                    ty,
                    children: Some(Box::new((self.optimize(left)?, self.optimize(right)?))),
                }
            }
        };

        match self.rewrite(&node)? {
            Some(next) => {
                trace!(from = %node.render(), to = %next.render(), "rewrite");
                self.optimize(next)
            }
            None => Ok(node),
        }
    }

    fn rewrite(&self, node: &Node) -> StmtResult<Option<Node>> {
        let (Some(l), Some(r)) = (node.left(), node.right()) else {
            return Ok(None);
        };
        let op = node.lexeme();

        if op == ";" && r.is_void() {
            return Ok(Some(l.clone()));
        }
        if op == "*" && r.is_literal_value(1.0) {
            return Ok(Some(l.clone()));
        }
        if op == "*" && l.is_literal_value(1.0) {
            return Ok(Some(r.clone()));
        }

        if self.level == OptLevel::Structural {
            return Ok(None);
        }

        if op == "/" && r.is_literal_value(0.0) {
            return Err(arithmetic_error("Can't divide by 0."));
        }
        if FOLDABLE.contains(&op) && l.is_literal() && r.is_literal() {
            return fold(op, l, r).map(Some);
        }

        let rewritten = match op {
            "/" if r.is_literal_value(1.0) => Some(l.clone()),
            "^" if r.is_literal_value(0.0) => Some(Node::int(1)),
            "-" if r.is_literal_value(0.0) => Some(l.clone()),
            "-" if l.same_shape(r) => Some(Node::int(0)),
            "+" if l.same_shape(r) => Some(Node::op("*", l.clone(), Node::int(2))),
            "*" if l.is_leaf() && l.same_shape(r) => Some(Node::op("^", l.clone(), Node::int(2))),
            "*" => Self::merge_powers(l, r),
            "^" if l.is_operator("^") => match (l.left(), l.right()) {
                (Some(base), Some(inner)) => Some(Node::op(
                    "^",
                    base.clone(),
                    Node::op("*", inner.clone(), r.clone()),
                )),
                _ => None,
            },
            _ => None,
        };
        Ok(rewritten)
    }

    /// `x * x^n`、`x^n * x`、`x^a * x^b` 合并为一个幂
    fn merge_powers(l: &Node, r: &Node) -> Option<Node> {
        let power_parts = |n: &Node| -> Option<(Node, Node)> {
            if n.is_operator("^") {
                Some((n.left()?.clone(), n.right()?.clone()))
            } else {
                None
            }
        };

        match (power_parts(l), power_parts(r)) {
            (Some((lb, le)), Some((rb, re))) if lb.same_shape(&rb) => {
                Some(Node::op("^", lb, Node::op("+", le, re)))
            }
            (None, Some((rb, re))) if rb.same_shape(l) => {
                Some(Node::op("^", rb, Node::op("+", re, Node::int(1))))
            }
            (Some((lb, le)), None) if lb.same_shape(r) => {
                Some(Node::op("^", lb, Node::op("+", le, Node::int(1))))
            }
            _ => None,
        }
    }
}
