use crate::types::ValueType;

/// 表达式树节点的类别
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// 算术运算符以及 `;` `=` `<<`
    Operator,
    /// `?` `:` 以及比较运算符
    Ternary,
    Name,
    Int,
    Float,
    /// `type name` 形式的声明叶子
    Declaration(ValueType),
    /// 内建函数名（目前只有 print）
    Function,
    /// 空语句体
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeValue {
    pub kind: NodeKind,
    pub lexeme: String,
}

/// 表达式树：叶子没有子节点，内部节点恰好两个
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub value: NodeValue,
    /// 符号解析后的文本：栈位置或字面量
    pub resolved: String,
    /// 符号解析后的操作数类型
    pub ty: Option<ValueType>,
    pub children: Option<Box<(Node, Node)>>,
}

pub const RELATIONAL_OPERATORS: [&str; 6] = ["==", "!=", "<", ">", "<=", ">="];

pub fn is_relational(op: &str) -> bool {
    RELATIONAL_OPERATORS.contains(&op)
}

impl Node {
    pub fn leaf(kind: NodeKind, lexeme: impl Into<String>) -> Self {
        Node {
            value: NodeValue { kind, lexeme: lexeme.into() },
            resolved: String::new(),
            ty: None,
            children: None,
        }
    }

    pub fn binary(kind: NodeKind, op: impl Into<String>, left: Node, right: Node) -> Self {
        Node {
            value: NodeValue { kind, lexeme: op.into() },
            resolved: String::new(),
            ty: None,
            children: Some(Box::new((left, right))),
        }
    }

    /// 运算符节点，根据运算符文本自动选择类别
    pub fn op(op: &str, left: Node, right: Node) -> Self {
        let kind = if op == "?" || op == ":" || is_relational(op) {
            NodeKind::Ternary
        } else {
            NodeKind::Operator
        };
        Node::binary(kind, op, left, right)
    }

    /// 由数值字面量文本构造叶子
    pub fn literal(text: &str) -> Self {
        match ValueType::of_literal(text) {
            Some(ValueType::Float) => Node::leaf(NodeKind::Float, text),
            _ => Node::leaf(NodeKind::Int, text),
        }
    }

    pub fn int(value: i32) -> Self {
        Node::leaf(NodeKind::Int, value.to_string())
    }

    pub fn lexeme(&self) -> &str {
        &self.value.lexeme
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn left(&self) -> Option<&Node> {
        self.children.as_ref().map(|c| &c.0)
    }

    pub fn right(&self) -> Option<&Node> {
        self.children.as_ref().map(|c| &c.1)
    }

    pub fn is_operator(&self, op: &str) -> bool {
        !self.is_leaf() && self.value.lexeme == op
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.value.kind, NodeKind::Int | NodeKind::Float)
    }

    pub fn is_void(&self) -> bool {
        self.value.kind == NodeKind::Void
    }

    /// 字面量的数值类型
    pub fn literal_type(&self) -> Option<ValueType> {
        match self.value.kind {
            NodeKind::Int => Some(ValueType::Int),
            NodeKind::Float => Some(ValueType::Float),
            _ => None,
        }
    }

    /// 字面量是否等于给定整数（整数和浮点字面量都可比较）
    pub fn is_literal_value(&self, value: f64) -> bool {
        self.is_literal() && self.value.lexeme.parse::<f64>().map_or(false, |v| v == value)
    }

    /// 结构相等（忽略 resolved 字段）
    pub fn same_shape(&self, other: &Node) -> bool {
        if self.value != other.value {
            return false;
        }
        match (&self.children, &other.children) {
            (None, None) => true,
            (Some(a), Some(b)) => a.0.same_shape(&b.0) && a.1.same_shape(&b.1),
            _ => false,
        }
    }

    /// 类源码形式的中缀文本
    pub fn render(&self) -> String {
        self.render_with(&|n: &Node| match &n.value.kind {
            NodeKind::Declaration(ty) => format!("{} {}", ty, n.value.lexeme),
            _ => n.value.lexeme.clone(),
        })
    }

    /// 使用解析后文本的中缀形式，作为符号表中值条目的键
    pub fn render_resolved(&self) -> String {
        self.render_with(&|n: &Node| {
            if n.resolved.is_empty() {
                n.value.lexeme.clone()
            } else {
                n.resolved.clone()
            }
        })
    }

    fn render_with(&self, leaf_text: &dyn Fn(&Node) -> String) -> String {
        match &self.children {
            None => leaf_text(self),
            Some(children) => {
                let (left, right) = (&children.0, &children.1);
                let wrap = |child: &Node| {
                    let text = child.render_with(leaf_text);
                    if child.is_leaf() { text } else { format!("({})", text) }
                };
                format!("{} {} {}", wrap(left), self.value.lexeme, wrap(right))
            }
        }
    }

    /// 前序遍历中出现的所有名字叶子
    pub fn names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match &self.children {
            None => {
                if self.value.kind == NodeKind::Name {
                    out.push(&self.value.lexeme);
                }
            }
            Some(children) => {
                children.0.collect_names(out);
                children.1.collect_names(out);
            }
        }
    }
}
