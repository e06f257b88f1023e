//! 按符号表的插入顺序生成 NASM 列表
use tracing::{debug, trace};

use super::{Sink, templates};
use crate::ast::{Node, NodeKind, is_relational};
use crate::config::CompilerConfig;
use crate::semantic::symbols::{SignalKind, Spill, Symbol, SymbolKind, SymbolTable};
use crate::types::ValueType;

pub struct NasmGenerator<'a> {
    table: &'a SymbolTable,
    config: &'a CompilerConfig,
    /// 当前条目已占用的临时槽
    scratch: usize,
    max_scratch: usize,
    labels: usize,
}

/// 不经过检查的表达式类型，语义分析已经拒绝了非法组合
fn natural_type(node: &Node) -> ValueType {
    match (node.left(), node.right()) {
        (Some(l), Some(r)) => match node.lexeme() {
            op if is_relational(op) => ValueType::Int,
            "^" => natural_type(l),
            _ => natural_type(l).widen(natural_type(r)),
        },
        _ => node.literal_type().or(node.ty).unwrap_or(ValueType::Int),
    }
}

/// 叶子的汇编操作数
fn operand(node: &Node) -> String {
    match node.value.kind {
        NodeKind::Float => templates::float_immediate(node.lexeme()),
        NodeKind::Int => node.lexeme().to_string(),
        _ if node.resolved.is_empty() => node.lexeme().to_string(),
        _ => node.resolved.clone(),
    }
}

fn is_memory(text: &str) -> bool {
    text.contains('[')
}

/// 分支键去掉 `@` 前缀后作为标签名
fn label_stem(key: &str) -> &str {
    key.trim_start_matches('@')
}

impl<'a> NasmGenerator<'a> {
    pub fn new(table: &'a SymbolTable, config: &'a CompilerConfig) -> Self {
        NasmGenerator { table, config, scratch: 0, max_scratch: 0, labels: 0 }
    }

    pub fn generate(&mut self) -> String {
        let mut out = String::new();
        self.generate_into(&mut out);
        out
    }

    /// 先生成全部语句片段，得到临时槽用量后再写栈帧
    pub fn generate_into(&mut self, sink: &mut dyn Sink) {
        let table = self.table;
        let mut fragments = Vec::new();
        for key in table.order() {
            let Some(symbol) = table.get(key) else {
                continue;
            };
            if symbol.history.is_empty() {
                trace!(key = %key, "entry without history skipped");
                continue;
            }
            self.scratch = 0;
            let fragment = self.entry(key, symbol);
            if !fragment.is_empty() {
                fragments.push(fragment);
            }
        }

        let frame = table.frame_size(self.max_scratch * ValueType::Int.size_in_bytes());
        debug!(frame, fragments = fragments.len(), "listing generated");

        sink.write_fragment(&templates::preamble(&self.config.scope_name));
        if self.config.build_hint {
            sink.write_fragment(&templates::build_hint(&self.config.output_stem));
        }
        sink.write_fragment(&templates::prologue(&self.config.scope_name, frame));
        for fragment in &fragments {
            sink.write_fragment(fragment);
        }
        sink.write_fragment(&templates::epilogue());
    }

    fn entry(&mut self, key: &str, symbol: &Symbol) -> String {
        let mut out = String::new();
        match &symbol.kind {
            SymbolKind::Variable | SymbolKind::Home { .. } => {}
            SymbolKind::Value => {
                let Some(expr) = &symbol.expr else {
                    return out;
                };
                if !symbol.emit {
                    trace!(key, "dead value not emitted");
                    return out;
                }
                out.push_str(&templates::comment(symbol.line, &symbol.source));
                self.assign(&symbol.location(), symbol.ty, expr, &mut out);
            }
            SymbolKind::Store { home } => {
                let (Some(expr), Some(target)) = (&symbol.expr, self.table.get(home)) else {
                    return out;
                };
                out.push_str(&templates::comment(symbol.line, &symbol.source));
                self.assign(&target.location(), target.ty, expr, &mut out);
            }
            SymbolKind::Call { function } => {
                let Some(argument) = &symbol.expr else {
                    return out;
                };
                if function != "print" {
                    trace!(function = %function, "unknown function skipped");
                    return out;
                }
                out.push_str(&templates::comment(symbol.line, &symbol.source));
                out.push_str(&templates::print(&operand(argument), symbol.ty));
            }
            SymbolKind::Branch { has_else, spills } => {
                let Some(condition) = &symbol.expr else {
                    return out;
                };
                out.push_str(&templates::comment(symbol.line, &symbol.source));
                let stem = label_stem(key);
                out.push_str(&templates::label(stem));
                for spill in spills {
                    self.spill(spill, &mut out);
                }
                let target = if *has_else { format!("{}_else", stem) } else { format!("{}_done", stem) };
                self.condition(condition, &target, &mut out);
            }
            SymbolKind::Signal { branch, signal } => {
                let stem = label_stem(branch);
                match signal {
                    SignalKind::Else => {
                        out.push_str(&templates::jump(&format!("{}_done", stem)));
                        out.push_str(&templates::label(&format!("{}_else", stem)));
                    }
                    SignalKind::Done => out.push_str(&templates::label(&format!("{}_done", stem))),
                }
            }
        }
        out
    }

    fn next_label(&mut self, prefix: &str) -> String {
        self.labels += 1;
        format!("{}_{}", prefix, self.labels)
    }

    fn scratch_slot(&mut self, ty: ValueType) -> String {
        let slot = self.table.scratch_slot(self.scratch, ty);
        self.scratch += 1;
        self.max_scratch = self.max_scratch.max(self.scratch);
        slot
    }

    /// 叶子直接返回操作数；子表达式先算进临时槽
    fn operand_of(&mut self, node: &Node, out: &mut String) -> (String, ValueType) {
        let ty = natural_type(node);
        if node.is_leaf() {
            return (operand(node), ty);
        }
        let slot = self.scratch_slot(ty);
        let computed = self.compute(node, out);
        Self::store(&slot, ty, computed, out);
        (slot, ty)
    }

    fn load_float(text: &str, ty: ValueType, register: &str, out: &mut String) {
        match (ty, is_memory(text)) {
            (ValueType::Float, true) => out.push_str(&format!("movss {}, {}\n", register, text)),
            (ValueType::Float, false) => {
                out.push_str(&templates::mov("eax", text));
                out.push_str(&format!("movd {}, eax\n", register));
            }
            (ValueType::Int, true) => out.push_str(&format!("cvtsi2ss {}, {}\n", register, text)),
            (ValueType::Int, false) => {
                out.push_str(&templates::mov("eax", text));
                out.push_str(&format!("cvtsi2ss {}, eax\n", register));
            }
        }
    }

    /// 计算表达式，整数结果在 eax，浮点结果在 xmm0
    fn compute(&mut self, node: &Node, out: &mut String) -> ValueType {
        let (Some(left), Some(right)) = (node.left(), node.right()) else {
            let ty = natural_type(node);
            match ty {
                ValueType::Int => out.push_str(&templates::mov("eax", &operand(node))),
                ValueType::Float => Self::load_float(&operand(node), ty, "xmm0", out),
            }
            return ty;
        };

        let op = node.lexeme();
        let (l, lt) = self.operand_of(left, out);
        let (r, rt) = self.operand_of(right, out);

        if is_relational(op) {
            let ty = lt.widen(rt);
            match ty {
                ValueType::Int => out.push_str(&templates::int_compare(&l, &r)),
                ValueType::Float => {
                    Self::load_float(&l, lt, "xmm0", out);
                    Self::load_float(&r, rt, "xmm1", out);
                    out.push_str(&templates::float_compare());
                }
            }
            out.push_str(&templates::set_flag(op, ty));
            return ValueType::Int;
        }

        if op == "^" {
            let label = self.next_label("pow");
            return match lt {
                ValueType::Int => {
                    out.push_str(&templates::int_power(&l, &r, &label));
                    ValueType::Int
                }
                ValueType::Float => {
                    Self::load_float(&l, lt, "xmm1", out);
                    out.push_str(&templates::float_power(&r, &label));
                    ValueType::Float
                }
            };
        }

        match lt.widen(rt) {
            ValueType::Int => {
                out.push_str(&templates::int_binary(op, &l, &r));
                ValueType::Int
            }
            ValueType::Float => {
                Self::load_float(&l, lt, "xmm0", out);
                Self::load_float(&r, rt, "xmm1", out);
                out.push_str(&templates::float_binary(op));
                ValueType::Float
            }
        }
    }

    fn store(dest: &str, dest_ty: ValueType, from: ValueType, out: &mut String) {
        match (from, dest_ty) {
            (ValueType::Int, ValueType::Int) => out.push_str(&templates::mov(dest, "eax")),
            (ValueType::Float, ValueType::Float) => out.push_str(&format!("movss {}, xmm0\n", dest)),
            (ValueType::Int, ValueType::Float) => {
                out.push_str("cvtsi2ss xmm0, eax\n");
                out.push_str(&format!("movss {}, xmm0\n", dest));
            }
            (ValueType::Float, ValueType::Int) => {
                out.push_str("cvttss2si eax, xmm0\n");
                out.push_str(&templates::mov(dest, "eax"));
            }
        }
    }

    /// 把表达式写入栈槽；字面量直接作为立即数
    fn assign(&mut self, dest: &str, dest_ty: ValueType, expr: &Node, out: &mut String) {
        match (expr.literal_type(), dest_ty) {
            (Some(ValueType::Int), ValueType::Int) | (Some(ValueType::Float), ValueType::Float) => {
                out.push_str(&templates::mov(dest, &operand(expr)));
            }
            (Some(ValueType::Int), ValueType::Float) => {
                let text = templates::float_immediate(&format!("{}.0", expr.lexeme()));
                out.push_str(&templates::mov(dest, &text));
            }
            _ => {
                let from = self.compute(expr, out);
                Self::store(dest, dest_ty, from, out);
            }
        }
    }

    fn spill(&mut self, spill: &Spill, out: &mut String) {
        if !is_memory(&spill.source) {
            let text = match (spill.source_type, spill.home_type) {
                (_, ValueType::Int) => spill.source.clone(),
                (ValueType::Float, ValueType::Float) => templates::float_immediate(&spill.source),
                (ValueType::Int, ValueType::Float) => templates::float_immediate(&format!("{}.0", spill.source)),
            };
            out.push_str(&templates::mov(&spill.home, &text));
            return;
        }
        match (spill.source_type, spill.home_type) {
            (ValueType::Int, ValueType::Int) => {
                out.push_str(&templates::mov("eax", &spill.source));
                out.push_str(&templates::mov(&spill.home, "eax"));
            }
            (from, to) => {
                Self::load_float(&spill.source, from, "xmm0", out);
                Self::store(&spill.home, to, ValueType::Float, out);
            }
        }
    }

    /// 比较并在条件不成立时跳转到 `target`
    fn condition(&mut self, condition: &Node, target: &str, out: &mut String) {
        match (condition.left(), condition.right()) {
            (Some(left), Some(right)) if is_relational(condition.lexeme()) => {
                let (l, lt) = self.operand_of(left, out);
                let (r, rt) = self.operand_of(right, out);
                let ty = lt.widen(rt);
                match ty {
                    ValueType::Int => out.push_str(&templates::int_compare(&l, &r)),
                    ValueType::Float => {
                        Self::load_float(&l, lt, "xmm0", out);
                        Self::load_float(&r, rt, "xmm1", out);
                        out.push_str(&templates::float_compare());
                    }
                }
                out.push_str(&templates::conditional_jump(
                    templates::jump_if_false(condition.lexeme(), ty),
                    target,
                ));
            }
            _ => {
                let ty = self.compute(condition, out);
                out.push_str(&templates::test_zero(ty));
                out.push_str(&templates::conditional_jump("je", target));
            }
        }
    }
}
