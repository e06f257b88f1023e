//! NASM 指令模板。每个函数返回以换行结尾的若干行汇编。
use crate::types::ValueType;

/// 数据段与导出的入口符号
pub fn preamble(scope: &str) -> String {
    let mut s = String::new();
    s.push_str("section .data\n");
    s.push_str(&format!("{}:     db \"%d\", 10, 0\n", ValueType::Int.format_label()));
    s.push_str(&format!("{}:   db \"%f\", 10, 0\n", ValueType::Float.format_label()));
    s.push('\n');
    s.push_str("section .text\n");
    s.push_str(&format!("global {}\n", scope));
    s.push_str("extern printf\n");
    s
}

/// 汇编与链接命令的注释
pub fn build_hint(stem: &str) -> String {
    format!(
        "\n; How to build\n; nasm -f elf64 -o {stem}.o -l {stem}.lst {stem}.asm\n; gcc -no-pie -o {stem} {stem}.o\n; ./{stem}\n"
    )
}

/// 函数入口与栈帧
pub fn prologue(scope: &str, frame: usize) -> String {
    let mut s = format!("\n{}:\npush rbp\nmov rbp, rsp\n", scope);
    if frame > 0 {
        s.push_str(&format!("sub rsp, {}\n", frame));
    }
    s
}

pub fn epilogue() -> String {
    "\ndone:\nmov rbx, 0\nmov rax, 1\nint 0x80\n".to_string()
}

pub fn comment(line: usize, source: &str) -> String {
    format!("; Line {}: {}\n", line, source.trim())
}

pub fn label(name: &str) -> String {
    format!(".{}:\n", name)
}

pub fn jump(name: &str) -> String {
    format!("jmp .{}\n", name)
}

/// 浮点立即数
pub fn float_immediate(text: &str) -> String {
    format!("__float32__({})", text)
}

pub fn mov(dest: &str, src: &str) -> String {
    format!("mov {}, {}\n", dest, src)
}

/// 整数二元运算，结果留在 eax
pub fn int_binary(op: &str, left: &str, right: &str) -> String {
    match op {
        "+" => format!("mov eax, {}\nadd eax, {}\n", left, right),
        "-" => format!("mov eax, {}\nsub eax, {}\n", left, right),
        "*" => format!("mov eax, {}\nimul eax, {}\n", left, right),
        _ => format!("mov eax, {}\ncdq\nmov ecx, {}\nidiv ecx\n", left, right),
    }
}

/// 整数幂：ecx 计数循环，结果留在 eax
pub fn int_power(base: &str, exponent: &str, label: &str) -> String {
    format!(
        "mov ecx, {exponent}\nmov eax, 1\n.{label}:\ncmp ecx, 0\njle .{label}_end\nimul eax, {base}\ndec ecx\njmp .{label}\n.{label}_end:\n"
    )
}

/// 浮点二元运算：xmm0 op= xmm1
pub fn float_binary(op: &str) -> String {
    let mnemonic = match op {
        "+" => "addss",
        "-" => "subss",
        "*" => "mulss",
        _ => "divss",
    };
    format!("{} xmm0, xmm1\n", mnemonic)
}

/// 浮点幂：xmm1 为底数，结果留在 xmm0
pub fn float_power(exponent: &str, label: &str) -> String {
    format!(
        "mov eax, {one}\nmovd xmm0, eax\nmov ecx, {exponent}\n.{label}:\ncmp ecx, 0\njle .{label}_end\nmulss xmm0, xmm1\ndec ecx\njmp .{label}\n.{label}_end:\n",
        one = float_immediate("1.0"),
    )
}

/// 整数比较
pub fn int_compare(left: &str, right: &str) -> String {
    format!("mov eax, {}\ncmp eax, {}\n", left, right)
}

pub fn float_compare() -> String {
    "comiss xmm0, xmm1\n".to_string()
}

/// 条件不成立时跳转的指令
pub fn jump_if_false(op: &str, ty: ValueType) -> &'static str {
    match (ty, op) {
        (_, "==") => "jne",
        (_, "!=") => "je",
        (ValueType::Int, "<") => "jge",
        (ValueType::Int, "<=") => "jg",
        (ValueType::Int, ">") => "jle",
        (ValueType::Int, _) => "jl",
        (ValueType::Float, "<") => "jae",
        (ValueType::Float, "<=") => "ja",
        (ValueType::Float, ">") => "jbe",
        (ValueType::Float, _) => "jb",
    }
}

/// 比较结果写入 eax（0 或 1）
pub fn set_flag(op: &str, ty: ValueType) -> String {
    let mnemonic = match (ty, op) {
        (_, "==") => "sete",
        (_, "!=") => "setne",
        (ValueType::Int, "<") => "setl",
        (ValueType::Int, "<=") => "setle",
        (ValueType::Int, ">") => "setg",
        (ValueType::Int, _) => "setge",
        (ValueType::Float, "<") => "setb",
        (ValueType::Float, "<=") => "setbe",
        (ValueType::Float, ">") => "seta",
        (ValueType::Float, _) => "setae",
    };
    format!("{} al\nmovzx eax, al\n", mnemonic)
}

pub fn conditional_jump(mnemonic: &str, target: &str) -> String {
    format!("{} .{}\n", mnemonic, target)
}

/// 非比较条件：与 0 比较
pub fn test_zero(ty: ValueType) -> String {
    match ty {
        ValueType::Int => "cmp eax, 0\n".to_string(),
        ValueType::Float => "xorps xmm1, xmm1\ncomiss xmm0, xmm1\n".to_string(),
    }
}

/// printf 调用序列
pub fn print(location: &str, ty: ValueType) -> String {
    match ty {
        ValueType::Int => format!(
            "mov edi, {}\nmov esi, {}\nmov eax, 0\ncall printf\n",
            ty.format_label(),
            location
        ),
        ValueType::Float => format!(
            "cvtss2sd xmm0, {}\nmov edi, {}\nmov eax, 1\ncall printf\n",
            location,
            ty.format_label()
        ),
    }
}
