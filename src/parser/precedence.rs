use std::collections::HashMap;

/// 运算符优先级表，数值越小越先成为树根
#[derive(Debug, Clone)]
pub struct OperatorTable {
    ranks: HashMap<&'static str, i32>,
}

impl OperatorTable {
    pub fn new() -> Self {
        let entries: [(&'static str, i32); 16] = [
            (";", -5),
            ("=", -4),
            ("?", -3),
            (":", -2),
            ("==", -1),
            ("!=", -1),
            ("<", -1),
            (">", -1),
            ("<=", -1),
            (">=", -1),
            ("+", 0),
            ("-", 0),
            ("*", 1),
            ("/", 1),
            ("^", 2),
            ("<<", 5),
        ];
        OperatorTable { ranks: entries.into_iter().collect() }
    }

    pub fn rank(&self, op: &str) -> Option<i32> {
        self.ranks.get(op).copied()
    }
}

impl Default for OperatorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let table = OperatorTable::new();
        let order = [";", "=", "?", ":", "<", "+", "*", "^", "<<"];
        for pair in order.windows(2) {
            assert!(table.rank(pair[0]) < table.rank(pair[1]), "{} !< {}", pair[0], pair[1]);
        }
        assert_eq!(table.rank("-"), Some(0));
        assert_eq!(table.rank("%"), None);
    }
}
