//! Reified classification rules. Each cascade is an ordered list of
//! (predicate, label) pairs evaluated top to bottom, first match wins, with
//! an explicit default. `classify` is the unit-testable Rust evaluation;
//! `case_expr` compiles the same cascade to the SQL CASE expression used by
//! the vectorized dimension builds.

/// One keyword rule: the label applies when the lowercased text contains any
/// of the keywords.
pub struct KeywordRule {
    pub label: &'static str,
    pub keywords: &'static [&'static str],
}

pub struct KeywordCascade {
    pub rules: &'static [KeywordRule],
    pub default: &'static str,
}

impl KeywordCascade {
    pub fn classify(&self, text: &str) -> &'static str {
        let lower = text.to_lowercase();
        for rule in self.rules {
            if rule.keywords.iter().any(|kw| lower.contains(kw)) {
                return rule.label;
            }
        }
        self.default
    }

    /// SQL CASE over the given column, labels emitted as string literals.
    pub fn case_expr(&self, column: &str) -> String {
        self.build_case(column, true, &quote(self.default))
    }

    /// SQL CASE with unquoted labels, for boolean and numeric cascades.
    pub fn case_expr_raw(&self, column: &str) -> String {
        self.build_case(column, false, self.default)
    }

    /// SQL CASE whose default arm is an arbitrary expression rather than a
    /// literal, for cascades that fall back to another condition.
    pub fn case_expr_with_default(&self, column: &str, default_expr: &str) -> String {
        self.build_case(column, true, default_expr)
    }

    fn build_case(&self, column: &str, quoted: bool, default_expr: &str) -> String {
        let subject = format!("LOWER(COALESCE({column}, ''))");
        let mut sql = String::from("CASE");
        for rule in self.rules {
            let predicates: Vec<String> = rule
                .keywords
                .iter()
                .map(|kw| format!("{subject} LIKE '%{kw}%'"))
                .collect();
            let label = if quoted {
                quote(rule.label)
            } else {
                rule.label.to_string()
            };
            sql.push_str(&format!(" WHEN {} THEN {}", predicates.join(" OR "), label));
        }
        sql.push_str(&format!(" ELSE {default_expr} END"));
        sql
    }
}

/// One integer rule over ward or district numbers: either an inclusive range
/// or an explicit list.
pub enum RangeRule {
    Range {
        lo: i32,
        hi: i32,
        label: &'static str,
    },
    List {
        values: &'static [i32],
        label: &'static str,
    },
}

pub struct RangeCascade {
    pub rules: &'static [RangeRule],
    pub default: &'static str,
}

impl RangeCascade {
    pub fn classify(&self, value: Option<i32>) -> &'static str {
        if let Some(v) = value {
            for rule in self.rules {
                match rule {
                    RangeRule::Range { lo, hi, label } => {
                        if v >= *lo && v <= *hi {
                            return label;
                        }
                    }
                    RangeRule::List { values, label } => {
                        if values.contains(&v) {
                            return label;
                        }
                    }
                }
            }
        }
        self.default
    }

    pub fn case_expr(&self, column: &str) -> String {
        self.case_expr_with_default(column, &quote(self.default))
    }

    pub fn case_expr_with_default(&self, column: &str, default_expr: &str) -> String {
        let mut sql = String::from("CASE");
        for rule in self.rules {
            match rule {
                RangeRule::Range { lo, hi, label } => {
                    sql.push_str(&format!(
                        " WHEN {column} BETWEEN {lo} AND {hi} THEN {}",
                        quote(label)
                    ));
                }
                RangeRule::List { values, label } => {
                    let list: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                    sql.push_str(&format!(
                        " WHEN {column} IN ({}) THEN {}",
                        list.join(", "),
                        quote(label)
                    ));
                }
            }
        }
        sql.push_str(&format!(" ELSE {default_expr} END"));
        sql
    }
}

fn quote(label: &str) -> String {
    format!("'{}'", label.replace('\'', "''"))
}
