//! 谓词评估器
//!
//! 内置校验谓词的求值逻辑。每个谓词只看字段当前值（比较与确认还会读取记录上的其他字段），
//! 返回零个或多个违规；消息渲染与错误归属由引擎负责。

use crate::messages;
use crate::models::{ComparisonOptions, LengthOptions, NumericalityOptions, Operand, Relation};
use crate::record::{Record, is_blank, type_name};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// 一次谓词失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// 默认消息模板
    pub template: &'static str,
    /// `%{count}` 的取值
    pub count: Option<String>,
    /// 覆盖错误归属的字段（确认校验记在 `<field>_confirmation` 上）
    pub key: Option<String>,
}

impl Violation {
    pub fn new(template: &'static str) -> Self {
        Self {
            template,
            count: None,
            key: None,
        }
    }

    pub fn with_count(template: &'static str, count: impl Into<String>) -> Self {
        Self {
            template,
            count: Some(count.into()),
            key: None,
        }
    }

    fn keyed(mut self, key: String) -> Self {
        self.key = Some(key);
        self
    }

    /// 渲染为 (错误字段, 消息)；`message` 为规则上的覆盖模板
    pub fn render(&self, field: &str, value: &Value, message: Option<&str>) -> (String, String) {
        let template = message.unwrap_or(self.template);
        let text = messages::interpolate(
            template,
            value,
            self.count.as_deref(),
            &messages::humanize(field),
        );
        (self.key.clone().unwrap_or_else(|| field.to_string()), text)
    }
}

/// 谓词评估器
pub struct PredicateEvaluator;

impl PredicateEvaluator {
    pub fn presence(value: Option<&Value>) -> Vec<Violation> {
        if is_blank(value) {
            vec![Violation::new(messages::BLANK)]
        } else {
            Vec::new()
        }
    }

    pub fn absence(value: Option<&Value>) -> Vec<Violation> {
        if is_blank(value) {
            Vec::new()
        } else {
            vec![Violation::new(messages::PRESENT)]
        }
    }

    /// 数值校验；不是数字时只报告一条错误
    pub fn numericality(value: Option<&Value>, options: &NumericalityOptions) -> Vec<Violation> {
        let Some(number) = value.and_then(Self::as_number) else {
            return vec![Violation::new(messages::NOT_A_NUMBER)];
        };

        let integral = value.is_some_and(Self::is_integer);
        if options.only_integer && !integral {
            return vec![Violation::new(messages::NOT_AN_INTEGER)];
        }

        let checks = [
            (options.greater_than, Relation::GreaterThan, messages::GREATER_THAN),
            (
                options.greater_than_or_equal_to,
                Relation::GreaterThanOrEqualTo,
                messages::GREATER_THAN_OR_EQUAL_TO,
            ),
            (options.equal_to, Relation::EqualTo, messages::EQUAL_TO),
            (options.less_than, Relation::LessThan, messages::LESS_THAN),
            (
                options.less_than_or_equal_to,
                Relation::LessThanOrEqualTo,
                messages::LESS_THAN_OR_EQUAL_TO,
            ),
            (options.other_than, Relation::OtherThan, messages::OTHER_THAN),
        ];

        let mut violations = Vec::new();
        for (bound, relation, template) in checks {
            let Some(bound) = bound else { continue };
            let holds = number
                .partial_cmp(&bound)
                .is_some_and(|ordering| relation.holds(ordering));
            if !holds {
                violations.push(Violation::with_count(template, messages::format_number(bound)));
            }
        }

        if options.odd || options.even {
            let whole = number.fract() == 0.0;
            let is_odd = whole && (number as i64) % 2 != 0;
            if options.odd && !is_odd {
                violations.push(Violation::new(messages::ODD));
            }
            if options.even && !(whole && !is_odd) {
                violations.push(Violation::new(messages::EVEN));
            }
        }

        violations
    }

    /// 长度校验：字符串按字符计数，数组按元素计数，null 视为 0
    pub fn length(value: Option<&Value>, options: &LengthOptions) -> Vec<Violation> {
        let len = Self::length_of(value);
        let count = |n: usize, one: &'static str, many: &'static str| {
            Violation::with_count(if n == 1 { one } else { many }, n.to_string())
        };

        if let Some(expected) = options.is {
            if len != expected {
                return vec![count(
                    expected,
                    messages::WRONG_LENGTH_ONE,
                    messages::WRONG_LENGTH,
                )];
            }
        }

        let mut violations = Vec::new();
        if let Some(min) = options.effective_minimum() {
            if len < min {
                violations.push(count(min, messages::TOO_SHORT_ONE, messages::TOO_SHORT));
            }
        }
        if let Some(max) = options.effective_maximum() {
            if len > max {
                violations.push(count(max, messages::TOO_LONG_ONE, messages::TOO_LONG));
            }
        }
        violations
    }

    /// 格式校验：值转为字符串后匹配 `with`，且不得匹配 `without`
    pub fn format(value: Option<&Value>, with: Option<&Regex>, without: Option<&Regex>) -> Vec<Violation> {
        let text = value.map(messages::display_value).unwrap_or_default();

        let rejected = with.is_some_and(|re| !re.is_match(&text))
            || without.is_some_and(|re| re.is_match(&text));

        if rejected {
            vec![Violation::new(messages::INVALID)]
        } else {
            Vec::new()
        }
    }

    pub fn inclusion(value: Option<&Value>, allowed: &[Value]) -> Vec<Violation> {
        let value = value.unwrap_or(&Value::Null);
        if allowed.iter().any(|item| Self::eq(value, item)) {
            Vec::new()
        } else {
            vec![Violation::new(messages::INCLUSION)]
        }
    }

    pub fn exclusion(value: Option<&Value>, reserved: &[Value]) -> Vec<Violation> {
        let value = value.unwrap_or(&Value::Null);
        if reserved.iter().any(|item| Self::eq(value, item)) {
            vec![Violation::new(messages::EXCLUSION)]
        } else {
            Vec::new()
        }
    }

    /// 比较校验；字段操作数取记录上该字段的当前值
    pub fn comparison(record: &Record, value: Option<&Value>, options: &ComparisonOptions) -> Vec<Violation> {
        let Some(value) = value.filter(|v| !is_blank(Some(*v))) else {
            return vec![Violation::new(messages::BLANK)];
        };

        let mut violations = Vec::new();
        for (relation, operand) in options.relations() {
            let other = match operand {
                Operand::Field { field } => record.get(field).unwrap_or(&Value::Null),
                Operand::Literal(literal) => literal,
            };

            match Self::compare(value, other) {
                Some(ordering) if relation.holds(ordering) => {}
                Some(_) => violations.push(Violation::with_count(
                    Self::relation_template(relation),
                    messages::display_value(other),
                )),
                None => {
                    // 不可比较时只报告一次
                    violations.push(Violation {
                        template: messages::INCOMPARABLE,
                        count: Some(format!("{} with {}", type_name(value), type_name(other))),
                        key: None,
                    });
                    break;
                }
            }
        }
        violations
    }

    /// 接受校验：精确匹配配置的字面量
    pub fn acceptance(value: Option<&Value>, accept: &[Value]) -> Vec<Violation> {
        let value = value.unwrap_or(&Value::Null);
        if accept.contains(value) {
            Vec::new()
        } else {
            vec![Violation::new(messages::ACCEPTED)]
        }
    }

    /// 确认校验；确认字段不存在时跳过
    pub fn confirmation(record: &Record, field: &str, case_sensitive: bool) -> Vec<Violation> {
        let key = format!("{}_confirmation", field);
        let confirmation = match record.get(&key) {
            None | Some(Value::Null) => return Vec::new(),
            Some(v) => v,
        };
        let value = record.get(field).unwrap_or(&Value::Null);

        let matches = match (value, confirmation) {
            (Value::String(a), Value::String(b)) if !case_sensitive => a.to_lowercase() == b.to_lowercase(),
            (a, b) => a == b,
        };

        if matches {
            Vec::new()
        } else {
            vec![Violation::new(messages::CONFIRMATION).keyed(key)]
        }
    }

    fn relation_template(relation: Relation) -> &'static str {
        match relation {
            Relation::GreaterThan => messages::GREATER_THAN,
            Relation::GreaterThanOrEqualTo => messages::GREATER_THAN_OR_EQUAL_TO,
            Relation::EqualTo => messages::EQUAL_TO,
            Relation::LessThan => messages::LESS_THAN,
            Relation::LessThanOrEqualTo => messages::LESS_THAN_OR_EQUAL_TO,
            Relation::OtherThan => messages::OTHER_THAN,
        }
    }

    /// 依次尝试数值、日期、字符串比较
    fn compare(left: &Value, right: &Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (Self::as_number(left), Self::as_number(right)) {
            return a.partial_cmp(&b);
        }
        if let (Some(a), Some(b)) = (Self::parse_datetime(left), Self::parse_datetime(right)) {
            return Some(a.cmp(&b));
        }
        match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// 相等比较，数值统一转为浮点数（100 == 100.0 == "100"）
    /// 集合成员判定：仅两侧都是数字时按数值比较（1 与 1.0 相等），其余按 JSON 值严格相等
    fn eq(left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => match (a.as_u64(), b.as_u64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => a.as_f64() == b.as_f64(),
                },
            },
            _ => left == right,
        }
    }

    /// 数值解析：数字或数字字符串，拒绝 NaN 与无穷大
    fn as_number(value: &Value) -> Option<f64> {
        let n = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() || s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                    None
                } else {
                    s.parse::<f64>().ok()
                }
            }
            _ => None,
        }?;
        n.is_finite().then_some(n)
    }

    fn is_integer(value: &Value) -> bool {
        match value {
            Value::Number(n) => n.is_i64() || n.is_u64(),
            Value::String(s) => {
                let s = s.trim();
                let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
                !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
            }
            _ => false,
        }
    }

    fn length_of(value: Option<&Value>) -> usize {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::String(s)) => s.chars().count(),
            Some(Value::Array(arr)) => arr.len(),
            Some(other) => messages::display_value(other).chars().count(),
        }
    }

    /// 解析日期时间：RFC 3339 或纯日期
    fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
        let s = value.as_str()?;

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }
}
