//! 默认错误消息模板与插值
//!
//! 模板支持 `%{value}`、`%{count}`、`%{attribute}` 三个占位符。

use serde_json::Value;

pub const BLANK: &str = "can't be blank";
pub const PRESENT: &str = "must be blank";
pub const TAKEN: &str = "has already been taken";
pub const NOT_A_NUMBER: &str = "is not a number";
pub const NOT_AN_INTEGER: &str = "must be an integer";
pub const GREATER_THAN: &str = "must be greater than %{count}";
pub const GREATER_THAN_OR_EQUAL_TO: &str = "must be greater than or equal to %{count}";
pub const EQUAL_TO: &str = "must be equal to %{count}";
pub const LESS_THAN: &str = "must be less than %{count}";
pub const LESS_THAN_OR_EQUAL_TO: &str = "must be less than or equal to %{count}";
pub const OTHER_THAN: &str = "must be other than %{count}";
pub const ODD: &str = "must be odd";
pub const EVEN: &str = "must be even";
pub const TOO_SHORT: &str = "is too short (minimum is %{count} characters)";
pub const TOO_SHORT_ONE: &str = "is too short (minimum is %{count} character)";
pub const TOO_LONG: &str = "is too long (maximum is %{count} characters)";
pub const TOO_LONG_ONE: &str = "is too long (maximum is %{count} character)";
pub const WRONG_LENGTH: &str = "is the wrong length (should be %{count} characters)";
pub const WRONG_LENGTH_ONE: &str = "is the wrong length (should be %{count} character)";
pub const INVALID: &str = "is invalid";
pub const INCLUSION: &str = "is not included in the list";
pub const EXCLUSION: &str = "is reserved";
pub const ACCEPTED: &str = "must be accepted";
pub const CONFIRMATION: &str = "doesn't match %{attribute}";
/// `%{count}` 为 "X with Y" 形式的类型对
pub const INCOMPARABLE: &str = "comparison of %{count} failed";

/// 单遍替换模板中的占位符，替换结果不再参与扫描；未知占位符原样保留
pub fn interpolate(template: &str, value: &Value, count: Option<&str>, attribute: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        let placeholder = &tail[..=end];
        match (&tail[2..end], count) {
            ("value", _) => out.push_str(&display_value(value)),
            ("count", Some(count)) => out.push_str(count),
            ("attribute", _) => out.push_str(attribute),
            _ => out.push_str(placeholder),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

/// 字段名转为可读形式：email_confirmation -> Email confirmation
pub fn humanize(field: &str) -> String {
    let text = field
        .trim_end_matches("_id")
        .replace(['_', '.'], " ");
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 值的展示形式：字符串不带引号，null 为空串
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format_number(f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// 整数值的浮点数去掉小数部分：50.0 -> "50"
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interpolate_value() {
        let msg = interpolate("%{value} is not a valid size", &json!("huge"), None, "Size");
        assert_eq!(msg, "huge is not a valid size");
    }

    #[test]
    fn test_interpolate_count_and_attribute() {
        assert_eq!(
            interpolate(TOO_SHORT, &json!("abc"), Some("6"), "Password"),
            "is too short (minimum is 6 characters)"
        );
        assert_eq!(
            interpolate(CONFIRMATION, &json!("a"), None, "Email"),
            "doesn't match Email"
        );
    }

    #[test]
    fn test_interpolate_does_not_rescan_substituted_value() {
        assert_eq!(
            interpolate("%{value} is not a valid size", &json!("%{attribute}"), None, "Size"),
            "%{attribute} is not a valid size"
        );
        assert_eq!(
            interpolate("%{value} (%{count})", &json!("%{count}"), Some("3"), "Size"),
            "%{count} (3)"
        );
        assert_eq!(interpolate("%{count} and %{other", &json!(1), None, "X"), "%{count} and %{other");
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize("email_confirmation"), "Email confirmation");
        assert_eq!(humanize("author_id"), "Author");
        assert_eq!(humanize("name"), "Name");
        assert_eq!(humanize(""), "");
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!(null)), "");
        assert_eq!(display_value(&json!("www")), "www");
        assert_eq!(display_value(&json!(5)), "5");
        assert_eq!(display_value(&json!(2.5)), "2.5");
        assert_eq!(display_value(&json!(10.0)), "10");
        assert_eq!(display_value(&json!(true)), "true");
    }
}
