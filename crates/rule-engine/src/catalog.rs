//! 模型目录
//!
//! 内置的一组记录类型及其规则，每个类型只保留一份规范的规则列表。
//! 能力表里的守卫、校验器和回调动作按名字注册，JSON 定义文档同样可以引用。

use crate::callbacks::Flow;
use crate::capabilities::Capabilities;
use crate::collaborators::{MailMessage, Notification, SideEffect};
use crate::error::Result;
use crate::guards::Guard;
use crate::models::{
    CallbackDef, ComparisonOptions, LengthOptions, NumericalityOptions, Operand, RuleKind, Trigger,
    ValidationRule,
};
use crate::record::{Record, is_blank, is_truthy};
use crate::registry::{Registry, RegistryBuilder};
use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Value, json};
use std::path::PathBuf;
use tracing::info;

/// 每位作者最多关联的书籍数量
pub const MAX_BOOKS_PER_AUTHOR: usize = 5;

/// 目录使用的能力表
pub fn capabilities() -> Capabilities {
    Capabilities::builder()
        .guard("paid_with_card?", |r: &Record| r.get_str("payment_type") == Some("card"))
        .guard("retail?", |r: &Record| is_truthy(r.get("market.retail")))
        .guard("trackpad_present?", |r: &Record| !is_blank(r.get("trackpad")))
        .validator_fn("goodness", |ctx, errors| {
            let fields: Vec<String> = match ctx.options.get("fields") {
                Some(fields) => serde_json::from_value(fields.clone()).context("goodness 的 fields 参数无效")?,
                None => ctx.fields.to_vec(),
            };
            if fields.iter().any(|f| ctx.record.get_str(f) == Some("Evil")) {
                errors.add_base("This person is evil");
            }
            Ok(())
        })
        .validator_fn("name_min_length", |ctx, errors| {
            if let Some(name) = ctx.record.get_str("name").filter(|n| !n.trim().is_empty()) {
                if name.chars().count() < 3 {
                    errors.add("name", "must be at least 3 characters long");
                }
            }
            Ok(())
        })
        .validator_fn("expiration_date_not_in_past", |ctx, errors| {
            let value = ctx.record.get("expiration_date");
            if is_blank(value) {
                return Ok(());
            }
            let date = value
                .and_then(Value::as_str)
                .and_then(parse_date)
                .context("expiration_date 不是有效日期")?;
            if date < Utc::now().date_naive() {
                errors.add("expiration_date", "can't be in the past");
            }
            Ok(())
        })
        .validator_fn("discount_not_greater_than_total", |ctx, errors| {
            // 缺失或非数值都无法比较，按校验器异常上抛
            let discount = ctx.record.get("discount").and_then(decimal);
            let total = ctx.record.get("total_value").and_then(decimal);
            let (Some(discount), Some(total)) = (discount, total) else {
                bail!("discount 与 total_value 必须是数值");
            };
            if discount > total {
                errors.add("discount", "can't be greater than total value");
            }
            Ok(())
        })
        .block("starts_with_upper_case", |_record, field, value, errors| {
            let starts_lower = value
                .and_then(Value::as_str)
                .and_then(|s| s.chars().next())
                .is_some_and(char::is_lowercase);
            if starts_lower {
                errors.add(field, "must start with upper case");
            }
        })
        .action("check_limit", |ctx| {
            if ctx.record.association_count("books") >= MAX_BOOKS_PER_AUTHOR {
                ctx.record
                    .errors_mut()
                    .add_base(format!("Cannot add more than {} books for this author", MAX_BOOKS_PER_AUTHOR));
                return Ok(Flow::Abort);
            }
            Ok(Flow::Continue)
        })
        .action("calculate_shipping_charges", |ctx| {
            if let Some(book) = ctx.item.as_deref_mut() {
                let weight = book.get("weight_in_pounds").and_then(decimal).unwrap_or(1.0);
                book.set("shipping_charges", weight * 2.0);
            }
            Ok(Flow::Continue)
        })
        .action("filter_content", |ctx| {
            ctx.record.set("content", "[Content Removed: Violates Guidelines]");
            Ok(Flow::Continue)
        })
        .action("normalize_card_number", |ctx| {
            let normalized = ctx
                .record
                .get_str("card_number")
                .map(|n| n.chars().filter(char::is_ascii_digit).collect::<String>());
            if let Some(number) = normalized {
                ctx.record.set("card_number", number);
                info!("卡号已规范化");
            }
            Ok(Flow::Continue)
        })
        .action("abort_if_still_active", |ctx| {
            Ok(if is_truthy(ctx.record.get("still_active")) {
                Flow::Abort
            } else {
                Flow::Continue
            })
        })
        .action("log_new_user", |ctx| {
            info!(user_id = ?ctx.record.id(), "新用户已注册");
            Ok(Flow::Continue)
        })
        .action("send_welcome_email", |ctx| {
            if let Some(email) = ctx.record.get_str("email").filter(|e| !e.trim().is_empty()) {
                let message = MailMessage {
                    mailer: "user_mailer".to_string(),
                    template: "welcome_email".to_string(),
                    to: email.to_string(),
                    subject: "Welcome to Our Platform!".to_string(),
                };
                ctx.enqueue(SideEffect::Mail(message));
            }
            Ok(Flow::Continue)
        })
        .action("send_confirmation_email", |ctx| {
            if let Some(email) = ctx.record.get_str("email").filter(|e| !e.trim().is_empty()) {
                let message = MailMessage {
                    mailer: "user_mailer".to_string(),
                    template: "confirmation_email".to_string(),
                    to: email.to_string(),
                    subject: "Confirm Your Email".to_string(),
                };
                ctx.enqueue(SideEffect::Mail(message));
            }
            Ok(Flow::Continue)
        })
        .action("create_welcome_notification", |ctx| {
            let notification = Notification {
                record_type: ctx.record.record_type().to_string(),
                record_id: ctx.record.id().map(str::to_string),
                event: "sign_up".to_string(),
            };
            ctx.enqueue(SideEffect::Notify(notification));
            Ok(Flow::Continue)
        })
        .action("destroy_file", |ctx| {
            if let Some(path) = ctx.record.get_str("filepath") {
                ctx.enqueue(SideEffect::RemoveFile {
                    path: PathBuf::from(path),
                });
            }
            Ok(Flow::Continue)
        })
        .build()
}

/// 构建目录注册表
pub fn registry() -> Result<Registry> {
    let mut builder = Registry::builder(capabilities());
    register(&mut builder)?;
    Ok(builder.build())
}

/// 将目录中的记录类型注册到已有的构建器上
pub fn register(builder: &mut RegistryBuilder) -> Result<()> {
    people(builder)?;
    commerce(builder)?;
    publishing(builder)?;
    accounts(builder)?;
    Ok(())
}

fn people(builder: &mut RegistryBuilder) -> Result<()> {
    builder.define(
        "Person",
        [
            "name",
            "surname",
            "terms_of_service",
            "eula",
            "email",
            "email_confirmation",
            "bio",
            "password",
            "registration_number",
        ],
    );
    builder.register_rule(
        "Person",
        ValidationRule::base(RuleKind::Custom {
            validator: "goodness".to_string(),
            options: json!({"fields": ["name", "surname"]}),
        }),
    )?;
    builder.register_rule("Person", ValidationRule::new(["name", "surname"], RuleKind::each("starts_with_upper_case")))?;
    builder.register_rule("Person", ValidationRule::field("terms_of_service", RuleKind::accept(["yes"])).allow_nil())?;
    builder.register_rule("Person", ValidationRule::field("eula", RuleKind::accept(["TRUE", "accepted"])).allow_nil())?;
    builder.register_rule(
        "Person",
        ValidationRule::field("email", RuleKind::Confirmation { case_sensitive: false }),
    )?;
    builder.register_rule(
        "Person",
        ValidationRule::field("email_confirmation", RuleKind::Presence).if_guard("email_changed?"),
    )?;
    builder.register_rule("Person", ValidationRule::field("bio", RuleKind::Length(LengthOptions::maximum(500))))?;
    builder.register_rule("Person", ValidationRule::field("password", RuleKind::Length(LengthOptions::within(6, 20))))?;
    builder.register_rule(
        "Person",
        ValidationRule::field("registration_number", RuleKind::Length(LengthOptions::is(6))),
    )?;

    builder.define("Persontwo", ["name", "email", "age"]);
    builder.register_rule("Persontwo", ValidationRule::field("name", RuleKind::Presence))?;
    builder.register_rule("Persontwo", ValidationRule::field("email", RuleKind::uniqueness()).on("account_setup"))?;
    builder.register_rule("Persontwo", ValidationRule::field("age", RuleKind::numericality()).on("account_setup"))?;

    builder.define("Player", ["points", "games_played"]);
    builder.register_rule("Player", ValidationRule::field("points", RuleKind::numericality()))?;
    builder.register_rule(
        "Player",
        ValidationRule::field(
            "games_played",
            RuleKind::Numericality(NumericalityOptions {
                only_integer: true,
                ..Default::default()
            }),
        ),
    )?;

    builder.define("Holiday", ["name", "holiday_date", "description"]);
    builder.register_rule(
        "Holiday",
        ValidationRule::field(
            "name",
            RuleKind::Uniqueness {
                scope: vec!["holiday_date".to_string()],
                case_sensitive: true,
            },
        )
        .message("should happen once per year"),
    )?;

    Ok(())
}

fn commerce(builder: &mut RegistryBuilder) -> Result<()> {
    builder.define("Coffee", ["size"]);
    builder.register_rule(
        "Coffee",
        ValidationRule::field("size", RuleKind::inclusion(["small", "medium", "large"]))
            .message("%{value} is not a valid size"),
    )?;

    builder.define("Computer", ["desktop", "mouse", "trackpad", "market"]);
    builder.register_rule(
        "Computer",
        ValidationRule::field("mouse", RuleKind::Presence)
            .if_guard("retail?")
            .if_guard("desktop?")
            .unless_guard("trackpad_present?"),
    )?;

    builder.define("Order", ["payment_type", "card_number"]);
    builder.register_callback(
        "Order",
        CallbackDef::new(Trigger::BeforeSave, "normalize_card_number").if_guard("paid_with_card?"),
    )?;
    builder.register_rule(
        "Order",
        ValidationRule::field("card_number", RuleKind::Presence).if_guard("paid_with_card?"),
    )?;

    builder.define("Product", ["name", "legacy_code", "still_active"]);
    builder.register_callback("Product", CallbackDef::new(Trigger::BeforeDestroy, "abort_if_still_active"))?;
    builder.register_rule(
        "Product",
        ValidationRule::field("legacy_code", RuleKind::format(r"\A[a-zA-Z]+\z")).message("only allows letters"),
    )?;

    builder.define("Invoice", ["expiration_date", "discount", "total_value", "customer_id"]);
    builder.register_rule("Invoice", ValidationRule::base(RuleKind::custom("expiration_date_not_in_past")))?;
    builder.register_rule("Invoice", ValidationRule::base(RuleKind::custom("discount_not_greater_than_total")))?;

    builder.define("Promotion", ["start_date", "end_date"]);
    builder.register_rule(
        "Promotion",
        ValidationRule::field(
            "end_date",
            RuleKind::Comparison(ComparisonOptions {
                greater_than: Some(Operand::field("start_date")),
                ..Default::default()
            }),
        ),
    )?;

    Ok(())
}

fn publishing(builder: &mut RegistryBuilder) -> Result<()> {
    builder.define("Author", ["first_name", "last_name", "email"]);
    builder.register_callback("Author", CallbackDef::new(Trigger::BeforeAdd("books".to_string()), "check_limit"))?;
    builder.register_callback(
        "Author",
        CallbackDef::new(Trigger::BeforeAdd("books".to_string()), "calculate_shipping_charges"),
    )?;

    builder.define("Book", ["title", "author", "library_id", "weight_in_pounds"]);
    builder.register_rule("Book", ValidationRule::field("title", RuleKind::Presence))?;

    builder.define(
        "Comment",
        ["content", "author", "post_id", "subject_to_parental_control", "untrusted_author"],
    );
    builder.register_callback(
        "Comment",
        CallbackDef::new(Trigger::BeforeSave, "filter_content")
            .if_guard("subject_to_parental_control?")
            .if_guard("untrusted_author?"),
    )?;

    builder.define("PictureFile", ["filepath"]);
    builder.register_callback(
        "PictureFile",
        CallbackDef::new(Trigger::AfterCommit, "destroy_file").if_guard("destroyed?"),
    )?;

    Ok(())
}

fn accounts(builder: &mut RegistryBuilder) -> Result<()> {
    builder.define("Account", ["subdomain", "email", "password", "password_confirmation"]);
    builder.register_rule(
        "Account",
        ValidationRule::field("subdomain", RuleKind::exclusion(["www", "us", "ca", "jp"])).message("%{value} is reserved."),
    )?;
    builder.register_rule("Account", ValidationRule::field("email", RuleKind::uniqueness()))?;
    builder.register_rule(
        "Account",
        ValidationRule::field("password", RuleKind::confirmation())
            .unless_guard(Guard::predicate(|r| is_blank(r.get("password")))),
    )?;

    builder.define("User", ["name", "email"]);
    builder.register_rule("User", ValidationRule::field("name", RuleKind::Presence))?;
    builder.register_rule("User", ValidationRule::base(RuleKind::custom("name_min_length")))?;
    builder.register_callback("User", CallbackDef::new(Trigger::AfterCreate, "log_new_user"))?;
    builder.register_callback("User", CallbackDef::new(Trigger::AfterCreate, "send_welcome_email"))?;
    builder.register_callback(
        "User",
        CallbackDef::new(Trigger::AfterUpdate, "send_confirmation_email").if_guard("email_changed?"),
    )?;

    builder.define("Usertwo", ["name", "email", "location", "role"]);
    builder.register_callback("Usertwo", CallbackDef::new(Trigger::AfterCreate, "create_welcome_notification"))?;

    Ok(())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

fn decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
