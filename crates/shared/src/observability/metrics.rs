//! 指标定义
//!
//! 集中维护指标名称，规则引擎通过 `metrics` 宏直接上报。

/// 规则评估次数（标签：record_type）
pub const RULE_EVALUATIONS_TOTAL: &str = "rule_evaluations_total";
/// 单次评估耗时
pub const RULE_EVALUATION_DURATION_SECONDS: &str = "rule_evaluation_duration_seconds";
/// 累积的校验错误数（标签：record_type）
pub const VALIDATION_ERRORS_TOTAL: &str = "validation_errors_total";
/// strict 规则失败次数
pub const STRICT_FAILURES_TOTAL: &str = "strict_validation_failures_total";
/// 生命周期操作次数（标签：operation, state）
pub const LIFECYCLE_OPERATIONS_TOTAL: &str = "lifecycle_operations_total";
/// 副作用投递失败次数（标签：effect）
pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "side_effect_failures_total";

/// 注册指标描述
///
/// 这些描述会出现在宿主程序所安装 exporter 的 HELP 注释中。
pub fn describe_metrics() {
    metrics::describe_counter!(RULE_EVALUATIONS_TOTAL, "Total number of rule set evaluations");
    metrics::describe_histogram!(
        RULE_EVALUATION_DURATION_SECONDS,
        "Rule set evaluation duration in seconds"
    );
    metrics::describe_counter!(
        VALIDATION_ERRORS_TOTAL,
        "Total number of accumulated validation errors"
    );
    metrics::describe_counter!(
        STRICT_FAILURES_TOTAL,
        "Total number of strict validation failures"
    );
    metrics::describe_counter!(
        LIFECYCLE_OPERATIONS_TOTAL,
        "Total number of lifecycle operations by final state"
    );
    metrics::describe_counter!(
        SIDE_EFFECT_FAILURES_TOTAL,
        "Total number of failed after-commit side effects"
    );
}
