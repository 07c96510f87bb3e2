//! 回调执行上下文
//!
//! 回调动作通过返回 `Flow::Abort` 中止生命周期，而不是非局部跳转。
//! 副作用（邮件、文件清理、通知）只入队，提交成功后才由生命周期投递。

use crate::collaborators::SideEffect;
use crate::guards::CompiledGuards;
use crate::models::CallbackDef;
use crate::record::Record;

/// 回调返回的控制流
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Abort,
}

/// 回调动作可见的上下文
pub struct CallbackContext<'a> {
    /// 触发回调的记录
    pub record: &'a mut Record,
    /// 关联新增回调中被添加的条目
    pub item: Option<&'a mut Record>,
    effects: &'a mut Vec<SideEffect>,
}

impl<'a> CallbackContext<'a> {
    pub(crate) fn new(
        record: &'a mut Record,
        item: Option<&'a mut Record>,
        effects: &'a mut Vec<SideEffect>,
    ) -> Self {
        Self {
            record,
            item,
            effects,
        }
    }

    /// 入队一个提交后执行的副作用
    pub fn enqueue(&mut self, effect: SideEffect) {
        self.effects.push(effect);
    }
}

/// 编译后的回调
#[derive(Clone)]
pub struct CompiledCallback {
    pub def: CallbackDef,
    pub(crate) guards: CompiledGuards,
    pub(crate) action: crate::capabilities::CallbackFn,
}

impl CompiledCallback {
    pub fn action_name(&self) -> &str {
        &self.def.action
    }
}

impl std::fmt::Debug for CompiledCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCallback")
            .field("trigger", &self.def.trigger)
            .field("action", &self.def.action)
            .field("guards", &self.guards)
            .finish()
    }
}

/// 一次回调链执行的结果
#[derive(Debug, Clone, Default)]
pub struct CallbackOutcome {
    /// 实际执行的动作名，按顺序
    pub invoked: Vec<String>,
    /// 发出中止信号的动作名
    pub aborted_by: Option<String>,
    /// 入队的副作用
    pub effects: Vec<SideEffect>,
}

impl CallbackOutcome {
    pub fn is_aborted(&self) -> bool {
        self.aborted_by.is_some()
    }
}
