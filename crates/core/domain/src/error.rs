//! 跨组件错误分类。
//!
//! 各能力 crate 定义自己的 thiserror 枚举；本模块只约定错误的
//! 处置类别，供调用方决定重试、计数丢弃还是上报操作员。

/// 错误处置类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 瞬态：超时、目标暂不可达、队列满。本地重试/回放/计数丢弃。
    Transient,
    /// 协议：坏帧、CRC 不符。计数、丢帧、重新同步。
    Protocol,
    /// 领域：非法配置、未知实体。返回调用方并记入通知日志。
    Domain,
    /// 脚本：语法错误、缺少钩子、脚本抛错。校验期阻止加载，运行期路由到 failed。
    Script,
    /// 致命：初始化不可恢复。发通知后退出进程。
    Fatal,
}

/// 携带处置类别的错误。
pub trait ClassifiedError {
    fn class(&self) -> ErrorClass;
}
