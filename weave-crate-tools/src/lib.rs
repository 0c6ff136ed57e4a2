//! Weave 工具集
//!
//! 提供日志初始化、性能分析 span、名字驻留（interning）等通用工具。
//!
//! # Name
//! 全局驻留的字符串符号，比较和哈希都是 O(1)，在 RenderGraph 中用作资源和管线的标识。

pub mod init_log;
pub mod name;
pub mod profile;

pub use tracy_client;
