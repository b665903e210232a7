//! Kiln 工具集
//!
//! 目前只负责日志初始化，供 app 与各个 crate 的测试共用。

pub mod init_log;
