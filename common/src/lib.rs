//! Controller 与 3X-UI 面板之间共享的协议类型

pub mod protocol;
pub mod utils;
