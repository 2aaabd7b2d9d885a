//! 远程面板协议类型定义
//!
//! 此模块定义了 Controller 调用 3X-UI 面板时使用的共享类型，
//! 包括 PanelApi trait、错误分类以及入站/客户端记录结构体。

pub mod panel;
pub mod settings;
