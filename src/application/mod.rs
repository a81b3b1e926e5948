//! 应用层：测试 Harness
//!
//! 把路由器、调度器、生命周期注册表和日志捕获组合成测试使用的单一入口

pub mod harness;
