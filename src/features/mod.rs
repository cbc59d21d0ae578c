/// 健康检查
pub mod health;
/// 背景去除
pub mod removal;
/// 首页
pub mod web;
