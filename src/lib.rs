//! Friday - Rust 辅导智能体编排系统
//!
//! 模块划分：
//! - **agents**: 外部协作者抽象与实现（Solver / Tutor / OCR，OpenAI 兼容 / 启发式 / Mock）
//! - **api**: HTTP 薄层（axum：会话创建、ingest、状态查询）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器状态机（ingest 流水线、会话、状态快照）
//! - **governance**: 治理控制环（触发器归一、提示护栏、隐藏评分、设定点稳态器、压力估计）
//! - **schemas**: 请求 / 响应 DTO 与流水线契约
//! - **storage**: SQLite + JSONL 审计持久化
//! - **verifier**: 符号断言校验边界（逐条吸收失败）

pub mod agents;
pub mod api;
pub mod config;
pub mod core;
pub mod governance;
pub mod schemas;
pub mod storage;
pub mod verifier;

pub use crate::core::Orchestrator;
