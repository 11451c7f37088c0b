//! 编排器：每次 ingest 的固定阶段序列
//!
//! received → budget_check → ocr → solve → verify → setpoint_read →
//! compose_hint → guard → governance_update → persist → respond

pub mod orchestrator;

pub use orchestrator::Orchestrator;
