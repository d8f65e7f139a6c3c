pub mod bridge;
pub mod commands;
pub mod hub;
pub mod mqtt;
pub mod panel;
pub mod publish;
pub mod topic;
pub mod translate;
