//! 核心层：错误分类与传播策略

pub mod error;

pub use error::DialogueError;
