//! 页面文档模型
//!
//! - `node`：竞技场文档与树操作
//! - `mutation`：变更观察记录
//! - `parser`：基于 html5ever 的解析与导入
//! - `serializer`：基于 html5ever 的序列化

pub mod mutation;
pub mod node;
pub mod parser;
pub mod serializer;

pub use mutation::{MutationKind, MutationRecord};
pub use node::{Document, Layout, NodeData, NodeId, Rect};
pub use serializer::SerializableNode;
