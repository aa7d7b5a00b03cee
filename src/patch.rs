//! Patch request bodies.
//!
//! A patch is an ordered list of operations, each an `{op, path, value}`
//! triple addressed by JSON pointer. Operations are translated into LDAP
//! modifications by the property mapper tree; see the mapper contracts for
//! which targets each kind supports.

use crate::path::JsonPointer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
    Increment,
}

/// One patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    #[serde(default)]
    pub path: JsonPointer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn new(op: PatchOp, path: impl Into<JsonPointer>, value: Option<Value>) -> Self {
        Self {
            op,
            path: path.into(),
            value,
        }
    }

    pub fn add(path: impl Into<JsonPointer>, value: Value) -> Self {
        Self::new(PatchOp::Add, path, Some(value))
    }

    pub fn remove(path: impl Into<JsonPointer>) -> Self {
        Self::new(PatchOp::Remove, path, None)
    }

    pub fn replace(path: impl Into<JsonPointer>, value: Value) -> Self {
        Self::new(PatchOp::Replace, path, Some(value))
    }

    pub fn increment(path: impl Into<JsonPointer>, delta: Value) -> Self {
        Self::new(PatchOp::Increment, path, Some(delta))
    }

    /// A copy with the leading pointer token removed, for descent into a
    /// child mapper.
    pub fn descend(&self) -> Self {
        Self {
            op: self.op,
            path: self.path.tail(),
            value: self.value.clone(),
        }
    }
}
