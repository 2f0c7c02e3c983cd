//! In-process memory tools: `remember`, `recall_memories`, `forget_memory`,
//! `todo` (`spec.md` §4.10 memory category — always allowed by default).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use ralph_core::tool_registry::ToolExecutor;
use ralph_core::types::ToolCall;
use ralph_core::types::ToolResult;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Backing store shared by `remember`/`recall_memories`/`forget_memory`: the
/// registry hands each tool name its own `Box<dyn ToolExecutor>`, so the
/// three need an explicit `Arc` to actually agree on one map rather than
/// three independent ones.
pub type MemoryStore = Arc<Mutex<HashMap<String, String>>>;

pub fn new_store() -> MemoryStore {
    Arc::new(Mutex::new(HashMap::new()))
}

pub struct Remember {
    store: MemoryStore,
}

impl Remember {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl ToolExecutor for Remember {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let (Some(key), Some(value)) = (call.argument_str("key"), call.argument_str("value")) else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing key or value"}"#.to_string());
        };
        lock(&self.store).insert(key, value);
        ToolResult::ok(call.id.clone(), r#"{"stored":true}"#.to_string())
    }
}

pub struct RecallMemories {
    store: MemoryStore,
}

impl RecallMemories {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl ToolExecutor for RecallMemories {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let entries = lock(&self.store);
        let json = serde_json::to_string(&*entries).unwrap_or_else(|_| "{}".to_string());
        ToolResult::ok(call.id.clone(), json)
    }
}

pub struct ForgetMemory {
    store: MemoryStore,
}

impl ForgetMemory {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl ToolExecutor for ForgetMemory {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(key) = call.argument_str("key") else {
            return ToolResult::err(call.id.clone(), r#"{"error":"missing key"}"#.to_string());
        };
        let removed = lock(&self.store).remove(&key).is_some();
        ToolResult::ok(call.id.clone(), format!(r#"{{"removed":{removed}}}"#))
    }
}

pub struct Todo {
    items: Mutex<Vec<String>>,
}

impl Todo {
    pub fn new() -> Self {
        Self { items: Mutex::new(Vec::new()) }
    }
}

impl Default for Todo {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor for Todo {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        if let Some(item) = call.argument_str("add") {
            lock(&self.items).push(item);
        }
        let items = lock(&self.items);
        let json = serde_json::to_string(&*items).unwrap_or_else(|_| "[]".to_string());
        ToolResult::ok(call.id.clone(), json)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall { id: "1".to_string(), name: name.to_string(), arguments_json: args.to_string() }
    }

    #[test]
    fn remember_stores_key_value() {
        let tool = Remember::new(new_store());
        let result = tool.execute(&call("remember", r#"{"key":"a","value":"b"}"#));
        assert!(result.success);
    }

    #[test]
    fn recall_sees_what_remember_stored() {
        let store = new_store();
        let remember = Remember::new(store.clone());
        let recall = RecallMemories::new(store);
        remember.execute(&call("remember", r#"{"key":"a","value":"b"}"#));
        let result = recall.execute(&call("recall_memories", "{}"));
        assert!(result.result.contains(r#""a":"b""#));
    }

    #[test]
    fn forget_removes_what_remember_stored() {
        let store = new_store();
        let remember = Remember::new(store.clone());
        let forget = ForgetMemory::new(store);
        remember.execute(&call("remember", r#"{"key":"a","value":"b"}"#));
        let result = forget.execute(&call("forget_memory", r#"{"key":"a"}"#));
        assert!(result.result.contains("true"));
    }

    #[test]
    fn todo_accumulates_items() {
        let tool = Todo::new();
        tool.execute(&call("todo", r#"{"add":"write tests"}"#));
        let result = tool.execute(&call("todo", r#"{}"#));
        assert!(result.result.contains("write tests"));
    }

    #[test]
    fn forget_memory_on_empty_store_returns_false() {
        let tool = ForgetMemory::new(new_store());
        let result = tool.execute(&call("forget_memory", r#"{"key":"missing"}"#));
        assert!(result.result.contains("false"));
    }
}
