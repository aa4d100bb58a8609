//! # Tool Registry and Execution
//!
//! Function-calling surface for the assistant. Tools are registered by name,
//! advertised to the completion backend as JSON schemas, and dispatched
//! according to a declared execution affinity so a slow tool can never stall
//! the async runtime.
//!
//! ## Execution Affinities:
//! - **Async**: quick, non-blocking work; runs inline on the async executor
//! - **Blocking**: I/O-bound work (disk, device handles); runs on the tokio
//!   blocking pool
//! - **CpuBound**: heavy computation (e.g. face embeddings); runs on the
//!   blocking pool behind a semaphore sized to the configured CPU worker
//!   count, so concurrent sessions can't oversubscribe the machine
//!
//! ## Failure containment:
//! A tool failure never fails the turn. Unknown names, unparseable
//! arguments, and execution errors all become an error string delivered to
//! the model as that call's result, keyed by the originating call id.

pub mod builtin;

use crate::backends::ToolCallRequest;
use crate::error::AppError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Where a tool's work is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionAffinity {
    /// Quick and non-blocking; safe on the async executor
    Async,
    /// Blocking I/O; must run on the blocking pool
    Blocking,
    /// CPU-heavy; bounded by the CPU worker semaphore
    CpuBound,
}

/// A callable function the model may invoke mid-turn.
pub trait Tool: Send + Sync {
    /// Name advertised to the model; must be unique within a registry.
    fn name(&self) -> &'static str;

    /// One-line description the model uses to decide when to call.
    fn description(&self) -> &'static str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Where `run` executes. Defaults to the light inline path; tools doing
    /// real I/O or computation must override this.
    fn affinity(&self) -> ExecutionAffinity {
        ExecutionAffinity::Async
    }

    /// Execute with parsed arguments. Runs on whichever thread the
    /// affinity dictates; implementations may block when their affinity
    /// is `Blocking` or `CpuBound`, never when it is `Async`.
    fn run(&self, arguments: &Value) -> Result<String, AppError>;
}

/// Named collection of tools plus the dispatch machinery.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    cpu_permits: Arc<Semaphore>,
}

impl ToolRegistry {
    pub fn new(cpu_worker_threads: usize) -> Self {
        Self {
            tools: HashMap::new(),
            cpu_permits: Arc::new(Semaphore::new(cpu_worker_threads.max(1))),
        }
    }

    /// Registry preloaded with the built-in assistant tools.
    pub fn with_builtins(cpu_worker_threads: usize) -> Self {
        let mut registry = Self::new(cpu_worker_threads);
        registry.register(Arc::new(builtin::IdentifyUser));
        registry.register(Arc::new(builtin::SaveNewUserFace));
        registry.register(Arc::new(builtin::AnalyzeImageFromWebcam));
        registry.register(Arc::new(builtin::PlayFavoriteSong));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), affinity = ?tool.affinity(), "registering tool");
        self.tools.insert(tool.name(), tool);
    }

    /// Function schemas advertised on every completion request.
    pub fn schemas(&self) -> Vec<Value> {
        let mut schemas: Vec<Value> = self
            .tools
            .values()
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema(),
                })
            })
            .collect();
        // HashMap iteration order is arbitrary; keep the advertised list stable
        schemas.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        schemas
    }

    /// Execute one requested call. Always produces a result string; failures
    /// degrade to an error message the model can read.
    pub async fn execute(&self, call: &ToolCallRequest) -> String {
        let tool = match self.tools.get(call.name.as_str()) {
            Some(tool) => Arc::clone(tool),
            None => {
                warn!(tool = %call.name, "model requested an unknown tool");
                return format!("Error: unknown tool '{}'", call.name);
            }
        };

        let arguments: Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool arguments were not valid JSON");
                return format!("Error: invalid arguments for '{}': {}", call.name, e);
            }
        };

        let outcome = match tool.affinity() {
            ExecutionAffinity::Async => tool.run(&arguments),
            ExecutionAffinity::Blocking => Self::run_on_blocking_pool(tool, arguments).await,
            ExecutionAffinity::CpuBound => {
                // Permit acquisition bounds concurrent CPU-heavy work across
                // all sessions. acquire() only errors if the semaphore is
                // closed, which never happens here.
                match self.cpu_permits.clone().acquire_owned().await {
                    Ok(_permit) => Self::run_on_blocking_pool(tool, arguments).await,
                    Err(_) => Err(AppError::Internal("CPU worker pool unavailable".into())),
                }
            }
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool execution failed");
                format!("Error: {}", e)
            }
        }
    }

    async fn run_on_blocking_pool(
        tool: Arc<dyn Tool>,
        arguments: Value,
    ) -> Result<String, AppError> {
        tokio::task::spawn_blocking(move || tool.run(&arguments))
            .await
            .map_err(|e| AppError::Internal(format!("tool task panicked: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool {
        affinity: ExecutionAffinity,
        calls: Arc<AtomicUsize>,
    }

    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "Echoes the 'text' argument back"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }
        fn affinity(&self) -> ExecutionAffinity {
            self.affinity
        }
        fn run(&self, arguments: &Value) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct FailingTool;

    impl Tool for FailingTool {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn description(&self) -> &'static str {
            "Always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        fn affinity(&self) -> ExecutionAffinity {
            ExecutionAffinity::Async
        }
        fn run(&self, _arguments: &Value) -> Result<String, AppError> {
            Err(AppError::Internal("device unplugged".into()))
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: "call_test".into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_each_affinity() {
        for affinity in [
            ExecutionAffinity::Async,
            ExecutionAffinity::Blocking,
            ExecutionAffinity::CpuBound,
        ] {
            let calls = Arc::new(AtomicUsize::new(0));
            let mut registry = ToolRegistry::new(2);
            registry.register(Arc::new(EchoTool {
                affinity,
                calls: calls.clone(),
            }));

            let result = registry.execute(&call("echo", "{\"text\":\"hi\"}")).await;
            assert_eq!(result, "hi");
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_degrades_to_error_string() {
        let registry = ToolRegistry::new(1);
        let result = registry.execute(&call("no_such_tool", "{}")).await;
        assert!(result.starts_with("Error: unknown tool"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_degrade_to_error_string() {
        let mut registry = ToolRegistry::new(1);
        registry.register(Arc::new(EchoTool {
            affinity: ExecutionAffinity::Async,
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        let result = registry.execute(&call("echo", "not json")).await;
        assert!(result.starts_with("Error: invalid arguments"));
    }

    #[tokio::test]
    async fn test_tool_failure_degrades_to_error_string() {
        let mut registry = ToolRegistry::new(1);
        registry.register(Arc::new(FailingTool));

        let result = registry.execute(&call("broken", "{}")).await;
        assert!(result.starts_with("Error:"));
        assert!(result.contains("device unplugged"));
    }

    #[test]
    fn test_schemas_are_stable_and_complete() {
        let registry = ToolRegistry::with_builtins(2);
        let schemas = registry.schemas();
        let names: Vec<&str> = schemas.iter().filter_map(|s| s["name"].as_str()).collect();
        assert_eq!(
            names,
            vec![
                "analyze_image_from_webcam",
                "identify_user",
                "play_favorite_song",
                "save_new_user_face",
            ]
        );
        for schema in &schemas {
            assert!(schema["description"].as_str().is_some());
            assert_eq!(schema["parameters"]["type"], "object");
        }
    }
}
