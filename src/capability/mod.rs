//! Injected capabilities: the language model, external tools and the
//! prompt templates that drive them.

pub mod llm;
pub mod prompts;
pub mod reply;
pub mod tool;

pub use llm::{GenerationError, GenerationRequest, Generator, StructuredGenerator};
pub use prompts::{default_template, PromptOverride, PromptProvider, PromptTemplate, Role, StaticPrompts};
pub use reply::{
    response_schema, ClassificationReply, ExecutorMetadata, ExecutorReply, PlanReply, PlannedTask, WriterReply,
};
pub use tool::{LlmTool, Tool, ToolError, ToolOutput, ToolRegistry, DEFAULT_CONFIDENCE};
