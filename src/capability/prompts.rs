//! Prompt templates, read through an injected provider on every call.
//!
//! The engine never stores prompts itself: each capability call asks the
//! [`PromptProvider`] for the current template of its role, so a provider
//! backed by a hot-reloading source sees changes on the next call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::capability::reply::{
    response_schema, ClassificationReply, ExecutorReply, PlanReply, WriterReply,
};

/// Which stage of the pipeline a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Complexity classification.
    Master,
    /// Task graph planning.
    Planner,
    /// Executing one node through the language model.
    Executor,
    /// Answer synthesis.
    Writer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Master, Role::Planner, Role::Executor, Role::Writer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Planner => "planner",
            Role::Executor => "executor",
            Role::Writer => "writer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub system_prompt: String,
    /// User prompt with `{name}` placeholders.
    pub user_prompt_template: String,
    pub response_schema: Option<Value>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl PromptTemplate {
    /// Substitute `{name}` placeholders in one pass over the template.
    /// Unknown placeholders are left as-is, and substituted text is never
    /// scanned again.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let template = self.user_prompt_template.as_str();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let value = tail.find('}').and_then(|close| {
                let name = &tail[1..close];
                vars.iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, v)| (*v, close))
            });
            match value {
                Some((v, close)) => {
                    out.push_str(v);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Partial template used to override the built-in defaults from config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptOverride {
    pub system_prompt: Option<String>,
    pub user_prompt_template: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl PromptOverride {
    fn apply(&self, base: &mut PromptTemplate) {
        if let Some(s) = &self.system_prompt {
            base.system_prompt = s.clone();
        }
        if let Some(u) = &self.user_prompt_template {
            base.user_prompt_template = u.clone();
        }
        if let Some(t) = self.temperature {
            base.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            base.max_tokens = m;
        }
    }
}

/// Source of prompt templates.
pub trait PromptProvider: Send + Sync {
    fn template(&self, role: Role) -> Option<PromptTemplate>;
}

/// Built-in templates with optional per-role overrides.
#[derive(Debug, Clone)]
pub struct StaticPrompts {
    templates: HashMap<Role, PromptTemplate>,
}

impl StaticPrompts {
    pub fn new(templates: HashMap<Role, PromptTemplate>) -> Self {
        Self { templates }
    }

    pub fn with_overrides(overrides: &HashMap<Role, PromptOverride>) -> Self {
        let mut prompts = Self::default();
        for (role, o) in overrides {
            if let Some(t) = prompts.templates.get_mut(role) {
                o.apply(t);
            }
        }
        prompts
    }

    pub fn set(&mut self, role: Role, template: PromptTemplate) {
        self.templates.insert(role, template);
    }
}

impl Default for StaticPrompts {
    fn default() -> Self {
        let templates = Role::ALL
            .iter()
            .map(|role| (*role, default_template(*role)))
            .collect();
        Self { templates }
    }
}

impl PromptProvider for StaticPrompts {
    fn template(&self, role: Role) -> Option<PromptTemplate> {
        self.templates.get(&role).cloned()
    }
}

pub fn default_template(role: Role) -> PromptTemplate {
    match role {
        Role::Master => PromptTemplate {
            system_prompt: "You route user questions. Decide whether a question is simple \
                (answerable directly in one step) or complex (needs several facts gathered, \
                compared or computed before answering)."
                .to_string(),
            user_prompt_template: "Question: {query}\n\nClassify its complexity and recommend a strategy."
                .to_string(),
            response_schema: Some(response_schema::<ClassificationReply>()),
            temperature: 0.3,
            max_tokens: 500,
        },
        Role::Planner => PromptTemplate {
            system_prompt: "You decompose complex questions into atomic sub-questions. Each \
                sub-question becomes one task of type search, calculate, compare or generate. \
                A task that needs another task's output must list it as a dependency."
                .to_string(),
            user_prompt_template: "Question: {query}\n\nList the tasks and their dependencies."
                .to_string(),
            response_schema: Some(response_schema::<PlanReply>()),
            temperature: 0.3,
            max_tokens: 1500,
        },
        Role::Executor => PromptTemplate {
            system_prompt: "You execute one sub-task of a larger question and report the \
                result with a confidence between 0 and 1."
                .to_string(),
            user_prompt_template: "Task: {task_description}\nType: {task_type}\nInputs: {inputs}\n\nExecute the task."
                .to_string(),
            response_schema: Some(response_schema::<ExecutorReply>()),
            temperature: 0.5,
            max_tokens: 1000,
        },
        Role::Writer => PromptTemplate {
            system_prompt: "You write the final answer from sub-task results. Merge \
                overlapping facts, point out disagreements between sources instead of \
                hiding them, and never invent facts the results do not contain."
                .to_string(),
            user_prompt_template: "Question: {query}\nResults:\n{task_results}\nCaveats:\n{caveats}\n\nWrite the answer."
                .to_string(),
            response_schema: Some(response_schema::<WriterReply>()),
            temperature: 0.7,
            max_tokens: 2000,
        },
    }
}
