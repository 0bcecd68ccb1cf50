//! Language-model capability contract.
//!
//! The model itself is opaque: a [`Generator`] takes a prompt pair, an
//! optional response schema and sampling parameters, and returns a JSON
//! value. [`StructuredGenerator`] layers prompt lookup and typed decoding
//! on top, retrying once with a corrective instruction when the model's
//! answer does not decode into the expected reply type.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::capability::prompts::{PromptProvider, Role};
use crate::error::{Error, Result};

/// Everything a model call needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub role: Role,
    pub system_prompt: String,
    pub user_prompt: String,
    pub response_schema: Option<Value>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("response did not match schema: {0}")]
    SchemaViolation(String),

    #[error("model call timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<Value, GenerationError>;
}

/// Prompt-aware, typed access to a [`Generator`].
#[derive(Clone)]
pub struct StructuredGenerator {
    inner: Arc<dyn Generator>,
    prompts: Arc<dyn PromptProvider>,
}

impl StructuredGenerator {
    pub fn new(inner: Arc<dyn Generator>, prompts: Arc<dyn PromptProvider>) -> Self {
        Self { inner, prompts }
    }

    /// Build a request for `role` from the provider's current template.
    pub fn request(&self, role: Role, vars: &[(&str, &str)]) -> Result<GenerationRequest> {
        let template = self
            .prompts
            .template(role)
            .ok_or_else(|| Error::Config(format!("no prompt template for {} role", role)))?;
        Ok(GenerationRequest {
            role,
            system_prompt: template.system_prompt.clone(),
            user_prompt: template.render(vars),
            response_schema: template.response_schema.clone(),
            temperature: template.temperature,
            max_tokens: template.max_tokens,
        })
    }

    /// Render the role's template and decode the reply into `T`.
    pub async fn generate<T: DeserializeOwned>(&self, role: Role, vars: &[(&str, &str)]) -> Result<T> {
        let request = self.request(role, vars)?;
        self.generate_request(request).await
    }

    /// Generate for a prepared request, retrying once on a schema violation.
    pub async fn generate_request<T: DeserializeOwned>(&self, request: GenerationRequest) -> Result<T> {
        match self.attempt(&request).await {
            Ok(value) => Ok(value),
            Err(Error::SchemaViolation(reason)) => {
                warn!(role = %request.role, %reason, "schema violation, retrying with correction");
                let mut corrected = request.clone();
                corrected.user_prompt = format!(
                    "{}\n\nYour previous response did not match the required schema ({}). \
                     Respond again with JSON that satisfies the schema exactly.",
                    request.user_prompt, reason
                );
                self.attempt(&corrected).await
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt<T: DeserializeOwned>(&self, request: &GenerationRequest) -> Result<T> {
        debug!(role = %request.role, "calling generator");
        let value = match self.inner.generate(request).await {
            Ok(v) => v,
            Err(GenerationError::SchemaViolation(reason)) => {
                return Err(Error::SchemaViolation(reason))
            }
            Err(e) => return Err(Error::Generation(e)),
        };
        trace!(role = %request.role, response = %value, "generator response");
        serde_json::from_value(value).map_err(|e| Error::SchemaViolation(e.to_string()))
    }
}
