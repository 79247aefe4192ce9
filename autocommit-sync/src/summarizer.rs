//! AI commit-summary collaborator.
//!
//! [`HttpSummarizer`] renders the prompt from an embedded Tera template
//! (overridable by `~/.autocommit/templates/commit_prompt.tera`) and posts it
//! to an OpenAI-compatible `/chat/completions` endpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tera::{Context, Tera};

use autocommit_core::AiConfig;

use crate::error::SummaryError;

const TEMPLATE_NAME: &str = "commit_prompt.tera";
const EMBEDDED_TEMPLATE: &str = include_str!("templates/commit_prompt.tera");
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One changed file as shown to the summarizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromptContext {
    pub diffs: Vec<FileDiff>,
    pub custom_instructions: Option<String>,
    pub use_emojis: bool,
}

#[async_trait]
pub trait CommitSummarizer: Send + Sync {
    /// A one-line summary of the changes, or `None` when nothing usable came back.
    async fn generate(&self, context: &PromptContext) -> Result<Option<String>, SummaryError>;
}

#[derive(Debug)]
pub struct HttpSummarizer {
    endpoint: String,
    model: String,
    api_key_env: String,
    tera: Tera,
}

impl HttpSummarizer {
    pub fn new(config: &AiConfig, template_override: Option<&Path>) -> Result<Self, SummaryError> {
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            tera: build_tera(template_override)?,
        })
    }

    pub fn render_prompt(&self, context: &PromptContext) -> Result<String, SummaryError> {
        let ctx = Context::from_serialize(context)?;
        Ok(self.tera.render(TEMPLATE_NAME, &ctx)?)
    }
}

/// Path of the user prompt override under `home`.
pub fn template_override_at(home: &Path) -> PathBuf {
    autocommit_core::config::root_at(home)
        .join("templates")
        .join(TEMPLATE_NAME)
}

fn build_tera(template_override: Option<&Path>) -> Result<Tera, SummaryError> {
    let source = match template_override {
        Some(path) if path.is_file() => match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!("ignoring prompt template {}: {err}", path.display());
                EMBEDDED_TEMPLATE.to_string()
            }
        },
        _ => EMBEDDED_TEMPLATE.to_string(),
    };
    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, &source)?;
    Ok(tera)
}

#[async_trait]
impl CommitSummarizer for HttpSummarizer {
    async fn generate(&self, context: &PromptContext) -> Result<Option<String>, SummaryError> {
        let api_key = std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| SummaryError::MissingApiKey(self.api_key_env.clone()))?;
        let prompt = self.render_prompt(context)?;
        let url = format!("{}/chat/completions", self.endpoint);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = tokio::task::spawn_blocking(move || -> Result<Value, SummaryError> {
            let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
            let resp = agent
                .post(&url)
                .set("Authorization", &format!("Bearer {api_key}"))
                .set("User-Agent", "autocommit")
                .send_json(body)
                .map_err(|e| SummaryError::Http(e.to_string()))?;
            resp.into_json::<Value>()
                .map_err(|e| SummaryError::Response(e.to_string()))
        })
        .await
        .map_err(|e| SummaryError::Http(e.to_string()))??;

        parse_response(&response)
    }
}

/// Extract the first choice's message content from a chat-completions body.
pub fn parse_response(body: &Value) -> Result<Option<String>, SummaryError> {
    let content = body
        .pointer("/choices/0/message/content")
        .ok_or_else(|| SummaryError::Response("no choices in response".to_string()))?;
    let Some(text) = content.as_str() else {
        return Ok(None);
    };
    let text = text.trim().trim_matches('`').trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(use_emojis: bool, custom: Option<&str>) -> PromptContext {
        PromptContext {
            diffs: vec![FileDiff {
                path: "notes.md".to_string(),
                diff: "+- [x] ship it".to_string(),
            }],
            custom_instructions: custom.map(str::to_string),
            use_emojis,
        }
    }

    #[test]
    fn prompt_includes_diffs_and_optional_sections() {
        let summarizer = HttpSummarizer::new(&AiConfig::default(), None).expect("summarizer");

        let plain = summarizer.render_prompt(&context(false, None)).expect("render");
        assert!(plain.contains("## notes.md"));
        assert!(plain.contains("+- [x] ship it"));
        assert!(!plain.contains("single emoji"));
        assert!(!plain.contains("Additional Instructions"));

        let rich = summarizer
            .render_prompt(&context(true, Some("Use British spelling")))
            .expect("render");
        assert!(rich.contains("single emoji"));
        assert!(rich.contains("Use British spelling"));
    }

    #[test]
    fn user_template_override_is_used() {
        let home = TempDir::new().expect("home");
        let path = template_override_at(home.path());
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "files: {% for d in diffs %}{{ d.path }}{% endfor %}").expect("write");

        let summarizer = HttpSummarizer::new(&AiConfig::default(), Some(&path)).expect("summarizer");
        assert_eq!(
            summarizer.render_prompt(&context(false, None)).expect("render"),
            "files: notes.md"
        );
    }

    #[test]
    fn parses_first_choice_and_treats_blank_as_none() {
        let body = json!({ "choices": [{ "message": { "content": "  Add release notes\n" } }] });
        assert_eq!(
            parse_response(&body).expect("parse"),
            Some("Add release notes".to_string())
        );

        let blank = json!({ "choices": [{ "message": { "content": "   " } }] });
        assert_eq!(parse_response(&blank).expect("parse"), None);

        assert!(parse_response(&json!({ "error": "quota" })).is_err());
    }

    #[tokio::test]
    async fn missing_api_key_is_reported() {
        let config = AiConfig {
            api_key_env: "AUTOCOMMIT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..AiConfig::default()
        };
        let summarizer = HttpSummarizer::new(&config, None).expect("summarizer");
        let err = summarizer.generate(&context(false, None)).await.unwrap_err();
        assert!(matches!(err, SummaryError::MissingApiKey(_)));
    }
}
