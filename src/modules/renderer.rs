use async_trait::async_trait;
use serde_json::json;
use std::str::FromStr;

use super::{option_key, ERROR, REPLY, SEQ};
use crate::config::Configuration;
use crate::error::ModuleError;
use crate::module::{
    InitStatus, Module, ModuleCategory, ModuleCore, ModuleDescriptor, PipelinePhase, Query,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `OK <reply>` or `ERR <error>`.
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

/// Turns the handler's reply or error into the response payload.
///
/// Option: `format` (`text` or `json`).
pub struct RendererModule {
    core: ModuleCore,
    format: OutputFormat,
}

impl RendererModule {
    pub const NAME: &'static str = "renderer";

    pub fn new() -> Self {
        Self {
            core: ModuleCore::new(
                ModuleDescriptor::new(Self::NAME, ModuleCategory::Renderer).with_priority(10.0),
            ),
            format: OutputFormat::Text,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn render(&self, query: &Query) -> String {
        let error = query.attribute(ERROR);
        // Without a handler's reply the raw payload is echoed back.
        let reply = query
            .attribute(REPLY)
            .map(str::to_string)
            .unwrap_or_else(|| query.text());

        match self.format {
            OutputFormat::Text => match error {
                Some(error) => format!("ERR {error}"),
                None => format!("OK {reply}"),
            },
            OutputFormat::Json => {
                let seq = query.attribute(SEQ).and_then(|s| s.parse::<u64>().ok());
                let body = match error {
                    Some(error) => json!({"status": "error", "error": error, "seq": seq}),
                    None => json!({"status": "ok", "reply": reply, "seq": seq}),
                };
                body.to_string()
            }
        }
    }
}

impl Default for RendererModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for RendererModule {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn init(&mut self, config: Option<&dyn Configuration>) -> InitStatus {
        let Some(format) = config.and_then(|c| c.get_str(&option_key(Self::NAME, "format")))
        else {
            return InitStatus::SUCCESS;
        };

        match format.parse() {
            Ok(format) => {
                self.format = format;
                InitStatus::SUCCESS
            }
            Err(e) => {
                self.logger().error(&e);
                InitStatus(1)
            }
        }
    }

    async fn process(&mut self, _phase: PipelinePhase, query: Query) -> Option<Query> {
        let rendered = self.render(&query);
        Some(query.with_payload(rendered))
    }

    fn clone_module(&self) -> Result<Box<dyn Module>, ModuleError> {
        Ok(Box::new(Self {
            core: self.core.fork(),
            format: self.format,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_text_output() {
        let mut renderer = RendererModule::new();

        let ok = Query::new("echo hi").with_attribute(REPLY, "hi");
        let out = renderer.exec(PipelinePhase::Render, ok).await.unwrap();
        assert_eq!(out.text(), "OK hi");

        let err = Query::new("nope").with_attribute(ERROR, "unknown command 'nope'");
        let out = renderer.exec(PipelinePhase::Render, err).await.unwrap();
        assert_eq!(out.text(), "ERR unknown command 'nope'");
    }

    #[tokio::test]
    async fn test_json_output() {
        let config = json!({"modules": {"renderer": {"format": "JSON"}}});
        let mut renderer = RendererModule::new();
        assert!(renderer.init(Some(&config)).is_success());
        assert_eq!(renderer.format(), OutputFormat::Json);

        let query = Query::new("echo hi")
            .with_attribute(REPLY, "hi")
            .with_attribute(SEQ, "4");
        let out = renderer.exec(PipelinePhase::Render, query).await.unwrap();

        let body: Value = serde_json::from_slice(out.payload()).unwrap();
        assert_eq!(body, json!({"status": "ok", "reply": "hi", "seq": 4}));
    }

    #[test]
    fn test_unknown_format_fails_init() {
        let config = json!({"modules": {"renderer": {"format": "xml"}}});
        assert_eq!(RendererModule::new().init(Some(&config)), InitStatus(1));
    }
}
