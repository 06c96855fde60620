//! Renderer module
//!
//! Renders a CacheReport to different output formats: jsonl, json, md, raw

use crate::cache::tier::SizeInfo;
use crate::core::model::CacheReport;
use crate::core::util::format_size;
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Json,
    Markdown,
    Raw,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonl" => Ok(OutputFormat::Jsonl),
            "json" => Ok(OutputFormat::Json),
            "md" | "markdown" => Ok(OutputFormat::Markdown),
            "raw" => Ok(OutputFormat::Raw),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

/// Render configuration combining format and options
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderConfig {
    pub format: OutputFormat,
    pub pretty: bool,
}

impl RenderConfig {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            pretty: false,
        }
    }

    pub fn with_pretty(format: OutputFormat, pretty: bool) -> Self {
        Self { format, pretty }
    }
}

/// One JSONL line: a tier plus the report-wide fields
#[derive(Serialize)]
struct TierLine<'a> {
    caching_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'a str>,
    #[serde(flatten)]
    tier: &'a crate::core::model::TierReport,
}

pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            config: RenderConfig::new(format),
        }
    }

    pub fn with_config(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn render(&self, report: &CacheReport) -> String {
        match self.config.format {
            OutputFormat::Jsonl => self.render_jsonl(report),
            OutputFormat::Json => self.render_json(report),
            OutputFormat::Markdown => self.render_markdown(report),
            OutputFormat::Raw => report.to_string(),
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> Option<String> {
        if self.config.pretty {
            serde_json::to_string_pretty(value).ok()
        } else {
            serde_json::to_string(value).ok()
        }
    }

    /// Render as JSON Lines (one object per tier)
    fn render_jsonl(&self, report: &CacheReport) -> String {
        report
            .tiers
            .iter()
            .filter_map(|tier| {
                self.to_json(&TierLine {
                    caching_enabled: report.caching_enabled,
                    action: report.action.as_deref(),
                    tier,
                })
            })
            .collect::<Vec<_>>()
            .join(if self.config.pretty { "\n\n" } else { "\n" })
    }

    fn render_json(&self, report: &CacheReport) -> String {
        self.to_json(report).unwrap_or_else(|| "{}".to_string())
    }

    fn render_markdown(&self, report: &CacheReport) -> String {
        let mut output = String::new();
        output.push_str("## Caches\n\n");
        output.push_str(&format!(
            "Caching is **{}**.\n\n",
            if report.caching_enabled {
                "enabled"
            } else {
                "disabled"
            }
        ));
        if let Some(action) = &report.action {
            output.push_str(&format!("Action: `{}`\n\n", action));
        }

        output.push_str("| tier | tag | location | size |\n");
        output.push_str("|------|-----|----------|------|\n");
        for tier in &report.tiers {
            let size = match tier.size {
                SizeInfo::NotCreated => "_not created_".to_string(),
                SizeInfo::Bytes(n) => format_size(n),
            };
            output.push_str(&format!(
                "| {} | {} | `{}` | {} |\n",
                tier.kind,
                tier.tag.as_deref().unwrap_or("-"),
                tier.location,
                size
            ));
        }
        output
    }
}
