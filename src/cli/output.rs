use std::fmt::{self, Write as FmtWrite};

use serde::Serialize;

use crate::models::{OutputFormat, RetrievalResult};
use crate::utils::preview;

pub trait Formatter {
    fn format_search_results(&self, report: &SearchReport) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

/// Outcome of `profrag search`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub query: String,
    pub results: RetrievalResult,
    pub duration_ms: u64,
}

impl SearchReport {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Probe result for one external service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceProbe {
    pub name: String,
    pub detail: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub embedding: ServiceProbe,
    pub vector_store: ServiceProbe,
    pub generation: ServiceProbe,
    pub index: String,
    pub namespace: String,
    pub vector_count: Option<u64>,
    pub top_k: u32,
}

impl StatusInfo {
    pub fn all_healthy(&self) -> bool {
        self.embedding.healthy && self.vector_store.healthy && self.generation.healthy
    }

    fn probes(&self) -> [&ServiceProbe; 3] {
        [&self.embedding, &self.vector_store, &self.generation]
    }
}

pub struct TextFormatter;

impl TextFormatter {
    fn search(report: &SearchReport) -> Result<String, fmt::Error> {
        let mut output = String::new();
        if report.is_empty() {
            writeln!(output, "No reviews found for: {}", report.query)?;
            return Ok(output);
        }

        writeln!(output, "Reviews matching: \"{}\"", report.query)?;
        writeln!(
            output,
            "Found {} results in {}ms\n",
            report.results.len(),
            report.duration_ms
        )?;

        for (i, record) in report.results.iter().enumerate() {
            writeln!(
                output,
                "{}. {} [Score: {:.3}]",
                i + 1,
                record.identifier,
                record.similarity_score
            )?;
            writeln!(output, "   Subject: {}", record.metadata.subject)?;
            writeln!(output, "   Stars:   {}/5", record.metadata.star_rating)?;
            writeln!(output, "   ---")?;
            for line in preview(&record.metadata.review_text, 200).lines() {
                writeln!(output, "   {}", line)?;
            }
            writeln!(output)?;
        }
        Ok(output)
    }

    fn status(status: &StatusInfo) -> Result<String, fmt::Error> {
        let mut output = String::new();
        writeln!(output, "Status")?;
        writeln!(output, "------")?;
        for probe in status.probes() {
            let state = if probe.healthy { "[OK]" } else { "[UNAVAILABLE]" };
            writeln!(output, "{:<14} {} {}", format!("{}:", probe.name), state, probe.detail)?;
            if let Some(ref error) = probe.error {
                writeln!(output, "  Error:       {}", error)?;
            }
        }
        writeln!(output)?;
        writeln!(output, "Index:         {} (namespace {})", status.index, status.namespace)?;
        if let Some(count) = status.vector_count {
            writeln!(output, "  Vectors:     {}", count)?;
        }
        writeln!(output, "  Top-K:       {}", status.top_k)?;
        Ok(output)
    }
}

impl Formatter for TextFormatter {
    fn format_search_results(&self, report: &SearchReport) -> String {
        Self::search(report).unwrap_or_default()
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        Self::status(status).unwrap_or_default()
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render(&self, value: &impl Serialize) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| serde_json::json!({"error": e.to_string()}).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_search_results(&self, report: &SearchReport) -> String {
        self.render(report)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.render(status)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub struct MarkdownFormatter;

impl MarkdownFormatter {
    fn search(report: &SearchReport) -> Result<String, fmt::Error> {
        let mut output = String::new();
        if report.is_empty() {
            writeln!(output, "## No reviews found\n\nQuery: `{}`", report.query)?;
            return Ok(output);
        }

        writeln!(output, "## Matching Reviews\n")?;
        writeln!(output, "**Query:** `{}`\n", report.query)?;
        writeln!(
            output,
            "Found {} results in {}ms\n",
            report.results.len(),
            report.duration_ms
        )?;

        for (i, record) in report.results.iter().enumerate() {
            writeln!(output, "### {}. {}\n", i + 1, record.identifier)?;
            writeln!(output, "- **Score:** {:.3}", record.similarity_score)?;
            writeln!(output, "- **Subject:** {}", record.metadata.subject)?;
            writeln!(output, "- **Stars:** {}/5\n", record.metadata.star_rating)?;
            writeln!(output, "> {}\n", record.metadata.review_text)?;
        }
        Ok(output)
    }

    fn status(status: &StatusInfo) -> Result<String, fmt::Error> {
        let mut output = String::new();
        writeln!(output, "## Status\n")?;
        writeln!(output, "| Service | Detail | Status |")?;
        writeln!(output, "|---------|--------|--------|")?;
        for probe in status.probes() {
            let state = if probe.healthy { "✅" } else { "❌" };
            writeln!(output, "| {} | `{}` | {} |", probe.name, probe.detail, state)?;
        }
        writeln!(output)?;
        writeln!(output, "- **Index:** {}", status.index)?;
        writeln!(output, "- **Namespace:** {}", status.namespace)?;
        if let Some(count) = status.vector_count {
            writeln!(output, "- **Vectors:** {}", count)?;
        }
        writeln!(output, "- **Top-K:** {}", status.top_k)?;
        Ok(output)
    }
}

impl Formatter for MarkdownFormatter {
    fn format_search_results(&self, report: &SearchReport) -> String {
        Self::search(report).unwrap_or_default()
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        Self::status(status).unwrap_or_default()
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RetrievedRecord, ReviewMetadata};

    fn report() -> SearchReport {
        let records = vec![
            RetrievedRecord {
                identifier: "Dr. Emily Carter".to_string(),
                similarity_score: 0.91,
                metadata: ReviewMetadata {
                    review_text: "Clear explanations of quantum mechanics.".to_string(),
                    subject: "Physics".to_string(),
                    star_rating: 4.0,
                },
            },
            RetrievedRecord {
                identifier: "Dr. Linda Brown".to_string(),
                similarity_score: 0.80,
                metadata: ReviewMetadata {
                    review_text: "Fast-paced lectures.".to_string(),
                    subject: "Physics".to_string(),
                    star_rating: 3.5,
                },
            },
        ];
        SearchReport {
            query: "physics".to_string(),
            results: RetrievalResult::ranked(records, 5),
            duration_ms: 12,
        }
    }

    fn probe(name: &str, healthy: bool) -> ServiceProbe {
        ServiceProbe {
            name: name.to_string(),
            detail: "model".to_string(),
            healthy,
            error: (!healthy).then(|| "connection refused".to_string()),
        }
    }

    fn status() -> StatusInfo {
        StatusInfo {
            embedding: probe("Embedding", true),
            vector_store: probe("Vector Store", false),
            generation: probe("Generation", true),
            index: "rag".to_string(),
            namespace: "ns1".to_string(),
            vector_count: None,
            top_k: 5,
        }
    }

    #[test]
    fn test_text_search_output() {
        let output = TextFormatter.format_search_results(&report());
        assert!(output.contains("Found 2 results"));
        assert!(output.contains("1. Dr. Emily Carter [Score: 0.910]"));
        assert!(output.contains("Stars:   3.5/5"));
    }

    #[test]
    fn test_empty_search_output() {
        let empty = SearchReport {
            query: "astrology".to_string(),
            results: RetrievalResult::empty(),
            duration_ms: 3,
        };
        assert_eq!(
            TextFormatter.format_search_results(&empty),
            "No reviews found for: astrology\n"
        );
        assert!(MarkdownFormatter.format_search_results(&empty).starts_with("## No reviews found"));
    }

    #[test]
    fn test_json_search_output_is_valid() {
        let output = JsonFormatter::new(false).format_search_results(&report());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["query"], "physics");
        assert_eq!(value["results"]["records"][0]["identifier"], "Dr. Emily Carter");
    }

    #[test]
    fn test_status_output() {
        let status = status();
        assert!(!status.all_healthy());

        let text = TextFormatter.format_status(&status);
        assert!(text.contains("[UNAVAILABLE]"));
        assert!(text.contains("connection refused"));

        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter::new(true).format_status(&status)).unwrap();
        assert_eq!(json["vector_store"]["healthy"], false);
        assert!(json["embedding"].get("error").is_none());

        let markdown = MarkdownFormatter.format_status(&status);
        assert!(markdown.contains("| Vector Store | `model` | ❌ |"));
    }

    #[test]
    fn test_error_formats() {
        assert_eq!(TextFormatter.format_error("boom"), "Error: boom\n");
        assert_eq!(
            JsonFormatter::new(false).format_error("boom"),
            r#"{"error":"boom"}"#
        );
    }
}
