use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::cli::OutputFormat;
use crate::error::CliError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeMeta {
    pub request_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub latency_ms: u64,
    pub served_from_cache: bool,
    pub providers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
}

impl From<&crmai_core::OrchestratorError> for EnvelopeError {
    fn from(error: &crmai_core::OrchestratorError) -> Self {
        Self {
            code: error.code().to_owned(),
            message: error.detail(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub meta: EnvelopeMeta,
    pub data: Value,
    pub errors: Vec<EnvelopeError>,
}

pub fn render(envelope: &Envelope, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(envelope)?
            } else {
                serde_json::to_string(envelope)?
            };
            println!("{payload}");
        }
        OutputFormat::Table => render_table(envelope)?,
    }
    Ok(())
}

fn render_table(envelope: &Envelope) -> Result<(), CliError> {
    println!("request_id  : {}", envelope.meta.request_id);
    println!("generated_at: {}", envelope.meta.generated_at);
    println!("providers   : {}", envelope.meta.providers.join(","));
    println!("latency_ms  : {}", envelope.meta.latency_ms);
    println!("from_cache  : {}", envelope.meta.served_from_cache);

    if !envelope.meta.warnings.is_empty() {
        println!("warnings:");
        for warning in &envelope.meta.warnings {
            println!("  - {warning}");
        }
    }

    println!("data:");
    let pretty_data = serde_json::to_string_pretty(&envelope.data)?;
    for line in pretty_data.lines() {
        println!("  {line}");
    }

    if !envelope.errors.is_empty() {
        println!("errors:");
        for error in &envelope.errors {
            println!("  - {}: {}", error.code, error.message);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_omits_empty_warnings() {
        let envelope = Envelope {
            meta: EnvelopeMeta {
                request_id: String::from("req_1"),
                generated_at: OffsetDateTime::UNIX_EPOCH,
                latency_ms: 12,
                served_from_cache: false,
                providers: vec![String::from("gemini")],
                warnings: Vec::new(),
            },
            data: json!({ "score": 70 }),
            errors: Vec::new(),
        };

        let value = serde_json::to_value(&envelope).expect("serializes");
        assert!(value["meta"].get("warnings").is_none());
        assert_eq!(value["meta"]["generated_at"], "1970-01-01T00:00:00Z");
        assert_eq!(value["meta"]["providers"][0], "gemini");
    }
}
