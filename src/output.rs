use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;

use crate::normalize::{InspectSummary, NormalizeSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Serialize)]
struct Stamped<'a, T> {
    generated_at: String,
    #[serde(flatten)]
    result: &'a T,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_normalize(result: &NormalizeSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_inspect(result: &InspectSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn render<T: Serialize>(value: &T) -> io::Result<String> {
        let stamped = Stamped {
            generated_at: Utc::now().to_rfc3339(),
            result: value,
        };
        serde_json::to_string_pretty(&stamped).map_err(io::Error::other)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = Self::render(value)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnose::Diagnosis;

    #[test]
    fn json_is_flattened_and_stamped() {
        let summary = InspectSummary {
            input: "vascan.zip".to_string(),
            core: "taxon.txt".to_string(),
            sampled_rows: 3,
            diagnosis: Diagnosis::default(),
            extensions: vec!["vernacularname".to_string()],
        };
        let json = JsonOutput::render(&summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["core"], "taxon.txt");
        assert_eq!(value["diagnosis"]["names"], "unknown");
        assert!(value["generated_at"].as_str().unwrap().contains('T'));
    }
}
