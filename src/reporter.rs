// src/reporter.rs
// JSON & CSV export of analysis results, plus the console summary for the CLI.

use csv::Writer;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::persona::{format_percent, PersonaRecord};
use crate::pipeline::VideoAnalysis;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ReportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ReportError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Where [`Reporter::export_json`] put its two files.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPaths {
    pub personas: PathBuf,
    pub summary: PathBuf,
}

/// A personas file is either a bare list or a `{"personas": [...]}` object.
#[derive(Deserialize)]
#[serde(untagged)]
enum PersonasFile {
    Bare(Vec<PersonaRecord>),
    Wrapped { personas: Vec<PersonaRecord> },
}

pub struct Reporter;

impl Reporter {
    /// Write `personas/<id>_personas.json` and `summaries/<id>_summaries.json` under `dir`.
    pub fn export_json(dir: &Path, analysis: &VideoAnalysis) -> Result<ExportPaths, ReportError> {
        let personas_dir = dir.join("personas");
        let summaries_dir = dir.join("summaries");
        fs::create_dir_all(&personas_dir).map_err(|e| ReportError::io(&personas_dir, e))?;
        fs::create_dir_all(&summaries_dir).map_err(|e| ReportError::io(&summaries_dir, e))?;

        let paths = ExportPaths {
            personas: personas_dir.join(format!("{}_personas.json", analysis.video_id)),
            summary: summaries_dir.join(format!("{}_summaries.json", analysis.video_id)),
        };

        write_pretty(&paths.personas, &analysis.personas)?;
        write_pretty(&paths.summary, &analysis.summary)?;

        tracing::info!(
            video_id = %analysis.video_id,
            personas = %paths.personas.display(),
            summary = %paths.summary.display(),
            "Analysis exported"
        );
        Ok(paths)
    }

    /// One row per persona. Evidence lists are joined with ` | `.
    pub fn export_csv(path: &Path, personas: &[PersonaRecord]) -> Result<(), ReportError> {
        let mut wtr = Writer::from_path(path)?;

        wtr.write_record([
            "name",
            "description",
            "share",
            "sentiment_label",
            "sentiment_percent",
            "theme",
            "focus",
            "feedback",
            "key_feedback",
        ])?;

        for persona in personas {
            let focus = persona.focus.map(|f| f.to_string()).unwrap_or_default();
            let key_feedback: Vec<String> = persona
                .key_feedback
                .iter()
                .map(|k| format!("{}: {}", k.label, k.recommendation))
                .collect();

            wtr.write_record([
                persona.name.clone(),
                persona.description.clone(),
                persona.share.to_string(),
                persona.sentiment_label.to_string(),
                format_percent(persona.sentiment_percent),
                persona.theme.clone(),
                focus,
                persona.feedback.join(" | "),
                key_feedback.join(" | "),
            ])?;
        }

        wtr.flush().map_err(|e| ReportError::io(path, e))?;
        tracing::info!(path = %path.display(), rows = personas.len(), "CSV exported");
        Ok(())
    }

    pub fn load_personas(path: &Path) -> Result<Vec<PersonaRecord>, ReportError> {
        let file = File::open(path).map_err(|e| ReportError::io(path, e))?;
        let parsed: PersonasFile = serde_json::from_reader(BufReader::new(file))?;
        let mut personas = match parsed {
            PersonasFile::Wrapped { personas } => personas,
            PersonasFile::Bare(personas) => personas,
        };
        personas.iter_mut().for_each(PersonaRecord::enforce_caps);
        Ok(personas)
    }

    pub fn print_summary(analysis: &VideoAnalysis) {
        println!("\n📊 PERSONA SUMMARY: {}", analysis.video_id);
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("Total Messages: {}", analysis.summary.total_messages);
        println!("Unique Users: {}", analysis.summary.unique_users);
        println!("{}", analysis.summary.overall_summary);

        for (rank, persona) in analysis.personas.personas.iter().enumerate() {
            println!(
                "\n{}. {} ({}% of messages, {} {}%)",
                rank + 1,
                persona.name,
                persona.share,
                persona.sentiment_label,
                persona.sentiment_percent
            );
            if !persona.theme.is_empty() {
                println!("   Theme: {}", persona.theme);
            }
            if let Some(focus) = persona.focus {
                println!("   Focus: {}", focus);
            }
            if !persona.description.is_empty() {
                println!("   {}", persona.description);
            }
            for quote in &persona.feedback {
                println!("   💬 \"{}\"", quote);
            }
            for item in &persona.key_feedback {
                println!("   🔑 {}: {}", item.label, item.recommendation);
            }
        }

        println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    }
}

fn write_pretty<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ReportError> {
    let mut file = File::create(path).map_err(|e| ReportError::io(path, e))?;
    file.write_all(serde_json::to_string_pretty(value)?.as_bytes())
        .map_err(|e| ReportError::io(path, e))?;
    Ok(())
}
