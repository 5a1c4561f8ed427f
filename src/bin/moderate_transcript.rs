use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use transcript_guard::init_logging;
use transcript_guard::services::text_processor::{normalize_transcript, preview};
use transcript_guard::services::{ConfigStore, OpenAiClassifier, TranscriptModerator};

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn parse_number<T: std::str::FromStr>(args: &[String], key: &str) -> Result<Option<T>> {
    parse_arg_value(args, key)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| anyhow::anyhow!("invalid value for {}: {}", key, v))
        })
        .transpose()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || has_flag(&args, "--help") {
        eprintln!(
            "Usage:\n  moderate_transcript <transcript.txt> [--out <json_path>] [--config <config.json>] [--workers <n>] [--chunk-size <n>] [--overlap <n>] [--threshold <f>] [--no-misinformation]\n\nNotes:\n  - API key is read from OPENAI_API_KEY (or the config file).\n  - The report is written as pretty JSON (default moderation_report.json)."
        );
        return Ok(());
    }

    init_logging();

    let path = args[1].clone();
    let out_path = parse_arg_value(&args, "--out").unwrap_or_else(|| "moderation_report.json".to_string());

    let store = match parse_arg_value(&args, "--config") {
        Some(p) => ConfigStore::from_file(PathBuf::from(p)),
        None => ConfigStore::new(ConfigStore::default_config_dir().unwrap_or_default()),
    };
    let app_config = store
        .load()
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("loading {}", store.config_file().display()))?;

    let mut config = app_config.moderation.clone();
    if let Some(n) = parse_number(&args, "--workers")? {
        config.max_workers = n;
    }
    if let Some(n) = parse_number(&args, "--chunk-size")? {
        config.chunk_size = n;
    }
    if let Some(n) = parse_number(&args, "--overlap")? {
        config.overlap = n;
    }
    if let Some(t) = parse_number(&args, "--threshold")? {
        config.threshold = t;
    }
    if has_flag(&args, "--no-misinformation") {
        config.check_misinformation = false;
    }

    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading transcript {}", path))?;
    let transcript = normalize_transcript(&raw);

    let classifier = OpenAiClassifier::from_config(&app_config).context("building classifier")?;
    let moderator = TranscriptModerator::new(Arc::new(classifier), config)?;

    println!("File: {}", path);
    println!("Transcript: {} chars", transcript.chars().count());
    println!(
        "Chunking: size={} overlap={} strategy={:?}",
        moderator.config().chunk_size,
        moderator.config().overlap,
        moderator.config().chunk_strategy
    );
    println!();

    let report = moderator.moderate(&transcript).await?;

    let s = &report.summary;
    println!(
        "Chunks: {} (failed {})  Problematic: {} ({} lines)  Misinformation: {}",
        s.chunks_total, s.chunks_failed, s.problematic_chunks, s.flagged_lines, s.misinformation_chunks
    );
    for section in &report.problematic_sections {
        for line in &section.flagged_lines {
            let categories: Vec<&str> = line.flagged_categories.keys().map(|k| k.as_str()).collect();
            println!(
                "[C{:04} L{:03}] {}  {}",
                section.chunk_index,
                line.line_number,
                categories.join(","),
                preview(&line.text, 100)
            );
        }
    }
    for finding in &report.misinformation_sections {
        println!(
            "[C{:04} MIS {:.2}] {}",
            finding.chunk_index,
            finding.confidence,
            preview(&finding.explanation, 120)
        );
    }

    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&out_path, json).with_context(|| format!("writing {}", out_path))?;
    println!();
    println!("Wrote JSON: {}", out_path);

    Ok(())
}
