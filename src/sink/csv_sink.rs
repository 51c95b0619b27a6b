// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

use crate::message::{CsvEnvelope, Envelope, Level, LogEnvelope};
use crate::{AppError, AppResult};

use super::Sink;

#[derive(Debug)]
struct CsvFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Writes each logical CSV file to its own file under one directory.
///
/// A logical name is resolved to a path once per sink. When the naive path is
/// already taken, the first free `stem_N.csv` is used instead.
#[derive(Debug)]
pub struct CsvSink {
    output_dir: PathBuf,
    writers: HashMap<String, CsvFile>,
}

impl CsvSink {
    pub async fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        if let Err(e) = fs::create_dir_all(&output_dir).await {
            warn!(
                "could not create csv directory {}: {}",
                output_dir.display(),
                e
            );
        }
        CsvSink {
            output_dir,
            writers: HashMap::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The path a logical filename was resolved to, if it has been opened.
    pub fn resolved_path(&self, filename: &str) -> Option<&Path> {
        self.writers.get(filename).map(|file| file.path.as_path())
    }

    async fn writer_for(&mut self, filename: &str) -> AppResult<&mut CsvFile> {
        match self.writers.entry(filename.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = open_csv(&self.output_dir, filename).await?;
                Ok(entry.insert(file))
            }
        }
    }

    async fn write_csv(&mut self, csv: CsvEnvelope) -> AppResult<()> {
        if csv.filename.is_empty() {
            debug!("csv envelope without filename from {}", csv.caller);
            return Ok(());
        }
        let file = self.writer_for(&csv.filename).await?;
        if csv.is_touch() {
            return Ok(());
        }
        let mut line = format_record(&csv.row);
        line.push('\n');
        file.writer.write_all(line.as_bytes()).await?;
        file.writer.flush().await?;
        Ok(())
    }
}

fn forward_to_tracing(log: &LogEnvelope) {
    let text = log.text.trim_end_matches('\n');
    match log.level {
        Level::Error => error!("{} -- {}", log.caller, text),
        Level::Warn => warn!("{} -- {}", log.caller, text),
        Level::Debug => debug!("{} -- {}", log.caller, text),
        Level::Log | Level::Success => info!("{} -- {}", log.caller, text),
    }
}

/// Splits `name` on `.csv` and returns the part before it.
fn stem_of(name: &str) -> &str {
    name.split(".csv").next().unwrap_or(name)
}

async fn unused_path(dir: &Path, filename: &str) -> PathBuf {
    let naive = dir.join(filename);
    if !fs::try_exists(&naive).await.unwrap_or(false) {
        return naive;
    }
    let stem = stem_of(filename);
    let mut suffix = 1u32;
    loop {
        let candidate = dir.join(format!("{}_{}.csv", stem, suffix));
        if !fs::try_exists(&candidate).await.unwrap_or(false) {
            warn!(
                "Found previous {}, creating {}",
                naive.display(),
                candidate.display()
            );
            return candidate;
        }
        suffix += 1;
    }
}

async fn open_csv(dir: &Path, filename: &str) -> AppResult<CsvFile> {
    let path = unused_path(dir, filename).await;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| {
            error!("could not open {}: {}", path.display(), e);
            AppError::DetailedIoError(format!("could not open {}: {}", path.display(), e))
        })?;
    info!("Created csv file {}", path.display());
    Ok(CsvFile {
        path,
        writer: BufWriter::new(file),
    })
}

fn format_field(value: &Value) -> String {
    let raw = match value {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let needs_quotes = raw.starts_with(char::is_whitespace)
        || raw.contains([',', '"', '\r', '\n']);
    if needs_quotes {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

fn format_record(row: &[Value]) -> String {
    row.iter().map(format_field).collect::<Vec<_>>().join(",")
}

impl Sink for CsvSink {
    fn name(&self) -> &'static str {
        "csv sink"
    }

    async fn write(&mut self, envelope: Envelope) -> AppResult<()> {
        match envelope {
            Envelope::Csv(csv) => self.write_csv(csv).await,
            Envelope::Log(log) => {
                forward_to_tracing(&log);
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        let mut result = Ok(());
        for (name, file) in self.writers.iter_mut() {
            if let Err(e) = file.writer.flush().await {
                error!("could not flush {}: {}", name, e);
                result = Err(e.into());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn row(filename: &str, row: Vec<Value>) -> Envelope {
        CsvEnvelope {
            caller: "test.rs:1".into(),
            filename: filename.into(),
            row,
        }
        .into()
    }

    #[rstest]
    #[case(json!("plain"), "plain")]
    #[case(json!("a,b"), "\"a,b\"")]
    #[case(json!("say \"hi\""), "\"say \"\"hi\"\"\"")]
    #[case(json!("two\nlines"), "\"two\nlines\"")]
    #[case(json!(" padded"), "\" padded\"")]
    #[case(json!(3.5), "3.5")]
    #[case(json!(true), "true")]
    #[case(json!(null), "")]
    #[case(json!([1, 2]), "\"[1,2]\"")]
    fn test_format_field(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(format_field(&value), expected);
    }

    #[test]
    fn test_stem() {
        assert_eq!(stem_of("a.csv"), "a");
        assert_eq!(stem_of("data"), "data");
        assert_eq!(stem_of("x.csv.bak"), "x");
    }

    #[tokio::test]
    async fn test_rows_are_cached_per_logical_name() -> AppResult<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = CsvSink::new(dir.path()).await;
        sink.write(row("a.csv", vec![json!("h1"), json!("h2")]))
            .await?;
        sink.write(row("a.csv", vec![json!(1), json!("x,y")])).await?;
        sink.close().await?;

        assert_eq!(sink.resolved_path("a.csv"), Some(dir.path().join("a.csv").as_path()));
        let content = std::fs::read_to_string(dir.path().join("a.csv"))?;
        assert_eq!(content, "h1,h2\n1,\"x,y\"\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicates_get_suffixes() -> AppResult<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.csv"), "old\n")?;

        let mut first = CsvSink::new(dir.path()).await;
        first.write(row("a.csv", vec![json!("one")])).await?;
        first.close().await?;
        assert_eq!(
            first.resolved_path("a.csv"),
            Some(dir.path().join("a_1.csv").as_path())
        );

        let mut second = CsvSink::new(dir.path()).await;
        second.write(row("a.csv", vec![json!("two")])).await?;
        second.close().await?;
        assert_eq!(
            second.resolved_path("a.csv"),
            Some(dir.path().join("a_2.csv").as_path())
        );

        assert_eq!(std::fs::read_to_string(dir.path().join("a.csv"))?, "old\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("a_1.csv"))?, "one\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("a_2.csv"))?, "two\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_touch_creates_empty_file() -> AppResult<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = CsvSink::new(dir.path()).await;
        sink.write(row("t.csv", vec![])).await?;
        sink.write(row("t.csv", vec![])).await?;
        sink.close().await?;

        let content = std::fs::read_to_string(dir.path().join("t.csv"))?;
        assert!(content.is_empty());
        assert!(!dir.path().join("t_1.csv").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_unusable_directory() -> AppResult<()> {
        let blocker = tempfile::NamedTempFile::new()?;
        let dir = blocker.path().join("csv");
        let mut sink = CsvSink::new(&dir).await;

        assert!(sink.write(row("a.csv", vec![json!(1)])).await.is_err());
        assert!(sink.resolved_path("a.csv").is_none());
        assert!(!dir.join("a.csv").exists());
        sink.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_log_envelopes_and_blank_names_are_skipped() -> AppResult<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = CsvSink::new(dir.path()).await;
        sink.write(LogEnvelope::new(Level::Warn, "x.rs:1", "hello").into())
            .await?;
        sink.write(row("", vec![json!(1)])).await?;
        sink.close().await?;
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }
}
