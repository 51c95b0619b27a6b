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

use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{self, AsyncWriteExt, BufWriter, Stdout};
use tracing::debug;

use crate::message::Envelope;
use crate::{AppError, AppResult};

use super::Sink;

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Renders log envelopes as text lines to the console and/or an append-mode file.
///
/// The console copy carries level colors when enabled, the file copy is always
/// plain text.
#[derive(Debug, Default)]
pub struct LogSink {
    console: Option<Stdout>,
    colors: bool,
    file: Option<LogFile>,
    time_format: Option<String>,
}

impl LogSink {
    /// A sink with no destination; add one with the `with_*` builders.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn console(colors: bool) -> Self {
        Self::new().with_console(colors)
    }

    pub fn with_console(mut self, colors: bool) -> Self {
        self.console = Some(io::stdout());
        self.colors = colors;
        self
    }

    /// Prefixes every line with the local time in this chrono format.
    pub fn with_time_format(mut self, format: &str) -> AppResult<Self> {
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(AppError::InvalidValue(format!("time format: {}", format)));
        }
        self.time_format = Some(format.to_string());
        Ok(self)
    }

    /// Opens `dir/name` for appending, creating `dir` if needed.
    pub async fn with_file(mut self, dir: impl AsRef<Path>, name: &str) -> AppResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await.map_err(|e| {
            AppError::DetailedIoError(format!("could not create {}: {}", dir.display(), e))
        })?;
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                AppError::DetailedIoError(format!("could not open {}: {}", path.display(), e))
            })?;
        debug!("log sink appending to {}", path.display());
        self.file = Some(LogFile {
            path,
            writer: BufWriter::new(file),
        });
        Ok(self)
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|file| file.path.as_path())
    }

    fn stamp(&self) -> String {
        match &self.time_format {
            Some(format) => format!("{} ", Local::now().format(format)),
            None => String::new(),
        }
    }
}

impl Sink for LogSink {
    fn name(&self) -> &'static str {
        "log sink"
    }

    async fn write(&mut self, envelope: Envelope) -> AppResult<()> {
        let stamp = self.stamp();
        let colors = self.colors;
        let (plain, console_text) = match &envelope {
            Envelope::Log(log) => (log.render(false), log.render(colors)),
            Envelope::Csv(csv) => {
                let text = format!("| {} -- {}", csv.caller, csv);
                (text.clone(), text)
            }
        };

        if let Some(console) = self.console.as_mut() {
            console
                .write_all(format!("{}{}\n", stamp, console_text).as_bytes())
                .await?;
            console.flush().await?;
        }
        if let Some(file) = self.file.as_mut() {
            file.writer
                .write_all(format!("{}{}\n", stamp, plain).as_bytes())
                .await?;
            // keep the file tail-able
            file.writer.flush().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(console) = self.console.as_mut() {
            console.flush().await?;
        }
        if let Some(file) = self.file.as_mut() {
            file.writer.flush().await?;
            file.writer.get_mut().sync_all().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CsvEnvelope, Level, LogEnvelope};
    use serde_json::json;

    #[tokio::test]
    async fn test_file_lines_are_plain() -> AppResult<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = LogSink::new().with_file(dir.path(), "out.log").await?;

        sink.write(LogEnvelope::new(Level::Error, "a.rs:1", "bad\n").into())
            .await?;
        sink.write(LogEnvelope::new(Level::Success, "a.rs:2", "good").into())
            .await?;
        sink.write(
            CsvEnvelope {
                caller: "a.rs:3".into(),
                filename: "f.csv".into(),
                row: vec![json!("x"), json!(1)],
            }
            .into(),
        )
        .await?;
        sink.close().await?;

        let content = std::fs::read_to_string(dir.path().join("out.log"))?;
        assert_eq!(
            content,
            "| a.rs:1 -- bad\n| a.rs:2 -- good\n| a.rs:3 -- Filename: f.csv, Row: [\"x\",1]\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_timestamp_prefix() -> AppResult<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = LogSink::new()
            .with_time_format("%Y/%m/%d %H:%M:%S%.6f")?
            .with_file(dir.path(), "ts.log")
            .await?;
        sink.write(LogEnvelope::new(Level::Log, "t.rs:9", "tick").into())
            .await?;
        sink.close().await?;

        let content = std::fs::read_to_string(dir.path().join("ts.log"))?;
        let (stamp, rest) = content.split_once(" | ").unwrap();
        assert_eq!(rest, "t.rs:9 -- tick\n");
        assert_eq!(stamp.len(), "2024/01/02 03:04:05.000000".len());
        Ok(())
    }

    #[tokio::test]
    async fn test_appends_to_existing_file_in_new_dir() -> AppResult<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("not_there_yet");
        std::fs::create_dir_all(&nested)?;
        std::fs::write(nested.join("keep.log"), "earlier\n")?;

        let mut sink = LogSink::new().with_file(&nested, "keep.log").await?;
        assert_eq!(sink.file_path(), Some(nested.join("keep.log").as_path()));
        sink.write(LogEnvelope::new(Level::Log, "k.rs:1", "later").into())
            .await?;
        sink.close().await?;

        let content = std::fs::read_to_string(nested.join("keep.log"))?;
        assert_eq!(content, "earlier\n| k.rs:1 -- later\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_unusable_directory() -> AppResult<()> {
        let blocker = tempfile::NamedTempFile::new()?;
        let result = LogSink::new()
            .with_file(blocker.path().join("sub"), "x.log")
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_bad_time_format() {
        assert!(LogSink::new().with_time_format("%Y %Q").is_err());
    }
}
