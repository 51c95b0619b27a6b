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

use std::fmt;
use std::panic::Location;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

const RESET: &str = "\x1b[0m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

/// Caller name that renders without the `caller -- ` prefix, used by producers
/// that already put the call site into the text.
pub const EMBEDDED_CALLER: &str = "embedded";

/// Severity of a log envelope. Only affects rendering, never filtering.
///
/// Travels on the wire as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Log = 0,
    Warn = 1,
    Success = 2,
    Error = 3,
    Debug = 4,
}

impl Level {
    pub fn from_code(code: i64) -> Option<Level> {
        match code {
            0 => Some(Level::Log),
            1 => Some(Level::Warn),
            2 => Some(Level::Success),
            3 => Some(Level::Error),
            4 => Some(Level::Debug),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// ANSI escape that starts this level's color.
    pub fn color(self) -> &'static str {
        match self {
            Level::Log => "",
            Level::Warn => YELLOW,
            Level::Success => GREEN,
            Level::Error => RED,
            Level::Debug => CYAN,
        }
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        // unknown codes from foreign producers render as plain log lines
        Ok(Level::from_code(code).unwrap_or(Level::Log))
    }
}

/// `file.rs:42` for the given call site.
pub fn caller_of(location: &Location<'_>) -> String {
    let file = Path::new(location.file())
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_else(|| location.file().into());
    format!("{}:{}", file, location.line())
}

/// One free-text log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEnvelope {
    #[serde(default)]
    pub caller: String,
    pub level: Level,
    #[serde(rename = "message")]
    pub text: String,
}

impl LogEnvelope {
    pub fn new(level: Level, caller: impl Into<String>, text: impl Into<String>) -> Self {
        LogEnvelope {
            caller: caller.into(),
            level,
            text: text.into(),
        }
    }

    /// Builds an envelope whose caller is the location this is called from.
    #[track_caller]
    pub fn here(level: Level, text: impl Into<String>) -> Self {
        Self::new(level, caller_of(Location::caller()), text)
    }

    /// Renders `| caller -- text`, wrapped in the level color when `colored`.
    pub fn render(&self, colored: bool) -> String {
        let text = self.text.trim_end_matches('\n');
        let body = if self.caller == EMBEDDED_CALLER {
            format!("| {}", text)
        } else {
            format!("| {} -- {}", self.caller, text)
        };
        if colored {
            format!("{}{}{}{}", RESET, self.level.color(), body, RESET)
        } else {
            body
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One CSV row addressed to a logical file. An empty row only creates the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvEnvelope {
    #[serde(default)]
    pub caller: String,
    #[serde(rename = "csv_filename")]
    pub filename: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub row: Vec<Value>,
}

impl CsvEnvelope {
    #[track_caller]
    pub fn new(filename: impl Into<String>, row: Vec<Value>) -> Self {
        CsvEnvelope {
            caller: caller_of(Location::caller()),
            filename: filename.into(),
            row,
        }
    }

    pub fn is_touch(&self) -> bool {
        self.row.is_empty()
    }
}

impl fmt::Display for CsvEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Filename: {}, Row: {}",
            self.filename,
            Value::Array(self.row.clone())
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Log,
    Csv,
}

/// The unit shipped from a client to a server.
///
/// The wire form carries no explicit tag: an object with `level` and `message`
/// is a log line, one with `csv_filename` is a CSV row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Log(LogEnvelope),
    Csv(CsvEnvelope),
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Log(_) => EnvelopeKind::Log,
            Envelope::Csv(_) => EnvelopeKind::Csv,
        }
    }

    pub fn caller(&self) -> &str {
        match self {
            Envelope::Log(log) => &log.caller,
            Envelope::Csv(csv) => &csv.caller,
        }
    }
}

impl From<LogEnvelope> for Envelope {
    fn from(value: LogEnvelope) -> Self {
        Envelope::Log(value)
    }
}

impl From<CsvEnvelope> for Envelope {
    fn from(value: CsvEnvelope) -> Self {
        Envelope::Csv(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_log_wire_format() -> serde_json::Result<()> {
        let envelope: Envelope = LogEnvelope::new(Level::Error, "main.rs:7", "boom").into();
        assert_eq!(
            serde_json::to_string(&envelope)?,
            r#"{"caller":"main.rs:7","level":3,"message":"boom"}"#
        );
        Ok(())
    }

    #[test]
    fn test_csv_wire_format() -> serde_json::Result<()> {
        let envelope = Envelope::Csv(CsvEnvelope {
            caller: "main.rs:9".into(),
            filename: "a.csv".into(),
            row: vec![json!("x"), json!(3), json!(4.5)],
        });
        assert_eq!(
            serde_json::to_string(&envelope)?,
            r#"{"caller":"main.rs:9","csv_filename":"a.csv","row":["x",3,4.5]}"#
        );
        Ok(())
    }

    #[rstest]
    #[case(r#"{"caller":"a.py:1","level":1,"message":"hi"}"#, EnvelopeKind::Log)]
    #[case(r#"{ "level" : 4, "message" : "no caller" }"#, EnvelopeKind::Log)]
    #[case(r#"{"caller":"a.go:3","csv_filename":"f.csv","row":[1,2]}"#, EnvelopeKind::Csv)]
    #[case(r#"{"caller":"a.go:3","csv_filename":"f.csv","row":null}"#, EnvelopeKind::Csv)]
    #[case(r#"{"csv_filename":"f.csv"}"#, EnvelopeKind::Csv)]
    fn test_decode_by_shape(#[case] input: &str, #[case] kind: EnvelopeKind) {
        let envelope: Envelope = serde_json::from_str(input).unwrap();
        assert_eq!(envelope.kind(), kind);
    }

    #[test]
    fn test_null_row_is_touch() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"caller":"c","csv_filename":"f.csv","row":null}"#).unwrap();
        match envelope {
            Envelope::Csv(csv) => assert!(csv.is_touch()),
            other => panic!("expected csv, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_shape_rejected() {
        assert!(serde_json::from_str::<Envelope>(r#"{"caller":"c"}"#).is_err());
        assert!(serde_json::from_str::<Envelope>("[1,2,3]").is_err());
    }

    #[test]
    fn test_unknown_level_renders_as_log() {
        let envelope: LogEnvelope =
            serde_json::from_str(r#"{"caller":"c","level":42,"message":"m"}"#).unwrap();
        assert_eq!(envelope.level, Level::Log);
    }

    #[rstest]
    #[case(Level::Log, "| main.rs:1 -- hello")]
    #[case(Level::Error, "| main.rs:1 -- hello")]
    fn test_render_plain(#[case] level: Level, #[case] expected: &str) {
        let envelope = LogEnvelope::new(level, "main.rs:1", "hello\n");
        assert_eq!(envelope.render(false), expected);
    }

    #[test]
    fn test_render_colored_and_embedded() {
        let warn = LogEnvelope::new(Level::Warn, "w.rs:2", "careful");
        assert_eq!(warn.render(true), "\x1b[0m\x1b[33m| w.rs:2 -- careful\x1b[0m");

        let embedded = LogEnvelope::new(Level::Log, EMBEDDED_CALLER, "lib.rs:9 already placed");
        assert_eq!(embedded.render(false), "| lib.rs:9 already placed");
    }

    #[test]
    fn test_here_captures_call_site() {
        let line = line!() + 1;
        let envelope = LogEnvelope::here(Level::Debug, "x");
        assert_eq!(envelope.caller, format!("envelope.rs:{}", line));
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(Level::Log < Level::Warn);
        assert!(Level::Error < Level::Debug);
        assert_eq!(Level::from_code(2), Some(Level::Success));
        assert_eq!(Level::from_code(-1), None);
    }
}
