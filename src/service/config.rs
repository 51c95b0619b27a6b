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

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    /// port of the UDP log server, 0 disables it
    pub log_udp: u16,
    pub log_tcp: u16,
    pub csv_udp: u16,
    pub csv_tcp: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "127.0.0.1".to_string(),
            log_udp: 0,
            log_tcp: 0,
            csv_udp: 0,
            csv_tcp: 0,
        }
    }
}

/// Where and how the log sink renders lines.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogOutputConfig {
    pub dir: String,
    pub extension: String,
    /// keep microseconds in the line timestamp
    pub microseconds: bool,
    pub console: bool,
    pub colors: bool,
}

impl Default for LogOutputConfig {
    fn default() -> Self {
        LogOutputConfig {
            dir: "logs".to_string(),
            extension: "log".to_string(),
            microseconds: true,
            console: true,
            colors: true,
        }
    }
}

impl LogOutputConfig {
    pub fn time_format(&self) -> &'static str {
        if self.microseconds {
            "%Y/%m/%d %H:%M:%S%.6f"
        } else {
            "%Y/%m/%d %H:%M:%S"
        }
    }

    /// Name of the log file for a collector started at `started`.
    pub fn file_name(&self, started: DateTime<Local>) -> String {
        format!("{}.{}", started.format("%Y-%m-%dT%H:%M:%S"), self.extension)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CsvOutputConfig {
    pub dir: String,
}

impl Default for CsvOutputConfig {
    fn default() -> Self {
        CsvOutputConfig {
            dir: "csv".to_string(),
        }
    }
}

/// Knobs shared by the client and server pipelines.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    /// capacity of the client outbound and server inbound queues
    pub queue_capacity: usize,
    /// initial size of the per-connection stream read buffer
    pub read_buffer_size: usize,
    /// receive buffer for one datagram
    pub datagram_size: usize,
    /// largest single encoded envelope accepted on a stream
    pub max_envelope_size: usize,
    /// pause after a successful TCP dial before the first write
    pub tcp_settle_delay_ms: u64,
    /// on shutdown, a reader stops draining once its socket is quiet this long
    pub drain_grace_ms: u64,
    /// on shutdown, a reader stops draining after this long regardless
    pub drain_limit_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            queue_capacity: 100,
            read_buffer_size: 16 * 1024,
            datagram_size: 64 * 1024,
            max_envelope_size: 1024 * 1024,
            tcp_settle_delay_ms: 50,
            drain_grace_ms: 20,
            drain_limit_ms: 1000,
        }
    }
}

impl TransportConfig {
    pub fn tcp_settle_delay(&self) -> Duration {
        Duration::from_millis(self.tcp_settle_delay_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn drain_limit(&self) -> Duration {
        Duration::from_millis(self.drain_limit_ms)
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    pub network: NetworkConfig,
    pub log: LogOutputConfig,
    pub csv: CsvOutputConfig,
    pub transport: TransportConfig,
}

impl CollectorConfig {
    /// Loads the config file at `path`, overlaid with `SOCKETLOGGER__SECTION__KEY`
    /// environment variables.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<CollectorConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(
                config::Environment::with_prefix("SOCKETLOGGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let collector_config: CollectorConfig = config.try_deserialize()?;

        Ok(collector_config)
    }
}
