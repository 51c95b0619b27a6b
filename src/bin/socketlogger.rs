use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use clap::Parser;
use dotenv::dotenv;
use socketlogger::{
    setup_local_tracing, setup_tracing, verbosity_directive, AppError, AppResult, CollectorConfig,
    Connection, CsvSink, LogOutputConfig, LogSink, Protocol, Server,
};
use tokio::runtime;
use tracing::{error, info};

#[derive(Parser)]
#[command(version, about = "Collects log lines and CSV rows sent over UDP or TCP")]
pub struct CommandLine {
    /// path to config file (default ./conf.toml when present)
    #[arg(short, long)]
    pub conf: Option<String>,
    /// address the servers bind to
    #[arg(long)]
    pub ip: Option<String>,
    /// port of the UDP log server, 0 disables it
    #[arg(long = "log-udp")]
    pub log_udp: Option<u16>,
    /// port of the TCP log server, 0 disables it
    #[arg(long = "log-tcp")]
    pub log_tcp: Option<u16>,
    /// directory of the log file
    #[arg(long = "log-dir")]
    pub log_dir: Option<String>,
    /// drop microseconds from timestamps
    #[arg(long)]
    pub lsecs: bool,
    /// extension of the log file
    #[arg(long = "log-ext")]
    pub log_ext: Option<String>,
    /// port of the UDP csv server, 0 disables it
    #[arg(long = "csv-udp")]
    pub csv_udp: Option<u16>,
    /// port of the TCP csv server, 0 disables it
    #[arg(long = "csv-tcp")]
    pub csv_tcp: Option<u16>,
    /// directory of the csv files
    #[arg(long = "csv-dir")]
    pub csv_dir: Option<String>,
    /// also write the collector's own diagnostics to rolling files here
    #[arg(long)]
    pub diagnostics: Option<String>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl CommandLine {
    fn load_config(&self) -> AppResult<CollectorConfig> {
        let mut config = match &self.conf {
            Some(path) => CollectorConfig::set_up_config(path)?,
            None if Path::new("./conf.toml").exists() => {
                CollectorConfig::set_up_config("./conf.toml")?
            }
            None => CollectorConfig::default(),
        };

        // flags win over the file
        let network = &mut config.network;
        if let Some(ip) = &self.ip {
            network.ip = ip.clone();
        }
        if let Some(port) = self.log_udp {
            network.log_udp = port;
        }
        if let Some(port) = self.log_tcp {
            network.log_tcp = port;
        }
        if let Some(port) = self.csv_udp {
            network.csv_udp = port;
        }
        if let Some(port) = self.csv_tcp {
            network.csv_tcp = port;
        }
        if let Some(dir) = &self.log_dir {
            config.log.dir = dir.clone();
        }
        if let Some(ext) = &self.log_ext {
            config.log.extension = ext.clone();
        }
        if self.lsecs {
            config.log.microseconds = false;
        }
        if let Some(dir) = &self.csv_dir {
            config.csv.dir = dir.clone();
        }
        Ok(config)
    }
}

async fn log_sink(config: &LogOutputConfig, started: DateTime<Local>) -> AppResult<LogSink> {
    let mut sink = LogSink::new().with_time_format(config.time_format())?;
    if config.console {
        sink = sink.with_console(config.colors);
    }
    sink.with_file(&config.dir, &config.file_name(started)).await
}

/// Resolves on Ctrl-C, or SIGTERM from a supervisor. The SIGTERM handler is
/// installed before this returns.
#[cfg(unix)]
fn shutdown_signal() -> AppResult<impl Future<Output = AppResult<&'static str>>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "ctrl-c").map_err(AppError::from),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> AppResult<impl Future<Output = AppResult<&'static str>>> {
    Ok(async {
        tokio::signal::ctrl_c()
            .await
            .map(|_| "ctrl-c")
            .map_err(AppError::from)
    })
}

async fn run(config: CollectorConfig) -> AppResult<()> {
    let signal = shutdown_signal()?;
    let started = Local::now();
    let network = &config.network;
    let mut servers = Vec::new();
    let mut outputs: Vec<PathBuf> = Vec::new();

    for (protocol, port) in [(Protocol::Udp, network.log_udp), (Protocol::Tcp, network.log_tcp)] {
        if port == 0 {
            continue;
        }
        let sink = log_sink(&config.log, started).await?;
        if let Some(path) = sink.file_path() {
            if !outputs.iter().any(|known| known == path) {
                outputs.push(path.to_path_buf());
            }
        }
        let connection = Connection::new(network.ip.as_str(), port);
        info!("starting {} log server on {}", protocol, connection);
        servers.push(Server::bind_with(protocol, &connection, sink, &config.transport).await?);
    }

    for (protocol, port) in [(Protocol::Udp, network.csv_udp), (Protocol::Tcp, network.csv_tcp)] {
        if port == 0 {
            continue;
        }
        let sink = CsvSink::new(&config.csv.dir).await;
        let dir = sink.output_dir().to_path_buf();
        if !outputs.contains(&dir) {
            outputs.push(dir);
        }
        let connection = Connection::new(network.ip.as_str(), port);
        info!("starting {} csv server on {}", protocol, connection);
        servers.push(Server::bind_with(protocol, &connection, sink, &config.transport).await?);
    }

    if servers.is_empty() {
        return Err(AppError::InvalidValue(
            "no server enabled, set at least one of --log-udp, --log-tcp, --csv-udp, --csv-tcp"
                .to_string(),
        ));
    }

    let signal = signal.await?;
    info!("{} received, shutting down {} servers", signal, servers.len());

    for server in servers.iter_mut() {
        if let Err(e) = server.shutdown().await {
            error!("{} at {} did not shut down cleanly: {}", server.name(), server.local_addr(), e);
        }
    }
    for output in outputs {
        println!("Output written to {}", output.display());
    }
    Ok(())
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline: CommandLine = CommandLine::parse();

    let directive = verbosity_directive(commandline.verbose);
    let _guard = match &commandline.diagnostics {
        Some(dir) => Some(setup_tracing(dir, directive)?),
        None => {
            setup_local_tracing(directive)?;
            None
        }
    };

    let config = commandline.load_config()?;

    // startup tokio runtime
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(run(config))
}
