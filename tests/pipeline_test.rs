use std::path::Path;
use std::time::Duration;

use socketlogger::{
    AppError, AppResult, Client, Connection, LogSink, Server, ServerState, TcpClientTransport,
    TcpServerTransport, TransportConfig, UdpClientTransport, UdpServerTransport,
};
use tokio::net::TcpStream;

async fn file_sink(dir: &Path) -> AppResult<LogSink> {
    LogSink::new().with_file(dir, "collector.log").await
}

fn read_lines(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("collector.log"))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn tcp_flushes_everything_in_order() -> AppResult<()> {
    let dir = tempfile::tempdir()?;
    let config = TransportConfig::default();
    let mut server = Server::bind::<TcpServerTransport, _>(
        &Connection::localhost(0),
        file_sink(dir.path()).await?,
        &config,
    )
    .await?;

    let mut client = Client::connect::<TcpClientTransport>(
        &Connection::localhost(0),
        &Connection::from(server.local_addr()),
        &config,
    )
    .await?;
    for i in 0..250 {
        client.log(format!("line {}", i)).await?;
    }
    client.disconnect().await?;

    // let the reader see the peer close before asking it to stop
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.shutdown().await?;
    assert_eq!(server.state(), ServerState::Closed);

    let lines = read_lines(dir.path());
    assert_eq!(lines.len(), 253);
    assert!(lines[0].ends_with(&format!("TCP Server listening at {}", server.local_addr())));
    assert!(lines[1].ends_with(&format!("Built TCP Client at {}", client.local_addr())));
    for (i, line) in lines[2..252].iter().enumerate() {
        assert!(line.starts_with("| pipeline_test.rs:"), "{}", line);
        assert!(line.ends_with(&format!(" -- line {}", i)), "{}", line);
    }
    assert!(lines[252].contains("Socket disconnected"));
    Ok(())
}

#[tokio::test]
async fn tcp_shutdown_right_after_disconnect_loses_nothing() -> AppResult<()> {
    let dir = tempfile::tempdir()?;
    let config = TransportConfig::default();
    let mut server = Server::bind::<TcpServerTransport, _>(
        &Connection::localhost(0),
        file_sink(dir.path()).await?,
        &config,
    )
    .await?;

    let mut client = Client::connect::<TcpClientTransport>(
        &Connection::localhost(0),
        &Connection::from(server.local_addr()),
        &config,
    )
    .await?;
    for i in 0..250 {
        client.debug(format!("burst {}", i)).await?;
    }
    client.disconnect().await?;
    server.shutdown().await?;

    let lines = read_lines(dir.path());
    assert_eq!(lines.len(), 253);
    for (i, line) in lines[2..252].iter().enumerate() {
        assert!(line.ends_with(&format!(" -- burst {}", i)), "{}", line);
    }
    assert!(lines[252].contains("Socket disconnected"));
    Ok(())
}

#[tokio::test]
async fn udp_flushes_without_waiting_before_shutdown() -> AppResult<()> {
    let dir = tempfile::tempdir()?;
    let config = TransportConfig::default();
    let mut server = Server::bind::<UdpServerTransport, _>(
        &Connection::localhost(0),
        file_sink(dir.path()).await?,
        &config,
    )
    .await?;

    let mut client = Client::connect::<UdpClientTransport>(
        &Connection::localhost(0),
        &Connection::from(server.local_addr()),
        &config,
    )
    .await?;
    for i in 0..100 {
        client.success(format!("datagram {}", i)).await?;
    }
    client.disconnect().await?;
    server.shutdown().await?;

    let lines = read_lines(dir.path());
    assert_eq!(lines.len(), 102);
    assert!(lines[0].contains("UDP Server listening at"));
    assert!(lines.iter().any(|line| line.contains("Built UDP Client at")));
    Ok(())
}

#[tokio::test]
async fn shutdown_returns_with_idle_peer_connected() -> AppResult<()> {
    let dir = tempfile::tempdir()?;
    let mut server = Server::bind::<TcpServerTransport, _>(
        &Connection::localhost(0),
        file_sink(dir.path()).await?,
        &TransportConfig::default(),
    )
    .await?;

    let _idle = TcpStream::connect(server.local_addr()).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), server.shutdown())
        .await
        .expect("shutdown hung on an idle peer")?;
    assert_eq!(read_lines(dir.path()).len(), 1);
    Ok(())
}

#[tokio::test]
async fn peer_waiting_in_accept_backlog_is_drained() -> AppResult<()> {
    use tokio::io::AsyncWriteExt;

    let dir = tempfile::tempdir()?;
    let mut server = Server::bind::<TcpServerTransport, _>(
        &Connection::localhost(0),
        file_sink(dir.path()).await?,
        &TransportConfig::default(),
    )
    .await?;

    let mut raw = TcpStream::connect(server.local_addr()).await?;
    raw.write_all(br#"{"caller":"raw:1","level":1,"message":"written before shutdown"}"#)
        .await?;
    raw.flush().await?;
    server.shutdown().await?;

    let lines = read_lines(dir.path());
    assert!(
        lines.iter().any(|line| line == "| raw:1 -- written before shutdown"),
        "{:?}",
        lines
    );
    Ok(())
}

#[tokio::test]
async fn binding_a_busy_port_fails() -> AppResult<()> {
    let dir = tempfile::tempdir()?;
    let config = TransportConfig::default();

    let mut udp = Server::bind::<UdpServerTransport, _>(
        &Connection::localhost(0),
        file_sink(dir.path()).await?,
        &config,
    )
    .await?;
    let again = Server::bind::<UdpServerTransport, _>(
        &Connection::from(udp.local_addr()),
        LogSink::new(),
        &config,
    )
    .await;
    assert!(matches!(again, Err(AppError::Bind(_))));

    let mut tcp = Server::bind::<TcpServerTransport, _>(
        &Connection::localhost(0),
        LogSink::new(),
        &config,
    )
    .await?;
    let again = Server::bind::<TcpServerTransport, _>(
        &Connection::from(tcp.local_addr()),
        LogSink::new(),
        &config,
    )
    .await;
    assert!(matches!(again, Err(AppError::Bind(_))));

    udp.shutdown().await?;
    tcp.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn udp_client_needs_no_server() -> AppResult<()> {
    let probe = std::net::UdpSocket::bind("127.0.0.1:0")?;
    let remote = Connection::from(probe.local_addr()?);
    drop(probe);

    let mut client = Client::connect::<UdpClientTransport>(
        &Connection::localhost(0),
        &remote,
        &TransportConfig::default(),
    )
    .await?;
    client.log("into the void").await?;
    client.append_row("void.csv", ["a", "b"]).await?;
    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn tcp_dial_without_listener_fails() -> AppResult<()> {
    let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
    let remote = Connection::from(probe.local_addr()?);
    drop(probe);

    let result = Client::connect::<TcpClientTransport>(
        &Connection::localhost(0),
        &remote,
        &TransportConfig::default(),
    )
    .await;
    assert!(matches!(result, Err(AppError::Dial(_))));
    Ok(())
}

#[tokio::test]
async fn garbage_on_tcp_is_reported() -> AppResult<()> {
    use tokio::io::AsyncWriteExt;

    let dir = tempfile::tempdir()?;
    let mut server = Server::bind::<TcpServerTransport, _>(
        &Connection::localhost(0),
        file_sink(dir.path()).await?,
        &TransportConfig::default(),
    )
    .await?;

    let mut raw = TcpStream::connect(server.local_addr()).await?;
    raw.write_all(br#"{"caller":"raw:1","level":1,"message":"ok"} ]["#)
        .await?;
    raw.flush().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.shutdown().await?;

    let lines = read_lines(dir.path());
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], "| raw:1 -- ok");
    assert!(lines[2].contains("ERROR!!"));
    Ok(())
}
