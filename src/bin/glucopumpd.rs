use clap::{App, Arg};
use glucopump::agent::PumpAgent;
use glucopump::clock::SystemClock;
use glucopump::config::ControlConfig;
use glucopump::events::{Notification, Tracer};
use glucopump::link::{FileActuatorLink, FileSensorLink};
use glucopump::protocol::{self, CommandResponse};
use glucopump::store::JsonFileStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const DEFAULT_PORT: &str = "8080";
const DEFAULT_STATE_FILE: &str = "InsulinPump.json";
const DEFAULT_SENSOR_PIPE: &str = "pipe_to_pump";
const DEFAULT_ACTUATOR_PIPE: &str = "pipe_to_body";
const NOTIFICATION_BROADCAST_BUFFER_SIZE: usize = 256;
const SHUTDOWN_POLL_MS: u64 = 250;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("glucopumpd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Closed-loop insulin/glucagon pump daemon")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON control configuration; built-in defaults when absent")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("state-file")
                .long("state-file")
                .value_name("FILE")
                .help("Where the cumulative operation time is kept")
                .takes_value(true)
                .default_value(DEFAULT_STATE_FILE),
        )
        .arg(
            Arg::with_name("sensor-pipe")
                .long("sensor-pipe")
                .value_name("PATH")
                .help("File the body writes glucose readings to")
                .takes_value(true)
                .default_value(DEFAULT_SENSOR_PIPE),
        )
        .arg(
            Arg::with_name("actuator-pipe")
                .long("actuator-pipe")
                .value_name("PATH")
                .help("File the pump writes injected units to")
                .takes_value(true)
                .default_value(DEFAULT_ACTUATOR_PIPE),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port of the control server")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => ControlConfig::load(path)?,
        None => ControlConfig::default(),
    };
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let state_file = matches.value_of("state-file").unwrap_or(DEFAULT_STATE_FILE);
    let sensor_pipe = matches.value_of("sensor-pipe").unwrap_or(DEFAULT_SENSOR_PIPE);
    let actuator_pipe = matches.value_of("actuator-pipe").unwrap_or(DEFAULT_ACTUATOR_PIPE);

    let (notification_tx, _) = broadcast::channel::<Notification>(NOTIFICATION_BROADCAST_BUFFER_SIZE);
    let tracer = Tracer::new(Arc::new(notification_tx.clone()));

    let agent = PumpAgent::build(
        config,
        Box::new(FileSensorLink::new(sensor_pipe)),
        Box::new(FileActuatorLink::new(actuator_pipe)),
        Box::new(JsonFileStore::new(state_file)),
        Arc::new(SystemClock::new()),
        tracer,
    )?;
    let tasks = agent.spawn().await;

    let tcp_agent = agent.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, tcp_agent, notification_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = time::interval(Duration::from_millis(SHUTDOWN_POLL_MS));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupt received");
                break;
            }
            _ = poll.tick() => {
                if !agent.is_running() {
                    break;
                }
            }
        }
    }

    agent.shutdown().await;
    tasks.join().await;
    tcp_server.abort();
    info!("Pump daemon stopped");

    Ok(())
}

async fn start_tcp_server(
    port: u16,
    agent: PumpAgent,
    notification_tx: broadcast::Sender<Notification>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Control server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Client connected: {}", addr);
                let client_agent = agent.clone();
                let client_rx = notification_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_agent, client_rx).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    agent: PumpAgent,
    mut notification_rx: broadcast::Receiver<Notification>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let notification_writer = Arc::clone(&writer);
    let notification_task = tokio::spawn(async move {
        loop {
            let notification = match notification_rx.recv().await {
                Ok(notification) => notification,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client lagging, {} notifications dropped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let line = match serde_json::to_string(&notification) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to encode notification: {}", e);
                    continue;
                }
            };
            if let Err(e) = write_line(&notification_writer, &line).await {
                warn!("Failed to send notification: {}", e);
                break;
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match protocol::parse_command(trimmed) {
                    Ok(command) => {
                        info!("Received command: {:?}", command);
                        agent.execute_command(command).await
                    }
                    Err(e) => {
                        error!("Failed to parse command: {}", e);
                        CommandResponse::error(0, &format!("Invalid command format: {}", e))
                    }
                };

                let response_json = match protocol::serialize_response(&response) {
                    Ok(json) => json,
                    Err(e) => {
                        let fallback = CommandResponse::error(response.id, &e.to_string());
                        serde_json::to_string(&fallback)?
                    }
                };
                write_line(&writer, &response_json).await?;
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    notification_task.abort();
    Ok(())
}

async fn write_line(writer: &Mutex<OwnedWriteHalf>, line: &str) -> std::io::Result<()> {
    let mut guard = writer.lock().await;
    guard.write_all(line.as_bytes()).await?;
    guard.write_all(b"\n").await
}
