use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use glucopump::events::{Notification, Severity};
use glucopump::protocol::{CommandResponse, CommandType, ControlCommand, PumpStatus, ResponseStatus};
use glucopump::HormoneKind;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const COMMAND_TIMEOUT_SECS: u64 = 5;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("pumpctl")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Control client for the glucopump daemon")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Daemon host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Daemon port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("Check that the daemon answers"))
        .subcommand(SubCommand::with_name("status").about("Show glucose, reservoirs, battery and operation time"))
        .subcommand(
            SubCommand::with_name("refill")
                .about("Mark a reservoir as refilled")
                .arg(
                    Arg::with_name("hormone")
                        .required(true)
                        .possible_values(&["insulin", "glucagon"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("recharge")
                .about("Set the battery charge after charging")
                .arg(Arg::with_name("level").required(true).help("New charge in percent")),
        )
        .subcommand(pair_command("targets", "Set the lower and upper glucose targets", "lower", "upper"))
        .subcommand(pair_command("limits", "Set the lower and upper dosing limits", "lower", "upper"))
        .subcommand(pair_command("alarms", "Set the lower and upper glucose alarms", "lower", "upper"))
        .subcommand(
            SubCommand::with_name("hsf")
                .about("Set the hormone sensitivity factor")
                .arg(Arg::with_name("value").required(true)),
        )
        .subcommand(pair_command("battery-thresholds", "Set battery warning and critical levels", "warn", "crit"))
        .subcommand(pair_command(
            "reservoir-thresholds",
            "Set reservoir warning and critical levels",
            "warn",
            "crit",
        ))
        .subcommand(
            SubCommand::with_name("max-hours")
                .about("Set the maximum operation time before inspection")
                .arg(Arg::with_name("hours").required(true)),
        )
        .subcommand(SubCommand::with_name("reset").about("Clear a pump fault"))
        .subcommand(SubCommand::with_name("shutdown").about("Stop the daemon"))
        .subcommand(SubCommand::with_name("watch").about("Stream pump notifications"))
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");

    let command_type = match matches.subcommand() {
        ("watch", _) => return watch(host, port, format).await,
        ("ping", _) => CommandType::Ping,
        ("status", _) => CommandType::Status,
        ("refill", Some(sub)) => CommandType::Refill {
            hormone: match sub.value_of("hormone") {
                Some("glucagon") => HormoneKind::Glucagon,
                _ => HormoneKind::Insulin,
            },
        },
        ("recharge", Some(sub)) => CommandType::RechargeBattery {
            level: parse_arg(sub, "level")?,
        },
        ("targets", Some(sub)) => CommandType::SetTargets {
            lower: parse_arg(sub, "lower")?,
            upper: parse_arg(sub, "upper")?,
        },
        ("limits", Some(sub)) => CommandType::SetLimits {
            lower: parse_arg(sub, "lower")?,
            upper: parse_arg(sub, "upper")?,
        },
        ("alarms", Some(sub)) => CommandType::SetAlarms {
            lower: parse_arg(sub, "lower")?,
            upper: parse_arg(sub, "upper")?,
        },
        ("hsf", Some(sub)) => CommandType::SetSensitivity {
            hsf: parse_arg(sub, "value")?,
        },
        ("battery-thresholds", Some(sub)) => CommandType::SetBatteryThresholds {
            warn: parse_arg(sub, "warn")?,
            crit: parse_arg(sub, "crit")?,
        },
        ("reservoir-thresholds", Some(sub)) => CommandType::SetReservoirThresholds {
            warn: parse_arg(sub, "warn")?,
            crit: parse_arg(sub, "crit")?,
        },
        ("max-hours", Some(sub)) => CommandType::SetMaxOperationHours {
            hours: parse_arg(sub, "hours")?,
        },
        ("reset", _) => CommandType::ResetPump,
        ("shutdown", _) => CommandType::Shutdown,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            return Ok(());
        }
    };

    let command = ControlCommand {
        id: std::process::id(),
        command_type,
    };
    let response = send_command(host, port, &command).await?;
    print_response(&command, &response, format)?;
    Ok(())
}

fn pair_command<'a>(name: &'a str, about: &'a str, first: &'a str, second: &'a str) -> App<'a, 'a> {
    SubCommand::with_name(name)
        .about(about)
        .arg(Arg::with_name(first).required(true).index(1))
        .arg(Arg::with_name(second).required(true).index(2))
}

fn parse_arg<T>(matches: &ArgMatches<'_>, name: &str) -> CliResult<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + 'static,
{
    let raw = matches
        .value_of(name)
        .ok_or_else(|| format!("missing argument <{}>", name))?;
    Ok(raw.parse::<T>()?)
}

async fn send_command(host: &str, port: u16, command: &ControlCommand) -> CliResult<CommandResponse> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to pump daemon at {}", "x".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("  Start it with: {}", "glucopumpd".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let request = serde_json::to_string(command)?;
    let exchange = async {
        let (reader, mut writer) = stream.into_split();
        writer.write_all(request.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        // Notifications share the connection; skip them until our reply shows up.
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if let Ok(response) = serde_json::from_str::<CommandResponse>(&line) {
                if response.id == command.id || response.id == 0 {
                    return Ok(response);
                }
            }
        }
        Err::<CommandResponse, Box<dyn std::error::Error>>("daemon closed the connection".into())
    };

    match tokio::time::timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), exchange).await {
        Ok(result) => result,
        Err(_) => {
            eprintln!("{} Command timed out after {} seconds", "!".yellow(), COMMAND_TIMEOUT_SECS);
            Err("command timeout".into())
        }
    }
}

fn print_response(command: &ControlCommand, response: &CommandResponse, format: &str) -> CliResult<()> {
    if format == "json" {
        println!("{}", serde_json::to_string(response)?);
        return Ok(());
    }

    match response.status {
        ResponseStatus::Success => {
            if let Some(status) = &response.pump {
                print_status(status);
            } else {
                let detail = response.message.as_deref().unwrap_or("done");
                println!("{} {:?}: {}", "ok".green(), command.command_type, detail.bright_green());
            }
        }
        ResponseStatus::NegativeAck => {
            let reason = response.message.as_deref().unwrap_or("command rejected");
            println!("{} {:?} rejected: {}", "x".red(), command.command_type, reason.bright_red());
        }
        ResponseStatus::Error => {
            let reason = response.message.as_deref().unwrap_or("unknown error");
            println!("{} {}", "error:".red().bold(), reason);
        }
    }
    Ok(())
}

fn print_status(status: &PumpStatus) {
    let glucose = status
        .current_glucose
        .map_or_else(|| "--".to_string(), |g| format!("{} mg/dL", g));
    let hormone = status
        .active_hormone
        .map_or_else(|| "none".to_string(), |h| h.to_string());

    println!("{}", "Pump Status".bright_blue().bold());
    println!("{:<18} {:?}", "Phase:".bright_white(), status.phase);
    println!("{:<18} {}", "Glucose:".bright_white(), glucose);
    println!("{:<18} {}", "Last hormone:".bright_white(), hormone);
    println!("{:<18} {}", "Delay:".bright_white(), status.delay);
    println!("{:<18} {}", "Battery:".bright_white(), level_colored(status.battery_level));
    println!("{:<18} {}", "Insulin:".bright_white(), level_colored(status.insulin_level));
    println!("{:<18} {}", "Glucagon:".bright_white(), level_colored(status.glucagon_level));
    println!("{:<18} {}", "Cycles:".bright_white(), status.cycles_completed);
    println!(
        "{:<18} {}h",
        "Operation time:".bright_white(),
        status.operation_time_ms / 3_600_000
    );
    println!("{:<18} {:?}", "Scheduler:".bright_white(), status.scheduler_status);
}

fn level_colored(level: u8) -> ColoredString {
    let text = format!("{}%", level);
    match level {
        0..=9 => text.bright_red(),
        10..=19 => text.yellow(),
        _ => text.green(),
    }
}

async fn watch(host: &str, port: u16, format: &str) -> CliResult<()> {
    let stream = TcpStream::connect((host, port)).await?;
    let mut lines = BufReader::new(stream).lines();

    while let Some(line) = lines.next_line().await? {
        if format == "json" {
            println!("{}", line);
            continue;
        }
        let Ok(notification) = serde_json::from_str::<Notification>(&line) else {
            continue;
        };
        match notification {
            Notification::Glucose { glucose, hormone, units } => match hormone {
                Some(hormone) => println!("{:>4} mg/dL  {} {} units", glucose, hormone, units),
                None => println!("{:>4} mg/dL", glucose),
            },
            Notification::BatteryLevel { level } => {
                println!("{} {}", "battery".dimmed(), level_colored(level))
            }
            Notification::ReservoirLevel { hormone, level } => {
                println!("{} {}", hormone.to_string().dimmed(), level_colored(level))
            }
            Notification::OperationTime { hours } => println!("{} {}h", "operation time".dimmed(), hours),
            Notification::Log { severity, message } => match severity {
                Severity::Status => println!("{}", message),
                Severity::Warning => println!("{} {}", "WARNING".yellow().bold(), message.yellow()),
                Severity::Critical => println!("{} {}", "CRITICAL".red().bold(), message.bright_red()),
            },
        }
    }
    Ok(())
}
