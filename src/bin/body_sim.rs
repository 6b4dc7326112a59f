use clap::{App, Arg};
use glucopump::link::PipeFile;
use glucopump::protocol::{self, Injection, MAX_GLUCOSE_READING};
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

const DEFAULT_SENSOR_PIPE: &str = "pipe_to_pump";
const DEFAULT_ACTUATOR_PIPE: &str = "pipe_to_body";

/// Blood glucose curve reacting to injected units.
///
/// Every step the level is multiplied (rising) or divided (falling) by
/// `factor`. One pending insulin unit is consumed per step and lowers the
/// level by `insulin_effect`; glucagon works the same way upwards. With both
/// pending, one unit of each is consumed and their effects are netted.
#[derive(Debug, Clone, PartialEq)]
struct Body {
    glucose: f64,
    factor: f64,
    rising: bool,
    insulin_effect: f64,
    glucagon_effect: f64,
    pending: Injection,
}

impl Body {
    fn new(glucose: f64, factor: f64, rising: bool) -> Self {
        Self {
            glucose,
            factor,
            rising,
            insulin_effect: 5.0,
            glucagon_effect: 5.0,
            pending: Injection::default(),
        }
    }

    fn absorb(&mut self, injection: Injection) {
        self.pending.insulin = self.pending.insulin.saturating_add(injection.insulin);
        self.pending.glucagon = self.pending.glucagon.saturating_add(injection.glucagon);
    }

    fn step(&mut self) {
        if self.rising {
            self.glucose *= self.factor;
        } else {
            self.glucose /= self.factor;
        }

        match (self.pending.insulin > 0, self.pending.glucagon > 0) {
            (true, false) => {
                self.glucose -= self.insulin_effect;
                self.pending.insulin -= 1;
            }
            (false, true) => {
                self.glucose += self.glucagon_effect;
                self.pending.glucagon -= 1;
            }
            (true, true) => {
                self.glucose += self.glucagon_effect - self.insulin_effect;
                self.pending.insulin -= 1;
                self.pending.glucagon -= 1;
            }
            (false, false) => {}
        }

        self.glucose = self.glucose.clamp(0.0, f64::from(MAX_GLUCOSE_READING));
    }

    fn reading(&self) -> u16 {
        self.glucose.round() as u16
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("body-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Simulated body feeding glucose readings to the pump")
        .arg(
            Arg::with_name("start")
                .long("start")
                .value_name("MG_DL")
                .help("Initial blood glucose")
                .takes_value(true)
                .default_value("110"),
        )
        .arg(
            Arg::with_name("factor")
                .long("factor")
                .value_name("FACTOR")
                .help("Per-step growth factor of the curve")
                .takes_value(true)
                .default_value("1.03"),
        )
        .arg(
            Arg::with_name("falling")
                .long("falling")
                .help("Let glucose fall instead of rise"),
        )
        .arg(
            Arg::with_name("interval-ms")
                .long("interval-ms")
                .value_name("MS")
                .help("Time between two readings")
                .takes_value(true)
                .default_value("1000"),
        )
        .arg(
            Arg::with_name("steps")
                .long("steps")
                .value_name("N")
                .help("Stop after N readings; runs forever when absent")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("sensor-pipe")
                .long("sensor-pipe")
                .value_name("PATH")
                .takes_value(true)
                .default_value(DEFAULT_SENSOR_PIPE),
        )
        .arg(
            Arg::with_name("actuator-pipe")
                .long("actuator-pipe")
                .value_name("PATH")
                .takes_value(true)
                .default_value(DEFAULT_ACTUATOR_PIPE),
        )
        .get_matches();

    let start = matches.value_of("start").unwrap_or("110").parse::<f64>()?;
    let factor = matches.value_of("factor").unwrap_or("1.03").parse::<f64>()?;
    if factor < 1.0 {
        return Err("factor must be at least 1.0".into());
    }
    let interval_ms = matches.value_of("interval-ms").unwrap_or("1000").parse::<u64>()?;
    let steps = matches.value_of("steps").map(str::parse::<u64>).transpose()?;
    let to_pump = PipeFile::new(matches.value_of("sensor-pipe").unwrap_or(DEFAULT_SENSOR_PIPE));
    let from_pump = PipeFile::new(matches.value_of("actuator-pipe").unwrap_or(DEFAULT_ACTUATOR_PIPE));

    let mut body = Body::new(start, factor, !matches.is_present("falling"));
    info!(start, factor, rising = body.rising, "Body simulation started");

    let mut interval = time::interval(Duration::from_millis(interval_ms));
    let mut step = 0u64;
    while steps.map_or(true, |limit| step < limit) {
        interval.tick().await;
        step += 1;

        if let Some(bytes) = from_pump.take()? {
            match protocol::parse_actuator_message(&bytes) {
                Ok(injection) => {
                    debug!(?injection, "Dose received");
                    body.absorb(injection);
                }
                Err(e) => warn!("Ignoring malformed dose message: {}", e),
            }
        }

        body.step();
        let message = protocol::encode_glucose_message(body.reading())?;
        to_pump.put(message.as_bytes())?;
        info!(glucose = body.reading(), pending = ?body.pending, "Reading published");
    }

    Ok(())
}
