//! Beacon bridge simulator - scripted raw signals for the gateway
//!
//! Plays the role of the radio bridge: publishes raw region signals and
//! ranging cycles on the raw topic, and prints what the gateway sends back
//! (watch control messages, stable events, notifications).
//!
//! Scenarios:
//! - flapping: enter/exit chatter at a region boundary that should settle
//! - nearest: two beacons trading places as the strongest signal
//! - walkthrough: enter, range for a while, leave
//!
//! Usage:
//!   cargo run --bin beacon-sim -- --scenario flapping --region lobby

use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_UUID: &str = "e2c56db5-dffb-48d2-b060-d0f5a71096e0";

#[derive(Parser, Debug)]
#[command(name = "beacon-sim")]
#[command(about = "Scripted radio bridge for local gateway testing")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Raw topic the gateway ingests from
    #[arg(long, default_value = "beacons/raw")]
    raw_topic: String,

    /// Prefix of the topics to echo (control, events, notifications)
    #[arg(long, default_value = "beacons/#")]
    watch_topic: String,

    /// Scenario to run (flapping, nearest, walkthrough)
    #[arg(long, default_value = "flapping")]
    scenario: String,

    /// Region identifier used in raw messages
    #[arg(long, default_value = "lobby")]
    region: String,

    /// Proximity UUID of the simulated beacons
    #[arg(long, default_value = DEFAULT_UUID)]
    uuid: String,

    /// Keep listening this long after the scenario ends (ms)
    #[arg(long, default_value = "6000")]
    linger_ms: u64,
}

#[derive(Debug, Clone)]
struct SimBeacon {
    major: u16,
    minor: u16,
    rssi: i32,
    proximity: &'static str,
    accuracy: f64,
}

impl SimBeacon {
    fn new(major: u16, minor: u16, rssi: i32, proximity: &'static str, accuracy: f64) -> Self {
        Self { major, minor, rssi, proximity, accuracy }
    }
}

#[derive(Debug, Clone)]
enum ScenarioStep {
    Enter,
    Exit,
    Range(Vec<SimBeacon>),
    Fail(i32),
    Wait(u64),
}

#[derive(Debug)]
struct Scenario {
    name: &'static str,
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    fn by_name(name: &str) -> Option<Self> {
        match name {
            "flapping" => Some(Self::flapping()),
            "nearest" => Some(Self::nearest()),
            "walkthrough" => Some(Self::walkthrough()),
            _ => None,
        }
    }

    /// Boundary chatter; with a 5s interval only the first enter and the
    /// final settled state should come out
    fn flapping() -> Self {
        Self {
            name: "flapping",
            steps: vec![
                ScenarioStep::Enter,
                ScenarioStep::Wait(500),
                ScenarioStep::Exit,
                ScenarioStep::Wait(300),
                ScenarioStep::Enter,
                ScenarioStep::Wait(400),
                ScenarioStep::Exit,
                ScenarioStep::Wait(600),
                ScenarioStep::Enter,
                ScenarioStep::Wait(7000),
                ScenarioStep::Exit,
            ],
        }
    }

    /// Two beacons trade places; equal cycles must not repeat the change
    fn nearest() -> Self {
        let a_close = SimBeacon::new(1, 1, -55, "immediate", 0.3);
        let b_far = SimBeacon::new(1, 2, -80, "far", 6.0);
        let a_far = SimBeacon::new(1, 1, -82, "far", 7.5);
        let b_close = SimBeacon::new(1, 2, -58, "near", 0.9);

        Self {
            name: "nearest",
            steps: vec![
                ScenarioStep::Enter,
                ScenarioStep::Range(vec![a_close.clone(), b_far.clone()]),
                ScenarioStep::Wait(1000),
                ScenarioStep::Range(vec![a_close.clone(), b_far.clone()]),
                ScenarioStep::Wait(1000),
                ScenarioStep::Range(vec![a_far, b_close.clone()]),
                ScenarioStep::Wait(1000),
                ScenarioStep::Range(vec![b_close]),
                ScenarioStep::Wait(1000),
                ScenarioStep::Range(vec![]),
                ScenarioStep::Wait(1000),
                ScenarioStep::Range(vec![a_close, b_far]),
            ],
        }
    }

    fn walkthrough() -> Self {
        let beacon = SimBeacon::new(4, 17, -64, "near", 1.4);
        Self {
            name: "walkthrough",
            steps: vec![
                ScenarioStep::Enter,
                ScenarioStep::Wait(200),
                ScenarioStep::Range(vec![beacon.clone()]),
                ScenarioStep::Wait(1000),
                ScenarioStep::Range(vec![beacon]),
                ScenarioStep::Wait(1000),
                ScenarioStep::Fail(-1002),
                ScenarioStep::Wait(6000),
                ScenarioStep::Exit,
            ],
        }
    }
}

fn beacon_record(uuid: &str, region: &str, beacon: &SimBeacon) -> Value {
    json!({
        "uuid": uuid,
        "identifier": region,
        "major": beacon.major,
        "minor": beacon.minor,
        "rssi": beacon.rssi,
        "proximity": beacon.proximity,
        "accuracy": beacon.accuracy,
    })
}

fn build_raw_message(step: &ScenarioStep, region: &str, uuid: &str) -> Option<Value> {
    match step {
        ScenarioStep::Enter => {
            Some(json!({"type": "region", "identifier": region, "state": "enter"}))
        }
        ScenarioStep::Exit => Some(json!({"type": "region", "identifier": region, "state": "exit"})),
        ScenarioStep::Range(beacons) => Some(json!({
            "type": "ranging",
            "identifier": region,
            "beacons": beacons.iter().map(|b| beacon_record(uuid, region, b)).collect::<Vec<_>>(),
        })),
        ScenarioStep::Fail(code) => {
            Some(json!({"type": "failure", "identifier": region, "code": code}))
        }
        ScenarioStep::Wait(_) => None,
    }
}

fn log_line(direction: &str, text: &str) {
    println!("{} {direction} {text}", Utc::now().format("%H:%M:%S%.3f"));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let Some(scenario) = Scenario::by_name(&args.scenario) else {
        anyhow::bail!("unknown scenario '{}' (flapping, nearest, walkthrough)", args.scenario);
    };

    let mut mqtt_options =
        MqttOptions::new(format!("beacon-sim-{}", std::process::id()), &args.mqtt_host, args.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);
    client.subscribe(args.watch_topic.as_str(), QoS::AtMostOnce).await?;

    let raw_topic = args.raw_topic.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => log_line("--", "connected"),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic == raw_topic {
                        continue;
                    }
                    let payload = String::from_utf8_lossy(&publish.payload);
                    log_line("<-", &format!("{}: {}", publish.topic, payload));
                }
                Ok(_) => {}
                Err(e) => {
                    log_line("!!", &format!("mqtt error: {e}"));
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    // Give the connection a moment so early echoes are not missed
    tokio::time::sleep(Duration::from_millis(300)).await;
    log_line("--", &format!("scenario '{}' on region '{}'", scenario.name, args.region));

    for step in &scenario.steps {
        if let ScenarioStep::Wait(ms) = step {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            continue;
        }
        if let Some(message) = build_raw_message(step, &args.region, &args.uuid) {
            let text = message.to_string();
            client.publish(args.raw_topic.as_str(), QoS::AtMostOnce, false, text.clone()).await?;
            log_line("->", &text);
        }
    }

    log_line("--", &format!("scenario '{}' complete, listening {}ms", scenario.name, args.linger_ms));
    tokio::time::sleep(Duration::from_millis(args.linger_ms)).await;
    client.disconnect().await?;
    Ok(())
}
