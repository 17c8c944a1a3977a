use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shmq::probe::{now_us, Probe, SequenceTracker};
use shmq::reader;
use shmq::QueueKind;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(clap::Parser)]
#[clap(about = "Drains a shared memory queue and checks per-producer ordering")]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmq-consumer.toml")]
    config: String,
    /// Messages to receive before exiting; 0 receives until interrupted.
    #[clap(short = 'n', long = "count", default_value = "0")]
    count: u64,
    /// Overrides the queue kind from the config file.
    #[clap(short = 'k', long = "kind")]
    kind: Option<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts: Opts = Opts::parse();
    let mut cfg: reader::ReaderConfig = confy::load_path(&opts.config)?;
    if let Some(kind) = &opts.kind {
        cfg.shmem.kind = kind.parse::<QueueKind>()?;
    }

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&term))?;

    let mut reader = reader::MessageReader::new(&cfg)?;
    info!(
        kind = %reader.kind(),
        queue_size = reader.queue_size(),
        owner = cfg.ownership,
        "consumer started"
    );
    let result = run(&mut reader, &opts, &term);
    reader.close();
    result
}

struct Interval {
    started: Instant,
    received: u64,
    max_latency_us: u64,
}

impl Interval {
    fn new() -> Interval {
        Interval {
            started: Instant::now(),
            received: 0,
            max_latency_us: 0,
        }
    }
}

fn run(reader: &mut reader::MessageReader, opts: &Opts, term: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let mut tracker = SequenceTracker::new();
    let mut gaps = 0u64;
    let mut malformed = 0u64;
    let mut max_latency_us = 0u64;
    let mut interval = Interval::new();
    let mut buf = vec![0u8; reader.max_message_size()];

    while opts.count == 0 || tracker.observed() + malformed < opts.count {
        if interval.started.elapsed() >= REPORT_INTERVAL {
            report(&interval);
            interval = Interval::new();
        }
        let len = match reader.dequeue(&mut buf)? {
            Some(len) => len,
            None => {
                if term.load(Ordering::Relaxed) {
                    warn!(received = tracker.observed(), "interrupted");
                    break;
                }
                std::hint::spin_loop();
                continue;
            }
        };

        let probe = match Probe::decode(&buf[..len]) {
            Some(probe) => probe,
            None => {
                malformed += 1;
                warn!(len, "message is not a probe");
                continue;
            }
        };
        let latency_us = probe.latency_us(now_us());
        interval.max_latency_us = interval.max_latency_us.max(latency_us);
        max_latency_us = max_latency_us.max(latency_us);
        interval.received += 1;
        if let Err(gap) = tracker.observe(&probe) {
            gaps += 1;
            warn!(%gap, "sequence gap");
        }
    }
    report(&interval);

    let duration = start.elapsed();
    let received = tracker.observed();
    let iops = (received as f64) / duration.as_secs_f64().max(f64::EPSILON);
    println!(
        "\n{:#?}K messages read/s. Total: {} messages from {} producers, max latency {}us, time: {:#?}",
        (iops / 1000f64) as u64,
        received,
        tracker.producers(),
        max_latency_us,
        duration
    );
    if gaps > 0 || malformed > 0 {
        return Err(format!("{} sequence gaps, {} malformed messages", gaps, malformed).into());
    }
    Ok(())
}

fn report(interval: &Interval) {
    if interval.received == 0 {
        return;
    }
    let secs = interval.started.elapsed().as_secs_f64().max(f64::EPSILON);
    eprintln!(
        "{}K messages read/s, max latency {}us",
        ((interval.received as f64) / secs / 1000f64) as u64,
        interval.max_latency_us
    );
}
