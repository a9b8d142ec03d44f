use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use state_estimator_rs::{
    BlendBackend, CorrectedEstimate, EstimatorConfig, GpsFix, ImuSample, InitialAttitude,
    OdomSample, StateEstimator,
};

/// Replay a recorded sensor session through the estimator.
///
/// The session log is JSON lines, one record per line, tagged by stream:
/// `{"imu": {...}}`, `{"gps": {...}}`, `{"odom": {...}}`. Fused poses are
/// written as JSON lines at inertial rate. Without `--realtime` the log is
/// fed as fast as possible and bursty sections may report queue drops.
#[derive(Parser, Debug)]
#[command(name = "state_estimator")]
struct Args {
    /// Path to the session log (JSON lines)
    log: PathBuf,

    /// Estimator configuration file (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write fused output here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pace the replay at recorded timestamps
    #[arg(long)]
    realtime: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
enum SensorRecord {
    Imu(ImuSample),
    Gps(GpsFix),
    Odom(OdomSample),
}

impl SensorRecord {
    fn timestamp(&self) -> f64 {
        match self {
            SensorRecord::Imu(s) => s.timestamp,
            SensorRecord::Gps(f) => f.timestamp,
            SensorRecord::Odom(s) => s.timestamp,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => EstimatorConfig::from_file(path)?,
        None => EstimatorConfig::default(),
    };
    // A live deployment would wait on an external attitude reference here;
    // a replayed session starts level unless the config pins the pose.
    let initial = if cfg.fixed_initial_pose {
        InitialAttitude::from_config(&cfg)
    } else {
        InitialAttitude::level()
    };

    let (service, handle) = StateEstimator::spawn(cfg, initial, BlendBackend::new())?;

    let reader = BufReader::new(
        File::open(&args.log).with_context(|| format!("opening {}", args.log.display()))?,
    );
    let mut sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };

    let mut imu_count = 0u64;
    let mut gps_count = 0u64;
    let mut odom_count = 0u64;
    let mut fused_count = 0u64;
    let mut corrections = 0u64;
    let mut last_correction: Option<CorrectedEstimate> = None;
    let mut prev_time: Option<f64> = None;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SensorRecord =
            serde_json::from_str(&line).with_context(|| format!("bad record: {line}"))?;

        if args.realtime {
            if let Some(prev) = prev_time {
                let gap = record.timestamp() - prev;
                if gap > 0.0 {
                    std::thread::sleep(Duration::from_secs_f64(gap.min(1.0)));
                }
            }
            prev_time = Some(record.timestamp());
        }

        match record {
            SensorRecord::Imu(sample) => {
                imu_count += 1;
                if let Some(fused) = service.push_imu(sample) {
                    fused_count += 1;
                    writeln!(sink, "{}", serde_json::to_string(&fused.pose)?)?;
                }
            }
            SensorRecord::Gps(fix) => {
                gps_count += 1;
                service.push_gps(fix);
            }
            SensorRecord::Odom(sample) => {
                odom_count += 1;
                service.push_odom(sample);
            }
        }

        while let Ok(correction) = handle.corrections().try_recv() {
            corrections += 1;
            last_correction = Some(correction);
        }
    }

    // Give the smoother a few cycles to drain what is already queued.
    std::thread::sleep(Duration::from_millis(300));
    while let Ok(correction) = handle.corrections().try_recv() {
        corrections += 1;
        last_correction = Some(correction);
    }

    println!("\n=== Replay Stats ===");
    println!("imu samples:  {imu_count}");
    println!("gps fixes:    {gps_count}");
    println!("odom samples: {odom_count}");
    println!("fused poses:  {fused_count}");
    println!("corrections:  {corrections}");
    if let Some(c) = last_correction {
        println!(
            "final state #{}: pos ({:.2}, {:.2}, {:.2}) vel ({:.2}, {:.2}, {:.2})",
            c.index,
            c.position[0],
            c.position[1],
            c.position[2],
            c.velocity[0],
            c.velocity[1],
            c.velocity[2]
        );
        println!(
            "accel bias ({:.4}, {:.4}, {:.4})  gyro bias ({:.5}, {:.5}, {:.5})",
            c.accel_bias[0],
            c.accel_bias[1],
            c.accel_bias[2],
            c.gyro_bias[0],
            c.gyro_bias[1],
            c.gyro_bias[2]
        );
    }

    Ok(())
}
