//! Bench simulator entry point: three concurrent TCP servers standing in
//! for the RS485 servo bus, the IMU stream, and the GNSS stream, so
//! `groundstation-core` can be exercised end to end without physical
//! hardware (`spec.md` §6, bench-simulator wire compatibility).

mod axis_sim;
mod bus_sim;
mod config;
mod gnss_sim;
mod imu_sim;
mod scenarios;

use clap::Parser;
use tracing::{error, info};

use axis_sim::SimAxis;
use bus_sim::AxisBank;
use config::BenchConfig;
use servo_proto::AxisTag;

#[derive(Parser, Debug)]
#[command(name = "servo-sim", about = "Bench simulator for the servo bus, IMU, and GNSS wire formats")]
struct Args {
    /// Config file path.
    #[arg(short, long, default_value = "servo-sim.toml")]
    config: String,
    /// Inject the stall-fault preset against the named axis on startup.
    #[arg(long, value_enum)]
    stall: Option<PresetAxis>,
    /// Inject the limit-switch-trip preset against the named axis on startup.
    #[arg(long, value_enum)]
    limit_trip: Option<PresetAxis>,
    /// Inject the silent-timeout preset against the named axis on startup.
    #[arg(long, value_enum)]
    timeout: Option<PresetAxis>,
    /// Inject the GNSS-dropout preset on startup.
    #[arg(long)]
    gnss_dropout: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PresetAxis {
    Az,
    El,
    Cl,
}

impl From<PresetAxis> for AxisTag {
    fn from(p: PresetAxis) -> Self {
        match p {
            PresetAxis::Az => AxisTag::Az,
            PresetAxis::El => AxisTag::El,
            PresetAxis::Cl => AxisTag::Cl,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "servo_sim=info".into()),
        )
        .init();

    let args = Args::parse();

    let raw = match std::fs::read_to_string(&args.config) {
        Ok(raw) => raw,
        Err(e) => {
            error!("failed to read config file {}: {e}", args.config);
            std::process::exit(1);
        }
    };
    let mut cfg = match BenchConfig::from_toml(&raw) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to parse config: {e}");
            std::process::exit(1);
        }
    };

    apply_cli_presets(&args, &mut cfg);

    info!(axes = cfg.axes.len(), tick_rate_hz = cfg.tick_rate_hz, "servo bench simulator starting");

    let axes: Vec<SimAxis> = cfg.axes.iter().map(SimAxis::new).collect();
    let bank = AxisBank::new(axes, cfg.scenarios.clone());

    let physics_bank = bank.clone();
    let tick_rate_hz = cfg.tick_rate_hz;
    tokio::spawn(async move {
        physics_bank.run_physics(tick_rate_hz).await;
    });

    let bus_addr = cfg.bus_listen_addr.clone();
    let bus_bank = bank.clone();
    let bus_task = tokio::spawn(async move {
        if let Err(e) = bus_sim::serve(&bus_addr, bus_bank).await {
            error!("bus simulator stopped: {e}");
        }
    });

    let imu_task = cfg.imu_listen_addr.clone().map(|addr| {
        tokio::spawn(async move {
            if let Err(e) = imu_sim::serve(&addr).await {
                error!("IMU simulator stopped: {e}");
            }
        })
    });

    let gnss_task = cfg.gnss_listen_addr.clone().map(|addr| {
        let scenarios = cfg.scenarios.clone();
        tokio::spawn(async move {
            if let Err(e) = gnss_sim::serve(&addr, scenarios).await {
                error!("GNSS simulator stopped: {e}");
            }
        })
    });

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("ctrl-c received, shutting down");
    }

    bus_task.abort();
    if let Some(t) = imu_task {
        t.abort();
    }
    if let Some(t) = gnss_task {
        t.abort();
    }
}

fn apply_cli_presets(args: &Args, cfg: &mut BenchConfig) {
    if let Some(axis) = args.stall {
        cfg.scenarios = scenarios::preset_stall(axis.into());
    }
    if let Some(axis) = args.limit_trip {
        cfg.scenarios = scenarios::preset_limit_trip(axis.into());
    }
    if let Some(axis) = args.timeout {
        cfg.scenarios = scenarios::preset_timeout(axis.into());
    }
    if args.gnss_dropout {
        cfg.scenarios = scenarios::preset_gnss_dropout();
    }
}
