//! Command-line front end for the BRDF goniometer.
//!
//! Subcommands:
//! - `scan`: run a scan on the simulated rig and print or save the result
//! - `poses`: print the arm poses a recipe would command

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use brdf_gonio::config::{self, GonioConfig};
use brdf_gonio::devices::mock::SimulatedRig;
use brdf_gonio::geometry::{point_to_arm_pose, ArmRole};
use brdf_gonio::logging::{self, LogFormat};
use brdf_gonio::motion::MotionPolicy;
use brdf_gonio::{Clock, Recipe, RecipeBuilder, Sequencer, SimulatedClock, SystemClock};

/// BRDF goniometer scan runner
#[derive(Parser, Debug)]
#[command(name = "brdf_scan")]
#[command(about = "Run BRDF scans on a simulated two-arm goniometer")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Recipe file (TOML). Without one, an in-plane sweep is generated.
    #[arg(long, global = true)]
    recipe: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scan and report the result
    Scan {
        /// Sleep on the wall clock instead of simulating time
        #[arg(long)]
        realtime: bool,

        /// Override the configured motion policy
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Write the full result as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// Print the arm poses for every recipe point
    Poses {
        #[command(flatten)]
        sweep: SweepArgs,
    },
}

/// Generated in-plane sweep, used when no recipe file is given.
#[derive(clap::Args, Debug)]
struct SweepArgs {
    /// Light-source zenith, degrees
    #[arg(long, default_value = "45")]
    theta_i: f64,

    /// First sensor zenith, degrees
    #[arg(long, default_value = "0")]
    theta_o_start: f64,

    /// Last sensor zenith, degrees
    #[arg(long, default_value = "60")]
    theta_o_end: f64,

    /// Sensor zenith step, degrees
    #[arg(long, default_value = "15")]
    theta_o_step: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    LinearOnly,
    LinearThenJoint,
}

impl From<PolicyArg> for MotionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::LinearOnly => MotionPolicy::LinearOnly,
            PolicyArg::LinearThenJoint => MotionPolicy::LinearThenJoint,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = GonioConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    logging::init(&config.application.log_level, format)?;
    info!(name = %config.application.name, "Starting");

    match &args.command {
        Command::Scan {
            realtime,
            policy,
            output,
            sweep,
        } => {
            let recipe = load_recipe(args.recipe.as_ref(), sweep)?;
            let policy = policy.map(MotionPolicy::from).unwrap_or(config.motion.policy);
            run_scan(&config, &recipe, *realtime, policy, output.as_ref()).await
        }
        Command::Poses { sweep } => {
            let recipe = load_recipe(args.recipe.as_ref(), sweep)?;
            print_poses(&recipe);
            Ok(())
        }
    }
}

fn load_recipe(path: Option<&PathBuf>, sweep: &SweepArgs) -> Result<Recipe> {
    match path {
        Some(path) => config::load_recipe(path)
            .with_context(|| format!("loading recipe {}", path.display())),
        None => Ok(RecipeBuilder::new()
            .project_name("simulated-sweep")
            .description("Generated in-plane sweep")
            .in_plane_sweep(
                sweep.theta_i,
                sweep.theta_o_start,
                sweep.theta_o_end,
                sweep.theta_o_step,
            )
            .build()),
    }
}

async fn run_scan(
    config: &GonioConfig,
    recipe: &Recipe,
    realtime: bool,
    policy: MotionPolicy,
    output: Option<&PathBuf>,
) -> Result<()> {
    let simulated = Arc::new(SimulatedClock::new());
    let clock: Arc<dyn Clock> = if realtime || config.simulation.realtime {
        Arc::new(SystemClock)
    } else {
        simulated.clone()
    };

    let rig = SimulatedRig::new(&config.simulation, clock.clone());
    rig.connect_all().await.context("connecting simulated rig")?;

    let mut sequencer = Sequencer::new(rig.devices(), clock).with_motion_policy(policy);
    let result = sequencer.run(recipe).await;
    rig.disconnect_all().await;
    let result = result?;

    let summary = serde_json::json!({
        "run_id": result.run_id(),
        "project": result.meta().project_name,
        "status": result.status(),
        "calibration_records": result.calibration_records().count(),
        "measured_points": result.successful_points(),
        "failed_points": result.failed_points(),
        "duration_s": result.duration().num_milliseconds() as f64 / 1000.0,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(path) = output {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(file, &result)?;
        info!(path = %path.display(), "Result written");
    }
    Ok(())
}

fn print_poses(recipe: &Recipe) {
    for (index, point) in recipe.points.iter().enumerate() {
        for role in [ArmRole::LightSource, ArmRole::Sensor] {
            let pose = point_to_arm_pose(point, role, &recipe.geometry);
            println!(
                "{:>3} {:<16} pos = ({:8.2}, {:8.2}, {:8.2}) mm  rpy = ({:6.3}, {:6.3}, {:6.3}) rad",
                index + 1,
                role.to_string(),
                pose.position.x,
                pose.position.y,
                pose.position.z,
                pose.orientation.x,
                pose.orientation.y,
                pose.orientation.z,
            );
        }
    }
}
