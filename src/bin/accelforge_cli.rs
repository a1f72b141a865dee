use accelforge::{DeviceConfig, DeviceManager, HostRegion, InferenceRequest};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "accelforge-cli", version)]
#[command(about = "Drive a simulated AI accelerator device", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print device capabilities as JSON
    Info,
    /// Run a self-test workload and print the statistics snapshot
    Selftest {
        /// Number of inference jobs to submit
        #[arg(long, default_value_t = 8)]
        jobs: usize,
        /// Buffer size in bytes
        #[arg(long, default_value_t = 65536)]
        size: u64,
        /// Per-job wait timeout in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Print the Prometheus metrics exposition after a short workload
    Metrics,
}

fn main() -> anyhow::Result<()> {
    accelforge::logging::init_logging_default();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info => {
            let dev = DeviceManager::new(DeviceConfig::default())?;
            let caps = dev.capabilities();
            println!("{}", serde_json::to_string_pretty(&caps)?);
        }
        Commands::Selftest {
            jobs,
            size,
            timeout_ms,
        } => {
            let dev = DeviceManager::new(DeviceConfig::default())?;
            run_selftest(&dev, jobs, size, Duration::from_millis(timeout_ms))?;
            println!("{}", serde_json::to_string_pretty(&dev.stats())?);
        }
        Commands::Metrics => {
            let dev = DeviceManager::new(DeviceConfig::default())?;
            run_selftest(&dev, 4, 16384, Duration::from_secs(1))?;
            print!("{}", dev.metrics_text()?);
        }
    }

    Ok(())
}

fn run_selftest(
    dev: &DeviceManager,
    jobs: usize,
    size: u64,
    timeout: Duration,
) -> anyhow::Result<()> {
    let (input, _) = dev.alloc(size, 0).context("allocating input buffer")?;
    let (output, _) = dev.alloc(size, 0).context("allocating output buffer")?;

    let model_bytes = vec![0u8; 4096];
    let model = dev
        .load_model(&model_bytes, 0)
        .context("loading model blob")?;

    // Stage input through the scatter path; the address only has to be
    // plausible host memory for the simulated bus
    let staged = dev
        .write_buffer(input, HostRegion::new(0x7f00_0000_0000, size), timeout)
        .context("staging input")?;
    tracing::info!(staged, "input staged");

    // Each job holds a channel until completion, so run them one at a
    // time like the synchronous convenience path
    for _ in 0..jobs {
        let fence = dev.submit_inference(&InferenceRequest {
            model,
            input,
            output,
            input_size: size,
            output_size: size,
            priority: 0,
        })?;
        let status = dev.wait(fence, timeout).context("waiting for job")?;
        tracing::info!(fence, ?status, "job finished");
    }

    dev.read_buffer(output, HostRegion::new(0x7f00_1000_0000, size), timeout)
        .context("reading output")?;

    dev.unload_model(model)?;
    dev.free(input)?;
    dev.free(output)?;
    Ok(())
}
