use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use hrafn::gen;
use hrafn::net::{self, TcpMesh};
use hrafn::runtime::{run_local, run_rank, SortConfig};
use hrafn::{PipelineError, Transport};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Distributed out-of-core sort over binary key/payload record files.
///
/// Without Slurm the whole gang runs in this process over a channel
/// mesh; under Slurm each task becomes one rank and slices travel over
/// TCP (peer addresses from HRAFN_HOSTS, in rank order).
#[derive(Parser, Debug)]
#[command(name = "hrafn-sort", version, about)]
struct Args {
    /// Total number of records in the input file
    #[arg(short = 'n', long)]
    records: u64,
    /// Maximum payload size in bytes (at least 8)
    #[arg(short = 'p', long, default_value_t = 256)]
    payload_max: u32,
    /// Worker threads per rank (0 = hardware concurrency)
    #[arg(short = 't', long, default_value_t = 0)]
    threads: usize,
    /// Mergesort task cutoff
    #[arg(short = 'c', long, default_value_t = 10_000)]
    cutoff: usize,
    /// In-process ranks when not running under Slurm
    #[arg(long, default_value_t = 1)]
    ranks: usize,
    /// Directory for the generated input and the sorted output
    #[arg(long, default_value = "files")]
    dir: PathBuf,
    /// Remove the sorted output after a successful verification
    #[arg(long)]
    discard_output: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<PipelineError>().map(|p| p.exit_code()).unwrap_or(1);
            error!(exit_code = code, "sort failed: {:#}", e);
            ExitCode::from(code as u8)
        }
    }
}

fn run(args: &Args) -> Result<()> {
    if args.records == 0 {
        bail!("--records must be > 0");
    }
    if args.payload_max < 8 {
        bail!("--payload-max must be at least 8");
    }
    if args.cutoff == 0 {
        bail!("--cutoff must be > 0");
    }
    if args.ranks == 0 {
        bail!("--ranks must be > 0");
    }

    let cfg = SortConfig {
        records: args.records,
        payload_max: args.payload_max,
        threads: args.threads,
        cutoff: args.cutoff,
    };

    let output = gen::output_path(&args.dir, cfg.records, cfg.payload_max);

    if net::running_under_slurm() {
        let mesh = TcpMesh::from_env()
            .map_err(|e| PipelineError::Distribute(e.into()))
            .context("bring up the TCP mesh")?;
        // Rank 0 owns input generation; other ranks never touch the file.
        let input = if mesh.rank() == 0 {
            gen::ensure_input(&args.dir, cfg.records, cfg.payload_max)?
        } else {
            gen::input_path(&args.dir, cfg.records, cfg.payload_max)
        };
        let timings = run_rank(&cfg, &input, &output, &mesh)?;
        timings.emit();
        if mesh.rank() == 0 && args.discard_output {
            discard(&output);
        }
    } else {
        let input = gen::ensure_input(&args.dir, cfg.records, cfg.payload_max)?;
        let timings = run_local(&cfg, &input, &output, args.ranks)?;
        info!(total_ms = timings.total_ms, "sort complete");
        if args.discard_output {
            discard(&output);
        }
    }
    Ok(())
}

fn discard(output: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(output) {
        warn!(path = %output.display(), error = %e, "could not discard output");
    }
}
