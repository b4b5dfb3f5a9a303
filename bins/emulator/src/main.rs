use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use cluster::{Job, JobConfig, MeshShape};
use quantum::entropy::entanglement_entropy;
use simulator::{write_probabilities_csv, Circuit};

/// Distributed quantum state emulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON job configuration; other job flags are ignored when given
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of qubits
    #[arg(long, default_value_t = 8)]
    num_qubits: usize,

    /// Rank mesh, e.g. "2x4"
    #[arg(long, default_value = "1")]
    mesh_shape: MeshShape,

    /// Global seed (full reproducibility)
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Compute backend: cpu | cpu-serial | cpu-rayon
    #[arg(long, default_value = "cpu")]
    backend: String,

    /// Maximum MPS bond dimension
    #[arg(long, default_value_t = 64)]
    bond_dim: usize,

    /// Root directory for checkpoint generations
    #[arg(long)]
    checkpoint_path: Option<PathBuf>,

    /// Gates between checkpoints (0 = never)
    #[arg(long, default_value_t = 0)]
    checkpoint_interval: u64,

    /// Continue from the newest consistent checkpoint
    #[arg(long)]
    resume: bool,

    /// Built-in circuit to run
    #[arg(long, value_enum, default_value_t = CircuitKind::Ghz)]
    circuit: CircuitKind,

    /// Layers for the brickwork circuit
    #[arg(long, default_value_t = 4)]
    depth: usize,

    /// Write final basis probabilities to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Number of Rayon worker threads (0 = Rayon default)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Debug-level logging
    #[arg(long, short)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CircuitKind {
    Ghz,
    Bell,
    Brickwork,
}

fn job_config(args: &Args) -> Result<JobConfig> {
    if let Some(path) = &args.config {
        return JobConfig::from_json_file(path)
            .with_context(|| format!("loading job config {}", path.display()));
    }
    let mut config = JobConfig::new(args.num_qubits, args.mesh_shape.clone(), args.seed)
        .with_backend(args.backend.clone())
        .with_bond_dim(args.bond_dim);
    if let Some(path) = &args.checkpoint_path {
        config = config.with_checkpoints(path, args.checkpoint_interval);
    } else if args.checkpoint_interval > 0 {
        bail!("--checkpoint-interval needs --checkpoint-path");
    }
    config.validate()?;
    Ok(config)
}

fn build_circuit(kind: CircuitKind, num_qubits: usize, depth: usize) -> Result<Circuit> {
    let circuit = match kind {
        CircuitKind::Ghz => Circuit::ghz(num_qubits)?,
        CircuitKind::Bell => {
            if num_qubits != 2 {
                bail!("the bell circuit needs exactly 2 qubits, got {}", num_qubits);
            }
            Circuit::bell()?
        }
        CircuitKind::Brickwork => Circuit::brickwork(num_qubits, depth)?,
    };
    Ok(circuit)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("building the rayon thread pool")?;
    }

    let config = job_config(&args)?;
    let n = config.num_qubits;
    let ceiling = config.sim.memory_ceiling_bytes;
    let circuit = build_circuit(args.circuit, n, args.depth)?;
    info!(
        circuit = ?args.circuit,
        num_qubits = n,
        gates = circuit.len(),
        mesh = %config.mesh_shape,
        "launching job"
    );

    let mut job = Job::new(config)?;
    job.init()?;
    if args.resume {
        let step = job.resume()?;
        info!(step, "resuming");
    }
    let summary = job.run(&circuit)?;
    println!(
        "steps = {}  rounds = {}  checkpoints = {}  truncation_error = {:.3e}",
        summary.steps,
        summary.rounds,
        summary.checkpoints.len(),
        summary.truncation_error
    );

    let state = job.final_state()?;
    if let Some(ctx) = job.context() {
        let half: Vec<usize> = (0..n / 2).collect();
        if !half.is_empty() {
            let s = entanglement_entropy(&state, &half, ctx.backend(), ceiling)?;
            println!("S(first {} qubits) = {:.6}", half.len(), s);
        }
    }

    if let Some(path) = &args.csv {
        let probs = state.probabilities(ceiling)?;
        write_probabilities_csv(path, n, &probs)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "probabilities written");
    }
    Ok(())
}
