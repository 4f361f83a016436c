// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! kiln: command-line front end for the Kiln build scheduler

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kiln_core::BuildId;
use kiln_engine::{BuildConfig, Engine, ProcessRunner};
use kiln_graph::{ProjectDesc, SessionGraph};
use std::path::PathBuf;

mod select;
mod status;
mod timings;

#[derive(Parser)]
#[command(name = "kiln", about = "Distributed incremental session builds", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run (or join) a build of the project's sessions
    Build {
        /// Project descriptor file
        #[arg(long, default_value = "kiln.toml")]
        project: PathBuf,
        /// Shared store directory
        #[arg(long, default_value = ".kiln/store")]
        store: PathBuf,
        /// Artifact directory
        #[arg(long, default_value = ".kiln/artifacts")]
        artifacts: PathBuf,
        /// Command that runs one session job (receives KILN_* env vars)
        #[arg(long)]
        runner: String,
        /// Maximum concurrently running jobs
        #[arg(long, short = 'j', default_value_t = 1)]
        jobs: usize,
        /// Locality slot indices for placement (e.g. --numa 0 --numa 1)
        #[arg(long)]
        numa: Vec<usize>,
        /// Ignore cached results and rebuild everything
        #[arg(long)]
        fresh: bool,
        /// Record failures instead of running jobs
        #[arg(long)]
        no_build: bool,
        /// Multiplier applied to session timeouts
        #[arg(long, default_value_t = 1.0)]
        timeout_scale: f64,
        /// Replay verbose progress output too
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Sessions to build (with their ancestors); all when empty
        sessions: Vec<String>,
    },
    /// Show builds, workers, and session states from the store
    Status {
        #[arg(long, default_value = ".kiln/store")]
        store: PathBuf,
    },
    /// Remove store rows of builds that were stopped
    Clean {
        #[arg(long, default_value = ".kiln/store")]
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kiln=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Build {
            project,
            store,
            artifacts,
            runner,
            jobs,
            numa,
            fresh,
            no_build,
            timeout_scale,
            verbose,
            sessions,
        } => {
            let desc = ProjectDesc::load(&project)
                .with_context(|| format!("loading {}", project.display()))?;
            let desc = select::restrict(desc, &sessions)?;

            let build_id = BuildId::new();
            let timings = timings::from_store(&store)?;
            let graph = SessionGraph::load(&desc, &timings, &build_id)?;

            let mut parts = runner.split_whitespace();
            let program = parts.next().context("empty --runner command")?.to_string();
            let args: Vec<String> = parts.map(str::to_string).collect();

            let config = BuildConfig::new(store, artifacts)
                .max_jobs(jobs.max(1))
                .numa_nodes(numa)
                .fresh(fresh)
                .no_build(no_build)
                .timeout_scale(timeout_scale)
                .verbose(verbose)
                .options(format!("fresh={fresh} no_build={no_build} jobs={jobs}"));

            let engine = Engine::new(config, graph, ProcessRunner::new(program, args), build_id)?;
            let stop = engine.stop_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt: stopping build");
                    stop.cancel();
                }
            });

            let results = tokio::spawn(engine.run()).await.context("engine task died")??;
            let failed = results.values().filter(|r| !r.status.is_ok()).count();
            for (name, result) in &results {
                println!("{name}: {}{}", result.status, if result.current { " (cached)" } else { "" });
            }
            if failed > 0 {
                bail!("{failed} of {} sessions not ok", results.len());
            }
        }
        Command::Status { store } => {
            let snapshot = kiln_engine::engine::snapshot(&store)?;
            let now = kiln_core::Clock::epoch_ms(&kiln_core::SystemClock);
            print!("{}", status::render(&snapshot, now));
        }
        Command::Clean { store } => {
            let db = kiln_store::Db::open(store)?;
            let removed = db.lock()?.clean()?;
            println!("removed {} stopped build(s)", removed.len());
        }
    }
    Ok(())
}
