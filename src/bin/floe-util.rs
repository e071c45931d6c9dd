//! FLOE command-line tool.

use anyhow::{bail, Result};
use floe::analyses::liveness::LivenessAnalysis;
use floe::analyses::nullness::NullnessAnalysis;
use floe::loc::shared_store;
use floe::solver::solve;
use floe::{frontend, ProcBody};
use log::debug;
use rayon::prelude::*;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "floe-util", about = "FLOE analysis utility.")]
struct Options {
    #[structopt(short, long)]
    debug: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    #[structopt(name = "print-ir", about = "Parse a .flow file and print the IR")]
    PrintIR {
        #[structopt(help = ".flow file to parse")]
        path: PathBuf,
    },
    #[structopt(name = "analyze", about = "Run an analysis over every procedure")]
    Analyze {
        #[structopt(help = ".flow file to parse")]
        path: PathBuf,
        #[structopt(long, default_value = "nullness", help = "nullness or liveness")]
        analysis: String,
    },
}

fn main() -> Result<()> {
    let opts = Options::from_args();

    let mut logger = env_logger::Builder::from_default_env();
    if opts.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    let _ = logger.try_init();

    match opts.command {
        Command::PrintIR { path } => {
            let text = std::fs::read_to_string(path)?;
            let procs = frontend::parse_module(&text)?;
            debug!("parsed {} procedure(s)", procs.len());
            for body in &procs {
                println!("{}", body.display());
            }
        }
        Command::Analyze { path, analysis } => {
            let text = std::fs::read_to_string(path)?;
            let procs = frontend::parse_module(&text)?;
            // One fixpoint run is single-threaded; distinct procedures are
            // independent and can run in parallel.
            let reports: Result<Vec<String>> = procs
                .par_iter()
                .map(|body| report(body, &analysis))
                .collect();
            for report in reports? {
                println!("{}", report);
            }
        }
    }

    Ok(())
}

fn report(body: &ProcBody, analysis: &str) -> Result<String> {
    use std::fmt::Write;
    let mut out = String::new();
    match analysis {
        "nullness" => {
            let results = solve(NullnessAnalysis::new(body, shared_store()), body)?;
            writeln!(out, "proc {}: nullness converged", body.name)?;
            for block in body.blocks.iter() {
                if let Some(state) = results.input_of(block) {
                    writeln!(out, "  {}: {} tracked entit(ies) at entry", block, state.len())?;
                }
            }
            let mut predicates: Vec<_> = body
                .nodes
                .iter()
                .filter_map(|node| results.predicate_of(node).map(|p| (node, p)))
                .collect();
            predicates.sort_by_key(|(node, _)| *node);
            for (node, outcome) in predicates {
                writeln!(out, "  {}: {:?}", node, outcome)?;
            }
        }
        "liveness" => {
            let results = solve(LivenessAnalysis::new(), body)?;
            writeln!(out, "proc {}: liveness converged", body.name)?;
            if let Some(live) = results.output_of(body.entry) {
                let mut names: Vec<&str> = live
                    .iter()
                    .map(|&s| body.symbols[s].name.as_str())
                    .collect();
                names.sort_unstable();
                writeln!(out, "  live at entry: [{}]", names.join(", "))?;
            }
        }
        other => bail!("unknown analysis `{}`", other),
    }
    Ok(out.trim_end().to_owned())
}
