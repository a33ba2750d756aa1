// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! whittle reduces a test case to a much smaller one that still satisfies
//! a user-supplied interestingness test. Pluggable passes propose variants,
//! parallel sandboxed workers try them out, and nothing reaches the
//! original file until the test has vouched for it.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod arbiter;
mod bug;
mod cache;
mod config;
mod error;
mod pass;
mod passes;
mod pool;
mod readkey;
mod runner;
mod sandbox;
mod stats;
mod variant;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = ToplevelArgs::parse();

    if let Err(e) = args.exec() {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct ToplevelArgs {
    #[command(subcommand)]
    action: Action,
}

impl ToplevelArgs {
    fn exec(self) -> Result<()> {
        match self.action {
            Action::Reduce(a) => a.exec(),
            Action::VariantImpl(a) => a.exec(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Action {
    Reduce(runner::ReduceArgs),
    #[command(hide = true)]
    VariantImpl(variant::VariantImplArgs),
}
