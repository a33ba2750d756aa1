// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! The built-in reduction strategies.

use anyhow::{bail, Result};

use crate::pass::Pass;

pub mod balanced;
pub mod clang;
pub mod lines;

/// Instantiate a pass by name and sub-mode. This is the registry both the
/// driver and the variant workers resolve jobs through.
pub fn create(name: &str, arg: &str) -> Result<Box<dyn Pass>> {
    match name {
        "balanced" => Ok(Box::new(balanced::BalancedPass::new(arg)?)),
        "lines" => {
            if !arg.is_empty() {
                bail!("the lines pass takes no sub-mode, got `{arg}`");
            }
            Ok(Box::new(lines::LinesPass))
        }
        "clang" => Ok(Box::new(clang::ClangPass::new(arg))),
        _ => bail!("unknown pass `{name}`"),
    }
}

/// Parse a `--passes` schedule like `lines,balanced:parens-only`.
///
/// `clang_delta_std` applies to any clang passes in the schedule.
pub fn parse_schedule(spec: &str, clang_delta_std: Option<&str>) -> Result<Vec<Box<dyn Pass>>> {
    let mut schedule = Vec::new();
    for item in spec.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (name, arg) = item.split_once(':').unwrap_or((item, ""));
        if name == "clang" {
            let mut pass = clang::ClangPass::new(arg);
            if let Some(std) = clang_delta_std {
                pass = pass.with_std(std);
            }
            schedule.push(Box::new(pass) as Box<dyn Pass>);
        } else {
            schedule.push(create(name, arg)?);
        }
    }
    if schedule.is_empty() {
        bail!("the pass schedule is empty");
    }
    Ok(schedule)
}

/// The schedule used when `--passes` is not given: cheap textual passes,
/// coarse to fine.
pub fn default_schedule() -> Result<Vec<Box<dyn Pass>>> {
    let mut schedule: Vec<Box<dyn Pass>> = vec![Box::new(lines::LinesPass)];
    for arg in [
        "curly",
        "curly-only",
        "curly-inside",
        "parens",
        "parens-only",
        "parens-inside",
        "square",
        "angles",
    ] {
        schedule.push(Box::new(balanced::BalancedPass::new(arg)?));
    }
    Ok(schedule)
}
