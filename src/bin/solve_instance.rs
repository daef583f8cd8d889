//! Solves one location request read from a JSON file (or stdin with `-`) and
//! prints the response body.
//!
//! ```text
//! solve_instance request.json [--time-limit SECS] [--node-limit N] [--workers N]
//! ```
//!
//! The request carries a `"family"` tag (`capacitated`, `uncapacitated`,
//! `set_covering`, `max_covering`) next to the fields of that family.
//! Set `RUST_LOG=facloc=debug` to follow the search.

use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;
use std::time::Duration;

use log::error;

use facloc::location::{error_payload, solve, Problem};
use facloc::math::{BranchAndBoundConfig, SearchLimits};
use facloc::{Error, Result};

struct Args {
    input: String,
    config: BranchAndBoundConfig,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T> {
    let value = value.ok_or_else(|| Error::invalid_input(format!("{flag} needs a value")))?;
    value
        .parse()
        .map_err(|_| Error::invalid_input(format!("{flag}: cannot parse '{value}'")))
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut input = None;
    let mut limits = SearchLimits::default();
    let mut workers = 1;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--time-limit" => {
                let secs: f64 = parse_value(&arg, args.next())?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(Error::invalid_input("--time-limit must be non-negative"));
                }
                limits = limits.with_time_limit(Duration::from_secs_f64(secs));
            }
            "--node-limit" => limits = limits.with_node_limit(parse_value(&arg, args.next())?),
            "--workers" => workers = parse_value(&arg, args.next())?,
            _ if input.is_none() => input = Some(arg),
            _ => return Err(Error::invalid_input(format!("unexpected argument '{arg}'"))),
        }
    }

    let input = input.ok_or_else(|| {
        Error::invalid_input(
            "usage: solve_instance <request.json|-> [--time-limit SECS] [--node-limit N] [--workers N]",
        )
    })?;
    let config = BranchAndBoundConfig::default()
        .with_limits(limits)
        .with_workers(workers);
    Ok(Args { input, config })
}

fn read_input(path: &str) -> Result<String> {
    let read = if path == "-" {
        let mut body = String::new();
        io::stdin().read_to_string(&mut body).map(|_| body)
    } else {
        fs::read_to_string(path)
    };
    read.map_err(|err| Error::invalid_input(format!("cannot read {path}: {err}")))
}

fn run() -> Result<serde_json::Value> {
    let args = parse_args(std::env::args().skip(1))?;
    let problem = Problem::from_json(&read_input(&args.input)?)?;
    let report = solve(&problem, &args.config)?;
    Ok(report.to_payload(problem.family()))
}

fn main() -> ExitCode {
    env_logger::init();

    let (body, code) = match run() {
        Ok(body) => (body, ExitCode::SUCCESS),
        Err(err) => {
            error!("{err}");
            (error_payload(&err), ExitCode::FAILURE)
        }
    };
    match serde_json::to_string_pretty(&body) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            error!("cannot encode response: {err}");
            return ExitCode::FAILURE;
        }
    }
    code
}
