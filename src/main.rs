use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use rastro::cli::{Cli, OutputFormat};
use rastro::replay::Replay;
use rastro::report::{self, JsonReport};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = args.analysis_config()?;
    let outcome = Replay::new(config)
        .channel_capacity(args.channel_capacity)
        .run_file(&args.trace)
        .with_context(|| format!("failed to analyze {}", args.trace.display()))?;

    let summary = match args.at {
        Some(at) => outcome.session.summary(Some(at)),
        None => outcome.summary,
    };
    let trace = args.trace.display().to_string();
    let read_error = outcome.read_error.as_ref().map(ToString::to_string);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.format {
        OutputFormat::Text => {
            report::write_text(&mut out, &trace, &outcome.stats, &summary)?;
            if let Some(err) = &read_error {
                writeln!(out, "\nwarning: trace ended early: {err}")?;
            }
        }
        OutputFormat::Json => {
            let json = JsonReport::new(&trace, outcome.stats, &summary)
                .with_read_error(read_error)
                .to_json()?;
            writeln!(out, "{json}")?;
        }
    }
    Ok(())
}
