use anyhow::Result;
use clap::Parser;
use std::convert::Infallible;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tasklane::{Client, NoKwargs, Registry, Task, TaskExt};
use tasklane_engine::LocalEngine;

/// Send a batch of large-input tasks through a pipe and time the round trip.
#[derive(Debug, Parser)]
pub struct App {
    /// Number of tasks to submit.
    #[clap(short, long, default_value = "1000")]
    pub tasks: usize,

    /// Size in bytes of each task's input.
    #[clap(short, long, default_value = "10000")]
    pub payload_size: usize,

    /// Engine executor threads. Defaults to the engine's own default.
    #[arg(value_parser = thread_count_in_range)]
    #[clap(long)]
    pub threads: Option<usize>,
}

fn thread_count_in_range(s: &str) -> std::result::Result<usize, String> {
    let count: usize = s
        .parse()
        .map_err(|_| format!("`{s}` isn't a thread count"))?;
    if count == 0 {
        Err("thread count must be at least 1".into())
    } else {
        Ok(count)
    }
}

/// Returns the length of its input.
#[derive(Default)]
struct Measure;

impl Task for Measure {
    type Args = (String,);
    type Kwargs = NoKwargs;
    type Output = usize;
    type Error = Infallible;

    fn definition() -> &'static str {
        "tasklane_bench::Measure"
    }

    fn call(&mut self, (input,): (String,), _: NoKwargs) -> Result<usize, Infallible> {
        Ok(input.len())
    }
}

fn main() -> Result<ExitCode> {
    let args = App::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                eprintln!("No environment variables found that can initialize tracing_subscriber::EnvFilter. Using defaults.");
                "tasklane=info,tasklane_engine=info,tasklane_bench=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut registry = Registry::new();
    registry.register::<Measure>();

    let config = tasklane::configure(|c| {
        c.thread_count = args.threads;
        c.ready_signal = Some(true);
    });
    let engine = Arc::new(LocalEngine::from_config(&config, Arc::new(registry))?);
    let client = Client::from_shared(engine.clone());

    let payload = "x".repeat(args.payload_size);
    let started = Instant::now();
    let lengths = Measure::pipe(&client, |pipe| {
        for _ in 0..args.tasks {
            pipe.call((payload.clone(),), NoKwargs);
        }
    })?;
    let elapsed = started.elapsed();

    let state = client.store_state()?;
    tracing::info!(
        "Completed {} tasks of {} bytes in {:.2?} ({} stored)",
        lengths.len(),
        args.payload_size,
        elapsed,
        state.tasks.len()
    );

    drop(client);
    if let Ok(engine) = Arc::try_unwrap(engine) {
        engine.shutdown()?;
    }

    let expected = vec![args.payload_size; args.tasks];
    if lengths == expected {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!("Task outputs did not match their inputs");
        Ok(ExitCode::FAILURE)
    }
}
