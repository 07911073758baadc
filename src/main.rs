//! Demo application for test container discovery.
//!
//! Treats every directory given on the command line as a project, prints the discovered test
//! containers, and prints them again each time a watched file changes.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use test_container_discovery::{
    config::DiscovererConfig,
    discovery::{
        DirectoryProjectSource, Discoverer, DiscovererBuilder, Solution, SolutionEvent,
        TestContainer,
    },
    host::TestWindowBuilder,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "test-container-discovery", about = "Watch directories for test containers")]
struct Args {
    /// Project root directories (defaults to the current directory).
    roots: Vec<PathBuf>,

    /// Suffix identifying a test container.
    #[arg(short, long, default_value = ".spec.js")]
    extension: String,

    /// Glob pattern watched in each container directory (repeatable).
    #[arg(short, long = "pattern")]
    patterns: Vec<String>,

    /// Executor URI the containers are registered under.
    #[arg(long, default_value = "executor://DemoTestExecutor")]
    executor_uri: String,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn build_discoverer(
    args: &Args,
    solution: Arc<Solution>,
) -> test_container_discovery::Result<Discoverer> {
    let config = DiscovererConfig::builder(args.executor_uri.clone())
        .container_file_extension(args.extension.clone())
        .watched_file_patterns(args.patterns.iter().cloned())
        .build()?;

    let roots = if args.roots.is_empty() {
        vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))]
    } else {
        args.roots.clone()
    };

    DiscovererBuilder::new(config, Arc::new(DirectoryProjectSource::new(roots)))
        .lifecycle(solution)
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let directive = match args.verbose {
        0 => "test_container_discovery=info",
        1 => "test_container_discovery=debug",
        _ => "test_container_discovery=trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let solution = Arc::new(Solution::new());
    let discoverer = Arc::new(build_discoverer(&args, solution.clone())?);

    println!("=== Test Container Discovery ===");
    println!("Executor:  {}", discoverer.executor_uri());
    println!("Extension: {}", discoverer.config().container_file_extension());
    println!("Patterns:  {}\n", discoverer.config().watched_file_patterns().join(", "));

    let mut window = TestWindowBuilder::new(discoverer.clone())
        .on_refresh(Box::new(|containers: &[TestContainer]| {
            println!("[Discovery] {} test containers:", containers.len());
            for container in containers.iter().take(20) {
                println!("  - {}", container.source().display());
            }
            if containers.len() > 20 {
                println!("  ... and {} more", containers.len() - 20);
            }
        }))
        .build();
    window.start();

    // The demo has no real host, so announce the solution as opened.
    solution.publish(SolutionEvent::AfterOpenSolution { new_solution: false });

    println!("Press Ctrl+C to exit\n");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    window.stop().await;
    discoverer.dispose().await;
    println!("Done!");

    Ok(())
}
