use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "x")]
#[command(about = "Development automation for gemkit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format check, clippy, the whole test suite and a short smoke run
    Ci,
    /// Format the workspace
    Fmt {
        #[arg(long)]
        check: bool,
    },
    /// Lint every target, warnings are errors
    Clippy,
    /// Run tests, optionally limited to one library module
    Test {
        #[arg(short, long, value_enum)]
        module: Option<Module>,
        /// Doc tests only
        #[arg(long, conflicts_with = "module")]
        doc: bool,
    },
    /// Run the batch construction benchmarks
    Bench {
        /// Only run benchmarks matching this filter
        filter: Option<String>,
    },
    /// Run the gemkit CLI scenarios on a simulated device
    Smoke {
        /// Hardware generation to simulate
        #[arg(short = 'g', long, default_value = "9")]
        gen: u8,
        /// Objects in the linear blit ring
        #[arg(short = 'n', long, default_value = "64")]
        count: usize,
        #[arg(long)]
        release: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Module {
    Bo,
    Reloc,
    Batch,
    Exec,
    Sim,
}

impl Module {
    fn path(self) -> &'static str {
        match self {
            Module::Bo => "core::bo",
            Module::Reloc => "core::reloc",
            Module::Batch => "core::batch",
            Module::Exec => "core::exec",
            Module::Sim => "core::driver::sim",
        }
    }
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Ci => run_ci(),
        Commands::Fmt { check } => run_fmt(check),
        Commands::Clippy => cargo(&["clippy", "--all-targets", "--", "-D", "warnings"]),
        Commands::Test { module, doc } => run_test(module, doc),
        Commands::Bench { filter } => run_bench(filter.as_deref()),
        Commands::Smoke {
            gen,
            count,
            release,
        } => run_smoke(gen, count, release),
    }
}

fn run_ci() -> Result<()> {
    println!("{}", "=== gemkit CI ===".bold().blue());
    let start = Instant::now();

    step("fmt", || run_fmt(true))?;
    step("clippy", || {
        cargo(&["clippy", "--all-targets", "--", "-D", "warnings"])
    })?;
    step("test", || run_test(None, false))?;
    step("smoke gen6", || run_smoke(6, 8, false))?;
    step("smoke gen9", || run_smoke(9, 8, false))?;

    println!(
        "\n{} {:.2}s",
        "✓ CI passed in".green().bold(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn run_fmt(check: bool) -> Result<()> {
    if check {
        cargo(&["fmt", "--all", "--", "--check"])
    } else {
        cargo(&["fmt", "--all"])
    }
}

fn run_test(module: Option<Module>, doc: bool) -> Result<()> {
    match module {
        _ if doc => cargo(&["test", "--doc"]),
        Some(module) => cargo(&["test", "--lib", module.path()]),
        None => cargo(&["test", "--workspace"]),
    }
}

fn run_bench(filter: Option<&str>) -> Result<()> {
    let mut args = vec!["bench", "--bench", "batch_bench"];
    if let Some(filter) = filter {
        args.extend(["--", filter]);
    }
    cargo(&args)
}

fn run_smoke(gen: u8, count: usize, release: bool) -> Result<()> {
    if !(6..=9).contains(&gen) {
        bail!("gen{} is not simulated (6 to 9 are)", gen);
    }

    let gen = gen.to_string();
    let count = count.to_string();
    let scenarios: [&[&str]; 4] = [
        &["info"],
        &["copy"],
        &["fill"],
        &["linear-blits", "-n", &count],
    ];

    for scenario in scenarios {
        println!("{} gemkit --gen {} {}", "→".blue(), gen, scenario.join(" ").cyan());

        let mut args = vec!["run", "--quiet", "--bin", "gemkit"];
        if release {
            args.push("--release");
        }
        args.extend(["--", "--gen", &gen]);
        args.extend_from_slice(scenario);
        cargo(&args)?;
    }
    Ok(())
}

fn step(name: &str, task: impl FnOnce() -> Result<()>) -> Result<()> {
    println!("{} {}", "→".blue(), name.bold());
    let start = Instant::now();
    match task() {
        Ok(()) => {
            println!(
                "{} {} ({:.2}s)",
                "✓".green().bold(),
                name,
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red().bold(), name);
            Err(e)
        }
    }
}

fn cargo(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        bail!("cargo {} failed: {}", args.join(" "), status);
    }
    Ok(())
}
