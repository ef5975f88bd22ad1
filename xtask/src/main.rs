//! Build automation tasks for Tally
//!
//! - `generate-cli-docs`: writes the `tally` command reference from the clap
//!   definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for Tally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<tally_cli::Cli>();

    let content = format!(
        r#"# Tally CLI Reference

Generated from the CLI source code on {}.

## Quick Start

```bash
# List the available components
tally components

# Check a job definition
tally validate --job job.json

# Run a job on this machine
tally run --job job.json --data rows.csv --pretty

# Split the job over in-process workers
tally dispatch --job job.json --data rows.csv --local-workers 4

# Split the job over tally-worker processes reading the same rows
tally dispatch --job job.json --data rows.csv \
  --worker http://10.0.0.5:8090/tally/worker \
  --worker http://10.0.0.6:8090/tally/worker
```

## Commands

{}

## Environment Variables

- `TALLY_DATA` - CSV file read by `run` and `dispatch`
- `TALLY_WORKER_ENDPOINTS` - comma-separated worker URLs for `dispatch`
- `TALLY_HTTP_TIMEOUT_SECS` - per-request timeout towards workers
- `TALLY_LOG_LEVEL`, `TALLY_LOG_FORMAT`, `TALLY_LOG_FILTER` - logging

## Workers

`tally-worker` serves `POST /tally/worker` and `GET /health`. It is configured
through `TALLY_WORKER_HOST`, `TALLY_WORKER_PORT`, `TALLY_WORKER_DATA` and
`TALLY_SHUTDOWN_TIMEOUT`.

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
