use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};

use anyhow::{bail, Context, Result};
use sterling::{util, Config, MergePhase, RunPhase, Runner};

#[tokio::main]
async fn main() -> Result<()> {
    util::init_data_dir(std::env::var_os(util::DATA_DIR_ENV));

    // Initialize logging to file (~/.sterling/logs/sterling.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    let config = Config::load();

    let mut prompt = String::new();
    io::stdin()
        .read_to_string(&mut prompt)
        .context("failed to read prompt from stdin")?;
    let project_dir = std::env::current_dir()
        .context("failed to resolve the current directory")?
        .display()
        .to_string();

    let mut runner = Runner::new(config)?;
    runner.start_run(&project_dir, prompt.trim()).await?;

    let mut stdout = io::stdout().lock();
    let mut printed = 0;
    loop {
        let live = runner.step().await;
        let lines = runner.state().output().combined();
        for line in &lines[printed.min(lines.len())..] {
            writeln!(stdout, "{}", line.text)?;
        }
        printed = lines.len();
        if !live {
            break;
        }
    }

    let state = runner.state();
    let final_output = state.output().final_output();
    if !final_output.is_empty() {
        writeln!(stdout, "\n{final_output}")?;
    }
    if state.merge().phase() == &MergePhase::Ready {
        if let Some(stats) = state.merge().diff_stats() {
            writeln!(
                stdout,
                "\n{} files changed, +{} -{}",
                stats.files_changed, stats.additions, stats.deletions
            )?;
        }
        if let Some(href) = state.merge().diff_href() {
            writeln!(stdout, "\nReady to merge: {}", runner.client().absolute(href))?;
        }
    }

    match state.phase() {
        RunPhase::Complete => Ok(()),
        phase => bail!("run ended {:?}: {}", phase, state.status().text),
    }
}
