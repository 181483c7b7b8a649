use anyhow::{Context, Result};
use clap::Parser;
use copperline::Copperline;
use tracing::debug;

use diex::commands::{execute, Command};
use diex::config::Config;
use diex::logging::init_logging;
use diex::DebugSession;

fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(config.log_level.as_deref())?;

    let session = DebugSession::open(&config.path)
        .with_context(|| format!("Could not load {}", config.path.display()))?
        .max_tree_nodes(config.max_tree_nodes);

    if !config.commands.is_empty() {
        for line in &config.commands {
            let command = Command::parse(line)?;
            print!("{}", execute(&session, &command)?);
        }
        return Ok(());
    }

    main_loop(&session)
}

fn main_loop(session: &DebugSession) -> Result<()> {
    let mut cl = Copperline::new();
    while let Ok(line) = cl.read_line("diex> ", copperline::Encoding::Utf8) {
        if line.trim().is_empty() {
            continue;
        }
        debug!(%line, "command");

        match Command::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => match execute(session, &command) {
                Ok(output) => print!("{output}"),
                Err(e) => eprintln!("error: {e:#}"),
            },
            Err(e) => eprintln!("error: {e:#}"),
        }
        cl.add_history(line);
    }

    Ok(())
}
