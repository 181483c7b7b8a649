use std::path::PathBuf;

use clap::Parser;

use crate::session::DEFAULT_MAX_TREE_NODES;

/// Browse the DWARF debugging information of an executable.
#[derive(Parser, Debug, Clone)]
#[command(name = "diex")]
#[command(version)]
#[command(about = "Browse the DWARF debugging information of an executable", long_about = None)]
pub struct Config {
    /// Path to the executable to inspect
    pub path: PathBuf,

    /// Run a shell command and exit instead of starting the shell (repeatable)
    #[arg(short, long = "command", value_name = "CMD")]
    pub commands: Vec<String>,

    /// Log filter, e.g. `debug` or `diex::dwarf=trace`
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Listings of every compile unit above this many entries drop the
    /// units' children
    #[arg(long, default_value_t = DEFAULT_MAX_TREE_NODES)]
    pub max_tree_nodes: usize,
}
