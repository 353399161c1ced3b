use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "coded")]
#[command(about = "Build and evaluate code embedded in case files")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Verbose logging
	#[arg(short, long, global = true)]
	pub verbose: bool,

	/// Artifact cache directory (overrides CODED_CACHE_DIR and the case file)
	#[arg(long, global = true, value_name = "DIR")]
	pub cache_dir: Option<PathBuf>,

	/// Subcommand to execute.
	#[command(subcommand)]
	pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
	/// Build every coded entry of a case file
	Build {
		/// Case file
		case: PathBuf,
		/// Only build specific entries (comma-separated)
		#[arg(long, value_delimiter = ',')]
		only: Option<Vec<String>>,
	},
	/// Evaluate one entry
	///
	/// A function1 takes one value per evaluation; a diffusivity takes
	/// `x y z distance` quadruples.
	Eval {
		/// Case file
		case: PathBuf,
		/// Code name of the entry
		name: String,
		/// Arguments
		#[arg(required = true, allow_negative_numbers = true)]
		values: Vec<f64>,
	},
	/// Print the audit form and fingerprint of one entry
	Show {
		/// Case file
		case: PathBuf,
		/// Code name of the entry
		name: String,
		/// Also print the synthesized source units
		#[arg(long)]
		source: bool,
	},
}
