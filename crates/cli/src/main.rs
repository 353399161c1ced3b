//! `coded` binary.
//!
//! Prebuilds, inspects and evaluates the coded entries of a KDL case file.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use coded::{CodedBase, CodedContext, CodedDiffusivity, CodedFunction1, ExtensionError, ExtensionPoint, Settings};
use coded_config::{CaseEntry, CaseFile, EntryKind};
use tracing::info;

use crate::cli::{Cli, Command};

fn main() -> Result<()> {
	let cli = Cli::parse();
	setup_tracing(cli.verbose);

	match cli.command {
		Command::Build { ref case, ref only } => {
			let (case, context) = open_case(case, &cli)?;
			build(&case, &context, only.as_deref())
		}
		Command::Eval {
			ref case,
			ref name,
			ref values,
		} => {
			let (case, context) = open_case(case, &cli)?;
			eval(find(&case, name)?, &context, values)
		}
		Command::Show { ref case, ref name, source } => {
			let (case, context) = open_case(case, &cli)?;
			let entry = find(&case, name)?;
			match entry.kind {
				EntryKind::Function1 => show(coded_entry::<CodedFunction1>(&context, entry)?, &context, source),
				EntryKind::Diffusivity => show(coded_entry::<CodedDiffusivity>(&context, entry)?, &context, source),
			}
		}
	}
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("coded=debug,coded_config=debug,info")
		} else {
			EnvFilter::new("warn")
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(false)
		.init();
}

/// Loads the case and builds the context from environment, case file and
/// command line, in increasing precedence.
fn open_case(path: &std::path::Path, cli: &Cli) -> Result<(CaseFile, Arc<CodedContext>)> {
	let case = coded_config::load_case(path).with_context(|| format!("failed to load {}", path.display()))?;

	let mut settings = case.settings.apply(Settings::from_env()?);
	if let Some(dir) = &cli.cache_dir {
		settings.cache_dir = dir.clone();
	}
	info!(case = %path.display(), cache_dir = %settings.cache_dir.display(), "Opened case");

	let context = CodedContext::new(&settings)?;
	Ok((case, context))
}

fn find<'a>(case: &'a CaseFile, name: &str) -> Result<&'a CaseEntry> {
	case.get(name).with_context(|| {
		let known: Vec<&str> = case.entries.iter().map(|e| e.name.as_str()).collect();
		format!("no entry named `{name}` (known: {})", known.join(", "))
	})
}

fn coded_entry<P: ExtensionPoint>(context: &Arc<CodedContext>, entry: &CaseEntry) -> Result<CodedBase<P>, ExtensionError> {
	CodedBase::new(Arc::clone(context), &entry.dict())
}

fn build(case: &CaseFile, context: &Arc<CodedContext>, only: Option<&[String]>) -> Result<()> {
	let selected = |entry: &&CaseEntry| only.is_none_or(|names| names.iter().any(|n| *n == entry.name));
	if let Some(names) = only
		&& let Some(missing) = names.iter().find(|n| case.get(n).is_none())
	{
		bail!("no entry named `{missing}`");
	}

	let mut failures = Vec::new();
	let mut total = 0;
	total += build_kind::<CodedFunction1>(case.entries_of(EntryKind::Function1).filter(selected), context, &mut failures)?;
	total += build_kind::<CodedDiffusivity>(case.entries_of(EntryKind::Diffusivity).filter(selected), context, &mut failures)?;

	for failure in &failures {
		eprintln!("{failure}");
	}
	if !failures.is_empty() {
		bail!("{} of {total} entries failed to build", failures.len());
	}
	println!("{total} entries up to date");
	Ok(())
}

fn build_kind<'a, P: ExtensionPoint>(
	entries: impl Iterator<Item = &'a CaseEntry>,
	context: &Arc<CodedContext>,
	failures: &mut Vec<ExtensionError>,
) -> Result<usize> {
	let coded = entries
		.map(|entry| coded_entry::<P>(context, entry))
		.collect::<Result<Vec<_>, _>>()?;
	let total = coded.len();

	let results = coded::build_all(
		coded,
		Some(Box::new(|name: &str, status: &str| println!("{:>12} {} {name}", status, P::TYPE_NAME))),
	);
	failures.extend(results.into_iter().filter_map(|(_, result)| result.err()));
	Ok(total)
}

fn eval(entry: &CaseEntry, context: &Arc<CodedContext>, values: &[f64]) -> Result<()> {
	match entry.kind {
		EntryKind::Function1 => {
			let f = coded_entry::<CodedFunction1>(context, entry)?.instance()?;
			for &x in values {
				println!("{x}\t{}", f.value(x));
			}
		}
		EntryKind::Diffusivity => {
			if values.len() % 4 != 0 {
				bail!("a diffusivity takes `x y z distance` quadruples, got {} values", values.len());
			}
			let d = coded_entry::<CodedDiffusivity>(context, entry)?.instance()?;
			for chunk in values.chunks_exact(4) {
				let (point, distance) = ([chunk[0], chunk[1], chunk[2]], chunk[3]);
				println!("{} {} {} {distance}\t{}", point[0], point[1], point[2], d.value(point, distance));
			}
		}
	}
	Ok(())
}

fn show<P: ExtensionPoint>(mut coded: CodedBase<P>, context: &CodedContext, source: bool) -> Result<()> {
	let mut audit = String::new();
	coded.write_code(&mut audit)?;
	let fingerprint = coded.fingerprint()?;
	let status = match context.cache().lookup(P::TYPE_NAME, &fingerprint) {
		Some(artifact) => format!("built {}", artifact.built_at.to_rfc3339()),
		None => "not built".to_string(),
	};

	println!("// {}", coded.description());
	println!("// fingerprint {fingerprint} ({status})");
	print!("{audit}");

	if source {
		let unit = coded.synthesize()?;
		println!("\n// {}.h\n{}", P::TYPE_NAME, unit.header);
		println!("\n// {}.c\n{}", P::TYPE_NAME, unit.source);
	}
	Ok(())
}
