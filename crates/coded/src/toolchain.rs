//! External C toolchain invocation.
//!
//! One build request compiles a synthesized source unit straight into a
//! shared library. The compiler is discovered through [`cc`], which honours
//! `CC`, `CFLAGS` and the platform defaults, and is then run directly so its
//! diagnostics can be captured and attached to the error.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::descriptor::BuildOptions;
use crate::error::{CodedError, Result};
use crate::fingerprint::Fingerprint;

/// Inputs of one toolchain invocation.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
	pub fingerprint: Fingerprint,
	/// Generated source unit.
	pub source: &'a Path,
	/// Directory holding the generated declaration unit.
	pub include_dir: &'a Path,
	/// Shared library to produce.
	pub output: &'a Path,
	pub options: &'a BuildOptions,
	pub timeout: Option<Duration>,
}

/// Something that turns a source unit into a shared library.
pub trait Toolchain: Send + Sync {
	/// Identity of the toolchain; part of every fingerprint.
	fn version(&self) -> &str;

	/// Builds `request.output`. Failures are [`CodedError::Build`].
	fn build(&self, request: &BuildRequest<'_>) -> Result<()>;
}

/// The system C compiler.
#[derive(Debug)]
pub struct SystemToolchain {
	tool: cc::Tool,
	version: String,
}

impl SystemToolchain {
	/// Discovers the C compiler for the host target.
	///
	/// `compiler` overrides discovery; `scratch` is where `cc` may probe the
	/// compiler family.
	pub fn detect(compiler: Option<&Path>, scratch: &Path) -> Result<Self> {
		std::fs::create_dir_all(scratch).map_err(|e| detection_error(format!("{}: {e}", scratch.display())))?;

		let target = host_target();
		let mut build = cc::Build::new();
		build
			.opt_level(2)
			.debug(false)
			.cargo_metadata(false)
			.cargo_warnings(false)
			.warnings(false)
			.host(&target)
			.target(&target)
			.out_dir(scratch);
		if let Some(compiler) = compiler {
			build.compiler(compiler);
		}

		let tool = build
			.try_get_compiler()
			.map_err(|e| detection_error(format!("no usable C compiler: {e}")))?;
		let version = describe(&tool);
		info!(compiler = %tool.path().display(), %version, "Detected C toolchain");

		Ok(Self { tool, version })
	}

	/// Compiler executable.
	pub fn compiler(&self) -> &Path {
		self.tool.path()
	}
}

impl Toolchain for SystemToolchain {
	fn version(&self) -> &str {
		&self.version
	}

	fn build(&self, request: &BuildRequest<'_>) -> Result<()> {
		let mut cmd = self.tool.to_command();
		let options = request.options;

		if self.tool.is_like_msvc() {
			cmd.args(["/nologo", "/LD", "/utf-8"])
				.arg(format!("/I{}", request.include_dir.display()))
				.args(&options.compile_flags)
				.arg(request.source)
				.arg(format!("/Fe:{}", request.output.display()))
				.arg("/link")
				.args(&options.link_libs);
		} else {
			cmd.arg("-shared");
			#[cfg(target_os = "macos")]
			cmd.args(["-undefined", "dynamic_lookup"]);
			cmd.arg("-I")
				.arg(request.include_dir)
				.args(&options.compile_flags)
				.arg("-o")
				.arg(request.output)
				.arg(request.source)
				.args(&options.link_libs);
			#[cfg(target_os = "linux")]
			cmd.arg("-Wl,-z,relro,-z,now");
		}
		cmd.current_dir(request.include_dir);

		info!(
			fingerprint = %request.fingerprint.short(),
			output = %request.output.display(),
			"Compiling coded library"
		);
		run_compiler(cmd, request.timeout).map_err(|diagnostics| CodedError::Build {
			fingerprint: Some(request.fingerprint),
			diagnostics,
		})
	}
}

fn detection_error(diagnostics: String) -> CodedError {
	CodedError::Build {
		fingerprint: None,
		diagnostics,
	}
}

/// Target triple of the running host, unless `TARGET` says otherwise.
fn host_target() -> String {
	std::env::var("TARGET").unwrap_or_else(|_| {
		let arch = std::env::consts::ARCH;
		if cfg!(target_os = "windows") {
			format!("{arch}-pc-windows-msvc")
		} else if cfg!(target_os = "macos") {
			format!("{arch}-apple-darwin")
		} else {
			format!("{arch}-unknown-linux-gnu")
		}
	})
}

/// Compiler path, default arguments and the first line of `--version`.
fn describe(tool: &cc::Tool) -> String {
	let args = tool.args().iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ");
	let banner = if tool.is_like_msvc() {
		None
	} else {
		Command::new(tool.path())
			.arg("--version")
			.stdin(Stdio::null())
			.stderr(Stdio::null())
			.output()
			.ok()
			.and_then(|out| String::from_utf8_lossy(&out.stdout).lines().next().map(str::to_string))
	};
	format!("{} [{args}] {}", tool.path().display(), banner.unwrap_or_default())
}

/// Runs the compiler, returning its diagnostics on failure.
///
/// On timeout the compiler is killed and the output readers are abandoned,
/// since compiler subprocesses may keep the pipes open.
fn run_compiler(mut cmd: Command, timeout: Option<Duration>) -> std::result::Result<(), String> {
	let program = PathBuf::from(cmd.get_program());
	cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
	debug!(command = ?cmd, "Running compiler");

	let mut child = cmd.spawn().map_err(|e| format!("failed to run {}: {e}", program.display()))?;
	let stdout = child.stdout.take();
	let stderr = child.stderr.take();
	let stdout = thread::spawn(move || read_pipe(stdout));
	let stderr = thread::spawn(move || read_pipe(stderr));

	let status = match timeout {
		None => child.wait().map_err(|e| format!("failed to wait for {}: {e}", program.display()))?,
		Some(limit) => match wait_with_deadline(&mut child, limit)? {
			Some(status) => status,
			None => return Err(format!("compiler timed out after {}s", limit.as_secs_f64())),
		},
	};

	if status.success() {
		return Ok(());
	}

	let mut diagnostics = stderr.join().unwrap_or_default();
	diagnostics.push_str(&stdout.join().unwrap_or_default());
	let diagnostics = diagnostics.trim();
	if diagnostics.is_empty() {
		Err(format!("{} exited with {status}", program.display()))
	} else {
		Err(diagnostics.to_string())
	}
}

fn wait_with_deadline(child: &mut std::process::Child, limit: Duration) -> std::result::Result<Option<ExitStatus>, String> {
	let started = Instant::now();
	loop {
		if let Some(status) = child.try_wait().map_err(|e| e.to_string())? {
			return Ok(Some(status));
		}
		if started.elapsed() >= limit {
			let _ = child.kill();
			let _ = child.wait();
			return Ok(None);
		}
		thread::sleep(Duration::from_millis(10));
	}
}

fn read_pipe(pipe: Option<impl Read>) -> String {
	let mut buf = Vec::new();
	if let Some(mut pipe) = pipe {
		let _ = pipe.read_to_end(&mut buf);
	}
	String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[cfg(unix)]
	#[test]
	fn failing_command_reports_stderr() {
		let mut cmd = Command::new("sh");
		cmd.args(["-c", "echo 'parse error near x' >&2; exit 3"]);
		let err = run_compiler(cmd, None).unwrap_err();
		assert_eq!(err, "parse error near x");
	}

	#[cfg(unix)]
	#[test]
	fn silent_failure_reports_status() {
		let mut cmd = Command::new("sh");
		cmd.args(["-c", "exit 2"]);
		let err = run_compiler(cmd, None).unwrap_err();
		assert!(err.contains("exited with"), "{err}");
	}

	#[cfg(unix)]
	#[test]
	fn timeout_kills_the_compiler() {
		let mut cmd = Command::new("sh");
		cmd.args(["-c", "sleep 5"]);
		let started = Instant::now();
		let err = run_compiler(cmd, Some(Duration::from_millis(100))).unwrap_err();
		assert!(err.contains("timed out"), "{err}");
		assert!(started.elapsed() < Duration::from_secs(4));
	}

	#[test]
	fn missing_program_is_reported() {
		let cmd = Command::new("coded-no-such-compiler");
		let err = run_compiler(cmd, None).unwrap_err();
		assert!(err.contains("coded-no-such-compiler"), "{err}");
	}

	#[test]
	fn host_target_names_the_running_arch() {
		if std::env::var("TARGET").is_err() {
			assert!(host_target().starts_with(std::env::consts::ARCH));
		}
	}
}
