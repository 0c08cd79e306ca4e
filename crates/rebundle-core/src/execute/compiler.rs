//! Compilers turn an artifact's inputs into its payload.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cache::Payload;
use crate::graph::ArtifactId;

/// Errors raised by a single compile.
///
/// These are per-artifact: they fail one task and block its dependents, and
/// never abort the pass.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The compiler rejected its input.
    #[error("{0}")]
    Failed(String),

    /// An input file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external compiler could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external compiler exited unsuccessfully.
    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The external compiler was still running at the request deadline and
    /// was killed.
    #[error("{program} killed after exceeding its deadline")]
    Killed { program: String },

    /// A dependency payload was not available.
    #[error("missing payload for dependency {0}")]
    MissingDependency(ArtifactId),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// Everything a compiler sees for one artifact.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Artifact being built.
    pub artifact: ArtifactId,

    /// Direct input files, sorted.
    pub inputs: Vec<PathBuf>,

    /// Payloads of direct artifact dependencies, sorted by id.
    pub dependencies: Vec<(ArtifactId, Payload)>,

    /// Point after which the result is no longer wanted. Compilers that
    /// start external work should stop it once this passes.
    pub deadline: Option<Instant>,
}

/// A pure function from inputs and dependency payloads to a payload.
///
/// Implementations are called concurrently from worker threads.
pub trait Compiler: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Build one artifact.
    fn compile(&self, request: &CompileRequest) -> Result<Payload, CompileError>;
}

/// Concatenates dependency payloads followed by input file contents.
#[derive(Debug, Clone, Default)]
pub struct ConcatCompiler {
    /// Prefix each part with a `/* name */` line.
    pub banner: bool,
}

impl ConcatCompiler {
    pub fn new(banner: bool) -> Self {
        Self { banner }
    }

    fn push_part(&self, out: &mut Vec<u8>, name: &str, bytes: &[u8]) {
        if self.banner {
            out.extend_from_slice(format!("/* {name} */\n").as_bytes());
        }
        out.extend_from_slice(bytes);
        if self.banner && !bytes.ends_with(b"\n") {
            out.push(b'\n');
        }
    }
}

impl Compiler for ConcatCompiler {
    fn name(&self) -> &str {
        "concat"
    }

    fn compile(&self, request: &CompileRequest) -> Result<Payload, CompileError> {
        let mut out = Vec::new();
        for (id, payload) in &request.dependencies {
            self.push_part(&mut out, id.as_str(), payload.as_bytes());
        }
        for path in &request.inputs {
            let bytes = fs::read(path).map_err(|source| CompileError::Read {
                path: path.clone(),
                source,
            })?;
            self.push_part(&mut out, &path.display().to_string(), &bytes);
        }
        Ok(Payload::from(out))
    }
}

/// Runs an external program per artifact.
///
/// The program is invoked as `program [args..] [inputs..]` in `working_dir`
/// with `REBUNDLE_ARTIFACT` set to the artifact id. Dependency payloads are
/// written to stdin in id order; stdout becomes the payload. A child still
/// running at the request deadline is killed.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    /// Run the program from `dir` instead of the current directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Compiler for CommandCompiler {
    fn name(&self) -> &str {
        &self.program
    }

    fn compile(&self, request: &CompileRequest) -> Result<Payload, CompileError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(&request.inputs)
            .env("REBUNDLE_ARTIFACT", request.artifact.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let spawn_error = |source| CompileError::Spawn {
            program: self.program.clone(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;

        // Feed stdin from a separate thread so a child that writes before
        // reading cannot deadlock on a full pipe.
        let stdin_bytes: Vec<u8> = request
            .dependencies
            .iter()
            .flat_map(|(_, payload)| payload.as_bytes().iter().copied())
            .collect();
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || {
                // The child may exit without reading stdin.
                let _ = stdin.write_all(&stdin_bytes);
            })
        });

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let Some(status) = wait_until(&mut child, request.deadline).map_err(spawn_error)? else {
            // Grandchildren may still hold the pipes; leave the reader
            // threads to finish on their own.
            tracing::debug!("Killed {} for {} at deadline", self.program, request.artifact);
            return Err(CompileError::Killed {
                program: self.program.clone(),
            });
        };
        if let Some(writer) = writer {
            let _ = writer.join();
        }
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            return Err(CompileError::Exit {
                program: self.program.clone(),
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(Payload::from(stdout))
    }
}

const WAIT_POLL: Duration = Duration::from_millis(10);

// Wait for the child; past `deadline` kill it and return `None`.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> std::io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            // Already exited between the two calls if this fails.
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        std::thread::sleep(WAIT_POLL);
    }
}

// Read a pipe to the end on its own thread so the child never blocks on a
// full pipe while we wait.
fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
