//! Running external programs with their output captured to a log file.

mod supervisor;

use std::env;
use std::fs;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::ProcessError;

pub use supervisor::{INTERRUPTED, OsSupervisor, ProcessSupervisor, install_interrupt_handler, interrupted};

/// The result of a finished process.
#[derive(Debug, Clone)]
pub struct Captured {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Standard output followed by standard error.
    pub output: String,
    pub log: Utf8PathBuf,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A program invocation: what to run and where.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<Utf8PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Runs to completion and writes the combined output to a fresh
    /// `<log_dir>/<log_stem>.<n>.txt`.
    pub fn run_and_log(
        &self,
        log_dir: &Utf8Path,
        log_stem: &str,
        supervisor: &dyn ProcessSupervisor,
    ) -> Result<Captured, ProcessError> {
        let spawn_err = |source: std::io::Error| ProcessError::Spawn {
            program: self.program.clone(),
            source,
        };

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        supervisor.prepare(&mut command);

        debug!("Running {} {}", self.program, self.args.join(" "));
        let child = command.spawn().map_err(spawn_err)?;
        let pid = child.id();
        supervisor.track(pid);
        let result = child.wait_with_output();
        supervisor.release(pid);
        let out = result.map_err(spawn_err)?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        let log_err = |path: &Utf8Path| {
            let path = path.to_owned();
            move |source: std::io::Error| ProcessError::Log { path, source }
        };
        fs::create_dir_all(log_dir).map_err(log_err(log_dir))?;
        let log = crate::io::unique_path(log_dir, log_stem, ".txt");
        fs::write(&log, &output).map_err(log_err(log.as_path()))?;

        Ok(Captured {
            exit_code: out.status.code(),
            output,
            log,
        })
    }
}

/// Resolves a program name: paths with a directory part are used as they
/// are, bare names are searched on `PATH`.
pub fn locate_program(program: &str) -> Option<Utf8PathBuf> {
    let path = Utf8Path::new(program);

    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_owned());
    }

    let dirs = env::var_os("PATH")?;
    env::split_paths(&dirs)
        .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
        .flat_map(|dir| {
            let mut candidates = vec![dir.join(program)];
            if cfg!(windows) && path.extension().is_none() {
                candidates.push(dir.join(format!("{program}.exe")));
            }
            candidates
        })
        .find(|candidate| candidate.is_file())
}
