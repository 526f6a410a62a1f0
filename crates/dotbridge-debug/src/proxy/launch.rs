//! Launch/attach rewriting strategies.
//! The seam where build/launch metadata from the editor layers enters the
//! session: a profile is consumed once at session start and never re-read.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::error::RequestError;
use crate::protocol::{Request, RunInTerminalArguments, RunInTerminalResponseBody};

use super::core::ProxyHandle;

/// How the debuggee comes to life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// The debugger starts the program itself.
    Launch,
    /// Attach to an already running process.
    AttachToProcess { process_id: u32 },
    /// Ask the client to start the program in its terminal, then attach to
    /// the reported process. A startup hook keeps the program waiting until
    /// the debugger is ready.
    RunInTerminal { startup_hook: Option<PathBuf> },
    /// Attach to a test host handed over by the test runner.
    TestHostAttach { process_id: u32 },
}

/// Launch metadata resolved by the excluded build layers.
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub program: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub strategy: LaunchStrategy,
}

impl LaunchProfile {
    #[must_use]
    pub fn launch(program: PathBuf) -> Self {
        Self {
            program: Some(program),
            cwd: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            strategy: LaunchStrategy::Launch,
        }
    }

    #[must_use]
    pub fn attach(process_id: u32) -> Self {
        Self {
            program: None,
            cwd: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            strategy: LaunchStrategy::AttachToProcess { process_id },
        }
    }
}

/// Failure while preparing a launch/attach request.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("launch profile has no program path")]
    MissingProgram,

    #[error("terminal did not report a process id")]
    NoProcessId,

    #[error("request arguments are not an object")]
    MalformedArguments,

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Fills in process id, program path, working directory and environment on
/// the client's attach/launch request before it reaches the debugger.
pub trait LaunchRewriter: Send + Sync {
    fn rewrite(&self, request: &mut Request, proxy: &ProxyHandle) -> Result<(), LaunchError>;
}

/// Standard rewriter driven by a [`LaunchProfile`].
pub struct ProfileRewriter {
    profile: LaunchProfile,
}

impl ProfileRewriter {
    #[must_use]
    pub fn new(profile: LaunchProfile) -> Self {
        Self { profile }
    }

    fn fill_launch(&self, arguments: &mut Map<String, Value>) -> Result<(), LaunchError> {
        let program = self.profile.program.as_ref().ok_or(LaunchError::MissingProgram)?;
        arguments.insert("program".into(), Value::String(program.display().to_string()));
        if let Some(cwd) = &self.profile.cwd {
            arguments.insert("cwd".into(), Value::String(cwd.display().to_string()));
        }
        if !self.profile.args.is_empty() {
            arguments.insert(
                "args".into(),
                Value::Array(self.profile.args.iter().cloned().map(Value::String).collect()),
            );
        }
        if !self.profile.env.is_empty() {
            let env: Map<String, Value> = self
                .profile
                .env
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect();
            arguments.insert("env".into(), Value::Object(env));
        }
        Ok(())
    }

    fn fill_run_in_terminal(
        &self,
        arguments: &mut Map<String, Value>,
        startup_hook: Option<&PathBuf>,
        proxy: &ProxyHandle,
    ) -> Result<(), LaunchError> {
        let program = self.profile.program.as_ref().ok_or(LaunchError::MissingProgram)?;

        let cwd = self
            .profile
            .cwd
            .clone()
            .or_else(|| program.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        let mut terminal_args = vec![program.display().to_string()];
        terminal_args.extend(self.profile.args.iter().cloned());
        let mut env: BTreeMap<String, Option<String>> = self
            .profile
            .env
            .iter()
            .map(|(key, value)| (key.clone(), Some(value.clone())))
            .collect();
        if let Some(hook) = startup_hook {
            env.insert("DOTNET_STARTUP_HOOKS".into(), Some(hook.display().to_string()));
        }

        let terminal = RunInTerminalArguments {
            kind: Some("integrated".to_string()),
            title: Some("dotbridge debug".to_string()),
            cwd: cwd.display().to_string(),
            args: terminal_args,
            env: if env.is_empty() { None } else { Some(env) },
        };
        let terminal_args =
            serde_json::to_value(terminal).map_err(|_| LaunchError::MalformedArguments)?;

        let response = proxy.request_client("runInTerminal", Some(terminal_args))?;
        let body: RunInTerminalResponseBody = response
            .body
            .and_then(|body| serde_json::from_value(body).ok())
            .unwrap_or_default();
        let process_id = body
            .process_id
            .or(body.shell_process_id)
            .ok_or(LaunchError::NoProcessId)?;

        arguments.insert("processId".into(), Value::from(process_id));
        Ok(())
    }
}

impl LaunchRewriter for ProfileRewriter {
    fn rewrite(&self, request: &mut Request, proxy: &ProxyHandle) -> Result<(), LaunchError> {
        let arguments = request.arguments.get_or_insert_with(|| Value::Object(Map::new()));
        if !arguments.is_object() {
            return Err(LaunchError::MalformedArguments);
        }
        let Some(arguments) = arguments.as_object_mut() else {
            return Err(LaunchError::MalformedArguments);
        };

        match &self.profile.strategy {
            LaunchStrategy::Launch => self.fill_launch(arguments)?,
            LaunchStrategy::AttachToProcess { process_id } => {
                arguments.insert("processId".into(), Value::from(*process_id));
            }
            LaunchStrategy::RunInTerminal { startup_hook } => {
                self.fill_run_in_terminal(arguments, startup_hook.as_ref(), proxy)?;
            }
            LaunchStrategy::TestHostAttach { process_id } => {
                debug!(process_id, "attaching to test host");
                arguments.insert("processId".into(), Value::from(*process_id));
            }
        }
        Ok(())
    }
}
