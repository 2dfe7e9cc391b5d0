use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::ExecutionPolicy;
use crate::exec::{CodeRunner, ExecutionError, ExecutionResult, RunFuture};

/// Marks protocol replies on the driver's stdout and the end-of-run marker
/// on its stderr. Either may follow unterminated output on the same line.
const REPLY_PREFIX: &str = "\u{1e}fleet-exec ";

/// Long-lived driver run with `python -u -c`. It reads one JSON request per
/// line, executes it in a namespace that lives as long as the process, and
/// writes one prefixed JSON reply per request. Each run also ends with a
/// bare prefix line on fd 2 so raw stderr from child processes can be
/// attributed to the run that produced it.
const DRIVER: &str = r#"
import ast, contextlib, io, json, os, sys, traceback

_namespace = {"__name__": "__main__"}
_channel = sys.stdout
_prefix = "\x1efleet-exec "

for _line in sys.stdin:
    _request = json.loads(_line)
    _out, _err = io.StringIO(), io.StringIO()
    _reply = {"value": None, "error": None}
    try:
        with contextlib.redirect_stdout(_out), contextlib.redirect_stderr(_err):
            _tree = ast.parse(_request["code"], mode="exec")
            _last = None
            if _tree.body and isinstance(_tree.body[-1], ast.Expr):
                _last = ast.Expression(_tree.body.pop().value)
            exec(compile(_tree, "<code>", "exec"), _namespace)
            if _last is not None:
                _value = eval(compile(_last, "<code>", "eval"), _namespace)
                if _value is not None:
                    _reply["value"] = repr(_value)
    except BaseException:
        _reply["error"] = traceback.format_exc()
    _reply["stdout"] = _out.getvalue()
    _reply["stderr"] = _err.getvalue()
    sys.__stderr__.flush()
    os.write(2, (_prefix + "\n").encode())
    _channel.write(_prefix + json.dumps(_reply) + "\n")
    _channel.flush()
"#;

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct RunReply {
    value: Option<String>,
    error: Option<String>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
}

/// Python interpreter whose globals persist across runs until it is
/// restarted after a timeout or a crash.
pub struct PythonRunner {
    interpreter: String,
    timeout: Duration,
    env: Vec<(&'static str, String)>,
    session: Option<Session>,
}

impl PythonRunner {
    pub fn new(policy: &ExecutionPolicy) -> Self {
        Self {
            interpreter: policy.interpreter.clone(),
            timeout: Duration::from_secs(policy.timeout_secs),
            env: Vec::new(),
            session: None,
        }
    }

    /// Extra environment for the interpreter process, applied on every spawn.
    pub fn with_env(mut self, vars: Vec<(&'static str, String)>) -> Self {
        self.env = vars;
        self
    }

    fn spawn(&self) -> Result<Session, ExecutionError> {
        let mut child = Command::new(&self.interpreter)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .envs(self.env.iter().map(|(name, value)| (*name, value.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                interpreter: self.interpreter.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutionError::Protocol("interpreter stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::Protocol("interpreter stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError::Protocol("interpreter stderr unavailable".to_string()))?;

        info!(
            interpreter = %self.interpreter,
            pid = ?child.id(),
            env_vars = self.env.len(),
            "started interpreter session"
        );
        Ok(Session {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
        })
    }

    async fn run_source(&mut self, source: &str) -> Result<ExecutionResult, ExecutionError> {
        if self.session.is_none() {
            self.session = Some(self.spawn()?);
        }
        let timeout = self.timeout;
        let Some(session) = self.session.as_mut() else {
            return Err(ExecutionError::Exited);
        };

        let outcome = match tokio::time::timeout(timeout, exchange(session, source)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ExecutionError::Timeout {
                secs: timeout.as_secs(),
            }),
        };

        if let Err(err) = &outcome
            && !matches!(err, ExecutionError::Raised { .. })
        {
            self.restart().await;
        }
        outcome
    }

    async fn restart(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.child.kill().await {
                warn!(error = %err, "failed to kill interpreter session");
            }
            debug!("discarded interpreter session");
        }
    }
}

async fn next_line<R>(lines: &mut Lines<R>) -> Result<String, ExecutionError>
where
    R: AsyncBufRead + Unpin,
{
    lines
        .next_line()
        .await
        .map_err(|_| ExecutionError::Exited)?
        .ok_or(ExecutionError::Exited)
}

/// Reads stdout up to the reply. Text written straight to fd 1 bypasses the
/// driver's redirect and is returned as ordinary output.
async fn read_reply(
    stdout: &mut Lines<BufReader<ChildStdout>>,
) -> Result<(String, RunReply), ExecutionError> {
    let mut stray = String::new();
    loop {
        let line = next_line(stdout).await?;
        let Some(at) = line.find(REPLY_PREFIX) else {
            stray.push_str(&line);
            stray.push('\n');
            continue;
        };
        stray.push_str(&line[..at]);
        let reply: RunReply = serde_json::from_str(&line[at + REPLY_PREFIX.len()..])
            .map_err(|err| ExecutionError::Protocol(err.to_string()))?;
        return Ok((stray, reply));
    }
}

/// Reads fd-2 output up to the end-of-run marker.
async fn read_raw_stderr<R>(stderr: &mut Lines<R>) -> Result<String, ExecutionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = String::new();
    loop {
        let line = next_line(stderr).await?;
        if let Some(at) = line.find(REPLY_PREFIX) {
            raw.push_str(&line[..at]);
            return Ok(raw);
        }
        raw.push_str(&line);
        raw.push('\n');
    }
}

async fn exchange(session: &mut Session, source: &str) -> Result<ExecutionResult, ExecutionError> {
    let mut request = serde_json::to_string(&RunRequest { code: source })
        .map_err(|err| ExecutionError::Protocol(err.to_string()))?;
    request.push('\n');
    session
        .stdin
        .write_all(request.as_bytes())
        .await
        .map_err(|_| ExecutionError::Exited)?;
    session
        .stdin
        .flush()
        .await
        .map_err(|_| ExecutionError::Exited)?;

    // Drain both pipes concurrently.
    let ((stray, reply), raw_stderr) = tokio::try_join!(
        read_reply(&mut session.stdout),
        read_raw_stderr(&mut session.stderr)
    )?;

    if let Some(traceback) = reply.error {
        return Err(ExecutionError::Raised {
            traceback: format!("{raw_stderr}{traceback}"),
        });
    }
    Ok(ExecutionResult {
        value: reply.value,
        stdout: stray + &reply.stdout,
        stderr: reply.stderr + &raw_stderr,
    })
}

impl CodeRunner for PythonRunner {
    fn run<'a>(&'a mut self, source: &'a str) -> RunFuture<'a> {
        Box::pin(self.run_source(source))
    }
}
