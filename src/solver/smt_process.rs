// SMT engine process session
// Communicates with an SMT-LIB2 solver (z3 by default) over stdin/stdout

use crate::domain::SolveError;
use crate::solver::sexpr::{self, SExpr};
use crate::solver::smtlib::{blocking_clause, SmtScript};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

type Result<T> = std::result::Result<T, SolveError>;

/// How to start the SMT engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SmtCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Short engine name for diagnostics (`/usr/bin/z3` -> `z3`).
    pub fn engine_name(&self) -> String {
        Path::new(&self.program)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.program)
            .to_string()
    }

    /// Check whether the engine binary can be started.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for SmtCommand {
    fn default() -> Self {
        Self::new("z3", vec!["-in".into(), "-smt2".into()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Sat,
    Unsat,
    Unknown,
}

/// One interactive engine process. Dropping the session kills the engine.
pub struct SmtSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    deadline: Instant,
    budget: Duration,
}

impl SmtSession {
    pub async fn start(command: &SmtCommand, budget: Duration) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SolveError::EngineFailure(format!(
                    "failed to start SMT engine '{}': {e}",
                    command.program
                ))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SolveError::Internal("SMT engine stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SolveError::Internal("SMT engine stdout unavailable".into()))?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            deadline: deadline_after(budget),
            budget,
        })
    }

    pub async fn send(&mut self, commands: &str) -> Result<()> {
        trace!(commands, "smt <<");
        let write = async {
            self.stdin.write_all(commands.as_bytes()).await?;
            self.stdin.flush().await
        };
        match timeout_at(self.deadline, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SolveError::EngineFailure(format!(
                "failed to write to SMT engine: {e}"
            ))),
            Err(_) => Err(self.timeout()),
        }
    }

    fn timeout(&self) -> SolveError {
        SolveError::Timeout {
            seconds: self.budget.as_secs_f64(),
        }
    }

    /// Read one complete response, skipping `success` and `unsupported` acknowledgements.
    async fn response(&mut self) -> Result<String> {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            let read = match timeout_at(self.deadline, self.stdout.read_line(&mut line)).await {
                Ok(read) => read.map_err(|e| {
                    SolveError::EngineFailure(format!("failed to read from SMT engine: {e}"))
                })?,
                Err(_) => return Err(self.timeout()),
            };
            if read == 0 {
                return Err(SolveError::EngineFailure(
                    "SMT engine closed its output".into(),
                ));
            }
            let trimmed = line.trim();
            if text.is_empty() && matches!(trimmed, "" | "success" | "unsupported") {
                continue;
            }
            text.push_str(&line);
            if sexpr::depth(&text) <= 0 {
                break;
            }
        }
        let text = text.trim().to_string();
        trace!(response = %text, "smt >>");
        if text.starts_with("(error") {
            return Err(SolveError::EngineFailure(text));
        }
        Ok(text)
    }

    pub async fn check_sat(&mut self) -> Result<Verdict> {
        self.send("(check-sat)\n").await?;
        match self.response().await?.as_str() {
            "sat" => Ok(Verdict::Sat),
            "unsat" => Ok(Verdict::Unsat),
            "unknown" => Ok(Verdict::Unknown),
            other => Err(SolveError::EngineFailure(format!(
                "unexpected check-sat response: {other}"
            ))),
        }
    }

    /// Model value terms for `symbols`, in order.
    pub async fn values(&mut self, symbols: &[String]) -> Result<Vec<SExpr>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        self.send(&format!("(get-value ({}))\n", symbols.join(" ")))
            .await?;
        let text = self.response().await?;
        let parsed = sexpr::parse(&text).map_err(SolveError::EngineFailure)?;
        let pairs = parsed.as_list().unwrap_or_default();
        if pairs.len() != symbols.len() {
            return Err(SolveError::EngineFailure(format!(
                "get-value returned {} of {} values",
                pairs.len(),
                symbols.len()
            )));
        }
        pairs
            .iter()
            .map(|pair| match pair.as_list() {
                Some([_, value]) => Ok(value.clone()),
                _ => Err(SolveError::EngineFailure(format!(
                    "malformed get-value entry: {pair}"
                ))),
            })
            .collect()
    }

    pub async fn unsat_core(&mut self) -> Result<Vec<String>> {
        self.send("(get-unsat-core)\n").await?;
        let text = self.response().await?;
        let parsed = sexpr::parse(&text).map_err(SolveError::EngineFailure)?;
        Ok(parsed
            .as_list()
            .unwrap_or_default()
            .iter()
            .filter_map(|item| item.as_atom().map(str::to_string))
            .collect())
    }

    pub async fn objectives(&mut self) -> Result<SExpr> {
        self.send("(get-objectives)\n").await?;
        let text = self.response().await?;
        sexpr::parse(&text).map_err(SolveError::EngineFailure)
    }

    pub async fn reason_unknown(&mut self) -> Result<String> {
        self.send("(get-info :reason-unknown)\n").await?;
        let text = self.response().await?;
        let parsed = sexpr::parse(&text).map_err(SolveError::EngineFailure)?;
        Ok(match parsed.as_list() {
            Some([_, reason]) => reason.to_string().trim_matches('"').to_string(),
            _ => text,
        })
    }

    pub async fn close(mut self) {
        let _ = timeout_at(self.deadline, self.stdin.write_all(b"(exit)\n")).await;
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    // a year stands in for "no deadline" when the budget overflows the clock
    now.checked_add(budget)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 60 * 60))
}

/// Engine-ready model for the symbolic families.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtModel {
    pub script: SmtScript,
    pub max_solutions: usize,
    pub unsat_core: bool,
}

/// Raw outcome of a session: every assignment found plus the final verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtOutcome {
    pub engine: String,
    pub verdict: Verdict,
    pub solutions: Vec<Vec<f64>>,
    /// Constraint labels of the engine's unsat core.
    pub conflict: Vec<String>,
    pub unbounded: bool,
    pub reason: Option<String>,
    /// Wall-clock budget the session ran under.
    pub time_limit: Duration,
    /// Enumeration stopped by the time limit after at least one assignment.
    pub truncated: bool,
}

impl SmtOutcome {
    fn new(engine: String, time_limit: Duration) -> Self {
        Self {
            engine,
            time_limit,
            verdict: Verdict::Unknown,
            solutions: Vec::new(),
            conflict: Vec::new(),
            unbounded: false,
            reason: None,
            truncated: false,
        }
    }
}

/// Run a model to completion: check, read values, block and repeat until
/// `max_solutions` assignments are found or the engine reports unsat.
pub async fn run(command: &SmtCommand, model: SmtModel, budget: Duration) -> Result<SmtOutcome> {
    let mut session = SmtSession::start(command, budget).await?;
    let outcome = drive(&mut session, command, &model, budget).await;
    session.close().await;
    outcome
}

async fn drive(
    session: &mut SmtSession,
    command: &SmtCommand,
    model: &SmtModel,
    budget: Duration,
) -> Result<SmtOutcome> {
    let script = &model.script;
    let mut preamble = String::from("(set-option :produce-models true)\n");
    if model.unsat_core {
        preamble.push_str("(set-option :produce-unsat-cores true)\n");
    }
    session.send(&preamble).await?;
    session.send(&script.text).await?;
    if let Some(objective) = &script.objective {
        session.send(objective).await?;
    }

    let mut outcome = SmtOutcome::new(command.engine_name(), budget);
    loop {
        let verdict = match session.check_sat().await {
            Ok(verdict) => verdict,
            Err(SolveError::Timeout { .. }) if !outcome.solutions.is_empty() => {
                outcome.truncated = true;
                break;
            }
            Err(e) => return Err(e),
        };
        debug!(?verdict, found = outcome.solutions.len(), "check-sat");
        match verdict {
            Verdict::Sat => {
                let raw = session.values(&script.symbols).await?;
                let values = raw
                    .iter()
                    .map(|term| {
                        term.numeric().ok_or_else(|| {
                            SolveError::EngineFailure(format!(
                                "engine returned a non-numeric value: {term}"
                            ))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()?;
                if script.objective.is_some() && outcome.solutions.is_empty() {
                    outcome.unbounded = session.objectives().await?.contains_atom("oo");
                }
                outcome.solutions.push(values);
                outcome.verdict = Verdict::Sat;
                if outcome.solutions.len() >= model.max_solutions {
                    break;
                }
                session.send(&blocking_clause(&script.symbols, &raw)).await?;
            }
            Verdict::Unsat => {
                if outcome.solutions.is_empty() {
                    outcome.verdict = Verdict::Unsat;
                    if model.unsat_core {
                        outcome.conflict = session
                            .unsat_core()
                            .await?
                            .iter()
                            .filter_map(|name| script.label_of(name).map(str::to_string))
                            .collect();
                    }
                }
                break;
            }
            Verdict::Unknown => {
                let reason = session.reason_unknown().await.ok();
                if outcome.solutions.is_empty() {
                    outcome.verdict = Verdict::Unknown;
                } else {
                    outcome.truncated = true;
                }
                outcome.reason = reason;
                break;
            }
        }
    }
    Ok(outcome)
}
