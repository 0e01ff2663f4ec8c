use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, trace};

use crate::oracle::{Oracle, OracleError, Verdict};
use crate::relations::Relation;
use crate::rules::Rule;
use crate::smtlib::ChcScript;

pub const Z3_TIMEOUT_SECONDS: u64 = 10;

/// How to run the external CHC solver.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SolverConfig {
    pub executable: PathBuf,
    pub timeout_seconds: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("z3"),
            timeout_seconds: Z3_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SolverResult {
    /// The query relation is derivable
    Sat,
    /// The query relation is not derivable
    Unsat,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SolverRun {
    pub result: SolverResult,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `z3 -in` on a complete script.
pub fn solve_chc_script(script: &str, config: &SolverConfig) -> Result<SolverRun, OracleError> {
    let executable = config.executable.display().to_string();
    let mut child = Command::new(&config.executable)
        .arg("-in")
        .arg(format!("-T:{}", config.timeout_seconds))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| OracleError::Spawn {
            executable: executable.clone(),
            message: err.to_string(),
        })?;

    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(script.as_bytes())
            .map_err(|err| OracleError::Io {
                message: format!("writing script to {executable}: {err}"),
            })?;
    }

    let output = child.wait_with_output().map_err(|err| OracleError::Io {
        message: format!("reading output of {executable}: {err}"),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    trace!(status = %output.status, stdout = %stdout.trim(), "solver finished");

    let result = parse_solver_output(&stdout, &stderr, config.timeout_seconds)?;
    Ok(SolverRun {
        result,
        stdout,
        stderr,
    })
}

/// Interprets the first meaningful line z3 printed.
pub fn parse_solver_output(
    stdout: &str,
    stderr: &str,
    timeout_seconds: u64,
) -> Result<SolverResult, OracleError> {
    let mut lines = stdout.lines().map(str::trim).filter(|line| !line.is_empty());
    match lines.next() {
        Some("sat") => Ok(SolverResult::Sat),
        Some("unsat") => Ok(SolverResult::Unsat),
        Some("timeout") => Err(OracleError::Timeout {
            seconds: timeout_seconds,
        }),
        Some("unknown") => Err(OracleError::Unknown {
            reason: lines
                .find_map(|line| {
                    line.strip_prefix("(:reason-unknown")
                        .map(|rest| rest.trim_end_matches(')').trim().trim_matches('"'))
                })
                .unwrap_or("no reason given")
                .to_string(),
        }),
        Some(line) if line.starts_with("(error") => Err(OracleError::Failed {
            message: line.to_string(),
        }),
        Some(line) => Err(OracleError::UnexpectedOutput {
            output: line.to_string(),
        }),
        None if !stderr.trim().is_empty() => Err(OracleError::Failed {
            message: stderr.trim().to_string(),
        }),
        None => Err(OracleError::UnexpectedOutput {
            output: String::new(),
        }),
    }
}

/// Oracle backed by an external `z3` process.
///
/// Relations and rules accumulate in a [`ChcScript`]; every query renders the
/// script with that single query and runs the solver on it.
#[derive(Debug, Clone, Default)]
pub struct Z3Oracle {
    config: SolverConfig,
    script: ChcScript,
}

impl Z3Oracle {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            script: ChcScript::new(),
        }
    }

    pub fn script(&self) -> &ChcScript {
        &self.script
    }

    /// Runs the solver on the script with `relation` as the only query.
    pub fn run_query(&self, relation: &Relation) -> Result<SolverRun, OracleError> {
        solve_chc_script(&self.script.render(&[relation]), &self.config)
    }
}

impl Oracle for Z3Oracle {
    fn register_relation(&mut self, relation: &Relation) -> Result<(), OracleError> {
        self.script.declare(relation)
    }

    fn add_rule(&mut self, rule: &Rule, label: Option<&str>) -> Result<(), OracleError> {
        self.script.add_rule(rule, label)
    }

    fn add_query(&mut self, relation: &Relation) -> Verdict {
        match self.run_query(relation) {
            Ok(run) => match run.result {
                SolverResult::Sat => Verdict::Reachable {
                    witness: summarize_solver_output(&run.stdout),
                },
                SolverResult::Unsat => Verdict::Unreachable,
            },
            Err(err) => {
                debug!(relation = %relation.label(), error = %err, "query failed");
                Verdict::Error(err)
            }
        }
    }
}

/// Everything z3 printed after the verdict line, if anything.
fn summarize_solver_output(stdout: &str) -> Option<String> {
    let rest = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .skip(1)
        .collect::<Vec<_>>();
    if rest.is_empty() {
        None
    } else {
        Some(rest.join("\n"))
    }
}
