use std::path::PathBuf;

use anyhow::Context;
use cfg_chc::{EncodeOptions, SolverConfig, Translation, Translator, Verdict, Z3Oracle};
use cfg_ir::Function;
use serde::Serialize;
use tracing::{debug, info, warn};

pub(crate) const CHECK_SUBDIR: &str = "chc-check";

pub(crate) struct CheckConfig {
    pub solver: SolverConfig,
    pub options: EncodeOptions,
    pub target_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum QueryStatus {
    /// The assertion can fail
    Reachable,
    /// The assertion never fails
    Unreachable,
    /// Unreachable, but rules were dropped so the answer is not trustworthy
    Inconclusive,
    Error,
}

impl QueryStatus {
    fn of(verdict: &Verdict, complete: bool) -> Self {
        match verdict {
            Verdict::Reachable { .. } => QueryStatus::Reachable,
            Verdict::Unreachable if complete => QueryStatus::Unreachable,
            Verdict::Unreachable => QueryStatus::Inconclusive,
            Verdict::Error(_) => QueryStatus::Error,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            QueryStatus::Reachable => "reachable",
            QueryStatus::Unreachable => "unreachable",
            QueryStatus::Inconclusive => "inconclusive",
            QueryStatus::Error => "error",
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QueryReport {
    pub block: String,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub artifact: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct SkippedReport {
    pub rule: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UnsupportedReport {
    pub block: String,
    pub statement: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionReport {
    pub function: String,
    pub complete: bool,
    pub relations: usize,
    pub rules: usize,
    pub queries: Vec<QueryReport>,
    pub skipped: Vec<SkippedReport>,
    pub unsupported: Vec<UnsupportedReport>,
}

/// Translates `function`, writes one script per query and asks z3 about each.
pub(crate) fn check_function(
    function: &Function,
    config: &CheckConfig,
) -> anyhow::Result<FunctionReport> {
    let function_dir = config
        .target_dir
        .join(CHECK_SUBDIR)
        .join(sanitize_ident(&function.name));
    std::fs::create_dir_all(&function_dir).with_context(|| {
        format!(
            "Failed to create verification directory {}",
            function_dir.display()
        )
    })?;

    let cfg_path = function_dir.join("function.cfg");
    std::fs::write(&cfg_path, function.to_string())
        .with_context(|| format!("Failed to write CFG {}", cfg_path.display()))?;

    let mut oracle = Z3Oracle::new(config.solver.clone());
    let translation = Translator::new(&mut oracle, config.options.clone())
        .translate(function)
        .with_context(|| format!("Failed to translate function ${}", function.name))?;

    let mut artifacts = Vec::new();
    for relation in translation.query_relations() {
        let smt_path = function_dir.join(format!("site_{}.smt2", sanitize_ident(relation.label())));
        std::fs::write(&smt_path, oracle.script().render(&[relation]))
            .with_context(|| format!("Failed to write SMT {}", smt_path.display()))?;
        debug!(smt_path = %smt_path.display(), "Wrote query script");
        artifacts.push(smt_path);
    }

    let outcomes = Translator::new(&mut oracle, config.options.clone()).solve(&translation);

    let queries = outcomes
        .into_iter()
        .zip(artifacts)
        .map(|(outcome, artifact)| {
            let detail = match &outcome.verdict {
                Verdict::Reachable { witness } => witness.clone(),
                Verdict::Unreachable => None,
                Verdict::Error(err) => Some(err.to_string()),
            };
            QueryReport {
                status: QueryStatus::of(&outcome.verdict, translation.is_complete()),
                block: outcome.block,
                detail,
                artifact,
            }
        })
        .collect();

    Ok(report(&translation, queries))
}

fn report(translation: &Translation, queries: Vec<QueryReport>) -> FunctionReport {
    FunctionReport {
        function: translation.function.clone(),
        complete: translation.is_complete(),
        relations: translation.relations.len(),
        rules: translation.rules.len(),
        queries,
        skipped: translation
            .skipped
            .iter()
            .map(|skipped| SkippedReport {
                rule: skipped.label.clone(),
                error: skipped.error.to_string(),
            })
            .collect(),
        unsupported: translation
            .unsupported
            .iter()
            .map(|construct| UnsupportedReport {
                block: construct.block.clone(),
                statement: construct.statement.clone(),
                reason: construct.reason.to_string(),
            })
            .collect(),
    }
}

/// Checks every function, printing one line per query.
///
/// Fails listing every reachable assertion and every query the solver could
/// not answer.
pub(crate) fn run_check(
    functions: &[&Function],
    config: &CheckConfig,
    json: bool,
) -> anyhow::Result<()> {
    let mut reports = Vec::new();
    for function in functions {
        let report = check_function(function, config)?;
        if !report.complete {
            warn!(
                function = %report.function,
                skipped = report.skipped.len(),
                "Some rules were dropped; unreachable verdicts are inconclusive"
            );
        }
        if report.queries.is_empty() {
            info!(function = %report.function, "No assertion sites");
        }
        for query in &report.queries {
            println!("{}", query_line(&report.function, query));
        }
        reports.push(report);
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialize report")?
        );
    }

    let failures = reports
        .iter()
        .flat_map(|report| {
            report
                .queries
                .iter()
                .filter(|query| matches!(query.status, QueryStatus::Reachable | QueryStatus::Error))
                .map(move |query| format!("  {}", query_line(&report.function, query)))
        })
        .collect::<Vec<_>>();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "assertion checks failed:\n{}",
            failures.join("\n")
        ))
    }
}

fn query_line(function: &str, query: &QueryReport) -> String {
    let mut line = format!(
        "${function} @{}: {} ({})",
        query.block,
        query.status.as_str(),
        query.artifact.display()
    );
    if let Some(detail) = &query.detail {
        line.push_str(&format!(": {}", detail.lines().next().unwrap_or_default()));
    }
    line
}

pub(crate) fn sanitize_ident(input: &str) -> String {
    let mut out = String::new();
    for (i, ch) in input.chars().enumerate() {
        let keep = ch.is_ascii_alphanumeric() || ch == '_';
        if keep {
            if i == 0 && ch.is_ascii_digit() {
                out.push('_');
            }
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "_sym".to_string()
    } else {
        out
    }
}
