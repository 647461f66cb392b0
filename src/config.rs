use crate::calc::GradeScale;
use crate::ipc::Request;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "srmsd",
    version,
    about = "Student result management: JSON-lines service and one-shot commands."
)]
pub struct Cli {
    /// Log filter directives, written to stderr.
    #[arg(long, env = "SRMS_LOG", default_value = "srmsd=info", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Answer newline-delimited JSON requests on stdin (the default).
    Serve {
        /// Open this workspace before reading requests.
        #[arg(long, env = "SRMS_WORKSPACE")]
        workspace: Option<PathBuf>,
    },
    /// Bulk-import a .csv or tab-separated .txt results file.
    Import {
        file: PathBuf,
        #[arg(long, env = "SRMS_WORKSPACE")]
        workspace: PathBuf,
        #[arg(long)]
        scale: Option<GradeScale>,
        /// upsert or insert_only
        #[arg(long)]
        grade_policy: Option<String>,
    },
    /// Print a student's GPA.
    Gpa {
        index_number: String,
        #[arg(long, env = "SRMS_WORKSPACE")]
        workspace: PathBuf,
        #[arg(long)]
        semester: Option<String>,
        #[arg(long)]
        academic_year: Option<String>,
        #[arg(long)]
        scale: Option<GradeScale>,
    },
    /// Print a student's transcript.
    Transcript {
        index_number: String,
        #[arg(long, env = "SRMS_WORKSPACE")]
        workspace: PathBuf,
        #[arg(long)]
        scale: Option<GradeScale>,
    },
}

fn put(params: &mut Map<String, Value>, key: &str, v: Option<Value>) {
    if let Some(v) = v {
        params.insert(key.to_string(), v);
    }
}

impl Command {
    /// The workspace to open and the request a one-shot command stands for.
    /// `None` for `serve`.
    pub fn one_shot(&self) -> Option<(PathBuf, Request)> {
        let mut params = Map::new();
        let (workspace, method) = match self {
            Command::Serve { .. } => return None,
            Command::Import {
                file,
                workspace,
                scale,
                grade_policy,
            } => {
                params.insert("path".into(), json!(file.to_string_lossy()));
                put(&mut params, "scale", scale.map(|s| json!(s.as_f64())));
                put(&mut params, "gradePolicy", grade_policy.as_ref().map(|p| json!(p)));
                (workspace, "import.bulk")
            }
            Command::Gpa {
                index_number,
                workspace,
                semester,
                academic_year,
                scale,
            } => {
                params.insert("indexNumber".into(), json!(index_number));
                put(&mut params, "semester", semester.as_ref().map(|s| json!(s)));
                put(&mut params, "academicYear", academic_year.as_ref().map(|s| json!(s)));
                put(&mut params, "scale", scale.map(|s| json!(s.as_f64())));
                (workspace, "grades.gpa")
            }
            Command::Transcript {
                index_number,
                workspace,
                scale,
            } => {
                params.insert("indexNumber".into(), json!(index_number));
                put(&mut params, "scale", scale.map(|s| json!(s.as_f64())));
                (workspace, "reports.transcript")
            }
        };
        Some((
            workspace.clone(),
            Request::new("cli", method, Value::Object(params)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["srmsd"]).expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.log, "srmsd=info");
    }

    #[test]
    fn import_maps_to_bulk_request() {
        let cli = Cli::try_parse_from([
            "srmsd",
            "import",
            "results.csv",
            "--workspace",
            "/tmp/ws",
            "--scale",
            "5",
            "--grade-policy",
            "insert_only",
        ])
        .expect("parse");
        let (ws, req) = cli.command.expect("command").one_shot().expect("one-shot");
        assert_eq!(ws, PathBuf::from("/tmp/ws"));
        assert_eq!(req.method, "import.bulk");
        assert_eq!(req.params["path"], "results.csv");
        assert_eq!(req.params["scale"], 5.0);
        assert_eq!(req.params["gradePolicy"], "insert_only");
    }

    #[test]
    fn bad_scale_is_a_usage_error() {
        let parsed = Cli::try_parse_from([
            "srmsd", "gpa", "UG001", "--workspace", "/tmp/ws", "--scale", "7",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn gpa_carries_term_filters() {
        let cli = Cli::try_parse_from([
            "srmsd",
            "gpa",
            "UG001",
            "--workspace",
            "/tmp/ws",
            "--semester",
            "Fall2024",
            "--academic-year",
            "2024-2025",
        ])
        .expect("parse");
        let (_, req) = cli.command.expect("command").one_shot().expect("one-shot");
        assert_eq!(req.method, "grades.gpa");
        assert_eq!(req.params["indexNumber"], "UG001");
        assert_eq!(req.params["academicYear"], "2024-2025");
        assert!(req.params.get("scale").is_none());
    }
}
