//! Forecast and truth queries

use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use forecast_query::{
    CsvSink, JobStatus, JsonLinesSink, QueryConfig, QueryEngine, QueryJobRunner, QueryKind,
    RowSink,
};
use serde_json::Value;
use tracing::info;

use super::Hub;
use crate::config::{HubConfig, OutputFormat};

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// JSON query specification; "-" reads stdin, omitted queries everything
    pub spec: Option<PathBuf>,

    /// Output format (default from config)
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Write rows to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Override the configured row cap
    #[arg(long)]
    pub max_rows: Option<usize>,
}

pub async fn run(kind: QueryKind, args: QueryArgs, config: &HubConfig) -> Result<()> {
    let hub = Hub::open(config)?;
    let spec = read_spec(args.spec.as_deref())?;
    let mut query_config = config.query.to_query_config();
    if let Some(max_rows) = args.max_rows {
        query_config = query_config.with_max_rows(max_rows);
    }
    let format = args.format.unwrap_or(config.output.format);

    let num_rows = run_query(
        &hub,
        kind,
        spec,
        query_config,
        format,
        args.output.as_deref(),
    )
    .await?;
    if let Some(path) = &args.output {
        eprintln!("Wrote {} rows to {}", num_rows, path.display());
    }
    Ok(())
}

/// Run one query as a job and write its rows. Returns the row count.
///
/// A failed or timed-out query removes the partial output file.
pub async fn run_query(
    hub: &Hub,
    kind: QueryKind,
    spec: Value,
    query_config: QueryConfig,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<usize> {
    let timeout = query_config.timeout;
    let engine = QueryEngine::new(Arc::clone(&hub.store), Arc::clone(&hub.catalog))
        .with_config(query_config);
    let runner = QueryJobRunner::new(Arc::new(engine));
    let sink = open_sink(format, output)?;

    let (job_id, status) = runner.run(kind, spec, sink).await;
    match status {
        JobStatus::Success { num_rows } => {
            info!(job_id = %job_id, num_rows, "Query finished");
            Ok(num_rows)
        }
        JobStatus::Failed { message } => {
            discard(output);
            bail!("{} query failed: {}", kind.as_str(), message)
        }
        JobStatus::Timeout => {
            discard(output);
            bail!("{} query timed out after {:?}", kind.as_str(), timeout)
        }
        JobStatus::Queued | JobStatus::Running => {
            bail!("{} query did not finish", kind.as_str())
        }
    }
}

fn open_sink(format: OutputFormat, output: Option<&Path>) -> Result<Box<dyn RowSink + Send>> {
    let sink: Box<dyn RowSink + Send> = match (format, output) {
        (OutputFormat::Csv, Some(path)) => Box::new(CsvSink::new(create(path)?)),
        (OutputFormat::Jsonl, Some(path)) => Box::new(JsonLinesSink::new(BufWriter::new(create(path)?))),
        (OutputFormat::Csv, None) => Box::new(CsvSink::new(std::io::stdout())),
        (OutputFormat::Jsonl, None) => Box::new(JsonLinesSink::new(BufWriter::new(std::io::stdout()))),
    };
    Ok(sink)
}

fn create(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("creating {}", path.display()))
}

fn discard(output: Option<&Path>) {
    if let Some(path) = output {
        let _ = std::fs::remove_file(path);
    }
}

/// Read a query specification; no path means an empty specification.
pub fn read_spec(path: Option<&Path>) -> Result<Value> {
    let contents = match path {
        None => return Ok(Value::Object(Default::default())),
        Some(p) if p == Path::new("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading query from stdin")?;
            buf
        }
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("reading query {}", p.display()))?,
    };
    serde_json::from_str(&contents).context("parsing query specification")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::*;
    use forecast_core::{NewPrediction, NewVersion, PredictionPayload, Scalar};

    fn loaded_hub(dir: &Path) -> Hub {
        let hub = Hub::open(&config_in(dir)).unwrap();
        let model = hub.catalog.model_by_abbreviation("docs_mod").unwrap().id;
        let oracle = hub.catalog.model_by_abbreviation("oracle").unwrap().id;
        let tp = hub.catalog.time_point_by_date("2011-10-02").unwrap().id;
        let unit = hub.catalog.unit_by_abbreviation("loc1").unwrap().id;
        let target = hub.catalog.target_by_name("pct next week").unwrap().id;
        let issued_at = forecast_query::parse_as_of("2011-10-01T00:00:00Z").unwrap();

        for (model, value) in [(model, 2.5), (oracle, 3.0)] {
            let version = hub
                .store
                .create_version(NewVersion::new(model, tp, issued_at))
                .unwrap();
            let point = PredictionPayload::Point {
                value: Scalar::Float(value),
            };
            hub.store
                .load_predictions(
                    version.id,
                    &hub.catalog,
                    vec![NewPrediction::data(unit, target, point)],
                )
                .unwrap();
        }
        hub
    }

    #[test]
    fn test_read_spec() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_spec(None).unwrap(), serde_json::json!({}));

        let path = write(dir.path(), "q.json", r#"{"units": ["loc1"]}"#);
        assert_eq!(
            read_spec(Some(&path)).unwrap(),
            serde_json::json!({"units": ["loc1"]})
        );

        let bad = write(dir.path(), "bad.json", "{units");
        assert!(read_spec(Some(&bad)).is_err());
    }

    #[tokio::test]
    async fn test_forecast_query_to_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let hub = loaded_hub(dir.path());
        let out = dir.path().join("rows.csv");

        let rows = run_query(
            &hub,
            QueryKind::Forecasts,
            serde_json::json!({}),
            QueryConfig::default(),
            OutputFormat::Csv,
            Some(&out),
        )
        .await
        .unwrap();
        assert_eq!(rows, 1);

        let written = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("docs_mod,2011-10-02,2011-2012,loc1,pct next week,point,2.5,"));
    }

    #[tokio::test]
    async fn test_truth_query_to_jsonl_file() {
        let dir = tempfile::tempdir().unwrap();
        let hub = loaded_hub(dir.path());
        let out = dir.path().join("truth.jsonl");

        run_query(
            &hub,
            QueryKind::Truth,
            serde_json::json!({}),
            QueryConfig::default(),
            OutputFormat::Jsonl,
            Some(&out),
        )
        .await
        .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(
            written,
            "{\"time_point\":\"2011-10-02\",\"unit\":\"loc1\",\"target\":\"pct next week\",\"value\":\"3.0\"}\n"
        );
    }

    #[tokio::test]
    async fn test_failed_query_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let hub = loaded_hub(dir.path());
        let out = dir.path().join("rows.csv");

        let err = run_query(
            &hub,
            QueryKind::Forecasts,
            serde_json::json!({"models": ["nobody"]}),
            QueryConfig::default(),
            OutputFormat::Csv,
            Some(&out),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("forecasts query failed"));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_row_cap_reported() {
        let dir = tempfile::tempdir().unwrap();
        let hub = loaded_hub(dir.path());
        let out = dir.path().join("rows.csv");

        let err = run_query(
            &hub,
            QueryKind::Forecasts,
            serde_json::json!({}),
            QueryConfig::new().with_max_rows(0),
            OutputFormat::Csv,
            Some(&out),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("result too large"));
    }
}
