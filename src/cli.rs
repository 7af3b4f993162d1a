use clap::{Parser, Subcommand, ValueEnum};
use oplog::codec::{BincodeCodec, Codec, JsonCodec};
use oplog::config::Config;
use oplog::error::{Error, Result};
use oplog::storage::read_records;
use oplog::{logger, sha256_digest, StateChange};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "oplog")]
#[command(about = "Inspect persisted operation logs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: "human" or "json"
    #[arg(short, long, default_value = "human")]
    pub format: String,

    /// Log file path (defaults to OPLOG_PATH or .oplog/ops.log)
    #[arg(long)]
    pub file: Option<String>,

    /// Record codec the log was written with
    #[arg(long, value_enum, default_value_t = CodecKind::Json)]
    pub codec: CodecKind,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CodecKind {
    Json,
    Bincode,
}

impl CodecKind {
    fn codec(self) -> Box<dyn Codec> {
        match self {
            CodecKind::Json => Box::new(JsonCodec),
            CodecKind::Bincode => Box::new(BincodeCodec),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print every record in the log
    Inspect,

    /// Check framing, checksums and decoding of every record
    Verify,

    /// Show record counts, size and content digest
    Stats,
}

#[derive(Debug, Serialize)]
struct RecordView {
    offset: u64,
    key: String,
    params: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct VerifyReport {
    records: u64,
    bytes: u64,
}

#[derive(Debug, Serialize)]
struct StatsReport {
    path: String,
    records: u64,
    bytes: u64,
    sha256: String,
    keys: BTreeMap<String, u64>,
}

/// Format output based on format type
fn format_output<T: Serialize + std::fmt::Debug>(data: &T, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(data)
            .map_err(|e| Error::Encode(format!("Failed to serialize JSON: {}", e))),
        _ => Ok(format!("{:#?}", data)),
    }
}

/// Walk the log, decoding each record and handing it to `visit`.
fn for_each_record<F>(path: &Path, config: &Config, codec: &dyn Codec, mut visit: F) -> Result<u64>
where
    F: FnMut(u64, StateChange) -> Result<()>,
{
    let mut count = 0;
    for record in read_records(path, config.max_record_size)? {
        let (offset, payload) = record?;
        let change = codec.decode(&payload).map_err(|e| Error::Decode {
            offset,
            reason: e.to_string(),
        })?;
        visit(offset, change)?;
        count += 1;
    }
    Ok(count)
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(file) = cli.file {
        config.set_log_path(PathBuf::from(file));
    }
    logger::init(config.get_log_level());

    let path = config.get_log_path().clone();
    let codec = cli.codec.codec();

    match cli.command {
        Commands::Inspect => {
            for_each_record(&path, &config, codec.as_ref(), |offset, change| {
                let view = RecordView {
                    offset,
                    key: change.key,
                    params: change.params,
                };
                if cli.format == "json" {
                    let line = serde_json::to_string(&view).map_err(|e| {
                        Error::Encode(format!("Failed to serialize record at offset {}: {}", offset, e))
                    })?;
                    println!("{}", line);
                } else {
                    let params: Vec<String> = view.params.iter().map(|p| p.to_string()).collect();
                    println!("{:>10}  {}({})", view.offset, view.key, params.join(", "));
                }
                Ok(())
            })?;
        }

        Commands::Verify => {
            let records = for_each_record(&path, &config, codec.as_ref(), |_, _| Ok(()))?;
            let bytes = fs::metadata(&path)
                .map_err(|e| Error::Io {
                    context: format!("Failed to stat {}", path.display()),
                    source: e,
                })?
                .len();
            let report = VerifyReport { records, bytes };
            if cli.format == "json" {
                println!("{}", format_output(&report, "json")?);
            } else {
                println!("OK: {} records, {} bytes", records, bytes);
            }
        }

        Commands::Stats => {
            let mut keys: BTreeMap<String, u64> = BTreeMap::new();
            let records = for_each_record(&path, &config, codec.as_ref(), |_, change| {
                *keys.entry(change.key).or_insert(0) += 1;
                Ok(())
            })?;
            let contents = fs::read(&path).map_err(|e| Error::Io {
                context: format!("Failed to read {}", path.display()),
                source: e,
            })?;
            let report = StatsReport {
                path: path.display().to_string(),
                records,
                bytes: contents.len() as u64,
                sha256: hex::encode(sha256_digest(&contents)),
                keys,
            };
            println!("{}", format_output(&report, &cli.format)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oplog::{state_change, Log};
    use tempfile::TempDir;

    fn write_log(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("ops.log");
        let log = Log::open(&path, Vec::<StateChange>::new, JsonCodec).unwrap();
        log.add(&state_change!("append", 1)).unwrap();
        log.add(&state_change!("append", 2)).unwrap();
        path
    }

    #[test]
    fn test_for_each_record_visits_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir);
        let config = Config::with_log_path(&path);

        let mut seen = Vec::new();
        let count = for_each_record(&path, &config, &JsonCodec, |_, change| {
            seen.push(change);
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen, vec![state_change!("append", 1), state_change!("append", 2)]);
    }

    #[test]
    fn test_visitor_error_stops_the_walk() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir);
        let config = Config::with_log_path(&path);

        let mut visited = 0;
        let err = for_each_record(&path, &config, &JsonCodec, |offset, _| {
            visited += 1;
            Err(Error::Encode(format!("Failed to serialize record at offset {}", offset)))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Encode(ref m) if m.ends_with("offset 0")));
        assert_eq!(visited, 1);
    }
}
