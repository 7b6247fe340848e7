use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    compare::{Comparator, DEFAULT_TOLERANCE, ObjectPolicy},
    naming::NamingRule,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Build, store and reconcile structured records across naming conventions",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build schema-shaped records from a fixture CSV and write them as NDJSON
    Build(BuildArgs),
    /// Rename the keys of NDJSON documents under a naming rule
    Transcode(TranscodeArgs),
    /// Derive a field-mapping table from a schema, or check an existing one
    Mapping(MappingArgs),
    /// Validate stored documents against their source records
    Verify(VerifyArgs),
    /// Insert fixture records into a JSON directory store and verify them on the way back
    Roundtrip(RoundtripArgs),
}

#[derive(Debug, Args)]
pub struct FixtureArgs {
    /// Schema file (.avsc/.json Avro schema, or .yml native schema)
    #[arg(short, long)]
    pub schema: PathBuf,
    /// Fixture CSV whose headers are field paths such as `items[0].quantity`
    #[arg(short = 'i', long = "fixture")]
    pub fixture: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the fixture file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// String field that receives an isolation suffix, e.g. `orderId`
    #[arg(long = "suffix-field")]
    pub suffix_field: Option<String>,
    /// Suffix appended to the suffix field (defaults to epoch milliseconds)
    #[arg(long, requires = "suffix_field")]
    pub suffix: Option<String>,
}

#[derive(Debug, Args)]
pub struct CompareArgs {
    /// Absolute tolerance for numeric comparisons
    #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: f64,
    /// Treat nested objects as equal once their fields have been walked
    #[arg(long = "lenient-objects")]
    pub lenient_objects: bool,
    /// Only print failing assertions
    #[arg(long = "failures-only")]
    pub failures_only: bool,
}

impl CompareArgs {
    pub fn comparator(&self) -> Comparator {
        Comparator {
            tolerance: self.tolerance,
            object_policy: if self.lenient_objects {
                ObjectPolicy::Lenient
            } else {
                ObjectPolicy::Strict
            },
        }
    }
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub fixture: FixtureArgs,
    /// Also rename keys into the store convention before writing
    #[arg(long, value_parser = parse_rule)]
    pub rule: Option<NamingRule>,
    /// Output NDJSON file (stdout if omitted or '-')
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TranscodeArgs {
    /// Input NDJSON or JSON array file ('-' for stdin)
    #[arg(short, long)]
    pub input: PathBuf,
    /// Naming rule (preserve, camel-to-snake, camel-to-kebab, snake-to-camel)
    #[arg(long, value_parser = parse_rule, default_value = "camel-to-snake")]
    pub rule: NamingRule,
    /// Output NDJSON file (stdout if omitted or '-')
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct MappingArgs {
    /// Schema to derive the mapping table from
    #[arg(short, long, required_unless_present = "check", conflicts_with = "check")]
    pub schema: Option<PathBuf>,
    /// Existing mapping table to parse and print in normalized form
    #[arg(long)]
    pub check: Option<PathBuf>,
    /// Naming rule used when deriving target names
    #[arg(long, value_parser = parse_rule, default_value = "camel-to-snake")]
    pub rule: NamingRule,
    /// Output file (stdout if omitted or '-')
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Source documents (NDJSON or JSON array)
    #[arg(short, long)]
    pub expected: PathBuf,
    /// Documents retrieved from the store (NDJSON or JSON array)
    #[arg(short, long)]
    pub actual: PathBuf,
    /// Field-mapping table file
    #[arg(short, long, required_unless_present = "schema")]
    pub mapping: Option<PathBuf>,
    /// Schema to derive the mapping table from when --mapping is omitted
    #[arg(short, long)]
    pub schema: Option<PathBuf>,
    /// Naming rule used for derived tables and match keys
    #[arg(long, value_parser = parse_rule, default_value = "camel-to-snake")]
    pub rule: NamingRule,
    /// Source field used to pair documents (positional pairing if omitted)
    #[arg(long = "match-key")]
    pub match_key: Option<String>,
    #[command(flatten)]
    pub compare: CompareArgs,
}

#[derive(Debug, Args)]
pub struct RoundtripArgs {
    #[command(flatten)]
    pub fixture: FixtureArgs,
    /// Field-mapping table file (derived from the schema if omitted)
    #[arg(short, long)]
    pub mapping: Option<PathBuf>,
    /// Directory holding one `<table>.jsonl` file per table
    #[arg(long = "store-dir")]
    pub store_dir: PathBuf,
    /// Target table in `dataset.table` or `project.dataset.table` form
    #[arg(short, long)]
    pub target: String,
    /// Create the target table if it does not exist
    #[arg(long = "create-table")]
    pub create_table: bool,
    #[arg(long, value_parser = parse_rule, default_value = "camel-to-snake")]
    pub rule: NamingRule,
    /// Source field used to pair retrieved documents (defaults to a top-level --suffix-field)
    #[arg(long = "match-key")]
    pub match_key: Option<String>,
    /// Milliseconds to wait after insert before querying
    #[arg(long = "settle-ms", default_value_t = 0)]
    pub settle_ms: u64,
    /// Milliseconds to keep polling for inserted rows
    #[arg(long = "timeout-ms", default_value_t = 30_000)]
    pub timeout_ms: u64,
    #[arg(long = "poll-ms", default_value_t = 500)]
    pub poll_ms: u64,
    #[command(flatten)]
    pub compare: CompareArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_rule(value: &str) -> Result<NamingRule, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn delimiter_names_are_accepted() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter(";"), Ok(b';'));
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn lenient_flag_selects_object_policy() {
        let cli = Cli::parse_from([
            "pipeline-reconcile",
            "verify",
            "-e",
            "a.ndjson",
            "-a",
            "b.ndjson",
            "-m",
            "mapping.properties",
            "--lenient-objects",
            "--tolerance",
            "0.5",
        ]);
        let Commands::Verify(args) = cli.command else {
            panic!("expected verify");
        };
        let comparator = args.compare.comparator();
        assert_eq!(comparator.object_policy, ObjectPolicy::Lenient);
        assert_eq!(comparator.tolerance, 0.5);
        assert_eq!(args.rule, NamingRule::default());
    }
}
