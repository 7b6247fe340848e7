pub mod builder;
pub mod cli;
pub mod compare;
pub mod error;
pub mod fixture;
pub mod io_utils;
pub mod mapping;
pub mod naming;
pub mod reconcile;
pub mod report;
pub mod schema;
pub mod store;
pub mod validate;

use std::{env, fs, path::Path, sync::OnceLock, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    builder::FlatRow,
    cli::{Cli, Commands},
    fixture::IsolationSuffix,
    mapping::FieldMappingTable,
    naming::NamingRule,
    reconcile::{MatchKey, ReconcileOptions, Reconciler, StoreOptions},
    schema::Schema,
    store::{JsonDirStore, RecordStore},
    validate::Validator,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("pipeline_reconcile", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => handle_build(&args),
        Commands::Transcode(args) => handle_transcode(&args),
        Commands::Mapping(args) => handle_mapping(&args),
        Commands::Verify(args) => handle_verify(&args),
        Commands::Roundtrip(args) => handle_roundtrip(&args),
    }
}

fn load_schema(path: &Path) -> Result<Schema> {
    schema::load_schema(path).with_context(|| format!("Loading schema from {path:?}"))
}

fn load_fixture(args: &cli::FixtureArgs, schema: &Schema) -> Result<Vec<FlatRow>> {
    info!(
        "Reading fixture '{}' with delimiter '{}'",
        args.fixture.display(),
        printable_delimiter(io_utils::resolve_input_delimiter(
            &args.fixture,
            args.delimiter
        ))
    );
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let mut rows = fixture::read_fixture(&args.fixture, schema, args.delimiter, encoding)?;
    if let Some(field) = &args.suffix_field {
        let suffix = match &args.suffix {
            Some(suffix) => IsolationSuffix::new(field, suffix.clone())?,
            None => IsolationSuffix::timestamped(field)?,
        };
        debug!("Suffixing '{field}' with '_{}'", suffix.suffix);
        suffix.apply_all(&mut rows)?;
    }
    Ok(rows)
}

fn load_mapping(
    mapping: Option<&Path>,
    schema: Option<&Schema>,
    rule: NamingRule,
) -> Result<FieldMappingTable> {
    match (mapping, schema) {
        (Some(path), _) => FieldMappingTable::load(path)
            .with_context(|| format!("Loading field mappings from {path:?}")),
        (None, Some(schema)) => {
            debug!("Deriving field mappings from schema '{}'", schema.name);
            Ok(FieldMappingTable::derive(schema, rule)?)
        }
        (None, None) => bail!("Either a mapping table or a schema is required"),
    }
}

fn handle_build(args: &cli::BuildArgs) -> Result<()> {
    let schema = load_schema(&args.fixture.schema)?;
    let rows = load_fixture(&args.fixture, &schema)?;
    let mut documents = reconcile::prepare_sources(&rows, &schema)
        .with_context(|| format!("Building records from {:?}", args.fixture.fixture))?;
    if let Some(rule) = args.rule {
        documents = documents
            .iter()
            .map(|doc| naming::transcode(doc, rule))
            .collect::<error::Result<Vec<_>>>()
            .with_context(|| format!("Renaming keys with rule {rule}"))?;
    }
    io_utils::write_documents(args.output.as_deref(), &documents)?;
    info!(
        "Built {} record(s) against schema '{}'",
        documents.len(),
        schema.name
    );
    Ok(())
}

fn handle_transcode(args: &cli::TranscodeArgs) -> Result<()> {
    let documents = io_utils::read_documents(&args.input)?;
    let renamed = documents
        .iter()
        .enumerate()
        .map(|(idx, doc)| {
            naming::transcode(doc, args.rule)
                .with_context(|| format!("Renaming keys of document {}", idx + 1))
        })
        .collect::<Result<Vec<_>>>()?;
    io_utils::write_documents(args.output.as_deref(), &renamed)?;
    info!(
        "Renamed keys of {} document(s) with rule {}",
        renamed.len(),
        args.rule
    );
    Ok(())
}

fn handle_mapping(args: &cli::MappingArgs) -> Result<()> {
    let schema = match &args.schema {
        Some(path) => Some(load_schema(path)?),
        None => None,
    };
    let table = load_mapping(args.check.as_deref(), schema.as_ref(), args.rule)?;
    let rendered = table.to_string();
    match args.output.as_deref() {
        Some(path) if !io_utils::is_dash(path) => {
            fs::write(path, rendered).with_context(|| format!("Writing mapping to {path:?}"))?
        }
        _ => print!("{rendered}"),
    }
    info!("Mapping table has {} entry(ies)", table.entries().len());
    Ok(())
}

fn handle_verify(args: &cli::VerifyArgs) -> Result<()> {
    let schema = match &args.schema {
        Some(path) => Some(load_schema(path)?),
        None => None,
    };
    let table = load_mapping(args.mapping.as_deref(), schema.as_ref(), args.rule)?;
    let expected = io_utils::read_documents(&args.expected)?;
    let actual = io_utils::read_documents(&args.actual)?;
    info!(
        "Verifying {} document(s) against {} retrieved document(s)",
        expected.len(),
        actual.len()
    );
    let match_key = args
        .match_key
        .as_deref()
        .map(|key| MatchKey::renamed(key, args.rule));
    let validator = Validator::new(args.compare.comparator());
    let records = reconcile::pair_and_validate(
        &expected,
        actual,
        &table,
        &validator,
        match_key.as_ref(),
    )?;
    let report = reconcile::ReconcileReport {
        insert: store::InsertReport::default(),
        records,
    };
    print!(
        "{}",
        report::render_reconcile(&report, args.compare.failures_only)
    );
    report.into_result()?;
    Ok(())
}

fn handle_roundtrip(args: &cli::RoundtripArgs) -> Result<()> {
    let schema = load_schema(&args.fixture.schema)?;
    let table = load_mapping(args.mapping.as_deref(), Some(&schema), args.rule)?;
    let rows = load_fixture(&args.fixture, &schema)?;

    let mut store = JsonDirStore::open(&args.store_dir)
        .with_context(|| format!("Opening store directory {:?}", args.store_dir))?;
    if args.create_table && !store.table_exists(&args.target)? {
        info!("Creating table {}", args.target);
        store.create_table(&args.target)?;
    }

    let options = ReconcileOptions {
        rule: args.rule,
        validator: Validator::new(args.compare.comparator()),
        store: StoreOptions {
            settle_delay: Duration::from_millis(args.settle_ms),
            timeout: Duration::from_millis(args.timeout_ms),
            poll_interval: Duration::from_millis(args.poll_ms),
        },
        match_key: roundtrip_match_key(args),
    };
    let report = Reconciler::new(&schema, &table, &mut store, options)
        .run(&args.target, &rows)
        .with_context(|| format!("Round trip through {}", args.target))?;
    print!(
        "{}",
        report::render_reconcile(&report, args.compare.failures_only)
    );
    report.into_result()?;
    Ok(())
}

/// `--match-key`, else a top-level `--suffix-field`, whose suffixed values
/// are unique to this run.
fn roundtrip_match_key(args: &cli::RoundtripArgs) -> Option<MatchKey> {
    let key = args.match_key.as_deref().or_else(|| {
        args.fixture
            .suffix_field
            .as_deref()
            .filter(|field| !field.contains(['.', '[']))
    })?;
    if args.match_key.is_none() {
        info!("Pairing retrieved rows by suffix field {key}");
    }
    Some(MatchKey::renamed(key, args.rule))
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
