//! Fixture CSV input and JSON document streams.
//!
//! The fixture side guesses the field separator from the file extension and
//! decodes every cell with the requested `encoding_rs` encoding. The document
//! side reads NDJSON (or one JSON array) and writes NDJSON. A path of `-`
//! means stdin or stdout.

use std::{
    borrow::Cow,
    ffi::OsStr,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use serde_json::Value;

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

/// Fixture encoding by WHATWG label (`latin1`, `utf-16le`, ...). UTF-8 when
/// no label is given.
pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    let Some(label) = label.map(str::trim) else {
        return Ok(UTF_8);
    };
    Encoding::for_label_no_replacement(label.as_bytes())
        .with_context(|| format!("Unknown input encoding '{label}'"))
}

/// Separator for a fixture file: the explicit one, else tab for `.tsv`/`.tab`,
/// pipe for `.psv`, comma otherwise.
pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    if let Some(delimiter) = provided {
        return delimiter;
    }
    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("tsv" | "tab") => b'\t',
        Some("psv") => b'|',
        _ => b',',
    }
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if is_dash(path) {
        Ok(Box::new(std::io::stdin().lock()))
    } else {
        Ok(Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        )))
    }
}

/// Reads a fixture CSV into its decoded header row and data rows. Rows are
/// numbered from 2 in errors, the header being row 1.
pub fn read_csv_table(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(open_input(path)?);
    let headers = reader
        .byte_headers()
        .with_context(|| format!("Reading headers of {path:?}"))?;
    let headers = decode_cells(headers, encoding)
        .with_context(|| format!("Decoding headers of {path:?}"))?;
    let rows = reader
        .byte_records()
        .enumerate()
        .map(|(idx, record)| {
            let row = idx + 2;
            let record = record.with_context(|| format!("Reading row {row} in {path:?}"))?;
            decode_cells(&record, encoding)
                .with_context(|| format!("Decoding row {row} in {path:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((headers, rows))
}

fn decode_cells(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .enumerate()
        .map(|(column, bytes)| {
            encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(Cow::into_owned)
                .ok_or_else(|| anyhow!("Column {} is not valid {}", column + 1, encoding.name()))
        })
        .collect()
}

/// Parses documents from NDJSON text, or from a single top-level JSON array.
pub fn parse_documents(text: &str) -> Result<Vec<Value>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let parsed: Value = serde_json::from_str(trimmed).context("Parsing JSON array")?;
        if let Value::Array(items) = parsed {
            return Ok(items);
        }
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("Parsing JSON on line {}", idx + 1))
        })
        .collect()
}

pub fn read_documents(path: &Path) -> Result<Vec<Value>> {
    let mut text = String::new();
    open_input(path)?
        .read_to_string(&mut text)
        .with_context(|| format!("Reading documents from {path:?}"))?;
    parse_documents(&text).with_context(|| format!("Parsing documents in {path:?}"))
}

pub fn write_documents(path: Option<&Path>, documents: &[Value]) -> Result<()> {
    let mut writer: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout().lock()),
    };
    for doc in documents {
        serde_json::to_writer(&mut writer, doc).context("Serializing document")?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn delimiter_follows_extension_unless_provided() {
        assert_eq!(resolve_input_delimiter(&PathBuf::from("rows.TSV"), None), b'\t');
        assert_eq!(resolve_input_delimiter(&PathBuf::from("rows.psv"), None), b'|');
        assert_eq!(resolve_input_delimiter(&PathBuf::from("rows.csv"), None), b',');
        assert_eq!(resolve_input_delimiter(&PathBuf::from("rows"), None), b',');
        assert_eq!(resolve_input_delimiter(&PathBuf::from("rows.tsv"), Some(b';')), b';');
    }

    #[test]
    fn undecodable_cells_name_row_and_column() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("orders.csv");
        std::fs::write(&path, b"orderId,name\nA,Ann\nB,Ren\xe9\n").unwrap();

        let err = read_csv_table(&path, b',', UTF_8).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Decoding row 3"), "{message}");
        assert!(message.contains("Column 2 is not valid UTF-8"), "{message}");

        let latin1 = resolve_encoding(Some(" latin1 ")).unwrap();
        let (headers, rows) = read_csv_table(&path, b',', latin1).unwrap();
        assert_eq!(headers, ["orderId", "name"]);
        assert_eq!(rows[1], ["B", "René"]);
    }

    #[test]
    fn documents_parse_from_ndjson_or_array() {
        let ndjson = "{\"a\":1}\n\n{\"a\":2}\n";
        assert_eq!(parse_documents(ndjson).unwrap(), vec![json!({"a":1}), json!({"a":2})]);
        let array = " [{\"a\":1},{\"a\":2}]";
        assert_eq!(parse_documents(array).unwrap().len(), 2);
        let err = parse_documents("{\"a\":1}\nnot json\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        assert!(resolve_encoding(Some("latin1")).is_ok());
        assert!(resolve_encoding(Some("klingon")).is_err());
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
    }
}
