//! Field-mapping tables.
//!
//! A table says which field of the source document corresponds to which field
//! of the target document, scope by scope. The textual form is line-oriented:
//!
//! ```text
//! # root fields
//! orderId=order_id
//! customer={customerId=customer_id,name=name}
//! shippingAddress=shipping_address:{street=street,zipCode=zip_code}
//! items=[productId=product_id,quantity=quantity]
//! ```
//!
//! `{…}` declares an object scope and `[…]` an array-of-record scope. A
//! `target:` prefix renames the container itself; without it the container key
//! is the same on both sides. Scopes may nest.

use std::{collections::HashSet, fmt, fs, path::Path};

use log::debug;

use crate::{
    error::{ReconcileError, Result},
    naming::NamingRule,
    schema::{FieldKind, Schema},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPair {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Object,
    Array,
}

impl ScopeKind {
    fn delimiters(&self) -> (char, char) {
        match self {
            ScopeKind::Object => ('{', '}'),
            ScopeKind::Array => ('[', ']'),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub source: String,
    pub target: String,
    pub kind: ScopeKind,
    pub entries: Vec<MappingEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingEntry {
    Field(FieldPair),
    Scope(Scope),
}

impl MappingEntry {
    pub fn field(source: impl Into<String>, target: impl Into<String>) -> Self {
        MappingEntry::Field(FieldPair {
            source: source.into(),
            target: target.into(),
        })
    }

    pub fn scope(
        source: impl Into<String>,
        target: impl Into<String>,
        kind: ScopeKind,
        entries: Vec<MappingEntry>,
    ) -> Self {
        MappingEntry::Scope(Scope {
            source: source.into(),
            target: target.into(),
            kind,
            entries,
        })
    }

    pub fn source(&self) -> &str {
        match self {
            MappingEntry::Field(pair) => &pair.source,
            MappingEntry::Scope(scope) => &scope.source,
        }
    }
}

/// Plain field pairs of a scope, in declaration order.
pub fn fields_of(entries: &[MappingEntry]) -> impl Iterator<Item = &FieldPair> {
    entries.iter().filter_map(|entry| match entry {
        MappingEntry::Field(pair) => Some(pair),
        MappingEntry::Scope(_) => None,
    })
}

/// Nested scopes of a scope, in declaration order.
pub fn scopes_of(entries: &[MappingEntry]) -> impl Iterator<Item = &Scope> {
    entries.iter().filter_map(|entry| match entry {
        MappingEntry::Scope(scope) => Some(scope),
        MappingEntry::Field(_) => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldMappingTable {
    entries: Vec<MappingEntry>,
}

impl FieldMappingTable {
    pub fn new(entries: Vec<MappingEntry>) -> Result<Self> {
        check_entries(&entries, "root")?;
        Ok(FieldMappingTable { entries })
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn root_fields(&self) -> impl Iterator<Item = &FieldPair> {
        fields_of(&self.entries)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        scopes_of(&self.entries)
    }

    pub fn scope(&self, source: &str) -> Option<&Scope> {
        self.scopes().find(|scope| scope.source == source)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry = LineParser::new(line, idx + 1).parse_line()?;
            entries.push(entry);
        }
        let table = FieldMappingTable::new(entries)?;
        debug!(
            "Parsed mapping table with {} root field(s) and {} scope(s)",
            table.root_fields().count(),
            table.scopes().count()
        );
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| ReconcileError::io(path, err))?;
        FieldMappingTable::parse(&text)
    }

    /// Generates the table implied by a schema and the rule used to rename
    /// its fields on the way into the store. Records without fields have
    /// nothing to compare and are left out.
    pub fn derive(schema: &Schema, rule: NamingRule) -> Result<Self> {
        FieldMappingTable::new(derive_entries(schema, rule))
    }
}

fn derive_entries(schema: &Schema, rule: NamingRule) -> Vec<MappingEntry> {
    schema
        .fields
        .iter()
        .filter_map(|field| {
            let target = rule.apply(&field.name).into_owned();
            let (sub, kind) = match &field.kind {
                FieldKind::Record(sub) => (sub, ScopeKind::Object),
                FieldKind::Array(element) => match element.as_ref() {
                    FieldKind::Record(sub) => (sub, ScopeKind::Array),
                    _ => return Some(MappingEntry::field(field.name.clone(), target)),
                },
                FieldKind::Scalar(_) => {
                    return Some(MappingEntry::field(field.name.clone(), target));
                }
            };
            let entries = derive_entries(sub, rule);
            if entries.is_empty() {
                debug!("Skipping '{}': record declares no fields", field.name);
                return None;
            }
            Some(MappingEntry::scope(field.name.clone(), target, kind, entries))
        })
        .collect()
}

fn check_entries(entries: &[MappingEntry], scope: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.source()) {
            return Err(ReconcileError::mapping_in_scope(
                scope,
                format!("source key '{}' is mapped more than once", entry.source()),
            ));
        }
        if let MappingEntry::Scope(nested) = entry {
            if nested.entries.is_empty() {
                return Err(ReconcileError::mapping_in_scope(
                    nested.source.as_str(),
                    "scope declares no field mappings",
                ));
            }
            check_entries(&nested.entries, &nested.source)?;
        }
    }
    Ok(())
}

struct LineParser<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> LineParser<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        LineParser { text, pos: 0, line }
    }

    fn error(&self, message: impl Into<String>) -> ReconcileError {
        ReconcileError::mapping_at_line(self.line, message)
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(ch) = self.peek() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Reads up to the next structural character and returns the trimmed text.
    fn token(&mut self) -> &'a str {
        let text: &'a str = self.text;
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if matches!(ch, '=' | ',' | ':' | '{' | '}' | '[' | ']') {
                break;
            }
            self.bump();
        }
        text[start..self.pos].trim()
    }

    fn parse_line(mut self) -> Result<MappingEntry> {
        let entry = self.parse_entry()?;
        self.skip_whitespace();
        match self.peek() {
            None => Ok(entry),
            Some(ch @ ('}' | ']')) => Err(self.error(format!("unbalanced '{ch}'"))),
            Some(_) => Err(self.error(format!(
                "unexpected text after mapping for '{}': '{}'",
                entry.source(),
                &self.text[self.pos..]
            ))),
        }
    }

    fn parse_entry(&mut self) -> Result<MappingEntry> {
        let source = self.token();
        if self.peek() != Some('=') {
            return Err(self.error(if source.is_empty() {
                "missing '=' in mapping entry".to_string()
            } else {
                format!("missing '=' after '{source}'")
            }));
        }
        if source.is_empty() {
            return Err(self.error("mapping entry has an empty source key"));
        }
        self.bump();
        self.skip_whitespace();

        if let Some(open @ ('{' | '[')) = self.peek() {
            return self.parse_scope(source, source, open);
        }
        let target = self.token();
        if target.is_empty() {
            return Err(self.error(format!("'{source}' has an empty target")));
        }
        match self.peek() {
            Some(':') => {
                self.bump();
                self.skip_whitespace();
                match self.peek() {
                    Some(open @ ('{' | '[')) => self.parse_scope(source, target, open),
                    _ => Err(self.error(format!(
                        "expected '{{' or '[' after '{source}={target}:'"
                    ))),
                }
            }
            Some(open @ ('{' | '[')) => Err(self.error(format!(
                "missing ':' between container '{target}' and '{open}'"
            ))),
            _ => Ok(MappingEntry::field(source, target)),
        }
    }

    fn parse_scope(&mut self, source: &str, target: &str, open: char) -> Result<MappingEntry> {
        let kind = if open == '{' {
            ScopeKind::Object
        } else {
            ScopeKind::Array
        };
        let (_, close) = kind.delimiters();
        self.bump();
        let mut entries = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) && entries.is_empty() {
                return Err(self.error(format!("scope '{source}' declares no field mappings")));
            }
            entries.push(self.parse_entry()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.bump(),
                Some(ch) if ch == close => {
                    self.bump();
                    break;
                }
                Some(ch @ ('}' | ']')) => {
                    return Err(self.error(format!(
                        "mismatched '{ch}' in scope '{source}' (expected '{close}')"
                    )));
                }
                None => {
                    return Err(self.error(format!("unclosed '{open}' in scope '{source}'")));
                }
                Some(other) => {
                    return Err(self.error(format!("unexpected '{other}' in scope '{source}'")));
                }
            }
        }
        Ok(MappingEntry::scope(source, target, kind, entries))
    }
}

impl fmt::Display for MappingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingEntry::Field(pair) => write!(f, "{}={}", pair.source, pair.target),
            MappingEntry::Scope(scope) => {
                write!(f, "{}=", scope.source)?;
                if scope.target != scope.source {
                    write!(f, "{}:", scope.target)?;
                }
                let (open, close) = scope.kind.delimiters();
                write!(f, "{open}")?;
                for (idx, entry) in scope.entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{entry}")?;
                }
                write!(f, "{close}")
            }
        }
    }
}

impl fmt::Display for FieldMappingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_MAPPINGS: &str = "\
# order fields
orderId=order_id
customer={customerId=customer_id,name=name}
shippingAddress=shipping_address:{street=street, zipCode=zip_code}

items=[productId=product_id,quantity=quantity]
totalAmount=total_amount
";

    fn line_of(err: ReconcileError) -> Option<usize> {
        match err {
            ReconcileError::MappingConfig { line, .. } => line,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn parses_root_fields_and_scopes_in_order() {
        let table = FieldMappingTable::parse(ORDER_MAPPINGS).expect("parse");
        let root: Vec<_> = table
            .root_fields()
            .map(|p| (p.source.as_str(), p.target.as_str()))
            .collect();
        assert_eq!(
            root,
            vec![("orderId", "order_id"), ("totalAmount", "total_amount")]
        );

        let address = table.scope("shippingAddress").unwrap();
        assert_eq!(address.target, "shipping_address");
        assert_eq!(address.kind, ScopeKind::Object);
        assert_eq!(
            address.entries[1],
            MappingEntry::field("zipCode", "zip_code")
        );

        let items = table.scope("items").unwrap();
        assert_eq!(items.kind, ScopeKind::Array);
        assert_eq!(items.target, "items");
        assert_eq!(table.scope("customer").unwrap().entries.len(), 2);
    }

    #[test]
    fn nested_scopes_parse_recursively() {
        let table = FieldMappingTable::parse(
            "items=line_items:[sku=sku,dimensions={widthCm=width_cm},parts=[partNo=part_no]]",
        )
        .unwrap();
        let items = table.scope("items").unwrap();
        assert_eq!(items.target, "line_items");
        let nested: Vec<_> = scopes_of(&items.entries).collect();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0].kind, ScopeKind::Object);
        assert_eq!(nested[1].kind, ScopeKind::Array);
        assert_eq!(nested[1].entries, vec![MappingEntry::field("partNo", "part_no")]);
    }

    #[test]
    fn display_renders_parseable_text() {
        let table = FieldMappingTable::parse(ORDER_MAPPINGS).unwrap();
        let rendered = table.to_string();
        assert!(rendered.contains("shippingAddress=shipping_address:{street=street,zipCode=zip_code}"));
        assert!(rendered.contains("items=[productId=product_id,quantity=quantity]"));
        assert_eq!(FieldMappingTable::parse(&rendered).unwrap(), table);
    }

    #[test]
    fn missing_equals_is_reported_with_line() {
        let err = FieldMappingTable::parse("orderId=order_id\n\nstatus\n").unwrap_err();
        assert!(err.to_string().contains("missing '='"), "{err}");
        assert_eq!(line_of(err), Some(3));
    }

    #[test]
    fn unbalanced_brackets_are_rejected() {
        for text in [
            "customer={customerId=customer_id",
            "customer={customerId=customer_id]",
            "items=[productId=product_id]]",
            "customer={}",
            "customer={customerId}",
            "customer=client{name=name}",
            "customer=client:name",
            "=order_id",
            "orderId=",
        ] {
            let err = FieldMappingTable::parse(text)
                .expect_err(&format!("'{text}' should be rejected"));
            assert_eq!(line_of(err), Some(1), "{text}");
        }
    }

    #[test]
    fn duplicate_keys_in_a_scope_are_rejected() {
        let err = FieldMappingTable::parse("customer={name=name,name=full_name}").unwrap_err();
        assert!(
            matches!(err, ReconcileError::MappingConfig { scope: Some(ref s), .. } if s == "customer")
        );
        assert!(FieldMappingTable::parse("orderId=order_id\norderId=id").is_err());
    }

    #[test]
    fn derived_table_skips_records_without_fields() {
        let schema = Schema::from_avro_str(
            r#"{"type": "record", "name": "Order", "fields": [
                {"name": "orderId", "type": "string"},
                {"name": "extras", "type": {"type": "record", "name": "Extras", "fields": []}},
                {"name": "wrapper", "type": {"type": "record", "name": "Wrapper", "fields": [
                    {"name": "inner", "type": {"type": "record", "name": "Inner", "fields": []}}
                ]}},
                {"name": "lines", "type": {"type": "array", "items": {"type": "record", "name": "Line", "fields": [
                    {"name": "lineNo", "type": "long"}
                ]}}}
            ]}"#,
        )
        .unwrap();
        let derived = FieldMappingTable::derive(&schema, NamingRule::default()).unwrap();
        let text = derived.to_string();
        assert_eq!(text, "orderId=order_id\nlines=[lineNo=line_no]\n");
        assert_eq!(FieldMappingTable::parse(&text).unwrap(), derived);
    }
}
