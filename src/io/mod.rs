use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::tree::metadata::{normalize_identifier, MetadataColumn, MetadataTable};
use crate::tree::{AttrValue, TreePayload};

/// Header names probed for the identifier column, in priority order.
pub const ID_COLUMN_CANDIDATES: [&str; 9] = [
    "id",
    "name",
    "sample",
    "sample_id",
    "taxon",
    "tip",
    "strain",
    "label",
    "sequence",
];

#[derive(Debug, Error, PartialEq)]
pub enum MetadataError {
    #[error("Metadata file is empty.")]
    Empty,
    #[error("Metadata file is missing a header row.")]
    MissingHeader,
    #[error("Metadata file must contain additional columns beyond the identifier column.")]
    NoDataColumns,
    #[error("Metadata file did not contain any usable rows.")]
    NoRows,
}

pub fn load_payload(path: &Path) -> Result<TreePayload> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read tree payload: {}", path.display()))?;
    parse_payload(&raw).with_context(|| format!("invalid tree payload: {}", path.display()))
}

pub fn parse_payload(raw: &str) -> Result<TreePayload> {
    let payload: TreePayload = serde_json::from_str(raw).context("payload is not valid JSON")?;
    Ok(payload)
}

pub fn save_payload(payload: &TreePayload, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(payload)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

pub fn load_metadata_table(path: &Path) -> Result<MetadataTable> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read metadata file: {}", path.display()))?;
    let mut table = parse_metadata_table(&raw)?;
    table.source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    Ok(table)
}

/// Tab wins ties, then comma, then semicolon; comma when none appear.
pub fn detect_delimiter(header: &str) -> char {
    let count = |needle: char| header.chars().filter(|c| *c == needle).count();
    let (tabs, commas, semicolons) = (count('\t'), count(','), count(';'));
    if tabs > 0 && tabs >= commas && tabs >= semicolons {
        '\t'
    } else if commas > 0 && commas >= semicolons {
        ','
    } else if semicolons > 0 {
        ';'
    } else {
        ','
    }
}

fn strip_quotes(cell: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|quote| {
            cell.strip_prefix(*quote)
                .and_then(|rest| rest.strip_suffix(*quote))
        })
        .unwrap_or(cell)
}

/// Quote-aware split; `""` inside quotes is an escaped quote.
pub fn split_row(row: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = row.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                current.push('"');
                chars.next();
            } else {
                in_quotes = !in_quotes;
            }
            continue;
        }
        if c == delimiter && !in_quotes {
            cells.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    cells.push(current);
    cells
        .into_iter()
        .map(|cell| strip_quotes(cell.trim()).replace("\"\"", "\"").trim().to_string())
        .collect()
}

pub fn detect_id_column(headers: &[String]) -> usize {
    let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    ID_COLUMN_CANDIDATES
        .iter()
        .find_map(|candidate| normalized.iter().position(|header| header == candidate))
        .unwrap_or(0)
}

/// Lower-case, collapse non-alphanumeric runs to `_`, trim underscores.
pub fn standardize_key(header: &str) -> String {
    let mut key = String::new();
    let mut pending = false;
    for c in header.trim().to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending && !key.is_empty() {
                key.push('_');
            }
            pending = false;
            key.push(c);
        } else {
            pending = true;
        }
    }
    if key.is_empty() {
        header.trim().to_string()
    } else {
        key
    }
}

fn is_decimal_literal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
    all_digits(whole) && fraction.map_or(true, all_digits)
}

/// `true`/`false` become booleans, plain decimals numbers, empty cells
/// nothing; everything else stays text.
pub fn coerce_value(raw: &str) -> Option<AttrValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.to_lowercase().as_str() {
        "true" => return Some(AttrValue::boolean(true)),
        "false" => return Some(AttrValue::boolean(false)),
        _ => {}
    }
    if is_decimal_literal(trimmed) {
        if let Ok(value) = trimmed.parse::<f64>() {
            return Some(AttrValue::number(value));
        }
    }
    Some(AttrValue::text(trimmed))
}

fn column_keys(columns: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    columns
        .iter()
        .map(|column| {
            let mut key = standardize_key(column);
            if key.is_empty() {
                key = format!("trait_{}", used.len() + 1);
            }
            while used.contains(&key) {
                key = format!("{key}_{}", used.len() + 1);
            }
            used.insert(key.clone());
            key
        })
        .collect()
}

pub fn parse_metadata_table(raw: &str) -> Result<MetadataTable, MetadataError> {
    let normalized = raw.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .collect();
    let Some((header_line, rows)) = lines.split_first() else {
        return Err(MetadataError::Empty);
    };

    let delimiter = detect_delimiter(header_line);
    let headers: Vec<String> = split_row(header_line, delimiter)
        .into_iter()
        .filter(|header| !header.is_empty())
        .collect();
    if headers.is_empty() {
        return Err(MetadataError::MissingHeader);
    }
    let id_index = detect_id_column(&headers);
    let data_indices: Vec<usize> = (0..headers.len()).filter(|&i| i != id_index).collect();
    if data_indices.is_empty() {
        return Err(MetadataError::NoDataColumns);
    }

    let data_headers: Vec<String> = data_indices.iter().map(|&i| headers[i].clone()).collect();
    let columns: Vec<MetadataColumn> = data_headers
        .iter()
        .zip(column_keys(&data_headers))
        .map(|(header, key)| MetadataColumn {
            header: header.clone(),
            key,
        })
        .collect();

    let mut records = HashMap::new();
    for row in rows {
        let cells = split_row(row, delimiter);
        let identifier = normalize_identifier(cells.get(id_index).map_or("", String::as_str));
        if identifier.is_empty() {
            continue;
        }
        let values = data_indices
            .iter()
            .map(|&i| cells.get(i).and_then(|cell| coerce_value(cell)))
            .collect();
        records.insert(identifier, values);
    }
    if records.is_empty() {
        return Err(MetadataError::NoRows);
    }

    Ok(MetadataTable {
        id_field: headers[id_index].clone(),
        columns,
        records,
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_detection_prefers_tab() {
        assert_eq!(detect_delimiter("a\tb,c"), '\t');
        assert_eq!(detect_delimiter("a,b;c"), ',');
        assert_eq!(detect_delimiter("a;b;c,d"), ';');
        assert_eq!(detect_delimiter("abc"), ',');
    }

    #[test]
    fn splits_quoted_cells() {
        assert_eq!(
            split_row(r#"S1,"Nairobi, Kenya","say ""hi""""#, ','),
            vec!["S1", "Nairobi, Kenya", "say \"hi\""]
        );
        assert_eq!(split_row("a;;c", ';'), vec!["a", "", "c"]);
    }

    #[test]
    fn coerces_values() {
        assert_eq!(coerce_value(" TRUE "), Some(AttrValue::boolean(true)));
        assert_eq!(coerce_value("-12.5"), Some(AttrValue::number(-12.5)));
        assert_eq!(coerce_value("1e5"), Some(AttrValue::text("1e5")));
        assert_eq!(coerce_value("12."), Some(AttrValue::text("12.")));
        assert_eq!(coerce_value("  "), None);
    }

    #[test]
    fn standardizes_and_deduplicates_keys() {
        assert_eq!(standardize_key(" Collection Date (UTC) "), "collection_date_utc");
        assert_eq!(standardize_key("%%"), "%%");
        assert_eq!(
            column_keys(&["Host".into(), "host".into(), "HOST!".into()]),
            vec!["host", "host_2", "host_3"]
        );
    }

    #[test]
    fn parses_table_with_detected_id_column() {
        let table =
            parse_metadata_table("country,sample_id,year\r\nKenya,S1,2019\r\n\r\nPeru,'S2',\n").unwrap();
        assert_eq!(table.id_field, "sample_id");
        let keys: Vec<&str> = table.columns.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["country", "year"]);
        assert_eq!(
            table.row("s1").unwrap(),
            &[Some(AttrValue::text("Kenya")), Some(AttrValue::number(2019.0))]
        );
        assert_eq!(table.row("S2").unwrap()[1], None);
    }

    #[test]
    fn reports_structural_problems() {
        assert_eq!(parse_metadata_table("\n\n"), Err(MetadataError::Empty));
        assert_eq!(parse_metadata_table("id\nS1"), Err(MetadataError::NoDataColumns));
        assert_eq!(parse_metadata_table("id,country\n,Kenya"), Err(MetadataError::NoRows));
    }

    #[test]
    fn payload_json_round_trip() {
        let raw = r#"{"nodes":[{"id":"R","parent_id":""},{"id":"A","parent_id":"R","time_before_present":1.5,"traits":{"lat":1.0}}],"edges":[{"parent_id":"R","child_id":"A"}]}"#;
        let payload = parse_payload(raw).unwrap();
        assert_eq!(payload.nodes.len(), 2);
        assert_eq!(payload.nodes[0].parent_id, None);
        assert_eq!(payload.edges.len(), 1);
        assert!(parse_payload("{").is_err());
    }
}
