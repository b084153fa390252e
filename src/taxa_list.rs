//! Taxa input list loader.
//!
//! Accepts a comma/tab-separated table with a required `taxon_id` column
//! and optional `scientific_name`/`swedish_name` columns, and also parses
//! legacy single-column files (bare taxon id per line, no header).

use std::io::Cursor;
use std::path::Path;

use csv_async::{AsyncReaderBuilder, StringRecord};

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct TaxonEntry {
    pub taxon_id: i64,
    pub scientific_name: Option<String>,
    pub swedish_name: Option<String>,
}

struct ColumnMap {
    taxon_id: usize,
    scientific_name: Option<usize>,
    swedish_name: Option<usize>,
}

impl ColumnMap {
    fn from_header(header: &StringRecord) -> Option<Self> {
        let taxon_id = header.iter().position(|f| f.eq_ignore_ascii_case("taxon_id"))?;
        Some(Self {
            taxon_id,
            scientific_name: header.iter().position(|f| f.eq_ignore_ascii_case("scientific_name")),
            swedish_name: header.iter().position(|f| f.eq_ignore_ascii_case("swedish_name")),
        })
    }
}

fn field(record: &StringRecord, col: Option<usize>) -> Option<String> {
    col.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parses the raw text of a taxa list. `cap` truncates the result to the
/// first `n` entries when `Some`, matching the `n` knob exposed by the
/// pipeline build request. Delimiter is sniffed from the first
/// non-empty line (tab takes priority over comma), and legacy
/// single-column files (no recognizable `taxon_id` header) are treated
/// as one bare taxon id per row.
pub async fn parse_taxa_list(contents: &str, cap: Option<usize>) -> Result<Vec<TaxonEntry>, CoreError> {
    let delimiter = contents
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| if l.contains('\t') { b'\t' } else { b',' })
        .unwrap_or(b',');

    let cursor = Cursor::new(contents.as_bytes().to_vec());
    let mut reader = AsyncReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .create_reader(cursor);

    let mut entries = Vec::new();
    let mut column_map: Option<ColumnMap> = None;
    let mut first_row = true;
    let mut record = StringRecord::new();

    while reader
        .read_record(&mut record)
        .await
        .map_err(|e| CoreError::MissingInput(format!("parsing taxa list: {e}")))?
    {
        if first_row {
            first_row = false;
            if let Some(map) = ColumnMap::from_header(&record) {
                column_map = Some(map);
                continue;
            }
        }

        let Some(map) = &column_map else {
            // Legacy single-column format: the whole row is a bare taxon id.
            let Some(raw_id) = record.get(0) else { continue };
            let Ok(taxon_id) = raw_id.trim().parse::<i64>() else { continue };
            entries.push(TaxonEntry { taxon_id, scientific_name: None, swedish_name: None });
            if cap.is_some_and(|n| entries.len() >= n) {
                return Ok(entries);
            }
            continue;
        };

        let Some(raw_id) = record.get(map.taxon_id) else { continue };
        let Ok(taxon_id) = raw_id.trim().parse::<i64>() else { continue };
        entries.push(TaxonEntry {
            taxon_id,
            scientific_name: field(&record, map.scientific_name),
            swedish_name: field(&record, map.swedish_name),
        });
        if cap.is_some_and(|n| entries.len() >= n) {
            return Ok(entries);
        }
    }

    Ok(entries)
}

pub async fn load_taxa_list(path: &Path, cap: Option<usize>) -> Result<Vec<TaxonEntry>, CoreError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::MissingInput(format!("{}: {e}", path.display())))?;
    parse_taxa_list(&contents, cap).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_header_table_with_optional_names() {
        let text = "taxon_id,scientific_name,swedish_name\n1,Corvus corax,Korp\n2,Pica pica,Skata\n";
        let entries = parse_taxa_list(text, None).await.unwrap();
        assert_eq!(
            entries,
            vec![
                TaxonEntry { taxon_id: 1, scientific_name: Some("Corvus corax".into()), swedish_name: Some("Korp".into()) },
                TaxonEntry { taxon_id: 2, scientific_name: Some("Pica pica".into()), swedish_name: Some("Skata".into()) },
            ]
        );
    }

    #[tokio::test]
    async fn parses_tab_separated_variant() {
        let text = "taxon_id\tscientific_name\n1\tCorvus corax\n";
        let entries = parse_taxa_list(text, None).await.unwrap();
        assert_eq!(entries[0].taxon_id, 1);
        assert_eq!(entries[0].scientific_name.as_deref(), Some("Corvus corax"));
    }

    #[tokio::test]
    async fn parses_legacy_single_column_file() {
        let text = "101\n102\n103\n";
        let entries = parse_taxa_list(text, None).await.unwrap();
        assert_eq!(entries.iter().map(|e| e.taxon_id).collect::<Vec<_>>(), vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn cap_truncates_to_first_n() {
        let text = "1\n2\n3\n4\n5\n";
        let entries = parse_taxa_list(text, Some(3)).await.unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn skips_non_numeric_rows() {
        let text = "taxon_id\nnot-a-number\n5\n";
        let entries = parse_taxa_list(text, None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].taxon_id, 5);
    }
}
