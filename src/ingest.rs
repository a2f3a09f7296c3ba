//! Loads items from delimited text (CSV, semicolon or tab separated).
//!
//! Bad rows are reported and skipped; the rest of the batch still loads.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::MalformedRow;
use crate::Item;

/// Zero-based column positions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemColumns {
    pub id: usize,
    pub label: usize,
    pub seed: usize,
}

impl Default for ItemColumns {
    fn default() -> Self {
        Self {
            id: 0,
            label: 1,
            seed: 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestConfig {
    pub columns: ItemColumns,
    pub has_header: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub items: Vec<Item>,
    pub rejected: Vec<MalformedRow>,
}

fn delimiter(line: &str) -> char {
    let semicolons = line.matches(';').count();
    let commas = line.matches(',').count();
    if semicolons > commas {
        ';'
    } else if line.contains('\t') {
        '\t'
    } else {
        ','
    }
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
        .trim()
}

fn parse_row(fields: &[&str], columns: &ItemColumns) -> Result<Item, String> {
    let field = |idx: usize, name: &str| {
        fields
            .get(idx)
            .map(|f| unquote(f))
            .ok_or_else(|| format!("missing {} column ({})", name, idx))
    };
    let id = field(columns.id, "id")?;
    if id.is_empty() {
        return Err("empty id".to_string());
    }
    let label = field(columns.label, "label")?;
    let raw_seed = field(columns.seed, "seed")?;
    let seed = raw_seed
        .parse::<i64>()
        .map_err(|e| format!("bad seed {:?}: {}", raw_seed, e))?;
    Ok(Item::new(id, label, seed))
}

pub fn parse_items(text: &str, config: &IngestConfig) -> IngestReport {
    let mut report = IngestReport::default();
    let mut seen = HashSet::new();

    let rows = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
        .skip(usize::from(config.has_header));

    for (line, raw) in rows {
        let fields = raw.split(delimiter(raw)).collect::<Vec<_>>();
        let parsed = parse_row(&fields, &config.columns).and_then(|item| {
            if seen.insert(item.id.clone()) {
                Ok(item)
            } else {
                Err(format!("duplicate id {}", item.id))
            }
        });
        match parsed {
            Ok(item) => report.items.push(item),
            Err(reason) => {
                warn!(line, %reason, "skipping malformed row");
                report.rejected.push(MalformedRow { line, reason });
            }
        }
    }
    debug!(
        loaded = report.items.len(),
        rejected = report.rejected.len(),
        "ingestion finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_items_with_header() {
        let report = parse_items(
            "id,label,seed\na,Alpha,90\n\nc,Gamma,-5\n",
            &IngestConfig {
                has_header: true,
                ..Default::default()
            },
        );
        assert_eq!(
            vec![Item::new("a", "Alpha", 90), Item::new("c", "Gamma", -5)],
            report.items
        );
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_bad_rows_are_skipped_not_fatal() {
        let text = "a,Alpha,90\nb,Beta\n,Nameless,3\nc,Gamma,high\na,Again,1\nd,Delta,40";
        let report = parse_items(text, &IngestConfig::default());
        assert_eq!(
            vec![Item::new("a", "Alpha", 90), Item::new("d", "Delta", 40)],
            report.items
        );
        assert_eq!(
            vec![2, 3, 4, 5],
            report.rejected.iter().map(|r| r.line).collect::<Vec<_>>()
        );
        assert!(report.rejected[0].reason.contains("seed"));
        assert_eq!("empty id", report.rejected[1].reason);
        assert!(report.rejected[3].reason.contains("duplicate"));
    }

    #[test]
    fn test_delimiter_detection() {
        assert_eq!(';', delimiter("a;Alpha, Jr.;3"));
        assert_eq!('\t', delimiter("a\tAlpha\t3"));
        assert_eq!(',', delimiter("a,Alpha;x,3"));

        let report = parse_items(
            "a;\"Alpha, Jr.\";3\nb\tBeta\t2\n",
            &IngestConfig::default(),
        );
        assert_eq!(
            vec![Item::new("a", "Alpha, Jr.", 3), Item::new("b", "Beta", 2)],
            report.items
        );
    }

    #[test]
    fn test_custom_columns() {
        let config = IngestConfig {
            columns: ItemColumns {
                id: 2,
                label: 0,
                seed: 1,
            },
            has_header: false,
        };
        let report = parse_items("Alpha,7,a\n", &config);
        assert_eq!(vec![Item::new("a", "Alpha", 7)], report.items);
    }
}
