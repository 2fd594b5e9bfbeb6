use super::json::canonical_json;
use super::{ReaderContext, ReaderError, file_name_of, metadata, read_bytes};
use crate::types::Chunk;
use serde_json::{Map, Number, Value};
use std::path::Path;

/// Inferred type of a CSV column, decided from every non-empty cell in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
}

/// Read a CSV file with a header row, emitting one chunk per data row.
///
/// Each chunk holds the row as a sorted-key JSON object. Rows bypass the splitter and carry no
/// start offset.
pub(super) fn load(ctx: &ReaderContext, path: &Path) -> Result<Vec<Chunk>, ReaderError> {
    let bytes = read_bytes(path)?;
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes.as_slice());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let records = reader
        .records()
        .collect::<Result<Vec<::csv::StringRecord>, _>>()?;
    let column_types: Vec<ColumnType> = (0..headers.len())
        .map(|column| infer_column(records.iter().filter_map(|record| record.get(column))))
        .collect();

    let file_name = file_name_of(path);
    let mut chunks = records
        .iter()
        .map(|record| {
            let row: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .zip(column_types.iter())
                .map(|((header, cell), column_type)| {
                    (header.clone(), typed_cell(cell, *column_type))
                })
                .collect();
            let text = canonical_json(&Value::Object(row))?;
            Ok(Chunk::new(
                text,
                None,
                metadata::base_metadata(ctx, &file_name),
            ))
        })
        .collect::<Result<Vec<_>, ReaderError>>()?;

    metadata::stamp(&mut chunks, ctx, &file_name);
    tracing::debug!(rows = chunks.len(), columns = headers.len(), "Parsed CSV rows");
    Ok(chunks)
}

fn infer_column<'a>(cells: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut inferred: Option<ColumnType> = None;
    for cell in cells.map(str::trim).filter(|cell| !cell.is_empty()) {
        inferred = Some(match (inferred, classify(cell)) {
            (None, cell_type) => cell_type,
            (Some(current), cell_type) if current == cell_type => current,
            (Some(ColumnType::Integer), ColumnType::Float)
            | (Some(ColumnType::Float), ColumnType::Integer) => ColumnType::Float,
            _ => return ColumnType::Text,
        });
    }
    inferred.unwrap_or(ColumnType::Text)
}

fn classify(cell: &str) -> ColumnType {
    if cell.parse::<i64>().is_ok() {
        ColumnType::Integer
    } else if is_finite_float(cell) {
        ColumnType::Float
    } else if parse_bool(cell).is_some() {
        ColumnType::Boolean
    } else {
        ColumnType::Text
    }
}

fn typed_cell(cell: &str, column_type: ColumnType) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match column_type {
        ColumnType::Integer => trimmed
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(cell.to_string())),
        ColumnType::Float => trimmed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(cell.to_string())),
        ColumnType::Boolean => parse_bool(trimmed)
            .map(Value::Bool)
            .unwrap_or_else(|| Value::String(cell.to_string())),
        ColumnType::Text => Value::String(cell.to_string()),
    }
}

fn is_finite_float(cell: &str) -> bool {
    cell.parse::<f64>().is_ok_and(f64::is_finite)
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell {
        "True" | "true" | "TRUE" => Some(true),
        "False" | "false" | "FALSE" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::test_support::context;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn three_rows_become_three_numbered_chunks() {
        let file = write_csv("name,age\nada,36\ngrace,45\nlinus,28\n");
        let chunks = load(&context(4), file.path()).unwrap();

        assert_eq!(chunks.len(), 3);
        let numbers: Vec<_> = chunks.iter().map(|c| c.metadata.chunk_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(chunks[0].text, r#"{"age": 36, "name": "ada"}"#);
        for chunk in &chunks {
            assert!(chunk.start_char.is_none());
            assert_eq!(chunk.metadata.document_id, "doc-1");
            assert_eq!(chunk.metadata.data_source_id, 42);
        }
    }

    #[test]
    fn infers_column_types_and_nulls() {
        let file = write_csv("score,flag,label,count\n1.5,true,x,1\n2,false,,\n");
        let chunks = load(&context(4), file.path()).unwrap();
        assert_eq!(
            chunks[0].text,
            r#"{"count": 1, "flag": true, "label": "x", "score": 1.5}"#
        );
        assert_eq!(
            chunks[1].text,
            r#"{"count": null, "flag": false, "label": null, "score": 2.0}"#
        );
    }

    #[test]
    fn mixed_columns_fall_back_to_text() {
        assert_eq!(infer_column(["1", "abc"].into_iter()), ColumnType::Text);
        assert_eq!(infer_column(["1", "2.5"].into_iter()), ColumnType::Float);
        assert_eq!(infer_column(["", " "].into_iter()), ColumnType::Text);
    }

    #[test]
    fn header_only_file_yields_no_chunks() {
        let file = write_csv("a,b\n");
        assert!(load(&context(4), file.path()).unwrap().is_empty());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let file = write_csv("a,b\n1,2,3\n");
        let error = load(&context(4), file.path()).unwrap_err();
        assert!(matches!(error, ReaderError::Csv(_)));
    }
}
