//! CSV text <-> rows, backed by the `csv` crate.

use crate::core::TableRow;
use std::io;

/// Parses CSV text into rows. Rows may have different widths; blank lines
/// are skipped.
///
/// # Errors
///
/// Returns the `csv` error for malformed input.
pub fn parse_rows(text: &str) -> Result<Vec<TableRow>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Serializes rows as CSV text with `\n` line endings.
///
/// # Errors
///
/// Returns the `csv` error if writing fails.
pub fn rows_to_string(rows: &[TableRow]) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for row in rows {
        writer.write_record(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| csv::Error::from(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Counts the non-blank records of CSV text.
///
/// # Errors
///
/// Returns the `csv` error for malformed input.
pub fn count_records(text: &str) -> Result<u64, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut count = 0;
    for record in reader.records() {
        record?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_quoted_and_ragged() {
        let rows = parse_rows("Symbol,Name\nSPY,\"S&P 500, ETF\"\nQQQ\n\n").unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["Symbol".to_string(), "Name".to_string()],
                vec!["SPY".to_string(), "S&P 500, ETF".to_string()],
                vec!["QQQ".to_string()],
            ]
        );
    }

    #[test]
    fn test_parse_crlf() {
        let rows = parse_rows("a,b\r\n1,2\r\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_write_quotes_when_needed() {
        let rows = vec![
            vec!["Symbol".to_string(), "Change %".to_string()],
            vec!["SPY".to_string(), "'1.23%".to_string()],
            vec!["A,B".to_string(), "say \"hi\"".to_string()],
        ];
        let text = rows_to_string(&rows).unwrap();
        assert_eq!(text, "Symbol,Change %\nSPY,'1.23%\n\"A,B\",\"say \"\"hi\"\"\"\n");
        assert_eq!(parse_rows(&text).unwrap(), rows);
    }

    #[test]
    fn test_count_records() {
        assert_eq!(count_records("").unwrap(), 0);
        assert_eq!(count_records("h1,h2\n1,2\n3,4\n").unwrap(), 3);
        assert_eq!(count_records("h1,h2\n\n1,2").unwrap(), 2);
    }
}
