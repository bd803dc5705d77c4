use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::{ByteRecord, ReaderBuilder, Trim};
use gtfs_atlas_model::RawRecord;
use tracing::debug;

use crate::ParseError;

const UTF8_BOM: char = '\u{feff}';

/// Lazy, single-pass reader over one GTFS text file.
///
/// The first row names the columns. Parsing is permissive: quotes inside
/// unquoted values are taken as literal text, invalid UTF-8 is replaced, short
/// rows leave trailing columns absent and extra values are dropped. Rows whose
/// values are all empty are skipped. A quoted value that is still open at the
/// end of input is an error, since it would otherwise absorb every row after
/// it.
pub struct RecordReader<R: Read> {
    file: String,
    reader: csv::Reader<QuoteTracker<R>>,
    headers: Vec<String>,
    record: ByteRecord,
    done: bool,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, ParseError> {
        let file = File::open(path).map_err(|source| ParseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_reader(BufReader::new(file), name)
    }
}

impl<R: Read> RecordReader<R> {
    pub fn from_reader(reader: R, file: impl Into<String>) -> Result<Self, ParseError> {
        let file = file.into();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(QuoteTracker::new(reader));
        let headers = match reader.byte_headers() {
            Ok(headers) => headers
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    let header = String::from_utf8_lossy(value);
                    if index == 0 {
                        header.trim_start_matches(UTF8_BOM).trim().to_string()
                    } else {
                        header.into_owned()
                    }
                })
                .collect(),
            Err(source) => {
                return Err(ParseError::Read {
                    file,
                    line: 1,
                    source,
                })
            }
        };
        let reader = Self {
            file,
            reader,
            headers,
            record: ByteRecord::new(),
            done: false,
        };
        match reader.unclosed_quote() {
            Some(line) => Err(ParseError::UnclosedQuote {
                file: reader.file,
                line,
            }),
            None => Ok(reader),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Line of a quote opened inside the input consumed so far and never
    /// closed before end of input.
    fn unclosed_quote(&self) -> Option<u64> {
        let open = self.reader.get_ref().unclosed_quote()?;
        (open.offset < self.reader.position().byte()).then_some(open.line)
    }

    fn unclosed_quote_error(&mut self, line: u64) -> ParseError {
        self.done = true;
        ParseError::UnclosedQuote {
            file: self.file.clone(),
            line,
        }
    }

    fn to_raw_record(&self) -> RawRecord {
        let mut raw = RawRecord::new();
        for (header, value) in self.headers.iter().zip(self.record.iter()) {
            if header.is_empty() {
                continue;
            }
            raw.insert(header.as_str(), String::from_utf8_lossy(value).into_owned());
        }
        raw
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<RawRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(false) => {
                    self.done = true;
                    return self
                        .reader
                        .get_ref()
                        .unclosed_quote()
                        .map(|open| Err(self.unclosed_quote_error(open.line)));
                }
                Ok(true) => {
                    if let Some(line) = self.unclosed_quote() {
                        return Some(Err(self.unclosed_quote_error(line)));
                    }
                    if self.record.len() != self.headers.len() {
                        debug!(
                            "{} line {}: {} values for {} columns",
                            self.file,
                            self.reader.position().line(),
                            self.record.len(),
                            self.headers.len()
                        );
                    }
                    let raw = self.to_raw_record();
                    if raw.is_blank() {
                        continue;
                    }
                    return Some(Ok(raw));
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(ParseError::Read {
                        file: self.file.clone(),
                        line: self.reader.position().line(),
                        source,
                    }));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    StartField,
    InField,
    InQuoted,
    QuoteInQuoted,
}

#[derive(Debug, Clone, Copy)]
struct QuoteOpen {
    offset: u64,
    line: u64,
}

/// Follows field quoting over the raw bytes the csv reader pulls, using the
/// same rules: a quote opens a quoted field only at the start of a field, and
/// a doubled quote inside it is literal.
struct QuoteTracker<R> {
    inner: R,
    state: QuoteState,
    offset: u64,
    line: u64,
    last_open: QuoteOpen,
    eof: bool,
}

impl<R: Read> QuoteTracker<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            state: QuoteState::StartField,
            offset: 0,
            line: 1,
            last_open: QuoteOpen { offset: 0, line: 1 },
            eof: false,
        }
    }

    fn unclosed_quote(&self) -> Option<QuoteOpen> {
        (self.eof && self.state == QuoteState::InQuoted).then_some(self.last_open)
    }

    fn track(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = match (self.state, byte) {
                (QuoteState::StartField, b'"') => {
                    self.last_open = QuoteOpen {
                        offset: self.offset,
                        line: self.line,
                    };
                    QuoteState::InQuoted
                }
                (QuoteState::InQuoted, b'"') => QuoteState::QuoteInQuoted,
                (QuoteState::InQuoted, _) => QuoteState::InQuoted,
                (QuoteState::QuoteInQuoted, b'"') => QuoteState::InQuoted,
                (_, b',' | b'\n' | b'\r') => QuoteState::StartField,
                _ => QuoteState::InField,
            };
            if byte == b'\n' {
                self.line += 1;
            }
            self.offset += 1;
        }
    }
}

impl<R: Read> Read for QuoteTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 && !buf.is_empty() {
            self.eof = true;
        }
        self.track(&buf[..read]);
        Ok(read)
    }
}

pub fn open_records(path: &Path) -> Result<RecordReader<BufReader<File>>, ParseError> {
    RecordReader::open(path)
}

/// Reads at most `limit` records and stops without consuming the rest.
pub fn read_first_records(path: &Path, limit: usize) -> Result<Vec<RawRecord>, ParseError> {
    RecordReader::open(path)?.take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(data: &str) -> Vec<RawRecord> {
        RecordReader::from_reader(data.as_bytes(), "test.txt")
            .expect("reader")
            .collect::<Result<Vec<_>, _>>()
            .expect("records")
    }

    #[test]
    fn trims_fields_and_skips_blank_lines() {
        let records = read_all("stop_id, stop_name \n S1 ,  Main St \n\n   \nS2,Elm\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("stop_id"), Some("S1"));
        assert_eq!(records[0].get("stop_name"), Some("Main St"));
        assert_eq!(records[1].get("stop_id"), Some("S2"));
    }

    #[test]
    fn strips_byte_order_mark_from_first_header() {
        let records = read_all("\u{feff}agency_id,agency_name\nA1,Metro\n");
        assert_eq!(records[0].get("agency_id"), Some("A1"));
    }

    #[test]
    fn tolerates_irregular_quoting() {
        let records =
            read_all("stop_id,stop_name\nS1,Joe's \"Corner\" Stop\nS2,\"Quoted, name\"\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("stop_name"), Some("Joe's \"Corner\" Stop"));
        assert_eq!(records[1].get("stop_name"), Some("Quoted, name"));
    }

    #[test]
    fn short_rows_leave_columns_absent_and_long_rows_drop_extras() {
        let records = read_all("a,b,c\n1,2\n1,2,3,4\n");
        assert_eq!(records[0].get("c"), None);
        assert_eq!(records[0].len(), 2);
        assert_eq!(records[1].get("c"), Some("3"));
        assert_eq!(records[1].len(), 3);
    }

    #[test]
    fn replaces_invalid_utf8() {
        let data: &[u8] = b"stop_id,stop_name\nS1,Caf\xe9\n";
        let records: Vec<_> = RecordReader::from_reader(data, "stops.txt")
            .expect("reader")
            .collect::<Result<_, _>>()
            .expect("records");
        assert_eq!(records[0].get("stop_name"), Some("Caf\u{fffd}"));
    }

    #[test]
    fn take_stops_early() {
        let mut data = String::from("agency_id\n");
        for index in 0..1000 {
            data.push_str(&format!("A{}\n", index));
        }
        let mut reader = RecordReader::from_reader(data.as_bytes(), "agency.txt").expect("reader");
        let first: Vec<_> = reader.by_ref().take(1).collect::<Result<_, _>>().expect("first");
        assert_eq!(first[0].get("agency_id"), Some("A0"));
        assert_eq!(
            reader.next().and_then(Result::ok).and_then(|r| r.get("agency_id").map(str::to_string)),
            Some("A1".to_string())
        );
    }

    #[test]
    fn unclosed_quote_fails_instead_of_absorbing_rows() {
        let data = "stop_id,stop_name,stop_lat,stop_lon\n\
                    S1,\"Unclosed,40.1,-3.5\n\
                    S2,Atocha,40.2,-3.6\n\
                    S3,Sol,40.3,-3.7\n";
        let mut reader = RecordReader::from_reader(data.as_bytes(), "stops.txt").expect("reader");
        match reader.next() {
            Some(Err(ParseError::UnclosedQuote { file, line })) => {
                assert_eq!(file, "stops.txt");
                assert_eq!(line, 2);
            }
            other => panic!("expected unclosed quote error, got {:?}", other),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn rows_before_an_unclosed_quote_are_still_read() {
        let data = "stop_id,stop_name\nS1,Sol\nS2,Atocha\nS3,\"Open\nS4,Tail\n";
        let results: Vec<_> = RecordReader::from_reader(data.as_bytes(), "stops.txt")
            .expect("reader")
            .collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().expect("S1").get("stop_id"), Some("S1"));
        assert_eq!(results[1].as_ref().expect("S2").get("stop_id"), Some("S2"));
        assert!(matches!(
            results[2],
            Err(ParseError::UnclosedQuote { line: 4, .. })
        ));
    }

    #[test]
    fn quoted_values_with_newlines_and_doubled_quotes_are_closed() {
        let records = read_all(
            "stop_id,stop_desc\nS1,\"Two\nlines\"\nS2,\"Say \"\"hi\"\"\"\nS3,\"last\"",
        );
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("stop_desc"), Some("Two\nlines"));
        assert_eq!(records[1].get("stop_desc"), Some("Say \"hi\""));
        assert_eq!(records[2].get("stop_desc"), Some("last"));
    }

    #[test]
    fn unclosed_quote_in_header_is_rejected() {
        let data = "stop_id,\"stop_name\nS1,Sol\n";
        let result = RecordReader::from_reader(data.as_bytes(), "stops.txt");
        assert!(matches!(result, Err(ParseError::UnclosedQuote { line: 1, .. })));
    }

    #[test]
    fn header_only_file_yields_nothing() {
        assert!(read_all("stop_id,stop_name\n").is_empty());
        assert!(read_all("").is_empty());
    }
}
