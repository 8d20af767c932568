use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::{Record, RecordField};

// ---------------------------------------------------------------------------
// File discovery
// ---------------------------------------------------------------------------

pub const JSONL_EXTENSION: &str = "jsonl";

fn is_jsonl(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == JSONL_EXTENSION)
}

pub struct FileScanner;

impl FileScanner {
    pub fn new() -> Self {
        Self
    }

    /// A single file is returned as-is (with a warning when it lacks the
    /// `.jsonl` extension); a directory is walked recursively.
    pub fn scan(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if !path.exists() {
            anyhow::bail!("path does not exist: {}", path.display());
        }
        if path.is_file() {
            if !is_jsonl(path) {
                tracing::warn!(path = %path.display(), "file does not have a .jsonl extension");
            }
            return Ok(vec![path.to_path_buf()]);
        }
        self.scan_directory(path)
    }

    /// Every `*.jsonl` file below `dir`, sorted by path. Symbolic links
    /// are not followed.
    pub fn scan_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let entries = std::fs::read_dir(&current)
                .with_context(|| format!("cannot read directory {}", current.display()))?;
            for entry in entries {
                let entry = entry?;
                let file_type = entry.file_type()?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && is_jsonl(&path) {
                    files.push(path);
                } else if file_type.is_symlink() {
                    tracing::debug!(path = %path.display(), "skipping symbolic link");
                }
            }
        }
        files.sort();
        if files.is_empty() {
            tracing::warn!(dir = %dir.display(), "no .jsonl files found");
        } else {
            tracing::info!(count = files.len(), dir = %dir.display(), "found log files");
        }
        Ok(files)
    }

    /// Drops files larger than `max_bytes`, logging each one skipped.
    pub fn filter_by_size(&self, files: Vec<PathBuf>, max_bytes: u64) -> Vec<PathBuf> {
        files
            .into_iter()
            .filter(|path| match std::fs::metadata(path) {
                Ok(meta) if meta.len() <= max_bytes => true,
                Ok(meta) => {
                    tracing::warn!(
                        path = %path.display(),
                        size_mb = %format!("{:.2}", meta.len() as f64 / (1024.0 * 1024.0)),
                        "file exceeds size limit, skipping"
                    );
                    false
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot stat file, skipping");
                    false
                }
            })
            .collect()
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes raw file bytes. A UTF-8 or UTF-16 byte-order mark wins; valid
/// UTF-8 is taken as-is; anything else goes through charset detection so
/// legacy code pages such as GBK decode to the right characters.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::warn!(encoding = encoding.name(), "undecodable bytes replaced");
    } else {
        tracing::debug!(encoding = encoding.name(), "decoded non-UTF-8 input");
    }
    text.into_owned()
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Why a single line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("line is not a JSON object")]
    NotObject,
    #[error("missing fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {message}", location(.file, .line))]
pub struct ParseError {
    pub file: Option<PathBuf>,
    pub line: usize,
    pub message: String,
}

fn location(file: &Option<PathBuf>, line: &usize) -> String {
    match file {
        Some(file) => format!("{}:{line}", file.display()),
        None => format!("line {line}"),
    }
}

#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<Record>,
    pub errors: Vec<ParseError>,
}

impl ParseOutcome {
    pub fn extend(&mut self, other: ParseOutcome) {
        self.records.extend(other.records);
        self.errors.extend(other.errors);
    }

    /// First `limit` errors, one per line, plus a count of the rest.
    pub fn error_summary(&self, limit: usize) -> String {
        if self.errors.is_empty() {
            return "no errors".to_string();
        }
        let mut out = format!("{} errors:\n", self.errors.len());
        for e in self.errors.iter().take(limit) {
            out.push_str(&format!("  - {}\n", e));
        }
        if self.errors.len() > limit {
            out.push_str(&format!("  ... and {} more\n", self.errors.len() - limit));
        }
        out
    }
}

pub struct JsonlParser {
    max_size_bytes: u64,
    validate: bool,
}

impl JsonlParser {
    pub fn new(max_size_bytes: u64, validate: bool) -> Self {
        Self { max_size_bytes, validate }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.max_file_size_bytes(), config.validate_fields)
    }

    /// Decodes one line. `Ok(None)` for blank lines.
    pub fn parse_line(&self, line: &str) -> std::result::Result<Option<Record>, LineError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| LineError::InvalidJson(e.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(LineError::NotObject);
        };
        if self.validate {
            let missing: Vec<&str> = RecordField::ALL
                .iter()
                .map(|f| f.key())
                .filter(|k| !object.contains_key(*k))
                .collect();
            if !missing.is_empty() {
                return Err(LineError::MissingFields(missing));
            }
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| LineError::InvalidRecord(e.to_string()))
    }

    pub fn parse_str(&self, text: &str, file: Option<&Path>) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        for (i, line) in text.lines().enumerate() {
            match self.parse_line(line) {
                Ok(Some(record)) => outcome.records.push(record),
                Ok(None) => {}
                Err(e) => outcome.errors.push(ParseError {
                    file: file.map(Path::to_path_buf),
                    line: i + 1,
                    message: e.to_string(),
                }),
            }
        }
        outcome
    }

    /// Parses one file. Oversized files yield an empty outcome with a warning;
    /// unreadable files are an error.
    pub fn parse_file(&self, path: &Path) -> Result<ParseOutcome> {
        let size = std::fs::metadata(path)
            .with_context(|| format!("cannot stat {}", path.display()))?
            .len();
        if size > self.max_size_bytes {
            tracing::warn!(path = %path.display(), size, limit = self.max_size_bytes, "file exceeds size limit");
            return Ok(ParseOutcome::default());
        }

        let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        let outcome = self.parse_str(&decode_text(&bytes), Some(path));
        tracing::info!(
            path = %path.display(),
            records = outcome.records.len(),
            errors = outcome.errors.len(),
            "parsed file"
        );
        Ok(outcome)
    }

    /// Parses every file; a file that cannot be read is logged and skipped.
    pub fn parse_files(&self, paths: &[PathBuf]) -> ParseOutcome {
        let mut all = ParseOutcome::default();
        for path in paths {
            match self.parse_file(path) {
                Ok(outcome) => all.extend(outcome),
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "skipping file");
                    all.errors.push(ParseError {
                        file: Some(path.clone()),
                        line: 0,
                        message: format!("{e:#}"),
                    });
                }
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{"timestamp":"2024-01-08T10:00:00","process":"a.exe","command_line":"","user":"bob","dest_ip":"8.8.8.8","dest_port":"53","protocol":"udp","domain":"dns.google","source":"sysmon"}"#;

    #[test]
    fn test_parse_str_collects_line_errors() {
        let parser = JsonlParser::new(u64::MAX, true);
        let text = format!("{FULL}\n\n{{broken\n{{\"dest_ip\":\"1.1.1.1\"}}\n[1,2]\n{FULL}\n");
        let out = parser.parse_str(&text, None);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.errors.len(), 3);
        assert_eq!(out.errors[0].line, 3);
        assert!(out.errors[1].message.starts_with("missing fields: timestamp"));
        assert_eq!(out.errors[2].line, 5);
    }

    #[test]
    fn test_validation_can_be_disabled() {
        let parser = JsonlParser::new(u64::MAX, false);
        let out = parser.parse_str("{\"dest_ip\":\"1.1.1.1\",\"dest_port\":443}", None);
        assert!(out.errors.is_empty());
        assert_eq!(out.records[0].dest_port.as_deref(), Some("443"));
    }

    #[test]
    fn test_decode_text_boms() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFabc"), "abc");
        let le: Vec<u8> = [0xFF, 0xFE].into_iter().chain("hi".encode_utf16().flat_map(|u| u.to_le_bytes())).collect();
        assert_eq!(decode_text(&le), "hi");
        let be: Vec<u8> = [0xFE, 0xFF].into_iter().chain("hi".encode_utf16().flat_map(|u| u.to_be_bytes())).collect();
        assert_eq!(decode_text(&be), "hi");
        assert_eq!(decode_text("plain ascii".as_bytes()), "plain ascii");
    }

    #[test]
    fn test_decode_text_detects_legacy_encoding() {
        let source = concat!(
            r#"{"user":"管理员","process":"资源管理器.exe","domain":"中国网络服务"}"#, "\n",
            r#"{"user":"系统用户","process":"远程桌面连接.exe","domain":"本地网络"}"#, "\n",
            r#"{"user":"测试账户","process":"浏览器进程.exe","domain":"数据中心"}"#, "\n",
        );
        let (gbk, _, _) = encoding_rs::GBK.encode(source);
        assert!(std::str::from_utf8(&gbk).is_err());

        let text = decode_text(&gbk);
        assert_eq!(text, source);
        let out = JsonlParser::new(u64::MAX, false).parse_str(&text, None);
        assert!(out.errors.is_empty());
        assert_eq!(out.records[0].user.as_deref(), Some("管理员"));
        assert_eq!(out.records[1].process.as_deref(), Some("远程桌面连接.exe"));
    }

    #[test]
    fn test_line_errors_are_typed() {
        let parser = JsonlParser::new(u64::MAX, true);
        assert_eq!(parser.parse_line("[1,2]"), Err(LineError::NotObject));
        assert!(matches!(parser.parse_line("{oops"), Err(LineError::InvalidJson(_))));
        let Err(e) = parser.parse_line(r#"{"timestamp":"x","process":"p"}"#) else {
            panic!("expected missing fields");
        };
        assert_eq!(e.to_string(), "missing fields: command_line, user, dest_ip, dest_port, protocol, domain, source");

        let err = ParseError { file: Some(PathBuf::from("a.jsonl")), line: 4, message: e.to_string() };
        assert!(err.to_string().starts_with("a.jsonl:4: missing fields"));
        let err = ParseError { file: None, line: 2, message: "x".into() };
        assert_eq!(err.to_string(), "line 2: x");
    }

    #[test]
    fn test_scan_directory_recursive_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("sub"))?;
        std::fs::write(dir.path().join("b.jsonl"), FULL)?;
        std::fs::write(dir.path().join("sub").join("a.jsonl"), FULL)?;
        std::fs::write(dir.path().join("notes.txt"), "x")?;

        let files = FileScanner::new().scan(dir.path())?;
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|w| w[0] <= w[1]));
        assert!(files.iter().all(|p| is_jsonl(p)));
        assert!(FileScanner::new().scan(&dir.path().join("missing")).is_err());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_directory_ignores_symlink_loops() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.jsonl"), FULL)?;
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop"))?;
        std::os::unix::fs::symlink(dir.path().join("a.jsonl"), dir.path().join("alias.jsonl"))?;

        let files = FileScanner::new().scan(dir.path())?;
        assert_eq!(files, vec![dir.path().join("a.jsonl")]);
        Ok(())
    }

    #[test]
    fn test_size_limit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let small = dir.path().join("small.jsonl");
        let big = dir.path().join("big.jsonl");
        std::fs::write(&small, FULL)?;
        std::fs::write(&big, format!("{FULL}\n").repeat(20))?;

        let limit = (FULL.len() + 1) as u64;
        let kept = FileScanner::new().filter_by_size(vec![small.clone(), big.clone()], limit);
        assert_eq!(kept, vec![small.clone()]);

        let parser = JsonlParser::new(limit, true);
        assert!(parser.parse_file(&big)?.records.is_empty());
        assert_eq!(parser.parse_file(&small)?.records.len(), 1);

        let all = parser.parse_files(&[small, dir.path().join("gone.jsonl")]);
        assert_eq!(all.records.len(), 1);
        assert_eq!(all.errors.len(), 1);
        Ok(())
    }

    #[test]
    fn test_error_summary_truncates() {
        let parser = JsonlParser::new(u64::MAX, true);
        let out = parser.parse_str(&"nope\n".repeat(5), None);
        let summary = out.error_summary(2);
        assert!(summary.starts_with("5 errors:"));
        assert!(summary.contains("... and 3 more"));
    }
}
