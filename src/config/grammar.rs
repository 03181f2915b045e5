//! The textual configuration grammar (spec.md §6): a whitespace-separated
//! token stream with `#`-to-end-of-line comments.
//!
//! Grounded on `Configuration::parse` / `Configuration::getNextWord` in
//! `original_source/historical/src/configuration.cc` — a line-oriented
//! scanner that strips comments before tokenizing and treats any
//! directive it doesn't recognize as a fatal parse error.

use std::path::{Path, PathBuf};

use crate::config::{Configuration, MetricDescriptor, Submetric};
use crate::error::{Error, Result};

struct Token {
    word: String,
    line: usize,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let uncommented = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        for word in uncommented.split_whitespace() {
            tokens.push(Token { word: word.to_string(), line: line_no });
        }
    }
    tokens
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next_word(&mut self) -> Option<&'a str> {
        let tok = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(tok.word.as_str())
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos.saturating_sub(1)).map_or(0, |t| t.line)
    }

    fn require_word(&mut self, what: &str) -> Result<&'a str> {
        self.next_word().ok_or_else(|| Error::config(self.line(), format!("expected {what}, found end of file")))
    }

    fn require_u32(&mut self, what: &str) -> Result<u32> {
        let line = self.line() + 1; // best-effort: points at the line the missing/bad value would be on
        let word = self.require_word(what)?;
        word.parse::<u32>()
            .map_err(|_| Error::config(line.max(self.line()), format!("expected an unsigned integer for {what}, found '{word}'")))
    }

    fn require_f64(&mut self, what: &str) -> Result<f64> {
        let word = self.require_word(what)?;
        word.parse::<f64>()
            .map_err(|_| Error::config(self.line(), format!("expected a number for {what}, found '{word}'")))
    }
}

/// Parses a `save`/`header`/`trailer`/`minruns`/`maxruns`/`s`/`d`
/// directive stream read from `path`.
pub fn parse(path: &Path) -> Result<Configuration> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_str(&text)
}

/// Parses configuration text directly; split out from [`parse`] so
/// tests don't need a real file on disk.
pub fn parse_str(text: &str) -> Result<Configuration> {
    let tokens = tokenize(text);
    let mut cursor = Cursor { tokens: &tokens, pos: 0 };
    let mut config = Configuration::default();

    while let Some(directive) = cursor.next_word() {
        match directive {
            "save" => {
                config.save_file = PathBuf::from(cursor.require_word("a path")?);
            }
            "header" => {
                config.header = Some(PathBuf::from(cursor.require_word("a path")?));
            }
            "trailer" => {
                config.trailer = Some(PathBuf::from(cursor.require_word("a path")?));
            }
            "minruns" => {
                config.min_runs = cursor.require_u32("minruns' argument")?;
            }
            "maxruns" => {
                config.max_runs = cursor.require_u32("maxruns' argument")?;
            }
            "s" => parse_averaged_descriptor(&mut cursor, &mut config)?,
            "d" => parse_distribution_descriptor(&mut cursor, &mut config)?,
            other => {
                return Err(Error::config(cursor.line(), format!("unknown directive '{other}'")));
            }
        }
    }

    Ok(config)
}

/// Consumes the optional `[out CL] [check CL threshold]` tail shared by
/// `s` and `d` descriptor lines. Fails if neither is present, per
/// spec.md §6 ("at least one of out/check required").
fn parse_out_check_tail(cursor: &mut Cursor) -> Result<MetricDescriptor> {
    let mut desc = MetricDescriptor { relevant: true, ..MetricDescriptor::default() };

    loop {
        let save = cursor.pos;
        match cursor.next_word() {
            Some("out") => {
                desc.output = true;
                desc.out_cl = cursor.require_f64("out's confidence level")?;
            }
            Some("check") => {
                desc.check = true;
                desc.cl = cursor.require_f64("check's confidence level")?;
                desc.threshold = cursor.require_f64("check's threshold")?;
            }
            _ => {
                cursor.pos = save;
                break;
            }
        }
    }

    if !desc.output && !desc.check {
        return Err(Error::config(
            cursor.line(),
            "metric descriptor needs at least one of 'out' or 'check'".to_string(),
        ));
    }
    Ok(desc)
}

fn parse_averaged_descriptor(cursor: &mut Cursor, config: &mut Configuration) -> Result<()> {
    let name = cursor.require_word("a metric name")?.to_string();
    let id = cursor.require_u32("a metric index")?;
    let desc = parse_out_check_tail(cursor)?;
    config.insert_avg(&name, id, desc);
    Ok(())
}

fn parse_distribution_descriptor(cursor: &mut Cursor, config: &mut Configuration) -> Result<()> {
    let name = cursor.require_word("a metric name")?.to_string();
    let id = cursor.require_u32("a metric index")?;
    let sub_word = cursor.require_word("a submetric (pmf/cdf/mean/median/q95/q99)")?;
    let sub = Submetric::parse(sub_word).ok_or_else(|| {
        Error::config(cursor.line(), format!("unknown distribution submetric '{sub_word}'"))
    })?;
    let desc = parse_out_check_tail(cursor)?;
    config.insert_dst(&name, id, sub, desc);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_save_and_run_bounds() {
        let config = parse_str("save out.dat\nminruns 2\nmaxruns 100\n").unwrap();
        assert_eq!(config.save_file, PathBuf::from("out.dat"));
        assert_eq!(config.min_runs, 2);
        assert_eq!(config.max_runs, 100);
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let config = parse_str("save out.dat # this is a comment\nminruns 3\n").unwrap();
        assert_eq!(config.save_file, PathBuf::from("out.dat"));
        assert_eq!(config.min_runs, 3);
    }

    #[test]
    fn averaged_descriptor_with_check_only() {
        let config = parse_str("s latency 0 check 0.95 0.05\n").unwrap();
        let desc = config.desc_avg("latency", 0).unwrap();
        assert!(desc.relevant);
        assert!(desc.check);
        assert!(!desc.output);
        assert_eq!(desc.cl, 0.95);
        assert_eq!(desc.threshold, 0.05);
    }

    #[test]
    fn averaged_descriptor_needs_out_or_check() {
        let err = parse_str("s latency 0\n").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn distribution_descriptor_with_out_and_check() {
        let config = parse_str("d queue_len 1 pmf out 0.90 check 0.95 0.1\n").unwrap();
        let desc = config.desc_dst("queue_len", 1).unwrap();
        assert!(desc.pmf.output);
        assert!(desc.pmf.check);
        assert_eq!(desc.pmf.out_cl, 0.90);
        assert!(!desc.cdf.relevant);
    }

    #[test]
    fn unknown_directive_is_a_parse_error() {
        let err = parse_str("bogus 1 2 3\n").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn unknown_submetric_is_a_parse_error() {
        let err = parse_str("d q 0 p95 check 0.95 0.1\n").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
