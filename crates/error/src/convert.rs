use crate::{ErrorCode, ErrorContext, QuarryError};
use arrow::error::ArrowError;
use sqlparser::parser::ParserError;

impl From<ParserError> for QuarryError {
    fn from(err: ParserError) -> Self {
        QuarryError::new(ErrorCode::SyntaxError, err.to_string())
    }
}

impl From<ArrowError> for QuarryError {
    fn from(err: ArrowError) -> Self {
        QuarryError::new(ErrorCode::EncodingFailed, err.to_string())
    }
}

impl From<csv::Error> for QuarryError {
    fn from(err: csv::Error) -> Self {
        let row = err.position().map(|p| p.record() as usize);
        let message = err.to_string();
        let mut error = QuarryError::new(ErrorCode::MalformedPayload, message);
        if let Some(row) = row {
            error = error.with_context(ErrorContext::Parse {
                locator: String::new(),
                row: Some(row),
                field: None,
            });
        }
        error
    }
}

impl From<std::io::Error> for QuarryError {
    fn from(err: std::io::Error) -> Self {
        QuarryError::new(ErrorCode::SourceIo, err.to_string())
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        QuarryError::new(ErrorCode::SerializationFailed, err.to_string())
    }
}

impl From<serde_yaml::Error> for QuarryError {
    fn from(err: serde_yaml::Error) -> Self {
        QuarryError::new(ErrorCode::InvalidYaml, err.to_string())
    }
}

/// Closest candidate within edit distance 3, used for "Did you mean" hints.
pub fn find_closest_match(target: &str, options: &[String]) -> Option<String> {
    let mut best_match: Option<&str> = None;
    let mut min_distance = usize::MAX;

    for option in options {
        let distance = levenshtein(target, option);
        if distance < min_distance && distance <= 3 {
            min_distance = distance;
            best_match = Some(option.as_str());
        }
    }

    best_match.map(|s| s.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("book", "back"), 2);
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_find_closest_match() {
        let options = vec![
            "close".to_string(),
            "volume".to_string(),
            "ticker".to_string(),
        ];

        assert_eq!(
            find_closest_match("volum", &options),
            Some("volume".to_string())
        );
        assert_eq!(
            find_closest_match("tickr", &options),
            Some("ticker".to_string())
        );
        assert_eq!(find_closest_match("completely_different", &options), None);
    }

    #[test]
    fn test_io_error_mapping() {
        let io_err = std::io::Error::other("File error");
        let err: QuarryError = io_err.into();
        assert_eq!(err.code, ErrorCode::SourceIo);
        assert!(err.message.contains("File error"));
    }

    #[test]
    fn test_parser_error_mapping() {
        let err: QuarryError = ParserError::ParserError("Expected SELECT".to_string()).into();
        assert_eq!(err.code, ErrorCode::SyntaxError);
        assert!(err.message.contains("Expected SELECT"));
    }
}
