//! Failure taxonomy: classifies stored error text into a fixed set of
//! categories with retry policy, causes and fixes for each.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Category of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    FileNotFound,
    ParsingError,
    MemoryError,
    Timeout,
    RequiresHumanReview,
    MatchingError,
    Unknown,
}

/// Checked in order; the first matching pattern wins.
static RULES: LazyLock<Vec<(ErrorCategory, Regex)>> = LazyLock::new(|| {
    [
        (
            ErrorCategory::RequiresHumanReview,
            r"(?i)critical (issue|validation)|requires? (human )?review|manual approval",
        ),
        (
            ErrorCategory::FileNotFound,
            r"(?i)no such file|file not found|not found|does not exist|enoent|cannot open",
        ),
        (
            ErrorCategory::MemoryError,
            r"(?i)out of memory|\boom\b|memory|allocation failed|resource(s)? exhausted",
        ),
        (
            ErrorCategory::Timeout,
            r"(?i)timed? ?out|timeout|deadline exceeded",
        ),
        (
            ErrorCategory::ParsingError,
            r"(?i)pars(e|ing)|malformed|corrupt|invalid format|unexpected (token|eof)|decode|no geometry|unusable dimensions",
        ),
        (
            ErrorCategory::MatchingError,
            r"(?i)match|association|unfilled slot|no slot",
        ),
    ]
    .into_iter()
    .map(|(category, pattern)| (category, Regex::new(pattern).expect("valid regex")))
    .collect()
});

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::FileNotFound,
        ErrorCategory::ParsingError,
        ErrorCategory::MemoryError,
        ErrorCategory::Timeout,
        ErrorCategory::RequiresHumanReview,
        ErrorCategory::MatchingError,
        ErrorCategory::Unknown,
    ];

    /// Classify free-form error text.
    pub fn classify(message: &str) -> Self {
        RULES
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    /// String representation for database storage.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::FileNotFound => "file_not_found",
            ErrorCategory::ParsingError => "parsing_error",
            ErrorCategory::MemoryError => "memory_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RequiresHumanReview => "requires_human_review",
            ErrorCategory::MatchingError => "matching_error",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Parse from a string, defaulting to `Unknown` for unrecognised values.
    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .unwrap_or(ErrorCategory::Unknown)
    }

    pub fn retry_possible(self) -> bool {
        !matches!(
            self,
            ErrorCategory::FileNotFound | ErrorCategory::RequiresHumanReview
        )
    }

    pub fn retry_recommended(self) -> bool {
        matches!(
            self,
            ErrorCategory::MemoryError | ErrorCategory::Timeout | ErrorCategory::Unknown
        )
    }

    pub fn possible_causes(self) -> &'static [&'static str] {
        match self {
            ErrorCategory::FileNotFound => &[
                "The source or template file was moved or deleted",
                "The path in the batch row is misspelled",
            ],
            ErrorCategory::ParsingError => &[
                "The design file is corrupt or saved in an unsupported version",
                "Layers are missing bounds the extractor needs",
            ],
            ErrorCategory::MemoryError => &[
                "The design file is very large",
                "Too many jobs were processed at the same time",
            ],
            ErrorCategory::Timeout => &[
                "The collaborator service is overloaded",
                "The file takes longer to process than the configured timeout",
            ],
            ErrorCategory::RequiresHumanReview => {
                &["Validation found critical issues that need a decision"]
            }
            ErrorCategory::MatchingError => &[
                "Element and slot names share no common words",
                "The approved associations no longer fit the extracted content",
            ],
            ErrorCategory::Unknown => &["An unexpected error occurred"],
        }
    }

    pub fn suggested_fixes(self) -> &'static [&'static str] {
        match self {
            ErrorCategory::FileNotFound => &[
                "Check that the file exists at the recorded path",
                "Re-upload the batch with corrected paths",
            ],
            ErrorCategory::ParsingError => &[
                "Re-save the design file and upload it again",
                "Retry once the file has been repaired",
            ],
            ErrorCategory::MemoryError => &[
                "Retry when fewer jobs are running",
                "Reduce the size of the source file",
            ],
            ErrorCategory::Timeout => &["Retry the job", "Increase the collaborator timeout"],
            ErrorCategory::RequiresHumanReview => &[
                "Review the validation issues",
                "Override with a justification or return to matching",
            ],
            ErrorCategory::MatchingError => &[
                "Review and correct the associations manually",
                "Rename layers to match template slot names",
            ],
            ErrorCategory::Unknown => &["Retry the job", "Inspect the job log for details"],
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
