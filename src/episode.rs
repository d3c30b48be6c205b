use regex::Regex;
use thiserror::Error;

/// Episode identifier captured by group 1 of the active pattern. Kept verbatim,
/// so `"1"` and `"01"` are different keys.
pub type EpisodeKey = String;

// `\d` matches any Unicode digit, so the built-in patterns spell out ASCII.
pub const DEFAULT_PATTERN: &str = r"\[([0-9]{2})\]";

/// Named pattern presets, `(label, pattern)`.
pub const PRESETS: [(&str, &str); 5] = [
    ("[xx]", r"\[([0-9]{2})\]"),
    ("xx", r"(?:^|[^0-9])([0-9]{2})(?:[^0-9]|$)"),
    ("SxxEyy", r"S[0-9]{1,2}E([0-9]{2})"),
    ("Eyy/EPyy", r"[Ee][Pp]?([0-9]{2})"),
    ("第yy集", r"第([0-9]{2})[集话]"),
];

pub fn preset(label: &str) -> Option<&'static str> {
    PRESETS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(label))
        .map(|(_, pattern)| *pattern)
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid episode pattern {pattern:?}: {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("episode pattern {0:?} has no capture group")]
    NoCaptureGroup(String),
}

#[derive(Debug, Clone)]
pub struct Matcher {
    regex: Regex,
}

impl Matcher {
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let regex = Regex::new(source).map_err(|source_err| CompileError::Invalid {
            pattern: source.to_string(),
            source: source_err,
        })?;
        // captures_len counts the implicit whole-match group
        if regex.captures_len() < 2 {
            return Err(CompileError::NoCaptureGroup(source.to_string()));
        }
        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Extract the episode key from a file name. Anything before the last
    /// `/` or `\` is ignored.
    pub fn extract(&self, filename: &str) -> Option<EpisodeKey> {
        let name = file_name(filename);
        self.regex
            .captures(name)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_PATTERN).expect("default episode pattern is valid"),
        }
    }
}

/// Compile `source`, falling back to [`DEFAULT_PATTERN`] when it is unusable.
/// The compile error is handed back so the caller can flag the input.
pub fn compile_or_default(source: &str) -> (Matcher, Option<CompileError>) {
    match Matcher::compile(source) {
        Ok(matcher) => (matcher, None),
        Err(err) => {
            tracing::warn!("{}, falling back to {}", err, DEFAULT_PATTERN);
            (Matcher::default(), Some(err))
        }
    }
}

pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
