use regex::RegexSet;

/// Screens generated sub-agent text for instructions that would make the
/// orchestrator do something destructive. Not a security boundary; the
/// execution sandbox is.
pub struct ContentFilter {
    patterns: RegexSet,
    pattern_reasons: Vec<String>,
}

impl ContentFilter {
    /// Create a new filter from a list of (pattern, reason) tuples.
    pub fn new(patterns: &[(String, String)]) -> Result<Self, regex::Error> {
        let (regexes, reasons): (Vec<_>, Vec<_>) = patterns.iter().cloned().unzip();
        Ok(Self {
            patterns: RegexSet::new(&regexes)?,
            pattern_reasons: reasons,
        })
    }

    pub fn with_defaults() -> Result<Self, regex::Error> {
        Self::new(&default_blocklist())
    }

    /// Reason for the first matching pattern, if any.
    pub fn check(&self, text: &str) -> Option<&str> {
        self.patterns
            .matches(text)
            .into_iter()
            .next()
            .map(|i| self.pattern_reasons[i].as_str())
    }
}

/// Patterns a generated docstring or template must never contain.
pub fn default_blocklist() -> Vec<(String, String)> {
    vec![
        (r"(?i)\bsudo\b".into(), "Privilege escalation (sudo)".into()),
        (r"rm\s+(-[^\s]*)?(\s+-[^\s]*)?\s+/($|\s)".into(), "Recursive deletion at root".into()),
        (r"rm\s+(-[^\s]*)?(\s+-[^\s]*)?\s+/\*".into(), "Recursive deletion at root".into()),
        (r"(?i)\bmkfs\b".into(), "Filesystem formatting".into()),
        (r"(?i)\bdd\b\s.*of=/dev/".into(), "Direct device writes".into()),
        (r":\(\)\s*\{.*\}".into(), "Fork bomb pattern".into()),
        (r"(?i)(curl|wget)[^|\n]*\|\s*(ba|z)?sh\b".into(), "Piping a download into a shell".into()),
        (r"(?i)git\s+push\b".into(), "Pushing to a remote repository".into()),
        (r"(?i)\b(api[_-]?key|secret[_-]?key|password)\s*[:=]".into(), "Embedded credentials".into()),
    ]
}
