use regex::{Regex, RegexBuilder};

use crate::Result;

const SEPARATOR_STR: &str = "\\";

/// Include/exclude pair of case-insensitive, dot-all regular expressions.
/// A pattern must match the whole path; `/` in the path is read as `\`.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl PathFilter {
    /// Matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        Ok(Self {
            include: include.map(compile).transpose()?,
            exclude: exclude.map(compile).transpose()?,
        })
    }

    pub fn include(pattern: &str) -> Result<Self> {
        Self::new(Some(pattern), None)
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = path.replace('/', SEPARATOR_STR);
        self.include.as_ref().map_or(true, |re| re.is_match(&path))
            && !self.exclude.as_ref().is_some_and(|re| re.is_match(&path))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()?)
}
