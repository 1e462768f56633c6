//! Keyword inclusion/exclusion rules applied to cleaned titles.

/// Outcome of classifying one title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Matched no inclusion keyword.
    NotIncluded,
    /// Matched an inclusion keyword and an exclusion keyword.
    Excluded,
    Passed,
}

/// Case-insensitive OR-substring rules.
///
/// An empty inclusion list matches every title. Exclusion only applies to
/// titles that already passed inclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRules {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FilterRules {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            include: normalize(include),
            exclude: normalize(exclude),
        }
    }

    /// Rules that let every title through.
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Normalized exclusion keywords, lowercase and non-blank.
    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    pub fn classify(&self, title: &str) -> Verdict {
        let lowered = title.to_lowercase();
        if !self.include.is_empty() && !self.include.iter().any(|k| lowered.contains(k.as_str())) {
            return Verdict::NotIncluded;
        }
        if self.exclude.iter().any(|k| lowered.contains(k.as_str())) {
            return Verdict::Excluded;
        }
        Verdict::Passed
    }
}

/// True if `text` contains any of `keywords`, ignoring case.
pub fn contains_any<S: AsRef<str>>(text: &str, keywords: &[S]) -> bool {
    let lowered = text.to_lowercase();
    keywords
        .iter()
        .any(|k| lowered.contains(&k.as_ref().to_lowercase()))
}

fn normalize<I>(keywords: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    keywords
        .into_iter()
        .map(|k| k.as_ref().trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}
