//! Keyword gate for the college domain.
//!
//! A question is in the domain when any keyword occurs as a substring of the
//! lower-cased question. False positives ("sports" in a question about a
//! cricketer) are accepted; the synthesis prompt restricts scope as well.

/// Built-in vocabulary.
pub const COLLEGE_KEYWORDS: &[&str] = &[
    "admission",
    "eligibility",
    "entrance",
    "cut-off",
    "cutoff",
    "form",
    "application",
    "course",
    "program",
    "department",
    "faculty",
    "syllabus",
    "subject",
    "teacher",
    "professor",
    "principal",
    "hod",
    "staff",
    "administration",
    "hostel",
    "library",
    "canteen",
    "lab",
    "sports",
    "transport",
    "facility",
    "facilities",
    "exam",
    "timetable",
    "schedule",
    "result",
    "marks",
    "academic calendar",
    "semester",
    "placement",
    "internship",
    "career",
    "training",
    "recruitment",
    "fee",
    "scholarship",
    "financial aid",
    "payment",
    "club",
    "event",
    "fest",
    "extracurricular",
    "activity",
    "activities",
    "campus",
    "college",
    "contact",
    "office",
    "navigation",
];

#[derive(Debug, Clone)]
pub struct DomainClassifier {
    keywords: Vec<String>,
}

impl Default for DomainClassifier {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl DomainClassifier {
    /// The built-in vocabulary plus `extra` keywords (blank ones ignored).
    pub fn new(extra: &[String]) -> Self {
        let mut keywords: Vec<String> = COLLEGE_KEYWORDS.iter().map(|k| k.to_string()).collect();
        for keyword in extra {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        Self { keywords }
    }

    pub fn is_in_domain(&self, question: &str) -> bool {
        self.matched_keyword(question).is_some()
    }

    /// The first keyword found in `question`, if any.
    pub fn matched_keyword(&self, question: &str) -> Option<&str> {
        let lowered = question.to_lowercase();
        self.keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
    }
}
