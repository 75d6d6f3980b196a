//! Section-scoped edit application.
//!
//! When an author with a queued edit submits another section-scoped edit
//! to the same page, the builder recomputes the full resulting text by
//! applying the new section onto the *previously queued* content, not onto
//! the live page. The actual section semantics belong to the platform, so
//! they sit behind a trait; the default implementation understands
//! `== Heading ==`-style wikitext sections.

use serde::{Deserialize, Serialize};

/// Which section a section-scoped edit addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionId {
    /// Section 0 is the lead (text before the first heading); sections
    /// count up from there in document order.
    Index(usize),
    /// Append as a new section at the end of the page.
    New,
}

pub trait SectionEditor: Send + Sync {
    /// Produce the full text of `base` with the addressed section replaced
    /// by `text`. An out-of-range index leaves `base` unchanged apart from
    /// the replacement being appended, which is the safest interpretation
    /// of a stale section pointer.
    fn replace_section(&self, base: &str, section: SectionId, text: &str) -> String;
}

/// Default editor: sections are delimited by lines that look like
/// `= Heading =` through `====== Heading ======`.
pub struct HeadingSections;

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_end();
    trimmed.len() >= 3 && trimmed.starts_with('=') && trimmed.ends_with('=')
}

/// Split `base` into sections: the lead, then one section per heading.
fn split_sections(base: &str) -> Vec<String> {
    let mut sections: Vec<String> = vec![String::new()];
    for line in base.split_inclusive('\n') {
        if is_heading(line) {
            sections.push(String::new());
        }
        sections
            .last_mut()
            .expect("sections always has a lead")
            .push_str(line);
    }
    sections
}

impl SectionEditor for HeadingSections {
    fn replace_section(&self, base: &str, section: SectionId, text: &str) -> String {
        let mut sections = split_sections(base);
        match section {
            SectionId::Index(index) if index < sections.len() => {
                sections[index] = text.to_string();
            }
            SectionId::Index(_) | SectionId::New => {
                sections.push(text.to_string());
            }
        }

        let mut result = String::new();
        for (i, section_text) in sections.iter().enumerate() {
            if i > 0 && !result.is_empty() && !result.ends_with('\n') {
                result.push('\n');
            }
            result.push_str(section_text);
        }
        result
    }
}
