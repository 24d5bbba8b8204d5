use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum TestResultError {
    #[error("empty test result document")]
    Empty,
    #[error("malformed JSON test result: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed XML test result: {0}")]
    Xml(String),
    #[error("test case without a name")]
    UnnamedTestCase,
}

/// Test name to mark for one grader response.
///
/// Accepts either a JSON object of integer marks or an NUnit 3 result document,
/// where each passed `test-case` scores its `Mark` property (default 1) and any
/// other outcome scores 0.
pub(crate) fn parse_marks(document: &str) -> Result<BTreeMap<String, i32>, TestResultError> {
    let trimmed = document.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Err(TestResultError::Empty);
    }

    if trimmed.starts_with('{') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    parse_nunit(trimmed)
}

fn parse_nunit(xml: &str) -> Result<BTreeMap<String, i32>, TestResultError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut marks = BTreeMap::new();
    let mut current: Option<PendingCase> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(element) if element.name().as_ref() == b"test-case" => {
                current = Some(PendingCase::from_element(&element)?);
            }
            Event::Empty(element) if element.name().as_ref() == b"test-case" => {
                PendingCase::from_element(&element)?.finish(&mut marks);
            }
            Event::Empty(element) | Event::Start(element)
                if element.name().as_ref() == b"property" =>
            {
                if let Some(case) = current.as_mut() {
                    case.apply_property(&element)?;
                }
            }
            Event::End(element) if element.name().as_ref() == b"test-case" => {
                if let Some(case) = current.take() {
                    case.finish(&mut marks);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(marks)
}

struct PendingCase {
    name: String,
    passed: bool,
    weight: i32,
}

impl PendingCase {
    fn from_element(element: &BytesStart<'_>) -> Result<Self, TestResultError> {
        let name = attribute(element, "fullname")?
            .or(attribute(element, "name")?)
            .ok_or(TestResultError::UnnamedTestCase)?;
        let passed = attribute(element, "result")?.is_some_and(|result| result == "Passed");
        Ok(Self { name, passed, weight: 1 })
    }

    fn apply_property(&mut self, element: &BytesStart<'_>) -> Result<(), TestResultError> {
        let is_mark = attribute(element, "name")?.is_some_and(|name| name == "Mark");
        if !is_mark {
            return Ok(());
        }
        if let Some(value) = attribute(element, "value")? {
            self.weight = value.trim().parse().map_err(|_| {
                TestResultError::Xml(format!("non-integer Mark property {value:?} on {}", self.name))
            })?;
        }
        Ok(())
    }

    fn finish(self, marks: &mut BTreeMap<String, i32>) {
        let mark = if self.passed { self.weight } else { 0 };
        marks.insert(self.name, mark);
    }
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Result<Option<String>, TestResultError> {
    let Some(attr) = element.try_get_attribute(key).map_err(xml_error)? else {
        return Ok(None);
    };
    let value = attr.unescape_value().map_err(xml_error)?;
    Ok(Some(value.into_owned()))
}

fn xml_error(err: impl std::fmt::Display) -> TestResultError {
    TestResultError::Xml(err.to_string())
}
