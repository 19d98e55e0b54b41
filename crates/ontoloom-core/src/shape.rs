//! Response shapes negotiated between a prompt and the gateway.
//!
//! A [`ResponseShape`] records, for each requested relation, whether the
//! model was asked for a list or a single string and whether a specificity
//! score travels inline with each item. The gateway parses raw model output
//! against the shape into a [`ResponseMap`] keyed by relation name, in the
//! order the relations were requested.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::models::{CandidateObject, CaseChange, Separator};

/// One requested relation inside a response shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeField {
    pub relation: String,
    pub multi: bool,
    pub inline_specificity: bool,
    /// Maps the first returned key to the text that is kept.
    pub remap: Option<BTreeMap<String, String>>,
}

impl ShapeField {
    pub fn new(relation: impl Into<String>, multi: bool, inline_specificity: bool) -> Self {
        Self {
            relation: relation.into(),
            multi,
            inline_specificity,
            remap: None,
        }
    }

    pub fn with_remap(mut self, remap: Option<BTreeMap<String, String>>) -> Self {
        self.remap = remap;
        self
    }
}

/// Expected layout of one model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseShape {
    pub fields: Vec<ShapeField>,
    pub json: bool,
    pub separator: Separator,
    pub surrounder: String,
    pub case_change: CaseChange,
}

/// Parsed response: relation name to ordered candidate objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMap {
    entries: Vec<(String, Vec<CandidateObject>)>,
}

impl ResponseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relation: impl Into<String>, objects: Vec<CandidateObject>) {
        let relation = relation.into();
        if let Some(slot) = self.entries.iter_mut().find(|(r, _)| *r == relation) {
            slot.1 = objects;
        } else {
            self.entries.push((relation, objects));
        }
    }

    pub fn get(&self, relation: &str) -> Option<&[CandidateObject]> {
        self.entries
            .iter()
            .find(|(r, _)| r == relation)
            .map(|(_, v)| v.as_slice())
    }

    /// Objects of `relation`, or a malformed-response error when absent.
    pub fn require(&self, relation: &str) -> Result<&[CandidateObject]> {
        self.get(relation).ok_or_else(|| {
            Error::MalformedResponse(format!("response has no key '{}'", relation))
        })
    }

    /// Iterate entries in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[CandidateObject])> {
        self.entries.iter().map(|(r, v)| (r.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResponseShape {
    /// Parse raw model output according to this shape.
    pub fn parse(&self, raw: &str) -> Result<ResponseMap> {
        let mut map = if self.json {
            self.parse_json(raw)?
        } else {
            self.parse_delimited(raw)?
        };

        for field in &self.fields {
            if let Some(objects) = map.entries.iter_mut().find(|(r, _)| *r == field.relation) {
                for obj in objects.1.iter_mut() {
                    obj.text = self.case_change.apply(&obj.text);
                }
                dedup_objects(&mut objects.1);
                apply_remap(field, self.case_change, &mut objects.1)?;
            }
        }
        Ok(map)
    }

    fn parse_json(&self, raw: &str) -> Result<ResponseMap> {
        let body = extract_json_object(raw).ok_or_else(|| {
            Error::MalformedResponse(format!("no JSON object in response: {}", truncate(raw)))
        })?;
        let value: JsonValue = serde_json::from_str(body)
            .map_err(|e| Error::MalformedResponse(format!("invalid JSON response: {}", e)))?;
        let obj = value.as_object().ok_or_else(|| {
            Error::MalformedResponse("top-level JSON value is not an object".into())
        })?;

        let mut map = ResponseMap::new();
        for field in &self.fields {
            let entry = obj.get(&field.relation).ok_or_else(|| {
                Error::MalformedResponse(format!("response has no key '{}'", field.relation))
            })?;
            map.insert(field.relation.clone(), json_objects(entry));
        }
        Ok(map)
    }

    fn parse_delimited(&self, raw: &str) -> Result<ResponseMap> {
        let mut lines = raw.lines().filter_map(|l| strip_surrounder(l, &self.surrounder));
        let token = self.separator.token();

        let mut map = ResponseMap::new();
        for field in &self.fields {
            let line = lines.next().ok_or_else(|| {
                Error::MalformedResponse(format!(
                    "missing response line for '{}'",
                    field.relation
                ))
            })?;
            let texts: Vec<String> = if field.multi {
                split_items(line, token)
            } else {
                let t = line.trim();
                if t.is_empty() { vec![] } else { vec![t.to_string()] }
            };

            let scores: Vec<Option<f64>> = if field.inline_specificity {
                let line = lines.next().ok_or_else(|| {
                    Error::MalformedResponse(format!(
                        "missing specificity line for '{}'",
                        field.relation
                    ))
                })?;
                if field.multi {
                    split_items(line, token)
                        .iter()
                        .map(|s| s.parse::<f64>().ok())
                        .collect()
                } else {
                    vec![line.trim().parse::<f64>().ok()]
                }
            } else {
                Vec::new()
            };

            let objects = texts
                .into_iter()
                .enumerate()
                .map(|(i, text)| CandidateObject {
                    text,
                    specificity: scores.get(i).copied().flatten(),
                })
                .collect();
            map.insert(field.relation.clone(), objects);
        }
        Ok(map)
    }

    /// Field for `relation`, if the shape requested it.
    pub fn field(&self, relation: &str) -> Option<&ShapeField> {
        self.fields.iter().find(|f| f.relation == relation)
    }
}

/// Drop objects whose normalised text was already seen, keeping the first.
/// A later duplicate only contributes a score the first one lacked.
fn dedup_objects(objects: &mut Vec<CandidateObject>) {
    let mut kept: Vec<CandidateObject> = Vec::with_capacity(objects.len());
    for obj in objects.drain(..) {
        match kept.iter_mut().find(|k| k.text == obj.text) {
            Some(first) => {
                if first.specificity.is_none() {
                    first.specificity = obj.specificity;
                }
            }
            None => kept.push(obj),
        }
    }
    *objects = kept;
}

/// Remap the first object. Keys are compared after the case change, so a
/// table written as "Sudden" matches a lowered "sudden"; mapped values are
/// kept as written.
fn apply_remap(
    field: &ShapeField,
    case_change: CaseChange,
    objects: &mut [CandidateObject],
) -> Result<()> {
    let Some(remap) = &field.remap else {
        return Ok(());
    };
    if let Some(first) = objects.first_mut() {
        let key = first.text.trim();
        let mapped = remap
            .get(key)
            .or_else(|| {
                remap
                    .iter()
                    .find(|(k, _)| case_change.apply(k.trim()) == key)
                    .map(|(_, v)| v)
            })
            .ok_or_else(|| {
                Error::MalformedResponse(format!(
                    "response '{}' for '{}' is not in the remap table",
                    first.text, field.relation
                ))
            })?;
        first.text = mapped.clone();
    }
    Ok(())
}

/// Candidate objects from one JSON value.
///
/// Dictionaries carry specificity as their values; strings and arrays carry
/// none.
fn json_objects(value: &JsonValue) -> Vec<CandidateObject> {
    match value {
        JsonValue::Object(m) => m
            .iter()
            .map(|(k, v)| CandidateObject {
                text: k.trim().to_string(),
                specificity: json_score(v),
            })
            .filter(|o| !o.text.is_empty())
            .collect(),
        JsonValue::Array(items) => items
            .iter()
            .filter_map(json_text)
            .map(|text| CandidateObject { text, specificity: None })
            .collect(),
        JsonValue::Null => Vec::new(),
        other => json_text(other)
            .map(|text| vec![CandidateObject { text, specificity: None }])
            .unwrap_or_default(),
    }
}

fn json_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn json_score(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Slice out the outermost `{...}`, tolerating code fences and chatter.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn strip_surrounder<'a>(line: &'a str, surrounder: &str) -> Option<&'a str> {
    let t = line.trim();
    if surrounder.is_empty() || t.len() < surrounder.len() * 2 {
        return None;
    }
    t.strip_prefix(surrounder)?.strip_suffix(surrounder)
}

fn split_items(line: &str, token: char) -> Vec<String> {
    line.split(token)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn truncate(raw: &str) -> String {
    raw.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(json: bool, fields: Vec<ShapeField>) -> ResponseShape {
        ResponseShape {
            fields,
            json,
            separator: Separator::Tab,
            surrounder: "__resp__".into(),
            case_change: CaseChange::Lower,
        }
    }

    #[test]
    fn test_parse_json_preserves_key_order() {
        let s = shape(true, vec![ShapeField::new("has_symptom", true, true)]);
        let raw = r#"{"has_symptom": {"Wheezing": 9, "cough": "10", "chest findings": null}}"#;
        let map = s.parse(raw).unwrap();
        let objs = map.get("has_symptom").unwrap();
        let texts: Vec<&str> = objs.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["wheezing", "cough", "chest findings"]);
        assert_eq!(objs[0].specificity, Some(9.0));
        assert_eq!(objs[1].specificity, Some(10.0));
        assert_eq!(objs[2].specificity, None);
    }

    #[test]
    fn test_parse_json_tolerates_code_fence() {
        let s = shape(true, vec![ShapeField::new("ays", false, false)]);
        let raw = "```json\n{\"ays\": {\"8\": null}}\n```";
        let map = s.parse(raw).unwrap();
        assert_eq!(map.get("ays").unwrap()[0].text, "8");
    }

    #[test]
    fn test_parse_json_missing_key_is_malformed() {
        let s = shape(true, vec![ShapeField::new("ays", false, false)]);
        let err = s.parse(r#"{"other": {"x": null}}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_json_not_json_is_malformed() {
        let s = shape(true, vec![ShapeField::new("ays", false, false)]);
        assert!(matches!(
            s.parse("I am not sure."),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_json_array_and_string_values() {
        let s = shape(
            true,
            vec![
                ShapeField::new("a", true, false),
                ShapeField::new("b", false, false),
            ],
        );
        let map = s.parse(r#"{"a": ["X", "y"], "b": "Z"}"#).unwrap();
        assert_eq!(map.get("a").unwrap().len(), 2);
        assert_eq!(map.get("b").unwrap()[0].text, "z");
    }

    #[test]
    fn test_parse_remap_first_key() {
        let mut remap = BTreeMap::new();
        remap.insert("1".to_string(), "Acute".to_string());
        let mut s = shape(
            true,
            vec![ShapeField::new("onset", false, false).with_remap(Some(remap))],
        );
        s.case_change = CaseChange::None;
        let map = s.parse(r#"{"onset": {"1": null}}"#).unwrap();
        assert_eq!(map.get("onset").unwrap()[0].text, "Acute");

        let err = s.parse(r#"{"onset": {"2": null}}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_remap_matches_after_case_change() {
        let mut remap = BTreeMap::new();
        remap.insert("Sudden".to_string(), "Acute".to_string());
        let s = shape(
            true,
            vec![ShapeField::new("onset", false, false).with_remap(Some(remap))],
        );
        let map = s.parse(r#"{"onset": {"SUDDEN": null}}"#).unwrap();
        assert_eq!(map.get("onset").unwrap()[0].text, "Acute");
    }

    #[test]
    fn test_parse_drops_case_variant_duplicates() {
        let s = shape(true, vec![ShapeField::new("has_symptom", true, true)]);
        let raw = r#"{"has_symptom": {"Headache": null, "nausea": 8, "headache": 9}}"#;
        let map = s.parse(raw).unwrap();
        let objs = map.get("has_symptom").unwrap();
        let texts: Vec<&str> = objs.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["headache", "nausea"]);
        assert_eq!(objs[0].specificity, Some(9.0));
    }

    #[test]
    fn test_parse_delimited_with_inline_specificity() {
        let s = shape(
            false,
            vec![
                ShapeField::new("has_symptom", true, true),
                ShapeField::new("onset", false, false),
            ],
        );
        let raw = "Sure!\n__resp__Fever\tcough__resp__\n__resp__10\t3__resp__\n__resp__sudden__resp__\n";
        let map = s.parse(raw).unwrap();
        let objs = map.get("has_symptom").unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0].text, "fever");
        assert_eq!(objs[0].specificity, Some(10.0));
        assert_eq!(objs[1].specificity, Some(3.0));
        assert_eq!(map.get("onset").unwrap()[0].text, "sudden");
    }

    #[test]
    fn test_parse_delimited_missing_line_is_malformed() {
        let s = shape(false, vec![ShapeField::new("has_symptom", true, true)]);
        let err = s.parse("__resp__fever__resp__").unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn test_response_map_require() {
        let mut map = ResponseMap::new();
        map.insert("a", vec![]);
        assert!(map.require("a").unwrap().is_empty());
        assert!(matches!(map.require("b"), Err(Error::MalformedResponse(_))));
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a"]);
    }
}
