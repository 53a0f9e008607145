//! Column alias tables for bulk imports.
//!
//! Spreadsheets arrive with loosely named headers ("First Name", "firstName",
//! "first"). Each entity has a fixed table of accepted aliases per canonical
//! field; a file's headers are resolved against it once, before any row is
//! written.

use crate::error::{Result, SchoolError};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Students,
    Teachers,
    Classes,
}

impl ImportKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "students" | "student" => Some(ImportKind::Students),
            "teachers" | "teacher" => Some(ImportKind::Teachers),
            "classes" | "class" => Some(ImportKind::Classes),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportKind::Students => "students",
            ImportKind::Teachers => "teachers",
            ImportKind::Classes => "classes",
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            ImportKind::Students => STUDENT_FIELDS,
            ImportKind::Teachers => TEACHER_FIELDS,
            ImportKind::Classes => CLASS_FIELDS,
        }
    }
}

#[derive(Debug)]
pub struct FieldSpec {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub required: bool,
}

const fn field(
    canonical: &'static str,
    aliases: &'static [&'static str],
    required: bool,
) -> FieldSpec {
    FieldSpec {
        canonical,
        aliases,
        required,
    }
}

pub const STUDENT_FIELDS: &[FieldSpec] = &[
    field("studentNo", &["studentId", "Student ID", "id", "studentNo"], false),
    field("firstName", &["firstName", "First Name", "first"], true),
    field("lastName", &["lastName", "Last Name", "last"], false),
    field("email", &["email"], false),
    field("dateOfBirth", &["dateOfBirth", "Date of Birth", "dob"], false),
    field("gender", &["gender"], false),
    field("class", &["class", "Class Name", "className"], false),
    field("section", &["section"], false),
    field("rollNumber", &["rollNumber", "Roll Number", "roll"], false),
    field("parentName", &["parentName", "Parent Name", "parent"], false),
    field("parentPhone", &["parentPhone", "Parent Phone", "phone"], false),
    field("parentEmail", &["parentEmail", "Parent Email"], false),
    field("address", &["address"], false),
    field("admissionDate", &["admissionDate", "Admission Date"], false),
    field("status", &["status"], false),
];

pub const TEACHER_FIELDS: &[FieldSpec] = &[
    field("name", &["name", "Teacher Name"], true),
    field("email", &["email", "Email Address"], true),
    field("phone", &["phone", "Phone Number"], false),
    field("class", &["class", "Class Name", "className"], false),
    field("section", &["section"], false),
    field("isClassTeacher", &["isClassTeacher", "Class Teacher"], false),
    field("salary", &["salary"], false),
    field("address", &["address"], false),
];

pub const CLASS_FIELDS: &[FieldSpec] = &[
    field("name", &["name", "Class Name", "className"], true),
    field("section", &["section"], false),
    field("capacity", &["capacity"], false),
];

/// Lower-cases and drops separators so "First Name", "first_name" and
/// "firstName" compare equal.
pub fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub kind: ImportKind,
    by_header: HashMap<String, &'static str>,
    pub ignored: Vec<String>,
}

impl ColumnMap {
    pub fn build(kind: ImportKind, headers: &[String]) -> Result<Self> {
        let mut alias_index: HashMap<String, &'static str> = HashMap::new();
        for entry in kind.fields() {
            for alias in entry.aliases {
                alias_index.insert(normalize_header(alias), entry.canonical);
            }
        }

        let mut by_header = HashMap::new();
        let mut claimed: BTreeMap<&'static str, String> = BTreeMap::new();
        let mut ignored = Vec::new();
        for header in headers {
            let Some(canonical) = alias_index.get(&normalize_header(header)).copied() else {
                ignored.push(header.clone());
                continue;
            };
            if let Some(prev) = claimed.get(canonical) {
                return Err(SchoolError::validation(format!(
                    "columns '{prev}' and '{header}' both map to {canonical}"
                )));
            }
            claimed.insert(canonical, header.clone());
            by_header.insert(header.clone(), canonical);
        }

        let missing: Vec<&str> = kind
            .fields()
            .iter()
            .filter(|f| f.required && !claimed.contains_key(f.canonical))
            .map(|f| f.canonical)
            .collect();
        if !missing.is_empty() {
            return Err(SchoolError::validation(format!(
                "{} import is missing required column(s): {}",
                kind.as_str(),
                missing.join(", ")
            )));
        }

        Ok(Self {
            kind,
            by_header,
            ignored,
        })
    }

    /// Re-keys one input row by canonical field, dropping blanks and
    /// unrecognised columns.
    pub fn canonical_row<'a, I>(&self, cells: I) -> HashMap<&'static str, String>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut out = HashMap::new();
        for (header, value) in cells {
            let Some(canonical) = self.by_header.get(header) else {
                continue;
            };
            let v = value.trim();
            if !v.is_empty() {
                out.insert(*canonical, v.to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn spreadsheet_headers_resolve_to_canonical_fields() {
        let map = ColumnMap::build(
            ImportKind::Students,
            &headers(&["First Name", "last", "Roll Number", "Class", "Favourite Colour"]),
        )
        .expect("map");
        assert_eq!(map.ignored, vec!["Favourite Colour".to_string()]);

        let row = map.canonical_row([
            ("First Name", " Meera "),
            ("last", "Iyer"),
            ("Roll Number", "12"),
            ("Class", ""),
            ("Favourite Colour", "blue"),
        ]);
        assert_eq!(row.get("firstName").map(String::as_str), Some("Meera"));
        assert_eq!(row.get("lastName").map(String::as_str), Some("Iyer"));
        assert_eq!(row.get("rollNumber").map(String::as_str), Some("12"));
        assert!(!row.contains_key("class"));
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn missing_required_column_rejects_file() {
        let err = ColumnMap::build(ImportKind::Teachers, &headers(&["Name", "Phone"]))
            .expect_err("email missing");
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn two_aliases_for_one_field_is_ambiguous() {
        let err = ColumnMap::build(ImportKind::Classes, &headers(&["name", "Class Name"]))
            .expect_err("ambiguous");
        assert_eq!(err.code(), "bad_params");
    }

    #[test]
    fn alias_tables_have_no_collisions() {
        for kind in [ImportKind::Students, ImportKind::Teachers, ImportKind::Classes] {
            let mut seen: HashMap<String, &str> = HashMap::new();
            for entry in kind.fields() {
                for alias in entry.aliases {
                    let key = normalize_header(alias);
                    if let Some(prev) = seen.insert(key.clone(), entry.canonical) {
                        assert_eq!(prev, entry.canonical, "{key} claimed twice in {kind:?}");
                    }
                }
            }
        }
    }
}
