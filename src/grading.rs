use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

pub const ABSENT_LABEL: &str = "ABS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    F,
    D,
    C,
    B,
    BPlus,
    A,
    APlus,
}

impl Grade {
    pub const ALL: [Grade; 7] = [
        Grade::APlus,
        Grade::A,
        Grade::BPlus,
        Grade::B,
        Grade::C,
        Grade::D,
        Grade::F,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Grade::ALL.into_iter().find(|g| g.as_str() == s)
    }

    pub fn is_pass(self) -> bool {
        self != Grade::F
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GradeError {
    #[error("total marks must be a positive number (got {0})")]
    InvalidTotal(f64),
    #[error("obtained marks must be a finite number")]
    InvalidObtained,
}

/// Percentage thresholds, highest first: >=90 A+, >=80 A, >=70 B+, >=60 B, >=50 C, >=33 D.
const THRESHOLDS: [(f64, Grade); 6] = [
    (90.0, Grade::APlus),
    (80.0, Grade::A),
    (70.0, Grade::BPlus),
    (60.0, Grade::B),
    (50.0, Grade::C),
    (33.0, Grade::D),
];

pub fn percentage(obtained: f64, total: f64) -> Result<f64, GradeError> {
    if !total.is_finite() || total <= 0.0 {
        return Err(GradeError::InvalidTotal(total));
    }
    if !obtained.is_finite() {
        return Err(GradeError::InvalidObtained);
    }
    Ok(obtained / total * 100.0)
}

pub fn grade(obtained: f64, total: f64) -> Result<Grade, GradeError> {
    let pct = percentage(obtained, total)?;
    Ok(THRESHOLDS
        .iter()
        .find(|(min, _)| pct >= *min)
        .map(|(_, g)| *g)
        .unwrap_or(Grade::F))
}

/// Grade as persisted on a mark row: a letter, or `ABS` for absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkGrade {
    Letter(Grade),
    Absent,
}

impl MarkGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkGrade::Letter(g) => g.as_str(),
            MarkGrade::Absent => ABSENT_LABEL,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s == ABSENT_LABEL {
            return Some(MarkGrade::Absent);
        }
        Grade::parse(s).map(MarkGrade::Letter)
    }

    pub fn letter(self) -> Option<Grade> {
        match self {
            MarkGrade::Letter(g) => Some(g),
            MarkGrade::Absent => None,
        }
    }
}

impl Serialize for MarkGrade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingEntryPolicy {
    /// Students with neither a mark nor an absence flag produce no row.
    #[default]
    Skip,
    /// Such students fail the whole submission.
    Reject,
}

impl MissingEntryPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "skip" => Some(Self::Skip),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Reject => "reject",
        }
    }
}

/// One student's raw input from the mark-entry form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEntry {
    pub student_id: String,
    #[serde(default)]
    pub absent: bool,
    #[serde(default, deserialize_with = "de_raw_mark")]
    pub marks: Option<String>,
}

// Marks arrive either as text typed into the form or as a JSON number.
fn de_raw_mark<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMark {
    pub obtained_marks: f64,
    pub grade: MarkGrade,
    pub is_absent: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EntryError {
    #[error("marks must not be negative (got {value})")]
    Negative { value: f64 },
    #[error("marks {value} exceed total marks {total}")]
    ExceedsTotal { value: f64, total: f64 },
    #[error("no marks entered and not marked absent")]
    Missing,
    #[error(transparent)]
    Grade(#[from] GradeError),
}

impl EntryError {
    pub fn code(&self) -> &'static str {
        match self {
            EntryError::Negative { .. } => "negative",
            EntryError::ExceedsTotal { .. } => "exceeds_total",
            EntryError::Missing => "missing",
            EntryError::Grade(_) => "invalid_total",
        }
    }
}

/// Blank and unparseable entries both count as "no mark".
fn parse_mark(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `Ok(None)` means the student is left out of the batch.
pub fn resolve_entry(
    entry: &MarkEntry,
    total: f64,
    policy: MissingEntryPolicy,
) -> Result<Option<ResolvedMark>, EntryError> {
    if entry.absent {
        return Ok(Some(ResolvedMark {
            obtained_marks: 0.0,
            grade: MarkGrade::Absent,
            is_absent: true,
        }));
    }

    let Some(value) = parse_mark(entry.marks.as_deref()) else {
        return match policy {
            MissingEntryPolicy::Skip => Ok(None),
            MissingEntryPolicy::Reject => Err(EntryError::Missing),
        };
    };
    if value < 0.0 {
        return Err(EntryError::Negative { value });
    }
    if value > total {
        return Err(EntryError::ExceedsTotal { value, total });
    }

    Ok(Some(ResolvedMark {
        obtained_marks: value,
        grade: MarkGrade::Letter(grade(value, total)?),
        is_absent: false,
    }))
}
