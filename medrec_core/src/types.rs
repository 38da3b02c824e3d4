//! Core domain types for the medrec backend.
//!
//! This module defines the records exchanged with clients and stored by
//! the identity and record stores:
//! - Users and registration payloads
//! - Patients with their prescriptions and appointments
//! - Paginated patient listings

use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Users
// ============================================================================

/// A registered user as exposed to clients (never carries the password hash)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Registration payload
#[derive(Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Loose structural email check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .filter(|label| !label.is_empty())
            .count()
            >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

// ============================================================================
// Patients
// ============================================================================

/// A medication entry on a patient record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prescription {
    pub date: String,
    pub medication: String,
    pub dosage: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A scheduled visit on a patient record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Appointment {
    pub date: String,
    pub department: String,
    pub doctor: String,
}

/// Editable patient fields, used for both create and full-replace update
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatientInput {
    pub name: String,
    pub age: i32,
    pub gender: String,
    #[serde(default)]
    pub dob: Option<String>,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "chronicConditions", default)]
    pub chronic_conditions: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub prescriptions: Vec<Prescription>,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
}

impl PatientInput {
    /// Minimal record with only the required fields set
    pub fn new(
        name: impl Into<String>,
        age: i32,
        gender: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            age,
            gender: gender.into(),
            dob: None,
            phone: phone.into(),
            email: None,
            address: None,
            chronic_conditions: None,
            allergies: None,
            notes: None,
            prescriptions: Vec::new(),
            appointments: Vec::new(),
        }
    }

    /// Trim required fields and collapse blank optional fields to `None`.
    ///
    /// Blank strings would otherwise collide on the unique email index.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.gender = self.gender.trim().to_string();
        self.phone = self.phone.trim().to_string();
        for field in [
            &mut self.dob,
            &mut self.email,
            &mut self.address,
            &mut self.chronic_conditions,
            &mut self.allergies,
            &mut self.notes,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }
        if self.phone.trim().is_empty() {
            return Err(Error::Validation("phone must not be empty".into()));
        }
        if self.gender.trim().is_empty() {
            return Err(Error::Validation("gender must not be empty".into()));
        }
        if self.age < 0 {
            return Err(Error::Validation(format!(
                "age must not be negative (got {})",
                self.age
            )));
        }
        Ok(())
    }
}

/// A stored patient as exposed to clients
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// Internal id rendered as a string; accepted by get, update and delete
    /// for records created by this service
    pub id: String,
    /// Lookup key for `get`; `None` on legacy records awaiting backfill
    #[serde(skip)]
    pub logical_id: Option<String>,
    #[serde(flatten)]
    pub record: PatientInput,
    /// Creation time in the fixed +05:30 offset
    pub created_at: DateTime<FixedOffset>,
}

/// One page of a patient listing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatientPage {
    pub patients: Vec<Patient>,
    pub total: u64,
    pub page: u32,
    pub total_pages: u64,
}

/// Seconds east of UTC for recorded patient timestamps (+05:30)
pub const RECORDS_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Offset in which patient creation times are recorded
pub fn records_offset() -> FixedOffset {
    FixedOffset::east_opt(RECORDS_OFFSET_SECS).expect("+05:30 is within the valid offset range")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("asha@example.com"));
        assert!(is_valid_email("a.b+tag@mail.example.org"));
        assert!(!is_valid_email("asha"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("asha@localhost"));
        assert!(!is_valid_email("asha@@example.com"));
        assert!(!is_valid_email("as ha@example.com"));
        assert!(!is_valid_email("asha@example."));
    }

    #[test]
    fn test_patient_input_wire_names() {
        let json = r#"{
            "name": "Asha",
            "age": 34,
            "gender": "F",
            "phone": "555-0100",
            "chronicConditions": "Diabetes"
        }"#;
        let input: PatientInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.chronic_conditions.as_deref(), Some("Diabetes"));
        assert!(input.prescriptions.is_empty());
        assert!(input.appointments.is_empty());
    }

    #[test]
    fn test_normalized_collapses_blank_optionals() {
        let mut input = PatientInput::new("  Asha ", 34, "F", " 555-0100");
        input.email = Some("   ".into());
        input.notes = Some("keep".into());
        let input = input.normalized();
        assert_eq!(input.name, "Asha");
        assert_eq!(input.phone, "555-0100");
        assert_eq!(input.email, None);
        assert_eq!(input.notes.as_deref(), Some("keep"));
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        assert!(PatientInput::new("Asha", 34, "F", "555-0100").validate().is_ok());
        assert!(matches!(
            PatientInput::new("", 34, "F", "555-0100").validate(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            PatientInput::new("Asha", -1, "F", "555-0100").validate(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_patient_serializes_single_id() {
        let patient = Patient {
            id: "abc".into(),
            logical_id: Some("abc".into()),
            record: PatientInput::new("Asha", 34, "F", "555-0100"),
            created_at: Utc::now().with_timezone(&records_offset()),
        };
        let value = serde_json::to_value(&patient).unwrap();
        assert_eq!(value["id"], "abc");
        assert!(value.get("logical_id").is_none());
        assert_eq!(value["name"], "Asha");
        assert!(value["created_at"].as_str().unwrap().ends_with("+05:30"));
    }
}
