//! Record store: patient create, list/search/paginate, get, update, delete.
//!
//! Each patient has two identifiers. `internal_id` is assigned by the store
//! and addresses updates and deletes. `logical_id` is the lookup key for
//! `get`. New records get `logical_id == internal_id`, so the single `id`
//! a client sees works everywhere. Legacy rows may still have a null
//! `logical_id` until `backfill_logical_ids` runs.

use crate::db::{self, conflict_or_database, Database};
use crate::types::records_offset;
use crate::{Error, Patient, PatientInput, PatientPage, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

const ENTITY: &str = "patient";

const COLUMNS: &str = "internal_id, logical_id, name, age, gender, dob, phone, email, address, \
                       chronic_conditions, allergies, notes, prescriptions, appointments, created_at";

/// Listing parameters as they arrive from the query string
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ListQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub gender: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            search: None,
            page: default_page(),
            limit: default_limit(),
            gender: None,
        }
    }
}

impl ListQuery {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }
}

/// Gender condition as a WHERE clause plus its argument
struct Filter {
    clause: String,
    args: Vec<String>,
}

impl Filter {
    fn from_query(query: &ListQuery) -> Self {
        match query.gender.as_deref().filter(|g| !g.is_empty() && *g != "all") {
            Some(gender) => Self {
                clause: " WHERE gender = ?".to_string(),
                args: vec![gender.to_string()],
            },
            None => Self {
                clause: String::new(),
                args: Vec::new(),
            },
        }
    }
}

/// Case-folded search text; `None` when the listing is unfiltered
fn search_needle(query: &ListQuery) -> Option<String> {
    query
        .search
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

/// Literal, Unicode case-insensitive substring test
fn contains_folded(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

/// Persistent patient records
#[derive(Clone, Debug)]
pub struct PatientStore {
    pool: SqlitePool,
    max_page_limit: u32,
}

impl PatientStore {
    pub fn new(db: &Database, max_page_limit: u32) -> Self {
        Self {
            pool: db.pool().clone(),
            max_page_limit: max_page_limit.max(1),
        }
    }

    /// Store a new patient and return it as persisted
    pub async fn create(&self, input: PatientInput) -> Result<Patient> {
        let input = input.normalized();
        input.validate()?;

        let internal_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().with_timezone(&records_offset());
        let (prescriptions, appointments) = encode_lists(&input)?;

        let sql = format!(
            "INSERT INTO patients ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        );
        sqlx::query(&sql)
            .bind(&internal_id)
            .bind(&internal_id)
            .bind(&input.name)
            .bind(input.age)
            .bind(&input.gender)
            .bind(&input.dob)
            .bind(&input.phone)
            .bind(&input.email)
            .bind(&input.address)
            .bind(&input.chronic_conditions)
            .bind(&input.allergies)
            .bind(&input.notes)
            .bind(&prescriptions)
            .bind(&appointments)
            .bind(created_at.to_rfc3339_opts(SecondsFormat::Micros, false))
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or_database(e, ENTITY))?;

        tracing::info!("Created patient {}", internal_id);
        self.fetch_by_internal_id(&internal_id)
            .await?
            .ok_or(Error::NotFound("Patient"))
    }

    /// One page of patients matching `query`, oldest first
    pub async fn list(&self, query: &ListQuery) -> Result<PatientPage> {
        if query.page < 1 {
            return Err(Error::Validation("page must be at least 1".into()));
        }
        if query.limit < 1 {
            return Err(Error::Validation("limit must be at least 1".into()));
        }
        let limit = if query.limit > self.max_page_limit {
            tracing::debug!(
                "Clamping page limit {} to {}",
                query.limit,
                self.max_page_limit
            );
            self.max_page_limit
        } else {
            query.limit
        };
        let skip = u64::from(query.page - 1) * u64::from(limit);

        let filter = Filter::from_query(query);
        let (total, rows) = match search_needle(query) {
            Some(needle) => self.search_page(&filter, &needle, skip, limit).await?,
            None => self.plain_page(&filter, skip, limit).await?,
        };

        let patients = rows.iter().map(patient_from_row).collect::<Result<Vec<_>>>()?;
        tracing::debug!(
            "Listed {} of {} patients (page {}, limit {})",
            patients.len(),
            total,
            query.page,
            limit
        );

        Ok(PatientPage {
            patients,
            total,
            page: query.page,
            total_pages: total.div_ceil(u64::from(limit)),
        })
    }

    async fn plain_page(
        &self,
        filter: &Filter,
        skip: u64,
        limit: u32,
    ) -> Result<(u64, Vec<SqliteRow>)> {
        let count_sql = format!("SELECT COUNT(*) FROM patients{}", filter.clause);
        let mut count_query = sqlx::query(&count_sql);
        for arg in &filter.args {
            count_query = count_query.bind(arg);
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.get(0);

        let select_sql = format!(
            "SELECT {} FROM patients{} ORDER BY created_at, internal_id LIMIT ? OFFSET ?",
            COLUMNS, filter.clause
        );
        let mut select_query = sqlx::query(&select_sql);
        for arg in &filter.args {
            select_query = select_query.bind(arg);
        }
        let rows = select_query
            .bind(i64::from(limit))
            .bind(i64::try_from(skip).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok((total.max(0) as u64, rows))
    }

    /// Search runs over the searchable columns in Rust: SQLite's `lower()`
    /// folds ASCII only, so folding there would miss accented names.
    async fn search_page(
        &self,
        filter: &Filter,
        needle: &str,
        skip: u64,
        limit: u32,
    ) -> Result<(u64, Vec<SqliteRow>)> {
        let scan_sql = format!(
            "SELECT internal_id, name, logical_id, chronic_conditions FROM patients{} \
             ORDER BY created_at, internal_id",
            filter.clause
        );
        let mut scan_query = sqlx::query(&scan_sql);
        for arg in &filter.args {
            scan_query = scan_query.bind(arg);
        }

        let mut matched = Vec::new();
        for row in scan_query.fetch_all(&self.pool).await? {
            let name: Option<String> = row.try_get("name")?;
            let logical_id: Option<String> = row.try_get("logical_id")?;
            let conditions: Option<String> = row.try_get("chronic_conditions")?;
            if contains_folded(name.as_deref(), needle)
                || contains_folded(logical_id.as_deref(), needle)
                || contains_folded(conditions.as_deref(), needle)
            {
                matched.push(row.try_get::<String, _>("internal_id")?);
            }
        }

        let total = matched.len() as u64;
        let page_ids: Vec<&String> = matched
            .iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect();
        if page_ids.is_empty() {
            return Ok((total, Vec::new()));
        }

        let placeholders = vec!["?"; page_ids.len()].join(", ");
        let select_sql = format!(
            "SELECT {} FROM patients WHERE internal_id IN ({}) ORDER BY created_at, internal_id",
            COLUMNS, placeholders
        );
        let mut select_query = sqlx::query(&select_sql);
        for id in page_ids {
            select_query = select_query.bind(id);
        }
        Ok((total, select_query.fetch_all(&self.pool).await?))
    }

    /// Point lookup by logical id
    pub async fn get(&self, id: &str) -> Result<Patient> {
        let sql = format!("SELECT {} FROM patients WHERE logical_id = ?", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => patient_from_row(&row),
            None => {
                tracing::warn!("Patient {} not found", id);
                Err(Error::NotFound("Patient"))
            }
        }
    }

    /// Replace every editable field of the patient with internal id `id`
    pub async fn update(&self, id: &str, input: PatientInput) -> Result<Patient> {
        let internal_id = parse_internal_id(id)?;
        let input = input.normalized();
        input.validate()?;

        let current = self
            .fetch_by_internal_id(&internal_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!("Patient {} not found for update", internal_id);
                Error::NotFound("Patient")
            })?;
        if current.record == input {
            return Err(Error::NoChange);
        }

        let (prescriptions, appointments) = encode_lists(&input)?;
        let result = sqlx::query(
            "UPDATE patients SET name = ?, age = ?, gender = ?, dob = ?, phone = ?, email = ?,
                address = ?, chronic_conditions = ?, allergies = ?, notes = ?,
                prescriptions = ?, appointments = ?
             WHERE internal_id = ?",
        )
        .bind(&input.name)
        .bind(input.age)
        .bind(&input.gender)
        .bind(&input.dob)
        .bind(&input.phone)
        .bind(&input.email)
        .bind(&input.address)
        .bind(&input.chronic_conditions)
        .bind(&input.allergies)
        .bind(&input.notes)
        .bind(&prescriptions)
        .bind(&appointments)
        .bind(&internal_id)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_database(e, ENTITY))?;

        // Deleted between the read and the write
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Patient"));
        }

        tracing::info!("Updated patient {}", internal_id);
        self.fetch_by_internal_id(&internal_id)
            .await?
            .ok_or(Error::NotFound("Patient"))
    }

    /// Delete by internal id, falling back to logical id
    pub async fn delete(&self, id: &str) -> Result<()> {
        let Some(internal_id) = self.resolve_internal_id(id).await? else {
            tracing::warn!("Patient {} not found for delete", id);
            return Err(Error::NotFound("Patient"));
        };

        let result = sqlx::query("DELETE FROM patients WHERE internal_id = ?")
            .bind(&internal_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Patient"));
        }

        tracing::info!("Deleted patient {} (requested as {})", internal_id, id);
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        db::count(&self.pool, "SELECT COUNT(*) FROM patients").await
    }

    pub async fn count_missing_logical_ids(&self) -> Result<u64> {
        db::count(&self.pool, "SELECT COUNT(*) FROM patients WHERE logical_id IS NULL").await
    }

    /// Give every legacy patient `logical_id = internal_id`; returns how many changed
    pub async fn backfill_logical_ids(&self) -> Result<u64> {
        let result =
            sqlx::query("UPDATE patients SET logical_id = internal_id WHERE logical_id IS NULL")
                .execute(&self.pool)
                .await
                .map_err(|e| conflict_or_database(e, ENTITY))?;
        let fixed = result.rows_affected();
        tracing::info!("Backfilled logical ids on {} patients", fixed);
        Ok(fixed)
    }

    async fn fetch_by_internal_id(&self, internal_id: &str) -> Result<Option<Patient>> {
        let sql = format!("SELECT {} FROM patients WHERE internal_id = ?", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(internal_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(patient_from_row).transpose()
    }

    async fn resolve_internal_id(&self, id: &str) -> Result<Option<String>> {
        if let Ok(internal_id) = parse_internal_id(id) {
            let row = sqlx::query("SELECT internal_id FROM patients WHERE internal_id = ?")
                .bind(&internal_id)
                .fetch_optional(&self.pool)
                .await?;
            if row.is_some() {
                return Ok(Some(internal_id));
            }
        }

        let row = sqlx::query("SELECT internal_id FROM patients WHERE logical_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.try_get("internal_id"))
            .transpose()
            .map_err(Error::from)
    }
}

/// Canonical (lowercase, hyphenated) form of an internal id
fn parse_internal_id(id: &str) -> Result<String> {
    Uuid::parse_str(id.trim())
        .map(|uuid| uuid.to_string())
        .map_err(|_| Error::InvalidIdFormat(id.to_string()))
}

fn encode_lists(input: &PatientInput) -> Result<(String, String)> {
    Ok((
        serde_json::to_string(&input.prescriptions)?,
        serde_json::to_string(&input.appointments)?,
    ))
}

fn patient_from_row(row: &SqliteRow) -> Result<Patient> {
    let prescriptions: String = row.try_get("prescriptions")?;
    let appointments: String = row.try_get("appointments")?;
    let created_at: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at).map_err(|e| {
        Error::Other(format!("Invalid patient timestamp {:?}: {}", created_at, e))
    })?;

    Ok(Patient {
        id: row.try_get("internal_id")?,
        logical_id: row.try_get("logical_id")?,
        record: PatientInput {
            name: row.try_get("name")?,
            age: row.try_get("age")?,
            gender: row.try_get("gender")?,
            dob: row.try_get("dob")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            address: row.try_get("address")?,
            chronic_conditions: row.try_get("chronic_conditions")?,
            allergies: row.try_get("allergies")?,
            notes: row.try_get("notes")?,
            prescriptions: serde_json::from_str(&prescriptions)?,
            appointments: serde_json::from_str(&appointments)?,
        },
        created_at,
    })
}
