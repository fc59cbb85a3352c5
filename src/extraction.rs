//! Extraction service boundary.
//!
//! Referral PDFs are processed by an external extraction service reached
//! over HTTP. Dispatch is fire-and-forget on a detached thread: case and
//! document writes commit before the request is sent, and an upstream
//! failure leaves the case parked in `processing` with the failure in the
//! log. There is no retry loop; reprocessing is a user action.

use std::path::PathBuf;
use std::thread::JoinHandle;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cases::log_activity;
use crate::db::DatabaseError;
use crate::models::{CaseStatus, MergeStrategy, NewPatient, PatientField, PatientUpdate};
use crate::patients;

/// Environment variable naming the extraction service base URL.
pub const APP_URL_ENV: &str = "APP_URL";

/// Fallback when `APP_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Cannot reach extraction service at {0}")]
    Connection(String),

    #[error("Extraction request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Extraction endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("Failed to parse extraction response: {0}")]
    ResponseParsing(String),
}

/// Patient identity the extraction service pulled out of a referral PDF.
/// Everything is optional — a garbled fax can yield an empty result, which
/// still completes processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedPatient {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub additional_data: Vec<PatientField>,
}

/// Blocking HTTP client for the extraction service.
pub struct ExtractionClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ProcessPdfRequest<'a> {
    case_id: &'a str,
}

impl ExtractionClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractionError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    /// Base URL from `APP_URL`, falling back to the local default.
    pub fn from_env() -> Result<Self, ExtractionError> {
        let base_url =
            std::env::var(APP_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(&base_url, DEFAULT_TIMEOUT_SECS)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the service to process the case's uploaded referral documents.
    /// One shot, no retry.
    pub fn process_pdf(&self, case_id: &Uuid) -> Result<ExtractedPatient, ExtractionError> {
        let url = format!("{}/api/process-pdf", self.base_url);
        let case_id = case_id.to_string();
        let body = ProcessPdfRequest { case_id: &case_id };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                ExtractionError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                ExtractionError::Timeout(self.timeout_secs)
            } else {
                ExtractionError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .map_err(|e| ExtractionError::ResponseParsing(e.to_string()))
    }
}

/// Fold an extraction result into the case.
///
/// A case that already has a patient gets the extracted fields merged into
/// it (case-insensitive by field name); an unlinked case gets a fresh
/// patient. Either way the case leaves `processing` and goes back to `new`
/// for triage.
pub fn apply_extraction(
    conn: &Connection,
    case_id: &Uuid,
    extracted: &ExtractedPatient,
) -> Result<(), DatabaseError> {
    let existing_patient_id: Option<String> = conn
        .query_row(
            "SELECT patient_id FROM cases WHERE id = ?1",
            rusqlite::params![case_id.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::not_found("case", case_id),
            other => other.into(),
        })?;

    let patient_id = match existing_patient_id {
        Some(id) => {
            let patient_id = crate::models::parse_uuid(&id)?;
            patients::update_patient(
                conn,
                &patient_id,
                &PatientUpdate {
                    name: extracted.name.clone(),
                    email: extracted.email.clone(),
                    phone: extracted.phone.clone(),
                    ..Default::default()
                },
            )?;
            if !extracted.additional_data.is_empty() {
                patients::update_additional_data(
                    conn,
                    &patient_id,
                    &extracted.additional_data,
                    MergeStrategy::Merge,
                )?;
            }
            patient_id
        }
        None => {
            let patient = patients::create_patient(
                conn,
                &NewPatient {
                    name: extracted.name.clone(),
                    email: extracted.email.clone(),
                    phone: extracted.phone.clone(),
                    additional_data: extracted.additional_data.clone(),
                    ..Default::default()
                },
            )?;
            patient.id
        }
    };

    conn.execute(
        "UPDATE cases SET patient_id = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
        rusqlite::params![
            case_id.to_string(),
            patient_id.to_string(),
            CaseStatus::New.as_str(),
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;

    log_activity(
        conn,
        case_id,
        "document_processed",
        Some("Referral documents processed and patient data extracted"),
        "system",
    )?;
    Ok(())
}

/// Dispatch processing for a case on a detached thread.
///
/// The worker opens its own connection against `db_path`, calls the
/// extraction service, and applies the result. On failure it logs and
/// leaves the case in `processing` — nothing is rolled back. The returned
/// handle can be joined in tests and dropped everywhere else.
pub fn schedule_processing(
    db_path: PathBuf,
    client: ExtractionClient,
    case_id: Uuid,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let extracted = match client.process_pdf(&case_id) {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!(
                    case_id = %case_id,
                    endpoint = %client.base_url(),
                    error = %e,
                    "Extraction request failed; case stays in processing"
                );
                return;
            }
        };

        let conn = match crate::db::open_database(&db_path) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(case_id = %case_id, error = %e, "Worker could not open database");
                return;
            }
        };
        if let Err(e) = apply_extraction(&conn, &case_id, &extracted) {
            tracing::error!(case_id = %case_id, error = %e, "Failed to apply extraction result");
        }
    })
}
