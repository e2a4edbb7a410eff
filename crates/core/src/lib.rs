//! `medscribe-core`: clinic domain types shared by every other crate.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, the domain error, clinic records and the resource ledger entry.

pub mod clinic;
pub mod error;
pub mod id;
pub mod resource;

pub use clinic::{Consultation, NewConsultation, NewPatient, Patient};
pub use error::{DomainError, DomainResult};
pub use id::{ConsultationId, PatientId, UserId};
pub use resource::{ResourceEntry, ResourceKind, build_report_corpus};
