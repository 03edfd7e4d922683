//! Value-domain helpers shared by the contact enrichment services.
//!
//! Everything in here is pure: functions take borrowed `serde_json::Value` documents
//! and hand back owned results, leaving their input untouched.
pub mod document;
pub mod labels;
pub mod multiselect;
pub mod tagged;
