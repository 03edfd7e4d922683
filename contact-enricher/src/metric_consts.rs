pub const EVENTS_RECEIVED: &str = "contact_enricher_events_received";
pub const EVENTS_REJECTED: &str = "contact_enricher_events_rejected";
pub const CASE_FIELDS_DECODED: &str = "contact_enricher_case_fields_decoded";
pub const CASE_FIELD_DIAGNOSTICS: &str = "contact_enricher_case_field_diagnostics";
pub const FIELD_NAME_REFRESHES: &str = "contact_enricher_field_name_refreshes";
pub const FIELD_NAME_LOOKUPS: &str = "contact_enricher_field_name_lookups";
pub const NOTIFICATIONS: &str = "contact_enricher_notifications";
pub const ANSWER_KEY_ERRORS: &str = "contact_enricher_answer_key_errors";
pub const LINEAGE_WALKS: &str = "contact_enricher_lineage_walks";
pub const LINEAGE_HOPS: &str = "contact_enricher_lineage_hops";
pub const LABEL_LOOKUPS: &str = "contact_enricher_label_lookups";
pub const RECORD_WRITES: &str = "contact_enricher_record_writes";
pub const VIEWS_SYNCED: &str = "contact_enricher_views_synced";
pub const VIEW_SYNC_ERRORS: &str = "contact_enricher_view_sync_errors";
pub const CATALOG_ITEMS_WRITTEN: &str = "contact_enricher_catalog_items_written";
pub const UPSTREAM_TIMEOUTS: &str = "contact_enricher_upstream_timeouts";
