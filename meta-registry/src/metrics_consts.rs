pub const BATCHES_RECEIVED: &str = "meta_registry_batches_received";
pub const RECORDS_RECEIVED: &str = "meta_registry_records_received";
pub const RECORD_PARSE_ERROR: &str = "meta_registry_record_parse_error";
pub const RECORDS_SKIPPED: &str = "meta_registry_records_skipped";
pub const EMPTY_BATCHES: &str = "meta_registry_empty_batches";
pub const CANDIDATES_DROPPED: &str = "meta_registry_candidates_dropped";
pub const DUPLICATE_LINKS_IN_BATCH: &str = "meta_registry_duplicate_links_in_batch";
pub const ROWS_INSERTED: &str = "meta_registry_rows_inserted";
pub const PHASE_TIME: &str = "meta_registry_phase_time_ms";
pub const REGISTRATION_TIME: &str = "meta_registry_registration_time_ms";
pub const REGISTRATION_FAILED: &str = "meta_registry_registration_failed";
pub const HTTP_REQUESTS: &str = "meta_registry_http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "meta_registry_http_request_duration_seconds";
