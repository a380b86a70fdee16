pub mod claim_path;
pub mod credential;
pub mod credential_format;
pub mod dcql_matcher;
pub mod dcql_query;
pub mod disclosure;
pub mod jose;
