pub mod db;
pub mod dedupe;
pub mod error;
pub mod fingerprint;
pub mod late;
