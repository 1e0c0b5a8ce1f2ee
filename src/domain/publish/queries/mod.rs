pub mod ledger;
pub mod posts;
