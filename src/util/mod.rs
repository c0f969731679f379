pub mod persistence;

pub use persistence::{load_pricing_rules, save_pricing_rules, PersistSaveError};
