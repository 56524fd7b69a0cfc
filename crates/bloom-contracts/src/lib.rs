pub mod apps;
pub mod requests;
pub mod selections;
pub mod store;

pub use apps::{BloomApp, PublicApp};
pub use store::{ContentStore, FieldFilter};
