pub mod email;
pub mod label;

pub use email::{EmailId, EmailRecord, Fingerprint};
pub use label::Label;
