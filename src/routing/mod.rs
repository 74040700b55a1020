pub mod rules;

pub use rules::{applies, RedirectRule, WILDCARD};
