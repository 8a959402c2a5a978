pub mod pagerduty;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Unauthorized(&'static str),
    BadRequest(String),
}
