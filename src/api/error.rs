use serde::Serialize;

/// Coarse error class reported to clients as `error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller-fixable request problems.
    Validation,
    /// A remote processing service failed or timed out.
    Provider,
    Infra,
}
