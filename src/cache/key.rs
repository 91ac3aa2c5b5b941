//! Cache keys derived from an operation name and its arguments.

use std::fmt;

/// Key of an entry inside a named cache.
///
/// Equality and hashing use the operation and the argument list as separate parts, so
/// an argument containing `,` or `)` never merges with its neighbours.
///
/// ```rust
/// use dz_erp_runtime::cache::CacheKey;
///
/// let key = CacheKey::new("tva_rate").arg("normale").arg(2024);
/// assert_eq!(key.to_string(), "tva_rate(normale,2024)");
/// assert_eq!(key.args(), ["normale", "2024"]);
/// assert_ne!(key, CacheKey::new("tva_rate").arg("normale,2024"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    operation: String,
    args: Vec<String>,
}

impl CacheKey {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument to the key.
    pub fn arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Human-readable form for logs and errors. Not injective; never used for lookups.
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operation)?;
        if !self.args.is_empty() {
            write!(f, "({})", self.args.join(","))?;
        }
        Ok(())
    }
}
