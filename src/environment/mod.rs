//! # Process Environment
//!
//! The locale, timezone, text encoding and currency the whole process formats dates,
//! amounts and documents with.
//!
//! ## Write-once publication
//!
//! [`EnvironmentInitializer::initialize`] validates the identifiers and publishes an
//! immutable [`ProcessEnvironment`] into a `OnceCell`. Publication happens at most once:
//! a second call fails with [`EnvironmentError::AlreadyInitialized`] and the first
//! snapshot stays in effect, because downstream components may already have derived
//! formatting behavior from it. Readers never take a lock.
//!
//! The snapshot is also returned as an `Arc` so that components receive it explicitly
//! through their constructors instead of reading ambient state.
//!
//! ```rust
//! use dz_erp_runtime::environment::EnvironmentInitializer;
//!
//! let initializer = EnvironmentInitializer::new();
//! let env = initializer.initialize("ar_DZ", "Africa/Algiers", "UTF-8").unwrap();
//! assert_eq!(env.locale().to_string(), "ar_DZ");
//! assert!(initializer.initialize("fr_FR", "Europe/Paris", "UTF-8").is_err());
//! ```

pub mod error;
mod iso;
pub mod locale;

pub use error::EnvironmentError;
pub use locale::{Locale, TextEncoding};

use crate::config::DEFAULT_CURRENCY;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use once_cell::sync::{Lazy, OnceCell};
use std::sync::Arc;
use tracing::{info, warn};

/// Raw identifiers, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    pub locale: String,
    pub timezone: String,
    pub encoding: String,
    pub currency: String,
}

/// Immutable snapshot of the process-wide localization settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEnvironment {
    locale: Locale,
    timezone: Tz,
    encoding: TextEncoding,
    currency: String,
}

impl ProcessEnvironment {
    /// Validates raw identifiers without publishing anything.
    pub fn from_settings(settings: &EnvironmentSettings) -> Result<Self, EnvironmentError> {
        let locale: Locale = settings.locale.parse()?;
        let timezone: Tz = settings.timezone.parse().map_err(|_| {
            EnvironmentError::invalid(
                "timezone",
                &settings.timezone,
                "not an IANA timezone identifier",
            )
        })?;
        let encoding: TextEncoding = settings.encoding.parse()?;

        let currency = settings.currency.trim();
        let currency_ok = currency.len() == 3 && currency.bytes().all(|b| b.is_ascii_uppercase());
        if !currency_ok {
            return Err(EnvironmentError::invalid(
                "currency",
                &settings.currency,
                "expected an ISO 4217 code such as DZD",
            ));
        }

        Ok(Self {
            locale,
            timezone,
            encoding,
            currency: currency.to_string(),
        })
    }

    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Current wall-clock time in the configured timezone.
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    /// Formats an amount given in centimes (hundredths of the currency unit) with two
    /// decimals and the currency code.
    ///
    /// English locales use `1,234.50`; every other locale uses the Algerian
    /// convention `1 234,50`.
    pub fn format_amount(&self, centimes: i64) -> String {
        let (group_sep, decimal_sep) = match self.locale.language() {
            "en" => (',', '.'),
            _ => (' ', ','),
        };

        let cents = centimes.unsigned_abs();
        let units = (cents / 100).to_string();
        let mut grouped = String::with_capacity(units.len() + units.len() / 3);
        for (i, digit) in units.chars().enumerate() {
            if i > 0 && (units.len() - i) % 3 == 0 {
                grouped.push(group_sep);
            }
            grouped.push(digit);
        }

        let sign = if centimes < 0 { "-" } else { "" };
        format!(
            "{sign}{grouped}{decimal_sep}{:02} {}",
            cents % 100,
            self.currency
        )
    }
}

static GLOBAL: Lazy<EnvironmentInitializer> = Lazy::new(EnvironmentInitializer::new);

/// Validates and publishes the [`ProcessEnvironment`] exactly once.
#[derive(Debug, Default)]
pub struct EnvironmentInitializer {
    published: OnceCell<Arc<ProcessEnvironment>>,
}

impl EnvironmentInitializer {
    /// A private initializer, independent from the process-wide one.
    pub fn new() -> Self {
        Self {
            published: OnceCell::new(),
        }
    }

    /// The process-wide initializer used by the binary.
    pub fn global() -> &'static EnvironmentInitializer {
        &GLOBAL
    }

    /// Publishes the snapshot built from the three identifiers, with the default
    /// currency.
    pub fn initialize(
        &self,
        locale: &str,
        timezone: &str,
        encoding: &str,
    ) -> Result<Arc<ProcessEnvironment>, EnvironmentError> {
        self.initialize_from(&EnvironmentSettings {
            locale: locale.to_string(),
            timezone: timezone.to_string(),
            encoding: encoding.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
        })
    }

    pub fn initialize_from(
        &self,
        settings: &EnvironmentSettings,
    ) -> Result<Arc<ProcessEnvironment>, EnvironmentError> {
        if self.published.get().is_some() {
            warn!(?settings, "Environment already initialized");
            return Err(EnvironmentError::AlreadyInitialized);
        }

        let snapshot = Arc::new(ProcessEnvironment::from_settings(settings)?);

        // A concurrent initializer may have won the race since the check above.
        self.published
            .set(snapshot.clone())
            .map_err(|_| EnvironmentError::AlreadyInitialized)?;

        info!(
            locale = %snapshot.locale,
            timezone = %snapshot.timezone,
            encoding = %snapshot.encoding,
            currency = %snapshot.currency,
            "Environment published"
        );
        Ok(snapshot)
    }

    /// The published snapshot, if any.
    pub fn get(&self) -> Option<Arc<ProcessEnvironment>> {
        self.published.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.published.get().is_some()
    }
}
