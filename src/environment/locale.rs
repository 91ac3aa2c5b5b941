//! Locale and text encoding identifiers.

use super::iso;
use super::EnvironmentError;
use std::fmt;
use std::str::FromStr;

/// A `language[_REGION]` locale such as `ar_DZ`, `fr_DZ` or `kab`.
///
/// Both `_` and `-` separators are accepted on input; the canonical form uses `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    language: String,
    region: Option<String>,
}

impl Locale {
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

impl FromStr for Locale {
    type Err = EnvironmentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.split(['_', '-']);
        let language = parts.next().unwrap_or_default();
        let region = parts.next();
        if parts.next().is_some() {
            return Err(EnvironmentError::invalid(
                "locale",
                value,
                "expected language[_REGION]",
            ));
        }

        let language_ok =
            (2..=3).contains(&language.len()) && language.bytes().all(|b| b.is_ascii_lowercase());
        if !language_ok {
            return Err(EnvironmentError::invalid(
                "locale",
                value,
                "language must be a 2-3 letter lowercase ISO 639 code",
            ));
        }
        if !iso::is_language(language) {
            return Err(EnvironmentError::invalid(
                "locale",
                value,
                format!("unknown ISO 639 language {language:?}"),
            ));
        }

        if let Some(region) = region {
            let alpha = region.len() == 2 && region.bytes().all(|b| b.is_ascii_uppercase());
            let numeric = region.len() == 3 && region.bytes().all(|b| b.is_ascii_digit());
            if !alpha && !numeric {
                return Err(EnvironmentError::invalid(
                    "locale",
                    value,
                    "region must be an ISO 3166 alpha-2 or UN M.49 numeric code",
                ));
            }
            if !iso::is_region(region) {
                return Err(EnvironmentError::invalid(
                    "locale",
                    value,
                    format!("unknown region {region:?}"),
                ));
            }
        }

        Ok(Self {
            language: language.to_string(),
            region: region.map(str::to_string),
        })
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}_{}", self.language, region),
            None => write!(f, "{}", self.language),
        }
    }
}

/// Text encodings the ERP exchanges documents in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Iso8859_1,
    Windows1252,
    /// Arabic code page still found in legacy Algerian accounting exports.
    Windows1256,
}

impl TextEncoding {
    /// Canonical WHATWG label.
    pub const fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
            TextEncoding::Iso8859_1 => "ISO-8859-1",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Windows1256 => "windows-1256",
        }
    }
}

impl FromStr for TextEncoding {
    type Err = EnvironmentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let encoding = match value.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" | "unicode-1-1-utf-8" => TextEncoding::Utf8,
            "utf-16le" | "utf-16" => TextEncoding::Utf16Le,
            "utf-16be" => TextEncoding::Utf16Be,
            "iso-8859-1" | "iso8859-1" | "latin1" | "l1" => TextEncoding::Iso8859_1,
            "windows-1252" | "cp1252" => TextEncoding::Windows1252,
            "windows-1256" | "cp1256" => TextEncoding::Windows1256,
            _ => {
                return Err(EnvironmentError::invalid(
                    "encoding",
                    value,
                    "unsupported text encoding",
                ))
            }
        };
        Ok(encoding)
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
