//! Locale and currency rendering rules.

use chrono::NaiveDate;
use rust_decimal::RoundingStrategy;

use crate::model::Amount;

/// Number and date conventions of a locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locale {
    pub tag: &'static str,
    pub decimal_separator: char,
    pub group_separator: char,
    /// chrono format string for dates.
    pub date_pattern: &'static str,
    /// Excel number-format pattern for dates.
    pub excel_date_pattern: &'static str,
    /// Symbol after the number (`1.234,56 €`) rather than before (`$1,234.56`).
    pub symbol_after: bool,
}

static LOCALES: &[Locale] = &[
    Locale {
        tag: "en-US",
        decimal_separator: '.',
        group_separator: ',',
        date_pattern: "%m/%d/%Y",
        excel_date_pattern: "mm/dd/yyyy",
        symbol_after: false,
    },
    Locale {
        tag: "en-GB",
        decimal_separator: '.',
        group_separator: ',',
        date_pattern: "%d/%m/%Y",
        excel_date_pattern: "dd/mm/yyyy",
        symbol_after: false,
    },
    Locale {
        tag: "de-DE",
        decimal_separator: ',',
        group_separator: '.',
        date_pattern: "%d.%m.%Y",
        excel_date_pattern: "dd.mm.yyyy",
        symbol_after: true,
    },
    Locale {
        tag: "fr-FR",
        decimal_separator: ',',
        group_separator: '\u{a0}',
        date_pattern: "%d/%m/%Y",
        excel_date_pattern: "dd/mm/yyyy",
        symbol_after: true,
    },
    Locale {
        tag: "es-ES",
        decimal_separator: ',',
        group_separator: '.',
        date_pattern: "%d/%m/%Y",
        excel_date_pattern: "dd/mm/yyyy",
        symbol_after: true,
    },
    Locale {
        tag: "ja-JP",
        decimal_separator: '.',
        group_separator: ',',
        date_pattern: "%Y/%m/%d",
        excel_date_pattern: "yyyy/mm/dd",
        symbol_after: false,
    },
];

impl Locale {
    pub const DEFAULT_TAG: &'static str = "en-US";

    /// Exact (case-insensitive, `_` or `-`) match.
    pub fn find(tag: &str) -> Option<&'static Locale> {
        let tag = tag.replace('_', "-");
        LOCALES.iter().find(|l| l.tag.eq_ignore_ascii_case(&tag))
    }

    /// Like [`Locale::find`], falling back to `en-US`.
    pub fn resolve(tag: &str) -> &'static Locale {
        Self::find(tag).unwrap_or_else(|| {
            tracing::warn!(locale = tag, fallback = Self::DEFAULT_TAG, "unknown locale");
            &LOCALES[0]
        })
    }

    pub fn supported() -> impl Iterator<Item = &'static str> {
        LOCALES.iter().map(|l| l.tag)
    }

    /// Render a plain number: grouped integer part, fraction as stored.
    pub fn format_number(&self, amount: Amount) -> String {
        let text = amount.decimal().normalize().to_string();
        self.localize_digits(&text)
    }

    /// Render a money amount with the currency's minor-unit digits and symbol.
    pub fn format_currency(&self, amount: Amount, currency: &Currency) -> String {
        let mut value = amount
            .decimal()
            .round_dp_with_strategy(currency.minor_digits, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(currency.minor_digits);
        let negative = value.is_sign_negative() && !value.is_zero();
        let digits = self.localize_digits(&value.abs().to_string());
        let sign = if negative { "-" } else { "" };

        if self.symbol_after {
            format!("{}{}\u{a0}{}", sign, digits, currency.symbol)
        } else {
            format!("{}{}{}", sign, currency.symbol, digits)
        }
    }

    pub fn format_date(&self, date: NaiveDate) -> String {
        date.format(self.date_pattern).to_string()
    }

    /// Swap separators of a plain `-1234.5` string for this locale's.
    fn localize_digits(&self, plain: &str) -> String {
        let (sign, unsigned) = match plain.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", plain),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));

        let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
        for (i, ch) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                grouped.push(self.group_separator);
            }
            grouped.push(ch);
        }

        let mut out = format!("{}{}", sign, grouped);
        if !frac_part.is_empty() {
            out.push(self.decimal_separator);
            out.push_str(frac_part);
        }
        out
    }
}

/// Display rules of an ISO 4217 currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    pub code: String,
    pub symbol: String,
    pub minor_digits: u32,
}

static CURRENCIES: &[(&str, &str, u32)] = &[
    ("USD", "$", 2),
    ("EUR", "€", 2),
    ("GBP", "£", 2),
    ("JPY", "¥", 0),
    ("INR", "₹", 2),
    ("AED", "AED", 2),
    ("CAD", "CA$", 2),
    ("AUD", "A$", 2),
];

impl Currency {
    /// Known currencies get their symbol; others render with the code and two digits.
    pub fn resolve(code: &str) -> Currency {
        let upper = code.trim().to_ascii_uppercase();
        match CURRENCIES.iter().find(|(c, _, _)| *c == upper) {
            Some((code, symbol, digits)) => Currency {
                code: code.to_string(),
                symbol: symbol.to_string(),
                minor_digits: *digits,
            },
            None => {
                tracing::warn!(currency = code, "unknown currency; rendering with its code");
                Currency {
                    symbol: format!("{} ", upper),
                    code: upper,
                    minor_digits: 2,
                }
            }
        }
    }

    /// Excel number format, e.g. `"$"#,##0.00`.
    pub fn excel_format(&self, locale: &Locale) -> String {
        let digits = if self.minor_digits == 0 {
            "#,##0".to_string()
        } else {
            format!("#,##0.{}", "0".repeat(self.minor_digits as usize))
        };
        if locale.symbol_after {
            format!("{} \"{}\"", digits, self.symbol)
        } else {
            format!("\"{}\"{}", self.symbol, digits)
        }
    }

    pub fn round(&self, amount: Amount) -> Amount {
        Amount::new(
            amount
                .decimal()
                .round_dp_with_strategy(self.minor_digits, RoundingStrategy::MidpointAwayFromZero),
        )
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::resolve("USD")
    }
}
