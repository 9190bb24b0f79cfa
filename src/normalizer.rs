//! # Record Normalizer
//!
//! Pure helpers that bring values exported by the two HR systems onto a common
//! representation before they are compared: localized date parsing, accent and
//! whitespace insensitive text, and the fixed-width identifiers both systems use.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use unicode_normalization::UnicodeNormalization;

use crate::records::LeaveRecord;

/// Portuguese month abbreviations as printed by the payroll UI.
const PT_MONTHS: [(&str, &str); 12] = [
    ("jan", "Jan"),
    ("fev", "Feb"),
    ("mar", "Mar"),
    ("abr", "Apr"),
    ("mai", "May"),
    ("jun", "Jun"),
    ("jul", "Jul"),
    ("ago", "Aug"),
    ("set", "Sep"),
    ("out", "Oct"),
    ("nov", "Nov"),
    ("dez", "Dec"),
];

/// Known misspellings and renamed departments, applied after accent stripping.
const TEXT_FIXES: [(&str, &str); 3] = [
    ("VIGILACIA EM SAUDE", "VIGILANCIA EM SAUDE"),
    ("UBS SAO JOSE/CIDADE JARDIM", "UBS CIDADE JARDIM"),
    ("FINANCAS", "SECRETARIA MUN. FINANCAS"),
];

pub const EMPLOYEE_ID_WIDTH: usize = 6;
pub const CPF_WIDTH: usize = 11;
pub const LEAVE_CODE_WIDTH: usize = 3;

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

fn month_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/(\p{L}{3})/").expect("month pattern is valid"))
}

/// Parses a date as exported by either HR system.
///
/// Accepts `"Seg, 19/Fev/2024"`, `"19/02/2024"`, `"19/Feb/2024 08:30"` and ISO-8601
/// forms. Blank or unrecognised input yields `None`; this never fails.
pub fn parse_localized_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // "Seg, 19/Fev/2024": the weekday is noise
    let body = match trimmed.split_once(", ") {
        Some((_, rest)) => rest.trim(),
        None => trimmed,
    };
    let translated = translate_month(body);

    for format in ["%d/%b/%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&translated, format) {
            return Some(date);
        }
    }

    if let Ok(datetime) = NaiveDateTime::parse_from_str(&translated, "%d/%b/%Y %H:%M") {
        return Some(datetime.date());
    }

    parse_iso_date(&translated)
}

fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|datetime| datetime.date())
}

fn translate_month(value: &str) -> String {
    month_pattern()
        .replace_all(value, |caps: &Captures<'_>| {
            let token = &caps[1];
            let english = PT_MONTHS
                .iter()
                .find(|(pt, _)| pt.eq_ignore_ascii_case(token))
                .map(|(_, en)| *en)
                .unwrap_or(token);
            format!("/{english}/")
        })
        .into_owned()
}

/// Normalizes free text for comparison.
///
/// Diacritics are stripped first (NFKD, ASCII only) since spacing accents
/// decompose into a space plus a combining mark. Whitespace runs then
/// collapse to one space, the typo table is applied and the result is
/// lower-cased and trimmed.
/// `normalize_text(normalize_text(x)) == normalize_text(x)`.
pub fn normalize_text(value: Option<&str>) -> Option<String> {
    let value = value?;
    let ascii: String = value.nfkd().filter(char::is_ascii).collect();
    let collapsed = whitespace_pattern().replace_all(&ascii, " ");
    let fixed = apply_text_fixes(collapsed.trim());
    Some(fixed.to_lowercase().trim().to_string())
}

fn apply_text_fixes(value: &str) -> &str {
    TEXT_FIXES
        .iter()
        .find(|(typo, _)| typo.eq_ignore_ascii_case(value))
        .map(|(_, fixed)| *fixed)
        .unwrap_or(value)
}

fn zero_pad(value: &str, width: usize) -> String {
    format!("{:0>width$}", value.trim(), width = width)
}

/// Left pads an employee identifier to six digits.
pub fn pad_id(value: &str) -> String {
    zero_pad(value, EMPLOYEE_ID_WIDTH)
}

/// Left pads a CPF (taxpayer number) to eleven digits.
pub fn pad_cpf(value: &str) -> String {
    zero_pad(value, CPF_WIDTH)
}

/// Left pads a leave code to three digits.
pub fn pad_code(value: &str) -> String {
    zero_pad(value, LEAVE_CODE_WIDTH)
}

/// Renders a date the way both UIs display it (`dd/mm/yyyy`).
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// One line of the leave import file accepted by the timekeeping system:
/// `id,code,start_date,start_time,end_date,end_time`.
pub fn leave_upload_line(leave: &LeaveRecord) -> String {
    [
        pad_id(&leave.employee_id),
        pad_code(&leave.code),
        format_date(leave.start_date),
        leave.start_time.as_deref().unwrap_or_default().trim().to_string(),
        format_date(leave.end_date),
        leave.end_time.as_deref().unwrap_or_default().trim().to_string(),
    ]
    .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_portuguese_weekday_format() {
        assert_eq!(parse_localized_date("Seg, 19/Fev/2024"), Some(date(2024, 2, 19)));
        assert_eq!(parse_localized_date("Ter, 03/Dez/2023"), Some(date(2023, 12, 3)));
        assert_eq!(parse_localized_date("01/Ago/2022"), Some(date(2022, 8, 1)));
    }

    #[test]
    fn parses_numeric_and_timed_formats() {
        assert_eq!(parse_localized_date("19/02/2024"), Some(date(2024, 2, 19)));
        assert_eq!(
            parse_localized_date("Qua, 05/Set/2024 13:45"),
            Some(date(2024, 9, 5))
        );
        assert_eq!(parse_localized_date("19/Feb/2024"), Some(date(2024, 2, 19)));
    }

    #[test]
    fn parses_iso_formats() {
        assert_eq!(parse_localized_date("2024-02-19"), Some(date(2024, 2, 19)));
        assert_eq!(
            parse_localized_date("2024-02-19T10:00:00Z"),
            Some(date(2024, 2, 19))
        );
        assert_eq!(
            parse_localized_date("2024-02-19 10:00:00"),
            Some(date(2024, 2, 19))
        );
    }

    #[test]
    fn unparsable_dates_are_none() {
        assert_eq!(parse_localized_date(""), None);
        assert_eq!(parse_localized_date(" "), None);
        assert_eq!(parse_localized_date("amanha"), None);
        assert_eq!(parse_localized_date("31/02/2024"), None);
    }

    #[test]
    fn normalize_text_strips_accents_and_whitespace() {
        assert_eq!(
            normalize_text(Some("  Teste  Acentuação  ")).as_deref(),
            Some("teste acentuacao")
        );
        assert_eq!(
            normalize_text(Some("JOSÉ\tDA\n SILVA")).as_deref(),
            Some("jose da silva")
        );
        assert_eq!(normalize_text(None), None);
    }

    #[test]
    fn normalize_text_applies_typo_table() {
        assert_eq!(
            normalize_text(Some("VIGILACIA EM SAUDE")).as_deref(),
            Some("vigilancia em saude")
        );
        assert_eq!(
            normalize_text(Some("Vigilância em Saúde")).as_deref(),
            Some("vigilancia em saude")
        );
        assert_eq!(
            normalize_text(Some("  finanças ")).as_deref(),
            Some("secretaria mun. financas")
        );
        assert_eq!(
            normalize_text(Some("UBS SÃO JOSÉ/CIDADE JARDIM")).as_deref(),
            Some("ubs cidade jardim")
        );
    }

    #[test]
    fn normalize_text_is_idempotent() {
        let samples = [
            "  Teste  Acentuação  ",
            "VIGILACIA EM SAUDE",
            "FINANCAS",
            "UBS SAO JOSE/CIDADE JARDIM",
            "Auxílio Reclusão",
            "D\u{00B4} AVILA",
            "JOS\u{00A8}E \u{00B4} SILVA",
            "",
        ];
        for sample in samples {
            let once = normalize_text(Some(sample));
            let twice = normalize_text(once.as_deref());
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn spacing_accents_do_not_leave_double_spaces() {
        assert_eq!(
            normalize_text(Some("D\u{00B4} AVILA")),
            normalize_text(Some("D AVILA"))
        );
        assert_eq!(normalize_text(Some("D\u{00B4} AVILA")).as_deref(), Some("d avila"));
    }

    #[test]
    fn pads_fixed_width_identifiers() {
        assert_eq!(pad_id("42"), "000042");
        assert_eq!(pad_id(" 123456 "), "123456");
        assert_eq!(pad_id("1234567"), "1234567");
        assert_eq!(pad_cpf("1234567890"), "01234567890");
        assert_eq!(pad_code("7"), "007");
    }

    #[test]
    fn upload_line_uses_import_layout() {
        let leave = LeaveRecord::new("42", "5", date(2024, 2, 19), date(2024, 2, 21))
            .with_times("08:00", "17:00");
        assert_eq!(
            leave_upload_line(&leave),
            "000042,005,19/02/2024,08:00,21/02/2024,17:00"
        );

        let untimed = LeaveRecord::new("42", "5", date(2024, 2, 19), date(2024, 2, 19));
        assert_eq!(leave_upload_line(&untimed), "000042,005,19/02/2024,,19/02/2024,");
    }
}
