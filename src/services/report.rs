use chrono::{DateTime, FixedOffset, Utc};

use crate::models::AttendanceReportRow;

pub const FALLBACK_ORGANIZATION: &str = "Others";

const CSV_HEADER: [&str; 11] = [
    "Full Name",
    "Student Number",
    "Course",
    "Organization",
    "Year Level",
    "Email",
    "Contact Number",
    "Remarks",
    "QR Code",
    "Time In",
    "Time Out",
];

/// Student organization responsible for a course
pub fn organization_for(course: &str) -> &'static str {
    match course.trim() {
        "BSAM" => "ABS",
        "BSHM" => "HMS",
        "BSIT" | "DIT" => "IBITS",
        "DCET" => "ICEPT",
        "BSEE" | "DEET" => "IIEE",
        "BS-Bio" => "ILS",
        "BSBA-FM" => "JFINEX",
        "BSBA-MM" => "JME",
        "BS-Account" => "JPIA",
        "BPA" | "BPA-FA" => "PADS",
        "BSND" => "PAN-YC",
        "BSOA" => "PASOA",
        "BSCE" | "DCVET" => "PICE",
        "DOMT-LOM" | "DOMT-MOM" => "SYNERTECH",
        "BS-Archi" => "UAPSA",
        "BEED" | "BSED" => "YES",
        _ => FALLBACK_ORGANIZATION,
    }
}

fn format_timestamp(at: Option<DateTime<Utc>>, offset: FixedOffset) -> String {
    at.map(|t| t.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders the attendance snapshot as CSV, grouped by organization then name
pub fn render_csv(rows: &[AttendanceReportRow], offset: FixedOffset) -> String {
    let mut sorted: Vec<(&'static str, &AttendanceReportRow)> = rows
        .iter()
        .map(|row| (organization_for(&row.record.course), row))
        .collect();
    sorted.sort_by(|(org_a, a), (org_b, b)| {
        org_a
            .cmp(org_b)
            .then_with(|| a.record.full_name.cmp(&b.record.full_name))
    });

    let mut out = CSV_HEADER.join(",");
    out.push_str("\r\n");

    for (organization, row) in sorted {
        let record = &row.record;
        let fields = [
            record.full_name.clone(),
            record.student_number.clone().unwrap_or_default(),
            record.course.clone(),
            organization.to_string(),
            record.year_level.clone().unwrap_or_default(),
            record.email.clone().unwrap_or_default(),
            record.contact_number.clone().unwrap_or_default(),
            record.remarks.clone().unwrap_or_default(),
            row.token_code.clone(),
            format_timestamp(record.time_in, offset),
            format_timestamp(record.time_out, offset),
        ];

        let line: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }

    out
}
