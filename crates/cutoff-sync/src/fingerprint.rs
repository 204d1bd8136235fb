use cutoff_core::{MajorRecord, ProgramType};
use serde_json::json;
use sha2::{Digest, Sha256};

type IdentityKey = (String, ProgramType, Option<String>, Option<bool>, String);

fn identity_key(record: &MajorRecord) -> IdentityKey {
    (
        record.name.clone(),
        record.effective_program_type(),
        record.year.clone(),
        record.domestic,
        record.external_id.clone(),
    )
}

/// One line per record; `serde_json::Value` objects keep keys sorted.
fn canonical_line(record: &MajorRecord) -> String {
    json!({
        "name": record.name,
        "external_id": record.external_id,
        "program_type": record.program_type.map(ProgramType::as_str),
        "year": record.year,
        "max_grade": record.max_grade,
        "min_grade": record.min_grade,
        "initial_reject_count": record.initial_reject_count,
        "final_admit_count": record.final_admit_count,
        "domestic": record.domestic,
        "note": record.note,
    })
    .to_string()
}

/// SHA-256 over the record set sorted by identity, independent of arrival order.
pub fn fingerprint(records: &[MajorRecord]) -> String {
    let mut lines: Vec<(IdentityKey, String)> = records
        .iter()
        .map(|record| (identity_key(record), canonical_line(record)))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for (_, line) in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
