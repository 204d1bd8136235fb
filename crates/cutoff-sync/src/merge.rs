use std::collections::BTreeMap;

use cutoff_core::{MajorRecord, ProgramType};

/// Canonical set keyed by `name|type|year`; one record per key.
pub type MergedRecords = BTreeMap<String, MajorRecord>;

fn override_field<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

fn absorb(existing: &mut MajorRecord, incoming: MajorRecord) {
    if existing.program_type.is_none() {
        existing.program_type = incoming.program_type;
    }
    override_field(&mut existing.max_grade, incoming.max_grade);
    override_field(&mut existing.min_grade, incoming.min_grade);
    override_field(&mut existing.initial_reject_count, incoming.initial_reject_count);
    override_field(&mut existing.final_admit_count, incoming.final_admit_count);
    override_field(&mut existing.domestic, incoming.domestic);
    if !incoming.note.is_empty() {
        existing.note = incoming.note;
    }
}

/// Sheet records first, then scrape records, each in source order.
///
/// The first record under a key fixes `name` and `external_id`; later records
/// overwrite statistics only where they carry a value.
pub fn merge(sheet: Vec<MajorRecord>, scrape: Vec<MajorRecord>) -> MergedRecords {
    let mut merged = MergedRecords::new();
    for record in sheet.into_iter().chain(scrape) {
        match merged.get_mut(&record.merge_key()) {
            Some(existing) => absorb(existing, record),
            None => {
                merged.insert(record.merge_key(), record);
            }
        }
    }
    for record in merged.values_mut() {
        record.program_type.get_or_insert(ProgramType::Major);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cs(external_id: &str, min: Option<f64>, domestic: Option<bool>) -> MajorRecord {
        let mut record = MajorRecord::new("CS", external_id);
        record.program_type = Some(ProgramType::Major);
        record.year = Some("2023".into());
        record.min_grade = min;
        record.domestic = domestic;
        record
    }

    #[test]
    fn later_non_null_values_overwrite_statistics() {
        let merged = merge(
            vec![cs("0530", Some(80.0), None)],
            vec![cs("9999", Some(85.0), Some(true))],
        );
        assert_eq!(merged.len(), 1);
        let record = &merged["CS|Major|2023"];
        assert_eq!(record.min_grade, Some(85.0));
        assert_eq!(record.domestic, Some(true));
        assert_eq!(record.name, "CS");
        assert_eq!(record.external_id, "0530");
    }

    #[test]
    fn null_incoming_values_keep_existing() {
        let mut sheet = cs("0530", Some(80.0), Some(false));
        sheet.max_grade = Some(96.0);
        sheet.note = "sheet note".into();
        let scrape = cs("0530", None, None);

        let merged = merge(vec![sheet], vec![scrape]);
        let record = &merged["CS|Major|2023"];
        assert_eq!(record.min_grade, Some(80.0));
        assert_eq!(record.max_grade, Some(96.0));
        assert_eq!(record.domestic, Some(false));
        assert_eq!(record.note, "sheet note");
    }

    #[test]
    fn unresolved_type_shares_key_with_major_and_defaults() {
        let mut untyped = MajorRecord::new("Astronomy", "0201");
        untyped.year = Some("2022".into());
        let mut honours = untyped.clone();
        honours.program_type = Some(ProgramType::Honours);

        let merged = merge(vec![untyped.clone()], vec![honours]);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged["Astronomy|Major|2022"].program_type,
            Some(ProgramType::Major)
        );
        assert_eq!(
            merged["Astronomy|Honours|2022"].program_type,
            Some(ProgramType::Honours)
        );

        let mut typed = untyped.clone();
        typed.program_type = Some(ProgramType::Major);
        typed.min_grade = Some(77.0);
        let merged = merge(vec![untyped], vec![typed]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["Astronomy|Major|2022"].min_grade, Some(77.0));
    }

    #[test]
    fn distinct_years_stay_separate() {
        let mut older = cs("0530", Some(79.0), Some(true));
        older.year = Some("2022".into());
        let merged = merge(vec![cs("0530", Some(80.0), Some(true)), older], vec![]);
        let keys: Vec<_> = merged.keys().cloned().collect();
        assert_eq!(keys, vec!["CS|Major|2022", "CS|Major|2023"]);
    }
}
