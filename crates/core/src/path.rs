//! Canonical relative path convention shared by every repository.
//!
//! Layout:
//! `{lab}/Subjects/{subject}/{YYYY-MM-DD}/{NNN}/[{collection}/][#{revision}#/]{stem}.{uuid}.{ext}`
//!
//! The dataset id sits between the stem and the extension so that several
//! revisions of one logical file can coexist in a flat directory.

use crate::dataset::DatasetName;
use time::Date;
use time::macros::format_description;
use uuid::Uuid;

const SUBJECTS_DIR: &str = "Subjects";

/// Components recovered from a relative path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedPath {
    pub lab: String,
    pub subject: String,
    pub date: Date,
    pub number: u16,
    pub collection: Option<String>,
    /// `None` when the path carries no `#revision#` segment.
    pub revision: Option<String>,
    /// Dataset file name with the embedded id removed.
    pub name: String,
    /// `None` for legacy paths without an embedded id.
    pub dataset_id: Option<Uuid>,
}

/// Relative directory of a session: `{lab}/Subjects/{subject}/{YYYY-MM-DD}/{NNN}`.
pub fn session_relative_dir(lab: &str, subject: &str, date: Date, number: u16) -> String {
    format!(
        "{lab}/{SUBJECTS_DIR}/{subject}/{:04}-{:02}-{:02}/{number:03}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Insert the dataset id before the final extension: `a.b.npy` -> `a.b.{id}.npy`.
pub fn add_uuid_to_filename(name: &DatasetName, dataset_id: Uuid) -> String {
    format!("{}.{}.{}", name.stem(), dataset_id.hyphenated(), name.extension)
}

/// Derive the canonical relative path of a dataset.
#[allow(clippy::too_many_arguments)]
pub fn canonical_relative_path(
    lab: &str,
    subject: &str,
    date: Date,
    number: u16,
    collection: Option<&str>,
    revision: Option<&str>,
    dataset_name: &str,
    dataset_id: Uuid,
) -> crate::Result<String> {
    validate_segment("lab", lab)?;
    validate_segment("subject", subject)?;

    let name = DatasetName::parse(dataset_name)?;
    let mut path = session_relative_dir(lab, subject, date, number);

    if let Some(collection) = collection.filter(|c| !c.is_empty()) {
        for segment in collection.split('/') {
            validate_segment("collection", segment)?;
        }
        path.push('/');
        path.push_str(collection);
    }

    if let Some(revision) = revision.filter(|r| !r.is_empty()) {
        validate_segment("revision", revision)?;
        path.push_str("/#");
        path.push_str(revision);
        path.push('#');
    }

    path.push('/');
    path.push_str(&add_uuid_to_filename(&name, dataset_id));
    Ok(path)
}

/// Recover the components of a path produced by [`canonical_relative_path`].
///
/// Paths without an embedded id are accepted and report `dataset_id: None`;
/// anything else that does not follow the layout is [`crate::Error::NotADatasetPath`].
pub fn invert_path(path: &str) -> crate::Result<ParsedPath> {
    let not_recognized = || crate::Error::NotADatasetPath(path.to_string());

    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    if parts.len() < 6 || parts[1] != SUBJECTS_DIR || parts.iter().any(|p| p.is_empty()) {
        return Err(not_recognized());
    }

    let date = Date::parse(parts[3], format_description!("[year]-[month]-[day]"))
        .map_err(|_| not_recognized())?;
    if parts[4].len() < 3 || !parts[4].chars().all(|c| c.is_ascii_digit()) {
        return Err(not_recognized());
    }
    let number: u16 = parts[4].parse().map_err(|_| not_recognized())?;

    let filename = parts[parts.len() - 1];
    let mut middle = &parts[5..parts.len() - 1];

    let mut revision = None;
    if let Some((last, rest)) = middle.split_last()
        && let Some(inner) = last.strip_prefix('#').and_then(|s| s.strip_suffix('#'))
    {
        if inner.is_empty() {
            return Err(not_recognized());
        }
        revision = Some(inner.to_string());
        middle = rest;
    }
    if middle.iter().any(|segment| segment.contains('#')) {
        return Err(not_recognized());
    }
    let collection = (!middle.is_empty()).then(|| middle.join("/"));

    let (name, dataset_id) = split_embedded_uuid(filename);
    DatasetName::parse(&name).map_err(|_| not_recognized())?;

    Ok(ParsedPath {
        lab: parts[0].to_string(),
        subject: parts[2].to_string(),
        date,
        number,
        collection,
        revision,
        name,
        dataset_id,
    })
}

/// Split `stem.{uuid}.ext` into (`stem.ext`, Some(uuid)); otherwise return the name unchanged.
fn split_embedded_uuid(filename: &str) -> (String, Option<Uuid>) {
    let parts: Vec<&str> = filename.split('.').collect();
    if parts.len() >= 4 {
        let candidate = parts[parts.len() - 2];
        if candidate.len() == 36
            && let Ok(id) = Uuid::parse_str(candidate)
        {
            let mut kept = parts[..parts.len() - 2].to_vec();
            kept.push(parts[parts.len() - 1]);
            return (kept.join("."), Some(id));
        }
    }
    (filename.to_string(), None)
}

fn validate_segment(what: &str, segment: &str) -> crate::Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('#')
    {
        return Err(crate::Error::InvalidPath(format!("{what}: {segment:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn dataset_id() -> Uuid {
        Uuid::parse_str("6b2e5c9a-2f1d-4c7e-9a8b-0f1e2d3c4b5a").unwrap()
    }

    #[test]
    fn builds_path_with_collection_and_revision() {
        let path = canonical_relative_path(
            "cortexlab",
            "KS023",
            date!(2019 - 12 - 10),
            1,
            Some("alf/probe00"),
            Some("2021-03-01"),
            "spikes.times.npy",
            dataset_id(),
        )
        .unwrap();

        assert_eq!(
            path,
            "cortexlab/Subjects/KS023/2019-12-10/001/alf/probe00/#2021-03-01#/\
             spikes.times.6b2e5c9a-2f1d-4c7e-9a8b-0f1e2d3c4b5a.npy"
        );
    }

    #[test]
    fn builds_path_without_collection() {
        let path = canonical_relative_path(
            "mainenlab",
            "ZM_1085",
            date!(2019 - 02 - 12),
            12,
            None,
            None,
            "_iblrig_taskData.raw.jsonable",
            dataset_id(),
        )
        .unwrap();

        assert_eq!(
            path,
            "mainenlab/Subjects/ZM_1085/2019-02-12/012/\
             _iblrig_taskData.raw.6b2e5c9a-2f1d-4c7e-9a8b-0f1e2d3c4b5a.jsonable"
        );
    }

    #[test]
    fn rejects_traversal_in_collection() {
        let result = canonical_relative_path(
            "lab",
            "subject",
            date!(2020 - 01 - 01),
            1,
            Some("alf/../secret"),
            None,
            "spikes.times.npy",
            dataset_id(),
        );
        assert!(matches!(result, Err(crate::Error::InvalidPath(_))));
    }

    #[test]
    fn round_trip_recovers_components() {
        let cases = [
            (Some("alf"), None, "spikes.times.npy"),
            (Some("raw_ephys_data/probe01"), Some("v2"), "_spikeglx_ephysData_g0_t0.imec0.ap.cbin"),
            (None, Some("2022-01-01"), "_ibl_trials.table.pqt"),
            (None, None, "_iblrig_taskSettings.raw.json"),
        ];

        for (collection, revision, name) in cases {
            let id = Uuid::new_v4();
            let path = canonical_relative_path(
                "churchlandlab",
                "CSHL_003",
                date!(2021 - 06 - 30),
                3,
                collection,
                revision,
                name,
                id,
            )
            .unwrap();

            let parsed = invert_path(&path).unwrap();
            assert_eq!(parsed.lab, "churchlandlab");
            assert_eq!(parsed.subject, "CSHL_003");
            assert_eq!(parsed.date, date!(2021 - 06 - 30));
            assert_eq!(parsed.number, 3);
            assert_eq!(parsed.collection.as_deref(), collection);
            assert_eq!(parsed.revision.as_deref(), revision);
            assert_eq!(parsed.name, name);
            assert_eq!(parsed.dataset_id, Some(id));
        }
    }

    #[test]
    fn inverting_legacy_path_reports_missing_id() {
        let parsed =
            invert_path("cortexlab/Subjects/KS023/2019-12-10/001/alf/spikes.times.npy").unwrap();
        assert_eq!(parsed.dataset_id, None);
        assert_eq!(parsed.revision, None);
        assert_eq!(parsed.collection.as_deref(), Some("alf"));
        assert_eq!(parsed.name, "spikes.times.npy");
    }

    #[test]
    fn inverting_foreign_paths_fails_deterministically() {
        for path in [
            "cortexlab/KS023/2019-12-10/001/alf/spikes.times.npy",
            "cortexlab/Subjects/KS023/2019-13-10/001/alf/spikes.times.npy",
            "cortexlab/Subjects/KS023/2019-12-10/1/alf/spikes.times.npy",
            "cortexlab/Subjects/KS023/2019-12-10/001/alf/README",
            "cortexlab/Subjects/KS023/2019-12-10/001/##/spikes.times.npy",
            "cortexlab/Subjects/KS023/2019-12-10/001/#a#/alf/spikes.times.npy",
        ] {
            match invert_path(path) {
                Err(crate::Error::NotADatasetPath(p)) => assert_eq!(p, path),
                other => panic!("expected NotADatasetPath for {path}, got {other:?}"),
            }
        }
    }

    #[test]
    fn session_dir_is_zero_padded() {
        assert_eq!(
            session_relative_dir("lab", "mouse", date!(2020 - 01 - 02), 7),
            "lab/Subjects/mouse/2020-01-02/007"
        );
    }
}
