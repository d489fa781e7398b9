//! Test fixtures for catalog rows.

use alyx_core::{Dataset, Provenance, Repository, RepositoryKind, Session};
use time::OffsetDateTime;
use time::macros::date;
use uuid::Uuid;

#[allow(dead_code)]
pub fn repository(name: &str, kind: RepositoryKind) -> Repository {
    Repository {
        name: name.to_string(),
        kind,
        root: format!("/mnt/{name}"),
        hostname: None,
        is_personal: false,
        authoritative: kind == RepositoryKind::LocalMirror,
        labs: Vec::new(),
        credentials: None,
    }
}

#[allow(dead_code)]
pub fn session(lab: &str, number: u16, modified_at: OffsetDateTime) -> Session {
    Session {
        id: Uuid::new_v4(),
        lab: lab.to_string(),
        subject: "KS023".to_string(),
        start_date: date!(2019 - 12 - 10),
        number,
        modified_at,
    }
}

#[allow(dead_code)]
pub fn dataset(session: &Session, name: &str, modified_at: OffsetDateTime) -> Dataset {
    Dataset {
        id: Uuid::new_v4(),
        session_id: session.id,
        name: name.to_string(),
        collection: Some("alf".to_string()),
        revision: None,
        file_size: None,
        hash: None,
        provenance: Provenance::default(),
        default_dataset: true,
        modified_at,
    }
}
