//! 🦴 Chunk skeletons — the passport every chunk of an object carries.
//!
//! Pure: source identity plus object attributes in, a `Chunk` with empty
//! `data` out. Whoever emits bytes clones it and fills `data`.

use crate::backends::StoreObject;
use crate::common::{Chunk, ObjectMetadata, SourceIdentity};

pub fn build_chunk_skeleton(identity: &SourceIdentity, object: &StoreObject) -> Chunk {
    Chunk {
        source_name: identity.name.clone(),
        source_type: identity.source_type,
        source_id: identity.source_id,
        job_id: identity.job_id,
        verify: identity.verify,
        metadata: ObjectMetadata {
            bucket: object.bucket.clone(),
            filename: object.name.clone(),
            link: object.link.clone(),
            email: object.owner.clone(),
            content_type: object.content_type.clone(),
            acls: object.acl.clone(),
            created_at: object.created_at.to_rfc3339(),
            updated_at: object.updated_at.to_rfc3339(),
        },
        data: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::common::SourceType;

    #[test]
    fn the_one_where_every_attribute_lands_in_the_metadata() {
        let the_identity = SourceIdentity {
            name: "nightly".into(),
            source_type: SourceType::File,
            source_id: 42,
            job_id: 7,
            verify: true,
        };
        let the_created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().expect("💀 date");
        let the_updated = Utc.with_ymd_and_hms(2024, 6, 7, 8, 9, 10).single().expect("💀 date");
        let the_object = StoreObject {
            bucket: "logs".into(),
            name: "2024/app.log".into(),
            size: 12,
            owner: "ops@example.com".into(),
            content_type: "text/plain".into(),
            acl: vec!["OWNER".into(), "READER".into()],
            link: "file:///tmp/logs/2024/app.log".into(),
            created_at: the_created,
            updated_at: the_updated,
        };

        let the_chunk = build_chunk_skeleton(&the_identity, &the_object);
        assert_eq!(the_chunk.source_name, "nightly");
        assert_eq!(the_chunk.source_type, SourceType::File);
        assert_eq!(the_chunk.source_id, 42);
        assert_eq!(the_chunk.job_id, 7);
        assert!(the_chunk.verify);
        assert!(the_chunk.data.is_empty());
        assert_eq!(the_chunk.metadata.bucket, "logs");
        assert_eq!(the_chunk.metadata.filename, "2024/app.log");
        assert_eq!(the_chunk.metadata.email, "ops@example.com");
        assert_eq!(the_chunk.metadata.acls, vec!["OWNER", "READER"]);
        assert_eq!(the_chunk.metadata.created_at, "2024-01-02T03:04:05+00:00");
        assert_eq!(the_chunk.metadata.updated_at, "2024-06-07T08:09:10+00:00");
        assert_eq!(the_chunk.object_key(), the_object.key());
    }
}
