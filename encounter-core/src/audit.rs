//! Reference database health check.

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::reference::{ReferenceError, ReferenceSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub total: usize,
    pub ok: usize,
    /// Ids whose image file does not exist.
    pub missing: Vec<String>,
    /// Ids whose image exists but does not decode.
    pub unreadable: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unreadable.is_empty()
    }
}

/// Try to decode every reference image. Problem ids keep input order.
pub fn audit(refs: &ReferenceSet) -> AuditReport {
    let outcomes: Vec<Option<ReferenceError>> = refs
        .records()
        .par_iter()
        .map(|record| record.load().err())
        .collect();

    let mut report = AuditReport {
        total: refs.len(),
        ..Default::default()
    };
    for (record, outcome) in refs.iter().zip(outcomes) {
        match outcome {
            None => report.ok += 1,
            Some(ReferenceError::Missing) => report.missing.push(record.id.clone()),
            Some(ReferenceError::LoadFailed) => report.unreadable.push(record.id.clone()),
        }
    }

    info!(
        total = report.total,
        missing = report.missing.len(),
        unreadable = report.unreadable.len(),
        "Audited references"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceRecord;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_audit_classifies_entries() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good.png");
        RgbImage::from_pixel(3, 3, Rgb([9, 9, 9])).save(&good).unwrap();
        let bad = temp.path().join("bad.webp");
        std::fs::write(&bad, b"RIFF....").unwrap();

        let refs = ReferenceSet::new(vec![
            ReferenceRecord::new("gone", temp.path().join("gone.png")),
            ReferenceRecord::new("good", good),
            ReferenceRecord::new("bad", bad),
        ]);
        let report = audit(&refs);
        assert_eq!(report.total, 3);
        assert_eq!(report.ok, 1);
        assert_eq!(report.missing, ["gone"]);
        assert_eq!(report.unreadable, ["bad"]);
        assert!(!report.is_clean());
        assert!(audit(&ReferenceSet::default()).is_clean());
    }
}
