//! Trait contract tests for TrackingSheet.
//!
//! These tests verify the behavioral contract of the sheet trait using the
//! in-memory fake. Any conforming backend must pass these.

use cireport_state::fakes::MemoryTrackingSheet;
use cireport_state::storage_traits::*;
use cireport_state::{ComputedResult, JobFamily, Run, RunId, SheetRow, StorageError};

fn row(family: &JobFamily, id: u64, result: ComputedResult) -> SheetRow {
    SheetRow::new(Run::new(family.clone(), RunId(id), result), "tester")
}

#[tokio::test]
async fn empty_family_has_no_watermark() {
    let sheet = MemoryTrackingSheet::new();
    let family = JobFamily::new("e2e-openstack-4.4");

    assert_eq!(sheet.latest_recorded_id(&family).await.unwrap(), None);
    assert!(sheet.rows(&family).await.unwrap().is_empty());
}

#[tokio::test]
async fn append_advances_watermark() {
    let sheet = MemoryTrackingSheet::new();
    let family = JobFamily::new("e2e-openstack-4.4");

    sheet
        .append_row(row(&family, 7, ComputedResult::Passed))
        .await
        .unwrap();
    sheet
        .append_row(row(&family, 8, ComputedResult::Failed))
        .await
        .unwrap();

    assert_eq!(
        sheet.latest_recorded_id(&family).await.unwrap(),
        Some(RunId(8))
    );
    let rows = sheet.rows(&family).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].run_id(), RunId(7));
    assert_eq!(rows[1].run.result, ComputedResult::Failed);
}

#[tokio::test]
async fn seeded_watermark_is_reported() {
    let family = JobFamily::new("e2e-openstack-serial-4.3");
    let sheet = MemoryTrackingSheet::new().with_watermark(&family, RunId(10));

    assert_eq!(
        sheet.latest_recorded_id(&family).await.unwrap(),
        Some(RunId(10))
    );
}

#[tokio::test]
async fn append_at_or_below_watermark_is_refused() {
    let family = JobFamily::new("e2e");
    let sheet = MemoryTrackingSheet::new().with_watermark(&family, RunId(10));

    let err = sheet
        .append_row(row(&family, 10, ComputedResult::Passed))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::OutOfOrderAppend {
            watermark: RunId(10),
            ..
        }
    ));
    assert!(sheet.recorded_ids(&family).is_empty());
}

#[tokio::test]
async fn families_are_independent() {
    let a = JobFamily::new("a");
    let b = JobFamily::new("b");
    let sheet = MemoryTrackingSheet::new();

    sheet
        .append_row(row(&a, 100, ComputedResult::Passed))
        .await
        .unwrap();
    sheet
        .append_row(row(&b, 5, ComputedResult::Passed))
        .await
        .unwrap();

    assert_eq!(sheet.latest_recorded_id(&a).await.unwrap(), Some(RunId(100)));
    assert_eq!(sheet.latest_recorded_id(&b).await.unwrap(), Some(RunId(5)));
}

#[tokio::test]
async fn scripted_rejection_keeps_earlier_rows() {
    let family = JobFamily::new("e2e");
    let sheet = MemoryTrackingSheet::new();
    sheet.reject_append(&family, RunId(2), "permission denied");

    sheet
        .append_row(row(&family, 1, ComputedResult::Passed))
        .await
        .unwrap();
    let err = sheet
        .append_row(row(&family, 2, ComputedResult::Passed))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::AppendRejected { .. }));
    assert_eq!(sheet.recorded_ids(&family), vec![RunId(1)]);
    assert_eq!(sheet.append_calls(), 2);
}

#[tokio::test]
async fn unavailable_family_fails_reads() {
    let family = JobFamily::new("e2e");
    let sheet = MemoryTrackingSheet::new();
    sheet.make_unavailable(&family);

    let err = sheet.latest_recorded_id(&family).await.unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
}
