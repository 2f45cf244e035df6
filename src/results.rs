//! Result aggregation.
//!
//! [`ResultAggregator`] collects calibration and point records in creation
//! order while a scan runs, then seals them into a [`ScanResult`] tagged
//! `Completed` or `Aborted`. Records are immutable once created; the only
//! way to obtain a `MeasurementRecord` is through the aggregator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::devices::Spectrum;
use crate::error::{DeviceError, ScanError};
use crate::recipe::{MeasurementPoint, RecipeMeta};

/// What a record captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Lamp-off baseline.
    DarkCurrent,
    /// Reference standard at the white-reference angles.
    WhiteReference,
    /// A recipe point.
    Point,
}

/// Spectrum or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Acquired spectrum.
    Spectrum(Spectrum),
    /// Error that prevented the acquisition.
    Failed(DeviceError),
}

/// One acquisition within a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    sequence: u64,
    kind: RecordKind,
    point: Option<MeasurementPoint>,
    outcome: RecordOutcome,
    captured_at: DateTime<Utc>,
}

impl MeasurementRecord {
    /// Monotonic index shared by calibration and point records.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Calibration or point record.
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Angles the record was taken at. `None` for dark current.
    pub fn point(&self) -> Option<&MeasurementPoint> {
        self.point.as_ref()
    }

    /// Spectrum or failure.
    pub fn outcome(&self) -> &RecordOutcome {
        &self.outcome
    }

    /// Spectrum, if the acquisition succeeded.
    pub fn spectrum(&self) -> Option<&Spectrum> {
        match &self.outcome {
            RecordOutcome::Spectrum(spectrum) => Some(spectrum),
            RecordOutcome::Failed(_) => None,
        }
    }

    /// Error, if the acquisition failed.
    pub fn error(&self) -> Option<&DeviceError> {
        match &self.outcome {
            RecordOutcome::Spectrum(_) => None,
            RecordOutcome::Failed(err) => Some(err),
        }
    }

    /// True for a failed point.
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RecordOutcome::Failed(_))
    }

    /// When the record was appended.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// Terminal status of a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ScanStatus {
    /// Every point was processed.
    Completed,
    /// Stopped early; records up to the failure are kept.
    Aborted(ScanError),
}

/// Everything a scan produced. Handed to the exporter once sealed.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    run_id: Uuid,
    meta: RecipeMeta,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    dark_current: Option<MeasurementRecord>,
    white_reference: Option<MeasurementRecord>,
    records: Vec<MeasurementRecord>,
    status: ScanStatus,
}

impl ScanResult {
    /// Unique id of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Recipe metadata copied at scan start.
    pub fn meta(&self) -> &RecipeMeta {
        &self.meta
    }

    /// When calibration began.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the result was sealed.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Dark-current baseline, if taken.
    pub fn dark_current(&self) -> Option<&MeasurementRecord> {
        self.dark_current.as_ref()
    }

    /// White-reference spectrum, if taken.
    pub fn white_reference(&self) -> Option<&MeasurementRecord> {
        self.white_reference.as_ref()
    }

    /// Point records in recipe order.
    pub fn records(&self) -> &[MeasurementRecord] {
        &self.records
    }

    /// Terminal status.
    pub fn status(&self) -> &ScanStatus {
        &self.status
    }

    /// True unless the scan aborted.
    pub fn is_completed(&self) -> bool {
        matches!(self.status, ScanStatus::Completed)
    }

    /// The error that aborted the scan.
    pub fn error(&self) -> Option<&ScanError> {
        match &self.status {
            ScanStatus::Completed => None,
            ScanStatus::Aborted(err) => Some(err),
        }
    }

    /// Calibration records present in this result.
    pub fn calibration_records(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.dark_current.iter().chain(self.white_reference.iter())
    }

    /// All records sorted by sequence index.
    pub fn all_records(&self) -> Vec<&MeasurementRecord> {
        let mut all: Vec<_> = self.calibration_records().chain(self.records.iter()).collect();
        all.sort_by_key(|record| record.sequence);
        all
    }

    /// Points with a spectrum.
    pub fn successful_points(&self) -> usize {
        self.records.iter().filter(|r| !r.is_failed()).count()
    }

    /// Points skipped after a motion failure.
    pub fn failed_points(&self) -> usize {
        self.records.iter().filter(|r| r.is_failed()).count()
    }

    /// Wall-clock (or simulated) scan duration.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Accumulates records for one scan.
pub struct ResultAggregator {
    clock: Arc<dyn Clock>,
    run_id: Uuid,
    meta: RecipeMeta,
    started_at: DateTime<Utc>,
    next_sequence: u64,
    dark_current: Option<MeasurementRecord>,
    white_reference: Option<MeasurementRecord>,
    records: Vec<MeasurementRecord>,
}

impl ResultAggregator {
    /// Start a run, stamping the start time from `clock`.
    pub fn new(meta: RecipeMeta, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self {
            clock,
            run_id: Uuid::new_v4(),
            meta,
            started_at,
            next_sequence: 0,
            dark_current: None,
            white_reference: None,
            records: Vec::new(),
        }
    }

    /// Id the sealed result will carry.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn make_record(
        &mut self,
        kind: RecordKind,
        point: Option<MeasurementPoint>,
        outcome: RecordOutcome,
    ) -> MeasurementRecord {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        MeasurementRecord {
            sequence,
            kind,
            point,
            outcome,
            captured_at: self.clock.now(),
        }
    }

    /// Store the dark-current baseline.
    pub fn record_dark_current(&mut self, spectrum: Spectrum) -> &MeasurementRecord {
        let record = self.make_record(RecordKind::DarkCurrent, None, RecordOutcome::Spectrum(spectrum));
        self.dark_current.insert(record)
    }

    /// Store the white-reference spectrum taken at `point`.
    pub fn record_white_reference(
        &mut self,
        point: MeasurementPoint,
        spectrum: Spectrum,
    ) -> &MeasurementRecord {
        let record = self.make_record(
            RecordKind::WhiteReference,
            Some(point),
            RecordOutcome::Spectrum(spectrum),
        );
        self.white_reference.insert(record)
    }

    /// Append a successful point measurement.
    pub fn record_point(&mut self, point: MeasurementPoint, spectrum: Spectrum) -> &MeasurementRecord {
        let record = self.make_record(RecordKind::Point, Some(point), RecordOutcome::Spectrum(spectrum));
        self.push(record)
    }

    /// Append a point that could not be measured.
    pub fn record_point_failure(
        &mut self,
        point: MeasurementPoint,
        error: DeviceError,
    ) -> &MeasurementRecord {
        let record = self.make_record(RecordKind::Point, Some(point), RecordOutcome::Failed(error));
        self.push(record)
    }

    fn push(&mut self, record: MeasurementRecord) -> &MeasurementRecord {
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    fn seal(self, status: ScanStatus) -> ScanResult {
        ScanResult {
            run_id: self.run_id,
            meta: self.meta,
            started_at: self.started_at,
            finished_at: self.clock.now(),
            dark_current: self.dark_current,
            white_reference: self.white_reference,
            records: self.records,
            status,
        }
    }

    /// Seal as [`ScanStatus::Completed`].
    pub fn complete(self) -> ScanResult {
        self.seal(ScanStatus::Completed)
    }

    /// Seal as [`ScanStatus::Aborted`], keeping every record so far.
    pub fn abort(self, error: ScanError) -> ScanResult {
        self.seal(ScanStatus::Aborted(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use std::time::Duration;

    fn spectrum() -> Spectrum {
        Spectrum::new(vec![500.0, 501.0], vec![0.1, 0.2], 100.0).unwrap()
    }

    fn point(theta_o: f64) -> MeasurementPoint {
        MeasurementPoint::new(45.0, 0.0, theta_o, 180.0)
    }

    #[tokio::test]
    async fn test_sequence_shared_across_record_kinds() {
        let clock = Arc::new(SimulatedClock::new());
        let mut agg = ResultAggregator::new(RecipeMeta::default(), clock.clone());

        agg.record_dark_current(spectrum());
        agg.record_white_reference(point(0.0), spectrum());
        clock.sleep(Duration::from_secs(1)).await;
        agg.record_point(point(10.0), spectrum());
        agg.record_point_failure(
            point(20.0),
            DeviceError::motion(crate::error::MotionFaultKind::Unreachable, "out of reach"),
        );
        let result = agg.complete();

        let order: Vec<_> = result.all_records().iter().map(|r| (r.sequence(), r.kind())).collect();
        assert_eq!(
            order,
            vec![
                (0, RecordKind::DarkCurrent),
                (1, RecordKind::WhiteReference),
                (2, RecordKind::Point),
                (3, RecordKind::Point),
            ]
        );
        assert!(result.is_completed());
        assert_eq!(result.successful_points(), 1);
        assert_eq!(result.failed_points(), 1);
        assert_eq!(result.duration(), chrono::Duration::seconds(1));
        assert!(result.records()[0].captured_at() > result.dark_current().unwrap().captured_at());
    }

    #[test]
    fn test_abort_keeps_partial_records() {
        let mut agg = ResultAggregator::new(RecipeMeta::default(), Arc::new(SimulatedClock::new()));
        agg.record_point(point(0.0), spectrum());
        let result = agg.abort(ScanError::MeasurementFailure(DeviceError::NotConnected));

        assert!(!result.is_completed());
        assert_eq!(result.records().len(), 1);
        assert_eq!(
            result.error().and_then(ScanError::device_error),
            Some(&DeviceError::NotConnected)
        );
        assert!(result.dark_current().is_none());
    }

    #[test]
    fn test_result_serializes_status() {
        let agg = ResultAggregator::new(RecipeMeta::default(), Arc::new(SimulatedClock::new()));
        let json = serde_json::to_value(agg.complete()).unwrap();
        assert_eq!(json["status"]["status"], "completed");
        assert!(json["records"].as_array().unwrap().is_empty());
    }
}
