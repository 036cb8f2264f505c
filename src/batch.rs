//! Daily batch run: one route per active technician.
//!
//! A failure for one subject is logged and counted, never propagated, so a
//! single bad address or provider outage cannot take down the whole run.

use tracing::{error, info, warn};

use crate::error::RouteError;
use crate::jobboard::{DateRange, DateRangeType, JobBoard};
use crate::orchestrator::{Orchestrator, ProviderFactory, RouteOutcome};
use crate::provider::ProviderKind;
use crate::shorten::UrlShortener;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub provider: ProviderKind,
    /// Restrict the run to one subject id.
    pub subject: Option<u64>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    /// Build and log URLs without writing them back.
    pub dry_run: bool,
    pub range: DateRange,
    pub range_type: DateRangeType,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Google,
            subject: None,
            origin: None,
            destination: None,
            dry_run: false,
            range: DateRange::today(),
            range_type: DateRangeType::Scheduled,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// URLs generated (and written back unless dry-run).
    pub routed: usize,
    /// Subjects with no scheduled work in the range.
    pub skipped: usize,
    /// Subjects whose route generation or write-back failed.
    pub failed: usize,
}

/// Route every active subject (or the one named in `options`). Only a
/// failure to list subjects aborts the run.
pub fn run_batch<B: JobBoard, F: ProviderFactory>(
    orchestrator: &Orchestrator<B, F>,
    shortener: &UrlShortener,
    route_field_name: &str,
    options: &BatchOptions,
) -> Result<BatchSummary, RouteError> {
    let mut subjects = orchestrator.board().active_subjects()?;
    if let Some(id) = options.subject {
        subjects.retain(|s| s.id == id);
        if subjects.is_empty() {
            warn!(subject_id = id, "subject not found among active subjects");
        }
    }

    let mut summary = BatchSummary::default();

    for subject in &subjects {
        let name = subject.display_name();

        let outcome = orchestrator.generate_route(
            options.provider,
            subject.id,
            options.origin.as_deref(),
            options.destination.as_deref(),
            options.range,
            options.range_type,
        );

        let url = match outcome {
            Ok(RouteOutcome::Url(url)) => url,
            Ok(RouteOutcome::NoAssignments) => {
                info!(subject_id = subject.id, subject = %name, "no work scheduled, skipping");
                summary.skipped += 1;
                continue;
            }
            Err(err) => {
                error!(subject_id = subject.id, subject = %name, %err, "route generation failed");
                summary.failed += 1;
                continue;
            }
        };

        let short = shortener.shorten(&url);

        if options.dry_run {
            info!(subject_id = subject.id, subject = %name, url = %short, "dry run, not writing back");
            summary.routed += 1;
            continue;
        }

        match orchestrator
            .board()
            .update_route_field(subject.id, &short, route_field_name)
        {
            Ok(()) => {
                info!(subject_id = subject.id, subject = %name, url = %short, "route url saved");
                summary.routed += 1;
            }
            Err(err) => {
                error!(subject_id = subject.id, subject = %name, %err, "failed to save route url");
                summary.failed += 1;
            }
        }
    }

    info!(
        routed = summary.routed,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch run complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::cache::Cache;
    use crate::error::BoardError;
    use crate::jobboard::{Assignment, Subject};
    use crate::provider::{RouteContext, RouteProvider};
    use crate::stop::Stop;

    struct FakeBoard {
        subjects: Vec<Subject>,
        assignments: HashMap<u64, Vec<Assignment>>,
        updates: RefCell<Vec<(u64, String, String)>>,
    }

    impl FakeBoard {
        fn new(subjects: Vec<Subject>, assignments: HashMap<u64, Vec<Assignment>>) -> Self {
            Self {
                subjects,
                assignments,
                updates: RefCell::new(Vec::new()),
            }
        }
    }

    impl JobBoard for FakeBoard {
        fn active_subjects(&self) -> Result<Vec<Subject>, BoardError> {
            Ok(self.subjects.clone())
        }

        fn assignments_for_subject(
            &self,
            subject_id: u64,
            _range: DateRange,
            _range_type: DateRangeType,
        ) -> Result<Vec<Assignment>, BoardError> {
            Ok(self.assignments.get(&subject_id).cloned().unwrap_or_default())
        }

        fn subject_origin_address(&self, _subject_id: u64) -> Result<Option<String>, BoardError> {
            Ok(Some("Base, ME".to_string()))
        }

        fn update_route_field(
            &self,
            subject_id: u64,
            url: &str,
            field_name: &str,
        ) -> Result<(), BoardError> {
            self.updates
                .borrow_mut()
                .push((subject_id, url.to_string(), field_name.to_string()));
            Ok(())
        }
    }

    /// Joins stop addresses into a fake URL; errors when any address
    /// contains "bad".
    struct JoiningProvider {
        stops: Vec<Stop>,
    }

    impl RouteProvider for JoiningProvider {
        fn add_stop(&mut self, stop: Stop) {
            self.stops.push(stop);
        }

        fn add_stops(&mut self, stops: Vec<Stop>) {
            self.stops.extend(stops);
        }

        fn build_route_url(&mut self) -> Result<String, RouteError> {
            if self.stops.iter().any(|s| s.address.contains("bad")) {
                return Err(RouteError::Build("unroutable stop".to_string()));
            }
            let joined: Vec<&str> = self.stops.iter().map(|s| s.address.as_str()).collect();
            Ok(format!("https://example.com/route/{}", joined.join("/")))
        }
    }

    struct FakeFactory;

    impl ProviderFactory for FakeFactory {
        fn make(
            &self,
            _kind: ProviderKind,
            _ctx: RouteContext,
        ) -> Result<Box<dyn RouteProvider>, RouteError> {
            Ok(Box::new(JoiningProvider { stops: Vec::new() }))
        }
    }

    fn subject(id: u64) -> Subject {
        Subject {
            id,
            first_name: Some(format!("Tech{id}")),
            last_name: None,
        }
    }

    fn assignment(street: &str) -> Assignment {
        Assignment {
            service_request_id: Some("1".to_string()),
            address: Some(street.to_string()),
            city: Some("X".to_string()),
            state: Some("ME".to_string()),
            zip: Some("00001".to_string()),
            start: Some("2024-01-01T08:00:00".to_string()),
            ..Assignment::default()
        }
    }

    fn shortener() -> UrlShortener {
        UrlShortener::new(None, Cache::new("batch-test", Duration::from_secs(60)))
            .expect("client builds")
    }

    #[test]
    fn one_failing_subject_does_not_block_the_rest() {
        let mut assignments = HashMap::new();
        assignments.insert(1, vec![assignment("10 A St")]);
        assignments.insert(2, vec![assignment("bad address")]);
        assignments.insert(3, vec![assignment("30 C St")]);

        let board = FakeBoard::new(vec![subject(1), subject(2), subject(3)], assignments);
        let orchestrator = Orchestrator::new(board, FakeFactory, None);

        let summary = run_batch(
            &orchestrator,
            &shortener(),
            "OptimizedRouteURL",
            &BatchOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.routed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 0);

        let updates = orchestrator.board().updates.borrow();
        let updated_ids: Vec<u64> = updates.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(updated_ids, vec![1, 3]);
    }

    #[test]
    fn subjects_without_work_are_skipped_not_failed() {
        let mut assignments = HashMap::new();
        assignments.insert(1, vec![assignment("10 A St")]);
        // Subject 2 has no assignments at all.

        let board = FakeBoard::new(vec![subject(1), subject(2)], assignments);
        let orchestrator = Orchestrator::new(board, FakeFactory, None);

        let summary = run_batch(
            &orchestrator,
            &shortener(),
            "OptimizedRouteURL",
            &BatchOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.routed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn dry_run_never_writes_back() {
        let mut assignments = HashMap::new();
        assignments.insert(1, vec![assignment("10 A St")]);

        let board = FakeBoard::new(vec![subject(1)], assignments);
        let orchestrator = Orchestrator::new(board, FakeFactory, None);

        let options = BatchOptions {
            dry_run: true,
            ..BatchOptions::default()
        };
        let summary = run_batch(&orchestrator, &shortener(), "OptimizedRouteURL", &options).unwrap();

        assert_eq!(summary.routed, 1);
        assert!(orchestrator.board().updates.borrow().is_empty());
    }

    #[test]
    fn subject_filter_limits_the_run() {
        let mut assignments = HashMap::new();
        assignments.insert(1, vec![assignment("10 A St")]);
        assignments.insert(2, vec![assignment("20 B St")]);

        let board = FakeBoard::new(vec![subject(1), subject(2)], assignments);
        let orchestrator = Orchestrator::new(board, FakeFactory, None);

        let options = BatchOptions {
            subject: Some(2),
            ..BatchOptions::default()
        };
        let summary = run_batch(&orchestrator, &shortener(), "OptimizedRouteURL", &options).unwrap();

        assert_eq!(summary.routed, 1);
        let updates = orchestrator.board().updates.borrow();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, 2);
    }

    #[test]
    fn unknown_subject_filter_routes_nothing() {
        let board = FakeBoard::new(vec![subject(1)], HashMap::new());
        let orchestrator = Orchestrator::new(board, FakeFactory, None);

        let options = BatchOptions {
            subject: Some(99),
            ..BatchOptions::default()
        };
        let summary = run_batch(&orchestrator, &shortener(), "OptimizedRouteURL", &options).unwrap();

        assert_eq!(summary, BatchSummary::default());
    }

    #[test]
    fn origin_override_reaches_the_provider_context() {
        // The fake provider ignores the context, so assert through the
        // orchestrator directly: an override must not error even when the
        // board has no origin.
        struct NoOriginBoard(FakeBoard);

        impl JobBoard for NoOriginBoard {
            fn active_subjects(&self) -> Result<Vec<Subject>, BoardError> {
                self.0.active_subjects()
            }

            fn assignments_for_subject(
                &self,
                subject_id: u64,
                range: DateRange,
                range_type: DateRangeType,
            ) -> Result<Vec<Assignment>, BoardError> {
                self.0.assignments_for_subject(subject_id, range, range_type)
            }

            fn subject_origin_address(&self, _subject_id: u64) -> Result<Option<String>, BoardError> {
                Ok(None)
            }

            fn update_route_field(
                &self,
                subject_id: u64,
                url: &str,
                field_name: &str,
            ) -> Result<(), BoardError> {
                self.0.update_route_field(subject_id, url, field_name)
            }
        }

        let mut assignments = HashMap::new();
        assignments.insert(1, vec![assignment("10 A St")]);
        let board = NoOriginBoard(FakeBoard::new(vec![subject(1)], assignments));
        let orchestrator = Orchestrator::new(board, FakeFactory, None);

        let without_override = run_batch(
            &orchestrator,
            &shortener(),
            "OptimizedRouteURL",
            &BatchOptions::default(),
        )
        .unwrap();
        assert_eq!(without_override.failed, 1);

        let options = BatchOptions {
            origin: Some("Override Base, ME".to_string()),
            ..BatchOptions::default()
        };
        let with_override =
            run_batch(&orchestrator, &shortener(), "OptimizedRouteURL", &options).unwrap();
        assert_eq!(with_override.routed, 1);
    }
}
