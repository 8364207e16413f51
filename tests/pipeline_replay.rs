//! End-to-end pipeline runs against a scripted backend: a clean full
//! run, and resumption from persisted checkpoints after a simulated
//! crash.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;

use arclear::backend::{AutomationBackend, CaseClosingParams};
use arclear::clearing::models::ClearingRecord;
use arclear::config::AppConfig;
use arclear::error::BackendError;
use arclear::pipeline::checkpoint::{CheckpointStore, Stage};
use arclear::pipeline::orchestrator::{EntityOutcome, Orchestrator};
use arclear::rules::{
    Accountant, ClearingRules, CompanyRules, CostCenters, EntityGrouping, EntityRules, GlAccount,
    GlAccounts,
};
use rust_decimal_macros::dec;

const LEDGER_EXPORT: &str = "\
|1400000101| 9000012345 | DA | 02.03.2024 | 01.04.2024 | 100,00 | CHF | C3 | Delivery D 1234567 | 501234 | 601234 |\n\
|1400000102| 9000012346 | DZ | 05.03.2024 | 04.04.2024 | 100,00- | CHF | C3 | Payment D 1234567 | 501234 | 601234 |\n";

const CASE_EXPORT: &str = "\
|501234|1234567|400012345|OK|disp|1|01.02.2024|PROM 2024|JDOE|Price difference||note||020|\n";

#[derive(Default)]
struct ScriptedBackend {
    ledger_exports: AtomicUsize,
    case_exports: AtomicUsize,
    postings: AtomicUsize,
    closed_cases: Mutex<Vec<(u64, String)>>,
    closed_notifications: Mutex<Vec<u64>>,
}

#[async_trait]
impl AutomationBackend for ScriptedBackend {
    async fn export_ledger_items(
        &self,
        _entity: &str,
        _company_code: &str,
        _worklist: Option<&str>,
        target: &Path,
    ) -> Result<(), BackendError> {
        self.ledger_exports.fetch_add(1, Ordering::SeqCst);
        std::fs::write(target, LEDGER_EXPORT).unwrap();
        Ok(())
    }

    async fn export_case_records(
        &self,
        _case_ids: &[u64],
        target: &Path,
    ) -> Result<(), BackendError> {
        self.case_exports.fetch_add(1, Ordering::SeqCst);
        std::fs::write(target, CASE_EXPORT).unwrap();
        Ok(())
    }

    async fn load_account_items(
        &self,
        _company_code: &str,
        _currency: &str,
        _clearing_date: NaiveDate,
        head_office_docs: &BTreeMap<u64, Vec<u64>>,
    ) -> Result<usize, BackendError> {
        Ok(head_office_docs.values().map(Vec::len).sum())
    }

    async fn post_clearing(
        &self,
        _company_code: &str,
        _currency: &str,
        _clearing_date: NaiveDate,
        _records: &[&ClearingRecord],
    ) -> Result<u64, BackendError> {
        self.postings.fetch_add(1, Ordering::SeqCst);
        Ok(1800000123)
    }

    async fn close_case(
        &self,
        case_id: u64,
        params: &CaseClosingParams,
    ) -> Result<(), BackendError> {
        self.closed_cases
            .lock()
            .unwrap()
            .push((case_id, params.status_note.clone()));
        Ok(())
    }

    async fn close_notification(
        &self,
        notification_id: u64,
        _case_ids: &[u64],
    ) -> Result<(), BackendError> {
        self.closed_notifications
            .lock()
            .unwrap()
            .push(notification_id);
        Ok(())
    }
}

fn test_rules() -> ClearingRules {
    let entity = EntityRules {
        active: true,
        grouping: EntityGrouping::Worklist,
        valid_taxes: vec!["C3".to_string()],
        head_office_taxes: Default::default(),
        skipped_taxes: vec![],
        gl_accounts: GlAccounts {
            penalties: None,
            write_off_debits: None,
            write_off_credits: None,
            write_off_common: GlAccount {
                number: 696900,
                cost_center: CostCenters {
                    trade: "1020".to_string(),
                    retail: "1020".to_string(),
                },
            },
        },
        accountants: vec![Accountant {
            name: "J. Doe".to_string(),
            mail: "jdoe@example.com".to_string(),
        }],
    };

    let company = CompanyRules {
        country: "Switzerland".to_string(),
        active: true,
        case_id_pattern: r"\d{7}".to_string(),
        base_threshold: dec!(2.0),
        tax_thresholds: Default::default(),
        universal_tax_code: None,
        fallback_tax_code: None,
        currency_taxes: Default::default(),
        category_taxes: Default::default(),
        skipped_taxes: vec![],
        difference_text: "Customer difference $customer$".to_string(),
        assignment_override: None,
        holidays: vec![],
        entities: BTreeMap::from([("CH01".to_string(), entity)]),
    };

    ClearingRules {
        companies: BTreeMap::from([("0001".to_string(), company)]),
    }
}

fn test_config(dir: &Path) -> AppConfig {
    let config = AppConfig {
        rules_path: dir.join("rules.yaml"),
        export_dir: dir.join("exports"),
        dump_dir: dir.join("dump"),
        data_dir: dir.join("data"),
        recovery_path: dir.join("recovery.json"),
    };
    std::fs::create_dir_all(&config.export_dir).unwrap();
    std::fs::create_dir_all(&config.data_dir).unwrap();
    config
}

fn entities() -> BTreeMap<String, String> {
    BTreeMap::from([("CH01".to_string(), "0001".to_string())])
}

#[tokio::test]
async fn full_run_posts_and_closes() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let backend = Arc::new(ScriptedBackend::default());

    let mut orchestrator =
        Orchestrator::new(backend.clone(), test_rules(), config.clone(), &entities()).unwrap();

    let summary = orchestrator.run(&entities()).await.unwrap();

    assert_eq!(
        summary.outcomes.get("CH01"),
        Some(&EntityOutcome::Completed)
    );

    assert_eq!(backend.ledger_exports.load(Ordering::SeqCst), 1);
    assert_eq!(backend.case_exports.load(Ordering::SeqCst), 1);
    assert_eq!(backend.postings.load(Ordering::SeqCst), 1);

    // the case was closed with the posting number appended to the note
    let closed = backend.closed_cases.lock().unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, 1234567);
    assert_eq!(closed[0].1, "PROM 2024 1800000123");

    assert_eq!(
        backend.closed_notifications.lock().unwrap().as_slice(),
        &[400012345]
    );

    // report rows carry the full status chain
    assert_eq!(summary.reports.len(), 1);
    let report = &summary.reports[0];
    let cleared = &report.cleared;
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].posting_number, Some(1800000123));
    assert_eq!(cleared[0].clearing_status, "Item cleared.");
    assert_eq!(cleared[0].case_closing_status, "Case closed.");
    assert_eq!(cleared[0].notification_closing_status, "Notification closed.");

    // a clean completion resets the recovery state
    let (_, prior_failure) =
        CheckpointStore::initialize(&config.recovery_path, &["CH01".to_string()]).unwrap();
    assert!(!prior_failure);
}

#[tokio::test]
async fn resumed_run_skips_completed_export() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    // simulate a crash after the ledger export: the checkpoint is
    // persisted and the export file is on disk
    {
        let (mut store, _) =
            CheckpointStore::initialize(&config.recovery_path, &["CH01".to_string()]).unwrap();
        store.set("CH01", Stage::LedgerExported, true).unwrap();
    }
    std::fs::write(config.ledger_export_path("CH01"), LEDGER_EXPORT).unwrap();

    let backend = Arc::new(ScriptedBackend::default());
    let mut orchestrator =
        Orchestrator::new(backend.clone(), test_rules(), config, &entities()).unwrap();

    let summary = orchestrator.run(&entities()).await.unwrap();

    // export must not run again, but conversion and the rest must
    assert_eq!(backend.ledger_exports.load(Ordering::SeqCst), 0);
    assert_eq!(backend.case_exports.load(Ordering::SeqCst), 1);
    assert_eq!(backend.postings.load(Ordering::SeqCst), 1);
    assert_eq!(
        summary.outcomes.get("CH01"),
        Some(&EntityOutcome::Completed)
    );
}

#[tokio::test]
async fn export_disconnect_is_retried_once() {
    struct FlakyBackend {
        inner: ScriptedBackend,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl AutomationBackend for FlakyBackend {
        async fn export_ledger_items(
            &self,
            entity: &str,
            company_code: &str,
            worklist: Option<&str>,
            target: &Path,
        ) -> Result<(), BackendError> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }) == Ok(1)
            {
                return Err(BackendError::ConnectionLost("network error".to_string()));
            }
            self.inner
                .export_ledger_items(entity, company_code, worklist, target)
                .await
        }

        async fn export_case_records(
            &self,
            case_ids: &[u64],
            target: &Path,
        ) -> Result<(), BackendError> {
            self.inner.export_case_records(case_ids, target).await
        }

        async fn load_account_items(
            &self,
            company_code: &str,
            currency: &str,
            clearing_date: NaiveDate,
            head_office_docs: &BTreeMap<u64, Vec<u64>>,
        ) -> Result<usize, BackendError> {
            self.inner
                .load_account_items(company_code, currency, clearing_date, head_office_docs)
                .await
        }

        async fn post_clearing(
            &self,
            company_code: &str,
            currency: &str,
            clearing_date: NaiveDate,
            records: &[&ClearingRecord],
        ) -> Result<u64, BackendError> {
            self.inner
                .post_clearing(company_code, currency, clearing_date, records)
                .await
        }

        async fn close_case(
            &self,
            case_id: u64,
            params: &CaseClosingParams,
        ) -> Result<(), BackendError> {
            self.inner.close_case(case_id, params).await
        }

        async fn close_notification(
            &self,
            notification_id: u64,
            case_ids: &[u64],
        ) -> Result<(), BackendError> {
            self.inner.close_notification(notification_id, case_ids).await
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let backend = Arc::new(FlakyBackend {
        inner: ScriptedBackend::default(),
        failures_left: AtomicUsize::new(1),
    });

    let mut orchestrator =
        Orchestrator::new(backend.clone(), test_rules(), config, &entities()).unwrap();
    let summary = orchestrator.run(&entities()).await.unwrap();

    // the first attempt failed with a disconnect, the retry succeeded
    assert_eq!(backend.inner.ledger_exports.load(Ordering::SeqCst), 1);
    assert_eq!(
        summary.outcomes.get("CH01"),
        Some(&EntityOutcome::Completed)
    );
}
