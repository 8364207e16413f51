use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{AutomationBackend, CaseClosingParams};
use crate::clearing::input::create_clearing_input;
use crate::clearing::models::{ClearingRecord, RootCause};
use crate::config::AppConfig;
use crate::customers::CustomerDirectory;
use crate::dates;
use crate::disputes::models::CaseStatus;
use crate::disputes::parser::parse_case_export;
use crate::error::{AppError, AppResult, BackendError, ClearingError};
use crate::ledger::models::ItemRecord;
use crate::ledger::parser::parse_ledger_export;
use crate::pipeline::accumulator::{Accumulator, DataKind, DataSet};
use crate::pipeline::checkpoint::{CheckpointStore, Stage};
use crate::pipeline::dump::DumpStore;
use crate::reconcile::caseid::CaseIdExtractor;
use crate::reconcile::engine;
use crate::reconcile::models::ConsolidatedRecord;
use crate::report::{flatten_closing_output, EntityReport, SummaryRow};
use crate::rules::{ClearingRules, CompanyRules, EntityGrouping, EntityRules};

/// Backend limit for the accounting status note on a case
const STATUS_NOTE_LIMIT: usize = 50;

/// Final state of one entity after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    Completed,
    Skipped { reason: String },
    Failed { reason: String },
}

/// Aggregated result of a clearing run
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub outcomes: BTreeMap<String, EntityOutcome>,
    pub reports: Vec<EntityReport>,
    pub summary: Vec<SummaryRow>,
}

/// Sequences the clearing pipeline per entity.
///
/// Stages run in a fixed order across all entities; every stage is
/// gated by its checkpoint and persisted before the next stage reads,
/// which makes the run resumable after a crash. Entity-level failures
/// abort only that entity's remaining stages; run-level failures
/// propagate as errors.
pub struct Orchestrator {
    backend: Arc<dyn AutomationBackend>,
    rules: ClearingRules,
    config: AppConfig,
    checkpoints: CheckpointStore,
    accumulator: Accumulator,
    dumps: DumpStore,
    outcomes: BTreeMap<String, EntityOutcome>,
}

impl Orchestrator {
    /// Builds the orchestrator and initializes the durable stores.
    /// When the previous run completed cleanly, leftover stage dumps
    /// are deleted; otherwise they are kept for resumption.
    pub fn new(
        backend: Arc<dyn AutomationBackend>,
        rules: ClearingRules,
        config: AppConfig,
        entities: &BTreeMap<String, String>,
    ) -> AppResult<Self> {
        let names: Vec<String> = entities.keys().cloned().collect();
        let (checkpoints, prior_failure) =
            CheckpointStore::initialize(&config.recovery_path, &names)?;

        let dumps = DumpStore::new(&config.dump_dir)?;
        if !prior_failure {
            dumps.purge()?;
        }

        Ok(Self {
            backend,
            rules,
            config,
            checkpoints,
            accumulator: Accumulator::new(),
            dumps,
            outcomes: BTreeMap::new(),
        })
    }

    /// Executes all pipeline stages for the given entities and
    /// returns the run summary. On success the recovery state is
    /// cleared so the next run starts fresh.
    pub async fn run(&mut self, entities: &BTreeMap<String, String>) -> AppResult<RunSummary> {
        let run_id = Uuid::new_v4();

        if entities.is_empty() {
            warn!("No entity to process detected.");
            return Ok(RunSummary {
                run_id,
                outcomes: BTreeMap::new(),
                reports: Vec::new(),
                summary: Vec::new(),
            });
        }

        info!("🚀 Starting clearing run {} for {} entities", run_id, entities.len());

        self.export_ledger(entities).await?;
        self.convert_ledger(entities)?;
        self.export_cases(entities).await?;
        self.convert_cases(entities)?;
        self.consolidate(entities)?;
        self.evaluate(entities)?;
        self.post(entities).await?;
        self.close_cases(entities).await?;
        self.close_notifications(entities).await?;

        let (reports, summary) = self.build_reports(entities);

        for entity in entities.keys() {
            self.outcomes
                .entry(entity.clone())
                .or_insert(EntityOutcome::Completed);
        }

        self.checkpoints.clear()?;
        self.dumps.purge()?;

        info!("✓ Clearing run {} completed", run_id);

        Ok(RunSummary {
            run_id,
            outcomes: self.outcomes.clone(),
            reports,
            summary,
        })
    }

    fn company(&self, company_code: &str) -> AppResult<CompanyRules> {
        self.rules
            .company(company_code)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("Unknown company code '{}'", company_code)))
    }

    fn entity_rules(company: &CompanyRules, entity: &str) -> AppResult<EntityRules> {
        company
            .entities
            .get(entity)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("Unknown entity '{}'", entity)))
    }

    /// Whether the entity still takes part in the run
    fn is_active(&self, entity: &str) -> bool {
        !self.outcomes.contains_key(entity)
    }

    fn fail_entity(&mut self, entity: &str, reason: String) {
        error!("Entity '{}' failed: {}", entity, reason);
        self.outcomes
            .entry(entity.to_string())
            .or_insert(EntityOutcome::Failed { reason });
    }

    fn skip_entity(&mut self, entity: &str, reason: String) {
        warn!("Entity '{}' skipped: {}", entity, reason);
        self.outcomes
            .entry(entity.to_string())
            .or_insert(EntityOutcome::Skipped { reason });
    }

    async fn export_ledger(&mut self, entities: &BTreeMap<String, String>) -> AppResult<()> {
        for (entity, company_code) in entities {
            if !self.is_active(entity) {
                continue;
            }

            if self.checkpoints.get(entity, Stage::LedgerExported) {
                warn!(
                    "Skipping '{}' since the data was already exported in the previous run.",
                    entity
                );
                continue;
            }

            let company = self.company(company_code)?;
            let entity_rules = Self::entity_rules(&company, entity)?;
            let worklist = match entity_rules.grouping {
                EntityGrouping::Worklist => Some(entity.as_str()),
                EntityGrouping::CompanyCode => None,
            };

            let target = self.config.ledger_export_path(entity);
            info!(" Exporting data for '{}' ...", entity);

            match self
                .backend
                .export_ledger_items(entity, company_code, worklist, &target)
                .await
            {
                Ok(()) => {}
                Err(BackendError::NoDataFound(msg)) => {
                    warn!("{}", msg);
                    // a stale export from an earlier run must not be
                    // mistaken for fresh data
                    let _ = std::fs::remove_file(&target);
                }
                Err(BackendError::ConnectionLost(msg)) => {
                    error!("{}; retrying the export once ...", msg);
                    self.backend
                        .export_ledger_items(entity, company_code, worklist, &target)
                        .await?;
                }
                Err(err) => {
                    self.fail_entity(entity, format!("Ledger export failed: {}", err));
                    continue;
                }
            }

            self.checkpoints.set(entity, Stage::LedgerExported, true)?;
        }

        Ok(())
    }

    fn convert_ledger(&mut self, entities: &BTreeMap<String, String>) -> AppResult<()> {
        info!("Converting ledger data ...");

        for (entity, company_code) in entities {
            if !self.is_active(entity) {
                continue;
            }

            if self.checkpoints.get(entity, Stage::LedgerConverted) {
                warn!(
                    "Skipping '{}' since the data was already converted in the previous run.",
                    entity
                );
                if let Some(items) = self.dumps.load::<Vec<ItemRecord>>(entity, "ledger")? {
                    self.accumulator
                        .record_forced(entity, DataKind::LedgerItems, DataSet::Items(items));
                }
                continue;
            }

            let path = self.config.ledger_export_path(entity);
            if !path.exists() {
                warn!(
                    "Skipping '{}' since there were no open items found on accounts.",
                    entity
                );
                self.dumps.store_empty(entity, "ledger")?;
                self.checkpoints.set(entity, Stage::LedgerConverted, true)?;
                continue;
            }

            info!(" Converting data for '{}' ...", entity);

            let company = self.company(company_code)?;
            let extractor = CaseIdExtractor::new(&company.case_id_pattern)?;

            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    self.fail_entity(entity, format!("Could not read ledger export: {}", err));
                    continue;
                }
            };

            let items = match parse_ledger_export(&text, &extractor) {
                Ok(items) => items,
                Err(err) => {
                    self.fail_entity(entity, format!("Ledger conversion failed: {}", err));
                    continue;
                }
            };

            if !items.iter().any(|i| i.references_case()) {
                self.checkpoints.set(entity, Stage::LedgerNoCase, true)?;
            }

            self.dumps.store(entity, "ledger", &items)?;
            self.checkpoints.set(entity, Stage::LedgerConverted, true)?;
            self.accumulator
                .record(entity, DataKind::LedgerItems, DataSet::Items(items))?;
        }

        Ok(())
    }

    async fn export_cases(&mut self, entities: &BTreeMap<String, String>) -> AppResult<()> {
        for entity in entities.keys() {
            if !self.is_active(entity) {
                continue;
            }

            if self.checkpoints.get(entity, Stage::LedgerNoCase) {
                warn!(
                    "Skipping '{}' since the ledger data contained no case reference.",
                    entity
                );
                self.checkpoints.set(entity, Stage::CasesExported, true)?;
                continue;
            }

            let case_ids: Vec<u64> = match self.accumulator.items(entity) {
                Some(items) => {
                    let mut ids: Vec<u64> = items
                        .iter()
                        .flat_map(|i| i.case_refs.iter().copied())
                        .collect();
                    ids.sort_unstable();
                    ids.dedup();
                    ids
                }
                None => {
                    warn!("Skipping '{}' since no ledger data was exported.", entity);
                    self.checkpoints.set(entity, Stage::CasesExported, true)?;
                    continue;
                }
            };

            if self.checkpoints.get(entity, Stage::CasesExported) {
                warn!(
                    "Skipping '{}' since the data was already exported in the previous run.",
                    entity
                );
                continue;
            }

            let target = self.config.case_export_path(entity);
            info!(" Exporting case data for '{}' ...", entity);

            match self.backend.export_case_records(&case_ids, &target).await {
                Ok(()) => {}
                Err(BackendError::NoCaseFound(msg)) => {
                    warn!("{}", msg);
                    let _ = std::fs::remove_file(&target);
                }
                Err(BackendError::ConnectionLost(msg)) => {
                    error!("{}; retrying the export once ...", msg);
                    self.backend.export_case_records(&case_ids, &target).await?;
                }
                Err(err) => {
                    self.fail_entity(entity, format!("Case export failed: {}", err));
                    continue;
                }
            }

            self.checkpoints.set(entity, Stage::CasesExported, true)?;
        }

        Ok(())
    }

    fn convert_cases(&mut self, entities: &BTreeMap<String, String>) -> AppResult<()> {
        info!("Converting case data ...");

        for entity in entities.keys() {
            if !self.is_active(entity) {
                continue;
            }

            if self.checkpoints.get(entity, Stage::CasesConverted) {
                warn!(
                    "Skipping '{}' since the data was already converted in the previous run.",
                    entity
                );
                if let Some(cases) = self.dumps.load(entity, "cases")? {
                    self.accumulator
                        .record_forced(entity, DataKind::CaseRecords, DataSet::Cases(cases));
                }
                continue;
            }

            let path = self.config.case_export_path(entity);
            if !path.exists() {
                warn!("Skipping '{}' since no case data was exported.", entity);
                self.dumps.store_empty(entity, "cases")?;
                self.checkpoints.set(entity, Stage::CasesConverted, true)?;
                continue;
            }

            info!(" Converting case data for '{}' ...", entity);

            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    self.fail_entity(entity, format!("Could not read case export: {}", err));
                    continue;
                }
            };

            let cases = match parse_case_export(&text) {
                Ok(cases) => cases,
                Err(err) => {
                    self.fail_entity(entity, format!("Case conversion failed: {}", err));
                    continue;
                }
            };

            self.dumps.store(entity, "cases", &cases)?;
            self.checkpoints.set(entity, Stage::CasesConverted, true)?;
            self.accumulator
                .record(entity, DataKind::CaseRecords, DataSet::Cases(cases))?;
        }

        Ok(())
    }

    fn consolidate(&mut self, entities: &BTreeMap<String, String>) -> AppResult<()> {
        info!("Consolidating data ...");

        for (entity, company_code) in entities {
            if !self.is_active(entity) {
                continue;
            }

            if self.checkpoints.get(entity, Stage::Consolidated) {
                warn!(
                    "Skipping '{}' since the data was already consolidated in the previous run.",
                    entity
                );
                if let Some(rows) = self.dumps.load(entity, "consolidated")? {
                    self.accumulator.record_forced(
                        entity,
                        DataKind::Consolidated,
                        DataSet::Consolidated(rows),
                    );
                }
                continue;
            }

            let (items, cases) = match (self.accumulator.items(entity), self.accumulator.cases(entity))
            {
                (Some(items), Some(cases)) => (items.clone(), cases.clone()),
                _ => {
                    warn!("Skipping '{}' since no case data is available.", entity);
                    self.checkpoints.set(entity, Stage::Consolidated, true)?;
                    continue;
                }
            };

            info!(" Consolidating data for '{}' ...", entity);

            let company = self.company(company_code)?;
            let entity_rules = Self::entity_rules(&company, entity)?;
            let customers =
                CustomerDirectory::load(&self.config.customer_data_path(company_code))?;

            match engine::consolidate(
                entity,
                &items,
                &cases,
                customers.as_ref(),
                &entity_rules.valid_taxes,
            ) {
                Ok(Some(rows)) => {
                    self.dumps.store(entity, "consolidated", &rows)?;
                    self.accumulator.record(
                        entity,
                        DataKind::Consolidated,
                        DataSet::Consolidated(rows),
                    )?;
                    self.checkpoints.set(entity, Stage::Consolidated, true)?;
                }
                Ok(None) => {
                    self.skip_entity(
                        entity,
                        "Customer enrichment incomplete; consolidation aborted.".to_string(),
                    );
                }
                Err(err) => {
                    self.fail_entity(entity, format!("Consolidation failed: {}", err));
                }
            }
        }

        Ok(())
    }

    fn evaluate(&mut self, entities: &BTreeMap<String, String>) -> AppResult<()> {
        info!("Generating clearing input ...");

        for (entity, company_code) in entities {
            if !self.is_active(entity) {
                continue;
            }

            let company = self.company(company_code)?;
            let entity_rules = Self::entity_rules(&company, entity)?;

            if self.checkpoints.get(entity, Stage::Evaluated) {
                warn!("Data for '{}' was evaluated in the previous run.", entity);
                if let Some(rows) = self.dumps.load(entity, "evaluated")? {
                    self.accumulator.record_forced(
                        entity,
                        DataKind::Evaluated,
                        DataSet::Consolidated(rows),
                    );
                }
                if let Some(rows) = self.dumps.load(entity, "matched")? {
                    self.accumulator.record_forced(
                        entity,
                        DataKind::Matched,
                        DataSet::Consolidated(rows),
                    );
                }
            } else {
                let consolidated = match self.accumulator.consolidated(entity, DataKind::Consolidated)
                {
                    Some(rows) => rows.clone(),
                    None => {
                        warn!(
                            "Skipping '{}' since the data consolidation was not performed.",
                            entity
                        );
                        self.checkpoints.set(entity, Stage::Evaluated, true)?;
                        self.checkpoints.set(entity, Stage::InputGenerated, true)?;
                        continue;
                    }
                };

                info!("Detecting items to clear for '{}' ...", entity);
                let evaluated = engine::evaluate_items(
                    &consolidated,
                    company.base_threshold,
                    &company.tax_thresholds,
                );
                let matched = engine::matched_items(&evaluated);
                info!(" Found {} items to clear.", matched.len());

                self.dumps.store(entity, "evaluated", &evaluated)?;
                self.dumps.store(entity, "matched", &matched)?;
                self.accumulator.record(
                    entity,
                    DataKind::Evaluated,
                    DataSet::Consolidated(evaluated),
                )?;
                self.accumulator
                    .record(entity, DataKind::Matched, DataSet::Consolidated(matched))?;
                self.checkpoints.set(entity, Stage::Evaluated, true)?;
            }

            let matched = self
                .accumulator
                .consolidated(entity, DataKind::Matched)
                .cloned()
                .unwrap_or_default();

            if matched.is_empty() {
                self.dumps.store_empty(entity, "clearing_input")?;
                self.checkpoints.set(entity, Stage::InputGenerated, true)?;
                continue;
            }

            if self.checkpoints.get(entity, Stage::InputGenerated) {
                warn!(
                    "Clearing input for '{}' was already generated in the previous run.",
                    entity
                );
                if let Some(input) = self.dumps.load(entity, "clearing_input")? {
                    self.accumulator.record_forced(
                        entity,
                        DataKind::ClearingInput,
                        DataSet::Clearing(input),
                    );
                }
                continue;
            }

            info!(" Generating clearing input for '{}' ...", entity);

            let customers =
                CustomerDirectory::load(&self.config.customer_data_path(company_code))?;

            match create_clearing_input(&matched, &company, &entity_rules, customers.as_ref()) {
                Ok(input) => {
                    self.dumps.store(entity, "clearing_input", &input)?;
                    self.accumulator.record(
                        entity,
                        DataKind::ClearingInput,
                        DataSet::Clearing(input),
                    )?;
                    self.checkpoints.set(entity, Stage::InputGenerated, true)?;
                }
                Err(AppError::Clearing(ClearingError::RootCauseUnresolved(group))) => {
                    // an unresolvable root cause means the rules cannot
                    // safely drive automatic posting; stop the run
                    return Err(ClearingError::RootCauseUnresolved(group).into());
                }
                Err(err) => {
                    self.fail_entity(entity, format!("Clearing input generation failed: {}", err));
                }
            }
        }

        Ok(())
    }

    async fn post(&mut self, entities: &BTreeMap<String, String>) -> AppResult<()> {
        info!("Clearing open items ...");

        for (entity, company_code) in entities {
            if !self.is_active(entity) {
                continue;
            }

            if self.checkpoints.get(entity, Stage::Posted) {
                warn!(
                    "Skipping '{}' since the items were already cleared in the previous run.",
                    entity
                );
                if let Some(output) = self.dumps.load(entity, "clearing_output")? {
                    self.accumulator.record_forced(
                        entity,
                        DataKind::ClearingOutput,
                        DataSet::Clearing(output),
                    );
                }
                continue;
            }

            let input = match self.accumulator.clearing(entity, DataKind::ClearingInput) {
                Some(input) => input.clone(),
                None => {
                    warn!("Skipping '{}' since there were no items to clear found.", entity);
                    continue;
                }
            };

            let company = self.company(company_code)?;
            let clearing_date =
                dates::clearing_date(chrono::Local::now().date_naive(), &company.holidays);
            info!(
                "Clearing open items for '{}' (clearing date: {}) ...",
                entity,
                clearing_date.format("%d.%m.%Y")
            );

            let mut output = input;
            let mut posted_any = false;

            for (currency, batch) in output.currencies.iter_mut() {
                let mut active_ids = Vec::new();

                for (group_id, record) in batch.records.iter_mut() {
                    if record.skipped {
                        record.clearing_status = format!("WARNING: {}", record.message);
                        warn!(
                            "Skipping '{}' with ID '{}'. Reason: {}",
                            entity, group_id, record.message
                        );
                    } else {
                        active_ids.push(*group_id);
                    }
                }

                if active_ids.is_empty() {
                    // every record of this currency is excluded
                    continue;
                }

                info!("Clearing open items for '{}'; currency = {}", entity, currency);

                if let Err(err) = self
                    .backend
                    .load_account_items(
                        company_code,
                        currency,
                        clearing_date,
                        &batch.head_office_docs,
                    )
                    .await
                {
                    error!("Loading failed. Reason: {}", err);
                    batch.cleared = false;
                    batch.clearing_status =
                        "ERROR: Could not load items from account(s)".to_string();
                    continue;
                }

                let result = {
                    let records: Vec<&ClearingRecord> =
                        active_ids.iter().map(|id| &batch.records[id]).collect();
                    self.backend
                        .post_clearing(company_code, currency, clearing_date, &records)
                        .await
                };

                match result {
                    Ok(posting_number) => {
                        batch.cleared = true;
                        batch.clearing_status = "Item cleared.".to_string();
                        batch.posting_number = Some(posting_number);
                        posted_any = true;
                    }
                    Err(BackendError::SelectionFailed(_)) => {
                        batch.cleared = false;
                        batch.clearing_status = "ERROR: Item selection failed".to_string();
                    }
                    Err(err) => {
                        error!("Posting failed. Reason: {}", err);
                        batch.cleared = false;
                        batch.clearing_status = format!("ERROR: {}.", err);
                    }
                }
            }

            self.checkpoints.set(entity, Stage::Posted, posted_any)?;
            self.dumps.store(entity, "clearing_output", &output)?;
            self.accumulator.record_forced(
                entity,
                DataKind::ClearingOutput,
                DataSet::Clearing(output),
            );
        }

        Ok(())
    }

    async fn close_cases(&mut self, entities: &BTreeMap<String, String>) -> AppResult<()> {
        info!("Closing dispute cases ...");

        for entity in entities.keys() {
            if !self.is_active(entity) {
                continue;
            }

            if self.checkpoints.get(entity, Stage::LedgerNoCase) {
                warn!("Skipping '{}' since there were no items to clear found.", entity);
                continue;
            }

            if self.checkpoints.get(entity, Stage::CasesClosed) {
                warn!(
                    "Skipping '{}' since the cases were already processed in the previous run.",
                    entity
                );
                if let Some(output) = self.dumps.load(entity, "case_closing")? {
                    self.accumulator.record_forced(
                        entity,
                        DataKind::CaseClosingOutput,
                        DataSet::Clearing(output),
                    );
                }
                continue;
            }

            if !self.checkpoints.get(entity, Stage::Posted) {
                warn!("Skipping '{}' since no items were cleared.", entity);
                continue;
            }

            let output = match self.accumulator.clearing(entity, DataKind::ClearingOutput) {
                Some(output) => output.clone(),
                None => {
                    warn!("Skipping '{}' since no clearing output is available.", entity);
                    continue;
                }
            };

            let matched = self
                .accumulator
                .consolidated(entity, DataKind::Matched)
                .cloned()
                .unwrap_or_default();

            let mut closing = output;

            for (currency, batch) in closing.currencies.iter_mut() {
                if !batch.cleared {
                    // some currency clearings may fail while others post
                    warn!(
                        "Skipping '{}'; currency: {} since no items were cleared.",
                        entity, currency
                    );
                    continue;
                }

                info!("Closing dispute(s) for '{}' ...", entity);
                let posting_number = batch.posting_number;

                for (group_id, record) in batch.records.iter_mut() {
                    if record.skipped {
                        record.case_closing_status =
                            "WARNING: Closing skipped due to the accounting exclusion criteria."
                                .to_string();
                        warn!("Skipping ID '{}' as per the accounting rules.", group_id);
                        continue;
                    }

                    for case_id in record.case_ids.clone() {
                        info!("Processing case: {} ...", case_id);

                        let params = CaseClosingParams {
                            root_cause: record.root_cause,
                            status_note: status_note(&matched, case_id, posting_number),
                            status: CaseStatus::Closed,
                        };

                        let message = match self.backend.close_case(case_id, &params).await {
                            Ok(()) => "Case closed.".to_string(),
                            Err(BackendError::SavingChangesRejected(_)) => {
                                "ERROR: Could not save changes. Check if the coordinator and processor are correct."
                                    .to_string()
                            }
                            Err(BackendError::CaseEditRejected(_)) => {
                                "ERROR: Could not edit the case!".to_string()
                            }
                            Err(err) => {
                                error!("Closing of case {} failed: {}", case_id, err);
                                "ERROR: Could not close the case!".to_string()
                            }
                        };

                        record.case_closing_status = message;
                    }
                }
            }

            self.checkpoints.set(entity, Stage::CasesClosed, true)?;
            self.dumps.store(entity, "case_closing", &closing)?;
            self.accumulator.record_forced(
                entity,
                DataKind::CaseClosingOutput,
                DataSet::Clearing(closing),
            );
        }

        Ok(())
    }

    async fn close_notifications(&mut self, entities: &BTreeMap<String, String>) -> AppResult<()> {
        info!("Closing service notifications ...");

        for entity in entities.keys() {
            if !self.is_active(entity) {
                continue;
            }

            if self.checkpoints.get(entity, Stage::LedgerNoCase) {
                warn!(
                    "Closing skipped for '{}' since there were no case references in the ledger data.",
                    entity
                );
                continue;
            }

            if !self.checkpoints.get(entity, Stage::Posted) {
                warn!("Closing skipped for '{}' since there were no items cleared.", entity);
                continue;
            }

            if self.checkpoints.get(entity, Stage::NotificationsClosed) {
                warn!(
                    "Closing skipped for '{}' since the notifications were already processed.",
                    entity
                );
                if let Some(output) = self.dumps.load(entity, "notification_closing")? {
                    self.accumulator.record_forced(
                        entity,
                        DataKind::NotificationClosingOutput,
                        DataSet::Clearing(output),
                    );
                }
                continue;
            }

            let source = match self.accumulator.clearing(entity, DataKind::CaseClosingOutput) {
                Some(output) => output.clone(),
                None => {
                    warn!("Skipping '{}' since no case closing output is available.", entity);
                    continue;
                }
            };

            info!("Closing notification(s) for '{}' ...", entity);

            let mut closing = source;

            for (currency, batch) in closing.currencies.iter_mut() {
                if !batch.cleared {
                    warn!(
                        "Skipping '{}'; currency: {} since no items were cleared.",
                        entity, currency
                    );
                    continue;
                }

                for record in batch.records.values_mut() {
                    if record.skipped {
                        record.notification_closing_status =
                            "WARNING: Closing skipped due to the accounting exclusion criteria."
                                .to_string();
                        continue;
                    }

                    let notification = match record.notification {
                        Some(notification) => notification,
                        None => {
                            record.notification_closing_status =
                                "WARNING: No notification recorded for the case.".to_string();
                            continue;
                        }
                    };

                    if notification.to_string().starts_with("301") {
                        record.notification_closing_status =
                            "WARNING: Closing skipped due to invalid notification type.".to_string();
                        warn!(
                            "Notification '{}' skipped for having an invalid notification type.",
                            notification
                        );
                        continue;
                    }

                    if record.root_cause == RootCause::L06 {
                        record.notification_closing_status =
                            "WARNING: Manual closing expected for credited L06 items.".to_string();
                        info!(
                            "Closing of notification '{}' skipped since the case was cleared \
                             with a credit note; manual closing assumed.",
                            notification
                        );
                        continue;
                    }

                    info!(" Completing notification '{}' ...", notification);

                    let message = match self
                        .backend
                        .close_notification(notification, &record.case_ids)
                        .await
                    {
                        Ok(()) => "Notification closed.".to_string(),
                        Err(BackendError::TransactionNotStarted(msg)) => {
                            return Err(BackendError::TransactionNotStarted(msg).into());
                        }
                        Err(BackendError::NotificationAlreadyCompleted(_)) => {
                            "WARNING: Notification already closed.".to_string()
                        }
                        Err(err @ BackendError::NotificationNotFound(_)) => {
                            format!("ERROR: {}.", err)
                        }
                        Err(err) => {
                            error!("Completing notification {} failed: {}", notification, err);
                            "ERROR: Attempt to complete the notification failed.".to_string()
                        }
                    };

                    record.notification_closing_status = message;
                }
            }

            self.checkpoints
                .set(entity, Stage::NotificationsClosed, true)?;
            self.dumps.store(entity, "notification_closing", &closing)?;
            self.accumulator.record_forced(
                entity,
                DataKind::NotificationClosingOutput,
                DataSet::Clearing(closing),
            );
        }

        Ok(())
    }

    fn build_reports(
        &self,
        entities: &BTreeMap<String, String>,
    ) -> (Vec<EntityReport>, Vec<SummaryRow>) {
        let mut reports = Vec::new();
        let mut summary = Vec::new();

        for (entity, company_code) in entities {
            info!("Generating report input for '{}' ...", entity);

            // the most advanced closing output carries the most status
            let closing = self
                .accumulator
                .clearing(entity, DataKind::NotificationClosingOutput)
                .or_else(|| self.accumulator.clearing(entity, DataKind::CaseClosingOutput))
                .or_else(|| self.accumulator.clearing(entity, DataKind::ClearingOutput));

            let evaluated = self
                .accumulator
                .consolidated(entity, DataKind::Evaluated)
                .cloned()
                .unwrap_or_default();

            let items = if evaluated.is_empty() {
                self.accumulator.items(entity).cloned().unwrap_or_default()
            } else {
                Vec::new()
            };

            if evaluated.is_empty() && items.is_empty() && closing.is_none() {
                continue;
            }

            let cleared = closing.map(flatten_closing_output).unwrap_or_default();
            let note = if cleared.is_empty() {
                Some("No items to clear found.".to_string())
            } else {
                None
            };

            let matched_count = self
                .accumulator
                .consolidated(entity, DataKind::Matched)
                .map(Vec::len)
                .unwrap_or(0);
            let cleared_count = cleared
                .iter()
                .filter(|row| row.posting_number.is_some())
                .count();
            let item_count = if evaluated.is_empty() {
                items.len()
            } else {
                evaluated.len()
            };

            let recipients = self
                .rules
                .company(company_code)
                .and_then(|c| c.entities.get(entity))
                .map(|e| e.accountants.iter().map(|a| a.mail.clone()).collect())
                .unwrap_or_default();

            summary.push(SummaryRow {
                entity: entity.clone(),
                company_code: company_code.clone(),
                item_count,
                matched_count,
                cleared_count,
                recipients,
            });

            reports.push(EntityReport {
                entity: entity.clone(),
                company_code: company_code.clone(),
                evaluated,
                items,
                cleared,
                note,
            });
        }

        (reports, summary)
    }
}

/// Builds the new accounting status note for a case: the existing
/// note with the clearing posting number appended. The backend caps
/// the field at 50 characters; on overflow the original note is
/// retained.
fn status_note(
    matched: &[ConsolidatedRecord],
    case_id: u64,
    posting_number: Option<u64>,
) -> String {
    let existing = matched
        .iter()
        .find(|r| r.group_id == Some(case_id))
        .or_else(|| matched.iter().find(|r| r.demoted_id == Some(case_id)))
        .and_then(|r| r.case.as_ref())
        .map(|c| c.status_ac.trim().to_string())
        .unwrap_or_default();

    let posting_number = match posting_number {
        Some(number) => number,
        None => return existing,
    };

    let combined = format!("{} {}", existing, posting_number)
        .trim()
        .to_string();

    if combined.len() > STATUS_NOTE_LIMIT {
        warn!(
            "The new status note exceeds the limit of {} characters; the original value is retained.",
            STATUS_NOTE_LIMIT
        );
        return existing;
    }

    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn matched_row(group_id: u64, demoted: Option<u64>, status_ac: &str) -> ConsolidatedRecord {
        let item = ItemRecord {
            document_number: 1,
            assignment: String::new(),
            document_type: "DA".to_string(),
            document_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            amount: dec!(100),
            currency: "CHF".to_string(),
            tax_code: "C3".to_string(),
            text: String::new(),
            branch: 501234,
            head_office: 601234,
            case_refs: vec![group_id],
            case_id: Some(group_id),
        };
        let case = crate::disputes::models::CaseRecord {
            debtor: 501234,
            case_id: group_id,
            notification: None,
            status_sales: String::new(),
            assignment: String::new(),
            status: CaseStatus::Open,
            created_on: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            status_ac: status_ac.to_string(),
            processor: String::new(),
            category_description: String::new(),
            root_cause: None,
            note: String::new(),
            fax_number: String::new(),
            category: None,
        };

        let mut row = ConsolidatedRecord::new(item, Some(case));
        row.demoted_id = demoted;
        row
    }

    #[test]
    fn test_status_note_appends_posting_number() {
        let matched = vec![matched_row(1234567, None, "PROM 2024")];
        assert_eq!(
            status_note(&matched, 1234567, Some(1800000123)),
            "PROM 2024 1800000123"
        );
    }

    #[test]
    fn test_status_note_found_via_demoted_identifier() {
        // virtualized group: the real case id lives in the demoted slot
        let matched = vec![matched_row(10000000, Some(1234567), "PROM 2024")];
        assert_eq!(
            status_note(&matched, 1234567, Some(42)),
            "PROM 2024 42"
        );
    }

    #[test]
    fn test_status_note_overflow_keeps_original() {
        let long_note = "X".repeat(48);
        let matched = vec![matched_row(1234567, None, &long_note)];
        assert_eq!(
            status_note(&matched, 1234567, Some(1800000123)),
            long_note
        );
    }
}
