#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use fund_ledger::budget::{BudgetDraft, Category, Subcategory, SubcategoryBudget, Year};
use fund_ledger::error::{Error, Result};
use fund_ledger::fund_config::SubcategoryDraft;
use fund_ledger::notify::Notifier;
use fund_ledger::storage::Upload;
use fund_ledger::submission::{
    ApprovalPayload, Detail, FundApplicationDetail, Submission, SubmissionDraft,
};
use fund_ledger::{Actor, Config, FundService, Role};
use tempfile::TempDir;

pub const RESEARCH_FUND: &str = "ทุนส่งเสริมการวิจัย";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One isolated database and upload root per test, plus a research-fund
/// year, category and subcategory to hang submissions on.
pub struct Fixture {
    pub dir: TempDir,
    pub service: FundService,
    pub admin: Actor,
    pub head: Actor,
    pub applicant: Actor,
    pub year: Year,
    pub category: Category,
    pub subcategory: Subcategory,
}

pub fn fixture() -> anyhow::Result<Fixture> {
    fixture_with(|config| config, |service| service)
}

pub fn fixture_with(
    configure: impl FnOnce(Config) -> Config,
    wire: impl FnOnce(FundService) -> FundService,
) -> anyhow::Result<Fixture> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = configure(Config {
        db_path: dir.path().join("ledger.db"),
        upload_path: dir.path().join("uploads"),
        ..Config::default()
    });
    let service = wire(FundService::open(config)?);

    let admin = Actor::admin("admin_1");
    let year = service.create_year(&admin, "2568", 5_000_000)?;
    let category = service.create_category(&admin, &year.id, RESEARCH_FUND, false)?;
    let subcategory = service.create_subcategory(
        &admin,
        SubcategoryDraft {
            category_id: category.id.clone(),
            name: "ทุนวิจัยพื้นฐาน".into(),
            ..Default::default()
        },
    )?;

    Ok(Fixture {
        dir,
        service,
        admin,
        head: Actor::dept_head("head_1"),
        applicant: Actor::applicant("user_1"),
        year,
        category,
        subcategory,
    })
}

impl Fixture {
    pub fn fund_application(&self, requested: u64) -> SubmissionDraft {
        SubmissionDraft::new(
            self.year.id.clone(),
            Detail::FundApplication(FundApplicationDetail {
                project_title: "Soil microbiome survey".into(),
                project_description: "Field sampling across three provinces".into(),
                requested_amount: requested,
                ..Default::default()
            }),
        )
        .set_category(self.category.id.clone())
        .set_subcategory(self.subcategory.id.clone())
    }

    pub fn rule_budget(&self, allocated: u64, per_grant: u64) -> Result<SubcategoryBudget> {
        self.service.create_budget(
            &self.admin,
            BudgetDraft::rule(self.subcategory.id.clone(), allocated, per_grant),
        )
    }

    /// A fund application waiting for the department head.
    pub fn submitted(&self, draft: SubmissionDraft) -> Result<Submission> {
        let submission = self.service.create_draft(&self.applicant, draft)?;
        self.service.submit(&self.applicant, &submission.id)
    }

    pub fn approved(&self, draft: SubmissionDraft, amount: u64) -> Result<Submission> {
        let submission = self.submitted(draft)?;
        self.service
            .approve(&self.admin, &submission.id, &payload(amount))
    }
}

pub fn payload(amount: u64) -> ApprovalPayload {
    ApprovalPayload {
        approved_amount: Some(amount),
        announce_reference: Some("ANN-2568/014".into()),
        ..Default::default()
    }
}

pub fn receipt(name: &str) -> Upload {
    Upload::new(name, b"%PDF-1.7 receipt".to_vec()).set_mime_type("application/pdf")
}

/// Notifier remembering every revision request it was handed.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, Role, String)>>,
}

impl Notifier for RecordingNotifier {
    fn needs_more_info(&self, submission: &Submission, by: Role, comment: &str) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| Error::Config("poisoned".into()))?
            .push((submission.id.clone(), by, comment.to_string()));
        Ok(())
    }
}

pub fn recording_notifier() -> Arc<RecordingNotifier> {
    Arc::new(RecordingNotifier::default())
}
