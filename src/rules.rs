use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::RulesError;

/// Per-jurisdiction clearing rules, keyed by company code.
///
/// Loaded once per run and treated as immutable. All "NA"-style
/// sentinels of older rule files are expressed as optional fields;
/// `validate` rejects documents that would only fail at the point
/// of use.
#[derive(Debug, Clone, Deserialize)]
pub struct ClearingRules {
    #[serde(flatten)]
    pub companies: BTreeMap<String, CompanyRules>,
}

/// Rules that apply to a whole company code (jurisdiction)
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyRules {
    pub country: String,
    pub active: bool,
    /// Numeric shape of case identifiers in this jurisdiction,
    /// e.g. `\d{7}` - combined with the case marker by the extractor
    pub case_id_pattern: String,
    pub base_threshold: Decimal,
    #[serde(default)]
    pub tax_thresholds: HashMap<String, Decimal>,
    /// Forced tax code for all difference postings in this jurisdiction
    #[serde(default)]
    pub universal_tax_code: Option<String>,
    /// Tax code assigned when no other resolution rule applies
    #[serde(default)]
    pub fallback_tax_code: Option<String>,
    #[serde(default)]
    pub currency_taxes: HashMap<String, String>,
    #[serde(default)]
    pub category_taxes: HashMap<String, String>,
    #[serde(default)]
    pub skipped_taxes: Vec<String>,
    /// Posting text template; `$customer$` is replaced with the customer name
    pub difference_text: String,
    /// Constant assignment value overriding the group identifier
    /// (special audit flag used by one jurisdiction)
    #[serde(default)]
    pub assignment_override: Option<String>,
    /// Recurring company holidays, excluded from clearing-date calculation
    #[serde(default)]
    pub holidays: Vec<Holiday>,
    pub entities: BTreeMap<String, EntityRules>,
}

/// Rules that apply to a single entity within a company code
#[derive(Debug, Clone, Deserialize)]
pub struct EntityRules {
    pub active: bool,
    pub grouping: EntityGrouping,
    #[serde(default)]
    pub valid_taxes: Vec<String>,
    /// Head-office account (stringified) to tax code
    #[serde(default)]
    pub head_office_taxes: HashMap<String, String>,
    #[serde(default)]
    pub skipped_taxes: Vec<String>,
    pub gl_accounts: GlAccounts,
    #[serde(default)]
    pub accountants: Vec<Accountant>,
}

/// How ledger items for an entity are selected at export time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityGrouping {
    /// The entity name is a backend worklist
    Worklist,
    /// All accounts of the company code
    CompanyCode,
}

/// GL accounts available for difference postings
#[derive(Debug, Clone, Deserialize)]
pub struct GlAccounts {
    #[serde(default)]
    pub penalties: Option<GlAccount>,
    #[serde(default)]
    pub write_off_debits: Option<GlAccount>,
    #[serde(default)]
    pub write_off_credits: Option<GlAccount>,
    pub write_off_common: GlAccount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlAccount {
    pub number: u64,
    pub cost_center: CostCenters,
}

/// Cost centers per customer channel; when both are equal no
/// channel lookup is needed
#[derive(Debug, Clone, Deserialize)]
pub struct CostCenters {
    pub trade: String,
    pub retail: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Accountant {
    pub name: String,
    pub mail: String,
}

/// A recurring holiday (month/day within any year)
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Holiday {
    pub month: u32,
    pub day: u32,
}

impl ClearingRules {
    /// Loads and validates the rules document.
    pub fn load(path: &Path) -> Result<Self, RulesError> {
        info!("Loading clearing rules ...");

        let content = std::fs::read_to_string(path)
            .map_err(|err| RulesError::Unreadable(path.display().to_string(), err.to_string()))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, RulesError> {
        let rules: ClearingRules = serde_yaml::from_str(content)?;
        rules.validate()?;

        Ok(rules)
    }

    /// Validates every company-code section; failing here is a run-level
    /// error, never a mid-posting surprise.
    pub fn validate(&self) -> Result<(), RulesError> {
        for (cocd, company) in &self.companies {
            if Regex::new(&company.case_id_pattern).is_err() {
                return Err(RulesError::InvalidCasePattern(cocd.clone()));
            }
            if !company.difference_text.contains("$customer$") {
                return Err(RulesError::TemplateMissingPlaceholder(cocd.clone()));
            }
            if company.base_threshold < Decimal::ZERO {
                return Err(RulesError::NegativeThreshold(cocd.clone()));
            }
            if company.entities.is_empty() {
                return Err(RulesError::NoEntities(cocd.clone()));
            }
        }

        Ok(())
    }

    pub fn company(&self, company_code: &str) -> Option<&CompanyRules> {
        self.companies.get(company_code)
    }

    /// Extracts active entities, ordered by name. A user-requested entity
    /// short-circuits the active flags: only that entity is selected.
    pub fn active_entities(&self, user_entity: Option<&str>) -> BTreeMap<String, String> {
        info!("Searching for active entities ...");

        let mut entities = BTreeMap::new();

        for (cocd, company) in &self.companies {
            if !company.active {
                warn!(
                    "Country '{}' is excluded from clearing according to the clearing rules.",
                    company.country
                );
                continue;
            }

            for (name, entity) in &company.entities {
                if let Some(requested) = user_entity {
                    if requested == name {
                        entities.insert(name.clone(), cocd.clone());
                    }
                    continue;
                }

                if !entity.active {
                    warn!(
                        "Entity '{}' is excluded from clearing according to the clearing rules.",
                        name
                    );
                    continue;
                }

                entities.insert(name.clone(), cocd.clone());
            }
        }

        info!("Active entities found: {}", entities.len());

        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn company(active: bool) -> CompanyRules {
        CompanyRules {
            country: "Switzerland".to_string(),
            active,
            case_id_pattern: r"\d{7}".to_string(),
            base_threshold: dec!(2.0),
            tax_thresholds: HashMap::new(),
            universal_tax_code: None,
            fallback_tax_code: None,
            currency_taxes: HashMap::new(),
            category_taxes: HashMap::new(),
            skipped_taxes: vec![],
            difference_text: "Customer difference $customer$".to_string(),
            assignment_override: None,
            holidays: vec![],
            entities: BTreeMap::from([(
                "CH01".to_string(),
                EntityRules {
                    active: true,
                    grouping: EntityGrouping::Worklist,
                    valid_taxes: vec![],
                    head_office_taxes: HashMap::new(),
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
                    accountants: vec![],
                },
            )]),
        }
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut c = company(true);
        c.case_id_pattern = "(".to_string();
        let rules = ClearingRules {
            companies: BTreeMap::from([("0001".to_string(), c)]),
        };
        assert!(matches!(
            rules.validate(),
            Err(RulesError::InvalidCasePattern(_))
        ));
    }

    #[test]
    fn test_validate_rejects_template_without_placeholder() {
        let mut c = company(true);
        c.difference_text = "Customer difference".to_string();
        let rules = ClearingRules {
            companies: BTreeMap::from([("0001".to_string(), c)]),
        };
        assert!(matches!(
            rules.validate(),
            Err(RulesError::TemplateMissingPlaceholder(_))
        ));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
"0001":
  country: Switzerland
  active: true
  case_id_pattern: '\d{7}'
  base_threshold: 2.0
  tax_thresholds:
    C3: 5.0
  currency_taxes:
    CHF: C3
  skipped_taxes: [K6]
  difference_text: "Customer difference $customer$"
  holidays:
    - { month: 12, day: 31 }
  entities:
    CH01:
      active: true
      grouping: worklist
      valid_taxes: [C3, ""]
      gl_accounts:
        write_off_common:
          number: 696900
          cost_center: { trade: "1020", retail: "1020" }
      accountants:
        - { name: "J. Doe", mail: "jdoe@example.com" }
"#;

        let rules = ClearingRules::from_yaml(yaml).unwrap();
        let company = rules.company("0001").unwrap();

        assert_eq!(company.country, "Switzerland");
        assert_eq!(company.base_threshold, dec!(2.0));
        assert_eq!(company.tax_thresholds["C3"], dec!(5.0));
        assert_eq!(company.universal_tax_code, None);
        assert_eq!(company.holidays[0].month, 12);

        let entity = &company.entities["CH01"];
        assert_eq!(entity.grouping, EntityGrouping::Worklist);
        assert_eq!(entity.gl_accounts.write_off_common.number, 696900);
        assert_eq!(entity.accountants[0].mail, "jdoe@example.com");
    }

    #[test]
    fn test_active_entities_honors_flags_and_user_request() {
        let mut inactive = company(false);
        inactive.entities.get_mut("CH01").unwrap().active = true;
        let rules = ClearingRules {
            companies: BTreeMap::from([
                ("0001".to_string(), company(true)),
                ("0002".to_string(), inactive),
            ]),
        };

        let all = rules.active_entities(None);
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("CH01"), Some(&"0001".to_string()));

        let none = rules.active_entities(Some("XX99"));
        assert!(none.is_empty());
    }
}
