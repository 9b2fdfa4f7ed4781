//! Batch refill: keeps every active template's occurrences materialized up
//! to the generation horizon.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::generate::{GenerateOptions, InstanceGenerator};
use crate::repository::{OccurrenceRepository, TemplateRepository};
use crate::types::TaskTemplate;

/// Outcome of one refill pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefillReport {
    /// Active templates examined.
    pub checked: usize,
    /// Templates whose horizon was moved.
    pub refilled: Vec<String>,
    /// Occurrences newly stored.
    pub generated: usize,
    /// `(template_id, error)` for templates that could not be refilled.
    pub failed: Vec<(String, String)>,
}

pub struct RefillJob {
    generator: InstanceGenerator,
    templates: Arc<dyn TemplateRepository>,
    occurrences: Arc<dyn OccurrenceRepository>,
}

impl RefillJob {
    pub fn new(
        generator: InstanceGenerator,
        templates: Arc<dyn TemplateRepository>,
        occurrences: Arc<dyn OccurrenceRepository>,
    ) -> Self {
        Self {
            generator,
            templates,
            occurrences,
        }
    }

    /// Refill every active template that is within the threshold of its
    /// horizon. A failing template is reported and skipped; only a failure
    /// to list templates aborts the pass.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<RefillReport> {
        let templates = self.templates.find_active_templates()?;
        let target = self.generator.calculate_refill_target_date(now);
        let mut report = RefillReport {
            checked: templates.len(),
            ..RefillReport::default()
        };

        for template in templates {
            if !self.generator.should_refill_instances(&template, now) {
                debug!(
                    template_id = %template.id,
                    horizon = ?template.last_generated_date,
                    "horizon far enough"
                );
                continue;
            }
            match self.refill_one(&template, target, now) {
                Ok(inserted) => {
                    report.generated += inserted;
                    report.refilled.push(template.id);
                }
                Err(e) => {
                    warn!(template_id = %template.id, "refill failed: {e}");
                    report.failed.push((template.id, e.to_string()));
                }
            }
        }

        info!(
            checked = report.checked,
            refilled = report.refilled.len(),
            generated = report.generated,
            failed = report.failed.len(),
            "refill pass finished"
        );
        Ok(report)
    }

    fn refill_one(
        &self,
        template: &TaskTemplate,
        target: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let options = GenerateOptions {
            to: Some(target),
            force: false,
        };
        let occurrences = self.generator.generate_instances(template, &options, now)?;
        let inserted = self.occurrences.insert_occurrences(&occurrences)?;
        self.templates.update_last_generated_date(&template.id, target)?;
        debug!(template_id = %template.id, %target, inserted, "template refilled");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use recur_core::config::GenerationConfig;
    use recur_core::{RecurrenceRule, TimeOfDay};

    use crate::repository::InMemoryTemplateStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 3, 0, 0).unwrap()
    }

    fn job(store: &Arc<InMemoryTemplateStore>) -> RefillJob {
        let generator = InstanceGenerator::new(GenerationConfig {
            target_generate_ahead_days: 14,
            refill_threshold_days: 7,
        });
        RefillJob::new(generator, store.clone(), store.clone())
    }

    fn daily(title: &str) -> TaskTemplate {
        TaskTemplate::new(
            title,
            RecurrenceRule::Daily {
                every_days: 1,
                anchor: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                at: TimeOfDay::new(20, 0),
            },
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        )
    }

    #[test]
    fn refills_only_templates_near_their_horizon() {
        let store = Arc::new(InMemoryTemplateStore::new());
        let fresh = daily("Journal");
        let mut covered = daily("Floss");
        covered.last_generated_date = Some(now().date_naive() + Duration::days(12));
        store.save_template(&fresh).unwrap();
        store.save_template(&covered).unwrap();

        let report = job(&store).run_once(now()).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.refilled, vec![fresh.id.clone()]);
        assert_eq!(report.generated, 15);
        assert!(report.failed.is_empty());

        let target = now().date_naive() + Duration::days(14);
        assert_eq!(
            store.get_template(&fresh.id).unwrap().unwrap().last_generated_date,
            Some(target)
        );
        assert!(store.find_by_template(&covered.id).unwrap().is_empty());
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let store = Arc::new(InMemoryTemplateStore::new());
        store.save_template(&daily("Journal")).unwrap();
        let job = job(&store);
        assert_eq!(job.run_once(now()).unwrap().generated, 15);

        let again = job.run_once(now()).unwrap();
        assert!(again.refilled.is_empty());
        assert_eq!(again.generated, 0);

        // a week later the horizon is within the threshold again
        let later = job.run_once(now() + Duration::days(8)).unwrap();
        assert_eq!(later.refilled.len(), 1);
        assert_eq!(later.generated, 8);
    }
}
