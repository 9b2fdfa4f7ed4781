//! Occurrence generation.
//!
//! Pure: the generator reads a template and a clock reading and returns new
//! occurrences. Persisting them, and moving the template's
//! `last_generated_date`, is the caller's job.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use recur_core::config::GenerationConfig;
use tracing::debug;

use crate::error::{InstanceError, Result};
use crate::types::{Occurrence, TaskTemplate, TimeWindow};

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    /// Last date to generate for; defaults to today plus the generation horizon.
    pub to: Option<NaiveDate>,
    /// Regenerate from today even if the template's horizon is already past it.
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceGenerator {
    config: GenerationConfig,
}

impl InstanceGenerator {
    pub fn new(config: GenerationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// One occurrence per matching date in the generation window.
    ///
    /// Without `force` the window starts the day after `last_generated_date`,
    /// so calling this again before the horizon moves yields nothing. The
    /// window is clamped to the template's own start and end dates.
    pub fn generate_instances(
        &self,
        template: &TaskTemplate,
        options: &GenerateOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>> {
        template.validate()?;
        if !template.active {
            debug!(template_id = %template.id, "template inactive; nothing generated");
            return Ok(Vec::new());
        }

        let today = now.date_naive();
        let mut from = match (options.force, template.last_generated_date) {
            (false, Some(last)) => last.succ_opt().map_or(today, |next| next.max(today)),
            _ => today,
        };
        from = from.max(template.start_date);

        let mut to = options.to.unwrap_or_else(|| self.calculate_refill_target_date(now));
        if let Some(end) = template.end_date {
            to = to.min(end);
        }
        if from > to {
            debug!(template_id = %template.id, %from, %to, "generation window empty");
            return Ok(Vec::new());
        }

        let at = template.rule.time_of_day();
        let occurrences = template
            .rule
            .dates_between(from, to)
            .into_iter()
            .map(|date| {
                let start = at.on(date).ok_or_else(|| {
                    InstanceError::InvalidTemplate(format!("{at:?} does not exist on {date}"))
                })?;
                Ok(Occurrence::new(
                    template.id.clone(),
                    date,
                    TimeWindow::starting_at(start, template.duration_minutes),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            template_id = %template.id,
            %from,
            %to,
            count = occurrences.len(),
            "occurrences generated"
        );
        Ok(occurrences)
    }

    /// Whether the template's horizon is within the refill threshold of today.
    /// A template that has never generated always needs a refill.
    pub fn should_refill_instances(&self, template: &TaskTemplate, now: DateTime<Utc>) -> bool {
        if !template.active {
            return false;
        }
        match template.last_generated_date {
            None => true,
            Some(last) => {
                (last - now.date_naive()).num_days() < self.config.refill_threshold_days as i64
            }
        }
    }

    pub fn calculate_refill_target_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.date_naive() + Duration::days(self.config.target_generate_ahead_days as i64)
    }
}
